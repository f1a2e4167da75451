/// Integration tests for the control protocol
/// These tests pin the wire format shared by `glasswall` and `gwctl`
use common::{Command, ContentKind, EngineError, EngineStatus, MediaInfo, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

fn status() -> EngineStatus {
    EngineStatus {
        version: "0.1.0".to_string(),
        uptime_secs: 42,
        visible: true,
        locked: true,
        ambient: false,
        power_save: false,
        media: Some(("Xtal".to_string(), "Aphex Twin".to_string())),
        video_file: Some("/clips/xtal.mp4".to_string()),
        video_ready: true,
        content: ContentKind::Video,
        cadence: "every 33ms".to_string(),
        surface: Some((1920, 1080)),
        diagnostics: vec!["12:00:00.000 [video] Source ready".to_string()],
    }
}

#[test]
fn test_signal_commands_wire_format() {
    assert_eq!(
        serde_json::to_string(&Command::SetLocked(true)).unwrap(),
        r#"{"SetLocked":true}"#
    );
    assert_eq!(serde_json::to_string(&Command::Ping).unwrap(), r#""Ping""#);
    assert_eq!(
        serde_json::to_string(&Command::SetWallpaper { path: None }).unwrap(),
        r#"{"SetWallpaper":{"path":null}}"#
    );
}

#[test]
fn test_media_command_from_minimal_json() {
    let json = r#"{"SetMedia":{"title":"Alberto Balsalm","artist":"Aphex Twin"}}"#;
    let command: Command = serde_json::from_str(json).unwrap();
    match command {
        Command::SetMedia(Some(media)) => {
            assert_eq!(media.identity(), ("Alberto Balsalm", "Aphex Twin"));
            assert!(media.video_path.is_none());
        }
        other => panic!("Wrong command type: {:?}", other),
    }

    let cleared: Command = serde_json::from_str(r#"{"SetMedia":null}"#).unwrap();
    assert_eq!(cleared, Command::SetMedia(None));
}

#[test]
fn test_status_response_roundtrip() {
    let response = Response::Status(status());
    let json = serde_json::to_string(&response).unwrap();
    let back: Response = serde_json::from_str(&json).unwrap();
    assert_eq!(back, response);
}

#[test]
fn test_error_responses() {
    let errors = [
        EngineError::Io("broken pipe".to_string()),
        EngineError::Ipc("Invalid command".to_string()),
        EngineError::InvalidArgument("media needs a title or an artist".to_string()),
        EngineError::NotFound("Image file not found: /x.png".to_string()),
        EngineError::Unavailable("engine stopped".to_string()),
    ];
    for error in errors {
        let json = serde_json::to_string(&Response::Error(error.clone())).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Response::Error(error));
    }
}

#[test]
fn test_unknown_command_is_rejected() {
    assert!(serde_json::from_str::<Command>(r#"{"SetShader":{"name":"plasma"}}"#).is_err());
    assert!(serde_json::from_str::<Command>(r#"{"SetLocked":"yes"}"#).is_err());
}

/// One request/response exchange with newline framing, as both ends do it
#[tokio::test]
async fn test_newline_framed_exchange() {
    let (client, server) = UnixStream::pair().unwrap();

    let server_task = tokio::spawn(async move {
        let (reader, mut writer) = server.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut seen = Vec::new();
        while reader.read_line(&mut line).await.unwrap() > 0 {
            let command: Command = serde_json::from_str(&line).unwrap();
            let response = match &command {
                Command::Ping => Response::Pong,
                Command::Query => Response::Status(status()),
                _ => Response::Ok,
            };
            seen.push(command);
            let json = serde_json::to_string(&response).unwrap();
            writer.write_all(json.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            line.clear();
        }
        seen
    });

    let (reader, mut writer) = client.into_split();
    let mut reader = BufReader::new(reader);
    let media = MediaInfo {
        title: "4".to_string(),
        artist: "Aphex Twin".to_string(),
        album: Some("Richard D. James Album".to_string()),
        art_path: None,
        video_path: None,
    };
    let commands = [Command::Ping, Command::SetMedia(Some(media)), Command::Query];

    let mut responses = Vec::new();
    for command in &commands {
        let json = serde_json::to_string(command).unwrap();
        writer.write_all(json.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        responses.push(serde_json::from_str::<Response>(&line).unwrap());
    }
    drop(writer);

    assert_eq!(responses[0], Response::Pong);
    assert_eq!(responses[1], Response::Ok);
    assert!(matches!(&responses[2], Response::Status(s) if s.cadence == "every 33ms"));

    let seen = server_task.await.unwrap();
    assert_eq!(seen, commands);
}
