use anyhow::{Context, Result};
use common::{Command, EngineError, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::config::expand_path;
use crate::engine::{EngineHandle, LifecycleEvent};

const ACCEPT_TIMEOUT: Duration = Duration::from_millis(100);

/// What a command turns into
#[derive(Debug)]
enum Action {
    Reply(Response),
    Forward(LifecycleEvent),
    Query,
}

pub async fn start(engine: EngineHandle, stop: Arc<AtomicBool>) -> Result<()> {
    start_at(&common::get_socket_path(), engine, stop).await
}

/// Serve on `socket_path` until `stop` is set; the socket file is removed on exit
pub async fn start_at(socket_path: &Path, engine: EngineHandle, stop: Arc<AtomicBool>) -> Result<()> {
    // A stale socket from a previous run blocks bind
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    log::info!("IPC server listening on: {}", socket_path.display());

    while !stop.load(Ordering::Acquire) {
        match tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _addr))) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, engine).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => log::error!("Error accepting connection: {}", e),
            Err(_) => continue,
        }
    }

    let _ = std::fs::remove_file(socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(stream: UnixStream, engine: EngineHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &engine).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(EngineError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command(command: Command, engine: &EngineHandle) -> Response {
    log::debug!("Handling command: {:?}", command);

    let result = match translate(command) {
        Ok(Action::Reply(response)) => Ok(response),
        Ok(Action::Forward(event)) => engine.send(event).map(|_| Response::Ok),
        Ok(Action::Query) => engine.query().await.map(Response::Status),
        Err(e) => Err(e),
    };
    result.unwrap_or_else(|e| {
        log::warn!("Command rejected: {}", e);
        Response::Error(e)
    })
}

/// Validate a command and map it onto a lifecycle event
fn translate(command: Command) -> Result<Action, EngineError> {
    let event = match command {
        Command::Ping => return Ok(Action::Reply(Response::Pong)),
        Command::Query => return Ok(Action::Query),
        Command::SetVisible(visible) => LifecycleEvent::SetVisible(visible),
        Command::SetLocked(locked) => LifecycleEvent::SetLocked(locked),
        Command::SetAmbient(ambient) => LifecycleEvent::SetAmbient(ambient),
        Command::SetPowerSave(enabled) => LifecycleEvent::SetPowerSave(enabled),
        Command::SetMedia(media) => {
            if let Some(info) = &media
                && info.title.trim().is_empty()
                && info.artist.trim().is_empty()
            {
                return Err(EngineError::InvalidArgument(
                    "media needs a title or an artist".to_string(),
                ));
            }
            LifecycleEvent::MediaChanged(media)
        }
        Command::SetWallpaper { path } => LifecycleEvent::SetWallpaper(existing_file(path)?),
        Command::SetSubject { path } => LifecycleEvent::SetSubject(existing_file(path)?),
        Command::Reload => LifecycleEvent::Reload,
        Command::Shutdown => {
            log::info!("Shutdown requested over IPC");
            LifecycleEvent::Shutdown
        }
    };
    Ok(Action::Forward(event))
}

fn existing_file(path: Option<String>) -> Result<Option<PathBuf>, EngineError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let expanded = expand_path(&path);
    if !expanded.is_file() {
        return Err(EngineError::NotFound(format!("Image file not found: {}", path)));
    }
    Ok(Some(expanded))
}
