use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::{Command, EngineStatus, MediaInfo, Response};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "gwctl")]
#[command(about = "Glasswall live wallpaper control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Toggle::On
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check if the daemon is running
    Ping,

    /// Show engine state
    Status,

    /// Report surface visibility
    Visible { state: Toggle },

    /// Report screen lock state
    Lock { state: Toggle },

    /// Enter or leave ambient (always-on) mode
    Ambient { state: Toggle },

    /// Toggle power saving
    PowerSave { state: Toggle },

    /// Report now-playing media
    Media {
        #[arg(long)]
        title: String,

        #[arg(long)]
        artist: String,

        #[arg(long)]
        album: Option<String>,

        /// Album art image
        #[arg(long)]
        art: Option<PathBuf>,

        /// Animated cover video
        #[arg(long)]
        video: Option<PathBuf>,
    },

    /// Playback stopped
    MediaClear,

    /// Set the home-screen background, or clear it when no path is given
    Wallpaper { path: Option<PathBuf> },

    /// Set the foreground subject layer, or clear it when no path is given
    Subject { path: Option<PathBuf> },

    /// Re-read the daemon configuration
    Reload,

    /// Stop the daemon
    Shutdown,
}

#[derive(Debug, Error)]
enum ClientError {
    #[error("cannot connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon closed the connection without a response")]
    NoResponse,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = build_command(cli.command)?;

    match send_command(&command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!("\nIs the daemon running? Try starting it with: glasswall");
            std::process::exit(1);
        }
    }
}

fn build_command(command: Commands) -> Result<Command> {
    Ok(match command {
        Commands::Ping => Command::Ping,
        Commands::Status => Command::Query,
        Commands::Visible { state } => Command::SetVisible(state.enabled()),
        Commands::Lock { state } => Command::SetLocked(state.enabled()),
        Commands::Ambient { state } => Command::SetAmbient(state.enabled()),
        Commands::PowerSave { state } => Command::SetPowerSave(state.enabled()),
        Commands::Media {
            title,
            artist,
            album,
            art,
            video,
        } => Command::SetMedia(Some(MediaInfo {
            title,
            artist,
            album,
            art_path: art.as_deref().map(canonical).transpose()?,
            video_path: video.as_deref().map(canonical).transpose()?,
        })),
        Commands::MediaClear => Command::SetMedia(None),
        Commands::Wallpaper { path } => Command::SetWallpaper {
            path: path.as_deref().map(canonical).transpose()?,
        },
        Commands::Subject { path } => Command::SetSubject {
            path: path.as_deref().map(canonical).transpose()?,
        },
        Commands::Reload => Command::Reload,
        Commands::Shutdown => Command::Shutdown,
    })
}

/// The daemon resolves paths against its own working directory, so send
/// absolute ones
fn canonical(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve {}", path.display()))?;
    Ok(absolute.to_string_lossy().into_owned())
}

async fn send_command(command: &Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path)
        .await
        .map_err(|source| ClientError::Connect {
            path: socket_path.clone(),
            source,
        })?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let command_json = serde_json::to_string(command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut response_line = String::new();
    if reader.read_line(&mut response_line).await? == 0 {
        return Err(ClientError::NoResponse.into());
    }

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => println!("✓ Success"),
        Response::Pong => println!("✓ Daemon is running"),
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => print_status(&status),
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn print_status(status: &EngineStatus) {
    println!("Engine Status:");
    println!("  Version: {}", status.version);
    println!("  Uptime: {}s", status.uptime_secs);
    println!(
        "  Visible: {}  Locked: {}  Ambient: {}  Power save: {}",
        on_off(status.visible),
        on_off(status.locked),
        on_off(status.ambient),
        on_off(status.power_save)
    );
    match &status.surface {
        Some((w, h)) => println!("  Surface: {}x{}", w, h),
        None => println!("  Surface: none"),
    }
    match &status.media {
        Some((title, artist)) => println!("  Media: {} - {}", artist, title),
        None => println!("  Media: none"),
    }
    println!(
        "  Video: {} ({})",
        status.video_file.as_deref().unwrap_or("none"),
        if status.video_ready { "ready" } else { "not ready" }
    );
    println!("  Content: {:?}", status.content);
    println!("  Cadence: {}", status.cadence);
    if !status.diagnostics.is_empty() {
        println!("  Diagnostics:");
        for line in &status.diagnostics {
            println!("    {}", line);
        }
    }
}
