//! Common types and utilities for Glasswall.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the engine daemon (`glasswall`) and the control
//! client (`gwctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using newline-delimited
//! JSON. The client sends [`Command`] variants and receives [`Response`]
//! variants. Device signals (lock, ambient, power save, visibility) and the
//! now-playing feed all arrive this way.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, MediaInfo};
//!
//! let cmd = Command::SetMedia(Some(MediaInfo {
//!     title: "Teardrop".to_string(),
//!     artist: "Massive Attack".to_string(),
//!     album: None,
//!     art_path: Some("/tmp/cover.jpg".to_string()),
//!     video_path: None,
//! }));
//!
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Now-playing metadata from the media feed.
///
/// Two updates with the same `(title, artist)` pair are the same media
/// identity; anything else restarts art and video resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    /// Album art image on disk
    #[serde(default)]
    pub art_path: Option<String>,
    /// Animated cover clip, if one was discovered
    #[serde(default)]
    pub video_path: Option<String>,
}

impl MediaInfo {
    /// The identity pair used to detect media changes
    pub fn identity(&self) -> (&str, &str) {
        (&self.title, &self.artist)
    }
}

/// Commands sent from client to daemon via IPC.
///
/// # Examples
///
/// ```
/// use common::Command;
///
/// // The screen was locked
/// let cmd = Command::SetLocked(true);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Ping the daemon
    Ping,
    /// Query engine status
    Query,
    /// Surface visibility changed
    SetVisible(bool),
    /// Screen lock state changed
    SetLocked(bool),
    /// Ambient (always-on) display entered or left
    SetAmbient(bool),
    /// Power saving mode toggled
    SetPowerSave(bool),
    /// New now-playing metadata, or `None` when playback stopped
    SetMedia(Option<MediaInfo>),
    /// Home-screen background image (absolute path), `None` to clear
    SetWallpaper { path: Option<String> },
    /// Home-screen foreground subject layer (absolute path), `None` to clear
    SetSubject { path: Option<String> },
    /// Re-read the configuration file
    Reload,
    /// Stop the daemon
    Shutdown,
}

/// Response from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Pong,
    Error(EngineError),
    Status(EngineStatus),
}

/// Which texture the engine is presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Video,
    MediaArt,
    Wallpaper,
    Gradient,
    Blank,
}

/// Snapshot of the engine state, returned for [`Command::Query`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub visible: bool,
    pub locked: bool,
    pub ambient: bool,
    pub power_save: bool,
    /// `(title, artist)` of the current media identity
    pub media: Option<(String, String)>,
    pub video_file: Option<String>,
    pub video_ready: bool,
    pub content: ContentKind,
    /// Human readable redraw cadence
    pub cadence: String,
    pub surface: Option<(u32, u32)>,
    /// Most recent diagnostic log lines, oldest first
    pub diagnostics: Vec<String>,
}

/// Get the IPC socket path
///
/// Uses `$XDG_RUNTIME_DIR/glasswall.sock`, falling back to
/// `/tmp/glasswall-<uid>.sock` when no runtime directory is set.
pub fn get_socket_path() -> std::path::PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            std::path::PathBuf::from(runtime_dir).join("glasswall.sock")
        }
        _ => std::path::PathBuf::from(format!(
            "/tmp/glasswall-{}.sock",
            unsafe { libc::getuid() }
        )),
    }
}
