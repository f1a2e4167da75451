//! Wayland background surface
//!
//! - surface: layer surface state, buffer presentation and the event loop
//! - event_handlers: Wayland protocol event handlers

mod event_handlers;
mod surface;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;

use crate::engine::EngineHandle;

/// Start the thread that owns the display connection. It runs until `stop`
/// is set, the surface is closed, or the connection fails.
pub fn spawn(engine: EngineHandle, stop: Arc<AtomicBool>) -> Result<JoinHandle<Result<()>>> {
    std::thread::Builder::new()
        .name("wayland".to_string())
        .spawn(move || {
            let (frame_tx, frame_rx) = surface::frame_channel();
            let result = surface::run_connection(&engine, &frame_tx, &frame_rx, &stop);
            match &result {
                Ok(()) => log::info!("Wayland thread exited"),
                Err(e) => log::error!("Wayland connection failed: {:#}", e),
            }
            result
        })
        .context("Failed to spawn Wayland thread")
}
