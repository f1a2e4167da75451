mod bitmap;
mod buffer;
mod config;
mod diagnostics;
mod engine;
mod ipc_server;
mod macros;
mod overlay;
mod render;
mod video;
mod wayland;

#[cfg(feature = "gpu")]
mod gpu;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Config;
use crate::diagnostics::DiagnosticLog;
use crate::engine::{Driver, EngineHandle, LifecycleEvent, LocalFileResolver};
use crate::render::{GraphicsBackend, RenderHandle, SoftwareBackend};
use crate::video::VideoController;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_config_path()?;
    let config = Config::load_from_path(&config_path);
    let log_level = match &config {
        Ok(cfg) => cfg.general.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("Starting glasswall v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(cfg) => {
            log::info!("Configuration: {}", config_path.display());
            log::info!(
                "  frame interval {}ms, power save {}ms, hidden reset {}s",
                cfg.engine.frame_interval_ms,
                cfg.engine.power_save_interval_ms,
                cfg.engine.hidden_reset_secs
            );
            log::info!(
                "  video art {}, debug overlay {}",
                if cfg.engine.enable_video_art { "on" } else { "off" },
                if cfg.engine.show_debug_overlay { "on" } else { "off" }
            );
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {:#}. Using defaults.", e);
            Config::default()
        }
    };

    let diagnostics = Arc::new(DiagnosticLog::new());
    let video = VideoController::new(
        video::default_factory(config.video.hardware_decode),
        Arc::clone(&diagnostics),
    );
    let render = RenderHandle::spawn(select_backend(), video, Arc::clone(&diagnostics))
        .context("Failed to start render thread")?;

    let (driver, engine) = Driver::new(
        config,
        config_path,
        render,
        Arc::new(LocalFileResolver),
        diagnostics,
    );
    let engine_task = tokio::spawn(driver.run());

    let stop = Arc::new(AtomicBool::new(false));

    let ipc_task = tokio::spawn(ipc_server::start(engine.clone(), Arc::clone(&stop)));
    let wayland_thread = wayland::spawn(engine.clone(), Arc::clone(&stop))?;
    let wayland_task = tokio::task::spawn_blocking(move || wayland_thread.join());

    tokio::spawn(watch_signals(engine.clone()));

    // The engine ends on a shutdown event; losing the surface connection
    // also ends the process
    tokio::pin!(engine_task);
    tokio::pin!(wayland_task);
    let wayland_done = tokio::select! {
        result = &mut engine_task => {
            report_engine(result);
            false
        }
        _ = &mut wayland_task => {
            log::warn!("Wayland thread stopped, shutting down engine");
            log_and_continue!(engine.send(LifecycleEvent::Shutdown), "stop engine");
            report_engine((&mut engine_task).await);
            true
        }
    };

    // The render thread has been joined by the engine at this point
    stop.store(true, Ordering::Release);
    if !wayland_done && wayland_task.await.is_err() {
        log::error!("Wayland thread panicked");
    }
    match ipc_task.await {
        Ok(Err(e)) => log::error!("IPC server error: {:#}", e),
        Err(e) => log::error!("IPC server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("glasswall stopped");
    Ok(())
}

fn report_engine(result: Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => log::info!("Engine stopped"),
        Ok(Err(e)) => log::error!("Engine error: {:#}", e),
        Err(e) => log::error!("Engine task failed: {}", e),
    }
}

/// SIGINT and SIGTERM become a lifecycle shutdown
async fn watch_signals(engine: EngineHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => log::info!("Received SIGTERM, shutting down..."),
        _ = sigint.recv() => log::info!("Received SIGINT, shutting down..."),
    }

    log_and_continue!(engine.send(LifecycleEvent::Shutdown), "request shutdown");
}

/// wgpu when an adapter is usable, the CPU compositor otherwise
fn select_backend() -> Box<dyn GraphicsBackend + Send> {
    #[cfg(feature = "gpu")]
    {
        match gpu::probe() {
            Ok(adapter) => {
                log::info!("GPU rendering on {}", adapter);
                return Box::new(gpu::WgpuBackend::new());
            }
            Err(e) => log::warn!("GPU unavailable ({}), using software rendering", e),
        }
    }

    #[cfg(not(feature = "gpu"))]
    log::info!("GPU rendering not compiled (build with --features gpu to enable)");

    Box::new(SoftwareBackend::new())
}
