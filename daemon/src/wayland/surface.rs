use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use smithay_client_toolkit::{
    compositor::CompositorState,
    output::OutputState,
    registry::RegistryState,
    shell::{
        WaylandSurface,
        wlr_layer::{Anchor, KeyboardInteractivity, Layer, LayerShell, LayerSurface},
    },
    shm::Shm,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wayland_client::backend::WaylandError;
use wayland_client::{Connection, QueueHandle, globals::registry_queue_init, protocol::wl_output};

use crate::buffer::{ShmBuffer, Slot, choose_slot, retain_matching};
use crate::engine::{EngineHandle, LifecycleEvent};
use crate::render::{ChannelPresenter, PresentedFrame};
use crate::{commit_buffer, log_and_continue};

/// Upper bound on frame latency while the compositor is quiet
const POLL_INTERVAL: Duration = Duration::from_millis(4);

/// The background layer surface and the Wayland globals it needs
pub struct WallpaperSurface {
    pub(super) registry_state: RegistryState,
    pub(super) compositor_state: CompositorState,
    pub(super) layer_shell: LayerShell,
    pub(super) output_state: OutputState,
    pub(super) shm: Shm,
    pub(super) layer: Option<LayerSurface>,
    pub(super) output: Option<wl_output::WlOutput>,
    /// Last configured size
    pub(super) size: Option<(u32, u32)>,
    /// `SurfaceCreated` sent and not yet destroyed
    pub(super) announced: bool,
    pub(super) buffers: Vec<ShmBuffer>,
    pub(super) pending: Option<PresentedFrame>,
    pub(super) engine: EngineHandle,
    pub(super) frame_tx: Sender<PresentedFrame>,
    pub(super) exit: bool,
}

impl WallpaperSurface {
    /// Background layer on `output`, anchored to every edge
    pub(super) fn create_layer_surface(
        &mut self,
        output: wl_output::WlOutput,
        qh: &QueueHandle<Self>,
    ) {
        let surface = self.compositor_state.create_surface(qh);
        let layer = self.layer_shell.create_layer_surface(
            qh,
            surface,
            Layer::Background,
            Some("glasswall"),
            Some(&output),
        );

        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.commit();

        self.layer = Some(layer);
        self.output = Some(output);
        log::info!("Created background layer surface");
    }

    /// Configure: first time announces the surface, later sizes resize it
    pub(super) fn on_configure(&mut self, width: u32, height: u32) {
        let (width, height) = if width == 0 || height == 0 {
            self.output_size().unwrap_or((width, height))
        } else {
            (width, height)
        };
        if width == 0 || height == 0 {
            log::warn!("Ignoring configure with empty size");
            return;
        }

        let previous = self.size.replace((width, height));
        retain_matching(&mut self.buffers, width, height);

        if !self.announced {
            log::info!("Surface ready: {}x{}", width, height);
            self.announced = true;
            log_and_continue!(
                self.engine.send(LifecycleEvent::SurfaceCreated {
                    surface: Arc::new(ChannelPresenter::new(self.frame_tx.clone())),
                    width,
                    height,
                }),
                "announce surface"
            );
        } else if previous != Some((width, height)) {
            log::info!("Surface resized: {}x{}", width, height);
            log_and_continue!(
                self.engine
                    .send(LifecycleEvent::SurfaceResized { width, height }),
                "report resize"
            );
        }

        if let Some(layer) = &self.layer {
            layer.commit();
        }
    }

    /// The compositor closed the surface or the connection went away
    pub(super) fn on_closed(&mut self) {
        if self.announced {
            self.announced = false;
            log_and_continue!(
                self.engine.send(LifecycleEvent::SurfaceDestroyed),
                "report surface loss"
            );
        }
        self.layer = None;
        self.size = None;
        self.pending = None;
        self.buffers.clear();
    }

    fn output_size(&self) -> Option<(u32, u32)> {
        let info = self.output_state.info(self.output.as_ref()?)?;
        let (w, h) = info.logical_size?;
        Some((w.max(0) as u32, h.max(0) as u32))
    }

    /// Write the pending frame into a free buffer and commit it
    fn present(&mut self, qh: &QueueHandle<Self>) -> Result<()> {
        let Some(layer) = &self.layer else {
            self.pending = None;
            return Ok(());
        };
        let Some(frame) = self.pending.take() else {
            return Ok(());
        };

        let slots = self.buffers.iter().map(|b| (b.width(), b.height(), b.is_busy()));
        let index = match choose_slot(slots, frame.width, frame.height) {
            Slot::Reuse(i) => i,
            Slot::Create => {
                let buffer = ShmBuffer::new(self.shm.wl_shm(), frame.width, frame.height, qh)?;
                self.buffers.push(buffer);
                self.buffers.len() - 1
            }
            Slot::Wait => {
                log::trace!("All buffers busy, holding frame");
                self.pending = Some(frame);
                return Ok(());
            }
        };

        let buffer = &mut self.buffers[index];
        buffer.write_image_data(&frame.argb)?;
        commit_buffer!(layer, buffer, frame.width, frame.height);
        buffer.mark_busy();
        Ok(())
    }
}

/// Frames the render thread sends towards the compositor
pub fn frame_channel() -> (Sender<PresentedFrame>, Receiver<PresentedFrame>) {
    crossbeam_channel::bounded(2)
}

/// One connection lifetime. Returns when `stop` is set or the surface is
/// closed; a lost connection is an error.
pub(super) fn run_connection(
    engine: &EngineHandle,
    frame_tx: &Sender<PresentedFrame>,
    frame_rx: &Receiver<PresentedFrame>,
    stop: &AtomicBool,
) -> Result<()> {
    let conn = Connection::connect_to_env()?;
    let (globals, mut event_queue) = registry_queue_init(&conn)?;
    let qh = event_queue.handle();

    let mut surface = WallpaperSurface {
        registry_state: RegistryState::new(&globals),
        compositor_state: CompositorState::bind(&globals, &qh)?,
        layer_shell: LayerShell::bind(&globals, &qh)?,
        output_state: OutputState::new(&globals, &qh),
        shm: Shm::bind(&globals, &qh)?,
        layer: None,
        output: None,
        size: None,
        announced: false,
        buffers: Vec::new(),
        pending: None,
        engine: engine.clone(),
        frame_tx: frame_tx.clone(),
        exit: false,
    };

    log::info!("Connected to Wayland compositor");

    // Outputs arrive in the first roundtrip; the layer surface is created
    // for the first one
    event_queue.roundtrip(&mut surface)?;
    if surface.layer.is_none() {
        anyhow::bail!("No outputs available");
    }

    let result = (|| -> Result<()> {
        while !surface.exit && !stop.load(Ordering::Acquire) {
            match frame_rx.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => {
                    // Only the newest frame is worth showing
                    surface.pending = Some(frame_rx.try_iter().last().unwrap_or(frame));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            event_queue.dispatch_pending(&mut surface)?;
            if let Some(guard) = event_queue.prepare_read() {
                match guard.read() {
                    Ok(_) => {}
                    Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
            event_queue.dispatch_pending(&mut surface)?;

            log_and_continue!(surface.present(&qh), "present frame");
            event_queue.flush()?;
        }
        Ok(())
    })();

    surface.on_closed();
    result
}
