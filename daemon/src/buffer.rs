use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

/// Buffers kept per surface; a frame arriving while all are held by the
/// compositor waits for a release
pub const MAX_BUFFERS: usize = 3;

/// Set while the compositor holds the buffer, cleared on `wl_buffer.release`
#[derive(Debug, Default)]
pub struct BufferState {
    busy: AtomicBool,
}

impl BufferState {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn mark_busy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Helper for creating and managing shared memory buffers for Wayland
pub struct ShmBuffer {
    pool: wl_shm_pool::WlShmPool,
    buffer: wl_buffer::WlBuffer,
    mmap: memmap2::MmapMut,
    state: Arc<BufferState>,
    width: u32,
    height: u32,
}

impl ShmBuffer {
    pub fn new<D>(
        shm: &wl_shm::WlShm,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
    ) -> anyhow::Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()>
            + Dispatch<wl_buffer::WlBuffer, Arc<BufferState>>
            + 'static,
    {
        let stride = width * 4; // ARGB8888
        let size = stride as usize * height as usize;
        if size == 0 || size > i32::MAX as usize {
            anyhow::bail!("Invalid buffer size {}x{}", width, height);
        }

        let file = tempfile::tempfile()?;
        file.set_len(size as u64)?;

        // The file is private to this process and sized above
        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        let pool = shm.create_pool(file.as_fd(), size as i32, qh, ());

        let state = Arc::new(BufferState::default());
        let buffer = pool.create_buffer(
            0,
            width as i32,
            height as i32,
            stride as i32,
            wl_shm::Format::Argb8888,
            qh,
            Arc::clone(&state),
        );

        Ok(Self {
            pool,
            buffer,
            mmap,
            state,
            width,
            height,
        })
    }

    /// Write a frame. Data must be ARGB8888 (BGRA byte order).
    pub fn write_image_data(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() != self.mmap.len() {
            anyhow::bail!(
                "Image data size mismatch: expected {}, got {}",
                self.mmap.len(),
                data.len()
            );
        }

        self.mmap.copy_from_slice(data);
        Ok(())
    }

    pub fn buffer(&self) -> &wl_buffer::WlBuffer {
        &self.buffer
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    pub fn mark_busy(&self) {
        self.state.mark_busy();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.pool.destroy();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Reuse the free buffer at this index
    Reuse(usize),
    /// Allocate a new buffer
    Create,
    /// Every buffer of this size is held by the compositor
    Wait,
}

/// Choose where the next `width x height` frame goes.
///
/// `buffers` yields `(width, height, busy)`. Free buffers of another size are
/// never reused; they are dropped by [`retain_matching`].
pub fn choose_slot(
    buffers: impl IntoIterator<Item = (u32, u32, bool)>,
    width: u32,
    height: u32,
) -> Slot {
    let mut matching = 0;
    for (i, (w, h, busy)) in buffers.into_iter().enumerate() {
        if (w, h) != (width, height) {
            continue;
        }
        if !busy {
            return Slot::Reuse(i);
        }
        matching += 1;
    }
    if matching < MAX_BUFFERS {
        Slot::Create
    } else {
        Slot::Wait
    }
}

/// Drop free buffers whose size no longer matches the surface
pub fn retain_matching(buffers: &mut Vec<ShmBuffer>, width: u32, height: u32) {
    buffers.retain(|b| b.is_busy() || (b.width, b.height) == (width, height));
}
