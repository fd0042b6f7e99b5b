//! Caller-facing orchestration of the texture bridge.
//!
//! [`Bridge`] owns the shared [`CommandQueue`] and at most one live
//! [`GpuWorker`]. Producers call [`create_texture`](Bridge::create_texture)
//! and [`delete_texture`](Bridge::delete_texture) from any thread; both only
//! enqueue and return immediately. Results appear in the registered
//! [`ResultTable`] once the worker has executed the job and the GPU has
//! finished with it.
//!
//! Published handles resolve to `wgpu` textures through
//! [`texture`](Bridge::texture), which reads a registry the worker's backend
//! fills in and does not wait on the worker.
//!
//! `start` is one-shot while a worker is alive. Once the worker has crashed,
//! failed to initialize, or stopped, `start` may be called again and the new
//! worker drains whatever accumulated in the meantime.

pub mod job;
pub mod queue;
pub mod results;
pub mod worker;

use std::sync::Arc;

use parking_lot::Mutex;

use self::job::{CreateTextureJob, Job};
use self::queue::CommandQueue;
use self::results::ResultTable;
use self::worker::{GpuWorker, WorkerHealth, WorkerStats};
use crate::error::{BackendError, GearsError};
use crate::gpu::backend::{GpuBackend, ImageHandle};
use crate::gpu::host_context;
use crate::gpu::registry::TextureRegistry;
use crate::gpu::wgpu_backend::WgpuBackend;
use crate::options::WorkerOptions;

/// Parameters of a texture creation request, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct TextureRequest<'a> {
    /// Host id published with the handle. Must be nonzero.
    pub unique_id: u32,
    /// Host format code.
    pub format_code: i32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Requested mip levels.
    pub mip_count: u32,
    /// Level-0 pixel bytes. Copied before `create_texture` returns.
    pub pixels: &'a [u8],
}

/// Queue, result table, and GPU worker behind one handle.
pub struct Bridge {
    queue: Arc<CommandQueue>,
    worker: Mutex<Option<GpuWorker>>,
    textures: TextureRegistry,
    options: WorkerOptions,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("queue", &self.queue)
            .field("health", &self.health())
            .field("live_textures", &self.textures.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(WorkerOptions::default())
    }
}

impl Bridge {
    /// A bridge with an empty queue and no worker.
    #[must_use]
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            queue: Arc::new(CommandQueue::new()),
            worker: Mutex::new(None),
            textures: TextureRegistry::new(),
            options,
        }
    }

    /// Options the worker is spawned with.
    #[must_use]
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// The shared queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Spawn the worker on the `wgpu` backend. A host context made current
    /// on the calling thread is handed to the worker and adopted; otherwise
    /// the worker creates its own headless device.
    ///
    /// # Errors
    ///
    /// See [`start_with`](Self::start_with).
    pub fn start(&self) -> Result<(), GearsError> {
        let host = host_context::current();
        if host.is_some() {
            log::info!("Gears:: capturing current host context");
        }
        let options = self.options.clone();
        let textures = self.textures.clone();
        self.start_with(move || WgpuBackend::new(&options, host, textures))
    }

    /// Spawn the worker with a backend built by `init` on the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`GearsError::AlreadyStarted`] while a previous worker is
    /// still alive, or [`GearsError::ThreadSpawn`] if the thread cannot be
    /// created.
    pub fn start_with<B, F>(&self, init: F) -> Result<(), GearsError>
    where
        B: GpuBackend,
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        let mut slot = self.worker.lock();
        if let Some(previous) = slot.as_ref() {
            let health = previous.health();
            if health.is_alive() {
                return Err(GearsError::AlreadyStarted);
            }
            log::warn!(
                "Gears:: replacing {health:?} worker ({} jobs pending)",
                self.queue.len()
            );
        }
        // Join the dead worker before its replacement touches the queue.
        drop(slot.take());
        *slot = Some(GpuWorker::spawn(
            Arc::clone(&self.queue),
            &self.options,
            init,
        )?);
        Ok(())
    }

    /// Stop the worker and wait for it. Queued jobs stay queued and health
    /// reads `Stopped`.
    pub fn stop(&self) {
        if let Some(worker) = self.worker.lock().as_mut() {
            worker.shutdown();
        }
    }

    /// Enqueue a texture creation. Returns `false` (nothing enqueued) for
    /// the reserved id 0.
    pub fn create_texture(&self, request: &TextureRequest<'_>) -> bool {
        if request.unique_id == 0 {
            log::warn!("Gears:: refusing texture request with reserved id 0");
            return false;
        }
        self.queue.enqueue(Job::CreateTexture(CreateTextureJob {
            unique_id: request.unique_id,
            format_code: request.format_code,
            width: request.width,
            height: request.height,
            mip_count: request.mip_count,
            pixels: request.pixels.to_vec(),
        }));
        true
    }

    /// Enqueue deletion of a published texture. The handle is not checked.
    pub fn delete_texture(&self, handle: ImageHandle) {
        self.queue.enqueue(Job::DeleteTexture { handle });
    }

    /// Resolve a published handle to its texture. `None` once the handle
    /// has been deleted, or for handles this bridge's `wgpu` backend never
    /// issued.
    #[must_use]
    pub fn texture(&self, handle: ImageHandle) -> Option<wgpu::Texture> {
        self.textures.get(handle)
    }

    /// Registry the `wgpu` backend started by [`start`](Self::start)
    /// publishes into.
    #[must_use]
    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    /// Install the table results are published into, returning the previous
    /// one.
    pub fn register_results(&self, table: ResultTable) -> Option<ResultTable> {
        self.queue.register_results(table)
    }

    /// Take the shared lock without a guard. Pair with
    /// [`unlock_raw`](Self::unlock_raw) on the same thread.
    pub fn lock_raw(&self) {
        self.queue.lock_raw();
    }

    /// Release a hold taken by [`lock_raw`](Self::lock_raw). Unmatched
    /// calls are ignored.
    pub fn unlock_raw(&self) -> bool {
        self.queue.unlock_raw()
    }

    /// Health of the current worker, or `Uninitialized` if none was started.
    #[must_use]
    pub fn health(&self) -> WorkerHealth {
        self.worker
            .lock()
            .as_ref()
            .map_or(WorkerHealth::Uninitialized, GpuWorker::health)
    }

    /// Counters of the current worker.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.worker
            .lock()
            .as_ref()
            .map(GpuWorker::stats)
            .unwrap_or_default()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::gpu::host_context::HostContext;
    use crate::testing::{headless_device, read_rgba8, CallLog, FakeBackend};

    fn fast() -> WorkerOptions {
        WorkerOptions {
            poll_interval_ms: 1,
            ..WorkerOptions::default()
        }
    }

    #[test]
    fn id_zero_is_refused() {
        let bridge = Bridge::new(fast());
        let refused = bridge.create_texture(&TextureRequest {
            unique_id: 0,
            format_code: 4,
            width: 1,
            height: 1,
            mip_count: 1,
            pixels: &[0; 4],
        });
        assert!(!refused);
        assert!(bridge.queue().is_empty());
    }

    #[test]
    fn pixels_are_copied_at_enqueue() {
        let bridge = Bridge::new(fast());
        let mut pixels = vec![1u8; 4];
        assert!(bridge.create_texture(&TextureRequest {
            unique_id: 1,
            format_code: 4,
            width: 1,
            height: 1,
            mip_count: 1,
            pixels: &pixels,
        }));
        pixels.fill(9);
        match bridge.queue().pop() {
            Some(Job::CreateTexture(job)) => assert_eq!(job.pixels, vec![1; 4]),
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[test]
    fn health_before_start_is_uninitialized() {
        let bridge = Bridge::new(fast());
        assert_eq!(bridge.health(), WorkerHealth::Uninitialized);
        assert_eq!(bridge.stats(), WorkerStats::default());
    }

    #[test]
    fn second_start_is_refused_while_alive() {
        let bridge = Bridge::new(fast());
        bridge
            .start_with(|| Ok(FakeBackend::new(CallLog::default())))
            .unwrap();
        let err = bridge
            .start_with(|| Ok(FakeBackend::new(CallLog::default())))
            .unwrap_err();
        assert!(matches!(err, GearsError::AlreadyStarted));
        bridge.stop();
    }

    #[test]
    fn stopped_bridge_can_start_again() {
        let bridge = Bridge::new(fast());
        bridge
            .start_with(|| Ok(FakeBackend::new(CallLog::default())))
            .unwrap();
        bridge.stop();
        assert_eq!(bridge.health(), WorkerHealth::Stopped);
        bridge
            .start_with(|| Ok(FakeBackend::new(CallLog::default())))
            .unwrap();
    }

    #[test]
    fn published_handle_resolves_on_the_adopted_host_device() {
        let Some((device, queue)) = headless_device(wgpu::Features::empty())
        else {
            return;
        };
        let _ = host_context::make_current(HostContext {
            device: device.clone(),
            queue: queue.clone(),
        });
        let bridge = Bridge::new(fast());
        let _ = bridge.register_results(ResultTable::new(1));
        bridge.start().unwrap();
        let _ = host_context::release_current();

        let pixels: Vec<u8> = (0..16).collect();
        assert!(bridge.create_texture(&TextureRequest {
            unique_id: 9,
            format_code: 4,
            width: 2,
            height: 2,
            mip_count: 1,
            pixels: &pixels,
        }));
        let deadline = Instant::now() + Duration::from_secs(10);
        while bridge.stats().executed == 0 {
            assert!(Instant::now() < deadline, "worker stalled");
            std::thread::sleep(Duration::from_millis(2));
        }
        let slot = bridge
            .queue()
            .with_results(|table| table.slots()[0])
            .unwrap();
        assert_eq!(slot.id, 9);

        // Copies on the host's own queue only accept textures of its device.
        let texture = bridge.texture(slot.texture_handle).unwrap();
        assert_eq!(read_rgba8(&device, &queue, &texture, 0).unwrap(), pixels);

        bridge.delete_texture(slot.texture_handle);
        while bridge.stats().executed < 2 {
            assert!(Instant::now() < deadline, "worker stalled");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(bridge.texture(slot.texture_handle).is_none());
        assert!(bridge.textures().is_empty());
        bridge.stop();
    }
}
