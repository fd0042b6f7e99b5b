//! The GPU worker: one thread owning the GPU context and draining the queue.
//!
//! The thread creates its backend first (so the GPU context lives on the
//! worker thread), then loops: sleep for the poll interval, drain every job
//! queued at the start of the cycle, repeat. A stop request interrupts the
//! sleep. A panic inside a job is caught, logged, and ends the loop with
//! [`WorkerHealth::Crashed`]; jobs enqueued afterwards stay queued until a
//! new worker is started.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::job::{CreateTextureJob, Job};
use super::queue::CommandQueue;
use super::results::ResultSlot;
use crate::error::{BackendError, GearsError};
use crate::format::{self, FormatInfo, GpuFormat};
use crate::gpu::backend::{GpuBackend, ImageDesc, ImageHandle};
use crate::options::{ExecutionMode, WorkerOptions};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerHealth {
    /// Not started, or started and still bringing up the GPU context.
    Uninitialized = 0,
    /// Draining the queue.
    Running = 1,
    /// A job panicked; the loop has exited.
    Crashed = 2,
    /// GPU context initialization failed; the loop never started.
    Failed = 3,
    /// Stopped on request.
    Stopped = 4,
}

impl WorkerHealth {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Crashed,
            3 => Self::Failed,
            4 => Self::Stopped,
            _ => Self::Uninitialized,
        }
    }

    /// Whether the worker thread may still drain jobs.
    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Running)
    }
}

/// Counters published by the worker thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Completed drain cycles.
    pub cycles: u64,
    /// Jobs executed (successfully or not).
    pub executed: u64,
    /// Results written into the result table.
    pub published: u64,
    /// Jobs that returned an error.
    pub failed: u64,
}

/// What one drain cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Jobs executed.
    pub executed: usize,
    /// Results published.
    pub published: usize,
    /// Jobs that returned an error.
    pub failed: usize,
}

/// A job panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanic {
    /// Kind of the job that panicked.
    pub kind: &'static str,
    /// Panic payload, if it was a string.
    pub message: String,
}

impl std::fmt::Display for JobPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker crashed in {} job: {}", self.kind, self.message)
    }
}

impl JobPanic {
    fn from_payload(
        kind: &'static str,
        payload: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self { kind, message }
    }
}

/// State owned by the worker thread: the backend and the queue it drains.
pub struct WorkerContext<B> {
    backend: B,
    queue: Arc<CommandQueue>,
    execution: ExecutionMode,
}

impl<B: GpuBackend> WorkerContext<B> {
    /// Bind a backend to the queue it will drain.
    pub fn new(
        backend: B,
        queue: Arc<CommandQueue>,
        execution: ExecutionMode,
    ) -> Self {
        Self {
            backend,
            queue,
            execution,
        }
    }

    /// The backend jobs execute against.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Execute every job queued at the start of the cycle, in order,
    /// publishing creation results as they complete.
    ///
    /// # Errors
    ///
    /// Returns [`JobPanic`] if a job panicked. Jobs behind it stay queued.
    pub fn drain(&mut self) -> Result<DrainReport, JobPanic> {
        let queue = Arc::clone(&self.queue);
        let _held = match self.execution {
            ExecutionMode::HoldLock => Some(queue.lock()),
            ExecutionMode::ReleaseLock => None,
        };

        let pending = queue.len();
        if pending > 0 {
            log::debug!("Gears:: draining {pending} queued jobs");
        }

        let mut report = DrainReport::default();
        for _ in 0..pending {
            let Some(job) = queue.pop() else { break };
            let kind = job.kind();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.execute(job)));
            report.executed += 1;
            match outcome {
                Ok(Ok(Some(result))) => {
                    if queue.publish(result).is_some() {
                        report.published += 1;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    log::error!("Gears:: {kind} job failed: {e}");
                }
                Err(payload) => {
                    return Err(JobPanic::from_payload(kind, payload.as_ref()))
                }
            }
        }
        Ok(report)
    }

    /// Run one job against the backend. Creation jobs return the result to
    /// publish; nothing is written to the result table here.
    ///
    /// # Errors
    ///
    /// Returns the backend error that stopped the job. Images allocated by
    /// the failed job are released.
    pub fn execute(
        &mut self,
        job: Job,
    ) -> Result<Option<ResultSlot>, BackendError> {
        match job {
            Job::CreateTexture(create) => self.create_texture(&create).map(Some),
            Job::DeleteTexture { handle } => {
                log::debug!("Gears:: deleting texture {handle}");
                self.backend.delete(handle);
                Ok(None)
            }
        }
    }

    fn create_texture(
        &mut self,
        job: &CreateTextureJob,
    ) -> Result<ResultSlot, BackendError> {
        let info = format::lookup(job.format_code);
        let expected = info.upload_size(job.width, job.height);
        if job.pixels.len() < expected {
            return Err(BackendError::PixelDataTooShort {
                expected,
                actual: job.pixels.len(),
            });
        }
        let mip_levels =
            format::clamp_mip_count(job.mip_count, job.width, job.height);
        log::debug!(
            "Gears:: creating {} texture {}x{} ({mip_levels} mips) for id {}",
            info.name,
            job.width,
            job.height,
            job.unique_id
        );

        self.backend.begin_capture();
        let built = self.build_texture(&info, job, mip_levels);
        self.backend.end_capture();

        let handle = built?;
        log::info!(
            "Gears:: texture created with id {handle} for {}",
            job.unique_id
        );
        Ok(ResultSlot {
            id: job.unique_id,
            texture_handle: handle,
        })
    }

    /// Upload, convert if needed, build mips, then wait for the GPU so the
    /// handle is safe to sample once published.
    fn build_texture(
        &mut self,
        info: &FormatInfo,
        job: &CreateTextureJob,
        mip_levels: u32,
    ) -> Result<ImageHandle, BackendError> {
        let pixels = info.normalize(&job.pixels, job.width, job.height);

        let handle = match info.conversion {
            None => self.backend.upload(
                &ImageDesc {
                    format: info.gpu,
                    width: job.width,
                    height: job.height,
                    mip_levels,
                },
                &pixels,
            )?,
            Some(pass) => {
                let source = self.backend.upload(
                    &ImageDesc {
                        format: info.gpu,
                        width: job.width,
                        height: job.height,
                        mip_levels: 1,
                    },
                    &pixels,
                )?;
                let converted = self.backend.convert(
                    source,
                    &ImageDesc {
                        format: GpuFormat::Rgba8,
                        width: job.width,
                        height: job.height,
                        mip_levels,
                    },
                    pass,
                );
                // The source is released whether or not conversion worked.
                self.backend.delete(source);
                converted?
            }
        };

        let finished = if mip_levels > 1 {
            self.backend.generate_mipmaps(handle)
        } else {
            Ok(())
        }
        .and_then(|()| self.backend.fence_wait());

        if let Err(e) = finished {
            self.backend.delete(handle);
            return Err(e);
        }
        Ok(handle)
    }
}

/// Shared between the worker thread and its handle.
#[derive(Default)]
struct WorkerShared {
    health: AtomicU8,
    cycles: AtomicU64,
    executed: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

impl WorkerShared {
    fn set_health(&self, health: WorkerHealth) {
        self.health.store(health as u8, Ordering::Release);
    }

    fn health(&self) -> WorkerHealth {
        WorkerHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    fn record(&self, report: DrainReport) {
        let _ = self.cycles.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .executed
            .fetch_add(report.executed as u64, Ordering::Relaxed);
        let _ = self
            .published
            .fetch_add(report.published as u64, Ordering::Relaxed);
        let _ = self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    fn stats(&self) -> WorkerStats {
        WorkerStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running worker thread.
pub struct GpuWorker {
    shared: Arc<WorkerShared>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for GpuWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuWorker")
            .field("health", &self.health())
            .field("stats", &self.stats())
            .finish()
    }
}

impl GpuWorker {
    /// Spawn the worker thread. `init` runs on the new thread and creates
    /// the backend that owns the GPU context.
    ///
    /// # Errors
    ///
    /// Returns [`GearsError::ThreadSpawn`] if the thread fails to spawn.
    pub fn spawn<B, F>(
        queue: Arc<CommandQueue>,
        options: &WorkerOptions,
        init: F,
    ) -> Result<Self, GearsError>
    where
        B: GpuBackend,
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::new(WorkerShared::default());
        let interval = options.poll_interval();
        let execution = options.execution;

        let thread = std::thread::Builder::new()
            .name("gears-gpu-worker".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || {
                    Self::thread_loop(
                        init, queue, &shared, &stop_rx, interval, execution,
                    );
                }
            })
            .map_err(GearsError::ThreadSpawn)?;

        Ok(Self {
            shared,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn health(&self) -> WorkerHealth {
        self.shared.health()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats()
    }

    /// Stop the loop and wait for the thread to finish.
    pub fn shutdown(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Background thread main loop.
    fn thread_loop<B, F>(
        init: F,
        queue: Arc<CommandQueue>,
        shared: &WorkerShared,
        stop_rx: &mpsc::Receiver<()>,
        interval: Duration,
        execution: ExecutionMode,
    ) where
        B: GpuBackend,
        F: FnOnce() -> Result<B, BackendError>,
    {
        log::info!("Gears:: starting worker thread");
        let backend = match panic::catch_unwind(AssertUnwindSafe(init)) {
            Ok(Ok(backend)) => backend,
            Ok(Err(e)) => {
                log::error!("Gears:: GPU context initialization failed: {e}");
                shared.set_health(WorkerHealth::Failed);
                return;
            }
            Err(_) => {
                log::error!("Gears:: GPU context initialization panicked");
                shared.set_health(WorkerHealth::Failed);
                return;
            }
        };

        let mut context = WorkerContext::new(backend, queue, execution);
        shared.set_health(WorkerHealth::Running);
        log::info!("Gears:: starting loop ({interval:?} interval)");

        loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            match context.drain() {
                Ok(report) => shared.record(report),
                Err(crash) => {
                    log::error!("Gears:: {crash}");
                    shared.set_health(WorkerHealth::Crashed);
                    return;
                }
            }
        }

        log::info!("Gears:: worker stopped");
        shared.set_health(WorkerHealth::Stopped);
    }
}

impl Drop for GpuWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
