//! C ABI consumed by the host engine.
//!
//! Every entry point forwards to one process-wide [`Bridge`], created on
//! first use with options from [`WorkerOptions::from_env`]. Nothing is
//! reported back to the caller except return codes and
//! [`workerHealth`]; diagnostics go to the log.
//!
//! Return codes: `0` on success, `-1` when the call was refused.
#![allow(non_snake_case)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::bridge::results::{ResultSlot, ResultTable};
use crate::bridge::{Bridge, TextureRequest};
use crate::error::GearsError;
use crate::options::WorkerOptions;

static BRIDGE: OnceLock<Bridge> = OnceLock::new();
static RENDER_EVENT_START: OneShot = OneShot::new();

/// Host render-thread callback type.
pub type RenderEventFn = extern "system" fn(event_id: i32);

fn bridge() -> &'static Bridge {
    BRIDGE.get_or_init(|| {
        #[cfg(feature = "logging")]
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();
        Bridge::new(WorkerOptions::from_env())
    })
}

/// Start the GPU worker. A host context current on the calling thread is
/// adopted by the worker.
///
/// Returns `-1` if a worker is already running or the thread could not be
/// spawned.
#[no_mangle]
pub extern "C" fn startWorker() -> i32 {
    match bridge().start() {
        Ok(()) => 0,
        Err(GearsError::AlreadyStarted) => {
            log::warn!("Gears:: startWorker called while a worker is alive");
            -1
        }
        Err(e) => {
            log::error!("Gears:: failed to start worker: {e}");
            -1
        }
    }
}

/// Enqueue a texture creation. `bytes` is copied before this returns.
///
/// Returns `-1` for the reserved id 0, a negative dimension, a negative
/// `byte_len`, or a null `bytes` with nonzero `byte_len`.
///
/// # Safety
///
/// `bytes` must be null or valid for reads of `byte_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn createTexture(
    unique_id: u32,
    format_code: i32,
    width: i32,
    height: i32,
    mip_count: i32,
    bytes: *const u8,
    byte_len: i32,
) -> i32 {
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height))
    else {
        log::warn!("Gears:: refusing texture {unique_id} with size {width}x{height}");
        return -1;
    };
    let Ok(byte_len) = usize::try_from(byte_len) else {
        log::warn!("Gears:: refusing texture {unique_id} with {byte_len} bytes");
        return -1;
    };
    let pixels: &[u8] = if byte_len == 0 {
        &[]
    } else if bytes.is_null() {
        log::warn!("Gears:: refusing texture {unique_id} with null pixel data");
        return -1;
    } else {
        // SAFETY: caller guarantees `bytes` is readable for `byte_len`.
        unsafe { std::slice::from_raw_parts(bytes, byte_len) }
    };

    let request = TextureRequest {
        unique_id,
        format_code,
        width,
        height,
        mip_count: u32::try_from(mip_count).unwrap_or(1),
        pixels,
    };
    if bridge().create_texture(&request) {
        0
    } else {
        -1
    }
}

/// Enqueue deletion of a published texture handle.
#[no_mangle]
pub extern "C" fn deleteTexture(handle: u32) {
    bridge().delete_texture(handle);
}

/// Register the caller's result array. A null `results` unregisters.
///
/// # Safety
///
/// `results` must be null or point to `capacity` writable [`ResultSlot`]s
/// that stay valid and in place until another array is registered. The
/// caller may only touch the array while holding [`lockMutex`].
#[no_mangle]
pub unsafe extern "C" fn registerResultArray(
    results: *mut ResultSlot,
    capacity: i32,
) {
    let capacity = usize::try_from(capacity).unwrap_or(0);
    // SAFETY: forwarded from this function's contract.
    match unsafe { ResultTable::from_raw_parts(results, capacity) } {
        Some(table) => {
            let _ = bridge().register_results(table);
        }
        None => {
            log::warn!("Gears:: null result array, unregistering");
            let _ = bridge().queue().unregister_results();
        }
    }
}

/// Take the shared queue lock. Reentrant on the same thread.
#[no_mangle]
pub extern "C" fn lockMutex() {
    bridge().lock_raw();
}

/// Release one [`lockMutex`] taken on this thread. Unmatched calls are
/// ignored.
#[no_mangle]
pub extern "C" fn unlockMutex() {
    let _ = bridge().unlock_raw();
}

/// Worker state: 0 uninitialized, 1 running, 2 crashed, 3 failed,
/// 4 stopped.
#[no_mangle]
pub extern "C" fn workerHealth() -> i32 {
    i32::from(bridge().health() as u8)
}

/// Latch that lets exactly one caller through.
struct OneShot(AtomicBool);

impl OneShot {
    const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// `true` for the first call only.
    fn fire(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Run `start` for the first render event seen by `latch`.
fn start_on_first_event(
    latch: &OneShot,
    event_id: i32,
    start: impl FnOnce() -> i32,
) -> Option<i32> {
    if !latch.fire() {
        return None;
    }
    log::debug!("Gears:: render event {event_id} starts the worker");
    Some(start())
}

/// The host fires this every frame; only the first event starts the worker.
extern "system" fn on_render_event(event_id: i32) {
    let _ = start_on_first_event(&RENDER_EVENT_START, event_id, || startWorker());
}

/// Callback the host invokes on its render thread to start the worker
/// there, with the host's context current.
#[no_mangle]
pub extern "C" fn GetRenderEventFunc() -> RenderEventFn {
    on_render_event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_across_threads() {
        let latch = OneShot::new();
        let fired: usize = std::thread::scope(|scope| {
            let handles: Vec<_> =
                (0..8).map(|_| scope.spawn(|| latch.fire())).collect();
            handles
                .into_iter()
                .map(|handle| usize::from(handle.join().unwrap()))
                .sum()
        });
        assert_eq!(fired, 1);
        assert!(!latch.fire());
    }

    #[test]
    fn repeated_render_events_start_once() {
        let latch = OneShot::new();
        let mut starts = 0;
        let codes: Vec<Option<i32>> = (0..16)
            .map(|frame| {
                start_on_first_event(&latch, frame, || {
                    starts += 1;
                    0
                })
            })
            .collect();
        assert_eq!(starts, 1);
        assert_eq!(codes[0], Some(0));
        assert!(codes[1..].iter().all(Option::is_none));
    }
}
