//! The host's "current" GPU context, per thread.
//!
//! A Rust host that already owns a `wgpu` device installs it here on the
//! thread that will call [`Bridge::start`](crate::bridge::Bridge::start).
//! `start` captures whatever is current on the invoking thread and hands it
//! to the worker, which then adopts that device instead of creating its own
//! headless one. Textures the worker publishes then belong to the host's
//! device and resolve through
//! [`Bridge::texture`](crate::bridge::Bridge::texture).

use std::cell::RefCell;

/// A device/queue pair owned by the host.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// The host's logical device.
    pub device: wgpu::Device,
    /// The host's queue on `device`.
    pub queue: wgpu::Queue,
}

thread_local! {
    static CURRENT: RefCell<Option<HostContext>> = const { RefCell::new(None) };
}

/// Make `context` current on the calling thread, returning the previous one.
pub fn make_current(context: HostContext) -> Option<HostContext> {
    CURRENT.with(|current| current.borrow_mut().replace(context))
}

/// Clear the calling thread's current context.
pub fn release_current() -> Option<HostContext> {
    CURRENT.with(|current| current.borrow_mut().take())
}

/// The context current on the calling thread, if any.
#[must_use]
pub fn current() -> Option<HostContext> {
    CURRENT.with(|current| current.borrow().clone())
}
