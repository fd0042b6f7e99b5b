//! GPU resource management.
//!
//! Provides the backend seam the worker executes jobs through, the `wgpu`
//! implementation of it, and the shader and pipeline helpers behind the
//! conversion pass.

/// The backend trait every GPU call goes through.
pub mod backend;
/// Per-thread "current" host device captured at worker start.
pub mod host_context;
/// Bind group layout, pipeline and sampler helpers for full-screen draws.
pub mod pipeline_helpers;
/// Live textures by handle, shared with the host.
pub mod registry;
/// WGSL shader composition with `#import` support via naga-oil.
pub mod shader_composer;
/// `wgpu` implementation of the backend.
pub mod wgpu_backend;
