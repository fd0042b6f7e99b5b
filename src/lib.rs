// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! Background GPU texture bridge for host game engines.
//!
//! A host engine hands texture creation and deletion requests to the bridge
//! from any thread. A single worker thread owns the GPU device, drains the
//! requests in submission order, converts block-compressed sources into
//! uncompressed textures, generates mipmaps, waits for the GPU to finish,
//! and publishes `{id, handle}` pairs into a result table the host owns.
//!
//! # Key entry points
//!
//! - [`bridge::Bridge`] - queue, result table and worker behind one handle
//! - [`ffi`] - the C ABI the host engine links against
//! - [`options::WorkerOptions`] - runtime configuration (poll interval, lock
//!   policy, frame capture)
//! - [`format`] - host format codes and their upload recipes
//!
//! # Architecture
//!
//! Producers append [`bridge::job::Job`]s to a [`bridge::queue::CommandQueue`]
//! guarded by one reentrant lock, which also guards the result table. The
//! [`bridge::worker::GpuWorker`] thread sleeps for the poll interval, then
//! executes every job queued at the start of the cycle against a
//! [`gpu::backend::GpuBackend`]. The production backend is
//! [`gpu::wgpu_backend::WgpuBackend`]; tests use the instrumented backend in
//! `testing`.

pub mod bridge;
pub mod error;
pub mod ffi;
pub mod format;
pub mod gpu;
pub mod options;
#[cfg(any(test, feature = "test-backend"))]
pub mod testing;

pub use bridge::Bridge;
pub use error::{BackendError, GearsError};
pub use options::WorkerOptions;
