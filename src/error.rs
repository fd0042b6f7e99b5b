//! Crate-level error types.

use std::fmt;

/// Errors raised by a [`GpuBackend`](crate::gpu::backend::GpuBackend)
/// while bringing up the GPU context or executing a job.
#[derive(Debug)]
pub enum BackendError {
    /// No compatible GPU adapter found.
    AdapterRequest(wgpu::RequestAdapterError),
    /// GPU device request failed (limits or features not met).
    DeviceRequest(wgpu::RequestDeviceError),
    /// A conversion program failed to compose or validate.
    ShaderCompile(String),
    /// The device cannot sample the requested source format.
    UnsupportedFormat(wgpu::TextureFormat),
    /// A job referenced an image the backend does not know about.
    UnknownImage(u32),
    /// Waiting on the completion fence failed.
    Fence(String),
    /// Zero-sized or larger than the device allows.
    InvalidExtent {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// The caller-supplied pixel data is shorter than the upload size.
    PixelDataTooShort {
        /// Bytes the format and dimensions require.
        expected: usize,
        /// Bytes actually supplied.
        actual: usize,
    },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterRequest(e) => {
                write!(f, "no compatible GPU adapter found: {e}")
            }
            Self::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            Self::ShaderCompile(msg) => {
                write!(f, "shader compilation failed: {msg}")
            }
            Self::UnsupportedFormat(format) => {
                write!(f, "device cannot sample {format:?}")
            }
            Self::UnknownImage(handle) => write!(f, "unknown image {handle}"),
            Self::Fence(msg) => write!(f, "fence wait failed: {msg}"),
            Self::InvalidExtent { width, height } => {
                write!(f, "invalid image extent {width}x{height}")
            }
            Self::PixelDataTooShort { expected, actual } => write!(
                f,
                "pixel data too short: expected {expected} bytes, got \
                 {actual}"
            ),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AdapterRequest(e) => Some(e),
            Self::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors produced by the gears crate.
#[derive(Debug)]
pub enum GearsError {
    /// GPU backend failure.
    Backend(BackendError),
    /// A worker is already alive; `start` is one-shot while it runs.
    AlreadyStarted,
    /// Failed to spawn the worker thread.
    ThreadSpawn(std::io::Error),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
}

impl fmt::Display for GearsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "GPU error: {e}"),
            Self::AlreadyStarted => {
                write!(f, "GPU worker already running")
            }
            Self::ThreadSpawn(e) => {
                write!(f, "failed to spawn thread: {e}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
        }
    }
}

impl std::error::Error for GearsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            Self::Io(e) | Self::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for GearsError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<std::io::Error> for GearsError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
