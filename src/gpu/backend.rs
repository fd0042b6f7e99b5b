//! The seam between job execution and the GPU API.
//!
//! The worker drives texture creation as a fixed sequence of backend calls
//! (upload, optional conversion, delete source, mipmaps, fence). Every GPU
//! operation goes through [`GpuBackend`], so the sequence can run against
//! the real `wgpu` device or an instrumented in-memory backend.

use crate::error::BackendError;
use crate::format::{ConversionPass, GpuFormat};

/// Nonzero identifier of a GPU image owned by a backend.
pub type ImageHandle = u32;

/// Shape of an image to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Storage format.
    pub format: GpuFormat,
    /// Logical width in texels.
    pub width: u32,
    /// Logical height in texels.
    pub height: u32,
    /// Number of mip levels to allocate.
    pub mip_levels: u32,
}

/// GPU operations the worker needs. Implementations are owned by the worker
/// thread and are only ever called from it.
pub trait GpuBackend {
    /// Allocate an image and upload level 0. Uncompressed formats are copied
    /// as a sub-image; compressed formats are uploaded as whole blocks and
    /// `pixels` holds exactly the block-size formula's byte count.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnsupportedFormat`] if the device cannot
    /// sample `desc.format`.
    fn upload(
        &mut self,
        desc: &ImageDesc,
        pixels: &[u8],
    ) -> Result<ImageHandle, BackendError>;

    /// Draw `source` into a newly allocated uncompressed destination image
    /// of shape `dest` using the given program. The source is left intact.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownImage`] if `source` is not live.
    fn convert(
        &mut self,
        source: ImageHandle,
        dest: &ImageDesc,
        pass: ConversionPass,
    ) -> Result<ImageHandle, BackendError>;

    /// Fill levels `1..mip_levels` of `image` from level 0.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownImage`] if `image` is not live.
    fn generate_mipmaps(&mut self, image: ImageHandle)
        -> Result<(), BackendError>;

    /// Release an image. Unknown handles are ignored.
    fn delete(&mut self, image: ImageHandle);

    /// Insert a fence after everything submitted so far and block until it
    /// signals. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Fence`] if the device was lost while waiting.
    fn fence_wait(&mut self) -> Result<(), BackendError>;

    /// Start a graphics-debugger capture, if one is attached.
    fn begin_capture(&mut self) {}

    /// End the capture started by [`begin_capture`](Self::begin_capture).
    fn end_capture(&mut self) {}
}
