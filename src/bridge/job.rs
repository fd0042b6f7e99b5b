//! Deferred GPU operations.

use crate::gpu::backend::ImageHandle;

/// Arguments of a texture creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTextureJob {
    /// Host-assigned id published alongside the handle. Never 0.
    pub unique_id: u32,
    /// Host format code, resolved through [`crate::format::lookup`].
    pub format_code: i32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Requested mip levels on the published image.
    pub mip_count: u32,
    /// Level-0 pixel bytes, copied from the caller at enqueue time.
    pub pixels: Vec<u8>,
}

/// One deferred unit of work. Executed once, in submission order, then
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Create a texture and publish its handle.
    CreateTexture(CreateTextureJob),
    /// Delete a previously published texture.
    DeleteTexture {
        /// Handle as published in the result table.
        handle: ImageHandle,
    },
}

impl Job {
    /// Short name for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTexture(_) => "create",
            Self::DeleteTexture { .. } => "delete",
        }
    }
}
