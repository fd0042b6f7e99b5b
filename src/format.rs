//! Host texture format codes and their GPU upload recipes.
//!
//! The host engine identifies formats by integer code. Each code maps to a
//! [`FormatInfo`] describing the GPU format to upload into, how many bytes
//! the upload needs, and which conversion program (if any) re-encodes the
//! source into an uncompressed destination image. Unknown codes fall back to
//! plain RGBA8 with a logged warning; they never fail the job.

/// Edge length of a compressed block, in texels.
pub const BLOCK_EDGE: u32 = 4;

/// GPU-side storage format of an uploaded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFormat {
    /// 8-bit RGBA, uncompressed.
    Rgba8,
    /// 8-bit BGRA, uncompressed.
    Bgra8,
    /// BC1 / DXT1, 8 bytes per block.
    Bc1,
    /// BC3 / DXT5, 16 bytes per block.
    Bc3,
    /// BC7, 16 bytes per block.
    Bc7,
    /// ETC2 RGB8, 8 bytes per block.
    Etc2Rgb8,
    /// ETC2 RGBA8 (EAC alpha), 16 bytes per block.
    Etc2Rgba8,
    /// ASTC 4x4 LDR, 16 bytes per block.
    Astc4x4,
}

impl GpuFormat {
    /// Bytes per 4x4 block for compressed formats, `None` otherwise.
    #[must_use]
    pub fn block_bytes(self) -> Option<u32> {
        match self {
            Self::Rgba8 | Self::Bgra8 => None,
            Self::Bc1 | Self::Etc2Rgb8 => Some(8),
            Self::Bc3 | Self::Bc7 | Self::Etc2Rgba8 | Self::Astc4x4 => Some(16),
        }
    }

    /// Whether this format is block-compressed.
    #[must_use]
    pub fn is_compressed(self) -> bool {
        self.block_bytes().is_some()
    }

    /// The matching `wgpu` texture format.
    #[must_use]
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            Self::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            Self::Bc1 => wgpu::TextureFormat::Bc1RgbaUnorm,
            Self::Bc3 => wgpu::TextureFormat::Bc3RgbaUnorm,
            Self::Bc7 => wgpu::TextureFormat::Bc7RgbaUnorm,
            Self::Etc2Rgb8 => wgpu::TextureFormat::Etc2Rgb8Unorm,
            Self::Etc2Rgba8 => wgpu::TextureFormat::Etc2Rgba8Unorm,
            Self::Astc4x4 => wgpu::TextureFormat::Astc {
                block: wgpu::AstcBlock::B4x4,
                channel: wgpu::AstcChannel::Unorm,
            },
        }
    }
}

/// Program used by the conversion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionPass {
    /// Copy texels unchanged.
    Passthrough,
    /// Decode sRGB-encoded texels to linear.
    GammaDecode,
}

/// CPU-side rewrite applied to uncompressed pixels before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Upload bytes as supplied.
    Native,
    /// Tightly packed RGB, expanded to RGBA with opaque alpha.
    Rgb24,
    /// ARGB byte order, swizzled to RGBA.
    Argb32,
}

impl PixelLayout {
    /// Bytes per texel as supplied by the host.
    #[must_use]
    pub fn source_bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgb24 => 3,
            Self::Native | Self::Argb32 => 4,
        }
    }
}

/// Upload recipe for one host format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Host format code this entry was resolved from.
    pub code: i32,
    /// Human-readable host name.
    pub name: &'static str,
    /// Storage format of the uploaded source image.
    pub gpu: GpuFormat,
    /// Host byte layout of uncompressed pixels.
    pub layout: PixelLayout,
    /// Conversion program; `None` means the upload is published directly.
    pub conversion: Option<ConversionPass>,
}

const fn plain(
    code: i32,
    name: &'static str,
    gpu: GpuFormat,
    layout: PixelLayout,
) -> FormatInfo {
    FormatInfo { code, name, gpu, layout, conversion: None }
}

const fn compressed(
    code: i32,
    name: &'static str,
    gpu: GpuFormat,
    pass: ConversionPass,
) -> FormatInfo {
    FormatInfo {
        code,
        name,
        gpu,
        layout: PixelLayout::Native,
        conversion: Some(pass),
    }
}

/// Host format codes understood by the bridge.
pub const FORMAT_TABLE: &[FormatInfo] = &[
    plain(3, "RGB24", GpuFormat::Rgba8, PixelLayout::Rgb24),
    plain(4, "RGBA32", GpuFormat::Rgba8, PixelLayout::Native),
    plain(5, "ARGB32", GpuFormat::Rgba8, PixelLayout::Argb32),
    plain(8, "RGBA8", GpuFormat::Rgba8, PixelLayout::Native),
    plain(14, "BGRA32", GpuFormat::Bgra8, PixelLayout::Native),
    compressed(10, "DXT1", GpuFormat::Bc1, ConversionPass::Passthrough),
    compressed(12, "DXT5", GpuFormat::Bc3, ConversionPass::Passthrough),
    compressed(25, "BC7", GpuFormat::Bc7, ConversionPass::Passthrough),
    compressed(45, "ETC2_RGB", GpuFormat::Etc2Rgb8, ConversionPass::GammaDecode),
    compressed(
        47,
        "ETC2_RGBA8",
        GpuFormat::Etc2Rgba8,
        ConversionPass::GammaDecode,
    ),
    compressed(48, "ASTC_4x4", GpuFormat::Astc4x4, ConversionPass::GammaDecode),
];

/// Entry used for codes missing from [`FORMAT_TABLE`].
pub const FALLBACK: FormatInfo =
    plain(8, "RGBA8", GpuFormat::Rgba8, PixelLayout::Native);

/// Resolve a host format code, falling back to RGBA8 with a warning.
#[must_use]
pub fn lookup(code: i32) -> FormatInfo {
    FORMAT_TABLE
        .iter()
        .find(|info| info.code == code)
        .copied()
        .unwrap_or_else(|| {
            log::warn!(
                "Gears:: texture format {code} is not implemented, falling \
                 back to {}",
                FALLBACK.name
            );
            FormatInfo { code, ..FALLBACK }
        })
}

impl FormatInfo {
    /// Bytes the host must supply for level 0 of a `width` x `height` image.
    #[must_use]
    pub fn upload_size(&self, width: u32, height: u32) -> usize {
        match self.gpu.block_bytes() {
            Some(block_bytes) => {
                let blocks_wide = width.div_ceil(BLOCK_EDGE) as usize;
                let blocks_high = height.div_ceil(BLOCK_EDGE) as usize;
                blocks_wide * blocks_high * block_bytes as usize
            }
            None => {
                width as usize
                    * height as usize
                    * self.layout.source_bytes_per_texel() as usize
            }
        }
    }

    /// Rewrite host pixels into the byte order the GPU format expects.
    ///
    /// Only the first [`upload_size`](Self::upload_size) bytes are used;
    /// callers validate the length beforehand.
    #[must_use]
    pub fn normalize<'a>(
        &self,
        pixels: &'a [u8],
        width: u32,
        height: u32,
    ) -> std::borrow::Cow<'a, [u8]> {
        let used = &pixels[..self.upload_size(width, height).min(pixels.len())];
        match self.layout {
            PixelLayout::Native => std::borrow::Cow::Borrowed(used),
            PixelLayout::Rgb24 => used
                .chunks_exact(3)
                .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], u8::MAX])
                .collect(),
            PixelLayout::Argb32 => used
                .chunks_exact(4)
                .flat_map(|argb| [argb[1], argb[2], argb[3], argb[0]])
                .collect(),
        }
    }
}

/// Number of mip levels in a full chain for `width` x `height`.
#[must_use]
pub fn full_mip_chain(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Clamp a requested mip count into `1..=full_mip_chain`.
#[must_use]
pub fn clamp_mip_count(requested: u32, width: u32, height: u32) -> u32 {
    requested.clamp(1, full_mip_chain(width, height))
}
