//! [`GpuBackend`] on a `wgpu` device.
//!
//! The backend either adopts the host's device (see
//! [`host_context`](super::host_context)) or brings up its own headless one.
//! Conversion is a full-screen draw sampling the source image into mip 0 of
//! an uncompressed destination; mipmaps are successive down-sample draws
//! with the pass-through program; the completion fence is an empty
//! submission followed by a blocking poll on its index.

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use super::backend::{GpuBackend, ImageDesc, ImageHandle};
use super::host_context::HostContext;
use super::pipeline_helpers;
use super::registry::TextureRegistry;
use super::shader_composer::{self, ShaderComposer};
use crate::error::BackendError;
use crate::format::{ConversionPass, BLOCK_EDGE};
use crate::options::WorkerOptions;

/// Compression features requested from the adapter when available.
const COMPRESSION_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_COMPRESSION_BC
    .union(wgpu::Features::TEXTURE_COMPRESSION_ETC2)
    .union(wgpu::Features::TEXTURE_COMPRESSION_ASTC);

/// Usage of every image that can be published: sampled by the host, copied
/// either way, and drawn into for mips.
pub const PUBLISHED_USAGE: wgpu::TextureUsages =
    wgpu::TextureUsages::TEXTURE_BINDING
        .union(wgpu::TextureUsages::COPY_SRC)
        .union(wgpu::TextureUsages::COPY_DST)
        .union(wgpu::TextureUsages::RENDER_ATTACHMENT);

/// Block-compressed sources are only sampled by the conversion pass.
const SOURCE_USAGE: wgpu::TextureUsages =
    wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::COPY_DST);

/// Uniform block read by the conversion programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ConvertParams {
    /// Logical size over allocated size; below 1.0 for padded block images.
    uv_scale: [f32; 2],
    _pad: [f32; 2],
}

/// A live image and the shape it was allocated with.
struct Image {
    texture: wgpu::Texture,
    desc: ImageDesc,
    /// Allocated extent (block-aligned for compressed formats).
    extent: wgpu::Extent3d,
}

/// GPU backend owning one `wgpu` device on the worker thread.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    composer: ShaderComposer,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: FxHashMap<(ConversionPass, wgpu::TextureFormat), wgpu::RenderPipeline>,
    nearest_sampler: wgpu::Sampler,
    linear_sampler: wgpu::Sampler,
    unit_params: wgpu::Buffer,
    images: FxHashMap<ImageHandle, Image>,
    registry: TextureRegistry,
    frame_capture: bool,
}

impl WgpuBackend {
    /// Adopt `host` if given, otherwise create a headless device. Every
    /// image is entered into `registry` under the handle it is known by.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if adapter/device request or conversion
    /// program composition fails.
    pub fn new(
        options: &WorkerOptions,
        host: Option<HostContext>,
        registry: TextureRegistry,
    ) -> Result<Self, BackendError> {
        let (device, queue) = match host {
            Some(host) => {
                log::info!("Gears:: adopting host GPU context");
                (host.device, host.queue)
            }
            None => Self::request_headless_device(options)?,
        };
        Self::from_device(device, queue, options, registry)
    }

    fn request_headless_device(
        options: &WorkerOptions,
    ) -> Result<(wgpu::Device, wgpu::Queue), BackendError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: options.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .map_err(BackendError::AdapterRequest)?;

        let info = adapter.get_info();
        log::info!(
            "Gears:: adapter {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Gears Worker Device"),
            required_features: adapter.features() & COMPRESSION_FEATURES,
            required_limits: adapter.limits(),
            ..Default::default()
        }))
        .map_err(BackendError::DeviceRequest)
    }

    /// Build the conversion state on an existing device.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ShaderCompile`] if a conversion program fails
    /// to compose.
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        options: &WorkerOptions,
        registry: TextureRegistry,
    ) -> Result<Self, BackendError> {
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Gears Convert Layout"),
                entries: &pipeline_helpers::convert_layout_entries(),
            });
        let unit_params =
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Gears Unit Params"),
                contents: bytemuck::bytes_of(&ConvertParams {
                    uv_scale: [1.0, 1.0],
                    _pad: [0.0; 2],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut backend = Self {
            nearest_sampler: pipeline_helpers::clamp_sampler(
                &device,
                "Gears Nearest Sampler",
                wgpu::FilterMode::Nearest,
            ),
            linear_sampler: pipeline_helpers::clamp_sampler(
                &device,
                "Gears Linear Sampler",
                wgpu::FilterMode::Linear,
            ),
            composer: ShaderComposer::new()?,
            pipelines: FxHashMap::default(),
            images: FxHashMap::default(),
            frame_capture: options.frame_capture,
            bind_group_layout,
            unit_params,
            registry,
            device,
            queue,
        };

        // Both conversion programs are built up front so a broken program
        // fails startup rather than the first compressed job.
        for pass in [ConversionPass::Passthrough, ConversionPass::GammaDecode] {
            let _ = backend.pipeline(pass, wgpu::TextureFormat::Rgba8Unorm)?;
        }

        log::info!(
            "Gears:: GPU context ready (compression features {:?})",
            backend.device.features() & COMPRESSION_FEATURES
        );
        Ok(backend)
    }

    /// The texture behind a live handle.
    #[must_use]
    pub fn texture(&self, handle: ImageHandle) -> Option<&wgpu::Texture> {
        self.images.get(&handle).map(|image| &image.texture)
    }

    /// The device this backend submits to.
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn pipeline(
        &mut self,
        pass: ConversionPass,
        target: wgpu::TextureFormat,
    ) -> Result<wgpu::RenderPipeline, BackendError> {
        if let Some(pipeline) = self.pipelines.get(&(pass, target)) {
            return Ok(pipeline.clone());
        }
        let (source, file_path) = shader_composer::conversion_source(pass);
        let label = format!("Gears {pass:?} {target:?}");
        let shader =
            self.composer.compose(&self.device, &label, source, file_path)?;
        let pipeline = pipeline_helpers::create_screen_space_pipeline(
            &self.device,
            &label,
            &shader,
            target,
            &[&self.bind_group_layout],
        );
        drop(self.pipelines.insert((pass, target), pipeline.clone()));
        Ok(pipeline)
    }

    fn allocate(&mut self, texture: wgpu::Texture, desc: ImageDesc) -> ImageHandle {
        let handle = self.registry.insert(texture.clone());
        let extent = texture.size();
        drop(self.images.insert(handle, Image { texture, desc, extent }));
        handle
    }

    fn create_texture(
        &self,
        label: &str,
        desc: &ImageDesc,
        extent: wgpu::Extent3d,
        usage: wgpu::TextureUsages,
    ) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent,
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage,
            view_formats: &[],
        })
    }

    fn bind_group(
        &self,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Gears Convert Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }
}

/// Record one full-screen draw into `target`.
fn draw_fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

fn mip_view(texture: &wgpu::Texture, level: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("Gears Mip View"),
        base_mip_level: level,
        mip_level_count: Some(1),
        ..Default::default()
    })
}

impl GpuBackend for WgpuBackend {
    fn upload(
        &mut self,
        desc: &ImageDesc,
        pixels: &[u8],
    ) -> Result<ImageHandle, BackendError> {
        let max_edge = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0
            || desc.height == 0
            || desc.width > max_edge
            || desc.height > max_edge
        {
            return Err(BackendError::InvalidExtent {
                width: desc.width,
                height: desc.height,
            });
        }
        let format = desc.format.to_wgpu();
        if !self.device.features().contains(format.required_features()) {
            return Err(BackendError::UnsupportedFormat(format));
        }

        let (extent, bytes_per_row, rows) = match desc.format.block_bytes() {
            Some(block_bytes) => {
                let blocks_wide = desc.width.div_ceil(BLOCK_EDGE);
                let blocks_high = desc.height.div_ceil(BLOCK_EDGE);
                let extent = wgpu::Extent3d {
                    width: blocks_wide * BLOCK_EDGE,
                    height: blocks_high * BLOCK_EDGE,
                    depth_or_array_layers: 1,
                };
                (extent, blocks_wide * block_bytes, blocks_high)
            }
            None => {
                let extent = wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                };
                (extent, desc.width * 4, desc.height)
            }
        };

        let expected = bytes_per_row as usize * rows as usize;
        if pixels.len() < expected {
            return Err(BackendError::PixelDataTooShort {
                expected,
                actual: pixels.len(),
            });
        }

        // Uncompressed uploads are published as they are.
        let usage = if desc.format.is_compressed() {
            SOURCE_USAGE
        } else {
            PUBLISHED_USAGE
        };
        let texture = self.create_texture("Gears Source Image", desc, extent, usage);

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels[..expected],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(rows),
            },
            extent,
        );

        Ok(self.allocate(texture, *desc))
    }

    fn convert(
        &mut self,
        source: ImageHandle,
        dest: &ImageDesc,
        pass: ConversionPass,
    ) -> Result<ImageHandle, BackendError> {
        let target_format = dest.format.to_wgpu();
        let pipeline = self.pipeline(pass, target_format)?;

        let (source_view, params) = {
            let image = self
                .images
                .get(&source)
                .ok_or(BackendError::UnknownImage(source))?;
            let params = ConvertParams {
                uv_scale: [
                    image.desc.width as f32 / image.extent.width as f32,
                    image.desc.height as f32 / image.extent.height as f32,
                ],
                _pad: [0.0; 2],
            };
            (
                image
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
                params,
            )
        };
        let params =
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Gears Convert Params"),
                    contents: bytemuck::bytes_of(&params),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

        let extent = wgpu::Extent3d {
            width: dest.width,
            height: dest.height,
            depth_or_array_layers: 1,
        };
        let texture = self.create_texture(
            "Gears Converted Image",
            dest,
            extent,
            PUBLISHED_USAGE,
        );

        let bind_group =
            self.bind_group(&source_view, &self.nearest_sampler, &params);
        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Gears Convert Encoder"),
                });
        draw_fullscreen(
            &mut encoder,
            "Gears Convert Pass",
            &mip_view(&texture, 0),
            &pipeline,
            &bind_group,
        );
        let _ = self.queue.submit(std::iter::once(encoder.finish()));

        Ok(self.allocate(texture, *dest))
    }

    fn generate_mipmaps(
        &mut self,
        image: ImageHandle,
    ) -> Result<(), BackendError> {
        let (texture, desc) = {
            let entry = self
                .images
                .get(&image)
                .ok_or(BackendError::UnknownImage(image))?;
            (entry.texture.clone(), entry.desc)
        };
        let levels = texture.mip_level_count();
        if levels <= 1 {
            return Ok(());
        }
        let pipeline =
            self.pipeline(ConversionPass::Passthrough, desc.format.to_wgpu())?;

        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Gears Mip Encoder"),
                });
        for level in 1..levels {
            let source = mip_view(&texture, level - 1);
            let bind_group =
                self.bind_group(&source, &self.linear_sampler, &self.unit_params);
            draw_fullscreen(
                &mut encoder,
                "Gears Mip Pass",
                &mip_view(&texture, level),
                &pipeline,
                &bind_group,
            );
        }
        let _ = self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn delete(&mut self, image: ImageHandle) {
        drop(self.registry.remove(image));
        match self.images.remove(&image) {
            Some(entry) => entry.texture.destroy(),
            None => log::warn!("Gears:: delete of unknown texture {image}"),
        }
    }

    fn fence_wait(&mut self) -> Result<(), BackendError> {
        // An empty submission flushes staged texture writes and marks the
        // point to wait for.
        let index = self.queue.submit(std::iter::empty());
        let _ = self
            .device
            .poll(wgpu::PollType::WaitForSubmissionIndex(index))
            .map_err(|e| BackendError::Fence(e.to_string()))?;
        Ok(())
    }

    fn begin_capture(&mut self) {
        if self.frame_capture {
            // SAFETY: captures are bracketed per job on the only thread
            // that submits to this device.
            unsafe { self.device.start_graphics_debugger_capture() };
        }
    }

    fn end_capture(&mut self) {
        if self.frame_capture {
            // SAFETY: paired with `begin_capture` on the same thread.
            unsafe { self.device.stop_graphics_debugger_capture() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::GpuFormat;
    use crate::testing::{headless_device, read_rgba8};

    fn backend(features: wgpu::Features) -> Option<WgpuBackend> {
        let (device, queue) = headless_device(features)?;
        Some(
            WgpuBackend::from_device(
                device,
                queue,
                &WorkerOptions::default(),
                TextureRegistry::new(),
            )
            .unwrap(),
        )
    }

    fn read(backend: &WgpuBackend, handle: ImageHandle, level: u32) -> Vec<u8> {
        let texture = backend.texture(handle).unwrap();
        read_rgba8(&backend.device, &backend.queue, texture, level).unwrap()
    }

    fn rgba(width: u32, height: u32, mip_levels: u32) -> ImageDesc {
        ImageDesc { format: GpuFormat::Rgba8, width, height, mip_levels }
    }

    #[test]
    fn dxt1_converts_to_rgba8_over_the_logical_region() {
        let Some(mut backend) = backend(COMPRESSION_FEATURES) else {
            return;
        };
        if !backend
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
        {
            return;
        }
        // 30x30 pads to 8x8 blocks. Both endpoints white, all indices 0.
        let blocks: Vec<u8> = [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]
            .into_iter()
            .cycle()
            .take(8 * 8 * 8)
            .collect();
        let source = backend
            .upload(
                &ImageDesc {
                    format: GpuFormat::Bc1,
                    width: 30,
                    height: 30,
                    mip_levels: 1,
                },
                &blocks,
            )
            .unwrap();
        let dest = backend
            .convert(source, &rgba(30, 30, 1), ConversionPass::Passthrough)
            .unwrap();
        backend.delete(source);
        backend.fence_wait().unwrap();

        let texture = backend.texture(dest).unwrap();
        assert_eq!((texture.width(), texture.height()), (30, 30));
        assert_eq!(texture.usage(), PUBLISHED_USAGE);
        let pixels = read(&backend, dest, 0);
        assert_eq!(pixels.len(), 30 * 30 * 4);
        assert!(pixels.iter().all(|&b| b == 0xff));
        assert!(backend.registry.get(source).is_none());
    }

    #[test]
    fn gamma_decode_linearizes_color_and_keeps_alpha() {
        let Some(mut backend) = backend(wgpu::Features::empty()) else {
            return;
        };
        let source = backend
            .upload(&rgba(4, 4, 1), &[188, 188, 188, 255].repeat(16))
            .unwrap();
        let dest = backend
            .convert(source, &rgba(4, 4, 1), ConversionPass::GammaDecode)
            .unwrap();
        backend.fence_wait().unwrap();

        for texel in read(&backend, dest, 0).chunks(4) {
            for &channel in &texel[..3] {
                assert!(channel.abs_diff(128) <= 2, "got {channel}");
            }
            assert_eq!(texel[3], 255);
        }
    }

    #[test]
    fn mip_chain_is_filled_from_level_zero() {
        let Some(mut backend) = backend(wgpu::Features::empty()) else {
            return;
        };
        let image = backend
            .upload(&rgba(8, 8, 4), &[200, 100, 50, 255].repeat(64))
            .unwrap();
        backend.generate_mipmaps(image).unwrap();
        backend.fence_wait().unwrap();

        assert_eq!(read(&backend, image, 1).len(), 4 * 4 * 4);
        assert_eq!(read(&backend, image, 3), vec![200, 100, 50, 255]);
    }

    #[test]
    fn uncompressed_uploads_are_readable_as_published() {
        let Some(mut backend) = backend(wgpu::Features::empty()) else {
            return;
        };
        let pixels: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8).collect();
        let image = backend.upload(&rgba(3, 2, 1), &pixels).unwrap();
        backend.fence_wait().unwrap();

        assert_eq!(backend.texture(image).unwrap().usage(), PUBLISHED_USAGE);
        assert_eq!(read(&backend, image, 0), pixels);
    }

    #[test]
    fn compressed_upload_without_the_feature_is_unsupported() {
        let Some(mut backend) = backend(wgpu::Features::empty()) else {
            return;
        };
        let err = backend
            .upload(
                &ImageDesc {
                    format: GpuFormat::Bc1,
                    width: 4,
                    height: 4,
                    mip_levels: 1,
                },
                &[0; 8],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::UnsupportedFormat(wgpu::TextureFormat::Bc1RgbaUnorm)
        ));
        assert!(backend.registry.is_empty());
    }

    #[test]
    fn extent_and_short_data_are_checked_before_allocation() {
        let Some(mut backend) = backend(wgpu::Features::empty()) else {
            return;
        };
        assert!(matches!(
            backend.upload(&rgba(0, 4, 1), &[]).unwrap_err(),
            BackendError::InvalidExtent { width: 0, height: 4 }
        ));
        assert!(matches!(
            backend.upload(&rgba(2, 2, 1), &[0; 15]).unwrap_err(),
            BackendError::PixelDataTooShort { expected: 16, actual: 15 }
        ));
        assert!(backend.registry.is_empty());
    }

    #[test]
    fn delete_drops_the_registry_entry() {
        let Some(mut backend) = backend(wgpu::Features::empty()) else {
            return;
        };
        let registry = backend.registry.clone();
        let first = backend.upload(&rgba(1, 1, 1), &[0; 4]).unwrap();
        let second = backend.upload(&rgba(1, 1, 1), &[0; 4]).unwrap();
        assert_ne!(first, second);
        assert!(registry.get(first).is_some());

        backend.delete(first);
        assert!(registry.get(first).is_none());
        assert!(backend.texture(first).is_none());
        assert_eq!(registry.len(), 1);
        // Unknown handles are only logged.
        backend.delete(first);
        assert!(registry.get(second).is_some());
    }
}
