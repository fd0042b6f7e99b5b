//! Instrumented in-memory [`GpuBackend`] for tests.
//!
//! [`FakeBackend`] hands out sequential image handles, records every call
//! into a shared [`CallLog`], and can be told to fail or panic on specific
//! inputs. Because the backend itself moves onto the worker thread, tests
//! keep a clone of the log to inspect it afterwards.
//!
//! [`headless_device`] and [`read_rgba8`] back the tests that need a real
//! adapter; they return `None`/an error where none is available so those
//! tests can skip.

use std::sync::{mpsc, Arc};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::BackendError;
use crate::format::ConversionPass;
use crate::gpu::backend::{GpuBackend, ImageDesc, ImageHandle};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `upload` returned `handle`.
    Upload {
        /// Handle of the new image.
        handle: ImageHandle,
        /// Requested shape.
        desc: ImageDesc,
        /// Pixel bytes passed in.
        bytes: Vec<u8>,
    },
    /// `convert` drew `source` into `dest`.
    Convert {
        /// Source image.
        source: ImageHandle,
        /// New destination image.
        dest: ImageHandle,
        /// Destination shape.
        desc: ImageDesc,
        /// Program used.
        pass: ConversionPass,
    },
    /// `generate_mipmaps` on an image.
    GenerateMipmaps(ImageHandle),
    /// `delete` of an image (live or not).
    Delete(ImageHandle),
    /// `fence_wait`.
    FenceWait,
    /// `begin_capture`.
    BeginCapture,
    /// `end_capture`.
    EndCapture,
}

/// Shared, thread-safe record of backend calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    /// Snapshot of every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }

    /// Widths of uploaded images, in call order.
    #[must_use]
    pub fn upload_widths(&self) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Upload { desc, .. } => Some(desc.width),
                _ => None,
            })
            .collect()
    }
}

/// In-memory backend with fault injection.
#[derive(Debug, Default)]
pub struct FakeBackend {
    log: CallLog,
    live: FxHashSet<ImageHandle>,
    next_handle: ImageHandle,
    panic_on_width: Option<u32>,
    fail_convert: bool,
}

impl FakeBackend {
    /// A backend recording into `log`.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self { log, next_handle: 1, ..Self::default() }
    }

    /// Panic inside `upload` for images of this width.
    #[must_use]
    pub fn panic_on_width(mut self, width: u32) -> Self {
        self.panic_on_width = Some(width);
        self
    }

    /// Make every `convert` call fail.
    #[must_use]
    pub fn fail_convert(mut self) -> Self {
        self.fail_convert = true;
        self
    }

    /// Handles currently allocated.
    #[must_use]
    pub fn live_images(&self) -> usize {
        self.live.len()
    }

    /// Whether `handle` is allocated.
    #[must_use]
    pub fn is_live(&self, handle: ImageHandle) -> bool {
        self.live.contains(&handle)
    }

    fn allocate(&mut self) -> ImageHandle {
        let handle = self.next_handle.max(1);
        self.next_handle = handle + 1;
        let _ = self.live.insert(handle);
        handle
    }
}

impl GpuBackend for FakeBackend {
    #[allow(clippy::panic)]
    fn upload(
        &mut self,
        desc: &ImageDesc,
        pixels: &[u8],
    ) -> Result<ImageHandle, BackendError> {
        if self.panic_on_width == Some(desc.width) {
            panic!("injected fault uploading width {}", desc.width);
        }
        let handle = self.allocate();
        self.log.push(Call::Upload {
            handle,
            desc: *desc,
            bytes: pixels.to_vec(),
        });
        Ok(handle)
    }

    fn convert(
        &mut self,
        source: ImageHandle,
        dest: &ImageDesc,
        pass: ConversionPass,
    ) -> Result<ImageHandle, BackendError> {
        if self.fail_convert {
            return Err(BackendError::ShaderCompile(
                "injected conversion failure".to_owned(),
            ));
        }
        if !self.live.contains(&source) {
            return Err(BackendError::UnknownImage(source));
        }
        let handle = self.allocate();
        self.log.push(Call::Convert {
            source,
            dest: handle,
            desc: *dest,
            pass,
        });
        Ok(handle)
    }

    fn generate_mipmaps(
        &mut self,
        image: ImageHandle,
    ) -> Result<(), BackendError> {
        if !self.live.contains(&image) {
            return Err(BackendError::UnknownImage(image));
        }
        self.log.push(Call::GenerateMipmaps(image));
        Ok(())
    }

    fn delete(&mut self, image: ImageHandle) {
        let _ = self.live.remove(&image);
        self.log.push(Call::Delete(image));
    }

    fn fence_wait(&mut self) -> Result<(), BackendError> {
        self.log.push(Call::FenceWait);
        Ok(())
    }

    fn begin_capture(&mut self) {
        self.log.push(Call::BeginCapture);
    }

    fn end_capture(&mut self) {
        self.log.push(Call::EndCapture);
    }
}

/// A device on the default adapter with whichever of `features` it
/// supports, or `None` on machines without an adapter.
#[must_use]
pub fn headless_device(
    features: wgpu::Features,
) -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(
        instance.request_adapter(&wgpu::RequestAdapterOptions::default()),
    )
    .ok()?;
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Gears Test Device"),
        required_features: adapter.features() & features,
        required_limits: adapter.limits(),
        ..Default::default()
    }))
    .ok()
}

/// Copy one mip level of a 4-byte-per-texel texture back to the CPU,
/// tightly packed.
///
/// # Errors
///
/// Returns [`BackendError::Fence`] if the device cannot be polled or the
/// readback buffer fails to map.
pub fn read_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    level: u32,
) -> Result<Vec<u8>, BackendError> {
    let width = (texture.width() >> level).max(1);
    let height = (texture.height() >> level).max(1);
    let row = width * 4;
    let padded_row = row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Gears Readback"),
        size: u64::from(padded_row * height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder =
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Gears Readback Encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    let _ = queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |mapped| {
        let _ = tx.send(mapped);
    });
    let _ = device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| BackendError::Fence(e.to_string()))?;
    rx.recv()
        .map_err(|e| BackendError::Fence(e.to_string()))?
        .map_err(|e| BackendError::Fence(e.to_string()))?;

    let pixels = {
        let mapped = slice.get_mapped_range();
        mapped
            .chunks(padded_row as usize)
            .flat_map(|padded| &padded[..row as usize])
            .copied()
            .collect()
    };
    buffer.unmap();
    Ok(pixels)
}
