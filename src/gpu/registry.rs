//! Handle-to-texture lookup shared between the worker and the host.
//!
//! The worker allocates every handle here, so handles stay unique across
//! worker restarts, and a host holding a published handle can resolve it to
//! the `wgpu::Texture` without going through the worker thread.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::backend::ImageHandle;

#[derive(Debug)]
struct Entries {
    textures: FxHashMap<ImageHandle, wgpu::Texture>,
    next_handle: ImageHandle,
}

/// Cloneable view of the live textures, keyed by handle.
#[derive(Debug, Clone)]
pub struct TextureRegistry {
    entries: Arc<RwLock<Entries>>,
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureRegistry {
    /// An empty registry. The first handle is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries {
                textures: FxHashMap::default(),
                next_handle: 1,
            })),
        }
    }

    /// Store `texture` under a fresh nonzero handle.
    pub fn insert(&self, texture: wgpu::Texture) -> ImageHandle {
        let mut entries = self.entries.write();
        let mut handle = entries.next_handle;
        while handle == 0 || entries.textures.contains_key(&handle) {
            handle = handle.wrapping_add(1);
        }
        entries.next_handle = handle.wrapping_add(1);
        drop(entries.textures.insert(handle, texture));
        handle
    }

    /// Forget `handle`, returning its texture.
    pub fn remove(&self, handle: ImageHandle) -> Option<wgpu::Texture> {
        self.entries.write().textures.remove(&handle)
    }

    /// The texture behind `handle`, if it is still live.
    #[must_use]
    pub fn get(&self, handle: ImageHandle) -> Option<wgpu::Texture> {
        self.entries.read().textures.get(&handle).cloned()
    }

    /// Number of live textures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().textures.len()
    }

    /// Whether no texture is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
