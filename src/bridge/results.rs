//! Result table the worker publishes texture handles into.
//!
//! The table is a fixed-capacity array of [`ResultSlot`]s. A slot whose `id`
//! is 0 is empty; the worker claims the first empty slot and never
//! overwrites an occupied one. Consumers drain slots themselves. All access
//! goes through the queue lock.

use std::ptr::NonNull;

/// One published result, laid out for the host to read directly.
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    bytemuck::Pod,
    bytemuck::Zeroable,
)]
pub struct ResultSlot {
    /// Host unique id of the creation request; 0 marks an empty slot.
    pub id: u32,
    /// Handle of the created texture.
    pub texture_handle: u32,
}

impl ResultSlot {
    /// The empty marker.
    pub const EMPTY: Self = Self { id: 0, texture_handle: 0 };

    /// Whether this slot is free for publishing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id == 0
    }
}

enum Storage {
    Owned(Box<[ResultSlot]>),
    /// Caller memory registered through the C ABI.
    Borrowed {
        ptr: NonNull<ResultSlot>,
        len: usize,
    },
}

/// Fixed-capacity result storage, either owned or borrowed from the caller.
pub struct ResultTable {
    storage: Storage,
}

// SAFETY: borrowed storage is only dereferenced while the queue lock is
// held, and the registering caller keeps it alive and in place until it
// registers a replacement.
unsafe impl Send for ResultTable {}

impl std::fmt::Debug for ResultTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultTable")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .finish()
    }
}

impl ResultTable {
    /// An owned table of `capacity` empty slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Storage::Owned(vec![ResultSlot::EMPTY; capacity].into()),
        }
    }

    /// Wrap caller-owned memory. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` slots and must
    /// stay valid, unmoved, and not be written by the caller except while
    /// holding the queue lock, for as long as the table is registered.
    #[must_use]
    pub unsafe fn from_raw_parts(
        ptr: *mut ResultSlot,
        capacity: usize,
    ) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            storage: Storage::Borrowed { ptr, len: capacity },
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    /// All slots in order.
    #[must_use]
    pub fn slots(&self) -> &[ResultSlot] {
        match &self.storage {
            Storage::Owned(slots) => slots,
            // SAFETY: upheld by the `from_raw_parts` contract.
            Storage::Borrowed { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
        }
    }

    fn slots_mut(&mut self) -> &mut [ResultSlot] {
        match &mut self.storage {
            Storage::Owned(slots) => slots,
            // SAFETY: upheld by the `from_raw_parts` contract.
            Storage::Borrowed { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), *len)
            },
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots().iter().filter(|slot| !slot.is_empty()).count()
    }

    /// Write `result` into the first empty slot and return its index, or
    /// `None` if every slot is occupied (the result is dropped).
    pub fn publish(&mut self, result: ResultSlot) -> Option<usize> {
        let (index, slot) = self
            .slots_mut()
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_empty())?;
        *slot = result;
        Some(index)
    }

    /// Consume the result published for `id`, freeing its slot.
    pub fn take(&mut self, id: u32) -> Option<u32> {
        if id == 0 {
            return None;
        }
        let slot = self.slots_mut().iter_mut().find(|slot| slot.id == id)?;
        let handle = slot.texture_handle;
        *slot = ResultSlot::EMPTY;
        Some(handle)
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.slots_mut().fill(ResultSlot::EMPTY);
    }
}
