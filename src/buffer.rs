//! Device-aware storage for assembly vectors.
//!
//! A [`Buffer`] is sized storage bound to a [`Layout`]. Storage is shared between buffers that
//! alias each other through [`Buffer::make_ref`], and always carries a host mirror. Buffers whose
//! layout is device-resident additionally keep a device copy, which is the *active* storage that
//! kernels read and write. The two copies are only synchronized through explicit
//! [`push`](Buffer::push) and [`pull`](Buffer::pull) calls.
use crate::error::AssemblyError;
use log::trace;
use num::Zero;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where the active storage of a buffer lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Host,
    Accelerator,
}

/// Element count and device residency of a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    size: usize,
    device: Device,
}

impl Layout {
    pub fn new(size: usize, device: Device) -> Self {
        Self { size, device }
    }

    pub fn host(size: usize) -> Self {
        Self::new(size, Device::Host)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_device_resident(&self) -> bool {
        self.device == Device::Accelerator
    }

    /// The same device residency with a different size.
    pub fn with_size(&self, size: usize) -> Self {
        Self::new(size, self.device)
    }
}

#[derive(Debug)]
struct Storage<T> {
    device: Device,
    host: Vec<T>,
    // Empty unless the storage is device-resident
    device_data: Vec<T>,
}

impl<T: Copy + Zero> Storage<T> {
    fn allocate(layout: &Layout) -> Self {
        let device_data = match layout.device() {
            Device::Host => Vec::new(),
            Device::Accelerator => vec![T::zero(); layout.size()],
        };
        Self {
            device: layout.device(),
            host: vec![T::zero(); layout.size()],
            device_data,
        }
    }

    fn capacity(&self) -> usize {
        self.host.len()
    }

    fn active(&self) -> &[T] {
        match self.device {
            Device::Host => &self.host,
            Device::Accelerator => &self.device_data,
        }
    }

    fn active_mut(&mut self) -> &mut [T] {
        match self.device {
            Device::Host => &mut self.host,
            Device::Accelerator => &mut self.device_data,
        }
    }
}

/// Sized, device-aware storage.
///
/// The visible length of a buffer always equals the size of its layout, which may be smaller
/// than the capacity of the underlying storage after a shrinking [`resize`](Self::resize).
///
/// Read and write guards lock the shared storage. Holding a guard of one buffer while acquiring
/// a conflicting guard of an alias of the same storage deadlocks, which is why operators reject
/// aliased input and output buffers with [`AssemblyError::AliasedBuffers`].
#[derive(Debug)]
pub struct Buffer<T> {
    layout: Layout,
    storage: Arc<RwLock<Storage<T>>>,
}

impl<T> Buffer<T>
where
    T: Copy + Zero + Send + Sync,
{
    pub fn zeros(layout: Layout) -> Self {
        Self {
            layout,
            storage: Arc::new(RwLock::new(Storage::allocate(&layout))),
        }
    }

    /// Creates a buffer with the given layout whose active storage and host mirror hold `data`.
    ///
    /// # Panics
    ///
    /// Panics if the length of `data` does not match the size of the layout.
    pub fn from_slice(layout: Layout, data: &[T]) -> Self {
        assert_eq!(layout.size(), data.len(), "Data length must match layout size.");
        let mut storage = Storage::allocate(&layout);
        storage.host.copy_from_slice(data);
        if layout.is_device_resident() {
            storage.device_data.copy_from_slice(data);
        }
        Self {
            layout,
            storage: Arc::new(RwLock::new(storage)),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.read().capacity()
    }

    /// Whether the two buffers share storage.
    pub fn aliases(&self, other: &Buffer<T>) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Returns a new buffer that shares storage and layout with this one.
    pub fn alias(&self) -> Buffer<T> {
        Self {
            layout: self.layout,
            storage: Arc::clone(&self.storage),
        }
    }

    /// Make this buffer share storage and layout with `other`.
    ///
    /// The previous storage is released once no other buffer refers to it.
    pub fn make_ref(&mut self, other: &Buffer<T>) {
        self.layout = other.layout;
        self.storage = Arc::clone(&other.storage);
    }

    /// Resize the buffer to a new layout.
    ///
    /// Storage is only reallocated (with zeroed contents) if its capacity is too small for the
    /// new size or the device residency changes. Otherwise the visible slice is adjusted in
    /// place and the existing contents are retained. Reallocation detaches the buffer from any
    /// aliases. Returns whether storage was reallocated.
    pub fn resize(&mut self, layout: Layout) -> bool {
        let (capacity, device) = {
            let storage = self.storage.read();
            (storage.capacity(), storage.device)
        };
        let reallocate = capacity < layout.size() || device != layout.device();
        if reallocate {
            trace!(
                "Reallocating buffer storage (capacity {} -> {}, device {:?} -> {:?})",
                capacity,
                layout.size(),
                device,
                layout.device()
            );
            self.storage = Arc::new(RwLock::new(Storage::allocate(&layout)));
        }
        self.layout = layout;
        reallocate
    }

    /// Read access to the active storage.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [T]> {
        let len = self.len();
        RwLockReadGuard::map(self.storage.read(), move |storage| &storage.active()[..len])
    }

    /// Write access to the active storage.
    pub fn write(&mut self) -> MappedRwLockWriteGuard<'_, [T]> {
        let len = self.len();
        RwLockWriteGuard::map(self.storage.write(), move |storage| &mut storage.active_mut()[..len])
    }

    /// Read access to the host mirror.
    ///
    /// For device-resident buffers the mirror is stale after device-side writes until
    /// [`pull`](Self::pull) is called.
    pub fn host(&self) -> MappedRwLockReadGuard<'_, [T]> {
        let len = self.len();
        RwLockReadGuard::map(self.storage.read(), move |storage| &storage.host[..len])
    }

    /// Write access to the host mirror.
    ///
    /// For device-resident buffers, host-side changes only become visible to kernels after
    /// [`push`](Self::push).
    pub fn host_mut(&mut self) -> MappedRwLockWriteGuard<'_, [T]> {
        let len = self.len();
        RwLockWriteGuard::map(self.storage.write(), move |storage| &mut storage.host[..len])
    }

    /// Copies the host mirror to the device copy. No-op for host-resident buffers.
    pub fn push(&mut self) {
        let len = self.len();
        let mut guard = self.storage.write();
        let storage = &mut *guard;
        if storage.device == Device::Accelerator {
            storage.device_data[..len].copy_from_slice(&storage.host[..len]);
        }
    }

    /// Copies the device copy to the host mirror. No-op for host-resident buffers.
    pub fn pull(&mut self) {
        let len = self.len();
        let mut guard = self.storage.write();
        let storage = &mut *guard;
        if storage.device == Device::Accelerator {
            storage.host[..len].copy_from_slice(&storage.device_data[..len]);
        }
    }

    pub fn fill(&mut self, value: T) {
        self.write().fill(value);
    }

    /// Element-wise copy of `src` into `self`.
    ///
    /// Both buffers must have the same layout.
    pub fn assign(&mut self, src: &Buffer<T>) -> Result<(), AssemblyError> {
        if self.layout != src.layout {
            return Err(AssemblyError::LayoutMismatch {
                expected: self.layout,
                actual: src.layout,
            });
        }
        // Aliases with equal layouts view the same entries
        if self.aliases(src) {
            return Ok(());
        }
        let src = src.read();
        self.write().copy_from_slice(&src);
        Ok(())
    }

    /// Allocates new storage with the same layout, optionally copying the contents of both
    /// the active storage and the host mirror.
    pub fn duplicate(&self, copy_data: bool) -> Buffer<T> {
        let duplicate = Buffer::zeros(self.layout);
        if copy_data {
            let len = self.len();
            let source = self.storage.read();
            let mut target = duplicate.storage.write();
            target.host[..len].copy_from_slice(&source.host[..len]);
            if source.device == Device::Accelerator {
                target.device_data[..len].copy_from_slice(&source.device_data[..len]);
            }
        }
        duplicate
    }

    /// Copies the active storage into a vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.read().to_vec()
    }
}
