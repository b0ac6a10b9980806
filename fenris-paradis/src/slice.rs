use crate::ParallelIndexedCollection;
use std::marker::PhantomData;

/// Unsynchronized access to the records of a mutable slice.
///
/// Obtained through [`ParallelIndexedCollection::create_access`]. The access may be shared
/// between threads, and every thread may obtain mutable references to records, provided that
/// no two threads ever touch the same record.
pub struct ParallelSliceAccess<'a, T> {
    ptr: *mut T,
    len: usize,
    marker: PhantomData<&'a mut T>,
}

impl<'a, T> ParallelSliceAccess<'a, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Obtain a shared reference to the record at the given index.
    ///
    /// # Safety
    ///
    /// The index must be in bounds, and no thread may hold a mutable reference to the same record.
    pub unsafe fn get_unchecked(&self, index: usize) -> &'a T {
        debug_assert!(index < self.len);
        &*self.ptr.add(index)
    }

    /// Obtain a mutable reference to the record at the given index.
    ///
    /// # Safety
    ///
    /// The index must be in bounds, and the returned reference must be the only live reference
    /// to the record, across all threads.
    pub unsafe fn get_unchecked_mut(&self, index: usize) -> &'a mut T {
        debug_assert!(index < self.len);
        &mut *self.ptr.add(index)
    }
}

impl<'a, T> Clone for ParallelSliceAccess<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for ParallelSliceAccess<'a, T> {}

unsafe impl<'a, T: Send + Sync> Sync for ParallelSliceAccess<'a, T> {}
unsafe impl<'a, T: Send> Send for ParallelSliceAccess<'a, T> {}

unsafe impl<'a, T: 'a + Sync + Send> ParallelIndexedCollection<'a> for [T] {
    type Access = ParallelSliceAccess<'a, T>;

    unsafe fn create_access(&'a mut self) -> Self::Access {
        ParallelSliceAccess {
            ptr: self.as_mut_ptr(),
            len: <[T]>::len(self),
            marker: PhantomData,
        }
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }
}
