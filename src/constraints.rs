//! Lists of constrained (essential) degrees of freedom.
use crate::buffer::{Buffer, Device, Layout};
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::Real;
use fenris_paradis::DisjointIndices;
use serde::{Deserialize, Serialize};

/// An ordered list of distinct dof indices into vectors of a fixed size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintList {
    indices: DisjointIndices,
    device: Device,
}

impl ConstraintList {
    /// Constrain the given indices of vectors with the given layout.
    ///
    /// Fails with [`AssemblyError::InvalidConstraints`] if an index is out of range or
    /// occurs more than once.
    pub fn try_new(indices: Vec<usize>, layout: Layout) -> Result<Self, AssemblyError> {
        Ok(Self {
            indices: DisjointIndices::try_new(indices, layout.size())?,
            device: layout.device(),
        })
    }

    pub fn empty(layout: Layout) -> Self {
        Self {
            indices: DisjointIndices::empty(layout.size()),
            device: layout.device(),
        }
    }

    pub fn indices(&self) -> &[usize] {
        self.indices.indices()
    }

    pub fn disjoint_indices(&self) -> &DisjointIndices {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Size of the vectors the indices refer to.
    pub fn size(&self) -> usize {
        self.indices.bound()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.size(), self.device)
    }

    /// `true` at constrained dofs, `false` elsewhere.
    pub fn membership(&self) -> Vec<bool> {
        self.indices.membership()
    }

    pub(crate) fn check_system_size(&self, system_size: usize) -> Result<(), AssemblyError> {
        if self.size() == system_size {
            Ok(())
        } else {
            Err(AssemblyError::ConstraintSizeMismatch {
                constraints: self.size(),
                system: system_size,
            })
        }
    }

    /// Sets `target[c] = source[c]` for every constrained dof `c`.
    pub(crate) fn copy_constrained<T: Real>(&self, executor: &Executor, target: &mut [T], source: &[T]) {
        let indices = self.indices();
        executor.for_each_index_mut(self.device, &self.indices, target, |k, t| *t = source[indices[k]]);
    }

    /// Sets `target[c] = value` for every constrained dof `c`.
    pub(crate) fn fill_constrained<T: Real>(&self, executor: &Executor, target: &mut [T], value: T) {
        executor.for_each_index_mut(self.device, &self.indices, target, |_, t| *t = value);
    }
}

/// Zeroes every entry of `x` that is not constrained.
///
/// The constrained entries are extracted into a temporary, the whole vector is zeroed and the
/// extracted entries are scattered back.
pub fn zero_complement<T: Real>(
    executor: &Executor,
    constraints: &ConstraintList,
    x: &mut Buffer<T>,
) -> Result<(), AssemblyError> {
    constraints.check_system_size(x.len())?;
    let device = x.layout().device();
    let indices = constraints.indices();
    let mut guard = x.write();
    let x: &mut [T] = &mut guard;

    let mut extracted = vec![T::zero(); indices.len()];
    executor.for_each_mut(device, &mut extracted, |k, e| *e = x[indices[k]]);
    executor.for_each_mut(device, x, |_, x_i| *x_i = T::zero());
    executor.for_each_index_mut(device, constraints.disjoint_indices(), x, |k, x_i| *x_i = extracted[k]);
    Ok(())
}
