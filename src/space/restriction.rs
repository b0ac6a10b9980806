use crate::buffer::Layout;
use crate::exec::Executor;
use crate::space::{invert_index_map, FiniteElementSpace};
use crate::Real;
use eyre::ensure;
use nalgebra_sparse::pattern::SparsityPattern;

/// Moves values between local dofs ("L-vectors") and element-local dofs ("E-vectors").
///
/// E-vectors are element-major: the dofs of element `e` occupy the contiguous range
/// `e * n .. (e + 1) * n`, with `n` the number of dofs per element.
#[derive(Debug, Clone)]
pub struct ElementRestriction {
    dofs_per_element: usize,
    element_dofs: Vec<usize>,
    // Lane l lists the E-vector entries that are copies of local dof l
    local_to_element: SparsityPattern,
    local_layout: Layout,
    executor: Executor,
}

impl ElementRestriction {
    pub fn from_space<T: Real>(space: &dyn FiniteElementSpace<T>, executor: Executor) -> eyre::Result<Self> {
        let n = space.element_dof_count();
        let local_layout = space.local_layout();
        let mut element_dofs = vec![0; space.num_elements() * n];
        if n > 0 {
            for (e, dofs) in element_dofs.chunks_mut(n).enumerate() {
                space.populate_element_dofs(dofs, e);
            }
        }
        ensure!(
            element_dofs.iter().all(|&dof| dof < local_layout.size()),
            "element dof maps refer to dofs outside of the local layout (size {})",
            local_layout.size()
        );
        let local_to_element = invert_index_map(&element_dofs, local_layout.size())?;
        Ok(Self {
            dofs_per_element: n,
            element_dofs,
            local_to_element,
            local_layout,
            executor,
        })
    }

    pub fn num_elements(&self) -> usize {
        if self.dofs_per_element == 0 {
            0
        } else {
            self.element_dofs.len() / self.dofs_per_element
        }
    }

    pub fn dofs_per_element(&self) -> usize {
        self.dofs_per_element
    }

    /// Length of E-vectors.
    pub fn element_vector_len(&self) -> usize {
        self.element_dofs.len()
    }

    pub fn local_layout(&self) -> Layout {
        self.local_layout
    }

    pub fn element_dofs(&self, element_index: usize) -> &[usize] {
        let n = self.dofs_per_element;
        &self.element_dofs[element_index * n..(element_index + 1) * n]
    }

    /// Copies local values into the element-major E-vector.
    pub fn gather<T: Real>(&self, local_values: &[T], element_values: &mut [T]) {
        let n = self.dofs_per_element;
        let element_dofs = &self.element_dofs;
        self.executor
            .for_each_chunk_mut(self.local_layout.device(), element_values, n, |e, chunk| {
                for (value, &dof) in chunk.iter_mut().zip(&element_dofs[e * n..]) {
                    *value = local_values[dof];
                }
            });
    }

    /// Sums E-vector entries onto their local dofs, overwriting `local_values`.
    ///
    /// Every local dof gathers its own contributions, so the loop is parallel over local dofs
    /// without any write conflicts.
    pub fn reduce<T: Real>(&self, element_values: &[T], local_values: &mut [T]) {
        let pattern = &self.local_to_element;
        self.executor
            .for_each_mut(self.local_layout.device(), local_values, |dof, v| {
                *v = pattern
                    .lane(dof)
                    .iter()
                    .fold(T::zero(), |sum, &k| sum + element_values[k])
            });
    }
}
