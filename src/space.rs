//! Finite element spaces as seen by assembly.
use crate::buffer::Layout;
use crate::Real;
use nalgebra_sparse::pattern::{SparsityPattern, SparsityPatternFormatError};
use std::fmt::Debug;

mod interval;
mod prolongation;
mod restriction;

pub use interval::IntervalSpace;
pub use prolongation::{ConformingProlongation, ConformingRestriction};
pub use restriction::ElementRestriction;

/// The information assembly needs from a finite element space.
///
/// Every element has the same number of dofs. Element dof maps index into the *local* dofs of
/// the space. If the space has a conforming prolongation, the unknowns of linear systems are the
/// *true* dofs it maps from, otherwise local and true dofs coincide.
pub trait FiniteElementSpace<T: Real>: Debug + Sync {
    fn num_elements(&self) -> usize;

    fn element_dof_count(&self) -> usize;

    fn geometry_dim(&self) -> usize;

    fn local_layout(&self) -> Layout;

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize);

    /// Number of quadrature points in every element.
    fn element_quadrature_size(&self) -> usize;

    /// Evaluates quadrature weights and basis functions on the given element.
    ///
    /// Weights include the Jacobian determinant of the element map, and gradients are with
    /// respect to physical coordinates.
    fn populate_element_quadrature(
        &self,
        element_index: usize,
        output: &mut ElementQuadrature<T>,
    ) -> eyre::Result<()>;

    fn prolongation(&self) -> Option<&ConformingProlongation> {
        None
    }

    fn true_layout(&self) -> Layout {
        self.prolongation()
            .map(|p| p.true_layout())
            .unwrap_or_else(|| self.local_layout())
    }
}

/// Quadrature weights and basis function data on a single element.
///
/// Values are stored point-major (`values[q * n + i]` for basis function `i` at point `q`),
/// gradients additionally have the spatial dimension as their fastest index.
#[derive(Debug, Clone)]
pub struct ElementQuadrature<T> {
    num_dofs: usize,
    dim: usize,
    weights: Vec<T>,
    values: Vec<T>,
    gradients: Vec<T>,
}

impl<T> Default for ElementQuadrature<T> {
    fn default() -> Self {
        Self {
            num_dofs: 0,
            dim: 0,
            weights: Vec::new(),
            values: Vec::new(),
            gradients: Vec::new(),
        }
    }
}

impl<T: Real> ElementQuadrature<T> {
    pub fn resize(&mut self, num_points: usize, num_dofs: usize, dim: usize) {
        self.num_dofs = num_dofs;
        self.dim = dim;
        self.weights.resize(num_points, T::zero());
        self.values.resize(num_points * num_dofs, T::zero());
        self.gradients
            .resize(num_points * num_dofs * dim, T::zero());
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn basis_values(&self) -> &[T] {
        &self.values
    }

    pub fn basis_gradients(&self) -> &[T] {
        &self.gradients
    }

    pub fn weights_mut(&mut self) -> &mut [T] {
        &mut self.weights
    }

    pub fn basis_values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn basis_gradients_mut(&mut self) -> &mut [T] {
        &mut self.gradients
    }

    pub fn view(&self) -> QuadratureView<'_, T> {
        QuadratureView::from_parts(self.num_dofs, self.dim, &self.weights, &self.values, &self.gradients)
    }
}

/// Borrowed quadrature data of a single element, laid out like [`ElementQuadrature`].
#[derive(Debug, Clone, Copy)]
pub struct QuadratureView<'a, T> {
    num_dofs: usize,
    dim: usize,
    weights: &'a [T],
    values: &'a [T],
    gradients: &'a [T],
}

impl<'a, T: Real> QuadratureView<'a, T> {
    /// # Panics
    ///
    /// Panics if the lengths of values or gradients are inconsistent with the number of weights.
    pub fn from_parts(num_dofs: usize, dim: usize, weights: &'a [T], values: &'a [T], gradients: &'a [T]) -> Self {
        assert_eq!(values.len(), weights.len() * num_dofs);
        assert_eq!(gradients.len(), weights.len() * num_dofs * dim);
        Self {
            num_dofs,
            dim,
            weights,
            values,
            gradients,
        }
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn weight(&self, q: usize) -> T {
        self.weights[q]
    }

    pub fn value(&self, q: usize, i: usize) -> T {
        self.values[q * self.num_dofs + i]
    }

    pub fn gradient(&self, q: usize, i: usize) -> &'a [T] {
        let offset = (q * self.num_dofs + i) * self.dim;
        &self.gradients[offset..offset + self.dim]
    }

    /// The `k`-th entry of `[value, gradient...]` of basis function `i` at point `q`.
    pub fn feature(&self, q: usize, i: usize, k: usize) -> T {
        if k == 0 {
            self.value(q, i)
        } else {
            self.gradient(q, i)[k - 1]
        }
    }
}

/// Inverts a map `source -> target` into a pattern whose lane `t` lists, in increasing order,
/// every source index mapped to `t`.
///
/// # Panics
///
/// Panics if any target is out of bounds.
pub(crate) fn invert_index_map(
    map: &[usize],
    num_targets: usize,
) -> Result<SparsityPattern, SparsityPatternFormatError> {
    let mut offsets = vec![0; num_targets + 1];
    for &target in map {
        offsets[target + 1] += 1;
    }
    for t in 0..num_targets {
        offsets[t + 1] += offsets[t];
    }
    let mut next = offsets.clone();
    let mut sources = vec![0; map.len()];
    for (source, &target) in map.iter().enumerate() {
        sources[next[target]] = source;
        next[target] += 1;
    }
    SparsityPattern::try_from_offsets_and_indices(num_targets, map.len(), offsets, sources)
}
