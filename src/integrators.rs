//! Weak-form integrators.
//!
//! The forms supported here are all of the type
//!
//! ```text
//!   a(v, u) = sum_q w_q phi_v(x_q)^T D phi_u(x_q),
//! ```
//!
//! where `phi = [value, gradient]` collects the value and physical gradient of a basis function
//! and `D` is a constant [`PointCoupling`] determined by the weak form and its coefficient.
//! Integrators come in two variants: [`ReferenceIntegrator`] forms dense element matrices and
//! applies them, [`TensorIntegrator`] precomputes quadrature data once and applies the form by
//! contracting through it without ever forming element matrices.
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::space::{FiniteElementSpace, QuadratureView};
use crate::Real;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::fmt;
use std::fmt::{Debug, Display};

mod reference;
mod registry;
mod tensor;

pub use reference::ReferenceIntegrator;
pub use registry::{IntegratorConstructor, IntegratorRegistry};
pub use tensor::TensorIntegrator;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeakFormKind {
    /// `c (u, v)`
    Mass,
    /// `c (grad u, grad v)`
    Diffusion,
    /// `c (du/dx_1, v)`, transport along the first coordinate axis.
    Advection,
}

impl Display for WeakFormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mass => "mass",
            Self::Diffusion => "diffusion",
            Self::Advection => "advection",
        };
        write!(f, "{}", name)
    }
}

/// Algorithm used to realize an integrator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyVariant {
    /// Dense element matrices, computed on the fly.
    Reference,
    /// Precomputed quadrature data and direct contraction (partial assembly).
    #[default]
    Tensor,
}

/// Device-agnostic description of an integrator, as registered with a form.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorDescription<T> {
    kind: WeakFormKind,
    coefficient: T,
}

impl<T: Real> IntegratorDescription<T> {
    pub fn new(kind: WeakFormKind, coefficient: T) -> Self {
        Self { kind, coefficient }
    }

    pub fn mass(coefficient: T) -> Self {
        Self::new(WeakFormKind::Mass, coefficient)
    }

    pub fn diffusion(coefficient: T) -> Self {
        Self::new(WeakFormKind::Diffusion, coefficient)
    }

    pub fn advection(velocity: T) -> Self {
        Self::new(WeakFormKind::Advection, velocity)
    }

    pub fn kind(&self) -> WeakFormKind {
        self.kind
    }

    pub fn coefficient(&self) -> T {
        self.coefficient
    }
}

/// The spaces and execution settings an integrator is constructed for.
#[derive(Debug, Clone, Copy)]
pub struct IntegratorContext<'a, T: Real> {
    trial: &'a dyn FiniteElementSpace<T>,
    test: &'a dyn FiniteElementSpace<T>,
    executor: Executor,
}

impl<'a, T: Real> IntegratorContext<'a, T> {
    pub fn new(
        trial: &'a dyn FiniteElementSpace<T>,
        test: &'a dyn FiniteElementSpace<T>,
        executor: Executor,
    ) -> Self {
        Self { trial, test, executor }
    }

    pub fn trial(&self) -> &'a dyn FiniteElementSpace<T> {
        self.trial
    }

    pub fn test(&self) -> &'a dyn FiniteElementSpace<T> {
        self.test
    }

    pub fn executor(&self) -> Executor {
        self.executor
    }

    /// Whether trial and test are different space objects.
    pub fn is_mixed(&self) -> bool {
        !same_space(self.trial, self.test)
    }
}

pub(crate) fn same_space<T: Real>(a: &dyn FiniteElementSpace<T>, b: &dyn FiniteElementSpace<T>) -> bool {
    std::ptr::eq(
        a as *const dyn FiniteElementSpace<T> as *const (),
        b as *const dyn FiniteElementSpace<T> as *const (),
    )
}

/// A device-specialized integrator bound to a pair of spaces.
///
/// E-vectors passed to integrators are element-major (see
/// [`ElementRestriction`](crate::space::ElementRestriction)). Contributions are always *added*
/// to the output.
pub trait Integrator<T: Real>: Debug + Send + Sync {
    fn kind(&self) -> WeakFormKind;

    fn supports_element_matrices(&self) -> bool {
        false
    }

    /// Adds the element matrices of all elements to `output`.
    ///
    /// `output` holds one `test_dofs x trial_dofs` block per element, element-major, each block
    /// stored row-major.
    fn add_element_matrices(&self, _output: &mut [T]) -> Result<(), AssemblyError> {
        Err(AssemblyError::MissingElementMatrices { kind: self.kind() })
    }

    /// `y += A_e x` for a trial E-vector `x` and a test E-vector `y`.
    fn add_mult(&self, x: &[T], y: &mut [T]) -> Result<(), AssemblyError>;

    /// `y += A_e^T x` for a test E-vector `x` and a trial E-vector `y`.
    fn add_mult_transpose(&self, _x: &[T], _y: &mut [T]) -> Result<(), AssemblyError> {
        Err(AssemblyError::TransposeUnsupported {
            operator: type_name::<Self>(),
        })
    }

    /// Adds the diagonals of all element matrices to the E-vector `diagonal`.
    fn add_diagonal(&self, _diagonal: &mut [T]) -> Result<(), AssemblyError> {
        Err(AssemblyError::DiagonalUnsupported {
            operator: type_name::<Self>(),
        })
    }
}

/// The constant matrix `D` coupling test and trial features `[value, gradient]` at a
/// quadrature point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCoupling<T: Real> {
    matrix: DMatrix<T>,
}

impl<T: Real> PointCoupling<T> {
    pub fn from_description(description: &IntegratorDescription<T>, dim: usize) -> Self {
        let c = description.coefficient();
        let mut matrix = DMatrix::zeros(dim + 1, dim + 1);
        match description.kind() {
            WeakFormKind::Mass => matrix[(0, 0)] = c,
            WeakFormKind::Diffusion => {
                for k in 1..=dim {
                    matrix[(k, k)] = c;
                }
            }
            WeakFormKind::Advection => {
                if dim > 0 {
                    matrix[(0, 1)] = c;
                }
            }
        }
        Self { matrix }
    }

    pub fn matrix(&self) -> &DMatrix<T> {
        &self.matrix
    }

    pub fn num_features(&self) -> usize {
        self.matrix.nrows()
    }

    /// Computes the dense element matrix `M_ij = sum_q w_q phi_test_i^T D phi_trial_j`.
    pub(crate) fn element_matrix(
        &self,
        test: &QuadratureView<T>,
        trial: &QuadratureView<T>,
        workspace: &mut CouplingWorkspace<T>,
    ) {
        let nf = self.num_features();
        let CouplingWorkspace {
            test_features,
            trial_features,
            coupled,
            element_matrix,
            ..
        } = workspace;
        element_matrix.resize_mut(test.num_dofs(), trial.num_dofs(), T::zero());
        element_matrix.fill(T::zero());
        test_features.resize_mut(nf, test.num_dofs(), T::zero());
        trial_features.resize_mut(nf, trial.num_dofs(), T::zero());
        coupled.resize_mut(nf, trial.num_dofs(), T::zero());

        for q in 0..test.num_points() {
            populate_features(test, q, test_features);
            populate_features(trial, q, trial_features);
            coupled.gemm(T::one(), &self.matrix, &*trial_features, T::zero());
            element_matrix.gemm_tr(test.weight(q), &*test_features, &*coupled, T::one());
        }
    }

    /// Computes `y += M x` (or `y += M^T x` if `transpose`) for the element matrix `M` without
    /// forming it.
    pub(crate) fn add_element_action(
        &self,
        test: &QuadratureView<T>,
        trial: &QuadratureView<T>,
        x: &[T],
        y: &mut [T],
        transpose: bool,
        workspace: &mut CouplingWorkspace<T>,
    ) {
        let nf = self.num_features();
        let (input, output) = if transpose { (test, trial) } else { (trial, test) };
        let CouplingWorkspace {
            point_input,
            point_output,
            ..
        } = workspace;
        point_input.resize_vertically_mut(nf, T::zero());
        point_output.resize_vertically_mut(nf, T::zero());

        for q in 0..test.num_points() {
            for k in 0..nf {
                point_input[k] = (0..input.num_dofs()).fold(T::zero(), |sum, j| sum + input.feature(q, j, k) * x[j]);
            }
            if transpose {
                point_output.gemv_tr(test.weight(q), &self.matrix, &*point_input, T::zero());
            } else {
                point_output.gemv(test.weight(q), &self.matrix, &*point_input, T::zero());
            }
            for (i, y_i) in y.iter_mut().enumerate() {
                *y_i += (0..nf).fold(T::zero(), |sum, k| sum + output.feature(q, i, k) * point_output[k]);
            }
        }
    }

    /// Adds `M_ii` to `diagonal[i]` without forming the element matrix.
    pub(crate) fn add_element_diagonal(&self, test: &QuadratureView<T>, trial: &QuadratureView<T>, diagonal: &mut [T]) {
        let nf = self.num_features();
        for q in 0..test.num_points() {
            let w = test.weight(q);
            for (i, d_i) in diagonal.iter_mut().enumerate() {
                let mut m_ii = T::zero();
                for k in 0..nf {
                    for l in 0..nf {
                        m_ii += test.feature(q, i, k) * self.matrix[(k, l)] * trial.feature(q, i, l);
                    }
                }
                *d_i += w * m_ii;
            }
        }
    }
}

fn populate_features<T: Real>(view: &QuadratureView<T>, q: usize, features: &mut DMatrix<T>) {
    for i in 0..view.num_dofs() {
        for k in 0..features.nrows() {
            features[(k, i)] = view.feature(q, i, k);
        }
    }
}

/// Per-task scratch space for the coupling kernels.
#[derive(Debug, Clone)]
pub(crate) struct CouplingWorkspace<T: Real> {
    test_features: DMatrix<T>,
    trial_features: DMatrix<T>,
    coupled: DMatrix<T>,
    element_matrix: DMatrix<T>,
    point_input: DVector<T>,
    point_output: DVector<T>,
}

impl<T: Real> Default for CouplingWorkspace<T> {
    fn default() -> Self {
        Self {
            test_features: DMatrix::zeros(0, 0),
            trial_features: DMatrix::zeros(0, 0),
            coupled: DMatrix::zeros(0, 0),
            element_matrix: DMatrix::zeros(0, 0),
            point_input: DVector::zeros(0),
            point_output: DVector::zeros(0),
        }
    }
}

impl<T: Real> CouplingWorkspace<T> {
    pub(crate) fn element_matrix(&self) -> &DMatrix<T> {
        &self.element_matrix
    }
}
