use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::integrators::{
    CouplingWorkspace, Integrator, IntegratorContext, IntegratorDescription, PointCoupling, WeakFormKind,
};
use crate::space::{ElementQuadrature, FiniteElementSpace};
use crate::Real;
use nalgebra::{DVectorView, DVectorViewMut};

/// Integrator that evaluates quadrature on the fly and works with dense element matrices.
#[derive(Debug)]
pub struct ReferenceIntegrator<'a, T: Real> {
    kind: WeakFormKind,
    coupling: PointCoupling<T>,
    trial: &'a dyn FiniteElementSpace<T>,
    test: &'a dyn FiniteElementSpace<T>,
    mixed: bool,
    executor: Executor,
}

#[derive(Debug)]
struct ElementWorkspace<T: Real> {
    test_quadrature: ElementQuadrature<T>,
    trial_quadrature: ElementQuadrature<T>,
    coupling: CouplingWorkspace<T>,
}

impl<T: Real> Default for ElementWorkspace<T> {
    fn default() -> Self {
        Self {
            test_quadrature: ElementQuadrature::default(),
            trial_quadrature: ElementQuadrature::default(),
            coupling: CouplingWorkspace::default(),
        }
    }
}

impl<'a, T: Real> ReferenceIntegrator<'a, T> {
    pub fn new(description: &IntegratorDescription<T>, context: &IntegratorContext<'a, T>) -> Self {
        Self {
            kind: description.kind(),
            coupling: PointCoupling::from_description(description, context.test().geometry_dim()),
            trial: context.trial(),
            test: context.test(),
            mixed: context.is_mixed(),
            executor: context.executor(),
        }
    }

    fn num_test_dofs(&self) -> usize {
        self.test.element_dof_count()
    }

    fn num_trial_dofs(&self) -> usize {
        self.trial.element_dof_count()
    }

    /// Leaves the element matrix of the given element in the workspace.
    fn compute_element_matrix(&self, workspace: &mut ElementWorkspace<T>, element_index: usize) -> eyre::Result<()> {
        let ElementWorkspace {
            test_quadrature,
            trial_quadrature,
            coupling,
        } = workspace;
        self.test
            .populate_element_quadrature(element_index, test_quadrature)?;
        if self.mixed {
            self.trial
                .populate_element_quadrature(element_index, trial_quadrature)?;
            self.coupling
                .element_matrix(&test_quadrature.view(), &trial_quadrature.view(), coupling);
        } else {
            let view = test_quadrature.view();
            self.coupling.element_matrix(&view, &view, coupling);
        }
        Ok(())
    }

    /// Runs `f(workspace, element_index, chunk)` after computing the element matrix of every
    /// chunk of `data`.
    fn for_each_element_matrix<F>(&self, data: &mut [T], chunk_size: usize, f: F) -> Result<(), AssemblyError>
    where
        F: Fn(&ElementWorkspace<T>, usize, &mut [T]) + Sync + Send,
    {
        let device = self.test.local_layout().device();
        self.executor.try_for_each_chunk_mut_init(
            device,
            data,
            chunk_size,
            ElementWorkspace::default,
            |workspace, e, chunk| {
                self.compute_element_matrix(workspace, e)?;
                f(&*workspace, e, chunk);
                Ok::<_, AssemblyError>(())
            },
        )
    }
}

impl<'a, T: Real> Integrator<T> for ReferenceIntegrator<'a, T> {
    fn kind(&self) -> WeakFormKind {
        self.kind
    }

    fn supports_element_matrices(&self) -> bool {
        true
    }

    fn add_element_matrices(&self, output: &mut [T]) -> Result<(), AssemblyError> {
        let (n_test, n_trial) = (self.num_test_dofs(), self.num_trial_dofs());
        self.for_each_element_matrix(output, n_test * n_trial, |workspace, _, block| {
            let matrix = workspace.coupling.element_matrix();
            for i in 0..n_test {
                for j in 0..n_trial {
                    block[i * n_trial + j] += matrix[(i, j)];
                }
            }
        })
    }

    fn add_mult(&self, x: &[T], y: &mut [T]) -> Result<(), AssemblyError> {
        let (n_test, n_trial) = (self.num_test_dofs(), self.num_trial_dofs());
        self.for_each_element_matrix(y, n_test, |workspace, e, y_e| {
            let x_e = DVectorView::from_slice(&x[e * n_trial..(e + 1) * n_trial], n_trial);
            let mut y_e = DVectorViewMut::from_slice(y_e, n_test);
            y_e.gemv(T::one(), workspace.coupling.element_matrix(), &x_e, T::one());
        })
    }

    fn add_mult_transpose(&self, x: &[T], y: &mut [T]) -> Result<(), AssemblyError> {
        let (n_test, n_trial) = (self.num_test_dofs(), self.num_trial_dofs());
        self.for_each_element_matrix(y, n_trial, |workspace, e, y_e| {
            let x_e = DVectorView::from_slice(&x[e * n_test..(e + 1) * n_test], n_test);
            let mut y_e = DVectorViewMut::from_slice(y_e, n_trial);
            y_e.gemv_tr(T::one(), workspace.coupling.element_matrix(), &x_e, T::one());
        })
    }

    fn add_diagonal(&self, diagonal: &mut [T]) -> Result<(), AssemblyError> {
        if self.mixed {
            return Err(AssemblyError::MixedSpaces);
        }
        self.for_each_element_matrix(diagonal, self.num_test_dofs(), |workspace, _, d_e| {
            let matrix = workspace.coupling.element_matrix();
            for (i, d_i) in d_e.iter_mut().enumerate() {
                *d_i += matrix[(i, i)];
            }
        })
    }
}
