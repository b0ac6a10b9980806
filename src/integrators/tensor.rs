use crate::buffer::Device;
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::integrators::{
    CouplingWorkspace, Integrator, IntegratorContext, IntegratorDescription, PointCoupling, WeakFormKind,
};
use crate::space::{ElementQuadrature, FiniteElementSpace, QuadratureView};
use crate::Real;
use eyre::ensure;
use log::debug;

/// Quadrature data of every element of a space, evaluated once.
#[derive(Debug, Clone)]
struct SpaceQuadrature<T> {
    num_points: usize,
    num_dofs: usize,
    dim: usize,
    weights: Vec<T>,
    values: Vec<T>,
    gradients: Vec<T>,
}

impl<T: Real> SpaceQuadrature<T> {
    fn evaluate(space: &dyn FiniteElementSpace<T>) -> eyre::Result<Self> {
        let num_points = space.element_quadrature_size();
        let num_dofs = space.element_dof_count();
        let dim = space.geometry_dim();
        let num_elements = space.num_elements();

        let mut data = Self {
            num_points,
            num_dofs,
            dim,
            weights: Vec::with_capacity(num_elements * num_points),
            values: Vec::with_capacity(num_elements * num_points * num_dofs),
            gradients: Vec::with_capacity(num_elements * num_points * num_dofs * dim),
        };
        let mut element_quadrature = ElementQuadrature::default();
        for e in 0..num_elements {
            space.populate_element_quadrature(e, &mut element_quadrature)?;
            ensure!(
                element_quadrature.num_points() == num_points,
                "element {} has {} quadrature points, expected {}",
                e,
                element_quadrature.num_points(),
                num_points
            );
            data.weights
                .extend_from_slice(element_quadrature.weights());
            data.values
                .extend_from_slice(element_quadrature.basis_values());
            data.gradients
                .extend_from_slice(element_quadrature.basis_gradients());
        }
        Ok(data)
    }

    fn element(&self, element_index: usize) -> QuadratureView<'_, T> {
        let nq = self.num_points;
        let nv = nq * self.num_dofs;
        let ng = nv * self.dim;
        QuadratureView::from_parts(
            self.num_dofs,
            self.dim,
            &self.weights[element_index * nq..(element_index + 1) * nq],
            &self.values[element_index * nv..(element_index + 1) * nv],
            &self.gradients[element_index * ng..(element_index + 1) * ng],
        )
    }
}

/// Partial-assembly integrator.
///
/// Quadrature data is evaluated for all elements at construction. The form is applied by
/// contracting E-vectors through the quadrature data point by point, so element matrices are
/// never formed and [`add_element_matrices`](Integrator::add_element_matrices) is unsupported.
#[derive(Debug)]
pub struct TensorIntegrator<T: Real> {
    kind: WeakFormKind,
    coupling: PointCoupling<T>,
    test: SpaceQuadrature<T>,
    // None if trial and test space coincide
    trial: Option<SpaceQuadrature<T>>,
    device: Device,
    executor: Executor,
}

impl<T: Real> TensorIntegrator<T> {
    pub fn new(description: &IntegratorDescription<T>, context: &IntegratorContext<'_, T>) -> eyre::Result<Self> {
        let test = SpaceQuadrature::evaluate(context.test())?;
        let trial = if context.is_mixed() {
            Some(SpaceQuadrature::evaluate(context.trial())?)
        } else {
            None
        };
        debug!(
            "Precomputed quadrature data for {} integrator on {} elements",
            description.kind(),
            context.test().num_elements()
        );
        Ok(Self {
            kind: description.kind(),
            coupling: PointCoupling::from_description(description, context.test().geometry_dim()),
            test,
            trial,
            device: context.test().local_layout().device(),
            executor: context.executor(),
        })
    }

    fn trial(&self) -> &SpaceQuadrature<T> {
        self.trial.as_ref().unwrap_or(&self.test)
    }

    fn add_action(&self, x: &[T], y: &mut [T], transpose: bool) -> Result<(), AssemblyError> {
        let (n_in, n_out) = if transpose {
            (self.test.num_dofs, self.trial().num_dofs)
        } else {
            (self.trial().num_dofs, self.test.num_dofs)
        };
        self.executor.try_for_each_chunk_mut_init(
            self.device,
            y,
            n_out,
            CouplingWorkspace::default,
            |workspace, e, y_e| {
                let x_e = &x[e * n_in..(e + 1) * n_in];
                self.coupling.add_element_action(
                    &self.test.element(e),
                    &self.trial().element(e),
                    x_e,
                    y_e,
                    transpose,
                    workspace,
                );
                Ok(())
            },
        )
    }
}

impl<T: Real> Integrator<T> for TensorIntegrator<T> {
    fn kind(&self) -> WeakFormKind {
        self.kind
    }

    fn add_mult(&self, x: &[T], y: &mut [T]) -> Result<(), AssemblyError> {
        self.add_action(x, y, false)
    }

    fn add_mult_transpose(&self, x: &[T], y: &mut [T]) -> Result<(), AssemblyError> {
        self.add_action(x, y, true)
    }

    fn add_diagonal(&self, diagonal: &mut [T]) -> Result<(), AssemblyError> {
        if self.trial.is_some() {
            return Err(AssemblyError::MixedSpaces);
        }
        self.executor
            .for_each_chunk_mut(self.device, diagonal, self.test.num_dofs, |e, d_e| {
                let view = self.test.element(e);
                self.coupling.add_element_diagonal(&view, &view, d_e);
            });
        Ok(())
    }
}
