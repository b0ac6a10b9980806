use crate::buffer::{Device, Layout};
use crate::engine::Engine;
use crate::space::{ConformingProlongation, ElementQuadrature, FiniteElementSpace};
use crate::Real;
use nalgebra::convert;

/// Continuous piecewise linear functions on a partition of an interval.
///
/// Element `e` spans `[x_e, x_{e+1}]` and its dofs are the two vertices. Integration uses the
/// 2-point Gauss rule, which is exact for mass and stiffness matrices of linear elements.
#[derive(Debug, Clone)]
pub struct IntervalSpace<T> {
    vertices: Vec<T>,
    device: Device,
    prolongation: Option<ConformingProlongation>,
}

impl<T: Real> IntervalSpace<T> {
    pub fn from_vertices(engine: &Engine, vertices: Vec<T>) -> Self {
        Self {
            vertices,
            device: engine.device(),
            prolongation: None,
        }
    }

    /// A uniform partition of `[0, length]` into `num_elements` elements.
    pub fn uniform(engine: &Engine, num_elements: usize, length: T) -> Self {
        let h = length / convert::<_, T>(num_elements.max(1) as f64);
        let vertices = if num_elements == 0 {
            Vec::new()
        } else {
            (0..=num_elements)
                .map(|i| h * convert::<_, T>(i as f64))
                .collect()
        };
        Self::from_vertices(engine, vertices)
    }

    /// A uniform partition of `[0, length]` in which the last vertex is identified with the
    /// first, giving a conforming prolongation from `num_elements` true dofs to
    /// `num_elements + 1` local dofs.
    pub fn periodic(engine: &Engine, num_elements: usize, length: T) -> eyre::Result<Self> {
        eyre::ensure!(
            num_elements >= 2,
            "a periodic interval needs at least two elements, got {}",
            num_elements
        );
        let mut space = Self::uniform(engine, num_elements, length);
        let local_to_true = (0..num_elements).chain([0]).collect();
        let prolongation = ConformingProlongation::try_new(local_to_true, num_elements, engine.device())?
            .with_executor(engine.executor());
        space.prolongation = Some(prolongation);
        Ok(space)
    }

    pub fn vertices(&self) -> &[T] {
        &self.vertices
    }
}

impl<T: Real> FiniteElementSpace<T> for IntervalSpace<T> {
    fn num_elements(&self) -> usize {
        self.vertices.len().saturating_sub(1)
    }

    fn element_dof_count(&self) -> usize {
        2
    }

    fn geometry_dim(&self) -> usize {
        1
    }

    fn local_layout(&self) -> Layout {
        Layout::new(self.vertices.len(), self.device)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        output[0] = element_index;
        output[1] = element_index + 1;
    }

    fn element_quadrature_size(&self) -> usize {
        2
    }

    fn populate_element_quadrature(
        &self,
        element_index: usize,
        output: &mut ElementQuadrature<T>,
    ) -> eyre::Result<()> {
        let a = self.vertices[element_index];
        let b = self.vertices[element_index + 1];
        let h = b - a;
        if h <= T::zero() {
            eyre::bail!("element {} has non-positive length {}", element_index, h);
        }

        let one = T::one();
        let two = one + one;
        let xi: T = convert(1.0 / 3.0f64.sqrt());
        let points = [-xi, xi];

        output.resize(2, 2, 1);
        output.weights_mut().fill(h / two);
        for (q, xi) in points.iter().enumerate() {
            let values = &mut output.basis_values_mut()[2 * q..2 * q + 2];
            values[0] = (one - *xi) / two;
            values[1] = (one + *xi) / two;
            let gradients = &mut output.basis_gradients_mut()[2 * q..2 * q + 2];
            gradients[0] = -one / h;
            gradients[1] = one / h;
        }
        Ok(())
    }

    fn prolongation(&self) -> Option<&ConformingProlongation> {
        self.prolongation.as_ref()
    }
}
