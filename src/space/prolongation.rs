use crate::buffer::{Buffer, Device, Layout};
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::operator::{check_apply_args, LinearOperator};
use crate::space::invert_index_map;
use crate::Real;
use eyre::ensure;
use nalgebra_sparse::pattern::SparsityPattern;

/// Maps true dofs to local dofs for conforming spaces in which every local dof is a copy of
/// exactly one true dof.
///
/// As an operator, `P` copies true values to local dofs and `P^T` sums local values onto their
/// true dofs.
#[derive(Debug, Clone)]
pub struct ConformingProlongation {
    local_to_true: Vec<usize>,
    // Lane t lists the local dofs that copy true dof t
    true_to_local: SparsityPattern,
    device: Device,
    executor: Executor,
}

impl ConformingProlongation {
    /// Fails if a local dof maps outside `0..num_true` or if a true dof has no local copy.
    pub fn try_new(local_to_true: Vec<usize>, num_true: usize, device: Device) -> eyre::Result<Self> {
        if let Some(&t) = local_to_true.iter().find(|&&t| t >= num_true) {
            eyre::bail!("local dof maps to true dof {}, but there are only {} true dofs", t, num_true);
        }
        let true_to_local = invert_index_map(&local_to_true, num_true)?;
        ensure!(
            (0..num_true).all(|t| true_to_local.lane(t).len() > 0),
            "every true dof must have at least one local dof"
        );
        Ok(Self {
            local_to_true,
            true_to_local,
            device,
            executor: Executor::default(),
        })
    }

    pub fn with_executor(self, executor: Executor) -> Self {
        Self { executor, ..self }
    }

    pub fn num_local(&self) -> usize {
        self.local_to_true.len()
    }

    pub fn num_true(&self) -> usize {
        self.true_to_local.major_dim()
    }

    pub fn local_layout(&self) -> Layout {
        Layout::new(self.num_local(), self.device)
    }

    pub fn true_layout(&self) -> Layout {
        Layout::new(self.num_true(), self.device)
    }

    pub fn local_to_true(&self) -> &[usize] {
        &self.local_to_true
    }

    /// Local copies of the given true dof, in increasing order.
    pub fn local_dofs(&self, true_dof: usize) -> &[usize] {
        self.true_to_local.lane(true_dof)
    }

    /// The restriction `R`, which picks one representative local dof for every true dof.
    pub fn restriction(&self) -> ConformingRestriction<'_> {
        ConformingRestriction { prolongation: self }
    }

    pub fn prolong<T: Real>(&self, true_values: &[T], local_values: &mut [T]) {
        let map = &self.local_to_true;
        self.executor
            .for_each_mut(self.device, local_values, |l, v| *v = true_values[map[l]]);
    }

    /// Sums local values onto their true dofs.
    pub fn accumulate<T: Real>(&self, local_values: &[T], true_values: &mut [T]) {
        let pattern = &self.true_to_local;
        self.executor
            .for_each_mut(self.device, true_values, |t, v| {
                *v = pattern
                    .lane(t)
                    .iter()
                    .fold(T::zero(), |sum, &l| sum + local_values[l])
            });
    }

    pub fn restrict<T: Real>(&self, local_values: &[T], true_values: &mut [T]) {
        let pattern = &self.true_to_local;
        self.executor
            .for_each_mut(self.device, true_values, |t, v| *v = local_values[pattern.lane(t)[0]]);
    }
}

impl<T: Real> LinearOperator<T> for ConformingProlongation {
    fn in_layout(&self) -> Layout {
        self.true_layout()
    }

    fn out_layout(&self) -> Layout {
        self.local_layout()
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.true_layout(), self.local_layout(), y, x)?;
        self.prolong(&x.read(), &mut y.write());
        Ok(())
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.local_layout(), self.true_layout(), y, x)?;
        self.accumulate(&x.read(), &mut y.write());
        Ok(())
    }
}

/// The restriction operator `R` of a [`ConformingProlongation`], satisfying `R P = I`.
#[derive(Debug, Clone, Copy)]
pub struct ConformingRestriction<'a> {
    prolongation: &'a ConformingProlongation,
}

impl<'a, T: Real> LinearOperator<T> for ConformingRestriction<'a> {
    fn in_layout(&self) -> Layout {
        self.prolongation.local_layout()
    }

    fn out_layout(&self) -> Layout {
        self.prolongation.true_layout()
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.prolongation.local_layout(), self.prolongation.true_layout(), y, x)?;
        self.prolongation.restrict(&x.read(), &mut y.write());
        Ok(())
    }
}
