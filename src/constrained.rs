//! Essential boundary conditions by algebraic elimination.
use crate::buffer::{Buffer, Layout};
use crate::constraints::ConstraintList;
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::operator::{check_apply_args, check_layout, LinearOperator, OperatorHandle};
use crate::Real;
use std::cell::RefCell;

/// Decorates a square operator `A` so that constrained dofs behave like the identity.
///
/// With `I_f` the projection onto free dofs and `I_c` the projection onto constrained dofs,
/// the wrapper applies `I_f A I_f + I_c`. Right-hand sides are made consistent with this
/// operator through [`eliminate_rhs`](Self::eliminate_rhs).
///
/// The wrapper keeps scratch buffers that are reused across calls. It is therefore neither
/// `Sync` nor reentrant.
#[derive(Debug)]
pub struct ConstrainedOperator<'a, T: Real> {
    operator: OperatorHandle<'a, T>,
    constraints: &'a ConstraintList,
    executor: Executor,
    z: RefCell<Buffer<T>>,
    w: RefCell<Buffer<T>>,
}

impl<'a, T: Real> ConstrainedOperator<'a, T> {
    pub fn new(
        operator: impl Into<OperatorHandle<'a, T>>,
        constraints: &'a ConstraintList,
        executor: Executor,
    ) -> Result<Self, AssemblyError> {
        let operator = operator.into();
        let layout = operator.out_layout();
        if operator.in_layout() != layout {
            return Err(AssemblyError::LayoutMismatch {
                expected: layout,
                actual: operator.in_layout(),
            });
        }
        constraints.check_system_size(layout.size())?;
        Ok(Self {
            operator,
            constraints,
            executor,
            z: RefCell::new(Buffer::zeros(layout)),
            w: RefCell::new(Buffer::zeros(layout)),
        })
    }

    pub fn operator(&self) -> &(dyn LinearOperator<T> + 'a) {
        &*self.operator
    }

    /// Whether the wrapped operator is released together with the wrapper.
    pub fn owns_operator(&self) -> bool {
        self.operator.is_owned()
    }

    pub fn constraints(&self) -> &'a ConstraintList {
        self.constraints
    }

    /// Makes `b` consistent with the constrained operator for the prescribed values in `x`.
    ///
    /// Computes `b := b - A w`, where `w` holds the constrained entries of `x` and zeros
    /// elsewhere, followed by `b[c] := x[c]` for every constrained dof `c`.
    pub fn eliminate_rhs(&self, x: &Buffer<T>, b: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.in_layout(), self.out_layout(), b, x)?;
        if self.constraints.is_empty() {
            return Ok(());
        }
        let device = self.constraints.device();

        let mut w = self.w.borrow_mut();
        {
            let x = x.read();
            let mut w_guard = w.write();
            let w_data: &mut [T] = &mut w_guard;
            self.executor
                .for_each_mut(device, w_data, |_, w_i| *w_i = T::zero());
            self.constraints
                .copy_constrained(&self.executor, w_data, &x);
        }

        let mut z = self.z.borrow_mut();
        self.operator.apply(&mut z, &w)?;

        let x = x.read();
        let z_guard = z.read();
        let z_data: &[T] = &z_guard;
        let mut b_guard = b.write();
        let b_data: &mut [T] = &mut b_guard;
        self.executor
            .for_each_mut(device, b_data, |i, b_i| *b_i -= z_data[i]);
        self.constraints
            .copy_constrained(&self.executor, b_data, &x);
        Ok(())
    }

    fn apply_constrained(
        &self,
        y: &mut Buffer<T>,
        x: &Buffer<T>,
        apply: impl FnOnce(&mut Buffer<T>, &Buffer<T>) -> Result<(), AssemblyError>,
    ) -> Result<(), AssemblyError> {
        if self.constraints.is_empty() {
            return apply(y, x);
        }

        let mut z = self.z.borrow_mut();
        z.assign(x)?;
        self.constraints
            .fill_constrained(&self.executor, &mut z.write(), T::zero());
        apply(y, &*z)?;

        let x = x.read();
        self.constraints
            .copy_constrained(&self.executor, &mut y.write(), &x);
        Ok(())
    }
}

impl<'a, T: Real> LinearOperator<T> for ConstrainedOperator<'a, T> {
    fn in_layout(&self) -> Layout {
        self.operator.in_layout()
    }

    fn out_layout(&self) -> Layout {
        self.operator.out_layout()
    }

    /// Computes `y = A z` with `z` equal to `x` at free dofs and zero at constrained dofs,
    /// followed by `y[c] := x[c]` for every constrained dof `c`.
    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.in_layout(), self.out_layout(), y, x)?;
        self.apply_constrained(y, x, |y, z| self.operator.apply(y, z))
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.out_layout(), self.in_layout(), y, x)?;
        self.apply_constrained(y, x, |y, z| self.operator.apply_transpose(y, z))
    }

    /// The diagonal of the wrapped operator, with ones at constrained dofs.
    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_layout(diagonal, self.out_layout())?;
        self.operator.assemble_diagonal(diagonal)?;
        self.constraints
            .fill_constrained(&self.executor, &mut diagonal.write(), T::one());
        Ok(())
    }
}
