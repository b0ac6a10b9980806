//! Linear systems formed from bilinear forms.
use crate::buffer::{Buffer, Layout};
use crate::constrained::ConstrainedOperator;
use crate::constraints::ConstraintList;
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::operator::{check_apply_args, check_layout, csr_diagonal, spmv_csr, LinearOperator};
use crate::Real;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Representation of a system matrix.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    /// Element-by-element application of the form, wrapped by a [`ConstrainedOperator`].
    MatrixFree,
    /// Explicitly assembled CSR matrix with constrained rows and columns eliminated.
    Csr,
    /// Explicit assembly finalized by a [`DistributedAssembler`](crate::sparse::DistributedAssembler).
    Distributed,
}

/// A vector of a linear system, either transformed into true dofs or sharing storage with the
/// caller's vector.
#[derive(Debug)]
pub enum SystemVector<T> {
    Transformed(Buffer<T>),
    Aliased(Buffer<T>),
}

impl<T> SystemVector<T> {
    pub fn is_aliased(&self) -> bool {
        matches!(self, Self::Aliased(_))
    }

    pub fn buffer(&self) -> &Buffer<T> {
        match self {
            Self::Transformed(buffer) | Self::Aliased(buffer) => buffer,
        }
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer<T> {
        match self {
            Self::Transformed(buffer) | Self::Aliased(buffer) => buffer,
        }
    }

    pub fn into_buffer(self) -> Buffer<T> {
        match self {
            Self::Transformed(buffer) | Self::Aliased(buffer) => buffer,
        }
    }
}

/// An explicitly assembled matrix whose constrained rows and columns have been eliminated,
/// together with the eliminated couplings.
#[derive(Debug)]
pub struct EliminatedMatrix<'a, T: Real> {
    matrix: CsrMatrix<T>,
    eliminated: CsrMatrix<T>,
    constraints: &'a ConstraintList,
    layout: Layout,
    executor: Executor,
    scratch: RefCell<Buffer<T>>,
}

impl<'a, T: Real> EliminatedMatrix<'a, T> {
    /// `layout` is the layout of the vectors the matrix acts on.
    pub fn new(
        matrix: CsrMatrix<T>,
        eliminated: CsrMatrix<T>,
        constraints: &'a ConstraintList,
        layout: Layout,
        executor: Executor,
    ) -> Result<Self, AssemblyError> {
        constraints.check_system_size(layout.size())?;
        for dims in [
            (matrix.nrows(), matrix.ncols()),
            (eliminated.nrows(), eliminated.ncols()),
        ] {
            if dims != (layout.size(), layout.size()) {
                return Err(AssemblyError::LayoutMismatch {
                    expected: layout,
                    actual: layout.with_size(dims.0),
                });
            }
        }
        Ok(Self {
            matrix,
            eliminated,
            constraints,
            layout,
            executor,
            scratch: RefCell::new(Buffer::zeros(layout)),
        })
    }

    pub fn matrix(&self) -> &CsrMatrix<T> {
        &self.matrix
    }

    /// The couplings between free rows and constrained columns removed by elimination.
    pub fn eliminated(&self) -> &CsrMatrix<T> {
        &self.eliminated
    }

    pub fn constraints(&self) -> &'a ConstraintList {
        self.constraints
    }

    /// Makes `b` consistent with the eliminated matrix for the prescribed values in `x`.
    ///
    /// Computes `b := b - A_e x`, followed by `b[c] := x[c]` for every constrained dof `c`.
    pub fn eliminate_bc(&self, x: &Buffer<T>, b: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.layout, self.layout, b, x)?;
        let mut correction = self.scratch.borrow_mut();
        spmv_csr(Op::NoOp(&self.eliminated), &mut correction, x);

        let x = x.read();
        let correction = correction.read();
        let correction: &[T] = &correction;
        let mut b_guard = b.write();
        let b_data: &mut [T] = &mut b_guard;
        self.executor
            .for_each_mut(self.layout.device(), b_data, |i, b_i| *b_i -= correction[i]);
        self.constraints
            .copy_constrained(&self.executor, b_data, &x);
        Ok(())
    }
}

impl<'a, T: Real> LinearOperator<T> for EliminatedMatrix<'a, T> {
    fn in_layout(&self) -> Layout {
        self.layout
    }

    fn out_layout(&self) -> Layout {
        self.layout
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.layout, self.layout, y, x)?;
        spmv_csr(Op::NoOp(&self.matrix), y, x);
        Ok(())
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.layout, self.layout, y, x)?;
        spmv_csr(Op::Transpose(&self.matrix), y, x);
        Ok(())
    }

    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_layout(diagonal, self.layout)?;
        csr_diagonal(&self.matrix, &mut diagonal.write());
        Ok(())
    }
}

/// The system operator produced by
/// [`BilinearForm::form_system_matrix`](crate::form::BilinearForm::form_system_matrix).
#[derive(Debug)]
pub enum SystemMatrix<'a, T: Real> {
    MatrixFree(ConstrainedOperator<'a, T>),
    Sparse(EliminatedMatrix<'a, T>),
}

impl<'a, T: Real> SystemMatrix<'a, T> {
    pub fn constraints(&self) -> &'a ConstraintList {
        match self {
            Self::MatrixFree(operator) => operator.constraints(),
            Self::Sparse(matrix) => matrix.constraints(),
        }
    }

    /// The eliminated CSR matrix, if the system was assembled explicitly.
    pub fn as_csr(&self) -> Option<&CsrMatrix<T>> {
        match self {
            Self::MatrixFree(_) => None,
            Self::Sparse(matrix) => Some(matrix.matrix()),
        }
    }

    pub fn as_constrained_operator(&self) -> Option<&ConstrainedOperator<'a, T>> {
        match self {
            Self::MatrixFree(operator) => Some(operator),
            Self::Sparse(_) => None,
        }
    }

    fn operator(&self) -> &dyn LinearOperator<T> {
        match self {
            Self::MatrixFree(operator) => operator,
            Self::Sparse(matrix) => matrix,
        }
    }
}

impl<'a, T: Real> LinearOperator<T> for SystemMatrix<'a, T> {
    fn in_layout(&self) -> Layout {
        self.operator().in_layout()
    }

    fn out_layout(&self) -> Layout {
        self.operator().out_layout()
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        self.operator().apply(y, x)
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        self.operator().apply_transpose(y, x)
    }

    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        self.operator().assemble_diagonal(diagonal)
    }
}

/// A linear system `A X = B` in true dofs, ready to be handed to a solver.
#[derive(Debug)]
pub struct LinearSystem<'a, T: Real> {
    pub matrix: SystemMatrix<'a, T>,
    pub x: SystemVector<T>,
    pub b: SystemVector<T>,
}
