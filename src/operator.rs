//! Linear operators acting on buffers.
use crate::buffer::{Buffer, Layout};
use crate::error::AssemblyError;
use crate::Real;
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVectorView, DVectorViewMut};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use std::any::type_name;
use std::cell::RefCell;
use std::fmt::Debug;
use std::ops::Deref;

/// A linear map from buffers on [`in_layout`](Self::in_layout) to buffers on
/// [`out_layout`](Self::out_layout).
pub trait LinearOperator<T: Real>: Debug {
    fn in_layout(&self) -> Layout;

    fn out_layout(&self) -> Layout;

    /// Computes `y = A x`.
    ///
    /// `x` must have the input layout and `y` the output layout, and the two must not share
    /// storage.
    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError>;

    /// Computes `y = A^T x`, with `x` on the output layout and `y` on the input layout.
    fn apply_transpose(&self, _y: &mut Buffer<T>, _x: &Buffer<T>) -> Result<(), AssemblyError> {
        Err(AssemblyError::TransposeUnsupported {
            operator: type_name::<Self>(),
        })
    }

    /// Writes the diagonal of a square operator into `diagonal`.
    fn assemble_diagonal(&self, _diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        Err(AssemblyError::DiagonalUnsupported {
            operator: type_name::<Self>(),
        })
    }
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Real,
    A: ?Sized + LinearOperator<T>,
{
    fn in_layout(&self) -> Layout {
        <A as LinearOperator<T>>::in_layout(self)
    }

    fn out_layout(&self) -> Layout {
        <A as LinearOperator<T>>::out_layout(self)
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        <A as LinearOperator<T>>::apply_transpose(self, y, x)
    }

    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        <A as LinearOperator<T>>::assemble_diagonal(self, diagonal)
    }
}

pub fn check_layout<T: Real>(buffer: &Buffer<T>, expected: Layout) -> Result<(), AssemblyError> {
    if buffer.layout() == expected {
        Ok(())
    } else {
        Err(AssemblyError::LayoutMismatch {
            expected,
            actual: buffer.layout(),
        })
    }
}

/// Checks that `x` lives on `in_layout`, `y` on `out_layout` and that they do not alias.
pub fn check_apply_args<T: Real>(
    in_layout: Layout,
    out_layout: Layout,
    y: &Buffer<T>,
    x: &Buffer<T>,
) -> Result<(), AssemblyError> {
    check_layout(x, in_layout)?;
    check_layout(y, out_layout)?;
    if y.aliases(x) {
        return Err(AssemblyError::AliasedBuffers);
    }
    Ok(())
}

/// A wrapped operator that is either owned by its wrapper or borrowed from elsewhere.
#[derive(Debug)]
pub enum OperatorHandle<'a, T: Real> {
    Owned(Box<dyn LinearOperator<T> + 'a>),
    Borrowed(&'a dyn LinearOperator<T>),
}

impl<'a, T: Real> OperatorHandle<'a, T> {
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl<'a, T: Real> Deref for OperatorHandle<'a, T> {
    type Target = dyn LinearOperator<T> + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(operator) => operator.as_ref(),
            Self::Borrowed(operator) => *operator,
        }
    }
}

impl<'a, T: Real> From<Box<dyn LinearOperator<T> + 'a>> for OperatorHandle<'a, T> {
    fn from(operator: Box<dyn LinearOperator<T> + 'a>) -> Self {
        Self::Owned(operator)
    }
}

impl<'a, T: Real> From<&'a dyn LinearOperator<T>> for OperatorHandle<'a, T> {
    fn from(operator: &'a dyn LinearOperator<T>) -> Self {
        Self::Borrowed(operator)
    }
}

impl<T: Real> LinearOperator<T> for DMatrix<T> {
    fn in_layout(&self) -> Layout {
        Layout::host(self.ncols())
    }

    fn out_layout(&self) -> Layout {
        Layout::host(self.nrows())
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.in_layout(), self.out_layout(), y, x)?;
        let x = x.read();
        let mut y = y.write();
        let mut y = DVectorViewMut::from_slice(&mut y, self.nrows());
        y.gemv(T::one(), self, &DVectorView::from_slice(&x, self.ncols()), T::zero());
        Ok(())
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.out_layout(), self.in_layout(), y, x)?;
        let x = x.read();
        let mut y = y.write();
        let mut y = DVectorViewMut::from_slice(&mut y, self.ncols());
        y.gemv_tr(T::one(), self, &DVectorView::from_slice(&x, self.nrows()), T::zero());
        Ok(())
    }

    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_layout(diagonal, self.out_layout())?;
        check_layout(diagonal, self.in_layout())?;
        let mut diagonal = diagonal.write();
        for (i, d_i) in diagonal.iter_mut().enumerate() {
            *d_i = self[(i, i)];
        }
        Ok(())
    }
}

/// Computes `y = op(A) x` for a CSR matrix on the active storage of the buffers.
pub(crate) fn spmv_csr<T: Real>(a: Op<&CsrMatrix<T>>, y: &mut Buffer<T>, x: &Buffer<T>) {
    let x = x.read();
    let mut y = y.write();
    // spmm_csr_dense reads y even with beta = 0
    y.fill(T::zero());
    let (y_len, x_len) = (y.len(), x.len());
    spmm_csr_dense(
        T::zero(),
        DMatrixViewMut::from_slice(&mut y, y_len, 1),
        T::one(),
        a,
        Op::NoOp(DMatrixView::from_slice(&x, x_len, 1)),
    );
}

pub(crate) fn csr_diagonal<T: Real>(matrix: &CsrMatrix<T>, diagonal: &mut [T]) {
    diagonal.fill(T::zero());
    for (i, j, &v) in matrix.triplet_iter() {
        if i == j {
            diagonal[i] += v;
        }
    }
}

impl<T: Real> LinearOperator<T> for CsrMatrix<T> {
    fn in_layout(&self) -> Layout {
        Layout::host(self.ncols())
    }

    fn out_layout(&self) -> Layout {
        Layout::host(self.nrows())
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.in_layout(), self.out_layout(), y, x)?;
        spmv_csr(Op::NoOp(self), y, x);
        Ok(())
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.out_layout(), self.in_layout(), y, x)?;
        spmv_csr(Op::Transpose(self), y, x);
        Ok(())
    }

    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_layout(diagonal, self.out_layout())?;
        check_layout(diagonal, self.in_layout())?;
        csr_diagonal(self, &mut diagonal.write());
        Ok(())
    }
}

/// The triple product `R^T A P`.
///
/// Used to move an operator defined on local dofs to true dofs, in which case both `R` and `P`
/// are the prolongation of the space.
#[derive(Debug)]
pub struct RapOperator<'a, T: Real> {
    rt: &'a dyn LinearOperator<T>,
    base: &'a dyn LinearOperator<T>,
    p: &'a dyn LinearOperator<T>,
    // P x, and A P x
    base_input: RefCell<Buffer<T>>,
    base_output: RefCell<Buffer<T>>,
    exact_diagonal: bool,
}

impl<'a, T: Real> RapOperator<'a, T> {
    pub fn new(
        rt: &'a dyn LinearOperator<T>,
        base: &'a dyn LinearOperator<T>,
        p: &'a dyn LinearOperator<T>,
    ) -> Result<Self, AssemblyError> {
        if p.out_layout() != base.in_layout() {
            return Err(AssemblyError::LayoutMismatch {
                expected: base.in_layout(),
                actual: p.out_layout(),
            });
        }
        if rt.out_layout() != base.out_layout() {
            return Err(AssemblyError::LayoutMismatch {
                expected: base.out_layout(),
                actual: rt.out_layout(),
            });
        }
        Ok(Self {
            rt,
            base,
            p,
            base_input: RefCell::new(Buffer::zeros(base.in_layout())),
            base_output: RefCell::new(Buffer::zeros(base.out_layout())),
            exact_diagonal: true,
        })
    }

    /// Marks the diagonal as unavailable, for when the base operator couples local dofs that
    /// share a true dof.
    pub fn without_diagonal(self) -> Self {
        Self {
            exact_diagonal: false,
            ..self
        }
    }

    pub fn base(&self) -> &'a dyn LinearOperator<T> {
        self.base
    }
}

impl<'a, T: Real> LinearOperator<T> for RapOperator<'a, T> {
    fn in_layout(&self) -> Layout {
        self.p.in_layout()
    }

    fn out_layout(&self) -> Layout {
        self.rt.in_layout()
    }

    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.in_layout(), self.out_layout(), y, x)?;
        let mut px = self.base_input.borrow_mut();
        let mut apx = self.base_output.borrow_mut();
        self.p.apply(&mut px, x)?;
        self.base.apply(&mut apx, &px)?;
        self.rt.apply_transpose(y, &apx)
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        check_apply_args(self.out_layout(), self.in_layout(), y, x)?;
        let mut rx = self.base_output.borrow_mut();
        let mut atrx = self.base_input.borrow_mut();
        self.rt.apply(&mut rx, x)?;
        self.base.apply_transpose(&mut atrx, &rx)?;
        self.p.apply_transpose(y, &atrx)
    }

    /// Sums the local diagonal of the base operator onto true dofs with `R^T`.
    ///
    /// This is only exact if no two local dofs that share a true dof are coupled by the base
    /// operator. Operators built with [`without_diagonal`](Self::without_diagonal) fail instead.
    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_layout(diagonal, self.out_layout())?;
        if !self.exact_diagonal {
            return Err(AssemblyError::DiagonalUnsupported {
                operator: "RapOperator",
            });
        }
        let mut local_diagonal = self.base_output.borrow_mut();
        self.base.assemble_diagonal(&mut local_diagonal)?;
        self.rt.apply_transpose(diagonal, &local_diagonal)
    }
}
