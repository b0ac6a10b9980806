//! Explicit sparse assembly and elimination of constrained rows and columns.
use crate::constraints::ConstraintList;
use crate::error::AssemblyError;
use crate::Real;
use itertools::iproduct;
use log::debug;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::fmt::Debug;

/// Accumulates dense element blocks into a global sparse matrix.
pub trait SparseMatrixBuilder<T: Real> {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// Adds the row-major `rows.len() x cols.len()` block at the given global rows and columns.
    ///
    /// Duplicate entries are summed, and entries that are exactly zero are skipped.
    fn add_element_block(&mut self, rows: &[usize], cols: &[usize], block: &[T]);
}

impl<T: Real> SparseMatrixBuilder<T> for CooMatrix<T> {
    fn nrows(&self) -> usize {
        CooMatrix::nrows(self)
    }

    fn ncols(&self) -> usize {
        CooMatrix::ncols(self)
    }

    fn add_element_block(&mut self, rows: &[usize], cols: &[usize], block: &[T]) {
        assert_eq!(block.len(), rows.len() * cols.len(), "Block dimensions must match dof maps.");
        for ((a, &i), (b, &j)) in iproduct!(rows.iter().enumerate(), cols.iter().enumerate()) {
            let value = block[a * cols.len() + b];
            if value != T::zero() {
                self.push(i, j, value);
            }
        }
    }
}

/// Eliminates the constrained rows and columns of a square matrix in place.
///
/// Afterwards every constrained row and column is zero except for a unit diagonal. The
/// couplings removed from free rows are returned as a separate matrix `A_e` with the shape of
/// `matrix`, so that a right-hand side can be corrected with `b - A_e x` for prescribed values
/// `x`. Every constrained row must have a diagonal entry in the sparsity pattern, otherwise
/// [`AssemblyError::MissingDiagonal`] is returned and `matrix` is left untouched.
pub fn eliminate_rows_cols<T: Real>(
    matrix: &mut CsrMatrix<T>,
    constraints: &ConstraintList,
) -> Result<CsrMatrix<T>, AssemblyError> {
    let n = matrix.nrows();
    constraints.check_system_size(n)?;
    constraints.check_system_size(matrix.ncols())?;
    for &row in constraints.indices() {
        if !matrix.row(row).col_indices().contains(&row) {
            return Err(AssemblyError::MissingDiagonal { row });
        }
    }

    let constrained = constraints.membership();
    let mut eliminated = CooMatrix::new(n, n);
    for (i, mut row) in matrix.row_iter_mut().enumerate() {
        let (cols, values) = row.cols_and_values_mut();
        if constrained[i] {
            for (&j, value) in cols.iter().zip(values) {
                *value = if j == i { T::one() } else { T::zero() };
            }
        } else {
            for (&j, value) in cols.iter().zip(values) {
                if constrained[j] {
                    eliminated.push(i, j, *value);
                    *value = T::zero();
                }
            }
        }
    }
    debug!(
        "Eliminated {} constrained rows and columns, moving {} couplings to the elimination matrix",
        constraints.len(),
        eliminated.nnz()
    );
    Ok(CsrMatrix::from(&eliminated))
}

/// Finalizes and eliminates explicitly assembled systems across processes.
///
/// The form assembles its contributions over true dofs into a local COO matrix and leaves
/// communication and finalization to the assembler.
pub trait DistributedAssembler<T: Real>: Debug {
    fn finalize(&self, local: &CooMatrix<T>) -> eyre::Result<CsrMatrix<T>>;

    /// Eliminates constrained rows and columns from a finalized matrix, returning the
    /// eliminated couplings.
    fn eliminate(&self, matrix: &mut CsrMatrix<T>, constraints: &ConstraintList) -> Result<CsrMatrix<T>, AssemblyError> {
        eliminate_rows_cols(matrix, constraints)
    }
}
