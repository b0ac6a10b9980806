use fenris_assembly::buffer::{Buffer, Layout};
use fenris_assembly::constraints::ConstraintList;
use fenris_assembly::exec::Executor;
use fenris_assembly::nalgebra::DMatrix;
use fenris_assembly::nalgebra_sparse::{CooMatrix, CsrMatrix};
use fenris_assembly::sparse::{eliminate_rows_cols, SparseMatrixBuilder};
use fenris_assembly::system::EliminatedMatrix;
use fenris_assembly::AssemblyError;
use matrixcompare::assert_matrix_eq;

fn dense_csr(n: usize, f: impl Fn(usize, usize) -> f64) -> CsrMatrix<f64> {
    let dense = DMatrix::from_fn(n, n, f);
    CsrMatrix::from(&dense)
}

#[test]
fn eliminate_rows_and_columns() {
    let mut matrix = dense_csr(4, |i, j| (1 + i * 4 + j) as f64);
    let constraints = ConstraintList::try_new(vec![1], Layout::host(4)).unwrap();
    let eliminated = eliminate_rows_cols(&mut matrix, &constraints).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(4, 4, &[
        1.0, 0.0, 3.0, 4.0,
        0.0, 1.0, 0.0, 0.0,
        9.0, 0.0, 11.0, 12.0,
        13.0, 0.0, 15.0, 16.0,
    ]);
    assert_matrix_eq!(DMatrix::from(&matrix), expected);
    // The sparsity pattern is kept, with explicit zeros
    assert_eq!(matrix.nnz(), 16);

    #[rustfmt::skip]
    let expected_eliminated = DMatrix::from_row_slice(4, 4, &[
        0.0, 2.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 10.0, 0.0, 0.0,
        0.0, 14.0, 0.0, 0.0,
    ]);
    assert_matrix_eq!(DMatrix::from(&eliminated), expected_eliminated);
    assert_eq!(eliminated.nnz(), 3);
}

#[test]
fn missing_diagonal_leaves_matrix_untouched() {
    let dense = DMatrix::from_fn(3, 3, |i, j| if i == 1 && j == 1 { 0.0 } else { 1.0 + (i + j) as f64 });
    // Conversion from a dense matrix drops explicit zeros
    let mut matrix = CsrMatrix::from(&dense);
    let constraints = ConstraintList::try_new(vec![0, 1], Layout::host(3)).unwrap();

    let err = eliminate_rows_cols(&mut matrix, &constraints).unwrap_err();
    assert!(matches!(err, AssemblyError::MissingDiagonal { row: 1 }));
    assert_matrix_eq!(DMatrix::from(&matrix), dense);
}

#[test]
fn elimination_checks_constraint_size() {
    let mut matrix = dense_csr(3, |i, j| (i + j) as f64 + 1.0);
    let constraints = ConstraintList::try_new(vec![0], Layout::host(4)).unwrap();
    assert!(matches!(
        eliminate_rows_cols(&mut matrix, &constraints),
        Err(AssemblyError::ConstraintSizeMismatch {
            constraints: 4,
            system: 3
        })
    ));
}

#[test]
fn coo_builder_sums_duplicates_and_skips_zeros() {
    let mut coo = CooMatrix::new(3, 3);
    assert_eq!(SparseMatrixBuilder::<f64>::nrows(&coo), 3);
    coo.add_element_block(&[0, 1], &[0, 1], &[1.0, 2.0, 0.0, 3.0]);
    coo.add_element_block(&[1, 2], &[1, 2], &[4.0, 5.0, 6.0, 0.0]);
    assert_eq!(coo.nnz(), 6);

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        1.0, 2.0, 0.0,
        0.0, 7.0, 5.0,
        0.0, 6.0, 0.0,
    ]);
    assert_matrix_eq!(DMatrix::from(&CsrMatrix::from(&coo)), expected);
}

#[test]
fn eliminated_matrix_corrects_right_hand_side() {
    #[rustfmt::skip]
    let dense = DMatrix::from_row_slice(3, 3, &[
        2.0, -1.0, 0.0,
        -1.0, 2.0, -1.0,
        0.0, -1.0, 2.0,
    ]);
    let mut matrix = CsrMatrix::from(&dense);
    let constraints = ConstraintList::try_new(vec![0, 2], Layout::host(3)).unwrap();
    let eliminated = eliminate_rows_cols(&mut matrix, &constraints).unwrap();
    let system = EliminatedMatrix::new(matrix, eliminated, &constraints, Layout::host(3), Executor::default()).unwrap();

    let x = Buffer::from_slice(Layout::host(3), &[1.0, 50.0, 3.0]);
    let mut b = Buffer::from_slice(Layout::host(3), &[10.0, 20.0, 30.0]);
    system.eliminate_bc(&x, &mut b).unwrap();
    assert_eq!(b.to_vec(), vec![1.0, 24.0, 3.0]);

    let mut aliased = x.alias();
    assert!(matches!(
        system.eliminate_bc(&x, &mut aliased),
        Err(AssemblyError::AliasedBuffers)
    ));
}

#[test]
fn eliminated_matrix_checks_dimensions() {
    let matrix = dense_csr(3, |i, j| (i + j) as f64 + 1.0);
    let eliminated = CsrMatrix::zeros(2, 2);
    let constraints = ConstraintList::empty(Layout::host(3));
    assert!(matches!(
        EliminatedMatrix::new(matrix, eliminated, &constraints, Layout::host(3), Executor::default()),
        Err(AssemblyError::LayoutMismatch { .. })
    ));
}
