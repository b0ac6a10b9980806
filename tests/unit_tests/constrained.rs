use crate::dense_from_operator;
use fenris_assembly::buffer::{Buffer, Layout};
use fenris_assembly::constrained::ConstrainedOperator;
use fenris_assembly::constraints::ConstraintList;
use fenris_assembly::exec::Executor;
use fenris_assembly::nalgebra::{DMatrix, DVector};
use fenris_assembly::operator::LinearOperator;
use fenris_assembly::proptest::constrained_vector;
use fenris_assembly::AssemblyError;
use fenris_paradis::IndexSetError;
use matrixcompare::assert_matrix_eq;
use proptest::collection::vec;
use proptest::prelude::*;

fn constrained<'a>(a: &'a DMatrix<f64>, constraints: &'a ConstraintList) -> ConstrainedOperator<'a, f64> {
    ConstrainedOperator::new(a as &dyn LinearOperator<f64>, constraints, Executor::default()).unwrap()
}

#[test]
fn scaled_identity_example() {
    let a = DMatrix::identity(5, 5) * 2.0;
    let constraints = ConstraintList::try_new(vec![0, 2], Layout::host(5)).unwrap();
    let operator = constrained(&a, &constraints);
    assert!(!operator.owns_operator());

    let x = Buffer::from_slice(Layout::host(5), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    let mut y = Buffer::zeros(Layout::host(5));
    operator.apply(&mut y, &x).unwrap();
    assert_eq!(y.to_vec(), vec![1.0, 4.0, 3.0, 8.0, 10.0]);
}

#[test]
fn empty_constraints_pass_through() {
    let a = DMatrix::from_fn(3, 3, |i, j| (i * 3 + j) as f64 - 4.0);
    let constraints = ConstraintList::empty(Layout::host(3));
    let operator = constrained(&a, &constraints);

    let x = Buffer::from_slice(Layout::host(3), &[1.0, -2.0, 0.5]);
    let mut y = Buffer::zeros(Layout::host(3));
    operator.apply(&mut y, &x).unwrap();
    let expected = &a * DVector::from_column_slice(&[1.0, -2.0, 0.5]);
    assert_eq!(y.to_vec(), expected.as_slice().to_vec());

    let mut b = Buffer::from_slice(Layout::host(3), &[1.0, 1.0, 1.0]);
    operator.eliminate_rhs(&x, &mut b).unwrap();
    assert_eq!(b.to_vec(), vec![1.0, 1.0, 1.0]);
}

#[test]
fn constraints_are_validated() {
    let err = ConstraintList::try_new(vec![1, 3, 1], Layout::host(4)).unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::InvalidConstraints(IndexSetError::Duplicate { index: 1 })
    ));

    let err = ConstraintList::try_new(vec![4], Layout::host(4)).unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::InvalidConstraints(IndexSetError::OutOfBounds { index: 4, bound: 4 })
    ));
}

#[test]
fn wrapper_rejects_invalid_arguments() {
    let a = DMatrix::identity(3, 3);
    let constraints = ConstraintList::try_new(vec![0], Layout::host(4)).unwrap();
    let err = ConstrainedOperator::new(&a as &dyn LinearOperator<f64>, &constraints, Executor::default()).unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::ConstraintSizeMismatch {
            constraints: 4,
            system: 3
        }
    ));

    let rectangular = DMatrix::zeros(3, 2);
    let constraints = ConstraintList::empty(Layout::host(3));
    let err = ConstrainedOperator::new(&rectangular as &dyn LinearOperator<f64>, &constraints, Executor::default())
        .unwrap_err();
    assert!(matches!(err, AssemblyError::LayoutMismatch { .. }));
}

#[test]
fn aliased_input_and_output_are_rejected() {
    let a = DMatrix::identity(3, 3);
    let constraints = ConstraintList::try_new(vec![1], Layout::host(3)).unwrap();
    let operator = constrained(&a, &constraints);

    let x = Buffer::from_slice(Layout::host(3), &[1.0, 2.0, 3.0]);
    let mut y = x.alias();
    assert!(matches!(operator.apply(&mut y, &x), Err(AssemblyError::AliasedBuffers)));
    assert!(matches!(
        operator.eliminate_rhs(&x, &mut y),
        Err(AssemblyError::AliasedBuffers)
    ));
    assert_eq!(x.to_vec(), vec![1.0, 2.0, 3.0]);

    let mut short = Buffer::zeros(Layout::host(2));
    assert!(matches!(
        operator.apply(&mut short, &x),
        Err(AssemblyError::LayoutMismatch { .. })
    ));
}

#[test]
fn owned_operator_is_owned() {
    let a: Box<dyn LinearOperator<f64>> = Box::new(DMatrix::identity(2, 2));
    let constraints = ConstraintList::try_new(vec![1], Layout::host(2)).unwrap();
    let operator = ConstrainedOperator::new(a, &constraints, Executor::default()).unwrap();
    assert!(operator.owns_operator());
    assert_eq!(operator.in_layout(), Layout::host(2));
}

#[test]
fn transpose_and_diagonal() {
    #[rustfmt::skip]
    let a = DMatrix::from_row_slice(3, 3, &[
        2.0, 1.0, 0.0,
        3.0, 4.0, 5.0,
        0.0, 6.0, 7.0,
    ]);
    let constraints = ConstraintList::try_new(vec![1], Layout::host(3)).unwrap();
    let operator = constrained(&a, &constraints);

    let x = Buffer::from_slice(Layout::host(3), &[1.0, 10.0, 100.0]);
    let mut y = Buffer::zeros(Layout::host(3));
    operator.apply_transpose(&mut y, &x).unwrap();
    // A^T applied to [1, 0, 100], with the constrained entry copied from x
    assert_eq!(y.to_vec(), vec![2.0, 10.0, 700.0]);

    let mut diagonal = Buffer::zeros(Layout::host(3));
    operator.assemble_diagonal(&mut diagonal).unwrap();
    assert_eq!(diagonal.to_vec(), vec![2.0, 1.0, 7.0]);
}

#[test]
fn eliminate_rhs_example() {
    #[rustfmt::skip]
    let a = DMatrix::from_row_slice(3, 3, &[
        2.0, -1.0, 0.0,
        -1.0, 2.0, -1.0,
        0.0, -1.0, 2.0,
    ]);
    let constraints = ConstraintList::try_new(vec![0, 2], Layout::host(3)).unwrap();
    let operator = constrained(&a, &constraints);

    let x = Buffer::from_slice(Layout::host(3), &[1.0, 50.0, 3.0]);
    let mut b = Buffer::from_slice(Layout::host(3), &[10.0, 20.0, 30.0]);
    operator.eliminate_rhs(&x, &mut b).unwrap();
    // A [1, 0, 3] = [2, -4, 6]
    assert_eq!(b.to_vec(), vec![1.0, 24.0, 3.0]);
}

fn system_strategy() -> impl Strategy<Value = (ConstraintList, Vec<f64>, Vec<f64>, Vec<f64>)> {
    constrained_vector(8).prop_flat_map(|(constraints, x)| {
        let n = x.len();
        (Just(constraints), Just(x), vec(-10.0..10.0, n * n), vec(-10.0..10.0, n))
    })
}

proptest! {
    #[test]
    fn constrained_entries_are_copied_exactly((constraints, x, a, _) in system_strategy()) {
        let n = x.len();
        let a = DMatrix::from_row_slice(n, n, &a);
        let operator = constrained(&a, &constraints);

        let x_buffer = Buffer::from_slice(Layout::host(n), &x);
        let mut y = Buffer::zeros(Layout::host(n));
        operator.apply(&mut y, &x_buffer).unwrap();
        let y = y.to_vec();

        let membership = constraints.membership();
        let z = DVector::from_iterator(n, x.iter().zip(&membership).map(|(&x_i, &c)| if c { 0.0 } else { x_i }));
        let az = &a * z;
        for i in 0..n {
            if membership[i] {
                prop_assert_eq!(y[i], x[i]);
            } else {
                prop_assert!((y[i] - az[i]).abs() <= 1e-9 * (1.0 + az[i].abs()));
            }
        }
    }

    #[test]
    fn eliminated_system_reproduces_free_equations((constraints, x, a, b) in system_strategy()) {
        let n = x.len();
        prop_assume!(n > 0);
        // Diagonal dominance keeps every principal submatrix invertible
        let a = DMatrix::from_row_slice(n, n, &a) + DMatrix::identity(n, n) * (100.0 * n as f64);
        let operator = constrained(&a, &constraints);

        let x_buffer = Buffer::from_slice(Layout::host(n), &x);
        let mut b_buffer = Buffer::from_slice(Layout::host(n), &b);
        operator.eliminate_rhs(&x_buffer, &mut b_buffer).unwrap();

        let dense = dense_from_operator(&operator);
        let rhs = DVector::from_vec(b_buffer.to_vec());
        let u = dense.lu().solve(&rhs).unwrap();

        let membership = constraints.membership();
        let au = &a * &u;
        for i in 0..n {
            if membership[i] {
                prop_assert!((u[i] - x[i]).abs() <= 1e-9);
            } else {
                prop_assert!((au[i] - b[i]).abs() <= 1e-9 * (1.0 + b[i].abs()));
            }
        }
    }

    #[test]
    fn dense_constrained_operator_has_identity_blocks((constraints, x, a, _) in system_strategy()) {
        let n = x.len();
        let a = DMatrix::from_row_slice(n, n, &a);
        let operator = constrained(&a, &constraints);
        let dense = dense_from_operator(&operator);

        let membership = constraints.membership();
        let expected = DMatrix::from_fn(n, n, |i, j| {
            if membership[i] || membership[j] {
                if i == j { 1.0 } else { 0.0 }
            } else {
                a[(i, j)]
            }
        });
        assert_matrix_eq!(dense, expected, comp = abs, tol = 1e-12);
    }
}
