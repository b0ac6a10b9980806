//! Strategies for property-based testing of constrained assembly.
use crate::buffer::Layout;
use crate::constraints::ConstraintList;
use ::proptest::prelude::*;

/// Constraint lists over host vectors with up to `max_size` entries.
///
/// Constrained indices are listed in arbitrary order.
pub fn constraint_list(max_size: usize) -> impl Strategy<Value = ConstraintList> {
    (0..=max_size).prop_flat_map(constraint_list_with_size)
}

/// Constraint lists over host vectors with exactly `size` entries.
pub fn constraint_list_with_size(size: usize) -> impl Strategy<Value = ConstraintList> {
    prop::collection::vec(any::<bool>(), size)
        .prop_flat_map(|membership| {
            let indices: Vec<_> = membership
                .iter()
                .enumerate()
                .filter_map(|(i, &constrained)| constrained.then_some(i))
                .collect();
            Just(indices).prop_shuffle()
        })
        .prop_filter_map("indices must be valid constraints", move |indices| {
            ConstraintList::try_new(indices, Layout::host(size)).ok()
        })
}

/// A constraint list together with a vector of matching size.
pub fn constrained_vector(max_size: usize) -> impl Strategy<Value = (ConstraintList, Vec<f64>)> {
    (0..=max_size).prop_flat_map(|size| {
        // Keep values moderate so that sums and products stay well conditioned
        let values = prop::collection::vec(-10.0..10.0, size);
        (constraint_list_with_size(size), values)
    })
}
