//! Error type shared by all assembly operations.
use crate::buffer::Layout;
use crate::integrators::{AssemblyVariant, WeakFormKind};
use crate::system::SystemKind;
use fenris_paradis::IndexSetError;
use thiserror::Error;

/// Errors reported by assembly, system formation and operator application.
///
/// Every operation validates its inputs before it mutates any state, so an error never leaves
/// a form or a caller-provided buffer partially updated.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no integrator is registered for weak form `{kind}`")]
    UnknownIntegrator { kind: WeakFormKind },
    #[error("weak form `{kind}` has no integrator for the {variant:?} assembly variant")]
    UnsupportedVariant {
        kind: WeakFormKind,
        variant: AssemblyVariant,
    },
    #[error("system representation {kind:?} is not available")]
    UnsupportedRepresentation { kind: SystemKind },
    #[error("{operator} cannot be applied transposed")]
    TransposeUnsupported { operator: &'static str },
    #[error("{operator} cannot assemble its diagonal")]
    DiagonalUnsupported { operator: &'static str },
    #[error("integrator for weak form `{kind}` does not compute element matrices")]
    MissingElementMatrices { kind: WeakFormKind },
    #[error("mixed trial and test spaces are not supported by the matrix-free path")]
    MixedSpaces,
    #[error("trial and test spaces are incompatible: {reason}")]
    IncompatibleSpaces { reason: String },
    #[error("integrators cannot be added to a form that has already been assembled")]
    AlreadyAssembled,
    #[error("the form must be assembled first")]
    NotAssembled,
    #[error("invalid constraint list")]
    InvalidConstraints(#[from] IndexSetError),
    #[error("layout mismatch: expected {expected:?}, got {actual:?}")]
    LayoutMismatch { expected: Layout, actual: Layout },
    #[error("input and output buffers share storage")]
    AliasedBuffers,
    #[error("constraints are defined over {constraints} dofs, but the system has {system} dofs")]
    ConstraintSizeMismatch { constraints: usize, system: usize },
    #[error("constrained row {row} has no diagonal entry in the sparsity pattern")]
    MissingDiagonal { row: usize },
    #[error("collaborator failed: {0:#}")]
    Kernel(eyre::Report),
}

impl From<eyre::Report> for AssemblyError {
    fn from(report: eyre::Report) -> Self {
        Self::Kernel(report)
    }
}
