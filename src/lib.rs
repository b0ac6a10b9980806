//! Assembly of constrained bilinear forms.
//!
//! A [`BilinearForm`](form::BilinearForm) collects weak-form integrators over a finite element
//! space and turns them into a linear system with essential boundary conditions imposed by
//! algebraic elimination. The system is either kept matrix-free, as a
//! [`ConstrainedOperator`](constrained::ConstrainedOperator) wrapping the element-by-element
//! action of the form, or assembled into an explicit CSR matrix from dense element matrices.
//!
//! All vectors live in device-aware [`Buffer`](buffer::Buffer)s, and every data-parallel loop
//! goes through the [`Executor`](exec::Executor) configured by the [`Engine`](engine::Engine).

use nalgebra::RealField;

pub mod buffer;
pub mod constrained;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod exec;
pub mod form;
pub mod integrators;
pub mod operator;
pub mod space;
pub mod sparse;
pub mod system;

#[cfg(feature = "proptest-support")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use error::AssemblyError;

/// Scalar type used throughout assembly.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
