//! # Zigpyler HIR
//!
//! The high-level intermediate representation consumed by the zigpyler
//! backend, together with the `NativeType` lattice the type inferrer
//! computes over and the scope table that maps `(scope, name)` pairs to
//! inferred types.
//!
//! This crate is deliberately free of I/O and code generation: it only
//! defines data. The bridge from `rustpython-ast` lives in
//! `zigpyler-core`; inference over these shapes lives in
//! `zigpyler-analysis`.

pub mod hir;
pub mod scope;
pub mod types;

pub use hir::*;
pub use scope::ScopeTable;
pub use types::{widen, FunctionSig, IntKind, NativeType, StrKind};
