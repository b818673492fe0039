//! # Zigpyler Analysis
//!
//! Whole-module analyses that run before any code is emitted:
//!
//! 1. [`type_flow`] — dataflow-propagated `NativeType`s for every
//!    variable, parameter, return value, class field and container
//!    element, with widening across assignments and call sites.
//! 2. [`usage`] — per-`(scope, name)` Boolean traits (declared, mutated,
//!    captured, used-as-callable, …) that every emit decision depends on.
//! 3. [`func_traits`] — per-function facts (needs-allocator,
//!    needs-error-union, generator, async, …) including the transitive
//!    closure over the call graph.
//!
//! The tables produced here are frozen before emission starts and
//! discarded once a module has been emitted.

pub mod func_traits;
pub mod type_flow;
pub mod usage;

pub use func_traits::{analyze_traits, FunctionTraits, TraitsTable};
pub use type_flow::{
    builtin_call_type, iteration_element, method_call_type, AnnotationConflict, ClassFieldTypes,
    ModuleTypes, TypeInferencer,
};
pub use usage::{NameUsage, UsageAnalyzer, UsageTable};
