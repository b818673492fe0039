//! # Zigpyler Core — Transpilation Backend
//!
//! The backend of the zigpyler Python-to-Zig AOT compiler: it consumes a
//! typed AST for one source module and emits a single Zig source file
//! that the Zig toolchain turns into a standalone executable.
//!
//! ## Example
//!
//! ```rust
//! use zigpyler_core::ZigpylerPipeline;
//!
//! let pipeline = ZigpylerPipeline::new();
//! let python = r#"
//! def fib(n):
//!     return n if n <= 1 else fib(n - 1) + fib(n - 2)
//!
//! print(fib(10))
//! "#;
//!
//! let zig = pipeline.transpile(python).unwrap();
//! assert!(zig.contains("fn fib("));
//! assert!(zig.contains("pub fn main() !void"));
//! ```
//!
//! ## Architecture
//!
//! 1. **Bridge** ([`ast_bridge`]) — Python AST to HIR
//! 2. **Type inference** (`zigpyler_analysis::type_flow`) — widened
//!    `NativeType`s for every binding, return and call site
//! 3. **Usage analysis** (`zigpyler_analysis::usage`) — the per-name
//!    Boolean traits every emit decision reads
//! 4. **Function traits** (`zigpyler_analysis::func_traits`) — allocator
//!    and error-union needs with call-graph propagation
//! 5. **Class registry** ([`class_registry`]) — method tables, base
//!    chains, capture plans
//! 6. **Emission** ([`zig_gen`]) — signatures and statements streamed
//!    into the output buffer

pub mod ast_bridge;
pub mod class_registry;
pub mod error;
pub mod import_registry;
pub mod zig_gen;

use anyhow::Result;
use tracing::{debug, info_span};
use zigpyler_analysis::{analyze_traits, TypeInferencer, UsageAnalyzer};
use zigpyler_hir::HirModule;

pub use ast_bridge::AstBridge;
pub use class_registry::{build_registry, ClassInfo, ClassRegistry};
pub use error::{ErrorKind, SourceLocation, TranspileError, TranspileResult};
pub use import_registry::{FunctionMeta, ImportRegistry, ModuleMeta, SymbolMeta};

/// The transpilation pipeline: parse → bridge → analyze → emit.
///
/// The pipeline owns the import registry (the backend's only window into
/// other modules); all other state lives for exactly one
/// [`transpile`](Self::transpile) call and is discarded afterwards.
pub struct ZigpylerPipeline {
    registry: ImportRegistry,
}

impl Default for ZigpylerPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ZigpylerPipeline {
    /// Pipeline with the bundled runtime modules registered.
    pub fn new() -> Self {
        Self {
            registry: ImportRegistry::with_defaults(),
        }
    }

    pub fn with_registry(registry: ImportRegistry) -> Self {
        Self { registry }
    }

    pub fn registry_mut(&mut self) -> &mut ImportRegistry {
        &mut self.registry
    }

    /// Transpile Python source text to Zig source text.
    pub fn transpile(&self, source: &str) -> Result<String> {
        let module = {
            let _span = info_span!("parse").entered();
            AstBridge::new().parse_module(source)?
        };
        self.transpile_module(&module)
    }

    /// Run the backend on an already-bridged module.
    pub fn transpile_module(&self, module: &HirModule) -> Result<String> {
        let types = {
            let _span = info_span!("infer").entered();
            TypeInferencer::new()
                .with_external_returns(self.registry.return_hints())
                .infer_module(module)?
        };
        let usage = {
            let _span = info_span!("usage").entered();
            UsageAnalyzer::analyze(module)
        };
        let traits = {
            let _span = info_span!("traits").entered();
            analyze_traits(module, &types)
        };
        let classes = {
            let _span = info_span!("registry").entered();
            build_registry(module, &types, &traits)?
        };
        let output = {
            let _span = info_span!("emit").entered();
            zig_gen::emit_module(module, &types, &usage, &traits, &classes, &self.registry)?
        };
        debug!(bytes = output.len(), "emitted module");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_produces_a_compilable_shape() {
        let pipeline = ZigpylerPipeline::new();
        let output = pipeline.transpile("x = 1\n").unwrap();
        assert!(output.contains("const std = @import(\"std\");"));
        assert!(output.contains("const py = @import(\"runtime.zig\");"));
        assert!(output.contains("pub fn main() !void"));
        assert!(output.contains("const x = 1;"));
    }

    #[test]
    fn parse_errors_are_reported() {
        let pipeline = ZigpylerPipeline::new();
        assert!(pipeline.transpile("def broken(:\n").is_err());
    }
}
