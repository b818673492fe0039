//! Import registry: the backend's only window into other modules.
//!
//! A lookup from `(module, symbol)` to metadata (return-type hint,
//! allocator requirement, fallibility, void-ness), plus the set of
//! known-skipped modules so `skipIf(module is None, …)` can be honored
//! statically. The registry covers the bundled runtime modules by
//! default; the driver may register more.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use zigpyler_hir::NativeType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMeta {
    pub return_type: NativeType,
    pub needs_allocator: bool,
    pub can_fail: bool,
    pub is_void: bool,
    /// Runtime symbol the call lowers to, e.g. `py.json.dumps`.
    pub runtime_name: String,
}

impl FunctionMeta {
    fn new(runtime_name: &str, return_type: NativeType) -> Self {
        let is_void = matches!(return_type, NativeType::None);
        Self {
            return_type,
            needs_allocator: false,
            can_fail: false,
            is_void,
            runtime_name: runtime_name.to_string(),
        }
    }

    fn allocating(mut self) -> Self {
        self.needs_allocator = true;
        self.can_fail = true;
        self
    }

    fn fallible(mut self) -> Self {
        self.can_fail = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMeta {
    /// Runtime namespace the module maps to, e.g. `py.json`.
    pub runtime_namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolMeta {
    Function(FunctionMeta),
    Module(ModuleMeta),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportRegistry {
    symbols: IndexMap<String, SymbolMeta>,
    /// Module names that resolve to `None` at the source level.
    skipped_modules: IndexSet<String>,
}

impl ImportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the bundled runtime modules.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for module in [
            "json", "datetime", "math", "os", "sys", "pathlib", "shutil", "glob", "io", "time",
            "collections", "unittest", "asyncio",
        ] {
            registry.register_module(module, &format!("py.{module}"));
        }

        let str_rt = NativeType::str_runtime;
        registry.register(
            "json",
            "dumps",
            FunctionMeta::new("py.json.dumps", str_rt()).allocating(),
        );
        registry.register(
            "json",
            "loads",
            FunctionMeta::new("py.json.loads", NativeType::PyValue).allocating(),
        );
        registry.register(
            "math",
            "sqrt",
            FunctionMeta::new("py.math.sqrt", NativeType::Float),
        );
        registry.register(
            "math",
            "floor",
            FunctionMeta::new("py.math.floor", NativeType::int()),
        );
        registry.register(
            "math",
            "ceil",
            FunctionMeta::new("py.math.ceil", NativeType::int()),
        );
        registry.register(
            "math",
            "pow",
            FunctionMeta::new("py.math.pow", NativeType::Float),
        );
        registry.register(
            "time",
            "time",
            FunctionMeta::new("py.time.time", NativeType::Float),
        );
        registry.register(
            "time",
            "sleep",
            FunctionMeta::new("py.time.sleep", NativeType::None),
        );
        registry.register(
            "datetime",
            "now",
            FunctionMeta::new("py.datetime.now", NativeType::ClassInstance("datetime".into())),
        );
        registry.register(
            "os",
            "getcwd",
            FunctionMeta::new("py.os.getcwd", str_rt()).allocating(),
        );
        registry.register(
            "sys",
            "exit",
            FunctionMeta::new("py.sys.exit", NativeType::None),
        );
        registry.register(
            "asyncio",
            "sleep",
            FunctionMeta::new("py.asyncio.sleep", NativeType::None).fallible(),
        );
        registry.register(
            "asyncio",
            "run",
            FunctionMeta::new("py.asyncio.run", NativeType::PyValue).fallible(),
        );
        registry.register(
            "asyncio",
            "gather",
            FunctionMeta::new("py.asyncio.gather", NativeType::list_of(NativeType::PyValue))
                .allocating(),
        );
        registry
    }

    pub fn register(&mut self, module: &str, symbol: &str, meta: FunctionMeta) {
        self.symbols
            .insert(format!("{module}.{symbol}"), SymbolMeta::Function(meta));
    }

    pub fn register_module(&mut self, module: &str, runtime_namespace: &str) {
        self.symbols.insert(
            module.to_string(),
            SymbolMeta::Module(ModuleMeta {
                runtime_namespace: runtime_namespace.to_string(),
            }),
        );
    }

    pub fn mark_skipped(&mut self, module: &str) {
        self.skipped_modules.insert(module.to_string());
    }

    pub fn is_skipped(&self, module: &str) -> bool {
        self.skipped_modules.contains(module)
    }

    pub fn lookup(&self, dotted: &str) -> Option<&SymbolMeta> {
        self.symbols.get(dotted)
    }

    pub fn function(&self, dotted: &str) -> Option<&FunctionMeta> {
        match self.symbols.get(dotted) {
            Some(SymbolMeta::Function(meta)) => Some(meta),
            _ => None,
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleMeta> {
        match self.symbols.get(name) {
            Some(SymbolMeta::Module(meta)) => Some(meta),
            _ => None,
        }
    }

    pub fn is_known_module(&self, name: &str) -> bool {
        matches!(self.symbols.get(name), Some(SymbolMeta::Module(_)))
    }

    /// Return-type hints in the shape the type inferrer consumes.
    pub fn return_hints(&self) -> IndexMap<String, NativeType> {
        self.symbols
            .iter()
            .filter_map(|(name, meta)| match meta {
                SymbolMeta::Function(f) => Some((name.clone(), f.return_type.clone())),
                SymbolMeta::Module(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_bundled_runtime() {
        let registry = ImportRegistry::with_defaults();
        assert!(registry.is_known_module("json"));
        let dumps = registry.function("json.dumps").unwrap();
        assert!(dumps.needs_allocator);
        assert_eq!(dumps.return_type, NativeType::str_runtime());
        assert_eq!(dumps.runtime_name, "py.json.dumps");
    }

    #[test]
    fn skipped_modules_are_tracked() {
        let mut registry = ImportRegistry::with_defaults();
        assert!(!registry.is_skipped("numpy"));
        registry.mark_skipped("numpy");
        assert!(registry.is_skipped("numpy"));
    }

    #[test]
    fn return_hints_only_include_functions() {
        let registry = ImportRegistry::with_defaults();
        let hints = registry.return_hints();
        assert!(hints.contains_key("math.sqrt"));
        assert!(!hints.contains_key("math"));
    }

    #[test]
    fn void_functions_are_marked() {
        let registry = ImportRegistry::with_defaults();
        assert!(registry.function("time.sleep").unwrap().is_void);
        assert!(!registry.function("time.time").unwrap().is_void);
    }
}
