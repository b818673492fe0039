//! Code generation state: the frozen analysis tables, the rename map,
//! scope-aware declaration tracking, and the indented output writer.

use indexmap::{IndexMap, IndexSet};
use zigpyler_analysis::{ModuleTypes, TraitsTable, UsageTable};
use zigpyler_hir::HirModule;

use crate::class_registry::ClassRegistry;
use crate::import_registry::ImportRegistry;

use super::keywords;

/// Append-only output buffer with indentation tracking.
#[derive(Debug, Default)]
pub struct ZigWriter {
    buf: String,
    indent: usize,
}

impl ZigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    /// Write `head {` and indent.
    pub fn open(&mut self, head: &str) {
        self.line(&format!("{head} {{"));
        self.indent += 1;
    }

    pub fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }

    /// Close a block that is itself an expression or declaration.
    pub fn close_with(&mut self, suffix: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(&format!("}}{suffix}"));
    }

    /// Continue a block chain: `} else {`, `} else if (…) {`.
    pub fn chain(&mut self, text: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(&format!("}} {text} {{"));
        self.indent += 1;
    }

    /// Open an anonymous block.
    pub fn open_block(&mut self) {
        self.line("{");
        self.indent += 1;
    }

    pub fn finish(self) -> String {
        self.buf
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}

/// Tracks declared names across nested emission scopes so assignments
/// pick `const`/`var` declaration vs plain re-assignment, and so inner
/// declarations that would shadow an outer one get renamed.
#[derive(Debug, Clone, Default)]
pub struct ScopeTracker {
    declared: Vec<IndexSet<String>>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self {
            declared: vec![IndexSet::new()],
        }
    }

    pub fn enter(&mut self) {
        self.declared.push(IndexSet::new());
    }

    pub fn exit(&mut self) {
        if self.declared.len() > 1 {
            self.declared.pop();
        }
    }

    pub fn declare(&mut self, name: &str) {
        if let Some(top) = self.declared.last_mut() {
            top.insert(name.to_string());
        }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.iter().any(|s| s.contains(name))
    }

    pub fn is_declared_in_outer(&self, name: &str) -> bool {
        self.declared
            .iter()
            .rev()
            .skip(1)
            .any(|s| s.contains(name))
    }
}

/// One-shot source-name → target-name map. Once a name is renamed, the
/// original never reappears in that scope; collisions resolve with a
/// monotonically increasing disambiguator.
#[derive(Debug, Clone, Default)]
pub struct RenameMap {
    map: IndexMap<(String, String), String>,
    taken: IndexSet<String>,
    counter: u32,
}

impl RenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The target identifier for `name` in `scope`, allocating a rename
    /// on first use if one is required.
    pub fn target(&mut self, scope: &str, name: &str, must_rename: bool) -> String {
        let key = (scope.to_string(), name.to_string());
        if let Some(existing) = self.map.get(&key) {
            return existing.clone();
        }
        let needs_rename = must_rename || keywords::is_reserved(name);
        let target = if needs_rename {
            loop {
                self.counter += 1;
                let candidate = format!("{name}__{}", self.counter);
                if !self.taken.contains(&candidate) {
                    break candidate;
                }
            }
        } else {
            name.to_string()
        };
        self.taken.insert(target.clone());
        self.map.insert(key, target.clone());
        target
    }

    pub fn existing(&self, scope: &str, name: &str) -> Option<&String> {
        self.map.get(&(scope.to_string(), name.to_string()))
    }
}

/// Routing information for error propagation inside a `try` body: the
/// propagation operator is replaced by a catch that parks the error and
/// breaks to the handler dispatch.
#[derive(Debug, Clone)]
pub struct CatchCtx {
    pub label: String,
    pub exc_var: String,
}

/// The backend instance for one module. All tables are frozen before
/// emission; the writer is append-only.
pub struct ZigBackend<'a> {
    pub types: &'a ModuleTypes,
    pub usage: &'a UsageTable,
    pub traits: &'a TraitsTable,
    pub classes: &'a ClassRegistry,
    pub imports: &'a ImportRegistry,
    pub module: &'a HirModule,

    pub out: ZigWriter,
    pub renames: RenameMap,
    pub declared: ScopeTracker,
    /// Warning lines surfaced as a comment block at the top of the
    /// generated file.
    pub warnings: Vec<String>,

    pub scope: String,
    pub current_class: Option<String>,
    pub current_fn_has_error_union: bool,
    pub current_fn_has_alloc: bool,
    pub catch_ctx: Option<CatchCtx>,
    /// Chosen once per module: state-machine async when any async
    /// function performs real I/O.
    pub async_state_machine: bool,

    pub temp_counter: u32,
    pub label_counter: u32,
    pub closure_counter: u32,

    /// Module-level names emitted as file-scope bindings.
    pub file_scope_names: IndexSet<String>,
    /// Names declared `global` in the function currently being emitted.
    pub global_decls: IndexSet<String>,
    /// Import aliases visible at module level: alias → dotted original.
    pub import_aliases: IndexMap<String, String>,
    /// Active textual substitutions (closure captures, inherited-method
    /// self rewrites), innermost last.
    pub name_subst: Vec<(String, String)>,
    /// Generator lowering: yields append into this accumulator.
    pub in_generator: bool,
    pub yield_acc: String,
    /// `for`/`while` `else` lowering: completion flag the innermost
    /// loop's `break` must clear.
    pub loop_else_flag: Option<String>,
    /// Error binding of the innermost `except` handler, for re-raise.
    pub current_handler_err: Option<String>,
}

impl<'a> ZigBackend<'a> {
    pub fn new(
        module: &'a HirModule,
        types: &'a ModuleTypes,
        usage: &'a UsageTable,
        traits: &'a TraitsTable,
        classes: &'a ClassRegistry,
        imports: &'a ImportRegistry,
    ) -> Self {
        let mut import_aliases = IndexMap::new();
        for import in &module.imports {
            match &import.alias {
                Some(alias) => {
                    import_aliases.insert(alias.clone(), import.module.clone());
                }
                None => {
                    import_aliases.insert(import.module.clone(), import.module.clone());
                }
            }
            for item in &import.items {
                match item {
                    zigpyler_hir::ImportItem::Named(n) => {
                        import_aliases.insert(n.clone(), format!("{}.{}", import.module, n));
                    }
                    zigpyler_hir::ImportItem::Aliased { name, alias } => {
                        import_aliases
                            .insert(alias.clone(), format!("{}.{}", import.module, name));
                    }
                }
            }
        }

        Self {
            types,
            usage,
            traits,
            classes,
            imports,
            module,
            out: ZigWriter::new(),
            renames: RenameMap::new(),
            declared: ScopeTracker::new(),
            warnings: Vec::new(),
            scope: String::new(),
            current_class: None,
            current_fn_has_error_union: true,
            current_fn_has_alloc: true,
            catch_ctx: None,
            async_state_machine: traits.any_async_does_io(),
            temp_counter: 0,
            label_counter: 0,
            closure_counter: 0,
            file_scope_names: IndexSet::new(),
            global_decls: IndexSet::new(),
            import_aliases,
            name_subst: Vec::new(),
            in_generator: false,
            yield_acc: String::new(),
            loop_else_flag: None,
            current_handler_err: None,
        }
    }

    pub fn fresh_temp(&mut self, stem: &str) -> String {
        let id = self.temp_counter;
        self.temp_counter += 1;
        format!("__{stem}_{id}")
    }

    pub fn fresh_label(&mut self) -> String {
        let id = self.label_counter;
        self.label_counter += 1;
        format!("blk{id}")
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Resolve the emitted identifier for a source name in the current
    /// scope, applying keyword escaping and shadow renames.
    pub fn ident(&mut self, name: &str) -> String {
        if let Some(existing) = self.renames.existing(&self.scope, name) {
            return existing.clone();
        }
        let usage = self.usage.usage(&self.scope, name);
        let shadows = !self.scope.is_empty()
            && (usage.shadows_module_func
                || usage.shadows_import
                || usage.shadows_class_method
                || (usage.declared && self.declared.is_declared_in_outer(name)));
        let scope = self.scope.clone();
        self.renames.target(&scope, name, shadows)
    }

    /// Identifier lookup for reads: falls back through enclosing scopes'
    /// rename decisions so a read inside a nested block sees the rename
    /// chosen at the declaration site.
    pub fn read_ident(&mut self, name: &str) -> String {
        let mut scope = self.scope.clone();
        loop {
            if let Some(existing) = self.renames.existing(&scope, name) {
                return existing.clone();
            }
            match zigpyler_hir::scope::parent_scope(&scope) {
                Some(parent) => scope = parent.to_string(),
                None => break,
            }
        }
        if keywords::is_reserved(name) {
            let scope = self.scope.clone();
            return self.renames.target(&scope, name, true);
        }
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_indents_blocks() {
        let mut w = ZigWriter::new();
        w.open("pub fn main() !void");
        w.line("return;");
        w.close();
        assert_eq!(w.as_str(), "pub fn main() !void {\n    return;\n}\n");
    }

    #[test]
    fn writer_close_with_suffix() {
        let mut w = ZigWriter::new();
        w.open("const S = struct");
        w.line("x: i64,");
        w.close_with(";");
        assert!(w.as_str().ends_with("};\n"));
    }

    #[test]
    fn scope_tracker_shadow_queries() {
        let mut tracker = ScopeTracker::new();
        tracker.declare("x");
        tracker.enter();
        assert!(tracker.is_declared("x"));
        assert!(tracker.is_declared_in_outer("x"));
        tracker.declare("y");
        assert!(!tracker.is_declared_in_outer("y"));
        tracker.exit();
        assert!(!tracker.is_declared("y"));
    }

    #[test]
    fn rename_map_is_one_shot_and_monotonic() {
        let mut renames = RenameMap::new();
        let first = renames.target("f", "error", false);
        assert_eq!(first, "error__1");
        // Same key resolves to the same target forever.
        assert_eq!(renames.target("f", "error", true), "error__1");
        // A different scope gets a fresh disambiguator.
        let second = renames.target("g", "error", false);
        assert_eq!(second, "error__2");
    }

    #[test]
    fn rename_map_passes_through_clean_names() {
        let mut renames = RenameMap::new();
        assert_eq!(renames.target("f", "total", false), "total");
    }
}
