//! Scope-qualified type table.
//!
//! Scopes are identified by slash-separated paths: `""` is module scope,
//! `"fib"` a function, `"Point/norm"` a method, `"outer/inner"` a nested
//! function. Lookup walks outward by trimming path segments; a write at
//! an inner scope shadows outer bindings only while that scope is live.

use crate::types::{widen, NativeType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeTable {
    scopes: IndexMap<String, IndexMap<String, NativeType>>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name: ty` at `scope`, widening with any existing entry.
    /// Returns true when the stored type changed (the fixpoint driver
    /// keys off this).
    pub fn record(&mut self, scope: &str, name: &str, ty: NativeType) -> bool {
        let entry = self
            .scopes
            .entry(scope.to_string())
            .or_default()
            .entry(name.to_string());
        match entry {
            indexmap::map::Entry::Occupied(mut slot) => {
                let widened = widen(slot.get(), &ty);
                if *slot.get() == widened {
                    false
                } else {
                    slot.insert(widened);
                    true
                }
            }
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(ty);
                true
            }
        }
    }

    /// Overwrite `name: ty` at `scope` without widening.
    pub fn set(&mut self, scope: &str, name: &str, ty: NativeType) {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string(), ty);
    }

    /// Exact lookup in one scope, no outward walk.
    pub fn get_local(&self, scope: &str, name: &str) -> Option<&NativeType> {
        self.scopes.get(scope).and_then(|s| s.get(name))
    }

    /// Lookup walking outward from `scope` to module scope.
    pub fn lookup(&self, scope: &str, name: &str) -> Option<&NativeType> {
        let mut current = scope;
        loop {
            if let Some(ty) = self.get_local(current, name) {
                return Some(ty);
            }
            match parent_scope(current) {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }

    /// All names bound directly in `scope`, in insertion order.
    pub fn names_in(&self, scope: &str) -> Vec<&str> {
        self.scopes
            .get(scope)
            .map(|s| s.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn iter_scope(
        &self,
        scope: &str,
    ) -> impl Iterator<Item = (&String, &NativeType)> {
        self.scopes.get(scope).into_iter().flat_map(|s| s.iter())
    }
}

/// Parent of a scope path; `None` once module scope is reached.
pub fn parent_scope(scope: &str) -> Option<&str> {
    if scope.is_empty() {
        return None;
    }
    Some(match scope.rfind('/') {
        Some(idx) => &scope[..idx],
        None => "",
    })
}

/// Join a child scope name onto a path.
pub fn child_scope(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntKind;

    #[test]
    fn lookup_walks_outward() {
        let mut table = ScopeTable::new();
        table.record("", "x", NativeType::int());
        table.record("f", "y", NativeType::Float);

        assert_eq!(table.lookup("f", "x"), Some(&NativeType::int()));
        assert_eq!(table.lookup("f", "y"), Some(&NativeType::Float));
        assert_eq!(table.lookup("", "y"), None);
    }

    #[test]
    fn inner_write_shadows_outer() {
        let mut table = ScopeTable::new();
        table.record("", "x", NativeType::int());
        table.record("f/g", "x", NativeType::str_runtime());

        assert_eq!(table.lookup("f/g", "x"), Some(&NativeType::str_runtime()));
        assert_eq!(table.lookup("f", "x"), Some(&NativeType::int()));
    }

    #[test]
    fn record_widens_and_reports_change() {
        let mut table = ScopeTable::new();
        assert!(table.record("f", "x", NativeType::int()));
        // Same type again: no change.
        assert!(!table.record("f", "x", NativeType::int()));
        // A float observation widens the binding.
        assert!(table.record("f", "x", NativeType::Float));
        assert_eq!(table.get_local("f", "x"), Some(&NativeType::Float));
        // Unbounded int vs float erases.
        assert!(table.record("f", "x", NativeType::Int(IntKind::Unbounded)));
        assert_eq!(table.get_local("f", "x"), Some(&NativeType::PyValue));
    }

    #[test]
    fn scope_path_helpers() {
        assert_eq!(child_scope("", "f"), "f");
        assert_eq!(child_scope("C", "m"), "C/m");
        assert_eq!(parent_scope("C/m"), Some("C"));
        assert_eq!(parent_scope("f"), Some(""));
        assert_eq!(parent_scope(""), None);
    }
}
