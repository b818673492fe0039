//! `NativeType` → Zig type text.

use zigpyler_hir::{IntKind, NativeType};

use super::context::ZigBackend;

/// Canonical target-type mapping, without class-registry pointer
/// adjustment.
pub fn zig_type_plain(ty: &NativeType) -> String {
    match ty {
        // Unrefined bindings default to 64-bit signed integers.
        NativeType::Unknown => "i64".to_string(),
        NativeType::Int(IntKind::Bounded) => "i64".to_string(),
        NativeType::Int(IntKind::Unbounded) | NativeType::BigInt => "py.BigInt".to_string(),
        NativeType::Float => "f64".to_string(),
        NativeType::Bool => "bool".to_string(),
        NativeType::None => "void".to_string(),
        NativeType::Str(_) => "[]const u8".to_string(),
        NativeType::Bytes => "[]const u8".to_string(),
        NativeType::List(elem) => format!("std.ArrayList({})", zig_type_plain(&elem.refined())),
        NativeType::Array(elem, Some(n)) => format!("[{n}]{}", zig_type_plain(&elem.refined())),
        NativeType::Array(elem, None) => format!("[]{}", zig_type_plain(&elem.refined())),
        NativeType::Tuple(elems) => {
            let inner: Vec<String> = elems
                .iter()
                .map(|e| zig_type_plain(&e.refined()))
                .collect();
            format!("std.meta.Tuple(&.{{ {} }})", inner.join(", "))
        }
        NativeType::Set(elem) => format!("py.Set({})", zig_type_plain(&elem.refined())),
        NativeType::Dict(key, value) => {
            if key.is_string() || key.is_unknown() {
                format!("std.StringHashMap({})", zig_type_plain(&value.refined()))
            } else {
                format!(
                    "std.AutoHashMap({}, {})",
                    zig_type_plain(&key.refined()),
                    zig_type_plain(&value.refined())
                )
            }
        }
        NativeType::Counter => "py.Counter".to_string(),
        NativeType::DefaultDict(key, value) => format!(
            "py.DefaultDict({}, {})",
            zig_type_plain(&key.refined()),
            zig_type_plain(&value.refined())
        ),
        NativeType::Deque(elem) => format!("py.Deque({})", zig_type_plain(&elem.refined())),
        NativeType::Optional(inner) => format!("?{}", zig_type_plain(&inner.refined())),
        NativeType::ClassInstance(name) => name.clone(),
        NativeType::Closure(id) => format!("__Closure_{id}"),
        NativeType::Function(_) | NativeType::Callable | NativeType::PyValue => {
            "py.PyValue".to_string()
        }
    }
}

impl ZigBackend<'_> {
    /// Type text with nested-class pointer adjustment: instances of
    /// classes defined inside functions are heap pointers.
    pub(crate) fn zig_type(&self, ty: &NativeType) -> String {
        match ty {
            NativeType::ClassInstance(name) => {
                if self.classes.get(name).is_some_and(|c| c.is_nested) {
                    format!("*{name}")
                } else {
                    name.clone()
                }
            }
            NativeType::List(elem) => {
                format!("std.ArrayList({})", self.zig_type(&elem.refined()))
            }
            NativeType::Optional(inner) => format!("?{}", self.zig_type(&inner.refined())),
            other => zig_type_plain(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_mappings() {
        assert_eq!(zig_type_plain(&NativeType::int()), "i64");
        assert_eq!(zig_type_plain(&NativeType::Unknown), "i64");
        assert_eq!(zig_type_plain(&NativeType::Float), "f64");
        assert_eq!(zig_type_plain(&NativeType::str_literal()), "[]const u8");
        assert_eq!(zig_type_plain(&NativeType::None), "void");
        assert_eq!(zig_type_plain(&NativeType::BigInt), "py.BigInt");
    }

    #[test]
    fn container_mappings() {
        assert_eq!(
            zig_type_plain(&NativeType::list_of(NativeType::int())),
            "std.ArrayList(i64)"
        );
        assert_eq!(
            zig_type_plain(&NativeType::dict_of(
                NativeType::str_runtime(),
                NativeType::int()
            )),
            "std.StringHashMap(i64)"
        );
        assert_eq!(
            zig_type_plain(&NativeType::dict_of(NativeType::int(), NativeType::Float)),
            "std.AutoHashMap(i64, f64)"
        );
        assert_eq!(
            zig_type_plain(&NativeType::Tuple(vec![
                NativeType::int(),
                NativeType::str_runtime()
            ])),
            "std.meta.Tuple(&.{ i64, []const u8 })"
        );
    }

    #[test]
    fn unknown_elements_default_to_int() {
        assert_eq!(
            zig_type_plain(&NativeType::list_of(NativeType::Unknown)),
            "std.ArrayList(i64)"
        );
    }

    #[test]
    fn optional_wraps() {
        assert_eq!(
            zig_type_plain(&NativeType::Optional(Box::new(NativeType::Float))),
            "?f64"
        );
    }
}
