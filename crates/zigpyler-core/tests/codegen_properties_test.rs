//! Property-style checks over transpiled output: binding keywords,
//! canonical type mapping, unpack typing, augmented self-attributes, and
//! error-union transitivity.

use zigpyler_analysis::TypeInferencer;
use zigpyler_core::{AstBridge, ZigpylerPipeline};
use zigpyler_hir::NativeType;

fn transpile(source: &str) -> String {
    ZigpylerPipeline::new().transpile(source).unwrap()
}

#[test]
fn primitive_literals_map_to_canonical_target_types() {
    let out = transpile("a = 1\nb = 2.5\nc = \"hi\"\nd = True\n");
    assert!(out.contains("const a = 1;"), "{out}");
    assert!(out.contains("const b = 2.5;"), "{out}");
    assert!(out.contains("const c = \"hi\";"), "{out}");
    assert!(out.contains("const d = true;"), "{out}");
}

#[test]
fn tuple_unpack_assigns_matching_element_types() {
    let module = AstBridge::new()
        .parse_module("a, b, c = 1, \"x\", 2.5\n")
        .unwrap();
    let types = TypeInferencer::new().infer_module(&module).unwrap();
    assert_eq!(types.var_type("", "a"), NativeType::int());
    assert_eq!(types.var_type("", "b"), NativeType::str_literal());
    assert_eq!(types.var_type("", "c"), NativeType::Float);
}

#[test]
fn single_write_is_const_and_rewrites_are_var() {
    let out = transpile(
        r#"
def f():
    once = 1
    twice = 1
    twice = 2
    return once + twice
"#,
    );
    assert!(out.contains("const once = 1;"), "{out}");
    assert!(out.contains("var twice = 1;"), "{out}");
    assert!(out.contains("twice = 2;"), "{out}");
}

#[test]
fn augmented_assign_forces_mutable_binding() {
    let out = transpile("def f():\n    n = 0\n    n += 5\n    return n\n");
    assert!(out.contains("var n = 0;"), "{out}");
    assert!(out.contains("n += 5;"), "{out}");
}

#[test]
fn static_field_augment_updates_field_directly() {
    let out = transpile(
        r#"
class Counter:
    def __init__(self):
        self.n = 0

    def bump(self):
        self.n += 1
"#,
    );
    assert!(out.contains("self.n += 1;"), "{out}");
    // Self-mutation forces the mutable receiver form.
    assert!(out.contains("pub fn bump(self: *@This())"), "{out}");
}

#[test]
fn dynamic_field_augment_goes_through_instance_dict() {
    let out = transpile(
        r#"
class Box:
    def __init__(self):
        self.v = 1

    def flip(self):
        self.v = "text"

    def bump(self):
        self.v += 1
"#,
    );
    assert!(out.contains("__dict: py.AttrDict"), "{out}");
    assert!(
        out.contains("self.__dict.put(\"v\", py.value((self.__dict.get(\"v\").? + 1)))"),
        "{out}"
    );
}

#[test]
fn error_union_propagates_through_the_call_graph() {
    let out = transpile(
        r#"
def inner():
    raise ValueError("bad")

def outer():
    inner()

def outermost():
    outer()
"#,
    );
    assert!(out.contains("fn inner() !void"), "{out}");
    assert!(out.contains("fn outer() !void"), "{out}");
    assert!(out.contains("fn outermost() !void"), "{out}");
    assert!(out.contains("try inner();"), "{out}");
    assert!(out.contains("try outer();"), "{out}");
}

#[test]
fn unused_binding_becomes_discard() {
    let out = transpile("def f():\n    ghost = 1\n    return 2\n");
    assert!(out.contains("_ = 1;"), "{out}");
    assert!(!out.contains("const ghost"), "{out}");
}

#[test]
fn keyword_named_locals_are_renamed() {
    let out = transpile("def f():\n    error = 1\n    return error\n");
    // `error` is reserved in the target; the rename map disambiguates.
    assert!(out.contains("error__1"), "{out}");
    assert!(!out.contains("const error = "), "{out}");
}

#[test]
fn callable_parameter_escalates_to_generic_over_its_annotation() {
    let out = transpile("def f(cb: int):\n    cb()\n");
    // Call-position use overrides even an explicit annotation.
    assert!(out.contains("fn f(cb: anytype)"), "{out}");
    assert!(!out.contains("cb: i64"), "{out}");
}

#[test]
fn iterator_and_type_check_parameters_escalate_to_generic() {
    let out = transpile(
        r#"
def walk(items):
    for x in items:
        print(x)

def check(value):
    return isinstance(value, int)
"#,
    );
    assert!(out.contains("fn walk(items: anytype)"), "{out}");
    assert!(out.contains("fn check(value: anytype)"), "{out}");
}

#[test]
fn string_comparison_uses_runtime_equality() {
    let out = transpile("def f(mode):\n    if mode == \"fast\":\n        return 1\n    return 0\n");
    // The parameter compared against a string literal gets string type.
    assert!(out.contains("mode: []const u8"), "{out}");
    assert!(out.contains("py.str.eql(mode, \"fast\")"), "{out}");
}

#[test]
fn big_literals_get_explicit_annotations() {
    let out = transpile("def f():\n    big = 1 << 70\n    return big\n");
    assert!(out.contains(": py.BigInt"), "{out}");
}

#[test]
fn shift_rhs_is_cast_to_the_shift_amount_type() {
    let out = transpile("def f(a, b):\n    return a << b\n");
    assert!(out.contains("<< @intCast(b)"), "{out}");
}

#[test]
fn dict_element_augment_rewrites_to_put_of_get() {
    let out = transpile(
        "def f():\n    d = {\"k\": 1}\n    d[\"k\"] += 2\n    return d\n",
    );
    assert!(
        out.contains("d.put(\"k\", (d.get(\"k\").? + 2))"),
        "{out}"
    );
}

#[test]
fn global_statement_writes_file_scope_binding() {
    let out = transpile(
        "counter = 0\n\ndef bump():\n    global counter\n    counter = counter + 1\n\nbump()\n",
    );
    assert!(out.contains("var counter = 0;"), "{out}");
    assert!(out.contains("counter = (counter + 1);"), "{out}");
}
