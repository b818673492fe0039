//! Class lowering: struct shape, constructors, receiver mutability,
//! inherited-method re-emission, properties, and context managers.

use zigpyler_core::ZigpylerPipeline;

fn transpile(source: &str) -> String {
    ZigpylerPipeline::new().transpile(source).unwrap()
}

#[test]
fn init_fields_become_static_struct_members() {
    let out = transpile(
        r#"
class Point:
    def __init__(self, x: int, y: int):
        self.x = x
        self.y = y

    def manhattan(self):
        return self.x + self.y
"#,
    );
    assert!(out.contains("const Point = struct"), "{out}");
    assert!(out.contains("x: i64 = undefined,"), "{out}");
    assert!(out.contains("y: i64 = undefined,"), "{out}");
    assert!(out.contains("pub fn init("), "{out}");
    assert!(out.contains("self.x = x;"), "{out}");
    // Read-only method keeps the const receiver.
    assert!(
        out.contains("pub fn manhattan(self: *const @This()) i64"),
        "{out}"
    );
}

#[test]
fn inherited_methods_are_reemitted_on_the_child() {
    let out = transpile(
        r#"
class Animal:
    def __init__(self):
        self.alive = True

    def kind(self):
        return "animal"

    def speak(self):
        return "..."

class Dog(Animal):
    def speak(self):
        return "woof"
"#,
    );
    let dog_start = out.find("const Dog = struct").expect("Dog struct");
    let dog_section = &out[dog_start..];
    // The child re-emits the methods it does not override.
    assert!(dog_section.contains("pub fn kind(self: *const @This())"), "{out}");
    assert!(dog_section.contains("return \"woof\";"), "{out}");
    // Inherited fields land on the child struct.
    assert!(dog_section.contains("alive: bool = undefined,"), "{out}");
    // The overridden method is not re-emitted alongside the override.
    assert_eq!(dog_section.matches("pub fn speak(").count(), 1, "{out}");
}

#[test]
fn property_reads_emit_method_calls() {
    let out = transpile(
        r#"
class Circle:
    def __init__(self, r):
        self.r = r

    @property
    def area(self):
        return self.r * self.r

def f():
    c = Circle(3)
    return c.area
"#,
    );
    assert!(out.contains("c.area()"), "{out}");
}

#[test]
fn with_statement_uses_enter_and_deferred_exit() {
    let out = transpile(
        r#"
class Res:
    def __enter__(self):
        return 1

    def __exit__(self, a, b, c):
        return False

def f():
    with Res() as v:
        return v
"#,
    );
    assert!(out.contains(".__enter__()"), "{out}");
    assert!(out.contains("defer py.ctxExit("), "{out}");
    assert!(out.contains("const v = "), "{out}");
}

#[test]
fn default_init_is_emitted_for_plain_classes() {
    let out = transpile("class Empty:\n    pass\n\ne = Empty()\n");
    assert!(out.contains("pub fn init() Empty"), "{out}");
    assert!(out.contains("return Empty{};"), "{out}");
    assert!(out.contains("e = Empty.init();"), "{out}");
}

#[test]
fn classmethod_drops_cls_and_staticmethod_has_no_receiver() {
    let out = transpile(
        r#"
class Maker:
    @staticmethod
    def zero():
        return 0

    @classmethod
    def one(cls):
        return 1
"#,
    );
    assert!(out.contains("pub fn zero() i64"), "{out}");
    assert!(out.contains("pub fn one() i64"), "{out}");
    assert!(!out.contains("cls:"), "{out}");
}

#[test]
fn super_dispatch_with_known_base_uses_reemitted_copy() {
    let out = transpile(
        r#"
class Base:
    def greet(self):
        return "base"

class Child(Base):
    def greet(self):
        return super().greet()
"#,
    );
    assert!(out.contains("self.__super_greet()"), "{out}");
    assert!(out.contains("pub fn __super_greet(self: *const @This())"), "{out}");
}

#[test]
fn magic_method_signatures_use_the_fixed_table() {
    let out = transpile(
        r#"
class Box:
    def __init__(self, n):
        self.n = n

    def __len__(self):
        return self.n

    def __repr__(self):
        return "Box"

    def __eq__(self, other):
        return True
"#,
    );
    assert!(out.contains("pub fn __len__(self: *const @This()) !i64"), "{out}");
    assert!(
        out.contains("pub fn __repr__(self: *const @This()) []const u8"),
        "{out}"
    );
    assert!(out.contains(") bool"), "{out}");
}
