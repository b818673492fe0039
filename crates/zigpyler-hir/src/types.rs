//! The `NativeType` lattice.
//!
//! Every expression, variable, parameter, return value and class field
//! gets a `NativeType` during inference. `widen` is the least-upper-bound
//! used whenever one binding is observed with multiple concrete types; it
//! is commutative, associative and idempotent, `Unknown` is its identity,
//! and `PyValue` its absorbing top.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntKind {
    Bounded,
    /// Requires big-integer storage in the target.
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrKind {
    /// Known at compile time; may be embedded in the binary.
    Literal,
    /// Built at runtime (concatenation, formatting, input).
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSig {
    pub params: Vec<NativeType>,
    pub ret: NativeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeType {
    /// No information yet. Defaults to a 64-bit signed integer on
    /// emission unless refined.
    Unknown,
    Int(IntKind),
    Float,
    Bool,
    None,
    Str(StrKind),
    Bytes,
    List(Box<NativeType>),
    Array(Box<NativeType>, Option<usize>),
    Tuple(Vec<NativeType>),
    Set(Box<NativeType>),
    Dict(Box<NativeType>, Box<NativeType>),
    Counter,
    DefaultDict(Box<NativeType>, Box<NativeType>),
    Deque(Box<NativeType>),
    Optional(Box<NativeType>),
    ClassInstance(String),
    Function(Box<FunctionSig>),
    Closure(u32),
    Callable,
    /// Erased dynamic value for heterogeneous containers.
    PyValue,
    BigInt,
}

impl NativeType {
    pub fn int() -> Self {
        NativeType::Int(IntKind::Bounded)
    }

    pub fn str_literal() -> Self {
        NativeType::Str(StrKind::Literal)
    }

    pub fn str_runtime() -> Self {
        NativeType::Str(StrKind::Runtime)
    }

    pub fn list_of(elem: NativeType) -> Self {
        NativeType::List(Box::new(elem))
    }

    pub fn dict_of(key: NativeType, value: NativeType) -> Self {
        NativeType::Dict(Box::new(key), Box::new(value))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, NativeType::Unknown)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            NativeType::Bool | NativeType::Int(_) | NativeType::Float | NativeType::BigInt
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, NativeType::Str(_))
    }

    /// True for types whose target representation needs heap allocation.
    pub fn needs_allocation(&self) -> bool {
        matches!(
            self,
            NativeType::Str(StrKind::Runtime)
                | NativeType::Bytes
                | NativeType::List(_)
                | NativeType::Set(_)
                | NativeType::Dict(_, _)
                | NativeType::Counter
                | NativeType::DefaultDict(_, _)
                | NativeType::Deque(_)
                | NativeType::BigInt
                | NativeType::PyValue
        )
    }

    /// Element type yielded by iterating a value of this type.
    pub fn element_type(&self) -> NativeType {
        match self {
            NativeType::List(e)
            | NativeType::Array(e, _)
            | NativeType::Set(e)
            | NativeType::Deque(e) => (**e).clone(),
            NativeType::Dict(k, _) | NativeType::DefaultDict(k, _) => (**k).clone(),
            NativeType::Counter => NativeType::str_runtime(),
            NativeType::Str(_) => NativeType::str_runtime(),
            NativeType::Bytes => NativeType::int(),
            NativeType::Tuple(elems) => elems
                .iter()
                .fold(NativeType::Unknown, |acc, t| widen(&acc, t)),
            NativeType::PyValue => NativeType::PyValue,
            _ => NativeType::Unknown,
        }
    }

    /// The concrete type used when emission must commit: `Unknown`
    /// defaults to a bounded integer.
    pub fn refined(&self) -> NativeType {
        match self {
            NativeType::Unknown => NativeType::int(),
            other => other.clone(),
        }
    }
}

/// Wrap in `Optional`, collapsing the degenerate shapes that would break
/// the lattice laws.
fn optional(inner: NativeType) -> NativeType {
    match inner {
        NativeType::None => NativeType::None,
        NativeType::PyValue => NativeType::PyValue,
        NativeType::Optional(t) => NativeType::Optional(t),
        other => NativeType::Optional(Box::new(other)),
    }
}

fn numeric_rank(t: &NativeType) -> Option<u8> {
    match t {
        NativeType::Bool => Some(0),
        NativeType::Int(IntKind::Bounded) => Some(1),
        NativeType::Int(IntKind::Unbounded) => Some(2),
        NativeType::BigInt => Some(3),
        _ => None,
    }
}

/// Least upper bound of two inferred types.
pub fn widen(a: &NativeType, b: &NativeType) -> NativeType {
    use NativeType::*;

    if a == b {
        return a.clone();
    }
    match (a, b) {
        (Unknown, t) | (t, Unknown) => t.clone(),
        (PyValue, _) | (_, PyValue) => PyValue,

        (None, t) | (t, None) => optional(t.clone()),
        (Optional(x), Optional(y)) => optional(widen(x, y)),
        (Optional(x), t) | (t, Optional(x)) => optional(widen(x, t)),

        // Integer ladder: bool < bounded < unbounded < bigint.
        (x, y) if numeric_rank(x).is_some() && numeric_rank(y).is_some() => {
            if numeric_rank(x) >= numeric_rank(y) {
                x.clone()
            } else {
                y.clone()
            }
        }
        // Floats absorb small integers; mixing with big integers loses
        // precision, so that pair erases.
        (Float, x) | (x, Float) => match numeric_rank(x) {
            Some(r) if r <= 1 => Float,
            Some(_) => PyValue,
            Option::None => PyValue,
        },

        (Str(_), Str(_)) => Str(StrKind::Runtime),

        (List(x), List(y)) => List(Box::new(widen(x, y))),
        (Array(x, n), Array(y, m)) => {
            let size = if n == m { *n } else { Option::None };
            Array(Box::new(widen(x, y)), size)
        }
        (Array(x, _), List(y)) | (List(y), Array(x, _)) => List(Box::new(widen(x, y))),
        (Set(x), Set(y)) => Set(Box::new(widen(x, y))),
        (Deque(x), Deque(y)) => Deque(Box::new(widen(x, y))),
        (Dict(k1, v1), Dict(k2, v2)) => Dict(Box::new(widen(k1, k2)), Box::new(widen(v1, v2))),
        (DefaultDict(k1, v1), DefaultDict(k2, v2)) => {
            DefaultDict(Box::new(widen(k1, k2)), Box::new(widen(v1, v2)))
        }
        (Tuple(xs), Tuple(ys)) if xs.len() == ys.len() => {
            Tuple(xs.iter().zip(ys).map(|(x, y)| widen(x, y)).collect())
        }

        (Function(_), Function(_))
        | (Function(_), Closure(_))
        | (Closure(_), Function(_))
        | (Closure(_), Closure(_))
        | (Callable, Function(_))
        | (Function(_), Callable)
        | (Callable, Closure(_))
        | (Closure(_), Callable) => Callable,

        // Two disjoint class instances, or any remaining primitive pair
        // with no common refinement.
        _ => PyValue,
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use NativeType::*;
        match self {
            Unknown => write!(f, "unknown"),
            Int(IntKind::Bounded) => write!(f, "int"),
            Int(IntKind::Unbounded) => write!(f, "int (unbounded)"),
            Float => write!(f, "float"),
            Bool => write!(f, "bool"),
            None => write!(f, "None"),
            Str(StrKind::Literal) => write!(f, "str (literal)"),
            Str(StrKind::Runtime) => write!(f, "str"),
            Bytes => write!(f, "bytes"),
            List(e) => write!(f, "list[{e}]"),
            Array(e, Some(n)) => write!(f, "array[{e}; {n}]"),
            Array(e, Option::None) => write!(f, "array[{e}]"),
            Tuple(elems) => {
                write!(f, "tuple[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Set(e) => write!(f, "set[{e}]"),
            Dict(k, v) => write!(f, "dict[{k}, {v}]"),
            Counter => write!(f, "Counter"),
            DefaultDict(k, v) => write!(f, "defaultdict[{k}, {v}]"),
            Deque(e) => write!(f, "deque[{e}]"),
            Optional(t) => write!(f, "Optional[{t}]"),
            ClassInstance(name) => write!(f, "{name}"),
            Function(sig) => write!(f, "function/{}", sig.params.len()),
            Closure(id) => write!(f, "closure#{id}"),
            Callable => write!(f, "callable"),
            PyValue => write!(f, "pyvalue"),
            BigInt => write!(f, "bigint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_identity() {
        let t = NativeType::list_of(NativeType::int());
        assert_eq!(widen(&NativeType::Unknown, &t), t);
        assert_eq!(widen(&t, &NativeType::Unknown), t);
    }

    #[test]
    fn disjoint_primitives_erase() {
        assert_eq!(
            widen(&NativeType::int(), &NativeType::str_runtime()),
            NativeType::PyValue
        );
        assert_eq!(
            widen(&NativeType::Bytes, &NativeType::str_literal()),
            NativeType::PyValue
        );
    }

    #[test]
    fn integer_ladder() {
        assert_eq!(
            widen(&NativeType::Bool, &NativeType::int()),
            NativeType::int()
        );
        assert_eq!(
            widen(&NativeType::int(), &NativeType::Int(IntKind::Unbounded)),
            NativeType::Int(IntKind::Unbounded)
        );
        assert_eq!(
            widen(&NativeType::Int(IntKind::Unbounded), &NativeType::BigInt),
            NativeType::BigInt
        );
    }

    #[test]
    fn float_absorbs_small_ints_only() {
        assert_eq!(
            widen(&NativeType::int(), &NativeType::Float),
            NativeType::Float
        );
        assert_eq!(
            widen(&NativeType::BigInt, &NativeType::Float),
            NativeType::PyValue
        );
    }

    #[test]
    fn string_kinds_unify_to_runtime() {
        assert_eq!(
            widen(&NativeType::str_literal(), &NativeType::str_runtime()),
            NativeType::str_runtime()
        );
    }

    #[test]
    fn none_makes_optional() {
        assert_eq!(
            widen(&NativeType::None, &NativeType::int()),
            NativeType::Optional(Box::new(NativeType::int()))
        );
        // Already-optional values do not double-wrap.
        let opt = NativeType::Optional(Box::new(NativeType::int()));
        assert_eq!(widen(&NativeType::None, &opt), opt);
    }

    #[test]
    fn containers_widen_elementwise() {
        let a = NativeType::list_of(NativeType::int());
        let b = NativeType::list_of(NativeType::Float);
        assert_eq!(widen(&a, &b), NativeType::list_of(NativeType::Float));

        let t1 = NativeType::Tuple(vec![NativeType::int(), NativeType::str_literal()]);
        let t2 = NativeType::Tuple(vec![NativeType::Float, NativeType::str_runtime()]);
        assert_eq!(
            widen(&t1, &t2),
            NativeType::Tuple(vec![NativeType::Float, NativeType::str_runtime()])
        );
    }

    #[test]
    fn mismatched_tuple_arity_erases() {
        let t1 = NativeType::Tuple(vec![NativeType::int()]);
        let t2 = NativeType::Tuple(vec![NativeType::int(), NativeType::int()]);
        assert_eq!(widen(&t1, &t2), NativeType::PyValue);
    }

    #[test]
    fn distinct_classes_erase() {
        let a = NativeType::ClassInstance("A".to_string());
        let b = NativeType::ClassInstance("B".to_string());
        assert_eq!(widen(&a, &b), NativeType::PyValue);
        assert_eq!(widen(&a, &a), a);
    }

    #[test]
    fn callables_collapse_to_callable() {
        assert_eq!(
            widen(&NativeType::Closure(0), &NativeType::Closure(1)),
            NativeType::Callable
        );
    }

    #[test]
    fn array_and_list_mix_to_list() {
        let arr = NativeType::Array(Box::new(NativeType::int()), Some(3));
        let list = NativeType::list_of(NativeType::int());
        assert_eq!(widen(&arr, &list), list);
    }

    #[test]
    fn element_types() {
        assert_eq!(
            NativeType::list_of(NativeType::Float).element_type(),
            NativeType::Float
        );
        assert_eq!(
            NativeType::dict_of(NativeType::str_runtime(), NativeType::int()).element_type(),
            NativeType::str_runtime()
        );
        assert_eq!(NativeType::Bytes.element_type(), NativeType::int());
    }

    mod lattice_laws {
        use super::*;
        use proptest::prelude::*;

        fn leaf() -> impl Strategy<Value = NativeType> {
            prop_oneof![
                Just(NativeType::Unknown),
                Just(NativeType::int()),
                Just(NativeType::Int(IntKind::Unbounded)),
                Just(NativeType::Float),
                Just(NativeType::Bool),
                Just(NativeType::None),
                Just(NativeType::str_literal()),
                Just(NativeType::str_runtime()),
                Just(NativeType::Bytes),
                Just(NativeType::BigInt),
                Just(NativeType::PyValue),
                Just(NativeType::Callable),
                Just(NativeType::Closure(0)),
                Just(NativeType::Closure(1)),
                Just(NativeType::ClassInstance("A".to_string())),
                Just(NativeType::ClassInstance("B".to_string())),
            ]
        }

        fn arb_type() -> impl Strategy<Value = NativeType> {
            leaf().prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    inner.clone().prop_map(NativeType::list_of),
                    inner
                        .clone()
                        .prop_map(|t| NativeType::Set(Box::new(t))),
                    inner
                        .clone()
                        .prop_map(|t| NativeType::Deque(Box::new(t))),
                    inner
                        .clone()
                        .prop_map(|t| NativeType::Optional(Box::new(t))),
                    (inner.clone(), inner.clone())
                        .prop_map(|(k, v)| NativeType::dict_of(k, v)),
                    proptest::collection::vec(inner.clone(), 1..3).prop_map(NativeType::Tuple),
                    (inner, proptest::option::of(0usize..4))
                        .prop_map(|(t, n)| NativeType::Array(Box::new(t), n)),
                ]
            })
        }

        proptest! {
            #[test]
            fn widen_is_commutative(a in arb_type(), b in arb_type()) {
                prop_assert_eq!(widen(&a, &b), widen(&b, &a));
            }

            #[test]
            fn widen_is_idempotent(a in arb_type()) {
                prop_assert_eq!(widen(&a, &a), a);
            }

            #[test]
            fn widen_is_associative(a in arb_type(), b in arb_type(), c in arb_type()) {
                let left = widen(&widen(&a, &b), &c);
                let right = widen(&a, &widen(&b, &c));
                prop_assert_eq!(left, right);
            }

            #[test]
            fn unknown_is_identity_everywhere(a in arb_type()) {
                prop_assert_eq!(widen(&a, &NativeType::Unknown), a.clone());
                prop_assert_eq!(widen(&NativeType::Unknown, &a), a);
            }

            #[test]
            fn widen_result_absorbs_operands(a in arb_type(), b in arb_type()) {
                // The lub is stable: widening either operand into the
                // result changes nothing.
                let w = widen(&a, &b);
                prop_assert_eq!(widen(&w, &a), w.clone());
                prop_assert_eq!(widen(&w, &b), w);
            }
        }
    }
}
