use crate::types::NativeType;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type Symbol = String;

/// One source module, in source order.
///
/// `body` preserves the order of every top-level statement (function
/// definitions, class definitions, plain statements) because emission
/// order must match AST order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirModule {
    pub imports: Vec<Import>,
    pub body: Vec<HirStmt>,
}

impl HirModule {
    /// Top-level function definitions, in source order.
    pub fn functions(&self) -> impl Iterator<Item = &HirFunction> {
        self.body.iter().filter_map(|s| match s {
            HirStmt::FunctionDef(f) => Some(f),
            _ => None,
        })
    }

    /// Top-level class definitions, in source order.
    pub fn classes(&self) -> impl Iterator<Item = &HirClass> {
        self.body.iter().filter_map(|s| match s {
            HirStmt::ClassDef(c) => Some(c),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub alias: Option<String>,
    pub items: Vec<ImportItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportItem {
    Named(String),
    Aliased { name: String, alias: String },
}

/// A decorator application: a dotted name plus any call arguments,
/// e.g. `@unittest.skipIf(cond, "reason")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirDecorator {
    pub name: String,
    pub args: Vec<HirExpr>,
    pub kwargs: Vec<CallKeyword>,
}

impl HirDecorator {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Positional,
    Vararg,
    Kwarg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirParam {
    pub name: Symbol,
    /// Explicit annotation, if the source carried one. `None` means the
    /// inferrer owns the type entirely.
    pub annotation: Option<NativeType>,
    pub default: Option<HirExpr>,
    pub kind: ParamKind,
}

impl HirParam {
    pub fn positional(name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
            kind: ParamKind::Positional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirFunction {
    pub name: Symbol,
    pub params: SmallVec<[HirParam; 4]>,
    pub body: Vec<HirStmt>,
    pub ret_annotation: Option<NativeType>,
    pub decorators: Vec<HirDecorator>,
    pub is_async: bool,
    pub docstring: Option<String>,
}

impl HirFunction {
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirClass {
    pub name: Symbol,
    pub bases: Vec<String>,
    pub decorators: Vec<HirDecorator>,
    /// Class-body assignments (`x = 0`, `x: int = 0`).
    pub fields: Vec<HirField>,
    pub methods: Vec<HirFunction>,
    /// Classes declared directly in the class body.
    pub nested: Vec<HirClass>,
    pub docstring: Option<String>,
}

impl HirClass {
    pub fn method(&self, name: &str) -> Option<&HirFunction> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirField {
    pub name: Symbol,
    pub annotation: Option<NativeType>,
    pub default: Option<HirExpr>,
}

/// The left-hand side of an assignment (or a `for` target, or a
/// comprehension target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Symbol(Symbol),
    Index {
        base: HirExpr,
        index: HirExpr,
    },
    Slice {
        base: HirExpr,
        lower: Option<HirExpr>,
        upper: Option<HirExpr>,
    },
    Attribute {
        value: HirExpr,
        attr: Symbol,
    },
    Tuple(Vec<AssignTarget>),
}

impl AssignTarget {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            AssignTarget::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Exception class names this handler matches; empty means bare
    /// `except:`.
    pub exc_types: Vec<String>,
    pub name: Option<Symbol>,
    pub body: Vec<HirStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    pub context: HirExpr,
    pub target: Option<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirStmt {
    /// `a = v`, `a = b = v` (targets bound left to right).
    Assign {
        targets: Vec<AssignTarget>,
        value: HirExpr,
    },
    AnnAssign {
        target: AssignTarget,
        annotation: NativeType,
        value: Option<HirExpr>,
    },
    AugAssign {
        target: AssignTarget,
        op: BinOp,
        value: HirExpr,
    },
    Return(Option<HirExpr>),
    If {
        condition: HirExpr,
        then_body: Vec<HirStmt>,
        else_body: Option<Vec<HirStmt>>,
    },
    While {
        condition: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    For {
        target: AssignTarget,
        iter: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    Expr(HirExpr),
    Raise {
        exc: Option<HirExpr>,
        cause: Option<HirExpr>,
    },
    Assert {
        test: HirExpr,
        msg: Option<HirExpr>,
    },
    Try {
        body: Vec<HirStmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<HirStmt>,
        finalbody: Vec<HirStmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<HirStmt>,
    },
    Break,
    Continue,
    Pass,
    Global(Vec<Symbol>),
    Nonlocal(Vec<Symbol>),
    Delete(Vec<AssignTarget>),
    FunctionDef(HirFunction),
    ClassDef(HirClass),
    /// A construct the backend cannot lower soundly. Emission produces a
    /// marker that keeps the rest of the module compiling.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallKeyword {
    /// `None` for `**kwargs` spread.
    pub arg: Option<Symbol>,
    pub value: HirExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: AssignTarget,
    pub iter: HirExpr,
    pub ifs: Vec<HirExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringPart {
    Literal(String),
    Expr {
        value: HirExpr,
        conversion: Option<char>,
        format_spec: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirExpr {
    Literal(Literal),
    Var(Symbol),
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    Bool {
        op: BoolOp,
        values: Vec<HirExpr>,
    },
    /// Comparison chain: `left op₀ comparators₀ op₁ comparators₁ …`.
    Compare {
        left: Box<HirExpr>,
        ops: Vec<CmpOp>,
        comparators: Vec<HirExpr>,
    },
    Call {
        func: Box<HirExpr>,
        args: Vec<HirExpr>,
        kwargs: Vec<CallKeyword>,
    },
    Index {
        base: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    Slice {
        base: Box<HirExpr>,
        lower: Option<Box<HirExpr>>,
        upper: Option<Box<HirExpr>>,
        step: Option<Box<HirExpr>>,
    },
    Attribute {
        value: Box<HirExpr>,
        attr: Symbol,
    },
    List(Vec<HirExpr>),
    Tuple(Vec<HirExpr>),
    Set(Vec<HirExpr>),
    Dict(Vec<(HirExpr, HirExpr)>),
    ListComp {
        element: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        element: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<HirExpr>,
        value: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        element: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    Lambda {
        params: Vec<Symbol>,
        body: Box<HirExpr>,
    },
    IfExp {
        test: Box<HirExpr>,
        body: Box<HirExpr>,
        orelse: Box<HirExpr>,
    },
    Yield(Option<Box<HirExpr>>),
    YieldFrom(Box<HirExpr>),
    Await(Box<HirExpr>),
    FString(Vec<FStringPart>),
    Starred(Box<HirExpr>),
    NamedExpr {
        target: Symbol,
        value: Box<HirExpr>,
    },
    /// See [`HirStmt::Unsupported`].
    Unsupported(String),
}

impl HirExpr {
    /// Dotted-name rendering for expressions like `a.b.c`, used by the
    /// import registry and decorator handling. Returns `None` when the
    /// expression is not a plain name chain.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            HirExpr::Var(s) => Some(s.clone()),
            HirExpr::Attribute { value, attr } => {
                value.dotted_name().map(|base| format!("{base}.{attr}"))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    /// Integer literal that exceeds 64-bit range, kept as its decimal
    /// digits.
    BigInt(String),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    None,
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    MatMul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Is,
    IsNot,
    In,
    NotIn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_name_flattens_attribute_chains() {
        let expr = HirExpr::Attribute {
            value: Box::new(HirExpr::Attribute {
                value: Box::new(HirExpr::Var("os".to_string())),
                attr: "path".to_string(),
            }),
            attr: "join".to_string(),
        };
        assert_eq!(expr.dotted_name().as_deref(), Some("os.path.join"));
    }

    #[test]
    fn dotted_name_rejects_calls() {
        let expr = HirExpr::Call {
            func: Box::new(HirExpr::Var("f".to_string())),
            args: vec![],
            kwargs: vec![],
        };
        assert_eq!(expr.dotted_name(), None);
    }

    #[test]
    fn module_accessors_filter_by_kind() {
        let module = HirModule {
            imports: vec![],
            body: vec![
                HirStmt::FunctionDef(HirFunction {
                    name: "f".to_string(),
                    params: smallvec::smallvec![],
                    body: vec![],
                    ret_annotation: None,
                    decorators: vec![],
                    is_async: false,
                    docstring: None,
                }),
                HirStmt::Pass,
                HirStmt::ClassDef(HirClass {
                    name: "C".to_string(),
                    bases: vec![],
                    decorators: vec![],
                    fields: vec![],
                    methods: vec![],
                    nested: vec![],
                    docstring: None,
                }),
            ],
        };
        assert_eq!(module.functions().count(), 1);
        assert_eq!(module.classes().count(), 1);
    }

    #[test]
    fn hir_round_trips_through_serde() {
        let stmt = HirStmt::AugAssign {
            target: AssignTarget::Symbol("x".to_string()),
            op: BinOp::Add,
            value: HirExpr::Literal(Literal::Int(1)),
        };
        let json = serde_json::to_string(&stmt).unwrap();
        let back: HirStmt = serde_json::from_str(&json).unwrap();
        assert_eq!(stmt, back);
    }
}
