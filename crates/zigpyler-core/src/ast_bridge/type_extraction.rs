use anyhow::{bail, Result};
use rustpython_ast::{self as ast};
use zigpyler_hir::NativeType;

/// Extracts `NativeType`s from Python annotation expressions.
///
/// Handles the builtin names, `typing` generics (upper- and lowercase),
/// `Optional`/PEP 604 unions, and string forward references. Unknown
/// names become class-instance types.
pub struct TypeExtractor;

impl TypeExtractor {
    pub fn extract_return_type(returns: &Option<Box<ast::Expr>>) -> Result<Option<NativeType>> {
        match returns {
            Some(ret) => Ok(Some(Self::extract_type(ret)?)),
            None => Ok(None),
        }
    }

    pub fn extract_type(expr: &ast::Expr) -> Result<NativeType> {
        match expr {
            ast::Expr::Name(n) => Ok(Self::extract_simple_type(n.id.as_str())),
            ast::Expr::Subscript(s) => Self::extract_generic_type(s),
            ast::Expr::Constant(c) if matches!(c.value, ast::Constant::None) => {
                Ok(NativeType::None)
            }
            // Ellipsis in a type position means "variable length".
            ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Ellipsis) => {
                Ok(NativeType::Unknown)
            }
            // String forward references: -> "ClassName".
            ast::Expr::Constant(ast::ExprConstant {
                value: ast::Constant::Str(s),
                ..
            }) => Ok(Self::extract_simple_type(s.as_str().trim())),
            // PEP 604 unions: `int | None` and friends.
            ast::Expr::BinOp(b) if matches!(b.op, ast::Operator::BitOr) => {
                let left = Self::extract_type(&b.left)?;
                let right = Self::extract_type(&b.right)?;
                Ok(zigpyler_hir::widen(&left, &right))
            }
            ast::Expr::Attribute(attr) => {
                // Module-qualified annotations (`datetime.datetime`) keep
                // the trailing class name.
                Ok(Self::extract_simple_type(attr.attr.as_str()))
            }
            _ => bail!("unsupported type annotation"),
        }
    }

    pub fn extract_simple_type(name: &str) -> NativeType {
        match name {
            "int" => NativeType::int(),
            "float" => NativeType::Float,
            "str" => NativeType::str_runtime(),
            "bool" => NativeType::Bool,
            "None" => NativeType::None,
            "bytes" | "bytearray" => NativeType::Bytes,
            "Any" | "object" => NativeType::PyValue,
            "list" | "List" => NativeType::list_of(NativeType::Unknown),
            "dict" | "Dict" => NativeType::dict_of(NativeType::Unknown, NativeType::Unknown),
            "set" | "Set" => NativeType::Set(Box::new(NativeType::Unknown)),
            "tuple" | "Tuple" => NativeType::Tuple(vec![]),
            "Callable" => NativeType::Callable,
            "Counter" => NativeType::Counter,
            "deque" => NativeType::Deque(Box::new(NativeType::Unknown)),
            other => NativeType::ClassInstance(other.to_string()),
        }
    }

    fn extract_generic_type(s: &ast::ExprSubscript) -> Result<NativeType> {
        let base = match s.value.as_ref() {
            ast::Expr::Name(n) => n.id.to_string(),
            _ => bail!("complex type annotations not supported"),
        };
        let params = Self::subscript_params(&s.slice)?;
        let one = |params: &[NativeType]| {
            params.first().cloned().unwrap_or(NativeType::Unknown)
        };
        Ok(match base.as_str() {
            "List" | "list" | "Sequence" | "Iterable" | "Iterator" | "Generator" => {
                NativeType::List(Box::new(one(&params)))
            }
            "Dict" | "dict" | "Mapping" => NativeType::Dict(
                Box::new(params.first().cloned().unwrap_or(NativeType::Unknown)),
                Box::new(params.get(1).cloned().unwrap_or(NativeType::Unknown)),
            ),
            "Set" | "set" | "FrozenSet" | "frozenset" => NativeType::Set(Box::new(one(&params))),
            "Tuple" | "tuple" => NativeType::Tuple(params),
            "Optional" => NativeType::Optional(Box::new(one(&params))),
            "Union" => params
                .iter()
                .fold(NativeType::Unknown, |acc, t| zigpyler_hir::widen(&acc, t)),
            "Deque" | "deque" => NativeType::Deque(Box::new(one(&params))),
            "DefaultDict" | "defaultdict" => NativeType::DefaultDict(
                Box::new(params.first().cloned().unwrap_or(NativeType::Unknown)),
                Box::new(params.get(1).cloned().unwrap_or(NativeType::Unknown)),
            ),
            "Callable" => NativeType::Callable,
            other => NativeType::ClassInstance(other.to_string()),
        })
    }

    fn subscript_params(slice: &ast::Expr) -> Result<Vec<NativeType>> {
        match slice {
            ast::Expr::Tuple(t) => t.elts.iter().map(Self::extract_type).collect(),
            single => Ok(vec![Self::extract_type(single)?]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_parser::{parse, Mode};

    fn annotation_of(source: &str) -> NativeType {
        // Parse `x: <ann> = ...` and pull the annotation expression out.
        let parsed = parse(source, Mode::Module, "<test>").unwrap();
        let ast::Mod::Module(module) = parsed else {
            panic!("expected module");
        };
        let ast::Stmt::AnnAssign(ann) = &module.body[0] else {
            panic!("expected annotated assignment");
        };
        TypeExtractor::extract_type(&ann.annotation).unwrap()
    }

    #[test]
    fn primitive_annotations() {
        assert_eq!(annotation_of("x: int = 0"), NativeType::int());
        assert_eq!(annotation_of("x: float = 0.0"), NativeType::Float);
        assert_eq!(annotation_of("x: str = ''"), NativeType::str_runtime());
        assert_eq!(annotation_of("x: bool = True"), NativeType::Bool);
    }

    #[test]
    fn generic_annotations() {
        assert_eq!(
            annotation_of("x: List[int] = []"),
            NativeType::list_of(NativeType::int())
        );
        assert_eq!(
            annotation_of("x: dict[str, int] = {}"),
            NativeType::dict_of(NativeType::str_runtime(), NativeType::int())
        );
        assert_eq!(
            annotation_of("x: Tuple[int, str] = (1, 'a')"),
            NativeType::Tuple(vec![NativeType::int(), NativeType::str_runtime()])
        );
    }

    #[test]
    fn optional_and_union_annotations() {
        assert_eq!(
            annotation_of("x: Optional[int] = None"),
            NativeType::Optional(Box::new(NativeType::int()))
        );
        assert_eq!(
            annotation_of("x: int | None = None"),
            NativeType::Optional(Box::new(NativeType::int()))
        );
    }

    #[test]
    fn custom_class_annotation() {
        assert_eq!(
            annotation_of("x: Point = Point()"),
            NativeType::ClassInstance("Point".to_string())
        );
    }
}
