use anyhow::{bail, Result};
use rustpython_ast::{self as ast};
use zigpyler_hir::{
    AssignTarget, BinOp, BoolOp, CallKeyword, CmpOp, Comprehension, ExceptHandler, FStringPart,
    HirDecorator, HirExpr, HirParam, HirStmt, Literal, ParamKind, UnaryOp, WithItem,
};

use super::type_extraction::TypeExtractor;

/// Statement converter, split out of the bridge to keep each conversion
/// small.
pub struct StmtConverter;

impl StmtConverter {
    pub fn convert(stmt: ast::Stmt) -> Result<HirStmt> {
        match stmt {
            ast::Stmt::Assign(a) => Self::convert_assign(a),
            ast::Stmt::AnnAssign(a) => Self::convert_ann_assign(a),
            ast::Stmt::AugAssign(a) => Self::convert_aug_assign(a),
            ast::Stmt::Return(r) => Self::convert_return(r),
            ast::Stmt::If(i) => Self::convert_if(i),
            ast::Stmt::While(w) => Self::convert_while(w),
            ast::Stmt::For(f) => Self::convert_for(f),
            ast::Stmt::Expr(e) => Self::convert_expr_stmt(e),
            ast::Stmt::Raise(r) => Ok(HirStmt::Raise {
                exc: r.exc.map(|e| ExprConverter::convert(*e)).transpose()?,
                cause: r.cause.map(|c| ExprConverter::convert(*c)).transpose()?,
            }),
            ast::Stmt::Assert(a) => Ok(HirStmt::Assert {
                test: ExprConverter::convert(*a.test)?,
                msg: a.msg.map(|m| ExprConverter::convert(*m)).transpose()?,
            }),
            ast::Stmt::Try(t) => Self::convert_try(t),
            ast::Stmt::With(w) => Self::convert_with(w),
            ast::Stmt::Break(_) => Ok(HirStmt::Break),
            ast::Stmt::Continue(_) => Ok(HirStmt::Continue),
            ast::Stmt::Pass(_) => Ok(HirStmt::Pass),
            ast::Stmt::Global(g) => Ok(HirStmt::Global(
                g.names.iter().map(ToString::to_string).collect(),
            )),
            ast::Stmt::Nonlocal(n) => Ok(HirStmt::Nonlocal(
                n.names.iter().map(ToString::to_string).collect(),
            )),
            ast::Stmt::Delete(d) => Ok(HirStmt::Delete(
                d.targets
                    .iter()
                    .map(extract_assign_target)
                    .collect::<Result<Vec<_>>>()?,
            )),
            ast::Stmt::FunctionDef(f) => {
                Ok(HirStmt::FunctionDef(super::convert_function(f, false)?))
            }
            ast::Stmt::AsyncFunctionDef(f) => {
                Ok(HirStmt::FunctionDef(super::convert_async_function(f)?))
            }
            ast::Stmt::ClassDef(c) => Ok(HirStmt::ClassDef(super::convert_class(c)?)),
            other => Ok(HirStmt::Unsupported(format!(
                "statement kind {}",
                stmt_kind_name(&other)
            ))),
        }
    }

    fn convert_assign(a: ast::StmtAssign) -> Result<HirStmt> {
        let targets = a
            .targets
            .iter()
            .map(extract_assign_target)
            .collect::<Result<Vec<_>>>()?;
        let value = ExprConverter::convert(*a.value)?;
        Ok(HirStmt::Assign { targets, value })
    }

    fn convert_ann_assign(a: ast::StmtAnnAssign) -> Result<HirStmt> {
        let target = extract_assign_target(&a.target)?;
        let annotation = TypeExtractor::extract_type(&a.annotation)
            .unwrap_or(zigpyler_hir::NativeType::Unknown);
        let value = a.value.map(|v| ExprConverter::convert(*v)).transpose()?;
        Ok(HirStmt::AnnAssign {
            target,
            annotation,
            value,
        })
    }

    fn convert_aug_assign(a: ast::StmtAugAssign) -> Result<HirStmt> {
        let target = extract_assign_target(&a.target)?;
        let op = convert_binop(&a.op)?;
        let value = ExprConverter::convert(*a.value)?;
        Ok(HirStmt::AugAssign { target, op, value })
    }

    fn convert_return(r: ast::StmtReturn) -> Result<HirStmt> {
        let value = r.value.map(|v| ExprConverter::convert(*v)).transpose()?;
        Ok(HirStmt::Return(value))
    }

    fn convert_if(i: ast::StmtIf) -> Result<HirStmt> {
        let condition = ExprConverter::convert(*i.test)?;
        let then_body = convert_body(i.body)?;
        let else_body = if i.orelse.is_empty() {
            None
        } else {
            Some(convert_body(i.orelse)?)
        };
        Ok(HirStmt::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn convert_while(w: ast::StmtWhile) -> Result<HirStmt> {
        Ok(HirStmt::While {
            condition: ExprConverter::convert(*w.test)?,
            body: convert_body(w.body)?,
            orelse: convert_body(w.orelse)?,
        })
    }

    fn convert_for(f: ast::StmtFor) -> Result<HirStmt> {
        Ok(HirStmt::For {
            target: extract_assign_target(&f.target)?,
            iter: ExprConverter::convert(*f.iter)?,
            body: convert_body(f.body)?,
            orelse: convert_body(f.orelse)?,
        })
    }

    fn convert_expr_stmt(e: ast::StmtExpr) -> Result<HirStmt> {
        Ok(HirStmt::Expr(ExprConverter::convert(*e.value)?))
    }

    fn convert_try(t: ast::StmtTry) -> Result<HirStmt> {
        let body = convert_body(t.body)?;
        let mut handlers = Vec::new();
        for handler in t.handlers {
            let ast::ExceptHandler::ExceptHandler(h) = handler;
            let exc_types = match &h.type_ {
                Some(ty) => exception_names(ty),
                None => Vec::new(),
            };
            handlers.push(ExceptHandler {
                exc_types,
                name: h.name.as_ref().map(ToString::to_string),
                body: convert_body(h.body)?,
            });
        }
        Ok(HirStmt::Try {
            body,
            handlers,
            orelse: convert_body(t.orelse)?,
            finalbody: convert_body(t.finalbody)?,
        })
    }

    fn convert_with(w: ast::StmtWith) -> Result<HirStmt> {
        let mut items = Vec::new();
        for item in w.items {
            let target = match &item.optional_vars {
                Some(expr) => match expr.as_ref() {
                    ast::Expr::Name(n) => Some(n.id.to_string()),
                    _ => None,
                },
                None => None,
            };
            items.push(WithItem {
                context: ExprConverter::convert(item.context_expr)?,
                target,
            });
        }
        Ok(HirStmt::With {
            items,
            body: convert_body(w.body)?,
        })
    }
}

/// Expression converter.
pub struct ExprConverter;

impl ExprConverter {
    pub fn convert(expr: ast::Expr) -> Result<HirExpr> {
        match expr {
            ast::Expr::Constant(c) => Self::convert_constant(c),
            ast::Expr::Name(n) => Ok(HirExpr::Var(n.id.to_string())),
            ast::Expr::BinOp(b) => Self::convert_binop_expr(b),
            ast::Expr::UnaryOp(u) => Self::convert_unaryop_expr(u),
            ast::Expr::BoolOp(b) => Self::convert_boolop(b),
            ast::Expr::Compare(c) => Self::convert_compare(c),
            ast::Expr::Call(c) => Self::convert_call(c),
            ast::Expr::Subscript(s) => Self::convert_subscript(s),
            ast::Expr::Attribute(a) => Ok(HirExpr::Attribute {
                value: Box::new(Self::convert(*a.value)?),
                attr: a.attr.to_string(),
            }),
            ast::Expr::List(l) => Ok(HirExpr::List(Self::convert_all(l.elts)?)),
            ast::Expr::Tuple(t) => Ok(HirExpr::Tuple(Self::convert_all(t.elts)?)),
            ast::Expr::Set(s) => Ok(HirExpr::Set(Self::convert_all(s.elts)?)),
            ast::Expr::Dict(d) => Self::convert_dict(d),
            ast::Expr::ListComp(c) => Ok(HirExpr::ListComp {
                element: Box::new(Self::convert(*c.elt)?),
                generators: convert_generators(c.generators)?,
            }),
            ast::Expr::SetComp(c) => Ok(HirExpr::SetComp {
                element: Box::new(Self::convert(*c.elt)?),
                generators: convert_generators(c.generators)?,
            }),
            ast::Expr::DictComp(c) => Ok(HirExpr::DictComp {
                key: Box::new(Self::convert(*c.key)?),
                value: Box::new(Self::convert(*c.value)?),
                generators: convert_generators(c.generators)?,
            }),
            ast::Expr::GeneratorExp(c) => Ok(HirExpr::GeneratorExp {
                element: Box::new(Self::convert(*c.elt)?),
                generators: convert_generators(c.generators)?,
            }),
            ast::Expr::Lambda(l) => {
                let params = l.args.args.iter().map(|a| a.def.arg.to_string()).collect();
                Ok(HirExpr::Lambda {
                    params,
                    body: Box::new(Self::convert(*l.body)?),
                })
            }
            ast::Expr::IfExp(i) => Ok(HirExpr::IfExp {
                test: Box::new(Self::convert(*i.test)?),
                body: Box::new(Self::convert(*i.body)?),
                orelse: Box::new(Self::convert(*i.orelse)?),
            }),
            ast::Expr::Starred(s) => Ok(HirExpr::Starred(Box::new(Self::convert(*s.value)?))),
            ast::Expr::Slice(s) => {
                // A bare slice expression outside subscript position.
                Ok(HirExpr::Slice {
                    base: Box::new(HirExpr::Literal(Literal::None)),
                    lower: s.lower.map(|e| Self::convert(*e).map(Box::new)).transpose()?,
                    upper: s.upper.map(|e| Self::convert(*e).map(Box::new)).transpose()?,
                    step: s.step.map(|e| Self::convert(*e).map(Box::new)).transpose()?,
                })
            }
            ast::Expr::Yield(y) => Ok(HirExpr::Yield(
                y.value
                    .map(|v| Self::convert(*v).map(Box::new))
                    .transpose()?,
            )),
            ast::Expr::YieldFrom(y) => {
                Ok(HirExpr::YieldFrom(Box::new(Self::convert(*y.value)?)))
            }
            ast::Expr::Await(a) => Ok(HirExpr::Await(Box::new(Self::convert(*a.value)?))),
            ast::Expr::JoinedStr(j) => Self::convert_fstring(j),
            ast::Expr::FormattedValue(f) => Ok(HirExpr::FString(vec![FStringPart::Expr {
                value: Self::convert(*f.value)?,
                conversion: None,
                format_spec: None,
            }])),
            ast::Expr::NamedExpr(n) => {
                let target = match n.target.as_ref() {
                    ast::Expr::Name(name) => name.id.to_string(),
                    _ => bail!("unsupported walrus target"),
                };
                Ok(HirExpr::NamedExpr {
                    target,
                    value: Box::new(Self::convert(*n.value)?),
                })
            }
            other => Ok(HirExpr::Unsupported(format!(
                "expression kind {}",
                expr_kind_name(&other)
            ))),
        }
    }

    fn convert_all(elts: Vec<ast::Expr>) -> Result<Vec<HirExpr>> {
        elts.into_iter().map(Self::convert).collect()
    }

    fn convert_constant(c: ast::ExprConstant) -> Result<HirExpr> {
        let lit = match &c.value {
            ast::Constant::Int(i) => match i64::try_from(i) {
                Ok(v) => Literal::Int(v),
                // Literals past 64-bit range keep their digits for
                // big-integer lowering.
                Err(_) => Literal::BigInt(i.to_string()),
            },
            ast::Constant::Float(f) => Literal::Float(*f),
            ast::Constant::Str(s) => Literal::Str(s.to_string()),
            ast::Constant::Bytes(b) => Literal::Bytes(b.clone()),
            ast::Constant::Bool(b) => Literal::Bool(*b),
            ast::Constant::None => Literal::None,
            ast::Constant::Ellipsis => Literal::Ellipsis,
            _ => bail!("unsupported constant kind"),
        };
        Ok(HirExpr::Literal(lit))
    }

    fn convert_binop_expr(b: ast::ExprBinOp) -> Result<HirExpr> {
        let op = convert_binop(&b.op)?;
        Ok(HirExpr::Binary {
            op,
            left: Box::new(Self::convert(*b.left)?),
            right: Box::new(Self::convert(*b.right)?),
        })
    }

    fn convert_unaryop_expr(u: ast::ExprUnaryOp) -> Result<HirExpr> {
        let op = match u.op {
            ast::UnaryOp::Not => UnaryOp::Not,
            ast::UnaryOp::UAdd => UnaryOp::Pos,
            ast::UnaryOp::USub => UnaryOp::Neg,
            ast::UnaryOp::Invert => UnaryOp::BitNot,
        };
        Ok(HirExpr::Unary {
            op,
            operand: Box::new(Self::convert(*u.operand)?),
        })
    }

    fn convert_boolop(b: ast::ExprBoolOp) -> Result<HirExpr> {
        let op = match b.op {
            ast::BoolOp::And => BoolOp::And,
            ast::BoolOp::Or => BoolOp::Or,
        };
        Ok(HirExpr::Bool {
            op,
            values: Self::convert_all(b.values)?,
        })
    }

    fn convert_compare(c: ast::ExprCompare) -> Result<HirExpr> {
        let ops = c.ops.iter().map(convert_cmpop).collect::<Result<Vec<_>>>()?;
        Ok(HirExpr::Compare {
            left: Box::new(Self::convert(*c.left)?),
            ops,
            comparators: Self::convert_all(c.comparators)?,
        })
    }

    fn convert_call(c: ast::ExprCall) -> Result<HirExpr> {
        let func = Box::new(Self::convert(*c.func)?);
        let args = Self::convert_all(c.args)?;
        let mut kwargs = Vec::new();
        for keyword in c.keywords {
            kwargs.push(CallKeyword {
                arg: keyword.arg.as_ref().map(ToString::to_string),
                value: Self::convert(keyword.value)?,
            });
        }
        Ok(HirExpr::Call { func, args, kwargs })
    }

    fn convert_subscript(s: ast::ExprSubscript) -> Result<HirExpr> {
        let base = Box::new(Self::convert(*s.value)?);
        match *s.slice {
            ast::Expr::Slice(slice) => Ok(HirExpr::Slice {
                base,
                lower: slice
                    .lower
                    .map(|e| Self::convert(*e).map(Box::new))
                    .transpose()?,
                upper: slice
                    .upper
                    .map(|e| Self::convert(*e).map(Box::new))
                    .transpose()?,
                step: slice
                    .step
                    .map(|e| Self::convert(*e).map(Box::new))
                    .transpose()?,
            }),
            other => Ok(HirExpr::Index {
                base,
                index: Box::new(Self::convert(other)?),
            }),
        }
    }

    fn convert_dict(d: ast::ExprDict) -> Result<HirExpr> {
        let mut items = Vec::new();
        for (key, value) in d.keys.into_iter().zip(d.values.into_iter()) {
            match key {
                Some(k) => items.push((Self::convert(k)?, Self::convert(value)?)),
                None => {
                    return Ok(HirExpr::Unsupported(
                        "dict unpacking in literal".to_string(),
                    ))
                }
            }
        }
        Ok(HirExpr::Dict(items))
    }

    fn convert_fstring(j: ast::ExprJoinedStr) -> Result<HirExpr> {
        let mut parts = Vec::new();
        for value in j.values {
            match value {
                ast::Expr::Constant(c) => {
                    if let ast::Constant::Str(s) = &c.value {
                        parts.push(FStringPart::Literal(s.to_string()));
                    }
                }
                ast::Expr::FormattedValue(f) => {
                    let format_spec = f.format_spec.and_then(|spec| constant_text(&spec));
                    parts.push(FStringPart::Expr {
                        value: Self::convert(*f.value)?,
                        conversion: None,
                        format_spec,
                    });
                }
                other => {
                    parts.push(FStringPart::Expr {
                        value: Self::convert(other)?,
                        conversion: None,
                        format_spec: None,
                    });
                }
            }
        }
        Ok(HirExpr::FString(parts))
    }
}

/// Pull plain text out of a format-spec expression (itself a JoinedStr of
/// constants in the usual case).
fn constant_text(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Constant(c) => match &c.value {
            ast::Constant::Str(s) => Some(s.to_string()),
            _ => None,
        },
        ast::Expr::JoinedStr(j) => {
            let mut out = String::new();
            for v in &j.values {
                match v {
                    ast::Expr::Constant(c) => {
                        if let ast::Constant::Str(s) = &c.value {
                            out.push_str(s);
                        }
                    }
                    _ => return None,
                }
            }
            Some(out)
        }
        _ => None,
    }
}

pub(crate) fn convert_body(body: Vec<ast::Stmt>) -> Result<Vec<HirStmt>> {
    body.into_iter().map(StmtConverter::convert).collect()
}

pub(crate) fn extract_assign_target(expr: &ast::Expr) -> Result<AssignTarget> {
    match expr {
        ast::Expr::Name(n) => Ok(AssignTarget::Symbol(n.id.to_string())),
        ast::Expr::Subscript(s) => {
            let base = ExprConverter::convert(s.value.as_ref().clone())?;
            if let ast::Expr::Slice(slice) = s.slice.as_ref() {
                Ok(AssignTarget::Slice {
                    base,
                    lower: slice
                        .lower
                        .as_ref()
                        .map(|e| ExprConverter::convert(e.as_ref().clone()))
                        .transpose()?,
                    upper: slice
                        .upper
                        .as_ref()
                        .map(|e| ExprConverter::convert(e.as_ref().clone()))
                        .transpose()?,
                })
            } else {
                Ok(AssignTarget::Index {
                    base,
                    index: ExprConverter::convert(s.slice.as_ref().clone())?,
                })
            }
        }
        ast::Expr::Attribute(a) => Ok(AssignTarget::Attribute {
            value: ExprConverter::convert(a.value.as_ref().clone())?,
            attr: a.attr.to_string(),
        }),
        ast::Expr::Tuple(t) => Ok(AssignTarget::Tuple(
            t.elts
                .iter()
                .map(extract_assign_target)
                .collect::<Result<Vec<_>>>()?,
        )),
        ast::Expr::List(l) => Ok(AssignTarget::Tuple(
            l.elts
                .iter()
                .map(extract_assign_target)
                .collect::<Result<Vec<_>>>()?,
        )),
        ast::Expr::Starred(s) => extract_assign_target(&s.value),
        _ => bail!("unsupported assignment target"),
    }
}

/// Exception class names from an `except` clause type expression.
fn exception_names(expr: &ast::Expr) -> Vec<String> {
    match expr {
        ast::Expr::Name(n) => vec![n.id.to_string()],
        ast::Expr::Attribute(a) => vec![a.attr.to_string()],
        ast::Expr::Tuple(t) => t.elts.iter().flat_map(exception_names).collect(),
        _ => Vec::new(),
    }
}

fn convert_generators(generators: Vec<ast::Comprehension>) -> Result<Vec<Comprehension>> {
    generators
        .into_iter()
        .map(|g| {
            Ok(Comprehension {
                target: extract_assign_target(&g.target)?,
                iter: ExprConverter::convert(g.iter)?,
                ifs: g
                    .ifs
                    .into_iter()
                    .map(ExprConverter::convert)
                    .collect::<Result<Vec<_>>>()?,
            })
        })
        .collect()
}

pub(crate) fn convert_binop(op: &ast::Operator) -> Result<BinOp> {
    Ok(match op {
        ast::Operator::Add => BinOp::Add,
        ast::Operator::Sub => BinOp::Sub,
        ast::Operator::Mult => BinOp::Mul,
        ast::Operator::Div => BinOp::Div,
        ast::Operator::FloorDiv => BinOp::FloorDiv,
        ast::Operator::Mod => BinOp::Mod,
        ast::Operator::Pow => BinOp::Pow,
        ast::Operator::BitAnd => BinOp::BitAnd,
        ast::Operator::BitOr => BinOp::BitOr,
        ast::Operator::BitXor => BinOp::BitXor,
        ast::Operator::LShift => BinOp::LShift,
        ast::Operator::RShift => BinOp::RShift,
        ast::Operator::MatMult => BinOp::MatMul,
    })
}

pub(crate) fn convert_cmpop(op: &ast::CmpOp) -> Result<CmpOp> {
    Ok(match op {
        ast::CmpOp::Eq => CmpOp::Eq,
        ast::CmpOp::NotEq => CmpOp::NotEq,
        ast::CmpOp::Lt => CmpOp::Lt,
        ast::CmpOp::LtE => CmpOp::LtEq,
        ast::CmpOp::Gt => CmpOp::Gt,
        ast::CmpOp::GtE => CmpOp::GtEq,
        ast::CmpOp::Is => CmpOp::Is,
        ast::CmpOp::IsNot => CmpOp::IsNot,
        ast::CmpOp::In => CmpOp::In,
        ast::CmpOp::NotIn => CmpOp::NotIn,
    })
}

/// Convert a decorator expression into its dotted-name-plus-args form.
pub(crate) fn convert_decorator(expr: &ast::Expr) -> Result<HirDecorator> {
    match expr {
        ast::Expr::Name(n) => Ok(HirDecorator::bare(n.id.to_string())),
        ast::Expr::Attribute(_) => {
            let converted = ExprConverter::convert(expr.clone())?;
            match converted.dotted_name() {
                Some(name) => Ok(HirDecorator::bare(name)),
                None => Ok(HirDecorator::bare("<unknown>")),
            }
        }
        ast::Expr::Call(c) => {
            let name = match ExprConverter::convert(c.func.as_ref().clone())?.dotted_name() {
                Some(n) => n,
                None => "<unknown>".to_string(),
            };
            let args = c
                .args
                .iter()
                .map(|a| ExprConverter::convert(a.clone()))
                .collect::<Result<Vec<_>>>()?;
            let kwargs = c
                .keywords
                .iter()
                .map(|k| {
                    Ok(CallKeyword {
                        arg: k.arg.as_ref().map(ToString::to_string),
                        value: ExprConverter::convert(k.value.clone())?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(HirDecorator { name, args, kwargs })
        }
        _ => Ok(HirDecorator::bare("<unknown>")),
    }
}

/// Convert a parameter list, aligning trailing defaults the way the
/// grammar stores them.
pub(crate) fn convert_parameters(args: &ast::Arguments) -> Result<Vec<HirParam>> {
    let mut params = Vec::new();

    let num_args = args.args.len();
    let defaults_vec: Vec<_> = args.defaults().collect();
    let num_defaults = defaults_vec.len();
    let first_default_idx = num_args.saturating_sub(num_defaults);

    for (i, arg) in args.args.iter().enumerate() {
        let name = arg.def.arg.to_string();
        let annotation = match &arg.def.annotation {
            Some(ann) => TypeExtractor::extract_type(ann).ok(),
            None => None,
        };
        let default = if i >= first_default_idx {
            defaults_vec
                .get(i - first_default_idx)
                .map(|d| ExprConverter::convert((*d).clone()))
                .transpose()?
        } else {
            None
        };
        params.push(HirParam {
            name,
            annotation,
            default,
            kind: ParamKind::Positional,
        });
    }

    if let Some(vararg) = &args.vararg {
        params.push(HirParam {
            name: vararg.arg.to_string(),
            annotation: None,
            default: None,
            kind: ParamKind::Vararg,
        });
    }
    if let Some(kwarg) = &args.kwarg {
        params.push(HirParam {
            name: kwarg.arg.to_string(),
            annotation: None,
            default: None,
            kind: ParamKind::Kwarg,
        });
    }

    Ok(params)
}

fn stmt_kind_name(stmt: &ast::Stmt) -> &'static str {
    match stmt {
        ast::Stmt::Import(_) => "function-level import",
        ast::Stmt::ImportFrom(_) => "function-level import",
        ast::Stmt::AsyncFor(_) => "async for",
        ast::Stmt::AsyncWith(_) => "async with",
        ast::Stmt::Match(_) => "match statement",
        _ => "statement",
    }
}

fn expr_kind_name(_expr: &ast::Expr) -> &'static str {
    "expression"
}
