//! Expression emission (component E, expression half).
//!
//! Every emitted expression is a single line of Zig text; expressions
//! that need statements (comprehensions, chained comparisons, lambdas)
//! wrap them in labeled blocks, which are expressions in the target.

use anyhow::Result;
use zigpyler_analysis::{builtin_call_type, method_call_type};
use zigpyler_hir::{
    BinOp, BoolOp, CmpOp, Comprehension, FStringPart, HirExpr, IntKind, Literal, NativeType,
    StrKind, UnaryOp,
};

use super::context::ZigBackend;

impl ZigBackend<'_> {
    /// Wrap a fallible call for the active error-routing context: plain
    /// `try` normally, park-and-break inside a try body.
    pub(crate) fn propagate(&mut self, call: String) -> String {
        match &self.catch_ctx {
            Some(ctx) => format!(
                "({call} catch |__e| {{ {} = __e; break :{}; }})",
                ctx.exc_var, ctx.label
            ),
            None => format!("try {call}"),
        }
    }

    pub(crate) fn emit_expr(&mut self, expr: &HirExpr) -> Result<String> {
        match expr {
            HirExpr::Literal(lit) => self.emit_literal(lit),
            HirExpr::Var(name) => Ok(self.emit_var(name)),
            HirExpr::Binary { op, left, right } => self.emit_binary(*op, left, right),
            HirExpr::Unary { op, operand } => self.emit_unary(*op, operand),
            HirExpr::Bool { op, values } => self.emit_bool_op(*op, values),
            HirExpr::Compare {
                left,
                ops,
                comparators,
            } => self.emit_compare(left, ops, comparators),
            HirExpr::Call { func, args, kwargs } => self.emit_callable(func, args, kwargs),
            HirExpr::Index { base, index } => self.emit_index(base, index),
            HirExpr::Slice {
                base,
                lower,
                upper,
                step,
            } => self.emit_slice(base, lower.as_deref(), upper.as_deref(), step.as_deref()),
            HirExpr::Attribute { value, attr } => self.emit_attribute(value, attr),
            HirExpr::List(items) => self.emit_list_literal(items),
            HirExpr::Tuple(items) => {
                let parts = self.emit_all(items)?;
                Ok(format!(".{{ {} }}", parts.join(", ")))
            }
            HirExpr::Set(items) => self.emit_set_literal(items),
            HirExpr::Dict(items) => self.emit_dict_literal(items),
            HirExpr::ListComp {
                element,
                generators,
            } => self.emit_list_comp(element, generators),
            HirExpr::SetComp {
                element,
                generators,
            } => self.emit_set_comp(element, generators),
            HirExpr::DictComp {
                key,
                value,
                generators,
            } => self.emit_dict_comp(key, value, generators),
            // Generator expressions are eager sequences.
            HirExpr::GeneratorExp {
                element,
                generators,
            } => self.emit_list_comp(element, generators),
            HirExpr::Lambda { params, body } => self.emit_lambda(params, body),
            HirExpr::IfExp {
                test,
                body,
                orelse,
            } => {
                let cond = self.emit_condition(test)?;
                let then = self.emit_expr(body)?;
                let other = self.emit_expr(orelse)?;
                Ok(format!("(if ({cond}) {then} else {other})"))
            }
            HirExpr::Yield(_) | HirExpr::YieldFrom(_) => {
                // Yields are rewritten by the generator lowering before
                // expressions are emitted; a stray one is a bug upstream.
                anyhow::bail!("internal invariant breach: yield outside generator lowering")
            }
            HirExpr::Await(inner) => {
                // Awaited work runs eagerly in both async modes; ordering
                // is preserved by sequential emission.
                self.emit_expr(inner)
            }
            HirExpr::FString(parts) => self.emit_fstring(parts),
            HirExpr::Starred(inner) => self.emit_expr(inner),
            HirExpr::NamedExpr { target, value } => {
                let name = self.ident(target);
                let val = self.emit_expr(value)?;
                let label = self.fresh_label();
                Ok(format!(
                    "{label}: {{ {name} = {val}; break :{label} {name}; }}"
                ))
            }
            HirExpr::Unsupported(reason) => {
                self.warn(format!("unsupported construct lowered to marker: {reason}"));
                Ok(format!(
                    "py.unsupported(\"{}\")",
                    escape_string(reason)
                ))
            }
        }
    }

    pub(crate) fn emit_all(&mut self, exprs: &[HirExpr]) -> Result<Vec<String>> {
        exprs.iter().map(|e| self.emit_expr(e)).collect()
    }

    fn emit_literal(&mut self, lit: &Literal) -> Result<String> {
        Ok(match lit {
            Literal::Int(v) => v.to_string(),
            Literal::BigInt(digits) => {
                self.propagate(format!("py.big.parse(__alloc, \"{digits}\")"))
            }
            Literal::Float(f) => format_float(*f),
            Literal::Str(s) => format!("\"{}\"", escape_string(s)),
            Literal::Bytes(b) => format!("\"{}\"", escape_bytes(b)),
            Literal::Bool(b) => b.to_string(),
            Literal::None => "null".to_string(),
            Literal::Ellipsis => "py.ellipsis".to_string(),
        })
    }

    fn emit_var(&mut self, name: &str) -> String {
        for (from, to) in self.name_subst.iter().rev() {
            if from == name {
                return to.clone();
            }
        }
        if self.global_decls.contains(name) && self.file_scope_names.contains(name) {
            return name.to_string();
        }
        self.read_ident(name)
    }

    fn emit_binary(&mut self, op: BinOp, left: &HirExpr, right: &HirExpr) -> Result<String> {
        let lt = self.expr_type(left);
        let rt = self.expr_type(right);
        let l = self.emit_expr(left)?;
        let r = self.emit_expr(right)?;

        let big = |t: &NativeType| {
            matches!(t, NativeType::Int(IntKind::Unbounded) | NativeType::BigInt)
        };
        if big(&lt) || big(&rt) || promotes_to_big(op, &lt, right) {
            let helper = match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
                BinOp::FloorDiv | BinOp::Div => "div",
                BinOp::Mod => "mod",
                BinOp::Pow => "pow",
                BinOp::LShift => "shl",
                BinOp::RShift => "shr",
                _ => "binop",
            };
            return Ok(self.propagate(format!("py.big.{helper}(__alloc, {l}, {r})")));
        }

        if lt.is_string() || rt.is_string() {
            return Ok(match op {
                BinOp::Add => self.propagate(format!("py.str.concat(__alloc, {l}, {r})")),
                BinOp::Mul if lt.is_string() => {
                    self.propagate(format!("py.str.repeat(__alloc, {l}, {r})"))
                }
                BinOp::Mul => self.propagate(format!("py.str.repeat(__alloc, {r}, {l})")),
                // printf-style formatting.
                BinOp::Mod => self.propagate(format!("py.str.interp(__alloc, {l}, {r})")),
                _ => {
                    self.warn(format!("operator {op:?} unsupported on strings"));
                    "py.unsupported(\"string operator\")".to_string()
                }
            });
        }

        if matches!(lt, NativeType::List(_)) || matches!(rt, NativeType::List(_)) {
            return Ok(match op {
                BinOp::Add => self.propagate(format!("py.list.concat(__alloc, {l}, {r})")),
                BinOp::Mul if matches!(lt, NativeType::List(_)) => {
                    self.propagate(format!("py.list.repeat(__alloc, {l}, {r})"))
                }
                BinOp::Mul => self.propagate(format!("py.list.repeat(__alloc, {r}, {l})")),
                _ => {
                    self.warn(format!("operator {op:?} unsupported on lists"));
                    "py.unsupported(\"list operator\")".to_string()
                }
            });
        }

        // Class instances dispatch through their operator methods.
        if let NativeType::ClassInstance(class) = &lt {
            if let Some(method) = operator_method(op) {
                return self.emit_operator_dispatch(class, method, &l, &r);
            }
        }

        let float_mix = matches!(lt, NativeType::Float) != matches!(rt, NativeType::Float);
        let (l, r) = if float_mix && matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul) {
            if matches!(lt, NativeType::Float) {
                (l, format!("py.floatOf({r})"))
            } else {
                (format!("py.floatOf({l})"), r)
            }
        } else {
            (l, r)
        };

        Ok(match op {
            BinOp::Add => format!("({l} + {r})"),
            BinOp::Sub => format!("({l} - {r})"),
            BinOp::Mul => format!("({l} * {r})"),
            BinOp::Div => format!("py.div({l}, {r})"),
            BinOp::FloorDiv => format!("py.floorDiv({l}, {r})"),
            BinOp::Mod => format!("py.mod({l}, {r})"),
            BinOp::Pow => format!("py.pow({l}, {r})"),
            // The target's shift operator wants a narrow unsigned RHS.
            BinOp::LShift => format!("({l} << @intCast({r}))"),
            BinOp::RShift => format!("({l} >> @intCast({r}))"),
            BinOp::BitAnd => format!("({l} & {r})"),
            BinOp::BitOr => format!("({l} | {r})"),
            BinOp::BitXor => format!("({l} ^ {r})"),
            BinOp::MatMul => {
                self.warn("matrix multiplication is not supported".to_string());
                "py.unsupported(\"matmul\")".to_string()
            }
        })
    }

    /// `a + b` on class instances: `__iadd__`-style augmented dispatch is
    /// handled by assignment emission; plain operators call the matching
    /// dunder. Nested shapes go through a compile-time declaration check.
    fn emit_operator_dispatch(
        &mut self,
        class: &str,
        method: &str,
        l: &str,
        r: &str,
    ) -> Result<String> {
        let is_nested = self.classes.get(class).is_some_and(|c| c.is_nested);
        let has_method = self
            .classes
            .get(class)
            .is_some_and(|c| c.methods.contains_key(method));
        if is_nested {
            return Ok(format!(
                "(if (@hasDecl(@TypeOf({l}.*), \"{method}\")) {l}.{method}({r}) else py.unsupported(\"operator\"))"
            ));
        }
        if has_method {
            let needs_alloc = self
                .traits
                .get(&format!("{class}/{method}"))
                .is_some_and(|t| t.needs_allocator);
            let call = if needs_alloc {
                format!("{l}.{method}(__alloc, {r})")
            } else {
                format!("{l}.{method}({r})")
            };
            let can_fail = self
                .traits
                .get(&format!("{class}/{method}"))
                .is_some_and(|t| t.needs_error_union || t.needs_allocator);
            Ok(if can_fail { self.propagate(call) } else { call })
        } else {
            self.warn(format!("class {class} lacks operator method {method}"));
            Ok(format!("py.unsupported(\"{method}\")"))
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &HirExpr) -> Result<String> {
        Ok(match op {
            UnaryOp::Not => {
                let cond = self.emit_condition(operand)?;
                format!("!({cond})")
            }
            UnaryOp::Neg => format!("(-({}))", self.emit_expr(operand)?),
            UnaryOp::Pos => self.emit_expr(operand)?,
            UnaryOp::BitNot => format!("(~({}))", self.emit_expr(operand)?),
        })
    }

    fn emit_bool_op(&mut self, op: BoolOp, values: &[HirExpr]) -> Result<String> {
        let all_bool = values
            .iter()
            .all(|v| matches!(self.expr_type(v), NativeType::Bool));
        if all_bool {
            let joiner = match op {
                BoolOp::And => " and ",
                BoolOp::Or => " or ",
            };
            let parts = self.emit_all(values)?;
            return Ok(format!("({})", parts.join(joiner)));
        }
        // Value-producing `and`/`or` return an operand, not a bool.
        let mut result = self.emit_expr(values.last().expect("non-empty bool op"))?;
        for value in values.iter().rev().skip(1) {
            let cond = self.emit_condition(value)?;
            let val = self.emit_expr(value)?;
            result = match op {
                BoolOp::And => format!("(if ({cond}) {result} else {val})"),
                BoolOp::Or => format!("(if ({cond}) {val} else {result})"),
            };
        }
        Ok(result)
    }

    fn emit_compare(
        &mut self,
        left: &HirExpr,
        ops: &[CmpOp],
        comparators: &[HirExpr],
    ) -> Result<String> {
        if ops.len() == 1 {
            return self.emit_single_compare(left, ops[0], &comparators[0]);
        }
        // Chained comparison: middle operands evaluate exactly once.
        let label = self.fresh_label();
        let mut setup = Vec::new();
        let mut names = vec![self.emit_expr(left)?];
        for comparator in comparators {
            let tmp = self.fresh_temp("cmp");
            let value = self.emit_expr(comparator)?;
            setup.push(format!("const {tmp} = {value};"));
            names.push(tmp);
        }
        let mut clauses = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            clauses.push(self.compare_text(*op, &names[i], &names[i + 1], &NativeType::Unknown));
        }
        Ok(format!(
            "{label}: {{ {} break :{label} ({}); }}",
            setup.join(" "),
            clauses.join(" and ")
        ))
    }

    fn emit_single_compare(
        &mut self,
        left: &HirExpr,
        op: CmpOp,
        right: &HirExpr,
    ) -> Result<String> {
        let lt = self.expr_type(left);
        let rt = self.expr_type(right);

        // `x is None` / `x == None` on optionals.
        if matches!(right, HirExpr::Literal(Literal::None)) {
            let l = self.emit_expr(left)?;
            return Ok(match op {
                CmpOp::Is | CmpOp::Eq => format!("({l} == null)"),
                CmpOp::IsNot | CmpOp::NotEq => format!("({l} != null)"),
                _ => format!("({l} == null)"),
            });
        }

        if matches!(op, CmpOp::In | CmpOp::NotIn) {
            let needle = self.emit_expr(left)?;
            let haystack = self.emit_expr(right)?;
            let test = match rt {
                NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) => {
                    format!("{haystack}.contains({needle})")
                }
                NativeType::Str(_) => format!("py.str.contains({haystack}, {needle})"),
                NativeType::List(_) => format!("py.contains({haystack}.items, {needle})"),
                NativeType::Set(_) => format!("{haystack}.contains({needle})"),
                _ => format!("py.contains({haystack}, {needle})"),
            };
            return Ok(if op == CmpOp::NotIn {
                format!("!({test})")
            } else {
                format!("({test})")
            });
        }

        let l = self.emit_expr(left)?;
        let r = self.emit_expr(right)?;
        let merged = zigpyler_hir::widen(&lt, &rt);
        Ok(self.compare_text(op, &l, &r, &merged))
    }

    fn compare_text(&self, op: CmpOp, l: &str, r: &str, ty: &NativeType) -> String {
        if ty.is_string() {
            return match op {
                CmpOp::Eq | CmpOp::Is => format!("py.str.eql({l}, {r})"),
                CmpOp::NotEq | CmpOp::IsNot => format!("!py.str.eql({l}, {r})"),
                CmpOp::Lt => format!("(py.str.cmp({l}, {r}) == .lt)"),
                CmpOp::LtEq => format!("(py.str.cmp({l}, {r}) != .gt)"),
                CmpOp::Gt => format!("(py.str.cmp({l}, {r}) == .gt)"),
                CmpOp::GtEq => format!("(py.str.cmp({l}, {r}) != .lt)"),
                _ => format!("py.str.eql({l}, {r})"),
            };
        }
        let symbol = match op {
            CmpOp::Eq | CmpOp::Is => "==",
            CmpOp::NotEq | CmpOp::IsNot => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::In | CmpOp::NotIn => "==",
        };
        format!("({l} {symbol} {r})")
    }

    /// Coerce an expression into a boolean per source-language
    /// truthiness.
    pub(crate) fn emit_condition(&mut self, expr: &HirExpr) -> Result<String> {
        let ty = self.expr_type(expr);
        match ty {
            NativeType::Bool => self.emit_expr(expr),
            NativeType::Int(IntKind::Bounded) | NativeType::Unknown => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("({inner} != 0)"))
            }
            NativeType::Float => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("({inner} != 0.0)"))
            }
            NativeType::Str(_) | NativeType::Bytes => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("({inner}.len != 0)"))
            }
            NativeType::List(_) => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("({inner}.items.len != 0)"))
            }
            NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) | NativeType::Set(_) => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("({inner}.count() != 0)"))
            }
            NativeType::Optional(_) | NativeType::None => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("({inner} != null)"))
            }
            _ => {
                let inner = self.emit_expr(expr)?;
                Ok(format!("py.truthy({inner})"))
            }
        }
    }

    fn emit_index(&mut self, base: &HirExpr, index: &HirExpr) -> Result<String> {
        let base_ty = self.expr_type(base);
        let b = self.emit_expr(base)?;
        match &base_ty {
            NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) => {
                let i = self.emit_expr(index)?;
                Ok(format!("{b}.get({i}).?"))
            }
            NativeType::Counter => {
                let i = self.emit_expr(index)?;
                Ok(format!("{b}.get({i})"))
            }
            NativeType::Tuple(_) => {
                let i = self.emit_expr(index)?;
                Ok(format!("{b}[{i}]"))
            }
            NativeType::List(_) => {
                let i = self.emit_expr(index)?;
                Ok(format!("{b}.items[py.idx({b}.items.len, {i})]"))
            }
            NativeType::Str(_) => {
                let i = self.emit_expr(index)?;
                Ok(format!("py.str.at({b}, {i})"))
            }
            NativeType::Array(_, _) | NativeType::Bytes => {
                let i = self.emit_expr(index)?;
                Ok(format!("{b}[py.idx({b}.len, {i})]"))
            }
            NativeType::PyValue => {
                let i = self.emit_expr(index)?;
                Ok(self.propagate(format!("py.getItem({b}, {i})")))
            }
            _ => {
                let i = self.emit_expr(index)?;
                Ok(format!("{b}.items[py.idx({b}.items.len, {i})]"))
            }
        }
    }

    fn emit_slice(
        &mut self,
        base: &HirExpr,
        lower: Option<&HirExpr>,
        upper: Option<&HirExpr>,
        step: Option<&HirExpr>,
    ) -> Result<String> {
        let base_ty = self.expr_type(base);
        let b = self.emit_expr(base)?;
        let lo = match lower {
            Some(e) => self.emit_expr(e)?,
            None => "null".to_string(),
        };
        let hi = match upper {
            Some(e) => self.emit_expr(e)?,
            None => "null".to_string(),
        };
        let st = match step {
            Some(e) => self.emit_expr(e)?,
            None => "null".to_string(),
        };
        match base_ty {
            NativeType::Str(_) | NativeType::Bytes => {
                Ok(format!("py.str.slice({b}, {lo}, {hi}, {st})"))
            }
            NativeType::List(_) => {
                Ok(self.propagate(format!("py.list.slice(__alloc, {b}, {lo}, {hi}, {st})")))
            }
            _ => Ok(self.propagate(format!("py.list.slice(__alloc, {b}, {lo}, {hi}, {st})"))),
        }
    }

    fn emit_attribute(&mut self, value: &HirExpr, attr: &str) -> Result<String> {
        // Module attribute reads resolve through the import registry.
        if let Some(dotted) = (HirExpr::Attribute {
            value: Box::new(value.clone()),
            attr: attr.to_string(),
        })
        .dotted_name()
        {
            if let Some(root) = dotted.split('.').next() {
                if self.import_aliases.contains_key(root) && !self.is_local_name(root) {
                    let resolved = self.resolve_dotted(&dotted);
                    if let Some(meta) = self.imports.function(&resolved) {
                        return Ok(meta.runtime_name.clone());
                    }
                    if let Some(module) = self.imports.module(resolved.split('.').next().unwrap_or(""))
                    {
                        let rest = resolved.split_once('.').map(|(_, r)| r).unwrap_or("");
                        return Ok(if rest.is_empty() {
                            module.runtime_namespace.clone()
                        } else {
                            format!("{}.{rest}", module.runtime_namespace)
                        });
                    }
                }
            }
        }

        let recv_ty = self.expr_type(value);
        let v = self.emit_expr(value)?;
        if let NativeType::ClassInstance(class) = &recv_ty {
            if let Some(info) = self.classes.get(class) {
                if info.is_dynamic_field(attr) {
                    return Ok(format!("{v}.__dict.get(\"{attr}\").?"));
                }
                // Property reads lower to method calls.
                if info.methods.contains_key(attr) && !info.fields.contains_key(attr) {
                    let is_property = self
                        .classes
                        .hir(class)
                        .and_then(|c| c.method(attr))
                        .is_some_and(|m| m.has_decorator("property"));
                    if is_property {
                        return Ok(format!("{v}.{attr}()"));
                    }
                }
            }
        }
        Ok(format!("{v}.{attr}"))
    }

    fn emit_list_literal(&mut self, items: &[HirExpr]) -> Result<String> {
        let elem_ty = self.elements_type(items);
        let zig_elem = self.zig_type(&elem_ty.refined());
        let label = self.fresh_label();
        let tmp = self.fresh_temp("list");
        let mut body = format!("var {tmp} = std.ArrayList({zig_elem}).init(__alloc); ");
        for item in items {
            let value = self.emit_expr(item)?;
            let append = self.propagate(format!("{tmp}.append({value})"));
            body.push_str(&format!("{append}; "));
        }
        Ok(format!("{label}: {{ {body}break :{label} {tmp}; }}"))
    }

    fn emit_set_literal(&mut self, items: &[HirExpr]) -> Result<String> {
        let elem_ty = self.elements_type(items);
        let zig_elem = self.zig_type(&elem_ty.refined());
        let label = self.fresh_label();
        let tmp = self.fresh_temp("set");
        let mut body = format!("var {tmp} = py.Set({zig_elem}).init(__alloc); ");
        for item in items {
            let value = self.emit_expr(item)?;
            let add = self.propagate(format!("{tmp}.add({value})"));
            body.push_str(&format!("{add}; "));
        }
        Ok(format!("{label}: {{ {body}break :{label} {tmp}; }}"))
    }

    fn emit_dict_literal(&mut self, items: &[(HirExpr, HirExpr)]) -> Result<String> {
        let key_ty = self.elements_type_of(items.iter().map(|(k, _)| k));
        let value_ty = self.elements_type_of(items.iter().map(|(_, v)| v));
        let dict_ty = self.zig_type(&NativeType::dict_of(key_ty, value_ty).refined());
        let label = self.fresh_label();
        let tmp = self.fresh_temp("dict");
        let mut body = format!("var {tmp} = {dict_ty}.init(__alloc); ");
        for (key, value) in items {
            let k = self.emit_expr(key)?;
            let v = self.emit_expr(value)?;
            let put = self.propagate(format!("{tmp}.put({k}, {v})"));
            body.push_str(&format!("{put}; "));
        }
        Ok(format!("{label}: {{ {body}break :{label} {tmp}; }}"))
    }

    /// Comprehensions lower to eager builder loops inside a labeled
    /// block.
    fn emit_list_comp(
        &mut self,
        element: &HirExpr,
        generators: &[Comprehension],
    ) -> Result<String> {
        let elem_ty = self.expr_type(element);
        let zig_elem = self.zig_type(&elem_ty.refined());
        let tmp = self.fresh_temp("comp");
        let label = self.fresh_label();
        let head = format!("var {tmp} = std.ArrayList({zig_elem}).init(__alloc); ");
        let push = {
            let value = self.emit_expr(element)?;
            let append = self.propagate(format!("{tmp}.append({value})"));
            format!("{append};")
        };
        let loops = self.emit_comp_loops(generators, &push)?;
        Ok(format!("{label}: {{ {head}{loops} break :{label} {tmp}; }}"))
    }

    fn emit_set_comp(
        &mut self,
        element: &HirExpr,
        generators: &[Comprehension],
    ) -> Result<String> {
        let elem_ty = self.expr_type(element);
        let zig_elem = self.zig_type(&elem_ty.refined());
        let tmp = self.fresh_temp("comp");
        let label = self.fresh_label();
        let head = format!("var {tmp} = py.Set({zig_elem}).init(__alloc); ");
        let push = {
            let value = self.emit_expr(element)?;
            let add = self.propagate(format!("{tmp}.add({value})"));
            format!("{add};")
        };
        let loops = self.emit_comp_loops(generators, &push)?;
        Ok(format!("{label}: {{ {head}{loops} break :{label} {tmp}; }}"))
    }

    fn emit_dict_comp(
        &mut self,
        key: &HirExpr,
        value: &HirExpr,
        generators: &[Comprehension],
    ) -> Result<String> {
        let key_ty = self.expr_type(key);
        let value_ty = self.expr_type(value);
        let dict_ty = self.zig_type(&NativeType::dict_of(key_ty, value_ty).refined());
        let tmp = self.fresh_temp("comp");
        let label = self.fresh_label();
        let head = format!("var {tmp} = {dict_ty}.init(__alloc); ");
        let push = {
            let k = self.emit_expr(key)?;
            let v = self.emit_expr(value)?;
            let put = self.propagate(format!("{tmp}.put({k}, {v})"));
            format!("{put};")
        };
        let loops = self.emit_comp_loops(generators, &push)?;
        Ok(format!("{label}: {{ {head}{loops} break :{label} {tmp}; }}"))
    }

    /// Nest the generator clauses around the innermost `push` statement,
    /// innermost-first.
    fn emit_comp_loops(&mut self, generators: &[Comprehension], push: &str) -> Result<String> {
        let mut body = push.to_string();
        for generator in generators.iter().rev() {
            for cond in generator.ifs.iter().rev() {
                let test = self.emit_condition(cond)?;
                body = format!("if ({test}) {{ {body} }}");
            }
            body = self.emit_inline_for(&generator.target, &generator.iter, &body)?;
        }
        Ok(body)
    }

    /// A single-line `for`/`while` loop for comprehension lowering.
    fn emit_inline_for(
        &mut self,
        target: &zigpyler_hir::AssignTarget,
        iter: &HirExpr,
        body: &str,
    ) -> Result<String> {
        let target_name = match target.as_symbol() {
            Some(name) => self.ident(name),
            None => self.fresh_temp("it"),
        };
        // Range iterations become counted loops.
        if let HirExpr::Call { func, args, .. } = iter {
            if matches!(&**func, HirExpr::Var(n) if n == "range") {
                let (start, stop, step) = self.range_parts(args)?;
                let i = self.fresh_temp("i");
                return Ok(format!(
                    "var {i}: i64 = {start}; while (py.rangeCheck({i}, {stop}, {step})) : ({i} += {step}) {{ const {target_name} = {i}; {body} }}"
                ));
            }
        }
        let iter_ty = self.expr_type(iter);
        let it = self.emit_expr(iter)?;
        Ok(match iter_ty {
            NativeType::List(_) => {
                format!("for ({it}.items) |{target_name}| {{ {body} }}")
            }
            NativeType::Array(_, _) | NativeType::Bytes => {
                format!("for ({it}) |{target_name}| {{ {body} }}")
            }
            NativeType::Str(_) => {
                let sit = self.fresh_temp("sit");
                format!(
                    "var {sit} = py.str.iter({it}); while ({sit}.next()) |{target_name}| {{ {body} }}"
                )
            }
            NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) => {
                let kit = self.fresh_temp("kit");
                format!(
                    "var {kit} = {it}.keyIterator(); while ({kit}.next()) |__kp| {{ const {target_name} = __kp.*; {body} }}"
                )
            }
            NativeType::Set(_) => {
                let kit = self.fresh_temp("kit");
                format!(
                    "var {kit} = {it}.iterator(); while ({kit}.next()) |__kp| {{ const {target_name} = __kp.*; {body} }}"
                )
            }
            _ => format!("for ({it}.items) |{target_name}| {{ {body} }}"),
        })
    }

    pub(crate) fn range_parts(&mut self, args: &[HirExpr]) -> Result<(String, String, String)> {
        Ok(match args.len() {
            1 => (
                "0".to_string(),
                self.emit_expr(&args[0])?,
                "1".to_string(),
            ),
            2 => (
                self.emit_expr(&args[0])?,
                self.emit_expr(&args[1])?,
                "1".to_string(),
            ),
            _ => (
                self.emit_expr(&args[0])?,
                self.emit_expr(&args[1])?,
                self.emit_expr(&args[2])?,
            ),
        })
    }

    /// Lambdas become closure structs capturing their free variables by
    /// value; calls go through the struct's `call` method.
    fn emit_lambda(&mut self, params: &[String], body: &HirExpr) -> Result<String> {
        let id = self.closure_counter;
        self.closure_counter += 1;
        let struct_name = format!("__Closure_{id}");
        let label = self.fresh_label();

        // Free names of the body become captured fields.
        let mut free = Vec::new();
        collect_lambda_free_names(body, params, &mut free);

        let mut fields = Vec::new();
        let mut inits = Vec::new();
        let mut substs = Vec::new();
        for name in &free {
            let ty = self.types.var_type(&self.scope, name);
            if ty.is_unknown() && !self.is_local_name(name) {
                continue;
            }
            let zig_ty = self.zig_type(&ty.refined());
            fields.push(format!("__captured_{name}: {zig_ty},"));
            let value = self.read_ident(name);
            inits.push(format!(".__captured_{name} = {value}"));
            substs.push((name.clone(), format!("__c.__captured_{name}")));
        }

        let param_list: Vec<String> = params.iter().map(|p| format!("{p}: i64")).collect();
        let ret_ty = self.zig_type(&self.expr_type(body).refined());

        let depth = self.name_subst.len();
        self.name_subst.extend(substs);
        let body_text = self.emit_expr(body)?;
        self.name_subst.truncate(depth);

        let call_sig = if param_list.is_empty() {
            format!("pub fn call(__c: *const @This()) {ret_ty}")
        } else {
            format!(
                "pub fn call(__c: *const @This(), {}) {ret_ty}",
                param_list.join(", ")
            )
        };
        Ok(format!(
            "{label}: {{ const {struct_name} = struct {{ {} {call_sig} {{ return {body_text}; }} }}; break :{label} {struct_name}{{ {} }}; }}",
            fields.join(" "),
            inits.join(", ")
        ))
    }

    fn emit_fstring(&mut self, parts: &[FStringPart]) -> Result<String> {
        let mut fmt = String::new();
        let mut args = Vec::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => fmt.push_str(&escape_string(text).replace('{', "{{").replace('}', "}}")),
                FStringPart::Expr {
                    value,
                    format_spec,
                    ..
                } => {
                    match format_spec {
                        Some(spec) => {
                            fmt.push('{');
                            fmt.push_str(spec);
                            fmt.push('}');
                        }
                        None => fmt.push_str("{}"),
                    }
                    args.push(self.emit_expr(value)?);
                }
            }
        }
        if args.is_empty() {
            // Placeholder-free f-strings degrade to plain literals.
            return Ok(format!("\"{fmt}\""));
        }
        Ok(self.propagate(format!(
            "py.fmt.format(__alloc, \"{fmt}\", .{{ {} }})",
            args.join(", ")
        )))
    }

    fn elements_type(&self, items: &[HirExpr]) -> NativeType {
        self.elements_type_of(items.iter())
    }

    fn elements_type_of<'e>(
        &self,
        items: impl Iterator<Item = &'e HirExpr>,
    ) -> NativeType {
        let mut acc = NativeType::Unknown;
        for item in items {
            acc = zigpyler_hir::widen(&acc, &self.expr_type(item));
        }
        acc
    }

    pub(crate) fn is_local_name(&self, name: &str) -> bool {
        self.types.scoped.lookup(&self.scope, name).is_some()
    }

    pub(crate) fn resolve_dotted(&self, dotted: &str) -> String {
        match dotted.split_once('.') {
            Some((root, rest)) => match self.import_aliases.get(root) {
                Some(original) => format!("{original}.{rest}"),
                None => dotted.to_string(),
            },
            None => self
                .import_aliases
                .get(dotted)
                .cloned()
                .unwrap_or_else(|| dotted.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Read-only type queries over the frozen tables
    // ------------------------------------------------------------------

    pub(crate) fn expr_type(&self, expr: &HirExpr) -> NativeType {
        match expr {
            HirExpr::Literal(lit) => match lit {
                Literal::Int(_) => NativeType::int(),
                Literal::BigInt(_) => NativeType::BigInt,
                Literal::Float(_) => NativeType::Float,
                Literal::Str(_) => NativeType::Str(StrKind::Literal),
                Literal::Bytes(_) => NativeType::Bytes,
                Literal::Bool(_) => NativeType::Bool,
                Literal::None => NativeType::None,
                Literal::Ellipsis => NativeType::PyValue,
            },
            HirExpr::Var(name) => {
                if name == "self" {
                    if let Some(class) = &self.current_class {
                        return NativeType::ClassInstance(class.clone());
                    }
                }
                self.types.var_type(&self.scope, name)
            }
            HirExpr::Binary { op, left, right } => {
                let lt = self.expr_type(left);
                let rt = self.expr_type(right);
                if promotes_to_big(*op, &lt, right) {
                    return NativeType::Int(IntKind::Unbounded);
                }
                self.binary_type(*op, &lt, &rt)
            }
            HirExpr::Unary { op, operand } => match op {
                UnaryOp::Not => NativeType::Bool,
                UnaryOp::Neg | UnaryOp::Pos => self.expr_type(operand),
                UnaryOp::BitNot => NativeType::int(),
            },
            HirExpr::Bool { values, .. } => {
                let mut acc = NativeType::Unknown;
                let mut all_bool = true;
                for v in values {
                    let t = self.expr_type(v);
                    all_bool &= matches!(t, NativeType::Bool);
                    acc = zigpyler_hir::widen(&acc, &t);
                }
                if all_bool {
                    NativeType::Bool
                } else {
                    acc
                }
            }
            HirExpr::Compare { .. } => NativeType::Bool,
            HirExpr::Call { func, args, .. } => self.call_type(func, args),
            HirExpr::Index { base, index } => {
                let base_ty = self.expr_type(base);
                match (&base_ty, &**index) {
                    (NativeType::Tuple(elems), HirExpr::Literal(Literal::Int(i))) => elems
                        .get(usize::try_from(*i).unwrap_or(0))
                        .cloned()
                        .unwrap_or(NativeType::Unknown),
                    (NativeType::Dict(_, v) | NativeType::DefaultDict(_, v), _) => (**v).clone(),
                    (NativeType::Counter, _) => NativeType::int(),
                    (NativeType::Str(_), _) => NativeType::str_runtime(),
                    _ => base_ty.element_type(),
                }
            }
            HirExpr::Slice { base, .. } => self.expr_type(base),
            HirExpr::Attribute { value, attr } => {
                if let Some(dotted) = expr.dotted_name() {
                    if let Some(root) = dotted.split('.').next() {
                        if self.import_aliases.contains_key(root) && !self.is_local_name(root) {
                            let resolved = self.resolve_dotted(&dotted);
                            if let Some(meta) = self.imports.function(&resolved) {
                                return meta.return_type.clone();
                            }
                        }
                    }
                }
                let recv = self.expr_type(value);
                if let NativeType::ClassInstance(class) = &recv {
                    if let Some(fields) = self.types.class(class) {
                        if let Some(ty) = fields.fields.get(attr) {
                            return ty.clone();
                        }
                    }
                }
                NativeType::Unknown
            }
            HirExpr::List(items) => NativeType::List(Box::new(self.elements_type(items))),
            HirExpr::Set(items) => NativeType::Set(Box::new(self.elements_type(items))),
            HirExpr::Tuple(items) => {
                NativeType::Tuple(items.iter().map(|i| self.expr_type(i)).collect())
            }
            HirExpr::Dict(items) => NativeType::dict_of(
                self.elements_type_of(items.iter().map(|(k, _)| k)),
                self.elements_type_of(items.iter().map(|(_, v)| v)),
            ),
            HirExpr::ListComp { element, .. } | HirExpr::GeneratorExp { element, .. } => {
                NativeType::List(Box::new(self.expr_type(element)))
            }
            HirExpr::SetComp { element, .. } => {
                NativeType::Set(Box::new(self.expr_type(element)))
            }
            HirExpr::DictComp { key, value, .. } => {
                NativeType::dict_of(self.expr_type(key), self.expr_type(value))
            }
            HirExpr::Lambda { .. } => NativeType::Callable,
            HirExpr::IfExp { body, orelse, .. } => {
                zigpyler_hir::widen(&self.expr_type(body), &self.expr_type(orelse))
            }
            HirExpr::Yield(_) | HirExpr::YieldFrom(_) => NativeType::None,
            HirExpr::Await(inner) => self.expr_type(inner),
            HirExpr::FString(_) => NativeType::str_runtime(),
            HirExpr::Starred(inner) => self.expr_type(inner),
            HirExpr::NamedExpr { value, .. } => self.expr_type(value),
            HirExpr::Unsupported(_) => NativeType::PyValue,
        }
    }

    fn binary_type(&self, op: BinOp, lt: &NativeType, rt: &NativeType) -> NativeType {
        use NativeType::{BigInt, Bool, Float, Int, List, Str};
        let big = matches!(lt, Int(IntKind::Unbounded) | BigInt)
            || matches!(rt, Int(IntKind::Unbounded) | BigInt);
        match op {
            BinOp::Div => Float,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Mod | BinOp::FloorDiv | BinOp::Pow => {
                if matches!(op, BinOp::Add | BinOp::Mod) && (lt.is_string() || rt.is_string()) {
                    return NativeType::str_runtime();
                }
                if op == BinOp::Mul && (lt.is_string() || rt.is_string()) {
                    return NativeType::str_runtime();
                }
                if let (List(a), List(b)) = (lt, rt) {
                    return List(Box::new(zigpyler_hir::widen(a, b)));
                }
                if let (List(a), _) | (_, List(a)) = (lt, rt) {
                    return List(a.clone());
                }
                if big {
                    return Int(IntKind::Unbounded);
                }
                if matches!(lt, Float) || matches!(rt, Float) {
                    return Float;
                }
                if matches!(lt, Int(_) | Bool) && matches!(rt, Int(_) | Bool) {
                    return NativeType::int();
                }
                lt.clone()
            }
            BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                if big {
                    Int(IntKind::Unbounded)
                } else if matches!((lt, rt), (NativeType::Set(_), NativeType::Set(_))) {
                    lt.clone()
                } else {
                    NativeType::int()
                }
            }
            BinOp::MatMul => lt.clone(),
        }
    }

    /// Return type for a call expression, mirroring the inferrer's
    /// resolution order: user classes, user functions, import registry,
    /// builtin and method tables.
    pub(crate) fn call_type(&self, func: &HirExpr, args: &[HirExpr]) -> NativeType {
        let arg_types: Vec<NativeType> = args.iter().map(|a| self.expr_type(a)).collect();
        match func {
            HirExpr::Var(name) => {
                if self.classes.contains(name) {
                    return NativeType::ClassInstance(name.clone());
                }
                if let Some(path) = self.resolve_fn_path(name) {
                    if let Some(ret) = self.types.return_type(&path) {
                        return ret.clone();
                    }
                    return NativeType::None;
                }
                if let Some(original) = self.import_aliases.get(name) {
                    if let Some(meta) = self.imports.function(original) {
                        return meta.return_type.clone();
                    }
                }
                builtin_call_type(name, &arg_types)
            }
            HirExpr::Attribute { value, attr } => {
                if let Some(dotted) = func.dotted_name() {
                    if let Some(root) = dotted.split('.').next() {
                        if self.import_aliases.contains_key(root) && !self.is_local_name(root) {
                            let resolved = self.resolve_dotted(&dotted);
                            if let Some(meta) = self.imports.function(&resolved) {
                                return meta.return_type.clone();
                            }
                        }
                    }
                }
                let recv = self.expr_type(value);
                if let NativeType::ClassInstance(class) = &recv {
                    if let Some(info) = self.classes.get(class) {
                        if let Some(ret) = info.methods.get(attr) {
                            return ret.clone();
                        }
                    }
                }
                method_call_type(&recv, attr, &arg_types)
            }
            _ => NativeType::Unknown,
        }
    }

    /// Resolve a called simple name to a known function scope path.
    pub(crate) fn resolve_fn_path(&self, name: &str) -> Option<String> {
        let mut scope = self.scope.clone();
        loop {
            let candidate = zigpyler_hir::scope::child_scope(&scope, name);
            if self.types.return_type(&candidate).is_some()
                || self.types.call_args.contains_key(&candidate)
                || self.traits.get(&candidate).is_some()
            {
                return Some(candidate);
            }
            if scope.is_empty() {
                return None;
            }
            scope = zigpyler_hir::scope::parent_scope(&scope)
                .unwrap_or("")
                .to_string();
        }
    }
}

/// Shift amounts of 63+ and integer powers with exponents of 20+
/// overflow 64-bit storage and promote to big-integer arithmetic.
fn promotes_to_big(op: BinOp, left: &NativeType, rhs: &HirExpr) -> bool {
    if !matches!(left, NativeType::Int(_) | NativeType::Unknown) {
        return false;
    }
    match (op, rhs) {
        (BinOp::LShift, HirExpr::Literal(Literal::Int(amount))) => *amount >= 63,
        (BinOp::Pow, HirExpr::Literal(Literal::Int(exp))) => *exp >= 20,
        _ => false,
    }
}

fn operator_method(op: BinOp) -> Option<&'static str> {
    Some(match op {
        BinOp::Add => "__add__",
        BinOp::Sub => "__sub__",
        BinOp::Mul => "__mul__",
        BinOp::Div => "__truediv__",
        BinOp::FloorDiv => "__floordiv__",
        BinOp::Mod => "__mod__",
        BinOp::Pow => "__pow__",
        _ => return None,
    })
}

fn collect_lambda_free_names(expr: &HirExpr, params: &[String], out: &mut Vec<String>) {
    match expr {
        HirExpr::Var(name) => {
            if !params.contains(name) && !out.contains(name) {
                out.push(name.clone());
            }
        }
        HirExpr::Binary { left, right, .. } => {
            collect_lambda_free_names(left, params, out);
            collect_lambda_free_names(right, params, out);
        }
        HirExpr::Unary { operand, .. } => collect_lambda_free_names(operand, params, out),
        HirExpr::Bool { values, .. } => {
            values
                .iter()
                .for_each(|v| collect_lambda_free_names(v, params, out));
        }
        HirExpr::Compare {
            left, comparators, ..
        } => {
            collect_lambda_free_names(left, params, out);
            comparators
                .iter()
                .for_each(|c| collect_lambda_free_names(c, params, out));
        }
        HirExpr::Call { func, args, kwargs } => {
            collect_lambda_free_names(func, params, out);
            args.iter()
                .for_each(|a| collect_lambda_free_names(a, params, out));
            kwargs
                .iter()
                .for_each(|k| collect_lambda_free_names(&k.value, params, out));
        }
        HirExpr::Index { base, index } => {
            collect_lambda_free_names(base, params, out);
            collect_lambda_free_names(index, params, out);
        }
        HirExpr::Attribute { value, .. } => collect_lambda_free_names(value, params, out),
        HirExpr::IfExp {
            test,
            body,
            orelse,
        } => {
            collect_lambda_free_names(test, params, out);
            collect_lambda_free_names(body, params, out);
            collect_lambda_free_names(orelse, params, out);
        }
        HirExpr::List(items) | HirExpr::Tuple(items) | HirExpr::Set(items) => {
            items
                .iter()
                .for_each(|i| collect_lambda_free_names(i, params, out));
        }
        _ => {}
    }
}

pub(crate) fn format_float(f: f64) -> String {
    // The debug formatter keeps a trailing `.0` on whole numbers, which
    // is exactly the target's float-literal shape.
    format!("{f:?}")
}

pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b if *b < 0x20 || *b > 0x7e => out.push_str(&format!("\\x{b:02x}")),
            b => out.push(*b as char),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting_keeps_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
    }

    #[test]
    fn string_escaping() {
        assert_eq!(escape_string("a\"b"), "a\\\"b");
        assert_eq!(escape_string("line\nnext"), "line\\nnext");
        assert_eq!(escape_string("tab\there"), "tab\\there");
    }

    #[test]
    fn operator_method_table() {
        assert_eq!(operator_method(BinOp::Add), Some("__add__"));
        assert_eq!(operator_method(BinOp::FloorDiv), Some("__floordiv__"));
        assert_eq!(operator_method(BinOp::BitAnd), None);
    }
}
