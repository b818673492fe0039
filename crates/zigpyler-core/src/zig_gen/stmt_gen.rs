//! Statement emission (component E, statement half): control flow,
//! iteration dispatch, exception lowering, context managers, and the
//! expression-statement discard policy.

use anyhow::Result;
use zigpyler_hir::{AssignTarget, ExceptHandler, HirExpr, HirStmt, Literal, NativeType, WithItem};

use super::callable::is_stripped_super_stmt;
use super::context::{CatchCtx, ZigBackend};

impl ZigBackend<'_> {
    pub(crate) fn emit_body(&mut self, body: &[HirStmt]) -> Result<()> {
        for stmt in body {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    pub(crate) fn emit_stmt(&mut self, stmt: &HirStmt) -> Result<()> {
        match stmt {
            HirStmt::Assign { targets, value } => self.emit_assign(targets, value),
            HirStmt::AnnAssign {
                target,
                annotation,
                value,
            } => self.emit_ann_assign(target, annotation, value.as_ref()),
            HirStmt::AugAssign { target, op, value } => self.emit_aug_assign(target, *op, value),
            HirStmt::Return(value) => self.emit_return(value.as_ref()),
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => self.emit_if(condition, then_body, else_body.as_deref()),
            HirStmt::While {
                condition,
                body,
                orelse,
            } => self.emit_while(condition, body, orelse),
            HirStmt::For {
                target,
                iter,
                body,
                orelse,
            } => self.emit_for(target, iter, body, orelse),
            HirStmt::Expr(expr) => self.emit_expr_stmt(expr),
            HirStmt::Raise { exc, cause } => self.emit_raise(exc.as_ref(), cause.as_ref()),
            HirStmt::Assert { test, msg } => self.emit_assert(test, msg.as_ref()),
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.emit_try(body, handlers, orelse, finalbody),
            HirStmt::With { items, body } => self.emit_with(items, body),
            HirStmt::Break => {
                if let Some(flag) = self.loop_else_flag.clone() {
                    self.out.line(&format!("{flag} = false;"));
                }
                self.out.line("break;");
                Ok(())
            }
            HirStmt::Continue => {
                self.out.line("continue;");
                Ok(())
            }
            HirStmt::Pass => Ok(()),
            HirStmt::Global(names) => {
                for name in names {
                    self.global_decls.insert(name.clone());
                }
                Ok(())
            }
            HirStmt::Nonlocal(names) => {
                self.warn(format!(
                    "nonlocal rebinding is not supported ({})",
                    names.join(", ")
                ));
                Ok(())
            }
            HirStmt::Delete(targets) => self.emit_delete(targets),
            HirStmt::FunctionDef(func) => self.emit_nested_function(func),
            HirStmt::ClassDef(class) => {
                // Function-local classes are hoisted to file scope (a
                // signature could not name a local type); the definition
                // site only claims the name.
                self.declared.declare(&class.name);
                Ok(())
            }
            HirStmt::Unsupported(reason) => {
                self.warn(format!("unsupported construct lowered to marker: {reason}"));
                self.out.line(&format!(
                    "_ = py.unsupported(\"{}\");",
                    super::expr_gen::escape_string(reason)
                ));
                Ok(())
            }
        }
    }

    fn emit_ann_assign(
        &mut self,
        target: &AssignTarget,
        annotation: &NativeType,
        value: Option<&HirExpr>,
    ) -> Result<()> {
        let AssignTarget::Symbol(name) = target else {
            // Annotated element/attribute stores behave like plain ones.
            if let Some(v) = value {
                return self.emit_assign(std::slice::from_ref(target), v);
            }
            return Ok(());
        };
        let ident = self.ident(name);
        let zig_ty = self.zig_type(&annotation.refined());
        match value {
            Some(v) => {
                if self.declared.is_declared(&ident) {
                    let text = self.emit_expr(v)?;
                    self.out.line(&format!("{ident} = {text};"));
                } else {
                    let usage = self.usage.usage(&self.scope, name);
                    let keyword = if usage.is_mutated { "var" } else { "const" };
                    let text = self.emit_expr(v)?;
                    self.declared.declare(&ident);
                    self.out
                        .line(&format!("{keyword} {ident}: {zig_ty} = {text};"));
                }
            }
            None => {
                self.declared.declare(&ident);
                self.out.line(&format!("var {ident}: {zig_ty} = undefined;"));
            }
        }
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&HirExpr>) -> Result<()> {
        if self.in_generator {
            let acc = self.yield_acc.clone();
            self.out.line(&format!("return {acc};"));
            return Ok(());
        }
        match value {
            Some(HirExpr::Literal(Literal::None)) | None => {
                self.out.line("return;");
            }
            Some(v) => {
                let text = self.emit_expr(v)?;
                self.out.line(&format!("return {text};"));
            }
        }
        Ok(())
    }

    fn emit_if(
        &mut self,
        condition: &HirExpr,
        then_body: &[HirStmt],
        else_body: Option<&[HirStmt]>,
    ) -> Result<()> {
        let cond = self.emit_condition(condition)?;
        self.out.open(&format!("if ({cond})"));
        self.declared.enter();
        self.emit_body(then_body)?;
        self.declared.exit();
        self.emit_else_chain(else_body)
    }

    /// `elif` chains continue as `else if`; the final `else` closes the
    /// chain.
    fn emit_else_chain(&mut self, else_body: Option<&[HirStmt]>) -> Result<()> {
        match else_body {
            Some([HirStmt::If {
                condition,
                then_body,
                else_body: nested,
            }]) => {
                let cond = self.emit_condition(condition)?;
                self.out.chain(&format!("else if ({cond})"));
                self.declared.enter();
                self.emit_body(then_body)?;
                self.declared.exit();
                self.emit_else_chain(nested.as_deref())
            }
            Some(body) => {
                self.out.chain("else");
                self.declared.enter();
                self.emit_body(body)?;
                self.declared.exit();
                self.out.close();
                Ok(())
            }
            None => {
                self.out.close();
                Ok(())
            }
        }
    }

    fn emit_while(
        &mut self,
        condition: &HirExpr,
        body: &[HirStmt],
        orelse: &[HirStmt],
    ) -> Result<()> {
        let flag = if orelse.is_empty() {
            None
        } else {
            let flag = self.fresh_temp("else");
            self.out.line(&format!("var {flag} = true;"));
            Some(flag)
        };
        let cond = self.emit_condition(condition)?;
        self.out.open(&format!("while ({cond})"));
        let saved = self.loop_else_flag.take();
        self.loop_else_flag = flag.clone();
        self.declared.enter();
        self.emit_body(body)?;
        self.declared.exit();
        self.loop_else_flag = saved;
        self.out.close();
        if let Some(flag) = flag {
            self.out.open(&format!("if ({flag})"));
            self.declared.enter();
            self.emit_body(orelse)?;
            self.declared.exit();
            self.out.close();
        }
        Ok(())
    }

    /// `for` dispatches on the iterator: ranges become counted loops,
    /// containers element iteration, dict shapes iterator loops,
    /// generator results index consumption.
    fn emit_for(
        &mut self,
        target: &AssignTarget,
        iter: &HirExpr,
        body: &[HirStmt],
        orelse: &[HirStmt],
    ) -> Result<()> {
        let flag = if orelse.is_empty() {
            None
        } else {
            let flag = self.fresh_temp("else");
            self.out.line(&format!("var {flag} = true;"));
            Some(flag)
        };
        let saved = self.loop_else_flag.take();
        self.loop_else_flag = flag.clone();

        self.emit_for_dispatch(target, iter, body)?;

        self.loop_else_flag = saved;
        if let Some(flag) = flag {
            self.out.open(&format!("if ({flag})"));
            self.declared.enter();
            self.emit_body(orelse)?;
            self.declared.exit();
            self.out.close();
        }
        Ok(())
    }

    fn emit_for_dispatch(
        &mut self,
        target: &AssignTarget,
        iter: &HirExpr,
        body: &[HirStmt],
    ) -> Result<()> {
        // range(...)
        if let HirExpr::Call { func, args, .. } = iter {
            if matches!(&**func, HirExpr::Var(n) if n == "range") {
                let (start, stop, step) = self.range_parts(args)?;
                let name = match target.as_symbol() {
                    Some(n) => self.ident(n),
                    None => self.fresh_temp("i"),
                };
                self.declared.declare(&name);
                self.out.line(&format!("var {name}: i64 = {start};"));
                self.out.open(&format!(
                    "while (py.rangeCheck({name}, {stop}, {step})) : ({name} += {step})"
                ));
                self.declared.enter();
                self.emit_body(body)?;
                self.declared.exit();
                self.out.close();
                return Ok(());
            }
            // enumerate(xs)
            if matches!(&**func, HirExpr::Var(n) if n == "enumerate") {
                if let (Some(arg), AssignTarget::Tuple(parts)) = (args.first(), target) {
                    if parts.len() == 2 {
                        let seq = self.emit_iterable_slice(arg)?;
                        let idx_name = match parts[0].as_symbol() {
                            Some(n) => self.ident(n),
                            None => self.fresh_temp("i"),
                        };
                        let item_name = match parts[1].as_symbol() {
                            Some(n) => self.ident(n),
                            None => self.fresh_temp("it"),
                        };
                        self.out
                            .open(&format!("for ({seq}, 0..) |{item_name}, __enum_i|"));
                        self.declared.enter();
                        self.declared.declare(&idx_name);
                        self.declared.declare(&item_name);
                        self.out
                            .line(&format!("const {idx_name}: i64 = @intCast(__enum_i);"));
                        self.emit_body(body)?;
                        self.declared.exit();
                        self.out.close();
                        return Ok(());
                    }
                }
            }
            // zip(a, b, ...)
            if matches!(&**func, HirExpr::Var(n) if n == "zip") {
                if let AssignTarget::Tuple(parts) = target {
                    if parts.len() == args.len() {
                        let mut seqs = Vec::new();
                        for arg in args {
                            seqs.push(self.emit_iterable_slice(arg)?);
                        }
                        let names: Vec<String> = parts
                            .iter()
                            .map(|p| match p.as_symbol() {
                                Some(n) => self.ident(n),
                                None => self.fresh_temp("it"),
                            })
                            .collect();
                        self.out.open(&format!(
                            "for ({}) |{}|",
                            seqs.join(", "),
                            names.join(", ")
                        ));
                        self.declared.enter();
                        for name in &names {
                            self.declared.declare(name);
                        }
                        self.emit_body(body)?;
                        self.declared.exit();
                        self.out.close();
                        return Ok(());
                    }
                }
            }
            // dict.items() / dict.keys() / dict.values()
            if let HirExpr::Attribute { value, attr } = &**func {
                let recv_ty = self.expr_type(value);
                if matches!(
                    recv_ty,
                    NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) | NativeType::Counter
                ) {
                    let recv = self.emit_expr(value)?;
                    match attr.as_str() {
                        "items" => return self.emit_dict_entry_loop(&recv, target, body),
                        "keys" => return self.emit_dict_key_loop(&recv, target, body),
                        "values" => return self.emit_dict_value_loop(&recv, target, body),
                        _ => {}
                    }
                }
            }
        }

        let iter_ty = self.expr_type(iter);
        match &iter_ty {
            NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) | NativeType::Counter => {
                let recv = self.emit_expr(iter)?;
                self.emit_dict_key_loop(&recv, target, body)
            }
            NativeType::Set(_) => {
                let recv = self.emit_expr(iter)?;
                let it = self.fresh_temp("kit");
                self.out
                    .line(&format!("var {it} = {recv}.iterator();"));
                let name = match target.as_symbol() {
                    Some(n) => self.ident(n),
                    None => self.fresh_temp("it"),
                };
                self.out.open(&format!("while ({it}.next()) |__kp|"));
                self.declared.enter();
                self.declared.declare(&name);
                self.out.line(&format!("const {name} = __kp.*;"));
                self.emit_body(body)?;
                self.declared.exit();
                self.out.close();
                Ok(())
            }
            NativeType::Str(_) => {
                let recv = self.emit_expr(iter)?;
                let it = self.fresh_temp("sit");
                self.out.line(&format!("var {it} = py.str.iter({recv});"));
                let name = match target.as_symbol() {
                    Some(n) => self.ident(n),
                    None => self.fresh_temp("ch"),
                };
                self.out.open(&format!("while ({it}.next()) |{name}|"));
                self.declared.enter();
                self.declared.declare(&name);
                self.emit_body(body)?;
                self.declared.exit();
                self.out.close();
                Ok(())
            }
            _ => {
                let seq = self.emit_iterable_slice(iter)?;
                match target {
                    AssignTarget::Tuple(parts) => {
                        // Sequence of tuples: positional unpack per item.
                        let tmp = self.fresh_temp("t");
                        self.out.open(&format!("for ({seq}) |{tmp}|"));
                        self.declared.enter();
                        for (i, part) in parts.iter().enumerate() {
                            match part.as_symbol() {
                                Some("_") => self.out.line(&format!("_ = {tmp}[{i}];")),
                                Some(n) => {
                                    let ident = self.ident(n);
                                    self.declared.declare(&ident);
                                    self.out.line(&format!("const {ident} = {tmp}[{i}];"));
                                }
                                None => self.out.line(&format!("_ = {tmp}[{i}];")),
                            }
                        }
                        self.emit_body(body)?;
                        self.declared.exit();
                        self.out.close();
                        Ok(())
                    }
                    other => {
                        let name = match other.as_symbol() {
                            Some(n) => self.ident(n),
                            None => self.fresh_temp("it"),
                        };
                        self.out.open(&format!("for ({seq}) |{name}|"));
                        self.declared.enter();
                        self.declared.declare(&name);
                        self.emit_body(body)?;
                        self.declared.exit();
                        self.out.close();
                        Ok(())
                    }
                }
            }
        }
    }

    /// Expression text for the slice a `for` loop walks.
    fn emit_iterable_slice(&mut self, iter: &HirExpr) -> Result<String> {
        let ty = self.expr_type(iter);
        let text = self.emit_expr(iter)?;
        Ok(match ty {
            NativeType::List(_) | NativeType::Deque(_) => format!("{text}.items"),
            NativeType::Array(_, _) | NativeType::Bytes => text,
            // Generator objects are eager sequences consumed by index.
            NativeType::Unknown => format!("{text}.items"),
            _ => format!("{text}.items"),
        })
    }

    fn emit_dict_entry_loop(
        &mut self,
        recv: &str,
        target: &AssignTarget,
        body: &[HirStmt],
    ) -> Result<()> {
        let it = self.fresh_temp("dit");
        self.out.line(&format!("var {it} = {recv}.iterator();"));
        self.out.open(&format!("while ({it}.next()) |__entry|"));
        self.declared.enter();
        if let AssignTarget::Tuple(parts) = target {
            if parts.len() == 2 {
                if let Some(k) = parts[0].as_symbol() {
                    let k = self.ident(k);
                    self.declared.declare(&k);
                    self.out.line(&format!("const {k} = __entry.key_ptr.*;"));
                }
                if let Some(v) = parts[1].as_symbol() {
                    let v = self.ident(v);
                    self.declared.declare(&v);
                    self.out.line(&format!("const {v} = __entry.value_ptr.*;"));
                }
            }
        } else if let Some(name) = target.as_symbol() {
            let n = self.ident(name);
            self.declared.declare(&n);
            self.out.line(&format!(
                "const {n} = .{{ __entry.key_ptr.*, __entry.value_ptr.* }};"
            ));
        }
        self.emit_body(body)?;
        self.declared.exit();
        self.out.close();
        Ok(())
    }

    fn emit_dict_key_loop(
        &mut self,
        recv: &str,
        target: &AssignTarget,
        body: &[HirStmt],
    ) -> Result<()> {
        let it = self.fresh_temp("kit");
        self.out.line(&format!("var {it} = {recv}.keyIterator();"));
        let name = match target.as_symbol() {
            Some(n) => self.ident(n),
            None => self.fresh_temp("k"),
        };
        self.out.open(&format!("while ({it}.next()) |__kp|"));
        self.declared.enter();
        self.declared.declare(&name);
        self.out.line(&format!("const {name} = __kp.*;"));
        self.emit_body(body)?;
        self.declared.exit();
        self.out.close();
        Ok(())
    }

    fn emit_dict_value_loop(
        &mut self,
        recv: &str,
        target: &AssignTarget,
        body: &[HirStmt],
    ) -> Result<()> {
        let it = self.fresh_temp("vit");
        self.out
            .line(&format!("var {it} = {recv}.valueIterator();"));
        let name = match target.as_symbol() {
            Some(n) => self.ident(n),
            None => self.fresh_temp("v"),
        };
        self.out.open(&format!("while ({it}.next()) |__vp|"));
        self.declared.enter();
        self.declared.declare(&name);
        self.out.line(&format!("const {name} = __vp.*;"));
        self.emit_body(body)?;
        self.declared.exit();
        self.out.close();
        Ok(())
    }

    /// Expression statements: every non-void value needs an explicit
    /// discard; generated blocks never receive the prefix.
    fn emit_expr_stmt(&mut self, expr: &HirExpr) -> Result<()> {
        // A stripped `super()` call vanishes entirely.
        if is_stripped_super_stmt(self, expr) {
            return Ok(());
        }
        // Yields inside generator bodies append to the accumulator.
        match expr {
            HirExpr::Yield(value) => {
                let acc = self.yield_acc.clone();
                let text = match value {
                    Some(v) => self.emit_expr(v)?,
                    None => "0".to_string(),
                };
                let append = self.propagate(format!("{acc}.append({text})"));
                self.out.line(&format!("{append};"));
                return Ok(());
            }
            HirExpr::YieldFrom(value) => {
                let acc = self.yield_acc.clone();
                let inner = self.emit_expr(value)?;
                let append = self.propagate(format!("{acc}.appendSlice({inner}.items)"));
                self.out.line(&format!("{append};"));
                return Ok(());
            }
            // Bare string expressions are stray docstrings.
            HirExpr::Literal(Literal::Str(_)) => return Ok(()),
            _ => {}
        }

        if let HirExpr::Call { func, args, kwargs } = expr {
            // Test assertions dispatch through the static table.
            if self.is_assertion_call(func) {
                if let HirExpr::Attribute { attr, .. } = &**func {
                    let attr = attr.clone();
                    return self.emit_assertion_stmt(&attr, args);
                }
            }
            let void = self.call_is_void(func, args);
            let text = self.emit_callable(func, args, kwargs)?;
            if text.is_empty() {
                return Ok(());
            }
            if void {
                self.out.line(&format!("{text};"));
            } else {
                self.out.line(&format!("_ = {text};"));
            }
            return Ok(());
        }

        let ty = self.expr_type(expr);
        let text = self.emit_expr(expr)?;
        if matches!(ty, NativeType::None) {
            self.out.line(&format!("{text};"));
        } else {
            self.out.line(&format!("_ = {text};"));
        }
        Ok(())
    }

    fn emit_raise(&mut self, exc: Option<&HirExpr>, cause: Option<&HirExpr>) -> Result<()> {
        if cause.is_some() {
            self.warn("exception chaining (`raise ... from ...`) is ignored".to_string());
        }
        let error_expr = match exc {
            // Bare `raise`: re-raise the active handler's error.
            None => match self.current_handler_err.clone() {
                Some(err) => err,
                None => "error.RuntimeError".to_string(),
            },
            Some(HirExpr::Call { func, args, .. }) => {
                if let Some(name) = func.dotted_name() {
                    if !args.is_empty() {
                        let parts = self.emit_all(args)?;
                        self.out
                            .line(&format!("py.setExcMessage(.{{ {} }});", parts.join(", ")));
                    }
                    let short = name.rsplit('.').next().unwrap_or(&name).to_string();
                    format!("error.{short}")
                } else {
                    "error.RuntimeError".to_string()
                }
            }
            Some(HirExpr::Var(name)) => {
                if self.current_handler_err.as_deref() == Some(name.as_str())
                    || self
                        .usage
                        .usage(&self.scope, name)
                        .declared
                {
                    self.read_ident(name)
                } else {
                    format!("error.{name}")
                }
            }
            Some(other) => {
                let _ = self.emit_expr(other)?;
                "error.RuntimeError".to_string()
            }
        };
        match self.catch_ctx.clone() {
            Some(ctx) => {
                self.out.line(&format!("{} = {error_expr};", ctx.exc_var));
                self.out.line(&format!("break :{};", ctx.label));
            }
            None => {
                self.out.line(&format!("return {error_expr};"));
            }
        }
        Ok(())
    }

    fn emit_assert(&mut self, test: &HirExpr, msg: Option<&HirExpr>) -> Result<()> {
        let cond = self.emit_condition(test)?;
        self.out.open(&format!("if (!({cond}))"));
        if let Some(m) = msg {
            let text = self.emit_expr(m)?;
            self.out.line(&format!("py.setExcMessage(.{{ {text} }});"));
        }
        match self.catch_ctx.clone() {
            Some(ctx) => {
                self.out
                    .line(&format!("{} = error.AssertionError;", ctx.exc_var));
                self.out.line(&format!("break :{};", ctx.label));
            }
            None => {
                self.out.line("return error.AssertionError;");
            }
        }
        self.out.close();
        Ok(())
    }

    /// Exceptions travel as error values through a pending slot: the try
    /// body breaks to the slot check, handlers clear it, unmatched
    /// errors re-raise after `finally` runs.
    fn emit_try(
        &mut self,
        body: &[HirStmt],
        handlers: &[ExceptHandler],
        orelse: &[HirStmt],
        finalbody: &[HirStmt],
    ) -> Result<()> {
        let exc = self.fresh_temp("exc");
        let label = format!("__try_{}", {
            self.label_counter += 1;
            self.label_counter
        });
        self.out.line(&format!("var {exc}: ?anyerror = null;"));
        self.out.open(&format!("{label}:"));
        let saved_ctx = self.catch_ctx.replace(CatchCtx {
            label: label.clone(),
            exc_var: exc.clone(),
        });
        self.declared.enter();
        self.emit_body(body)?;
        // The `else` clause runs only when the body completed.
        self.emit_body(orelse)?;
        self.declared.exit();
        self.catch_ctx = saved_ctx;
        self.out.close();

        let has_bare = handlers.iter().any(|h| {
            h.exc_types.is_empty() || h.exc_types.iter().any(|t| t == "Exception")
        });
        if !handlers.is_empty() {
            let err = self.fresh_temp("err");
            self.out.open(&format!("if ({exc}) |{err}|"));
            // Catch-all handlers may never read the capture.
            self.out.line(&format!("_ = &{err};"));
            let mut first = true;
            for handler in handlers {
                let is_catch_all = handler.exc_types.is_empty()
                    || handler.exc_types.iter().any(|t| t == "Exception");
                let test = if is_catch_all {
                    "true".to_string()
                } else {
                    handler
                        .exc_types
                        .iter()
                        .map(|t| format!("{err} == error.{t}"))
                        .collect::<Vec<_>>()
                        .join(" or ")
                };
                let head = if first {
                    format!("if ({test})")
                } else {
                    format!("else if ({test})")
                };
                first = false;
                self.out.open(&head);
                self.out.line(&format!("{exc} = null;"));
                self.declared.enter();
                let saved_err = self.current_handler_err.take();
                match &handler.name {
                    // Bind the error only when the handler body reads
                    // it; the target rejects unused locals.
                    Some(name) if self.usage.usage(&self.scope, name).is_used_directly => {
                        let ident = self.ident(name);
                        self.declared.declare(&ident);
                        self.out.line(&format!("const {ident} = {err};"));
                        self.current_handler_err = Some(ident);
                    }
                    _ => self.current_handler_err = Some(err.clone()),
                }
                self.emit_body(&handler.body)?;
                self.current_handler_err = saved_err;
                self.declared.exit();
                self.out.close();
            }
            self.out.close();
        }

        if !finalbody.is_empty() {
            self.declared.enter();
            self.emit_body(finalbody)?;
            self.declared.exit();
        }

        // Re-raise anything no handler claimed.
        if !has_bare {
            let pending = self.fresh_temp("pending");
            match self.catch_ctx.clone() {
                Some(outer) => {
                    self.out.open(&format!("if ({exc}) |{pending}|"));
                    self.out.line(&format!("{} = {pending};", outer.exc_var));
                    self.out.line(&format!("break :{};", outer.label));
                    self.out.close();
                }
                None => {
                    self.out
                        .line(&format!("if ({exc}) |{pending}| return {pending};"));
                }
            }
        }
        Ok(())
    }

    fn emit_with(&mut self, items: &[WithItem], body: &[HirStmt]) -> Result<()> {
        self.out.open_block();
        self.declared.enter();
        for item in items {
            let ctx_ty = self.expr_type(&item.context);
            let ctx_tmp = self.fresh_temp("ctx");
            let text = self.emit_expr(&item.context)?;
            self.out.line(&format!("var {ctx_tmp} = {text};"));
            self.out.line(&format!("_ = &{ctx_tmp};"));
            let enter = match &ctx_ty {
                NativeType::ClassInstance(class) if self.classes.contains(class) => {
                    let class = class.clone();
                    self.emit_plain_method_call(&class, &ctx_tmp, "__enter__")?
                }
                _ => self.propagate(format!("py.ctxEnter(__alloc, &{ctx_tmp})")),
            };
            match &item.target {
                Some(target) => {
                    let ident = self.ident(target);
                    self.declared.declare(&ident);
                    self.out.line(&format!("const {ident} = {enter};"));
                }
                None => self.out.line(&format!("_ = {enter};")),
            }
            // The runtime dispatches `__exit__` through a compile-time
            // declaration check and swallows its errors on the unwind
            // path.
            self.out.line(&format!("defer py.ctxExit(&{ctx_tmp});"));
        }
        self.emit_body(body)?;
        self.declared.exit();
        self.out.close();
        Ok(())
    }

    fn emit_plain_method_call(
        &mut self,
        class: &str,
        recv: &str,
        method: &str,
    ) -> Result<String> {
        let path = format!("{class}/{method}");
        let traits = self.traits.traits(&path);
        let call = if traits.needs_allocator {
            format!("{recv}.{method}(__alloc)")
        } else {
            format!("{recv}.{method}()")
        };
        Ok(if traits.needs_error_union || traits.needs_allocator {
            self.propagate(call)
        } else {
            call
        })
    }

    fn emit_delete(&mut self, targets: &[AssignTarget]) -> Result<()> {
        for target in targets {
            match target {
                AssignTarget::Index { base, index } => {
                    let base_ty = self.expr_type(base);
                    let b = self.emit_expr(base)?;
                    let i = self.emit_expr(index)?;
                    match base_ty {
                        NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) => {
                            self.out.line(&format!("_ = {b}.remove({i});"));
                        }
                        _ => {
                            self.out.line(&format!(
                                "_ = {b}.orderedRemove(py.idx({b}.items.len, {i}));"
                            ));
                        }
                    }
                }
                AssignTarget::Symbol(name) => {
                    self.warn(format!("`del {name}` on a plain name is a no-op"));
                }
                _ => {
                    self.warn("unsupported delete target".to_string());
                }
            }
        }
        Ok(())
    }
}

