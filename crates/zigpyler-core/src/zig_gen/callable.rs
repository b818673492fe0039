//! Shared callable dispatch (component E).
//!
//! One routine decides the invocation shape for every call site: module
//! attributes resolve through the import registry, `self.` calls go to
//! the current receiver, builtin names go to runtime helpers, lambdas
//! and closure variables go through their `call` method, constructors go
//! through `init`, and everything else is a plain call. Assertion
//! emission, decorator handling and higher-order arguments all reuse
//! this routine.

use anyhow::Result;
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{CallKeyword, HirExpr, HirFunction, HirStmt, Literal, NativeType, ParamKind};

use super::context::ZigBackend;

/// Builtin-type namespaces whose "class methods" dispatch through the
/// runtime library (`float.fromhex`, `dict.fromkeys`, …).
const BUILTIN_TYPE_NAMESPACES: &[&str] = &["float", "int", "str", "dict", "bytes"];

impl ZigBackend<'_> {
    pub(crate) fn emit_callable(
        &mut self,
        func: &HirExpr,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
    ) -> Result<String> {
        match func {
            HirExpr::Var(name) => self.emit_name_call(name, args, kwargs),
            HirExpr::Attribute { value, attr } => {
                self.emit_attribute_call(value, attr, args, kwargs)
            }
            HirExpr::Lambda { .. } => {
                // Immediately-invoked lambda: store the closure, call it.
                let closure = self.emit_expr(func)?;
                let arg_text = self.emit_all(args)?;
                let tmp = self.fresh_temp("cl");
                let label = self.fresh_label();
                Ok(format!(
                    "{label}: {{ const {tmp} = {closure}; break :{label} {tmp}.call({}); }}",
                    arg_text.join(", ")
                ))
            }
            other => {
                let callee = self.emit_expr(other)?;
                let arg_text = self.emit_all(args)?;
                Ok(format!("{callee}({})", arg_text.join(", ")))
            }
        }
    }

    fn emit_name_call(
        &mut self,
        name: &str,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
    ) -> Result<String> {
        // User-defined class: constructor.
        if self.classes.contains(name) {
            return self.emit_constructor(name, args);
        }
        // User-defined function (module-level or nested closure).
        if let Some(path) = self.resolve_fn_path(name) {
            return self.emit_user_call(&path, name, args, kwargs);
        }
        // Known callable variable: call through its `call` method.
        if matches!(
            self.types.var_type(&self.scope, name),
            NativeType::Closure(_) | NativeType::Callable | NativeType::Function(_)
        ) {
            let callee = self.emit_var_read(name);
            let arg_text = self.emit_all(args)?;
            return Ok(format!("{callee}.call({})", arg_text.join(", ")));
        }
        // Imported symbol (`from json import loads`).
        if let Some(original) = self.import_aliases.get(name).cloned() {
            if let Some(meta) = self.imports.function(&original).cloned() {
                return self.emit_registry_call(&meta, args);
            }
        }
        self.emit_builtin(name, args)
    }

    fn emit_var_read(&mut self, name: &str) -> String {
        self.read_ident(name)
    }

    fn emit_attribute_call(
        &mut self,
        value: &HirExpr,
        attr: &str,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
    ) -> Result<String> {
        // `super().m(...)`.
        if is_super_receiver(value) {
            return self.emit_super_call(attr, args);
        }

        // Module attribute: general call emitter through the registry.
        if let Some(dotted) = (HirExpr::Attribute {
            value: Box::new(value.clone()),
            attr: attr.to_string(),
        })
        .dotted_name()
        {
            if let Some(root) = dotted.split('.').next() {
                if self.import_aliases.contains_key(root) && !self.is_local_name(root) {
                    let resolved = self.resolve_dotted(&dotted);
                    if let Some(meta) = self.imports.function(&resolved).cloned() {
                        return self.emit_registry_call(&meta, args);
                    }
                    if let Some(module) = self
                        .imports
                        .module(resolved.split('.').next().unwrap_or(""))
                        .cloned()
                    {
                        let rest = resolved.split_once('.').map(|(_, r)| r).unwrap_or(attr);
                        let arg_text = self.emit_all(args)?;
                        return Ok(self.propagate(format!(
                            "{}.{rest}(__alloc, .{{ {} }})",
                            module.runtime_namespace,
                            arg_text.join(", ")
                        )));
                    }
                }
            }
        }

        // Builtin-type "class method" dispatch (`float.fromhex`, …).
        if let HirExpr::Var(root) = value {
            if BUILTIN_TYPE_NAMESPACES.contains(&root.as_str()) && !self.is_local_name(root) {
                let arg_text = self.emit_all(args)?;
                return Ok(self.propagate(format!(
                    "py.{root}.{attr}(__alloc, {})",
                    arg_text.join(", ")
                )));
            }
        }

        let recv_ty = self.expr_type(value);

        // `self.method(...)`: direct call on the current receiver.
        if matches!(value, HirExpr::Var(n) if n == "self") {
            if let Some(class) = self.current_class.clone() {
                return self.emit_method_on(&class, "self", attr, args, kwargs);
            }
        }

        // Method on a known class instance.
        if let NativeType::ClassInstance(class) = &recv_ty {
            let class = class.clone();
            if self.classes.contains(&class) {
                // Attribute on a call result: store it first, then call.
                if matches!(value, HirExpr::Call { .. }) {
                    let recv = self.emit_expr(value)?;
                    let tmp = self.fresh_temp("recv");
                    let label = self.fresh_label();
                    let call = self.emit_method_on(&class, &tmp, attr, args, kwargs)?;
                    return Ok(format!(
                        "{label}: {{ var {tmp} = {recv}; break :{label} {call}; }}"
                    ));
                }
                let recv = self.emit_expr(value)?;
                return self.emit_method_on(&class, &recv, attr, args, kwargs);
            }
        }

        // Builtin container and string methods.
        let recv = self.emit_expr(value)?;
        self.emit_builtin_method(&recv_ty, &recv, attr, args)
    }

    fn emit_super_call(&mut self, attr: &str, args: &[HirExpr]) -> Result<String> {
        let class = self.current_class.clone();
        let base_known = class
            .as_ref()
            .and_then(|c| self.classes.get(c))
            .and_then(|c| c.base.clone());
        match base_known {
            Some(_) => {
                // The base's version is re-emitted on this class under a
                // `__super_` prefix when it is super-dispatched.
                let arg_text = self.emit_all(args)?;
                let path = class
                    .map(|c| child_scope(&child_scope("", &c), attr))
                    .unwrap_or_default();
                let fallible = self
                    .traits
                    .get(&path)
                    .is_some_and(|t| t.needs_error_union || t.needs_allocator);
                let needs_alloc = self.traits.get(&path).is_some_and(|t| t.needs_allocator);
                let mut all_args = Vec::new();
                if needs_alloc {
                    all_args.push("__alloc".to_string());
                }
                all_args.extend(arg_text);
                let call = format!("self.__super_{attr}({})", all_args.join(", "));
                Ok(if fallible { self.propagate(call) } else { call })
            }
            None => {
                // Unknown base: the call strips to nothing.
                Ok(String::new())
            }
        }
    }

    fn emit_method_on(
        &mut self,
        class: &str,
        recv: &str,
        attr: &str,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
    ) -> Result<String> {
        let info_scope = self
            .classes
            .get(class)
            .map(|c| c.defined_in_scope.clone())
            .unwrap_or_default();
        let path = child_scope(&child_scope(&info_scope, class), attr);
        let method_hir = self
            .classes
            .hir(class)
            .and_then(|c| c.method(attr))
            .cloned();
        let ordered = match &method_hir {
            Some(hir) => self.order_call_args(hir, args, kwargs, true)?,
            None => self.emit_all(args)?,
        };
        let traits = self.traits.traits(&path);
        let mut all_args = Vec::new();
        if traits.needs_allocator {
            all_args.push("__alloc".to_string());
        }
        all_args.extend(ordered);
        let call = format!("{recv}.{attr}({})", all_args.join(", "));
        let fallible = traits.needs_error_union
            || traits.needs_allocator
            || super::func_gen::magic_forces_error(attr);
        Ok(if fallible { self.propagate(call) } else { call })
    }

    fn emit_constructor(&mut self, class: &str, args: &[HirExpr]) -> Result<String> {
        let info = match self.classes.get(class) {
            Some(info) => info.clone(),
            None => {
                let arg_text = self.emit_all(args)?;
                return Ok(format!("{class}.init({})", arg_text.join(", ")));
            }
        };
        let init_path = child_scope(&child_scope(&info.defined_in_scope, class), "__init__");
        let traits = self.traits.traits(&init_path);
        let needs_alloc = traits.needs_allocator
            || info.is_nested
            || !info.dynamic_fields.is_empty();
        let fallible = traits.needs_error_union || needs_alloc;

        let mut all_args = Vec::new();
        if needs_alloc {
            all_args.push("__alloc".to_string());
        }
        // Captured outer variables are threaded through construction.
        for capture in info.captures.keys() {
            all_args.push(self.read_ident(capture));
        }
        all_args.extend(self.emit_all(args)?);
        let call = format!("{class}.init({})", all_args.join(", "));
        Ok(if fallible { self.propagate(call) } else { call })
    }

    fn emit_user_call(
        &mut self,
        path: &str,
        name: &str,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
    ) -> Result<String> {
        let traits = self.traits.traits(path);
        let func_hir = self.lookup_function_hir(path);
        let ordered = match &func_hir {
            Some(hir) => self.order_call_args(hir, args, kwargs, false)?,
            None => self.emit_all(args)?,
        };
        let mut all_args = Vec::new();
        if traits.needs_allocator {
            all_args.push("__alloc".to_string());
        }
        all_args.extend(ordered);
        // Nested functions are closure instances called through `.call`.
        let is_nested = path.contains('/');
        let callee = if is_nested {
            let local = self.read_ident(name);
            format!("{local}.call")
        } else {
            name.to_string()
        };
        let call = format!("{callee}({})", all_args.join(", "));
        Ok(if traits.needs_error_union || traits.needs_allocator {
            self.propagate(call)
        } else {
            call
        })
    }

    /// Line up positional arguments, keyword arguments and defaults
    /// against the callee's parameter list. Missing optional parameters
    /// are passed as `null`; vararg tails pack into a slice literal.
    fn order_call_args(
        &mut self,
        callee: &HirFunction,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
        skip_self: bool,
    ) -> Result<Vec<String>> {
        let params: Vec<_> = callee
            .params
            .iter()
            .filter(|p| !(skip_self && (p.name == "self" || p.name == "cls")))
            .collect();
        let positional: Vec<_> = params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
            .collect();
        let vararg = params.iter().find(|p| p.kind == ParamKind::Vararg);

        let mut out = Vec::new();
        let mut arg_iter = args.iter();
        for param in &positional {
            if let Some(kw) = kwargs
                .iter()
                .find(|k| k.arg.as_deref() == Some(param.name.as_str()))
            {
                let value = self.emit_expr(&kw.value)?;
                out.push(self.wrap_optional_arg(param, value));
                continue;
            }
            match arg_iter.next() {
                Some(arg) => {
                    let value = self.emit_expr(arg)?;
                    out.push(self.wrap_optional_arg(param, value));
                }
                None => {
                    if param.default.is_some() {
                        out.push("null".to_string());
                    }
                }
            }
        }
        // Remaining positionals feed the vararg slice.
        let rest: Vec<&HirExpr> = arg_iter.collect();
        if vararg.is_some() {
            let mut parts = Vec::new();
            for arg in rest {
                parts.push(self.emit_expr(arg)?);
            }
            out.push(format!("&[_]i64{{ {} }}", parts.join(", ")));
        } else {
            for arg in rest {
                let extra = self.emit_expr(arg)?;
                out.push(extra);
            }
        }
        Ok(out)
    }

    /// Optional parameters receive `?T`; concrete arguments pass through
    /// unchanged because the target coerces `T` into `?T`.
    fn wrap_optional_arg(&self, _param: &zigpyler_hir::HirParam, value: String) -> String {
        value
    }

    fn emit_registry_call(
        &mut self,
        meta: &crate::import_registry::FunctionMeta,
        args: &[HirExpr],
    ) -> Result<String> {
        let arg_text = self.emit_all(args)?;
        let mut all_args = Vec::new();
        if meta.needs_allocator {
            all_args.push("__alloc".to_string());
        }
        all_args.extend(arg_text);
        let call = format!("{}({})", meta.runtime_name, all_args.join(", "));
        Ok(if meta.can_fail {
            self.propagate(call)
        } else {
            call
        })
    }

    fn emit_builtin_method(
        &mut self,
        recv_ty: &NativeType,
        recv: &str,
        attr: &str,
        args: &[HirExpr],
    ) -> Result<String> {
        let arg_text = self.emit_all(args)?;
        let joined = arg_text.join(", ");
        Ok(match recv_ty {
            NativeType::Str(_) => match attr {
                // String producers allocate.
                "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "title"
                | "capitalize" | "zfill" | "center" | "ljust" | "rjust" => {
                    self.propagate(format!("py.str.{attr}(__alloc, {recv}, {joined})"))
                }
                "join" => self.propagate(format!("py.str.join(__alloc, {recv}, {joined})")),
                "format" => {
                    self.propagate(format!("py.str.applyFormat(__alloc, {recv}, .{{ {joined} }})"))
                }
                "split" | "rsplit" | "splitlines" => {
                    self.propagate(format!("py.str.{attr}(__alloc, {recv}, {joined})"))
                }
                "startswith" | "endswith" | "find" | "rfind" | "index" | "count" | "isdigit"
                | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" => {
                    format!("py.str.{attr}({recv}, {joined})")
                }
                "encode" => recv.to_string(),
                _ => {
                    self.warn(format!("unknown string method {attr}"));
                    format!("py.unsupported(\"str.{attr}\")")
                }
            },
            NativeType::List(_) | NativeType::Deque(_) => match attr {
                "append" | "appendleft" | "insert" => {
                    self.propagate(format!("{recv}.{attr}({joined})"))
                }
                "extend" => self.propagate(format!("{recv}.appendSlice({joined}.items)")),
                "pop" => {
                    if args.is_empty() {
                        format!("{recv}.pop().?")
                    } else {
                        format!("{recv}.orderedRemove(py.idx({recv}.items.len, {joined}))")
                    }
                }
                "popleft" => format!("{recv}.orderedRemove(0)"),
                "remove" => format!("py.list.removeValue(&{recv}, {joined})"),
                "clear" => format!("{recv}.clearRetainingCapacity()"),
                "sort" => format!("py.list.sort(&{recv})"),
                "reverse" => format!("std.mem.reverse(@TypeOf({recv}.items[0]), {recv}.items)"),
                "count" => format!("py.list.count({recv}.items, {joined})"),
                "index" => format!("py.list.indexOf({recv}.items, {joined})"),
                "copy" => self.propagate(format!("{recv}.clone()")),
                _ => {
                    self.warn(format!("unknown list method {attr}"));
                    format!("py.unsupported(\"list.{attr}\")")
                }
            },
            NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) | NativeType::Counter => {
                match attr {
                    "get" => {
                        if args.len() >= 2 {
                            format!(
                                "({recv}.get({}) orelse {})",
                                arg_text[0], arg_text[1]
                            )
                        } else {
                            format!("{recv}.get({joined})")
                        }
                    }
                    "pop" => format!("py.dict.pop(&{recv}, {joined})"),
                    "setdefault" => {
                        self.propagate(format!("py.dict.setdefault(&{recv}, {joined})"))
                    }
                    "update" => self.propagate(format!("py.dict.update(&{recv}, {joined})")),
                    "clear" => format!("{recv}.clearRetainingCapacity()"),
                    "keys" | "values" | "items" => {
                        self.propagate(format!("py.dict.{attr}(__alloc, {recv})"))
                    }
                    "most_common" => {
                        self.propagate(format!("{recv}.mostCommon(__alloc, {joined})"))
                    }
                    _ => {
                        self.warn(format!("unknown dict method {attr}"));
                        format!("py.unsupported(\"dict.{attr}\")")
                    }
                }
            }
            NativeType::Set(_) => match attr {
                "add" | "update" => self.propagate(format!("{recv}.{attr}({joined})")),
                "discard" | "remove" => format!("{recv}.remove({joined})"),
                "union" | "intersection" | "difference" => {
                    self.propagate(format!("{recv}.{attr}(__alloc, {joined})"))
                }
                "issubset" | "issuperset" | "isdisjoint" | "contains" => {
                    format!("{recv}.{attr}({joined})")
                }
                _ => {
                    self.warn(format!("unknown set method {attr}"));
                    format!("py.unsupported(\"set.{attr}\")")
                }
            },
            NativeType::PyValue => {
                self.propagate(format!("py.callMethod(__alloc, {recv}, \"{attr}\", .{{ {joined} }})"))
            }
            _ => format!("{recv}.{attr}({joined})"),
        })
    }

    fn emit_builtin(&mut self, name: &str, args: &[HirExpr]) -> Result<String> {
        let arg_types: Vec<NativeType> = args.iter().map(|a| self.expr_type(a)).collect();
        let needs_first_arg = matches!(
            name,
            "len" | "int" | "float" | "bool" | "abs" | "ord" | "chr" | "hash" | "next" | "sum"
                | "sorted" | "reversed" | "type" | "isinstance"
        );
        if needs_first_arg && args.is_empty() {
            self.warn(format!("builtin {name} called without arguments"));
            return Ok(format!("py.unsupported(\"{name}\")"));
        }
        match name {
            "print" => {
                let parts = self.emit_all(args)?;
                Ok(format!("py.print(.{{ {} }})", parts.join(", ")))
            }
            "len" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(format!("py.len({arg})"))
            }
            "int" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(match arg_types.first() {
                    Some(NativeType::Float) => format!("py.intFromFloat({arg})"),
                    Some(NativeType::Bool) => format!("@as(i64, @intFromBool({arg}))"),
                    Some(NativeType::Int(_)) => arg,
                    _ => self.propagate(format!("py.parseInt({arg})")),
                })
            }
            "float" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(match arg_types.first() {
                    Some(NativeType::Int(_) | NativeType::Bool) => format!("py.floatOf({arg})"),
                    Some(NativeType::Float) => arg,
                    _ => self.propagate(format!("py.parseFloat({arg})")),
                })
            }
            "str" | "repr" => {
                if args.is_empty() {
                    return Ok("\"\"".to_string());
                }
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.toStr(__alloc, {arg})")))
            }
            "bool" => self.emit_condition(&args[0]),
            "abs" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(format!("py.abs({arg})"))
            }
            "min" | "max" => {
                if args.len() == 1 {
                    let arg = self.emit_expr(&args[0])?;
                    Ok(format!("py.{name}Of({arg}.items)"))
                } else {
                    let parts = self.emit_all(args)?;
                    Ok(parts
                        .into_iter()
                        .reduce(|a, b| format!("py.{name}2({a}, {b})"))
                        .unwrap_or_default())
                }
            }
            "sum" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(format!("py.sum({arg}.items)"))
            }
            "sorted" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.sortedCopy(__alloc, {arg})")))
            }
            "reversed" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.reversedCopy(__alloc, {arg})")))
            }
            "range" => {
                // Value position: materialize the counted sequence.
                let (start, stop, step) = self.range_parts(args)?;
                Ok(self.propagate(format!("py.rangeList(__alloc, {start}, {stop}, {step})")))
            }
            "next" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.next({arg})")))
            }
            "round" => {
                let parts = self.emit_all(args)?;
                Ok(format!("py.round({})", parts.join(", ")))
            }
            "format" => {
                let parts = self.emit_all(args)?;
                Ok(self.propagate(format!("py.format(__alloc, {})", parts.join(", "))))
            }
            "ord" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(format!("py.ord({arg})"))
            }
            "chr" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.chr(__alloc, {arg})")))
            }
            "hash" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(format!("py.hash({arg})"))
            }
            "divmod" => {
                let parts = self.emit_all(args)?;
                Ok(format!("py.divmod({})", parts.join(", ")))
            }
            "input" => {
                let parts = self.emit_all(args)?;
                Ok(self.propagate(format!("py.input(__alloc, .{{ {} }})", parts.join(", "))))
            }
            "isinstance" => self.emit_isinstance(args),
            "type" => {
                let arg = self.emit_expr(&args[0])?;
                Ok(format!("@TypeOf({arg})"))
            }
            "list" => {
                if args.is_empty() {
                    let ty = self.zig_type(&NativeType::list_of(NativeType::Unknown));
                    return Ok(format!("{ty}.init(__alloc)"));
                }
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.list.fromIter(__alloc, {arg})")))
            }
            "dict" => {
                let ty = self.zig_type(&NativeType::dict_of(
                    NativeType::str_runtime(),
                    NativeType::Unknown,
                ));
                Ok(format!("{ty}.init(__alloc)"))
            }
            "set" => {
                if args.is_empty() {
                    return Ok("py.Set(i64).init(__alloc)".to_string());
                }
                let arg = self.emit_expr(&args[0])?;
                Ok(self.propagate(format!("py.setFromIter(__alloc, {arg})")))
            }
            "Counter" => {
                let parts = self.emit_all(args)?;
                Ok(self.propagate(format!(
                    "py.Counter.init(__alloc{}{})",
                    if parts.is_empty() { "" } else { ", " },
                    parts.join(", ")
                )))
            }
            "defaultdict" => Ok("py.DefaultDict(i64, i64).init(__alloc)".to_string()),
            "deque" => {
                let parts = self.emit_all(args)?;
                Ok(self.propagate(format!(
                    "py.Deque(i64).init(__alloc{}{})",
                    if parts.is_empty() { "" } else { ", " },
                    parts.join(", ")
                )))
            }
            "enumerate" | "zip" | "map" | "filter" | "any" | "all" => {
                let parts = self.emit_all(args)?;
                Ok(self.propagate(format!(
                    "py.{name}(__alloc, .{{ {} }})",
                    parts.join(", ")
                )))
            }
            "exit" | "quit" => {
                let parts = self.emit_all(args)?;
                Ok(format!("py.sys.exit({})", parts.join(", ")))
            }
            // Exception constructors inside `raise` are handled by the
            // statement emitter; a bare one builds the runtime payload.
            _ if is_exception_name(name) => {
                let parts = self.emit_all(args)?;
                Ok(format!("py.exc(\"{name}\", .{{ {} }})", parts.join(", ")))
            }
            _ => {
                let parts = self.emit_all(args)?;
                self.warn(format!("call to unknown name {name}"));
                Ok(format!("{name}({})", parts.join(", ")))
            }
        }
    }

    fn emit_isinstance(&mut self, args: &[HirExpr]) -> Result<String> {
        let value = self.emit_expr(&args[0])?;
        let types: Vec<&HirExpr> = match args.get(1) {
            Some(HirExpr::Tuple(options)) => options.iter().collect(),
            Some(single) => vec![single],
            None => vec![],
        };
        let mut clauses = Vec::new();
        for ty in types {
            if let HirExpr::Var(name) = ty {
                let zig = match name.as_str() {
                    "int" => "i64".to_string(),
                    "float" => "f64".to_string(),
                    "bool" => "bool".to_string(),
                    "str" => "[]const u8".to_string(),
                    other => other.to_string(),
                };
                clauses.push(format!("@TypeOf({value}) == {zig}"));
            }
        }
        if clauses.is_empty() {
            return Ok("false".to_string());
        }
        Ok(format!("({})", clauses.join(" or ")))
    }

    /// Find the HIR for a function by scope path (for argument
    /// alignment).
    pub(crate) fn lookup_function_hir(&self, path: &str) -> Option<HirFunction> {
        fn search(body: &[HirStmt], scope: &str, path: &str) -> Option<HirFunction> {
            for stmt in body {
                match stmt {
                    HirStmt::FunctionDef(f) => {
                        let fn_path = child_scope(scope, &f.name);
                        if fn_path == path {
                            return Some(f.clone());
                        }
                        if path.starts_with(&format!("{fn_path}/")) {
                            if let Some(found) = search(&f.body, &fn_path, path) {
                                return Some(found);
                            }
                        }
                    }
                    HirStmt::ClassDef(c) => {
                        let class_path = child_scope(scope, &c.name);
                        for m in &c.methods {
                            let m_path = child_scope(&class_path, &m.name);
                            if m_path == path {
                                return Some(m.clone());
                            }
                            if path.starts_with(&format!("{m_path}/")) {
                                if let Some(found) = search(&m.body, &m_path, path) {
                                    return Some(found);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        search(&self.module.body, "", path)
    }

    /// Whether an expression-statement call produces a value that must
    /// be explicitly discarded.
    pub(crate) fn call_is_void(&self, func: &HirExpr, args: &[HirExpr]) -> bool {
        if let HirExpr::Var(name) = func {
            if name == "print" {
                return true;
            }
            if let Some(path) = self.resolve_fn_path(name) {
                return self.types.return_type(&path).is_none();
            }
            if let Some(original) = self.import_aliases.get(name) {
                if let Some(meta) = self.imports.function(original) {
                    return meta.is_void;
                }
            }
        }
        if let HirExpr::Attribute { value, attr } = func {
            if let Some(dotted) = func.dotted_name() {
                let resolved = self.resolve_dotted(&dotted);
                if let Some(meta) = self.imports.function(&resolved) {
                    return meta.is_void;
                }
            }
            let recv = self.expr_type(value);
            if let NativeType::ClassInstance(class) = &recv {
                if let Some(info) = self.classes.get(class) {
                    return match info.methods.get(attr) {
                        Some(ret) => matches!(ret, NativeType::None | NativeType::Unknown),
                        None => true,
                    };
                }
            }
            let ret = zigpyler_analysis::method_call_type(
                &recv,
                attr,
                &args.iter().map(|a| self.expr_type(a)).collect::<Vec<_>>(),
            );
            return matches!(ret, NativeType::None);
        }
        false
    }
}

pub(crate) fn is_super_receiver(expr: &HirExpr) -> bool {
    matches!(
        expr,
        HirExpr::Call { func, .. } if matches!(&**func, HirExpr::Var(n) if n == "super")
    )
}

/// Whether a statement is a `super()` call that strips to nothing.
pub(crate) fn is_stripped_super_stmt(backend: &ZigBackend<'_>, expr: &HirExpr) -> bool {
    if let HirExpr::Call { func, .. } = expr {
        if let HirExpr::Attribute { value, .. } = &**func {
            if is_super_receiver(value) {
                return backend
                    .current_class
                    .as_ref()
                    .and_then(|c| backend.classes.get(c))
                    .and_then(|c| c.base.as_ref())
                    .is_none();
            }
        }
    }
    false
}

fn is_exception_name(name: &str) -> bool {
    matches!(
        name,
        "Exception"
            | "ValueError"
            | "TypeError"
            | "KeyError"
            | "IndexError"
            | "RuntimeError"
            | "StopIteration"
            | "ZeroDivisionError"
            | "AttributeError"
            | "NotImplementedError"
            | "AssertionError"
            | "OSError"
            | "IOError"
            | "FileNotFoundError"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_receiver_detection() {
        let expr = HirExpr::Call {
            func: Box::new(HirExpr::Var("super".to_string())),
            args: vec![],
            kwargs: vec![],
        };
        assert!(is_super_receiver(&expr));
        assert!(!is_super_receiver(&HirExpr::Var("super".to_string())));
    }

    #[test]
    fn exception_names() {
        assert!(is_exception_name("ValueError"));
        assert!(is_exception_name("StopIteration"));
        assert!(!is_exception_name("Point"));
    }
}
