//! Assignment emission: simple bindings, tuple/list unpacking through a
//! fresh temporary, and every augmented form (element, slice, dict,
//! attribute, operator-method dispatch).

use anyhow::Result;
use zigpyler_hir::{AssignTarget, BinOp, HirExpr, IntKind, NativeType};

use super::context::ZigBackend;

impl ZigBackend<'_> {
    pub(crate) fn emit_assign(&mut self, targets: &[AssignTarget], value: &HirExpr) -> Result<()> {
        if targets.len() == 1 {
            let value_ty = self.expr_type(value);
            return self.emit_store(&targets[0], value, &value_ty);
        }
        // `a = b = v`: evaluate once, bind left to right.
        let tmp = self.fresh_temp("unpack_tmp");
        let value_ty = self.expr_type(value);
        let text = self.emit_expr(value)?;
        self.out.line(&format!("const {tmp} = {text};"));
        for target in targets {
            self.emit_store(target, &HirExpr::Var(tmp.clone()), &value_ty)?;
        }
        Ok(())
    }

    fn emit_store(
        &mut self,
        target: &AssignTarget,
        value: &HirExpr,
        value_ty: &NativeType,
    ) -> Result<()> {
        match target {
            AssignTarget::Symbol(name) => self.emit_symbol_store(name, value, value_ty),
            AssignTarget::Attribute { value: obj, attr } => {
                self.emit_attribute_store(obj, attr, value)
            }
            AssignTarget::Index { base, index } => self.emit_index_store(base, index, value),
            AssignTarget::Slice { base, lower, upper } => {
                let b = self.emit_expr(base)?;
                let lo = match lower {
                    Some(e) => self.emit_expr(e)?,
                    None => "null".to_string(),
                };
                let hi = match upper {
                    Some(e) => self.emit_expr(e)?,
                    None => "null".to_string(),
                };
                let v = self.emit_expr(value)?;
                let call = self.propagate(format!(
                    "py.list.setSlice(__alloc, &{b}, {lo}, {hi}, {v})"
                ));
                self.out.line(&format!("{call};"));
                Ok(())
            }
            AssignTarget::Tuple(elements) => self.emit_unpack(elements, value, value_ty),
        }
    }

    fn emit_symbol_store(
        &mut self,
        name: &str,
        value: &HirExpr,
        value_ty: &NativeType,
    ) -> Result<()> {
        // `global` declarations and module-level statements write the
        // file-scope binding.
        if (self.global_decls.contains(name) || self.scope.is_empty())
            && self.file_scope_names.contains(name)
        {
            let text = self.emit_expr(value)?;
            self.out.line(&format!("{name} = {text};"));
            return Ok(());
        }

        let ident = self.ident(name);
        if self.declared.is_declared(&ident) {
            let text = self.emit_expr(value)?;
            self.out.line(&format!("{ident} = {text};"));
            return Ok(());
        }

        let usage = self.usage.usage(&self.scope, name);
        // Entirely unused bindings become explicit discards; the target
        // rejects unused locals.
        if !usage.is_used_directly && !usage.is_mutated && !usage.is_captured {
            let text = self.emit_expr(value)?;
            self.out.line(&format!("_ = {text};"));
            return Ok(());
        }

        let mutable = usage.is_mutated
            || usage.is_used_as_iterator
            || matches!(
                value,
                HirExpr::ListComp { .. } | HirExpr::SetComp { .. } | HirExpr::DictComp { .. }
            )
            || matches!(value_ty, NativeType::List(_) | NativeType::Set(_) | NativeType::Dict(_, _));
        let keyword = if mutable { "var" } else { "const" };

        // Big-integer bindings need the annotation; a small literal
        // initializer would otherwise mistype them. The scoped table
        // carries the fully widened type.
        let scoped_ty = self.types.var_type(&self.scope, name);
        let binding_ty = if scoped_ty.is_unknown() {
            value_ty.clone()
        } else {
            scoped_ty
        };
        let annotation = match &binding_ty {
            NativeType::Int(IntKind::Unbounded) | NativeType::BigInt => {
                format!(": {}", self.zig_type(&binding_ty))
            }
            _ => String::new(),
        };

        let text = self.emit_expr(value)?;
        self.declared.declare(&ident);
        self.out
            .line(&format!("{keyword} {ident}{annotation} = {text};"));
        // A container binding picked `var` for its interior mutability;
        // when nothing rebinds it the target wants its address taken.
        if mutable && !usage.is_mutated {
            self.out.line(&format!("_ = &{ident};"));
        }
        Ok(())
    }

    fn emit_attribute_store(
        &mut self,
        obj: &HirExpr,
        attr: &str,
        value: &HirExpr,
    ) -> Result<()> {
        let obj_ty = self.expr_type(obj);
        let obj_text = self.emit_expr(obj)?;
        let value_text = self.emit_expr(value)?;
        if let NativeType::ClassInstance(class) = &obj_ty {
            if let Some(info) = self.classes.get(class) {
                if info.is_dynamic_field(attr) {
                    let put = self.propagate(format!(
                        "{obj_text}.__dict.put(\"{attr}\", py.value({value_text}))"
                    ));
                    self.out.line(&format!("{put};"));
                    return Ok(());
                }
            }
        }
        self.out.line(&format!("{obj_text}.{attr} = {value_text};"));
        Ok(())
    }

    fn emit_index_store(
        &mut self,
        base: &HirExpr,
        index: &HirExpr,
        value: &HirExpr,
    ) -> Result<()> {
        let base_ty = self.expr_type(base);
        let b = self.emit_expr(base)?;
        let i = self.emit_expr(index)?;
        let v = self.emit_expr(value)?;
        match base_ty {
            NativeType::Dict(_, _) | NativeType::DefaultDict(_, _) | NativeType::Counter => {
                let put = self.propagate(format!("{b}.put({i}, {v})"));
                self.out.line(&format!("{put};"));
            }
            NativeType::List(_) => {
                self.out
                    .line(&format!("{b}.items[py.idx({b}.items.len, {i})] = {v};"));
            }
            NativeType::PyValue => {
                let set = self.propagate(format!("py.setItem({b}, {i}, {v})"));
                self.out.line(&format!("{set};"));
            }
            _ => {
                self.out
                    .line(&format!("{b}.items[py.idx({b}.items.len, {i})] = {v};"));
            }
        }
        Ok(())
    }

    /// Tuple/list unpacking: evaluate the RHS once into a temporary,
    /// then bind (or discard) each element.
    fn emit_unpack(
        &mut self,
        elements: &[AssignTarget],
        value: &HirExpr,
        value_ty: &NativeType,
    ) -> Result<()> {
        let tmp = self.fresh_temp("unpack_tmp");
        let text = self.emit_expr(value)?;
        self.out.line(&format!("const {tmp} = {text};"));

        let list_shaped = matches!(value_ty, NativeType::List(_));
        let elem_types: Vec<NativeType> = match value_ty {
            NativeType::Tuple(ts) if ts.len() == elements.len() => ts.clone(),
            other => vec![other.element_type(); elements.len()],
        };

        for (i, element) in elements.iter().enumerate() {
            let access = if list_shaped {
                format!("{tmp}.items[{i}]")
            } else {
                format!("{tmp}[{i}]")
            };
            match element {
                AssignTarget::Symbol(name) if name == "_" => {
                    self.out.line(&format!("_ = {access};"));
                }
                AssignTarget::Symbol(name) => {
                    if (self.global_decls.contains(name) || self.scope.is_empty())
                        && self.file_scope_names.contains(name)
                    {
                        self.out.line(&format!("{name} = {access};"));
                        continue;
                    }
                    let usage = self.usage.usage(&self.scope, name);
                    if !usage.is_used_directly && !usage.is_mutated && !usage.is_captured {
                        self.out.line(&format!("_ = {access};"));
                        continue;
                    }
                    let ident = self.ident(name);
                    if self.declared.is_declared(&ident) {
                        self.out.line(&format!("{ident} = {access};"));
                    } else {
                        let keyword = if usage.is_mutated { "var" } else { "const" };
                        self.declared.declare(&ident);
                        self.out.line(&format!("{keyword} {ident} = {access};"));
                    }
                }
                nested => {
                    let elem_ty = elem_types.get(i).cloned().unwrap_or(NativeType::Unknown);
                    self.emit_store(nested, &HirExpr::Var(access), &elem_ty)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Augmented assignment
    // ------------------------------------------------------------------

    pub(crate) fn emit_aug_assign(
        &mut self,
        target: &AssignTarget,
        op: BinOp,
        value: &HirExpr,
    ) -> Result<()> {
        match target {
            AssignTarget::Symbol(name) => self.emit_aug_symbol(name, op, value),
            AssignTarget::Attribute { value: obj, attr } => {
                self.emit_aug_attribute(obj, attr, op, value)
            }
            AssignTarget::Index { base, index } => self.emit_aug_index(base, index, op, value),
            AssignTarget::Slice { base, lower, upper } => {
                self.emit_aug_slice(base, lower.as_ref(), upper.as_ref(), op, value)
            }
            AssignTarget::Tuple(_) => {
                self.warn("augmented assignment to a tuple target".to_string());
                self.out.line("_ = py.unsupported(\"tuple aug-assign\");");
                Ok(())
            }
        }
    }

    fn emit_aug_symbol(&mut self, name: &str, op: BinOp, value: &HirExpr) -> Result<()> {
        let target_ty = self.types.var_type(&self.scope, name);
        let ident = if self.global_decls.contains(name) && self.file_scope_names.contains(name) {
            name.to_string()
        } else {
            self.read_ident(name)
        };

        // Class instances dispatch to `__iadd__` when present, falling
        // back to the plain operator method and rebinding.
        if let NativeType::ClassInstance(class) = &target_ty {
            let class = class.clone();
            let v = self.emit_expr(value)?;
            return self.emit_aug_instance(&ident, &class, op, &v);
        }

        let v = self.emit_expr(value)?;
        let line = self.aug_text(&ident, &target_ty, op, &v);
        self.out.line(&line);
        Ok(())
    }

    fn emit_aug_instance(
        &mut self,
        ident: &str,
        class: &str,
        op: BinOp,
        value_text: &str,
    ) -> Result<()> {
        let (iadd, add) = aug_method_names(op);
        let info = self.classes.get(class).cloned();
        let Some(info) = info else {
            self.out.line(&format!(
                "{ident} = py.unsupported(\"operator on unknown class\");"
            ));
            return Ok(());
        };
        if info.is_nested {
            // Unknown shapes fall back to the plain operator method via
            // a compile-time declaration check.
            self.out.line(&format!(
                "{ident} = if (@hasDecl(@TypeOf({ident}.*), \"{iadd}\")) {ident}.{iadd}({value_text}) else {ident}.{add}({value_text});"
            ));
            return Ok(());
        }
        let method = if info.methods.contains_key(iadd) {
            iadd
        } else {
            add
        };
        let path = format!("{class}/{method}");
        let traits = self.traits.traits(&path);
        let mut args = Vec::new();
        if traits.needs_allocator {
            args.push("__alloc".to_string());
        }
        args.push(value_text.to_string());
        let call = format!("{ident}.{method}({})", args.join(", "));
        let call = if traits.needs_error_union || traits.needs_allocator {
            self.propagate(call)
        } else {
            call
        };
        // The binding is rebound to the dispatch result either way.
        self.out.line(&format!("{ident} = {call};"));
        Ok(())
    }

    fn emit_aug_attribute(
        &mut self,
        obj: &HirExpr,
        attr: &str,
        op: BinOp,
        value: &HirExpr,
    ) -> Result<()> {
        let obj_ty = self.expr_type(obj);
        let obj_text = self.emit_expr(obj)?;
        let v = self.emit_expr(value)?;
        if let NativeType::ClassInstance(class) = &obj_ty {
            if let Some(info) = self.classes.get(class) {
                // Dynamic attributes read-modify-write through the
                // instance dict.
                if info.is_dynamic_field(attr) {
                    let current = format!("{obj_text}.__dict.get(\"{attr}\").?");
                    let combined = binary_text(op, &current, &v, &NativeType::PyValue);
                    let put = self.propagate(format!(
                        "{obj_text}.__dict.put(\"{attr}\", py.value({combined}))"
                    ));
                    self.out.line(&format!("{put};"));
                    return Ok(());
                }
                let field_ty = info
                    .fields
                    .get(attr)
                    .cloned()
                    .unwrap_or(NativeType::Unknown);
                let target = format!("{obj_text}.{attr}");
                let line = self.aug_text(&target, &field_ty, op, &v);
                self.out.line(&line);
                return Ok(());
            }
        }
        let target = format!("{obj_text}.{attr}");
        let line = self.aug_text(&target, &NativeType::Unknown, op, &v);
        self.out.line(&line);
        Ok(())
    }

    fn emit_aug_index(
        &mut self,
        base: &HirExpr,
        index: &HirExpr,
        op: BinOp,
        value: &HirExpr,
    ) -> Result<()> {
        let base_ty = self.expr_type(base);
        let b = self.emit_expr(base)?;
        let i = self.emit_expr(index)?;
        let v = self.emit_expr(value)?;
        match &base_ty {
            // `x[key] op= v` on dicts rewrites to a put of the combined
            // read.
            NativeType::Dict(_, value_ty) => {
                let current = format!("{b}.get({i}).?");
                let combined = binary_text(op, &current, &v, value_ty);
                let put = self.propagate(format!("{b}.put({i}, {combined})"));
                self.out.line(&format!("{put};"));
            }
            NativeType::Counter => {
                let current = format!("{b}.get({i})");
                let combined = binary_text(op, &current, &v, &NativeType::int());
                let put = self.propagate(format!("{b}.put({i}, {combined})"));
                self.out.line(&format!("{put};"));
            }
            NativeType::List(elem) => {
                let slot = format!("{b}.items[py.idx({b}.items.len, {i})]");
                let combined = binary_text(op, &slot, &v, elem);
                self.out.line(&format!("{slot} = {combined};"));
            }
            _ => {
                let slot = format!("{b}.items[py.idx({b}.items.len, {i})]");
                let combined = binary_text(op, &slot, &v, &NativeType::Unknown);
                self.out.line(&format!("{slot} = {combined};"));
            }
        }
        Ok(())
    }

    /// `x[lo:hi] *= n` and `x[lo:hi] += seq` mutate the underlying
    /// growable array in place; other slice-augmented forms are
    /// rejected.
    fn emit_aug_slice(
        &mut self,
        base: &HirExpr,
        lower: Option<&HirExpr>,
        upper: Option<&HirExpr>,
        op: BinOp,
        value: &HirExpr,
    ) -> Result<()> {
        let b = self.emit_expr(base)?;
        let lo = match lower {
            Some(e) => self.emit_expr(e)?,
            None => "null".to_string(),
        };
        let hi = match upper {
            Some(e) => self.emit_expr(e)?,
            None => "null".to_string(),
        };
        let v = self.emit_expr(value)?;
        match op {
            BinOp::Mul => {
                let call = self.propagate(format!("py.list.mulSlice(&{b}, {lo}, {hi}, {v})"));
                self.out.line(&format!("{call};"));
                Ok(())
            }
            BinOp::Add => {
                let call =
                    self.propagate(format!("py.list.extendSlice(&{b}, {lo}, {hi}, {v})"));
                self.out.line(&format!("{call};"));
                Ok(())
            }
            other => {
                self.warn(format!("slice-augmented {other:?} is not supported"));
                self.out.line("_ = py.unsupported(\"slice aug-assign\");");
                Ok(())
            }
        }
    }

    /// One augmented-assignment statement line for a plain (non-class)
    /// target.
    fn aug_text(&mut self, target: &str, ty: &NativeType, op: BinOp, value: &str) -> String {
        if matches!(ty, NativeType::Int(IntKind::Unbounded) | NativeType::BigInt) {
            let helper = match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
                BinOp::FloorDiv => "div",
                BinOp::Mod => "mod",
                BinOp::Pow => "pow",
                BinOp::LShift => "shl",
                BinOp::RShift => "shr",
                _ => "binop",
            };
            let call = self.propagate(format!("py.big.{helper}(__alloc, {target}, {value})"));
            return format!("{target} = {call};");
        }
        if ty.is_string() {
            let call = match op {
                BinOp::Add => self.propagate(format!("py.str.concat(__alloc, {target}, {value})")),
                BinOp::Mul => self.propagate(format!("py.str.repeat(__alloc, {target}, {value})")),
                _ => {
                    self.warn(format!("augmented {op:?} unsupported on strings"));
                    "py.unsupported(\"string aug-assign\")".to_string()
                }
            };
            return format!("{target} = {call};");
        }
        if matches!(ty, NativeType::List(_)) {
            let call = match op {
                BinOp::Add => self.propagate(format!(
                    "{target}.appendSlice({value}.items)"
                )),
                _ => {
                    self.warn(format!("augmented {op:?} unsupported on lists"));
                    "py.unsupported(\"list aug-assign\")".to_string()
                }
            };
            return format!("{call};");
        }
        match op {
            BinOp::Add => format!("{target} += {value};"),
            BinOp::Sub => format!("{target} -= {value};"),
            BinOp::Mul => format!("{target} *= {value};"),
            BinOp::BitAnd => format!("{target} &= {value};"),
            BinOp::BitOr => format!("{target} |= {value};"),
            BinOp::BitXor => format!("{target} ^= {value};"),
            // Dedicated helpers for the forms the target has no compound
            // operator for.
            BinOp::Div => format!("{target} = py.div({target}, {value});"),
            BinOp::FloorDiv => format!("{target} = py.floorDiv({target}, {value});"),
            BinOp::Mod => format!("{target} = py.mod({target}, {value});"),
            BinOp::Pow => format!("{target} = py.pow({target}, {value});"),
            // Shift RHS casts to the narrow unsigned shift-amount type.
            BinOp::LShift => format!("{target} = ({target} << @intCast({value}));"),
            BinOp::RShift => format!("{target} = ({target} >> @intCast({value}));"),
            BinOp::MatMul => format!("{target} = py.unsupported(\"matmul\");"),
        }
    }
}

fn aug_method_names(op: BinOp) -> (&'static str, &'static str) {
    match op {
        BinOp::Add => ("__iadd__", "__add__"),
        BinOp::Sub => ("__isub__", "__sub__"),
        BinOp::Mul => ("__imul__", "__mul__"),
        BinOp::Div => ("__itruediv__", "__truediv__"),
        BinOp::FloorDiv => ("__ifloordiv__", "__floordiv__"),
        BinOp::Mod => ("__imod__", "__mod__"),
        BinOp::Pow => ("__ipow__", "__pow__"),
        BinOp::BitAnd => ("__iand__", "__and__"),
        BinOp::BitOr => ("__ior__", "__or__"),
        BinOp::BitXor => ("__ixor__", "__xor__"),
        BinOp::LShift => ("__ilshift__", "__lshift__"),
        BinOp::RShift => ("__irshift__", "__rshift__"),
        BinOp::MatMul => ("__imatmul__", "__matmul__"),
    }
}

/// Combined read-op-value text for augmented rewrites.
fn binary_text(op: BinOp, current: &str, value: &str, ty: &NativeType) -> String {
    if ty.is_string() && op == BinOp::Add {
        return format!("try py.str.concat(__alloc, {current}, {value})");
    }
    match op {
        BinOp::Add => format!("({current} + {value})"),
        BinOp::Sub => format!("({current} - {value})"),
        BinOp::Mul => format!("({current} * {value})"),
        BinOp::Div => format!("py.div({current}, {value})"),
        BinOp::FloorDiv => format!("py.floorDiv({current}, {value})"),
        BinOp::Mod => format!("py.mod({current}, {value})"),
        BinOp::Pow => format!("py.pow({current}, {value})"),
        BinOp::LShift => format!("({current} << @intCast({value}))"),
        BinOp::RShift => format!("({current} >> @intCast({value}))"),
        BinOp::BitAnd => format!("({current} & {value})"),
        BinOp::BitOr => format!("({current} | {value})"),
        BinOp::BitXor => format!("({current} ^ {value})"),
        BinOp::MatMul => "py.unsupported(\"matmul\")".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aug_method_pairs() {
        assert_eq!(aug_method_names(BinOp::Add), ("__iadd__", "__add__"));
        assert_eq!(aug_method_names(BinOp::Pow), ("__ipow__", "__pow__"));
    }

    #[test]
    fn binary_text_for_dict_rewrites() {
        assert_eq!(
            binary_text(BinOp::Add, "d.get(k).?", "1", &NativeType::int()),
            "(d.get(k).? + 1)"
        );
        assert_eq!(
            binary_text(BinOp::FloorDiv, "a", "b", &NativeType::int()),
            "py.floorDiv(a, b)"
        );
    }
}
