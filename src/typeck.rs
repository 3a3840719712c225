use std::collections::HashMap;

use crate::ast::*;
use crate::diagnostic::{Diagnostic, Severity};
use crate::span::{Span, Spanned};
use crate::types::Ty;

/// A symbol table entry.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub ty: Ty,
    pub initialized: bool,
    pub constant: bool,
    pub is_function: bool,
    /// Scope depth the entry was introduced at.
    pub level: usize,
    pub return_ty: Ty,
    pub params: Vec<Ty>,
}

impl Symbol {
    fn var(ty: Ty, initialized: bool, level: usize) -> Self {
        Self {
            ty,
            initialized,
            constant: false,
            is_function: false,
            level,
            return_ty: Ty::Void,
            params: Vec::new(),
        }
    }

    fn function(params: Vec<Ty>, return_ty: Ty, level: usize) -> Self {
        Self {
            ty: Ty::Function,
            initialized: true,
            constant: false,
            is_function: true,
            level,
            return_ty,
            params,
        }
    }
}

/// Scope-aware type checker. Walks the AST, assigns every expression a type,
/// and accumulates diagnostics; individual type errors never stop the walk.
/// An offending expression types as `Unknown`, which suppresses cascades.
pub struct TypeChecker {
    /// Stack of scopes, innermost last. Scope 0 holds builtins.
    scopes: Vec<HashMap<String, Symbol>>,
    diagnostics: Vec<Diagnostic>,
    /// Names of enclosing functions, for return-type refinement.
    fn_stack: Vec<String>,
    loop_depth: u32,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeChecker {
    pub fn new() -> Self {
        let mut tc = Self {
            scopes: vec![HashMap::new()],
            diagnostics: Vec::new(),
            fn_stack: Vec::new(),
            loop_depth: 0,
        };
        tc.register_builtins();
        tc
    }

    fn register_builtins(&mut self) {
        // `print` accepts one value of any printable type; the argument
        // check is special-cased in check_call.
        self.scopes[0].insert(
            "print".to_string(),
            Symbol::function(vec![Ty::Auto], Ty::Void, 0),
        );
    }

    /// Check a whole program. `Ok` means zero errors; warnings ride along in
    /// the `Ok` case and the full list is returned on `Err`.
    pub fn check_program(mut self, program: &Program) -> Result<Vec<Diagnostic>, Vec<Diagnostic>> {
        self.push_scope();
        for stmt in &program.stmts {
            self.check_stmt(stmt);
        }
        self.pop_scope();

        let has_errors = self
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error);
        if has_errors {
            Err(self.diagnostics)
        } else {
            Ok(self.diagnostics)
        }
    }

    // --- Scope management ---

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn level(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Introduce a symbol at the current level. Shadowing an outer level is
    /// allowed; redeclaring within the same level is an error.
    fn declare(&mut self, name: &Spanned<String>, symbol: Symbol) {
        let scope = self.scopes.last_mut().unwrap();
        if scope.contains_key(&name.node) {
            self.error(
                format!("'{}' is already declared in this scope", name.node),
                name.span,
            );
            return;
        }
        scope.insert(name.node.clone(), symbol);
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }

    fn error(&mut self, message: String, span: Span) {
        self.diagnostics.push(Diagnostic::error(message, span));
    }

    fn resolve_annotation(&mut self, annotation: &Spanned<String>) -> Ty {
        match Ty::from_annotation(&annotation.node) {
            Some(ty) => ty,
            None => {
                self.error(
                    format!("unknown type name '{}'", annotation.node),
                    annotation.span,
                );
                Ty::Unknown
            }
        }
    }

    // --- Statements ---

    fn check_stmt(&mut self, stmt: &Spanned<Stmt>) {
        match &stmt.node {
            Stmt::VarDecl {
                name,
                annotation,
                init,
            } => {
                let init_ty = init.as_ref().map(|e| self.infer_expr(e));
                let declared = annotation.as_ref().map(|a| self.resolve_annotation(a));
                if let (Some(decl), Some(val)) = (declared, init_ty) {
                    if !decl.compatible(val) && decl != Ty::Unknown && val != Ty::Unknown {
                        self.error(
                            format!(
                                "cannot initialize '{}' of type {} with a value of type {}",
                                name.node,
                                decl.display(),
                                val.display()
                            ),
                            name.span,
                        );
                    }
                }
                let ty = declared.or(init_ty).unwrap_or(Ty::Auto);
                if ty == Ty::Void {
                    self.error(
                        format!("cannot declare '{}' with a void value", name.node),
                        name.span,
                    );
                }
                let level = self.level();
                self.declare(name, Symbol::var(ty, init.is_some(), level));
            }
            Stmt::ConstDecl {
                name,
                annotation,
                init,
            } => {
                let init_ty = self.infer_expr(init);
                let declared = annotation.as_ref().map(|a| self.resolve_annotation(a));
                if let Some(decl) = declared {
                    if !decl.compatible(init_ty) && decl != Ty::Unknown && init_ty != Ty::Unknown {
                        self.error(
                            format!(
                                "cannot initialize '{}' of type {} with a value of type {}",
                                name.node,
                                decl.display(),
                                init_ty.display()
                            ),
                            name.span,
                        );
                    }
                }
                let ty = declared.unwrap_or(init_ty);
                if ty == Ty::Void {
                    self.error(
                        format!("cannot declare '{}' with a void value", name.node),
                        name.span,
                    );
                }
                let level = self.level();
                let mut sym = Symbol::var(ty, true, level);
                sym.constant = true;
                self.declare(name, sym);
            }
            Stmt::FnDecl {
                name,
                params,
                return_annotation,
                body,
            } => self.check_fn_decl(name, params, return_annotation.as_ref(), body),
            Stmt::If {
                cond,
                then_block,
                elif_branches,
                else_block,
            } => {
                self.check_condition(cond);
                self.check_block(&then_block.node);
                for (elif_cond, elif_body) in elif_branches {
                    self.check_condition(elif_cond);
                    self.check_block(&elif_body.node);
                }
                if let Some(else_body) = else_block {
                    self.check_block(&else_body.node);
                }
            }
            Stmt::While { cond, body } => {
                self.check_condition(cond);
                self.loop_depth += 1;
                self.check_block(&body.node);
                self.loop_depth -= 1;
            }
            Stmt::DoWhile { body, cond } => {
                self.loop_depth += 1;
                self.check_block(&body.node);
                self.loop_depth -= 1;
                self.check_condition(cond);
            }
            Stmt::For { var, iter, body } => {
                // The induction variable lives in a scope spanning only the
                // loop body.
                let var_ty = match iter {
                    ForIter::Range(start, end) => {
                        for bound in [start, end] {
                            let ty = self.infer_expr(bound);
                            if ty != Ty::Int && ty != Ty::Unknown && ty != Ty::Auto {
                                self.error(
                                    format!("range bound must be int, got {}", ty.display()),
                                    bound.span,
                                );
                            }
                        }
                        Ty::Int
                    }
                    ForIter::Expr(iterable) => {
                        let ty = self.infer_expr(iterable);
                        match ty {
                            Ty::Array => Ty::Unknown,
                            Ty::Str => Ty::Str,
                            Ty::Unknown | Ty::Auto => Ty::Unknown,
                            other => {
                                self.error(
                                    format!(
                                        "for-in target must be an array or string, got {}",
                                        other.display()
                                    ),
                                    iterable.span,
                                );
                                Ty::Unknown
                            }
                        }
                    }
                };
                self.push_scope();
                let level = self.level();
                self.declare(var, Symbol::var(var_ty, true, level));
                self.loop_depth += 1;
                for s in &body.node.stmts {
                    self.check_stmt(s);
                }
                self.loop_depth -= 1;
                self.pop_scope();
            }
            Stmt::Return(value) => {
                let value_ty = match value {
                    Some(e) => self.infer_expr(e),
                    None => Ty::Void,
                };
                let span = value.as_ref().map(|e| e.span).unwrap_or(stmt.span);
                match self.fn_stack.last().cloned() {
                    None => {
                        self.error("'return' outside of a function".to_string(), span);
                    }
                    Some(fn_name) => {
                        let mut mismatch = None;
                        if let Some(sym) = self.lookup_mut(&fn_name) {
                            if matches!(sym.return_ty, Ty::Auto | Ty::Unknown) {
                                // First concrete return refines the type.
                                sym.return_ty = value_ty;
                            } else if !sym.return_ty.compatible(value_ty)
                                && value_ty != Ty::Unknown
                            {
                                mismatch = Some(sym.return_ty);
                            }
                        }
                        if let Some(expected) = mismatch {
                            self.error(
                                format!(
                                    "return type mismatch: function '{}' returns {}, found {}",
                                    fn_name,
                                    expected.display(),
                                    value_ty.display()
                                ),
                                span,
                            );
                        }
                    }
                }
            }
            Stmt::Break => {
                if self.loop_depth == 0 {
                    self.error("'break' outside of a loop".to_string(), stmt.span);
                }
            }
            Stmt::Continue => {
                if self.loop_depth == 0 {
                    self.error("'continue' outside of a loop".to_string(), stmt.span);
                }
            }
            Stmt::Block(block) => self.check_block(&block.node),
            Stmt::Expr(expr) => {
                self.infer_expr(expr);
            }
            Stmt::Embed { .. } => {}
        }
    }

    fn check_fn_decl(
        &mut self,
        name: &Spanned<String>,
        params: &[Param],
        return_annotation: Option<&Spanned<String>>,
        body: &Spanned<Block>,
    ) {
        let param_tys: Vec<Ty> = params
            .iter()
            .map(|p| {
                p.annotation
                    .as_ref()
                    .map(|a| self.resolve_annotation(a))
                    .unwrap_or(Ty::Auto)
            })
            .collect();
        let return_ty = return_annotation
            .map(|a| self.resolve_annotation(a))
            .unwrap_or(Ty::Auto);

        // Register before checking the body so the function can call itself.
        let level = self.level();
        self.declare(name, Symbol::function(param_tys.clone(), return_ty, level));

        self.push_scope();
        let inner = self.level();
        for (param, ty) in params.iter().zip(param_tys) {
            self.declare(&param.name, Symbol::var(ty, true, inner));
        }
        self.fn_stack.push(name.node.clone());
        let saved_loops = std::mem::take(&mut self.loop_depth);
        for s in &body.node.stmts {
            self.check_stmt(s);
        }
        self.loop_depth = saved_loops;
        self.fn_stack.pop();
        self.pop_scope();
    }

    fn check_block(&mut self, block: &Block) {
        self.push_scope();
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
        self.pop_scope();
    }

    fn check_condition(&mut self, cond: &Spanned<Expr>) {
        let ty = self.infer_expr(cond);
        if ty != Ty::Bool && ty != Ty::Unknown && ty != Ty::Auto {
            self.error(
                format!("condition must be bool, got {}", ty.display()),
                cond.span,
            );
        }
    }

    // --- Expressions ---

    fn infer_expr(&mut self, expr: &Spanned<Expr>) -> Ty {
        match &expr.node {
            Expr::Literal(lit) => literal_ty(lit),
            Expr::Ident(name) => match self.lookup(name) {
                Some(sym) => sym.ty,
                None => {
                    self.error(format!("unknown identifier '{}'", name), expr.span);
                    Ty::Unknown
                }
            },
            Expr::Unary { op, operand } => {
                let ty = self.infer_expr(operand);
                match op {
                    UnaryOp::Not => {
                        if ty != Ty::Bool && ty != Ty::Unknown && ty != Ty::Auto {
                            self.error(
                                format!("operand of '!' must be bool, got {}", ty.display()),
                                operand.span,
                            );
                        }
                        Ty::Bool
                    }
                    UnaryOp::Neg => {
                        if ty.is_numeric() || ty == Ty::Auto {
                            if ty == Ty::Auto {
                                Ty::Int
                            } else {
                                ty
                            }
                        } else if ty == Ty::Unknown {
                            Ty::Unknown
                        } else {
                            self.error(
                                format!("operand of '-' must be numeric, got {}", ty.display()),
                                operand.span,
                            );
                            Ty::Unknown
                        }
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lt = self.infer_expr(lhs);
                let rt = self.infer_expr(rhs);
                self.infer_binary(*op, lt, rt, expr.span)
            }
            Expr::Assign { op, target, value } => self.check_assign(*op, target, value),
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                self.check_condition(cond);
                let then_ty = self.infer_expr(then_expr);
                let else_ty = self.infer_expr(else_expr);
                if then_ty == Ty::Unknown || else_ty == Ty::Unknown {
                    return Ty::Unknown;
                }
                if !then_ty.compatible(else_ty) {
                    self.error(
                        format!(
                            "ternary branches have incompatible types {} and {}",
                            then_ty.display(),
                            else_ty.display()
                        ),
                        expr.span,
                    );
                    return Ty::Unknown;
                }
                if then_ty.is_numeric() && else_ty.is_numeric() {
                    then_ty.promote(else_ty)
                } else if then_ty == Ty::Auto {
                    else_ty
                } else {
                    then_ty
                }
            }
            Expr::Call { name, args } => self.check_call(name, args),
            Expr::Index { target, index } => {
                let target_ty = self.infer_expr(target);
                let index_ty = self.infer_expr(index);
                if index_ty != Ty::Int && index_ty != Ty::Unknown && index_ty != Ty::Auto {
                    self.error(
                        format!("index must be int, got {}", index_ty.display()),
                        index.span,
                    );
                }
                match target_ty {
                    // Array element types are not tracked.
                    Ty::Array => Ty::Unknown,
                    Ty::Str => Ty::Str,
                    Ty::Unknown | Ty::Auto => Ty::Unknown,
                    other => {
                        self.error(
                            format!("cannot index into {}", other.display()),
                            target.span,
                        );
                        Ty::Unknown
                    }
                }
            }
            Expr::Member { target, field: _ } => {
                let target_ty = self.infer_expr(target);
                if !matches!(target_ty, Ty::Object | Ty::Unknown | Ty::Auto) {
                    self.error(
                        format!("member access requires an object, got {}", target_ty.display()),
                        target.span,
                    );
                }
                Ty::Unknown
            }
            Expr::Array(elements) => {
                let mut elem_ty: Option<Ty> = None;
                for e in elements {
                    let ty = self.infer_expr(e);
                    if ty == Ty::Unknown {
                        continue;
                    }
                    match elem_ty {
                        None => elem_ty = Some(ty),
                        Some(prev) => {
                            if !prev.compatible(ty) {
                                self.error(
                                    format!(
                                        "array elements have incompatible types {} and {}",
                                        prev.display(),
                                        ty.display()
                                    ),
                                    e.span,
                                );
                            }
                        }
                    }
                }
                Ty::Array
            }
            Expr::Object(entries) => {
                for (_key, value) in entries {
                    self.infer_expr(value);
                }
                Ty::Object
            }
        }
    }

    fn infer_binary(&mut self, op: BinOp, lt: Ty, rt: Ty, span: Span) -> Ty {
        if lt == Ty::Unknown || rt == Ty::Unknown {
            return Ty::Unknown;
        }
        if op.is_arithmetic() {
            // `+` with a string on either side concatenates.
            if op == BinOp::Add && (lt == Ty::Str || rt == Ty::Str) {
                let other = if lt == Ty::Str { rt } else { lt };
                if matches!(other, Ty::Str | Ty::Int | Ty::Float | Ty::Bool | Ty::Auto) {
                    return Ty::Str;
                }
                self.error(
                    format!(
                        "cannot concatenate string with {}",
                        other.display()
                    ),
                    span,
                );
                return Ty::Unknown;
            }
            let l_num = lt.is_numeric() || lt == Ty::Auto;
            let r_num = rt.is_numeric() || rt == Ty::Auto;
            if l_num && r_num {
                return lt.promote(rt);
            }
            self.error(
                format!(
                    "invalid operands to '{}': {} and {}",
                    op.as_str(),
                    lt.display(),
                    rt.display()
                ),
                span,
            );
            Ty::Unknown
        } else if op.is_comparison() {
            let numeric = (lt.is_numeric() || lt == Ty::Auto) && (rt.is_numeric() || rt == Ty::Auto);
            let strings = lt == Ty::Str && rt == Ty::Str;
            if numeric || strings {
                Ty::Bool
            } else {
                self.error(
                    format!(
                        "invalid operands to '{}': {} and {}",
                        op.as_str(),
                        lt.display(),
                        rt.display()
                    ),
                    span,
                );
                Ty::Unknown
            }
        } else {
            // && and ||
            if (lt == Ty::Bool || lt == Ty::Auto) && (rt == Ty::Bool || rt == Ty::Auto) {
                Ty::Bool
            } else {
                self.error(
                    format!(
                        "operands of '{}' must be bool, got {} and {}",
                        op.as_str(),
                        lt.display(),
                        rt.display()
                    ),
                    span,
                );
                Ty::Unknown
            }
        }
    }

    fn check_assign(
        &mut self,
        op: AssignOp,
        target: &Spanned<Expr>,
        value: &Spanned<Expr>,
    ) -> Ty {
        if matches!(
            op,
            AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::XorAssign
        ) {
            self.error(
                format!("'{}' is not supported", op.as_str()),
                target.span,
            );
            self.infer_expr(value);
            return Ty::Unknown;
        }

        match &target.node {
            Expr::Ident(name) => {
                let value_ty = self.infer_expr(value);
                let Some(sym) = self.lookup(name) else {
                    self.error(format!("unknown identifier '{}'", name), target.span);
                    return Ty::Unknown;
                };
                let (target_ty, constant) = (sym.ty, sym.constant);
                if constant {
                    self.error(
                        format!("cannot assign to constant '{}'", name),
                        target.span,
                    );
                    return Ty::Unknown;
                }

                if let Some(binop) = op.binop() {
                    // Compound assignment checks like `target op value`.
                    let result = self.infer_binary(binop, target_ty, value_ty, target.span);
                    if result != Ty::Unknown
                        && !target_ty.compatible(result)
                        && target_ty != Ty::Unknown
                    {
                        self.error(
                            format!(
                                "cannot assign {} to '{}' of type {}",
                                result.display(),
                                name,
                                target_ty.display()
                            ),
                            target.span,
                        );
                    }
                    return target_ty;
                }

                if value_ty == Ty::Void {
                    self.error("cannot assign a void value".to_string(), value.span);
                    return Ty::Unknown;
                }
                if target_ty == Ty::Auto {
                    // First assignment fixes an auto variable's type.
                    if let Some(sym) = self.lookup_mut(name) {
                        sym.ty = value_ty;
                        sym.initialized = true;
                    }
                    return value_ty;
                }
                if !target_ty.compatible(value_ty)
                    && target_ty != Ty::Unknown
                    && value_ty != Ty::Unknown
                {
                    self.error(
                        format!(
                            "cannot assign {} to '{}' of type {}",
                            value_ty.display(),
                            name,
                            target_ty.display()
                        ),
                        target.span,
                    );
                }
                if let Some(sym) = self.lookup_mut(name) {
                    sym.initialized = true;
                }
                target_ty
            }
            Expr::Index { .. } | Expr::Member { .. } => {
                // Element and member types are not tracked; check both sides
                // for their own errors and let the store through.
                self.infer_expr(target);
                self.infer_expr(value)
            }
            _ => {
                self.error("invalid assignment target".to_string(), target.span);
                self.infer_expr(value);
                Ty::Unknown
            }
        }
    }

    fn check_call(&mut self, name: &Spanned<String>, args: &[Spanned<Expr>]) -> Ty {
        let arg_tys: Vec<Ty> = args.iter().map(|a| self.infer_expr(a)).collect();

        let Some(sym) = self.lookup(&name.node) else {
            self.error(format!("unknown function '{}'", name.node), name.span);
            return Ty::Unknown;
        };
        let (is_function, params, return_ty) = (sym.is_function, sym.params.clone(), sym.return_ty);
        if !is_function {
            self.error(format!("'{}' is not a function", name.node), name.span);
            return Ty::Unknown;
        }

        if name.node == "print" {
            if args.len() != 1 {
                self.error(
                    format!("print takes exactly 1 argument, got {}", args.len()),
                    name.span,
                );
                return Ty::Void;
            }
            let arg = arg_tys[0];
            if !matches!(
                arg,
                Ty::Int | Ty::Float | Ty::Bool | Ty::Str | Ty::Unknown | Ty::Auto
            ) {
                self.error(
                    format!("cannot print a value of type {}", arg.display()),
                    args[0].span,
                );
            }
            return Ty::Void;
        }

        if args.len() != params.len() {
            self.error(
                format!(
                    "function '{}' expects {} argument{}, got {}",
                    name.node,
                    params.len(),
                    if params.len() == 1 { "" } else { "s" },
                    args.len()
                ),
                name.span,
            );
            return return_ty;
        }
        for ((arg, arg_ty), param_ty) in args.iter().zip(&arg_tys).zip(&params) {
            if *arg_ty == Ty::Void {
                self.error("cannot pass a void value as an argument".to_string(), arg.span);
                continue;
            }
            if !param_ty.compatible(*arg_ty) && *arg_ty != Ty::Unknown && *param_ty != Ty::Unknown
            {
                self.error(
                    format!(
                        "argument of type {} is not compatible with parameter of type {}",
                        arg_ty.display(),
                        param_ty.display()
                    ),
                    arg.span,
                );
            }
        }
        return_ty
    }
}

fn literal_ty(lit: &Literal) -> Ty {
    match lit {
        Literal::Int(_) => Ty::Int,
        Literal::Float(_) => Ty::Float,
        Literal::Str(_) => Ty::Str,
        Literal::Bool(_) => Ty::Bool,
        Literal::Null => Ty::Null,
    }
}
