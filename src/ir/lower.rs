//! AST-to-IR lowering.
//!
//! Each user function becomes one IR function; top-level statements collect
//! into `main`. Constant integer and float arithmetic folds at lowering
//! time, and a branch guarded by a literal `true`/`false` is pruned.
//!
//! The native back-end covers int, bool, and string values. Arrays, object
//! literals, member access, embedded blocks, and non-constant float
//! arithmetic have no opcodes; lowering reports them and the compilation
//! fails.

use std::collections::HashMap;

use super::{Function, Inst, Module, PrintKind};
use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::types::Ty;

/// Lower a type-checked program into an IR module.
pub fn lower_program(program: &Program) -> Result<Module, Vec<Diagnostic>> {
    let mut lowerer = Lowerer::new();
    lowerer.lower_program(program)
}

#[derive(Clone, Debug)]
struct FnSig {
    argc: usize,
    return_ty: Ty,
}

/// A folded constant.
#[derive(Clone, Copy, Debug)]
enum Folded {
    Int(i64),
    Float(f64),
}

struct LoopLabels {
    continue_target: String,
    break_target: String,
}

struct Lowerer {
    module: Module,
    diagnostics: Vec<Diagnostic>,
    // Label counters are per-module, one for if-chains and one for loops.
    if_counter: u32,
    loop_counter: u32,
    fn_sigs: HashMap<String, FnSig>,

    // State of the function currently being lowered.
    insts: Vec<Inst>,
    scopes: Vec<HashMap<String, (i32, Ty)>>,
    next_slot: i32,
    locals: u32,
    loop_stack: Vec<LoopLabels>,
    current_fn: String,
}

impl Lowerer {
    fn new() -> Self {
        Self {
            module: Module::new(),
            diagnostics: Vec::new(),
            if_counter: 0,
            loop_counter: 0,
            fn_sigs: HashMap::new(),
            insts: Vec::new(),
            scopes: vec![HashMap::new()],
            next_slot: 0,
            locals: 0,
            loop_stack: Vec::new(),
            current_fn: "main".to_string(),
        }
    }

    fn lower_program(mut self, program: &Program) -> Result<Module, Vec<Diagnostic>> {
        // Top-level statements form `main`; function declarations are
        // lowered in place so signatures exist before their call sites.
        for stmt in &program.stmts {
            self.lower_stmt(stmt);
        }
        self.finish_function("main", Ty::Int, Vec::new());

        if self.diagnostics.is_empty() {
            Ok(self.module)
        } else {
            Err(self.diagnostics)
        }
    }

    /// Seal the current function: guarantee termination with an implicit
    /// `const_int 0; return`, then push it onto the module.
    fn finish_function(&mut self, name: &str, return_ty: Ty, params: Vec<(String, Ty)>) {
        self.insts.push(Inst::ConstInt(0));
        self.insts.push(Inst::Return);
        let function = Function {
            name: name.to_string(),
            return_ty,
            params,
            locals: self.locals,
            insts: std::mem::take(&mut self.insts),
        };
        self.module.functions.push(function);
    }

    fn error(&mut self, message: String, span: Span) {
        self.diagnostics.push(Diagnostic::error(message, span));
    }

    fn unsupported(&mut self, what: &str, span: Span) {
        self.error(
            format!("{} not supported by the native back-end", what),
            span,
        );
    }

    // --- Labels ---

    fn if_labels(&mut self) -> (String, String) {
        let n = self.if_counter;
        self.if_counter += 1;
        (format!("L_ELSE_{}", n), format!("L_END_IF_{}", n))
    }

    fn loop_labels(&mut self) -> (u32, String, String) {
        let n = self.loop_counter;
        self.loop_counter += 1;
        (
            n,
            format!("L_WHILE_START_{}", n),
            format!("L_WHILE_END_{}", n),
        )
    }

    // --- Slots ---

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Allocate the next frame slot; offsets grow monotonically by -8 in
    /// declaration order and are never reused within a function.
    fn alloc_slot(&mut self, name: &str, ty: Ty) -> i32 {
        self.next_slot -= 8;
        self.locals += 1;
        self.scopes
            .last_mut()
            .unwrap()
            .insert(name.to_string(), (self.next_slot, ty));
        self.next_slot
    }

    fn lookup_slot(&self, name: &str) -> Option<(i32, Ty)> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn set_slot_ty(&mut self, name: &str, ty: Ty) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(entry) = scope.get_mut(name) {
                entry.1 = ty;
                return;
            }
        }
    }

    // --- Statements ---

    fn lower_stmt(&mut self, stmt: &Spanned<Stmt>) {
        match &stmt.node {
            Stmt::VarDecl {
                name,
                annotation,
                init,
            } => {
                let ty = annotation
                    .as_ref()
                    .and_then(|a| Ty::from_annotation(&a.node))
                    .or_else(|| init.as_ref().map(|e| self.expr_ty(e)))
                    .unwrap_or(Ty::Auto);
                let slot = self.alloc_slot(&name.node, ty);
                if let Some(init) = init {
                    self.insts.push(Inst::Comment(format!("var {}", name.node)));
                    self.lower_expr(init);
                    self.insts.push(Inst::Store(slot));
                }
            }
            Stmt::ConstDecl { name, init, .. } => {
                let ty = self.expr_ty(init);
                let slot = self.alloc_slot(&name.node, ty);
                self.insts
                    .push(Inst::Comment(format!("const {}", name.node)));
                self.lower_expr(init);
                self.insts.push(Inst::Store(slot));
            }
            Stmt::FnDecl {
                name,
                params,
                return_annotation,
                body,
            } => self.lower_fn_decl(name, params, return_annotation.as_ref(), body),
            Stmt::If {
                cond,
                then_block,
                elif_branches,
                else_block,
            } => {
                // Rebuild the elif chain as nested if/else.
                let mut else_arm: Option<&Spanned<Block>> = else_block.as_ref();
                let branches: Vec<(&Spanned<Expr>, &Spanned<Block>)> =
                    std::iter::once((cond, then_block))
                        .chain(elif_branches.iter().map(|(c, b)| (c, b)))
                        .collect();
                self.lower_if_chain(&branches, &mut else_arm);
            }
            Stmt::While { cond, body } => {
                let (_, start, end) = self.loop_labels();
                self.insts.push(Inst::Label(start.clone()));
                self.lower_condition(cond);
                self.insts.push(Inst::JumpIfNot(end.clone()));
                self.loop_stack.push(LoopLabels {
                    continue_target: start.clone(),
                    break_target: end.clone(),
                });
                self.lower_block(&body.node);
                self.loop_stack.pop();
                self.insts.push(Inst::Jump(start));
                self.insts.push(Inst::Label(end));
            }
            Stmt::DoWhile { body, cond } => {
                let (n, start, end) = self.loop_labels();
                let cont = format!("L_WHILE_CONT_{}", n);
                self.insts.push(Inst::Label(start.clone()));
                self.loop_stack.push(LoopLabels {
                    continue_target: cont.clone(),
                    break_target: end.clone(),
                });
                self.lower_block(&body.node);
                self.loop_stack.pop();
                self.insts.push(Inst::Label(cont));
                self.lower_condition(cond);
                self.insts.push(Inst::JumpIfNot(end.clone()));
                self.insts.push(Inst::Jump(start));
                self.insts.push(Inst::Label(end));
            }
            Stmt::For { var, iter, body } => match iter {
                ForIter::Range(start_expr, end_expr) => {
                    self.lower_for_range(var, start_expr, end_expr, body)
                }
                ForIter::Expr(iterable) => {
                    self.unsupported("iterating a value is", iterable.span);
                }
            },
            Stmt::Return(value) => {
                match value {
                    Some(e) => {
                        let ty = self.expr_ty(e);
                        self.lower_expr(e);
                        // First concrete return refines an auto signature so
                        // later call sites type correctly.
                        if let Some(sig) = self.fn_sigs.get_mut(&self.current_fn) {
                            if matches!(sig.return_ty, Ty::Auto | Ty::Unknown)
                                && !matches!(ty, Ty::Auto | Ty::Unknown)
                            {
                                sig.return_ty = ty;
                            }
                        }
                    }
                    None => self.insts.push(Inst::ConstInt(0)),
                }
                self.insts.push(Inst::Return);
            }
            Stmt::Break => match self.loop_stack.last() {
                Some(labels) => {
                    let target = labels.break_target.clone();
                    self.insts.push(Inst::Jump(target));
                }
                None => self.error(
                    "internal error: 'break' outside of a loop".to_string(),
                    stmt.span,
                ),
            },
            Stmt::Continue => match self.loop_stack.last() {
                Some(labels) => {
                    let target = labels.continue_target.clone();
                    self.insts.push(Inst::Jump(target));
                }
                None => self.error(
                    "internal error: 'continue' outside of a loop".to_string(),
                    stmt.span,
                ),
            },
            Stmt::Block(block) => self.lower_block(&block.node),
            Stmt::Expr(expr) => {
                let ty = self.expr_ty(expr);
                self.lower_expr(expr);
                // Every non-void expression pushed one value; statements are
                // stack-neutral.
                if ty != Ty::Void {
                    self.insts.push(Inst::Pop);
                }
            }
            Stmt::Embed { .. } => {
                self.unsupported("embedded blocks are", stmt.span);
            }
        }
    }

    fn lower_block(&mut self, block: &Block) {
        self.push_scope();
        for stmt in &block.stmts {
            self.lower_stmt(stmt);
        }
        self.pop_scope();
    }

    fn lower_if_chain(
        &mut self,
        branches: &[(&Spanned<Expr>, &Spanned<Block>)],
        else_arm: &mut Option<&Spanned<Block>>,
    ) {
        let Some(((cond, body), rest)) = branches.split_first() else {
            if let Some(block) = else_arm.take() {
                self.lower_block(&block.node);
            }
            return;
        };

        // Dead-branch pruning: a literal condition selects one arm.
        if let Expr::Literal(Literal::Bool(value)) = &cond.node {
            if *value {
                self.lower_block(&body.node);
            } else {
                self.lower_if_chain(rest, else_arm);
            }
            return;
        }

        let has_else = !rest.is_empty() || else_arm.is_some();
        let (else_label, end_label) = self.if_labels();

        self.lower_condition(cond);
        if has_else {
            self.insts.push(Inst::JumpIfNot(else_label.clone()));
            self.lower_block(&body.node);
            self.insts.push(Inst::Jump(end_label.clone()));
            self.insts.push(Inst::Label(else_label));
            self.lower_if_chain(rest, else_arm);
            self.insts.push(Inst::Label(end_label));
        } else {
            // Without an else arm the false edge goes straight to the end.
            self.insts.push(Inst::JumpIfNot(end_label.clone()));
            self.lower_block(&body.node);
            self.insts.push(Inst::Label(end_label));
        }
    }

    /// `for i in a..b` desugars to an induction slot and a while shape. The
    /// end bound is evaluated once into a hidden slot.
    fn lower_for_range(
        &mut self,
        var: &Spanned<String>,
        start_expr: &Spanned<Expr>,
        end_expr: &Spanned<Expr>,
        body: &Spanned<Block>,
    ) {
        let (n, start, end) = self.loop_labels();
        let cont = format!("L_WHILE_CONT_{}", n);

        self.push_scope();
        let var_slot = self.alloc_slot(&var.node, Ty::Int);
        // '$' cannot appear in identifiers, so the bound slot cannot collide.
        let end_slot = self.alloc_slot(&format!("$for_end_{}", n), Ty::Int);

        self.insts
            .push(Inst::Comment(format!("for {} in range", var.node)));
        self.lower_expr(start_expr);
        self.insts.push(Inst::Store(var_slot));
        self.lower_expr(end_expr);
        self.insts.push(Inst::Store(end_slot));

        self.insts.push(Inst::Label(start.clone()));
        self.insts.push(Inst::Load(var_slot));
        self.insts.push(Inst::Load(end_slot));
        self.insts.push(Inst::Lt);
        self.insts.push(Inst::JumpIfNot(end.clone()));

        self.loop_stack.push(LoopLabels {
            continue_target: cont.clone(),
            break_target: end.clone(),
        });
        self.lower_block(&body.node);
        self.loop_stack.pop();

        self.insts.push(Inst::Label(cont));
        self.insts.push(Inst::Load(var_slot));
        self.insts.push(Inst::ConstInt(1));
        self.insts.push(Inst::Add);
        self.insts.push(Inst::Store(var_slot));
        self.insts.push(Inst::Jump(start));
        self.insts.push(Inst::Label(end));
        self.pop_scope();
    }

    fn lower_fn_decl(
        &mut self,
        name: &Spanned<String>,
        params: &[Param],
        return_annotation: Option<&Spanned<String>>,
        body: &Spanned<Block>,
    ) {
        let return_ty = return_annotation
            .and_then(|a| Ty::from_annotation(&a.node))
            .unwrap_or(Ty::Auto);
        self.fn_sigs.insert(
            name.node.clone(),
            FnSig {
                argc: params.len(),
                return_ty,
            },
        );

        // Park the enclosing function's state while this body lowers.
        let saved_insts = std::mem::take(&mut self.insts);
        let saved_scopes = std::mem::replace(&mut self.scopes, vec![HashMap::new()]);
        let saved_slot = std::mem::take(&mut self.next_slot);
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_loops = std::mem::take(&mut self.loop_stack);
        let saved_fn = std::mem::replace(&mut self.current_fn, name.node.clone());

        // Parameters take the first slots; the emitter copies the incoming
        // stack arguments into them in the prologue.
        let mut param_list = Vec::new();
        for param in params {
            let ty = param
                .annotation
                .as_ref()
                .and_then(|a| Ty::from_annotation(&a.node))
                .unwrap_or(Ty::Auto);
            self.alloc_slot(&param.name.node, ty);
            param_list.push((param.name.node.clone(), ty));
        }

        for stmt in &body.node.stmts {
            self.lower_stmt(stmt);
        }

        let final_ty = self
            .fn_sigs
            .get(&name.node)
            .map(|s| s.return_ty)
            .unwrap_or(Ty::Auto);
        self.finish_function(&name.node, final_ty, param_list);

        self.insts = saved_insts;
        self.scopes = saved_scopes;
        self.next_slot = saved_slot;
        self.locals = saved_locals;
        self.loop_stack = saved_loops;
        self.current_fn = saved_fn;
    }

    /// Lower a boolean condition; the emitted code leaves one 0/1 value.
    fn lower_condition(&mut self, cond: &Spanned<Expr>) {
        self.lower_expr(cond);
    }

    // --- Expressions ---

    fn lower_expr(&mut self, expr: &Spanned<Expr>) {
        // Constant arithmetic folds to a single push.
        if matches!(expr.node, Expr::Binary { .. } | Expr::Unary { .. }) {
            if let Some(folded) = self.fold(expr) {
                match folded {
                    Folded::Int(v) => self.insts.push(Inst::ConstInt(v)),
                    Folded::Float(v) => self.insts.push(Inst::ConstFloat(v)),
                }
                return;
            }
        }

        match &expr.node {
            Expr::Literal(lit) => self.lower_literal(lit),
            Expr::Ident(name) => match self.lookup_slot(name) {
                Some((slot, _)) => self.insts.push(Inst::Load(slot)),
                None => {
                    self.error(
                        format!("internal error: '{}' has no stack slot", name),
                        expr.span,
                    );
                    self.insts.push(Inst::ConstInt(0));
                }
            },
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    self.lower_expr(operand);
                    self.insts.push(Inst::Not);
                }
                UnaryOp::Neg => {
                    let ty = self.expr_ty(operand);
                    if ty == Ty::Float {
                        self.unsupported("float arithmetic is", expr.span);
                        self.insts.push(Inst::ConstInt(0));
                        return;
                    }
                    // 0 - x
                    self.insts.push(Inst::ConstInt(0));
                    self.lower_expr(operand);
                    self.insts.push(Inst::Sub);
                }
            },
            Expr::Binary { op, lhs, rhs } => {
                let lt = self.expr_ty(lhs);
                let rt = self.expr_ty(rhs);
                if (lt == Ty::Float || rt == Ty::Float) && !op.is_logical() {
                    self.unsupported("float arithmetic is", expr.span);
                    self.insts.push(Inst::ConstInt(0));
                    return;
                }
                self.lower_expr(lhs);
                self.lower_expr(rhs);
                self.insts.push(binop_inst(*op));
            }
            Expr::Assign { op, target, value } => self.lower_assign(*op, target, value, expr.span),
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let (else_label, end_label) = self.if_labels();
                self.lower_condition(cond);
                self.insts.push(Inst::JumpIfNot(else_label.clone()));
                self.lower_expr(then_expr);
                self.insts.push(Inst::Jump(end_label.clone()));
                self.insts.push(Inst::Label(else_label));
                self.lower_expr(else_expr);
                self.insts.push(Inst::Label(end_label));
            }
            Expr::Call { name, args } => self.lower_call(name, args, expr.span),
            Expr::Index { target, .. } => {
                self.unsupported("indexing is", target.span);
                self.insts.push(Inst::ConstInt(0));
            }
            Expr::Member { target, .. } => {
                self.unsupported("member access is", target.span);
                self.insts.push(Inst::ConstInt(0));
            }
            Expr::Array(_) => {
                self.unsupported("array literals are", expr.span);
                self.insts.push(Inst::ConstInt(0));
            }
            Expr::Object(_) => {
                self.unsupported("object literals are", expr.span);
                self.insts.push(Inst::ConstInt(0));
            }
        }
    }

    fn lower_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Int(v) => self.insts.push(Inst::ConstInt(*v)),
            Literal::Float(v) => self.insts.push(Inst::ConstFloat(*v)),
            Literal::Str(s) => {
                let label = self.module.intern_string(s);
                self.insts.push(Inst::ConstStr(label));
            }
            Literal::Bool(b) => self.insts.push(Inst::ConstInt(i64::from(*b))),
            Literal::Null => self.insts.push(Inst::ConstInt(0)),
        }
    }

    fn lower_assign(
        &mut self,
        op: AssignOp,
        target: &Spanned<Expr>,
        value: &Spanned<Expr>,
        span: Span,
    ) {
        let Expr::Ident(name) = &target.node else {
            self.unsupported("assignment to this target is", target.span);
            self.insts.push(Inst::ConstInt(0));
            return;
        };
        let Some((slot, slot_ty)) = self.lookup_slot(name) else {
            self.error(
                format!("internal error: '{}' has no stack slot", name),
                target.span,
            );
            self.insts.push(Inst::ConstInt(0));
            return;
        };

        match op.binop() {
            None => {
                // Plain assignment; `&=`-style forms never reach lowering.
                let vty = self.expr_ty(value);
                if vty == Ty::Float {
                    if let Some(Folded::Float(v)) = self.fold(value) {
                        self.insts.push(Inst::ConstFloat(v));
                    } else {
                        self.unsupported("float arithmetic is", span);
                        self.insts.push(Inst::ConstInt(0));
                    }
                } else {
                    self.lower_expr(value);
                }
                // Float widening is one-way: once a path has stored float
                // bits into the slot, no later store may narrow it back.
                if (slot_ty == Ty::Auto && !matches!(vty, Ty::Auto | Ty::Unknown))
                    || (vty == Ty::Float && slot_ty != Ty::Float)
                {
                    self.set_slot_ty(name, vty);
                }
                // Keep the value as the expression result.
                self.insts.push(Inst::Push);
                self.insts.push(Inst::Store(slot));
            }
            Some(binop) => {
                let vty = self.expr_ty(value);
                if slot_ty == Ty::Float || vty == Ty::Float {
                    self.unsupported("float arithmetic is", span);
                    self.insts.push(Inst::ConstInt(0));
                    return;
                }
                self.insts.push(Inst::Load(slot));
                self.lower_expr(value);
                self.insts.push(binop_inst(binop));
                self.insts.push(Inst::Push);
                self.insts.push(Inst::Store(slot));
            }
        }
    }

    fn lower_call(&mut self, name: &Spanned<String>, args: &[Spanned<Expr>], span: Span) {
        if name.node == "print" {
            let Some(arg) = args.first() else {
                self.error("internal error: print without argument".to_string(), span);
                return;
            };
            let ty = self.expr_ty(arg);
            if ty == Ty::Float {
                self.unsupported("printing floats is", arg.span);
                return;
            }
            self.lower_expr(arg);
            let kind = if ty == Ty::Str {
                PrintKind::Str
            } else {
                PrintKind::Int
            };
            self.insts.push(Inst::Print(kind));
            return;
        }

        if !self.fn_sigs.contains_key(&name.node) {
            self.error(
                format!("internal error: call to undeclared function '{}'", name.node),
                span,
            );
            self.insts.push(Inst::ConstInt(0));
            return;
        }
        for arg in args {
            self.lower_expr(arg);
        }
        self.insts.push(Inst::Call {
            name: name.node.clone(),
            argc: args.len() as u32,
        });
    }

    // --- Constant folding ---

    fn fold(&self, expr: &Spanned<Expr>) -> Option<Folded> {
        match &expr.node {
            Expr::Literal(Literal::Int(v)) => Some(Folded::Int(*v)),
            Expr::Literal(Literal::Float(v)) => Some(Folded::Float(*v)),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => match self.fold(operand)? {
                Folded::Int(v) => Some(Folded::Int(v.checked_neg()?)),
                Folded::Float(v) => Some(Folded::Float(-v)),
            },
            Expr::Binary { op, lhs, rhs } if op.is_arithmetic() => {
                let l = self.fold(lhs)?;
                let r = self.fold(rhs)?;
                match (l, r) {
                    (Folded::Int(a), Folded::Int(b)) => {
                        let v = match op {
                            BinOp::Add => a.checked_add(b)?,
                            BinOp::Sub => a.checked_sub(b)?,
                            BinOp::Mul => a.checked_mul(b)?,
                            BinOp::Div => a.checked_div(b)?,
                            BinOp::Mod => a.checked_rem(b)?,
                            _ => unreachable!(),
                        };
                        Some(Folded::Int(v))
                    }
                    (l, r) => {
                        let a = match l {
                            Folded::Int(v) => v as f64,
                            Folded::Float(v) => v,
                        };
                        let b = match r {
                            Folded::Int(v) => v as f64,
                            Folded::Float(v) => v,
                        };
                        let v = match op {
                            BinOp::Add => a + b,
                            BinOp::Sub => a - b,
                            BinOp::Mul => a * b,
                            BinOp::Div => a / b,
                            BinOp::Mod => a % b,
                            _ => unreachable!(),
                        };
                        Some(Folded::Float(v))
                    }
                }
            }
            _ => None,
        }
    }

    // --- Local type derivation ---

    /// The semantic type of an expression, derived from slot and signature
    /// tables. The checker already validated the program; this only steers
    /// string/int decisions during lowering.
    fn expr_ty(&self, expr: &Spanned<Expr>) -> Ty {
        match &expr.node {
            Expr::Literal(Literal::Int(_)) => Ty::Int,
            Expr::Literal(Literal::Float(_)) => Ty::Float,
            Expr::Literal(Literal::Str(_)) => Ty::Str,
            Expr::Literal(Literal::Bool(_)) => Ty::Bool,
            Expr::Literal(Literal::Null) => Ty::Null,
            Expr::Ident(name) => self
                .lookup_slot(name)
                .map(|(_, ty)| ty)
                .unwrap_or(Ty::Unknown),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => Ty::Bool,
                UnaryOp::Neg => self.expr_ty(operand),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lt = self.expr_ty(lhs);
                let rt = self.expr_ty(rhs);
                if op.is_comparison() || op.is_logical() {
                    Ty::Bool
                } else if *op == BinOp::Add && (lt == Ty::Str || rt == Ty::Str) {
                    Ty::Str
                } else if lt == Ty::Float || rt == Ty::Float {
                    Ty::Float
                } else {
                    Ty::Int
                }
            }
            Expr::Assign { op, target, value } => {
                // The expression's value is the stored value: a plain
                // assignment carries the right-hand side's type, which can
                // be wider than the slot's declared type.
                if op.binop().is_none() {
                    self.expr_ty(value)
                } else {
                    let tty = self.expr_ty(target);
                    if tty == Ty::Auto {
                        self.expr_ty(value)
                    } else {
                        tty
                    }
                }
            }
            Expr::Ternary {
                then_expr,
                else_expr,
                ..
            } => {
                let then_ty = self.expr_ty(then_expr);
                let else_ty = self.expr_ty(else_expr);
                if then_ty.is_numeric() && else_ty.is_numeric() {
                    then_ty.promote(else_ty)
                } else if then_ty == Ty::Auto {
                    else_ty
                } else {
                    then_ty
                }
            }
            Expr::Call { name, .. } => {
                if name.node == "print" {
                    Ty::Void
                } else {
                    self.fn_sigs
                        .get(&name.node)
                        .map(|s| s.return_ty)
                        .unwrap_or(Ty::Unknown)
                }
            }
            Expr::Index { target, .. } => {
                if self.expr_ty(target) == Ty::Str {
                    Ty::Str
                } else {
                    Ty::Unknown
                }
            }
            Expr::Member { .. } => Ty::Unknown,
            Expr::Array(_) => Ty::Array,
            Expr::Object(_) => Ty::Object,
        }
    }
}

fn binop_inst(op: BinOp) -> Inst {
    match op {
        BinOp::Add => Inst::Add,
        BinOp::Sub => Inst::Sub,
        BinOp::Mul => Inst::Mul,
        BinOp::Div => Inst::Div,
        BinOp::Mod => Inst::Mod,
        BinOp::Eq => Inst::Eq,
        BinOp::Ne => Inst::Ne,
        BinOp::Lt => Inst::Lt,
        BinOp::Le => Inst::Le,
        BinOp::Gt => Inst::Gt,
        BinOp::Ge => Inst::Ge,
        BinOp::And => Inst::And,
        BinOp::Or => Inst::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::typeck::TypeChecker;

    fn lower(source: &str) -> Module {
        let (tokens, lex_diags) = Lexer::new(source).tokenize();
        assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
        let (program, parse_diags) = Parser::new(tokens).parse_program();
        assert!(parse_diags.is_empty(), "parse errors: {:?}", parse_diags);
        TypeChecker::new()
            .check_program(&program)
            .expect("type errors");
        lower_program(&program).expect("lowering errors")
    }

    fn main_insts(module: &Module) -> Vec<Inst> {
        module
            .function("main")
            .unwrap()
            .insts
            .iter()
            .filter(|i| !matches!(i, Inst::Comment(_)))
            .cloned()
            .collect()
    }

    #[test]
    fn test_constant_folding() {
        let module = lower("var x = 2 + 3 * 4");
        assert_eq!(
            main_insts(&module),
            vec![
                Inst::ConstInt(14),
                Inst::Store(-8),
                Inst::ConstInt(0),
                Inst::Return,
            ]
        );
    }

    #[test]
    fn test_string_concat_lowering() {
        let module = lower("var s = \"n=\" + 42");
        assert_eq!(
            main_insts(&module),
            vec![
                Inst::ConstStr(".LC0".into()),
                Inst::ConstInt(42),
                Inst::Add,
                Inst::Store(-8),
                Inst::ConstInt(0),
                Inst::Return,
            ]
        );
    }

    #[test]
    fn test_conditional_shape() {
        let module = lower("if 1 < 2 { print(1) } else { print(2) }");
        assert_eq!(
            main_insts(&module),
            vec![
                Inst::ConstInt(1),
                Inst::ConstInt(2),
                Inst::Lt,
                Inst::JumpIfNot("L_ELSE_0".into()),
                Inst::ConstInt(1),
                Inst::Print(PrintKind::Int),
                Inst::Jump("L_END_IF_0".into()),
                Inst::Label("L_ELSE_0".into()),
                Inst::ConstInt(2),
                Inst::Print(PrintKind::Int),
                Inst::Label("L_END_IF_0".into()),
                Inst::ConstInt(0),
                Inst::Return,
            ]
        );
    }

    #[test]
    fn test_if_without_else_jumps_to_end() {
        let module = lower("if 1 < 2 { print(1) }");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::JumpIfNot("L_END_IF_0".into())));
        assert!(!insts.iter().any(|i| matches!(i, Inst::Label(l) if l.starts_with("L_ELSE"))));
    }

    #[test]
    fn test_dead_branch_pruning() {
        let module = lower("if true { print(1) } else { print(2) }");
        let insts = main_insts(&module);
        assert_eq!(
            insts,
            vec![
                Inst::ConstInt(1),
                Inst::Print(PrintKind::Int),
                Inst::ConstInt(0),
                Inst::Return,
            ]
        );
    }

    #[test]
    fn test_while_shape() {
        let module = lower("var i = 0\nwhile i < 3 { i = i + 1 }");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::Label("L_WHILE_START_0".into())));
        assert!(insts.contains(&Inst::JumpIfNot("L_WHILE_END_0".into())));
        assert!(insts.contains(&Inst::Jump("L_WHILE_START_0".into())));
    }

    #[test]
    fn test_for_range_desugars_to_while() {
        let module = lower("var s = 0\nfor i in 0..10 { s = s + i }");
        let insts = main_insts(&module);
        // induction slot and hidden bound slot follow the s slot
        assert!(insts.contains(&Inst::Store(-16)));
        assert!(insts.contains(&Inst::Store(-24)));
        assert!(insts.contains(&Inst::Label("L_WHILE_START_0".into())));
        assert!(insts.contains(&Inst::Lt));
        assert_eq!(module.function("main").unwrap().locals, 3);
    }

    #[test]
    fn test_break_and_continue_targets() {
        let module = lower("while 1 < 2 { break }\nwhile 2 < 3 { continue }");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::Jump("L_WHILE_END_0".into())));
        // continue in a plain while jumps back to the condition
        assert!(
            insts
                .iter()
                .filter(|i| **i == Inst::Jump("L_WHILE_START_1".into()))
                .count()
                >= 2
        );
    }

    #[test]
    fn test_every_function_ends_with_return() {
        let module = lower(
            "function f(n: int): int {\n    return n\n}\nfunction g() {\n}\nprint(f(1))",
        );
        for function in &module.functions {
            assert_eq!(
                function.insts.last(),
                Some(&Inst::Return),
                "function {}",
                function.name
            );
        }
    }

    #[test]
    fn test_recursion_lowers_two_calls() {
        let module = lower(
            "function f(n: int): int {\n    if n < 2 {\n        return n\n    }\n    return f(n - 1) + f(n - 2)\n}\nprint(f(10))",
        );
        let f = module.function("f").unwrap();
        let calls = f
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Call { name, argc: 1 } if name == "f"))
            .count();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_string_pool_shared_across_functions() {
        let module = lower(
            "function f() {\n    print(\"hi\")\n}\nprint(\"hi\")\nprint(\"there\")\nf()",
        );
        assert_eq!(module.strings, vec!["hi".to_string(), "there".to_string()]);
    }

    #[test]
    fn test_slots_assigned_in_declaration_order() {
        let module = lower("var a = 1\nvar b = 2\n{\n    var c = 3\n}\nvar d = 4");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::Store(-8)));
        assert!(insts.contains(&Inst::Store(-16)));
        assert!(insts.contains(&Inst::Store(-24)));
        assert!(insts.contains(&Inst::Store(-32)));
        assert_eq!(module.function("main").unwrap().locals, 4);
    }

    #[test]
    fn test_shadowing_gets_its_own_slot() {
        let module = lower("var x = 1\n{\n    var x = 2\n    print(x)\n}\nprint(x)");
        let insts = main_insts(&module);
        // inner x stores to -16; the final print loads the outer -8
        assert!(insts.contains(&Inst::Store(-16)));
        let last_load = insts
            .iter()
            .rev()
            .find(|i| matches!(i, Inst::Load(_)))
            .unwrap();
        assert_eq!(*last_load, Inst::Load(-8));
    }

    #[test]
    fn test_print_string_uses_str_tag() {
        let module = lower("print(\"hello\")");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::Print(PrintKind::Str)));
    }

    #[test]
    fn test_expression_statement_pops() {
        let module = lower("var x = 1\nx + 2");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::Pop));
    }

    #[test]
    fn test_print_statement_does_not_pop() {
        let module = lower("print(1)");
        let insts = main_insts(&module);
        assert!(!insts.contains(&Inst::Pop));
    }

    #[test]
    fn test_assignment_leaves_value_then_statement_pops() {
        let module = lower("var x = 1\nx = 2");
        let insts = main_insts(&module);
        let idx = insts.iter().position(|i| *i == Inst::Push).unwrap();
        assert_eq!(insts[idx + 1], Inst::Store(-8));
        assert_eq!(insts[idx + 2], Inst::Pop);
    }

    #[test]
    fn test_unsupported_constructs_error() {
        let (tokens, _) = Lexer::new("var a = [1, 2]\nvar x = a[0]").tokenize();
        let (program, _) = Parser::new(tokens).parse_program();
        TypeChecker::new().check_program(&program).unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(err
            .iter()
            .any(|d| d.message.contains("not supported by the native back-end")));
    }

    #[test]
    fn test_float_constant_folds_but_runtime_float_errors() {
        // constant float expression folds away
        let module = lower("var x = 1.5 + 2.5");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::ConstFloat(4.0)));

        // runtime float arithmetic is rejected
        let (tokens, _) = Lexer::new("var a = 1.5\nvar b = a + 1.0").tokenize();
        let (program, _) = Parser::new(tokens).parse_program();
        TypeChecker::new().check_program(&program).unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("float arithmetic")));
    }

    #[test]
    fn test_mixed_ternary_promotes_to_float() {
        // `cond ? 1 : 2.5` is float; printing it must be rejected, not
        // dispatched on the then arm's int.
        let (tokens, _) = Lexer::new("print(1 < 2 ? 1 : 2.5)").tokenize();
        let (program, _) = Parser::new(tokens).parse_program();
        TypeChecker::new().check_program(&program).unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("printing floats")));
    }

    #[test]
    fn test_float_store_widens_an_int_slot() {
        // The slot record must follow the stored value; a later print may
        // not trust the declared int.
        let (tokens, _) = Lexer::new("var x: int = 1\nx = 2.5\nprint(x)").tokenize();
        let (program, _) = Parser::new(tokens).parse_program();
        TypeChecker::new().check_program(&program).unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("printing floats")));
    }

    #[test]
    fn test_widened_slot_does_not_narrow_back() {
        // One branch stores a float; the re-store of an int afterwards must
        // not make the slot readable as int again.
        let source =
            "var x: int = 1\nvar c = 1 < 2\nif c { x = 2.5 } else { x = 3 }\nprint(x)";
        let (tokens, _) = Lexer::new(source).tokenize();
        let (program, _) = Parser::new(tokens).parse_program();
        TypeChecker::new().check_program(&program).unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("printing floats")));
    }

    #[test]
    fn test_assignment_expression_carries_rhs_type() {
        // print(x = 2.5) sees the float value, not x's declared int.
        let (tokens, _) = Lexer::new("var x: int = 1\nprint(x = 2.5)").tokenize();
        let (program, _) = Parser::new(tokens).parse_program();
        TypeChecker::new().check_program(&program).unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("printing floats")));
    }

    #[test]
    fn test_do_while_shape() {
        let module = lower("var i = 0\ndo { i = i + 1 } while i < 3");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::Label("L_WHILE_START_0".into())));
        assert!(insts.contains(&Inst::Label("L_WHILE_CONT_0".into())));
        assert!(insts.contains(&Inst::JumpIfNot("L_WHILE_END_0".into())));
    }

    #[test]
    fn test_elif_chain_nests() {
        let module =
            lower("var x = 1\nif x < 0 { print(0) } elif x < 10 { print(1) } else { print(2) }");
        let insts = main_insts(&module);
        // two if-levels allocate two label pairs
        assert!(insts.contains(&Inst::Label("L_ELSE_0".into())));
        assert!(insts.contains(&Inst::Label("L_ELSE_1".into())));
    }

    #[test]
    fn test_ternary_lowering() {
        let module = lower("var x = 1 < 2 ? 10 : 20");
        let insts = main_insts(&module);
        assert!(insts.contains(&Inst::JumpIfNot("L_ELSE_0".into())));
        assert!(insts.contains(&Inst::ConstInt(10)));
        assert!(insts.contains(&Inst::ConstInt(20)));
    }

    #[test]
    fn test_return_without_value() {
        let module = lower("function f() {\n    return\n}\nf()");
        let f = module.function("f").unwrap();
        assert_eq!(f.insts[0], Inst::ConstInt(0));
        assert_eq!(f.insts[1], Inst::Return);
    }

    #[test]
    fn test_entry_is_main() {
        let module = lower("print(1)");
        assert_eq!(module.entry, "main");
        assert!(module.function("main").is_some());
    }
}
