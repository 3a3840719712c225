//! Python back-end.

use super::escape_string;
use crate::ast::*;
use crate::span::Spanned;

pub fn emit(program: &Program, _source: &str) -> Option<String> {
    let mut backend = PyBackend {
        out: String::new(),
        indent: 0,
    };
    for stmt in &program.stmts {
        backend.emit_stmt(&stmt.node);
    }
    Some(backend.out)
}

struct PyBackend {
    out: String,
    indent: usize,
}

impl PyBackend {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { name, init, .. } => match init {
                Some(e) => {
                    let init = self.expr(&e.node);
                    self.line(&format!("{} = {}", name.node, init));
                }
                None => self.line(&format!("{} = None", name.node)),
            },
            Stmt::ConstDecl { name, init, .. } => {
                let init = self.expr(&init.node);
                self.line(&format!("{} = {}", name.node, init));
            }
            Stmt::FnDecl {
                name, params, body, ..
            } => {
                let params: Vec<&str> = params.iter().map(|p| p.name.node.as_str()).collect();
                self.line(&format!("def {}({}):", name.node, params.join(", ")));
                self.emit_block(body);
            }
            Stmt::If {
                cond,
                then_block,
                elif_branches,
                else_block,
            } => {
                let cond = self.expr(&cond.node);
                self.line(&format!("if {}:", cond));
                self.emit_block(then_block);
                for (elif_cond, elif_body) in elif_branches {
                    let c = self.expr(&elif_cond.node);
                    self.line(&format!("elif {}:", c));
                    self.emit_block(elif_body);
                }
                if let Some(else_body) = else_block {
                    self.line("else:");
                    self.emit_block(else_body);
                }
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(&cond.node);
                self.line(&format!("while {}:", cond));
                self.emit_block(body);
            }
            Stmt::DoWhile { body, cond } => {
                // Python has no do-while; run once, then break on a false
                // condition.
                self.line("while True:");
                self.indent += 1;
                for s in &body.node.stmts {
                    self.emit_stmt(&s.node);
                }
                let cond = self.expr(&cond.node);
                self.line(&format!("if not ({}):", cond));
                self.indent += 1;
                self.line("break");
                self.indent -= 2;
            }
            Stmt::For { var, iter, body } => {
                match iter {
                    ForIter::Range(start, end) => {
                        let start = self.expr(&start.node);
                        let end = self.expr(&end.node);
                        self.line(&format!("for {} in range({}, {}):", var.node, start, end));
                    }
                    ForIter::Expr(iterable) => {
                        let iterable = self.expr(&iterable.node);
                        self.line(&format!("for {} in {}:", var.node, iterable));
                    }
                }
                self.emit_block(body);
            }
            Stmt::Return(value) => match value {
                Some(e) => {
                    let e = self.expr(&e.node);
                    self.line(&format!("return {}", e));
                }
                None => self.line("return"),
            },
            Stmt::Break => self.line("break"),
            Stmt::Continue => self.line("continue"),
            Stmt::Block(block) => {
                // No bare blocks in Python; inline the statements.
                for s in &block.node.stmts {
                    self.emit_stmt(&s.node);
                }
            }
            Stmt::Expr(e) => {
                let e = self.expr(&e.node);
                self.line(&e);
            }
            Stmt::Embed { lang, body } => {
                if lang == "py" || lang == "python" {
                    for raw in body.lines() {
                        self.line(raw);
                    }
                }
            }
        }
    }

    fn emit_block(&mut self, block: &Spanned<Block>) {
        self.indent += 1;
        if block.node.stmts.is_empty() {
            self.line("pass");
        } else {
            for stmt in &block.node.stmts {
                self.emit_stmt(&stmt.node);
            }
        }
        self.indent -= 1;
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(Literal::Int(v)) => v.to_string(),
            Expr::Literal(Literal::Float(v)) => format!("{:?}", v),
            Expr::Literal(Literal::Str(s)) => format!("\"{}\"", escape_string(s)),
            Expr::Literal(Literal::Bool(true)) => "True".to_string(),
            Expr::Literal(Literal::Bool(false)) => "False".to_string(),
            Expr::Literal(Literal::Null) => "None".to_string(),
            Expr::Ident(name) => name.clone(),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => format!("-{}", self.expr(&operand.node)),
                UnaryOp::Not => format!("not {}", self.expr(&operand.node)),
            },
            Expr::Binary { op, lhs, rhs } => {
                let l = self.expr(&lhs.node);
                let r = self.expr(&rhs.node);
                let sigil = match op {
                    BinOp::And => "and",
                    BinOp::Or => "or",
                    other => other.as_str(),
                };
                format!("({} {} {})", l, sigil, r)
            }
            Expr::Assign { op, target, value } => {
                let t = self.expr(&target.node);
                let v = self.expr(&value.node);
                format!("{} {} {}", t, op.as_str(), v)
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let c = self.expr(&cond.node);
                let t = self.expr(&then_expr.node);
                let e = self.expr(&else_expr.node);
                format!("({} if {} else {})", t, c, e)
            }
            Expr::Call { name, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(&a.node)).collect();
                format!("{}({})", name.node, args.join(", "))
            }
            Expr::Index { target, index } => {
                format!("{}[{}]", self.expr(&target.node), self.expr(&index.node))
            }
            Expr::Member { target, field } => {
                format!("{}.{}", self.expr(&target.node), field.node)
            }
            Expr::Array(elements) => {
                let elems: Vec<String> = elements.iter().map(|e| self.expr(&e.node)).collect();
                format!("[{}]", elems.join(", "))
            }
            Expr::Object(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, value)| {
                        format!("\"{}\": {}", escape_string(&key.node), self.expr(&value.node))
                    })
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}
