//! JavaScript back-end.

use std::fmt::Write as _;

use super::escape_string;
use crate::ast::*;
use crate::span::Spanned;

pub fn emit(program: &Program, _source: &str) -> Option<String> {
    let mut backend = JsBackend {
        out: String::new(),
        indent: 0,
    };
    for stmt in &program.stmts {
        backend.emit_stmt(&stmt.node);
    }
    Some(backend.out)
}

struct JsBackend {
    out: String,
    indent: usize,
}

impl JsBackend {
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
                    self.line(&format!("let {} = {};", name.node, init));
                }
                None => self.line(&format!("let {};", name.node)),
            },
            Stmt::ConstDecl { name, init, .. } => {
                let init = self.expr(&init.node);
                self.line(&format!("const {} = {};", name.node, init));
            }
            Stmt::FnDecl {
                name, params, body, ..
            } => {
                let params: Vec<&str> = params.iter().map(|p| p.name.node.as_str()).collect();
                self.line(&format!("function {}({}) {{", name.node, params.join(", ")));
                self.emit_block(body);
                self.line("}");
            }
            Stmt::If {
                cond,
                then_block,
                elif_branches,
                else_block,
            } => {
                let cond = self.expr(&cond.node);
                self.line(&format!("if ({}) {{", cond));
                self.emit_block(then_block);
                for (elif_cond, elif_body) in elif_branches {
                    let c = self.expr(&elif_cond.node);
                    self.line(&format!("}} else if ({}) {{", c));
                    self.emit_block(elif_body);
                }
                if let Some(else_body) = else_block {
                    self.line("} else {");
                    self.emit_block(else_body);
                }
                self.line("}");
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(&cond.node);
                self.line(&format!("while ({}) {{", cond));
                self.emit_block(body);
                self.line("}");
            }
            Stmt::DoWhile { body, cond } => {
                self.line("do {");
                self.emit_block(body);
                let cond = self.expr(&cond.node);
                self.line(&format!("}} while ({});", cond));
            }
            Stmt::For { var, iter, body } => {
                match iter {
                    ForIter::Range(start, end) => {
                        let start = self.expr(&start.node);
                        let end = self.expr(&end.node);
                        self.line(&format!(
                            "for (let {v} = {start}; {v} < {end}; {v}++) {{",
                            v = var.node
                        ));
                    }
                    ForIter::Expr(iterable) => {
                        let iterable = self.expr(&iterable.node);
                        self.line(&format!("for (const {} of {}) {{", var.node, iterable));
                    }
                }
                self.emit_block(body);
                self.line("}");
            }
            Stmt::Return(value) => match value {
                Some(e) => {
                    let e = self.expr(&e.node);
                    self.line(&format!("return {};", e));
                }
                None => self.line("return;"),
            },
            Stmt::Break => self.line("break;"),
            Stmt::Continue => self.line("continue;"),
            Stmt::Block(block) => {
                self.line("{");
                self.emit_block(block);
                self.line("}");
            }
            Stmt::Expr(e) => {
                let e = self.expr(&e.node);
                self.line(&format!("{};", e));
            }
            Stmt::Embed { lang, body } => {
                if lang == "js" || lang == "javascript" {
                    for raw in body.lines() {
                        self.line(raw);
                    }
                }
            }
        }
    }

    fn emit_block(&mut self, block: &Spanned<Block>) {
        self.indent += 1;
        for stmt in &block.node.stmts {
            self.emit_stmt(&stmt.node);
        }
        self.indent -= 1;
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(Literal::Int(v)) => v.to_string(),
            Expr::Literal(Literal::Float(v)) => format!("{:?}", v),
            Expr::Literal(Literal::Str(s)) => format!("\"{}\"", escape_string(s)),
            Expr::Literal(Literal::Bool(b)) => b.to_string(),
            Expr::Literal(Literal::Null) => "null".to_string(),
            Expr::Ident(name) => name.clone(),
            Expr::Unary { op, operand } => {
                let sigil = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                format!("{}{}", sigil, self.expr(&operand.node))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.expr(&lhs.node);
                let r = self.expr(&rhs.node);
                format!("({} {} {})", l, op.as_str(), r)
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
                format!("({} ? {} : {})", c, t, e)
            }
            Expr::Call { name, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(&a.node)).collect();
                let callee = if name.node == "print" {
                    "console.log"
                } else {
                    &name.node
                };
                format!("{}({})", callee, args.join(", "))
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
                let mut parts = Vec::new();
                for (key, value) in entries {
                    let mut part = String::new();
                    let _ = write!(part, "{}: {}", key.node, self.expr(&value.node));
                    parts.push(part);
                }
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn transpile(source: &str) -> String {
        let (tokens, _) = Lexer::new(source).tokenize();
        let (program, diags) = Parser::new(tokens).parse_program();
        assert!(diags.is_empty(), "parse errors: {:?}", diags);
        emit(&program, source).unwrap()
    }

    #[test]
    fn test_declarations() {
        let js = transpile("var x = 1\nconst k = 2\nvar y");
        assert!(js.contains("let x = 1;"));
        assert!(js.contains("const k = 2;"));
        assert!(js.contains("let y;"));
    }

    #[test]
    fn test_print_becomes_console_log() {
        let js = transpile("print(\"hi\")");
        assert!(js.contains("console.log(\"hi\");"));
    }

    #[test]
    fn test_function_and_control_flow() {
        let js = transpile(
            "function f(n) {\n    if n < 2 {\n        return n\n    }\n    return f(n - 1)\n}",
        );
        assert!(js.contains("function f(n) {"));
        assert!(js.contains("if ((n < 2)) {"));
        assert!(js.contains("return f((n - 1));"));
    }

    #[test]
    fn test_for_range() {
        let js = transpile("for i in 0..10 { print(i) }");
        assert!(js.contains("for (let i = 0; i < 10; i++) {"));
    }

    #[test]
    fn test_for_of() {
        let js = transpile("var xs = [1, 2]\nfor x in xs { print(x) }");
        assert!(js.contains("for (const x of xs) {"));
    }

    #[test]
    fn test_embed_js_is_verbatim() {
        let js = transpile("embed js console.log(42) endembed");
        assert!(js.contains("console.log(42)"));
    }

    #[test]
    fn test_embed_other_language_is_skipped() {
        let js = transpile("embed python print(42) endembed");
        assert!(!js.contains("42"));
    }

    #[test]
    fn test_do_while() {
        let js = transpile("var i = 0\ndo { i += 1 } while i < 3");
        assert!(js.contains("do {"));
        assert!(js.contains("} while ((i < 3));"));
    }
}
