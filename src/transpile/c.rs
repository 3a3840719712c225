//! C back-end.
//!
//! Top-level statements collect into `main`; function declarations are
//! hoisted above it. Typing is shallow: numbers are `long`, floats are
//! `double`, string-valued names are tracked so `print` can pick its format
//! string. Object literals have no C rendering; meeting one fails the
//! transpilation (the caller sees the null marker).

use std::collections::HashSet;

use super::escape_string;
use crate::ast::*;
use crate::span::Spanned;

pub fn emit(program: &Program, _source: &str) -> Option<String> {
    let mut backend = CBackend {
        out: String::new(),
        indent: 0,
        string_vars: HashSet::new(),
        failed: false,
    };

    backend.line("#include <stdio.h>");
    backend.line("#include <stdlib.h>");
    backend.line("#include <string.h>");
    backend.line("#include <stdbool.h>");
    backend.line("");

    for stmt in &program.stmts {
        if let Stmt::FnDecl { .. } = &stmt.node {
            backend.emit_stmt(&stmt.node);
            backend.line("");
        }
    }

    backend.line("int main(void) {");
    backend.indent += 1;
    for stmt in &program.stmts {
        if !matches!(&stmt.node, Stmt::FnDecl { .. }) {
            backend.emit_stmt(&stmt.node);
        }
    }
    backend.line("return 0;");
    backend.indent -= 1;
    backend.line("}");

    if backend.failed {
        None
    } else {
        Some(backend.out)
    }
}

struct CBackend {
    out: String,
    indent: usize,
    /// Names known to hold strings, for printf format selection.
    string_vars: HashSet<String>,
    failed: bool,
}

impl CBackend {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn is_string_expr(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Literal(Literal::Str(_)) => true,
            Expr::Ident(name) => self.string_vars.contains(name),
            Expr::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } => self.is_string_expr(&lhs.node) || self.is_string_expr(&rhs.node),
            Expr::Ternary { then_expr, .. } => self.is_string_expr(&then_expr.node),
            _ => false,
        }
    }

    fn c_type_of(&self, init: Option<&Spanned<Expr>>, annotation: Option<&Spanned<String>>) -> &'static str {
        if let Some(ann) = annotation {
            return match ann.node.as_str() {
                "string" => "const char *",
                "float" => "double ",
                "bool" => "bool ",
                _ => "long ",
            };
        }
        match init.map(|e| &e.node) {
            Some(e) if self.is_string_expr(e) => "const char *",
            Some(Expr::Literal(Literal::Float(_))) => "double ",
            Some(Expr::Literal(Literal::Bool(_))) => "bool ",
            _ => "long ",
        }
    }

    fn declare(&mut self, name: &Spanned<String>, annotation: Option<&Spanned<String>>, init: Option<&Spanned<Expr>>, constant: bool) {
        let ty = self.c_type_of(init, annotation);
        if ty == "const char *" {
            self.string_vars.insert(name.node.clone());
        }
        let prefix = if constant { "const " } else { "" };
        match init {
            Some(e) => {
                let value = self.expr(&e.node);
                self.line(&format!("{}{}{} = {};", prefix, ty, name.node, value));
            }
            None => self.line(&format!("{}{}{};", prefix, ty, name.node)),
        }
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl {
                name,
                annotation,
                init,
            } => self.declare(name, annotation.as_ref(), init.as_ref(), false),
            Stmt::ConstDecl {
                name,
                annotation,
                init,
            } => self.declare(name, annotation.as_ref(), Some(init), true),
            Stmt::FnDecl {
                name,
                params,
                return_annotation,
                body,
            } => {
                let ret = match return_annotation.as_ref().map(|a| a.node.as_str()) {
                    Some("string") => "const char *",
                    Some("float") => "double ",
                    Some("bool") => "bool ",
                    Some("void") => "void ",
                    _ => "long ",
                };
                let mut rendered = Vec::new();
                for p in params {
                    let ty = match p.annotation.as_ref().map(|a| a.node.as_str()) {
                        Some("string") => {
                            self.string_vars.insert(p.name.node.clone());
                            "const char *"
                        }
                        Some("float") => "double ",
                        Some("bool") => "bool ",
                        _ => "long ",
                    };
                    rendered.push(format!("{}{}", ty, p.name.node));
                }
                let params = rendered;
                let params = if params.is_empty() {
                    "void".to_string()
                } else {
                    params.join(", ")
                };
                self.line(&format!("{}{}({}) {{", ret, name.node, params));
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
            Stmt::For { var, iter, body } => match iter {
                ForIter::Range(start, end) => {
                    let start = self.expr(&start.node);
                    let end = self.expr(&end.node);
                    self.line(&format!(
                        "for (long {v} = {start}; {v} < {end}; {v}++) {{",
                        v = var.node
                    ));
                    self.emit_block(body);
                    self.line("}");
                }
                ForIter::Expr(_) => {
                    // No length information survives for bare iterables.
                    self.failed = true;
                }
            },
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
                if let Expr::Call { name, args } = &e.node {
                    if name.node == "print" && args.len() == 1 {
                        let fmt = if self.is_string_expr(&args[0].node) {
                            "%s\\n"
                        } else {
                            "%ld\\n"
                        };
                        let arg = self.expr(&args[0].node);
                        self.line(&format!("printf(\"{}\", {});", fmt, arg));
                        return;
                    }
                }
                let e = self.expr(&e.node);
                self.line(&format!("{};", e));
            }
            Stmt::Embed { lang, body } => {
                if lang == "c" {
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
            Expr::Literal(Literal::Null) => "NULL".to_string(),
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
                format!("{}({})", name.node, args.join(", "))
            }
            Expr::Index { target, index } => {
                format!("{}[{}]", self.expr(&target.node), self.expr(&index.node))
            }
            Expr::Member { .. } => {
                self.failed = true;
                String::new()
            }
            Expr::Array(elements) => {
                let elems: Vec<String> = elements.iter().map(|e| self.expr(&e.node)).collect();
                format!("{{{}}}", elems.join(", "))
            }
            Expr::Object(_) => {
                self.failed = true;
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn transpile(source: &str) -> Option<String> {
        let (tokens, _) = Lexer::new(source).tokenize();
        let (program, diags) = Parser::new(tokens).parse_program();
        assert!(diags.is_empty(), "parse errors: {:?}", diags);
        emit(&program, source)
    }

    #[test]
    fn test_skeleton_and_includes() {
        let c = transpile("var x = 1\nprint(x)").unwrap();
        assert!(c.contains("#include <stdio.h>"));
        assert!(c.contains("int main(void) {"));
        assert!(c.contains("return 0;"));
        assert!(c.contains("long x = 1;"));
    }

    #[test]
    fn test_print_formats() {
        let c = transpile("var x = 1\nvar s = \"hi\"\nprint(x)\nprint(s)").unwrap();
        assert!(c.contains("printf(\"%ld\\n\", x);"));
        assert!(c.contains("printf(\"%s\\n\", s);"));
    }

    #[test]
    fn test_functions_hoisted_above_main() {
        let c = transpile("print(f(2))\nfunction f(n: int): int {\n    return n * 2\n}").unwrap();
        let fn_pos = c.find("long f(long n) {").unwrap();
        let main_pos = c.find("int main(void) {").unwrap();
        assert!(fn_pos < main_pos);
    }

    #[test]
    fn test_string_annotation() {
        let c = transpile("function greet(who: string) {\n    print(who)\n}").unwrap();
        assert!(c.contains("greet(const char *who)"));
        assert!(c.contains("printf(\"%s\\n\", who);"));
    }

    #[test]
    fn test_const_decl() {
        let c = transpile("const k = 3").unwrap();
        assert!(c.contains("const long k = 3;"));
    }

    #[test]
    fn test_for_range() {
        let c = transpile("for i in 0..10 { print(i) }").unwrap();
        assert!(c.contains("for (long i = 0; i < 10; i++) {"));
    }

    #[test]
    fn test_object_literal_fails() {
        assert!(transpile("var o = {x: 1}").is_none());
    }

    #[test]
    fn test_embed_c_verbatim() {
        let c = transpile("embed c puts(\"raw\"); endembed").unwrap();
        assert!(c.contains("puts(\"raw\");"));
    }
}
