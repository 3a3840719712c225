use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::token::{Token, TokenKind};

const MAX_NESTING_DEPTH: u32 = 256;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    had_error: bool,
    panic_mode: bool,
    depth: u32,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            had_error: false,
            panic_mode: false,
            depth: 0,
        }
    }

    /// Parse a whole program. Parsing does not stop at the first error: the
    /// parser reports, enters panic mode, and synchronizes at the next
    /// newline or statement-starting keyword. The AST is partial when the
    /// diagnostics list is non-empty.
    pub fn parse_program(mut self) -> (Program, Vec<Diagnostic>) {
        let mut stmts = Vec::new();
        self.skip_terminators();
        while !self.at(&TokenKind::Eof) {
            let before = self.pos;
            stmts.push(self.parse_stmt());
            self.expect_terminator();
            self.skip_terminators();
            if self.pos == before {
                // Stray token no rule consumes (e.g. an unmatched '}');
                // skip it rather than loop.
                self.advance();
            }
        }
        (Program { stmts }, self.diagnostics)
    }

    /// True once any parse error has been reported; never reset.
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    // --- Statements ---

    fn parse_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        match self.peek().clone() {
            TokenKind::Var | TokenKind::Let => self.parse_var_decl(),
            TokenKind::Const => self.parse_const_decl(),
            TokenKind::Function => self.parse_fn_decl(),
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::While => self.parse_while_stmt(),
            TokenKind::Do => self.parse_do_while_stmt(),
            TokenKind::For => self.parse_for_stmt(),
            TokenKind::Return => self.parse_return_stmt(),
            TokenKind::Break => {
                self.advance();
                Spanned::new(Stmt::Break, start)
            }
            TokenKind::Continue => {
                self.advance();
                Spanned::new(Stmt::Continue, start)
            }
            TokenKind::LBrace => {
                let block = self.parse_block();
                let span = block.span;
                Spanned::new(Stmt::Block(block), span)
            }
            TokenKind::EmbedBlock { lang, body } => {
                self.advance();
                Spanned::new(Stmt::Embed { lang, body }, start)
            }
            kind if is_reserved_unsupported(&kind) => {
                self.error_with_help(
                    &format!("{} is not supported", kind.description()),
                    "this keyword is reserved but has no statement form",
                );
                self.advance();
                Spanned::new(Stmt::Expr(Spanned::new(Expr::Literal(Literal::Null), start)), start)
            }
            _ => {
                let expr = self.parse_expr();
                let span = expr.span;
                Spanned::new(Stmt::Expr(expr), span)
            }
        }
    }

    fn parse_var_decl(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // var | let
        let name = self.expect_ident();
        let annotation = self.parse_optional_annotation();
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr())
        } else {
            None
        };
        let span = start.merge(self.prev_span());
        Spanned::new(
            Stmt::VarDecl {
                name,
                annotation,
                init,
            },
            span,
        )
    }

    fn parse_const_decl(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // const
        let name = self.expect_ident();
        let annotation = self.parse_optional_annotation();
        self.expect(&TokenKind::Assign);
        let init = self.parse_expr();
        let span = start.merge(self.prev_span());
        Spanned::new(
            Stmt::ConstDecl {
                name,
                annotation,
                init,
            },
            span,
        )
    }

    fn parse_fn_decl(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // function
        let name = self.expect_ident();
        self.expect(&TokenKind::LParen);
        let params = self.parse_params();
        self.expect(&TokenKind::RParen);
        let return_annotation = self.parse_optional_annotation();
        let body = self.parse_block();
        let span = start.merge(self.prev_span());
        Spanned::new(
            Stmt::FnDecl {
                name,
                params,
                return_annotation,
                body,
            },
            span,
        )
    }

    fn parse_params(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
            let name = self.expect_ident();
            let annotation = self.parse_optional_annotation();
            params.push(Param { name, annotation });
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        params
    }

    fn parse_if_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // if
        let cond = self.parse_expr();
        let then_block = self.parse_block();

        let mut elif_branches = Vec::new();
        let mut else_block = None;
        loop {
            // Newlines may separate `}` from `elif`/`else`; look past them
            // and back up if neither follows.
            let saved = self.pos;
            self.skip_newlines();
            if self.at(&TokenKind::Elif) {
                self.advance();
                let elif_cond = self.parse_expr();
                let elif_body = self.parse_block();
                elif_branches.push((elif_cond, elif_body));
            } else if self.at(&TokenKind::Else) {
                self.advance();
                else_block = Some(self.parse_block());
                break;
            } else {
                self.pos = saved;
                break;
            }
        }

        let span = start.merge(self.prev_span());
        Spanned::new(
            Stmt::If {
                cond,
                then_block,
                elif_branches,
                else_block,
            },
            span,
        )
    }

    fn parse_while_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // while
        let cond = self.parse_expr();
        let body = self.parse_block();
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::While { cond, body }, span)
    }

    fn parse_do_while_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // do
        let body = self.parse_block();
        self.skip_newlines();
        self.expect(&TokenKind::While);
        let cond = self.parse_expr();
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::DoWhile { body, cond }, span)
    }

    fn parse_for_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // for
        let var = self.expect_ident();
        self.expect(&TokenKind::In);
        let first = self.parse_expr();
        let iter = if self.eat(&TokenKind::DotDot) {
            let end = self.parse_expr();
            ForIter::Range(first, end)
        } else {
            ForIter::Expr(first)
        };
        let body = self.parse_block();
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::For { var, iter, body }, span)
    }

    fn parse_return_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance(); // return
        let value = if self.at_statement_end() {
            None
        } else {
            Some(self.parse_expr())
        };
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::Return(value), span)
    }

    fn parse_block(&mut self) -> Spanned<Block> {
        if !self.enter_nesting() {
            let span = self.current_span();
            while !self.at(&TokenKind::Eof) {
                self.advance();
            }
            return Spanned::new(Block { stmts: Vec::new() }, span);
        }

        let start = self.current_span();
        self.expect(&TokenKind::LBrace);
        self.skip_terminators();

        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            stmts.push(self.parse_stmt());
            if !self.at(&TokenKind::RBrace) {
                self.expect_terminator();
            }
            self.skip_terminators();
        }

        let end = self.current_span();
        self.expect(&TokenKind::RBrace);
        self.exit_nesting();
        Spanned::new(Block { stmts }, start.merge(end))
    }

    // --- Expressions ---

    fn parse_expr(&mut self) -> Spanned<Expr> {
        if !self.enter_nesting() {
            let span = self.current_span();
            while !self.at(&TokenKind::Eof) {
                self.advance();
            }
            return Spanned::new(Expr::Literal(Literal::Null), span);
        }
        let expr = self.parse_assign();
        self.exit_nesting();
        expr
    }

    /// Assignment is right-associative and sits below every other operator.
    fn parse_assign(&mut self) -> Spanned<Expr> {
        let lhs = self.parse_ternary();

        let op = match self.peek() {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::AddAssign,
            TokenKind::MinusEq => AssignOp::SubAssign,
            TokenKind::StarEq => AssignOp::MulAssign,
            TokenKind::SlashEq => AssignOp::DivAssign,
            TokenKind::PercentEq => AssignOp::ModAssign,
            TokenKind::AmpEq => AssignOp::AndAssign,
            TokenKind::PipeEq => AssignOp::OrAssign,
            TokenKind::CaretEq => AssignOp::XorAssign,
            _ => return lhs,
        };
        self.advance();

        if !matches!(
            lhs.node,
            Expr::Ident(_) | Expr::Index { .. } | Expr::Member { .. }
        ) {
            self.error_at_current("invalid assignment target");
        }

        let value = self.parse_assign();
        let span = lhs.span.merge(value.span);
        Spanned::new(
            Expr::Assign {
                op,
                target: Box::new(lhs),
                value: Box::new(value),
            },
            span,
        )
    }

    fn parse_ternary(&mut self) -> Spanned<Expr> {
        let cond = self.parse_binary_bp(0);
        if !self.eat(&TokenKind::Question) {
            return cond;
        }
        let then_expr = self.parse_ternary();
        self.expect(&TokenKind::Colon);
        let else_expr = self.parse_ternary();
        let span = cond.span.merge(else_expr.span);
        Spanned::new(
            Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        )
    }

    fn parse_binary_bp(&mut self, min_bp: u8) -> Spanned<Expr> {
        let mut lhs = self.parse_unary();

        loop {
            let op = match self.peek() {
                TokenKind::PipePipe => BinOp::Or,
                TokenKind::AmpAmp => BinOp::And,
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::BangEq => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Ge,
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };

            let (l_bp, r_bp) = op_binding_power(op);
            if l_bp < min_bp {
                break;
            }

            self.advance();
            let rhs = self.parse_binary_bp(r_bp);
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        lhs
    }

    /// Unary `-` and `!` bind tighter than any binary operator.
    fn parse_unary(&mut self) -> Spanned<Expr> {
        let start = self.current_span();
        let op = match self.peek() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            if !self.enter_nesting() {
                let span = self.current_span();
                while !self.at(&TokenKind::Eof) {
                    self.advance();
                }
                return Spanned::new(Expr::Literal(Literal::Null), span);
            }
            self.advance();
            let operand = self.parse_unary();
            self.exit_nesting();
            let span = start.merge(operand.span);
            return Spanned::new(
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            );
        }
        let primary = self.parse_primary();
        self.parse_postfix(primary)
    }

    /// Postfix `(args)`, `[index]`, and `.member` chain greedily.
    fn parse_postfix(&mut self, mut expr: Spanned<Expr>) -> Spanned<Expr> {
        loop {
            if self.at(&TokenKind::LParen) {
                self.advance();
                let args = self.parse_call_args();
                self.expect(&TokenKind::RParen);
                let span = expr.span.merge(self.prev_span());
                if let Expr::Ident(name) = &expr.node {
                    expr = Spanned::new(
                        Expr::Call {
                            name: Spanned::new(name.clone(), expr.span),
                            args,
                        },
                        span,
                    );
                } else {
                    self.error_at_current("only named functions can be called");
                    return expr;
                }
            } else if self.at(&TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expr();
                self.expect(&TokenKind::RBracket);
                let span = expr.span.merge(self.prev_span());
                expr = Spanned::new(
                    Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.at(&TokenKind::Dot) {
                self.advance();
                let field = self.expect_ident();
                let span = expr.span.merge(field.span);
                expr = Spanned::new(
                    Expr::Member {
                        target: Box::new(expr),
                        field,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        expr
    }

    fn parse_call_args(&mut self) -> Vec<Spanned<Expr>> {
        let mut args = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) && !self.at(&TokenKind::Eof) {
            args.push(self.parse_expr());
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        args
    }

    fn parse_primary(&mut self) -> Spanned<Expr> {
        let start = self.current_span();

        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Int(n)), start)
            }
            TokenKind::Float(v) => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Float(v)), start)
            }
            TokenKind::Str(s) => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Str(s)), start)
            }
            TokenKind::True => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Bool(true)), start)
            }
            TokenKind::False => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Bool(false)), start)
            }
            TokenKind::Null => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Null), start)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Spanned::new(Expr::Ident(name), start)
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expr();
                self.skip_newlines();
                self.expect(&TokenKind::RParen);
                inner
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                self.skip_newlines();
                while !self.at(&TokenKind::RBracket) && !self.at(&TokenKind::Eof) {
                    elements.push(self.parse_expr());
                    self.skip_newlines();
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&TokenKind::RBracket);
                let span = start.merge(self.prev_span());
                Spanned::new(Expr::Array(elements), span)
            }
            TokenKind::LBrace => {
                self.advance();
                let entries = self.parse_object_entries();
                self.expect(&TokenKind::RBrace);
                let span = start.merge(self.prev_span());
                Spanned::new(Expr::Object(entries), span)
            }
            _ => {
                self.error_with_help(
                    &format!("expected expression, found {}", self.peek().description()),
                    "expressions start with a literal, identifier, '(', '[', '{', '-', or '!'",
                );
                self.advance_unless_sync_point();
                Spanned::new(Expr::Literal(Literal::Null), start)
            }
        }
    }

    fn parse_object_entries(&mut self) -> Vec<(Spanned<String>, Spanned<Expr>)> {
        let mut entries = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let key = match self.peek().clone() {
                TokenKind::Ident(name) => {
                    let span = self.current_span();
                    self.advance();
                    Spanned::new(name, span)
                }
                TokenKind::Str(s) => {
                    let span = self.current_span();
                    self.advance();
                    Spanned::new(s, span)
                }
                _ => {
                    self.error_at_current(&format!(
                        "expected object key, found {}",
                        self.peek().description()
                    ));
                    break;
                }
            };
            self.expect(&TokenKind::Colon);
            let value = self.parse_expr();
            entries.push((key, value));
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        entries
    }

    /// A `name: type` annotation. Type names may be type keywords or plain
    /// identifiers; resolution happens in the checker.
    fn parse_optional_annotation(&mut self) -> Option<Spanned<String>> {
        if !self.eat(&TokenKind::Colon) {
            return None;
        }
        let span = self.current_span();
        let name = match self.peek().clone() {
            TokenKind::IntTy => "int".to_string(),
            TokenKind::FloatTy => "float".to_string(),
            TokenKind::StringTy => "string".to_string(),
            TokenKind::BoolTy => "bool".to_string(),
            TokenKind::AutoTy => "auto".to_string(),
            TokenKind::VoidTy => "void".to_string(),
            TokenKind::Ident(name) => name,
            _ => {
                self.error_with_help(
                    &format!("expected type name, found {}", self.peek().description()),
                    "type annotations are int, float, string, bool, auto, or void",
                );
                return None;
            }
        };
        self.advance();
        Some(Spanned::new(name, span))
    }

    // --- Token cursor helpers ---

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    /// Advance past the offending token unless it could start a statement or
    /// end the current one; keeps error recovery from eating sync points.
    fn advance_unless_sync_point(&mut self) {
        if !self.at_statement_end() && !self.peek().starts_statement() {
            self.advance();
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Span {
        if self.at(kind) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                kind.description(),
                self.peek().description()
            ));
            self.current_span()
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let TokenKind::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected identifier, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_terminators(&mut self) {
        while self.at(&TokenKind::Newline) || self.at(&TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Newlines are soft statement terminators; a semicolon also ends a
    /// statement. Anything else after a statement is an error.
    fn expect_terminator(&mut self) {
        if self.at_statement_end() {
            self.panic_mode = false;
            return;
        }
        self.error_at_current(&format!(
            "expected newline or ';' after statement, found {}",
            self.peek().description()
        ));
        self.synchronize();
    }

    // --- Error recovery ---

    fn error_at_current(&mut self, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.had_error = true;
        self.panic_mode = true;
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        if self.panic_mode {
            return;
        }
        self.had_error = true;
        self.panic_mode = true;
        self.diagnostics.push(
            Diagnostic::error(msg.to_string(), self.current_span()).with_help(help.to_string()),
        );
    }

    /// Discard tokens until a newline has been consumed or the next token
    /// can start a statement.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::Newline) || self.at(&TokenKind::Semicolon) {
                self.advance();
                return;
            }
            if self.peek().starts_statement() {
                return;
            }
            self.advance();
        }
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_with_help(
                "nesting depth exceeded (maximum 256 levels)",
                "simplify the program by extracting deeply nested code into functions",
            );
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }
}

/// Reserved keywords the parser refuses outright.
fn is_reserved_unsupported(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Try
            | TokenKind::Catch
            | TokenKind::Finally
            | TokenKind::Throw
            | TokenKind::Class
            | TokenKind::Extends
            | TokenKind::Implements
            | TokenKind::New
            | TokenKind::This
            | TokenKind::Super
            | TokenKind::Static
            | TokenKind::Private
            | TokenKind::Public
            | TokenKind::Protected
            | TokenKind::Async
            | TokenKind::Await
            | TokenKind::Yield
            | TokenKind::Ui
            | TokenKind::End
    )
}

/// Returns (left, right) binding power. Higher binds tighter; right > left
/// gives left associativity in the climbing loop.
fn op_binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 2),
        BinOp::And => (3, 4),
        BinOp::Eq | BinOp::Ne => (5, 6),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (7, 8),
        BinOp::Add | BinOp::Sub => (9, 10),
        BinOp::Mul | BinOp::Div | BinOp::Mod => (11, 12),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let (tokens, lex_diags) = Lexer::new(source).tokenize();
        assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
        let (program, diags) = Parser::new(tokens).parse_program();
        assert!(diags.is_empty(), "parse errors: {:?}", diags);
        program
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        let (tokens, lex_diags) = Lexer::new(source).tokenize();
        if !lex_diags.is_empty() {
            return lex_diags;
        }
        let (_program, diags) = Parser::new(tokens).parse_program();
        diags
    }

    #[test]
    fn test_var_decl_forms() {
        let p = parse("var a\nvar b = 1\nvar c: int = 2\nlet d = 3");
        assert_eq!(p.stmts.len(), 4);
        match &p.stmts[2].node {
            Stmt::VarDecl {
                name,
                annotation,
                init,
            } => {
                assert_eq!(name.node, "c");
                assert_eq!(annotation.as_ref().unwrap().node, "int");
                assert!(init.is_some());
            }
            other => panic!("expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_const_decl() {
        let p = parse("const k = 1");
        match &p.stmts[0].node {
            Stmt::ConstDecl { name, init, .. } => {
                assert_eq!(name.node, "k");
                assert!(matches!(init.node, Expr::Literal(Literal::Int(1))));
            }
            other => panic!("expected const decl, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let p = parse("var x = 2 + 3 * 4");
        match &p.stmts[0].node {
            Stmt::VarDecl { init, .. } => match &init.as_ref().unwrap().node {
                Expr::Binary { op, rhs, .. } => {
                    assert_eq!(*op, BinOp::Add);
                    assert!(matches!(
                        rhs.node,
                        Expr::Binary { op: BinOp::Mul, .. }
                    ));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn test_comparison_below_logical() {
        // a < b && c < d must parse as (a < b) && (c < d)
        let p = parse("var x = a < b && c < d");
        match &p.stmts[0].node {
            Stmt::VarDecl { init, .. } => match &init.as_ref().unwrap().node {
                Expr::Binary { op, lhs, rhs } => {
                    assert_eq!(*op, BinOp::And);
                    assert!(matches!(lhs.node, Expr::Binary { op: BinOp::Lt, .. }));
                    assert!(matches!(rhs.node, Expr::Binary { op: BinOp::Lt, .. }));
                }
                other => panic!("expected &&, got {:?}", other),
            },
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn test_assignment_right_associative() {
        let p = parse("a = b = 1");
        match &p.stmts[0].node {
            Stmt::Expr(e) => match &e.node {
                Expr::Assign { value, .. } => {
                    assert!(matches!(value.node, Expr::Assign { .. }));
                }
                other => panic!("expected assign, got {:?}", other),
            },
            _ => panic!("expected expr stmt"),
        }
    }

    #[test]
    fn test_compound_assignment() {
        let p = parse("x += 2");
        match &p.stmts[0].node {
            Stmt::Expr(e) => match &e.node {
                Expr::Assign { op, .. } => assert_eq!(*op, AssignOp::AddAssign),
                other => panic!("expected assign, got {:?}", other),
            },
            _ => panic!("expected expr stmt"),
        }
    }

    #[test]
    fn test_unary_binds_tighter_than_binary() {
        let p = parse("var x = -a + b");
        match &p.stmts[0].node {
            Stmt::VarDecl { init, .. } => match &init.as_ref().unwrap().node {
                Expr::Binary { op, lhs, .. } => {
                    assert_eq!(*op, BinOp::Add);
                    assert!(matches!(lhs.node, Expr::Unary { op: UnaryOp::Neg, .. }));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let p = parse("if a { b() } elif c { d() } else { e() }");
        match &p.stmts[0].node {
            Stmt::If {
                elif_branches,
                else_block,
                ..
            } => {
                assert_eq!(elif_branches.len(), 1);
                assert!(else_block.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_else_on_next_line() {
        let p = parse("if a {\n    b()\n}\nelse {\n    c()\n}");
        assert_eq!(p.stmts.len(), 1);
        match &p.stmts[0].node {
            Stmt::If { else_block, .. } => assert!(else_block.is_some()),
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_while_and_do_while() {
        let p = parse("while a { b() }\ndo { c() } while d");
        assert!(matches!(p.stmts[0].node, Stmt::While { .. }));
        assert!(matches!(p.stmts[1].node, Stmt::DoWhile { .. }));
    }

    #[test]
    fn test_for_range() {
        let p = parse("for i in 0..10 { print(i) }");
        match &p.stmts[0].node {
            Stmt::For { var, iter, .. } => {
                assert_eq!(var.node, "i");
                assert!(matches!(iter, ForIter::Range(..)));
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_for_expr() {
        let p = parse("for x in items { print(x) }");
        match &p.stmts[0].node {
            Stmt::For { iter, .. } => assert!(matches!(iter, ForIter::Expr(_))),
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_function_decl() {
        let p = parse("function add(a: int, b: int): int {\n    return a + b\n}");
        match &p.stmts[0].node {
            Stmt::FnDecl {
                name,
                params,
                return_annotation,
                body,
            } => {
                assert_eq!(name.node, "add");
                assert_eq!(params.len(), 2);
                assert_eq!(params[0].annotation.as_ref().unwrap().node, "int");
                assert_eq!(return_annotation.as_ref().unwrap().node, "int");
                assert_eq!(body.node.stmts.len(), 1);
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_call_index_member_chain() {
        let p = parse("f(1, 2)[0].name");
        match &p.stmts[0].node {
            Stmt::Expr(e) => match &e.node {
                Expr::Member { target, field } => {
                    assert_eq!(field.node, "name");
                    assert!(matches!(target.node, Expr::Index { .. }));
                }
                other => panic!("expected member, got {:?}", other),
            },
            _ => panic!("expected expr stmt"),
        }
    }

    #[test]
    fn test_ternary() {
        let p = parse("var x = a ? 1 : 2");
        match &p.stmts[0].node {
            Stmt::VarDecl { init, .. } => {
                assert!(matches!(init.as_ref().unwrap().node, Expr::Ternary { .. }));
            }
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn test_array_and_object_literals() {
        let p = parse("var a = [1, 2, 3]\nvar o = {x: 1, y: 2}");
        match &p.stmts[0].node {
            Stmt::VarDecl { init, .. } => match &init.as_ref().unwrap().node {
                Expr::Array(elems) => assert_eq!(elems.len(), 3),
                other => panic!("expected array, got {:?}", other),
            },
            _ => panic!("expected var decl"),
        }
        match &p.stmts[1].node {
            Stmt::VarDecl { init, .. } => match &init.as_ref().unwrap().node {
                Expr::Object(entries) => {
                    assert_eq!(entries.len(), 2);
                    assert_eq!(entries[0].0.node, "x");
                }
                other => panic!("expected object, got {:?}", other),
            },
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn test_embed_statement() {
        let p = parse("embed js console.log(1) endembed");
        match &p.stmts[0].node {
            Stmt::Embed { lang, body } => {
                assert_eq!(lang, "js");
                assert_eq!(body, "console.log(1)");
            }
            other => panic!("expected embed, got {:?}", other),
        }
    }

    #[test]
    fn test_semicolons_accepted() {
        let p = parse("var x = 1; var y = 2;");
        assert_eq!(p.stmts.len(), 2);
    }

    // --- Error path tests ---

    #[test]
    fn test_error_missing_closing_brace() {
        let diags = parse_err("function main() {\n    var x = 1\n");
        assert!(!diags.is_empty());
        assert!(
            diags.iter().any(|d| d.message.contains("expected '}'")),
            "got: {:?}",
            diags.iter().map(|d| &d.message).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_error_recovers_and_reports_later_errors() {
        // Two independent errors on two lines; panic mode must not swallow
        // the second.
        let diags = parse_err("var = 1\nvar = 2");
        assert_eq!(diags.len(), 2, "got: {:?}", diags);
    }

    #[test]
    fn test_error_reserved_keyword() {
        let diags = parse_err("class Foo {}");
        assert!(!diags.is_empty());
        assert!(
            diags[0].message.contains("'class' is not supported"),
            "got: {}",
            diags[0].message
        );
        assert!(diags[0].help.is_some());
    }

    #[test]
    fn test_error_expected_expression() {
        let diags = parse_err("var x = *");
        assert!(!diags.is_empty());
        assert!(
            diags[0].message.contains("expected expression"),
            "got: {}",
            diags[0].message
        );
    }

    #[test]
    fn test_error_shows_expected_and_found() {
        let diags = parse_err("function main { }");
        assert!(!diags.is_empty());
        let msg = &diags[0].message;
        assert!(
            msg.contains("expected") && msg.contains("found"),
            "got: {}",
            msg
        );
    }

    #[test]
    fn test_error_const_without_initializer() {
        let diags = parse_err("const k\n");
        assert!(!diags.is_empty());
        assert!(
            diags[0].message.contains("expected '='"),
            "got: {}",
            diags[0].message
        );
    }

    #[test]
    fn test_partial_ast_on_error() {
        let (tokens, _) = Lexer::new("var a = 1\nvar = 2\nvar c = 3").tokenize();
        let (program, diags) = Parser::new(tokens).parse_program();
        assert!(!diags.is_empty());
        // The two well-formed declarations survive
        let names: Vec<_> = program
            .stmts
            .iter()
            .filter_map(|s| match &s.node {
                Stmt::VarDecl { name, .. } => Some(name.node.clone()),
                _ => None,
            })
            .collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"c".to_string()));
    }

    #[test]
    fn test_never_panics_on_garbage() {
        for src in [
            "(((((((",
            "var var var",
            "} } }",
            "if { } else",
            "for in in",
            "1 + + + 2",
            "?:?:?:",
        ] {
            let (tokens, _) = Lexer::new(src).tokenize();
            let (_program, _diags) = Parser::new(tokens).parse_program();
        }
    }
}
