use crate::span::Spanned;

/// A parsed `.sb` source file: top-level statements in source order.
#[derive(Clone, Debug)]
pub struct Program {
    pub stmts: Vec<Spanned<Stmt>>,
}

/// A braced statement sequence.
#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

/// A function parameter with an optional `name: type` annotation.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Spanned<String>,
    pub annotation: Option<Spanned<String>>,
}

/// The iterable of a `for` statement: `a..b` range or a plain expression.
#[derive(Clone, Debug)]
pub enum ForIter {
    Range(Spanned<Expr>, Spanned<Expr>),
    Expr(Spanned<Expr>),
}

/// Statements.
#[derive(Clone, Debug)]
pub enum Stmt {
    VarDecl {
        name: Spanned<String>,
        annotation: Option<Spanned<String>>,
        init: Option<Spanned<Expr>>,
    },
    ConstDecl {
        name: Spanned<String>,
        annotation: Option<Spanned<String>>,
        init: Spanned<Expr>,
    },
    FnDecl {
        name: Spanned<String>,
        params: Vec<Param>,
        return_annotation: Option<Spanned<String>>,
        body: Spanned<Block>,
    },
    If {
        cond: Spanned<Expr>,
        then_block: Spanned<Block>,
        elif_branches: Vec<(Spanned<Expr>, Spanned<Block>)>,
        else_block: Option<Spanned<Block>>,
    },
    While {
        cond: Spanned<Expr>,
        body: Spanned<Block>,
    },
    DoWhile {
        body: Spanned<Block>,
        cond: Spanned<Expr>,
    },
    For {
        var: Spanned<String>,
        iter: ForIter,
        body: Spanned<Block>,
    },
    Return(Option<Spanned<Expr>>),
    Break,
    Continue,
    Block(Spanned<Block>),
    Expr(Spanned<Expr>),
    /// Embedded foreign-language blob, copied verbatim by the matching
    /// transpiler back-end.
    Embed {
        lang: String,
        body: String,
    },
}

/// Expressions.
#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Assign {
        op: AssignOp,
        target: Box<Spanned<Expr>>,
        value: Box<Spanned<Expr>>,
    },
    Ternary {
        cond: Box<Spanned<Expr>>,
        then_expr: Box<Spanned<Expr>>,
        else_expr: Box<Spanned<Expr>>,
    },
    /// Call of a named function; the callee is the function name.
    Call {
        name: Spanned<String>,
        args: Vec<Spanned<Expr>>,
    },
    Index {
        target: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    Member {
        target: Box<Spanned<Expr>>,
        field: Spanned<String>,
    },
    Array(Vec<Spanned<Expr>>),
    Object(Vec<(Spanned<String>, Spanned<Expr>)>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add, // +
    Sub, // -
    Mul, // *
    Div, // /
    Mod, // %
    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
    And, // &&
    Or,  // ||
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,    // =
    AddAssign, // +=
    SubAssign, // -=
    MulAssign, // *=
    DivAssign, // /=
    ModAssign, // %=
    AndAssign, // &=
    OrAssign,  // |=
    XorAssign, // ^=
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::AddAssign => "+=",
            AssignOp::SubAssign => "-=",
            AssignOp::MulAssign => "*=",
            AssignOp::DivAssign => "/=",
            AssignOp::ModAssign => "%=",
            AssignOp::AndAssign => "&=",
            AssignOp::OrAssign => "|=",
            AssignOp::XorAssign => "^=",
        }
    }

    /// The underlying binary operator of a compound assignment, if it has a
    /// lowering (`&=`, `|=`, and `^=` do not).
    pub fn binop(&self) -> Option<BinOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::AddAssign => Some(BinOp::Add),
            AssignOp::SubAssign => Some(BinOp::Sub),
            AssignOp::MulAssign => Some(BinOp::Mul),
            AssignOp::DivAssign => Some(BinOp::Div),
            AssignOp::ModAssign => Some(BinOp::Mod),
            AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::XorAssign => None,
        }
    }
}
