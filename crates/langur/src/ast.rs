//! Expression and statement trees produced by the parser.
//!
//! Nodes own their children; `Clone` produces the deep copy used when
//! compound assignments are desugared into `dst = dst <op> src`.

use std::fmt;

use crate::errors::Position;

/// Binary and unary operators appearing in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Plus,
    Minus,
    Bang,
    Asterisk,
    Slash,
    Percent,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    NotEq,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    LogicalAnd,
    LogicalOr,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Bang => "!",
            Self::Asterisk => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
        };
        f.write_str(s)
    }
}

/// An identifier with its source position.
#[derive(Debug, Clone)]
pub(crate) struct Ident {
    pub name: String,
    pub pos: Position,
}

/// A function literal: optional name (filled in by `function f() {}` and
/// named defines), parameters, and a body block.
#[derive(Debug, Clone)]
pub(crate) struct FnLiteral {
    pub name: Option<String>,
    pub params: Vec<Ident>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub(crate) struct Expression {
    pub kind: ExprKind,
    pub pos: Position,
}

impl Expression {
    pub fn new(kind: ExprKind, pos: Position) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ExprKind {
    Ident(Ident),
    NumberLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    NullLiteral,
    ArrayLiteral(Vec<Expression>),
    MapLiteral(Vec<(Expression, Expression)>),
    Prefix {
        op: Operator,
        right: Box<Expression>,
    },
    Infix {
        op: Operator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FnLiteral(FnLiteral),
    Call {
        function: Box<Expression>,
        args: Vec<Expression>,
    },
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
    },
    Assign {
        dest: Box<Expression>,
        source: Box<Expression>,
        is_postfix: bool,
    },
    Logical {
        op: Operator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Ternary {
        test: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct IfCase {
    pub test: Box<Expression>,
    pub consequence: Block,
}

#[derive(Debug, Clone)]
pub(crate) struct Statement {
    pub kind: StmtKind,
    pub pos: Position,
}

impl Statement {
    pub fn new(kind: StmtKind, pos: Position) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StmtKind {
    Define {
        name: Ident,
        value: Box<Expression>,
        assignable: bool,
    },
    If {
        cases: Vec<IfCase>,
        alternative: Option<Block>,
    },
    Return(Option<Box<Expression>>),
    Expression(Box<Expression>),
    While {
        test: Box<Expression>,
        body: Block,
    },
    Break,
    Continue,
    Foreach {
        iterator: Ident,
        source: Box<Expression>,
        body: Block,
    },
    ForLoop {
        init: Option<Box<Statement>>,
        test: Option<Box<Expression>>,
        update: Option<Box<Expression>>,
        body: Block,
    },
    Block(Block),
    Import {
        path: String,
    },
    Recover {
        error_ident: Ident,
        body: Block,
    },
}

/// Wraps an expression into a call of a named function at the expression's
/// position: `expr` becomes `name(expr)`.
///
/// This is the only place nodes are synthesized outside a user's literal
/// token stream; the parser uses it to lower template-string splices through
/// `tostring`.
pub(crate) fn wrap_in_call(expr: Expression, function_name: &str) -> Expression {
    let pos = expr.pos.clone();
    let callee = Expression::new(
        ExprKind::Ident(Ident {
            name: function_name.to_owned(),
            pos: pos.clone(),
        }),
        pos.clone(),
    );
    Expression::new(
        ExprKind::Call {
            function: Box::new(callee),
            args: vec![expr],
        },
        pos,
    )
}
