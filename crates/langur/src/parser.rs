//! Pratt parser over the token stream.
//!
//! Prefix parsers are right-associative and keyed by the current token kind;
//! infix parsers are left-associative and keyed by the operator token. The
//! `depth` counter lets REPL mode treat a top-level `{` as a map literal
//! expression rather than a block.

use crate::{
    ast::{Block, ExprKind, Expression, FnLiteral, Ident, IfCase, Operator, Statement, StmtKind, wrap_in_call},
    errors::{ErrorKind, Errors, Position},
    lexer::{Lexer, TokenKind},
};

/// Precedence ladder, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assign,
    Ternary,
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equals,
    LessGreater,
    Shift,
    Sum,
    Product,
    Prefix,
    IncDec,
    Postfix,
    Highest,
}

fn token_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        Assign | PlusAssign | MinusAssign | AsteriskAssign | SlashAssign | PercentAssign | BitAndAssign
        | BitOrAssign | BitXorAssign | LShiftAssign | RShiftAssign => Precedence::Assign,
        Question => Precedence::Ternary,
        Or => Precedence::LogicalOr,
        And => Precedence::LogicalAnd,
        BitOr => Precedence::BitOr,
        BitXor => Precedence::BitXor,
        BitAnd => Precedence::BitAnd,
        Eq | NotEq => Precedence::Equals,
        Lt | Lte | Gt | Gte => Precedence::LessGreater,
        LShift | RShift => Precedence::Shift,
        Plus | Minus => Precedence::Sum,
        Asterisk | Slash | Percent => Precedence::Product,
        PlusPlus | MinusMinus => Precedence::IncDec,
        Lparen | Lbracket | Dot => Precedence::Postfix,
        _ => Precedence::Lowest,
    }
}

fn infix_operator(kind: TokenKind) -> Option<Operator> {
    use TokenKind::*;
    let op = match kind {
        Plus => Operator::Plus,
        Minus => Operator::Minus,
        Asterisk => Operator::Asterisk,
        Slash => Operator::Slash,
        Percent => Operator::Percent,
        Lt => Operator::Lt,
        Lte => Operator::Lte,
        Gt => Operator::Gt,
        Gte => Operator::Gte,
        Eq => Operator::Eq,
        NotEq => Operator::NotEq,
        BitAnd => Operator::BitAnd,
        BitOr => Operator::BitOr,
        BitXor => Operator::BitXor,
        LShift => Operator::LShift,
        RShift => Operator::RShift,
        _ => return None,
    };
    Some(op)
}

/// Operator used when a compound assignment is desugared.
fn compound_assign_operator(kind: TokenKind) -> Option<Operator> {
    use TokenKind::*;
    let op = match kind {
        PlusAssign => Operator::Plus,
        MinusAssign => Operator::Minus,
        AsteriskAssign => Operator::Asterisk,
        SlashAssign => Operator::Slash,
        PercentAssign => Operator::Percent,
        BitAndAssign => Operator::BitAnd,
        BitOrAssign => Operator::BitOr,
        BitXorAssign => Operator::BitXor,
        LShiftAssign => Operator::LShift,
        RShiftAssign => Operator::RShift,
        _ => return None,
    };
    Some(op)
}

pub(crate) struct Parser<'a, 'e> {
    lexer: Lexer<'a>,
    errors: &'e mut Errors,
    repl_mode: bool,
    depth: usize,
}

impl<'a, 'e> Parser<'a, 'e> {
    pub fn new(input: &'a str, file: Option<std::rc::Rc<str>>, repl_mode: bool, errors: &'e mut Errors) -> Self {
        let mut lexer = Lexer::new(input, file);
        lexer.next_token();
        lexer.next_token();
        Self {
            lexer,
            errors,
            repl_mode,
            depth: 0,
        }
    }

    /// Parses the whole input. Returns `None` when any error was recorded;
    /// partial subtrees are dropped on the unwinding path.
    pub fn parse_all(mut self) -> Option<Vec<Statement>> {
        let mut statements = Vec::new();
        while !self.lexer.cur_is(TokenKind::Eof) {
            if !self.errors.is_empty() {
                return None;
            }
            let statement = self.parse_statement()?;
            statements.push(statement);
        }
        if !self.errors.is_empty() {
            return None;
        }
        Some(statements)
    }

    fn error(&mut self, pos: Position, message: impl Into<String>) {
        self.errors.add(ErrorKind::Parsing, pos, message);
    }

    fn next_token(&mut self) {
        self.lexer.next_token();
    }

    fn expect_current(&mut self, kind: TokenKind) -> Option<()> {
        if self.lexer.expect_current(kind, self.errors) { Some(()) } else { None }
    }

    fn cur_precedence(&self) -> Precedence {
        token_precedence(self.lexer.cur().kind)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Option<Statement> {
        let pos = self.lexer.cur().pos.clone();
        let kind = match self.lexer.cur().kind {
            TokenKind::Var | TokenKind::Const => self.parse_define_statement()?,
            TokenKind::Function if self.lexer.peek_is(TokenKind::Ident) => self.parse_function_statement()?,
            TokenKind::Lbrace if self.depth > 0 || !self.repl_mode => StmtKind::Block(self.parse_block()?),
            TokenKind::If => self.parse_if_statement()?,
            TokenKind::While => self.parse_while_statement()?,
            TokenKind::For => self.parse_for_statement()?,
            TokenKind::Break => {
                self.next_token();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.next_token();
                StmtKind::Continue
            }
            TokenKind::Return => self.parse_return_statement()?,
            TokenKind::Import => self.parse_import_statement()?,
            TokenKind::Recover => self.parse_recover_statement()?,
            _ => {
                let expr = self.parse_expression(Precedence::Lowest)?;
                StmtKind::Expression(Box::new(expr))
            }
        };
        if self.lexer.cur_is(TokenKind::Semicolon) {
            self.next_token();
        }
        Some(Statement::new(kind, pos))
    }

    fn parse_define_statement(&mut self) -> Option<StmtKind> {
        let assignable = self.lexer.cur_is(TokenKind::Var);
        self.next_token();
        self.expect_current(TokenKind::Ident)?;
        let name = Ident {
            name: self.lexer.cur().literal.clone(),
            pos: self.lexer.cur().pos.clone(),
        };
        self.next_token();
        self.expect_current(TokenKind::Assign)?;
        self.next_token();
        let mut value = self.parse_expression(Precedence::Lowest)?;
        if let ExprKind::FnLiteral(fn_literal) = &mut value.kind
            && fn_literal.name.is_none()
        {
            fn_literal.name = Some(name.name.clone());
        }
        Some(StmtKind::Define {
            name,
            value: Box::new(value),
            assignable,
        })
    }

    fn parse_function_statement(&mut self) -> Option<StmtKind> {
        let name = Ident {
            name: self.lexer.peek().literal.clone(),
            pos: self.lexer.peek().pos.clone(),
        };
        let value = self.parse_fn_literal()?;
        Some(StmtKind::Define {
            name,
            value: Box::new(value),
            assignable: false,
        })
    }

    fn parse_block(&mut self) -> Option<Block> {
        self.depth += 1;
        let result = self.parse_block_inner();
        self.depth -= 1;
        result
    }

    fn parse_block_inner(&mut self) -> Option<Block> {
        self.expect_current(TokenKind::Lbrace)?;
        self.next_token();
        let mut statements = Vec::new();
        while !self.lexer.cur_is(TokenKind::Rbrace) {
            if self.lexer.cur_is(TokenKind::Eof) {
                let pos = self.lexer.cur().pos.clone();
                self.error(pos, "unexpected EOF while parsing block");
                return None;
            }
            if !self.errors.is_empty() {
                return None;
            }
            statements.push(self.parse_statement()?);
        }
        self.next_token();
        Some(Block { statements })
    }

    fn parse_if_statement(&mut self) -> Option<StmtKind> {
        let mut cases = Vec::new();
        let mut alternative = None;

        self.next_token();
        self.expect_current(TokenKind::Lparen)?;
        self.next_token();
        let test = self.parse_expression(Precedence::Lowest)?;
        self.expect_current(TokenKind::Rparen)?;
        self.next_token();
        cases.push(IfCase {
            test: Box::new(test),
            consequence: self.parse_block()?,
        });

        while self.lexer.cur_is(TokenKind::Else) {
            self.next_token();
            if self.lexer.cur_is(TokenKind::If) {
                self.next_token();
                self.expect_current(TokenKind::Lparen)?;
                self.next_token();
                let test = self.parse_expression(Precedence::Lowest)?;
                self.expect_current(TokenKind::Rparen)?;
                self.next_token();
                cases.push(IfCase {
                    test: Box::new(test),
                    consequence: self.parse_block()?,
                });
            } else {
                alternative = Some(self.parse_block()?);
                break;
            }
        }

        Some(StmtKind::If { cases, alternative })
    }

    fn parse_while_statement(&mut self) -> Option<StmtKind> {
        self.next_token();
        self.expect_current(TokenKind::Lparen)?;
        self.next_token();
        let test = self.parse_expression(Precedence::Lowest)?;
        self.expect_current(TokenKind::Rparen)?;
        self.next_token();
        let body = self.parse_block()?;
        Some(StmtKind::While {
            test: Box::new(test),
            body,
        })
    }

    fn parse_for_statement(&mut self) -> Option<StmtKind> {
        self.next_token();
        self.expect_current(TokenKind::Lparen)?;
        self.next_token();
        if self.lexer.cur_is(TokenKind::Ident) && self.lexer.peek_is(TokenKind::In) {
            self.parse_foreach()
        } else {
            self.parse_classic_for()
        }
    }

    fn parse_foreach(&mut self) -> Option<StmtKind> {
        let iterator = Ident {
            name: self.lexer.cur().literal.clone(),
            pos: self.lexer.cur().pos.clone(),
        };
        self.next_token();
        self.next_token();
        let source = self.parse_expression(Precedence::Lowest)?;
        self.expect_current(TokenKind::Rparen)?;
        self.next_token();
        let body = self.parse_block()?;
        Some(StmtKind::Foreach {
            iterator,
            source: Box::new(source),
            body,
        })
    }

    fn parse_classic_for(&mut self) -> Option<StmtKind> {
        let init = if self.lexer.cur_is(TokenKind::Semicolon) {
            self.next_token();
            None
        } else {
            // parse_statement consumes the separating semicolon
            Some(Box::new(self.parse_statement()?))
        };
        let test = if self.lexer.cur_is(TokenKind::Semicolon) {
            self.next_token();
            None
        } else {
            let test = self.parse_expression(Precedence::Lowest)?;
            self.expect_current(TokenKind::Semicolon)?;
            self.next_token();
            Some(Box::new(test))
        };
        let update = if self.lexer.cur_is(TokenKind::Rparen) {
            None
        } else {
            Some(Box::new(self.parse_expression(Precedence::Lowest)?))
        };
        self.expect_current(TokenKind::Rparen)?;
        self.next_token();
        let body = self.parse_block()?;
        Some(StmtKind::ForLoop { init, test, update, body })
    }

    fn parse_return_statement(&mut self) -> Option<StmtKind> {
        self.next_token();
        if self.lexer.cur_is(TokenKind::Semicolon)
            || self.lexer.cur_is(TokenKind::Rbrace)
            || self.lexer.cur_is(TokenKind::Eof)
        {
            return Some(StmtKind::Return(None));
        }
        let value = self.parse_expression(Precedence::Lowest)?;
        Some(StmtKind::Return(Some(Box::new(value))))
    }

    fn parse_import_statement(&mut self) -> Option<StmtKind> {
        self.next_token();
        self.expect_current(TokenKind::String)?;
        let path = self.lexer.cur().literal.clone();
        self.next_token();
        Some(StmtKind::Import { path })
    }

    fn parse_recover_statement(&mut self) -> Option<StmtKind> {
        self.next_token();
        self.expect_current(TokenKind::Lparen)?;
        self.next_token();
        self.expect_current(TokenKind::Ident)?;
        let error_ident = Ident {
            name: self.lexer.cur().literal.clone(),
            pos: self.lexer.cur().pos.clone(),
        };
        self.next_token();
        self.expect_current(TokenKind::Rparen)?;
        self.next_token();
        let body = self.parse_block()?;
        Some(StmtKind::Recover { error_ident, body })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let mut left = self.parse_prefix()?;
        while !self.lexer.cur_is(TokenKind::Semicolon) && precedence < self.cur_precedence() {
            left = self.parse_infix(left)?;
        }
        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expression> {
        let pos = self.lexer.cur().pos.clone();
        match self.lexer.cur().kind {
            TokenKind::Ident => {
                let ident = Ident {
                    name: self.lexer.cur().literal.clone(),
                    pos: pos.clone(),
                };
                self.next_token();
                Some(Expression::new(ExprKind::Ident(ident), pos))
            }
            TokenKind::Number => self.parse_number_literal(),
            TokenKind::True | TokenKind::False => {
                let value = self.lexer.cur_is(TokenKind::True);
                self.next_token();
                Some(Expression::new(ExprKind::BoolLiteral(value), pos))
            }
            TokenKind::Null => {
                self.next_token();
                Some(Expression::new(ExprKind::NullLiteral, pos))
            }
            TokenKind::String => {
                let literal = self.lexer.cur().literal.clone();
                self.next_token();
                Some(Expression::new(ExprKind::StringLiteral(literal), pos))
            }
            TokenKind::TemplateString => self.parse_template_string(),
            TokenKind::Bang => self.parse_prefix_operator(Operator::Bang, pos),
            TokenKind::Minus => self.parse_prefix_operator(Operator::Minus, pos),
            TokenKind::PlusPlus => self.parse_incdec_prefix(Operator::Plus, pos),
            TokenKind::MinusMinus => self.parse_incdec_prefix(Operator::Minus, pos),
            TokenKind::Lparen => {
                self.next_token();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect_current(TokenKind::Rparen)?;
                self.next_token();
                Some(expr)
            }
            TokenKind::Lbracket => self.parse_array_literal(),
            TokenKind::Lbrace => self.parse_map_literal(),
            TokenKind::Function => self.parse_fn_literal(),
            kind => {
                self.error(pos, format!("no prefix parse function for \"{}\" found", kind.as_str()));
                None
            }
        }
    }

    fn parse_number_literal(&mut self) -> Option<Expression> {
        let pos = self.lexer.cur().pos.clone();
        let literal = self.lexer.cur().literal.clone();
        self.next_token();
        let parsed = if let Some(hex) = literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16).ok().map(|v| v as f64)
        } else {
            literal.parse::<f64>().ok().filter(|v| v.is_finite())
        };
        match parsed {
            Some(value) => Some(Expression::new(ExprKind::NumberLiteral(value), pos)),
            None => {
                self.error(pos, format!("parsing number literal \"{literal}\" failed"));
                None
            }
        }
    }

    fn parse_prefix_operator(&mut self, op: Operator, pos: Position) -> Option<Expression> {
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Some(Expression::new(
            ExprKind::Prefix {
                op,
                right: Box::new(right),
            },
            pos,
        ))
    }

    /// `++x` and `--x` rewrite to `x = x + 1` / `x = x - 1`.
    fn parse_incdec_prefix(&mut self, op: Operator, pos: Position) -> Option<Expression> {
        self.next_token();
        let operand_pos = self.lexer.cur().pos.clone();
        let dest = self.parse_expression(Precedence::Prefix)?;
        let one = Expression::new(ExprKind::NumberLiteral(1.0), operand_pos.clone());
        let source = Expression::new(
            ExprKind::Infix {
                op,
                left: Box::new(dest.clone()),
                right: Box::new(one),
            },
            operand_pos,
        );
        Some(Expression::new(
            ExprKind::Assign {
                dest: Box::new(dest),
                source: Box::new(source),
                is_postfix: false,
            },
            pos,
        ))
    }

    fn parse_array_literal(&mut self) -> Option<Expression> {
        let pos = self.lexer.cur().pos.clone();
        self.next_token();
        let mut items = Vec::new();
        while !self.lexer.cur_is(TokenKind::Rbracket) {
            if self.lexer.cur_is(TokenKind::Eof) {
                self.error(pos, "unexpected EOF while parsing array literal");
                return None;
            }
            items.push(self.parse_expression(Precedence::Lowest)?);
            // trailing comma is allowed
            if self.lexer.cur_is(TokenKind::Comma) {
                self.next_token();
            } else {
                break;
            }
        }
        self.expect_current(TokenKind::Rbracket)?;
        self.next_token();
        Some(Expression::new(ExprKind::ArrayLiteral(items), pos))
    }

    fn parse_map_literal(&mut self) -> Option<Expression> {
        let pos = self.lexer.cur().pos.clone();
        self.next_token();
        let mut entries = Vec::new();
        while !self.lexer.cur_is(TokenKind::Rbrace) {
            if self.lexer.cur_is(TokenKind::Eof) {
                self.error(pos, "unexpected EOF while parsing map literal");
                return None;
            }
            let key_pos = self.lexer.cur().pos.clone();
            let key = match self.lexer.cur().kind {
                // bare identifiers stringify implicitly
                TokenKind::Ident => {
                    let literal = self.lexer.cur().literal.clone();
                    self.next_token();
                    Expression::new(ExprKind::StringLiteral(literal), key_pos)
                }
                TokenKind::String | TokenKind::Number | TokenKind::True | TokenKind::False => {
                    let key = self.parse_expression(Precedence::Lowest)?;
                    match key.kind {
                        ExprKind::StringLiteral(_) | ExprKind::NumberLiteral(_) | ExprKind::BoolLiteral(_) => key,
                        _ => {
                            self.error(key_pos, "invalid map literal key type");
                            return None;
                        }
                    }
                }
                kind => {
                    self.error(key_pos, format!("invalid map literal key \"{}\"", kind.as_str()));
                    return None;
                }
            };
            self.expect_current(TokenKind::Colon)?;
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            entries.push((key, value));
            if self.lexer.cur_is(TokenKind::Comma) {
                self.next_token();
            } else {
                break;
            }
        }
        self.expect_current(TokenKind::Rbrace)?;
        self.next_token();
        Some(Expression::new(ExprKind::MapLiteral(entries), pos))
    }

    fn parse_fn_literal(&mut self) -> Option<Expression> {
        let pos = self.lexer.cur().pos.clone();
        self.next_token();
        let name = if self.lexer.cur_is(TokenKind::Ident) {
            let name = self.lexer.cur().literal.clone();
            self.next_token();
            Some(name)
        } else {
            None
        };
        self.expect_current(TokenKind::Lparen)?;
        self.next_token();
        let mut params = Vec::new();
        while !self.lexer.cur_is(TokenKind::Rparen) {
            self.expect_current(TokenKind::Ident)?;
            params.push(Ident {
                name: self.lexer.cur().literal.clone(),
                pos: self.lexer.cur().pos.clone(),
            });
            self.next_token();
            if self.lexer.cur_is(TokenKind::Comma) {
                self.next_token();
            } else {
                break;
            }
        }
        self.expect_current(TokenKind::Rparen)?;
        self.next_token();
        let body = self.parse_block()?;
        Some(Expression::new(
            ExprKind::FnLiteral(FnLiteral { name, params, body }),
            pos,
        ))
    }

    /// Lowers `` `A${expr}B` `` into `"A" + tostring(expr) + "B"`.
    ///
    /// The current token is the template segment before the splice; after the
    /// splice expression and its closing `}` the lexer is rewound one token,
    /// told to resume the template, and re-read.
    fn parse_template_string(&mut self) -> Option<Expression> {
        let left_literal = self.lexer.cur().literal.clone();
        self.next_token();

        self.expect_current(TokenKind::Lbrace)?;
        self.next_token();

        let left_pos = self.lexer.cur().pos.clone();
        let left = Expression::new(ExprKind::StringLiteral(left_literal), left_pos.clone());

        let splice = self.parse_expression(Precedence::Lowest)?;
        let mut tostring_call = wrap_in_call(splice, "tostring");
        tostring_call.pos = left_pos.clone();

        let left_add = Expression::new(
            ExprKind::Infix {
                op: Operator::Plus,
                left: Box::new(left),
                right: Box::new(tostring_call),
            },
            left_pos,
        );

        self.expect_current(TokenKind::Rbrace)?;
        self.lexer.previous_token();
        self.lexer.continue_template_string();
        self.next_token();
        self.next_token();

        let right_pos = self.lexer.cur().pos.clone();
        let right = self.parse_expression(Precedence::Highest)?;
        Some(Expression::new(
            ExprKind::Infix {
                op: Operator::Plus,
                left: Box::new(left_add),
                right: Box::new(right),
            },
            right_pos,
        ))
    }

    /// Parses one infix step for `left`. Only called for tokens whose
    /// precedence is above `Lowest`, all of which have an infix form.
    fn parse_infix(&mut self, left: Expression) -> Option<Expression> {
        let pos = self.lexer.cur().pos.clone();
        let kind = self.lexer.cur().kind;

        if let Some(op) = infix_operator(kind) {
            let precedence = self.cur_precedence();
            self.next_token();
            let right = self.parse_expression(precedence)?;
            return Some(Expression::new(
                ExprKind::Infix {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            ));
        }

        if let Some(op) = compound_assign_operator(kind) {
            self.next_token();
            let source = self.parse_expression(Precedence::Lowest)?;
            // desugar `dst <op>= src` into `dst = dst <op> src`
            let combined = Expression::new(
                ExprKind::Infix {
                    op,
                    left: Box::new(left.clone()),
                    right: Box::new(source),
                },
                pos.clone(),
            );
            return Some(Expression::new(
                ExprKind::Assign {
                    dest: Box::new(left),
                    source: Box::new(combined),
                    is_postfix: false,
                },
                pos,
            ));
        }

        let expr = match kind {
            TokenKind::Assign => {
                self.next_token();
                let source = self.parse_expression(Precedence::Lowest)?;
                Expression::new(
                    ExprKind::Assign {
                        dest: Box::new(left),
                        source: Box::new(source),
                        is_postfix: false,
                    },
                    pos,
                )
            }
            TokenKind::Lparen => {
                self.next_token();
                let mut args = Vec::new();
                if !self.lexer.cur_is(TokenKind::Rparen) {
                    args.push(self.parse_expression(Precedence::Lowest)?);
                    while self.lexer.cur_is(TokenKind::Comma) {
                        self.next_token();
                        args.push(self.parse_expression(Precedence::Lowest)?);
                    }
                }
                self.expect_current(TokenKind::Rparen)?;
                self.next_token();
                Expression::new(
                    ExprKind::Call {
                        function: Box::new(left),
                        args,
                    },
                    pos,
                )
            }
            TokenKind::Lbracket => {
                self.next_token();
                let index = self.parse_expression(Precedence::Lowest)?;
                self.expect_current(TokenKind::Rbracket)?;
                self.next_token();
                Expression::new(
                    ExprKind::Index {
                        left: Box::new(left),
                        index: Box::new(index),
                    },
                    pos,
                )
            }
            TokenKind::Dot => {
                self.next_token();
                self.expect_current(TokenKind::Ident)?;
                let member_pos = self.lexer.cur().pos.clone();
                let member = Expression::new(ExprKind::StringLiteral(self.lexer.cur().literal.clone()), member_pos);
                self.next_token();
                Expression::new(
                    ExprKind::Index {
                        left: Box::new(left),
                        index: Box::new(member),
                    },
                    pos,
                )
            }
            TokenKind::Question => {
                self.next_token();
                let if_true = self.parse_expression(Precedence::Lowest)?;
                self.expect_current(TokenKind::Colon)?;
                self.next_token();
                let if_false = self.parse_expression(Precedence::Lowest)?;
                Expression::new(
                    ExprKind::Ternary {
                        test: Box::new(left),
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                    },
                    pos,
                )
            }
            TokenKind::And | TokenKind::Or => {
                let op = if kind == TokenKind::And {
                    Operator::LogicalAnd
                } else {
                    Operator::LogicalOr
                };
                let precedence = self.cur_precedence();
                self.next_token();
                let right = self.parse_expression(precedence)?;
                Expression::new(
                    ExprKind::Logical {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    pos,
                )
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if kind == TokenKind::PlusPlus {
                    Operator::Plus
                } else {
                    Operator::Minus
                };
                self.next_token();
                let one = Expression::new(ExprKind::NumberLiteral(1.0), pos.clone());
                let source = Expression::new(
                    ExprKind::Infix {
                        op,
                        left: Box::new(left.clone()),
                        right: Box::new(one),
                    },
                    pos.clone(),
                );
                Expression::new(
                    ExprKind::Assign {
                        dest: Box::new(left),
                        source: Box::new(source),
                        is_postfix: true,
                    },
                    pos,
                )
            }
            _ => {
                self.error(pos, format!("no infix parse function for \"{}\" found", kind.as_str()));
                return None;
            }
        };
        Some(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Vec<Statement> {
        let mut errors = Errors::new();
        let parser = Parser::new(input, None, false, &mut errors);
        let statements = parser.parse_all();
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors.first());
        statements.expect("parse failed without recording errors")
    }

    fn parse_err(input: &str) -> String {
        let mut errors = Errors::new();
        let parser = Parser::new(input, None, false, &mut errors);
        let statements = parser.parse_all();
        assert!(statements.is_none());
        errors.first().expect("error expected").message.clone()
    }

    #[test]
    fn precedence_nests_products_under_sums() {
        let statements = parse("1 + 2 * 3");
        let StmtKind::Expression(expr) = &statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Infix { op: Operator::Plus, right, .. } = &expr.kind else {
            panic!("expected + at the root, got {expr:?}");
        };
        assert!(matches!(right.kind, ExprKind::Infix { op: Operator::Asterisk, .. }));
    }

    #[test]
    fn compound_assign_desugars() {
        let statements = parse("var x = 1; x += 2");
        let StmtKind::Expression(expr) = &statements[1].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { dest, source, is_postfix } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(!is_postfix);
        assert!(matches!(dest.kind, ExprKind::Ident(_)));
        assert!(matches!(source.kind, ExprKind::Infix { op: Operator::Plus, .. }));
    }

    #[test]
    fn postfix_increment_is_marked() {
        let statements = parse("var x = 1; x++");
        let StmtKind::Expression(expr) = &statements[1].kind else {
            panic!("expected expression statement");
        };
        assert!(matches!(expr.kind, ExprKind::Assign { is_postfix: true, .. }));
    }

    #[test]
    fn dot_lowers_to_string_index() {
        let statements = parse("a.b");
        let StmtKind::Expression(expr) = &statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Index { index, .. } = &expr.kind else {
            panic!("expected index");
        };
        assert!(matches!(&index.kind, ExprKind::StringLiteral(s) if s == "b"));
    }

    #[test]
    fn function_statement_defines_named_literal() {
        let statements = parse("function add(a, b) { return a + b }");
        let StmtKind::Define { name, value, assignable } = &statements[0].kind else {
            panic!("expected define");
        };
        assert_eq!(name.name, "add");
        assert!(!assignable);
        let ExprKind::FnLiteral(literal) = &value.kind else {
            panic!("expected fn literal");
        };
        assert_eq!(literal.name.as_deref(), Some("add"));
        assert_eq!(literal.params.len(), 2);
    }

    #[test]
    fn for_disambiguates_foreach() {
        let statements = parse("for (item in [1, 2]) { item }");
        assert!(matches!(statements[0].kind, StmtKind::Foreach { .. }));
        let statements = parse("for (var i = 0; i < 3; i++) { i }");
        assert!(matches!(statements[0].kind, StmtKind::ForLoop { .. }));
    }

    #[test]
    fn template_string_lowers_to_concat() {
        let statements = parse("`a${x}b`");
        let StmtKind::Expression(expr) = &statements[0].kind else {
            panic!("expected expression statement");
        };
        // ("a" + tostring(x)) + "b"
        let ExprKind::Infix { op: Operator::Plus, left, right } = &expr.kind else {
            panic!("expected + at root");
        };
        assert!(matches!(&right.kind, ExprKind::StringLiteral(s) if s == "b"));
        let ExprKind::Infix { op: Operator::Plus, right: call, .. } = &left.kind else {
            panic!("expected inner +");
        };
        let ExprKind::Call { function, .. } = &call.kind else {
            panic!("expected tostring call");
        };
        assert!(matches!(&function.kind, ExprKind::Ident(i) if i.name == "tostring"));
    }

    #[test]
    fn repl_mode_parses_top_level_brace_as_map() {
        let mut errors = Errors::new();
        let parser = Parser::new("{ a: 1 }", None, true, &mut errors);
        let statements = parser.parse_all().expect("parse failed");
        let StmtKind::Expression(expr) = &statements[0].kind else {
            panic!("expected expression statement");
        };
        assert!(matches!(expr.kind, ExprKind::MapLiteral(_)));
    }

    #[test]
    fn top_level_brace_is_a_block_outside_repl_mode() {
        let statements = parse("{ var a = 1 }");
        assert!(matches!(statements[0].kind, StmtKind::Block(_)));
    }

    #[test]
    fn map_key_forms() {
        let statements = parse(r#"var m = { a: 1, "b": 2, 3: 4, true: 5 }"#);
        let StmtKind::Define { value, .. } = &statements[0].kind else {
            panic!("expected define");
        };
        let ExprKind::MapLiteral(entries) = &value.kind else {
            panic!("expected map literal");
        };
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn bad_map_key_is_an_error() {
        let message = parse_err("var m = { [1]: 2 }");
        assert!(message.contains("map literal key"), "{message}");
    }

    #[test]
    fn bad_number_literal_is_an_error() {
        let message = parse_err("1.2.3");
        assert!(message.contains("number literal"), "{message}");
    }

    #[test]
    fn trailing_comma_in_call_args_is_an_error() {
        let message = parse_err("f(1,)");
        assert!(message.contains("no prefix parse function"), "{message}");
    }

    #[test]
    fn nested_template_strings() {
        let statements = parse("`x${`y${z}`}w`");
        assert_eq!(statements.len(), 1);
    }
}
