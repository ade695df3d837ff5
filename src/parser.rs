// ABOUTME: Precedence-climbing parser turning Calc tokens into expression trees
// Keeps a single-token lookahead over the lexer; every entry point returns
// Result and leaves the lookahead on the first unconsumed token.

use crate::ast::{BinaryOp, Expr, Function, Prototype};
use crate::error::CalcError;
use crate::lexer::Lexer;
use crate::token::Token;

/// Binding power of `op` in infix position, or `None` for non-operators.
fn binary_precedence(op: char) -> Option<i32> {
    match op {
        '<' => Some(50),
        '+' | '-' => Some(100),
        '*' | '/' => Some(200),
        '^' => Some(300),
        _ => None,
    }
}

/// Binding power of `op` in prefix position.
fn unary_precedence(op: char) -> Option<i32> {
    match op {
        '+' | '-' => Some(250),
        _ => None,
    }
}

/// Only `^` associates to the right.
fn is_right_associative(op: char) -> bool {
    op == '^'
}

pub struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    /// Creates a parser over `input` with the lookahead primed.
    pub fn new(input: &str) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        Parser { lexer, current }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Consumes the lookahead and fetches the next token.
    pub fn advance(&mut self) -> &Token {
        self.current = self.lexer.next_token();
        &self.current
    }

    /// The binding power of the current token when used as an infix
    /// operator; -1 for anything that cannot continue an expression.
    fn current_binary_precedence(&self) -> i32 {
        match &self.current {
            Token::Operator(op) => binary_precedence(*op).unwrap_or(-1),
            _ => -1,
        }
    }

    fn current_is_right_associative(&self) -> bool {
        matches!(&self.current, Token::Operator(op) if is_right_associative(*op))
    }

    // ===== Public entry points =====

    /// Wraps the next expression in an anonymous zero-argument function.
    pub fn parse_top_level_expr(&mut self) -> Result<Function, CalcError> {
        let body = self.parse_expression()?;
        Ok(Function::anonymous(body))
    }

    /// `def` prototype expression
    pub fn parse_definition(&mut self) -> Result<Function, CalcError> {
        self.advance(); // eat 'def'
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function::new(prototype, body))
    }

    /// `extern` prototype
    pub fn parse_extern(&mut self) -> Result<Prototype, CalcError> {
        self.advance(); // eat 'extern'
        self.parse_prototype()
    }

    /// IDENT '(' [ IDENT (',' IDENT)* ] ')'
    pub fn parse_prototype(&mut self) -> Result<Prototype, CalcError> {
        let name = match &self.current {
            Token::Identifier(name) => name.clone(),
            other => {
                return Err(CalcError::parse(format!(
                    "expected function name in prototype, got {}",
                    other
                )))
            }
        };
        self.advance();

        if self.current != Token::LeftParen {
            return Err(CalcError::parse("expected '(' in prototype"));
        }
        self.advance();

        let mut params = Vec::new();
        while let Token::Identifier(param) = &self.current {
            params.push(param.clone());
            self.advance();
            match &self.current {
                Token::RightParen => break,
                Token::Comma => {
                    self.advance();
                }
                other => {
                    return Err(CalcError::parse(format!(
                        "expected ',' after parameter '{}', got {}",
                        params[params.len() - 1],
                        other
                    )))
                }
            }
        }
        if self.current != Token::RightParen {
            return Err(CalcError::parse("expected ')' in prototype"));
        }
        self.advance();

        Ok(Prototype::new(name, params))
    }

    // ===== Expression parsing =====

    pub fn parse_expression(&mut self) -> Result<Expr, CalcError> {
        let lhs = self.parse_primary()?;
        self.parse_bin_rhs(0, lhs)
    }

    /// Consumes infix operators binding at least as tightly as `min_prec`.
    fn parse_bin_rhs(&mut self, min_prec: i32, mut lhs: Expr) -> Result<Expr, CalcError> {
        loop {
            let prec = self.current_binary_precedence();
            if prec < min_prec {
                return Ok(lhs);
            }
            let op = match &self.current {
                Token::Operator(c) => BinaryOp::from_char(*c).ok_or_else(|| {
                    CalcError::parse(format!("invalid binary operator '{}'", c))
                })?,
                // Unreachable given the precedence check, but keep the
                // parser total.
                other => {
                    return Err(CalcError::parse(format!(
                        "expected a binary operator, got {}",
                        other
                    )))
                }
            };
            self.advance();

            let mut rhs = self.parse_primary()?;

            // If the next operator binds tighter, or equally for a
            // right-associative operator, it owns `rhs` first.
            let next_prec = self.current_binary_precedence();
            if next_prec > prec || (next_prec == prec && self.current_is_right_associative()) {
                let climb = if next_prec == prec { prec } else { prec + 1 };
                rhs = self.parse_bin_rhs(climb, rhs)?;
            }

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CalcError> {
        match &self.current {
            Token::Number(value) => {
                let value = *value;
                self.advance();
                Ok(Expr::Number(value))
            }
            Token::Identifier(_) => self.parse_identifier_expr(),
            Token::LeftParen => self.parse_paren_expr(),
            Token::Operator(op) => {
                let op = *op;
                if unary_precedence(op).is_some() {
                    self.parse_unary_expr()
                } else {
                    Err(CalcError::parse(format!(
                        "expected an expression before '{}'",
                        op
                    )))
                }
            }
            Token::If => self.parse_if_expr(),
            Token::For => self.parse_for_expr(),
            other => Err(CalcError::parse(format!(
                "unknown token when expecting an expression: {}",
                other
            ))),
        }
    }

    /// A signed primary: `-x` parses as `0 - x`, `+x` as `0 + x`.
    fn parse_unary_expr(&mut self) -> Result<Expr, CalcError> {
        let (op_char, op) = match &self.current {
            Token::Operator(c) => match BinaryOp::from_char(*c) {
                Some(op) => (*c, op),
                None => {
                    return Err(CalcError::parse(format!(
                        "invalid unary operator '{}'",
                        c
                    )))
                }
            },
            other => {
                return Err(CalcError::parse(format!(
                    "expected a unary operator, got {}",
                    other
                )))
            }
        };
        let prec = unary_precedence(op_char).unwrap_or(-1);
        self.advance();

        let mut rhs = self.parse_primary()?;
        // Only `^` binds tighter than a sign, so `-2^2` is `-(2^2)`.
        if self.current_binary_precedence() > prec {
            rhs = self.parse_bin_rhs(prec + 1, rhs)?;
        }
        Ok(Expr::Binary {
            op,
            lhs: Box::new(Expr::Number(0.0)),
            rhs: Box::new(rhs),
        })
    }

    fn parse_paren_expr(&mut self) -> Result<Expr, CalcError> {
        self.advance(); // eat '('
        let inner = self.parse_expression()?;
        if self.current != Token::RightParen {
            return Err(CalcError::parse("expected ')'"));
        }
        self.advance(); // eat ')'
        Ok(inner)
    }

    /// A variable reference, or a call when '(' follows the identifier.
    fn parse_identifier_expr(&mut self) -> Result<Expr, CalcError> {
        let name = match &self.current {
            Token::Identifier(name) => name.clone(),
            other => {
                return Err(CalcError::parse(format!(
                    "expected an identifier, got {}",
                    other
                )))
            }
        };
        self.advance();

        if self.current != Token::LeftParen {
            return Ok(Expr::Variable(name));
        }
        self.advance(); // eat '('

        let mut args = Vec::new();
        if self.current != Token::RightParen {
            loop {
                args.push(self.parse_expression()?);
                match &self.current {
                    Token::RightParen => break,
                    Token::Comma => {
                        self.advance();
                    }
                    _ => {
                        return Err(CalcError::parse(
                            "expected ')' or ',' in argument list",
                        ))
                    }
                }
            }
        }
        self.advance(); // eat ')'
        Ok(Expr::Call { callee: name, args })
    }

    /// `if` cond `then` then-expr `else` else-expr
    fn parse_if_expr(&mut self) -> Result<Expr, CalcError> {
        self.advance(); // eat 'if'
        let cond = self.parse_expression()?;

        if self.current != Token::Then {
            return Err(CalcError::parse("expected 'then' after if condition"));
        }
        self.advance();
        let then_branch = self.parse_expression()?;

        if self.current != Token::Else {
            return Err(CalcError::parse("expected 'else' after then branch"));
        }
        self.advance();
        let else_branch = self.parse_expression()?;

        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    /// `for` IDENT `=` start `,` end [`,` step] `in` body
    fn parse_for_expr(&mut self) -> Result<Expr, CalcError> {
        self.advance(); // eat 'for'
        let var = match &self.current {
            Token::Identifier(name) => name.clone(),
            other => {
                return Err(CalcError::parse(format!(
                    "expected loop variable after 'for', got {}",
                    other
                )))
            }
        };
        self.advance();

        if self.current != Token::Assignment {
            return Err(CalcError::parse("expected '=' after for loop variable"));
        }
        self.advance();
        let start = self.parse_expression()?;

        if self.current != Token::Comma {
            return Err(CalcError::parse("expected ',' after for start value"));
        }
        self.advance();
        let end = self.parse_expression()?;

        let step = if self.current == Token::Comma {
            self.advance();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        if self.current != Token::In {
            return Err(CalcError::parse("expected 'in' after for loop header"));
        }
        self.advance();
        let body = self.parse_expression()?;

        Ok(Expr::For {
            var,
            start: Box::new(start),
            end: Box::new(end),
            step,
            body: Box::new(body),
        })
    }
}
