//! Recursive-descent parser producing [`Program`]s.

use std::sync::Arc;

use crate::ast::{
    ArrowBody, AssignOp, BinaryOp, DeclKind, Expr, Literal, LogicalOp, Program, Property, Stmt,
    TemplatePart, UnaryOp,
};
use crate::error::{ExprError, ExprResult};
use crate::lexer::{tokenize, RawTemplatePart, Token, TokenKind};

const MAX_NESTING: usize = 128;

/// Parse a single expression. A trailing `;` is allowed.
pub fn parse_expression(source: &str) -> ExprResult<Expr> {
    let mut parser = Parser::new(tokenize(source)?);
    let expr = parser.parse_expr()?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse a statement list.
pub fn parse_program(source: &str) -> ExprResult<Program> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.parse_statement()?);
    }
    Ok(Program { body })
}

enum BinaryKind {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_info(punct: &str) -> Option<(u8, BinaryKind)> {
    let info = match punct {
        "??" => (1, BinaryKind::Logical(LogicalOp::Nullish)),
        "||" => (2, BinaryKind::Logical(LogicalOp::Or)),
        "&&" => (3, BinaryKind::Logical(LogicalOp::And)),
        "==" => (4, BinaryKind::Binary(BinaryOp::Eq)),
        "!=" => (4, BinaryKind::Binary(BinaryOp::NotEq)),
        "===" => (4, BinaryKind::Binary(BinaryOp::StrictEq)),
        "!==" => (4, BinaryKind::Binary(BinaryOp::StrictNotEq)),
        "<" => (5, BinaryKind::Binary(BinaryOp::Lt)),
        ">" => (5, BinaryKind::Binary(BinaryOp::Gt)),
        "<=" => (5, BinaryKind::Binary(BinaryOp::Le)),
        ">=" => (5, BinaryKind::Binary(BinaryOp::Ge)),
        "+" => (6, BinaryKind::Binary(BinaryOp::Add)),
        "-" => (6, BinaryKind::Binary(BinaryOp::Sub)),
        "*" => (7, BinaryKind::Binary(BinaryOp::Mul)),
        "/" => (7, BinaryKind::Binary(BinaryOp::Div)),
        "%" => (7, BinaryKind::Binary(BinaryOp::Rem)),
        _ => return None,
    };
    Some(info)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), TokenKind::Punct(q) if *q == p)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(name) if name == k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ExprResult<T> {
        Err(ExprError::Parse {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn expect_punct(&mut self, p: &str) -> ExprResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            self.error(format!("expected '{p}', found {}", describe(self.peek())))
        }
    }

    fn expect_ident(&mut self) -> ExprResult<String> {
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            other => self.error(format!("expected identifier, found {}", describe(&other))),
        }
    }

    fn expect_eof(&self) -> ExprResult<()> {
        if self.at_eof() {
            Ok(())
        } else {
            self.error(format!("unexpected {}", describe(self.peek())))
        }
    }

    // --- Statements ---

    fn parse_statement(&mut self) -> ExprResult<Stmt> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }

        if self.eat_punct("{") {
            let body = self.parse_block_body()?;
            return Ok(Stmt::Block(body));
        }

        let decl = if self.is_keyword("let") {
            Some(DeclKind::Let)
        } else if self.is_keyword("const") {
            Some(DeclKind::Const)
        } else if self.is_keyword("var") {
            Some(DeclKind::Var)
        } else {
            None
        };
        if let Some(kind) = decl {
            self.advance();
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.eat_punct(";");
            return Ok(Stmt::Declare { kind, name, init });
        }

        if self.is_keyword("if") {
            self.advance();
            self.expect_punct("(")?;
            let test = self.parse_expr()?;
            self.expect_punct(")")?;
            let consequent = Box::new(self.parse_statement()?);
            let alternate = if self.is_keyword("else") {
                self.advance();
                Some(Box::new(self.parse_statement()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                test,
                consequent,
                alternate,
            });
        }

        if self.is_keyword("return") {
            self.advance();
            if self.eat_punct(";") || self.is_punct("}") || self.at_eof() {
                return Ok(Stmt::Return(None));
            }
            let value = self.parse_expr()?;
            self.eat_punct(";");
            return Ok(Stmt::Return(Some(value)));
        }

        let expr = self.parse_expr()?;
        self.eat_punct(";");
        Ok(Stmt::Expr(expr))
    }

    /// Statements up to and including the closing `}`.
    fn parse_block_body(&mut self) -> ExprResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(body);
            }
            if self.at_eof() {
                return self.error("unterminated block");
            }
            body.push(self.parse_statement()?);
        }
    }

    // --- Expressions ---

    fn parse_expr(&mut self) -> ExprResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return self.error("expression nested too deeply");
        }
        let result = self.parse_assignment();
        self.depth -= 1;
        result
    }

    fn parse_assignment(&mut self) -> ExprResult<Expr> {
        if self.at_arrow() {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;

        let op = if self.is_punct("=") {
            AssignOp::Assign
        } else if self.is_punct("+=") {
            AssignOp::Add
        } else if self.is_punct("-=") {
            AssignOp::Sub
        } else {
            return Ok(target);
        };

        if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
            return self.error("invalid assignment target");
        }
        self.advance();
        let value = self.parse_expr()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Whether the upcoming tokens start an arrow function.
    fn at_arrow(&self) -> bool {
        match self.peek() {
            TokenKind::Ident(_) => matches!(self.peek_at(1), TokenKind::Punct("=>")),
            TokenKind::Punct("(") => {
                let mut n = 1;
                loop {
                    match self.peek_at(n) {
                        TokenKind::Punct(")") => {
                            return matches!(self.peek_at(n + 1), TokenKind::Punct("=>"))
                        }
                        TokenKind::Ident(_) => {
                            n += 1;
                            match self.peek_at(n) {
                                TokenKind::Punct(",") => n += 1,
                                TokenKind::Punct(")") => {}
                                _ => return false,
                            }
                        }
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> ExprResult<Expr> {
        let mut params = Vec::new();
        if self.eat_punct("(") {
            while !self.eat_punct(")") {
                params.push(self.expect_ident()?);
                self.eat_punct(",");
            }
        } else {
            params.push(self.expect_ident()?);
        }
        self.expect_punct("=>")?;

        let body = if self.eat_punct("{") {
            ArrowBody::Block(Arc::new(self.parse_block_body()?))
        } else {
            ArrowBody::Expr(Arc::new(self.parse_expr()?))
        };
        Ok(Expr::Arrow { params, body })
    }

    fn parse_conditional(&mut self) -> ExprResult<Expr> {
        let test = self.parse_binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_expr()?;
        self.expect_punct(":")?;
        let alternate = self.parse_expr()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> ExprResult<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let TokenKind::Punct(p) = self.peek() else {
                break;
            };
            let Some((prec, kind)) = binary_info(p) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            left = match kind {
                BinaryKind::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                BinaryKind::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        let op = match self.peek() {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Ident(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.depth += 1;
            if self.depth > MAX_NESTING {
                return self.error("expression nested too deeply");
            }
            let operand = self.parse_unary();
            self.depth -= 1;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand?),
            });
        }

        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.advance();
            let target = self.parse_call_member()?;
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        let expr = self.parse_call_member()?;
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.advance();
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> ExprResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.eat_punct(".") {
                let name = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Named(name),
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let key = self.parse_expr()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Property::Computed(Box::new(key)),
                        optional: true,
                    };
                } else {
                    let name = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Property::Named(name),
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let key = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Computed(Box::new(key)),
                    optional: false,
                };
            } else if self.eat_punct("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, consuming the closing `)`.
    fn parse_arguments(&mut self) -> ExprResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            if self.at_eof() {
                return self.error("unterminated argument list");
            }
            args.push(self.parse_expr()?);
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let offset = self.offset();
        match self.advance() {
            TokenKind::Number(n) => Ok(Expr::Literal(Literal::Number(n))),
            TokenKind::String(s) => Ok(Expr::Literal(Literal::String(s))),
            TokenKind::Template(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        RawTemplatePart::Str(s) => out.push(TemplatePart::Str(s)),
                        RawTemplatePart::Expr(source, start) => {
                            let expr = parse_expression(&source).map_err(|e| match e {
                                ExprError::Parse { offset, message } => ExprError::Parse {
                                    offset: start + offset,
                                    message,
                                },
                                other => other,
                            })?;
                            out.push(TemplatePart::Expr(expr));
                        }
                    }
                }
                Ok(Expr::Template(out))
            }
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Literal::Bool(true)),
                "false" => Expr::Literal(Literal::Bool(false)),
                "null" => Expr::Literal(Literal::Null),
                "undefined" => Expr::Literal(Literal::Undefined),
                _ => Expr::Ident(name),
            }),
            TokenKind::Punct("(") => {
                let expr = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    if self.at_eof() {
                        return self.error("unterminated array literal");
                    }
                    items.push(self.parse_expr()?);
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => {
                let mut entries = Vec::new();
                while !self.eat_punct("}") {
                    let key = match self.advance() {
                        TokenKind::Ident(name) => name,
                        TokenKind::String(s) => s,
                        TokenKind::Number(n) => crate::value::format_number(n),
                        other => {
                            return self.error(format!(
                                "expected property name, found {}",
                                describe(&other)
                            ))
                        }
                    };
                    let value = if self.eat_punct(":") {
                        self.parse_expr()?
                    } else {
                        Expr::Ident(key.clone())
                    };
                    entries.push((key, value));
                    if !self.is_punct("}") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(entries))
            }
            other => Err(ExprError::Parse {
                offset,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::String(_) => "string".to_string(),
        TokenKind::Template(_) => "template literal".to_string(),
        TokenKind::Ident(name) => format!("'{name}'"),
        TokenKind::Punct(p) => format!("'{p}'"),
        TokenKind::Eof => "end of input".to_string(),
    }
}
