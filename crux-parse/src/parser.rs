#![forbid(unsafe_code)]

use std::mem;

use crux_ast::{
    span_between, BinOp, BoolOp, CmpOp, Constant, Expr, ExprKind, FunctionDef, Ident, Lambda,
    Module, NodeId, Param, Slice, Span, UnaryOp,
};
use crux_lex::{Token, TokenKind};

use crate::error::ParseError;

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, idx: 0 }
    }

    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        let mut functions = Vec::new();
        while self.peek_kind().is_some() {
            functions.push(self.parse_function_def()?);
        }
        Ok(Module { functions })
    }

    /// `@decorator* def name(params) [-> returns]: return body`
    pub fn parse_function_def(&mut self) -> Result<FunctionDef, ParseError> {
        let start = self.peek_span().unwrap_or_else(|| span_between(0, 0));

        let mut decorators = Vec::new();
        while self.at(TokenKind::At) {
            self.next();
            decorators.push(self.parse_expr()?);
        }

        self.expect(TokenKind::KwDef)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            let pname = self.expect_ident()?;
            let annotation = if self.at(TokenKind::Colon) {
                self.next();
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param::new(pname, annotation));
            if !self.at(TokenKind::Comma) {
                break;
            }
            self.next();
        }
        self.expect(TokenKind::RParen)?;

        let returns = if self.at(TokenKind::Arrow) {
            self.next();
            Some(self.parse_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::KwReturn)?;
        let body = self.parse_expr()?;

        Ok(FunctionDef {
            id: NodeId::fresh(),
            span: join(start, body.span),
            name,
            params,
            returns,
            decorators,
            body,
        })
    }

    pub fn parse_function_eof(&mut self) -> Result<FunctionDef, ParseError> {
        let f = self.parse_function_def()?;
        if let Some(span) = self.peek_span() {
            return Err(ParseError {
                message: "expected end of input".to_string(),
                span,
            });
        }
        Ok(f)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::KwLambda) {
            return self.parse_lambda();
        }
        self.parse_or_expr()
    }

    pub fn parse_expr_eof(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        if let Some(span) = self.peek_span() {
            return Err(ParseError {
                message: "expected end of input".to_string(),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let kw = self.expect(TokenKind::KwLambda)?;
        let mut params = Vec::new();
        while !self.at(TokenKind::Colon) {
            params.push(Param::new(self.expect_ident()?, None));
            if !self.at(TokenKind::Comma) {
                break;
            }
            self.next();
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_expr()?;
        Ok(Expr {
            span: join(kw.span, body.span),
            kind: ExprKind::Lambda(Lambda {
                id: NodeId::fresh(),
                params,
                body: Box::new(body),
            }),
        })
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_bool_chain(TokenKind::KwOr, BoolOp::Or, Self::parse_and_expr)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_bool_chain(TokenKind::KwAnd, BoolOp::And, Self::parse_not_expr)
    }

    // `a or b or c` is one node with three values.
    fn parse_bool_chain(
        &mut self,
        kw: TokenKind,
        op: BoolOp,
        operand: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let first = operand(self)?;
        if !self.at(kw.clone()) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.at(kw.clone()) {
            self.next();
            values.push(operand(self)?);
        }
        let span = join(values[0].span, values[values.len() - 1].span);
        Ok(Expr {
            span,
            kind: ExprKind::BoolOp { op, values },
        })
    }

    fn parse_not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::KwNot) {
            let tok = self.expect(TokenKind::KwNot)?;
            let operand = self.parse_not_expr()?;
            return Ok(Expr {
                span: join(tok.span, operand.span),
                kind: ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_cmp_expr()
    }

    fn peek_cmp_op(&self) -> Option<(CmpOp, usize)> {
        let op = match self.peek_kind()? {
            TokenKind::EqEq => (CmpOp::Eq, 1),
            TokenKind::Neq => (CmpOp::NotEq, 1),
            TokenKind::Lt => (CmpOp::Lt, 1),
            TokenKind::Le => (CmpOp::LtE, 1),
            TokenKind::Gt => (CmpOp::Gt, 1),
            TokenKind::Ge => (CmpOp::GtE, 1),
            TokenKind::KwIn => (CmpOp::In, 1),
            TokenKind::KwNot if self.peek_kind_n(1) == Some(&TokenKind::KwIn) => (CmpOp::NotIn, 2),
            TokenKind::KwIs if self.peek_kind_n(1) == Some(&TokenKind::KwNot) => (CmpOp::IsNot, 2),
            TokenKind::KwIs => (CmpOp::Is, 1),
            _ => return None,
        };
        Some(op)
    }

    // Comparisons chain: `0 <= x < n` keeps every operator.
    fn parse_cmp_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_add_expr()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some((op, width)) = self.peek_cmp_op() {
            self.idx += width;
            ops.push(op);
            comparators.push(self.parse_add_expr()?);
        }
        let Some(last) = comparators.last() else {
            return Ok(left);
        };
        let span = join(left.span, last.span);
        Ok(Expr {
            span,
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
        })
    }

    fn parse_add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_mul_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mult,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::SlashSlash) => BinOp::FloorDiv,
                Some(TokenKind::Percent) => BinOp::Mod,
                _ => break,
            };
            self.next();
            let right = self.parse_unary_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::USub,
            Some(TokenKind::Plus) => UnaryOp::UAdd,
            _ => return self.parse_power_expr(),
        };
        let tok = self.expect_any()?;
        let operand = self.parse_unary_expr()?;
        Ok(Expr {
            span: join(tok.span, operand.span),
            kind: ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
        })
    }

    fn parse_power_expr(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix_expr()?;
        if !self.at(TokenKind::StarStar) {
            return Ok(base);
        }
        self.next();
        // Right associative, and binds tighter than a unary minus on its left.
        let exponent = self.parse_unary_expr()?;
        Ok(binary(base, BinOp::Pow, exponent))
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.at(TokenKind::LParen) {
                self.next();
                let args = self.parse_elements(TokenKind::RParen)?.0;
                let close = self.expect(TokenKind::RParen)?;
                expr = Expr {
                    span: join(expr.span, close.span),
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                };
            } else if self.at(TokenKind::LBracket) {
                self.next();
                let slice = self.parse_subscript()?;
                let close = self.expect(TokenKind::RBracket)?;
                expr = Expr {
                    span: join(expr.span, close.span),
                    kind: ExprKind::Subscript {
                        value: Box::new(expr),
                        slice: Box::new(slice),
                    },
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_subscript(&mut self) -> Result<Slice, ParseError> {
        let first = self.parse_slice_item()?;
        if !self.at(TokenKind::Comma) {
            return Ok(first);
        }
        let mut dims = vec![first];
        while self.at(TokenKind::Comma) {
            self.next();
            if self.at(TokenKind::RBracket) {
                break;
            }
            dims.push(self.parse_slice_item()?);
        }
        Ok(Slice::Extended(dims))
    }

    fn parse_slice_item(&mut self) -> Result<Slice, ParseError> {
        let lower = if self.at(TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        if !self.at(TokenKind::Colon) {
            return match lower {
                Some(index) => Ok(Slice::Index(index)),
                None => Err(self.error_here("expected subscript")),
            };
        }
        self.next();
        let upper = self.parse_optional_slice_bound()?;
        let step = if self.at(TokenKind::Colon) {
            self.next();
            self.parse_optional_slice_bound()?
        } else {
            None
        };
        Ok(Slice::Range { lower, upper, step })
    }

    fn parse_optional_slice_bound(&mut self) -> Result<Option<Expr>, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Colon | TokenKind::Comma | TokenKind::RBracket) => Ok(None),
            _ => Ok(Some(self.parse_expr()?)),
        }
    }

    /// Comma separated elements up to (not including) `close`; `*e` is allowed.
    /// Also reports whether a trailing comma was present.
    fn parse_elements(&mut self, close: TokenKind) -> Result<(Vec<Expr>, bool), ParseError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        while !self.at(close.clone()) {
            trailing_comma = false;
            items.push(self.parse_element()?);
            if !self.at(TokenKind::Comma) {
                break;
            }
            self.next();
            trailing_comma = true;
        }
        Ok((items, trailing_comma))
    }

    fn parse_element(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::Star) {
            let star = self.expect(TokenKind::Star)?;
            let inner = self.parse_or_expr()?;
            return Ok(Expr {
                span: join(star.span, inner.span),
                kind: ExprKind::Starred(Box::new(inner)),
            });
        }
        self.parse_expr()
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.expect_any()?;
        let kind = match tok.kind {
            TokenKind::Ident(name) => ExprKind::Name(name),
            TokenKind::Int(n) => ExprKind::Num(n),
            TokenKind::KwTrue => ExprKind::Constant(Constant::True),
            TokenKind::KwFalse => ExprKind::Constant(Constant::False),
            TokenKind::KwNone => ExprKind::Constant(Constant::None),
            TokenKind::Ellipsis => ExprKind::Constant(Constant::Ellipsis),
            TokenKind::LParen => {
                let (mut items, trailing_comma) = self.parse_elements(TokenKind::RParen)?;
                let close = self.expect(TokenKind::RParen)?;
                let span = join(tok.span, close.span);
                let is_group = items.len() == 1
                    && !trailing_comma
                    && !matches!(items[0].kind, ExprKind::Starred(_));
                if is_group {
                    let mut inner = items.remove(0);
                    inner.span = span;
                    return Ok(inner);
                }
                return Ok(Expr {
                    span,
                    kind: ExprKind::Tuple(items),
                });
            }
            other => {
                return Err(ParseError {
                    message: format!("unexpected token {other:?}"),
                    span: tok.span,
                });
            }
        };
        Ok(Expr {
            span: tok.span,
            kind,
        })
    }

    fn error_here(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            span: self.peek_span().unwrap_or_else(|| span_between(0, 0)),
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(Ident {
                span: tok.span,
                node: name,
            }),
            _ => Err(ParseError {
                message: "expected identifier".to_string(),
                span: tok.span,
            }),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.expect_any()?;
        if mem::discriminant(&tok.kind) == mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError {
                message: format!("expected {expected:?}"),
                span: tok.span,
            })
        }
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        self.next().ok_or_else(|| ParseError {
            message: "unexpected end of input".to_string(),
            span: self.end_span(),
        })
    }

    fn end_span(&self) -> Span {
        match self.tokens.last() {
            Some(t) => {
                let end = usize::from(t.span.offset()) + t.span.len();
                span_between(end, end)
            }
            None => span_between(0, 0),
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx)?.clone();
        self.idx += 1;
        Some(tok)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Option<Span> {
        self.tokens.get(self.idx).map(|t| t.span)
    }
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr {
        span: join(left.span, right.span),
        kind: ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn join(a: Span, b: Span) -> Span {
    let a0: usize = a.offset();
    let b0: usize = b.offset();
    let b1 = b0 + b.len();
    if b0 >= a0 {
        span_between(a0, b1.max(a0 + a.len()))
    } else {
        let a1 = a0 + a.len();
        span_between(b0, a1)
    }
}
