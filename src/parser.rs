use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind};
use crate::value::Number;

/// Deepest statement/expression nesting accepted before giving up.
pub const MAX_NESTING: usize = 64;

/// Parse a token stream into a [`Program`]. Every token must be consumed.
pub fn parse(tokens: &[Token]) -> Result<Program> {
    let mut parser = Parser::new(tokens);
    let mut program = Program::default();
    while !parser.at_end() {
        program.body.push(parser.parse_any()?);
    }
    Ok(program)
}

pub struct Parser<'t> {
    tokens: &'t [Token],
    current: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek_kind(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.current + n).map(|t| t.kind)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind(0) == Some(kind)
    }

    /// `{%` followed by one of `keywords`.
    fn at_tag(&self, keywords: &[TokenKind]) -> bool {
        self.check(TokenKind::OpenStatement)
            && self.peek_kind(1).is_some_and(|k| keywords.contains(&k))
    }

    fn advance(&mut self) -> Result<&'t Token> {
        let tokens: &'t [Token] = self.tokens;
        let token = tokens
            .get(self.current)
            .ok_or_else(|| Error::parser("Unexpected end of template"))?;
        self.current += 1;
        Ok(token)
    }

    fn expect(&mut self, kind: TokenKind, error: &str) -> Result<&'t Token> {
        let tokens: &'t [Token] = self.tokens;
        match tokens.get(self.current) {
            Some(token) if token.kind == kind => {
                self.current += 1;
                Ok(token)
            }
            Some(token) => Err(Error::parser(format!(
                "{}. {} != {}.",
                error, token.kind, kind
            ))),
            None => Err(Error::parser(format!("{}. Got end of template.", error))),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(Error::parser(format!(
                "Template nesting exceeds {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // ── Statements ──

    fn parse_any(&mut self) -> Result<Node> {
        self.nested(|p| match p.peek_kind(0) {
            Some(TokenKind::Text) => Ok(Node::Text(p.advance()?.value.clone())),
            Some(TokenKind::OpenStatement) => p.parse_statement(),
            Some(TokenKind::OpenExpression) => {
                p.advance()?;
                let expr = p.parse_expression()?;
                p.expect(TokenKind::CloseExpression, "Expected closing expression token")?;
                Ok(Node::Expr(expr))
            }
            Some(kind) => Err(Error::syntax(format!("Unexpected token type: {}", kind))),
            None => Err(Error::parser("Unexpected end of template")),
        })
    }

    /// Statements up to (not including) `{% <terminator>`.
    fn parse_block_until(&mut self, terminators: &[TokenKind]) -> Result<Vec<Node>> {
        let mut body = Vec::new();
        while !self.at_tag(terminators) {
            if self.at_end() {
                let names: Vec<String> = terminators.iter().map(|k| k.to_string()).collect();
                return Err(Error::parser(format!(
                    "Unexpected end of template, expected one of: {}",
                    names.join(", ")
                )));
            }
            body.push(self.parse_any()?);
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Node> {
        self.expect(TokenKind::OpenStatement, "Expected opening statement token")?;

        let node = match self.peek_kind(0) {
            Some(TokenKind::Set) => {
                self.advance()?;
                let node = self.parse_set()?;
                self.expect(TokenKind::CloseStatement, "Expected closing statement token")?;
                node
            }
            Some(TokenKind::If) => {
                self.advance()?;
                let node = self.parse_if()?;
                self.expect(TokenKind::OpenStatement, "Expected {% token")?;
                self.expect(TokenKind::EndIf, "Expected endif token")?;
                self.expect(TokenKind::CloseStatement, "Expected %} token")?;
                node
            }
            Some(TokenKind::For) => {
                self.advance()?;
                let node = self.parse_for()?;
                self.expect(TokenKind::OpenStatement, "Expected {% token")?;
                self.expect(TokenKind::EndFor, "Expected endfor token")?;
                self.expect(TokenKind::CloseStatement, "Expected %} token")?;
                node
            }
            Some(kind) => return Err(Error::syntax(format!("Unknown statement type: {}", kind))),
            None => return Err(Error::parser("Unexpected end of template inside {% %}")),
        };
        Ok(node)
    }

    fn parse_set(&mut self) -> Result<Node> {
        let left = self.parse_expression()?;
        if !self.check(TokenKind::Equals) {
            return Ok(Node::Expr(left));
        }
        self.advance()?;
        let value = self.parse_expression()?;
        if self.check(TokenKind::Equals) {
            return Err(Error::syntax("Chained assignment is not supported"));
        }
        Ok(Node::Set {
            assignee: left,
            value,
        })
    }

    /// Parses `test %} body [elif ... | else ...]`, leaving `{% endif %}`
    /// for the caller. An `elif` recurses and becomes the sole alternate,
    /// so a chain of them shares the single closing `endif`.
    fn parse_if(&mut self) -> Result<Node> {
        let test = self.parse_expression()?;
        self.expect(TokenKind::CloseStatement, "Expected closing statement token")?;

        let body =
            self.parse_block_until(&[TokenKind::ElseIf, TokenKind::Else, TokenKind::EndIf])?;
        let mut alternate = Vec::new();

        if self.at_tag(&[TokenKind::ElseIf]) {
            self.current += 2;
            alternate.push(self.nested(|p| p.parse_if())?);
        } else if self.at_tag(&[TokenKind::Else]) {
            self.current += 2;
            self.expect(TokenKind::CloseStatement, "Expected closing statement token")?;
            alternate = self.parse_block_until(&[TokenKind::EndIf])?;
        }

        Ok(Node::If {
            test,
            body,
            alternate,
        })
    }

    fn parse_for(&mut self) -> Result<Node> {
        let target = match self.parse_expression_sequence(true)? {
            Expr::Identifier(name) => LoopTarget::Identifier(name),
            Expr::TupleLit(items) => LoopTarget::Tuple(
                items
                    .into_iter()
                    .map(|item| match item {
                        Expr::Identifier(name) => Ok(name),
                        other => Err(Error::syntax(format!(
                            "Cannot unpack into non-identifier type: {}",
                            other.kind_name()
                        ))),
                    })
                    .collect::<Result<_>>()?,
            ),
            other => {
                return Err(Error::syntax(format!(
                    "Expected identifier/tuple for the loop variable, got {} instead",
                    other.kind_name()
                )))
            }
        };

        self.expect(TokenKind::In, "Expected `in` keyword following loop variable")?;
        let iterable = self.parse_expression()?;
        self.expect(TokenKind::CloseStatement, "Expected closing statement token")?;

        let body = self.parse_block_until(&[TokenKind::EndFor])?;

        Ok(Node::For {
            target,
            iterable,
            body,
        })
    }

    // ── Expressions, lowest precedence first ──

    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.nested(|p| p.parse_ternary())
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let then = self.parse_or()?;
        if !self.check(TokenKind::If) {
            return Ok(then);
        }
        self.advance()?;
        let test = self.parse_or()?;
        self.expect(TokenKind::Else, "Expected else token")?;
        let otherwise = self.parse_or()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.check(TokenKind::Or) {
            self.advance()?;
            let rhs = self.parse_and()?;
            lhs = Self::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.check(TokenKind::And) {
            self.advance()?;
            let rhs = self.parse_not()?;
            lhs = Self::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if !self.check(TokenKind::Not) {
            return self.parse_comparison();
        }
        self.advance()?;
        let argument = self.nested(|p| p.parse_not())?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            argument: Box::new(argument),
        })
    }

    /// Token at the cursor as a binary operator, if it is one of `kinds`.
    fn operator(&self, kinds: &[TokenKind]) -> Result<Option<BinaryOp>> {
        match self.tokens.get(self.current) {
            Some(token) if kinds.contains(&token.kind) => BinaryOp::from_symbol(&token.value)
                .map(Some)
                .ok_or_else(|| Error::syntax(format!("Unknown operator: {}", token.value))),
            _ => Ok(None),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        const KINDS: &[TokenKind] = &[
            TokenKind::ComparisonBinaryOperator,
            TokenKind::In,
            TokenKind::NotIn,
        ];
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.operator(KINDS)? {
            self.advance()?;
            let rhs = self.parse_additive()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op) = self.operator(&[TokenKind::AdditiveBinaryOperator])? {
            self.advance()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.operator(&[TokenKind::MultiplicativeBinaryOperator])? {
            self.advance()?;
            let rhs = self.parse_unary()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if !self.check(TokenKind::UnaryOperator) {
            return self.parse_test();
        }
        let op = match self.advance()?.value.as_str() {
            "-" => UnaryOp::Minus,
            "+" => UnaryOp::Plus,
            other => return Err(Error::syntax(format!("Unknown unary operator: {}", other))),
        };
        let argument = self.nested(|p| p.parse_unary())?;
        Ok(Expr::Unary {
            op,
            argument: Box::new(argument),
        })
    }

    fn parse_test(&mut self) -> Result<Expr> {
        let mut operand = self.parse_filter()?;

        while self.check(TokenKind::Is) {
            self.advance()?;
            let negate = self.check(TokenKind::Not);
            if negate {
                self.advance()?;
            }
            let name = match self.parse_primary()? {
                Expr::Identifier(name) => name,
                Expr::BoolLit(b) => b.to_string(),
                Expr::NullLit => "none".to_string(),
                _ => return Err(Error::syntax("Expected identifier for the test")),
            };
            let args = if self.check(TokenKind::OpenParen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            operand = Expr::Test {
                operand: Box::new(operand),
                negate,
                name,
                args,
            };
        }

        Ok(operand)
    }

    fn parse_filter(&mut self) -> Result<Expr> {
        let mut operand = self.parse_call_member()?;

        while self.check(TokenKind::Pipe) {
            self.advance()?;
            let name = match self.parse_primary()? {
                Expr::Identifier(name) => name,
                other => {
                    return Err(Error::syntax(format!(
                        "Expected identifier for the filter, got {}",
                        other.kind_name()
                    )))
                }
            };
            let filter = if self.check(TokenKind::OpenParen) {
                Filter::Call {
                    name,
                    args: self.parse_args()?,
                }
            } else {
                Filter::Name(name)
            };
            operand = Expr::Filter {
                operand: Box::new(operand),
                filter,
            };
        }

        Ok(operand)
    }

    /// `.name`, `[index]`, `[a:b:c]` and `(args)` suffixes, in any order.
    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek_kind(0) {
                Some(TokenKind::Dot) => {
                    self.advance()?;
                    let property = self.parse_primary()?;
                    if !matches!(property, Expr::Identifier(_)) {
                        return Err(Error::syntax("Expected identifier following dot operator"));
                    }
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: false,
                    };
                }
                Some(TokenKind::OpenSquareBracket) => {
                    self.advance()?;
                    let property = self.parse_subscript()?;
                    self.expect(TokenKind::CloseSquareBracket, "Expected closing square bracket")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: true,
                    };
                }
                Some(TokenKind::OpenParen) => {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Contents of `[...]`: a plain index, or up to three slice parts.
    fn parse_subscript(&mut self) -> Result<Expr> {
        let mut parts: Vec<Option<Expr>> = Vec::new();
        let mut is_slice = false;

        while !self.check(TokenKind::CloseSquareBracket) {
            if self.at_end() {
                return Err(Error::parser("Expected closing square bracket. Got end of template."));
            }
            if self.check(TokenKind::Colon) {
                parts.push(None);
                self.advance()?;
                is_slice = true;
            } else {
                parts.push(Some(self.parse_expression()?));
                if self.check(TokenKind::Colon) {
                    self.advance()?;
                    is_slice = true;
                }
            }
        }

        if parts.is_empty() {
            return Err(Error::syntax(
                "Expected at least one argument for member/slice expression",
            ));
        }

        if !is_slice {
            if parts.len() > 1 {
                return Err(Error::syntax("Expected a single index expression"));
            }
            return parts
                .pop()
                .flatten()
                .ok_or_else(|| Error::syntax("Expected index expression"));
        }

        if parts.len() > 3 {
            return Err(Error::syntax("Expected 0-3 arguments for slice expression"));
        }
        let mut parts = parts.into_iter().map(|p| p.map(Box::new));
        Ok(Expr::Slice {
            start: parts.next().flatten(),
            stop: parts.next().flatten(),
            step: parts.next().flatten(),
        })
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::OpenParen, "Expected opening parenthesis for arguments list")?;

        let mut args = Vec::new();
        while !self.check(TokenKind::CloseParen) {
            let mut argument = self.parse_expression()?;

            if self.check(TokenKind::Equals) {
                self.advance()?;
                let Expr::Identifier(key) = argument else {
                    return Err(Error::syntax("Expected identifier for keyword argument"));
                };
                argument = Expr::KeywordArgument {
                    key,
                    value: Box::new(self.parse_expression()?),
                };
            }
            args.push(argument);

            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }

        self.expect(TokenKind::CloseParen, "Expected closing parenthesis for arguments list")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance()?;
        let expr = match token.kind {
            TokenKind::NumericLiteral => Expr::NumericLit(parse_number(&token.value)?),
            TokenKind::StringLiteral => Expr::StringLit(token.value.clone()),
            TokenKind::BooleanLiteral => Expr::BoolLit(token.value == "true"),
            TokenKind::NullLiteral => Expr::NullLit,
            TokenKind::Identifier => Expr::Identifier(token.value.clone()),
            TokenKind::OpenParen => {
                let expr = self.parse_expression_sequence(false)?;
                self.expect(TokenKind::CloseParen, "Expected closing parenthesis")?;
                expr
            }
            TokenKind::OpenSquareBracket => {
                let mut values = Vec::new();
                while !self.check(TokenKind::CloseSquareBracket) {
                    values.push(self.parse_expression()?);
                    if !self.check(TokenKind::Comma) {
                        break;
                    }
                    self.advance()?;
                }
                self.expect(TokenKind::CloseSquareBracket, "Expected closing square bracket")?;
                Expr::ArrayLit(values)
            }
            TokenKind::OpenCurlyBracket => {
                let mut pairs = Vec::new();
                while !self.check(TokenKind::CloseCurlyBracket) {
                    let key = self.parse_expression()?;
                    self.expect(
                        TokenKind::Colon,
                        "Expected colon between key and value in object literal",
                    )?;
                    let value = self.parse_expression()?;
                    pairs.push((key, value));
                    if !self.check(TokenKind::Comma) {
                        break;
                    }
                    self.advance()?;
                }
                self.expect(TokenKind::CloseCurlyBracket, "Expected closing curly bracket")?;
                Expr::ObjectLit(pairs)
            }
            kind => return Err(Error::syntax(format!("Unexpected token: {}", kind))),
        };
        Ok(expr)
    }

    /// One expression, or a comma separated tuple of them. `primary` limits
    /// the items to primaries, which is what a `for` target needs so that
    /// `in` is not swallowed as an operator.
    fn parse_expression_sequence(&mut self, primary: bool) -> Result<Expr> {
        let next = |p: &mut Self| {
            if primary {
                p.parse_primary()
            } else {
                p.parse_expression()
            }
        };

        let first = next(self)?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.check(TokenKind::Comma) {
            self.advance()?;
            items.push(next(self)?);
        }
        Ok(Expr::TupleLit(items))
    }
}

fn parse_number(text: &str) -> Result<Number> {
    let number = if text.contains('.') {
        text.parse::<f64>().ok().map(Number::Float)
    } else {
        text.parse::<i64>().ok().map(Number::Int)
    };
    number.ok_or_else(|| Error::syntax(format!("Invalid numeric literal: {}", text)))
}
