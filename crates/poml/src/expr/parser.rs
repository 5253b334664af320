//! Precedence-climbing parser for the expression language.

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Token, TokenKind};
use super::ExprError;
use crate::value::Value;

/// Nesting allowed in one expression: brackets, operators and member
/// chains all count.
const MAX_DEPTH: usize = 128;

/// Parse a complete expression. Trailing input is an error.
pub fn parse_expression(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_conditional()?;
    match parser.peek() {
        TokenKind::Eof => Ok(expr),
        _ => Err(parser.unexpected()),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn parse_conditional(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::parse_ternary)
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        let mut links = 0;
        self.link(&mut links)?;
        let result = parse(self);
        self.depth -= links;
        result
    }

    /// Count one more level of nesting, failing past `MAX_DEPTH`.
    fn link(&mut self, links: &mut usize) -> Result<(), ExprError> {
        if self.depth >= MAX_DEPTH {
            let offset = self.tokens[self.pos.min(self.tokens.len() - 1)].start;
            return Err(ExprError::syntax("expression nests too deeply", offset));
        }
        self.depth += 1;
        *links += 1;
        Ok(())
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExprError> {
        let test = self.parse_nullish()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.parse_conditional()?;
        self.expect(":")?;
        let alternate = self.parse_conditional()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_nullish(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_or()?;
        let mut links = 0;
        while self.eat("??") {
            self.link(&mut links)?;
            let right = self.parse_or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat("||") {
            self.link(&mut links)?;
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_equality()?;
        let mut links = 0;
        while self.eat("&&") {
            self.link(&mut links)?;
            let right = self.parse_equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_relational()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Punct("==") => BinaryOp::Eq,
                TokenKind::Punct("!=") => BinaryOp::NotEq,
                TokenKind::Punct("===") => BinaryOp::StrictEq,
                TokenKind::Punct("!==") => BinaryOp::StrictNotEq,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_additive()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Punct("<") => BinaryOp::Lt,
                TokenKind::Punct(">") => BinaryOp::Gt,
                TokenKind::Punct("<=") => BinaryOp::LtEq,
                TokenKind::Punct(">=") => BinaryOp::GtEq,
                TokenKind::Ident(word) if word == "in" => BinaryOp::In,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Punct("+") => BinaryOp::Add,
                TokenKind::Punct("-") => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Punct("*") => BinaryOp::Mul,
                TokenKind::Punct("/") => BinaryOp::Div,
                TokenKind::Punct("%") => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            TokenKind::Punct("!") => UnaryOp::Not,
            TokenKind::Punct("-") => UnaryOp::Neg,
            TokenKind::Punct("+") => UnaryOp::Plus,
            TokenKind::Ident(word) if word == "typeof" => UnaryOp::TypeOf,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if matches!(self.peek(), TokenKind::Punct("." | "?." | "[" | "(")) {
                self.link(&mut links)?;
            }
            if self.eat(".") {
                let property = self.expect_property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat("?.") {
                if self.eat("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat("[") {
                    let index = self.parse_conditional()?;
                    self.expect("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.expect_property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat("[") {
                let index = self.parse_conditional()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.eat("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                self.depth -= links;
                return Ok(expr);
            }
        }
    }

    /// Arguments after the opening `(`, through the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        while !self.eat(")") {
            args.push(self.parse_conditional()?);
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            TokenKind::Punct("(") => {
                let expr = self.parse_conditional()?;
                self.expect(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    items.push(self.parse_conditional()?);
                    if !self.eat(",") {
                        self.expect("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => self.parse_object(),
            TokenKind::Eof => Err(ExprError::syntax("unexpected end of expression", token.start)),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expr, ExprError> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let token = self.advance();
            let key = match token.kind {
                TokenKind::Ident(name) => name,
                TokenKind::Str(s) => s,
                TokenKind::Number(n) => crate::value::format_number(n),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            };
            let value = if self.eat(":") {
                self.parse_conditional()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }

    fn expect_property_name(&mut self) -> Result<String, ExprError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), TokenKind::Punct(p) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat(punct) {
            Ok(())
        } else {
            let offset = self.tokens[self.pos.min(self.tokens.len() - 1)].start;
            Err(ExprError::syntax(format!("expected '{punct}'"), offset))
        }
    }

    fn unexpected(&self) -> ExprError {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        let text = match &token.kind {
            TokenKind::Number(n) => crate::value::format_number(*n),
            TokenKind::Str(s) => format!("{s:?}"),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Punct(p) => (*p).to_string(),
            TokenKind::Eof => return ExprError::syntax("unexpected end of expression", token.start),
        };
        ExprError::syntax(format!("unexpected token '{text}'"), token.start)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_member_call_chain() {
        let expr = parse_expression("user.name.toUpperCase()").unwrap();
        assert!(matches!(expr, Expr::Call { optional: false, .. }));
        assert_eq!(expr.free_identifiers(), vec!["user"]);
    }

    #[test]
    fn test_object_literal_with_shorthand() {
        let expr = parse_expression("{a: 1, 'b c': [1, 2], d}").unwrap();
        match expr {
            Expr::Object(entries) => {
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["a", "b c", "d"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let expr = parse_expression("a ? b : c ? d : e").unwrap();
        match expr {
            Expr::Conditional { alternate, .. } => {
                assert!(matches!(*alternate, Expr::Conditional { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_trailing_input_is_error() {
        assert!(matches!(
            parse_expression("a b"),
            Err(ExprError::Syntax { offset: 2, .. })
        ));
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let parens = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        match parse_expression(&parens) {
            Err(ExprError::Syntax { message, .. }) => assert!(message.contains("too deeply")),
            other => panic!("unexpected {other:?}"),
        }
        let negations = format!("{}x", "!".repeat(20_000));
        assert!(matches!(
            parse_expression(&negations),
            Err(ExprError::Syntax { .. })
        ));
        let chain = vec!["1"; 20_000].join(" + ");
        assert!(matches!(parse_expression(&chain), Err(ExprError::Syntax { .. })));
        let nested = format!("{}1{}", "[".repeat(20), "]".repeat(20));
        assert!(parse_expression(&nested).is_ok());
        assert!(parse_expression("a.b.c.d + 1 + 2 + 3 + 4 + 5").is_ok());
    }

    #[test]
    fn test_statements_are_rejected() {
        assert!(parse_expression("x = 1").is_err());
        assert!(parse_expression("").is_err());
    }
}
