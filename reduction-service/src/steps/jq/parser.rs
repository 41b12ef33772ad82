// Filter Parser
// Recursive descent parser producing the filter AST

use crate::steps::jq::lexer::{LexError, Lexer, Token};

use serde_json::Value;
use std::fmt;

/// Filter AST
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// `.`
    Identity,
    /// `.name`, `."name"`, `.["name"]`
    Field(String),
    /// `.[n]`, negative counts from the end
    Index(i64),
    /// `.[]`
    Iterate,
    /// `a | b`
    Pipe(Box<Ast>, Box<Ast>),
    /// `a, b`
    Comma(Box<Ast>, Box<Ast>),
    Literal(Value),
    /// `[ f ]`
    Collect(Box<Ast>),
    Compare {
        op: CompareOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    /// `f?`
    Try(Box<Ast>),
    Call { builtin: Builtin, args: Vec<Ast> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Built-in functions of the filter language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Select,
    Map,
    Flatten,
    Keys,
    Length,
    Values,
    Empty,
    Not,
    ToString,
    AsciiDowncase,
    AsciiUpcase,
    Contains,
    StartsWith,
    EndsWith,
    Split,
    Join,
    Test,
}

impl Builtin {
    /// Resolve a function by name and argument count
    pub fn lookup(name: &str, arity: usize) -> Option<Builtin> {
        let builtin = match (name, arity) {
            ("select", 1) => Builtin::Select,
            ("map", 1) => Builtin::Map,
            ("flatten", 0 | 1) => Builtin::Flatten,
            ("keys", 0) => Builtin::Keys,
            ("length", 0) => Builtin::Length,
            ("values", 0) => Builtin::Values,
            ("empty", 0) => Builtin::Empty,
            ("not", 0) => Builtin::Not,
            ("tostring", 0) => Builtin::ToString,
            ("ascii_downcase", 0) => Builtin::AsciiDowncase,
            ("ascii_upcase", 0) => Builtin::AsciiUpcase,
            ("contains", 1) => Builtin::Contains,
            ("startswith", 1) => Builtin::StartsWith,
            ("endswith", 1) => Builtin::EndsWith,
            ("split", 1) => Builtin::Split,
            ("join", 1) => Builtin::Join,
            ("test", 1) => Builtin::Test,
            _ => return None,
        };
        Some(builtin)
    }
}

/// Parser error
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFilterError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseFilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseFilterError {}

impl From<LexError> for ParseFilterError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            position: err.position,
        }
    }
}

pub struct FilterParser {
    tokens: Vec<(Token, usize)>,
    position: usize,
}

impl FilterParser {
    pub fn new(tokens: Vec<(Token, usize)>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse a filter from a string
    pub fn parse_str(input: &str) -> Result<Ast, ParseFilterError> {
        let tokens = Lexer::new(input).tokenize()?;
        Self::new(tokens).parse()
    }

    pub fn parse(&mut self) -> Result<Ast, ParseFilterError> {
        let ast = self.parse_pipe()?;

        if self.peek() != &Token::Eof {
            return Err(self.error(&format!("unexpected token: {}", self.peek())));
        }

        Ok(ast)
    }

    // Precedence (lowest to highest):
    // |  ,  or  and  comparisons  postfix
    fn parse_pipe(&mut self) -> Result<Ast, ParseFilterError> {
        let left = self.parse_comma()?;

        if self.check(&Token::Pipe) {
            self.advance();
            let right = self.parse_pipe()?;
            return Ok(Ast::Pipe(Box::new(left), Box::new(right)));
        }

        Ok(left)
    }

    fn parse_comma(&mut self) -> Result<Ast, ParseFilterError> {
        let mut left = self.parse_or()?;

        while self.check(&Token::Comma) {
            self.advance();
            let right = self.parse_or()?;
            left = Ast::Comma(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Ast, ParseFilterError> {
        let mut left = self.parse_and()?;

        while self.check_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Ast::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ParseFilterError> {
        let mut left = self.parse_comparison()?;

        while self.check_keyword("and") {
            self.advance();
            let right = self.parse_comparison()?;
            left = Ast::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Ast, ParseFilterError> {
        let left = self.parse_postfix()?;

        let op = match self.peek() {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance();

        let right = self.parse_postfix()?;
        Ok(Ast::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_postfix(&mut self) -> Result<Ast, ParseFilterError> {
        let mut ast = self.parse_primary()?;

        loop {
            match self.peek().clone() {
                Token::Field(name) => {
                    self.advance();
                    ast = pipe(ast, Ast::Field(name));
                }
                Token::Dot if matches!(self.peek_next(), Token::String(_) | Token::LBracket) => {
                    self.advance();
                    let suffix = self.parse_dot_suffix()?;
                    ast = pipe(ast, suffix);
                }
                Token::LBracket => {
                    self.advance();
                    let suffix = self.parse_bracket()?;
                    ast = pipe(ast, suffix);
                }
                Token::Question => {
                    self.advance();
                    ast = Ast::Try(Box::new(ast));
                }
                _ => break,
            }
        }

        Ok(ast)
    }

    fn parse_primary(&mut self) -> Result<Ast, ParseFilterError> {
        match self.peek().clone() {
            Token::Dot => {
                self.advance();
                match self.peek() {
                    Token::String(_) | Token::LBracket => self.parse_dot_suffix(),
                    _ => Ok(Ast::Identity),
                }
            }
            Token::Field(name) => {
                self.advance();
                Ok(Ast::Field(name))
            }
            Token::Null => {
                self.advance();
                Ok(Ast::Literal(Value::Null))
            }
            Token::True => {
                self.advance();
                Ok(Ast::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Ast::Literal(Value::Bool(false)))
            }
            Token::Number(n) => {
                self.advance();
                Ok(Ast::Literal(number_value(n)))
            }
            Token::Minus => {
                self.advance();
                match self.peek().clone() {
                    Token::Number(n) => {
                        self.advance();
                        Ok(Ast::Literal(number_value(-n)))
                    }
                    _ => Err(self.error("expected a number after '-'")),
                }
            }
            Token::String(s) => {
                self.advance();
                Ok(Ast::Literal(Value::String(s)))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_pipe()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                if self.check(&Token::RBracket) {
                    self.advance();
                    return Ok(Ast::Literal(Value::Array(Vec::new())));
                }
                let inner = self.parse_pipe()?;
                self.expect(&Token::RBracket)?;
                Ok(Ast::Collect(Box::new(inner)))
            }
            Token::Identifier(name) => {
                self.advance();
                self.parse_call(&name)
            }
            token => Err(self.error(&format!("unexpected token: {}", token))),
        }
    }

    /// After a `.`: either `"name"` or `[...]`
    fn parse_dot_suffix(&mut self) -> Result<Ast, ParseFilterError> {
        match self.peek().clone() {
            Token::String(name) => {
                self.advance();
                Ok(Ast::Field(name))
            }
            Token::LBracket => {
                self.advance();
                self.parse_bracket()
            }
            token => Err(self.error(&format!("unexpected token after '.': {}", token))),
        }
    }

    /// After a `[`: `]`, a (possibly negative) integer, or a string key
    fn parse_bracket(&mut self) -> Result<Ast, ParseFilterError> {
        let ast = match self.peek().clone() {
            Token::RBracket => {
                self.advance();
                return Ok(Ast::Iterate);
            }
            Token::String(key) => {
                self.advance();
                Ast::Field(key)
            }
            Token::Number(n) => {
                self.advance();
                Ast::Index(self.integer(n)?)
            }
            Token::Minus => {
                self.advance();
                match self.peek().clone() {
                    Token::Number(n) => {
                        self.advance();
                        Ast::Index(-self.integer(n)?)
                    }
                    _ => return Err(self.error("expected a number after '-'")),
                }
            }
            token => {
                return Err(self.error(&format!(
                    "unsupported index: {} (expected an integer or a string)",
                    token
                )))
            }
        };

        self.expect(&Token::RBracket)?;
        Ok(ast)
    }

    fn parse_call(&mut self, name: &str) -> Result<Ast, ParseFilterError> {
        let mut args = Vec::new();

        if self.check(&Token::LParen) {
            self.advance();
            loop {
                args.push(self.parse_pipe()?);
                if self.check(&Token::Semicolon) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }

        let builtin = Builtin::lookup(name, args.len())
            .ok_or_else(|| self.error(&format!("unknown function: {}/{}", name, args.len())))?;

        Ok(Ast::Call { builtin, args })
    }

    fn integer(&self, n: f64) -> Result<i64, ParseFilterError> {
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Ok(n as i64)
        } else {
            Err(self.error(&format!("index must be an integer, got {}", n)))
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|(t, _)| t)
            .unwrap_or(&Token::Eof)
    }

    fn peek_next(&self) -> &Token {
        self.tokens
            .get(self.position + 1)
            .map(|(t, _)| t)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Identifier(name) if name == keyword)
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseFilterError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {}, found {}", token, self.peek())))
        }
    }

    fn error(&self, message: &str) -> ParseFilterError {
        let position = self
            .tokens
            .get(self.position)
            .map(|(_, pos)| *pos)
            .unwrap_or(0);
        ParseFilterError {
            message: message.to_string(),
            position,
        }
    }
}

fn pipe(left: Ast, right: Ast) -> Ast {
    match left {
        Ast::Identity => right,
        left => Ast::Pipe(Box::new(left), Box::new(right)),
    }
}

/// Integral numbers become JSON integers
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
