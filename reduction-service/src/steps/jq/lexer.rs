// Filter Lexer
// Tokenizes the restricted jq-style filter language

use std::fmt;

/// Tokens of the filter language
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    /// `.name` written directly after a dot
    Field(String),
    /// Bare word: function names and `and`/`or`
    Identifier(String),

    // Operators
    Dot,       // .
    Pipe,      // |
    Comma,     // ,
    Semicolon, // ;
    Question,  // ?
    Minus,     // -
    Eq,        // ==
    Ne,        // !=
    Lt,        // <
    Le,        // <=
    Gt,        // >
    Ge,        // >=

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Field(s) => write!(f, ".{}", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Dot => write!(f, "."),
            Token::Pipe => write!(f, "|"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Question => write!(f, "?"),
            Token::Minus => write!(f, "-"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of filter"),
        }
    }
}

/// Lexer error
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire input, positions alongside
    pub fn tokenize(&mut self) -> Result<Vec<(Token, usize)>, LexError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push((token, self.position));
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        self.position = pos;

        match ch {
            '.' => {
                self.advance();
                match self.peek_char() {
                    Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                        Ok(Token::Field(self.read_word()))
                    }
                    _ => Ok(Token::Dot),
                }
            }
            '|' => self.single(Token::Pipe),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            '?' => self.single(Token::Question),
            '-' => self.single(Token::Minus),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),

            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Eq)
                } else {
                    Err(LexError {
                        message: "assignment is not supported, expected '=='".to_string(),
                        position: pos,
                    })
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Ne)
                } else {
                    Err(LexError {
                        message: "expected '!='; use 'not' for negation".to_string(),
                        position: pos,
                    })
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Le)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }

            '"' => self.read_string(),
            '0'..='9' => self.read_number(),
            'a'..='z' | 'A'..='Z' | '_' => {
                let word = self.read_word();
                Ok(match word.as_str() {
                    "null" => Token::Null,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Identifier(word),
                })
            }

            _ => Err(LexError {
                message: format!("unexpected character: '{}'", ch),
                position: pos,
            }),
        }
    }

    fn single(&mut self, token: Token) -> Result<Token, LexError> {
        self.advance();
        Ok(token)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        self.advance(); // opening quote

        let mut value = String::new();

        loop {
            match self.advance() {
                Some((_, '"')) => break,
                Some((pos, '\\')) => {
                    let escaped = match self.advance() {
                        Some((_, '"')) => '"',
                        Some((_, '\\')) => '\\',
                        Some((_, '/')) => '/',
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, 'u')) => self.read_unicode_escape(pos)?,
                        _ => {
                            return Err(LexError {
                                message: "invalid escape sequence".to_string(),
                                position: pos,
                            })
                        }
                    };
                    value.push(escaped);
                }
                Some((_, ch)) => value.push(ch),
                None => {
                    return Err(LexError {
                        message: "unterminated string".to_string(),
                        position: start,
                    })
                }
            }
        }

        Ok(Token::String(value))
    }

    fn read_unicode_escape(&mut self, pos: usize) -> Result<char, LexError> {
        let mut hex = String::with_capacity(4);
        for _ in 0..4 {
            match self.advance() {
                Some((_, c)) if c.is_ascii_hexdigit() => hex.push(c),
                _ => break,
            }
        }

        u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|_| hex.len() == 4)
            .and_then(char::from_u32)
            .ok_or_else(|| LexError {
                message: format!("invalid unicode escape '\\u{}'", hex),
                position: pos,
            })
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        let mut num_str = String::new();

        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // Only treat '.' as a decimal point when a digit follows
        if self.peek_char() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
                num_str.push('.');
                self.advance();
                while let Some(&(_, ch)) = self.chars.peek() {
                    if ch.is_ascii_digit() {
                        num_str.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| LexError {
                message: format!("invalid number: {}", num_str),
                position: start,
            })
    }
}
