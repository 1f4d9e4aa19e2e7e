//! Boolean expressions over rule labels
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or    := and (("||" | "or") and)*
//! and   := unary (("&&" | "and") unary)*
//! unary := ("!" | "not") unary | primary
//! primary := "(" or ")" | "true" | "false" | label
//! ```
//!
//! Labels that are absent from the environment evaluate to `false`.

use std::collections::HashMap;
use std::fmt;

use sigil_common::{SigilError, SigilResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(bool),
    Label(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> SigilResult<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(SigilError::RuleCompile(format!(
                "unexpected {} in logic `{}`",
                tok, input
            ))),
        }
    }

    pub fn evaluate(&self, env: &HashMap<String, bool>) -> bool {
        match self {
            Expr::Const(value) => *value,
            Expr::Label(label) => env.get(label).copied().unwrap_or(false),
            Expr::Not(inner) => !inner.evaluate(env),
            Expr::And(items) => items.iter().all(|e| e.evaluate(env)),
            Expr::Or(items) => items.iter().any(|e| e.evaluate(env)),
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_labels(&mut out);
        out
    }

    fn collect_labels<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Const(_) => {}
            Expr::Label(label) => out.push(label),
            Expr::Not(inner) => inner.collect_labels(out),
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_labels(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => write!(f, "`&&`"),
            Token::Or => write!(f, "`||`"),
            Token::Not => write!(f, "`!`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Ident(name) => write!(f, "`{}`", name),
        }
    }
}

fn tokenize(input: &str) -> SigilResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '!' => tokens.push(Token::Not),
            '&' | '|' => {
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(SigilError::RuleCompile(format!(
                        "single `{}` at {} in logic `{}`",
                        c, start, input
                    )));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            c if is_ident_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    end = i + next.len_utf8();
                    chars.next();
                }
                let word = &input[start..end];
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_string()),
                });
            }
            other => {
                return Err(SigilError::RuleCompile(format!(
                    "unexpected `{}` at {} in logic `{}`",
                    other, start, input
                )))
            }
        }
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> SigilResult<Expr> {
        let mut items = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn parse_and(&mut self) -> SigilResult<Expr> {
        let mut items = vec![self.parse_unary()?];
        while self.eat(&Token::And) {
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn parse_unary(&mut self) -> SigilResult<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> SigilResult<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(SigilError::RuleCompile("unbalanced `(` in logic".into()));
                }
                Ok(expr)
            }
            Some(Token::Ident(name)) => Ok(match name.to_ascii_lowercase().as_str() {
                "true" => Expr::Const(true),
                "false" => Expr::Const(false),
                _ => Expr::Label(name),
            }),
            Some(tok) => Err(SigilError::RuleCompile(format!(
                "expected label, found {}",
                tok
            ))),
            None => Err(SigilError::RuleCompile("unexpected end of logic".into())),
        }
    }
}
