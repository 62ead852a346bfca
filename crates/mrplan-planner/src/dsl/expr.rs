//! Expression syntax used inside YAML plans.
//!
//! ```text
//! $2:int64               column 2, typed
//! *                      the whole row
//! 42  1.5  'abc'  true   literals (null too)
//! #1                     bag of input 1 inside a packaged group
//! Upper($0):chararray    UDF call with a declared return type
//! $0 > 10 && !($1 == 'x')
//! ```
//!
//! Untyped columns and UDF results are `Unknown`.

use mrplan_core::error::Error;
use mrplan_core::expr::{BinaryOp, Expr};
use mrplan_core::file::FuncSpec;
use mrplan_core::schema::DataType;
use mrplan_core::types::Scalar;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at {0}")]
    UnterminatedString(usize),

    #[error("bad number '{0}'")]
    BadNumber(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },

    #[error("empty expression")]
    Empty,
}

impl From<ExprError> for Error {
    fn from(e: ExprError) -> Self {
        Error::Parse(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Column(usize),
    Bag(usize),
    Star,
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Colon,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Column(i) => format!("${i}"),
            Token::Bag(i) => format!("#{i}"),
            Token::Star => "*".into(),
            Token::Int(v) => v.to_string(),
            Token::Float(v) => v.to_string(),
            Token::Str(s) => format!("'{s}'"),
            Token::Ident(s) => s.clone(),
            Token::Op(s) => (*s).into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Colon => ":".into(),
        }
    }
}

const OPERATORS: [&str; 12] = ["&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "/", "!"];

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '$' | '#' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start {
                    return Err(ExprError::UnexpectedChar { ch: c, pos: i });
                }
                let text: String = chars[start..end].iter().collect();
                let n = text
                    .parse::<usize>()
                    .map_err(|_| ExprError::BadNumber(text.clone()))?;
                tokens.push(if c == '$' { Token::Column(n) } else { Token::Bag(n) });
                i = end;
            }
            '\'' | '"' => {
                let start = i;
                let mut end = i + 1;
                while end < chars.len() && chars[end] != c {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(ExprError::UnterminatedString(start));
                }
                tokens.push(Token::Str(chars[start + 1..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let token = if text.contains('.') {
                    text.parse()
                        .map(Token::Float)
                        .map_err(|_| ExprError::BadNumber(text.clone()))?
                } else {
                    text.parse()
                        .map(Token::Int)
                        .map_err(|_| ExprError::BadNumber(text.clone()))?
                };
                tokens.push(token);
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or(ExprError::UnexpectedChar { ch: c, pos: i })?;
                tokens.push(Token::Op(*op));
                i += op.len();
            }
        }
    }
    Ok(tokens)
}

/// Parse a type name as written after `:` (Arrow-style or short names).
pub fn parse_type(name: &str) -> Result<DataType, ExprError> {
    Ok(match name {
        "Boolean" | "bool" | "boolean" => DataType::Boolean,
        "Int32" | "i32" | "int" => DataType::Int32,
        "Int64" | "i64" | "long" | "int64" => DataType::Int64,
        "Float32" | "f32" | "float" => DataType::Float32,
        "Float64" | "f64" | "double" => DataType::Float64,
        "Utf8" | "chararray" | "string" | "str" => DataType::Utf8,
        "Binary" | "bytes" | "bytearray" => DataType::Binary,
        "Date64" | "date" | "datetime" => DataType::Date64,
        "Decimal128" | "decimal" | "bigdecimal" => DataType::Decimal128,
        "Tuple" | "tuple" => DataType::Tuple,
        "Bag" | "bag" => DataType::Bag,
        "Map" | "map" => DataType::Map,
        "Unknown" | "unknown" => DataType::Unknown,
        other => return Err(ExprError::UnknownType(other.to_string())),
    })
}

/// Parse one expression.
pub fn parse_expr(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.binary(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(t) => Err(ExprError::Expected {
            expected: "end of expression".into(),
            found: t.describe(),
        }),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Binding power per level, loosest first.
const LEVELS: [&[(&str, BinaryOp)]; 5] = [
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::NotEq),
        ("<=", BinaryOp::LtEq),
        (">=", BinaryOp::GtEq),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div)],
];

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            other => Err(ExprError::Expected {
                expected: want.describe(),
                found: other.map(|t| t.describe()).unwrap_or_else(|| "end".into()),
            }),
        }
    }

    fn level_op(&self, level: usize) -> Option<BinaryOp> {
        let symbol = match self.peek()? {
            Token::Op(s) => *s,
            Token::Star => "*",
            Token::Ident(s) if s == "and" => "&&",
            Token::Ident(s) if s == "or" => "||",
            _ => return None,
        };
        LEVELS[level]
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, op)| *op)
    }

    fn binary(&mut self, level: usize) -> Result<Expr, ExprError> {
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(level + 1)?;
        while let Some(op) = self.level_op(level) {
            self.pos += 1;
            let right = self.binary(level + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::Ident(s)) if s == "not" => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::Op("-")) => {
                self.pos += 1;
                match self.next() {
                    Some(Token::Int(v)) => Ok(Expr::Const(Scalar::I64(-v))),
                    Some(Token::Float(v)) => Ok(Expr::Const(Scalar::F64(-v))),
                    other => Err(ExprError::Expected {
                        expected: "number after '-'".into(),
                        found: other.map(|t| t.describe()).unwrap_or_else(|| "end".into()),
                    }),
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let token = self.next().ok_or_else(|| ExprError::Expected {
            expected: "operand".into(),
            found: "end".into(),
        })?;
        match token {
            Token::Column(index) => {
                let data_type = self.type_suffix()?.unwrap_or(DataType::Unknown);
                Ok(Expr::Column { index, data_type })
            }
            Token::Bag(input) => Ok(Expr::InputBag { input }),
            Token::Star => Ok(Expr::Star),
            Token::Int(v) => Ok(Expr::Const(Scalar::I64(v))),
            Token::Float(v) => Ok(Expr::Const(Scalar::F64(v))),
            Token::Str(s) => Ok(Expr::Const(Scalar::Str(s))),
            Token::LParen => {
                let inner = self.binary(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Const(Scalar::Bool(true))),
                "false" => Ok(Expr::Const(Scalar::Bool(false))),
                "null" => Ok(Expr::Const(Scalar::Null)),
                _ => self.call(name),
            },
            other => Err(ExprError::Expected {
                expected: "operand".into(),
                found: other.describe(),
            }),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExprError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.binary(0)?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        if name == "RowSize" && args.is_empty() {
            return Ok(Expr::RowSize);
        }
        let return_type = self.type_suffix()?.unwrap_or(DataType::Unknown);
        Ok(Expr::Udf {
            func: FuncSpec::new(name),
            args,
            return_type,
        })
    }

    fn type_suffix(&mut self) -> Result<Option<DataType>, ExprError> {
        if self.peek() != Some(&Token::Colon) {
            return Ok(None);
        }
        self.pos += 1;
        match self.next() {
            Some(Token::Ident(name)) => parse_type(&name).map(Some),
            other => Err(ExprError::Expected {
                expected: "type name".into(),
                found: other.map(|t| t.describe()).unwrap_or_else(|| "end".into()),
            }),
        }
    }
}
