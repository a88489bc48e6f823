//! Boolean expressions over knob values.
//!
//! `depends` and `select` guards are written in a small language:
//!
//! - knob names: `configDEBUG`, `configSCHED_RR`
//! - literals: `true`, `false`
//! - operators: `!a`, `a && b`, `a || b`, with the usual precedence
//! - parentheses for grouping
//!
//! Expressions are parsed once while the schema compiles and evaluated
//! against a [`Snapshot`], a read-only map from every registered knob to
//! its coerced value. Evaluation has no side effects and touches nothing
//! outside the snapshot.
//!
//! ```
//! use genconfig::expr::{Expr, Snapshot, SnapshotValue};
//!
//! let expr = Expr::parse("configDEBUG && !configSMALL").unwrap();
//! let snapshot = Snapshot::from_iter([
//!     ("configDEBUG".to_string(), SnapshotValue::Bool(true)),
//!     ("configSMALL".to_string(), SnapshotValue::Str("m".into())),
//! ]);
//! assert!(!expr.eval(&snapshot).unwrap());
//! ```

use std::{collections::HashMap, fmt, str::FromStr};

use serde_json::Value;
use thiserror::Error;

use crate::data::{
    document::get_value,
    item::{KnobType, Tristate},
    registry::KnobRegistry,
};

/// Maximum accepted expression length in bytes.
const MAX_INPUT_BYTES: usize = 64 * 1024;
/// Maximum parenthesis / negation nesting.
const MAX_NESTING: usize = 32;

/// Expression parse and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expression is empty")]
    EmptyInput,
    #[error("expression exceeds size limit: {actual_bytes} bytes (max {max_bytes})")]
    InputTooLarge {
        max_bytes: usize,
        actual_bytes: usize,
    },
    #[error("expression nesting exceeds limit of {max_depth} at {position}")]
    NestingTooDeep { max_depth: usize, position: usize },
    #[error("unexpected `{found}` at {position}, expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },
    #[error("unexpected trailing input at {position}")]
    TrailingInput { position: usize },
    #[error("unknown knob `{name}`")]
    UnknownKnob { name: String },
}

/// Parsed boolean expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(bool),
    Knob(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Parse an expression.
    pub fn parse(input: &str) -> Result<Expr, ExprError> {
        if input.len() > MAX_INPUT_BYTES {
            return Err(ExprError::InputTooLarge {
                max_bytes: MAX_INPUT_BYTES,
                actual_bytes: input.len(),
            });
        }
        let tokens = Lexer::new(input).lex()?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_or()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    /// Knob names referenced by this expression, in source order.
    pub fn knobs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_knobs(&mut out);
        out
    }

    fn collect_knobs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Const(_) => {}
            Expr::Knob(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Not(inner) => inner.collect_knobs(out),
            Expr::And(parts) | Expr::Or(parts) => {
                for part in parts {
                    part.collect_knobs(out);
                }
            }
        }
    }

    /// Evaluate against a snapshot.
    ///
    /// Every referenced name is resolved, even when the result is already
    /// decided, so an unknown knob is never hidden by short-circuiting.
    pub fn eval(&self, snapshot: &Snapshot) -> Result<bool, ExprError> {
        match self {
            Expr::Const(b) => Ok(*b),
            Expr::Knob(name) => snapshot
                .get(name)
                .map(SnapshotValue::is_truthy)
                .ok_or_else(|| ExprError::UnknownKnob { name: name.clone() }),
            Expr::Not(inner) => Ok(!inner.eval(snapshot)?),
            Expr::And(parts) => parts
                .iter()
                .map(|p| p.eval(snapshot))
                .collect::<Result<Vec<_>, _>>()
                .map(|v| v.into_iter().all(|b| b)),
            Expr::Or(parts) => parts
                .iter()
                .map(|p| p.eval(snapshot))
                .collect::<Result<Vec<_>, _>>()
                .map(|v| v.into_iter().any(|b| b)),
        }
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, parts: &[Expr], op: &str| {
            f.write_str("(")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{part}")?;
            }
            f.write_str(")")
        };
        match self {
            Expr::Const(b) => write!(f, "{b}"),
            Expr::Knob(name) => f.write_str(name),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::And(parts) => join(f, parts, "&&"),
            Expr::Or(parts) => join(f, parts, "||"),
        }
    }
}

/// Coerced knob value as seen by expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValue {
    /// No value stored at the knob's path.
    Absent,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl SnapshotValue {
    /// Coerce a document value for a knob of the given type.
    ///
    /// Tristate `n` becomes `false`, `m`/`y` stay strings. A choice
    /// alternative is `true` exactly when the document selects its key.
    pub fn coerce(ty: KnobType, choice: Option<&str>, value: Option<&Value>) -> Self {
        match (ty, value) {
            (KnobType::BoolChoice, value) => {
                SnapshotValue::Bool(value.and_then(Value::as_str).is_some_and(|v| Some(v) == choice))
            }
            (_, None | Some(Value::Null)) => SnapshotValue::Absent,
            (KnobType::Tristate, Some(Value::String(s))) if Tristate::parse(s) == Some(Tristate::No) => {
                SnapshotValue::Bool(false)
            }
            (_, Some(value)) => SnapshotValue::from_json(value),
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SnapshotValue::Absent,
            Value::Bool(b) => SnapshotValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SnapshotValue::Int(i),
                None => SnapshotValue::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
            },
            Value::String(s) => SnapshotValue::Str(s.clone()),
            Value::Array(_) | Value::Object(_) => SnapshotValue::Bool(true),
        }
    }

    /// Truthiness used by `!`, `&&`, `||` and the `depends` assertion.
    pub fn is_truthy(&self) -> bool {
        match self {
            SnapshotValue::Absent => false,
            SnapshotValue::Bool(b) => *b,
            SnapshotValue::Int(i) => *i != 0,
            SnapshotValue::Str(s) => !s.is_empty(),
        }
    }
}

/// Read-only view of every registered knob's current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    values: HashMap<String, SnapshotValue>,
}

impl Snapshot {
    /// Capture the values of all registered knobs from a document.
    pub fn capture(registry: &KnobRegistry, doc: &Value) -> Self {
        let values = registry
            .iter()
            .map(|entry| {
                let value = get_value(doc, &entry.path);
                (
                    entry.name.clone(),
                    SnapshotValue::coerce(entry.ty, entry.choice.as_deref(), value),
                )
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotValue> {
        self.values.get(name)
    }

    /// Whether the named knob is currently on. Unknown knobs are off.
    pub fn is_active(&self, name: &str) -> bool {
        self.get(name).is_some_and(SnapshotValue::is_truthy)
    }
}

impl FromIterator<(String, SnapshotValue)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (String, SnapshotValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    True,
    False,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eof,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => f.write_str(name),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Spanned<'a> {
    token: Token<'a>,
    position: usize,
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    fn lex(mut self) -> Result<Vec<Spanned<'a>>, ExprError> {
        let bytes = self.input.as_bytes();
        let mut tokens = Vec::new();

        while let Some(&ch) = bytes.get(self.offset) {
            let position = self.offset;
            let token = match ch {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.offset += 1;
                    continue;
                }
                b'(' => Token::LParen,
                b')' => Token::RParen,
                b'!' => Token::Not,
                b'&' | b'|' => {
                    if bytes.get(self.offset + 1) != Some(&ch) {
                        return Err(ExprError::UnexpectedToken {
                            expected: if ch == b'&' { "`&&`" } else { "`||`" },
                            found: char::from(ch).to_string(),
                            position,
                        });
                    }
                    self.offset += 1;
                    if ch == b'&' { Token::And } else { Token::Or }
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    let end = bytes[position..]
                        .iter()
                        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                        .map_or(bytes.len(), |len| position + len);
                    self.offset = end - 1;
                    match &self.input[position..end] {
                        "true" => Token::True,
                        "false" => Token::False,
                        ident => Token::Ident(ident),
                    }
                }
                _ => {
                    let found = self.input[position..].chars().next().unwrap_or('?');
                    return Err(ExprError::UnexpectedToken {
                        expected: "knob name, literal or operator",
                        found: found.to_string(),
                        position,
                    });
                }
            };
            self.offset += 1;
            tokens.push(Spanned { token, position });
        }

        if tokens.is_empty() {
            return Err(ExprError::EmptyInput);
        }
        tokens.push(Spanned {
            token: Token::Eof,
            position: self.offset,
        });
        Ok(tokens)
    }
}

/// Recursive-descent parser: `or := and ("||" and)*`, `and := unary ("&&" unary)*`,
/// `unary := "!" unary | primary`, `primary := ident | literal | "(" or ")"`.
struct Parser<'a> {
    tokens: Vec<Spanned<'a>>,
    index: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Spanned<'a>>) -> Self {
        Self {
            tokens,
            index: 0,
            nesting: 0,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut parts = vec![self.parse_and()?];
        while self.matches(Token::Or) {
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut parts = vec![self.parse_unary()?];
        while self.matches(Token::And) {
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::And(parts)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let position = self.current().position;
        if self.matches(Token::Not) {
            let inner = self.nested(position, Self::parse_unary)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let Spanned { token, position } = self.current();
        match token {
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Knob(name.to_string()))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Const(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Const(false))
            }
            Token::LParen => {
                self.advance();
                self.nested(position, |parser| {
                    let expr = parser.parse_or()?;
                    parser.expect(Token::RParen, "`)`")?;
                    Ok(expr)
                })
            }
            Token::And | Token::Or | Token::Not | Token::RParen | Token::Eof => {
                Err(ExprError::UnexpectedToken {
                    expected: "knob name, literal or `(`",
                    found: token.to_string(),
                    position,
                })
            }
        }
    }

    fn nested<T>(
        &mut self,
        position: usize,
        f: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        if self.nesting >= MAX_NESTING {
            return Err(ExprError::NestingTooDeep {
                max_depth: MAX_NESTING,
                position,
            });
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    fn expect(&mut self, token: Token<'_>, expected: &'static str) -> Result<(), ExprError> {
        if self.matches(token) {
            Ok(())
        } else {
            let current = self.current();
            Err(ExprError::UnexpectedToken {
                expected,
                found: current.token.to_string(),
                position: current.position,
            })
        }
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        let current = self.current();
        match current.token {
            Token::Eof => Ok(()),
            _ => Err(ExprError::TrailingInput {
                position: current.position,
            }),
        }
    }

    fn matches(&mut self, kind: Token<'_>) -> bool {
        if std::mem::discriminant(&self.current().token) == std::mem::discriminant(&kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current(&self) -> Spanned<'a> {
        // The lexer always terminates the stream with `Eof`.
        self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
    }
}
