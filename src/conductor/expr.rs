//! Inline expression language for `function` nodes.
//!
//! Inline functions are opaque source strings carried in the composition;
//! the conductor evaluates them against the pipeline value with the
//! let-bound names of the enclosing scopes in view. The language is a small
//! declarative expression grammar: JSON literals, object and array
//! constructors, field access and indexing, arithmetic, comparisons,
//! short-circuiting boolean operators, and assignment to let-bound names.
//!
//! A program is a `;`-separated statement list; its value is the value of
//! the last statement. A program whose final statement is an assignment
//! yields no value, which leaves the pipeline value unchanged. `params`
//! names the pipeline value unless shadowed by a let binding; missing
//! fields and indexes read as `null`.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::compose::ast::{Exec, KIND_EXPRESSION};

use super::runtime::ExecEvaluator;

/// Errors surfaced while parsing or evaluating inline source.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The source does not parse.
    #[error("syntax error: {message} at byte {at}")]
    Syntax {
        /// What the parser expected or found.
        message: String,
        /// Byte offset of the failure.
        at: usize,
    },

    /// A name is neither `params` nor let-bound.
    #[error("unknown name: {0}")]
    Unknown(String),

    /// Assignment targeted a name that is not let-bound.
    #[error("cannot assign to unbound name: {0}")]
    Assignment(String),

    /// An operator was applied to values of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// The exec payload carries a kind this evaluator does not understand.
    #[error("unsupported exec kind: {0}")]
    UnsupportedKind(String),

    /// The exec payload has no source text.
    #[error("exec payload has no code")]
    MissingCode,
}

/// A parsed inline program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    statements: Vec<ExprNode>,
}

impl Program {
    /// Evaluate against the pipeline value and the collected let bindings.
    ///
    /// Mutations to `bindings` are the caller's to write back to the stack.
    pub fn evaluate(
        &self,
        params: &Value,
        bindings: &mut Map<String, Value>,
    ) -> Result<Option<Value>, ExprError> {
        let mut last = None;
        for statement in &self.statements {
            last = Some(eval(statement, params, bindings)?);
        }
        match self.statements.last() {
            None => Ok(None),
            Some(ExprNode::Assign { .. }) => Ok(None),
            Some(_) => Ok(last),
        }
    }
}

/// Parse inline source into a [`Program`].
pub fn parse(source: &str) -> Result<Program, ExprError> {
    let mut parser = Parser::new(source);
    let mut statements = Vec::new();
    loop {
        parser.skip_ws();
        if parser.eof() {
            break;
        }
        statements.push(parser.parse_expr()?);
        parser.skip_ws();
        match parser.current() {
            Some(b';') => parser.advance(),
            None => break,
            Some(other) => {
                return Err(parser.error(format!("unexpected character {:?}", other as char)));
            }
        }
    }
    Ok(Program { statements })
}

/// JavaScript-style truthiness over JSON values: `null`, `false`, zero, and
/// the empty string are falsy; everything else is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Default evaluator wired into the conductor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl ExecEvaluator for ExprEvaluator {
    type Error = ExprError;

    fn evaluate(
        &self,
        exec: &Exec,
        params: &Value,
        scope: &mut Map<String, Value>,
    ) -> Result<Option<Value>, ExprError> {
        if exec.kind != KIND_EXPRESSION {
            return Err(ExprError::UnsupportedKind(exec.kind.clone()));
        }
        let code = exec.code.as_deref().ok_or(ExprError::MissingCode)?;
        parse(code)?.evaluate(params, scope)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprNode {
    Literal(Value),
    Ident(String),
    Field(Box<ExprNode>, String),
    Index(Box<ExprNode>, Box<ExprNode>),
    Unary(UnaryOp, Box<ExprNode>),
    Binary(BinaryOp, Box<ExprNode>, Box<ExprNode>),
    Assign {
        name: String,
        value: Box<ExprNode>,
    },
    Object(Vec<(String, ExprNode)>),
    Array(Vec<ExprNode>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
}

type ParseResult<T> = std::result::Result<T, ExprError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
        }
    }

    fn eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if self.index < self.bytes.len() {
            self.index += 1;
        }
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_ascii_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: u8) -> ParseResult<()> {
        self.skip_ws();
        if self.current() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", expected as char)))
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            message: message.into(),
            at: self.index,
        }
    }

    fn parse_expr(&mut self) -> ParseResult<ExprNode> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> ParseResult<ExprNode> {
        self.skip_ws();
        let start = self.index;
        if let Some(name) = self.try_ident() {
            if !matches!(name.as_str(), "true" | "false" | "null") {
                self.skip_ws();
                if self.current() == Some(b'=') && self.peek() != Some(b'=') {
                    self.advance();
                    let value = self.parse_assign()?;
                    return Ok(ExprNode::Assign {
                        name,
                        value: Box::new(value),
                    });
                }
            }
            self.index = start;
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.current() == Some(b'|') && self.peek() == Some(b'|') {
                self.advance();
                self.advance();
                let rhs = self.parse_and()?;
                node = ExprNode::Binary(BinaryOp::Or, Box::new(node), Box::new(rhs));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_and(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_equality()?;
        loop {
            self.skip_ws();
            if self.current() == Some(b'&') && self.peek() == Some(b'&') {
                self.advance();
                self.advance();
                let rhs = self.parse_equality()?;
                node = ExprNode::Binary(BinaryOp::And, Box::new(node), Box::new(rhs));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_equality(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_comparison()?;
        loop {
            self.skip_ws();
            let op = match (self.current(), self.peek()) {
                (Some(b'='), Some(b'=')) => BinaryOp::Eq,
                (Some(b'!'), Some(b'=')) => BinaryOp::Ne,
                _ => return Ok(node),
            };
            self.advance();
            self.advance();
            let rhs = self.parse_comparison()?;
            node = ExprNode::Binary(op, Box::new(node), Box::new(rhs));
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_additive()?;
        loop {
            self.skip_ws();
            let op = match (self.current(), self.peek()) {
                (Some(b'<'), Some(b'=')) => {
                    self.advance();
                    BinaryOp::Le
                }
                (Some(b'>'), Some(b'=')) => {
                    self.advance();
                    BinaryOp::Ge
                }
                (Some(b'<'), _) => BinaryOp::Lt,
                (Some(b'>'), _) => BinaryOp::Gt,
                _ => return Ok(node),
            };
            self.advance();
            let rhs = self.parse_additive()?;
            node = ExprNode::Binary(op, Box::new(node), Box::new(rhs));
        }
    }

    fn parse_additive(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            let op = match self.current() {
                Some(b'+') => BinaryOp::Add,
                Some(b'-') => BinaryOp::Sub,
                _ => return Ok(node),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            node = ExprNode::Binary(op, Box::new(node), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = match self.current() {
                Some(b'*') => BinaryOp::Mul,
                Some(b'/') => BinaryOp::Div,
                Some(b'%') => BinaryOp::Rem,
                _ => return Ok(node),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            node = ExprNode::Binary(op, Box::new(node), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> ParseResult<ExprNode> {
        self.skip_ws();
        match self.current() {
            Some(b'!') if self.peek() != Some(b'=') => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(ExprNode::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Some(b'-') => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(ExprNode::Unary(UnaryOp::Neg, Box::new(operand)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<ExprNode> {
        let mut node = self.parse_primary()?;
        loop {
            self.skip_ws();
            match self.current() {
                Some(b'.') => {
                    self.advance();
                    self.skip_ws();
                    let name = self
                        .try_ident()
                        .ok_or_else(|| self.error("expected field name after '.'"))?;
                    node = ExprNode::Field(Box::new(node), name);
                }
                Some(b'[') => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.eat(b']')?;
                    node = ExprNode::Index(Box::new(node), Box::new(index));
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<ExprNode> {
        self.skip_ws();
        match self.current() {
            None => Err(self.error("unexpected end of input")),
            Some(b'(') => {
                self.advance();
                let node = self.parse_expr()?;
                self.eat(b')')?;
                Ok(node)
            }
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') => {
                let text = self.parse_string()?;
                Ok(ExprNode::Literal(Value::String(text)))
            }
            Some(ch) if ch.is_ascii_digit() => self.parse_number(),
            Some(ch) if is_ident_start(ch) => {
                let name = self
                    .try_ident()
                    .ok_or_else(|| self.error("expected identifier"))?;
                match name.as_str() {
                    "true" => Ok(ExprNode::Literal(Value::Bool(true))),
                    "false" => Ok(ExprNode::Literal(Value::Bool(false))),
                    "null" => Ok(ExprNode::Literal(Value::Null)),
                    _ => Ok(ExprNode::Ident(name)),
                }
            }
            Some(other) => Err(self.error(format!("unexpected character {:?}", other as char))),
        }
    }

    fn parse_object(&mut self) -> ParseResult<ExprNode> {
        self.eat(b'{')?;
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            if self.current() == Some(b'}') {
                self.advance();
                return Ok(ExprNode::Object(fields));
            }
            let key = match self.current() {
                Some(b'"') => self.parse_string()?,
                Some(ch) if is_ident_start(ch) => self
                    .try_ident()
                    .ok_or_else(|| self.error("expected object key"))?,
                _ => return Err(self.error("expected object key")),
            };
            self.eat(b':')?;
            let value = self.parse_expr()?;
            fields.push((key, value));
            self.skip_ws();
            match self.current() {
                Some(b',') => self.advance(),
                Some(b'}') => {}
                _ => return Err(self.error("expected ',' or '}' in object")),
            }
        }
    }

    fn parse_array(&mut self) -> ParseResult<ExprNode> {
        self.eat(b'[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.current() == Some(b']') {
                self.advance();
                return Ok(ExprNode::Array(items));
            }
            items.push(self.parse_expr()?);
            self.skip_ws();
            match self.current() {
                Some(b',') => self.advance(),
                Some(b']') => {}
                _ => return Err(self.error("expected ',' or ']' in array")),
            }
        }
    }

    fn parse_string(&mut self) -> ParseResult<String> {
        // consume opening quote
        self.advance();
        let mut buf = String::new();
        while let Some(ch) = self.current() {
            self.advance();
            match ch {
                b'"' => return Ok(buf),
                b'\\' => {
                    let escaped = self
                        .current()
                        .ok_or_else(|| self.error("incomplete escape"))?;
                    self.advance();
                    let value = match escaped {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        other => {
                            return Err(
                                self.error(format!("unknown escape: \\{}", other as char))
                            );
                        }
                    };
                    buf.push(value);
                }
                _ => buf.push(ch as char),
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn parse_number(&mut self) -> ParseResult<ExprNode> {
        let start = self.index;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.current() == Some(b'.') {
            if let Some(next) = self.peek() {
                if next.is_ascii_digit() {
                    is_float = true;
                    self.advance();
                    while let Some(ch) = self.current() {
                        if ch.is_ascii_digit() {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
            }
        }
        let text = &self.src[start..self.index];
        if is_float {
            match text.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(number) => Ok(ExprNode::Literal(Value::Number(number))),
                None => Err(self.error("invalid float literal")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(number) => Ok(ExprNode::Literal(Value::Number(number.into()))),
                Err(_) => Err(self.error("invalid integer literal")),
            }
        }
    }

    /// Parse an identifier at the cursor, or return `None` without moving.
    fn try_ident(&mut self) -> Option<String> {
        let start = self.index;
        match self.current() {
            Some(ch) if is_ident_start(ch) => self.advance(),
            _ => return None,
        }
        while let Some(ch) = self.current() {
            if is_ident_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        Some(self.src[start..self.index].to_string())
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn eval(
    node: &ExprNode,
    params: &Value,
    bindings: &mut Map<String, Value>,
) -> Result<Value, ExprError> {
    match node {
        ExprNode::Literal(value) => Ok(value.clone()),

        ExprNode::Ident(name) => {
            if let Some(value) = bindings.get(name) {
                Ok(value.clone())
            } else if name == "params" {
                Ok(params.clone())
            } else {
                Err(ExprError::Unknown(name.clone()))
            }
        }

        ExprNode::Field(base, name) => {
            let base = eval(base, params, bindings)?;
            Ok(base.get(name).cloned().unwrap_or(Value::Null))
        }

        ExprNode::Index(base, index) => {
            let base = eval(base, params, bindings)?;
            let index = eval(index, params, bindings)?;
            let item = match (&base, &index) {
                (Value::Array(items), Value::Number(number)) => number
                    .as_u64()
                    .and_then(|i| items.get(i as usize))
                    .cloned(),
                (Value::Object(map), Value::String(key)) => map.get(key).cloned(),
                _ => None,
            };
            Ok(item.unwrap_or(Value::Null))
        }

        ExprNode::Unary(op, operand) => {
            let operand = eval(operand, params, bindings)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
                UnaryOp::Neg => match operand {
                    Value::Number(number) => negate(&number),
                    other => Err(ExprError::Type(format!("cannot negate {}", kind_of(&other)))),
                },
            }
        }

        ExprNode::Binary(op, lhs, rhs) => {
            let left = eval(lhs, params, bindings)?;
            match op {
                BinaryOp::And => {
                    if truthy(&left) {
                        eval(rhs, params, bindings)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::Or => {
                    if truthy(&left) {
                        Ok(left)
                    } else {
                        eval(rhs, params, bindings)
                    }
                }
                _ => {
                    let right = eval(rhs, params, bindings)?;
                    apply_binary(*op, left, right)
                }
            }
        }

        ExprNode::Assign { name, value } => {
            let value = eval(value, params, bindings)?;
            match bindings.get_mut(name) {
                Some(slot) => {
                    *slot = value.clone();
                    Ok(value)
                }
                None => Err(ExprError::Assignment(name.clone())),
            }
        }

        ExprNode::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), eval(value, params, bindings)?);
            }
            Ok(Value::Object(map))
        }

        ExprNode::Array(items) => {
            let mut values = Vec::new();
            for item in items {
                values.push(eval(item, params, bindings)?);
            }
            Ok(Value::Array(values))
        }
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),

        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => {
                    let a = a.as_f64().unwrap_or(f64::NAN);
                    let b = b.as_f64().unwrap_or(f64::NAN);
                    a.partial_cmp(&b)
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let ordering = ordering.ok_or_else(|| {
                ExprError::Type(format!(
                    "cannot compare {} with {}",
                    kind_of(&left),
                    kind_of(&right)
                ))
            })?;
            let holds = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(holds))
        }

        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            _ => Err(ExprError::Type(format!(
                "cannot add {} and {}",
                kind_of(&left),
                kind_of(&right)
            ))),
        },

        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
                _ => Err(ExprError::Type(format!(
                    "arithmetic on {} and {}",
                    kind_of(&left),
                    kind_of(&right)
                ))),
            }
        }

        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators"),
    }
}

fn arithmetic(op: BinaryOp, a: &Number, b: &Number) -> Result<Value, ExprError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Rem => x.checked_rem(y),
            BinaryOp::Div => None,
            _ => unreachable!("non-arithmetic operator"),
        };
        if let Some(result) = exact {
            return Ok(Value::Number(result.into()));
        }
        if matches!(op, BinaryOp::Rem) {
            return Err(ExprError::Type("remainder by zero".to_string()));
        }
    }

    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => unreachable!("non-arithmetic operator"),
    };
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| ExprError::Type("arithmetic produced a non-finite number".to_string()))
}

fn negate(number: &Number) -> Result<Value, ExprError> {
    if let Some(value) = number.as_i64() {
        if let Some(negated) = value.checked_neg() {
            return Ok(Value::Number(negated.into()));
        }
    }
    let value = number.as_f64().unwrap_or(f64::NAN);
    Number::from_f64(-value)
        .map(Value::Number)
        .ok_or_else(|| ExprError::Type("negation produced a non-finite number".to_string()))
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        _ => left == right,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str, params: Value) -> Option<Value> {
        let mut bindings = Map::new();
        parse(source)
            .expect("parse")
            .evaluate(&params, &mut bindings)
            .expect("evaluate")
    }

    #[test]
    fn evaluates_arithmetic_and_fields() {
        assert_eq!(
            run("{ value: params.value + 1 }", json!({ "value": 3 })),
            Some(json!({ "value": 4 }))
        );
        assert_eq!(run("2 * 3 + 4", json!({})), Some(json!(10)));
        assert_eq!(run("7 / 2", json!({})), Some(json!(3.5)));
        assert_eq!(run("7 % 2", json!({})), Some(json!(1)));
    }

    #[test]
    fn missing_fields_read_as_null() {
        assert_eq!(run("params.absent", json!({})), Some(Value::Null));
        assert_eq!(
            run("params.absent.deeper == null", json!({})),
            Some(json!(true))
        );
    }

    #[test]
    fn indexes_arrays_and_objects() {
        let params = json!({ "items": [10, 20], "map": { "k": true } });
        assert_eq!(run("params.items[1]", params.clone()), Some(json!(20)));
        assert_eq!(run("params.items[9]", params.clone()), Some(Value::Null));
        assert_eq!(run("params.map[\"k\"]", params), Some(json!(true)));
    }

    #[test]
    fn short_circuits_like_javascript() {
        assert_eq!(run("null && params.boom.field", json!({})), Some(Value::Null));
        assert_eq!(run("0 || 5", json!({})), Some(json!(5)));
        assert_eq!(run("!\"\"", json!({})), Some(json!(true)));
    }

    #[test]
    fn assignment_targets_bindings_and_returns_the_value() {
        let mut bindings = Map::new();
        bindings.insert("count".to_string(), json!(3));
        let program = parse("(count = count - 1) >= 0").expect("parse");
        let result = program
            .evaluate(&json!({}), &mut bindings)
            .expect("evaluate");
        assert_eq!(result, Some(json!(true)));
        assert_eq!(bindings["count"], json!(2));
    }

    #[test]
    fn final_assignment_yields_no_value() {
        let mut bindings = Map::new();
        bindings.insert("count".to_string(), json!(3));
        let program = parse("count = count - 1").expect("parse");
        let result = program
            .evaluate(&json!({}), &mut bindings)
            .expect("evaluate");
        assert_eq!(result, None);
        assert_eq!(bindings["count"], json!(2));
    }

    #[test]
    fn assignment_to_unbound_name_is_an_error() {
        let mut bindings = Map::new();
        let program = parse("missing = 1").expect("parse");
        match program.evaluate(&json!({}), &mut bindings) {
            Err(ExprError::Assignment(name)) => assert_eq!(name, "missing"),
            other => panic!("expected assignment error, got {:?}", other),
        }
    }

    #[test]
    fn let_bindings_shadow_params() {
        let mut bindings = Map::new();
        bindings.insert("params".to_string(), json!(1));
        let program = parse("params").expect("parse");
        let result = program
            .evaluate(&json!({ "real": true }), &mut bindings)
            .expect("evaluate");
        assert_eq!(result, Some(json!(1)));
    }

    #[test]
    fn statements_run_in_order() {
        let mut bindings = Map::new();
        bindings.insert("a".to_string(), json!(0));
        let program = parse("a = 5; a * 2").expect("parse");
        let result = program
            .evaluate(&json!({}), &mut bindings)
            .expect("evaluate");
        assert_eq!(result, Some(json!(10)));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("params +").is_err());
        assert!(parse("params ~ 1").is_err());
        assert!(parse("{ a: }").is_err());
    }

    #[test]
    fn unsupported_kind_is_rejected() {
        let exec = Exec::code("nodejs:default", "() => 1");
        let mut scope = Map::new();
        match ExprEvaluator.evaluate(&exec, &json!({}), &mut scope) {
            Err(ExprError::UnsupportedKind(kind)) => assert_eq!(kind, "nodejs:default"),
            other => panic!("expected unsupported kind, got {:?}", other),
        }
    }
}
