// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal boolean/comparison expression language for `when:` predicates.
//!
//! Grounded on `pyowmaster/event/action/conditionals.py`, which compiles a
//! `when:` string through a Jinja2 expression environment. Per REDESIGN
//! NOTES §9, this implementation hand-rolls a small recursive-descent
//! parser/evaluator instead of depending on a templating crate: the grammar
//! is small (field access, comparisons, boolean ops, a `??` null-coalescing
//! operator) and self-contained, mirroring how the teacher keeps its own
//! small parsers in-tree (e.g. `driver/screen_parse.rs`) rather than
//! reaching for a general templating engine.

use std::collections::BTreeMap;
use std::fmt;

/// A runtime value flowing through expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The variables an expression may reference: `event.<field>`,
/// `since_last_event`, `since_last_run`, `since_last_action_run`, and a flat
/// `devices` presence map (by both canonical ID and alias), per §4.8.
#[derive(Debug, Default, Clone)]
pub struct Context {
    pub vars: BTreeMap<String, Value>,
    pub event: BTreeMap<String, Value>,
    pub devices: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn set_event_field(&mut self, name: impl Into<String>, value: Value) {
        self.event.insert(name.into(), value);
    }

    pub fn set_device(&mut self, name: impl Into<String>, present: bool) {
        self.devices.insert(name.into(), Value::Bool(present));
    }

    fn resolve(&self, path: &[String]) -> Value {
        match path.first().map(String::as_str) {
            Some("event") => path
                .get(1)
                .and_then(|f| self.event.get(f))
                .cloned()
                .unwrap_or(Value::Null),
            Some("devices") => path
                .get(1)
                .and_then(|d| self.devices.get(d))
                .cloned()
                .unwrap_or(Value::Null),
            Some(name) => self.vars.get(name).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        }
    }
}

#[derive(Debug)]
pub struct ExprError(String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expression error: {}", self.0)
    }
}

impl std::error::Error for ExprError {}

/// A compiled expression, ready to evaluate against any [`Context`].
#[derive(Debug, Clone)]
pub struct Expr(Node);

#[derive(Debug, Clone)]
enum Node {
    Lit(Value),
    Field(Vec<String>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Coalesce(Box<Node>, Box<Node>),
    Cmp(CmpOp, Box<Node>, Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Parse a `when:` predicate string into an [`Expr`]. An empty/whitespace
/// string compiles to the literal `true`, matching `parse_conditional(None)`.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Ok(Expr(Node::Lit(Value::Bool(true))));
    }
    let mut p = Parser::new(trimmed);
    let node = p.parse_or()?;
    p.skip_ws();
    if !p.at_end() {
        return Err(ExprError(format!("unexpected trailing input at byte {}", p.pos)));
    }
    Ok(Expr(node))
}

impl Expr {
    pub fn eval(&self, ctx: &Context) -> Value {
        eval_node(&self.0, ctx)
    }

    pub fn eval_bool(&self, ctx: &Context) -> bool {
        self.eval(ctx).truthy()
    }
}

fn eval_node(node: &Node, ctx: &Context) -> Value {
    match node {
        Node::Lit(v) => v.clone(),
        Node::Field(path) => ctx.resolve(path),
        Node::Not(inner) => Value::Bool(!eval_node(inner, ctx).truthy()),
        Node::And(a, b) => Value::Bool(eval_node(a, ctx).truthy() && eval_node(b, ctx).truthy()),
        Node::Or(a, b) => Value::Bool(eval_node(a, ctx).truthy() || eval_node(b, ctx).truthy()),
        Node::Coalesce(a, b) => {
            let av = eval_node(a, ctx);
            if av.is_null() {
                eval_node(b, ctx)
            } else {
                av
            }
        }
        Node::Cmp(op, a, b) => Value::Bool(compare(*op, &eval_node(a, ctx), &eval_node(b, ctx))),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return match op {
            CmpOp::Eq => a.is_null() && b.is_null(),
            CmpOp::Ne => !(a.is_null() && b.is_null()),
            _ => false,
        };
    }

    let numeric = matches!((a, b), (Value::Num(_), Value::Num(_)));
    match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        _ if numeric => {
            let (Value::Num(x), Value::Num(y)) = (a, b) else { unreachable!() };
            match op {
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            }
        }
        _ => {
            let x = a.to_string();
            let y = b.to_string();
            match op {
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ => a.to_string() == b.to_string(),
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    fn starts_with(&mut self, s: &str) -> bool {
        self.skip_ws();
        self.src[self.pos..].starts_with(s.as_bytes())
    }

    fn consume(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_and()?;
        loop {
            if self.consume("||") {
                let rhs = self.parse_and()?;
                node = Node::Or(Box::new(node), Box::new(rhs));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_coalesce()?;
        loop {
            if self.consume("&&") {
                let rhs = self.parse_coalesce()?;
                node = Node::And(Box::new(node), Box::new(rhs));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_coalesce(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_cmp()?;
        loop {
            if self.consume("??") {
                let rhs = self.parse_cmp()?;
                node = Node::Coalesce(Box::new(node), Box::new(rhs));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_cmp(&mut self) -> Result<Node, ExprError> {
        let lhs = self.parse_unary()?;
        let op = if self.consume("==") {
            CmpOp::Eq
        } else if self.consume("!=") {
            CmpOp::Ne
        } else if self.consume("<=") {
            CmpOp::Le
        } else if self.consume(">=") {
            CmpOp::Ge
        } else if self.consume("<") {
            CmpOp::Lt
        } else if self.consume(">") {
            CmpOp::Gt
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_unary()?;
        Ok(Node::Cmp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        self.skip_ws();
        if self.consume("!") {
            return Ok(Node::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        self.skip_ws();
        if self.consume("(") {
            let node = self.parse_or()?;
            self.skip_ws();
            if !self.consume(")") {
                return Err(ExprError("expected closing ')'".into()));
            }
            return Ok(node);
        }

        if self.consume("true") {
            return Ok(Node::Lit(Value::Bool(true)));
        }
        if self.consume("false") {
            return Ok(Node::Lit(Value::Bool(false)));
        }
        if self.consume("null") {
            return Ok(Node::Lit(Value::Null));
        }

        if self.peek() == Some(b'\'') || self.peek() == Some(b'"') {
            return self.parse_string();
        }

        if self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'-') {
            return self.parse_number();
        }

        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            return self.parse_field();
        }

        Err(ExprError(format!("unexpected character at byte {}", self.pos)))
    }

    fn parse_string(&mut self) -> Result<Node, ExprError> {
        #[allow(clippy::unwrap_used)]
        let quote = self.peek().unwrap();
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != quote) {
            self.pos += 1;
        }
        if self.at_end() {
            return Err(ExprError("unterminated string literal".into()));
        }
        #[allow(clippy::unwrap_used)]
        let s = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_owned();
        self.pos += 1;
        Ok(Node::Lit(Value::Str(s)))
    }

    fn parse_number(&mut self) -> Result<Node, ExprError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        #[allow(clippy::unwrap_used)]
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        text.parse::<f64>()
            .map(|n| Node::Lit(Value::Num(n)))
            .map_err(|e| ExprError(format!("invalid number literal '{text}': {e}")))
    }

    fn parse_field(&mut self) -> Result<Node, ExprError> {
        let mut path = Vec::new();
        loop {
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            if self.pos == start {
                return Err(ExprError("expected identifier".into()));
            }
            #[allow(clippy::unwrap_used)]
            path.push(std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_owned());
            if self.peek() == Some(b'.') {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(Node::Field(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_predicate_is_always_true() {
        let e = parse("").unwrap();
        assert!(e.eval_bool(&Context::new()));
    }

    #[test]
    fn compares_event_field() {
        let mut ctx = Context::new();
        ctx.set_event_field("value", Value::Str("on".into()));
        let e = parse("event.value == 'on'").unwrap();
        assert!(e.eval_bool(&ctx));
    }

    #[test]
    fn numeric_comparison() {
        let mut ctx = Context::new();
        ctx.set("since_last_event", Value::Num(3.5));
        let e = parse("since_last_event > 2").unwrap();
        assert!(e.eval_bool(&ctx));
    }

    #[test]
    fn null_since_last_event_does_not_satisfy_gt() {
        let ctx = Context::new();
        let e = parse("since_last_event > 2").unwrap();
        assert!(!e.eval_bool(&ctx));
    }

    #[test]
    fn null_coalescing_falls_back() {
        let ctx = Context::new();
        let e = parse("since_last_event ?? 0 == 0").unwrap();
        // `??` binds tighter than comparisons in this grammar's precedence
        // chain (coalesce sits between `&&` and comparisons), so this reads
        // as `since_last_event ?? (0 == 0)`.
        assert!(e.eval_bool(&ctx));
    }

    #[test]
    fn boolean_and_or_not() {
        let mut ctx = Context::new();
        ctx.set_event_field("value", Value::Str("on".into()));
        let e = parse("event.value == 'on' && !(1 > 2)").unwrap();
        assert!(e.eval_bool(&ctx));
    }

    #[test]
    fn device_presence_lookup() {
        let mut ctx = Context::new();
        ctx.set_device("frontdoor", true);
        let e = parse("devices.frontdoor == true").unwrap();
        assert!(e.eval_bool(&ctx));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("true)").is_err());
    }
}
