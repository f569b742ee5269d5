use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigInt;

use crate::result::{Error, Result};
use crate::value::{ObjectValue, Value};

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Root,
    Current,
    Var(String),
    Ident(String),
    TypeRef(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, String, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

// Evaluation context: the message under construction, the innermost
// nested object, the engine's variable bag and the choice prefix.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub root: &'a ObjectValue,
    pub current: &'a ObjectValue,
    pub vars: &'a HashMap<String, Value>,
    pub prefix: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    pub fn with_prefix(self, prefix: &'a Value) -> Scope<'a> {
        Scope {
            prefix: Some(prefix),
            ..self
        }
    }
}

#[derive(Default)]
pub struct Evaluator {
    functions: HashMap<(String, String), NativeFn>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Evaluator {
    pub fn register_function<F>(&mut self, type_ref: &str, name: &str, function: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert((type_ref.to_owned(), name.to_owned()), Arc::new(function));
    }

    pub fn eval(&self, expr: &Expr, scope: &Scope) -> Result<Value> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Root => Ok(Value::Object(scope.root.clone())),
            Expr::Current => Ok(Value::Object(scope.current.clone())),
            Expr::Var(name) => match name.as_str() {
                "self" => Ok(Value::Object(scope.current.clone())),
                "prefix" => scope
                    .prefix
                    .cloned()
                    .ok_or_else(|| Error::Expression("no prefix bound in this context".into())),
                _ => scope
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::Expression(format!("unknown variable `#{}`", name))),
            },
            Expr::Ident(name) => scope
                .current
                .get(name)
                .or_else(|| scope.root.get(name))
                .cloned()
                .ok_or_else(|| Error::Expression(format!("unknown identifier `{}`", name))),
            Expr::TypeRef(name) => Err(Error::Expression(format!(
                "type reference `{}` is only valid as a call target",
                name
            ))),
            Expr::Member(recv, name) => {
                let recv = self.eval(recv, scope)?;
                let obj = recv
                    .as_object()
                    .map_err(|_| Error::Expression(format!("no field `{}` on {}", name, recv.kind())))?;
                obj.get(name)
                    .cloned()
                    .ok_or_else(|| Error::Expression(format!("unknown field `{}` on {}", name, obj.context())))
            }
            Expr::Index(recv, index) => {
                let list = self.eval(recv, scope)?;
                let index = self.eval(index, scope)?.as_size()?;
                match list {
                    Value::List(items) => items.get(index).cloned().ok_or_else(|| {
                        Error::Expression(format!("index {} out of bounds ({})", index, items.len()))
                    }),
                    Value::Bits(set) => Ok(Value::Bool(set.get(index))),
                    other => Err(Error::Expression(format!("cannot index a {}", other.kind()))),
                }
            }
            Expr::Call(recv, name, args) => {
                let args: Vec<Value> = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<_>>()?;
                if let Expr::TypeRef(type_ref) = recv.as_ref() {
                    let function = self
                        .functions
                        .get(&(type_ref.clone(), name.clone()))
                        .ok_or_else(|| {
                            Error::Expression(format!("unknown function T({}).{}", type_ref, name))
                        })?;
                    return function.as_ref()(&args);
                }
                let recv = self.eval(recv, scope)?;
                builtin_method(&recv, name, &args)
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand, scope)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!operand.as_bool()?)),
                    UnOp::Neg => match operand {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Big(b) => Ok(Value::Big(-b)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(Error::Expression(format!("cannot negate a {}", other.kind()))),
                    },
                }
            }
            Expr::Binary(op, lhs, rhs) => match op {
                BinOp::And => {
                    let lhs = self.eval(lhs, scope)?.as_bool()?;
                    Ok(Value::Bool(lhs && self.eval(rhs, scope)?.as_bool()?))
                }
                BinOp::Or => {
                    let lhs = self.eval(lhs, scope)?.as_bool()?;
                    Ok(Value::Bool(lhs || self.eval(rhs, scope)?.as_bool()?))
                }
                _ => {
                    let lhs = self.eval(lhs, scope)?;
                    let rhs = self.eval(rhs, scope)?;
                    binary(*op, lhs, rhs)
                }
            },
        }
    }

    pub fn eval_bool(&self, expr: &Expr, scope: &Scope) -> Result<bool> {
        self.eval(expr, scope)?.as_bool()
    }

    pub fn eval_size(&self, expr: &Expr, scope: &Scope) -> Result<usize> {
        self.eval(expr, scope)?.as_size()
    }
}

fn builtin_method(recv: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match (recv, name) {
        (Value::Str(s), "len") => Ok(Value::Int(s.len() as i64)),
        (Value::List(l), "len") => Ok(Value::Int(l.len() as i64)),
        (Value::Bits(b), "len") => Ok(Value::Int(b.len() as i64)),
        (Value::Str(s), "isEmpty") => Ok(Value::Bool(s.is_empty())),
        (Value::List(l), "isEmpty") => Ok(Value::Bool(l.is_empty())),
        (Value::Bits(b), "isEmpty") => Ok(Value::Bool(b.is_empty())),
        (Value::List(l), "contains") => match args {
            [needle] => Ok(Value::Bool(l.iter().any(|v| equals(v, needle)))),
            _ => Err(Error::Expression("contains() takes one argument".into())),
        },
        _ => Err(Error::Expression(format!(
            "unknown method `{}` on {}",
            name,
            recv.kind()
        ))),
    }
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Big(b)) | (Value::Big(b), Value::Int(a)) => BigInt::from(*a) == *b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (a, b) => a == b,
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(equals(&lhs, &rhs))),
        BinOp::Ne => return Ok(Value::Bool(!equals(&lhs, &rhs))),
        _ => {}
    }
    if let (BinOp::Add, Value::Str(a), Value::Str(b)) = (op, &lhs, &rhs) {
        return Ok(Value::Str(format!("{}{}", a, b)));
    }
    match (op, &lhs, &rhs) {
        (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::Bool(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            }))
        }
        _ => {}
    }
    numeric(op, lhs, rhs)
}

fn numeric(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    if matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_)) {
        let a = as_f64(&lhs)?;
        let b = as_f64(&rhs)?;
        return Ok(match op {
            BinOp::Add => Value::Float(a + b),
            BinOp::Sub => Value::Float(a - b),
            BinOp::Mul => Value::Float(a * b),
            BinOp::Div => Value::Float(a / b),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            _ => unreachable!(),
        });
    }
    if matches!(lhs, Value::Big(_)) || matches!(rhs, Value::Big(_)) {
        let a = as_big(&lhs)?;
        let b = as_big(&rhs)?;
        return Ok(match op {
            BinOp::Add => Value::Big(a + b),
            BinOp::Sub => Value::Big(a - b),
            BinOp::Mul => Value::Big(a * b),
            BinOp::Div => {
                if b == BigInt::from(0) {
                    return Err(Error::Expression("division by zero".into()));
                }
                Value::Big(a / b)
            }
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            _ => unreachable!(),
        });
    }
    let a = lhs.as_int().map_err(|e| Error::Expression(e.to_string()))?;
    let b = rhs.as_int().map_err(|e| Error::Expression(e.to_string()))?;
    let overflow = || Error::Expression("integer overflow".into());
    Ok(match op {
        BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinOp::Div => Value::Int(
            a.checked_div(b)
                .ok_or_else(|| Error::Expression("division by zero".into()))?,
        ),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Ge => Value::Bool(a >= b),
        _ => unreachable!(),
    })
}

fn as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(Error::Expression(format!("{} is not numeric", other.kind()))),
    }
}

fn as_big(value: &Value) -> Result<BigInt> {
    match value {
        Value::Int(i) => Ok(BigInt::from(*i)),
        Value::Big(b) => Ok(b.clone()),
        other => Err(Error::Expression(format!("{} is not numeric", other.kind()))),
    }
}

pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Expression(format!(
            "trailing input in expression `{}`",
            source
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Str(String),
    Ident(String),
    Hash,
    Dot,
    Comma,
    LPar,
    RPar,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
}

fn tokenize(source: &str) -> Result<Vec<Tok>> {
    let mut tokens = vec![];
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '.' => {
                tokens.push(Tok::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '#' => {
                tokens.push(Tok::Hash);
                i += 1;
            }
            '(' => {
                tokens.push(Tok::LPar);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RPar);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            '+' => {
                tokens.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Tok::Slash);
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::EqEq);
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Tok::Not);
                i += 1;
            }
            '<' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Tok::Lt);
                i += 1;
            }
            '>' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Tok::Gt);
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Tok::AndAnd);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Tok::OrOr);
                i += 2;
            }
            '\'' | '"' => {
                let quote = bytes[i];
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                if j == bytes.len() {
                    return Err(Error::Expression(format!("unclosed string in `{}`", source)));
                }
                tokens.push(Tok::Str(source[start..j].to_owned()));
                i = j + 1;
            }
            '0'..='9' => {
                if c == '0' && matches!(bytes.get(i + 1), Some(b'x') | Some(b'X')) {
                    let start = i + 2;
                    let mut j = start;
                    while j < bytes.len() && (bytes[j] as char).is_ascii_hexdigit() {
                        j += 1;
                    }
                    let value = i64::from_str_radix(&source[start..j], 16)
                        .map_err(|e| Error::Expression(format!("bad hex literal: {}", e)))?;
                    tokens.push(Tok::Int(value));
                    i = j;
                } else {
                    let start = i;
                    let mut j = i;
                    while j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                        j += 1;
                    }
                    let value: i64 = source[start..j]
                        .parse()
                        .map_err(|e| Error::Expression(format!("bad integer literal: {}", e)))?;
                    tokens.push(Tok::Int(value));
                    i = j;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && ((bytes[j] as char).is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                tokens.push(Tok::Ident(source[start..j].to_owned()));
                i = j;
            }
            c => return Err(Error::Expression(format!("unexpected character `{}`", c))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::Expression("unexpected end of expression".into()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(Error::Expression(format!(
                "expected {:?}, found {:?}",
                tok,
                self.peek()
            )))
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Tok::OrOr) {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.equality()?;
        while self.eat(&Tok::AndAnd) {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn relational(&mut self) -> Result<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Not) {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                let name = match self.next()? {
                    Tok::Ident(name) => name,
                    tok => return Err(Error::Expression(format!("expected a name after `.`, found {:?}", tok))),
                };
                if self.eat(&Tok::LPar) {
                    let args = self.arguments()?;
                    expr = Expr::Call(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat(&Tok::LBracket) {
                let index = self.expression()?;
                self.expect(Tok::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = vec![];
        if self.eat(&Tok::RPar) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Tok::RPar) {
                return Ok(args);
            }
            self.expect(Tok::Comma)?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next()? {
            Tok::Int(i) => Ok(Expr::Int(i)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Hash => match self.next()? {
                Tok::Ident(name) => Ok(Expr::Var(name)),
                tok => Err(Error::Expression(format!("expected a name after `#`, found {:?}", tok))),
            },
            Tok::LPar => {
                let expr = self.expression()?;
                self.expect(Tok::RPar)?;
                Ok(expr)
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "root" => Ok(Expr::Root),
                "self" => Ok(Expr::Current),
                "T" if self.peek() == Some(&Tok::LPar) => {
                    self.pos += 1;
                    let type_ref = self.qualified_name()?;
                    self.expect(Tok::RPar)?;
                    Ok(Expr::TypeRef(type_ref))
                }
                _ => Ok(Expr::Ident(name)),
            },
            tok => Err(Error::Expression(format!("unexpected token {:?}", tok))),
        }
    }

    fn qualified_name(&mut self) -> Result<String> {
        let mut name = match self.next()? {
            Tok::Ident(part) => part,
            tok => return Err(Error::Expression(format!("expected a type name, found {:?}", tok))),
        };
        while self.eat(&Tok::Dot) {
            match self.next()? {
                Tok::Ident(part) => {
                    name.push('.');
                    name.push_str(&part);
                }
                tok => return Err(Error::Expression(format!("expected a name after `.`, found {:?}", tok))),
            }
        }
        Ok(name)
    }
}
