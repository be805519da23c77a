//! `${{ ... }}` expressions of workflow files.
//!
//! Expressions are parsed into an [`Expr`] tree and partially evaluated
//! against the contexts known while transpiling. Whatever only becomes known
//! while the build script runs (job status, step outcomes, variables written to
//! `$GITHUB_ENV`) is compiled into bash instead.

use crate::errors::TranspileError;
use bugswarm_common::errors::*;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(r"\$\{\{([^}']|'(''|[^'])*')*\}\}").unwrap();
    static ref STATUS_FUNCTION: Regex = Regex::new(r"(?i)\b(success|always|failure|cancelled)\s*\(").unwrap();
    static ref BASH_IDENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Context(Vec<String>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Not,
    Op(BinOp),
    Str(String),
    Num(f64),
    Ident(String),
}

fn invalid(src: &str, msg: &str) -> Error {
    TranspileError::InvalidExpression(format!("{} ({:?})", msg, src)).into()
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars = src.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => { tokens.push(Token::LParen); i += 1; },
            ')' => { tokens.push(Token::RParen); i += 1; },
            '[' => { tokens.push(Token::LBracket); i += 1; },
            ']' => { tokens.push(Token::RBracket); i += 1; },
            ',' => { tokens.push(Token::Comma); i += 1; },
            '.' => { tokens.push(Token::Dot); i += 1; },
            '!' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op(BinOp::Ne)); i += 2; },
            '!' => { tokens.push(Token::Not); i += 1; },
            '=' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op(BinOp::Eq)); i += 2; },
            '<' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op(BinOp::Le)); i += 2; },
            '<' => { tokens.push(Token::Op(BinOp::Lt)); i += 1; },
            '>' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op(BinOp::Ge)); i += 2; },
            '>' => { tokens.push(Token::Op(BinOp::Gt)); i += 1; },
            '&' if chars.get(i + 1) == Some(&'&') => { tokens.push(Token::Op(BinOp::And)); i += 2; },
            '|' if chars.get(i + 1) == Some(&'|') => { tokens.push(Token::Op(BinOp::Or)); i += 2; },
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        },
                        Some('\'') => {
                            i += 1;
                            break;
                        },
                        Some(c) => {
                            s.push(*c);
                            i += 1;
                        },
                        None => return Err(invalid(src, "unterminated string")),
                    }
                }
                tokens.push(Token::Str(s));
            },
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |c| c.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.'
                    || ((chars[i] == '-' || chars[i] == '+') && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text = chars[start..i].iter().collect::<String>();
                tokens.push(Token::Num(parse_number(&text).ok_or_else(|| invalid(src, "invalid number"))?));
            },
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            },
            _ => return Err(invalid(src, "unexpected character")),
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Option<f64> {
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let n = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()? as f64
    } else {
        digits.parse::<f64>().ok()?
    };
    Some(if neg { -n } else { n })
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token, msg: &str) -> Result<()> {
        if self.next() == Some(token) {
            Ok(())
        } else {
            Err(invalid(self.src, msg))
        }
    }

    fn binary(&mut self, ops: &[BinOp], lower: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        let mut lhs = lower(self)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            let rhs = lower(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr> {
        self.binary(&[BinOp::Or], Self::and)
    }

    fn and(&mut self) -> Result<Expr> {
        self.binary(&[BinOp::And], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary(&[BinOp::Eq, BinOp::Ne], Self::relational)
    }

    fn relational(&mut self) -> Result<Expr> {
        self.binary(&[BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen, "missing closing parenthesis")?;
                Ok(inner)
            },
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Ident(ident)) => {
                match ident.as_str() {
                    "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => (),
                }

                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.or()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen, "missing closing parenthesis of function call")?;
                    return Ok(Expr::Call(ident.to_lowercase(), args));
                }

                let mut path = vec![ident];
                loop {
                    match self.peek() {
                        Some(Token::Dot) => {
                            self.pos += 1;
                            match self.next() {
                                Some(Token::Ident(name)) => path.push(name),
                                _ => return Err(invalid(self.src, "expected property name")),
                            }
                        },
                        Some(Token::LBracket) => {
                            self.pos += 1;
                            match self.next() {
                                Some(Token::Str(s)) => path.push(s),
                                Some(Token::Num(n)) => path.push(to_str(&number(n))),
                                _ => return Err(invalid(self.src, "only literal indexes are supported")),
                            }
                            self.expect(Token::RBracket, "missing closing bracket")?;
                        },
                        _ => break,
                    }
                }
                Ok(Expr::Context(path))
            },
            _ => Err(invalid(self.src, "unexpected token")),
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Removes the `${{ }}` around an expression, if any.
pub fn strip_wrapper(src: &str) -> &str {
    let trimmed = src.trim();
    match EXPRESSION.find(trimmed) {
        Some(m) if m.start() == 0 && m.end() == trimmed.len() => {
            trimmed[3..trimmed.len() - 2].trim()
        },
        _ => trimmed,
    }
}

pub fn parse(src: &str) -> Result<Expr> {
    let inner = strip_wrapper(src);
    let mut parser = Parser {
        src: inner,
        tokens: tokenize(inner)?,
        pos: 0,
    };
    let expr = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid(inner, "trailing tokens"));
    }
    Ok(expr)
}

/// String conversion used whenever a value ends up in text.
pub fn to_str(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => if *b { 1.0 } else { 0.0 },
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => parse_number(s.trim()).unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            if a == b { Some(Ordering::Equal) } else { None }
        },
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

pub fn quote(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

/// A partially evaluated expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Known while transpiling.
    Static(Value),
    /// A bash conditional expression, the inside of `[[ ]]`.
    Cond(String),
    /// A bash word that expands to a string at runtime.
    Word(String),
}

impl Operand {
    fn cond(&self) -> String {
        match self {
            Operand::Static(v) => if truthy(v) { "1 == 1".to_string() } else { "1 == 0".to_string() },
            Operand::Cond(c) => c.clone(),
            Operand::Word(w) => format!("-n {}", w),
        }
    }

    /// A bash word that expands to the string value.
    pub fn word(&self) -> String {
        match self {
            Operand::Static(v) => quote(&to_str(v)),
            Operand::Cond(c) => format!("\"$([[ {} ]] && echo true || echo false)\"", c),
            Operand::Word(w) => w.clone(),
        }
    }

    /// A bash word that expands to `true` or `false`.
    pub fn condition(&self) -> String {
        match self {
            Operand::Static(v) => truthy(v).to_string(),
            _ => format!("$([[ {} ]] && echo true || echo false)", self.cond()),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Operand::Static(_))
    }
}

/// Everything expressions can reference while a job is transpiled.
#[derive(Debug, Clone, Default)]
pub struct Contexts {
    values: Map<String, Value>,
    env: IndexMap<String, String>,
}

impl Contexts {
    pub fn new() -> Contexts {
        Contexts::default()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_lowercase())
    }

    /// Environment variables known at this level.
    pub fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    pub fn with_env(&self, env: &IndexMap<String, String>) -> Contexts {
        let mut ctx = self.clone();
        for (key, value) in env {
            ctx.env.insert(key.clone(), value.clone());
        }
        ctx
    }

    fn lookup(&self, path: &[String]) -> Operand {
        let root = path[0].to_lowercase();
        match root.as_str() {
            "env" => match path.get(1) {
                Some(key) if path.len() == 2 => {
                    if let Some(value) = self.env.get(key) {
                        Operand::Static(Value::String(value.clone()))
                    } else if BASH_IDENT.is_match(key) {
                        Operand::Word(format!("\"${{CURRENT_ENV_MAP[{}]:-${{{}:-}}}}\"", key, key))
                    } else {
                        Operand::Word(format!("\"${{CURRENT_ENV_MAP[{}]:-}}\"", key))
                    }
                },
                Some(_) => Operand::Static(Value::Null),
                None => Operand::Static(Value::Object(self.env.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect())),
            },
            "steps" if path.len() == 3 => {
                let attr = path[2].to_lowercase();
                if attr == "outcome" || attr == "conclusion" {
                    Operand::Word(format!("\"${{{}:-}}\"", step_var(&path[1], &attr)))
                } else {
                    Operand::Static(Value::Null)
                }
            },
            "job" if path.len() == 2 && path[1].eq_ignore_ascii_case("status") => {
                Operand::Word("\"$_GITHUB_JOB_STATUS\"".to_string())
            },
            _ => {
                let mut value = match self.values.get(&root) {
                    Some(value) => value,
                    None => return Operand::Static(Value::Null),
                };
                for key in &path[1..] {
                    let next = match value {
                        Value::Object(map) => map.get(key).or_else(|| {
                            map.iter()
                                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                                .map(|(_, v)| v)
                        }),
                        Value::Array(list) => key.parse::<usize>().ok().and_then(|idx| list.get(idx)),
                        _ => None,
                    };
                    match next {
                        Some(next) => value = next,
                        None => return Operand::Static(Value::Null),
                    }
                }
                Operand::Static(value.clone())
            },
        }
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Operand> {
        match expr {
            Expr::Literal(v) => Ok(Operand::Static(v.clone())),
            Expr::Context(path) => Ok(self.lookup(path)),
            Expr::Not(inner) => Ok(match self.evaluate(inner)? {
                Operand::Static(v) => Operand::Static(Value::Bool(!truthy(&v))),
                Operand::Cond(c) => Operand::Cond(format!("! ( {} )", c)),
                Operand::Word(w) => Operand::Cond(format!("-z {}", w)),
            }),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.evaluate(lhs)?;
                let rhs = self.evaluate(rhs)?;
                Ok(binary(*op, lhs, rhs))
            },
            Expr::Call(name, args) => {
                let args = args.iter()
                    .map(|a| self.evaluate(a))
                    .collect::<Result<Vec<_>>>()?;
                call(name, args)
            },
        }
    }

    /// Compile a step `if:` into a bash word printing `true` or `false`.
    ///
    /// Conditions without a status function only run while the job is successful.
    pub fn step_if(&self, raw: Option<&Value>) -> Result<String> {
        let src = match raw {
            None => "success()".to_string(),
            Some(Value::String(s)) if s.trim().is_empty() => "success()".to_string(),
            Some(Value::String(s)) => {
                let inner = strip_wrapper(s);
                if STATUS_FUNCTION.is_match(inner) {
                    inner.to_string()
                } else {
                    format!("success() && ({})", inner)
                }
            },
            Some(other) => format!("success() && ({})", to_str(other)),
        };
        let expr = parse(&src)?;
        Ok(self.evaluate(&expr)?.condition())
    }

    /// Compile a boolean option like `continue-on-error`.
    pub fn flag(&self, raw: Option<&Value>) -> Result<String> {
        match raw {
            None | Some(Value::Null) => Ok("false".to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(Value::String(s)) => {
                let expr = parse(s)?;
                Ok(self.evaluate(&expr)?.condition())
            },
            Some(other) => Ok(truthy(other).to_string()),
        }
    }

    /// Replace every `${{ }}` in `text` and shell-quote the result into a single word.
    pub fn substitute(&self, text: &str) -> Result<String> {
        let mut words = Vec::new();
        let mut pending = String::new();
        let mut idx = 0;

        for m in EXPRESSION.find_iter(text) {
            pending.push_str(&text[idx..m.start()]);
            idx = m.end();
            match self.evaluate(&parse(m.as_str())?)? {
                Operand::Static(v) => pending.push_str(&to_str(&v)),
                dynamic => {
                    if !pending.is_empty() {
                        words.push(quote(&pending));
                        pending.clear();
                    }
                    words.push(dynamic.word());
                },
            }
        }
        pending.push_str(&text[idx..]);
        if !pending.is_empty() || words.is_empty() {
            words.push(quote(&pending));
        }

        Ok(words.concat())
    }

    /// Replace every `${{ }}` in `text` that can be resolved now, keep the others as written.
    pub fn interpolate(&self, text: &str) -> String {
        EXPRESSION.replace_all(text, |caps: &regex::Captures| {
            let expr = &caps[0];
            match parse(expr).and_then(|e| self.evaluate(&e)) {
                Ok(Operand::Static(v)) => to_str(&v),
                _ => expr.to_string(),
            }
        }).into_owned()
    }
}

/// Name of the shell variable that tracks `steps.<id>.<attr>`.
pub fn step_var(id: &str, attr: &str) -> String {
    lazy_static! {
        static ref NON_WORD: Regex = Regex::new(r"\W").unwrap();
    }
    format!("_CONTEXT_STEPS_{}_{}", NON_WORD.replace_all(&id.to_uppercase(), "_"), attr.to_uppercase())
}

fn binary(op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
    match op {
        BinOp::And => match (lhs, rhs) {
            (Operand::Static(a), _) if !truthy(&a) => Operand::Static(a),
            (Operand::Static(_), b) => b,
            (a, Operand::Static(b)) => {
                if truthy(&b) {
                    Operand::Cond(a.cond())
                } else {
                    Operand::Static(Value::Bool(false))
                }
            },
            (a, b) => Operand::Cond(format!("( {} ) && ( {} )", a.cond(), b.cond())),
        },
        BinOp::Or => match (lhs, rhs) {
            (Operand::Static(a), _) if truthy(&a) => Operand::Static(a),
            (Operand::Static(_), b) => b,
            (a, Operand::Static(b)) => {
                if truthy(&b) {
                    Operand::Static(Value::Bool(true))
                } else {
                    Operand::Cond(a.cond())
                }
            },
            (a, b) => Operand::Cond(format!("( {} ) || ( {} )", a.cond(), b.cond())),
        },
        _ => match (&lhs, &rhs) {
            (Operand::Static(a), Operand::Static(b)) => {
                let ord = compare(a, b);
                let res = match op {
                    BinOp::Eq => ord == Some(Ordering::Equal),
                    BinOp::Ne => ord != Some(Ordering::Equal),
                    BinOp::Lt => ord == Some(Ordering::Less),
                    BinOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                    BinOp::Gt => ord == Some(Ordering::Greater),
                    BinOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                    BinOp::And | BinOp::Or => unreachable!(),
                };
                Operand::Static(Value::Bool(res))
            },
            _ => {
                let (a, b) = (lhs.word(), rhs.word());
                Operand::Cond(match op {
                    BinOp::Eq => format!("{} == {}", a, b),
                    BinOp::Ne => format!("{} != {}", a, b),
                    BinOp::Lt => format!("{} < {}", a, b),
                    BinOp::Le => format!("! ( {} > {} )", a, b),
                    BinOp::Gt => format!("{} > {}", a, b),
                    BinOp::Ge => format!("! ( {} < {} )", a, b),
                    BinOp::And | BinOp::Or => unreachable!(),
                })
            },
        },
    }
}

fn arity(name: &str, args: &[Operand], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        Err(TranspileError::InvalidExpression(format!("{}() takes {} to {} arguments, got {}",
            name, min, max, args.len())).into())
    } else {
        Ok(())
    }
}

fn call(name: &str, args: Vec<Operand>) -> Result<Operand> {
    match name {
        "success" => {
            arity(name, &args, 0, 0)?;
            Ok(Operand::Cond("\"$_GITHUB_JOB_STATUS\" == \"success\"".to_string()))
        },
        "failure" => {
            arity(name, &args, 0, 0)?;
            Ok(Operand::Cond("\"$_GITHUB_JOB_STATUS\" == \"failure\"".to_string()))
        },
        "always" => {
            arity(name, &args, 0, 0)?;
            Ok(Operand::Static(Value::Bool(true)))
        },
        "cancelled" => {
            arity(name, &args, 0, 0)?;
            Ok(Operand::Static(Value::Bool(false)))
        },
        "contains" => {
            arity(name, &args, 2, 2)?;
            Ok(match (&args[0], &args[1]) {
                (Operand::Static(Value::Array(list)), Operand::Static(item)) => {
                    Operand::Static(Value::Bool(list.iter().any(|v| compare(v, item) == Some(Ordering::Equal))))
                },
                (Operand::Static(haystack), Operand::Static(needle)) => {
                    let found = to_str(haystack).to_lowercase().contains(&to_str(needle).to_lowercase());
                    Operand::Static(Value::Bool(found))
                },
                (Operand::Static(Value::Array(list)), needle) => {
                    if list.is_empty() {
                        return Ok(Operand::Static(Value::Bool(false)));
                    }
                    let needle = needle.word();
                    Operand::Cond(list.iter()
                        .map(|v| format!("{} == {}", needle, quote(&to_str(v))))
                        .collect::<Vec<_>>()
                        .join(" || "))
                },
                (haystack, needle) => Operand::Cond(format!("{} == *{}*", haystack.word(), needle.word())),
            })
        },
        "startswith" | "endswith" => {
            arity(name, &args, 2, 2)?;
            let starts = name == "startswith";
            Ok(match (&args[0], &args[1]) {
                (Operand::Static(s), Operand::Static(p)) => {
                    let (s, p) = (to_str(s).to_lowercase(), to_str(p).to_lowercase());
                    Operand::Static(Value::Bool(if starts { s.starts_with(&p) } else { s.ends_with(&p) }))
                },
                (s, p) if starts => Operand::Cond(format!("{} == {}*", s.word(), p.word())),
                (s, p) => Operand::Cond(format!("{} == *{}", s.word(), p.word())),
            })
        },
        "format" => {
            arity(name, &args, 1, usize::MAX)?;
            let fmt = match &args[0] {
                Operand::Static(v) => to_str(v),
                _ => bail!(TranspileError::InvalidExpression("format string must be known".to_string())),
            };
            format(&fmt, &args[1..])
        },
        "join" => {
            arity(name, &args, 1, 2)?;
            let sep = match args.get(1) {
                Some(Operand::Static(v)) => to_str(v),
                Some(_) => bail!(TranspileError::InvalidExpression("join separator must be known".to_string())),
                None => ",".to_string(),
            };
            Ok(match &args[0] {
                Operand::Static(Value::Array(list)) => {
                    Operand::Static(Value::String(list.iter().map(to_str).collect::<Vec<_>>().join(&sep)))
                },
                other => other.clone(),
            })
        },
        "tojson" => {
            arity(name, &args, 1, 1)?;
            Ok(match &args[0] {
                Operand::Static(v) => Operand::Static(Value::String(serde_json::to_string_pretty(v)?)),
                other => other.clone(),
            })
        },
        "fromjson" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Operand::Static(v) => {
                    let parsed = serde_json::from_str(&to_str(v))
                        .map_err(|err| TranspileError::InvalidExpression(format!("fromJSON: {}", err)))?;
                    Ok(Operand::Static(parsed))
                },
                _ => bail!(TranspileError::InvalidExpression("fromJSON of a runtime value".to_string())),
            }
        },
        // the files are not there before the job runs
        "hashfiles" => Ok(Operand::Static(Value::String(String::new()))),
        _ => bail!(TranspileError::InvalidExpression(format!("Unknown function {:?}", name))),
    }
}

fn format(fmt: &str, args: &[Operand]) -> Result<Operand> {
    let mut words = Vec::new();
    let mut pending = String::new();
    let chars = fmt.chars().collect::<Vec<_>>();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                pending.push('{');
                i += 2;
            },
            '}' if chars.get(i + 1) == Some(&'}') => {
                pending.push('}');
                i += 2;
            },
            '{' => {
                let end = chars[i..].iter().position(|c| *c == '}')
                    .ok_or_else(|| TranspileError::InvalidExpression(format!("Unclosed placeholder in {:?}", fmt)))?;
                let idx = chars[i + 1..i + end].iter().collect::<String>().parse::<usize>()
                    .map_err(|_| TranspileError::InvalidExpression(format!("Invalid placeholder in {:?}", fmt)))?;
                let arg = args.get(idx)
                    .ok_or_else(|| TranspileError::InvalidExpression(format!("Missing argument {} for {:?}", idx, fmt)))?;
                match arg {
                    Operand::Static(v) => pending.push_str(&to_str(v)),
                    dynamic => {
                        if !pending.is_empty() {
                            words.push(quote(&pending));
                            pending.clear();
                        }
                        words.push(dynamic.word());
                    },
                }
                i += end + 1;
            },
            c => {
                pending.push(c);
                i += 1;
            },
        }
    }

    if words.is_empty() {
        Ok(Operand::Static(Value::String(pending)))
    } else {
        if !pending.is_empty() {
            words.push(quote(&pending));
        }
        Ok(Operand::Word(words.concat()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contexts() -> Contexts {
        let mut ctx = Contexts::new();
        ctx.set("matrix", json!({"os": "ubuntu-20.04", "java": 11, "Flag": true}));
        ctx.set("github", json!({"repository": "alibaba/transmittable-thread-local", "event_name": "push"}));
        ctx.set("secrets", json!({}));
        let mut env = IndexMap::new();
        env.insert("MAVEN_OPTS".to_string(), "-Xmx2g".to_string());
        ctx.with_env(&env)
    }

    fn eval(src: &str) -> Operand {
        contexts().evaluate(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn literals() {
        assert_eq!(eval("true"), Operand::Static(json!(true)));
        assert_eq!(eval("null"), Operand::Static(Value::Null));
        assert_eq!(eval("0xff"), Operand::Static(json!(255)));
        assert_eq!(eval("-2.5"), Operand::Static(json!(-2.5)));
        assert_eq!(eval("'it''s'"), Operand::Static(json!("it's")));
    }

    #[test]
    fn context_lookup() {
        assert_eq!(eval("${{ matrix.os }}"), Operand::Static(json!("ubuntu-20.04")));
        assert_eq!(eval("matrix.flag"), Operand::Static(json!(true)));
        assert_eq!(eval("matrix['java']"), Operand::Static(json!(11)));
        assert_eq!(eval("matrix.missing"), Operand::Static(Value::Null));
        assert_eq!(eval("secrets.TOKEN"), Operand::Static(Value::Null));
        assert_eq!(eval("env.MAVEN_OPTS"), Operand::Static(json!("-Xmx2g")));
    }

    #[test]
    fn runtime_contexts() {
        assert_eq!(eval("env.FROM_STEP"), Operand::Word("\"${CURRENT_ENV_MAP[FROM_STEP]:-${FROM_STEP:-}}\"".to_string()));
        assert_eq!(eval("steps.build-it.outcome"), Operand::Word("\"${_CONTEXT_STEPS_BUILD_IT_OUTCOME:-}\"".to_string()));
    }

    #[test]
    fn static_comparisons() {
        assert_eq!(eval("matrix.os == 'UBUNTU-20.04'"), Operand::Static(json!(true)));
        assert_eq!(eval("matrix.java >= 8 && matrix.java < '17'"), Operand::Static(json!(true)));
        assert_eq!(eval("'' == 0"), Operand::Static(json!(true)));
        assert_eq!(eval("null != false"), Operand::Static(json!(false)));
        assert_eq!(eval("!matrix.flag || github.event_name"), Operand::Static(json!("push")));
    }

    #[test]
    fn static_functions() {
        assert_eq!(eval("contains(github.repository, 'THREAD')"), Operand::Static(json!(true)));
        assert_eq!(eval("contains(fromJSON('[\"a\", \"b\"]'), 'b')"), Operand::Static(json!(true)));
        assert_eq!(eval("startsWith(matrix.os, 'ubuntu')"), Operand::Static(json!(true)));
        assert_eq!(eval("endsWith(matrix.os, '18.04')"), Operand::Static(json!(false)));
        assert_eq!(eval("format('{0}-{1} {{x}}', matrix.os, matrix.java)"), Operand::Static(json!("ubuntu-20.04-11 {x}")));
        assert_eq!(eval("join(fromJSON('[1, 2]'), '+')"), Operand::Static(json!("1+2")));
    }

    #[test]
    fn status_functions_are_compiled() {
        assert_eq!(eval("always()"), Operand::Static(json!(true)));
        assert_eq!(eval("success() && matrix.flag"), Operand::Cond("\"$_GITHUB_JOB_STATUS\" == \"success\"".to_string()));
        assert_eq!(eval("success() && !matrix.flag"), Operand::Static(json!(false)));
        assert_eq!(eval("failure() || cancelled()"), Operand::Cond("\"$_GITHUB_JOB_STATUS\" == \"failure\"".to_string()));
    }

    #[test]
    fn step_if_defaults_to_success() {
        let ctx = contexts();
        let default = ctx.step_if(None).unwrap();
        assert_eq!(default, "$([[ \"$_GITHUB_JOB_STATUS\" == \"success\" ]] && echo true || echo false)");
        assert_eq!(ctx.step_if(Some(&json!("${{ matrix.os == 'ubuntu-20.04' }}"))).unwrap(), default);
        assert_eq!(ctx.step_if(Some(&json!("always()"))).unwrap(), "true");
        assert_eq!(ctx.step_if(Some(&json!("matrix.java == 8"))).unwrap(), "false");
    }

    #[test]
    fn step_outcome_condition() {
        let ctx = contexts();
        let cond = ctx.step_if(Some(&json!("failure() && steps.test.outcome == 'failure'"))).unwrap();
        assert_eq!(cond, "$([[ ( \"$_GITHUB_JOB_STATUS\" == \"failure\" ) && ( \"${_CONTEXT_STEPS_TEST_OUTCOME:-}\" == failure ) ]] && echo true || echo false)");
    }

    #[test]
    fn continue_on_error_flag() {
        let ctx = contexts();
        assert_eq!(ctx.flag(None).unwrap(), "false");
        assert_eq!(ctx.flag(Some(&json!(true))).unwrap(), "true");
        assert_eq!(ctx.flag(Some(&json!("${{ matrix.java == 11 }}"))).unwrap(), "true");
    }

    #[test]
    fn substitute_quotes_static_parts() {
        let ctx = contexts();
        assert_eq!(ctx.substitute("mvn -B test").unwrap(), "'mvn -B test'");
        assert_eq!(ctx.substitute("echo ${{ matrix.os }}").unwrap(), "'echo ubuntu-20.04'");
        assert_eq!(ctx.substitute("echo ${{ env.LATER }} done").unwrap(),
            "'echo '\"${CURRENT_ENV_MAP[LATER]:-${LATER:-}}\"' done'");
        assert_eq!(ctx.substitute("").unwrap(), "''");
    }

    #[test]
    fn interpolate_names() {
        let ctx = contexts();
        assert_eq!(ctx.interpolate("build (${{ matrix.os }}, ${{ matrix.java }})"), "build (ubuntu-20.04, 11)");
        assert_eq!(ctx.interpolate("x ${{ steps.a.outcome }}"), "x ${{ steps.a.outcome }}");
    }

    #[test]
    fn invalid_expressions() {
        assert!(parse("matrix.os ==").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse("(a").is_err());
        let err = contexts().evaluate(&parse("nope()").unwrap()).unwrap_err();
        assert!(err.downcast_ref::<TranspileError>().is_some());
    }
}
