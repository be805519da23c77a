//! Python literals as they show up in parameterized test names.
//!
//! Only what `ast.literal_eval` would accept for containers of plain values is
//! supported: tuples, lists, dicts, sets, strings, bytes, numbers, `True`,
//! `False` and `None`. Printing follows `repr` with dict keys and set members
//! sorted, so two spellings of the same value print the same way.

use std::cmp::Ordering;
use std::error;
use std::fmt;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
    Set(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: usize,
    pub msg: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid python literal at {}: {}", self.pos, self.msg)
    }
}

impl error::Error for ParseError {}

impl Literal {
    fn rank(&self) -> u8 {
        match self {
            Literal::None => 0,
            Literal::Bool(_) | Literal::Int(_) | Literal::Float(_) => 1,
            Literal::Str(_) => 2,
            Literal::Bytes(_) => 3,
            Literal::Tuple(_) => 4,
            Literal::List(_) => 5,
            Literal::Dict(_) => 6,
            Literal::Set(_) => 7,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Total order used to sort dict keys and set members.
    fn sort_cmp(&self, other: &Literal) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => (),
            ord => return ord,
        }
        match (self, other) {
            (Literal::Str(a), Literal::Str(b)) => a.cmp(b),
            (Literal::Bytes(a), Literal::Bytes(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => self.to_string().cmp(&other.to_string()),
            },
        }
    }
}

fn write_str_repr(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{}", c)?,
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

fn write_bytes_repr(f: &mut fmt::Formatter<'_>, b: &[u8]) -> fmt::Result {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { b'"' } else { b'\'' };
    write!(f, "b{}", quote as char)?;
    for &c in b {
        match c {
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{}", c as char)?,
            0x20..=0x7e => f.write_char(c as char)?,
            c => write!(f, "\\x{:02x}", c)?,
        }
    }
    f.write_char(quote as char)
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[&Literal]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("None"),
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) if x.is_nan() => f.write_str("nan"),
            Literal::Float(x) if x.is_infinite() => f.write_str(if *x > 0.0 { "inf" } else { "-inf" }),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write_str_repr(f, s),
            Literal::Bytes(b) => write_bytes_repr(f, b),
            Literal::Tuple(items) => {
                f.write_char('(')?;
                write_seq(f, &items.iter().collect::<Vec<_>>())?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            },
            Literal::List(items) => {
                f.write_char('[')?;
                write_seq(f, &items.iter().collect::<Vec<_>>())?;
                f.write_char(']')
            },
            Literal::Set(items) => {
                let mut items = items.iter().collect::<Vec<_>>();
                items.sort_by(|a, b| a.sort_cmp(b));
                f.write_char('{')?;
                write_seq(f, &items)?;
                f.write_char('}')
            },
            Literal::Dict(pairs) => {
                let mut pairs = pairs.iter().collect::<Vec<_>>();
                pairs.sort_by(|(a, _), (b, _)| a.sort_cmp(b));
                f.write_char('{')?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_char('}')
            },
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

type PResult<T> = std::result::Result<T, ParseError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Parser<'a> {
        Parser { src, pos: 0 }
    }

    fn err<T>(&self, msg: &'static str) -> PResult<T> {
        Err(ParseError { pos: self.pos, msg })
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.src.len()
    }

    /// Comma separated values up to `close`, returns the values and whether a comma was seen.
    fn items(&mut self, close: char) -> PResult<(Vec<Literal>, bool)> {
        let mut items = Vec::new();
        let mut comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, comma));
            }
            items.push(self.value()?);
            if self.eat(',') {
                comma = true;
            } else if self.eat(close) {
                return Ok((items, comma));
            } else {
                return self.err("expected comma");
            }
        }
    }

    fn value(&mut self) -> PResult<Literal> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let (mut items, comma) = self.items(')')?;
                if items.len() == 1 && !comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Literal::Tuple(items))
                }
            },
            Some('[') => {
                self.bump();
                Ok(Literal::List(self.items(']')?.0))
            },
            Some('{') => {
                self.bump();
                self.dict_or_set()
            },
            Some('\'') | Some('"') => self.string(false, false),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.word(),
            Some(_) => self.err("unexpected character"),
            None => self.err("unexpected end"),
        }
    }

    fn dict_or_set(&mut self) -> PResult<Literal> {
        if self.eat('}') {
            return Ok(Literal::Dict(Vec::new()));
        }
        let first = self.value()?;
        if self.eat(':') {
            let mut pairs = vec![(first, self.value()?)];
            loop {
                if self.eat('}') {
                    return Ok(Literal::Dict(pairs));
                }
                if !self.eat(',') {
                    return self.err("expected comma");
                }
                if self.eat('}') {
                    return Ok(Literal::Dict(pairs));
                }
                let key = self.value()?;
                if !self.eat(':') {
                    return self.err("expected colon");
                }
                pairs.push((key, self.value()?));
            }
        }

        let mut items = vec![first];
        if self.eat(',') {
            items.extend(self.items('}')?.0);
        } else if !self.eat('}') {
            return self.err("expected comma");
        }
        Ok(Literal::Set(items))
    }

    fn word(&mut self) -> PResult<Literal> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];
        let prefix = word.to_ascii_lowercase();
        match word {
            "None" => Ok(Literal::None),
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            _ if matches!(self.peek(), Some('\'') | Some('"')) && matches!(prefix.as_str(), "u" | "r" | "b" | "br" | "rb") => {
                self.string(prefix.contains('r'), prefix.contains('b'))
            },
            _ => {
                self.pos = start;
                self.err("not a literal")
            },
        }
    }

    fn number(&mut self) -> PResult<Literal> {
        let start = self.pos;
        let negative = match self.peek() {
            Some('-') => {
                self.bump();
                true
            },
            Some('+') => {
                self.bump();
                false
            },
            _ => false,
        };
        self.skip_ws();

        let body_start = self.pos;
        while let Some(c) = self.peek() {
            let after_exp = self.pos > body_start
                && matches!(self.src[..self.pos].chars().last(), Some('e') | Some('E'));
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || (after_exp && (c == '-' || c == '+')) {
                self.bump();
            } else {
                break;
            }
        }
        let body = self.src[body_start..self.pos].replace('_', "");
        if body.is_empty() {
            self.pos = start;
            return self.err("expected number");
        }

        let lower = body.to_ascii_lowercase();
        let int = if let Some(hex) = lower.strip_prefix("0x") {
            i128::from_str_radix(hex, 16).ok()
        } else if let Some(oct) = lower.strip_prefix("0o") {
            i128::from_str_radix(oct, 8).ok()
        } else if let Some(bin) = lower.strip_prefix("0b") {
            i128::from_str_radix(bin, 2).ok()
        } else {
            lower.parse::<i128>().ok()
        };

        if let Some(i) = int {
            return Ok(Literal::Int(if negative { -i } else { i }));
        }
        match lower.parse::<f64>() {
            Ok(x) if !lower.starts_with("inf") && !lower.starts_with("nan") => {
                Ok(Literal::Float(if negative { -x } else { x }))
            },
            _ => {
                self.pos = start;
                self.err("invalid number")
            },
        }
    }

    fn string(&mut self, raw: bool, bytes: bool) -> PResult<Literal> {
        let quote = match self.bump() {
            Some(q) => q,
            None => return self.err("unexpected end"),
        };
        let triple = self.rest().starts_with(&format!("{}{}", quote, quote)[..]);
        if triple {
            self.bump();
            self.bump();
        }

        let mut out = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => return self.err("unterminated string"),
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.rest().starts_with(&format!("{}{}", quote, quote)[..]) {
                    self.bump();
                    self.bump();
                    break;
                }
                out.push(c);
                continue;
            }
            if c != '\\' || raw {
                if c == '\\' {
                    // a raw string still can't end in an escaped quote
                    out.push(c);
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                    continue;
                }
                out.push(c);
                continue;
            }
            let esc = match self.bump() {
                Some(e) => e,
                None => return self.err("unterminated escape"),
            };
            match esc {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                '0' => out.push('\0'),
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                '\n' => (),
                'x' => out.push(self.hex_escape(2)?),
                'u' if !bytes => out.push(self.hex_escape(4)?),
                'U' if !bytes => out.push(self.hex_escape(8)?),
                other => {
                    out.push('\\');
                    out.push(other);
                },
            }
        }

        if bytes {
            let mut buf = Vec::with_capacity(out.len());
            for c in out.chars() {
                match u8::try_from(c as u32) {
                    Ok(b) => buf.push(b),
                    Err(_) => return self.err("non-ascii in bytes"),
                }
            }
            Ok(Literal::Bytes(buf))
        } else {
            Ok(Literal::Str(out))
        }
    }

    fn hex_escape(&mut self, len: usize) -> PResult<char> {
        let digits = match self.rest().get(..len) {
            Some(d) => d,
            None => return self.err("short escape"),
        };
        let code = match u32::from_str_radix(digits, 16) {
            Ok(code) => code,
            Err(_) => return self.err("invalid escape"),
        };
        self.pos += len;
        match char::from_u32(code) {
            Some(c) => Ok(c),
            None => self.err("invalid escape"),
        }
    }
}

/// Parse a single literal, trailing input is an error.
pub fn parse(src: &str) -> PResult<Literal> {
    let mut parser = Parser::new(src);
    let value = parser.value()?;
    if !parser.at_end() {
        return parser.err("trailing input");
    }
    Ok(value)
}

/// Parse the inside of a call's parentheses, `1, (2, 3), {'a': 1}`.
pub fn parse_args(src: &str) -> PResult<Vec<Literal>> {
    let mut parser = Parser::new(src);
    let mut args = Vec::new();
    loop {
        if parser.at_end() {
            return Ok(args);
        }
        args.push(parser.value()?);
        if parser.at_end() {
            return Ok(args);
        }
        if !parser.eat(',') {
            return parser.err("expected comma");
        }
    }
}
