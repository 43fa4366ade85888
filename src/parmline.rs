//! The parameter-line wire codec.
//!
//! A `ParmLine` is one CRLF-terminated TeamTalk protocol frame: an event or
//! command keyword followed by zero or more `name=value` parameters. Values
//! come in three flavors: signed integers, quoted escaped strings, and
//! bracketed comma-separated integer lists.
//!
//! ```text
//! line    = keyword *( SP parm )
//! keyword = ALPHA / "_" *( ALPHA / DIGIT / "_" / "-" )
//! parm    = name "=" value
//! value   = int / string / list
//! ```

use nom::{combinator::recognize, sequence::pair, IResult};

use crate::error::ParmLineParseError;

/// A single typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Parm {
    /// A bare keyword with no `=value` part (used for the event/command
    /// keyword itself, and occasionally for flag-style parameters).
    Keyword,
    /// A signed integer.
    Int(i64),
    /// A quoted string. Carries both views described by the wire grammar:
    /// `raw` is the decoded text, `encoded` is what appears on the wire.
    Str(ParmString),
    /// A bracketed list of integers.
    List(Vec<i64>),
}

/// The two views of a string parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParmString {
    /// Decoded text: real `\n`/`\r`/`\\` bytes.
    pub raw: String,
}

impl ParmString {
    /// Build from already-decoded (raw) text.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Build by decoding wire-encoded text (`\\`, `\n`, `\r` escapes).
    fn from_encoded(encoded: &str) -> Self {
        let mut raw = String::with_capacity(encoded.len());
        let mut chars = encoded.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => raw.push('\n'),
                    Some('r') => raw.push('\r'),
                    Some('"') => raw.push('"'),
                    Some('\\') => raw.push('\\'),
                    Some(other) => {
                        raw.push('\\');
                        raw.push(other);
                    }
                    None => raw.push('\\'),
                }
            } else {
                raw.push(c);
            }
        }
        Self { raw }
    }

    /// The wire-encoded form: `\\`, `\n`, `\r` escaped, without surrounding
    /// quotes.
    pub fn encoded(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for c in self.raw.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '"' => out.push_str("\\\""),
                _ => out.push(c),
            }
        }
        out
    }
}

/// A parsed protocol frame: an event keyword plus ordered parameters.
///
/// Duplicate parameter names are not supported; the last one wins, matching
/// the wire format's own inability to express duplicates meaningfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ParmLine {
    /// The event or command keyword.
    pub event: String,
    /// Parameters in wire order.
    pub parms: Vec<(String, Parm)>,
}

impl ParmLine {
    /// Construct a frame with no parameters.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            parms: Vec::new(),
        }
    }

    /// Append a parameter, replacing an existing one of the same name
    /// (case-insensitive).
    pub fn with_parm(mut self, name: impl Into<String>, value: Parm) -> Self {
        self.set(name, value);
        self
    }

    /// Set (or replace) a parameter.
    pub fn set(&mut self, name: impl Into<String>, value: Parm) {
        let name = name.into();
        if let Some(slot) = self
            .parms
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            self.parms.push((name, value));
        }
    }

    /// Look up a parameter by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Parm> {
        self.parms
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Look up a string parameter's raw value.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Parm::Str(s) => Some(s.raw.as_str()),
            _ => None,
        }
    }

    /// Look up an integer parameter's value.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Parm::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Parse one strict-mode wire line (no surrounding CRLF).
    pub fn parse(line: &str) -> Result<Self, ParmLineParseError> {
        Self::parse_inner(line, false)
    }

    /// Parse one line in relaxed mode, as used for user-typed command
    /// lines: bare non-whitespace tokens are accepted as keywords, and
    /// string values need not be quoted.
    pub fn parse_relaxed(line: &str) -> Result<Self, ParmLineParseError> {
        Self::parse_inner(line, true)
    }

    fn parse_inner(line: &str, relaxed: bool) -> Result<Self, ParmLineParseError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ParmLineParseError::EmptyLine);
        }

        let mut rest = trimmed;
        let (event, next) = parse_keyword(rest, relaxed)?;
        rest = next;
        let mut parms = Vec::new();

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let (name, next) = parse_keyword(rest, relaxed)?;
            rest = next;
            if !rest.starts_with('=') {
                parms.push((name.to_string(), Parm::Keyword));
                continue;
            }
            rest = &rest[1..];
            let (value, next) = parse_value(rest, relaxed)?;
            rest = next;
            parms.push((name.to_string(), value));
        }

        Ok(ParmLine {
            event: event.to_string(),
            parms,
        })
    }

    /// Serialize back to wire form (no trailing CRLF; the transport layer
    /// appends that).
    pub fn to_line(&self) -> String {
        let mut out = self.event.clone();
        for (name, value) in &self.parms {
            out.push(' ');
            out.push_str(name);
            match value {
                Parm::Keyword => {}
                Parm::Int(n) => {
                    out.push('=');
                    out.push_str(&n.to_string());
                }
                Parm::Str(s) => {
                    out.push('=');
                    out.push('"');
                    out.push_str(&s.encoded());
                    out.push('"');
                }
                Parm::List(items) => {
                    out.push('=');
                    out.push('[');
                    let joined = items
                        .iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    out.push_str(&joined);
                    out.push(']');
                }
            }
        }
        out
    }
}

impl std::fmt::Display for ParmLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn raw_keyword(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        nom::branch::alt((nom::character::complete::alpha1, nom::bytes::complete::tag("_"))),
        nom::multi::many0(nom::branch::alt((
            nom::character::complete::alphanumeric1,
            nom::bytes::complete::tag("_"),
            nom::bytes::complete::tag("-"),
        ))),
    ))(input)
}

fn parse_keyword(input: &str, relaxed: bool) -> Result<(&str, &str), ParmLineParseError> {
    if let Ok((rest, kw)) = raw_keyword(input) {
        return Ok((kw, rest));
    }
    if relaxed {
        // Relaxed mode: a bare run of non-whitespace, non-`=` characters.
        let end = input
            .find(|c: char| c.is_whitespace())
            .unwrap_or(input.len());
        if end == 0 {
            return Err(ParmLineParseError::InvalidKeyword(input.to_string()));
        }
        return Ok((&input[..end], &input[end..]));
    }
    Err(ParmLineParseError::InvalidKeyword(input.to_string()))
}

fn parse_value(input: &str, relaxed: bool) -> Result<(Parm, &str), ParmLineParseError> {
    if let Some(rest) = input.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| ParmLineParseError::InvalidList(input.to_string()))?;
        let body = &rest[..end];
        let items = if body.is_empty() {
            Vec::new()
        } else {
            body.split(',')
                .map(|s| {
                    s.trim()
                        .parse::<i64>()
                        .map_err(|_| ParmLineParseError::InvalidList(input.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        return Ok((Parm::List(items), &rest[end + 1..]));
    }

    if input.starts_with(|c: char| c == '-' || c.is_ascii_digit()) {
        let (digits, rest) = split_int(input);
        return digits
            .parse::<i64>()
            .map(|n| (Parm::Int(n), rest))
            .map_err(|_| ParmLineParseError::InvalidInt(input.to_string()));
    }

    parse_string(input, relaxed)
}

fn split_int(input: &str) -> (&str, &str) {
    let bytes = input.as_bytes();
    let mut i = 0;
    if bytes.first() == Some(&b'-') {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    (&input[..i], &input[i..])
}

fn parse_string(input: &str, relaxed: bool) -> Result<(Parm, &str), ParmLineParseError> {
    if let Some(after_quote) = input.strip_prefix('"') {
        let mut encoded = String::new();
        let mut chars = after_quote.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c == '\\' {
                // Consume the escaped character verbatim; decoding happens
                // once in `ParmString::from_encoded`.
                encoded.push(c);
                if let Some(&(_, esc)) = chars.peek() {
                    encoded.push(esc);
                    chars.next();
                }
                continue;
            }
            if c == '"' {
                let rest = &after_quote[idx + 1..];
                return Ok((Parm::Str(ParmString::from_encoded(&encoded)), rest));
            }
            encoded.push(c);
        }
        return Err(ParmLineParseError::InvalidString(input.to_string()));
    }

    if !relaxed {
        return Err(ParmLineParseError::InvalidString(input.to_string()));
    }

    // Relaxed mode: an unquoted value runs to the next whitespace.
    let end = input
        .find(|c: char| c.is_whitespace())
        .unwrap_or(input.len());
    Ok((
        Parm::Str(ParmString::from_raw(&input[..end])),
        &input[end..],
    ))
}

/// Convenience constructor for a string parameter from raw (decoded) text.
pub fn str_parm(raw: impl Into<String>) -> Parm {
    Parm::Str(ParmString::from_raw(raw))
}

/// Render any typed parameter value as plain text, the way it would
/// appear stored in an [`crate::attrdict::AttrDict`].
pub fn parm_to_text(p: &Parm) -> String {
    match p {
        Parm::Keyword => String::new(),
        Parm::Int(n) => n.to_string(),
        Parm::Str(s) => s.raw.clone(),
        Parm::List(items) => format!(
            "[{}]",
            items.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
        ),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn keyword() -> impl Strategy<Value = String> {
        "[a-zA-Z_][a-zA-Z0-9_]{0,15}"
    }

    fn plain_word() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ]{0,20}"
    }

    fn parm_value() -> impl Strategy<Value = Parm> {
        prop_oneof![
            any::<i64>().prop_map(Parm::Int),
            plain_word().prop_map(str_parm),
            prop::collection::vec(any::<i64>(), 0..5).prop_map(Parm::List),
        ]
    }

    proptest! {
        #[test]
        fn round_trip_any_line(event in keyword(), parms in prop::collection::vec((keyword(), parm_value()), 0..6)) {
            let mut line = ParmLine::new(event);
            for (name, value) in parms {
                line = line.with_parm(name, value);
            }
            let serialized = line.to_line();
            let reparsed = ParmLine::parse(&serialized).expect("serialized line must reparse");
            prop_assert_eq!(line, reparsed);
        }

        #[test]
        fn parsing_never_panics(s in "\\PC{0,80}") {
            let _ = ParmLine::parse(&s);
            let _ = ParmLine::parse_relaxed(&s);
        }
    }
}
