//! netio wire protocol: token types and limits.
//!
//! A datagram is a sequence of newline-separated ASCII lines, each one token.
//! Special tokens start with `*`; everything else is a `name=value` update or a
//! `name>value` write request.

use std::fmt;

/// Largest datagram the protocol emits. Longer bursts are truncated.
pub const MTU: usize = 1500;

/// Ack text sent on behalf of an application that never acknowledged a message.
pub const IGNORED_ACK: &str = "##ignored";

/// One line of a datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Liveness probe; answered with `Pong`.
    Ping,
    Pong,
    /// Publisher to subscriber: still publishing.
    Keepalive,
    /// Subscriber to publisher: keep sending updates.
    Subscribe,
    /// Start of a full snapshot.
    Initial,
    /// Application message.
    Msg { id: u32, text: &'a str },
    /// Acknowledgment of message `id`.
    Ack { id: u32, text: &'a str },
    /// Producer to consumer update.
    Assign { name: &'a str, value: f64 },
    /// Consumer to producer write request.
    Write { name: &'a str, value: f64 },
    /// Recognized shape with an unparseable number.
    Invalid(&'a str),
    /// Not a netio token; ignored.
    Unknown(&'a str),
}

impl<'a> Token<'a> {
    /// Parse one line (without its newline).
    pub fn parse(line: &'a str) -> Token<'a> {
        if let Some(cmd) = line.strip_prefix('*') {
            return parse_special(line, cmd);
        }
        let Some(pos) = line.find(|c| c == '=' || c == '>') else {
            return Token::Unknown(line);
        };
        let name = &line[..pos];
        if name.is_empty() {
            return Token::Invalid(line);
        }
        let Some(value) = parse_value(&line[pos + 1..]) else {
            return Token::Invalid(line);
        };
        if line.as_bytes()[pos] == b'=' {
            Token::Assign { name, value }
        } else {
            Token::Write { name, value }
        }
    }
}

fn parse_special<'a>(line: &'a str, cmd: &'a str) -> Token<'a> {
    let (word, rest) = match cmd.split_once(' ') {
        Some((w, r)) => (w, Some(r)),
        None => (cmd, None),
    };
    match (word, rest) {
        ("ping", _) => Token::Ping,
        ("pong", _) => Token::Pong,
        ("keepalive", _) => Token::Keepalive,
        ("subscribe", _) => Token::Subscribe,
        ("initial", _) => Token::Initial,
        ("msg", Some(rest)) | ("ack", Some(rest)) => {
            let (id, text) = match rest.split_once(' ') {
                Some((id, text)) => (id, text),
                None => (rest, ""),
            };
            let Some(id) = parse_id(id) else {
                return Token::Invalid(line);
            };
            if word == "msg" {
                Token::Msg { id, text }
            } else {
                Token::Ack { id, text }
            }
        }
        _ => Token::Unknown(line),
    }
}

fn parse_id(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Parse a parameter value as written by [`format_value`].
pub fn parse_value(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// Format a value like C `%lf`: six decimals, `nan`, `inf`, `-inf`.
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        let s = if v > 0.0 { "inf" } else { "-inf" };
        s.to_string()
    } else {
        format!("{:.6}", v)
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ping => f.write_str("*ping"),
            Token::Pong => f.write_str("*pong"),
            Token::Keepalive => f.write_str("*keepalive"),
            Token::Subscribe => f.write_str("*subscribe"),
            Token::Initial => f.write_str("*initial"),
            Token::Msg { id, text } => write!(f, "*msg {} {}", id, text),
            Token::Ack { id, text } => write!(f, "*ack {} {}", id, text),
            Token::Assign { name, value } => write!(f, "{}={}", name, format_value(*value)),
            Token::Write { name, value } => write!(f, "{}>{}", name, format_value(*value)),
            Token::Invalid(s) | Token::Unknown(s) => f.write_str(s),
        }
    }
}
