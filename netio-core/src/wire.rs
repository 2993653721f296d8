//! Datagram framing: split received bytes into tokens, build bounded outgoing packets.

use crate::protocol::{Token, MTU};

/// Iterate the tokens of one received datagram.
///
/// Bytes after an embedded NUL are ignored, empty lines are skipped and a
/// trailing `\r` is tolerated. Lines that are not UTF-8 come out as `Unknown`.
pub fn tokens(datagram: &[u8]) -> impl Iterator<Item = Token<'_>> {
    let end = datagram
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(datagram.len());
    datagram[..end]
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| match std::str::from_utf8(line) {
            Ok(s) => Token::parse(s.strip_suffix('\r').unwrap_or(s)),
            Err(_) => Token::Unknown(""),
        })
}

/// Cut a datagram that filled the receive buffer back to its last complete
/// line. Anything past the buffer was discarded by the kernel, so an
/// unterminated final line may be the prefix of a longer token.
pub fn complete_lines(datagram: &[u8]) -> &[u8] {
    match datagram.iter().rposition(|&b| b == b'\n') {
        Some(i) => &datagram[..=i],
        None => &[],
    }
}

/// Outgoing datagram of newline-terminated tokens, capped at a byte budget.
///
/// A line that would exceed the cap is dropped whole; the packet stays valid.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: String,
    cap: usize,
    dropped: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self::with_cap(MTU)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
            dropped: 0,
        }
    }

    /// Append one token line. Returns false when it did not fit.
    pub fn push(&mut self, token: &Token<'_>) -> bool {
        let line = format!("{}\n", token);
        if self.buf.len() + line.len() > self.cap {
            self.dropped += 1;
            return false;
        }
        self.buf.push_str(&line);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Lines that did not fit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single token as a complete datagram.
pub fn encode(token: &Token<'_>) -> Vec<u8> {
    format!("{}\n", token).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::format_value;

    #[test]
    fn parses_mixed_datagram() {
        let dgram = b"*ping\nlamp=1.500000\nlevel>0.25\n*msg 7 open door\n*ack 0x10 done\n*bogus\nnoise\n";
        let toks: Vec<Token> = tokens(dgram).collect();
        assert_eq!(
            toks,
            vec![
                Token::Ping,
                Token::Assign { name: "lamp", value: 1.5 },
                Token::Write { name: "level", value: 0.25 },
                Token::Msg { id: 7, text: "open door" },
                Token::Ack { id: 16, text: "done" },
                Token::Unknown("*bogus"),
                Token::Unknown("noise"),
            ]
        );
    }

    #[test]
    fn stops_at_nul_and_skips_blank_lines() {
        let dgram = b"\n*keepalive\r\n\nx=1\0y=2\n";
        let toks: Vec<Token> = tokens(dgram).collect();
        assert_eq!(toks, vec![Token::Keepalive, Token::Assign { name: "x", value: 1.0 }]);
    }

    #[test]
    fn bad_numbers_are_invalid() {
        let toks: Vec<Token> = tokens(b"x=abc\n=1\n*msg zz hi\n").collect();
        assert_eq!(
            toks,
            vec![
                Token::Invalid("x=abc"),
                Token::Invalid("=1"),
                Token::Invalid("*msg zz hi"),
            ]
        );
    }

    #[test]
    fn value_formatting_matches_printf() {
        assert_eq!(format_value(1.5), "1.500000");
        assert_eq!(format_value(-0.125), "-0.125000");
        assert_eq!(format_value(f64::NAN), "nan");
        assert_eq!(format_value(f64::NEG_INFINITY), "-inf");
        let back: Vec<Token> = tokens(b"x=nan\n").collect();
        assert!(matches!(back[0], Token::Assign { value, .. } if value.is_nan()));
    }

    #[test]
    fn packet_truncates_whole_lines() {
        let mut p = Packet::with_cap(24);
        assert!(p.push(&Token::Assign { name: "a", value: 1.0 }));
        assert!(p.push(&Token::Assign { name: "b", value: 2.0 }));
        assert!(!p.push(&Token::Assign { name: "c", value: 3.0 }));
        assert_eq!(p.as_bytes(), b"a=1.000000\nb=2.000000\n");
        assert_eq!(p.dropped(), 1);
    }

    #[test]
    fn truncated_datagram_loses_cut_line() {
        let cut = complete_lines(b"a=1\n*keepalive\nx=12");
        assert_eq!(cut, b"a=1\n*keepalive\n");
        let toks: Vec<Token> = tokens(cut).collect();
        assert_eq!(toks, vec![Token::Assign { name: "a", value: 1.0 }, Token::Keepalive]);

        assert_eq!(complete_lines(b"a=1\n"), b"a=1\n");
        assert!(complete_lines(b"no newline at all").is_empty());
    }

    #[test]
    fn msg_without_text() {
        let toks: Vec<Token> = tokens(b"*msg 3").collect();
        assert_eq!(toks, vec![Token::Msg { id: 3, text: "" }]);
        assert_eq!(encode(&Token::Ack { id: 3, text: "ok" }), b"*ack 3 ok\n");
    }
}
