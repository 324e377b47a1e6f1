//! HTTP-or-not classification of a connection's first bytes.
//!
//! # Responsibilities
//! - Decide whether buffered bytes begin a well-formed HTTP/1.x request
//! - Distinguish "not HTTP" from "need more bytes"
//! - Carry the reason a connection was judged non-HTTP

use std::fmt;

/// Maximum number of headers examined during classification.
const MAX_HEADERS: usize = 64;

/// Outcome of inspecting the bytes buffered so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The buffer begins with a complete, syntactically valid request head.
    Http,
    /// The buffer cannot be the start of an HTTP request.
    NotHttp(ParseFailure),
    /// More bytes are needed to decide either way.
    Undecided,
}

/// Why classification decided against HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    /// The bytes violate HTTP/1.x syntax.
    Syntax(httparse::Error),
    /// The request head grew past the sniff limit without completing.
    HeadTooLarge,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::Syntax(e) => write!(f, "invalid HTTP: {}", e),
            ParseFailure::HeadTooLarge => write!(f, "request head exceeds sniff limit"),
        }
    }
}

impl std::error::Error for ParseFailure {}

/// Classify the bytes read from a connection so far.
///
/// `limit` bounds how long a partial-but-valid head may keep the decision
/// open; past it, the connection is treated as non-HTTP, the same way an
/// HTTP server would fail an oversized request head.
pub fn classify(buf: &[u8], limit: usize) -> Verdict {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => Verdict::Http,
        Ok(httparse::Status::Partial) if buf.len() >= limit => {
            Verdict::NotHttp(ParseFailure::HeadTooLarge)
        }
        Ok(httparse::Status::Partial) => Verdict::Undecided,
        Err(e) => Verdict::NotHttp(ParseFailure::Syntax(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 16 * 1024;

    #[test]
    fn complete_request_is_http() {
        let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(classify(data, LIMIT), Verdict::Http);
    }

    #[test]
    fn request_with_body_bytes_is_http() {
        let data = b"POST /api HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nabcd";
        assert_eq!(classify(data, LIMIT), Verdict::Http);
    }

    #[test]
    fn partial_request_is_undecided() {
        assert_eq!(classify(b"GET / HT", LIMIT), Verdict::Undecided);
        assert_eq!(
            classify(b"GET / HTTP/1.1\r\nHost: example.com", LIMIT),
            Verdict::Undecided
        );
    }

    #[test]
    fn empty_buffer_is_undecided() {
        assert_eq!(classify(b"", LIMIT), Verdict::Undecided);
    }

    #[test]
    fn game_handshake_is_not_http() {
        assert!(matches!(
            classify(b"BZFLAG\n\n", LIMIT),
            Verdict::NotHttp(ParseFailure::Syntax(_))
        ));
    }

    #[test]
    fn tls_client_hello_is_not_http() {
        assert!(matches!(
            classify(&[0x16, 0x03, 0x01, 0x00, 0x05], LIMIT),
            Verdict::NotHttp(_)
        ));
    }

    #[test]
    fn oversized_head_is_not_http() {
        let mut data = b"GET / HTTP/1.1\r\n".to_vec();
        data.extend(std::iter::repeat(b'a').take(64));
        assert_eq!(
            classify(&data, 32),
            Verdict::NotHttp(ParseFailure::HeadTooLarge)
        );
    }

    #[test]
    fn valid_head_under_limit_stays_open() {
        let data = b"GET / HTTP/1.1\r\nHost: e";
        assert_eq!(classify(data, data.len() + 1), Verdict::Undecided);
    }
}
