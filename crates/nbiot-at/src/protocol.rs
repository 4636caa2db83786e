//! Wire-level conventions of the AT-command line protocol.
//!
//! Commands are ASCII lines terminated by a carriage return. The modem
//! answers with one or more `\r\n`-terminated lines and finishes a command
//! with a final result such as `OK\r\n` or a command-specific status line.
//!
//! ```text
//! -> AT+CGATT?\r
//! <- AT+CGATT?\r\n          (echo, when ATE1 is active)
//! <- \r\n+CGATT:1\r\n
//! <- \r\nOK\r\n
//! ```
//!
//! Success is decided by plain substring containment of an expected pattern
//! in the accumulated bytes; there is no structured parse at this layer.

use std::borrow::Cow;

use bytes::Bytes;

/// Terminator appended to every command line sent to the modem.
pub const LINE_TERMINATOR: u8 = b'\r';

/// Terminator of every line the modem sends back.
pub const RESPONSE_TERMINATOR: &str = "\r\n";

/// Final result of a successfully executed command.
pub const OK: &str = "OK\r\n";

/// Final result of a rejected command.
pub const ERROR: &str = "ERROR\r\n";

/// Encode an AT command into the bytes written to the transport.
///
/// # Example
///
/// ```
/// use nbiot_at::protocol::encode_command;
///
/// assert_eq!(encode_command("AT+CSQ"), b"AT+CSQ\r");
/// ```
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(command.len() + 1);
    buf.extend_from_slice(command.as_bytes());
    buf.push(LINE_TERMINATOR);
    buf
}

/// Whether `pattern` appears anywhere in `haystack`.
///
/// An empty pattern never matches; transactions reject it up front.
pub fn contains_pattern(haystack: &[u8], pattern: &[u8]) -> bool {
    !pattern.is_empty()
        && haystack.len() >= pattern.len()
        && haystack.windows(pattern.len()).any(|w| w == pattern)
}

/// Iterate over the non-empty lines of a response text.
pub fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|l| !l.is_empty())
}

/// The bytes captured by one completed transaction.
///
/// Holds everything the modem sent between the start of the transaction and
/// the read that completed the expected pattern, echo included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    raw: Bytes,
}

impl Response {
    pub fn new(raw: Bytes) -> Self {
        Response { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// The response as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        contains_pattern(&self.raw, pattern.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
