//! Command line composition into a bounded scratch buffer.
//!
//! Commands that carry session values (socket parameters, configuration
//! keys, hex payloads) are assembled as
//!
//! ```text
//! <keyword><field>,<field>,...,<field>\r
//! ```
//!
//! inside a [`Composer`]'s fixed-capacity scratch buffer. A line that would
//! not fit is rejected as a whole, and the scratch buffer is empty again
//! after every call whether it succeeded or not.

use bytes::{BufMut, Bytes, BytesMut};

use nbiot_core::error::{Error, Result};

use crate::protocol::LINE_TERMINATOR;

/// Capacity of the compose scratch buffer a session allocates by default.
pub const DEFAULT_COMPOSE_CAPACITY: usize = 300;

/// Keyword of the UDP socket-send command.
pub const UDP_SEND_KEYWORD: &str = "AT+NSOST=";

/// Builds command lines in a bounded, reusable scratch buffer.
#[derive(Debug)]
pub struct Composer {
    scratch: BytesMut,
    capacity: usize,
}

impl Composer {
    pub fn with_capacity(capacity: usize) -> Self {
        Composer {
            scratch: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the scratch buffer currently holds no data.
    pub fn is_clear(&self) -> bool {
        self.scratch.is_empty()
    }

    /// Compose `keyword` followed by comma-separated `fields` and the line
    /// terminator.
    ///
    /// # Example
    ///
    /// ```
    /// use nbiot_at::compose::Composer;
    ///
    /// let mut composer = Composer::with_capacity(64);
    /// let line = composer
    ///     .compose("AT+NCONFIG=", &["AUTOCONNECT", "TRUE"])
    ///     .unwrap();
    /// assert_eq!(&line[..], b"AT+NCONFIG=AUTOCONNECT,TRUE\r");
    /// assert!(composer.is_clear());
    /// ```
    pub fn compose<F: AsRef<[u8]>>(&mut self, keyword: &str, fields: &[F]) -> Result<Bytes> {
        self.scratch.clear();

        let separators = fields.len().saturating_sub(1);
        let required = fields
            .iter()
            .map(|f| f.as_ref().len())
            .fold(keyword.len() + separators + 1, usize::saturating_add);
        if required > self.capacity {
            return Err(Error::ComposeOverflow {
                required,
                capacity: self.capacity,
            });
        }

        self.scratch.put_slice(keyword.as_bytes());
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.scratch.put_u8(b',');
            }
            self.scratch.put_slice(field.as_ref());
        }
        self.scratch.put_u8(LINE_TERMINATOR);

        Ok(self.scratch.split().freeze())
    }

    /// Compose a UDP socket-send line:
    ///
    /// ```text
    /// AT+NSOST=<socket>,<address>,<port>,<payload length>,<hex payload>\r
    /// ```
    ///
    /// `payload_len` is the length of the original payload, not of its hex
    /// encoding.
    pub fn compose_udp_send(
        &mut self,
        socket: u8,
        address: &str,
        port: &str,
        payload_len: usize,
        hex_payload: &[u8],
    ) -> Result<Bytes> {
        let socket = socket.to_string();
        let len = payload_len.to_string();
        self.compose(
            UDP_SEND_KEYWORD,
            &[
                socket.as_bytes(),
                address.as_bytes(),
                port.as_bytes(),
                len.as_bytes(),
                hex_payload,
            ],
        )
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_COMPOSE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::encode_hex;

    #[test]
    fn compose_keyword_and_fields() {
        let mut composer = Composer::default();
        let line = composer
            .compose("AT+NSOCR=", &["DGRAM", "17", "3005", "0"])
            .unwrap();
        assert_eq!(&line[..], b"AT+NSOCR=DGRAM,17,3005,0\r");
        assert!(composer.is_clear());
    }

    #[test]
    fn compose_without_fields() {
        let mut composer = Composer::default();
        let line = composer.compose::<&str>("AT&W", &[]).unwrap();
        assert_eq!(&line[..], b"AT&W\r");
    }

    #[test]
    fn udp_send_line_layout() {
        let mut composer = Composer::default();
        let hex = encode_hex(b"hello");
        let line = composer
            .compose_udp_send(0, "192.168.1.10", "3005", 5, hex.as_bytes())
            .unwrap();
        assert_eq!(&line[..], b"AT+NSOST=0,192.168.1.10,3005,5,68656C6C6F\r");
    }

    #[test]
    fn udp_send_carries_raw_length_and_hex_payload() {
        let mut composer = Composer::default();
        let payload = [0xDEu8, 0xAD, 0xBE, 0xEF, 0x00, 0x01, 0x02];
        let hex = encode_hex(&payload);
        let line = composer
            .compose_udp_send(1, "10.0.0.1", "5683", payload.len(), hex.as_bytes())
            .unwrap();
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.contains(",7,"));
        assert!(!text.contains(",14,"));
        assert!(text.ends_with("DEADBEEF000102\r"));
    }

    #[test]
    fn line_exactly_at_capacity_fits() {
        // "AT+X=" (5) + "ABCD" (4) + "\r" (1)
        let mut composer = Composer::with_capacity(10);
        let line = composer.compose("AT+X=", &["ABCD"]).unwrap();
        assert_eq!(line.len(), 10);
    }

    #[test]
    fn overflow_is_rejected_and_leaves_scratch_clear() {
        let mut composer = Composer::with_capacity(32);
        let hex = encode_hex(&[0x55; 20]);
        let err = composer
            .compose_udp_send(0, "192.168.1.10", "3005", 20, hex.as_bytes())
            .unwrap_err();
        match err {
            Error::ComposeOverflow { required, capacity } => {
                assert_eq!(capacity, 32);
                assert_eq!(required, "AT+NSOST=0,192.168.1.10,3005,20,\r".len() + 40);
            }
            other => panic!("expected ComposeOverflow, got {other:?}"),
        }
        assert!(composer.is_clear());
    }

    #[test]
    fn overflow_does_not_leak_into_next_command() {
        let mut composer = Composer::with_capacity(16);
        assert!(composer.compose("AT+NSOST=", &["0123456789"]).is_err());
        let line = composer.compose("AT", &[] as &[&str]).unwrap();
        assert_eq!(&line[..], b"AT\r");
    }
}
