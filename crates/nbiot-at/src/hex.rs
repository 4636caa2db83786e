//! ASCII-hex payload codec.
//!
//! Socket commands carry their payload as uppercase hexadecimal text so that
//! arbitrary bytes survive inside a comma-separated command line. Every input
//! byte becomes exactly two characters, in input order.

use bytes::{BufMut, BytesMut};

use nbiot_core::error::{Error, Result};

/// Capacity of the hex scratch buffer a session allocates by default.
pub const DEFAULT_HEX_CAPACITY: usize = 200;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Number of hex characters needed to encode `len` payload bytes.
pub fn encoded_len(len: usize) -> usize {
    len.saturating_mul(2)
}

/// Encode `payload` as uppercase hex.
///
/// # Example
///
/// ```
/// use nbiot_at::hex::encode_hex;
///
/// assert_eq!(encode_hex(b"hello"), "68656C6C6F");
/// assert_eq!(encode_hex(&[0x00, 0xFF]), "00FF");
/// ```
pub fn encode_hex(payload: &[u8]) -> String {
    let mut out = String::with_capacity(encoded_len(payload.len()));
    for &b in payload {
        out.push(char::from(HEX_DIGITS[usize::from(b >> 4)]));
        out.push(char::from(HEX_DIGITS[usize::from(b & 0x0F)]));
    }
    out
}

/// Append the hex encoding of `payload` to `dst`, which may hold at most
/// `capacity` bytes in total.
///
/// Fails with [`Error::PayloadTooLarge`] without touching `dst` when the
/// encoding would not fit.
pub fn encode_hex_into(payload: &[u8], dst: &mut BytesMut, capacity: usize) -> Result<()> {
    let encoded = encoded_len(payload.len());
    if encoded > capacity.saturating_sub(dst.len()) {
        return Err(Error::PayloadTooLarge { encoded, capacity });
    }

    dst.reserve(encoded);
    for &b in payload {
        dst.put_u8(HEX_DIGITS[usize::from(b >> 4)]);
        dst.put_u8(HEX_DIGITS[usize::from(b & 0x0F)]);
    }
    Ok(())
}

/// Decode hex text (either case) back into bytes.
///
/// # Example
///
/// ```
/// use nbiot_at::hex::decode_hex;
///
/// assert_eq!(decode_hex("68656C6C6F").unwrap(), b"hello");
/// ```
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let digits = text.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "odd-length hex string ({} characters)",
            digits.len()
        )));
    }

    digits
        .chunks_exact(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}

fn nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(Error::Protocol(format!(
            "invalid hex digit {:?}",
            char::from(c)
        ))),
    }
}
