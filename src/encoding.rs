//! Integer and length encoding to and from ASCII decimal.
//!
//! Every header on the wire (`*3`, `$5`, `:1000`) is a decimal number followed by CRLF, so
//! these helpers sit on the hot path of both the encoder and the decoder. Numbers are
//! rendered digit by digit straight into the destination buffer, and the values 0 to 255,
//! which cover most argument counts and short lengths, come from a table built at compile
//! time.

use bytes::{BufMut, Bytes, BytesMut};

pub const CRLF: &[u8; 2] = b"\r\n";

const NUM_MAP_LENGTH: usize = 256;

// Longest rendering of an i64 is `-9223372036854775808`.
const MAX_DIGITS: usize = 20;

static NUM_MAP: [([u8; 3], usize); NUM_MAP_LENGTH] = build_num_map();

const fn build_num_map() -> [([u8; 3], usize); NUM_MAP_LENGTH] {
    let mut map = [([0u8; 3], 0usize); NUM_MAP_LENGTH];
    let mut i = 0;
    while i < NUM_MAP_LENGTH {
        let len = if i >= 100 {
            3
        } else if i >= 10 {
            2
        } else {
            1
        };
        let mut digits = [0u8; 3];
        let mut n = i;
        let mut pos = len;
        while pos > 0 {
            pos -= 1;
            digits[pos] = b'0' + (n % 10) as u8;
            n /= 10;
        }
        map[i] = (digits, len);
        i += 1;
    }
    map
}

/// Appends the decimal representation of `value` to `dst`.
pub fn write_num(dst: &mut BytesMut, value: i64) {
    if (0..NUM_MAP_LENGTH as i64).contains(&value) {
        let (digits, len) = &NUM_MAP[value as usize];
        dst.extend_from_slice(&digits[..*len]);
        return;
    }

    if value == -1 {
        dst.extend_from_slice(b"-1");
        return;
    }

    let mut buf = [0u8; MAX_DIGITS];
    let mut index = buf.len();
    let mut abs = value.unsigned_abs();
    loop {
        index -= 1;
        buf[index] = b'0' + (abs % 10) as u8;
        abs /= 10;
        if abs == 0 {
            break;
        }
    }
    if value < 0 {
        index -= 1;
        buf[index] = b'-';
    }

    dst.extend_from_slice(&buf[index..]);
}

/// Appends the decimal representation of `value` followed by CRLF.
pub fn write_num_crlf(dst: &mut BytesMut, value: i64) {
    write_num(dst, value);
    dst.put_slice(CRLF);
}

/// Writes a `<marker><value>\r\n` header line.
pub fn write_header(dst: &mut BytesMut, marker: u8, value: i64) {
    dst.put_u8(marker);
    write_num_crlf(dst, value);
}

pub fn num_to_bytes(value: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAX_DIGITS);
    write_num(&mut buf, value);
    buf.freeze()
}

/// Parses an optionally signed decimal integer. Anything other than digits after the sign,
/// an empty digit sequence or an overflow yields `None`.
pub fn parse_num(src: &[u8]) -> Option<i64> {
    let (negative, digits) = match src {
        [b'-', rest @ ..] => (true, rest),
        [b'+', rest @ ..] => (false, rest),
        _ => (false, src),
    };

    if digits.is_empty() {
        return None;
    }

    let mut value: i64 = 0;
    for &byte in digits {
        let digit = byte.wrapping_sub(b'0');
        if digit > 9 {
            return None;
        }
        value = value.checked_mul(10)?;
        // Accumulate towards the sign so that i64::MIN is representable.
        value = if negative {
            value.checked_sub(digit as i64)?
        } else {
            value.checked_add(digit as i64)?
        };
    }

    Some(value)
}

/// Parses a floating point argument, accepting `inf`, `+inf` and `-inf`. NaN is rejected.
pub fn parse_float(src: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(src).ok()?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => f64::INFINITY,
        "-inf" | "-infinity" => f64::NEG_INFINITY,
        other => other.parse::<f64>().ok()?,
    };

    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

/// Renders a score the way it travels back to clients: shortest round-tripping decimal,
/// `inf`/`-inf` for the infinities.
pub fn format_float(value: f64) -> Bytes {
    Bytes::from(value.to_string())
}
