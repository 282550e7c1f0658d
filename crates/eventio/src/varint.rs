//! Variable-length integers ("count" and "scount").
//!
//! A count occupies `n` bytes, most significant byte first. The number of
//! leading one bits in the first byte is `n - 1`, followed by a zero bit and
//! the high payload bits. Nine-byte counts use `0xFF` followed by all 64 bits.
//!
//! | Bytes | First byte  | Payload bits |
//! |-------|-------------|--------------|
//! | 1     | `0xxxxxxx`  | 7            |
//! | 2     | `10xxxxxx`  | 14           |
//! | 3     | `110xxxxx`  | 21           |
//! | 4     | `1110xxxx`  | 28           |
//! | 5     | `11110xxx`  | 35           |
//! | 6     | `111110xx`  | 42           |
//! | 7     | `1111110x`  | 49           |
//! | 8     | `11111110`  | 56           |
//! | 9     | `11111111`  | 64           |
//!
//! Signed counts are zigzag-mapped onto unsigned ones first.

use crate::types::{Error, Result};

/// Maximum number of bytes of an encoded count.
pub const MAX_COUNT_LEN: usize = 9;

/// Number of bytes needed to encode `v` as a count.
pub fn count_len(v: u64) -> usize {
    (1..MAX_COUNT_LEN)
        .find(|&n| v >> (7 * n) == 0)
        .unwrap_or(MAX_COUNT_LEN)
}

/// Encode `v` into `out`, returning the number of bytes used.
pub fn encode_count(v: u64, out: &mut [u8; MAX_COUNT_LEN]) -> usize {
    let n = count_len(v);
    let be = v.to_be_bytes();
    if n == MAX_COUNT_LEN {
        out[0] = 0xFF;
        out[1..].copy_from_slice(&be);
        return n;
    }
    out[..n].copy_from_slice(&be[8 - n..]);
    out[0] |= !(0xFFu8 >> (n - 1));
    n
}

/// Decode a count from the start of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode_count(bytes: &[u8]) -> Result<(u64, usize)> {
    let first = *bytes.first().ok_or(Error::TruncatedInput {
        needed: 1,
        available: 0,
    })?;
    let n = first.leading_ones() as usize + 1;
    if bytes.len() < n {
        return Err(Error::TruncatedInput {
            needed: n,
            available: bytes.len(),
        });
    }
    if n == MAX_COUNT_LEN {
        let mut be = [0u8; 8];
        be.copy_from_slice(&bytes[1..MAX_COUNT_LEN]);
        return Ok((u64::from_be_bytes(be), n));
    }
    let mask = 0xFFu8.checked_shr(n as u32).unwrap_or(0);
    let v = bytes[1..n]
        .iter()
        .fold((first & mask) as u64, |acc, &b| (acc << 8) | b as u64);
    Ok((v, n))
}

/// Zigzag encode an i64 to a u64.
pub fn zigzag_encode_i64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Zigzag decode a u64 to i64.
pub fn zigzag_decode_i64(u: u64) -> i64 {
    if u & 1 == 0 {
        (u >> 1) as i64
    } else {
        !((u >> 1) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(v: u64) -> Vec<u8> {
        let mut buf = [0u8; MAX_COUNT_LEN];
        let n = encode_count(v, &mut buf);
        buf[..n].to_vec()
    }

    #[test]
    fn test_count_tiers() {
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (32768, 3),
            (65535, 3),
            (65536, 3),
            (123456789, 4),
            ((1 << 30) + 99, 5),
            ((1 << 56) - 1, 8),
            (1 << 56, 9),
            ((1 << 62) + 99, 9),
            (u64::MAX, 9),
        ];
        for &(v, n) in cases {
            let bytes = encoded(v);
            assert_eq!(bytes.len(), n, "byte count for {v}");
            assert_eq!(decode_count(&bytes).unwrap(), (v, n), "value {v}");
        }
    }

    #[test]
    fn test_count_bit_layout() {
        assert_eq!(encoded(127), vec![0x7F]);
        assert_eq!(encoded(128), vec![0x80, 0x80]);
        assert_eq!(encoded(300), vec![0x81, 0x2C]);
        assert_eq!(encoded(16384), vec![0xC0, 0x40, 0x00]);
        assert_eq!(
            encoded(u64::MAX),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            decode_count(&[]),
            Err(Error::TruncatedInput {
                needed: 1,
                available: 0
            })
        ));
        assert!(matches!(
            decode_count(&[0xC0, 0x40]),
            Err(Error::TruncatedInput {
                needed: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode_i64(0), 0);
        assert_eq!(zigzag_encode_i64(-1), 1);
        assert_eq!(zigzag_encode_i64(1), 2);
        assert_eq!(zigzag_encode_i64(-2), 3);
        assert_eq!(zigzag_encode_i64(i64::MIN), u64::MAX);
        assert_eq!(zigzag_decode_i64(4294967294), 2147483647);
        assert_eq!(zigzag_decode_i64(4294967295), -2147483648);
        for v in [i64::MIN, -65, -64, 63, 64, i64::MAX] {
            assert_eq!(zigzag_decode_i64(zigzag_encode_i64(v)), v);
        }
    }

    #[test]
    fn test_scount_tiers() {
        let cases: &[(i64, usize)] = &[
            (63, 1),
            (-64, 1),
            (64, 2),
            (-65, 2),
            (8191, 2),
            (-8192, 2),
            (8192, 3),
            (-8193, 3),
            (32767, 3),
            (-32768, 3),
            (65536, 3),
            (-65536, 3),
            (123456789, 4),
            (-(1 << 30) - 99, 5),
            ((1 << 61) + 99, 9),
        ];
        for &(v, n) in cases {
            assert_eq!(count_len(zigzag_encode_i64(v)), n, "byte count for {v}");
        }
    }
}
