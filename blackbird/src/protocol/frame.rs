//! Frame-level codec for the BB16 wire protocol.
//!
//! A frame is `0x7E | escape(body) | 0x7F`. Inside the body every byte
//! in `{0x7D, 0x7E, 0x7F}` travels as the pair `0x7D, b - 0x7C`, so a
//! trailing `0x7F` always marks a frame boundary and the stream can
//! resynchronize mid-flight. The body carries a trailing CRC-CCITT
//! (polynomial 0x1021, initial value 0xFFFF, no reflection, no xor-out)
//! over everything before it.

use crc::{CRC_16_IBM_3740, Crc};

use crate::BlackbirdError;

/// Frame start delimiter.
pub const FRAME_START: u8 = 0x7E;
/// Frame end delimiter.
pub const FRAME_END: u8 = 0x7F;

const ESCAPE: u8 = 0x7D;

// IBM-3740 is the 0x1021/0xFFFF/unreflected variant, a.k.a. CCITT-FALSE.
const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC over the unescaped body, excluding the CRC field itself.
pub fn crc(data: &[u8]) -> u16 {
    CRC_CCITT.checksum(data)
}

/// Replaces every delimiter-class byte with its two-byte escape pair.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if (ESCAPE..=FRAME_END).contains(&b) {
            out.push(ESCAPE);
            out.push(b - 0x7C);
        } else {
            out.push(b);
        }
    }
    out
}

/// Inverse of [`escape`].
///
/// Fails on a dangling `0x7D` at the end of input and on any escape
/// argument outside `0x01..=0x03`.
pub fn unescape(data: &[u8]) -> Result<Vec<u8>, BlackbirdError> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            match iter.next() {
                Some(&x @ 0x01..=0x03) => out.push(0x7C + x),
                Some(&x) => return Err(BlackbirdError::BadEscape(x)),
                None => return Err(BlackbirdError::TruncatedFrame),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Wraps an unescaped body in delimiters, escaping as needed.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(FRAME_START);
    out.extend_from_slice(&escape(body));
    out.push(FRAME_END);
    out
}

/// Strips the delimiters and unescapes the interior.
pub fn deframe(data: &[u8]) -> Result<Vec<u8>, BlackbirdError> {
    match data {
        [FRAME_START, interior @ .., FRAME_END] => unescape(interior),
        _ => Err(BlackbirdError::BadDelimiter),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn escape_triple() {
        assert_eq!(
            escape(&[0x7D, 0x7E, 0x7F]),
            vec![0x7D, 0x01, 0x7D, 0x02, 0x7D, 0x03]
        );
        assert_eq!(
            unescape(&[0x7D, 0x01, 0x7D, 0x02, 0x7D, 0x03]).unwrap(),
            vec![0x7D, 0x7E, 0x7F]
        );
    }

    #[test]
    fn dangling_escape_rejected() {
        assert!(matches!(
            unescape(&[0x01, 0x7D]),
            Err(BlackbirdError::TruncatedFrame)
        ));
    }

    #[test]
    fn bad_escape_argument_rejected() {
        assert!(matches!(
            unescape(&[0x7D, 0x04]),
            Err(BlackbirdError::BadEscape(0x04))
        ));
        assert!(matches!(
            unescape(&[0x7D, 0x00]),
            Err(BlackbirdError::BadEscape(0x00))
        ));
    }

    #[test]
    fn deframe_requires_delimiters() {
        assert!(matches!(
            deframe(&[0x00, 0x01]),
            Err(BlackbirdError::BadDelimiter)
        ));
        assert!(matches!(
            deframe(&[FRAME_START, 0x01]),
            Err(BlackbirdError::BadDelimiter)
        ));
        assert!(matches!(
            deframe(&[FRAME_START]),
            Err(BlackbirdError::BadDelimiter)
        ));
        assert!(deframe(&[FRAME_START, FRAME_END]).unwrap().is_empty());
    }

    #[test]
    fn crc_known_vectors() {
        // CCITT-FALSE check value
        assert_eq!(crc(b"123456789"), 0x29B1);
        // body of a captured GetDeviceInfo response; its crc field is 0xf08d
        let body: Vec<u8> = [
            "100029000108021a0456322e31220656312e302e372a0731",
            "343636313933320456312e3038c801",
        ]
        .concat()
        .as_bytes()
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect();
        assert_eq!(crc(&body), 0xF08D);
    }

    proptest! {
        #[test]
        fn escape_round_trips(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let escaped = escape(&data);
            prop_assert!(!escaped.contains(&FRAME_START));
            prop_assert!(!escaped.contains(&FRAME_END));
            prop_assert_eq!(unescape(&escaped).unwrap(), data);
        }

        #[test]
        fn frame_round_trips(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(deframe(&frame(&body)).unwrap(), body);
        }
    }
}
