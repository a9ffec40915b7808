use bitstream_io::{BigEndian, BitWrite, BitWriter};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid character {character:?} at offset {offset}")]
    InvalidCharacter { character: char, offset: usize },
    #[error("unable to pack decoded bits")]
    Write(#[from] io::Error),
}

/// A base64url payload unpacked into bytes, along with the number of
/// meaningful bits it carries (6 per input character).
#[derive(Debug, Eq, PartialEq)]
pub struct DecodedBits {
    pub bytes: Vec<u8>,
    pub bit_len: usize,
}

/// Custom base64 implementation, 6-bits aligned, no padding,
/// using the URL Safe Base64 dictionary.
///
/// Consent strings are not byte aligned, so the standard decoders which
/// expect whole 8-bit groups (or `=` padding) cannot be used here.
pub fn decode(s: &str) -> Result<DecodedBits, DecodeError> {
    let mut bytes = Vec::with_capacity(s.len());

    {
        let mut bw = BitWriter::endian(&mut bytes, BigEndian);

        for (offset, b) in s.bytes().enumerate() {
            let value = base64_value(b).ok_or(DecodeError::InvalidCharacter {
                character: b as char,
                offset,
            })?;
            bw.write_unsigned::<6, u8>(value)?;
        }

        // the last partial byte is padded with zeroes
        bw.byte_align()?;
    }

    Ok(DecodedBits {
        bytes,
        bit_len: s.len() * 6,
    })
}

fn base64_value(b: u8) -> Option<u8> {
    match b {
        b'A'..=b'Z' => Some(b - b'A'),
        b'a'..=b'z' => Some(b - b'a' + 26),
        b'0'..=b'9' => Some(b - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}
