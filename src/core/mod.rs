use bitstream_io::{BigEndian, BitRead, BitReader, UnsignedInteger};
use serde::Serialize;
use std::io;
use std::iter::repeat_with;

pub mod base64;

/// An inclusive run of vendor ids, as found in range-encoded vendor sections.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct IdRange {
    pub start: u16,
    pub end: u16,
}

impl IdRange {
    pub fn single(id: u16) -> Self {
        Self { start: id, end: id }
    }

    pub fn contains(&self, id: u16) -> bool {
        (self.start..=self.end).contains(&id)
    }
}

/// Bit-level reader over a decoded payload.
///
/// The reader knows how many bits the payload really holds: base64 input
/// is padded up to a byte boundary, and those padding bits must never be
/// mistaken for data. Every read is checked against the remaining budget
/// and fails with [`io::ErrorKind::UnexpectedEof`] when it does not fit.
pub struct DataReader<'a> {
    bit_reader: BitReader<&'a [u8], BigEndian>,
    remaining_bits: usize,
}

impl<'a> DataReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_bit_len(bytes, bytes.len() * 8)
    }

    pub fn with_bit_len(bytes: &'a [u8], bit_len: usize) -> Self {
        Self {
            bit_reader: BitReader::endian(bytes, BigEndian),
            remaining_bits: bit_len.min(bytes.len() * 8),
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.remaining_bits
    }

    fn reserve(&mut self, bits: usize) -> io::Result<()> {
        if bits > self.remaining_bits {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{bits} bits requested, only {} remaining",
                    self.remaining_bits
                ),
            ));
        }
        self.remaining_bits -= bits;
        Ok(())
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        self.reserve(1)?;
        self.bit_reader.read_bit()
    }

    pub fn read_fixed_integer<U: UnsignedInteger>(&mut self, bits: u32) -> io::Result<U> {
        self.reserve(bits as usize)?;
        self.bit_reader.read_unsigned_var(bits)
    }

    pub fn read_string(&mut self, chars: usize) -> io::Result<String> {
        repeat_with(|| self.read_fixed_integer::<u8>(6))
            .take(chars)
            .map(|r| r.map(|n| (n + 65) as char))
            .collect::<Result<String, _>>()
    }

    pub fn read_datetime_as_unix_timestamp(&mut self) -> io::Result<u64> {
        Ok(self.read_fixed_integer::<u64>(36)? / 10) // seconds
    }

    /// Reads `bits` flags, where index `i` holds the flag of id `i + 1`.
    ///
    /// The whole length is checked before anything is consumed, so a
    /// declared length larger than the payload is rejected outright.
    pub fn read_fixed_bitfield(&mut self, bits: usize) -> io::Result<Vec<bool>> {
        self.reserve(bits)?;
        repeat_with(|| self.bit_reader.read_bit())
            .take(bits)
            .collect()
    }

    /// Reads a 12-bit entry count followed by that many single ids or
    /// start/end pairs, each prefixed with a one-bit range marker.
    pub fn read_integer_range(&mut self) -> io::Result<Vec<IdRange>> {
        let n = self.read_fixed_integer::<u16>(12)?;
        let mut ranges = Vec::with_capacity(n as usize);

        for _ in 0..n {
            let is_range = self.read_bool()?;
            let range = if is_range {
                let start = self.read_fixed_integer::<u16>(16)?;
                let end = self.read_fixed_integer::<u16>(16)?;
                IdRange { start, end }
            } else {
                IdRange::single(self.read_fixed_integer::<u16>(16)?)
            };
            ranges.push(range);
        }

        Ok(ranges)
    }
}
