use crate::error::{AsfError, Result};

/// A bit-level reader for decoding packed flag bytes.
///
/// ASF packs several 2-bit length type codes into a single byte. Bits are
/// read most significant first, so a flags byte can be decoded field by
/// field in the order the format describes it.
///
/// Example:
/// ```
/// use asfio::utils::BitReader;
///
/// let data = [0b0101_1001];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), false);
/// assert_eq!(reader.read_bits(2).unwrap(), 0b10);
/// assert_eq!(reader.read_bits(2).unwrap(), 0b11);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    /// Returns true for 1, false for 0.
    ///
    /// Returns error if end of data is reached.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(AsfError::InvalidData("Reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits and returns them as a number.
    /// The bits are interpreted as big-endian.
    ///
    /// Returns error if n > 32 or end of data is reached.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(AsfError::InvalidData("Too many bits requested".into()));
        }

        let mut value = 0u32;
        let n = n as usize;

        for i in 0..n {
            let bit = self.read_bit()?;
            if bit {
                value |= 1 << (n - 1 - i);
            }
        }

        Ok(value)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }
}
