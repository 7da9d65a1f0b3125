use crate::error::{AsfError, Result};

/// A little-endian cursor over a byte slice.
///
/// Every read checks the remaining length first and fails with
/// [`AsfError::InvalidData`] instead of panicking, so callers can treat a
/// short buffer as a parse error for the current object or packet.
///
/// ```
/// use asfio::utils::ByteReader;
///
/// let data = [0x01, 0x34, 0x12, 0xff];
/// let mut reader = ByteReader::new(&data);
/// assert_eq!(reader.read_u8().unwrap(), 1);
/// assert_eq!(reader.read_u16_le().unwrap(), 0x1234);
/// assert!(reader.read_u16_le().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset from the start of the slice
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(AsfError::InvalidData(format!(
                "need {} bytes at offset {}, only {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }
}
