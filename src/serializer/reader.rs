use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Not enough bytes to read")]
    InvalidSize,
    #[error("Invalid value in encoding")]
    InvalidValue,
    #[error("Invalid hex string")]
    InvalidHex,
    #[error("Collection length exceeds allowed maximum")]
    ExceedsMaxArraySize,
}

// Hard cap on decoded collection lengths so a corrupt length prefix cannot
// drive allocation
const MAX_ARRAY_SIZE: u64 = 1 << 20;

/// Cursor over a byte slice for the consensus wire format.
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, total: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        if self.bytes.len() < count {
            return Err(ReaderError::InvalidSize);
        }
        let (head, tail) = self.bytes.split_at(count);
        self.bytes = tail;
        self.total += count;
        Ok(head)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, ReaderError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ReaderError> {
        Ok(self.take(count)?.to_vec())
    }

    pub fn read_bytes_ref(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        self.take(count)
    }

    pub fn read_bytes_20(&mut self) -> Result<[u8; 20], ReaderError> {
        Ok(self.take(20)?.try_into().unwrap())
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    /// Minimal-encoding compact size, capped at MAX_ARRAY_SIZE for lengths.
    pub fn read_compact_size(&mut self) -> Result<u64, ReaderError> {
        let value = match self.read_u8()? {
            tag @ 0..=0xFC => tag as u64,
            0xFD => {
                let v = self.read_u16()? as u64;
                if v < 0xFD {
                    return Err(ReaderError::InvalidValue);
                }
                v
            }
            0xFE => {
                let v = self.read_u32()? as u64;
                if v <= 0xFFFF {
                    return Err(ReaderError::InvalidValue);
                }
                v
            }
            0xFF => {
                let v = self.read_u64()?;
                if v <= 0xFFFF_FFFF {
                    return Err(ReaderError::InvalidValue);
                }
                v
            }
        };
        Ok(value)
    }

    pub fn read_length(&mut self) -> Result<usize, ReaderError> {
        let len = self.read_compact_size()?;
        if len > MAX_ARRAY_SIZE {
            return Err(ReaderError::ExceedsMaxArraySize);
        }
        Ok(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| ReaderError::InvalidValue)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn total_read(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
