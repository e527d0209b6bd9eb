mod defaults;
mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

/// Consensus wire format. Every implementor emits its fields in declaration
/// order with little-endian integers; collections carry a compact length
/// prefix; maps are emitted in sorted key order. Encodings are bit-exact:
/// `read` must accept exactly what `write` produces and nothing else.
pub trait Serializer {
    fn write(&self, writer: &mut Writer);

    fn read(reader: &mut Reader) -> Result<Self, ReaderError>
    where
        Self: Sized;

    /// Serialized size in bytes
    fn size(&self) -> usize {
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        self.write(&mut writer);
        bytes.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        self.write(&mut writer);
        bytes
    }

    fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError>
    where
        Self: Sized,
    {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(ReaderError::InvalidSize);
        }
        Ok(value)
    }

    fn from_hex(hex_str: &str) -> Result<Self, ReaderError>
    where
        Self: Sized,
    {
        let bytes = hex::decode(hex_str).map_err(|_| ReaderError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_scalars() {
        let values: Vec<u64> = vec![0, 1, 0xFF, 0xFFFF_FFFF, u64::MAX];
        for v in values {
            let bytes = v.to_bytes();
            assert_eq!(bytes.len(), 8);
            assert_eq!(u64::from_bytes(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = 7u32.to_bytes();
        bytes.push(0);
        assert!(matches!(
            u32::from_bytes(&bytes),
            Err(ReaderError::InvalidSize)
        ));
    }

    #[test]
    fn compact_size_boundaries() {
        for len in [0usize, 1, 252, 253, 0xFFFF, 0x10000] {
            let mut bytes = Vec::new();
            let mut writer = Writer::new(&mut bytes);
            writer.write_compact_size(len as u64);
            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.read_compact_size().unwrap(), len as u64);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn non_minimal_compact_size_rejected() {
        // 5 encoded with the 0xFD form instead of a single byte
        let bytes = [0xFDu8, 5, 0];
        let mut reader = Reader::new(&bytes);
        assert!(reader.read_compact_size().is_err());
    }
}
