use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const ID_SIZE: usize = 20; // 20 bytes / 160 bits

/// Opaque 160-bit currency identifier. Ordering is byte-lexicographic and is
/// the canonical iteration order for all currency maps.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Default)]
pub struct CurrencyId([u8; ID_SIZE]);

impl CurrencyId {
    pub const fn new(bytes: [u8; ID_SIZE]) -> Self {
        CurrencyId(bytes)
    }

    pub const fn zero() -> Self {
        CurrencyId([0; ID_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ID_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for CurrencyId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; ID_SIZE] = bytes.try_into().map_err(|_| "Invalid id length")?;
        Ok(CurrencyId::new(bytes))
    }
}

impl Display for CurrencyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.to_hex())
    }
}

impl Serializer for CurrencyId {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(CurrencyId(reader.read_bytes_20()?))
    }

    fn size(&self) -> usize {
        ID_SIZE
    }
}

impl Serialize for CurrencyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for CurrencyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex_str = String::deserialize(deserializer)?;
        CurrencyId::from_str(&hex_str).map_err(SerdeError::custom)
    }
}
