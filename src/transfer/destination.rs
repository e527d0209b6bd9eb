use super::ReserveTransfer;
use crate::currency::CurrencyId;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use serde::{Deserialize, Serialize};

/// Where a transfer lands on the destination system.
///
/// `FullIdentity` carries an identity that must be registered on arrival;
/// refunds collapse it to `Identity` because the identity already exists on
/// the source chain. `Nested` embeds the transfer to re-emit on the next
/// system of a multi-leg route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Invalid,
    Identity(CurrencyId),
    FullIdentity(CurrencyId),
    PublicKey(#[serde(with = "serde_pubkey")] [u8; 33]),
    PublicKeyHash([u8; 20]),
    ScriptHash([u8; 20]),
    Nested(Box<ReserveTransfer>),
}

// serde lacks impls for arrays past 32 entries; compressed keys are 33
mod serde_pubkey {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 33], D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        let bytes = hex::decode(&hex_str).map_err(Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| Error::custom("invalid public key length"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDestination {
    pub kind: DestinationKind,
    /// Further system to forward to after this import
    pub gateway_id: Option<CurrencyId>,
    /// Fees carried for the next leg, kept in the transfer's fee currency
    pub fees: Amount,
}

impl TransferDestination {
    pub fn identity(id: CurrencyId) -> Self {
        TransferDestination {
            kind: DestinationKind::Identity(id),
            gateway_id: None,
            fees: 0,
        }
    }

    pub fn invalid() -> Self {
        TransferDestination {
            kind: DestinationKind::Invalid,
            gateway_id: None,
            fees: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.kind, DestinationKind::Invalid)
    }

    pub fn has_gateway_leg(&self) -> bool {
        self.gateway_id.is_some()
    }

    pub fn has_next_leg(&self) -> bool {
        self.has_gateway_leg() || matches!(self.kind, DestinationKind::Nested(_))
    }

    pub fn clear_gateway_leg(&mut self) {
        self.gateway_id = None;
        self.fees = 0;
    }

    /// Raw address byte length, the input to transfer-fee sizing
    pub fn address_len(&self) -> usize {
        match &self.kind {
            DestinationKind::Invalid => 0,
            DestinationKind::Identity(_) | DestinationKind::FullIdentity(_) => 20,
            DestinationKind::PublicKey(_) => 33,
            DestinationKind::PublicKeyHash(_) | DestinationKind::ScriptHash(_) => 20,
            DestinationKind::Nested(transfer) => transfer.size(),
        }
    }
}

impl Serializer for TransferDestination {
    fn write(&self, writer: &mut Writer) {
        match &self.kind {
            DestinationKind::Invalid => writer.write_u8(0),
            DestinationKind::Identity(id) => {
                writer.write_u8(1);
                id.write(writer);
            }
            DestinationKind::FullIdentity(id) => {
                writer.write_u8(2);
                id.write(writer);
            }
            DestinationKind::PublicKey(key) => {
                writer.write_u8(3);
                writer.write_bytes(key);
            }
            DestinationKind::PublicKeyHash(hash) => {
                writer.write_u8(4);
                writer.write_bytes(hash);
            }
            DestinationKind::ScriptHash(hash) => {
                writer.write_u8(5);
                writer.write_bytes(hash);
            }
            DestinationKind::Nested(transfer) => {
                writer.write_u8(6);
                transfer.write(writer);
            }
        }
        self.gateway_id.write(writer);
        self.fees.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let kind = match reader.read_u8()? {
            0 => DestinationKind::Invalid,
            1 => DestinationKind::Identity(CurrencyId::read(reader)?),
            2 => DestinationKind::FullIdentity(CurrencyId::read(reader)?),
            3 => {
                let bytes = reader.read_bytes(33)?;
                DestinationKind::PublicKey(bytes.try_into().unwrap())
            }
            4 => DestinationKind::PublicKeyHash(reader.read_bytes_20()?),
            5 => DestinationKind::ScriptHash(reader.read_bytes_20()?),
            6 => DestinationKind::Nested(Box::new(ReserveTransfer::read(reader)?)),
            _ => return Err(ReaderError::InvalidValue),
        };
        Ok(TransferDestination {
            kind,
            gateway_id: Option::read(reader)?,
            fees: i64::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        self.to_bytes().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_leg_detection() {
        let mut dest = TransferDestination::identity(CurrencyId::new([1; 20]));
        assert!(!dest.has_next_leg());
        dest.gateway_id = Some(CurrencyId::new([2; 20]));
        dest.fees = 5_000;
        assert!(dest.has_next_leg());
        dest.clear_gateway_leg();
        assert!(!dest.has_next_leg());
        assert_eq!(dest.fees, 0);
    }

    #[test]
    fn wire_round_trip() {
        let mut dest = TransferDestination::identity(CurrencyId::new([7; 20]));
        dest.gateway_id = Some(CurrencyId::new([9; 20]));
        dest.fees = 1234;
        assert_eq!(
            TransferDestination::from_bytes(&dest.to_bytes()).unwrap(),
            dest
        );
    }
}
