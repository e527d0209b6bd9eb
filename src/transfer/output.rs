use super::{ReserveTransfer, TransferDestination};
use crate::currency::{CurrencyId, ValueMap};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use serde::{Deserialize, Serialize};

/// Reserve-denominated payment payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutput {
    pub values: ValueMap,
}

impl TokenOutput {
    pub fn new(currency: CurrencyId, amount: Amount) -> Self {
        let mut values = ValueMap::new();
        values.add_value(currency, amount);
        TokenOutput { values }
    }

    pub fn is_valid(&self) -> bool {
        !self.values.has_negative()
    }
}

impl Serializer for TokenOutput {
    fn write(&self, writer: &mut Writer) {
        self.values.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(TokenOutput {
            values: ValueMap::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        self.values.size()
    }
}

/// One output the import processor materializes. The caller maps these to
/// actual transaction scripts; the engine never touches script encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxOutput {
    /// Plain native payment
    Payment {
        destination: TransferDestination,
        amount: Amount,
    },
    /// Reserve-token payment, with any native amount riding along
    Token {
        destination: TransferDestination,
        token: TokenOutput,
        native_amount: Amount,
    },
    /// A fresh reserve transfer for the next leg of a multi-system route
    Transfer {
        transfer: ReserveTransfer,
        native_amount: Amount,
    },
}

impl TxOutput {
    pub fn native_amount(&self) -> Amount {
        match self {
            TxOutput::Payment { amount, .. } => *amount,
            TxOutput::Token { native_amount, .. } => *native_amount,
            TxOutput::Transfer { native_amount, .. } => *native_amount,
        }
    }
}
