use crate::currency::CurrencyId;
use crate::Amount;
use thiserror::Error;

/// Failure of an import. On error the caller must discard every output and
/// accumulator the processor produced; only the error itself is meaningful.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("64-bit overflow in import arithmetic")]
    Overflow,

    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("Policy violation: {0}")]
    PolicyViolation(&'static str),

    #[error("Transfer fee underpaid: need {need}, have {have}")]
    FeeUnderpayment { need: Amount, have: Amount },

    #[error("Reserve conservation violated: more value out than in")]
    ConservationViolation,

    #[error("Currency {0} not found in registry")]
    MissingCurrency(CurrencyId),

    #[error("Unsupported transfer destination")]
    UnsupportedDestination,

    #[error("Currency conversion failed for import")]
    ConversionFailed,
}
