mod destination;
mod output;

pub use destination::{DestinationKind, TransferDestination};
pub use output::{TokenOutput, TxOutput};

use crate::config::{
    CONVERSION_FEE_RATE, DESTINATION_BYTE_DIVISOR, MIN_CONVERSION_FEE, TRANSFER_STEP_FEE,
};
use crate::currency::{CurrencyId, ValueMap};
use crate::math;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use serde::{Deserialize, Serialize};

/// Rate portion of a conversion fee, no floor applied
pub fn conversion_fee_no_min(amount: Amount) -> Amount {
    math::mul_div(amount, CONVERSION_FEE_RATE, crate::config::COIN_VALUE).unwrap_or(0)
}

/// Conversion fee: 0.025% of the input with the minimum fee floor
pub fn conversion_fee(amount: Amount) -> Amount {
    conversion_fee_no_min(amount).max(MIN_CONVERSION_FEE)
}

/// Fee to add on top of `amount` so that the gross passes `conversion_fee`
/// and still nets `amount` out
pub fn additional_conversion_fee(amount: Amount) -> Amount {
    let big_coin = crate::config::COIN_VALUE;
    let mut new_amount = math::mul_div(amount, big_coin, big_coin - CONVERSION_FEE_RATE)
        .unwrap_or(amount);
    if new_amount - amount < MIN_CONVERSION_FEE {
        new_amount = amount + MIN_CONVERSION_FEE;
    }
    let fee = conversion_fee(new_amount);
    new_amount = amount + fee;
    let mut fee = conversion_fee(new_amount); // again to cover the minimum
    fee += amount - (new_amount - fee);
    fee
}

/// A single cross-system value movement: produced by export on the source
/// system, consumed exactly once by import on the destination.
///
/// `reserve_values` carries exactly one entry, the principal. Conversions
/// name the currency to convert into in `dest_currency_id`;
/// reserve-to-reserve conversions additionally name the final reserve in
/// `second_reserve_id` and route through the fractional basket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveTransfer {
    pub flags: u32,
    pub fee_currency_id: CurrencyId,
    pub fees: Amount,
    pub reserve_values: ValueMap,
    pub dest_currency_id: CurrencyId,
    pub second_reserve_id: Option<CurrencyId>,
    pub destination: TransferDestination,
}

impl ReserveTransfer {
    pub const VALID: u32 = 1;
    pub const CONVERT: u32 = 1 << 1;
    pub const PRECONVERT: u32 = 1 << 2;
    pub const FEE_OUTPUT: u32 = 1 << 3;
    pub const DOUBLE_SEND: u32 = 1 << 4;
    pub const MINT_CURRENCY: u32 = 1 << 5;
    pub const PREALLOCATE: u32 = 1 << 6;
    pub const BURN_CHANGE_PRICE: u32 = 1 << 7;
    pub const BURN_CHANGE_WEIGHT: u32 = 1 << 8;
    pub const IMPORT_TO_SOURCE: u32 = 1 << 9;
    pub const RESERVE_TO_RESERVE: u32 = 1 << 10;
    pub const REFUND: u32 = 1 << 11;

    pub fn new(
        flags: u32,
        currency: CurrencyId,
        value: Amount,
        fee_currency_id: CurrencyId,
        fees: Amount,
        dest_currency_id: CurrencyId,
        destination: TransferDestination,
    ) -> Self {
        let mut reserve_values = ValueMap::new();
        reserve_values.set_value(currency, value);
        ReserveTransfer {
            flags,
            fee_currency_id,
            fees,
            reserve_values,
            dest_currency_id,
            second_reserve_id: None,
            destination,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & Self::VALID != 0
            && self.reserve_values.len() == 1
            && !self.reserve_values.has_negative()
    }

    pub fn is_conversion(&self) -> bool {
        self.flags & Self::CONVERT != 0
    }

    pub fn is_pre_conversion(&self) -> bool {
        self.flags & Self::PRECONVERT != 0
    }

    pub fn is_fee_output(&self) -> bool {
        self.flags & Self::FEE_OUTPUT != 0
    }

    pub fn is_double_send(&self) -> bool {
        self.flags & Self::DOUBLE_SEND != 0
    }

    pub fn is_mint(&self) -> bool {
        self.flags & Self::MINT_CURRENCY != 0
    }

    pub fn is_preallocate(&self) -> bool {
        self.flags & Self::PREALLOCATE != 0
    }

    pub fn is_burn(&self) -> bool {
        self.flags & Self::BURN_CHANGE_PRICE != 0
    }

    pub fn is_burn_change_weight(&self) -> bool {
        self.flags & Self::BURN_CHANGE_WEIGHT != 0
    }

    pub fn is_import_to_source(&self) -> bool {
        self.flags & Self::IMPORT_TO_SOURCE != 0
    }

    pub fn is_reserve_to_reserve(&self) -> bool {
        self.flags & Self::RESERVE_TO_RESERVE != 0
    }

    pub fn is_refund(&self) -> bool {
        self.flags & Self::REFUND != 0
    }

    pub fn has_next_leg(&self) -> bool {
        self.destination.has_next_leg()
    }

    /// The principal currency (first and only entry)
    pub fn first_currency(&self) -> CurrencyId {
        self.reserve_values
            .first()
            .map(|(id, _)| *id)
            .unwrap_or_else(CurrencyId::zero)
    }

    pub fn first_value(&self) -> Amount {
        self.reserve_values.first().map(|(_, v)| *v).unwrap_or(0)
    }

    /// Base transfer fee for a destination: the doubled step fee, plus one
    /// more doubled step fee per DESTINATION_BYTE_DIVISOR bytes of address.
    /// Fee outputs and post-launch conversions ride free.
    pub fn calculate_transfer_fee_for(destination: &TransferDestination, flags: u32) -> Amount {
        if flags & Self::FEE_OUTPUT != 0
            || (flags & Self::PRECONVERT == 0 && flags & Self::CONVERT != 0)
        {
            return 0;
        }
        let base = TRANSFER_STEP_FEE << 1;
        base + base * (destination.address_len() / DESTINATION_BYTE_DIVISOR) as Amount
    }

    pub fn calculate_transfer_fee(&self) -> Amount {
        Self::calculate_transfer_fee_for(&self.destination, self.flags)
    }

    /// Conversion fees in the source currency, doubled for
    /// reserve-to-reserve routing
    pub fn conversion_fee_map(&self) -> ValueMap {
        let mut fees = ValueMap::new();
        if self.is_conversion() || self.is_pre_conversion() {
            for (id, value) in self.reserve_values.iter() {
                fees.add_value(*id, conversion_fee(*value));
            }
            if self.is_reserve_to_reserve() {
                fees = fees * 2;
            }
        }
        fees
    }

    /// All declared fees, including any carried next-leg fees
    pub fn total_transfer_fee(&self) -> ValueMap {
        let mut total = self.fees;
        if self.destination.has_gateway_leg() && self.destination.fees != 0 {
            total += self.destination.fees;
        }
        let mut fees = ValueMap::new();
        fees.add_value(self.fee_currency_id, total);
        fees
    }

    /// Rewrite this transfer as its refund: conversions are disarmed, the
    /// principal returns to its source currency, and a full-identity
    /// destination collapses to a plain identity, which already exists on
    /// the refunding chain.
    pub fn refund_transfer(&self) -> ReserveTransfer {
        let mut refund = self.clone();

        if let DestinationKind::FullIdentity(id) = refund.destination.kind {
            refund.destination.kind = DestinationKind::Identity(id);
        }

        refund.flags &= !(Self::DOUBLE_SEND | Self::PRECONVERT | Self::CONVERT);

        if refund.flags & (Self::PREALLOCATE | Self::MINT_CURRENCY) != 0 {
            refund.flags &= !(Self::PREALLOCATE | Self::MINT_CURRENCY);
            let first = refund.first_currency();
            refund.reserve_values.set_value(first, 0);
        }
        refund.flags |= Self::REFUND;
        refund.dest_currency_id = refund.first_currency();
        refund
    }

    /// Materialize the settlement of this transfer as a transaction output.
    ///
    /// A destination with a further leg produces a fresh reserve transfer;
    /// otherwise a plain payment when only native value is present, or a
    /// reserve-token output. Unsupported destination kinds produce nothing
    /// and the import fails.
    pub fn to_output(&self, reserves: ValueMap, native_amount: Amount) -> Option<TxOutput> {
        if self.has_next_leg() {
            let next_leg = if let DestinationKind::Nested(nested) = &self.destination.kind {
                // principal comes from this leg's output; fees were converted
                // and carried independently
                let mut transfer = (**nested).clone();
                transfer.reserve_values = reserves;
                transfer.fee_currency_id = self
                    .destination
                    .gateway_id
                    .unwrap_or_else(CurrencyId::zero);
                transfer.destination.fees = self.destination.fees;
                transfer
            } else {
                let mut last_leg = self.destination.clone();
                last_leg.clear_gateway_leg();
                ReserveTransfer {
                    flags: Self::VALID,
                    fee_currency_id: self.fee_currency_id,
                    fees: self.destination.fees,
                    reserve_values: reserves,
                    dest_currency_id: self.destination.gateway_id?,
                    second_reserve_id: None,
                    destination: last_leg,
                }
            };
            if !next_leg.is_valid() {
                return None;
            }
            return Some(TxOutput::Transfer {
                transfer: next_leg,
                native_amount,
            });
        }

        if reserves.canonical().is_empty() && native_amount != 0 {
            match self.destination.kind {
                DestinationKind::Identity(_)
                | DestinationKind::PublicKey(_)
                | DestinationKind::PublicKeyHash(_)
                | DestinationKind::ScriptHash(_) => Some(TxOutput::Payment {
                    destination: self.destination.clone(),
                    amount: native_amount,
                }),
                _ => None,
            }
        } else {
            match self.destination.kind {
                DestinationKind::Identity(_)
                | DestinationKind::PublicKey(_)
                | DestinationKind::PublicKeyHash(_) => Some(TxOutput::Token {
                    destination: self.destination.clone(),
                    token: TokenOutput {
                        values: reserves.canonical(),
                    },
                    native_amount,
                }),
                _ => None,
            }
        }
    }
}

impl Serializer for ReserveTransfer {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.flags);
        self.fee_currency_id.write(writer);
        self.fees.write(writer);
        self.reserve_values.write(writer);
        self.dest_currency_id.write(writer);
        self.second_reserve_id.write(writer);
        self.destination.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(ReserveTransfer {
            flags: u32::read(reader)?,
            fee_currency_id: CurrencyId::read(reader)?,
            fees: i64::read(reader)?,
            reserve_values: ValueMap::read(reader)?,
            dest_currency_id: CurrencyId::read(reader)?,
            second_reserve_id: Option::read(reader)?,
            destination: TransferDestination::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        self.to_bytes().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COIN_VALUE;

    fn id(byte: u8) -> CurrencyId {
        CurrencyId::new([byte; 20])
    }

    fn transfer(flags: u32) -> ReserveTransfer {
        ReserveTransfer::new(
            ReserveTransfer::VALID | flags,
            id(1),
            COIN_VALUE,
            id(1),
            20_000,
            id(10),
            TransferDestination::identity(id(50)),
        )
    }

    #[test]
    fn transfer_fee_scales_with_destination() {
        let plain = transfer(0);
        assert_eq!(plain.calculate_transfer_fee(), 20_000);

        // conversions after launch ride free, pre-conversions do not
        assert_eq!(transfer(ReserveTransfer::CONVERT).calculate_transfer_fee(), 0);
        assert_eq!(
            transfer(ReserveTransfer::CONVERT | ReserveTransfer::PRECONVERT)
                .calculate_transfer_fee(),
            20_000
        );

        // a nested destination big enough to cross the byte divisor pays more
        let mut inner = transfer(0);
        inner.destination.kind = DestinationKind::Nested(Box::new(transfer(0)));
        let mut big = transfer(0);
        big.destination.kind = DestinationKind::Nested(Box::new(inner));
        assert!(big.destination.address_len() >= DESTINATION_BYTE_DIVISOR);
        assert!(big.calculate_transfer_fee() > 20_000);
    }

    #[test]
    fn conversion_fee_has_floor_and_doubles() {
        assert_eq!(conversion_fee(COIN_VALUE), 25_000);
        assert_eq!(conversion_fee(1_000), MIN_CONVERSION_FEE);
        assert_eq!(conversion_fee_no_min(1_000), 0);

        let single = transfer(ReserveTransfer::CONVERT);
        assert_eq!(single.conversion_fee_map().value_of(&id(1)), 25_000);

        let mut double = transfer(ReserveTransfer::CONVERT | ReserveTransfer::RESERVE_TO_RESERVE);
        double.second_reserve_id = Some(id(2));
        assert_eq!(double.conversion_fee_map().value_of(&id(1)), 50_000);
    }

    #[test]
    fn additional_conversion_fee_grosses_up() {
        for amount in [COIN_VALUE, 10 * COIN_VALUE, 12_345_678_900] {
            let add = additional_conversion_fee(amount);
            let gross = amount + add;
            assert_eq!(gross - conversion_fee(gross), amount);
        }
    }

    #[test]
    fn total_transfer_fee_includes_gateway_leg() {
        let mut t = transfer(0);
        assert_eq!(t.total_transfer_fee().value_of(&id(1)), 20_000);
        t.destination.gateway_id = Some(id(30));
        t.destination.fees = 40_000;
        assert_eq!(t.total_transfer_fee().value_of(&id(1)), 60_000);
    }

    #[test]
    fn refund_disarms_conversion_and_redirects() {
        let mut t = transfer(ReserveTransfer::CONVERT | ReserveTransfer::PRECONVERT);
        t.destination.kind = DestinationKind::FullIdentity(id(50));
        let refund = t.refund_transfer();

        assert!(refund.is_refund());
        assert!(!refund.is_conversion() && !refund.is_pre_conversion());
        assert_eq!(refund.dest_currency_id, id(1));
        assert_eq!(refund.destination.kind, DestinationKind::Identity(id(50)));
    }

    #[test]
    fn refund_is_idempotent() {
        let t = transfer(ReserveTransfer::CONVERT | ReserveTransfer::PRECONVERT);
        let once = t.refund_transfer();
        assert_eq!(once.refund_transfer(), once);
    }

    #[test]
    fn refund_zeroes_minted_principal() {
        let t = transfer(ReserveTransfer::MINT_CURRENCY);
        let refund = t.refund_transfer();
        assert_eq!(refund.first_value(), 0);
        assert!(!refund.is_mint());
    }

    #[test]
    fn output_forms() {
        let t = transfer(0);

        // native only: plain payment
        let out = t.to_output(ValueMap::new(), 500).unwrap();
        assert!(matches!(out, TxOutput::Payment { amount: 500, .. }));

        // reserve value: token output
        let mut reserves = ValueMap::new();
        reserves.add_value(id(1), 700);
        let out = t.to_output(reserves, 0).unwrap();
        match out {
            TxOutput::Token { token, .. } => assert_eq!(token.values.value_of(&id(1)), 700),
            other => panic!("expected token output, got {other:?}"),
        }

        // script-hash destinations cannot take token outputs
        let mut script = transfer(0);
        script.destination.kind = DestinationKind::ScriptHash([9; 20]);
        let mut reserves = ValueMap::new();
        reserves.add_value(id(1), 700);
        assert!(script.to_output(reserves, 0).is_none());
    }

    #[test]
    fn next_leg_output_builds_fresh_transfer() {
        let mut t = transfer(0);
        t.destination.gateway_id = Some(id(30));
        t.destination.fees = 15_000;
        let mut reserves = ValueMap::new();
        reserves.add_value(id(1), 900);

        match t.to_output(reserves, 0).unwrap() {
            TxOutput::Transfer { transfer, .. } => {
                assert_eq!(transfer.dest_currency_id, id(30));
                assert_eq!(transfer.fees, 15_000);
                assert!(!transfer.destination.has_next_leg());
                assert_eq!(transfer.reserve_values.value_of(&id(1)), 900);
            }
            other => panic!("expected transfer output, got {other:?}"),
        }
    }

    #[test]
    fn nested_output_reuses_inner_transfer() {
        let inner = transfer(0);
        let mut t = transfer(0);
        t.destination.kind = DestinationKind::Nested(Box::new(inner));
        t.destination.gateway_id = Some(id(30));
        t.destination.fees = 9_000;
        let mut reserves = ValueMap::new();
        reserves.add_value(id(2), 333);

        match t.to_output(reserves, 0).unwrap() {
            TxOutput::Transfer { transfer, .. } => {
                assert_eq!(transfer.fee_currency_id, id(30));
                assert_eq!(transfer.destination.fees, 9_000);
                assert_eq!(transfer.reserve_values.value_of(&id(2)), 333);
            }
            other => panic!("expected transfer output, got {other:?}"),
        }
    }

    #[test]
    fn wire_round_trip() {
        let mut t = transfer(ReserveTransfer::CONVERT | ReserveTransfer::RESERVE_TO_RESERVE);
        t.second_reserve_id = Some(id(2));
        assert_eq!(ReserveTransfer::from_bytes(&t.to_bytes()).unwrap(), t);
    }
}
