use super::CurrencyId;
use crate::config::COIN_VALUE;
use crate::math;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed state of a currency: the reserve basket, the outstanding
/// supply, and the phase flags that gate pricing and output rules.
///
/// `currencies`, `weights`, and `reserves` are parallel vectors in the
/// reserve declaration order of the currency definition. Weights are satoshi
/// fractions of 100% and must sum to at most `COIN_VALUE` for a fractional
/// currency.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyState {
    pub currency_id: CurrencyId,
    pub flags: u16,
    pub currencies: Vec<CurrencyId>,
    pub weights: Vec<Amount>,
    pub reserves: Vec<Amount>,
    /// Supply at the start of the current block, before emission
    pub initial_supply: Amount,
    /// Amount emitted by the last `update_with_emission`
    pub emitted: Amount,
    pub supply: Amount,
}

impl CurrencyState {
    pub const FLAG_VALID: u16 = 1;
    pub const FLAG_FRACTIONAL: u16 = 1 << 1;
    pub const FLAG_PRELAUNCH: u16 = 1 << 2;
    pub const FLAG_REFUNDING: u16 = 1 << 3;
    pub const FLAG_LAUNCH_CLEAR: u16 = 1 << 4;
    pub const FLAG_LAUNCH_CONFIRMED: u16 = 1 << 5;
    pub const FLAG_LAUNCH_COMPLETE: u16 = 1 << 6;

    pub fn new(
        currency_id: CurrencyId,
        currencies: Vec<CurrencyId>,
        weights: Vec<Amount>,
        reserves: Vec<Amount>,
        supply: Amount,
        flags: u16,
    ) -> Self {
        CurrencyState {
            currency_id,
            flags: flags | Self::FLAG_VALID,
            currencies,
            weights,
            reserves,
            initial_supply: supply,
            emitted: 0,
            supply,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & Self::FLAG_VALID != 0
            && self.currencies.len() == self.weights.len()
            && self.currencies.len() == self.reserves.len()
    }

    pub fn is_fractional(&self) -> bool {
        self.flags & Self::FLAG_FRACTIONAL != 0
    }

    pub fn is_prelaunch(&self) -> bool {
        self.flags & Self::FLAG_PRELAUNCH != 0
    }

    pub fn is_refunding(&self) -> bool {
        self.flags & Self::FLAG_REFUNDING != 0
    }

    pub fn is_launch_clear(&self) -> bool {
        self.flags & Self::FLAG_LAUNCH_CLEAR != 0
    }

    pub fn is_launch_confirmed(&self) -> bool {
        self.flags & Self::FLAG_LAUNCH_CONFIRMED != 0
    }

    /// Launch fully complete: conversions use the dynamic price schedule
    pub fn is_launch_complete(&self) -> bool {
        self.flags & Self::FLAG_LAUNCH_COMPLETE != 0
    }

    pub fn set_launch_clear(&mut self) {
        self.flags |= Self::FLAG_LAUNCH_CLEAR;
    }

    pub fn set_invalid(&mut self) {
        self.flags &= !Self::FLAG_VALID;
    }

    /// Reserve id -> index into the parallel vectors
    pub fn reserve_map(&self) -> BTreeMap<CurrencyId, usize> {
        self.currencies
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, idx))
            .collect()
    }

    /// Satoshis of reserve `index` per unit of supply at the current state:
    /// `reserves[i] * COIN_VALUE^2 / (supply * weights[i])`, truncated.
    /// A zero supply is priced as one satoshi of supply; a zero weight
    /// prices at zero.
    pub fn price_in_reserve(&self, index: usize) -> Amount {
        if index >= self.currencies.len() {
            return 0;
        }
        let weight = self.weights[index];
        let reserve = self.reserves[index];
        if weight <= 0 || reserve < 0 {
            return 0;
        }
        let supply = if self.supply != 0 { self.supply } else { 1 };
        if supply < 0 {
            return 0;
        }
        let numerator =
            U256::from(reserve as u64) * U256::from(COIN_VALUE as u64) * U256::from(COIN_VALUE as u64);
        let denominator = U256::from(supply as u64) * U256::from(weight as u64);
        math::to_amount(numerator / denominator).unwrap_or(Amount::MAX)
    }

    pub fn prices_in_reserve(&self) -> Vec<Amount> {
        (0..self.currencies.len())
            .map(|i| self.price_in_reserve(i))
            .collect()
    }

    /// Reserve satoshis -> supply satoshis at an explicit price.
    /// `None` when the 256-bit intermediate exceeds the 64-bit range.
    pub fn reserve_to_native_raw(amount: Amount, price: Amount) -> Option<Amount> {
        if price <= 0 || amount == 0 {
            return Some(0);
        }
        math::mul_div(amount, COIN_VALUE, price)
    }

    /// Supply satoshis -> reserve satoshis at an explicit price.
    pub fn native_to_reserve_raw(amount: Amount, price: Amount) -> Option<Amount> {
        if amount == 0 || price == 0 {
            return Some(0);
        }
        math::mul_div(amount, price, COIN_VALUE)
    }

    pub fn reserve_to_native(&self, amount: Amount, index: usize) -> Option<Amount> {
        Self::reserve_to_native_raw(amount, self.price_in_reserve(index))
    }

    pub fn native_to_reserve(&self, amount: Amount, index: usize) -> Option<Amount> {
        Self::native_to_reserve_raw(amount, self.price_in_reserve(index))
    }

    /// Single-pair conversion: vectorizes one reserve/fractional input at
    /// `reserve_index` and runs the batched clearing.
    pub fn convert_single(
        &self,
        input_reserve: Amount,
        input_fractional: Amount,
        new_state: &mut CurrencyState,
        reserve_index: usize,
    ) -> Amount {
        let count = self.currencies.len();
        if reserve_index >= count {
            log::warn!("convert_single: reserve index {reserve_index} out of range");
            return 0;
        }
        let mut input_reserves = vec![0; count];
        input_reserves[reserve_index] = input_reserve;
        let mut input_fractional_vec = vec![0; count];
        input_fractional_vec[reserve_index] = input_fractional;
        let rates =
            self.convert_amounts(&input_reserves, &input_fractional_vec, new_state, None, None);
        rates[reserve_index]
    }
}

impl Serializer for CurrencyState {
    fn write(&self, writer: &mut Writer) {
        self.currency_id.write(writer);
        self.flags.write(writer);
        self.currencies.write(writer);
        self.weights.write(writer);
        self.reserves.write(writer);
        self.initial_supply.write(writer);
        self.emitted.write(writer);
        self.supply.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let state = CurrencyState {
            currency_id: CurrencyId::read(reader)?,
            flags: u16::read(reader)?,
            currencies: Vec::read(reader)?,
            weights: Vec::read(reader)?,
            reserves: Vec::read(reader)?,
            initial_supply: i64::read(reader)?,
            emitted: i64::read(reader)?,
            supply: i64::read(reader)?,
        };
        if state.currencies.len() != state.weights.len()
            || state.currencies.len() != state.reserves.len()
        {
            return Err(ReaderError::InvalidValue);
        }
        Ok(state)
    }

    fn size(&self) -> usize {
        self.to_bytes().len()
    }
}
