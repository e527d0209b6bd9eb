use super::CurrencyState;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// [`CurrencyState`] extended with the per-block ledger the import processor
/// recomputes on every import: reserve/native flow columns, the committed
/// conversion and via-conversion price schedules, and fee tallies.
///
/// All columns are parallel to `state.currencies`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCurrencyState {
    pub state: CurrencyState,
    pub reserve_in: Vec<Amount>,
    pub native_in: Vec<Amount>,
    pub reserve_out: Vec<Amount>,
    pub conversion_price: Vec<Amount>,
    pub via_conversion_price: Vec<Amount>,
    pub fees: Vec<Amount>,
    pub conversion_fees: Vec<Amount>,
    pub native_fees: Amount,
    pub native_conversion_fees: Amount,
    pub native_out: Amount,
    pub pre_converted_out: Amount,
}

impl BlockCurrencyState {
    pub fn new(state: CurrencyState) -> Self {
        let count = state.currencies.len();
        BlockCurrencyState {
            state,
            reserve_in: vec![0; count],
            native_in: vec![0; count],
            reserve_out: vec![0; count],
            conversion_price: vec![0; count],
            via_conversion_price: vec![0; count],
            fees: vec![0; count],
            conversion_fees: vec![0; count],
            native_fees: 0,
            native_conversion_fees: 0,
            native_out: 0,
            pre_converted_out: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        let count = self.state.currencies.len();
        self.state.is_valid()
            && self.reserve_in.len() == count
            && self.native_in.len() == count
            && self.reserve_out.len() == count
            && self.conversion_price.len() == count
            && self.via_conversion_price.len() == count
            && self.fees.len() == count
            && self.conversion_fees.len() == count
    }

    /// Zero the per-block ledger and mark the current supply as the block's
    /// starting supply. Conversion prices are retained: they are state, not
    /// ledger.
    pub fn clear_for_next_block(&mut self) {
        let count = self.state.currencies.len();
        self.reserve_in = vec![0; count];
        self.native_in = vec![0; count];
        self.reserve_out = vec![0; count];
        self.fees = vec![0; count];
        self.conversion_fees = vec![0; count];
        self.native_fees = 0;
        self.native_conversion_fees = 0;
        self.native_out = 0;
        self.pre_converted_out = 0;
        self.state.initial_supply = self.state.supply;
        self.state.emitted = 0;
    }

    /// Undo this block's reserve and supply changes, returning the state the
    /// import processor started from: reserve outs are re-added and ins
    /// removed, converted fractional is restored, and the block's native out
    /// (or emission, whichever is larger) less pre-converted output is put
    /// back on the supply. Ends by clearing the ledger.
    pub fn revert_reserves_and_supply(&mut self) {
        for i in 0..self.state.currencies.len() {
            self.state.reserves[i] += self.reserve_out[i] - self.reserve_in[i];
            self.state.supply += self.native_in[i];
        }
        self.state.supply -= self.native_out.max(self.state.emitted) - self.pre_converted_out;
        self.clear_for_next_block();
    }
}

impl Deref for BlockCurrencyState {
    type Target = CurrencyState;
    fn deref(&self) -> &CurrencyState {
        &self.state
    }
}

impl DerefMut for BlockCurrencyState {
    fn deref_mut(&mut self) -> &mut CurrencyState {
        &mut self.state
    }
}

impl Serializer for BlockCurrencyState {
    fn write(&self, writer: &mut Writer) {
        self.state.write(writer);
        self.reserve_in.write(writer);
        self.native_in.write(writer);
        self.reserve_out.write(writer);
        self.conversion_price.write(writer);
        self.via_conversion_price.write(writer);
        self.fees.write(writer);
        self.conversion_fees.write(writer);
        self.native_fees.write(writer);
        self.native_conversion_fees.write(writer);
        self.native_out.write(writer);
        self.pre_converted_out.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let block_state = BlockCurrencyState {
            state: CurrencyState::read(reader)?,
            reserve_in: Vec::read(reader)?,
            native_in: Vec::read(reader)?,
            reserve_out: Vec::read(reader)?,
            conversion_price: Vec::read(reader)?,
            via_conversion_price: Vec::read(reader)?,
            fees: Vec::read(reader)?,
            conversion_fees: Vec::read(reader)?,
            native_fees: i64::read(reader)?,
            native_conversion_fees: i64::read(reader)?,
            native_out: i64::read(reader)?,
            pre_converted_out: i64::read(reader)?,
        };
        let count = block_state.state.currencies.len();
        let structural = block_state.reserve_in.len() == count
            && block_state.native_in.len() == count
            && block_state.reserve_out.len() == count
            && block_state.conversion_price.len() == count
            && block_state.via_conversion_price.len() == count
            && block_state.fees.len() == count
            && block_state.conversion_fees.len() == count;
        if !structural {
            return Err(ReaderError::InvalidValue);
        }
        Ok(block_state)
    }

    fn size(&self) -> usize {
        self.to_bytes().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COIN_VALUE;
    use crate::currency::CurrencyId;

    fn block_state() -> BlockCurrencyState {
        let ids: Vec<CurrencyId> = (1..=2).map(|i| CurrencyId::new([i; 20])).collect();
        let state = CurrencyState::new(
            CurrencyId::new([100; 20]),
            ids,
            vec![50_000_000, 50_000_000],
            vec![10 * COIN_VALUE, 10 * COIN_VALUE],
            20 * COIN_VALUE,
            CurrencyState::FLAG_FRACTIONAL | CurrencyState::FLAG_LAUNCH_COMPLETE,
        );
        BlockCurrencyState::new(state)
    }

    #[test]
    fn revert_is_inverse_of_block_application() {
        let before = block_state();

        // apply a block: 1.0 of reserve 0 in, 0.5 of reserve 1 out,
        // 0.25 fractional converted in, 0.8 native out
        let mut after = before.clone();
        after.reserve_in[0] = COIN_VALUE;
        after.state.reserves[0] += COIN_VALUE;
        after.reserve_out[1] = COIN_VALUE / 2;
        after.state.reserves[1] -= COIN_VALUE / 2;
        after.native_in[0] = COIN_VALUE / 4;
        after.state.supply -= COIN_VALUE / 4;
        after.native_out = 8 * COIN_VALUE / 10;
        after.state.supply += after.native_out;

        after.revert_reserves_and_supply();
        assert_eq!(after, before);
    }

    #[test]
    fn clear_resets_ledger_but_not_prices() {
        let mut state = block_state();
        state.conversion_price = vec![COIN_VALUE, COIN_VALUE];
        state.native_fees = 500;
        state.reserve_in[0] = 7;
        state.clear_for_next_block();
        assert_eq!(state.native_fees, 0);
        assert_eq!(state.reserve_in, vec![0, 0]);
        assert_eq!(state.conversion_price, vec![COIN_VALUE, COIN_VALUE]);
        assert_eq!(state.initial_supply, state.supply);
    }

    #[test]
    fn wire_round_trip() {
        let mut state = block_state();
        state.fees[1] = 42;
        state.native_out = 9;
        assert_eq!(
            BlockCurrencyState::from_bytes(&state.to_bytes()).unwrap(),
            state
        );
    }
}
