use crate::currency::{CurrencyDefinition, CurrencyId, CurrencyRegistry, CurrencyState, ValueMap};
use crate::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-currency flow counters inside one transaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveInOuts {
    pub reserve_in: Amount,
    pub reserve_out: Amount,
    /// Portion of `reserve_out` that was produced by conversion
    pub reserve_out_converted: Amount,
    /// Supply of this currency created or destroyed by conversion
    pub native_out_converted: Amount,
    pub reserve_conversion_fees: Amount,
}

/// Ledger of reserve and native flows for one transaction: what came in,
/// what went out, what was converted, and the fees in between. External
/// validation compares these tallies against the transaction's actual
/// inputs and outputs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionDescriptor {
    pub flags: u16,
    pub currencies: BTreeMap<CurrencyId, ReserveInOuts>,
    pub native_in: Amount,
    pub native_out: Amount,
    pub native_conversion_fees: Amount,
    pub num_transfers: u32,
}

impl TransactionDescriptor {
    pub const IS_VALID: u16 = 1;
    pub const IS_REJECT: u16 = 1 << 1;
    pub const IS_RESERVE: u16 = 1 << 2;
    pub const IS_IMPORT: u16 = 1 << 3;
    pub const IS_EXPORT: u16 = 1 << 4;
    pub const IS_IDENTITY: u16 = 1 << 5;
    pub const IS_IDENTITY_DEFINITION: u16 = 1 << 6;
    pub const IS_HIGH_FEE: u16 = 1 << 7;

    pub fn new() -> Self {
        TransactionDescriptor {
            flags: Self::IS_VALID,
            ..Default::default()
        }
    }

    pub fn is_reserve(&self) -> bool {
        self.flags & Self::IS_RESERVE != 0
    }

    pub fn is_import(&self) -> bool {
        self.flags & Self::IS_IMPORT != 0
    }

    pub fn add_reserve_input(&mut self, currency: CurrencyId, value: Amount) {
        self.currencies.entry(currency).or_default().reserve_in += value;
    }

    pub fn add_reserve_output(&mut self, currency: CurrencyId, value: Amount) {
        self.currencies.entry(currency).or_default().reserve_out += value;
    }

    pub fn add_reserve_out_converted(&mut self, currency: CurrencyId, value: Amount) {
        self.currencies
            .entry(currency)
            .or_default()
            .reserve_out_converted += value;
    }

    pub fn add_native_out_converted(&mut self, currency: CurrencyId, value: Amount) {
        self.currencies
            .entry(currency)
            .or_default()
            .native_out_converted += value;
    }

    pub fn add_reserve_conversion_fees(&mut self, currency: CurrencyId, value: Amount) {
        self.currencies
            .entry(currency)
            .or_default()
            .reserve_conversion_fees += value;
    }

    pub fn native_fees(&self) -> Amount {
        self.native_in - self.native_out
    }

    /// Reserve fees: per currency, inputs minus unconverted outputs
    pub fn reserve_fees(&self, native_id: &CurrencyId) -> ValueMap {
        let mut fees = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            if id != native_id {
                let fee = in_outs.reserve_in - (in_outs.reserve_out - in_outs.reserve_out_converted);
                if fee != 0 {
                    fees.set_value(*id, fee);
                }
            }
        }
        fees
    }

    /// All fees expressed in native at the state's current prices
    pub fn all_fees_as_native(&self, state: &CurrencyState, native_id: &CurrencyId) -> Option<Amount> {
        let mut total = self.native_fees();
        let reserve_fees = self.reserve_fees(native_id);
        for (i, id) in state.currencies.iter().enumerate() {
            let fee = reserve_fees.value_of(id);
            if fee != 0 {
                total += state.reserve_to_native(fee, i)?;
            }
        }
        Some(total)
    }

    /// All fees as native at caller-supplied exchange rates
    pub fn all_fees_as_native_raw(
        &self,
        state: &CurrencyState,
        exchange_rates: &[Amount],
        native_id: &CurrencyId,
    ) -> Option<Amount> {
        debug_assert_eq!(exchange_rates.len(), state.currencies.len());
        let mut total = self.native_fees();
        let reserve_fees = self.reserve_fees(native_id);
        for (i, id) in state.currencies.iter().enumerate() {
            let fee = reserve_fees.value_of(id);
            if fee != 0 {
                total += CurrencyState::reserve_to_native_raw(fee, exchange_rates[i])?;
            }
        }
        Some(total)
    }

    /// All fees as a reserve map, native folded into `default_reserve`
    pub fn all_fees_as_reserve(
        &self,
        state: &CurrencyState,
        default_reserve: usize,
        native_id: &CurrencyId,
    ) -> Option<ValueMap> {
        let mut fees = self.reserve_fees(native_id);
        let reserve_id = *state.currencies.get(default_reserve)?;
        if fees.0.contains_key(&reserve_id) {
            let converted = state.native_to_reserve(self.native_fees(), default_reserve)?;
            fees.add_value(reserve_id, converted);
        } else {
            fees.set_value(reserve_id, self.native_fees());
        }
        Some(fees)
    }

    /// Explicit-rate form of [`Self::all_fees_as_reserve`]
    pub fn all_fees_as_reserve_raw(
        &self,
        state: &CurrencyState,
        exchange_rates: &[Amount],
        default_reserve: usize,
        native_id: &CurrencyId,
    ) -> Option<ValueMap> {
        let mut fees = self.reserve_fees(native_id);
        let reserve_id = *state.currencies.get(default_reserve)?;
        if fees.0.contains_key(&reserve_id) {
            let converted = CurrencyState::native_to_reserve_raw(
                self.native_fees(),
                *exchange_rates.get(default_reserve)?,
            )?;
            fees.add_value(reserve_id, converted);
        } else {
            fees.set_value(reserve_id, self.native_fees());
        }
        Some(fees)
    }

    pub fn reserve_input_map(&self, native_id: &CurrencyId) -> ValueMap {
        let mut map = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            if id != native_id && in_outs.reserve_in != 0 {
                map.set_value(*id, in_outs.reserve_in);
            }
            if in_outs.native_out_converted != 0 {
                map.set_value(*id, in_outs.native_out_converted);
            }
        }
        map
    }

    pub fn reserve_output_map(&self, native_id: &CurrencyId) -> ValueMap {
        let mut map = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            if id != native_id && in_outs.reserve_out != 0 {
                map.set_value(*id, in_outs.reserve_out);
            }
        }
        map
    }

    pub fn reserve_out_converted_map(&self, native_id: &CurrencyId) -> ValueMap {
        let mut map = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            if id != native_id && in_outs.reserve_out_converted != 0 {
                map.set_value(*id, in_outs.reserve_out_converted);
            }
        }
        map
    }

    pub fn native_out_converted_map(&self) -> ValueMap {
        let mut map = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            if in_outs.native_out_converted != 0 {
                map.set_value(*id, in_outs.native_out_converted);
            }
        }
        map
    }

    pub fn reserve_conversion_fees_map(&self) -> ValueMap {
        let mut map = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            if in_outs.reserve_conversion_fees != 0 {
                map.set_value(*id, in_outs.reserve_conversion_fees);
            }
        }
        map
    }

    fn vector_of(&self, state: &CurrencyState, field: impl Fn(&ReserveInOuts) -> Amount) -> Vec<Amount> {
        let index = state.reserve_map();
        let mut values = vec![0; state.currencies.len()];
        for (id, in_outs) in &self.currencies {
            if let Some(i) = index.get(id) {
                values[*i] = field(in_outs);
            }
        }
        values
    }

    pub fn reserve_input_vec(&self, state: &CurrencyState) -> Vec<Amount> {
        self.vector_of(state, |io| io.reserve_in)
    }

    pub fn reserve_output_vec(&self, state: &CurrencyState) -> Vec<Amount> {
        self.vector_of(state, |io| io.reserve_out)
    }

    pub fn reserve_out_converted_vec(&self, state: &CurrencyState) -> Vec<Amount> {
        self.vector_of(state, |io| io.reserve_out_converted)
    }

    pub fn native_out_converted_vec(&self, state: &CurrencyState) -> Vec<Amount> {
        self.vector_of(state, |io| io.native_out_converted)
    }

    pub fn reserve_conversion_fees_vec(&self, state: &CurrencyState) -> Vec<Amount> {
        self.vector_of(state, |io| io.reserve_conversion_fees)
    }

    /// Currencies this import conjured from nothing: converted supply of the
    /// import currency itself, plus reserve inputs whose definitions are
    /// controlled by the remote source system. Only meaningful right after
    /// `add_import_outputs` on a fresh descriptor.
    pub fn generated_import_currency(
        &self,
        from_system: &CurrencyId,
        chain_id: &CurrencyId,
        import_currency: &CurrencyId,
        registry: &dyn CurrencyRegistry,
    ) -> ValueMap {
        let mut generated = ValueMap::new();
        for (id, in_outs) in &self.currencies {
            let is_import_currency = id == import_currency;
            let from_remote = in_outs.reserve_in != 0
                && from_system != chain_id
                && registry
                    .currency(id)
                    .map(|def: CurrencyDefinition| def.system_id == *from_system)
                    .unwrap_or(false);
            if (in_outs.native_out_converted != 0 && is_import_currency) || from_remote {
                generated.set_value(
                    *id,
                    if is_import_currency {
                        in_outs.native_out_converted
                    } else {
                        in_outs.reserve_in
                    },
                );
            }
        }
        generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COIN_VALUE;

    fn id(byte: u8) -> CurrencyId {
        CurrencyId::new([byte; 20])
    }

    fn state() -> CurrencyState {
        CurrencyState::new(
            id(100),
            vec![id(1), id(2)],
            vec![50_000_000, 50_000_000],
            vec![10 * COIN_VALUE, 10 * COIN_VALUE],
            20 * COIN_VALUE,
            CurrencyState::FLAG_FRACTIONAL | CurrencyState::FLAG_LAUNCH_COMPLETE,
        )
    }

    #[test]
    fn reserve_fees_exclude_converted_outputs() {
        let mut desc = TransactionDescriptor::new();
        desc.add_reserve_input(id(1), 1_000);
        desc.add_reserve_output(id(1), 900);
        desc.add_reserve_out_converted(id(1), 400);
        // fee = in - (out - converted) = 1000 - 500
        assert_eq!(desc.reserve_fees(&id(99)).value_of(&id(1)), 500);
        // the native currency is never a reserve fee
        assert_eq!(desc.reserve_fees(&id(1)).value_of(&id(1)), 0);
    }

    #[test]
    fn all_fees_as_native_uses_state_prices() {
        let state = state();
        // both reserves price at 1.0 here
        let mut desc = TransactionDescriptor::new();
        desc.native_in = 700;
        desc.add_reserve_input(id(1), 300);
        assert_eq!(desc.all_fees_as_native(&state, &id(99)).unwrap(), 1_000);

        let doubled = vec![2 * COIN_VALUE, 2 * COIN_VALUE];
        assert_eq!(
            desc.all_fees_as_native_raw(&state, &doubled, &id(99)).unwrap(),
            700 + 150
        );
    }

    #[test]
    fn all_fees_as_reserve_folds_native() {
        let state = state();
        let mut desc = TransactionDescriptor::new();
        desc.native_in = 500;
        let fees = desc.all_fees_as_reserve(&state, 0, &id(99)).unwrap();
        assert_eq!(fees.value_of(&id(1)), 500);
    }

    #[test]
    fn vector_forms_follow_reserve_order() {
        let state = state();
        let mut desc = TransactionDescriptor::new();
        desc.add_reserve_input(id(2), 5);
        desc.add_reserve_conversion_fees(id(1), 7);
        assert_eq!(desc.reserve_input_vec(&state), vec![0, 5]);
        assert_eq!(desc.reserve_conversion_fees_vec(&state), vec![7, 0]);
    }

    #[test]
    fn generated_import_currency_tracks_minted_and_remote() {
        let remote_system = id(50);
        let chain = id(1);
        let import_currency = id(100);

        let mut registry: BTreeMap<CurrencyId, CurrencyDefinition> = BTreeMap::new();
        let mut remote_def = CurrencyDefinition {
            name: "remote".into(),
            id: id(60),
            system_id: remote_system,
            gateway_id: None,
            launch_system_id: remote_system,
            fractional: false,
            token: true,
            pbaas_chain: false,
            gateway_converter: false,
            mintable: false,
            currencies: vec![],
            weights: vec![],
            pre_allocation: Default::default(),
            gateway_converter_issuance: 0,
            total_carve_out: 0,
            currency_registration_fee: 0,
        };
        registry.insert(id(60), remote_def.clone());
        remote_def.id = id(61);
        remote_def.system_id = chain;
        registry.insert(id(61), remote_def);

        let mut desc = TransactionDescriptor::new();
        desc.add_native_out_converted(import_currency, 1_000);
        desc.add_reserve_input(id(60), 200); // controlled by the remote system
        desc.add_reserve_input(id(61), 300); // local currency: not generated

        let generated =
            desc.generated_import_currency(&remote_system, &chain, &import_currency, &registry);
        assert_eq!(generated.value_of(&import_currency), 1_000);
        assert_eq!(generated.value_of(&id(60)), 200);
        assert_eq!(generated.value_of(&id(61)), 0);
    }
}
