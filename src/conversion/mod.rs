//! Batched multi-reserve clearing.
//!
//! All conversions in a block clear at one price per reserve. Inputs are
//! reduced to net fractional-equivalent flows per reserve, sliced into
//! horizontal layers of equal depth across participating reserves, run
//! through the bonded curve in both directions (buys first, then sells, and
//! the reverse), and committed at the floor of the mean of the two
//! directions. The averaging is what makes the clearing price independent of
//! transaction ordering within the block.

use crate::config::COIN_VALUE;
use crate::currency::{CurrencyId, CurrencyState};
use crate::math::{self, curve};
use crate::Amount;
use primitive_types::U256;
use std::collections::BTreeMap;

/// A horizontal slice across several reserves at the same
/// fractional-equivalent depth.
struct Layer {
    /// Sum of the participating reserves' weights
    weight: Amount,
    /// Total fractional-equivalent volume of the slice
    amount: Amount,
    currencies: Vec<CurrencyId>,
}

/// Net flows keyed by fractional-equivalent depth; entries at the same depth
/// keep currency declaration order.
type FlowMap = BTreeMap<Amount, Vec<(Amount, CurrencyId)>>;

fn build_layers(
    flows: &FlowMap,
    weight_of: &BTreeMap<CurrencyId, Amount>,
    max_reserve_ratio: Amount,
) -> Option<Vec<Layer>> {
    // flatten sorted by depth; residuals confirm each entry is consumed
    // exactly by the slices below its depth
    let mut entries: Vec<(Amount, Amount, CurrencyId)> = Vec::new();
    for (depth, bucket) in flows {
        for (amount, id) in bucket {
            entries.push((*depth, *amount, *id));
        }
    }

    let big_max_ratio = U256::from(max_reserve_ratio as u64);
    let mut layers = Vec::new();
    let mut layer_start: Amount = 0;
    let mut next = 0usize;
    while next < entries.len() {
        let depth = entries[next].0;
        let height = depth - layer_start;
        layer_start = depth;

        let mut layer = Layer {
            weight: 0,
            amount: 0,
            currencies: Vec::new(),
        };
        for entry in &mut entries[next..] {
            let weight = weight_of[&entry.2];
            let slice = U256::from(height as u64) * U256::from(weight as u64) / big_max_ratio;
            let slice = math::to_amount(slice)?;
            entry.1 -= slice;
            if entry.1 < 0 {
                log::warn!("convert_amounts: underflow slicing conversion layers");
                return None;
            }
            layer.weight += weight;
            layer.amount += slice;
            layer.currencies.push(entry.2);
        }
        layers.push(layer);

        // entries at this depth are fully consumed
        while next < entries.len() && entries[next].0 == depth {
            next += 1;
        }
    }
    Some(layers)
}

impl CurrencyState {
    /// Clear one block of conversion activity against this state.
    ///
    /// `input_reserves[i]` is the net reserve deposited buying fractional
    /// through reserve `i`; `input_fractional[i]` the net fractional sold to
    /// reserve `i`. `cross_conversions[i][j]` carries reserve-to-reserve
    /// amounts from reserve `i` to reserve `j`; their second leg runs as a
    /// recursive clearing on the post-state, and its prices fill
    /// `via_prices`.
    ///
    /// Returns the clearing price of the fractional in each reserve. On any
    /// failure the initial price vector is returned and `new_state_out` is
    /// left untouched — callers detect failure by checking that the out
    /// state became valid.
    pub fn convert_amounts(
        &self,
        input_reserves: &[Amount],
        input_fractional: &[Amount],
        new_state_out: &mut CurrencyState,
        cross_conversions: Option<&[Vec<Amount>]>,
        via_prices: Option<&mut Vec<Amount>>,
    ) -> Vec<Amount> {
        let num_currencies = self.currencies.len();
        let initial_rates = self.prices_in_reserve();
        let mut new_state = self.clone();

        if input_reserves.len() != num_currencies || input_fractional.len() != num_currencies {
            log::warn!("convert_amounts: invalid parameters");
            return initial_rates;
        }

        // a malformed cross matrix disables conversion detection, which
        // makes the call a no-op rather than a failure
        let cross_ok = cross_conversions.map_or(true, |cross| {
            cross.len() == num_currencies && cross.iter().all(|row| row.len() == num_currencies)
        });
        let have_conversion = cross_ok
            && input_reserves
                .iter()
                .chain(input_fractional.iter())
                .any(|v| *v != 0);
        if !have_conversion {
            *new_state_out = new_state;
            return initial_rates;
        }

        if input_reserves.iter().any(|v| *v < 0) || input_fractional.iter().any(|v| *v < 0) {
            log::warn!("convert_amounts: negative input amount for conversion");
            return initial_rates;
        }

        let mut max_reserve_ratio: Amount = 0;
        let mut total_reserve_weight: Amount = 0;
        for weight in &self.weights {
            if *weight <= 0 {
                log::warn!("convert_amounts: zero weight currency for conversion");
                return initial_rates;
            }
            max_reserve_ratio = max_reserve_ratio.max(*weight);
            total_reserve_weight += weight;
        }
        if max_reserve_ratio == 0 {
            log::warn!("convert_amounts: cannot convert on a non-fractional currency");
            return initial_rates;
        }
        if total_reserve_weight > COIN_VALUE {
            log::warn!("convert_amounts: total backing weight exceeds 100%");
            return initial_rates;
        }

        // Reduce each currency's activity to a net inflow or outflow of
        // fractional, keyed by depth normalized through the weight ratio.
        let big_max_ratio = U256::from(max_reserve_ratio as u64);
        let mut fractional_in: FlowMap = BTreeMap::new();
        let mut fractional_out: FlowMap = BTreeMap::new();
        for i in 0..num_currencies {
            let as_native = match self.reserve_to_native(input_reserves[i], i) {
                Some(v) => v,
                None => {
                    log::warn!("convert_amounts: overflow calculating changes in currency");
                    return initial_rates;
                }
            };
            let net_fractional = input_fractional[i] - as_native;
            if net_fractional == 0 {
                continue;
            }
            let magnitude = net_fractional.abs();
            let depth = U256::from(magnitude as u64) * big_max_ratio
                / U256::from(self.weights[i] as u64);
            let depth = match math::to_amount(depth) {
                Some(v) => v,
                None => {
                    log::warn!("convert_amounts: overflow calculating changes in currency");
                    return initial_rates;
                }
            };
            let side = if net_fractional > 0 {
                &mut fractional_in
            } else {
                &mut fractional_out
            };
            side.entry(depth)
                .or_default()
                .push((magnitude, self.currencies[i]));
        }

        let weight_of: BTreeMap<CurrencyId, Amount> = self
            .currencies
            .iter()
            .zip(&self.weights)
            .map(|(id, w)| (*id, *w))
            .collect();

        let layers_in = match build_layers(&fractional_in, &weight_of, max_reserve_ratio) {
            Some(layers) => layers,
            None => return initial_rates,
        };
        let layers_out = match build_layers(&fractional_out, &weight_of, max_reserve_ratio) {
            Some(layers) => layers,
            None => return initial_rates,
        };

        let big_coin = U256::from(COIN_VALUE as u64);
        let big_supply = U256::from(self.supply as u64);

        // Buys first: apply buy layers to the base state, growing supply and
        // accumulating normalized reserves. Each layer's minted supply is
        // divided among its currencies by weight.
        let mut fractional_out_map: BTreeMap<CurrencyId, (Amount, Amount)> = BTreeMap::new();
        let mut add_supply: Amount = 0;
        let mut add_normalized: Amount = 0;
        for layer in &layers_out {
            let big_layer_weight = U256::from(layer.weight as u64);
            let total_layer_reserves =
                (big_supply * big_layer_weight / big_coin).low_u64() as Amount + add_normalized;
            add_normalized += layer.amount;
            let new_supply = match curve::fractional_out(
                layer.amount,
                self.supply + add_supply,
                total_layer_reserves,
                layer.weight,
            ) {
                Some(v) if v >= 0 => v,
                _ => {
                    log::warn!("convert_amounts: currency supply overflow");
                    return initial_rates;
                }
            };
            let big_new_supply = U256::from(new_supply as u64);
            add_supply += new_supply;
            for id in &layer.currencies {
                let share = (big_new_supply * U256::from(weight_of[id] as u64)
                    / big_layer_weight)
                    .low_u64() as Amount;
                fractional_out_map.entry(*id).or_insert((0, 0)).0 += share;
            }
        }
        let supply_after_buy = self.supply + add_supply;

        // Sells, both against the base state and against the buy result, in
        // one pass with separate reserve accumulators.
        let mut fractional_in_map: BTreeMap<CurrencyId, (Amount, Amount)> = BTreeMap::new();
        let mut add_supply_sell: Amount = 0;
        let mut add_normalized_bb: Amount = 0;
        let mut add_normalized_ab: Amount = 0;
        for layer in &layers_in {
            let big_layer_weight = U256::from(layer.weight as u64);
            let total_bb = (big_supply * big_layer_weight / big_coin).low_u64() as Amount
                + add_normalized_bb;
            let total_ab = (U256::from(supply_after_buy as u64) * big_layer_weight / big_coin)
                .low_u64() as Amount
                + add_normalized_ab;

            let reserve_out_bb = match curve::reserve_out(
                layer.amount,
                self.supply + add_supply_sell,
                total_bb + add_normalized_bb,
                layer.weight,
            ) {
                Some(v) if v >= 0 => v,
                _ => {
                    log::warn!("convert_amounts: reserve output overflow");
                    return initial_rates;
                }
            };
            let reserve_out_ab = match curve::reserve_out(
                layer.amount,
                supply_after_buy + add_supply_sell,
                total_ab + add_normalized_ab,
                layer.weight,
            ) {
                Some(v) if v >= 0 => v,
                _ => {
                    log::warn!("convert_amounts: reserve output overflow");
                    return initial_rates;
                }
            };

            // input fractional is burned; output reserves leave the basket
            add_supply_sell -= layer.amount;
            add_normalized_bb -= reserve_out_bb;
            add_normalized_ab -= reserve_out_ab;

            for id in &layer.currencies {
                let weight = U256::from(weight_of[id] as u64);
                let share_bb =
                    (U256::from(reserve_out_bb as u64) * weight / big_layer_weight).low_u64() as Amount;
                let share_ab =
                    (U256::from(reserve_out_ab as u64) * weight / big_layer_weight).low_u64() as Amount;
                let entry = fractional_in_map.entry(*id).or_insert((0, 0));
                entry.0 += share_bb;
                entry.1 += share_ab;
            }
        }
        let supply_after_sell = self.supply + add_supply_sell;

        // Buys again, now against the sell result, completing the
        // sell-then-buy direction.
        let mut add_supply_second: Amount = 0;
        let mut add_normalized_second: Amount = 0;
        for layer in &layers_out {
            let big_layer_weight = U256::from(layer.weight as u64);
            let total_layer_reserves = (U256::from(supply_after_sell as u64) * big_layer_weight
                / big_coin)
                .low_u64() as Amount
                + add_normalized_second;
            add_normalized_second += layer.amount;
            let new_supply = match curve::fractional_out(
                layer.amount,
                supply_after_sell + add_supply_second,
                total_layer_reserves,
                layer.weight,
            ) {
                Some(v) if v >= 0 => v,
                _ => {
                    log::warn!("convert_amounts: currency supply overflow");
                    return initial_rates;
                }
            };
            let big_new_supply = U256::from(new_supply as u64);
            add_supply_second += new_supply;
            for id in &layer.currencies {
                let share = (big_new_supply * U256::from(weight_of[id] as u64)
                    / big_layer_weight)
                    .low_u64() as Amount;
                if let Some(entry) = fractional_out_map.get_mut(id) {
                    entry.1 += share;
                }
            }
        }

        // Commit the floor-averaged deltas and derive one clearing price per
        // reserve.
        let mut rates = vec![0; num_currencies];
        for i in 0..num_currencies {
            let id = self.currencies[i];
            let input_reserve = input_reserves[i];
            let input_fraction = input_fractional[i];

            if let Some(&(first, second)) = fractional_out_map.get(&id) {
                let fraction_delta = math::mean_floor(first, second);
                let denominator = input_fraction + fraction_delta;
                if denominator <= 0 {
                    log::warn!("convert_amounts: degenerate buy volume");
                    return initial_rates;
                }
                rates[i] = match math::mul_div(input_reserve, COIN_VALUE, denominator) {
                    Some(v) => v,
                    None => {
                        log::warn!("convert_amounts: rate overflow");
                        return initial_rates;
                    }
                };
                let added_reserve = if input_fraction != 0 {
                    // reserves were normalized 1:1 against supply; requote
                    // the delta at the clearing price
                    match Self::native_to_reserve_raw(fraction_delta, rates[i]) {
                        Some(v) => v,
                        None => {
                            log::warn!("convert_amounts: rate overflow");
                            return initial_rates;
                        }
                    }
                } else {
                    input_reserve
                };
                new_state.supply = match new_state.supply.checked_add(fraction_delta) {
                    Some(v) => v,
                    None => {
                        log::warn!("convert_amounts: currency supply overflow");
                        return initial_rates;
                    }
                };
                new_state.reserves[i] += added_reserve;
            } else if let Some(&(first, second)) = fractional_in_map.get(&id) {
                let adjusted_delta =
                    match self.native_to_reserve(math::mean_floor(first, second), i) {
                        Some(v) => v,
                        None => {
                            log::warn!("convert_amounts: rate overflow");
                            return initial_rates;
                        }
                    };
                let reserve_size = input_reserve + adjusted_delta;
                if input_fraction <= 0 {
                    log::warn!("convert_amounts: degenerate sell volume");
                    return initial_rates;
                }
                rates[i] = match math::mul_div(reserve_size, COIN_VALUE, input_fraction) {
                    Some(v) => v,
                    None => {
                        log::warn!("convert_amounts: rate overflow");
                        return initial_rates;
                    }
                };
                new_state.supply -= input_fraction;
                new_state.reserves[i] -= adjusted_delta;
            }
        }

        // Cross conversions: total each source reserve's outgoing amounts,
        // requote them as fractional at the clearing rates, and clear that
        // second leg on the updated state. Its prices are the via-prices.
        if let Some(cross) = cross_conversions {
            let mut any_cross = false;
            let mut fractions_to_convert = vec![0; num_currencies];
            for (i, row) in cross.iter().enumerate() {
                for (j, amount) in row.iter().enumerate() {
                    if *amount != 0 {
                        any_cross = true;
                        let as_fractional =
                            match Self::reserve_to_native_raw(*amount, rates[i]) {
                                Some(v) => v,
                                None => {
                                    log::warn!("convert_amounts: cross conversion overflow");
                                    return initial_rates;
                                }
                            };
                        fractions_to_convert[j] += as_fractional;
                    }
                }
            }
            if any_cross {
                let scratch = vec![0; num_currencies];
                let intermediate = new_state.clone();
                let computed_via = intermediate.convert_amounts(
                    &scratch,
                    &fractions_to_convert,
                    &mut new_state,
                    None,
                    None,
                );
                if let Some(via) = via_prices {
                    *via = computed_via;
                }
            }
        }

        *new_state_out = new_state;

        // reserves with no activity price at the current state
        for (i, rate) in rates.iter_mut().enumerate() {
            if *rate == 0 {
                *rate = self.price_in_reserve(i);
            }
        }
        rates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> CurrencyId {
        CurrencyId::new([byte; 20])
    }

    fn basket(weights: Vec<Amount>, reserves: Vec<Amount>, supply: Amount) -> CurrencyState {
        let currencies = (0..weights.len() as u8).map(|i| id(i + 1)).collect();
        CurrencyState::new(
            id(100),
            currencies,
            weights,
            reserves,
            supply,
            CurrencyState::FLAG_FRACTIONAL | CurrencyState::FLAG_LAUNCH_COMPLETE,
        )
    }

    #[test]
    fn single_buy_quarter_reserve() {
        let state = basket(vec![25_000_000], vec![COIN_VALUE], 4 * COIN_VALUE);
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(&[10_000_000], &[0], &mut new_state, None, None);

        assert!(new_state.is_valid());
        assert_eq!(rates, vec![103_675_557]);
        assert_eq!(new_state.supply, 409_645_475);
        assert_eq!(new_state.reserves, vec![110_000_000]);
    }

    #[test]
    fn four_way_symmetric_buy_is_linear() {
        let state = basket(
            vec![25_000_000; 4],
            vec![COIN_VALUE; 4],
            4 * COIN_VALUE,
        );
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(
            &[10_000_000; 4],
            &[0; 4],
            &mut new_state,
            None,
            None,
        );

        // four identical 25% layers collapse into one 100% layer: no slippage
        assert_eq!(rates, vec![COIN_VALUE; 4]);
        assert_eq!(new_state.supply, 440_000_000);
        assert_eq!(new_state.reserves, vec![110_000_000; 4]);
    }

    #[test]
    fn balanced_buy_and_sell_cancel() {
        let state = basket(vec![25_000_000], vec![COIN_VALUE], 4 * COIN_VALUE);
        let mut new_state = CurrencyState::default();
        let rates =
            state.convert_amounts(&[10_000_000], &[10_000_000], &mut new_state, None, None);

        // equal value in both directions nets to zero flow at the current price
        assert!(new_state.is_valid());
        assert_eq!(rates, vec![COIN_VALUE]);
        assert_eq!(new_state.supply, state.supply);
        assert_eq!(new_state.reserves, state.reserves);
    }

    #[test]
    fn mixed_directions_average_both_orders() {
        let state = basket(
            vec![25_000_000, 25_000_000],
            vec![COIN_VALUE, COIN_VALUE],
            8 * COIN_VALUE,
        );
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(
            &[10_000_000, 0],
            &[0, 10_000_000],
            &mut new_state,
            None,
            None,
        );

        assert_eq!(rates, vec![51_849_177, 49_081_140]);
        assert_eq!(new_state.supply, 809_286_709);
        assert_eq!(new_state.reserves, vec![110_000_000, 95_091_886]);
    }

    #[test]
    fn uneven_buys_form_layers() {
        let state = basket(
            vec![25_000_000, 25_000_000],
            vec![COIN_VALUE, COIN_VALUE],
            8 * COIN_VALUE,
        );
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(
            &[10_000_000, 5_000_000],
            &[0, 0],
            &mut new_state,
            None,
            None,
        );

        // common 50% layer of the smaller amount plus a 25% tail in reserve 0
        assert_eq!(rates, vec![52_524_492, 50_617_380]);
        assert_eq!(new_state.supply, 828_916_767);
        assert_eq!(new_state.reserves, vec![110_000_000, 105_000_000]);
    }

    #[test]
    fn cross_conversion_fills_via_prices() {
        let state = basket(
            vec![25_000_000, 25_000_000],
            vec![COIN_VALUE, COIN_VALUE],
            8 * COIN_VALUE,
        );
        let cross = vec![vec![0, 10_000_000], vec![0, 0]];
        let mut new_state = CurrencyState::default();
        let mut via = Vec::new();
        let rates = state.convert_amounts(
            &[10_000_000, 0],
            &[0, 0],
            &mut new_state,
            Some(&cross),
            Some(&mut via),
        );

        assert_eq!(rates, vec![51_837_776, 50_000_000]);
        assert_eq!(via, vec![53_704_974, 47_125_245]);
        assert_eq!(new_state.supply, 800_000_000);
        assert_eq!(new_state.reserves, vec![110_000_000, 90_909_092]);
    }

    #[test]
    fn negative_input_fails_without_touching_state() {
        let state = basket(vec![25_000_000], vec![COIN_VALUE], 4 * COIN_VALUE);
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(&[-1], &[0], &mut new_state, None, None);

        assert_eq!(rates, state.prices_in_reserve());
        assert!(!new_state.is_valid());
    }

    #[test]
    fn zero_weight_fails() {
        let mut state = basket(
            vec![25_000_000, 25_000_000],
            vec![COIN_VALUE, COIN_VALUE],
            8 * COIN_VALUE,
        );
        state.weights[1] = 0;
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(&[10, 0], &[0, 0], &mut new_state, None, None);
        assert!(!new_state.is_valid());
        assert_eq!(rates.len(), 2);
    }

    #[test]
    fn overweight_basket_fails() {
        let state = basket(
            vec![60_000_000, 60_000_000],
            vec![COIN_VALUE, COIN_VALUE],
            8 * COIN_VALUE,
        );
        let mut new_state = CurrencyState::default();
        state.convert_amounts(&[10, 0], &[0, 0], &mut new_state, None, None);
        assert!(!new_state.is_valid());
    }

    #[test]
    fn small_buy_grows_supply_and_rate_is_monotone() {
        let state = basket(vec![25_000_000], vec![COIN_VALUE], 4 * COIN_VALUE);
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(&[1_000], &[0], &mut new_state, None, None);

        assert!(new_state.supply > state.supply);
        assert!(rates[0] >= state.price_in_reserve(0));
    }

    #[test]
    fn no_activity_returns_current_prices() {
        let state = basket(vec![25_000_000], vec![COIN_VALUE], 4 * COIN_VALUE);
        let mut new_state = CurrencyState::default();
        let rates = state.convert_amounts(&[0], &[0], &mut new_state, None, None);

        // no conversion is success: the state passes through unchanged
        assert!(new_state.is_valid());
        assert_eq!(new_state, state);
        assert_eq!(rates, state.prices_in_reserve());
    }
}
