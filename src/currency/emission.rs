use super::CurrencyState;
use crate::config::COIN_VALUE;
use crate::Amount;
use primitive_types::U256;

/// Minimal-standard linear congruential generator used only to break the
/// integer remainder tie in weight redistribution. The constants are part of
/// consensus: x' = 48271 * x mod (2^31 - 1).
pub(crate) struct Lcg {
    state: u64,
}

impl Lcg {
    const MODULUS: u64 = (1 << 31) - 1;
    const MULTIPLIER: u64 = 48271;

    pub(crate) fn new(seed: i64) -> Self {
        let mut state = seed.rem_euclid(Self::MODULUS as i64) as u64;
        if state == 0 {
            state = 1;
        }
        Lcg { state }
    }

    pub(crate) fn next(&mut self) -> u64 {
        self.state = (self.state * Self::MULTIPLIER) % Self::MODULUS;
        self.state
    }
}

/// Fisher-Yates from the top index down; j = next() mod (i + 1)
pub(crate) fn shuffle<T>(items: &mut [T], rng: &mut Lcg) {
    for i in (1..items.len()).rev() {
        let j = (rng.next() % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

impl CurrencyState {
    /// Emit `to_emit` new units outside conversion, shrinking reserve
    /// weights so that each reserve keeps its ratio of backing to supply.
    ///
    /// The new total ratio is `ratio * supply / (supply + emission)`,
    /// rounded half-to-odd at the satoshi; the shrink is apportioned across
    /// weights proportionally, and the integer remainder is split evenly
    /// with the odd satoshis assigned by an LCG-seeded shuffle so every node
    /// produces the identical weight vector.
    pub fn update_with_emission(&mut self, to_emit: Amount) -> &mut Self {
        self.initial_supply = self.supply;
        self.emitted = 0;

        // a currency with no supply or no backing cannot rebalance weights
        if !self.is_fractional() || self.supply <= 0 || !self.reserves.iter().any(|r| *r > 0) {
            if self.supply < 0 {
                self.supply = to_emit;
            } else {
                self.supply += to_emit;
            }
            self.emitted = to_emit;
            return self;
        }

        if to_emit <= 0 {
            return self;
        }

        let initial_ratio: Amount = self.weights.iter().sum();
        let big_coin = U256::from(COIN_VALUE as u64);
        let big_supply = U256::from(self.supply as u64);

        let mut scratch = U256::from(initial_ratio as u64) * big_supply * big_coin
            / (big_supply + U256::from(to_emit as u64));
        let mut big_ratio = scratch / big_coin;
        // cap ratio at 100%
        if big_ratio >= big_coin {
            scratch = big_coin * big_coin;
            big_ratio = big_coin;
        }

        let mut new_ratio = big_ratio.low_u64() as Amount;
        let remainder = (scratch - big_ratio * big_coin).low_u64() as Amount;
        // round half to odd: at exactly half, round up only when truncation
        // landed on an odd ratio
        if remainder > COIN_VALUE >> 1 || (remainder == COIN_VALUE >> 1 && new_ratio & 1 == 1) {
            new_ratio += 1;
        }

        // apportion the shrink across weights by their current share
        let ratio_delta = initial_ratio - new_ratio;
        let big_delta = U256::from(ratio_delta as u64);
        let mut total_updates: Amount = 0;
        for weight in &mut self.weights {
            let weight_delta = (big_delta * U256::from(*weight as u64) / big_coin).low_u64() as Amount;
            *weight -= weight_delta;
            total_updates += weight_delta;
        }

        let update_extra = ratio_delta - total_updates;
        if update_extra != 0 {
            let count = self.weights.len() as Amount;
            let for_all = update_extra / count;
            let for_some = update_extra % count;

            let seed = self
                .supply
                .wrapping_add(for_all)
                .wrapping_add(for_some);
            let mut rng = Lcg::new(seed);

            let mut extra_weight = vec![for_all; self.weights.len()];
            for entry in extra_weight.iter_mut().take(for_some as usize) {
                *entry += 1;
            }
            shuffle(&mut extra_weight, &mut rng);
            for (weight, extra) in self.weights.iter_mut().zip(&extra_weight) {
                *weight -= extra;
            }
        }

        self.emitted = to_emit;
        self.supply = self.initial_supply + to_emit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyId;

    fn id(byte: u8) -> CurrencyId {
        CurrencyId::new([byte; 20])
    }

    fn state(weights: Vec<Amount>, supply: Amount) -> CurrencyState {
        let reserves = vec![COIN_VALUE; weights.len()];
        let currencies = (0..weights.len() as u8).map(|i| id(i + 1)).collect();
        CurrencyState::new(
            id(100),
            currencies,
            weights,
            reserves,
            supply,
            CurrencyState::FLAG_FRACTIONAL,
        )
    }

    #[test]
    fn lcg_sequence_is_minimal_standard() {
        let mut rng = Lcg::new(1);
        assert_eq!(rng.next(), 48271);
        assert_eq!(rng.next(), 182605794);
    }

    #[test]
    fn five_percent_emission() {
        // supply 100.0 * 1e8 at 50% total ratio, emit 5.0 * 1e8 satoshis
        let mut state = state(vec![25_000_000, 25_000_000], 10i64.pow(10));
        state.update_with_emission(5 * 10i64.pow(8));
        assert_eq!(state.supply, 10_500_000_000);
        assert_eq!(state.emitted, 500_000_000);
        assert_eq!(state.initial_supply, 10_000_000_000);
        // ratio 0.5 * 1e10/1.05e10 rounds half-to-odd to 0.47619048,
        // split evenly with no odd remainder
        assert_eq!(state.weights, vec![23_809_524, 23_809_524]);
    }

    #[test]
    fn emission_is_deterministic() {
        let build = || {
            let mut s = state(vec![20_000_000, 13_000_000, 17_000_000], 999_999_937);
            s.update_with_emission(123_456_789);
            s.weights.clone()
        };
        let first = build();
        assert_eq!(first, build());
        let total: Amount = first.iter().sum();
        assert!(total <= COIN_VALUE);
        assert!(first.iter().all(|w| *w > 0));
    }

    #[test]
    fn non_fractional_emission_is_plain_add() {
        let mut s = state(vec![25_000_000], 1_000);
        s.flags &= !CurrencyState::FLAG_FRACTIONAL;
        s.update_with_emission(500);
        assert_eq!(s.supply, 1_500);
        assert_eq!(s.emitted, 500);
        assert_eq!(s.weights, vec![25_000_000]);
    }

    #[test]
    fn negative_supply_is_replaced() {
        let mut s = state(vec![25_000_000], -5);
        s.update_with_emission(700);
        assert_eq!(s.supply, 700);
        assert_eq!(s.emitted, 700);
    }
}
