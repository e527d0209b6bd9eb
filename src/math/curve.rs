use super::Dec;
use crate::Amount;

// The curve treats a zero supply or reserve as one satoshi so the formulas
// stay defined at the origin. Documented quirk of the pricing model.
fn nonzero(value: Amount) -> Amount {
    if value != 0 {
        value
    } else {
        1
    }
}

/// Units of fractional currency minted for `reserve_in` deposited against a
/// normalized reserve at `reserve_ratio` (satoshi fraction of 100%):
///
/// `supply * ((reserve_in / reserve + 1)^ratio - 1)`
///
/// Evaluated in 50-digit decimal, truncated to satoshis. `None` on overflow
/// or a non-positive intermediate; the caller must abort and leave its state
/// untouched.
pub fn fractional_out(
    reserve_in: Amount,
    supply: Amount,
    reserve: Amount,
    reserve_ratio: Amount,
) -> Option<Amount> {
    if reserve_in == 0 {
        return Some(0);
    }
    if reserve_in < 0 || reserve_ratio <= 0 {
        return None;
    }
    let reserve_in = Dec::from_satoshis(reserve_in);
    let supply = Dec::from_satoshis(nonzero(supply));
    let reserve = Dec::from_satoshis(nonzero(reserve));
    let ratio = Dec::from_satoshis(reserve_ratio);

    let one = Dec::one();
    let grown = reserve_in.div(&reserve).add(&one).powf(&ratio)?;
    supply.mul(&grown.sub(&one)).to_satoshis()
}

/// Reserve paid out for `fractional_in` burned against a normalized reserve
/// at `reserve_ratio`:
///
/// `reserve * (1 - (1 - fractional_in / supply)^(1 / ratio))`
pub fn reserve_out(
    fractional_in: Amount,
    supply: Amount,
    reserve: Amount,
    reserve_ratio: Amount,
) -> Option<Amount> {
    if fractional_in == 0 {
        return Some(0);
    }
    if fractional_in < 0 || reserve_ratio <= 0 {
        return None;
    }
    let fractional_in = Dec::from_satoshis(fractional_in);
    let supply = Dec::from_satoshis(nonzero(supply));
    let reserve = Dec::from_satoshis(nonzero(reserve));
    let ratio = Dec::from_satoshis(reserve_ratio);

    let one = Dec::one();
    let shrunk = one
        .sub(&fractional_in.div(&supply))
        .powf(&one.div(&ratio))?;
    reserve.mul(&one.sub(&shrunk)).to_satoshis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COIN_VALUE;

    #[test]
    fn quarter_reserve_buy() {
        // supply 4.0, reserve 1.0 at 25%: buying 0.1 reserve mints
        // 4 * (1.1^0.25 - 1) = 0.09645475...
        let out = fractional_out(10_000_000, 4 * COIN_VALUE, COIN_VALUE, 25_000_000).unwrap();
        assert_eq!(out, 9_645_475);
    }

    #[test]
    fn full_reserve_is_linear() {
        // at 100% ratio the curve is the identity: out = supply * in / reserve
        let out = fractional_out(10_000_000, COIN_VALUE, COIN_VALUE, COIN_VALUE).unwrap();
        assert_eq!(out, 10_000_000);
    }

    #[test]
    fn quarter_reserve_sell() {
        // selling back what the buy minted returns slightly less than the
        // deposit (truncation), never more
        let minted = 9_645_475;
        let out = reserve_out(
            4 * COIN_VALUE + minted,
            4 * COIN_VALUE + minted,
            COIN_VALUE + 10_000_000,
            25_000_000,
        );
        // burning the whole supply must drain the whole reserve
        assert_eq!(out.unwrap(), COIN_VALUE + 10_000_000);
    }

    #[test]
    fn sell_more_than_supply_fails() {
        assert_eq!(
            reserve_out(2 * COIN_VALUE, COIN_VALUE, COIN_VALUE, 25_000_000),
            None
        );
    }

    #[test]
    fn zero_inputs_are_zero() {
        assert_eq!(fractional_out(0, 1, 1, 1), Some(0));
        assert_eq!(reserve_out(0, 1, 1, 1), Some(0));
    }

    #[test]
    fn zero_supply_is_one_satoshi() {
        // degenerate state quirk: supply and reserve of 0 behave as 1 satoshi
        let out = fractional_out(COIN_VALUE, 0, 0, COIN_VALUE).unwrap();
        // 1e-8 * ((1.0 / 1e-8 + 1)^1 - 1) = 1.0 exactly at 100%
        assert_eq!(out, COIN_VALUE);
    }
}
