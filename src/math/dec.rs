use crate::config::COIN_VALUE;
use crate::Amount;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::sync::OnceLock;

/// Fractional digits carried by [`Dec`]
pub const SCALE_DIGITS: u32 = 50;

fn scale() -> &'static BigInt {
    static SCALE: OnceLock<BigInt> = OnceLock::new();
    SCALE.get_or_init(|| BigInt::from(10u32).pow(SCALE_DIGITS))
}

// exp(x) for x below this floor is 0 at 50 fractional digits
// (-50 * ln(10) ~= -115.13)
const EXP_UNDERFLOW_FLOOR: i64 = -116;

/// Fixed-point decimal with 50 fractional digits over an unbounded integer
/// part. Every operation truncates toward zero, so results are a pure
/// function of their inputs on every platform. Used only by the bonded-curve
/// formulas; all other monetary math stays in 64/256-bit integers.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dec(BigInt);

impl Dec {
    pub fn zero() -> Self {
        Dec(BigInt::zero())
    }

    pub fn one() -> Self {
        Dec(scale().clone())
    }

    pub fn from_int(value: i64) -> Self {
        Dec(BigInt::from(value) * scale())
    }

    /// Interpret `value` as satoshis: the result is `value / COIN_VALUE`.
    pub fn from_satoshis(value: Amount) -> Self {
        Dec(BigInt::from(value) * scale() / COIN_VALUE)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn add(&self, other: &Dec) -> Dec {
        Dec(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &Dec) -> Dec {
        Dec(&self.0 - &other.0)
    }

    pub fn mul(&self, other: &Dec) -> Dec {
        Dec(&self.0 * &other.0 / scale())
    }

    /// Truncating division. `other` must be non-zero.
    pub fn div(&self, other: &Dec) -> Dec {
        Dec(&self.0 * scale() / &other.0)
    }

    fn div_int(&self, divisor: i64) -> Dec {
        Dec(&self.0 / divisor)
    }

    /// Square root of a non-negative value, exact to 1 ulp.
    fn sqrt(&self) -> Dec {
        Dec((&self.0 * scale()).sqrt())
    }

    /// Natural log; `None` unless `self > 0`.
    pub fn ln(&self) -> Option<Dec> {
        if !self.0.is_positive() {
            return None;
        }

        // Pull the argument into [0.9, 1.1] by repeated square roots, then
        // run the atanh series; each sqrt halves the log.
        let low = Dec(scale() * 9u32 / 10u32);
        let high = Dec(scale() * 11u32 / 10u32);
        let mut x = self.clone();
        let mut halvings = 0u32;
        while x > high || x < low {
            x = x.sqrt();
            halvings += 1;
        }

        // ln(x) = 2 * atanh(z), z = (x - 1) / (x + 1)
        let one = Dec::one();
        let z = x.sub(&one).div(&x.add(&one));
        let z_squared = z.mul(&z);
        let mut term = z.clone();
        let mut sum = z;
        let mut n = 3i64;
        loop {
            term = term.mul(&z_squared);
            let contribution = term.div_int(n);
            if contribution.is_zero() {
                break;
            }
            sum = sum.add(&contribution);
            n += 2;
        }
        Some(Dec(sum.0 << (halvings + 1)))
    }

    /// e^self. Underflows to exactly 0 beyond 50 fractional digits.
    pub fn exp(&self) -> Dec {
        if self.is_zero() {
            return Dec::one();
        }
        if self.is_negative() {
            if *self < Dec::from_int(EXP_UNDERFLOW_FLOOR) {
                return Dec::zero();
            }
            let positive = Dec(-&self.0).exp();
            if positive.is_zero() {
                return Dec::zero();
            }
            return Dec::one().div(&positive);
        }

        // Halve the argument until the Taylor series converges fast, then
        // square the result back up.
        let threshold = Dec(scale() / 64u32);
        let mut halvings = 0u32;
        let mut y = self.clone();
        while y > threshold {
            y = Dec(y.0 >> 1);
            halvings += 1;
        }

        let mut term = Dec::one();
        let mut sum = Dec::one();
        let mut n = 1i64;
        loop {
            term = term.mul(&y).div_int(n);
            if term.is_zero() {
                break;
            }
            sum = sum.add(&term);
            n += 1;
        }
        for _ in 0..halvings {
            sum = sum.mul(&sum);
        }
        sum
    }

    /// self^exponent for non-negative self. 0^0 is 1, 0^positive is 0;
    /// a negative base or 0^negative is `None`.
    pub fn powf(&self, exponent: &Dec) -> Option<Dec> {
        if exponent.is_zero() {
            return Some(Dec::one());
        }
        if self.is_zero() {
            return if exponent.is_negative() {
                None
            } else {
                Some(Dec::zero())
            };
        }
        if *self == Dec::one() {
            return Some(Dec::one());
        }
        if *exponent == Dec::one() {
            return Some(self.clone());
        }
        Some(self.ln()?.mul(exponent).exp())
    }

    /// Re-quantize to satoshis, truncating toward zero. `None` when the
    /// result does not fit a 64-bit amount.
    pub fn to_satoshis(&self) -> Option<Amount> {
        (&self.0 * COIN_VALUE / scale()).to_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_sats(value: &Dec, expected: Amount, tolerance: Amount) {
        let got = value.to_satoshis().unwrap();
        assert!(
            (got - expected).abs() <= tolerance,
            "got {got}, expected {expected}"
        );
    }

    #[test]
    fn mul_div_truncate() {
        let a = Dec::from_satoshis(1); // 1e-8
        let b = a.mul(&a); // 1e-16, far below a satoshi
        assert_eq!(b.to_satoshis(), Some(0));
        assert!(!b.is_zero());
    }

    #[test]
    fn ln_of_e_region() {
        // ln(2) = 0.69314718055994530941...
        let two = Dec::from_int(2);
        close_sats(&two.ln().unwrap(), 69_314_718, 0);
    }

    #[test]
    fn exp_ln_round_trip() {
        let x = Dec::from_satoshis(123_456_789); // 1.23456789
        let back = x.ln().unwrap().exp();
        // truncating arithmetic may land one satoshi low
        close_sats(&back, 123_456_789, 1);
    }

    #[test]
    fn exp_underflows_to_zero() {
        assert!(Dec::from_int(-10_000).exp().is_zero());
    }

    #[test]
    fn powf_quarter() {
        // 1.1^0.25 = 1.024113689...
        let base = Dec::from_satoshis(110_000_000);
        let exp = Dec::from_satoshis(25_000_000);
        close_sats(&base.powf(&exp).unwrap(), 102_411_368, 0);
    }

    #[test]
    fn powf_rejects_nonpositive_base() {
        assert!(Dec::from_int(-1).powf(&Dec::one()).is_none());
        assert!(Dec::zero().powf(&Dec::one()).is_none());
    }
}
