pub mod curve;
mod dec;

pub use dec::Dec;

use crate::Amount;
use primitive_types::U256;

/// Narrow a 256-bit intermediate back to a satoshi amount. Anything above
/// `i64::MAX` is a hard failure: the caller must abort the operation and
/// leave its state untouched.
pub fn to_amount(value: U256) -> Option<Amount> {
    if value > U256::from(i64::MAX as u64) {
        return None;
    }
    Some(value.low_u64() as i64)
}

/// `a * b / c` with a 256-bit intermediate, truncating toward zero.
/// Inputs must be non-negative; `c` must be positive.
pub fn mul_div(a: Amount, b: Amount, c: Amount) -> Option<Amount> {
    if a < 0 || b < 0 || c <= 0 {
        return None;
    }
    let product = U256::from(a as u64) * U256::from(b as u64);
    to_amount(product / U256::from(c as u64))
}

/// Floor of the arithmetic mean of two non-negative amounts, in 256-bit to
/// avoid the sum overflowing.
pub fn mean_floor(a: Amount, b: Amount) -> Amount {
    ((U256::from(a as u64) + U256::from(b as u64)) >> 1).low_u64() as i64
}
