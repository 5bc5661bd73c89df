use crate::{IssuanceError, Result};

use super::types::{Bps, BPS_U128};

pub fn mul_div_floor_u128(a: u128, b: u128, denom: u128) -> Result<u128> {
    if denom == 0 {
        return Err(IssuanceError::InvalidInput("division by zero".into()));
    }
    let num = a
        .checked_mul(b)
        .ok_or_else(|| IssuanceError::BoundedValueExceeded("u128 overflow in mul".into()))?;
    Ok(num / denom)
}

pub fn add_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b)
        .ok_or_else(|| IssuanceError::BoundedValueExceeded("u128 overflow in add".into()))
}

pub fn sub_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b)
        .ok_or_else(|| IssuanceError::InvalidInput("u128 underflow in sub".into()))
}

pub fn add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| IssuanceError::BoundedValueExceeded("u64 overflow in add".into()))
}

pub fn floor_bps(amount: u128, bps: Bps) -> Result<u128> {
    mul_div_floor_u128(amount, bps.as_u128(), BPS_U128)
}

/// Integer square root (floor) by Newton iteration.
pub fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let n = n as u128;
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x as u64
}

/// Concave ticket transform: identity up to `linear_threshold`, then square-root growth.
///
/// `effective(n) = n` for `n <= L`, else `L + isqrt(n - L)`.
pub fn effective_tickets(n: u64, linear_threshold: u64) -> u64 {
    if n <= linear_threshold {
        n
    } else {
        linear_threshold + isqrt(n - linear_threshold)
    }
}

/// Effective-ticket delta for moving a position from `prev` to `prev + delta` raw tickets.
pub fn effective_delta(prev: u64, delta: u64, linear_threshold: u64) -> Result<u64> {
    let next = add_u64(prev, delta)?;
    Ok(effective_tickets(next, linear_threshold) - effective_tickets(prev, linear_threshold))
}
