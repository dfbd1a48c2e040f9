//! Checked integer arithmetic shared across the umbra workspace.
//!
//! Every operation returns a [`MathError`] instead of wrapping or panicking,
//! so callers can propagate arithmetic failures with `?`. The widening
//! helpers ([`mul_div`], [`mul_div_ceil`], [`sqrt_of_product`]) compute the
//! full 256-bit intermediate product before dividing, which makes
//! `a * b / d` exact for any `u128` operands.

use num::{CheckedAdd, CheckedDiv, CheckedMul, CheckedSub};
use primitive_types::U256;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    #[error("addition overflow")]
    AdditionOverflow,

    #[error("subtraction underflow")]
    SubtractionUnderflow,

    #[error("multiplication overflow")]
    MultiplicationOverflow,

    #[error("division by zero")]
    DivisionByZero,
}

pub fn safe_add<T: CheckedAdd>(a: T, b: T) -> Result<T, MathError> {
    a.checked_add(&b).ok_or(MathError::AdditionOverflow)
}

pub fn safe_sub<T: CheckedSub>(a: T, b: T) -> Result<T, MathError> {
    a.checked_sub(&b).ok_or(MathError::SubtractionUnderflow)
}

pub fn safe_mul<T: CheckedMul>(a: T, b: T) -> Result<T, MathError> {
    a.checked_mul(&b).ok_or(MathError::MultiplicationOverflow)
}

pub fn safe_div<T: CheckedDiv>(a: T, b: T) -> Result<T, MathError> {
    a.checked_div(&b).ok_or(MathError::DivisionByZero)
}

/// `floor(a * b / divisor)` with a 256-bit intermediate product.
///
/// Fails with [`MathError::MultiplicationOverflow`] only when the final
/// quotient does not fit back into a `u128`.
pub fn mul_div(a: u128, b: u128, divisor: u128) -> Result<u128, MathError> {
    if divisor == 0 {
        return Err(MathError::DivisionByZero);
    }

    let wide = U256::from(a) * U256::from(b);
    let quotient = wide / U256::from(divisor);

    if quotient > U256::from(u128::MAX) {
        return Err(MathError::MultiplicationOverflow);
    }

    Ok(quotient.as_u128())
}

/// `ceil(a * b / divisor)` with a 256-bit intermediate product.
pub fn mul_div_ceil(a: u128, b: u128, divisor: u128) -> Result<u128, MathError> {
    if divisor == 0 {
        return Err(MathError::DivisionByZero);
    }

    let wide = U256::from(a) * U256::from(b);
    let divisor = U256::from(divisor);
    let mut quotient = wide / divisor;
    if wide % divisor != U256::zero() {
        quotient += U256::one();
    }

    if quotient > U256::from(u128::MAX) {
        return Err(MathError::MultiplicationOverflow);
    }

    Ok(quotient.as_u128())
}

/// `floor(sqrt(a * b))`, computed entirely in 256 bits.
///
/// The result always fits in a `u128` because the radicand is below
/// `2^256`.
pub fn sqrt_of_product(a: u128, b: u128) -> u128 {
    let radicand = U256::from(a) * U256::from(b);

    if radicand.is_zero() {
        return 0;
    }

    // Newton's method; the initial guess over-estimates so the sequence is
    // strictly decreasing until it stabilises.
    let mut x = radicand;
    let mut y = (x + U256::one()) >> 1;
    while y < x {
        x = y;
        y = (x + radicand / x) >> 1;
    }

    x.as_u128()
}
