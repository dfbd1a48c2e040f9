//! Constant-product AMM projections.
//!
//! Every function here is a pure, integer-only projection over a snapshot of
//! pool state. Nothing is mutated: callers read [`PoolReserves`] from the
//! protocol's on-chain state, size their operation with these helpers, and
//! then express the operation as an envelope for the indexer to settle.
//! Intermediate products are widened to 256 bits before any division, so two
//! implementations of these formulas agree bit for bit.

use thiserror::Error;
use umbra_safe_math::{mul_div, mul_div_ceil, safe_add, safe_sub, sqrt_of_product, MathError};

/// Fee rates are expressed in basis points of the sell amount.
pub const FEE_RATE_DIVISOR: u128 = 10_000;

/// Snapshot of a pool's reserves and outstanding liquidity shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolReserves {
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub total_shares: u128,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmError {
    #[error("fee rate of {0} bps is not below {FEE_RATE_DIVISOR}")]
    FeeRateTooHigh(u16),

    #[error("pool has an empty reserve")]
    EmptyReserves,

    #[error("requested buy amount of {requested} cannot be drawn from a reserve of {reserve}")]
    BuyExceedsReserve { requested: u128, reserve: u128 },

    #[error("an arithmetic error occurred")]
    Math(#[from] MathError),
}

/// Sizes the buy side of a swap: how much of the buy reserve a sale of
/// `sell_amount` obtains, after the pool fee is withheld from the sale.
///
/// Returns `(buy_amount, fee_amount)`. A zero `sell_amount` short-circuits
/// to `(0, 0)` without touching the reserves.
pub fn swap_buy_amount(
    sell_amount: u128,
    sell_reserve: u128,
    buy_reserve: u128,
    fee_rate_bps: u16,
) -> Result<(u128, u128), AmmError> {
    if u128::from(fee_rate_bps) >= FEE_RATE_DIVISOR {
        return Err(AmmError::FeeRateTooHigh(fee_rate_bps));
    }

    if sell_amount == 0 {
        return Ok((0, 0));
    }

    if sell_reserve == 0 || buy_reserve == 0 {
        return Err(AmmError::EmptyReserves);
    }

    let fee_amount = mul_div(sell_amount, u128::from(fee_rate_bps), FEE_RATE_DIVISOR)?;
    let net_sell = safe_sub(sell_amount, fee_amount)?;
    let buy_amount = mul_div(buy_reserve, net_sell, safe_add(sell_reserve, net_sell)?)?;

    Ok((buy_amount, fee_amount))
}

/// Inverse quote: the sale required to obtain `buy_amount` from the pool.
///
/// Both divisions round up so the returned sale never under-buys. Returns
/// `(sell_amount, fee_amount)`.
pub fn swap_sell_amount(
    buy_amount: u128,
    sell_reserve: u128,
    buy_reserve: u128,
    fee_rate_bps: u16,
) -> Result<(u128, u128), AmmError> {
    if u128::from(fee_rate_bps) >= FEE_RATE_DIVISOR {
        return Err(AmmError::FeeRateTooHigh(fee_rate_bps));
    }

    if buy_amount == 0 {
        return Ok((0, 0));
    }

    if sell_reserve == 0 || buy_reserve == 0 {
        return Err(AmmError::EmptyReserves);
    }

    if buy_amount >= buy_reserve {
        return Err(AmmError::BuyExceedsReserve {
            requested: buy_amount,
            reserve: buy_reserve,
        });
    }

    let net_sell = mul_div_ceil(sell_reserve, buy_amount, safe_sub(buy_reserve, buy_amount)?)?;
    let sell_amount = mul_div_ceil(
        net_sell,
        FEE_RATE_DIVISOR,
        FEE_RATE_DIVISOR - u128::from(fee_rate_bps),
    )?;
    let fee_amount = safe_sub(sell_amount, net_sell)?;

    Ok((sell_amount, fee_amount))
}

/// Previews the proportional withdrawal for burning `share_amount` shares.
///
/// Callers must reject `share_amount > pool.total_shares` before calling;
/// this is a precondition and is not re-validated here.
pub fn estimate_remove_liquidity_amounts(
    pool: &PoolReserves,
    share_amount: u128,
) -> Result<(u128, u128), AmmError> {
    let amount_a = mul_div(pool.reserve_a, share_amount, pool.total_shares)?;
    let amount_b = mul_div(pool.reserve_b, share_amount, pool.total_shares)?;

    Ok((amount_a, amount_b))
}

/// Previews the shares minted for depositing `amount_a` / `amount_b`.
///
/// The first deposit into an empty pool mints `floor(sqrt(a * b))` shares;
/// afterwards the mint is the smaller of the two proportional claims, so a
/// lopsided deposit is priced by its limiting side.
pub fn estimate_add_liquidity_shares(
    pool: &PoolReserves,
    amount_a: u128,
    amount_b: u128,
) -> Result<u128, AmmError> {
    if pool.total_shares == 0 {
        return Ok(sqrt_of_product(amount_a, amount_b));
    }

    if pool.reserve_a == 0 || pool.reserve_b == 0 {
        return Err(AmmError::EmptyReserves);
    }

    let shares_by_a = mul_div(amount_a, pool.total_shares, pool.reserve_a)?;
    let shares_by_b = mul_div(amount_b, pool.total_shares, pool.reserve_b)?;

    Ok(shares_by_a.min(shares_by_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const POOL: PoolReserves = PoolReserves {
        reserve_a: 1_000_000,
        reserve_b: 250_000,
        total_shares: 500_000,
    };

    mod swap_buy {
        use super::*;

        #[test]
        fn zero_sell_yields_zero() {
            assert_eq!(swap_buy_amount(0, 1_000, 1_000, 30).unwrap(), (0, 0));
        }

        #[test]
        fn fee_is_withheld_from_sale() {
            // 10_000 sold at 30 bps: fee 30, net 9_970.
            let (buy, fee) = swap_buy_amount(10_000, 1_000_000, 1_000_000, 30).unwrap();
            assert_eq!(fee, 30);
            // 1_000_000 * 9_970 / 1_009_970 = 9_871.xx -> 9_871
            assert_eq!(buy, 9_871);
        }

        #[test]
        fn zero_fee_matches_plain_constant_product() {
            let (buy, fee) = swap_buy_amount(500, 2_000, 8_000, 0).unwrap();
            assert_eq!(fee, 0);
            assert_eq!(buy, 8_000 * 500 / 2_500);
        }

        #[test]
        fn buy_never_drains_reserve() {
            let (buy, _) = swap_buy_amount(u64::MAX.into(), 1_000, 1_000, 0).unwrap();
            assert!(buy < 1_000);
        }

        #[test]
        fn empty_reserves_are_rejected() {
            assert_eq!(
                swap_buy_amount(1, 0, 1_000, 30).unwrap_err(),
                AmmError::EmptyReserves
            );
            assert_eq!(
                swap_buy_amount(1, 1_000, 0, 30).unwrap_err(),
                AmmError::EmptyReserves
            );
        }

        #[test]
        fn fee_rate_at_divisor_is_rejected() {
            assert_eq!(
                swap_buy_amount(1, 1, 1, 10_000).unwrap_err(),
                AmmError::FeeRateTooHigh(10_000)
            );
        }
    }

    mod swap_sell {
        use super::*;

        #[test]
        fn inverse_quote_covers_the_buy() {
            let (sell, fee) = swap_sell_amount(9_871, 1_000_000, 1_000_000, 30).unwrap();
            let (buy, _) = swap_buy_amount(sell, 1_000_000, 1_000_000, 30).unwrap();
            assert!(buy >= 9_871);
            assert!(fee > 0);
        }

        #[test]
        fn buying_the_whole_reserve_is_rejected() {
            assert_eq!(
                swap_sell_amount(1_000, 1_000, 1_000, 0).unwrap_err(),
                AmmError::BuyExceedsReserve {
                    requested: 1_000,
                    reserve: 1_000,
                }
            );
        }

        #[test]
        fn zero_buy_yields_zero() {
            assert_eq!(swap_sell_amount(0, 1_000, 1_000, 30).unwrap(), (0, 0));
        }
    }

    mod remove_liquidity {
        use super::*;

        #[test]
        fn proportional_withdrawal() {
            let (a, b) = estimate_remove_liquidity_amounts(&POOL, 250_000).unwrap();
            assert_eq!(a, 500_000);
            assert_eq!(b, 125_000);
        }

        #[test]
        fn full_withdrawal_returns_both_reserves() {
            let (a, b) = estimate_remove_liquidity_amounts(&POOL, POOL.total_shares).unwrap();
            assert_eq!((a, b), (POOL.reserve_a, POOL.reserve_b));
        }

        #[test]
        fn empty_pool_is_a_math_error() {
            let empty = PoolReserves {
                reserve_a: 0,
                reserve_b: 0,
                total_shares: 0,
            };
            assert_eq!(
                estimate_remove_liquidity_amounts(&empty, 1).unwrap_err(),
                AmmError::Math(MathError::DivisionByZero)
            );
        }
    }

    mod add_liquidity {
        use super::*;

        #[test]
        fn initial_mint_is_geometric_mean() {
            let empty = PoolReserves {
                reserve_a: 0,
                reserve_b: 0,
                total_shares: 0,
            };
            assert_eq!(estimate_add_liquidity_shares(&empty, 400, 100).unwrap(), 200);
        }

        #[test]
        fn lopsided_deposit_is_priced_by_limiting_side() {
            // Matching ratio would be 4:1; depositing 4_000 / 500 is limited
            // by the B side.
            let shares = estimate_add_liquidity_shares(&POOL, 4_000, 500).unwrap();
            assert_eq!(shares, 500 * POOL.total_shares / POOL.reserve_b);
        }

        #[test]
        fn balanced_deposit_mints_proportionally() {
            let shares = estimate_add_liquidity_shares(&POOL, 100_000, 25_000).unwrap();
            assert_eq!(shares, POOL.total_shares / 10);
        }
    }

    proptest! {
        #[test]
        fn buy_amount_is_monotone_in_sell_amount(
            sell in 0u128..=u128::from(u64::MAX),
            step in 1u128..=1_000_000u128,
            sell_reserve in 1u128..=u128::from(u64::MAX),
            buy_reserve in 1u128..=u128::from(u64::MAX),
            fee_bps in 0u16..10_000,
        ) {
            let (buy_lo, _) = swap_buy_amount(sell, sell_reserve, buy_reserve, fee_bps).unwrap();
            let (buy_hi, _) = swap_buy_amount(sell + step, sell_reserve, buy_reserve, fee_bps).unwrap();
            prop_assert!(buy_hi >= buy_lo);
        }

        #[test]
        fn buy_amount_never_reaches_reserve(
            sell in 1u128..=u128::from(u64::MAX),
            sell_reserve in 1u128..=u128::from(u64::MAX),
            buy_reserve in 1u128..=u128::from(u64::MAX),
            fee_bps in 0u16..10_000,
        ) {
            let (buy, _) = swap_buy_amount(sell, sell_reserve, buy_reserve, fee_bps).unwrap();
            prop_assert!(buy < buy_reserve);
        }

        #[test]
        fn removal_preview_never_exceeds_reserves(
            shares in 0u128..=500_000u128,
        ) {
            let (a, b) = estimate_remove_liquidity_amounts(&POOL, shares).unwrap();
            prop_assert!(a <= POOL.reserve_a);
            prop_assert!(b <= POOL.reserve_b);
        }
    }
}
