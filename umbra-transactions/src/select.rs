//! Deterministic greedy coin selection.
//!
//! The selector never searches for byte-optimal change: candidates are
//! ordered by the spend policy (class priority, then value, then outpoint as
//! the tie-break) and accumulated linearly until the target is met. Given
//! the same ledger view and policy it always picks the same outputs, which
//! keeps every built transaction auditable after the fact.

use thiserror::Error;
use tracing::debug;

use crate::utxo_info::{SpendPolicy, SpendableOutput};
use umbra_envelope::AssetId;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    #[error("insufficient funds: needed {target} sats but only {available} sats are spendable")]
    InsufficientFunds { target: u64, available: u64 },

    #[error("insufficient asset {asset}: needed {needed} but only {available} held")]
    InsufficientAsset {
        asset: AssetId,
        needed: u128,
        available: u128,
    },
}

/// A successful plain-value selection. `total_value` always equals the sum
/// of the chosen outputs and is at least the requested target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionResult {
    pub chosen: Vec<SpendableOutput>,
    pub total_value: u64,
}

/// A successful asset-aware selection: enough of one protocol asset,
/// together with the base value riding along in the same outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetSelectionResult {
    pub chosen: Vec<SpendableOutput>,
    pub total_value: u64,
    pub total_asset: u128,
}

/// Orders one policy group: by value per the policy's direction, with the
/// outpoint as a deterministic tie-break.
fn sort_group<K: Ord + Copy>(group: &mut [&SpendableOutput], key: impl Fn(&SpendableOutput) -> K, greatest_first: bool) {
    group.sort_by(|a, b| {
        let ordering = if greatest_first {
            key(b).cmp(&key(a))
        } else {
            key(a).cmp(&key(b))
        };
        ordering.then_with(|| a.outpoint.cmp(&b.outpoint))
    });
}

/// Picks plain-funding outputs worth at least `target` sats.
///
/// Inscribed and asset-bearing outputs are excluded outright; they carry
/// value the base-ledger number does not describe and must never be burned
/// as fees. On failure the error carries the maximum reachable total so
/// callers can report a precise shortfall.
pub fn select(
    outputs: &[SpendableOutput],
    target: u64,
    policy: &SpendPolicy,
) -> Result<SelectionResult, SelectionError> {
    let mut chosen = Vec::new();
    let mut total: u64 = 0;

    'groups: for class in &policy.class_priority {
        let mut group: Vec<&SpendableOutput> = outputs
            .iter()
            .filter(|utxo| utxo.is_cardinal() && utxo.address_class == *class)
            .collect();
        sort_group(&mut group, |utxo| utxo.value, policy.sort_greatest_first);

        for utxo in group {
            if total >= target {
                break 'groups;
            }
            debug!(utxo = %utxo, value = utxo.value, class = ?class, "selected funding output");
            total += utxo.value;
            chosen.push(utxo.clone());
        }
    }

    if total < target {
        return Err(SelectionError::InsufficientFunds {
            target,
            available: total,
        });
    }

    // Greedy overshoot: the last group may have pushed past the target, but
    // every earlier output was required at the time it was added.
    Ok(SelectionResult {
        chosen,
        total_value: total,
    })
}

/// Asset-aware variant: accumulates outputs holding `asset` until the
/// requested *asset* quantity (not base value) is met.
pub fn select_asset(
    outputs: &[SpendableOutput],
    asset: AssetId,
    needed: u128,
    policy: &SpendPolicy,
) -> Result<AssetSelectionResult, SelectionError> {
    let mut chosen = Vec::new();
    let mut total_asset: u128 = 0;
    let mut total_value: u64 = 0;

    'groups: for class in &policy.class_priority {
        let mut group: Vec<(&SpendableOutput, u128)> = outputs
            .iter()
            .filter_map(|utxo| match utxo.asset {
                Some(lot) if utxo.address_class == *class && lot.id == asset => {
                    Some((utxo, lot.amount))
                }
                _ => None,
            })
            .collect();
        group.sort_by(|a, b| {
            let ordering = if policy.sort_greatest_first {
                b.1.cmp(&a.1)
            } else {
                a.1.cmp(&b.1)
            };
            ordering.then_with(|| a.0.outpoint.cmp(&b.0.outpoint))
        });

        for (utxo, amount) in group {
            if total_asset >= needed {
                break 'groups;
            }
            debug!(utxo = %utxo, amount, "selected asset output");
            total_asset += amount;
            total_value += utxo.value;
            chosen.push(utxo.clone());
        }
    }

    if total_asset < needed {
        return Err(SelectionError::InsufficientAsset {
            asset,
            needed,
            available: total_asset,
        });
    }

    Ok(AssetSelectionResult {
        chosen,
        total_value,
        total_asset,
    })
}
