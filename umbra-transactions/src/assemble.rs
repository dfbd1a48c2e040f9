//! Root entry points: one method per user-facing operation.
//!
//! Each method validates its arguments, runs any protocol math up front,
//! lowers the operation into a [`PayloadSpec`] and hands it to the
//! convergence loop. Nothing here talks to the network; broadcasting is the
//! caller's move once the outcome is in hand.

use bitcoin::{ScriptBuf, Transaction, Txid};

use crate::constants::{DUST_LIMIT, POSTAGE};
use crate::convergence::{converge, ConvergenceRequest, Converged, FeePlan};
use crate::error::AssemblyError;
use crate::fee_rate::FeeRate;
use crate::plan::{PayloadSpec, PlannedOutput};
use crate::select::select_asset;
use crate::traits::{Broadcaster, CollaboratorKind, Signer, SizeOracle};
use crate::utxo_info::{AssetLot, SpendPolicy, SpendableOutput};
use umbra_amm::{
    estimate_add_liquidity_shares, estimate_remove_liquidity_amounts, swap_buy_amount,
    PoolReserves,
};
use umbra_envelope::{
    AssetId, AssetTransfer, Intent, LiquidityIntent, MintIntent, SwapIntent, TransferIntent,
};
use umbra_safe_math::safe_add;

/// A fully signed transaction plus everything a caller needs to audit or
/// index it before broadcast.
#[derive(Debug)]
pub struct AssemblyOutcome {
    pub transaction: Transaction,
    pub fee_plan: FeePlan,
    /// The OP_RETURN script carried by the transaction, when the operation
    /// produced one.
    pub envelope_script: Option<ScriptBuf>,
}

/// Everything an assembly run draws on: the frozen ledger snapshot, the
/// spend policy, and the signing/measuring collaborators.
pub struct AssemblyContext<'a, S, O> {
    pub utxos: &'a [SpendableOutput],
    pub policy: &'a SpendPolicy,
    pub fee_rate: FeeRate,
    pub change_script: ScriptBuf,
    pub signer: &'a S,
    pub size_oracle: &'a O,
}

impl<'a, S: Signer, O: SizeOracle> AssemblyContext<'a, S, O> {
    fn run(
        &self,
        preselected: Vec<SpendableOutput>,
        payload: PayloadSpec,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        let converged = converge(
            ConvergenceRequest {
                candidates: self.utxos,
                preselected,
                policy: self.policy,
                fee_rate: self.fee_rate,
                payload,
            },
            self.signer,
            self.size_oracle,
        )?;

        Ok(outcome(converged))
    }

    /// Leading protocol output paying `POSTAGE` back to the caller; the
    /// refund target of every envelope-bearing build.
    fn leading_output(&self) -> PlannedOutput {
        PlannedOutput {
            script_pubkey: self.change_script.clone(),
            value: POSTAGE,
        }
    }

    /// Plain BTC payment to one recipient.
    pub fn build_transfer(
        &self,
        recipient: ScriptBuf,
        amount: u64,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        if amount == 0 {
            return Err(AssemblyError::ZeroAmount);
        }
        if amount < DUST_LIMIT {
            return Err(AssemblyError::RecipientBelowDust { value: amount });
        }

        self.run(
            Vec::new(),
            PayloadSpec {
                leading: None,
                recipients: vec![PlannedOutput {
                    script_pubkey: recipient,
                    value: amount,
                }],
                intent: None,
                change_script: self.change_script.clone(),
            },
        )
    }

    /// Moves `asset` to one or more recipients. Each recipient gets a
    /// postage-valued output; the edicts do the real accounting.
    pub fn build_asset_transfer(
        &self,
        asset: AssetId,
        transfers: &[(ScriptBuf, u128)],
    ) -> Result<AssemblyOutcome, AssemblyError> {
        if transfers.is_empty() {
            return Err(AssemblyError::NoRecipients);
        }
        let mut needed: u128 = 0;
        for (_, amount) in transfers {
            if *amount == 0 {
                return Err(AssemblyError::ZeroAmount);
            }
            needed = safe_add(needed, *amount)?;
        }

        let holders = select_asset(self.utxos, asset, needed, self.policy)?;

        let recipients = transfers
            .iter()
            .map(|(script, _)| PlannedOutput {
                script_pubkey: script.clone(),
                value: POSTAGE,
            })
            .collect();
        let legs = transfers
            .iter()
            .enumerate()
            .map(|(slot, (_, amount))| AssetTransfer {
                amount: *amount,
                recipient_slot: slot,
            })
            .collect();

        self.run(
            holders.chosen,
            PayloadSpec {
                leading: Some(self.leading_output()),
                recipients,
                intent: Some(Intent::Transfer(TransferIntent {
                    asset,
                    transfers: legs,
                })),
                change_script: self.change_script.clone(),
            },
        )
    }

    /// Claims a mint of `asset` to the caller's leading output.
    pub fn build_mint(&self, asset: AssetId) -> Result<AssemblyOutcome, AssemblyError> {
        self.run(
            Vec::new(),
            PayloadSpec {
                leading: Some(self.leading_output()),
                recipients: Vec::new(),
                intent: Some(Intent::Mint(MintIntent { asset })),
                change_script: self.change_script.clone(),
            },
        )
    }

    /// Sells `sell.amount` of `sell.id` into `pool`. The buy amount is
    /// previewed against the reserves and written into the calldata as the
    /// slippage bound the protocol enforces at settlement.
    pub fn build_swap(
        &self,
        pool: AssetId,
        sell: AssetLot,
        sell_reserve: u128,
        buy_reserve: u128,
        fee_rate_bps: u16,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        if sell.amount == 0 {
            return Err(AssemblyError::ZeroAmount);
        }
        let (buy_amount, _pool_fee) =
            swap_buy_amount(sell.amount, sell_reserve, buy_reserve, fee_rate_bps)?;
        if buy_amount == 0 {
            return Err(AssemblyError::ZeroSwapOutput);
        }

        let holders = select_asset(self.utxos, sell.id, sell.amount, self.policy)?;

        self.run(
            holders.chosen,
            PayloadSpec {
                leading: Some(self.leading_output()),
                recipients: Vec::new(),
                intent: Some(Intent::Swap(SwapIntent {
                    pool,
                    sell_asset: sell.id,
                    sell_amount: sell.amount,
                    min_buy_amount: buy_amount,
                })),
                change_script: self.change_script.clone(),
            },
        )
    }

    /// Deposits both sides into `pool`. Rejects deposits the pool would
    /// mint zero shares for rather than letting them donate to the reserves.
    pub fn build_liquidity_add(
        &self,
        pool: AssetId,
        deposit_a: AssetLot,
        deposit_b: AssetLot,
        reserves: &PoolReserves,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        if deposit_a.amount == 0 || deposit_b.amount == 0 {
            return Err(AssemblyError::ZeroAmount);
        }
        let shares = estimate_add_liquidity_shares(reserves, deposit_a.amount, deposit_b.amount)?;
        if shares == 0 {
            return Err(AssemblyError::ZeroShareMint);
        }

        let mut preselected =
            select_asset(self.utxos, deposit_a.id, deposit_a.amount, self.policy)?.chosen;
        preselected
            .extend(select_asset(self.utxos, deposit_b.id, deposit_b.amount, self.policy)?.chosen);

        self.run(
            preselected,
            PayloadSpec {
                leading: Some(self.leading_output()),
                recipients: Vec::new(),
                intent: Some(Intent::Liquidity(LiquidityIntent::Add {
                    pool,
                    deposit_a: (deposit_a.id, deposit_a.amount),
                    deposit_b: (deposit_b.id, deposit_b.amount),
                })),
                change_script: self.change_script.clone(),
            },
        )
    }

    /// Burns `shares.amount` of the pool's share asset to withdraw both
    /// sides proportionally.
    pub fn build_liquidity_remove(
        &self,
        pool: AssetId,
        shares: AssetLot,
        reserves: &PoolReserves,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        if shares.amount == 0 {
            return Err(AssemblyError::ZeroAmount);
        }
        if shares.amount > reserves.total_shares {
            return Err(AssemblyError::SharesExceedPool {
                shares: shares.amount,
                total: reserves.total_shares,
            });
        }
        // Preview now so an arithmetic problem surfaces before selection.
        let _withdrawal = estimate_remove_liquidity_amounts(reserves, shares.amount)?;

        let holders = select_asset(self.utxos, shares.id, shares.amount, self.policy)?;

        self.run(
            holders.chosen,
            PayloadSpec {
                leading: Some(self.leading_output()),
                recipients: Vec::new(),
                intent: Some(Intent::Liquidity(LiquidityIntent::Remove {
                    pool,
                    share_asset: shares.id,
                    share_amount: shares.amount,
                })),
                change_script: self.change_script.clone(),
            },
        )
    }
}

fn outcome(converged: Converged) -> AssemblyOutcome {
    AssemblyOutcome {
        transaction: converged.transaction,
        fee_plan: converged.fee_plan,
        envelope_script: converged.plan.envelope_script,
    }
}

/// Hands a finished outcome to the network.
pub fn broadcast<B: Broadcaster>(
    outcome: &AssemblyOutcome,
    broadcaster: &B,
) -> Result<Txid, AssemblyError> {
    broadcaster
        .submit(&outcome.transaction)
        .map_err(|source| AssemblyError::Collaborator {
            which: CollaboratorKind::Broadcaster,
            source,
        })
}
