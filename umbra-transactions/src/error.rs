use thiserror::Error;

use crate::select::SelectionError;
use crate::traits::CollaboratorKind;
use umbra_amm::AmmError;
use umbra_envelope::{AssetId, EnvelopeError};
use umbra_safe_math::MathError;

/// Everything the assembly engine can fail with.
///
/// Arithmetic and selection failures surface before any external call is
/// made; collaborator failures are wrapped, tagged with which collaborator
/// failed, and never retried here. No variant carries a partially-built
/// transaction.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("insufficient funds: needed {target} sats but only {available} sats are spendable")]
    InsufficientFunds { target: u64, available: u64 },

    #[error("insufficient asset {asset}: needed {needed} but only {available} held")]
    InsufficientAsset {
        asset: AssetId,
        needed: u128,
        available: u128,
    },

    #[error("transfer amount must be nonzero")]
    ZeroAmount,

    #[error("transfer has no recipients")]
    NoRecipients,

    #[error("recipient output of {value} sats is below the dust limit")]
    RecipientBelowDust { value: u64 },

    #[error("share amount {shares} exceeds the pool total of {total}")]
    SharesExceedPool { shares: u128, total: u128 },

    #[error("swap would buy nothing at the current reserves")]
    ZeroSwapOutput,

    #[error("deposit would mint no liquidity shares")]
    ZeroShareMint,

    #[error("transaction input amount is not enough to cover network fees")]
    NotEnoughAmountToCoverFees,

    #[error("value conservation violated: inputs {inputs}, outputs {outputs}, fee {fee}")]
    ConservationViolated { inputs: u64, outputs: u64, fee: u64 },

    #[error("an arithmetic error occurred")]
    Math(#[from] MathError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Amm(#[from] AmmError),

    #[error("{which} collaborator failed")]
    Collaborator {
        which: CollaboratorKind,
        #[source]
        source: anyhow::Error,
    },
}

impl From<SelectionError> for AssemblyError {
    fn from(error: SelectionError) -> Self {
        match error {
            SelectionError::InsufficientFunds { target, available } => {
                AssemblyError::InsufficientFunds { target, available }
            }
            SelectionError::InsufficientAsset {
                asset,
                needed,
                available,
            } => AssemblyError::InsufficientAsset {
                asset,
                needed,
                available,
            },
        }
    }
}
