//! Seams to the engine's external collaborators.
//!
//! The engine itself is purely functional; everything that touches keys or
//! the network sits behind one of these traits. Implementations must be
//! side-effect-free beyond their stated purpose (a signer that makes network
//! calls violates the contract) and own their own timeouts — the engine
//! enforces none and never retries.

use bitcoin::{Address, Transaction, Txid};

use crate::fee_rate::FeeRate;
use crate::utxo_info::SpendableOutput;

/// Which collaborator a wrapped failure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollaboratorKind {
    LedgerView,
    Signer,
    SizeOracle,
    Broadcaster,
}

impl std::fmt::Display for CollaboratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollaboratorKind::LedgerView => "ledger view",
            CollaboratorKind::Signer => "signer",
            CollaboratorKind::SizeOracle => "size oracle",
            CollaboratorKind::Broadcaster => "broadcaster",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot provider over the ledger's unspent set.
///
/// Callers must treat the snapshot as frozen for the duration of one
/// assembly call; refreshing it mid-assembly risks double-selecting an
/// output another in-flight call already took.
pub trait LedgerView {
    fn spendable_outputs(&self, address: &Address) -> anyhow::Result<Vec<SpendableOutput>>;

    fn fee_estimate(&self, target_blocks: u16) -> anyhow::Result<FeeRate>;
}

/// Produces signatures for every input the caller controls. Must be
/// idempotent: signing the same transaction twice yields the same result.
pub trait Signer {
    fn sign_all_inputs(&self, transaction: &Transaction, finalize: bool)
        -> anyhow::Result<Transaction>;
}

/// Measures the exact virtual size of a signed transaction, e.g. via a
/// mempool-acceptance simulation.
pub trait SizeOracle {
    fn measure_vsize(&self, transaction: &Transaction) -> anyhow::Result<u64>;
}

/// Submits a finalized transaction to the network.
pub trait Broadcaster {
    fn submit(&self, transaction: &Transaction) -> anyhow::Result<Txid>;
}
