//! Deterministic assembly of Bitcoin transactions carrying overlay-protocol
//! payloads.
//!
//! The engine takes a frozen ledger snapshot, a spend policy and a typed
//! operation, and produces a fully signed transaction with a byte-stable
//! output ordering, a converged fee and an audit trail. Signing, size
//! measurement and broadcast sit behind the traits in [`traits`]; everything
//! else is pure computation, so the same inputs always assemble the same
//! transaction.

pub mod assemble;
pub mod calc_fee;
pub mod constants;
pub mod convergence;
pub mod error;
pub mod fee_rate;
pub mod plan;
pub mod select;
pub mod traits;
pub mod utxo_info;

pub use assemble::{broadcast, AssemblyContext, AssemblyOutcome};
pub use constants::{DUST_LIMIT, MIN_TX_FEE, POSTAGE};
pub use convergence::{converge, ConvergenceRequest, Converged, FeePlan};
pub use error::AssemblyError;
pub use fee_rate::{FeeRate, InvalidFeeRate};
pub use plan::{materialize, OutputPlan, PayloadSpec, PlannedOutput};
pub use select::{select, select_asset, AssetSelectionResult, SelectionError, SelectionResult};
pub use traits::{Broadcaster, CollaboratorKind, LedgerView, Signer, SizeOracle};
pub use utxo_info::{AddressClass, AssetLot, SpendPolicy, SpendableOutput};
