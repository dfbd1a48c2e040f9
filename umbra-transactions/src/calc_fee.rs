//! Closed-form virtual-size and fee estimation.
//!
//! The fee a transaction owes depends on its signed size, which is unknown
//! until it is signed. This module provides the conservative lower-bound
//! estimate the convergence loop starts from: per-input worst-case vbyte
//! costs by address class, exact output sizes, and the shared overhead. The
//! estimate is designed to meet or exceed the measured size of the signed
//! transaction, so the converged fee only ever shifts value back into
//! change.

use bitcoin::TxOut;

use crate::constants::MIN_TX_FEE;
use crate::fee_rate::FeeRate;
use crate::utxo_info::AddressClass;

/// Version (4) + input count (1) + output count (1) + locktime (4).
const TX_OVERHEAD_VBYTES: usize = 10;

/// Segwit marker and flag weigh 2 units, which rounds up to one vbyte.
const WITNESS_OVERHEAD_VBYTES: usize = 1;

fn compact_size_vbytes(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        _ => 5,
    }
}

/// Exact serialized size of one output in vbytes (outputs carry no witness
/// discount).
pub fn output_vbytes(output: &TxOut) -> usize {
    let script_len = output.script_pubkey.len();
    8 + compact_size_vbytes(script_len) + script_len
}

/// Worst-case virtual size of a transaction spending `input_classes` into
/// `outputs`.
pub fn estimate_vsize(input_classes: &[AddressClass], outputs: &[TxOut]) -> usize {
    let inputs: usize = input_classes
        .iter()
        .map(|class| class.input_vbytes())
        .sum();
    let outputs: usize = outputs.iter().map(output_vbytes).sum();

    let witness = if input_classes.iter().any(|class| class.is_witness()) {
        WITNESS_OVERHEAD_VBYTES
    } else {
        0
    };

    TX_OVERHEAD_VBYTES + witness + inputs + outputs
}

/// Fee implied by the estimate, floored at the network minimum.
pub fn estimate_fee(rate: &FeeRate, input_classes: &[AddressClass], outputs: &[TxOut]) -> u64 {
    floor_fee(rate.fee(estimate_vsize(input_classes, outputs)).to_sat())
}

/// Applies the protocol-minimum fee floor.
pub fn floor_fee(fee: u64) -> u64 {
    fee.max(MIN_TX_FEE)
}
