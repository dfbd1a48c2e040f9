//! The two-pass fee convergence loop.
//!
//! Fees depend on signed size, signed size depends on which inputs fund the
//! fee. The loop settles the circularity in a bounded number of steps:
//! estimate, select, build and sign once, measure the real virtual size,
//! then rebuild at the measured fee. The closed-form estimate meets or
//! exceeds the signed size, so the rebuild only ever moves value back into
//! change — input membership never shifts between the two passes, and a
//! change output folded before measurement stays folded so the final
//! transaction keeps the exact shape the oracle measured.

use bitcoin::{absolute, transaction, ScriptBuf, Sequence, Transaction, TxIn, Witness};
use tracing::debug;

use crate::calc_fee::{estimate_fee, floor_fee};
use crate::constants::DUST_LIMIT;
use crate::error::AssemblyError;
use crate::fee_rate::FeeRate;
use crate::plan::{keep_change, materialize, OutputPlan, PayloadSpec};
use crate::select::select;
use crate::traits::{CollaboratorKind, Signer, SizeOracle};
use crate::utxo_info::{AddressClass, SpendPolicy, SpendableOutput};
use umbra_safe_math::safe_add;

/// The fee story of a finished build: the rate requested, the worst-case
/// estimate the inputs were selected against, and the fee the transaction
/// actually pays (folded dust included).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeePlan {
    pub fee_rate: FeeRate,
    pub estimated_fee: u64,
    pub final_fee: u64,
}

/// Inputs to one convergence run.
pub struct ConvergenceRequest<'a> {
    /// Candidate funding outputs; non-cardinal entries are ignored.
    pub candidates: &'a [SpendableOutput],
    /// Outputs the caller already committed to spending, e.g. asset holders
    /// picked by asset-aware selection. Spent unconditionally.
    pub preselected: Vec<SpendableOutput>,
    pub policy: &'a SpendPolicy,
    pub fee_rate: FeeRate,
    pub payload: PayloadSpec,
}

/// A converged, fully signed transaction plus its audit trail.
#[derive(Debug)]
pub struct Converged {
    pub transaction: Transaction,
    pub fee_plan: FeePlan,
    pub inputs: Vec<SpendableOutput>,
    pub plan: OutputPlan,
}

fn unsigned_transaction(inputs: &[SpendableOutput], outputs: Vec<bitcoin::TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

fn collaborator_failed(which: CollaboratorKind) -> impl FnOnce(anyhow::Error) -> AssemblyError {
    move |source| AssemblyError::Collaborator { which, source }
}

/// Runs the loop: at most two selection passes, two signer calls and one
/// size-oracle call, whatever the inputs.
pub fn converge<S: Signer, O: SizeOracle>(
    request: ConvergenceRequest<'_>,
    signer: &S,
    oracle: &O,
) -> Result<Converged, AssemblyError> {
    let payload_value = request.payload.value()?;
    let preselected_value = request
        .preselected
        .iter()
        .try_fold(0u64, |acc, utxo| safe_add(acc, utxo.value))?;

    // Size against the worst-case output list: change present. A change
    // output dropped later only shrinks the transaction.
    let sizing = materialize(&request.payload, Some(DUST_LIMIT))?;

    // First pass assumes a single funding input of the change class on top
    // of whatever is preselected.
    let mut assumed: Vec<AddressClass> = request
        .preselected
        .iter()
        .map(|utxo| utxo.address_class)
        .collect();
    assumed.push(request.policy.change_class);

    let mut estimated_fee = estimate_fee(&request.fee_rate, &assumed, &sizing.outputs);
    let shortfall = payload_value.saturating_sub(preselected_value);
    let mut selection = select(
        request.candidates,
        safe_add(shortfall, estimated_fee)?,
        request.policy,
    )?;

    // Corrective pass, at most once: the selector may have picked more or
    // costlier inputs than the single one assumed above.
    let actual: Vec<AddressClass> = request
        .preselected
        .iter()
        .chain(selection.chosen.iter())
        .map(|utxo| utxo.address_class)
        .collect();
    if actual != assumed {
        let corrected = estimate_fee(&request.fee_rate, &actual, &sizing.outputs);
        if corrected > estimated_fee {
            estimated_fee = corrected;
            let target = safe_add(shortfall, estimated_fee)?;
            if selection.total_value < target {
                debug!(target, "re-selecting after input-count fee correction");
                selection = select(request.candidates, target, request.policy)?;
            }
        }
    }

    let mut inputs = request.preselected;
    inputs.extend(selection.chosen);
    let total_input = safe_add(preselected_value, selection.total_value)?;

    // Pass one: build at the estimated fee, sign without finalizing, and
    // measure what the network will actually meter.
    let change = total_input
        .checked_sub(payload_value)
        .and_then(|rest| rest.checked_sub(estimated_fee))
        .ok_or(AssemblyError::NotEnoughAmountToCoverFees)?;
    let draft = materialize(&request.payload, keep_change(change))?;
    let signed_draft = signer
        .sign_all_inputs(&unsigned_transaction(&inputs, draft.outputs), false)
        .map_err(collaborator_failed(CollaboratorKind::Signer))?;
    let vsize = oracle
        .measure_vsize(&signed_draft)
        .map_err(collaborator_failed(CollaboratorKind::SizeOracle))?;

    // Pass two: rebuild at the measured fee and finalize. Change presence
    // is sticky: the measured size is only valid for the draft's output
    // shape, so change folded in pass one must not resurface when the lower
    // fee leaves room for it again.
    let final_fee = floor_fee(request.fee_rate.fee(vsize as usize).to_sat());
    let change = total_input
        .checked_sub(payload_value)
        .and_then(|rest| rest.checked_sub(final_fee))
        .ok_or(AssemblyError::NotEnoughAmountToCoverFees)?;
    let final_change = if draft.change_value.is_some() {
        keep_change(change)
    } else {
        if change > 0 {
            debug!(change, "fee savings join the already-folded change");
        }
        None
    };
    let plan = materialize(&request.payload, final_change)?;
    let planned_value = plan.total_value();
    let transaction = signer
        .sign_all_inputs(&unsigned_transaction(&inputs, plan.outputs.clone()), true)
        .map_err(collaborator_failed(CollaboratorKind::Signer))?;

    // The signer owns signatures, not the money flow.
    let signed_value: u64 = transaction
        .output
        .iter()
        .map(|output| output.value.to_sat())
        .sum();
    let fee_paid = total_input - planned_value;
    if signed_value != planned_value || transaction.input.len() != inputs.len() {
        return Err(AssemblyError::ConservationViolated {
            inputs: total_input,
            outputs: signed_value,
            fee: fee_paid,
        });
    }

    debug!(
        estimated_fee,
        final_fee = fee_paid,
        vsize,
        inputs = inputs.len(),
        "fee convergence complete"
    );

    Ok(Converged {
        transaction,
        fee_plan: FeePlan {
            fee_rate: request.fee_rate,
            estimated_fee,
            final_fee: fee_paid,
        },
        inputs,
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlannedOutput;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, Txid};
    use std::cell::Cell;

    struct WitnessStampingSigner {
        calls: Cell<usize>,
    }

    impl WitnessStampingSigner {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl Signer for WitnessStampingSigner {
        fn sign_all_inputs(
            &self,
            transaction: &Transaction,
            _finalize: bool,
        ) -> anyhow::Result<Transaction> {
            self.calls.set(self.calls.get() + 1);
            let mut signed = transaction.clone();
            for input in &mut signed.input {
                input.witness = Witness::from_slice(&[vec![0u8; 64]]);
            }
            Ok(signed)
        }
    }

    struct ExactOracle {
        calls: Cell<usize>,
    }

    impl ExactOracle {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl SizeOracle for ExactOracle {
        fn measure_vsize(&self, transaction: &Transaction) -> anyhow::Result<u64> {
            self.calls.set(self.calls.get() + 1);
            Ok(transaction.vsize() as u64)
        }
    }

    fn utxo(index: u8, value: u64) -> SpendableOutput {
        SpendableOutput {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([index; 32]),
                vout: 0,
            },
            value,
            script_pubkey: ScriptBuf::from_bytes(vec![0x51; 22]),
            address_class: AddressClass::NativeSegwit,
            inscribed: false,
            asset: None,
        }
    }

    fn payload(recipient_value: u64) -> PayloadSpec {
        PayloadSpec {
            leading: None,
            recipients: vec![PlannedOutput {
                script_pubkey: ScriptBuf::from_bytes(vec![0xbb; 22]),
                value: recipient_value,
            }],
            intent: None,
            change_script: ScriptBuf::from_bytes(vec![0xdd; 22]),
        }
    }

    fn run(
        candidates: &[SpendableOutput],
        recipient_value: u64,
        rate: f64,
    ) -> Result<(Converged, usize, usize), AssemblyError> {
        let policy = SpendPolicy::default();
        let signer = WitnessStampingSigner::new();
        let oracle = ExactOracle::new();
        let converged = converge(
            ConvergenceRequest {
                candidates,
                preselected: Vec::new(),
                policy: &policy,
                fee_rate: FeeRate::try_from(rate).unwrap(),
                payload: payload(recipient_value),
            },
            &signer,
            &oracle,
        )?;
        Ok((converged, signer.calls.get(), oracle.calls.get()))
    }

    #[test]
    fn conserves_value_exactly() {
        let candidates = vec![utxo(1, 100_000)];
        let (converged, _, _) = run(&candidates, 40_000, 2.0).unwrap();

        let input_total: u64 = converged.inputs.iter().map(|utxo| utxo.value).sum();
        let output_total: u64 = converged
            .transaction
            .output
            .iter()
            .map(|output| output.value.to_sat())
            .sum();
        assert_eq!(input_total, output_total + converged.fee_plan.final_fee);
    }

    #[test]
    fn bounded_collaborator_calls() {
        let candidates = vec![utxo(1, 100_000)];
        let (_, signer_calls, oracle_calls) = run(&candidates, 40_000, 2.0).unwrap();
        assert_eq!(signer_calls, 2);
        assert_eq!(oracle_calls, 1);
    }

    #[test]
    fn final_fee_never_exceeds_estimate() {
        let candidates = vec![utxo(1, 100_000), utxo(2, 30_000)];
        let (converged, _, _) = run(&candidates, 40_000, 5.0).unwrap();
        assert!(converged.fee_plan.final_fee <= converged.fee_plan.estimated_fee);
        assert!(converged.fee_plan.final_fee >= crate::constants::MIN_TX_FEE);
    }

    #[test]
    fn no_output_below_dust() {
        // Funds land exactly so that change would be sub-dust.
        let candidates = vec![utxo(1, 40_000 + 700)];
        let (converged, _, _) = run(&candidates, 40_000, 1.0).unwrap();

        for output in &converged.transaction.output {
            assert!(output.value.to_sat() >= DUST_LIMIT);
        }
        // The dust rides in the fee, so the fee exceeds the pure rate fee.
        assert!(converged.plan.change_value.is_none());
        assert!(converged.fee_plan.final_fee > crate::constants::MIN_TX_FEE);
    }

    #[test]
    fn insufficient_funds_reports_reachable_total() {
        let candidates = vec![utxo(1, 10_000)];
        let err = run(&candidates, 40_000, 1.0).unwrap_err();
        match err {
            AssemblyError::InsufficientFunds { available, .. } => {
                assert_eq!(available, 10_000)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn corrective_pass_covers_multi_input_fees() {
        // Forces several small inputs, so the single-input fee assumption is
        // wrong and the corrective pass must top up.
        let candidates: Vec<SpendableOutput> =
            (1..=20).map(|index| utxo(index, 3_000)).collect();
        let (converged, _, _) = run(&candidates, 40_000, 3.0).unwrap();

        let input_total: u64 = converged.inputs.iter().map(|utxo| utxo.value).sum();
        let output_total: u64 = converged
            .transaction
            .output
            .iter()
            .map(|output| output.value.to_sat())
            .sum();
        assert!(converged.inputs.len() > 1);
        assert_eq!(input_total, output_total + converged.fee_plan.final_fee);
    }

    #[test]
    fn folded_change_stays_folded_after_measurement() {
        // 41_041 sats in, 40_000 out at 5 sat/vB: the estimated fee folds
        // the change, and the fee implied by the measured size would leave
        // exactly DUST_LIMIT behind. The output the oracle never saw must
        // not come back.
        let candidates = vec![utxo(1, 41_041)];
        let (converged, _, _) = run(&candidates, 40_000, 5.0).unwrap();

        assert_eq!(converged.transaction.output.len(), 1);
        assert!(converged.plan.change_value.is_none());

        let vsize = converged.transaction.vsize();
        let owed = converged.fee_plan.fee_rate.fee(vsize).to_sat();
        assert!(
            converged.fee_plan.final_fee >= owed,
            "pays {} but owes {owed}",
            converged.fee_plan.final_fee
        );
    }

    #[test]
    fn paid_rate_never_undershoots_the_requested_rate() {
        // 40_000 out at 5 sat/vB selects against a 705 sat estimate, so the
        // window starts just past the 40_705 target and sweeps across the
        // fold/keep boundary for change.
        for input_value in (40_710..=41_600).step_by(7) {
            let candidates = vec![utxo(1, input_value)];
            let (converged, _, _) = run(&candidates, 40_000, 5.0).unwrap();

            let vsize = converged.transaction.vsize();
            let owed = converged.fee_plan.fee_rate.fee(vsize).to_sat();
            assert!(
                converged.fee_plan.final_fee >= owed,
                "input {input_value}: pays {} but owes {owed}",
                converged.fee_plan.final_fee
            );
            for output in &converged.transaction.output {
                assert!(output.value.to_sat() >= DUST_LIMIT);
            }
        }
    }

    #[test]
    fn preselected_outputs_always_spend() {
        let held = utxo(9, 546);
        let policy = SpendPolicy::default();
        let signer = WitnessStampingSigner::new();
        let oracle = ExactOracle::new();
        let candidates = vec![utxo(1, 100_000)];

        let converged = converge(
            ConvergenceRequest {
                candidates: &candidates,
                preselected: vec![held.clone()],
                policy: &policy,
                fee_rate: FeeRate::try_from(1.0).unwrap(),
                payload: payload(20_000),
            },
            &signer,
            &oracle,
        )
        .unwrap();

        assert!(converged.inputs.contains(&held));
    }

    mod properties {
        use super::*;
        use proptest::collection::vec;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn conservation_holds_across_random_ledgers(
                values in vec(1_000u64..500_000, 1..8),
                recipient_value in 10_000u64..100_000,
                rate in 1.0f64..50.0,
            ) {
                let candidates: Vec<SpendableOutput> = values
                    .iter()
                    .enumerate()
                    .map(|(index, value)| utxo(index as u8 + 1, *value))
                    .collect();

                match run(&candidates, recipient_value, rate) {
                    Ok((converged, _, _)) => {
                        let input_total: u64 =
                            converged.inputs.iter().map(|utxo| utxo.value).sum();
                        let output_total: u64 = converged
                            .transaction
                            .output
                            .iter()
                            .map(|output| output.value.to_sat())
                            .sum();
                        prop_assert_eq!(
                            input_total,
                            output_total + converged.fee_plan.final_fee
                        );
                        for output in &converged.transaction.output {
                            prop_assert!(output.value.to_sat() >= DUST_LIMIT);
                        }
                        let vsize = converged.transaction.vsize();
                        prop_assert!(
                            converged.fee_plan.final_fee
                                >= converged.fee_plan.fee_rate.fee(vsize).to_sat()
                        );
                    }
                    Err(AssemblyError::InsufficientFunds { .. })
                    | Err(AssemblyError::NotEnoughAmountToCoverFees) => {}
                    Err(other) => {
                        return Err(TestCaseError::fail(format!("unexpected error: {other}")))
                    }
                }
            }
        }
    }
}
