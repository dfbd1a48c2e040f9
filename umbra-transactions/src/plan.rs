//! Output planning: turning a payload description into the ordered output
//! list every overlay protocol depends on.
//!
//! The order is a wire contract, not a convenience: edicts address outputs
//! by index, so external indexers depend on
//! `[leading, recipients.., envelope, change?]` being byte-stable. The
//! planner is the only place that ordering is produced.

use bitcoin::{Amount, ScriptBuf, TxOut};
use tracing::warn;

use crate::constants::DUST_LIMIT;
use crate::error::AssemblyError;
use umbra_envelope::{intent, Intent, OutputLayout};
use umbra_safe_math::{safe_add, MathError};

/// One concrete output the caller asked for: a recipient payment or the
/// leading protocol output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedOutput {
    pub script_pubkey: ScriptBuf,
    pub value: u64,
}

/// Everything the planner needs besides the change amount: the fixed
/// outputs and, for overlay builds, the intent to lower into an envelope.
#[derive(Clone, Debug)]
pub struct PayloadSpec {
    /// Mandatory leading output for envelope-bearing builds; `None` for
    /// plain value transfers.
    pub leading: Option<PlannedOutput>,
    pub recipients: Vec<PlannedOutput>,
    /// Present iff the transaction carries an envelope output.
    pub intent: Option<Intent>,
    pub change_script: ScriptBuf,
}

impl PayloadSpec {
    /// Total sats bound in the fixed outputs (excludes envelope and change).
    pub fn value(&self) -> Result<u64, MathError> {
        let leading = self.leading.as_ref().map(|out| out.value).unwrap_or(0);
        self.recipients
            .iter()
            .try_fold(leading, |total, out| safe_add(total, out.value))
    }
}

/// The materialized output list plus the index bookkeeping callers audit
/// against.
#[derive(Clone, Debug)]
pub struct OutputPlan {
    pub outputs: Vec<TxOut>,
    pub layout: Option<OutputLayout>,
    pub envelope_script: Option<ScriptBuf>,
    /// Change actually planned; `None` when there was no change or it was
    /// folded into the fee by the caller.
    pub change_value: Option<u64>,
}

impl OutputPlan {
    pub fn total_value(&self) -> u64 {
        self.outputs
            .iter()
            .map(|output| output.value.to_sat())
            .sum()
    }
}

/// Decides whether a change amount survives as an output. Sub-dust change
/// is dropped — the planner never creates an output the network would
/// refuse to relay — and the dust rides along in the fee.
pub fn keep_change(change: u64) -> Option<u64> {
    if change >= DUST_LIMIT {
        Some(change)
    } else {
        if change > 0 {
            warn!(change, dust_limit = DUST_LIMIT, "folding sub-dust change into fee");
        }
        None
    }
}

/// Builds the ordered output list for `payload` with the given change amount.
///
/// When `payload.intent` is set the envelope is lowered against the resulting
/// layout and validated against it, so a malformed edict set fails here —
/// before anything is signed.
pub fn materialize(
    payload: &PayloadSpec,
    change_value: Option<u64>,
) -> Result<OutputPlan, AssemblyError> {
    let mut outputs = Vec::new();

    let leading_index = payload.leading.as_ref().map(|leading| {
        outputs.push(TxOut {
            value: Amount::from_sat(leading.value),
            script_pubkey: leading.script_pubkey.clone(),
        });
        0u32
    });

    let mut recipient_indices = Vec::with_capacity(payload.recipients.len());
    for recipient in &payload.recipients {
        recipient_indices.push(outputs.len() as u32);
        outputs.push(TxOut {
            value: Amount::from_sat(recipient.value),
            script_pubkey: recipient.script_pubkey.clone(),
        });
    }

    let (layout, envelope_script) = match &payload.intent {
        Some(intent_value) => {
            let envelope_index = outputs.len() as u32;
            let change_index = change_value.map(|_| envelope_index + 1);

            let layout = OutputLayout {
                leading: leading_index.unwrap_or(0),
                recipients: recipient_indices,
                envelope: envelope_index,
                change: change_index,
            };

            let envelope = intent::encode(intent_value, &layout)?;
            let num_outputs = envelope_index + 1 + u32::from(change_index.is_some());
            envelope.validate(num_outputs, envelope_index)?;

            let script = envelope.to_script()?;
            outputs.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: script.clone(),
            });

            (Some(layout), Some(script))
        }
        None => (None, None),
    };

    if let Some(change) = change_value {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: payload.change_script.clone(),
        });
    }

    Ok(OutputPlan {
        outputs,
        layout,
        envelope_script,
        change_value,
    })
}
