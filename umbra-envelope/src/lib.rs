//! Protocol envelope encoding for overlay-protocol transactions.
//!
//! Overlay protocols (fungible-token transfers, mint calls, AMM operations)
//! carry their metadata in a provably-unspendable auxiliary output: an
//! `OP_RETURN OP_PUSHNUM_13` script whose pushed data is a stream of LEB128
//! varints. This crate owns that wire format end to end: the typed model
//! ([`Envelope`], [`Edict`], [`AssetId`]), the tag/value codec, and the
//! [`Intent`](intent::Intent) layer that turns a user-level operation into an
//! envelope addressed against a concrete output layout.
//!
//! Decoding is the exact inverse of encoding so callers can audit the bytes
//! they are about to broadcast; see [`Envelope::from_script`].

use bitcoin::opcodes::all::{OP_PUSHNUM_13, OP_RETURN};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf, Transaction};
use thiserror::Error;

pub mod intent;
pub mod varint;

pub use intent::{
    AssetTransfer, Intent, LiquidityIntent, MintIntent, OutputLayout, SwapIntent, TransferIntent,
};

/// Upper bound on envelope calldata; larger blobs belong in a witness, not
/// in the auxiliary output.
pub const MAX_CALLDATA_BYTES: usize = 512;

/// Calldata bytes are packed into u128 limbs of this many bytes each.
const CALLDATA_LIMB_BYTES: usize = 15;

/// Identifies a protocol-native asset by the block and intra-block
/// transaction index of its etching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetId {
    pub block: u128,
    pub tx: u128,
}

impl AssetId {
    pub const fn new(block: u128, tx: u128) -> Self {
        Self { block, tx }
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block, self.tx)
    }
}

/// A directive moving `amount` of `asset` into the transaction output at
/// index `output`. Interpreted by protocol-aware indexers after broadcast;
/// the base ledger never enforces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edict {
    pub asset: AssetId,
    pub amount: u128,
    pub output: u32,
}

/// The decoded form of the auxiliary-output payload.
///
/// `pointer` names the output that receives any asset quantity not claimed
/// by an edict; `refund_pointer` names where assets return when the protocol
/// rejects the operation. Both default to the sender's own change/refund
/// output (see [`OutputLayout::default_pointer`]).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope {
    pub edicts: Vec<Edict>,
    pub pointer: u32,
    pub refund_pointer: u32,
    pub calldata: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("script is not a protocol envelope")]
    NotAnEnvelope,

    #[error("payload ends inside a varint")]
    TruncatedVarint,

    #[error("varint does not fit in a u128")]
    VarintTooLong,

    #[error("unrecognized even tag {0}")]
    UnrecognizedTag(u128),

    #[error("edict body is not a whole number of edicts")]
    TruncatedEdicts,

    #[error("delta-encoded asset id overflows")]
    AssetIdOverflow,

    #[error("value {0} does not fit in an output index")]
    IndexOverflow(u128),

    #[error("edict carries a zero amount")]
    ZeroAmountEdict,

    #[error("duplicate edict target: {amount} of {asset} already directed at output {output}")]
    DuplicateEdictTarget {
        asset: AssetId,
        amount: u128,
        output: u32,
    },

    #[error("edict targets output {output} but the transaction has {outputs} outputs")]
    EdictTargetOutOfRange { output: u32, outputs: u32 },

    #[error("edict targets the envelope output {0}")]
    EdictTargetsEnvelope(u32),

    #[error("calldata of {len} bytes exceeds the {MAX_CALLDATA_BYTES} byte limit")]
    CalldataTooLarge { len: usize },

    #[error("calldata limbs do not match the declared length")]
    CalldataLengthMismatch,

    #[error("transfer names recipient slot {slot} but the layout has {recipients} recipients")]
    InvalidRecipientSlot { slot: usize, recipients: usize },
}

/// Payload field tags. Even per the wire convention: decoders must reject
/// even tags they do not recognize, and skip odd ones.
mod tag {
    pub const BODY: u128 = 0;
    pub const POINTER: u128 = 2;
    pub const REFUND: u128 = 4;
    pub const CALLDATA_LEN: u128 = 6;
    pub const CALLDATA: u128 = 8;
}

impl Envelope {
    /// Structural validation against the transaction the envelope will ride
    /// in: every edict must name a real, non-envelope output, carry a
    /// nonzero amount, and no `(asset, output)` pair may repeat.
    pub fn validate(&self, num_outputs: u32, envelope_index: u32) -> Result<(), EnvelopeError> {
        let mut seen: Vec<(AssetId, u32)> = Vec::with_capacity(self.edicts.len());

        for edict in &self.edicts {
            if edict.amount == 0 {
                return Err(EnvelopeError::ZeroAmountEdict);
            }
            if edict.output >= num_outputs {
                return Err(EnvelopeError::EdictTargetOutOfRange {
                    output: edict.output,
                    outputs: num_outputs,
                });
            }
            if edict.output == envelope_index {
                return Err(EnvelopeError::EdictTargetsEnvelope(edict.output));
            }
            if seen.contains(&(edict.asset, edict.output)) {
                return Err(EnvelopeError::DuplicateEdictTarget {
                    asset: edict.asset,
                    amount: edict.amount,
                    output: edict.output,
                });
            }
            seen.push((edict.asset, edict.output));
        }

        if self.calldata.len() > MAX_CALLDATA_BYTES {
            return Err(EnvelopeError::CalldataTooLarge {
                len: self.calldata.len(),
            });
        }

        Ok(())
    }

    /// Serializes the envelope to its varint payload.
    ///
    /// Edicts are sorted by asset id before delta encoding, so the payload
    /// is canonical: any two envelopes that compare equal after sorting
    /// produce identical bytes.
    pub fn encode_payload(&self) -> Result<Vec<u8>, EnvelopeError> {
        if self.calldata.len() > MAX_CALLDATA_BYTES {
            return Err(EnvelopeError::CalldataTooLarge {
                len: self.calldata.len(),
            });
        }

        let mut payload = Vec::new();

        varint::encode_to(tag::POINTER, &mut payload);
        varint::encode_to(u128::from(self.pointer), &mut payload);

        varint::encode_to(tag::REFUND, &mut payload);
        varint::encode_to(u128::from(self.refund_pointer), &mut payload);

        if !self.calldata.is_empty() {
            varint::encode_to(tag::CALLDATA_LEN, &mut payload);
            varint::encode_to(self.calldata.len() as u128, &mut payload);

            for chunk in self.calldata.chunks(CALLDATA_LIMB_BYTES) {
                let mut limb_bytes = [0u8; 16];
                limb_bytes[..chunk.len()].copy_from_slice(chunk);
                varint::encode_to(tag::CALLDATA, &mut payload);
                varint::encode_to(u128::from_le_bytes(limb_bytes), &mut payload);
            }
        }

        if !self.edicts.is_empty() {
            let mut edicts = self.edicts.clone();
            edicts.sort_by_key(|edict| (edict.asset, edict.output, edict.amount));

            // The body tag is last: everything after it is edict groups.
            varint::encode_to(tag::BODY, &mut payload);

            let mut previous = AssetId::default();
            for edict in &edicts {
                if edict.asset.block == previous.block {
                    varint::encode_to(0, &mut payload);
                    varint::encode_to(edict.asset.tx - previous.tx, &mut payload);
                } else {
                    varint::encode_to(edict.asset.block - previous.block, &mut payload);
                    varint::encode_to(edict.asset.tx, &mut payload);
                }
                varint::encode_to(edict.amount, &mut payload);
                varint::encode_to(u128::from(edict.output), &mut payload);
                previous = edict.asset;
            }
        }

        Ok(payload)
    }

    /// Builds the auxiliary-output script: `OP_RETURN OP_PUSHNUM_13` followed
    /// by the payload in standard pushes.
    pub fn to_script(&self) -> Result<ScriptBuf, EnvelopeError> {
        let payload = self.encode_payload()?;

        let mut builder = Builder::new().push_opcode(OP_RETURN).push_opcode(OP_PUSHNUM_13);

        for chunk in payload.chunks(520) {
            let push = PushBytesBuf::try_from(chunk.to_vec())
                .expect("chunks are bounded by the maximum push size");
            builder = builder.push_slice(push);
        }

        Ok(builder.into_script())
    }

    /// Decodes an envelope from an auxiliary-output script. Exact inverse of
    /// [`Envelope::to_script`] for canonical (sorted-edict) envelopes.
    pub fn from_script(script: &Script) -> Result<Self, EnvelopeError> {
        let mut instructions = script.instructions();

        if instructions.next() != Some(Ok(Instruction::Op(OP_RETURN))) {
            return Err(EnvelopeError::NotAnEnvelope);
        }
        if instructions.next() != Some(Ok(Instruction::Op(OP_PUSHNUM_13))) {
            return Err(EnvelopeError::NotAnEnvelope);
        }

        let mut payload = Vec::new();
        for instruction in instructions {
            match instruction {
                Ok(Instruction::PushBytes(push)) => payload.extend_from_slice(push.as_bytes()),
                _ => return Err(EnvelopeError::NotAnEnvelope),
            }
        }

        Self::decode_payload(&payload)
    }

    /// Finds and decodes the envelope output of `transaction`, if any.
    pub fn from_transaction(transaction: &Transaction) -> Option<Result<Self, EnvelopeError>> {
        transaction.output.iter().find_map(|output| {
            match Self::from_script(&output.script_pubkey) {
                Err(EnvelopeError::NotAnEnvelope) => None,
                result => Some(result),
            }
        })
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let mut envelope = Envelope::default();
        let mut calldata_len: Option<usize> = None;
        let mut limbs: Vec<u128> = Vec::new();
        let mut cursor = 0;

        while cursor < payload.len() {
            let (tag_value, used) = varint::decode(&payload[cursor..])?;
            cursor += used;

            if tag_value == tag::BODY {
                envelope.edicts = decode_edicts(&payload[cursor..])?;
                cursor = payload.len();
                break;
            }

            let (value, used) = varint::decode(&payload[cursor..])?;
            cursor += used;

            match tag_value {
                tag::POINTER => envelope.pointer = narrow_index(value)?,
                tag::REFUND => envelope.refund_pointer = narrow_index(value)?,
                tag::CALLDATA_LEN => {
                    let len = usize::try_from(value)
                        .map_err(|_| EnvelopeError::CalldataTooLarge { len: usize::MAX })?;
                    if len > MAX_CALLDATA_BYTES {
                        return Err(EnvelopeError::CalldataTooLarge { len });
                    }
                    calldata_len = Some(len);
                }
                tag::CALLDATA => limbs.push(value),
                unknown if unknown % 2 == 0 => {
                    return Err(EnvelopeError::UnrecognizedTag(unknown));
                }
                // Odd tags are reserved for forward-compatible extensions
                // and are skipped together with their value.
                _ => {}
            }
        }

        envelope.calldata = unpack_calldata(calldata_len, &limbs)?;

        Ok(envelope)
    }
}

fn narrow_index(value: u128) -> Result<u32, EnvelopeError> {
    u32::try_from(value).map_err(|_| EnvelopeError::IndexOverflow(value))
}

fn decode_edicts(mut body: &[u8]) -> Result<Vec<Edict>, EnvelopeError> {
    let mut edicts = Vec::new();
    let mut previous = AssetId::default();

    while !body.is_empty() {
        let mut fields = [0u128; 4];
        for field in &mut fields {
            if body.is_empty() {
                return Err(EnvelopeError::TruncatedEdicts);
            }
            let (value, used) = varint::decode(body)?;
            *field = value;
            body = &body[used..];
        }

        let [block_delta, tx_field, amount, output] = fields;

        let asset = if block_delta == 0 {
            let tx = previous
                .tx
                .checked_add(tx_field)
                .ok_or(EnvelopeError::AssetIdOverflow)?;
            AssetId::new(previous.block, tx)
        } else {
            let block = previous
                .block
                .checked_add(block_delta)
                .ok_or(EnvelopeError::AssetIdOverflow)?;
            AssetId::new(block, tx_field)
        };

        edicts.push(Edict {
            asset,
            amount,
            output: narrow_index(output)?,
        });
        previous = asset;
    }

    Ok(edicts)
}

fn unpack_calldata(
    declared_len: Option<usize>,
    limbs: &[u128],
) -> Result<Vec<u8>, EnvelopeError> {
    let len = match declared_len {
        Some(len) => len,
        None if limbs.is_empty() => return Ok(Vec::new()),
        None => return Err(EnvelopeError::CalldataLengthMismatch),
    };

    if limbs.len() != len.div_ceil(CALLDATA_LIMB_BYTES) {
        return Err(EnvelopeError::CalldataLengthMismatch);
    }

    let mut bytes = Vec::with_capacity(len);
    for limb in limbs {
        let limb_bytes = limb.to_le_bytes();
        let remaining = len - bytes.len();
        bytes.extend_from_slice(&limb_bytes[..remaining.min(CALLDATA_LIMB_BYTES)]);
    }

    // Trailing garbage in the final limb would round-trip differently.
    if bytes.len() != len {
        return Err(EnvelopeError::CalldataLengthMismatch);
    }

    Ok(bytes)
}
