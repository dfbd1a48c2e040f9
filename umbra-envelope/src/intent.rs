//! Typed cross-protocol intents and their lowering into envelopes.
//!
//! An intent describes the operation in user terms ("move N of asset X to
//! recipient 2", "swap against pool P"); an [`OutputLayout`] describes where
//! the planner placed each output in the transaction. [`encode`] marries the
//! two, producing an [`Envelope`] whose edicts are addressed by concrete
//! output index. Contract-style operations (mint, swap, liquidity) carry
//! their call in the calldata field as a varint word stream, the same
//! encoding the payload itself uses.

use crate::{varint, AssetId, Edict, Envelope, EnvelopeError};

/// Calldata opcodes understood by the metaprotocol's interpreter.
pub mod op {
    pub const MINT: u128 = 1;
    pub const SWAP: u128 = 2;
    pub const ADD_LIQUIDITY: u128 = 3;
    pub const REMOVE_LIQUIDITY: u128 = 4;
}

/// Where the planner placed each output, by index into the final output
/// list: `[leading, recipients.., envelope, change?]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    /// The mandatory leading protocol output (refund/operation target).
    pub leading: u32,
    /// One entry per recipient output, in recipient order.
    pub recipients: Vec<u32>,
    /// Index of the envelope output itself.
    pub envelope: u32,
    /// Index of the sender's change output, when one exists.
    pub change: Option<u32>,
}

impl OutputLayout {
    /// Default target for `pointer` and `refund_pointer`: the sender's own
    /// change output, falling back to the leading output when change was
    /// folded into the fee.
    pub fn default_pointer(&self) -> u32 {
        self.change.unwrap_or(self.leading)
    }
}

/// One leg of a (possibly multi-recipient) asset transfer. `recipient_slot`
/// indexes into [`OutputLayout::recipients`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetTransfer {
    pub amount: u128,
    pub recipient_slot: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferIntent {
    pub asset: AssetId,
    pub transfers: Vec<AssetTransfer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintIntent {
    pub asset: AssetId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapIntent {
    pub pool: AssetId,
    pub sell_asset: AssetId,
    pub sell_amount: u128,
    /// Slippage bound enforced by the protocol at settlement time.
    pub min_buy_amount: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiquidityIntent {
    Add {
        pool: AssetId,
        deposit_a: (AssetId, u128),
        deposit_b: (AssetId, u128),
    },
    Remove {
        pool: AssetId,
        share_asset: AssetId,
        share_amount: u128,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Transfer(TransferIntent),
    Mint(MintIntent),
    Swap(SwapIntent),
    Liquidity(LiquidityIntent),
}

/// Serializes a calldata word stream.
pub fn calldata_words(words: &[u128]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for &word in words {
        varint::encode_to(word, &mut bytes);
    }
    bytes
}

/// Parses a calldata word stream; inverse of [`calldata_words`].
pub fn parse_calldata_words(mut bytes: &[u8]) -> Result<Vec<u128>, EnvelopeError> {
    let mut words = Vec::new();
    while !bytes.is_empty() {
        let (word, used) = varint::decode(bytes)?;
        words.push(word);
        bytes = &bytes[used..];
    }
    Ok(words)
}

/// Lowers `intent` into an envelope addressed against `layout`.
///
/// Edicts always reference recipient or leading outputs, never the envelope
/// output; `pointer` and `refund_pointer` default per
/// [`OutputLayout::default_pointer`].
pub fn encode(intent: &Intent, layout: &OutputLayout) -> Result<Envelope, EnvelopeError> {
    let pointer = layout.default_pointer();

    let envelope = match intent {
        Intent::Transfer(transfer) => {
            let mut edicts = Vec::with_capacity(transfer.transfers.len());
            for leg in &transfer.transfers {
                let output = *layout.recipients.get(leg.recipient_slot).ok_or(
                    EnvelopeError::InvalidRecipientSlot {
                        slot: leg.recipient_slot,
                        recipients: layout.recipients.len(),
                    },
                )?;
                edicts.push(Edict {
                    asset: transfer.asset,
                    amount: leg.amount,
                    output,
                });
            }

            Envelope {
                edicts,
                pointer,
                refund_pointer: pointer,
                calldata: Vec::new(),
            }
        }

        Intent::Mint(mint) => Envelope {
            edicts: Vec::new(),
            pointer,
            refund_pointer: pointer,
            calldata: calldata_words(&[op::MINT, mint.asset.block, mint.asset.tx]),
        },

        Intent::Swap(swap) => Envelope {
            edicts: vec![Edict {
                asset: swap.sell_asset,
                amount: swap.sell_amount,
                output: layout.leading,
            }],
            pointer,
            refund_pointer: pointer,
            calldata: calldata_words(&[
                op::SWAP,
                swap.pool.block,
                swap.pool.tx,
                swap.min_buy_amount,
            ]),
        },

        Intent::Liquidity(LiquidityIntent::Add {
            pool,
            deposit_a,
            deposit_b,
        }) => Envelope {
            edicts: vec![
                Edict {
                    asset: deposit_a.0,
                    amount: deposit_a.1,
                    output: layout.leading,
                },
                Edict {
                    asset: deposit_b.0,
                    amount: deposit_b.1,
                    output: layout.leading,
                },
            ],
            pointer,
            refund_pointer: pointer,
            calldata: calldata_words(&[op::ADD_LIQUIDITY, pool.block, pool.tx]),
        },

        Intent::Liquidity(LiquidityIntent::Remove {
            pool,
            share_asset,
            share_amount,
        }) => Envelope {
            edicts: vec![Edict {
                asset: *share_asset,
                amount: *share_amount,
                output: layout.leading,
            }],
            pointer,
            refund_pointer: pointer,
            calldata: calldata_words(&[op::REMOVE_LIQUIDITY, pool.block, pool.tx]),
        },
    };

    Ok(envelope)
}
