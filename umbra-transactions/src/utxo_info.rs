//! The ledger-view data model: spendable outputs, their classification, and
//! the spend policy that orders them during selection.

use bitcoin::{OutPoint, ScriptBuf};
use umbra_envelope::AssetId;

/// The address family an output is locked to, which fixes the cost of
/// spending it. Exhaustive on purpose: every output the ledger view hands us
/// is classified, there is no silent fallthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressClass {
    Legacy,
    NestedSegwit,
    NativeSegwit,
    Taproot,
}

impl AddressClass {
    /// Worst-case virtual bytes one input of this class adds to a
    /// transaction, signature included.
    pub fn input_vbytes(&self) -> usize {
        match self {
            AddressClass::Legacy => 148,
            AddressClass::NestedSegwit => 91,
            AddressClass::NativeSegwit => 68,
            AddressClass::Taproot => 58,
        }
    }

    /// Whether spending this class places signature data in the witness.
    pub fn is_witness(&self) -> bool {
        !matches!(self, AddressClass::Legacy)
    }
}

/// A quantity of one protocol-native asset held by an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetLot {
    pub id: AssetId,
    pub amount: u128,
}

/// One unspent output as reported by the ledger view.
///
/// Identity is the outpoint: two `SpendableOutput`s compare equal when they
/// name the same `(txid, vout)`, whatever their metadata says. Immutable
/// once observed.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub address_class: AddressClass,
    /// Carries an ordinal-style inscription; never spent as plain funding.
    pub inscribed: bool,
    /// Carries a protocol asset; only spent through asset-aware selection.
    pub asset: Option<AssetLot>,
}

impl SpendableOutput {
    /// Plain funding outputs: no inscription, no protocol asset. Only these
    /// may pay fees and BTC-denominated payloads.
    pub fn is_cardinal(&self) -> bool {
        !self.inscribed && self.asset.is_none()
    }
}

impl PartialEq for SpendableOutput {
    fn eq(&self, other: &Self) -> bool {
        self.outpoint == other.outpoint
    }
}

impl Eq for SpendableOutput {}

impl std::fmt::Display for SpendableOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.outpoint.txid, self.outpoint.vout)
    }
}

impl AsRef<SpendableOutput> for SpendableOutput {
    fn as_ref(&self) -> &SpendableOutput {
        self
    }
}

/// Selection configuration: which address classes may fund a transaction,
/// in which order, and where leftover value returns.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpendPolicy {
    /// Classes eligible for funding, highest priority first. Outputs whose
    /// class is not listed are never spent.
    pub class_priority: Vec<AddressClass>,
    /// Within a class, spend the largest outputs first (true) or the
    /// smallest first (false).
    pub sort_greatest_first: bool,
    /// Address class of the change output.
    pub change_class: AddressClass,
}

impl Default for SpendPolicy {
    fn default() -> Self {
        Self {
            class_priority: vec![
                AddressClass::NativeSegwit,
                AddressClass::Taproot,
                AddressClass::NestedSegwit,
                AddressClass::Legacy,
            ],
            sort_greatest_first: true,
            change_class: AddressClass::NativeSegwit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn outpoint(byte: u8, vout: u32) -> OutPoint {
        OutPoint {
            txid: Txid::from_byte_array([byte; 32]),
            vout,
        }
    }

    fn output(byte: u8, vout: u32, value: u64) -> SpendableOutput {
        SpendableOutput {
            outpoint: outpoint(byte, vout),
            value,
            script_pubkey: ScriptBuf::new(),
            address_class: AddressClass::NativeSegwit,
            inscribed: false,
            asset: None,
        }
    }

    #[test]
    fn identity_is_the_outpoint() {
        let a = output(1, 0, 1_000);
        let mut b = output(1, 0, 99_999);
        b.address_class = AddressClass::Legacy;
        assert_eq!(a, b);
        assert_ne!(a, output(1, 1, 1_000));
    }

    #[test]
    fn cardinal_excludes_inscriptions_and_assets() {
        let mut utxo = output(2, 0, 1_000);
        assert!(utxo.is_cardinal());

        utxo.inscribed = true;
        assert!(!utxo.is_cardinal());

        utxo.inscribed = false;
        utxo.asset = Some(AssetLot {
            id: AssetId::new(840_000, 3),
            amount: 10,
        });
        assert!(!utxo.is_cardinal());
    }

    #[test]
    fn witness_classes_are_cheaper_than_legacy() {
        let legacy = AddressClass::Legacy.input_vbytes();
        for class in [
            AddressClass::NestedSegwit,
            AddressClass::NativeSegwit,
            AddressClass::Taproot,
        ] {
            assert!(class.is_witness());
            assert!(class.input_vbytes() < legacy);
        }
        assert!(!AddressClass::Legacy.is_witness());
    }
}
