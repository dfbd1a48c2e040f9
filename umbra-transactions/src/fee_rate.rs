use bitcoin::Amount;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("fee rate must be a finite, positive number of sats per vbyte")]
pub struct InvalidFeeRate;

/// A validated fee rate in satoshis per virtual byte.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "f64", into = "f64"))]
pub struct FeeRate(f64);

impl FeeRate {
    /// The raw rate in sats per vbyte.
    pub fn n(&self) -> f64 {
        self.0
    }

    /// Fee owed by a transaction of `vsize` virtual bytes, rounded up so the
    /// effective rate never falls below the target.
    pub fn fee(&self, vsize: usize) -> Amount {
        Amount::from_sat((self.0 * vsize as f64).ceil() as u64)
    }
}

impl TryFrom<f64> for FeeRate {
    type Error = InvalidFeeRate;

    fn try_from(rate: f64) -> Result<Self, Self::Error> {
        if rate.is_finite() && rate > 0.0 {
            Ok(Self(rate))
        } else {
            Err(InvalidFeeRate)
        }
    }
}

impl From<FeeRate> for f64 {
    fn from(rate: FeeRate) -> f64 {
        rate.0
    }
}
