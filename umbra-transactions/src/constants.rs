/// Outputs below this value are not relayed by the base ledger and are never
/// produced by the planner; sub-dust change is folded into the fee instead.
pub const DUST_LIMIT: u64 = 546;

/// Value attached to outputs that exist only to carry protocol assets.
pub const POSTAGE: u64 = 546;

/// Fee floor applied to every estimate so a small transaction is never
/// rejected for paying less than the network's minimum.
pub const MIN_TX_FEE: u64 = 250;
