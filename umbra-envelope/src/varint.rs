//! LEB128 varints over `u128`, the integer encoding every field of the
//! envelope payload uses on the wire.

use crate::EnvelopeError;

/// Appends `value` to `buf` as an LEB128 varint.
pub fn encode_to(mut value: u128, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decodes one varint from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(u128, usize), EnvelopeError> {
    let mut value: u128 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        // 19 bytes carry 133 payload bits; anything longer cannot fit u128.
        if i > 18 {
            return Err(EnvelopeError::VarintTooLong);
        }

        let payload = u128::from(byte & 0x7f);

        // The 19th byte may only carry the two bits left of a u128.
        if i == 18 && payload & !0x03 != 0 {
            return Err(EnvelopeError::VarintTooLong);
        }

        value |= payload << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(EnvelopeError::TruncatedVarint)
}
