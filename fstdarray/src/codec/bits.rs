//! Bit level access to packed integer streams.
//!
//! Values are stored most significant bit first, each value occupying exactly `bit_width` bits,
//! with no padding between values.
//!
use std::cmp::min;

/// Reads fixed width unsigned integers from a packed bit stream.
///
pub(crate) struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Number of bits needed to hold `count` values of `bit_width` bits, if it fits in a `usize`
    pub(crate) fn bits_needed(count: usize, bit_width: u8) -> Option<usize> {
        count.checked_mul(bit_width as usize)
    }

    /// Whether the stream holds at least `count` values of `bit_width` bits
    pub(crate) fn holds(&self, count: usize, bit_width: u8) -> bool {
        match Self::bits_needed(count, bit_width) {
            Some(bits) => self.bytes.len().saturating_mul(8) >= bits,
            None => false,
        }
    }

    /// Read the next `bit_width` bits as an unsigned integer.
    ///
    /// Returns `None` if the stream is exhausted.
    ///
    pub(crate) fn read(&mut self, bit_width: u8) -> Option<u64> {
        let mut value: u64 = 0;
        let mut remaining = bit_width as usize;
        while remaining > 0 {
            let byte = *self.bytes.get(self.position / 8)?;

            // Bits of this byte not yet consumed
            let available = 8 - self.position % 8;
            let take = min(available, remaining);
            let shift = available - take;
            let bits = (byte >> shift) as u64 & ((1_u64 << take) - 1);

            value = (value << take) | bits;
            self.position += take;
            remaining -= take;
        }

        Some(value)
    }
}

/// Interpret the low `bit_width` bits of `value` as a two's complement signed integer.
pub(crate) fn sign_extend(value: u64, bit_width: u8) -> i64 {
    if bit_width == 0 || bit_width >= 64 {
        return value as i64;
    }
    let shift = 64 - bit_width as u32;

    ((value << shift) as i64) >> shift
}

/// Builds a packed bit stream, for writing test records.
///
#[cfg(test)]
pub(crate) struct BitWriter {
    length: usize,
    bytes: Vec<u8>,
}

#[cfg(test)]
impl BitWriter {
    pub(crate) fn new() -> Self {
        Self {
            length: 0,
            bytes: vec![],
        }
    }

    /// Push the low `bit_width` bits of `value` onto the stream
    pub(crate) fn push(&mut self, value: u64, bit_width: u8) {
        for i in (0..bit_width as u32).rev() {
            let bit = (value >> i) & 1 == 1;
            let position = self.length % 8;
            if position == 0 {
                self.bytes.push(0);
            }
            if bit {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - position);
            }
            self.length += 1;
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
