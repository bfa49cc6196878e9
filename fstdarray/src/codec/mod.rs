//! Decode record bytes into typed arrays.
//!
//! How a record's payload is laid out is determined by the type code in its header. Each type code
//! is handled by an `Unpack` strategy looked up in a `Codecs` registry, so encodings can be added
//! or replaced without touching the rest of the decoder.
//!
mod bits;
mod packed;
mod raw;

#[cfg(test)]
pub(crate) use bits::BitWriter;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::dtype::DType;
use crate::errors::{Error, Result};
use crate::field::Field;
use crate::header::HeaderView;

pub use packed::{PackedSigned, PackedUnsigned, QuantizedFloat};
pub use raw::{Characters, RawFloat};

/// Raw binary data of unknown type. Decoded as `RAW_FLOAT`.
pub const RAW_BINARY: u8 = 0;
pub const QUANTIZED_FLOAT: u8 = 1;
pub const PACKED_UNSIGNED: u8 = 2;
pub const CHARACTERS: u8 = 3;
pub const PACKED_SIGNED: u8 = 4;
pub const RAW_FLOAT: u8 = 5;
pub const QUANTIZED_FLOAT_ALT: u8 = 6;

/// A strategy for turning a record payload into a flat typed array.
///
pub trait Unpack: Debug + Send + Sync {
    /// Element type produced for the given bit width, or `None` if the width isn't supported.
    fn dtype(&self, bit_width: u8) -> Option<DType>;

    /// Unpack `count` values from `payload`, producing a one dimensional field.
    fn unpack(&self, payload: &[u8], count: usize, bit_width: u8) -> Result<Field>;
}

/// Registry of unpacking strategies keyed by type code.
///
#[derive(Clone, Debug)]
pub struct Codecs {
    strategies: HashMap<u8, Arc<dyn Unpack>>,
}

impl Default for Codecs {
    fn default() -> Self {
        let mut codecs = Self::empty();
        codecs.register(RAW_BINARY, RawFloat);
        codecs.register(QUANTIZED_FLOAT, QuantizedFloat);
        codecs.register(PACKED_UNSIGNED, PackedUnsigned);
        codecs.register(CHARACTERS, Characters);
        codecs.register(PACKED_SIGNED, PackedSigned);
        codecs.register(RAW_FLOAT, RawFloat);
        codecs.register(QUANTIZED_FLOAT_ALT, QuantizedFloat);

        codecs
    }
}

impl Codecs {
    /// A registry with no strategies at all
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Add or replace the strategy for a type code
    pub fn register<U>(&mut self, type_code: u8, strategy: U)
    where
        U: Unpack + 'static,
    {
        self.strategies.insert(type_code, Arc::new(strategy));
    }

    fn strategy(&self, type_code: u8, bit_width: u8) -> Result<&Arc<dyn Unpack>> {
        self.strategies
            .get(&type_code)
            .ok_or(Error::UnsupportedType {
                type_code,
                bit_width,
            })
    }

    /// Resolve the output element type for a type code and bit width.
    ///
    pub fn dtype(&self, type_code: u8, bit_width: u8) -> Result<DType> {
        self.strategy(type_code, bit_width)?
            .dtype(bit_width)
            .ok_or(Error::UnsupportedType {
                type_code,
                bit_width,
            })
    }

    /// Decode a single record.
    ///
    /// `bytes` starts with the record header. Anything past the end of the record's payload is
    /// ignored. The result has shape `[nk, nj, ni]`.
    ///
    pub fn decode(&self, bytes: &[u8]) -> Result<Field> {
        let view = HeaderView::new(bytes)?;
        let (ni, nj, nk) = view.extents();
        let (ni, nj, nk) = (ni as usize, nj as usize, nk as usize);
        let type_code = view.type_code();
        let bit_width = view.bit_width();

        // Make sure the combination is one we know how to produce
        self.dtype(type_code, bit_width)?;

        let count = ni
            .checked_mul(nj)
            .and_then(|count| count.checked_mul(nk))
            .ok_or_else(|| {
                Error::MalformedRecord(format!("extents {ni}x{nj}x{nk} are too large to decode"))
            })?;
        let strategy = self.strategy(type_code, bit_width)?;
        let field = strategy.unpack(view.payload(), count, bit_width)?;

        field.into_shape(&[nk, nj, ni])
    }
}
