//! Options that control how records are grouped into variables and how chunks are decoded.
//!
use serde::Deserialize;

/// Default fill value for gaps and masked out elements.
pub const DEFAULT_FILL_VALUE: f64 = 1e30;

/// What to do when a mask record precedes its data record in the same buffer.
///
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaskPairing {
    /// Either record of an adjacent pair may be the mask. The output always has the data record's
    /// element type.
    #[default]
    Symmetric,

    /// Only a data record followed by its mask is paired. A mask record decoded on its own is
    /// returned as is.
    DataFirst,
}

/// What to do when a single chunk of a variable fails to decode.
///
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailure {
    /// Surface the failure for that chunk's slot.
    #[default]
    Raise,

    /// Log the failure and substitute a chunk of fill values.
    Fill,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Don't split variables on different type variants
    pub ignore_type_variant: bool,

    /// Don't split variables on different labels
    pub ignore_label: bool,

    /// Value used for coordinates without a record and for masked out elements
    pub fill_value: f64,

    /// Extend integer outer axes with regular spacing over missing values
    pub infer_gaps: bool,

    /// Extend the byte range of masked data records over an immediately following mask record
    pub merge_adjacent_masks: bool,

    pub mask_pairing: MaskPairing,

    pub chunk_failure: ChunkFailure,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_type_variant: false,
            ignore_label: false,
            fill_value: DEFAULT_FILL_VALUE,
            infer_gaps: true,
            merge_adjacent_masks: true,
            mask_pairing: MaskPairing::default(),
            chunk_failure: ChunkFailure::default(),
        }
    }
}

impl Config {
    pub fn with_ignore_type_variant(self, ignore_type_variant: bool) -> Self {
        Self {
            ignore_type_variant,
            ..self
        }
    }

    pub fn with_ignore_label(self, ignore_label: bool) -> Self {
        Self {
            ignore_label,
            ..self
        }
    }

    pub fn with_fill_value(self, fill_value: f64) -> Self {
        Self { fill_value, ..self }
    }

    pub fn with_infer_gaps(self, infer_gaps: bool) -> Self {
        Self { infer_gaps, ..self }
    }

    pub fn with_merge_adjacent_masks(self, merge_adjacent_masks: bool) -> Self {
        Self {
            merge_adjacent_masks,
            ..self
        }
    }

    pub fn with_mask_pairing(self, mask_pairing: MaskPairing) -> Self {
        Self {
            mask_pairing,
            ..self
        }
    }

    pub fn with_chunk_failure(self, chunk_failure: ChunkFailure) -> Self {
        Self {
            chunk_failure,
            ..self
        }
    }
}
