//! Decode records, applying validity masks to masked data.
//!
//! A record whose type variant marks it as masked data is paired with a mask record sharing its
//! identity. The mask is looked for first in the bytes immediately following the record, which is
//! where writers normally put it and where a merged catalog read will have fetched it, and then in
//! the catalog. Masked out elements are replaced with the fill value.
//!
use std::sync::Arc;

use ndarray::{ArrayD, Zip};
use num_traits::AsPrimitive;

use crate::catalog::{Criteria, RecordId, RecordTable};
use crate::classify::Advisory;
use crate::codec::Codecs;
use crate::config::MaskPairing;
use crate::errors::{Error, Result};
use crate::field::{map_field, Field};
use crate::header::{address_at, HeaderView, TypeVariant, HEADER_BYTES, UNIT_BYTES};
use crate::source::ByteSource;

/// Input to the decoder: either raw record bytes or an array realized elsewhere.
///
#[derive(Clone, Debug)]
pub enum RawInput {
    Bytes(Arc<Vec<u8>>),
    Realized(Arc<Field>),
}

/// How a decode ended up treating masks.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaskOutcome {
    /// Not masked data, returned as decoded
    Unmasked,

    /// Mask found in the bytes following the record
    MaskedAdjacent,

    /// Mask found by searching the catalog, and read separately
    MaskedCatalog,

    /// Masked data with no mask to be found, returned as decoded
    NoMaskFound,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub field: Field,
    pub outcome: MaskOutcome,
}

impl Decoded {
    fn new(field: Field, outcome: MaskOutcome) -> Self {
        Self { field, outcome }
    }
}

/// Turns raw record input into arrays, resolving and applying masks.
///
#[derive(Clone, Debug)]
pub struct Decoder {
    codecs: Codecs,
    table: Arc<RecordTable>,
    fill_value: f64,
    pairing: MaskPairing,
}

impl Decoder {
    pub fn new(
        codecs: Codecs,
        table: Arc<RecordTable>,
        fill_value: f64,
        pairing: MaskPairing,
    ) -> Self {
        Self {
            codecs,
            table,
            fill_value,
            pairing,
        }
    }

    pub fn fill_value(&self) -> f64 {
        self.fill_value
    }

    /// Fetch the raw input for a catalog record
    pub async fn fetch(&self, id: RecordId, source: &dyn ByteSource) -> Result<RawInput> {
        match self.table.realized(id) {
            Some(field) => Ok(RawInput::Realized(Arc::clone(field))),
            None => {
                let bytes = source
                    .read(
                        self.table.file_id[id],
                        self.table.byte_offset[id],
                        self.table.byte_length[id],
                    )
                    .await?;

                Ok(RawInput::Bytes(Arc::new(bytes)))
            }
        }
    }

    /// Decode raw input into an array with shape `[nk, nj, ni]`.
    ///
    /// `source` is only used if a mask has to be looked up in the catalog.
    ///
    pub async fn decode(&self, raw: &RawInput, source: &dyn ByteSource) -> Result<Decoded> {
        match raw {
            RawInput::Realized(field) => Ok(Decoded::new(field.transposed(), MaskOutcome::Unmasked)),
            RawInput::Bytes(bytes) => self.decode_bytes(bytes, source).await,
        }
    }

    async fn decode_bytes(&self, bytes: &[u8], source: &dyn ByteSource) -> Result<Decoded> {
        let view = HeaderView::new(bytes)?;
        let first = self.codecs.decode(bytes)?;
        let type_variant = view.type_variant();
        if !type_variant.uses_mask() {
            return Ok(Decoded::new(first, MaskOutcome::Unmasked));
        }

        if let Some(unit) = adjacent(bytes) {
            let next = &bytes[unit * UNIT_BYTES as usize..];
            let next_variant = HeaderView::new(next)?.type_variant();
            if type_variant.is_mask() {
                if self.pairing == MaskPairing::Symmetric && next_variant.is_masked_data() {
                    let data = self.codecs.decode(next)?;
                    let field = overlay(&data, &first, self.fill_value)?;
                    return Ok(Decoded::new(field, MaskOutcome::MaskedAdjacent));
                }
            } else if next_variant.is_mask() {
                let mask = self.codecs.decode(next)?;
                let field = overlay(&first, &mask, self.fill_value)?;
                return Ok(Decoded::new(field, MaskOutcome::MaskedAdjacent));
            }
        }

        // A mask on its own is returned as is
        if type_variant.is_mask() {
            return Ok(Decoded::new(first, MaskOutcome::Unmasked));
        }

        let header = view.decode();
        let criteria = Criteria::new()
            .name(&header.name)
            .type_variant(TypeVariant::new("@@"))
            .label(&header.label)
            .datev(header.datev)
            .ip1(header.ip1)
            .ip2(header.ip2)
            .ip3(header.ip3)
            .include_deleted(true);
        let candidates = self.table.find(&criteria);
        let mask_id = candidates
            .iter()
            .find(|&&id| !self.table.deleted[id])
            .or_else(|| candidates.first());

        match mask_id {
            Some(&mask_id) => {
                let mask = match self.fetch(mask_id, source).await? {
                    RawInput::Realized(field) => field.transposed(),
                    RawInput::Bytes(mask_bytes) => self.codecs.decode(&mask_bytes)?,
                };
                let field = overlay(&first, &mask, self.fill_value)?;

                Ok(Decoded::new(field, MaskOutcome::MaskedCatalog))
            }
            None => {
                Advisory::NoMaskFound {
                    identity: header.identity(),
                }
                .log();

                Ok(Decoded::new(first, MaskOutcome::NoMaskFound))
            }
        }
    }
}

/// Find a record immediately following the one at the start of `bytes`.
///
/// Returns the position of the following record, in units, if one is found whose self described
/// address is where it sits relative to the first record.
///
fn adjacent(bytes: &[u8]) -> Option<usize> {
    let view = HeaderView::new(bytes).ok()?;
    let address = view.address() as usize;
    let units = bytes.len() / UNIT_BYTES as usize;

    (view.length() as usize..units)
        .take_while(|unit| unit * UNIT_BYTES as usize + HEADER_BYTES <= bytes.len())
        .find(|&unit| address_at(bytes, unit) == Some((address + unit) as u32))
}

/// Compose a mask onto a base array: `base * mask + fill * (1 - mask)` elementwise.
///
/// The result has the element type of `base`. Mask values of exactly 1 and 0 give exactly the
/// base value and the fill value.
///
pub fn overlay(base: &Field, mask: &Field, fill_value: f64) -> Result<Field> {
    if base.shape() != mask.shape() {
        return Err(Error::MaskShape {
            data: base.shape().to_vec(),
            mask: mask.shape().to_vec(),
        });
    }
    let mask = mask.to_f64();

    Ok(map_field!(base, array => compose(array, &mask, fill_value)))
}

fn compose<T>(base: &ArrayD<T>, mask: &ArrayD<f64>, fill_value: f64) -> ArrayD<T>
where
    T: Copy + AsPrimitive<f64>,
    f64: AsPrimitive<T>,
{
    let fill: T = fill_value.as_();
    let mut result = base.to_owned();
    Zip::from(&mut result).and(mask).for_each(|value, &mask| {
        if mask == 0.0 {
            *value = fill;
        } else if mask != 1.0 {
            let base: f64 = (*value).as_();
            *value = (base * mask + fill_value * (1.0 - mask)).as_();
        }
    });

    result
}
