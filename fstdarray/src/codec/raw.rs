use ndarray::Array1;

use crate::dtype::DType;
use crate::errors::{Error, Result};
use crate::field::Field;

use super::Unpack;

/// IEEE floating point values stored verbatim, big endian.
///
#[derive(Debug)]
pub struct RawFloat;

impl Unpack for RawFloat {
    fn dtype(&self, bit_width: u8) -> Option<DType> {
        match bit_width {
            32 => Some(DType::F32),
            64 => Some(DType::F64),
            _ => None,
        }
    }

    fn unpack(&self, payload: &[u8], count: usize, bit_width: u8) -> Result<Field> {
        let dtype = self.dtype(bit_width).ok_or_else(|| {
            Error::MalformedRecord(format!("raw floats can't be {bit_width} bits wide"))
        })?;
        let length = count.checked_mul(dtype.size()).ok_or_else(|| {
            Error::MalformedRecord(format!("{count} values are too many to decode"))
        })?;
        let payload = take(payload, length)?;
        let field = if dtype == DType::F64 {
            Field::from(
                Array1::from_iter(payload.chunks_exact(8).map(|b| {
                    f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
                }))
                .into_dyn(),
            )
        } else {
            Field::from(
                Array1::from_iter(
                    payload
                        .chunks_exact(4)
                        .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
                )
                .into_dyn(),
            )
        };

        Ok(field)
    }
}

/// One byte per element, typically character data.
///
#[derive(Debug)]
pub struct Characters;

impl Unpack for Characters {
    fn dtype(&self, bit_width: u8) -> Option<DType> {
        match bit_width {
            8 => Some(DType::U8),
            _ => None,
        }
    }

    fn unpack(&self, payload: &[u8], count: usize, _bit_width: u8) -> Result<Field> {
        let payload = take(payload, count)?;

        Ok(Field::from(Array1::from_vec(payload.to_vec()).into_dyn()))
    }
}

/// The first `len` bytes of a payload, or an error if there aren't that many.
pub(crate) fn take(payload: &[u8], len: usize) -> Result<&[u8]> {
    payload.get(..len).ok_or_else(|| {
        Error::MalformedRecord(format!(
            "payload of {} bytes is shorter than the {len} bytes its header describes",
            payload.len()
        ))
    })
}
