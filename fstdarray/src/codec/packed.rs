//! Variable bit width packed encodings.
//!
use std::io::Cursor;

use ndarray::{Array1, ArrayD};
use num_traits::AsPrimitive;

use crate::dtype::DType;
use crate::errors::{Error, Result};
use crate::extio::ExtendedRead;
use crate::field::Field;

use super::bits::{sign_extend, BitReader};
use super::raw::take;
use super::Unpack;

/// Read `count` values of `bit_width` bits each, converting each with `convert`.
fn unpack_with<T, F>(payload: &[u8], count: usize, bit_width: u8, convert: F) -> Result<ArrayD<T>>
where
    F: Fn(u64) -> T,
{
    let mut reader = BitReader::new(payload);
    if bit_width == 0 || bit_width > 64 || !reader.holds(count, bit_width) {
        return Err(Error::MalformedRecord(format!(
            "payload of {} bytes cannot hold {count} values of {bit_width} bits",
            payload.len()
        )));
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        // Length was checked above
        let value = reader.read(bit_width).unwrap_or_default();
        values.push(convert(value));
    }

    Ok(Array1::from_vec(values).into_dyn())
}

fn narrow_or_wide(bit_width: u8, narrow: DType, wide: DType) -> Option<DType> {
    match bit_width {
        1..=32 => Some(narrow),
        33..=64 => Some(wide),
        _ => None,
    }
}

/// Unsigned integers of any width from 1 to 64 bits.
///
#[derive(Debug)]
pub struct PackedUnsigned;

impl Unpack for PackedUnsigned {
    fn dtype(&self, bit_width: u8) -> Option<DType> {
        narrow_or_wide(bit_width, DType::U32, DType::U64)
    }

    fn unpack(&self, payload: &[u8], count: usize, bit_width: u8) -> Result<Field> {
        let field = if bit_width <= 32 {
            Field::from(unpack_with(payload, count, bit_width, |v| v as u32)?)
        } else {
            Field::from(unpack_with(payload, count, bit_width, |v| v)?)
        };

        Ok(field)
    }
}

/// Two's complement signed integers of any width from 1 to 64 bits.
///
#[derive(Debug)]
pub struct PackedSigned;

impl Unpack for PackedSigned {
    fn dtype(&self, bit_width: u8) -> Option<DType> {
        narrow_or_wide(bit_width, DType::I32, DType::I64)
    }

    fn unpack(&self, payload: &[u8], count: usize, bit_width: u8) -> Result<Field> {
        let field = if bit_width <= 32 {
            Field::from(unpack_with(payload, count, bit_width, |v| {
                sign_extend(v, bit_width) as i32
            })?)
        } else {
            Field::from(unpack_with(payload, count, bit_width, |v| {
                sign_extend(v, bit_width)
            })?)
        };

        Ok(field)
    }
}

/// Floating point values quantized onto an evenly spaced grid.
///
/// The payload starts with the grid origin and spacing as big endian f64, followed by the packed
/// unsigned grid index of each value: `value = min + index * step`.
///
#[derive(Debug)]
pub struct QuantizedFloat;

impl QuantizedFloat {
    const PREAMBLE: usize = 16;

    fn dequantize<F>(payload: &[u8], count: usize, bit_width: u8) -> Result<ArrayD<F>>
    where
        F: Copy + 'static,
        f64: AsPrimitive<F>,
    {
        let mut preamble = Cursor::new(take(payload, Self::PREAMBLE)?);
        let min = preamble.read_f64()?;
        let step = preamble.read_f64()?;

        unpack_with(&payload[Self::PREAMBLE..], count, bit_width, |index| {
            (min + index as f64 * step).as_()
        })
    }
}

impl Unpack for QuantizedFloat {
    fn dtype(&self, bit_width: u8) -> Option<DType> {
        narrow_or_wide(bit_width, DType::F32, DType::F64)
    }

    fn unpack(&self, payload: &[u8], count: usize, bit_width: u8) -> Result<Field> {
        let field = if bit_width <= 32 {
            Field::from(Self::dequantize::<f32>(payload, count, bit_width)?)
        } else {
            Field::from(Self::dequantize::<f64>(payload, count, bit_width)?)
        };

        Ok(field)
    }
}
