//! Typed n-dimensional arrays produced by decoding records.
//!
use std::ops::Range;

use ndarray::{ArrayD, ErrorKind, IxDyn, ShapeError, Slice};
use num_traits::AsPrimitive;
use paste::paste;

use crate::dtype::DType;
use crate::errors::{Error, Result};

/// Apply an expression to the array inside a `Field`, whatever its element type.
macro_rules! each_field {
    ($field:expr, $array:ident => $body:expr) => {
        match $field {
            Field::U8($array) => $body,
            Field::I32($array) => $body,
            Field::I64($array) => $body,
            Field::U32($array) => $body,
            Field::U64($array) => $body,
            Field::F32($array) => $body,
            Field::F64($array) => $body,
        }
    };
}

/// Same as `each_field` but wraps the result back into the variant it came from.
macro_rules! map_field {
    ($field:expr, $array:ident => $body:expr) => {
        match $field {
            Field::U8($array) => Field::U8($body),
            Field::I32($array) => Field::I32($body),
            Field::I64($array) => Field::I64($body),
            Field::U32($array) => Field::U32($body),
            Field::U64($array) => Field::U64($body),
            Field::F32($array) => Field::F32($body),
            Field::F64($array) => Field::F64($body),
        }
    };
}

pub(crate) use each_field;
pub(crate) use map_field;

macro_rules! Field {
    ($($variant:ident: $type:ty),*) => {
        paste! {
            /// A decoded array of any of the supported element types.
            ///
            #[derive(Clone, Debug, PartialEq)]
            pub enum Field {
                $($variant(ArrayD<$type>)),*
            }

            impl Field {
                /// Element type of this field
                pub fn dtype(&self) -> DType {
                    match self {
                        $(Field::$variant(_) => DType::$variant),*
                    }
                }

                /// A field of the given type and shape with every element set to `value`.
                ///
                /// `value` is converted with `as` semantics, so out of range values saturate for
                /// integer types.
                pub fn full(dtype: DType, shape: &[usize], value: f64) -> Self {
                    match dtype {
                        $(DType::$variant => {
                            let value: $type = value.as_();
                            Field::$variant(ArrayD::from_elem(IxDyn(shape), value))
                        }),*
                    }
                }

                $(
                    pub fn [<as_ $variant:lower>](&self) -> Option<&ArrayD<$type>> {
                        match self {
                            Field::$variant(array) => Some(array),
                            _ => None,
                        }
                    }
                )*
            }

            $(
                impl From<ArrayD<$type>> for Field {
                    fn from(array: ArrayD<$type>) -> Self {
                        Field::$variant(array)
                    }
                }
            )*
        }
    };
}

Field!(U8: u8, I32: i32, I64: i64, U32: u32, U64: u64, F32: f32, F64: f64);

impl Field {
    pub fn shape(&self) -> &[usize] {
        each_field!(self, array => array.shape())
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        each_field!(self, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reshape, reading elements in logical (row major) order.
    pub fn into_shape(self, shape: &[usize]) -> Result<Self> {
        Ok(map_field!(self, array => {
            array
                .as_standard_layout()
                .into_owned()
                .into_shape(IxDyn(shape))?
        }))
    }

    /// Copy with the order of the axes reversed, in standard layout.
    pub fn transposed(&self) -> Self {
        map_field!(self, array => array.t().as_standard_layout().into_owned())
    }

    /// Every element widened (or narrowed) to f64
    pub fn to_f64(&self) -> ArrayD<f64> {
        each_field!(self, array => array.mapv(|value| value.as_()))
    }

    /// Copy `chunk` into the hyperslab of `self` described by `slot`.
    ///
    /// `chunk` must have the same element type as `self` and the shape of `slot`.
    ///
    pub fn assign(&mut self, slot: &[Range<usize>], chunk: &Field) -> Result<()> {
        let expected: Vec<usize> = slot.iter().map(|range| range.len()).collect();
        if slot.len() != self.shape().len() || chunk.shape() != expected.as_slice() {
            return Err(Error::Shape(ShapeError::from_kind(
                ErrorKind::IncompatibleShape,
            )));
        }

        macro_rules! assign {
            ($($variant:ident),*) => {
                match (self, chunk) {
                    $((Field::$variant(dest), Field::$variant(src)) => {
                        dest.slice_each_axis_mut(|axis| Slice::from(slot[axis.axis.index()].clone()))
                            .assign(src);
                    })*
                    (dest, src) => {
                        return Err(Error::MalformedRecord(format!(
                            "chunk of type {} cannot be placed in array of type {}",
                            src.dtype(),
                            dest.dtype()
                        )));
                    }
                }
            };
        }
        assign!(U8, I32, I64, U32, U64, F32, F64);

        Ok(())
    }
}
