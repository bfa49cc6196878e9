use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A file could not be opened or its header region is malformed. Aborts catalog loading.
    #[error("unable to read catalog from {}: {reason}", path.display())]
    Catalog { path: PathBuf, reason: String },

    /// Unknown combination of type code and bit width.
    #[error("unsupported type code {type_code} with bit width {bit_width}")]
    UnsupportedType { type_code: u8, bit_width: u8 },

    /// A resolved mask does not have the shape of the data it applies to.
    #[error("mask shape {mask:?} does not match data shape {data:?}")]
    MaskShape { data: Vec<usize>, mask: Vec<usize> },

    /// Record bytes are inconsistent with their own header.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Decoding a single chunk of a variable failed.
    #[error("chunk {coordinate:?} of {identity} failed: {source}")]
    Chunk {
        identity: String,
        coordinate: Vec<usize>,
        source: Box<Error>,
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    IO(#[from] io::Error),
}

impl Error {
    pub(crate) fn catalog<P, S>(path: P, reason: S) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        Self::Catalog {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
