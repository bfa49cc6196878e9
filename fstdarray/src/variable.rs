//! Logical variables and the mapping from their chunks to records.
//!
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::catalog::RecordId;
use crate::dtype::DType;
use crate::errors::{Error, Result};

/// Chunk coordinate: the index of a chunk along every axis of a variable.
pub type ChunkKey = Vec<usize>;

/// Evenly spaced integer coordinates.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Regular {
    pub start: i64,
    pub step: i64,
}

impl Regular {
    pub fn new(start: i64, step: i64) -> Self {
        Self { start, step }
    }

    /// Position of `value` on this axis, if it falls on it
    pub fn position(&self, value: i64) -> Option<usize> {
        let offset = value - self.start;
        if self.step == 0 || offset < 0 || offset % self.step != 0 {
            None
        } else {
            Some((offset / self.step) as usize)
        }
    }
}

/// Coordinate values along an axis.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Coordinates {
    /// No coordinate values, just positions
    Index,

    /// One value per position, in increasing order
    Values(Vec<i64>),

    Regular(Regular),
}

impl Coordinates {
    /// Position of `value` along the axis
    pub fn position(&self, value: i64) -> Option<usize> {
        match self {
            Coordinates::Index => usize::try_from(value).ok(),
            Coordinates::Values(values) => values.binary_search(&value).ok(),
            Coordinates::Regular(regular) => regular.position(value),
        }
    }
}

/// A named dimension of a variable.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Axis {
    pub name: String,
    pub size: usize,
    pub coordinates: Coordinates,
}

impl Axis {
    pub fn new(name: &str, size: usize, coordinates: Coordinates) -> Self {
        Self {
            name: name.to_string(),
            size,
            coordinates,
        }
    }

    /// An axis with no coordinate values
    pub fn index(name: &str, size: usize) -> Self {
        Self::new(name, size, Coordinates::Index)
    }
}

/// A scalar attribute value.
///
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Float(value) => write!(f, "{value:?}"),
            AttrValue::Text(value) => write!(f, "{value:?}"),
        }
    }
}

/// Where a variable's data comes from.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Backing {
    /// The whole variable is one record
    Single(RecordId),

    /// One record per chunk. Chunks not in the map are filled.
    Chunked(BTreeMap<ChunkKey, RecordId>),
}

/// A typed, chunked, n-dimensional variable backed by records.
///
/// `chunks` gives the size of every chunk along each axis, so the sum of `chunks[axis]` is the
/// size of that axis.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,

    /// Identity shared by every record of this variable, for error reporting
    pub identity: String,

    pub axes: Vec<Axis>,
    pub dtype: DType,
    pub attributes: BTreeMap<String, AttrValue>,
    pub backing: Backing,
    pub chunks: Vec<Vec<usize>>,
}

pub const FILL_VALUE_ATTRIBUTE: &str = "_FillValue";

impl Variable {
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|axis| axis.size).collect()
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Fill value, if chunks or elements of this variable can be filled
    pub fn fill_value(&self) -> Option<f64> {
        match self.attributes.get(FILL_VALUE_ATTRIBUTE) {
            Some(AttrValue::Float(value)) => Some(*value),
            Some(AttrValue::Int(value)) => Some(*value as f64),
            _ => None,
        }
    }

    /// Number of chunks along each axis
    pub fn grid_shape(&self) -> Vec<usize> {
        self.chunks.iter().map(|sizes| sizes.len()).collect()
    }

    /// Every chunk coordinate in row major order
    pub fn chunk_keys(&self) -> Vec<ChunkKey> {
        let grid = self.grid_shape();
        let count: usize = grid.iter().product();
        let mut keys = Vec::with_capacity(count);
        for mut index in 0..count {
            let mut key = vec![0; grid.len()];
            for axis in (0..grid.len()).rev() {
                key[axis] = index % grid[axis];
                index /= grid[axis];
            }
            keys.push(key);
        }

        keys
    }

    /// The hyperslab of the variable covered by the chunk at `key`
    pub fn chunk_slot(&self, key: &[usize]) -> Vec<Range<usize>> {
        self.chunks
            .iter()
            .zip(key)
            .map(|(sizes, &index)| {
                let start: usize = sizes[..index].iter().sum();
                start..start + sizes[index]
            })
            .collect()
    }

    /// Check the structural invariants: chunk sizes add up to axis sizes and every mapped chunk
    /// lies within the chunk grid.
    ///
    pub fn validate(&self) -> Result<()> {
        let malformed = |reason: String| {
            Err(Error::MalformedRecord(format!("variable {}: {reason}", self.name)))
        };

        if self.chunks.len() != self.axes.len() {
            return malformed(format!(
                "{} axes but chunks given for {}",
                self.axes.len(),
                self.chunks.len()
            ));
        }
        for (axis, sizes) in self.axes.iter().zip(&self.chunks) {
            if sizes.iter().sum::<usize>() != axis.size || sizes.contains(&0) {
                return malformed(format!(
                    "chunks {sizes:?} don't cover axis {} of size {}",
                    axis.name, axis.size
                ));
            }
        }

        if let Backing::Chunked(map) = &self.backing {
            let grid = self.grid_shape();
            for key in map.keys() {
                if key.len() != grid.len() || key.iter().zip(&grid).any(|(i, n)| i >= n) {
                    return malformed(format!("chunk {key:?} outside of grid {grid:?}"));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable() -> Variable {
        let mut map = BTreeMap::new();
        map.insert(vec![0, 0, 0], 3);
        map.insert(vec![2, 0, 1], 7);
        Variable {
            name: "TT".to_string(),
            identity: "TT:P:L1".to_string(),
            axes: vec![
                Axis::new("time", 3, Coordinates::Regular(Regular::new(0, 6))),
                Axis::index("j", 4),
                Axis::index("i", 5),
            ],
            dtype: DType::F32,
            attributes: BTreeMap::new(),
            backing: Backing::Chunked(map),
            chunks: vec![vec![1, 1, 1], vec![4], vec![2, 3]],
        }
    }

    #[test]
    fn test_regular() {
        let regular = Regular::new(1000000, 3600);
        assert_eq!(regular.position(1360000), Some(100));
        assert_eq!(regular.position(1003600), Some(1));
        assert_eq!(regular.position(1003601), None);
        assert_eq!(regular.position(996400), None);
    }

    #[test]
    fn test_coordinates_position() {
        let values = Coordinates::Values(vec![3, 8, 20]);
        assert_eq!(values.position(8), Some(1));
        assert_eq!(values.position(9), None);
        assert_eq!(Coordinates::Index.position(4), Some(4));
        assert_eq!(values.position(20), Some(2));
        assert_eq!(Coordinates::Index.position(-1), None);
    }

    #[test]
    fn test_chunk_layout() {
        let variable = variable();
        assert_eq!(variable.shape(), vec![3, 4, 5]);
        assert_eq!(variable.grid_shape(), vec![3, 1, 2]);
        assert_eq!(
            variable.chunk_keys(),
            vec![
                vec![0, 0, 0],
                vec![0, 0, 1],
                vec![1, 0, 0],
                vec![1, 0, 1],
                vec![2, 0, 0],
                vec![2, 0, 1]
            ]
        );
        assert_eq!(variable.chunk_slot(&[2, 0, 1]), vec![2..3, 0..4, 2..5]);
        assert!(variable.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut bad = variable();
        if let Backing::Chunked(map) = &mut bad.backing {
            map.insert(vec![3, 0, 0], 9);
        }
        assert!(bad.validate().is_err());

        let mut bad = variable();
        bad.chunks[2] = vec![2, 2];
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_attr_display() {
        assert_eq!(AttrValue::Int(-3).to_string(), "-3");
        assert_eq!(AttrValue::Float(1e30).to_string(), "1e30");
        assert_eq!(AttrValue::Text("P@".to_string()).to_string(), "\"P@\"");
    }
}
