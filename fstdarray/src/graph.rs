//! Deferred decode work for a variable.
//!
//! A `TaskGraph` is a flat list of independent chunk tasks. Each task reads one byte range (its
//! leaf), decodes it, and reshapes the result to fit its slot in the variable. Tasks for chunks
//! with no record produce a constant fill. Nothing here runs the tasks: that is left to whatever
//! executes the graph, which can use each task's locality key to order reads.
//!
use std::ops::Range;
use std::sync::Arc;

use crate::catalog::{RecordId, RecordTable};
use crate::dtype::DType;
use crate::errors::Result;
use crate::field::Field;
use crate::mask::{Decoder, RawInput};
use crate::source::ByteSource;
use crate::variable::{Backing, ChunkKey, Variable};

/// Where a chunk's raw input comes from.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Leaf {
    /// A byte range of a file
    Block {
        file_id: usize,
        offset: u64,
        length: u64,
    },

    /// An array that was realized before the catalog was built
    Realized(Arc<Field>),
}

impl Leaf {
    fn new(table: &RecordTable, id: RecordId) -> Self {
        match table.realized(id) {
            Some(field) => Leaf::Realized(Arc::clone(field)),
            None => Leaf::Block {
                file_id: table.file_id[id],
                offset: table.byte_offset[id],
                length: table.byte_length[id],
            },
        }
    }

    /// Fetch the raw input
    pub async fn read(&self, source: &dyn ByteSource) -> Result<RawInput> {
        match self {
            Leaf::Block {
                file_id,
                offset,
                length,
            } => Ok(RawInput::Bytes(Arc::new(
                source.read(*file_id, *offset, *length).await?,
            ))),
            Leaf::Realized(field) => Ok(RawInput::Realized(Arc::clone(field))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChunkOp {
    /// Read, decode and reshape a record
    Record { record: RecordId, leaf: Leaf },

    /// Constant chunk of fill values
    Fill,
}

/// A deferred computation producing one chunk of a variable.
///
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkTask {
    pub key: ChunkKey,

    /// The hyperslab of the variable this chunk fills
    pub slot: Vec<Range<usize>>,

    pub op: ChunkOp,
}

impl ChunkTask {
    pub fn shape(&self) -> Vec<usize> {
        self.slot.iter().map(|range| range.len()).collect()
    }

    /// Ordering key for scheduling reads: file then byte offset.
    ///
    /// Tasks that don't read from a file have no key.
    ///
    pub fn locality(&self) -> Option<(usize, u64)> {
        match &self.op {
            ChunkOp::Record {
                leaf: Leaf::Block {
                    file_id, offset, ..
                },
                ..
            } => Some((*file_id, *offset)),
            _ => None,
        }
    }

    /// Compute the chunk. Evaluation has no side effects and can be repeated.
    ///
    pub async fn evaluate(
        &self,
        decoder: &Decoder,
        source: &dyn ByteSource,
        dtype: DType,
        fill_value: f64,
    ) -> Result<Field> {
        match &self.op {
            ChunkOp::Fill => Ok(Field::full(dtype, &self.shape(), fill_value)),
            ChunkOp::Record { leaf, .. } => {
                let raw = leaf.read(source).await?;
                let decoded = decoder.decode(&raw, source).await?;

                decoded.field.into_shape(&self.shape())
            }
        }
    }
}

/// Every task needed to materialize a variable.
///
#[derive(Clone, Debug, PartialEq)]
pub struct TaskGraph {
    pub name: String,
    pub identity: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub fill_value: f64,
    pub tasks: Vec<ChunkTask>,
}

/// Shape the graph for a variable.
///
/// `fill_value` is used for gaps when the variable doesn't declare a fill value of its own.
///
pub fn to_tasks(variable: &Variable, table: &RecordTable, fill_value: f64) -> TaskGraph {
    let tasks = match &variable.backing {
        Backing::Single(id) => vec![ChunkTask {
            key: vec![0; variable.ndim()],
            slot: variable.shape().into_iter().map(|size| 0..size).collect(),
            op: ChunkOp::Record {
                record: *id,
                leaf: Leaf::new(table, *id),
            },
        }],
        Backing::Chunked(map) => variable
            .chunk_keys()
            .into_iter()
            .map(|key| {
                let op = match map.get(&key) {
                    Some(&id) => ChunkOp::Record {
                        record: id,
                        leaf: Leaf::new(table, id),
                    },
                    None => ChunkOp::Fill,
                };
                ChunkTask {
                    slot: variable.chunk_slot(&key),
                    key,
                    op,
                }
            })
            .collect(),
    };
    tracing::debug!(variable = %variable.name, tasks = tasks.len(), "shaped task graph");

    TaskGraph {
        name: variable.name.clone(),
        identity: variable.identity.clone(),
        dtype: variable.dtype,
        shape: variable.shape(),
        fill_value: variable.fill_value().unwrap_or(fill_value),
        tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build;
    use crate::catalog::load;
    use crate::classify::Pipeline;
    use crate::codec::Codecs;
    use crate::config::{Config, MaskPairing};
    use crate::source::FileSource;
    use crate::testing::{temp_file, RecordSpec};
    use ndarray::Array3;

    fn values(ip1: i32) -> ndarray::ArrayD<f64> {
        Array3::from_shape_fn((1, 2, 2), |(_, j, i)| (ip1 * 10 + (j * 2 + i) as i32) as f64)
            .into_dyn()
    }

    fn tt(ip1: i32) -> RecordSpec {
        RecordSpec::new("TT").label("L1").ip1(ip1).raw_float(&values(ip1))
    }

    struct Fixture {
        _file: tempfile::NamedTempFile,
        table: Arc<RecordTable>,
        variables: Vec<Variable>,
        config: Config,
    }

    fn fixture(specs: Vec<RecordSpec>) -> Fixture {
        let file = temp_file(specs);
        let config = Config::default().with_fill_value(-1.0);
        let table = load(&[file.path()]).unwrap();
        let (table, _) = Pipeline::new(&config, &Codecs::default()).classify(table);
        let (variables, _) = build(&table, &config);

        Fixture {
            _file: file,
            table: Arc::new(table),
            variables,
            config,
        }
    }

    impl Fixture {
        fn decoder(&self) -> Decoder {
            Decoder::new(
                Codecs::default(),
                Arc::clone(&self.table),
                self.config.fill_value,
                MaskPairing::Symmetric,
            )
        }

        fn source(&self) -> FileSource {
            FileSource::new(self.table.files().to_vec())
        }
    }

    #[test]
    fn test_to_tasks_single() {
        let fixture = fixture(vec![tt(0)]);
        let graph = to_tasks(&fixture.variables[0], &fixture.table, -1.0);
        assert_eq!(graph.tasks.len(), 1);
        assert_eq!(graph.shape, vec![2, 2]);
        assert_eq!(graph.tasks[0].slot, vec![0..2, 0..2]);
        assert!(graph.tasks[0].locality().is_some());
    }

    #[test]
    fn test_to_tasks_with_gap() {
        let fixture = fixture(vec![tt(0), tt(1), tt(3)]);
        let graph = to_tasks(&fixture.variables[0], &fixture.table, 1e30);
        assert_eq!(graph.shape, vec![4, 2, 2]);
        assert_eq!(graph.fill_value, -1.0);
        assert_eq!(graph.tasks.len(), 4);
        assert_eq!(graph.tasks[2].op, ChunkOp::Fill);
        assert_eq!(graph.tasks[2].slot, vec![2..3, 0..2, 0..2]);
        assert_eq!(graph.tasks[2].locality(), None);

        let offsets: Vec<u64> = graph
            .tasks
            .iter()
            .filter_map(|task| task.locality())
            .map(|(_, offset)| offset)
            .collect();
        assert_eq!(offsets.len(), 3);
        assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_evaluate() -> Result<()> {
        let fixture = fixture(vec![tt(0), tt(1), tt(3)]);
        let graph = to_tasks(&fixture.variables[0], &fixture.table, 1e30);
        let decoder = fixture.decoder();
        let source = fixture.source();

        let chunk = graph.tasks[3]
            .evaluate(&decoder, &source, graph.dtype, graph.fill_value)
            .await?;
        assert_eq!(chunk.shape(), &[1, 2, 2]);
        assert_eq!(
            chunk.as_f32().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![30.0, 31.0, 32.0, 33.0]
        );

        let gap = graph.tasks[2]
            .evaluate(&decoder, &source, graph.dtype, graph.fill_value)
            .await?;
        assert_eq!(gap, Field::full(DType::F32, &[1, 2, 2], -1.0));

        Ok(())
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent() -> Result<()> {
        let fixture = fixture(vec![tt(0), tt(1)]);
        let graph = to_tasks(&fixture.variables[0], &fixture.table, 1e30);
        let decoder = fixture.decoder();
        let source = fixture.source();

        for task in &graph.tasks {
            let first = task
                .evaluate(&decoder, &source, graph.dtype, graph.fill_value)
                .await?;
            let second = task
                .evaluate(&decoder, &source, graph.dtype, graph.fill_value)
                .await?;
            assert_eq!(first, second);
        }

        Ok(())
    }
}
