//! A reference engine for evaluating task graphs.
//!
//! Tasks are started in the order chosen by a `Schedule` and run with bounded concurrency. Results
//! arrive in any order and are placed by their slot, never by completion order.
//!
use std::fmt::Debug;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::config::ChunkFailure;
use crate::errors::{Error, Result};
use crate::field::Field;
use crate::graph::{ChunkTask, TaskGraph};
use crate::mask::Decoder;
use crate::source::ByteSource;

/// Decides the order in which the tasks of a graph are started.
///
pub trait Schedule: Debug + Send + Sync {
    /// Indexes into `tasks`, in the order they should be started
    fn order(&self, tasks: &[ChunkTask]) -> Vec<usize>;
}

/// Start tasks in the order they appear in the graph.
///
#[derive(Debug, Default)]
pub struct NaturalOrder;

impl Schedule for NaturalOrder {
    fn order(&self, tasks: &[ChunkTask]) -> Vec<usize> {
        (0..tasks.len()).collect()
    }
}

/// Start reads in file and byte offset order, to match the on-disk layout.
///
/// Tasks with no locality key keep their place. The others are sorted among the places they
/// occupy.
///
#[derive(Debug, Default)]
pub struct LocalityOrder;

impl Schedule for LocalityOrder {
    fn order(&self, tasks: &[ChunkTask]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..tasks.len()).collect();
        let mut keyed: Vec<(usize, (usize, u64))> = tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| task.locality().map(|key| (index, key)))
            .collect();
        let places: Vec<usize> = keyed.iter().map(|(index, _)| *index).collect();
        keyed.sort_by_key(|(_, key)| *key);
        for (place, (index, _)) in places.into_iter().zip(keyed) {
            order[place] = index;
        }

        order
    }
}

/// Evaluates task graphs against a byte source.
///
pub struct Executor {
    decoder: Decoder,
    source: Arc<dyn ByteSource>,
    schedule: Box<dyn Schedule>,
    concurrency: usize,
    chunk_failure: ChunkFailure,
}

impl Executor {
    pub const DEFAULT_CONCURRENCY: usize = 8;

    pub fn new(decoder: Decoder, source: Arc<dyn ByteSource>) -> Self {
        Self {
            decoder,
            source,
            schedule: Box::new(LocalityOrder),
            concurrency: Self::DEFAULT_CONCURRENCY,
            chunk_failure: ChunkFailure::default(),
        }
    }

    pub fn with_schedule<S>(self, schedule: S) -> Self
    where
        S: Schedule + 'static,
    {
        Self {
            schedule: Box::new(schedule),
            ..self
        }
    }

    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..self
        }
    }

    pub fn with_chunk_failure(self, chunk_failure: ChunkFailure) -> Self {
        Self {
            chunk_failure,
            ..self
        }
    }

    /// Evaluate every task, returning each task's index and result in completion order.
    ///
    /// A failed task is reported as `Error::Chunk` and doesn't affect the others.
    ///
    pub async fn chunks(&self, graph: &TaskGraph) -> Vec<(usize, Result<Field>)> {
        let order = self.schedule.order(&graph.tasks);
        let source = self.source.as_ref();

        stream::iter(order)
            .map(|index| async move {
                let task = &graph.tasks[index];
                let result = task
                    .evaluate(&self.decoder, source, graph.dtype, graph.fill_value)
                    .await
                    .map_err(|error| Error::Chunk {
                        identity: graph.identity.clone(),
                        coordinate: task.key.clone(),
                        source: Box::new(error),
                    });

                (index, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Materialize a whole variable.
    ///
    /// What happens when a chunk fails is decided by the chunk failure policy: either the first
    /// failure is returned or the chunk is filled.
    ///
    pub async fn execute(&self, graph: &TaskGraph) -> Result<Field> {
        let mut array = Field::full(graph.dtype, &graph.shape, graph.fill_value);
        for (index, result) in self.chunks(graph).await {
            let task = &graph.tasks[index];
            match result {
                Ok(chunk) => array.assign(&task.slot, &chunk)?,
                Err(error) => match self.chunk_failure {
                    ChunkFailure::Raise => return Err(error),
                    ChunkFailure::Fill => {
                        tracing::warn!(%error, "filling chunk that failed to decode");
                        let chunk = Field::full(graph.dtype, &task.shape(), graph.fill_value);
                        array.assign(&task.slot, &chunk)?;
                    }
                },
            }
        }

        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use ndarray::{Array3, ArrayD};
    use parking_lot::Mutex;

    use crate::build::build;
    use crate::catalog::{load, RecordTable};
    use crate::classify::Pipeline;
    use crate::codec::Codecs;
    use crate::config::{Config, MaskPairing};
    use crate::dtype::DType;
    use crate::graph::{to_tasks, ChunkOp, Leaf};
    use crate::source::FileSource;
    use crate::testing::{temp_file, RecordSpec};

    /// Records the offsets read, delaying earlier offsets so results complete out of order
    struct Recorder {
        inner: FileSource,
        offsets: Mutex<Vec<u64>>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl ByteSource for Recorder {
        async fn read(&self, file_id: usize, offset: u64, length: u64) -> Result<Vec<u8>> {
            self.offsets.lock().push(offset);
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1000 / (offset % 97 + 10))).await;
            self.inner.read(file_id, offset, length).await
        }
    }

    fn values(ip1: i32) -> ArrayD<f64> {
        Array3::from_shape_fn((1, 2, 3), |(_, j, i)| (ip1 * 10 + (j * 3 + i) as i32) as f64)
            .into_dyn()
    }

    fn tt(ip1: i32) -> RecordSpec {
        RecordSpec::new("TT").label("L1").ip1(ip1).raw_float(&values(ip1))
    }

    struct Fixture {
        _file: tempfile::NamedTempFile,
        graph: TaskGraph,
        recorder: Arc<Recorder>,
        decoder: Decoder,
    }

    fn fixture(specs: Vec<RecordSpec>) -> Fixture {
        let file = temp_file(specs);
        let config = Config::default().with_fill_value(-1.0);
        let table = load(&[file.path()]).unwrap();
        let (table, _) = Pipeline::new(&config, &Codecs::default()).classify(table);
        let (variables, _) = build(&table, &config);
        let graph = to_tasks(&variables[0], &table, config.fill_value);
        let recorder = Arc::new(Recorder {
            inner: FileSource::new(table.files().to_vec()),
            offsets: Mutex::new(vec![]),
            reads: AtomicUsize::new(0),
        });
        let decoder = Decoder::new(
            Codecs::default(),
            Arc::new(table),
            config.fill_value,
            MaskPairing::Symmetric,
        );

        Fixture {
            _file: file,
            graph,
            recorder,
            decoder,
        }
    }

    impl Fixture {
        fn executor(&self) -> Executor {
            let source: Arc<dyn ByteSource> = self.recorder.clone();
            Executor::new(self.decoder.clone(), source)
        }
    }

    fn fill_task(index: usize) -> ChunkTask {
        ChunkTask {
            key: vec![index],
            slot: vec![index..index + 1],
            op: ChunkOp::Fill,
        }
    }

    fn read_task(index: usize, file_id: usize, offset: u64) -> ChunkTask {
        ChunkTask {
            key: vec![index],
            slot: vec![index..index + 1],
            op: ChunkOp::Record {
                record: index,
                leaf: Leaf::Block {
                    file_id,
                    offset,
                    length: 8,
                },
            },
        }
    }

    #[test]
    fn test_locality_order() {
        let tasks = vec![
            read_task(0, 1, 0),
            fill_task(1),
            read_task(2, 0, 800),
            read_task(3, 0, 160),
            fill_task(4),
            read_task(5, 1, 0),
        ];
        assert_eq!(LocalityOrder.order(&tasks), vec![3, 1, 2, 0, 4, 5]);
        assert_eq!(NaturalOrder.order(&tasks), vec![0, 1, 2, 3, 4, 5]);

        let unkeyed = vec![fill_task(0), fill_task(1)];
        assert_eq!(LocalityOrder.order(&unkeyed), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_execute() -> Result<()> {
        let fixture = fixture(vec![tt(3), tt(0), tt(1), tt(5), tt(4)]);
        let array = fixture.executor().with_concurrency(4).execute(&fixture.graph).await?;

        assert_eq!(array.shape(), &[6, 2, 3]);
        let array = array.as_f32().unwrap();
        for level in [0, 1, 3, 4, 5] {
            let expected = values(level as i32).mapv(|v| v as f32);
            let expected = expected.index_axis(ndarray::Axis(0), 0);
            assert_eq!(array.index_axis(ndarray::Axis(0), level), expected);
        }
        assert!(array
            .index_axis(ndarray::Axis(0), 2)
            .iter()
            .all(|&v| v == -1.0));

        assert_eq!(fixture.recorder.reads.load(Ordering::SeqCst), 5);

        Ok(())
    }

    #[tokio::test]
    async fn test_locality_schedule_reads_in_file_order() -> Result<()> {
        let fixture = fixture(vec![tt(3), tt(0), tt(1), tt(5), tt(4)]);
        fixture
            .executor()
            .with_concurrency(1)
            .execute(&fixture.graph)
            .await?;
        let offsets = fixture.recorder.offsets.lock().clone();
        let mut sorted = offsets.clone();
        sorted.sort();
        assert_eq!(offsets, sorted);

        Ok(())
    }

    #[tokio::test]
    async fn test_natural_schedule_reads_in_coordinate_order() -> Result<()> {
        let fixture = fixture(vec![tt(3), tt(0), tt(1)]);
        fixture
            .executor()
            .with_concurrency(1)
            .with_schedule(NaturalOrder)
            .execute(&fixture.graph)
            .await?;
        let offsets = fixture.recorder.offsets.lock().clone();

        // Levels 0, 1, 3 are the second, third and first records in the file
        let mut expected: Vec<u64> = fixture
            .graph
            .tasks
            .iter()
            .filter_map(|task| task.locality())
            .map(|(_, offset)| offset)
            .collect();
        assert_eq!(offsets, expected);
        expected.sort();
        assert_ne!(offsets, expected);

        Ok(())
    }

    fn corrupt(graph: &mut TaskGraph, index: usize) {
        if let ChunkOp::Record {
            leaf: Leaf::Block { length, .. },
            ..
        } = &mut graph.tasks[index].op
        {
            *length = 40;
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_raises() {
        let mut fixture = fixture(vec![tt(0), tt(1), tt(2)]);
        corrupt(&mut fixture.graph, 1);

        let results = fixture.executor().chunks(&fixture.graph).await;
        assert_eq!(results.len(), 3);
        for (index, result) in results {
            if index == 1 {
                match result {
                    Err(Error::Chunk {
                        identity,
                        coordinate,
                        source,
                    }) => {
                        assert_eq!(identity, "TT:P:L1");
                        assert_eq!(coordinate, vec![1, 0, 0]);
                        assert!(matches!(*source, Error::MalformedRecord(_)));
                    }
                    other => panic!("unexpected result {other:?}"),
                }
            } else {
                assert!(result.is_ok());
            }
        }

        let result = fixture.executor().execute(&fixture.graph).await;
        assert!(matches!(result, Err(Error::Chunk { .. })));
    }

    #[tokio::test]
    async fn test_failed_chunk_filled() -> Result<()> {
        let mut fixture = fixture(vec![tt(0), tt(1), tt(2)]);
        corrupt(&mut fixture.graph, 1);

        let array = fixture
            .executor()
            .with_chunk_failure(ChunkFailure::Fill)
            .execute(&fixture.graph)
            .await?;
        let array = array.as_f32().unwrap();
        assert!(array.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == -1.0));
        assert_eq!(array[[2, 1, 2]], 25.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_realized_graph() -> Result<()> {
        let header = RecordSpec::new("TT").extents(3, 2, 1).header();
        let data = crate::field::Field::from(
            Array3::from_shape_fn((3, 2, 1), |(i, j, _)| (j * 3 + i) as f64).into_dyn(),
        );
        let table =
            RecordTable::from_extern(vec![crate::catalog::ExternRecord { header, data }])?;
        let config = Config::default();
        let (table, _) = Pipeline::new(&config, &Codecs::default()).classify(table);
        let (variables, _) = build(&table, &config);
        let graph = to_tasks(&variables[0], &table, config.fill_value);
        assert_eq!(graph.tasks[0].locality(), None);

        let decoder = Decoder::new(
            Codecs::default(),
            Arc::new(table),
            config.fill_value,
            MaskPairing::Symmetric,
        );
        let source: Arc<dyn ByteSource> = Arc::new(crate::source::MemorySource::default());
        let array = Executor::new(decoder, source).execute(&graph).await?;
        assert_eq!(array.dtype(), DType::F64);
        assert_eq!(
            array.as_f64().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
        );

        Ok(())
    }
}
