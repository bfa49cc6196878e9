use std::path::Path;
use std::sync::Arc;

use crate::build::{build, Failure};
use crate::catalog::{self, ExternRecord, RecordId, RecordTable};
use crate::classify::{Advisory, Pipeline};
use crate::codec::Codecs;
use crate::compute::Executor;
use crate::config::Config;
use crate::dump::Dump;
use crate::errors::{Error, Result};
use crate::field::Field;
use crate::graph::{to_tasks, TaskGraph};
use crate::mask::Decoder;
use crate::source::{ByteSource, FileSource, MemorySource};
use crate::variable::Variable;

/// A set of records presented as variables.
///
/// Opening a dataset reads only the file directories. Data is read when a variable is
/// materialized, or when its task graph is evaluated by some other engine.
///
pub struct Dataset {
    config: Config,
    table: Arc<RecordTable>,
    variables: Vec<Variable>,
    failures: Vec<Failure>,
    advisories: Vec<Advisory>,
    decoder: Decoder,
    source: Arc<dyn ByteSource>,
}

impl Dataset {
    /// Open a set of container files.
    ///
    pub fn open<P>(paths: &[P], config: Config) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::open_with_codecs(paths, config, Codecs::default())
    }

    /// Open a set of container files, decoding with a custom codec registry.
    ///
    pub fn open_with_codecs<P>(paths: &[P], config: Config, codecs: Codecs) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let table = catalog::load(paths)?;
        let source = Arc::new(FileSource::new(table.files().to_vec()));

        Ok(Self::new(table, source, config, codecs))
    }

    /// A dataset of records that were decoded by some other producer.
    ///
    pub fn from_extern(records: Vec<ExternRecord>, config: Config) -> Result<Self> {
        let table = RecordTable::from_extern(records)?;
        let source = Arc::new(MemorySource::default());

        Ok(Self::new(table, source, config, Codecs::default()))
    }

    /// Classify a catalog and build its variables.
    ///
    /// `source` must serve the byte ranges of the files in `table`.
    ///
    pub fn new(
        table: RecordTable,
        source: Arc<dyn ByteSource>,
        config: Config,
        codecs: Codecs,
    ) -> Self {
        let (table, advisories) = Pipeline::new(&config, &codecs).classify(table);
        let (variables, failures) = build(&table, &config);
        let table = Arc::new(table);
        let decoder = Decoder::new(
            codecs,
            Arc::clone(&table),
            config.fill_value,
            config.mask_pairing,
        );

        Self {
            config,
            table,
            variables,
            failures,
            advisories,
            decoder,
            source,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|variable| variable.name == name)
    }

    /// Groups of records that couldn't be made into variables
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Advisories raised while classifying the catalog
    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// The deferred computation for a variable
    pub fn graph(&self, variable: &Variable) -> TaskGraph {
        to_tasks(variable, &self.table, self.config.fill_value)
    }

    /// An executor over this dataset's files, following the configured chunk failure policy
    pub fn executor(&self) -> Executor {
        Executor::new(self.decoder.clone(), Arc::clone(&self.source))
            .with_chunk_failure(self.config.chunk_failure)
    }

    /// Read every chunk of the named variable into one array.
    ///
    pub async fn materialize(&self, name: &str) -> Result<Field> {
        let variable = self.variable(name).ok_or_else(|| {
            Error::MalformedRecord(format!("no variable named {name} in dataset"))
        })?;

        self.executor().execute(&self.graph(variable)).await
    }

    /// Read and decode a single record, with its mask applied.
    ///
    /// The result has shape `[nk, nj, ni]`.
    ///
    pub async fn read_record(&self, id: RecordId) -> Result<Field> {
        if id >= self.table.len() {
            return Err(Error::MalformedRecord(format!(
                "no record {id} in a catalog of {} records",
                self.table.len()
            )));
        }
        let raw = self.decoder.fetch(id, self.source.as_ref()).await?;
        let decoded = self.decoder.decode(&raw, self.source.as_ref()).await?;

        Ok(decoded.field)
    }

    /// Metadata summary, formatted with `Display`
    pub fn dump(&self) -> Dump<'_> {
        Dump::new(self)
    }
}
