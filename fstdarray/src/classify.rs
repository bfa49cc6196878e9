//! Derive selection flags and element types for every record in a catalog.
//!
//! Classification is a fixed pipeline of named stages. Each stage is a transform over the whole
//! table that never touches file bytes. Which stages run, and how, is decided by `Config`.
//!
use std::fmt;

use crate::catalog::RecordTable;
use crate::codec::{Codecs, RAW_BINARY};
use crate::config::Config;

/// Names of records that always hold coordinate or grid information.
pub const META_NAMES: &[&str] = &[">>", "^^", "^>", "!!", "!!SF", "HY", "##"];

/// Names of records that hold coordinate information when they're one dimensional.
pub const MAYBE_META_NAMES: &[&str] = &["LA", "LO"];

/// Non-fatal conditions worth telling the caller about.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advisory {
    /// Records with type code 0 were decoded as floating point.
    RawBinaryAsFloat { records: usize },

    /// A record marked as masked data had no mask to apply.
    NoMaskFound { identity: String },
}

impl Advisory {
    pub(crate) fn log(&self) {
        tracing::warn!("{}", self);
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::RawBinaryAsFloat { records } => write!(
                f,
                "{records} records of raw binary type will be decoded as floating point"
            ),
            Advisory::NoMaskFound { identity } => {
                write!(f, "no mask found for {identity}, passing through unmasked")
            }
        }
    }
}

/// One step of classification.
///
pub trait Stage: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, table: &mut RecordTable, advisories: &mut Vec<Advisory>);
}

/// Resolve each record's output element type from its type code and bit width.
///
/// Records with an unsupported combination are left without a type. Realized records keep the
/// type of their data.
///
#[derive(Debug)]
pub struct ResolveTypes {
    codecs: Codecs,
}

impl ResolveTypes {
    pub fn new(codecs: Codecs) -> Self {
        Self { codecs }
    }
}

impl Stage for ResolveTypes {
    fn name(&self) -> &'static str {
        "resolve_types"
    }

    fn apply(&self, table: &mut RecordTable, advisories: &mut Vec<Advisory>) {
        let mut raw_binary = 0;
        for id in 0..table.len() {
            if let Some(field) = &table.realized[id] {
                table.dtype[id] = Some(field.dtype());
                continue;
            }

            let type_code = table.type_code[id];
            if type_code == RAW_BINARY {
                raw_binary += 1;
            }
            table.dtype[id] = self.codecs.dtype(type_code, table.bit_width[id]).ok();
        }

        if raw_binary > 0 {
            advisories.push(Advisory::RawBinaryAsFloat {
                records: raw_binary,
            });
        }
    }
}

/// Flag records that describe coordinates rather than data fields.
///
#[derive(Debug)]
pub struct DetectMeta;

impl Stage for DetectMeta {
    fn name(&self) -> &'static str {
        "detect_meta"
    }

    fn apply(&self, table: &mut RecordTable, _advisories: &mut Vec<Advisory>) {
        for id in 0..table.len() {
            let name = table.name[id].as_str();
            let degenerate = table.ni[id] == 1 || table.nj[id] == 1;
            table.is_meta[id] = META_NAMES.contains(&name)
                || (degenerate && MAYBE_META_NAMES.contains(&name));
        }
    }
}

/// Flag mask records.
///
#[derive(Debug)]
pub struct DetectMasks;

impl Stage for DetectMasks {
    fn name(&self) -> &'static str {
        "detect_masks"
    }

    fn apply(&self, table: &mut RecordTable, _advisories: &mut Vec<Advisory>) {
        for id in 0..table.len() {
            table.is_mask[id] = table.type_variant[id].is_mask();
        }
    }
}

/// Extend the byte range of a masked record over the record immediately after it, when both
/// belong to the same field, so data and mask come back from a single read.
///
#[derive(Debug)]
pub struct MergeAdjacentMasks;

impl MergeAdjacentMasks {
    fn pairs(table: &RecordTable, id: usize) -> bool {
        let next = id + 1;
        table.realized[id].is_none()
            && table.realized[next].is_none()
            && table.file_id[id] == table.file_id[next]
            && table.type_variant[id].uses_mask()
            && table.type_variant[next].uses_mask()
            && table.name[id] == table.name[next]
            && table.label[id] == table.label[next]
            && table.datev[id] == table.datev[next]
            && table.ip1[id] == table.ip1[next]
            && table.ip2[id] == table.ip2[next]
            && table.ip3[id] == table.ip3[next]
            && table.deleted[id] == table.deleted[next]
            && table.byte_offset[id] < table.byte_offset[next]
    }
}

impl Stage for MergeAdjacentMasks {
    fn name(&self) -> &'static str {
        "merge_adjacent_masks"
    }

    fn apply(&self, table: &mut RecordTable, _advisories: &mut Vec<Advisory>) {
        let mut merged = 0;
        for id in 0..table.len().saturating_sub(1) {
            if Self::pairs(table, id) {
                let next = id + 1;
                table.byte_length[id] =
                    table.byte_offset[next] + table.byte_length[next] - table.byte_offset[id];
                merged += 1;
            }
        }
        tracing::debug!(merged, "merged adjacent masked records");
    }
}

/// Final selection: a record becomes part of a variable only if it's live data.
///
#[derive(Debug)]
pub struct Select;

impl Stage for Select {
    fn name(&self) -> &'static str {
        "select"
    }

    fn apply(&self, table: &mut RecordTable, _advisories: &mut Vec<Advisory>) {
        for id in 0..table.len() {
            table.selected[id] = !table.deleted[id] && !table.is_meta[id] && !table.is_mask[id];
        }
    }
}

/// An ordered list of stages.
///
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// The standard classification pipeline for the given configuration.
    ///
    pub fn new(config: &Config, codecs: &Codecs) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ResolveTypes::new(codecs.clone())),
            Box::new(DetectMeta),
            Box::new(DetectMasks),
        ];
        if config.merge_adjacent_masks {
            stages.push(Box::new(MergeAdjacentMasks));
        }
        stages.push(Box::new(Select));

        Self { stages }
    }

    /// Names of the stages, in the order they run
    pub fn stages(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run every stage over `table`, returning the classified table and any advisories raised.
    ///
    pub fn classify(&self, mut table: RecordTable) -> (RecordTable, Vec<Advisory>) {
        let mut advisories = vec![];
        for stage in &self.stages {
            stage.apply(&mut table, &mut advisories);
        }
        for advisory in &advisories {
            advisory.log();
        }
        tracing::debug!(
            records = table.len(),
            selected = table.selected.iter().filter(|&&s| s).count(),
            "classified catalog"
        );

        (table, advisories)
    }
}
