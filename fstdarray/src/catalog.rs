//! The record catalog.
//!
//! A catalog is built once from the directories of a set of container files and is a columnar
//! table with one row per physical record. Only header metadata is read while loading, never
//! payloads.
//!
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dtype::DType;
use crate::errors::{Error, Result};
use crate::extio::ExtendedRead;
use crate::field::Field;
use crate::header::{Grid, HeaderView, RecordHeader, TypeVariant, HEADER_BYTES, UNIT_BYTES};

/// Row index into a `RecordTable`
pub type RecordId = usize;

const MAGIC_NUMBER: &[u8; 4] = b"FSTD";
const FORMAT_VERSION: u32 = 1;

/// Bytes in a file header: magic, version, record count, reserved
pub(crate) const FILE_HEADER_BYTES: u64 = 16;

/// One row of a `RecordTable`.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub file_id: usize,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub header: RecordHeader,
    pub is_meta: bool,
    pub is_mask: bool,
    pub selected: bool,
    pub dtype: Option<DType>,
}

/// A record whose data has already been decoded by some external producer.
///
/// `data` has shape `[ni, nj, nk]`, matching the extents in `header`.
///
#[derive(Clone, Debug)]
pub struct ExternRecord {
    pub header: RecordHeader,
    pub data: Field,
}

/// Columnar table of every record across a set of files.
///
/// Columns after `deleted` are derived by the classifier. Until then, `selected` is just
/// `!deleted` and no element types are resolved.
///
#[derive(Clone, Debug, Default)]
pub struct RecordTable {
    pub(crate) files: Vec<PathBuf>,

    pub(crate) file_id: Vec<usize>,
    pub(crate) byte_offset: Vec<u64>,
    pub(crate) byte_length: Vec<u64>,
    pub(crate) ni: Vec<u32>,
    pub(crate) nj: Vec<u32>,
    pub(crate) nk: Vec<u32>,
    pub(crate) type_code: Vec<u8>,
    pub(crate) bit_width: Vec<u8>,
    pub(crate) name: Vec<String>,
    pub(crate) type_variant: Vec<TypeVariant>,
    pub(crate) label: Vec<String>,
    pub(crate) ip1: Vec<i32>,
    pub(crate) ip2: Vec<i32>,
    pub(crate) ip3: Vec<i32>,
    pub(crate) datev: Vec<i32>,
    pub(crate) dateo: Vec<i32>,
    pub(crate) deet: Vec<i32>,
    pub(crate) npas: Vec<i32>,
    pub(crate) grid: Vec<Grid>,
    pub(crate) deleted: Vec<bool>,

    pub(crate) is_meta: Vec<bool>,
    pub(crate) is_mask: Vec<bool>,
    pub(crate) selected: Vec<bool>,
    pub(crate) dtype: Vec<Option<DType>>,
    pub(crate) realized: Vec<Option<Arc<Field>>>,
}

/// Load the catalog for an ordered list of files.
///
/// A file's position in `paths` is its `file_id`.
///
pub fn load<P>(paths: &[P]) -> Result<RecordTable>
where
    P: AsRef<Path>,
{
    let mut table = RecordTable::default();
    for path in paths {
        let path = path.as_ref();
        let file_id = table.files.len();
        let headers = read_directory(path)?;
        tracing::debug!(file = %path.display(), records = headers.len(), "loaded directory");

        table.files.push(path.to_path_buf());
        for header in headers {
            table.push(file_id, header, None);
        }
    }

    Ok(table)
}

/// Read and check the directory of a single file
fn read_directory(path: &Path) -> Result<Vec<RecordHeader>> {
    let file = File::open(path).map_err(|err| Error::catalog(path, err.to_string()))?;
    let file_size = file
        .metadata()
        .map_err(|err| Error::catalog(path, err.to_string()))?
        .len();
    let mut stream = BufReader::new(file);

    let magic = stream
        .read_bytes(MAGIC_NUMBER.len())
        .map_err(|_| Error::catalog(path, "file is too short for a file header"))?;
    if magic != MAGIC_NUMBER {
        return Err(Error::catalog(path, "not a record container file"));
    }

    let mut read_word = |what: &str| {
        stream
            .read_u32()
            .map_err(|_| Error::catalog(path, format!("truncated file header reading {what}")))
    };
    let version = read_word("version")?;
    if version != FORMAT_VERSION {
        return Err(Error::catalog(
            path,
            format!("unrecognized format version {version}"),
        ));
    }
    let record_count = read_word("record count")? as usize;
    let _reserved = read_word("reserved word")?;

    let directory_bytes = record_count as u64 * HEADER_BYTES as u64;
    if FILE_HEADER_BYTES + directory_bytes > file_size {
        return Err(Error::catalog(
            path,
            format!("directory of {record_count} records is truncated"),
        ));
    }

    let mut headers = Vec::with_capacity(record_count);
    let mut entry = [0_u8; HEADER_BYTES];
    for index in 0..record_count {
        stream.read_exact(&mut entry)?;
        let header = HeaderView::new(&entry)?.decode();
        if header.address == 0 || header.byte_offset() + header.byte_length() > file_size {
            return Err(Error::catalog(
                path,
                format!("directory entry {index} points outside of the file"),
            ));
        }
        headers.push(header);
    }

    Ok(headers)
}

impl RecordTable {
    /// Build a table from records that were decoded elsewhere.
    ///
    pub fn from_extern(records: Vec<ExternRecord>) -> Result<Self> {
        let mut table = Self::default();
        for ExternRecord { header, data } in records {
            let expected = [header.ni as usize, header.nj as usize, header.nk as usize];
            if data.shape() != expected {
                return Err(Error::MalformedRecord(format!(
                    "realized array for {} has shape {:?}, expected {:?}",
                    header.name,
                    data.shape(),
                    expected
                )));
            }
            table.push(0, header, Some(Arc::new(data)));
        }
        tracing::debug!(records = table.len(), "loaded realized records");

        Ok(table)
    }

    fn push(&mut self, file_id: usize, header: RecordHeader, realized: Option<Arc<Field>>) {
        let (byte_offset, byte_length) = match realized {
            Some(_) => (0, 0),
            None => (header.byte_offset(), header.byte_length()),
        };
        self.file_id.push(file_id);
        self.byte_offset.push(byte_offset);
        self.byte_length.push(byte_length);
        self.ni.push(header.ni);
        self.nj.push(header.nj);
        self.nk.push(header.nk);
        self.type_code.push(header.type_code);
        self.bit_width.push(header.bit_width);
        self.name.push(header.name);
        self.type_variant.push(header.type_variant);
        self.label.push(header.label);
        self.ip1.push(header.ip1);
        self.ip2.push(header.ip2);
        self.ip3.push(header.ip3);
        self.datev.push(header.datev);
        self.dateo.push(header.dateo);
        self.deet.push(header.deet);
        self.npas.push(header.npas);
        self.grid.push(header.grid);
        self.deleted.push(header.deleted);

        self.is_meta.push(false);
        self.is_mask.push(false);
        self.selected.push(!header.deleted);
        self.dtype.push(realized.as_ref().map(|field| field.dtype()));
        self.realized.push(realized);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths of the files in this catalog, indexed by `file_id`
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn selected(&self, id: RecordId) -> bool {
        self.selected[id]
    }

    pub fn dtype(&self, id: RecordId) -> Option<DType> {
        self.dtype[id]
    }

    /// Realized data for records loaded with `from_extern`
    pub fn realized(&self, id: RecordId) -> Option<&Arc<Field>> {
        self.realized[id].as_ref()
    }

    /// Reassemble the header of a record from the table's columns.
    ///
    /// `address` and `length` reflect the byte range the catalog will read, which can differ from
    /// what's on disk after adjacent masks are merged.
    ///
    pub fn header(&self, id: RecordId) -> RecordHeader {
        RecordHeader {
            deleted: self.deleted[id],
            length: (self.byte_length[id] / UNIT_BYTES) as u32,
            address: (self.byte_offset[id] / UNIT_BYTES) as u32 + 1,
            ni: self.ni[id],
            nj: self.nj[id],
            nk: self.nk[id],
            bit_width: self.bit_width[id],
            type_code: self.type_code[id],
            grid: self.grid[id],
            npas: self.npas[id],
            ip1: self.ip1[id],
            ip2: self.ip2[id],
            ip3: self.ip3[id],
            datev: self.datev[id],
            dateo: self.dateo[id],
            deet: self.deet[id],
            type_variant: self.type_variant[id],
            name: self.name[id].clone(),
            label: self.label[id].clone(),
        }
    }

    pub fn row(&self, id: RecordId) -> Record {
        Record {
            file_id: self.file_id[id],
            byte_offset: self.byte_offset[id],
            byte_length: self.byte_length[id],
            header: self.header(id),
            is_meta: self.is_meta[id],
            is_mask: self.is_mask[id],
            selected: self.selected[id],
            dtype: self.dtype[id],
        }
    }

    /// Short human readable description of a record's identity
    pub fn identity(&self, id: RecordId) -> String {
        self.header(id).identity()
    }

    /// Ids of every record matching all the criteria that are set, in catalog order.
    ///
    pub fn find(&self, criteria: &Criteria) -> Vec<RecordId> {
        (0..self.len())
            .filter(|&id| criteria.matches(self, id))
            .collect()
    }
}

/// Search criteria for `RecordTable::find`. Unset fields match anything.
///
#[derive(Clone, Debug, Default)]
pub struct Criteria {
    pub name: Option<String>,
    pub type_variant: Option<TypeVariant>,
    pub label: Option<String>,
    pub ip1: Option<i32>,
    pub ip2: Option<i32>,
    pub ip3: Option<i32>,
    pub datev: Option<i32>,
    pub include_deleted: bool,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    pub fn type_variant(self, type_variant: TypeVariant) -> Self {
        Self {
            type_variant: Some(type_variant),
            ..self
        }
    }

    pub fn label(self, label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            ..self
        }
    }

    pub fn ip1(self, ip1: i32) -> Self {
        Self {
            ip1: Some(ip1),
            ..self
        }
    }

    pub fn ip2(self, ip2: i32) -> Self {
        Self {
            ip2: Some(ip2),
            ..self
        }
    }

    pub fn ip3(self, ip3: i32) -> Self {
        Self {
            ip3: Some(ip3),
            ..self
        }
    }

    pub fn datev(self, datev: i32) -> Self {
        Self {
            datev: Some(datev),
            ..self
        }
    }

    pub fn include_deleted(self, include_deleted: bool) -> Self {
        Self {
            include_deleted,
            ..self
        }
    }

    fn matches(&self, table: &RecordTable, id: RecordId) -> bool {
        fn check<T: PartialEq + ?Sized>(want: Option<&T>, have: &T) -> bool {
            want.map_or(true, |want| want == have)
        }

        (self.include_deleted || !table.deleted[id])
            && check(self.name.as_deref(), table.name[id].as_str())
            && check(self.type_variant.as_ref(), &table.type_variant[id])
            && check(self.label.as_deref(), table.label[id].as_str())
            && check(self.ip1.as_ref(), &table.ip1[id])
            && check(self.ip2.as_ref(), &table.ip2[id])
            && check(self.ip3.as_ref(), &table.ip3[id])
            && check(self.datev.as_ref(), &table.datev[id])
    }
}
