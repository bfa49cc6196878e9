//! Helpers for writing records and container files in tests.
//!
use std::io::Write;

use ndarray::ArrayD;
use tempfile::NamedTempFile;

use crate::codec::{
    BitWriter, CHARACTERS, PACKED_SIGNED, PACKED_UNSIGNED, QUANTIZED_FLOAT, RAW_BINARY, RAW_FLOAT,
};
use crate::extio::ExtendedWrite;
use crate::header::{Grid, RecordHeader, TypeVariant, HEADER_BYTES, UNIT_BYTES};

pub(crate) const FILE_HEADER: &[u8; 4] = b"FSTD";

/// A record to be written, built up fluently.
///
#[derive(Clone, Debug)]
pub(crate) struct RecordSpec {
    pub header: RecordHeader,
    payload: Vec<u8>,
}

impl RecordSpec {
    pub fn new(name: &str) -> Self {
        Self {
            header: RecordHeader {
                deleted: false,
                length: 0,
                address: 1,
                ni: 1,
                nj: 1,
                nk: 1,
                bit_width: 32,
                type_code: RAW_FLOAT,
                grid: Grid::default(),
                npas: 0,
                ip1: 0,
                ip2: 0,
                ip3: 0,
                datev: 0,
                dateo: 0,
                deet: 0,
                type_variant: TypeVariant::new("P"),
                name: name.to_string(),
                label: String::new(),
            },
            payload: vec![],
        }
    }

    pub fn extents(mut self, ni: u32, nj: u32, nk: u32) -> Self {
        self.header.ni = ni;
        self.header.nj = nj;
        self.header.nk = nk;
        self
    }

    pub fn type_variant(mut self, type_variant: &str) -> Self {
        self.header.type_variant = TypeVariant::new(type_variant);
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.header.label = label.to_string();
        self
    }

    pub fn ip1(mut self, ip1: i32) -> Self {
        self.header.ip1 = ip1;
        self
    }

    pub fn ip2(mut self, ip2: i32) -> Self {
        self.header.ip2 = ip2;
        self
    }

    pub fn ip3(mut self, ip3: i32) -> Self {
        self.header.ip3 = ip3;
        self
    }

    pub fn datev(mut self, datev: i32) -> Self {
        self.header.datev = datev;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.header.deleted = true;
        self
    }

    pub fn grid(mut self, grid: Grid) -> Self {
        self.header.grid = grid;
        self
    }

    /// Use the shape of a 3 dimensional `[nk, nj, ni]` array as the record's extents
    fn shape_from<T>(&mut self, values: &ArrayD<T>) {
        if let [nk, nj, ni] = values.shape() {
            self.header.ni = *ni as u32;
            self.header.nj = *nj as u32;
            self.header.nk = *nk as u32;
        }
    }

    pub fn raw_float(mut self, values: &ArrayD<f64>) -> Self {
        self.shape_from(values);
        self.header.type_code = RAW_FLOAT;
        self.header.bit_width = 32;
        self.payload = values
            .iter()
            .flat_map(|v| (*v as f32).to_be_bytes())
            .collect();
        self
    }

    pub fn raw_float64(mut self, values: &ArrayD<f64>) -> Self {
        self.shape_from(values);
        self.header.type_code = RAW_FLOAT;
        self.header.bit_width = 64;
        self.payload = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self
    }

    pub fn raw_binary(self, values: &ArrayD<f64>) -> Self {
        let mut spec = self.raw_float(values);
        spec.header.type_code = RAW_BINARY;
        spec
    }

    pub fn packed_unsigned(mut self, values: &ArrayD<u64>, bit_width: u8) -> Self {
        self.shape_from(values);
        self.header.type_code = PACKED_UNSIGNED;
        self.header.bit_width = bit_width;
        let mut writer = BitWriter::new();
        for value in values.iter() {
            writer.push(*value, bit_width);
        }
        self.payload = writer.finish();
        self
    }

    pub fn packed_signed(mut self, values: &ArrayD<i64>, bit_width: u8) -> Self {
        self.shape_from(values);
        self.header.type_code = PACKED_SIGNED;
        self.header.bit_width = bit_width;
        let mut writer = BitWriter::new();
        for value in values.iter() {
            writer.push(*value as u64, bit_width);
        }
        self.payload = writer.finish();
        self
    }

    pub fn quantized(mut self, values: &ArrayD<f64>, min: f64, step: f64, bit_width: u8) -> Self {
        self.shape_from(values);
        self.header.type_code = QUANTIZED_FLOAT;
        self.header.bit_width = bit_width;
        let mut payload = vec![];
        payload.write_f64(min).expect("write to vec");
        payload.write_f64(step).expect("write to vec");
        let mut writer = BitWriter::new();
        for value in values.iter() {
            writer.push(((value - min) / step).round() as u64, bit_width);
        }
        payload.extend(writer.finish());
        self.payload = payload;
        self
    }

    pub fn characters(mut self, text: &str) -> Self {
        self.header.type_code = CHARACTERS;
        self.header.bit_width = 8;
        self.header.ni = text.len() as u32;
        self.payload = text.as_bytes().to_vec();
        self
    }

    /// Length of the whole record, in units, once padded
    fn units(&self) -> u32 {
        let bytes = (HEADER_BYTES + self.payload.len()) as u64;
        ((bytes + UNIT_BYTES - 1) / UNIT_BYTES) as u32
    }

    /// Header as it will be written
    pub fn header(&self) -> RecordHeader {
        let mut header = self.header.clone();
        header.length = self.units();
        header
    }

    /// Place the record at the given 1-based unit address
    pub fn at(mut self, address: u32) -> Self {
        self.header.address = address;
        self
    }

    /// The record's bytes, header included, padded to a whole number of units
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = self.header().encode().to_vec();
        bytes.extend(&self.payload);
        bytes.resize(self.units() as usize * UNIT_BYTES as usize, 0);
        bytes
    }
}

/// Lay records out one after another starting at `address`, fixing up their addresses.
///
/// Returns the records as placed and the concatenated bytes.
///
pub(crate) fn concat_records(records: Vec<RecordSpec>, address: u32) -> (Vec<RecordSpec>, Vec<u8>) {
    let mut address = address;
    let mut placed = vec![];
    let mut bytes = vec![];
    for record in records {
        let record = record.at(address);
        address += record.units();
        bytes.extend(record.bytes());
        placed.push(record);
    }

    (placed, bytes)
}

/// Bytes of a complete container file holding `records`
pub(crate) fn file_bytes(records: Vec<RecordSpec>) -> Vec<u8> {
    let directory_bytes = 16 + records.len() * HEADER_BYTES;
    let first_address = (directory_bytes as u64 / UNIT_BYTES) as u32 + 1;
    let (placed, body) = concat_records(records, first_address);

    let mut bytes = vec![];
    bytes.extend_from_slice(FILE_HEADER);
    bytes.write_u32(1).expect("write to vec");
    bytes.write_u32(placed.len() as u32).expect("write to vec");
    bytes.write_u32(0).expect("write to vec");
    for record in &placed {
        bytes.extend_from_slice(&record.header().encode());
    }
    bytes.extend(body);

    bytes
}

/// Write a container file holding `records` to a temporary file
pub(crate) fn temp_file(records: Vec<RecordSpec>) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(&file_bytes(records))
        .expect("write temp file");
    file.flush().expect("flush temp file");

    file
}
