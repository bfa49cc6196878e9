//! The fixed byte layout of a record header.
//!
//! Every record begins with `HEADER_BYTES` bytes of big endian 32 bit words describing the record.
//! The same header is repeated in each file's directory. All knowledge of where fields live inside
//! those bytes is kept in this module.
//!
use std::fmt;

use crate::errors::{Error, Result};

/// Number of bytes in a record header.
pub const HEADER_BYTES: usize = 80;

/// Addresses and lengths in headers are counted in units of this many bytes.
pub const UNIT_BYTES: u64 = 8;

const LENGTH_WORD: usize = 0;
const ADDRESS_WORD: usize = 1;
const NI_WORD: usize = 2;
const NJ_WORD: usize = 3;
const NK_WORD: usize = 4;
const NPAS_WORD: usize = 5;
const IP1_WORD: usize = 6;
const IP2_WORD: usize = 7;
const IP3_WORD: usize = 8;
const DATEV_WORD: usize = 9;
const DATEO_WORD: usize = 10;
const DEET_WORD: usize = 11;
const TYPE_VARIANT_WORD: usize = 12;
const NAME_BYTE: usize = 13 * 4;
const LABEL_BYTE: usize = 14 * 4;
const IG1_WORD: usize = 17;
const IG2_WORD: usize = 18;
const IG34_WORD: usize = 19;

const BIT_WIDTH_BYTE: usize = 0x0B;
const TYPE_CODE_BYTE: usize = 0x13;
const GRID_TYPE_BYTE: usize = 0x0F;

const NAME_LEN: usize = 4;
const LABEL_LEN: usize = 12;

const LENGTH_MASK: u32 = 0x00FF_FFFF;
const TYPE_VARIANT_MASK: u32 = 0x000F_FF00;

/// Second character of a type variant for masked data, both characters for a mask.
pub const MASK_SENTINEL: u8 = b'@';

/// Two character code distinguishing the category of a record.
///
/// Stored in headers as two 6 bit characters (ASCII minus 32).
///
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVariant([u8; 2]);

impl TypeVariant {
    pub fn new(code: &str) -> Self {
        let bytes = code.as_bytes();
        let first = bytes.first().copied().unwrap_or(b' ');
        let second = bytes.get(1).copied().unwrap_or(b' ');
        Self([first, second])
    }

    pub(crate) fn from_code(code: u32) -> Self {
        let first = ((code >> 6) & 0x3F) as u8 + 32;
        let second = (code & 0x3F) as u8 + 32;
        Self([first, second])
    }

    #[cfg(test)]
    pub(crate) fn code(&self) -> u32 {
        let [first, second] = self.0;
        ((first.saturating_sub(32) as u32 & 0x3F) << 6) | (second.saturating_sub(32) as u32 & 0x3F)
    }

    /// A validity mask, consumed by pairing rather than exposed as a variable
    pub fn is_mask(&self) -> bool {
        self.0 == [MASK_SENTINEL, MASK_SENTINEL]
    }

    /// Data that has a mask record paired with it
    pub fn is_masked_data(&self) -> bool {
        self.0[1] == MASK_SENTINEL && self.0[0] != MASK_SENTINEL
    }

    /// Either a mask or masked data
    pub fn uses_mask(&self) -> bool {
        self.0[1] == MASK_SENTINEL
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Debug for TypeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeVariant({:?})", self.as_str())
    }
}

impl fmt::Display for TypeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of the horizontal grid a record is defined on.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grid {
    pub grtyp: u8,
    pub ig1: i32,
    pub ig2: i32,
    pub ig3: i32,
    pub ig4: i32,
}

impl Grid {
    /// Grid type of records that are tiles of a larger grid
    pub const TILE: u8 = b'#';

    pub fn is_tile(&self) -> bool {
        self.grtyp == Self::TILE
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            grtyp: b'X',
            ig1: 0,
            ig2: 0,
            ig3: 0,
            ig4: 0,
        }
    }
}

/// All fields of a record header, decoded.
///
#[derive(Clone, Debug, PartialEq)]
pub struct RecordHeader {
    pub deleted: bool,

    /// Record length in `UNIT_BYTES` units
    pub length: u32,

    /// 1-based start address in `UNIT_BYTES` units
    pub address: u32,

    pub ni: u32,
    pub nj: u32,
    pub nk: u32,
    pub bit_width: u8,
    pub type_code: u8,
    pub grid: Grid,
    pub npas: i32,
    pub ip1: i32,
    pub ip2: i32,
    pub ip3: i32,
    pub datev: i32,
    pub dateo: i32,
    pub deet: i32,
    pub type_variant: TypeVariant,
    pub name: String,
    pub label: String,
}

impl RecordHeader {
    /// Byte offset of the record within its file
    pub fn byte_offset(&self) -> u64 {
        (self.address as u64).saturating_sub(1) * UNIT_BYTES
    }

    /// Number of bytes in the record, header included
    pub fn byte_length(&self) -> u64 {
        self.length as u64 * UNIT_BYTES
    }

    /// Number of elements described by the record's extents, if it fits in a `usize`
    pub fn count(&self) -> Option<usize> {
        (self.ni as usize)
            .checked_mul(self.nj as usize)?
            .checked_mul(self.nk as usize)
    }

    /// Short human readable description of the field this record belongs to
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{} ip1={} ip2={} ip3={} datev={}",
            self.name,
            self.type_variant.as_str().trim_end(),
            self.label,
            self.ip1,
            self.ip2,
            self.ip3,
            self.datev
        )
    }
}

/// A read only view of the header at the start of a byte buffer.
///
pub struct HeaderView<'a> {
    bytes: &'a [u8],
}

impl<'a> HeaderView<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(Error::MalformedRecord(format!(
                "{} bytes is too short for a record header",
                bytes.len()
            )));
        }

        Ok(Self { bytes })
    }

    fn word(&self, index: usize) -> u32 {
        read_word(self.bytes, index).unwrap_or_default()
    }

    fn int(&self, index: usize) -> i32 {
        self.word(index) as i32
    }

    fn text(&self, start: usize, len: usize) -> String {
        String::from_utf8_lossy(&self.bytes[start..start + len])
            .trim_end()
            .to_string()
    }

    pub fn bit_width(&self) -> u8 {
        self.bytes[BIT_WIDTH_BYTE]
    }

    pub fn type_code(&self) -> u8 {
        self.bytes[TYPE_CODE_BYTE]
    }

    /// Self described record length in `UNIT_BYTES` units
    pub fn length(&self) -> u32 {
        self.word(LENGTH_WORD) & LENGTH_MASK
    }

    /// Self described 1-based start address in `UNIT_BYTES` units
    pub fn address(&self) -> u32 {
        self.word(ADDRESS_WORD)
    }

    pub fn type_variant(&self) -> TypeVariant {
        TypeVariant::from_code((self.word(TYPE_VARIANT_WORD) & TYPE_VARIANT_MASK) >> 8)
    }

    pub fn extents(&self) -> (u32, u32, u32) {
        (
            self.word(NI_WORD) >> 8,
            self.word(NJ_WORD) >> 8,
            self.word(NK_WORD) >> 8,
        )
    }

    /// The bytes following the header
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[HEADER_BYTES..]
    }

    pub fn decode(&self) -> RecordHeader {
        let (ni, nj, nk) = self.extents();
        let ig34 = self.word(IG34_WORD);
        RecordHeader {
            deleted: self.word(LENGTH_WORD) >> 24 != 0,
            length: self.length(),
            address: self.address(),
            ni,
            nj,
            nk,
            bit_width: self.bit_width(),
            type_code: self.type_code(),
            grid: Grid {
                grtyp: self.bytes[GRID_TYPE_BYTE],
                ig1: self.int(IG1_WORD),
                ig2: self.int(IG2_WORD),
                ig3: (ig34 >> 16) as i32,
                ig4: (ig34 & 0xFFFF) as i32,
            },
            npas: self.int(NPAS_WORD),
            ip1: self.int(IP1_WORD),
            ip2: self.int(IP2_WORD),
            ip3: self.int(IP3_WORD),
            datev: self.int(DATEV_WORD),
            dateo: self.int(DATEO_WORD),
            deet: self.int(DEET_WORD),
            type_variant: self.type_variant(),
            name: self.text(NAME_BYTE, NAME_LEN),
            label: self.text(LABEL_BYTE, LABEL_LEN),
        }
    }
}

/// Read the 32 bit word at `index` (counting words) from a buffer, if the buffer is long enough.
fn read_word(bytes: &[u8], index: usize) -> Option<u32> {
    let start = index * 4;
    let word = bytes.get(start..start + 4)?;

    Some(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

/// Look for a record header at `unit` (in `UNIT_BYTES` units) within `bytes` and return the start
/// address it describes for itself.
pub(crate) fn address_at(bytes: &[u8], unit: usize) -> Option<u32> {
    let start = unit * UNIT_BYTES as usize;
    if bytes.len() < start + HEADER_BYTES {
        return None;
    }

    read_word(&bytes[start..], ADDRESS_WORD)
}

#[cfg(test)]
impl RecordHeader {
    /// Encode this header into its on disk form
    pub(crate) fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut words = [0_u32; HEADER_BYTES / 4];
        words[LENGTH_WORD] = ((self.deleted as u32) << 24) | (self.length & LENGTH_MASK);
        words[ADDRESS_WORD] = self.address;
        words[NI_WORD] = (self.ni << 8) | self.bit_width as u32;
        words[NJ_WORD] = (self.nj << 8) | self.grid.grtyp as u32;
        words[NK_WORD] = (self.nk << 8) | self.type_code as u32;
        words[NPAS_WORD] = self.npas as u32;
        words[IP1_WORD] = self.ip1 as u32;
        words[IP2_WORD] = self.ip2 as u32;
        words[IP3_WORD] = self.ip3 as u32;
        words[DATEV_WORD] = self.datev as u32;
        words[DATEO_WORD] = self.dateo as u32;
        words[DEET_WORD] = self.deet as u32;
        words[TYPE_VARIANT_WORD] = (self.type_variant.code() << 8) & TYPE_VARIANT_MASK;
        words[IG1_WORD] = self.grid.ig1 as u32;
        words[IG2_WORD] = self.grid.ig2 as u32;
        words[IG34_WORD] = ((self.grid.ig3 as u32 & 0xFFFF) << 16) | (self.grid.ig4 as u32 & 0xFFFF);

        let mut bytes = [0_u8; HEADER_BYTES];
        for (i, word) in words.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        write_text(&mut bytes[NAME_BYTE..NAME_BYTE + NAME_LEN], &self.name);
        write_text(&mut bytes[LABEL_BYTE..LABEL_BYTE + LABEL_LEN], &self.label);

        bytes
    }
}

#[cfg(test)]
fn write_text(dest: &mut [u8], text: &str) {
    dest.fill(b' ');
    for (d, s) in dest.iter_mut().zip(text.bytes()) {
        *d = s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> RecordHeader {
        RecordHeader {
            deleted: false,
            length: 14,
            address: 13,
            ni: 3,
            nj: 2,
            nk: 1,
            bit_width: 16,
            type_code: 2,
            grid: Grid {
                grtyp: b'#',
                ig1: 100,
                ig2: -7,
                ig3: 5,
                ig4: 9,
            },
            npas: 6,
            ip1: 12000,
            ip2: 6,
            ip3: 0,
            datev: 442_302_400,
            dateo: 442_280_800,
            deet: 3600,
            type_variant: TypeVariant::new("P@"),
            name: "TT".to_string(),
            label: "R1_V710_N".to_string(),
        }
    }

    #[test]
    fn test_fixed_offsets() {
        let bytes = header().encode();
        assert_eq!(bytes[0x0B], 16);
        assert_eq!(bytes[0x13], 2);
        assert_eq!(&bytes[NAME_BYTE..NAME_BYTE + 4], b"TT  ");
    }

    #[test]
    fn test_view_decodes_encoded() -> Result<()> {
        let header = header();
        let bytes = header.encode();
        let view = HeaderView::new(&bytes)?;
        assert_eq!(view.bit_width(), 16);
        assert_eq!(view.type_code(), 2);
        assert_eq!(view.length(), 14);
        assert_eq!(view.address(), 13);
        assert_eq!(view.extents(), (3, 2, 1));
        assert_eq!(view.decode(), header);
        assert_eq!(header.byte_offset(), 96);
        assert_eq!(header.byte_length(), 112);

        Ok(())
    }

    #[test]
    fn test_short_buffer() {
        let bytes = [0_u8; HEADER_BYTES - 1];
        assert!(matches!(
            HeaderView::new(&bytes),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_type_variant_codes() {
        let mask = TypeVariant::new("@@");
        assert_eq!(mask.code(), 2080);
        assert!(mask.is_mask());
        assert!(!mask.is_masked_data());
        assert!(mask.uses_mask());

        let data = TypeVariant::new("P@");
        assert!(data.is_masked_data());
        assert!(!data.is_mask());
        assert_eq!(data.code() & 0x3F, 32);
        assert_eq!(TypeVariant::from_code(data.code()), data);

        let plain = TypeVariant::new("P");
        assert_eq!(plain.as_str(), "P ");
        assert!(!plain.uses_mask());
    }

    #[test]
    fn test_address_at() {
        let mut first = header();
        first.length = 10;
        first.address = 1;
        let mut second = header();
        second.address = 11;

        let mut bytes = first.encode().to_vec();
        bytes.extend_from_slice(&second.encode());
        assert_eq!(address_at(&bytes, 0), Some(1));
        assert_eq!(address_at(&bytes, 10), Some(11));
        assert_eq!(address_at(&bytes, 11), None);
    }
}
