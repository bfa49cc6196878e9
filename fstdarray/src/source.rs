//! Raw byte range access to the files behind a catalog.
//!
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::Result;

/// A supplier of raw bytes, addressed by file and byte range.
///
/// Implementations must be safe to call concurrently. A read past the end of a file returns the
/// bytes that are there.
///
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn read(&self, file_id: usize, offset: u64, length: u64) -> Result<Vec<u8>>;
}

/// Reads from files on disk.
///
/// Each file is opened once, on first use, and the handle is shared by all readers. Seek and read
/// happen together under the handle's lock, since the file position is shared.
///
pub struct FileSource {
    paths: Vec<PathBuf>,
    handles: Vec<Mutex<Option<File>>>,
}

impl FileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let handles = paths.iter().map(|_| Mutex::new(None)).collect();
        Self { paths, handles }
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read(&self, file_id: usize, offset: u64, length: u64) -> Result<Vec<u8>> {
        let handle = self.handles.get(file_id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no file with id {file_id}"))
        })?;

        let mut handle = handle.lock();
        if handle.is_none() {
            *handle = Some(File::open(&self.paths[file_id])?);
        }
        let file = handle.as_mut().ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::with_capacity(length as usize);
        file.take(length).read_to_end(&mut bytes)?;

        Ok(bytes)
    }
}

/// Serves byte ranges out of buffers held in memory.
///
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    buffers: Vec<Vec<u8>>,
}

impl MemorySource {
    pub fn new(buffers: Vec<Vec<u8>>) -> Self {
        Self { buffers }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read(&self, file_id: usize, offset: u64, length: u64) -> Result<Vec<u8>> {
        let buffer = self.buffers.get(file_id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no buffer with id {file_id}"))
        })?;
        let start = (offset as usize).min(buffer.len());
        let end = (offset.saturating_add(length) as usize).min(buffer.len());

        Ok(buffer[start..end].to_vec())
    }
}
