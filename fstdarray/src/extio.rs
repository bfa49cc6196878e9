//! Extend Read and Write with some convenience methods for big endian binary i/o
//!
use std::io::{self, Read};
#[cfg(test)]
use std::io::Write;

pub(crate) trait ExtendedRead: Read {
    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a Big Endian encoded 64 bit float from a stream
    fn read_f64(&mut self) -> io::Result<f64>;

    /// Read exactly `n` bytes from a stream
    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>>;
}

impl<R: Read> ExtendedRead for R {
    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer)?;

        Ok(u32::from_be_bytes(buffer))
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(f64::from_be_bytes(buffer))
    }

    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0; n];
        self.read_exact(&mut buffer)?;

        Ok(buffer)
    }
}

#[cfg(test)]
pub(crate) trait ExtendedWrite: Write {
    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit float to a stream
    fn write_f64(&mut self, word: f64) -> io::Result<()>;
}

#[cfg(test)]
impl<W: Write> ExtendedWrite for W {
    fn write_u32(&mut self, word: u32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_f64(&mut self, word: f64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_all_of_it() -> io::Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        buffer.write_u32(31441968)?;
        buffer.write_f64(6.283184)?;
        buffer.write_all(b"TT  ")?;

        let mut buffer = Cursor::new(buffer);
        assert_eq!(buffer.read_u32()?, 31441968);
        assert_eq!(buffer.read_f64()?, 6.283184);
        assert_eq!(buffer.read_bytes(4)?, b"TT  ".to_vec());
        assert!(buffer.read_u32().is_err());

        Ok(())
    }
}
