//! Input stream opening.
//!
//! GnuCash writes its XML books gzip-compressed by default. The magic bytes
//! decide whether the stream is inflated; either way the number of bytes
//! handed to the parser is capped.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crate::error::ImportError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(header: &[u8]) -> bool {
    header.starts_with(&GZIP_MAGIC)
}

/// Open a file for parsing
pub fn open_input(path: &Path, limit: u64) -> Result<Box<dyn BufRead>, ImportError> {
    let io_error = |source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let input = wrap_reader(file, limit).map_err(io_error)?;
    log::info!("Opened {}", path.display());
    Ok(input)
}

/// Sniff the first bytes of `reader` and return a capped, buffered stream
pub fn wrap_reader<'a, R: Read + 'a>(reader: R, limit: u64) -> io::Result<Box<dyn BufRead + 'a>> {
    let mut buffered = BufReader::new(reader);
    let compressed = is_gzip(buffered.fill_buf()?);
    if compressed {
        log::debug!("Input is gzip compressed");
        let decoder = MultiGzDecoder::new(buffered);
        Ok(Box::new(BufReader::new(Capped::new(decoder, limit))))
    } else {
        Ok(Box::new(BufReader::new(Capped::new(buffered, limit))))
    }
}

/// Reader that fails once more than `limit` bytes would be produced
struct Capped<R> {
    inner: R,
    remaining: u64,
    limit: u64,
}

impl<R: Read> Capped<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            limit,
        }
    }
}

impl<R: Read> Read for Capped<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let mut extra = [0u8; 1];
            return match self.inner.read(&mut extra)? {
                0 => Ok(0),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "input exceeds the maximum size of {} MB",
                        self.limit / (1024 * 1024)
                    ),
                )),
            };
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let read = self.inner.read(&mut buf[..max])?;
        self.remaining -= read as u64;
        Ok(read)
    }
}
