use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::header::{COOKIE, Checksum, HEADER_BODY_LEN, Header};

/// Error type for delta file operations.
#[derive(Debug)]
pub enum DfError {
    /// Underlying I/O error.
    Io(io::Error),
    /// Misuse of the writer or an unsupported value.
    Invalid(String),
    /// The file failed an integrity check; the message names the byte offset.
    Corrupt(String),
}

impl fmt::Display for DfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfError::Io(e) => write!(f, "{}", e),
            DfError::Invalid(m) => write!(f, "{}", m),
            DfError::Corrupt(m) => write!(f, "{}", m),
        }
    }
}
impl std::error::Error for DfError {}
impl From<io::Error> for DfError {
    fn from(e: io::Error) -> Self {
        DfError::Io(e)
    }
}

impl DfError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, DfError::Corrupt(_))
    }
}

pub type Result<T> = std::result::Result<T, DfError>;

/// Reader that feeds everything it reads into a running checksum.
struct ChecksumReader<R> {
    inner: R,
    checksum: Checksum,
    pos: u64,
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.checksum.update(&buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read> ChecksumReader<R> {
    fn new(inner: R) -> Self {
        ChecksumReader {
            inner,
            checksum: Checksum::crc8(),
            pos: 0,
        }
    }

    /// Read exactly `buf.len()` checksummed bytes; a short read is corruption.
    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        let start = self.pos;
        self.read_exact(buf).map_err(|e| eof_as_corrupt(e, what, start))
    }

    fn read_uvarint(&mut self, what: &str) -> Result<u64> {
        let start = self.pos;
        let mut v: u64 = 0;
        let mut shift = 0u32;
        loop {
            let mut b = [0u8; 1];
            self.fill(&mut b, what)?;
            if shift >= 64 || (shift == 63 && b[0] & 0x7e != 0) {
                return Err(DfError::Corrupt(format!(
                    "length of {what} at offset {start} overflows"
                )));
            }
            v |= ((b[0] & 0x7f) as u64) << shift;
            if b[0] & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
        }
    }

    /// Read a length-prefixed buffer.
    fn read_sized(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.read_uvarint(what)?;
        let start = self.pos;
        let mut buf = Vec::new();
        let n = (&mut *self).take(len).read_to_end(&mut buf)?;
        if (n as u64) < len {
            return Err(DfError::Corrupt(format!(
                "truncated {what} at offset {start}: expected {len} bytes, found {n}"
            )));
        }
        Ok(buf)
    }

    /// Skip a length-prefixed buffer, still feeding it to the checksum.
    fn skip_sized(&mut self, what: &str) -> Result<u64> {
        let len = self.read_uvarint(what)?;
        let start = self.pos;
        let n = io::copy(&mut (&mut *self).take(len), &mut io::sink())?;
        if n < len {
            return Err(DfError::Corrupt(format!(
                "truncated {what} at offset {start}: expected {len} bytes, found {n}"
            )));
        }
        Ok(len)
    }

    /// Read the stored checksum (not checksummed itself) and compare it with
    /// the running one.
    fn verify_checksum(&mut self, what: &str) -> Result<()> {
        let start = self.pos;
        let expected = self.checksum.to_bytes();
        let mut stored = vec![0u8; self.checksum.width()];
        self.inner
            .read_exact(&mut stored)
            .map_err(|e| eof_as_corrupt(e, what, start))?;
        self.pos += stored.len() as u64;
        if stored != expected {
            return Err(DfError::Corrupt(format!(
                "bad {what} at offset {start}: stored {:02x?}, computed {:02x?}",
                stored, expected
            )));
        }
        Ok(())
    }

    /// Fails if any byte follows the trailer.
    fn expect_end(&mut self) -> Result<()> {
        let mut probe = [0u8; 1];
        loop {
            match self.inner.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    return Err(DfError::Corrupt(format!(
                        "unexpected trailing bytes at offset {}",
                        self.pos
                    )));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DfError::Io(e)),
            }
        }
    }
}

fn eof_as_corrupt(e: io::Error, what: &str, offset: u64) -> DfError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DfError::Corrupt(format!("truncated {what} at offset {offset}"))
    } else {
        DfError::Io(e)
    }
}

/// Read and validate the header, leaving the reader positioned on the first
/// record with the CRC-32 accumulator armed.
fn read_header<R: Read>(r: &mut ChecksumReader<R>) -> Result<Header> {
    let mut buf = [0u8; HEADER_BODY_LEN];
    r.fill(&mut buf, "header")?;
    if buf[0..8] != COOKIE {
        return Err(DfError::Corrupt("bad cookie at offset 0".into()));
    }
    r.verify_checksum("header CRC-8")?;
    let header = Header::parse(&buf)
        .ok_or_else(|| DfError::Invalid(format!("unknown flavor tag {}", buf[32])))?;
    r.checksum = Checksum::crc32();
    Ok(header)
}

/// Summary of a verified delta file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub header: Header,
    /// Records whose content is empty (deleted entities).
    pub empty_records: u64,
    /// Total size of the file in bytes.
    pub bytes: u64,
}

/// Verify a whole delta file without keeping any record in memory.
pub fn check_file<P: AsRef<Path>>(path: P) -> Result<CheckSummary> {
    let file = File::open(path)?;
    check_reader(BufReader::new(file))
}

/// Verify a delta file read from any byte stream.
pub fn check_reader<R: Read>(reader: R) -> Result<CheckSummary> {
    let mut r = ChecksumReader::new(reader);
    let header = read_header(&mut r)?;
    let mut empty_records = 0u64;
    for _ in 0..header.url_count {
        r.skip_sized("record name")?;
        if r.skip_sized("record content")? == 0 {
            empty_records += 1;
        }
    }
    r.verify_checksum("record CRC-32")?;
    r.expect_end()?;
    Ok(CheckSummary {
        header,
        empty_records,
        bytes: r.pos,
    })
}

/// One stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: Vec<u8>,
    /// Document bytes; empty when the entity no longer exists upstream.
    pub content: Vec<u8>,
}

impl Record {
    pub fn is_deletion(&self) -> bool {
        self.content.is_empty()
    }
}

/// Streaming record reader. The trailing CRC-32 is verified once the last
/// record has been returned; a mismatch surfaces as the final item.
pub struct DeltaFileReader<R> {
    inner: ChecksumReader<R>,
    header: Header,
    remaining: u64,
    done: bool,
}

impl DeltaFileReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> DeltaFileReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut inner = ChecksumReader::new(reader);
        let header = read_header(&mut inner)?;
        Ok(DeltaFileReader {
            inner,
            header,
            remaining: header.url_count,
            done: false,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Next record, or `None` after the trailer has been verified.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        if self.remaining == 0 {
            self.done = true;
            self.inner.verify_checksum("record CRC-32")?;
            self.inner.expect_end()?;
            return Ok(None);
        }
        let name = self.inner.read_sized("record name")?;
        let content = self.inner.read_sized("record content")?;
        self.remaining -= 1;
        Ok(Some(Record { name, content }))
    }
}

impl<R: Read> Iterator for DeltaFileReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(r)) => Some(Ok(r)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
