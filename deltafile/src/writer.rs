use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::header::{Checksum, Header, push_uvarint};
use crate::reader::{DfError, Result};

/// Writer that feeds everything it writes into a running checksum.
struct ChecksumWriter<W: Write> {
    inner: W,
    checksum: Checksum,
}

impl<W: Write> ChecksumWriter<W> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.checksum.update(data);
        Ok(())
    }

    /// Emit the current checksum (outside of the checksummed stream) and
    /// restart accumulation with `next`.
    fn write_checksum(&mut self, next: Checksum) -> Result<()> {
        self.inner.write_all(&self.checksum.to_bytes())?;
        self.checksum = next;
        Ok(())
    }
}

/// Produces a delta file: header, CRC-8, records, CRC-32.
///
/// The writer is not shareable; producers running on several threads must
/// wrap it in a `Mutex` and append one whole record per lock acquisition.
pub struct DeltaFileWriter<W: Write> {
    out: ChecksumWriter<W>,
    expected: u64,
    written: u64,
}

/// Create `path` and write the header into it.
pub fn create_file<P: AsRef<Path>>(
    path: P,
    header: &Header,
) -> Result<DeltaFileWriter<BufWriter<File>>> {
    let file = File::create(path)?;
    DeltaFileWriter::new(BufWriter::new(file), header)
}

impl<W: Write> DeltaFileWriter<W> {
    pub fn new(inner: W, header: &Header) -> Result<Self> {
        let mut out = ChecksumWriter {
            inner,
            checksum: Checksum::crc8(),
        };
        out.write_all(&header.to_bytes())?;
        out.write_checksum(Checksum::crc32())?;
        Ok(DeltaFileWriter {
            out,
            expected: header.url_count,
            written: 0,
        })
    }

    /// Append one record. An empty `content` marks a deleted entity.
    pub fn add_record(&mut self, name: &[u8], content: &[u8]) -> Result<()> {
        if self.written == self.expected {
            return Err(DfError::Invalid(format!(
                "header announces {} records, refusing record {}",
                self.expected,
                self.written + 1
            )));
        }
        self.write_sized(name)?;
        self.write_sized(content)?;
        self.written += 1;
        Ok(())
    }

    fn write_sized(&mut self, data: &[u8]) -> Result<()> {
        let mut len = Vec::with_capacity(10);
        push_uvarint(data.len() as u64, &mut len);
        self.out.write_all(&len)?;
        self.out.write_all(data)
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// Write the CRC-32 trailer and flush. Fails if the number of records
    /// differs from the header's count.
    pub fn finish(mut self) -> Result<W> {
        if self.written != self.expected {
            return Err(DfError::Invalid(format!(
                "header announces {} records but {} were written",
                self.expected, self.written
            )));
        }
        self.out.write_checksum(Checksum::crc32())?;
        self.out.inner.flush()?;
        Ok(self.out.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Flavor, HEADER_LEN};

    fn header(n: u64) -> Header {
        Header {
            url_count: n,
            range_start: 2,
            range_end: 1,
            flavor: Flavor::Dump,
        }
    }

    #[test]
    fn empty_file_layout() {
        let w = DeltaFileWriter::new(Vec::new(), &header(0)).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        // CRC-32 of nothing
        assert_eq!(&bytes[HEADER_LEN..], &[0, 0, 0, 0]);
    }

    #[test]
    fn record_count_enforced() {
        let mut w = DeltaFileWriter::new(Vec::new(), &header(1)).unwrap();
        w.add_record(b"Q1.ttl", b"").unwrap();
        assert!(matches!(
            w.add_record(b"Q2.ttl", b""),
            Err(DfError::Invalid(_))
        ));

        let w = DeltaFileWriter::new(Vec::new(), &header(2)).unwrap();
        assert!(matches!(w.finish(), Err(DfError::Invalid(_))));
    }
}
