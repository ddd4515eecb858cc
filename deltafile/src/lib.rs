//! deltafile: a single checksummed container for a batch of fetched entity
//! documents.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "$DltF0\n\r"  url_count:u64  range_start:u64  range_end:u64  flavor:u8  pad:3
//! crc8 (over everything above)
//! url_count x ( uvarint(len) name  uvarint(len) content )
//! crc32 (over all records)
//! ```
//!
//! Write a file, then verify it
//!
//! ```no_run
//! use deltafile::{check_file, create_file, Flavor, Header};
//!
//! let header = Header { url_count: 1, range_start: 0, range_end: 0, flavor: Flavor::Dump };
//! let mut w = create_file("delta.df", &header).expect("create");
//! w.add_record(b"Q42.ttl", b"<a> <b> <c> .").expect("write");
//! w.finish().expect("finish");
//!
//! let summary = check_file("delta.df").expect("valid file");
//! assert_eq!(summary.header.url_count, 1);
//! ```

pub mod header;
pub mod reader;
pub mod writer;

pub use header::{Flavor, Header};
pub use reader::{CheckSummary, DeltaFileReader, DfError, Record, check_file, check_reader};
pub use writer::{DeltaFileWriter, create_file};

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, DfError>;
