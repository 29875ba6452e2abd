//! An append-optimized store for ordered series of fixed-layout records.
//!
//! Records are kept either raw, one fixed-size slot per record, or compressed into
//! blocks by a tree of field codecs. Both file kinds support appending, truncating and
//! streaming in both directions from any index key.

#[macro_use]
extern crate anyhow;

pub mod block;
pub mod codec;
pub mod error;
pub mod field;
pub mod options;
pub mod series;

pub use error::{ErrorKind, SeriesError};
pub use options::SeriesOptions;
pub use series::compressed_file::CompressedSeriesFile;
pub use series::raw_file::RawSeriesFile;
pub use series::{SeriesFile, SeriesRecord, TruncateTarget};
