use std::fmt::Debug;
use std::io;

use thiserror::Error;

/// A formatted-on-demand value carried by an error, usually an index key.
pub type ErrValue = Box<dyn Debug + Send + Sync>;

/// ErrorKind groups errors by what the caller can do about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad record shape or file settings. Nothing has been written.
    Configuration,
    /// Out of order, duplicate or non sequential data. The batch is rejected.
    Ordering,
    /// The on-disk data can not be read by this codec.
    Format,
    /// The underlying storage failed.
    Io,
}

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("unsupported field {field}: {reason}")]
    Serializer { field: String, reason: String },

    #[error("block size {block_size} is too small, at least {required} bytes are required")]
    BlockTooSmall { block_size: usize, required: usize },

    #[error("file {path} is already initialized")]
    AlreadyInitialized { path: String },

    #[error("file {path} is not initialized")]
    NotInitialized { path: String },

    #[error("file {path} is read-only")]
    ReadOnly { path: String },

    #[error("index values are not sequential in field {field}: {prev:?} followed by {value:?}")]
    NotSequential {
        field: String,
        prev: ErrValue,
        value: ErrValue,
    },

    #[error("positive delta field {field} decreased: {prev:?} followed by {value:?}")]
    NegativeDelta {
        field: String,
        prev: ErrValue,
        value: ErrValue,
    },

    #[error("index {value:?} at position {position} is less than the previous index {prev:?}")]
    Unordered {
        position: usize,
        prev: ErrValue,
        value: ErrValue,
    },

    #[error("duplicate index {value:?} at position {position} while unique indexes are enforced")]
    Duplicate { position: usize, value: ErrValue },

    #[error("new data starting at {first:?} overlaps existing data ending at {last:?}, truncation was not allowed")]
    Overlap { first: ErrValue, last: ErrValue },

    #[error("file {path} has unexpected format: {reason}")]
    Format { path: String, reason: String },

    #[error("block {block} is corrupt: {reason}")]
    CorruptBlock { block: u64, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SeriesError {
    pub fn serializer(field: &str, reason: impl Into<String>) -> Self {
        Self::Serializer {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn format(path: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serializer { .. }
            | Self::BlockTooSmall { .. }
            | Self::AlreadyInitialized { .. }
            | Self::NotInitialized { .. }
            | Self::ReadOnly { .. } => ErrorKind::Configuration,
            Self::NotSequential { .. }
            | Self::NegativeDelta { .. }
            | Self::Unordered { .. }
            | Self::Duplicate { .. }
            | Self::Overlap { .. } => ErrorKind::Ordering,
            Self::Format { .. } | Self::CorruptBlock { .. } => ErrorKind::Format,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// kind_of classifies an error coming out of this crate.
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        if let Some(e) = err.downcast_ref::<SeriesError>() {
            return Some(e.kind());
        }
        if err.downcast_ref::<io::Error>().is_some() {
            return Some(ErrorKind::Io);
        }
        None
    }
}
