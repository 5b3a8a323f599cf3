use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("frame {frame} is outside the store (max_frame {max_frame})")]
    FrameOutOfRange { frame: usize, max_frame: usize },

    #[error("frame {frame}: {features} feature rows but {labels} labels")]
    SegmentCountMismatch {
        frame: usize,
        features: usize,
        labels: usize,
    },

    #[error("frame {frame}: refusing to store a record with no segments")]
    EmptyRecord { frame: usize },

    #[error("frame {frame}: segment {segment} has label {value}, expected 0 or 1")]
    InvalidLabel {
        frame: usize,
        segment: usize,
        value: i32,
    },

    #[error("frame {frame}: stored record has {stored} labels, current frame has {expected} segments")]
    SizeMismatch {
        frame: usize,
        stored: usize,
        expected: usize,
    },

    #[error("spill file {} holds {written} bytes, expected {expected}", path.display())]
    IncompleteSpill {
        path: PathBuf,
        expected: u64,
        written: u64,
    },

    #[error("size table {} is inconsistent: {reason}", path.display())]
    CorruptSizeTable { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { op, path, source }
    }

    /// Whether the session may carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::SizeMismatch { .. }
                | StoreError::EmptyRecord { .. }
                | StoreError::InvalidLabel { .. }
                | StoreError::SegmentCountMismatch { .. }
                | StoreError::FrameOutOfRange { .. }
        )
    }
}
