use thiserror::Error;

use crate::session::State;

/// Errors reported by a persistent store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("access of {len} bytes at offset {offset} exceeds store capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

/// Profiler errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: State,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to allocate {bytes} bytes for profiling buffers")]
    OutOfMemory { bytes: usize },
    #[error("persistent store failure: {0}")]
    Store(#[from] StoreError),
    #[error("corrupt profile data at offset {offset:#x}: {reason}")]
    CorruptData { offset: usize, reason: String },
    #[error("call-graph arc table exhausted (capacity {capacity})")]
    CapacityExhausted { capacity: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Error::CorruptData {
            offset,
            reason: reason.into(),
        }
    }
}
