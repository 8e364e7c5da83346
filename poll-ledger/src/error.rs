//! Error types for the poll ledger

use crate::verify::FailureKind;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Poll does not exist
    #[error("Poll not found: {0}")]
    PollNotFound(String),

    /// Voter already holds a vote record for this poll
    #[error("Voter {voter} has already voted in poll {poll_id}")]
    AlreadyVoted {
        /// Poll the vote was cast in
        poll_id: String,
        /// Voter identifier
        voter: String,
    },

    /// Poll id already taken
    #[error("Poll already exists: {0}")]
    PollExists(String),

    /// A block already occupies this index (lost-update race caught)
    #[error("Block conflict in poll {poll_id} at index {index}")]
    BlockConflict {
        /// Poll whose chain moved underneath the writer
        poll_id: String,
        /// Contested index
        index: u64,
    },

    /// Hash chain verification failed
    #[error("Integrity failure in poll {poll_id} at block {index}: {kind}")]
    Integrity {
        /// Poll whose ledger is damaged
        poll_id: String,
        /// First failing block
        index: u64,
        /// What failed
        kind: FailureKind,
    },

    /// Candidate is not part of the poll
    #[error("Invalid candidate {candidate:?} for poll {poll_id}")]
    InvalidCandidate {
        /// Poll the vote targeted
        poll_id: String,
        /// Rejected candidate
        candidate: String,
    },

    /// Malformed poll definition
    #[error("Invalid poll: {0}")]
    InvalidPoll(String),

    /// Storage I/O failure, safe to retry
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error taxonomy callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Poll or record missing
    NotFound,
    /// Duplicate vote, duplicate poll or index collision
    Conflict,
    /// Hash or linkage mismatch in a ledger
    Integrity,
    /// Bad candidate or malformed input
    Validation,
    /// Storage unavailable; retry with backoff
    Transient,
    /// Local fault (serialization, config, metrics, filesystem)
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PollNotFound(_) => ErrorKind::NotFound,
            Error::AlreadyVoted { .. } | Error::PollExists(_) | Error::BlockConflict { .. } => {
                ErrorKind::Conflict
            }
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::InvalidCandidate { .. } | Error::InvalidPoll(_) => ErrorKind::Validation,
            Error::Transient(_) | Error::Concurrency(_) => ErrorKind::Transient,
            Error::Serialization(_) | Error::Config(_) | Error::Metrics(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the caller may retry through `cast_vote`
    ///
    /// Index collisions qualify: nothing was written when one is reported.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient || matches!(self, Error::BlockConflict { .. })
    }
}

#[cfg(feature = "rocksdb-store")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Transient(err.to_string())
    }
}
