//! Poll Ledger
//!
//! Tamper-evident vote ledger: every poll keeps an append-only SHA-256 hash
//! chain of its votes, next to a vote record per voter and a denormalized
//! tally.
//!
//! # Architecture
//!
//! - **Hash chain**: block `i` commits to block `i - 1`; edits are detectable
//! - **Single writer per poll**: one Tokio actor serializes each poll's votes
//! - **Conditional commit**: block, tally and vote record land in one store write
//! - **Audit**: chains are re-verified on load and on demand
//!
//! # Invariants
//!
//! - One vote per (poll, voter)
//! - `tally[c]` equals the number of vote blocks for `c`
//! - Ledger indices are contiguous from the genesis block at 0
//! - Blocks are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::all
)]

pub mod types;
pub mod chain;
pub mod verify;
pub mod storage;
pub mod error;
pub mod actor;
pub mod coordinator;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{
    Block, NewPoll, Payload, Poll, PollId, PollListing, Tally, VoteReceipt, VoteRecord, VoterId,
};
pub use chain::Chain;
pub use verify::{verify, FailureKind, VerificationResult};
pub use storage::{LedgerStore, MemoryStore};
#[cfg(feature = "rocksdb-store")]
pub use storage::RocksStore;
pub use actor::AuditReport;
pub use coordinator::VoteCoordinator;
pub use config::Config;
