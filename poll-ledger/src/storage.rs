//! Storage layer
//!
//! # Collections
//!
//! - `polls` - Poll definitions (key: poll_id)
//! - `blocks` - Append-only hash chain per poll (key: poll_id || index)
//! - `votes` - Vote records (key: poll_id || voter_id)
//! - `tallies` - Denormalized vote counts (key: poll_id || candidate)
//!
//! Every conditional write is a single indivisible operation in the store.
//! [`LedgerStore::commit_vote`] is the one the coordinator relies on: it
//! claims the voter, appends the block and bumps the tally together.

mod memory;
#[cfg(feature = "rocksdb-store")]
mod rocks;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksStore;

use crate::types::{Block, Poll, PollId, Tally, VoteRecord, VoterId};
use crate::Result;

/// Outcome of a conditional block append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Block stored
    Appended,
    /// A block already exists at that index
    Conflict,
}

/// Outcome of a conditional vote-record create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Record created; caller owns the vote
    Created,
    /// Voter already has a record
    AlreadyExists,
}

/// Outcome of an atomic vote commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Block, tally and record all written
    Committed,
    /// Voter already has a record; nothing written
    AlreadyVoted,
    /// A block already exists at that index; nothing written
    Conflict,
}

/// Persistence adapter consumed by the coordinator
///
/// Calls are blocking I/O. Timeouts and transport failures surface as
/// [`crate::Error::Transient`].
pub trait LedgerStore: Send + Sync {
    /// Create a poll with a zero tally; false if the id is taken
    fn put_poll(&self, poll: &Poll) -> Result<bool>;

    /// Get poll by ID
    fn get_poll(&self, poll_id: &PollId) -> Result<Option<Poll>>;

    /// All polls, ordered by ID
    fn list_polls(&self) -> Result<Vec<Poll>>;

    /// Blocks of one poll ordered by index; empty if none
    fn load_blocks(&self, poll_id: &PollId) -> Result<Vec<Block>>;

    /// Store a block unless its index is taken
    fn append_block(&self, poll_id: &PollId, block: &Block) -> Result<AppendOutcome>;

    /// Vote record of a voter, if any
    fn get_vote_record(&self, poll_id: &PollId, voter: &VoterId) -> Result<Option<VoteRecord>>;

    /// Store a vote record unless the voter already has one
    fn create_vote_record_if_absent(
        &self,
        poll_id: &PollId,
        record: &VoteRecord,
    ) -> Result<ClaimOutcome>;

    /// Add `delta` to a candidate's count
    fn increment_tally(&self, poll_id: &PollId, candidate: &str, delta: u64) -> Result<()>;

    /// Current tally of a poll
    fn get_tally(&self, poll_id: &PollId) -> Result<Tally>;

    /// Append a vote block, increment its candidate and create the vote
    /// record as one unit
    ///
    /// Checks the record first, then the block index. Nothing is written
    /// unless both are free.
    fn commit_vote(
        &self,
        poll_id: &PollId,
        block: &Block,
        record: &VoteRecord,
    ) -> Result<CommitOutcome>;
}

// Key helpers shared by the keyed stores

/// Length-prefixed poll ID, so no poll's keys prefix another's
pub(crate) fn poll_prefix(poll_id: &PollId) -> Vec<u8> {
    let id = poll_id.as_str().as_bytes();
    let mut key = Vec::with_capacity(4 + id.len());
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

pub(crate) fn block_key(poll_id: &PollId, index: u64) -> Vec<u8> {
    let mut key = poll_prefix(poll_id);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub(crate) fn suffixed_key(poll_id: &PollId, suffix: &str) -> Vec<u8> {
    let mut key = poll_prefix(poll_id);
    key.extend_from_slice(suffix.as_bytes());
    key
}
