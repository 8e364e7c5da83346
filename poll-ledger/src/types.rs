//! Core types for the poll ledger
//!
//! All hashed types use an explicit canonical encoding:
//! - Fixed field order
//! - Big-endian fixed-width integers
//! - Length-prefixed UTF-8 strings

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Poll identifier (document id in the store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PollId(String);

impl PollId {
    /// Create new poll ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque voter identifier supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoterId(String);

impl VoterId {
    /// Create new voter ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Fixed marker anchoring the chain
    Genesis,
    /// One cast vote
    Vote {
        /// Who voted
        voter: VoterId,
        /// Chosen candidate
        candidate: String,
    },
}

impl Payload {
    const TAG_GENESIS: u8 = 0;
    const TAG_VOTE: u8 = 1;

    /// Create a vote payload
    pub fn vote(voter: VoterId, candidate: impl Into<String>) -> Self {
        Payload::Vote {
            voter,
            candidate: candidate.into(),
        }
    }

    /// Candidate of a vote payload
    pub fn candidate(&self) -> Option<&str> {
        match self {
            Payload::Genesis => None,
            Payload::Vote { candidate, .. } => Some(candidate),
        }
    }

    /// Create canonical bytes for hashing
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Payload::Genesis => out.push(Self::TAG_GENESIS),
            Payload::Vote { voter, candidate } => {
                out.push(Self::TAG_VOTE);
                put_str(&mut out, voter.as_str());
                put_str(&mut out, candidate);
            }
        }
        out
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// One link of a poll's hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain (genesis = 0)
    pub index: u64,

    /// Creation time (nanoseconds since Unix epoch)
    pub timestamp_nanos: i64,

    /// Genesis marker or vote
    pub payload: Payload,

    /// Hex hash of the previous block, "0" for genesis
    pub previous_hash: String,

    /// Hex SHA-256 of this block's contents
    pub hash: String,
}

impl Block {
    /// Build a block and seal it with its hash
    pub fn new(index: u64, timestamp_nanos: i64, payload: Payload, previous_hash: String) -> Self {
        let mut block = Self {
            index,
            timestamp_nanos,
            payload,
            previous_hash,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Compute block hash from its own fields
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_be_bytes());
        hasher.update(self.timestamp_nanos.to_be_bytes());
        hasher.update(self.payload.canonical_bytes());
        hasher.update(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Stored hash matches contents
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Marker that a voter has voted in a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Voter identifier
    pub voter: VoterId,

    /// Candidate chosen (read-back only)
    pub candidate: String,

    /// Ledger index of the vote block
    pub block_index: u64,

    /// When the vote was committed
    pub recorded_at: DateTime<Utc>,
}

/// Candidate -> vote count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    /// Zero count for every candidate
    pub fn zeroed<'a>(candidates: impl IntoIterator<Item = &'a String>) -> Self {
        Self(candidates.into_iter().map(|c| (c.clone(), 0)).collect())
    }

    /// Recount from a chain's vote blocks
    pub fn from_blocks<'a>(
        candidates: impl IntoIterator<Item = &'a String>,
        blocks: &[Block],
    ) -> Self {
        let mut tally = Self::zeroed(candidates);
        for candidate in blocks.iter().filter_map(|b| b.payload.candidate()) {
            tally.add(candidate, 1);
        }
        tally
    }

    /// Add `delta` votes for a candidate
    pub fn add(&mut self, candidate: &str, delta: u64) {
        *self.0.entry(candidate.to_string()).or_insert(0) += delta;
    }

    /// Votes for a candidate
    pub fn get(&self, candidate: &str) -> u64 {
        self.0.get(candidate).copied().unwrap_or(0)
    }

    /// Total votes across candidates
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// Iterate in candidate order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(c, n)| (c.as_str(), *n))
    }
}

impl FromIterator<(String, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Poll definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    /// Poll ID
    pub id: PollId,

    /// Display name
    pub name: String,

    /// Candidate set, in creation order
    pub candidates: Vec<String>,

    /// Last day of voting
    pub closing_date: NaiveDate,

    /// Creator identity
    pub created_by: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// Candidate belongs to this poll
    pub fn has_candidate(&self, candidate: &str) -> bool {
        self.candidates.iter().any(|c| c == candidate)
    }

    /// Still open on `today`; the closing date itself counts as open
    pub fn is_open_on(&self, today: NaiveDate) -> bool {
        self.closing_date >= today
    }
}

/// Polls split by closing date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollListing {
    /// Closing today or later
    pub ongoing: Vec<Poll>,
    /// Closed before today
    pub past: Vec<Poll>,
}

/// Request to create a poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPoll {
    /// Poll ID
    pub id: PollId,
    /// Display name
    pub name: String,
    /// Candidate set
    pub candidates: Vec<String>,
    /// Last day of voting
    pub closing_date: NaiveDate,
    /// Creator identity
    pub created_by: String,
}

/// Proof of a committed vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    /// Poll voted in
    pub poll_id: PollId,
    /// Voter
    pub voter: VoterId,
    /// Chosen candidate
    pub candidate: String,
    /// Index of the vote block
    pub block_index: u64,
    /// Hash of the vote block
    pub block_hash: String,
}
