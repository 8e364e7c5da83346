//! In-process store
//!
//! State is partitioned per poll, each partition behind its own lock. Every
//! operation touches one poll, so each is atomic with respect to every other
//! operation on that poll (including `commit_vote`) and polls never wait on
//! each other.

use super::{AppendOutcome, ClaimOutcome, CommitOutcome, LedgerStore};
use crate::types::{Block, Poll, PollId, Tally, VoteRecord, VoterId};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Partition {
    poll: Option<Poll>,
    tally: Option<Tally>,
    blocks: BTreeMap<u64, Block>,
    votes: HashMap<VoterId, VoteRecord>,
}

/// Store backed by in-memory maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: DashMap<PollId, Arc<Mutex<Partition>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a transient error (outage simulation)
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrite a stored block, bypassing append-only rules
    ///
    /// Only for exercising the verifier against a tampered store.
    #[cfg(any(test, feature = "test-util"))]
    pub fn overwrite_block(&self, poll_id: &PollId, block: Block) {
        self.partition(poll_id)
            .lock()
            .blocks
            .insert(block.index, block);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Transient("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Partition of a poll, created on first write
    fn partition(&self, poll_id: &PollId) -> Arc<Mutex<Partition>> {
        self.partitions.entry(poll_id.clone()).or_default().clone()
    }

    /// Partition of a poll if anything was ever written for it
    fn existing(&self, poll_id: &PollId) -> Option<Arc<Mutex<Partition>>> {
        self.partitions.get(poll_id).map(|entry| entry.value().clone())
    }
}

impl LedgerStore for MemoryStore {
    fn put_poll(&self, poll: &Poll) -> Result<bool> {
        self.check_available()?;
        let partition = self.partition(&poll.id);
        let mut partition = partition.lock();
        if partition.poll.is_some() {
            return Ok(false);
        }
        partition.poll = Some(poll.clone());
        partition.tally = Some(Tally::zeroed(&poll.candidates));
        Ok(true)
    }

    fn get_poll(&self, poll_id: &PollId) -> Result<Option<Poll>> {
        self.check_available()?;
        Ok(self
            .existing(poll_id)
            .and_then(|partition| partition.lock().poll.clone()))
    }

    fn list_polls(&self) -> Result<Vec<Poll>> {
        self.check_available()?;
        // Release the map's shard locks before taking partition locks
        let partitions: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut polls: Vec<Poll> = partitions
            .iter()
            .filter_map(|partition| partition.lock().poll.clone())
            .collect();
        polls.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(polls)
    }

    fn load_blocks(&self, poll_id: &PollId) -> Result<Vec<Block>> {
        self.check_available()?;
        Ok(self
            .existing(poll_id)
            .map(|partition| partition.lock().blocks.values().cloned().collect())
            .unwrap_or_default())
    }

    fn append_block(&self, poll_id: &PollId, block: &Block) -> Result<AppendOutcome> {
        self.check_available()?;
        let partition = self.partition(poll_id);
        let mut partition = partition.lock();
        if partition.blocks.contains_key(&block.index) {
            return Ok(AppendOutcome::Conflict);
        }
        partition.blocks.insert(block.index, block.clone());
        Ok(AppendOutcome::Appended)
    }

    fn get_vote_record(&self, poll_id: &PollId, voter: &VoterId) -> Result<Option<VoteRecord>> {
        self.check_available()?;
        Ok(self
            .existing(poll_id)
            .and_then(|partition| partition.lock().votes.get(voter).cloned()))
    }

    fn create_vote_record_if_absent(
        &self,
        poll_id: &PollId,
        record: &VoteRecord,
    ) -> Result<ClaimOutcome> {
        self.check_available()?;
        let partition = self.partition(poll_id);
        let mut partition = partition.lock();
        if partition.votes.contains_key(&record.voter) {
            return Ok(ClaimOutcome::AlreadyExists);
        }
        partition.votes.insert(record.voter.clone(), record.clone());
        Ok(ClaimOutcome::Created)
    }

    fn increment_tally(&self, poll_id: &PollId, candidate: &str, delta: u64) -> Result<()> {
        self.check_available()?;
        let partition = self
            .existing(poll_id)
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))?;
        let mut partition = partition.lock();
        let tally = partition
            .tally
            .as_mut()
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))?;
        tally.add(candidate, delta);
        Ok(())
    }

    fn get_tally(&self, poll_id: &PollId) -> Result<Tally> {
        self.check_available()?;
        self.existing(poll_id)
            .and_then(|partition| partition.lock().tally.clone())
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))
    }

    fn commit_vote(
        &self,
        poll_id: &PollId,
        block: &Block,
        record: &VoteRecord,
    ) -> Result<CommitOutcome> {
        self.check_available()?;
        let partition = self
            .existing(poll_id)
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))?;
        let mut partition = partition.lock();
        let Partition {
            tally,
            blocks,
            votes,
            ..
        } = &mut *partition;

        if votes.contains_key(&record.voter) {
            return Ok(CommitOutcome::AlreadyVoted);
        }
        if blocks.contains_key(&block.index) {
            return Ok(CommitOutcome::Conflict);
        }
        let tally = tally
            .as_mut()
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))?;

        blocks.insert(block.index, block.clone());
        tally.add(&record.candidate, 1);
        votes.insert(record.voter.clone(), record.clone());
        Ok(CommitOutcome::Committed)
    }
}
