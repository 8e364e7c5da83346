//! Vote coordination layer
//!
//! Ties the store, the per-poll actors and the verifier together into the
//! caller-facing API: create and list polls, cast a vote, read the tally,
//! verify and audit a ledger.
//!
//! # Example
//!
//! ```no_run
//! use poll_ledger::{Config, PollId, VoteCoordinator, VoterId};
//!
//! #[tokio::main]
//! async fn main() -> poll_ledger::Result<()> {
//!     let coordinator = VoteCoordinator::open(Config::default())?;
//!
//!     let poll = PollId::new("Election1");
//!     coordinator
//!         .cast_vote(&poll, &VoterId::new("alice@x.com"), "Bob Smith")
//!         .await?;
//!     println!("{:?}", coordinator.get_tally(&poll)?);
//!
//!     coordinator.shutdown().await
//! }
//! ```

use crate::{
    actor::{quarantine_error, spawn_poll_actor, AuditReport, PollHandle, QuarantineMap},
    chain::create_genesis,
    config::CoordinatorConfig,
    metrics::Metrics,
    storage::{AppendOutcome, LedgerStore},
    types::{
        Block, NewPoll, Poll, PollId, PollListing, Tally, VoteReceipt, VoteRecord, VoterId,
    },
    verify::{verify, VerificationResult},
    Error, ErrorKind, Result,
};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Main entry point for polls and votes
pub struct VoteCoordinator {
    /// Shared store (reads go here directly)
    store: Arc<dyn LedgerStore>,

    /// Write path, one actor per poll
    actors: DashMap<PollId, PollHandle>,

    /// Polls whose ledger failed verification
    quarantine: QuarantineMap,

    /// Configuration
    config: CoordinatorConfig,

    /// Metrics
    metrics: Metrics,
}

impl fmt::Debug for VoteCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoteCoordinator")
            .field("actors", &self.actors.len())
            .field("quarantined", &self.quarantine.len())
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl VoteCoordinator {
    /// Create a coordinator over any store
    pub fn new(store: Arc<dyn LedgerStore>, config: CoordinatorConfig) -> Result<Self> {
        Ok(Self {
            store,
            actors: DashMap::new(),
            quarantine: QuarantineMap::default(),
            config,
            metrics: Metrics::new()?,
        })
    }

    /// Open a coordinator over the RocksDB store in `config.data_dir`
    #[cfg(feature = "rocksdb-store")]
    pub fn open(config: crate::Config) -> Result<Self> {
        let store = Arc::new(crate::storage::RocksStore::open(&config)?);
        Self::new(store, config.coordinator)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Create a poll with a zero tally and its genesis block
    pub fn create_poll(&self, new_poll: NewPoll) -> Result<Poll> {
        validate_new_poll(&new_poll)?;

        let poll = Poll {
            id: new_poll.id,
            name: new_poll.name,
            candidates: new_poll.candidates,
            closing_date: new_poll.closing_date,
            created_by: new_poll.created_by,
            created_at: Utc::now(),
        };

        if !self.store.put_poll(&poll)? {
            return Err(Error::PollExists(poll.id.to_string()));
        }

        // The poll exists from here on. A missing genesis block is written by
        // the poll's actor before its first vote, so a failure here is not fatal.
        match self.store.append_block(&poll.id, &create_genesis()) {
            Ok(AppendOutcome::Appended) => {
                tracing::debug!(poll_id = %poll.id, "Genesis block created")
            }
            Ok(AppendOutcome::Conflict) => {}
            Err(e) => tracing::warn!(
                poll_id = %poll.id,
                error = %e,
                "Genesis block deferred to first vote"
            ),
        }

        tracing::info!(
            poll_id = %poll.id,
            candidates = poll.candidates.len(),
            created_by = %poll.created_by,
            "Poll created"
        );

        Ok(poll)
    }

    /// Get poll by ID
    pub fn get_poll(&self, poll_id: &PollId) -> Result<Poll> {
        self.store
            .get_poll(poll_id)?
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))
    }

    /// First poll with this display name, in ID order
    pub fn find_poll_by_name(&self, name: &str) -> Result<Poll> {
        self.store
            .list_polls()?
            .into_iter()
            .find(|poll| poll.name == name)
            .ok_or_else(|| Error::PollNotFound(name.to_string()))
    }

    /// Every poll, split into ongoing and past as of `today`
    pub fn list_polls(&self, today: NaiveDate) -> Result<PollListing> {
        let (ongoing, past) = self
            .store
            .list_polls()?
            .into_iter()
            .partition(|poll| poll.is_open_on(today));

        Ok(PollListing { ongoing, past })
    }

    /// Cast one vote
    ///
    /// Resolves the poll, checks the candidate, then hands the vote to the
    /// poll's actor which claims the voter and commits block, tally and
    /// record together. A voter who already has a record always gets
    /// [`Error::AlreadyVoted`], whether or not an earlier call returned.
    pub async fn cast_vote(
        &self,
        poll_id: &PollId,
        voter: &VoterId,
        candidate: &str,
    ) -> Result<VoteReceipt> {
        let started = Instant::now();
        let result = self.cast_vote_inner(poll_id, voter, candidate).await;
        self.metrics
            .record_cast_duration(started.elapsed().as_secs_f64());

        match &result {
            Ok(receipt) => {
                self.metrics.record_committed();
                tracing::info!(
                    poll_id = %poll_id,
                    voter = %voter,
                    index = receipt.block_index,
                    "Vote committed"
                );
            }
            Err(e) => {
                self.metrics.record_rejected(rejection_reason(e));
                match e.kind() {
                    ErrorKind::Conflict | ErrorKind::Validation | ErrorKind::NotFound => {
                        tracing::debug!(poll_id = %poll_id, voter = %voter, error = %e, "Vote refused")
                    }
                    ErrorKind::Integrity => {
                        tracing::error!(poll_id = %poll_id, error = %e, "Vote refused on damaged ledger")
                    }
                    ErrorKind::Transient | ErrorKind::Internal => {
                        tracing::warn!(poll_id = %poll_id, voter = %voter, error = %e, "Vote failed")
                    }
                }
                if let Error::BlockConflict { .. } = e {
                    self.metrics.record_conflict();
                }
            }
        }

        result
    }

    async fn cast_vote_inner(
        &self,
        poll_id: &PollId,
        voter: &VoterId,
        candidate: &str,
    ) -> Result<VoteReceipt> {
        let poll = self.get_poll(poll_id)?;

        if !poll.has_candidate(candidate) {
            return Err(Error::InvalidCandidate {
                poll_id: poll_id.to_string(),
                candidate: candidate.to_string(),
            });
        }

        let handle = self.handle_for(poll);
        let result = handle.cast_vote(voter.clone(), candidate.to_string()).await;

        if let Err(Error::Concurrency(_)) = &result {
            // Actor is gone; the next call spawns a fresh one
            self.actors.remove(poll_id);
        }

        result
    }

    fn handle_for(&self, poll: Poll) -> PollHandle {
        if let Some(handle) = self.actors.get(&poll.id) {
            return handle.value().clone();
        }

        self.actors
            .entry(poll.id.clone())
            .or_insert_with(|| {
                spawn_poll_actor(
                    poll,
                    self.store.clone(),
                    self.quarantine.clone(),
                    self.metrics.clone(),
                    &self.config,
                )
            })
            .value()
            .clone()
    }

    fn check_quarantine(&self, poll_id: &PollId) -> Result<()> {
        match self.quarantine.get(poll_id) {
            Some(entry) => {
                let (index, kind) = *entry.value();
                Err(quarantine_error(poll_id, index, kind))
            }
            None => Ok(()),
        }
    }

    /// Current tally of a poll
    ///
    /// Refused with an integrity error while the poll is quarantined.
    pub fn get_tally(&self, poll_id: &PollId) -> Result<Tally> {
        self.check_quarantine(poll_id)?;
        self.store.get_tally(poll_id)
    }

    /// Vote record of a voter, if they have voted
    pub fn vote_record(&self, poll_id: &PollId, voter: &VoterId) -> Result<Option<VoteRecord>> {
        self.get_poll(poll_id)?;
        self.store.get_vote_record(poll_id, voter)
    }

    /// Snapshot of a poll's persisted ledger
    pub fn ledger(&self, poll_id: &PollId) -> Result<Vec<Block>> {
        self.get_poll(poll_id)?;
        self.store.load_blocks(poll_id)
    }

    /// Verify a poll's ledger from a snapshot
    ///
    /// A failure quarantines the poll: votes and tally reads are refused
    /// until the store is repaired and the process restarted.
    pub fn verify_ledger(&self, poll_id: &PollId) -> Result<VerificationResult> {
        let result = match self.ledger(poll_id) {
            Ok(blocks) => verify(&blocks),
            Err(Error::Integrity { index, kind, .. }) => VerificationResult::Invalid { index, kind },
            Err(e) => return Err(e),
        };

        if let VerificationResult::Invalid { index, kind } = result {
            self.metrics.record_integrity_failure();
            self.quarantine.insert(poll_id.clone(), (index, kind));
            tracing::error!(
                poll_id = %poll_id,
                index,
                kind = %kind,
                "Ledger failed verification, poll quarantined"
            );
        } else {
            tracing::debug!(poll_id = %poll_id, result = ?result, "Ledger verified");
        }

        Ok(result)
    }

    /// Verify the ledger and recount the tally, serialized with the poll's writes
    pub async fn audit_poll(&self, poll_id: &PollId) -> Result<AuditReport> {
        let poll = self.get_poll(poll_id)?;
        let report = self.handle_for(poll).audit().await?;

        // Chain failures are counted by the actor when it quarantines
        if report.verification.is_valid() && !report.tally_consistent() {
            self.metrics.record_integrity_failure();
            tracing::error!(
                poll_id = %poll_id,
                stored = report.stored_tally.total(),
                recounted = report.recounted_tally.total(),
                "Stored tally disagrees with ledger"
            );
        }

        Ok(report)
    }

    /// Audit every poll in the store
    ///
    /// A poll that cannot be audited gets its error in place of a report;
    /// the remaining polls are still audited.
    pub async fn audit_all(&self) -> Result<Vec<(PollId, Result<AuditReport>)>> {
        let mut audits = Vec::new();
        for poll in self.store.list_polls()? {
            let audit = self.audit_poll(&poll.id).await;
            if let Err(e) = &audit {
                tracing::error!(poll_id = %poll.id, error = %e, "Poll audit failed");
            }
            audits.push((poll.id, audit));
        }
        Ok(audits)
    }

    /// Stop every poll actor
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<PollHandle> = self.actors.iter().map(|e| e.value().clone()).collect();
        self.actors.clear();

        for handle in handles {
            handle.shutdown().await?;
        }

        tracing::info!("Vote coordinator shut down");
        Ok(())
    }
}

fn validate_new_poll(new_poll: &NewPoll) -> Result<()> {
    if new_poll.id.as_str().trim().is_empty() {
        return Err(Error::InvalidPoll("poll id is empty".to_string()));
    }
    if new_poll.name.trim().is_empty() {
        return Err(Error::InvalidPoll("poll name is empty".to_string()));
    }
    if new_poll.candidates.is_empty() {
        return Err(Error::InvalidPoll("poll has no candidates".to_string()));
    }

    let mut seen = HashSet::new();
    for candidate in &new_poll.candidates {
        if candidate.trim().is_empty() {
            return Err(Error::InvalidPoll("candidate name is empty".to_string()));
        }
        if !seen.insert(candidate.as_str()) {
            return Err(Error::InvalidPoll(format!("duplicate candidate {:?}", candidate)));
        }
    }

    Ok(())
}

fn rejection_reason(error: &Error) -> &'static str {
    match error {
        Error::AlreadyVoted { .. } => "already_voted",
        Error::PollNotFound(_) => "poll_not_found",
        Error::InvalidCandidate { .. } => "invalid_candidate",
        Error::BlockConflict { .. } => "conflict",
        Error::Integrity { .. } => "integrity",
        e if e.is_retryable() => "transient",
        _ => "internal",
    }
}
