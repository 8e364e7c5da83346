//! Per-poll single-writer actors
//!
//! Each poll gets one Tokio task that owns the cached chain for that poll
//! and commits votes strictly one at a time. Polls never share an actor, so
//! votes for different polls do not wait on each other.
//!
//! ```text
//!   cast_vote (many callers)
//!          │
//!          ▼
//!   PollHandle (Clone) ── mpsc (bounded) ──▶ PollActor (one task per poll)
//!                                               │ cached Chain
//!                                               ▼
//!                                     LedgerStore::commit_vote
//!                               (record + block + tally in one write)
//! ```
//!
//! The store's conditional commit still decides races with writers outside
//! this process: an index conflict drops the cached chain, reloads it and
//! tries again.

use crate::chain::{create_genesis, Chain};
use crate::config::CoordinatorConfig;
use crate::metrics::Metrics;
use crate::storage::{AppendOutcome, CommitOutcome, LedgerStore};
use crate::types::{Block, Payload, Poll, PollId, Tally, VoteReceipt, VoteRecord, VoterId};
use crate::verify::{verify, FailureKind, VerificationResult};
use crate::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Polls whose ledger failed verification, with the first failing block
pub(crate) type QuarantineMap = Arc<DashMap<PollId, (u64, FailureKind)>>;

/// Integrity error for a quarantined poll
pub(crate) fn quarantine_error(poll_id: &PollId, index: u64, kind: FailureKind) -> Error {
    Error::Integrity {
        poll_id: poll_id.to_string(),
        index,
        kind,
    }
}

/// Result of auditing one poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// Poll audited
    pub poll_id: PollId,
    /// Chain verification outcome
    pub verification: VerificationResult,
    /// Tally as stored
    pub stored_tally: Tally,
    /// Tally recounted from the ledger
    pub recounted_tally: Tally,
}

impl AuditReport {
    /// Stored tally agrees with the ledger
    pub fn tally_consistent(&self) -> bool {
        self.stored_tally == self.recounted_tally
    }

    /// Chain verifies and tally agrees
    pub fn is_healthy(&self) -> bool {
        self.verification.is_valid() && self.tally_consistent()
    }
}

/// Message sent to a poll actor
#[derive(Debug)]
pub enum PollMessage {
    /// Commit one vote
    CastVote {
        /// Voter casting
        voter: VoterId,
        /// Chosen candidate, already checked against the poll
        candidate: String,
        /// Reply channel
        response: oneshot::Sender<Result<VoteReceipt>>,
    },

    /// Verify the chain and recount the tally between writes
    Audit {
        /// Reply channel
        response: oneshot::Sender<Result<AuditReport>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor owning one poll's write path
pub struct PollActor {
    poll: Poll,
    store: Arc<dyn LedgerStore>,
    mailbox: mpsc::Receiver<PollMessage>,
    chain: Option<Chain>,
    quarantine: QuarantineMap,
    metrics: Metrics,
    max_commit_attempts: u32,
    verify_on_load: bool,
}

impl fmt::Debug for PollActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollActor")
            .field("poll_id", &self.poll.id)
            .field("cached_blocks", &self.chain.as_ref().map(Chain::len))
            .field("max_commit_attempts", &self.max_commit_attempts)
            .field("verify_on_load", &self.verify_on_load)
            .finish_non_exhaustive()
    }
}

impl PollActor {
    /// Create new actor
    pub(crate) fn new(
        poll: Poll,
        store: Arc<dyn LedgerStore>,
        mailbox: mpsc::Receiver<PollMessage>,
        quarantine: QuarantineMap,
        metrics: Metrics,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            poll,
            store,
            mailbox,
            chain: None,
            quarantine,
            metrics,
            max_commit_attempts: config.max_commit_attempts.max(1),
            verify_on_load: config.verify_on_load,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                PollMessage::CastVote {
                    voter,
                    candidate,
                    response,
                } => {
                    let result = self.cast_vote(voter, candidate);
                    let _ = response.send(result);
                }
                PollMessage::Audit { response } => {
                    let _ = response.send(self.audit());
                }
                PollMessage::Shutdown => break,
            }
        }

        tracing::debug!(poll_id = %self.poll.id, "Poll actor stopped");
    }

    fn check_quarantine(&self) -> Result<()> {
        match self.quarantine.get(&self.poll.id) {
            Some(entry) => {
                let (index, kind) = *entry.value();
                Err(quarantine_error(&self.poll.id, index, kind))
            }
            None => Ok(()),
        }
    }

    fn quarantine(&mut self, index: u64, kind: FailureKind) -> Error {
        tracing::error!(
            poll_id = %self.poll.id,
            index,
            kind = %kind,
            "Ledger failed verification, poll quarantined"
        );
        self.metrics.record_integrity_failure();
        self.chain = None;
        self.quarantine.insert(self.poll.id.clone(), (index, kind));
        quarantine_error(&self.poll.id, index, kind)
    }

    /// Persisted blocks; blocks that no longer decode quarantine the poll
    fn load_blocks(&mut self) -> Result<Vec<Block>> {
        match self.store.load_blocks(&self.poll.id) {
            Err(Error::Integrity { index, kind, .. }) => Err(self.quarantine(index, kind)),
            other => other,
        }
    }

    /// Cached chain, loading (and bootstrapping genesis) if needed
    fn chain(&mut self) -> Result<&mut Chain> {
        if self.chain.is_none() {
            let mut blocks = self.load_blocks()?;

            if blocks.is_empty() {
                let genesis = create_genesis();
                match self.store.append_block(&self.poll.id, &genesis)? {
                    AppendOutcome::Appended => {
                        tracing::info!(poll_id = %self.poll.id, "Genesis block created");
                        blocks.push(genesis);
                    }
                    // Another writer bootstrapped first
                    AppendOutcome::Conflict => blocks = self.load_blocks()?,
                }
            }

            if self.verify_on_load {
                if let VerificationResult::Invalid { index, kind } = verify(&blocks) {
                    return Err(self.quarantine(index, kind));
                }
            }

            tracing::debug!(poll_id = %self.poll.id, length = blocks.len(), "Chain loaded");
            self.chain = Some(Chain::from_blocks(blocks));
        }

        self.chain
            .as_mut()
            .ok_or_else(|| Error::Concurrency("chain cache unavailable".to_string()))
    }

    fn cast_vote(&mut self, voter: VoterId, candidate: String) -> Result<VoteReceipt> {
        self.check_quarantine()?;

        let result = self.try_cast_vote(voter, candidate);
        if let Err(e) = &result {
            if e.is_retryable() {
                // The write may or may not have landed; reload before the next one
                self.chain = None;
            }
        }
        result
    }

    fn try_cast_vote(&mut self, voter: VoterId, candidate: String) -> Result<VoteReceipt> {
        let poll_id = self.poll.id.clone();
        let already_voted = || Error::AlreadyVoted {
            poll_id: poll_id.to_string(),
            voter: voter.to_string(),
        };

        if self.store.get_vote_record(&poll_id, &voter)?.is_some() {
            return Err(already_voted());
        }

        let mut contested_index = 0;

        for attempt in 1..=self.max_commit_attempts {
            let store = Arc::clone(&self.store);
            let chain = self.chain()?;
            let block = chain.next_block(Payload::vote(voter.clone(), candidate.clone()));
            let record = VoteRecord {
                voter: voter.clone(),
                candidate: candidate.clone(),
                block_index: block.index,
                recorded_at: Utc::now(),
            };

            match store.commit_vote(&poll_id, &block, &record)? {
                CommitOutcome::Committed => {
                    let receipt = VoteReceipt {
                        poll_id: poll_id.clone(),
                        voter: voter.clone(),
                        candidate: candidate.clone(),
                        block_index: block.index,
                        block_hash: block.hash.clone(),
                    };
                    if !chain.push(block) {
                        self.chain = None;
                    }
                    return Ok(receipt);
                }
                CommitOutcome::AlreadyVoted => return Err(already_voted()),
                CommitOutcome::Conflict => {
                    tracing::warn!(
                        poll_id = %poll_id,
                        index = block.index,
                        attempt,
                        "Block index taken by another writer, reloading chain"
                    );
                    contested_index = block.index;
                    self.chain = None;
                }
            }
        }

        Err(Error::BlockConflict {
            poll_id: poll_id.to_string(),
            index: contested_index,
        })
    }

    fn audit(&mut self) -> Result<AuditReport> {
        let stored_tally = self.store.get_tally(&self.poll.id)?;

        // An unreadable ledger recounts to zero
        let (verification, recounted_tally) = match self.store.load_blocks(&self.poll.id) {
            Ok(blocks) => (
                verify(&blocks),
                Tally::from_blocks(&self.poll.candidates, &blocks),
            ),
            Err(Error::Integrity { index, kind, .. }) => (
                VerificationResult::Invalid { index, kind },
                Tally::zeroed(&self.poll.candidates),
            ),
            Err(e) => return Err(e),
        };

        if let VerificationResult::Invalid { index, kind } = verification {
            let _ = self.quarantine(index, kind);
        }

        Ok(AuditReport {
            poll_id: self.poll.id.clone(),
            verification,
            stored_tally,
            recounted_tally,
        })
    }
}

/// Handle for sending messages to a poll actor
#[derive(Debug, Clone)]
pub struct PollHandle {
    sender: mpsc::Sender<PollMessage>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PollHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<PollMessage>, task: JoinHandle<()>) -> Self {
        Self {
            sender,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Cast a vote through the actor
    pub async fn cast_vote(&self, voter: VoterId, candidate: String) -> Result<VoteReceipt> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollMessage::CastVote {
                voter,
                candidate,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Audit the poll between writes
    pub async fn audit(&self) -> Result<AuditReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollMessage::Audit { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor and wait for it to release the store
    ///
    /// Messages already queued are handled first.
    pub async fn shutdown(&self) -> Result<()> {
        // A closed mailbox means the actor already exited
        let _ = self.sender.send(PollMessage::Shutdown).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::Concurrency(format!("Poll actor panicked: {e}")))?;
        }
        Ok(())
    }
}

/// Spawn the actor for one poll
pub(crate) fn spawn_poll_actor(
    poll: Poll,
    store: Arc<dyn LedgerStore>,
    quarantine: QuarantineMap,
    metrics: Metrics,
    config: &CoordinatorConfig,
) -> PollHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let actor = PollActor::new(poll, store, rx, quarantine, metrics, config);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    PollHandle::new(tx, task)
}
