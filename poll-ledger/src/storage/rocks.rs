//! RocksDB-backed store
//!
//! # Column Families
//!
//! - `polls` - Poll definitions (key: poll_id)
//! - `blocks` - Hash chains (key: poll prefix || index as u64 BE)
//! - `votes` - Vote records (key: poll prefix || voter_id)
//! - `tallies` - Vote counts (key: poll prefix || candidate)
//!
//! Multi-key writes go through one `WriteBatch`. Conditional writes hold
//! their poll's lock across the existence checks and the batch; every key
//! carries the poll prefix, so polls never contend with each other.

use super::{
    block_key, poll_prefix, suffixed_key, AppendOutcome, ClaimOutcome, CommitOutcome,
    LedgerStore,
};
use crate::{
    error::{Error, Result},
    types::{Block, Poll, PollId, Tally, VoteRecord, VoterId},
    verify::FailureKind,
    Config,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Column family names
const CF_POLLS: &str = "polls";
const CF_BLOCKS: &str = "blocks";
const CF_VOTES: &str = "votes";
const CF_TALLIES: &str = "tallies";

/// Storage wrapper for RocksDB
pub struct RocksStore {
    db: Arc<DB>,
    path: PathBuf,
    write_locks: DashMap<PollId, Arc<Mutex<()>>>,
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.path)
            .field("locked_polls", &self.write_locks.len())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_POLLS, Self::cf_options_small()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_VOTES, Self::cf_options_votes()),
            ColumnFamilyDescriptor::new(CF_TALLIES, Self::cf_options_small()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB poll store");

        Ok(Self {
            db: Arc::new(db),
            path: path.clone(),
            write_locks: DashMap::new(),
        })
    }

    // Column family options

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_votes() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Eligibility checks are point lookups
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_small() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    /// Lock serializing conditional writes to one poll's keys
    fn poll_lock(&self, poll_id: &PollId) -> Arc<Mutex<()>> {
        self.write_locks.entry(poll_id.clone()).or_default().clone()
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Transient(format!("Column family {} not found", name)))
    }

    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn exists(&self, cf: &ColumnFamily, key: &[u8]) -> Result<bool> {
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    fn read_count(&self, cf: &ColumnFamily, key: &[u8]) -> Result<u64> {
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(0),
        }
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl LedgerStore for RocksStore {
    fn put_poll(&self, poll: &Poll) -> Result<bool> {
        let cf_polls = self.cf_handle(CF_POLLS)?;
        let cf_tallies = self.cf_handle(CF_TALLIES)?;
        let lock = self.poll_lock(&poll.id);
        let _guard = lock.lock();

        let key = poll.id.as_str().as_bytes();
        if self.exists(cf_polls, key)? {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_polls, key, bincode::serialize(poll)?);
        let zero = bincode::serialize(&0u64)?;
        for candidate in &poll.candidates {
            batch.put_cf(cf_tallies, suffixed_key(&poll.id, candidate), &zero);
        }
        self.db.write(batch)?;

        Ok(true)
    }

    fn get_poll(&self, poll_id: &PollId) -> Result<Option<Poll>> {
        let cf = self.cf_handle(CF_POLLS)?;
        match self.db.get_cf(cf, poll_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn list_polls(&self) -> Result<Vec<Poll>> {
        let cf = self.cf_handle(CF_POLLS)?;
        let mut polls = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            polls.push(bincode::deserialize(&value)?);
        }
        Ok(polls)
    }

    fn load_blocks(&self, poll_id: &PollId) -> Result<Vec<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let prefix = poll_prefix(poll_id);
        self.scan_prefix(cf, &prefix)?
            .iter()
            .enumerate()
            .map(|(position, (key, value))| {
                bincode::deserialize::<Block>(value).map_err(|e| {
                    let index = <[u8; 8]>::try_from(&key[prefix.len()..])
                        .map(u64::from_be_bytes)
                        .unwrap_or(position as u64);
                    tracing::error!(
                        poll_id = %poll_id,
                        index,
                        error = %e,
                        "Stored block does not decode"
                    );
                    Error::Integrity {
                        poll_id: poll_id.to_string(),
                        index,
                        kind: FailureKind::Undecodable,
                    }
                })
            })
            .collect()
    }

    fn append_block(&self, poll_id: &PollId, block: &Block) -> Result<AppendOutcome> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let key = block_key(poll_id, block.index);
        let lock = self.poll_lock(poll_id);
        let _guard = lock.lock();

        if self.exists(cf, &key)? {
            return Ok(AppendOutcome::Conflict);
        }
        self.db.put_cf(cf, &key, bincode::serialize(block)?)?;

        tracing::debug!(poll_id = %poll_id, index = block.index, "Block appended");

        Ok(AppendOutcome::Appended)
    }

    fn get_vote_record(&self, poll_id: &PollId, voter: &VoterId) -> Result<Option<VoteRecord>> {
        let cf = self.cf_handle(CF_VOTES)?;
        match self.db.get_cf(cf, suffixed_key(poll_id, voter.as_str()))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn create_vote_record_if_absent(
        &self,
        poll_id: &PollId,
        record: &VoteRecord,
    ) -> Result<ClaimOutcome> {
        let cf = self.cf_handle(CF_VOTES)?;
        let key = suffixed_key(poll_id, record.voter.as_str());
        let lock = self.poll_lock(poll_id);
        let _guard = lock.lock();

        if self.exists(cf, &key)? {
            return Ok(ClaimOutcome::AlreadyExists);
        }
        self.db.put_cf(cf, &key, bincode::serialize(record)?)?;
        Ok(ClaimOutcome::Created)
    }

    fn increment_tally(&self, poll_id: &PollId, candidate: &str, delta: u64) -> Result<()> {
        let cf = self.cf_handle(CF_TALLIES)?;
        let key = suffixed_key(poll_id, candidate);
        let lock = self.poll_lock(poll_id);
        let _guard = lock.lock();

        if self.get_poll(poll_id)?.is_none() {
            return Err(Error::PollNotFound(poll_id.to_string()));
        }
        let count = self.read_count(cf, &key)? + delta;
        self.db.put_cf(cf, &key, bincode::serialize(&count)?)?;
        Ok(())
    }

    fn get_tally(&self, poll_id: &PollId) -> Result<Tally> {
        if self.get_poll(poll_id)?.is_none() {
            return Err(Error::PollNotFound(poll_id.to_string()));
        }
        let cf = self.cf_handle(CF_TALLIES)?;
        let prefix = poll_prefix(poll_id);
        self.scan_prefix(cf, &prefix)?
            .iter()
            .map(|(key, value)| -> Result<(String, u64)> {
                let candidate = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
                Ok((candidate, bincode::deserialize::<u64>(value)?))
            })
            .collect()
    }

    fn commit_vote(
        &self,
        poll_id: &PollId,
        block: &Block,
        record: &VoteRecord,
    ) -> Result<CommitOutcome> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_votes = self.cf_handle(CF_VOTES)?;
        let cf_tallies = self.cf_handle(CF_TALLIES)?;

        let vote_key = suffixed_key(poll_id, record.voter.as_str());
        let block_key = block_key(poll_id, block.index);
        let tally_key = suffixed_key(poll_id, &record.candidate);

        let lock = self.poll_lock(poll_id);
        let _guard = lock.lock();

        if self.exists(cf_votes, &vote_key)? {
            return Ok(CommitOutcome::AlreadyVoted);
        }
        if self.exists(cf_blocks, &block_key)? {
            return Ok(CommitOutcome::Conflict);
        }
        let count = self.read_count(cf_tallies, &tally_key)? + 1;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, &block_key, bincode::serialize(block)?);
        batch.put_cf(cf_tallies, &tally_key, bincode::serialize(&count)?);
        batch.put_cf(cf_votes, &vote_key, bincode::serialize(record)?);
        self.db.write(batch)?;

        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{append, create_genesis};
    use crate::types::Payload;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn test_poll(id: &str) -> Poll {
        Poll {
            id: PollId::new(id),
            name: id.to_string(),
            candidates: vec!["Bob Smith".to_string(), "Jane Doe".to_string()],
            closing_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            created_by: "admin@x.com".to_string(),
            created_at: Utc::now(),
        }
    }

    fn record(voter: &str, candidate: &str, index: u64) -> VoteRecord {
        VoteRecord {
            voter: VoterId::new(voter),
            candidate: candidate.to_string(),
            block_index: index,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        assert!(store.db.cf_handle(CF_BLOCKS).is_some());
        assert!(store.db.cf_handle(CF_VOTES).is_some());
    }

    #[test]
    fn test_poll_and_tally() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let poll = test_poll("Election1");

        assert!(store.put_poll(&poll).unwrap());
        assert!(!store.put_poll(&poll).unwrap());
        assert_eq!(store.get_poll(&poll.id).unwrap(), Some(poll.clone()));

        store.increment_tally(&poll.id, "Jane Doe", 2).unwrap();
        let tally = store.get_tally(&poll.id).unwrap();
        assert_eq!(tally.get("Bob Smith"), 0);
        assert_eq!(tally.get("Jane Doe"), 2);

        assert!(matches!(
            store.get_tally(&PollId::new("NoSuchPoll")),
            Err(Error::PollNotFound(_))
        ));
    }

    #[test]
    fn test_blocks_are_scoped_per_poll() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let a = PollId::new("a");
        let ab = PollId::new("ab");

        let mut chain = vec![create_genesis()];
        for voter in ["v1", "v2", "v3"] {
            let block = append(&chain, Payload::vote(VoterId::new(voter), "Bob Smith"));
            chain.push(block);
        }
        for block in &chain {
            assert_eq!(store.append_block(&a, block).unwrap(), AppendOutcome::Appended);
        }
        store.append_block(&ab, &create_genesis()).unwrap();

        assert_eq!(store.load_blocks(&a).unwrap(), chain);
        assert_eq!(store.load_blocks(&ab).unwrap().len(), 1);
        assert_eq!(
            store.append_block(&a, &chain[2]).unwrap(),
            AppendOutcome::Conflict
        );
    }

    #[test]
    fn test_commit_vote_atomic() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let poll = test_poll("Election1");
        store.put_poll(&poll).unwrap();
        store.append_block(&poll.id, &create_genesis()).unwrap();

        let chain = store.load_blocks(&poll.id).unwrap();
        let block = append(&chain, Payload::vote(VoterId::new("alice@x.com"), "Bob Smith"));
        let alice = record("alice@x.com", "Bob Smith", 1);

        assert_eq!(
            store.commit_vote(&poll.id, &block, &alice).unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_vote(&poll.id, &block, &alice).unwrap(),
            CommitOutcome::AlreadyVoted
        );
        let bob = record("bob@x.com", "Jane Doe", 1);
        assert_eq!(
            store.commit_vote(&poll.id, &block, &bob).unwrap(),
            CommitOutcome::Conflict
        );

        assert_eq!(store.load_blocks(&poll.id).unwrap().len(), 2);
        assert_eq!(store.get_tally(&poll.id).unwrap().total(), 1);
        assert!(store
            .get_vote_record(&poll.id, &VoterId::new("bob@x.com"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let (config, _temp) = test_config();
        let poll = test_poll("Election1");
        {
            let store = RocksStore::open(&config).unwrap();
            store.put_poll(&poll).unwrap();
            store.append_block(&poll.id, &create_genesis()).unwrap();
            store
                .create_vote_record_if_absent(&poll.id, &record("alice@x.com", "Jane Doe", 1))
                .unwrap();
            store.close().unwrap();
        }

        let store = RocksStore::open(&config).unwrap();
        assert_eq!(store.list_polls().unwrap(), vec![poll.clone()]);
        assert_eq!(store.load_blocks(&poll.id).unwrap(), vec![create_genesis()]);
        assert_eq!(
            store
                .create_vote_record_if_absent(&poll.id, &record("alice@x.com", "Bob Smith", 2))
                .unwrap(),
            ClaimOutcome::AlreadyExists
        );
    }

    #[test]
    fn test_polls_do_not_share_a_lock() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let a = test_poll("Election1");
        let b = test_poll("Election2");
        store.put_poll(&a).unwrap();
        store.put_poll(&b).unwrap();

        // A writer stuck inside poll A leaves poll B writable
        let held = store.poll_lock(&a.id);
        let _guard = held.lock();

        store.append_block(&b.id, &create_genesis()).unwrap();
        let block = append(
            &store.load_blocks(&b.id).unwrap(),
            Payload::vote(VoterId::new("alice@x.com"), "Jane Doe"),
        );
        assert_eq!(
            store
                .commit_vote(&b.id, &block, &record("alice@x.com", "Jane Doe", 1))
                .unwrap(),
            CommitOutcome::Committed
        );
    }

    #[test]
    fn test_undecodable_block_is_integrity_error() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        let poll = test_poll("Election1");
        store.put_poll(&poll).unwrap();
        store.append_block(&poll.id, &create_genesis()).unwrap();

        let cf = store.cf_handle(CF_BLOCKS).unwrap();
        store
            .db
            .put_cf(cf, block_key(&poll.id, 1), b"\xff\xff")
            .unwrap();

        let err = store.load_blocks(&poll.id).unwrap_err();
        assert!(matches!(
            err,
            Error::Integrity {
                index: 1,
                kind: FailureKind::Undecodable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_block_quarantines_poll() {
        use crate::config::CoordinatorConfig;
        use crate::coordinator::VoteCoordinator;
        use crate::types::NewPoll;
        use crate::verify::VerificationResult;

        let (config, _temp) = test_config();
        let store = Arc::new(RocksStore::open(&config).unwrap());
        let coordinator =
            VoteCoordinator::new(store.clone(), CoordinatorConfig::default()).unwrap();

        for id in ["Election1", "Election2"] {
            coordinator
                .create_poll(NewPoll {
                    id: PollId::new(id),
                    name: id.to_string(),
                    candidates: vec!["Bob Smith".to_string(), "Jane Doe".to_string()],
                    closing_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                    created_by: "admin@x.com".to_string(),
                })
                .unwrap();
        }
        let damaged = PollId::new("Election1");
        coordinator
            .cast_vote(&damaged, &VoterId::new("alice@x.com"), "Bob Smith")
            .await
            .unwrap();

        let cf = store.cf_handle(CF_BLOCKS).unwrap();
        store
            .db
            .put_cf(cf, block_key(&damaged, 1), b"\xff\xff")
            .unwrap();

        assert_eq!(
            coordinator.verify_ledger(&damaged).unwrap(),
            VerificationResult::Invalid {
                index: 1,
                kind: FailureKind::Undecodable,
            }
        );
        assert!(matches!(
            coordinator.get_tally(&damaged),
            Err(Error::Integrity { index: 1, .. })
        ));

        // The damaged poll does not stop the audit of the next one
        let audits = coordinator.audit_all().await.unwrap();
        assert_eq!(audits.len(), 2);
        let (first_id, first) = &audits[0];
        assert_eq!(first_id, &damaged);
        assert!(!first.as_ref().unwrap().is_healthy());
        let (second_id, second) = &audits[1];
        assert_eq!(second_id.as_str(), "Election2");
        assert!(second.as_ref().unwrap().is_healthy());

        coordinator.shutdown().await.unwrap();
    }
}
