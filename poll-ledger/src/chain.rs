//! Per-poll hash chain
//!
//! Every poll owns one chain: a genesis block at index 0 followed by one
//! block per vote. Block `i` stores the hash of block `i - 1`, so rewriting
//! any block changes every hash after it.
//!
//! Building a block never touches shared state. The owner persists the block
//! first and only then extends its in-memory view with [`Chain::push`].

use crate::types::{Block, Payload};
use chrono::Utc;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Fixed genesis block; identical for every poll
pub fn create_genesis() -> Block {
    Block::new(0, 0, Payload::Genesis, GENESIS_PREVIOUS_HASH.to_string())
}

/// Build the block that would follow `chain`
///
/// The timestamp never goes backwards relative to the tip, even if the
/// wall clock does.
pub fn append(chain: &[Block], payload: Payload) -> Block {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    match chain.last() {
        Some(tip) => Block::new(
            chain.len() as u64,
            now.max(tip.timestamp_nanos),
            payload,
            tip.hash.clone(),
        ),
        None => Block::new(0, now, payload, GENESIS_PREVIOUS_HASH.to_string()),
    }
}

/// In-memory view of one poll's ledger
#[derive(Debug, Clone, Default)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    /// Hydrate from persisted blocks, already sorted by index
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Nothing persisted yet; owner must bootstrap genesis
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks including genesis
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Latest block
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// All blocks in index order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Build the next block without extending the chain
    pub fn next_block(&self, payload: Payload) -> Block {
        append(&self.blocks, payload)
    }

    /// Extend with a block that has already been persisted
    ///
    /// Returns false (and leaves the chain untouched) if the block does not
    /// link onto the current tip.
    pub fn push(&mut self, block: Block) -> bool {
        let links = match self.blocks.last() {
            Some(tip) => block.index == tip.index + 1 && block.previous_hash == tip.hash,
            None => block.index == 0 && block.previous_hash == GENESIS_PREVIOUS_HASH,
        };
        if links {
            self.blocks.push(block);
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VoterId;

    #[test]
    fn test_genesis_is_deterministic() {
        let a = create_genesis();
        let b = create_genesis();
        assert_eq!(a, b);
        assert_eq!(a.index, 0);
        assert_eq!(a.previous_hash, "0");
        assert_eq!(a.payload, Payload::Genesis);
    }

    #[test]
    fn test_append_links_to_tip() {
        let mut chain = Chain::from_blocks(vec![create_genesis()]);

        for voter in ["alice", "bob", "carol"] {
            let block = chain.next_block(Payload::vote(VoterId::new(voter), "Jane Doe"));
            assert_eq!(block.index, chain.len() as u64);
            assert_eq!(block.previous_hash, chain.tip().unwrap().hash);
            assert!(block.timestamp_nanos >= chain.tip().unwrap().timestamp_nanos);
            assert!(chain.push(block));
        }

        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_next_block_does_not_mutate() {
        let chain = Chain::from_blocks(vec![create_genesis()]);
        let _ = chain.next_block(Payload::vote(VoterId::new("alice"), "Bob Smith"));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_push_rejects_stale_block() {
        let mut chain = Chain::from_blocks(vec![create_genesis()]);
        let first = chain.next_block(Payload::vote(VoterId::new("alice"), "Bob Smith"));
        let racing = chain.next_block(Payload::vote(VoterId::new("bob"), "Bob Smith"));

        assert!(chain.push(first));
        assert!(!chain.push(racing));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_empty_chain_accepts_only_genesis_linkage() {
        let mut chain = Chain::default();
        assert!(chain.is_empty());
        assert!(chain.push(create_genesis()));
        assert_eq!(chain.tip().unwrap().index, 0);
    }
}
