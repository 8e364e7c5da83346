//! Hash chain verification
//!
//! A pure scan over a snapshot of blocks. Reports the first failing block
//! and why it failed, so a tampered ledger can be located.
//!
//! The chain only detects edits that leave later blocks alone. Anyone with
//! write access to the whole store can rewrite a suffix consistently; there
//! are no signatures or external anchors.

use crate::chain::create_genesis;
use crate::types::Block;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a block failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stored hash differs from the recomputed one
    HashMismatch,
    /// `previous_hash` differs from the predecessor's hash
    LinkageMismatch,
    /// Block index differs from its position
    IndexMismatch,
    /// Block 0 is not the canonical genesis block
    GenesisMismatch,
    /// Stored bytes no longer decode as a block
    Undecodable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::HashMismatch => "hash mismatch",
            FailureKind::LinkageMismatch => "linkage mismatch",
            FailureKind::IndexMismatch => "index mismatch",
            FailureKind::GenesisMismatch => "genesis mismatch",
            FailureKind::Undecodable => "undecodable block",
        };
        f.write_str(s)
    }
}

/// Outcome of verifying one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationResult {
    /// Every block checks out
    Valid {
        /// Blocks scanned
        length: u64,
    },
    /// First failing block
    Invalid {
        /// Position of the failing block
        index: u64,
        /// Failure kind
        kind: FailureKind,
    },
}

impl VerificationResult {
    /// Chain passed
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid { .. })
    }
}

/// Verify a chain end-to-end
pub fn verify(chain: &[Block]) -> VerificationResult {
    let Some(first) = chain.first() else {
        return VerificationResult::Valid { length: 0 };
    };

    if *first != create_genesis() {
        return VerificationResult::Invalid {
            index: 0,
            kind: FailureKind::GenesisMismatch,
        };
    }

    for (i, pair) in chain.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        let position = i as u64 + 1;

        let kind = if current.index != position {
            Some(FailureKind::IndexMismatch)
        } else if !current.verify_hash() {
            Some(FailureKind::HashMismatch)
        } else if current.previous_hash != previous.hash {
            Some(FailureKind::LinkageMismatch)
        } else {
            None
        };

        if let Some(kind) = kind {
            return VerificationResult::Invalid {
                index: position,
                kind,
            };
        }
    }

    VerificationResult::Valid {
        length: chain.len() as u64,
    }
}
