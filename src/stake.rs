//! Stake gate: block hashing and the local stake admission check
//!
//! Not a consensus mechanism. There is no leader election and no slashing; a
//! block is admitted when its declared stake clears a fixed threshold.

use crate::constants::*;
use crate::crypto::{int_to_bytes, sha256};
use crate::types::*;
use tracing::{info, warn};

/// PrepareData: ℬ → 𝕊
///
/// prev_block_hash ‖ HashTransactions(b) ‖ BE64(b.timestamp)
pub fn prepare_data(block: &Block) -> ByteString {
    let tx_hash = block.hash_transactions();
    let mut data = Vec::with_capacity(block.prev_block_hash.len() + 32 + 8);
    data.extend_from_slice(&block.prev_block_hash);
    data.extend_from_slice(&tx_hash);
    data.extend_from_slice(&int_to_bytes(block.timestamp));
    data
}

/// ComputeHash: ℬ → ℍ
pub fn compute_hash(block: &Block) -> Hash {
    sha256(&prepare_data(block))
}

/// Accept: ℬ → {true, false}
///
/// True iff b.stake > 50. The threshold itself is rejected.
pub fn accept(block: &Block) -> bool {
    accept_stake(block.stake)
}

pub fn accept_stake(stake: i64) -> bool {
    stake > STAKE_THRESHOLD
}

/// Hash a block under construction and report the gate outcome.
///
/// The hash is returned whatever the outcome.
pub(crate) fn run(block: &Block) -> Hash {
    let hash = compute_hash(block);
    if accept(block) {
        info!(hash = %hex::encode(hash), stake = block.stake, "block accepted by stake gate");
    } else {
        warn!(hash = %hex::encode(hash), stake = block.stake, "block rejected due to insufficient stake");
    }
    hash
}

/// Validate: ℬ → {true, false}
///
/// Audit a stored block: its hash must match its content and its stake must
/// clear the threshold.
pub fn validate(block: &Block) -> bool {
    compute_hash(block) == block.hash && accept(block)
}
