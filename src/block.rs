//! Block construction, transaction commitment and persisted encoding

use crate::constants::*;
use crate::crypto::sha256;
use crate::error::Result;
use crate::stake;
use crate::types::*;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

impl Block {
    /// NewBlock: 𝒯𝒳* × ℍ × ℤ → ℬ
    ///
    /// Stamps the current time and computes the hash through the stake gate.
    /// The gate outcome is only reported; the block is always produced.
    pub fn new(transactions: Vec<Transaction>, prev_block_hash: ByteString, stake: i64) -> Self {
        Self::with_timestamp(transactions, prev_block_hash, stake, unix_now())
    }

    /// Same as [`Block::new`] with an explicit timestamp
    pub fn with_timestamp(
        transactions: Vec<Transaction>,
        prev_block_hash: ByteString,
        stake: i64,
        timestamp: i64,
    ) -> Self {
        let mut block = Block {
            timestamp,
            transactions,
            prev_block_hash,
            hash: [0u8; 32],
            stake,
        };
        block.hash = stake::run(&block);
        block
    }

    /// Genesis block holding only `coinbase`
    pub fn genesis(coinbase: Transaction) -> Self {
        Self::genesis_with_stake(coinbase, GENESIS_STAKE)
    }

    pub fn genesis_with_stake(coinbase: Transaction, stake: i64) -> Self {
        Block::new(vec![coinbase], Vec::new(), stake)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// HashTransactions: 𝒯𝒳* → ℍ
    ///
    /// SHA256 over the concatenated transaction ids, in block order. Flat rather
    /// than a Merkle tree: reordering any two transactions changes the result.
    pub fn hash_transactions(&self) -> Hash {
        let mut ids = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            ids.extend_from_slice(&tx.id);
        }
        sha256(&ids)
    }

    /// Persisted record form
    pub fn serialize(&self) -> Result<ByteString> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Block {} ============", hex::encode(self.hash))?;
        writeln!(f, "Prev. block: {}", hex::encode(&self.prev_block_hash))?;
        writeln!(f, "Stake: {}", self.stake)?;
        writeln!(f, "PoS: {}", stake::validate(self))?;
        writeln!(f)?;
        for tx in &self.transactions {
            write!(f, "{}", tx)?;
        }
        Ok(())
    }
}
