//! Core ledger types

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Locking hash: RIPEMD160(SHA256(public key))
pub type PubKeyHash = Vec<u8>;

/// Transaction Output: 𝒯 = ℤ × 𝕊
///
/// `pub_key_hash` is the locking condition; only the holder of the matching
/// public key can spend the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: i64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    pub fn new(value: i64, pub_key_hash: PubKeyHash) -> Self {
        Self { value, pub_key_hash }
    }

    /// Check whether the output is locked to `pub_key_hash`
    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

/// Transaction Input: ℐ = ℍ × ℕ × 𝕊 × 𝕊
///
/// `prev_tx_id` is empty for the single input of a coinbase transaction. For
/// coinbase inputs `public_key` carries arbitrary coinbase data instead of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_id: ByteString,
    pub output_index: u32,
    pub signature: ByteString,
    pub public_key: ByteString,
}

impl TxInput {
    /// Unsigned input spending output `output_index` of `prev_tx_id`
    pub fn new(prev_tx_id: Hash, output_index: u32, public_key: ByteString) -> Self {
        Self {
            prev_tx_id: prev_tx_id.to_vec(),
            output_index,
            signature: Vec::new(),
            public_key,
        }
    }
}

/// Transaction: 𝒯𝒳 = ℍ × ℐ* × 𝒯*
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// Block: ℬ = ℤ × 𝒯𝒳* × ℍ × ℍ × ℤ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_block_hash: ByteString,
    pub hash: Hash,
    pub stake: i64,
}

/// An unspent output together with its position in the creating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

/// UTXO index record: the unspent outputs of a single transaction, in output order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputs {
    pub outputs: Vec<UnspentOutput>,
}

impl TxOutputs {
    /// Record holding every output of `tx`
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            outputs: tx
                .outputs
                .iter()
                .enumerate()
                .map(|(i, output)| UnspentOutput {
                    index: i as u32,
                    output: output.clone(),
                })
                .collect(),
        }
    }

    /// Drop the output at position `index`, returning whether it was present
    pub fn spend(&mut self, index: u32) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|unspent| unspent.index != index);
        self.outputs.len() != before
    }

    pub fn get(&self, index: u32) -> Option<&TxOutput> {
        self.outputs
            .iter()
            .find(|unspent| unspent.index == index)
            .map(|unspent| &unspent.output)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

/// Result of a spendable-output search: accumulated value and, per transaction
/// id, the output positions selected.
pub type SpendableOutputs = (i64, std::collections::HashMap<Hash, Vec<u32>>);
