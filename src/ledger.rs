//! The append-only ledger: block persistence, tip management, backward
//! iteration and transaction lookup.
//!
//! Writers (`append`, `commit`, and the index's `update`/`reindex`) hold the
//! write side of the tip lock for their whole duration; readers hold the read
//! side. A reader therefore never sees a block without the index state that
//! belongs with it.

use crate::config::LedgerConfig;
use crate::crypto::to_hash;
use crate::error::{LedgerError, Result};
use crate::stake;
use crate::store::{LedgerStore, WriteBatch};
use crate::transaction::{check_transaction, check_tx_inputs};
use crate::types::*;
use crate::utxo;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use secp256k1::SecretKey;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// A chain of blocks persisted in a [`LedgerStore`]
pub struct Ledger {
    store: LedgerStore,
    tip: RwLock<Hash>,
    config: LedgerConfig,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("tip", &hex::encode(*self.tip.read()))
            .field("path", &self.config.path)
            .finish()
    }
}

impl Ledger {
    /// Create a new ledger whose genesis coinbase pays `reward_to`.
    ///
    /// The genesis block, the tip and the UTXO index entries for the genesis
    /// block are written in one batch.
    pub fn create(config: LedgerConfig, reward_to: &[u8]) -> Result<Self> {
        let store = LedgerStore::create(&config.path, config.flush_on_commit)?;

        let coinbase = Transaction::new_coinbase(
            reward_to,
            config.genesis_coinbase_data.as_bytes(),
            config.subsidy,
        );
        let genesis = Block::genesis_with_stake(coinbase, config.genesis_stake);

        let mut batch = WriteBatch::new();
        batch.put_block(&genesis)?;
        batch.set_tip(&genesis.hash);
        utxo::stage_block(&store, &genesis, &mut batch)?;
        store.commit(batch)?;

        info!(
            path = %config.path.display(),
            genesis = %hex::encode(genesis.hash),
            "created ledger"
        );

        Ok(Self {
            store,
            tip: RwLock::new(genesis.hash),
            config,
        })
    }

    /// Open an existing ledger
    pub fn open(config: LedgerConfig) -> Result<Self> {
        let store = LedgerStore::open(&config.path, config.flush_on_commit)?;
        let tip = store.tip()?.ok_or_else(|| {
            LedgerError::PreconditionFailed(format!(
                "ledger at {} has no tip",
                config.path.display()
            ))
        })?;

        info!(path = %config.path.display(), tip = %hex::encode(tip), "opened ledger");

        Ok(Self {
            store,
            tip: RwLock::new(tip),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Flush pending writes and release this handle.
    ///
    /// The database lock may outlive the handle briefly; [`Ledger::open`]
    /// waits for it.
    pub fn close(self) -> Result<()> {
        self.store.flush()?;
        info!(path = %self.config.path.display(), tip = %hex::encode(self.tip()), "closed ledger");
        Ok(())
    }

    /// Hash of the most recently appended block
    pub fn tip(&self) -> Hash {
        *self.tip.read()
    }

    /// Number of blocks after genesis
    pub fn height(&self) -> Result<u64> {
        let mut blocks = 0u64;
        for block in self.iter() {
            block?;
            blocks += 1;
        }
        Ok(blocks.saturating_sub(1))
    }

    /// Iterate from the tip back to genesis.
    ///
    /// The iterator captures the tip at creation; blocks appended afterwards
    /// are not visited. Every call returns an independent iterator.
    pub fn iter(&self) -> LedgerIter {
        let tip = self.tip.read();
        LedgerIter::new(self.store.clone(), &tip)
    }

    /// Find a transaction by id anywhere in the chain
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction> {
        let tip = self.tip.read();
        self.find_transaction_from(&tip, id)
    }

    /// Sign `tx` with `secret_key`, resolving referenced transactions from
    /// the chain
    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = {
            let tip = self.tip.read();
            self.previous_transactions(&tip, tx)?
        };
        tx.sign(secret_key, &prev_txs)
    }

    /// Verify `tx`'s signatures against the chain.
    ///
    /// Fails with `NotFound` when a referenced transaction is not in the chain.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let tip = self.tip.read();
        let prev_txs = self.previous_transactions(&tip, tx)?;
        Ok(tx.verify(&prev_txs))
    }

    /// Append a block of `transactions` declaring `stake`.
    ///
    /// Every transaction is checked against the UTXO index before anything is
    /// written, so the index must reflect the current tip. The block and the
    /// new tip are written in one batch; the index is left for
    /// [`UtxoIndex::update`](crate::utxo::UtxoIndex::update).
    pub fn append(&self, transactions: Vec<Transaction>, stake: i64) -> Result<Block> {
        let mut tip = self.tip.write();
        let block = self.prepare_block(&tip, transactions, stake)?;

        let mut batch = WriteBatch::new();
        batch.put_block(&block)?;
        batch.set_tip(&block.hash);
        self.store.commit(batch)?;

        *tip = block.hash;
        info!(
            hash = %hex::encode(block.hash),
            stake = block.stake,
            transactions = block.transactions.len(),
            "appended block"
        );
        Ok(block)
    }

    /// Append a block and apply it to the UTXO index in the same batch
    pub fn commit(&self, transactions: Vec<Transaction>, stake: i64) -> Result<Block> {
        let mut tip = self.tip.write();
        let block = self.prepare_block(&tip, transactions, stake)?;

        let mut batch = WriteBatch::new();
        batch.put_block(&block)?;
        batch.set_tip(&block.hash);
        utxo::stage_block(&self.store, &block, &mut batch)?;
        self.store.commit(batch)?;

        *tip = block.hash;
        info!(
            hash = %hex::encode(block.hash),
            stake = block.stake,
            transactions = block.transactions.len(),
            "committed block"
        );
        Ok(block)
    }

    /// FindUTXO: full chain walk.
    ///
    /// Maps every transaction id with at least one unspent output to those
    /// outputs. Used to rebuild the UTXO index.
    pub fn find_utxo(&self) -> Result<HashMap<Hash, TxOutputs>> {
        let tip = self.tip.read();
        self.find_utxo_from(&tip)
    }

    pub(crate) fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub(crate) fn read_tip(&self) -> RwLockReadGuard<'_, Hash> {
        self.tip.read()
    }

    pub(crate) fn write_tip(&self) -> RwLockWriteGuard<'_, Hash> {
        self.tip.write()
    }

    pub(crate) fn find_utxo_from(&self, tip: &Hash) -> Result<HashMap<Hash, TxOutputs>> {
        let mut utxo: HashMap<Hash, TxOutputs> = HashMap::new();
        let mut spent: HashMap<Hash, HashSet<u32>> = HashMap::new();

        for block in LedgerIter::new(self.store.clone(), tip) {
            let block = block?;
            // Newest first, so spends are recorded before the outputs they consume
            for tx in block.transactions.iter().rev() {
                let spent_here = spent.get(&tx.id);
                let outputs: Vec<UnspentOutput> = tx
                    .outputs
                    .iter()
                    .enumerate()
                    .map(|(i, output)| UnspentOutput {
                        index: i as u32,
                        output: output.clone(),
                    })
                    .filter(|unspent| spent_here.map_or(true, |s| !s.contains(&unspent.index)))
                    .collect();
                if !outputs.is_empty() {
                    utxo.insert(tx.id, TxOutputs { outputs });
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        if let Some(prev_id) = to_hash(&input.prev_tx_id) {
                            spent.entry(prev_id).or_default().insert(input.output_index);
                        }
                    }
                }
            }
        }

        Ok(utxo)
    }

    fn find_transaction_from(&self, tip: &Hash, id: &[u8]) -> Result<Transaction> {
        for block in LedgerIter::new(self.store.clone(), tip) {
            let block = block?;
            if let Some(tx) = block.transactions.into_iter().find(|tx| tx.id[..] == *id) {
                return Ok(tx);
            }
        }
        Err(LedgerError::NotFound(format!("transaction {}", hex::encode(id))))
    }

    /// Resolve every transaction referenced by `tx`'s inputs in one chain walk
    fn previous_transactions(&self, tip: &Hash, tx: &Transaction) -> Result<HashMap<Hash, Transaction>> {
        let mut wanted = HashSet::new();
        if !tx.is_coinbase() {
            for (i, input) in tx.inputs.iter().enumerate() {
                let prev_id = to_hash(&input.prev_tx_id).ok_or_else(|| {
                    LedgerError::InvalidTransaction(format!(
                        "Malformed previous id at input {} of {}",
                        i,
                        hex::encode(tx.id)
                    ))
                })?;
                wanted.insert(prev_id);
            }
        }
        self.resolve_transactions(tip, wanted)
    }

    fn resolve_transactions(&self, tip: &Hash, mut wanted: HashSet<Hash>) -> Result<HashMap<Hash, Transaction>> {
        let mut found = HashMap::new();
        if wanted.is_empty() {
            return Ok(found);
        }

        for block in LedgerIter::new(self.store.clone(), tip) {
            for tx in block?.transactions {
                if wanted.remove(&tx.id) {
                    found.insert(tx.id, tx);
                }
            }
            if wanted.is_empty() {
                return Ok(found);
            }
        }

        match wanted.into_iter().next() {
            Some(missing) => Err(LedgerError::NotFound(format!(
                "transaction {}",
                hex::encode(missing)
            ))),
            None => Ok(found),
        }
    }

    /// Validate `transactions` against the chain at `tip` and build the block.
    /// Nothing is written.
    fn prepare_block(&self, tip: &Hash, transactions: Vec<Transaction>, stake: i64) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "block must contain at least one transaction".to_string(),
            ));
        }

        let index_tip = self.store.utxo_tip()?;
        if index_tip != Some(*tip) {
            return Err(LedgerError::IndexOutOfSync {
                index_tip: index_tip.map(hex::encode).unwrap_or_else(|| "none".to_string()),
                expected: hex::encode(tip),
            });
        }

        let mut ids = HashSet::new();
        let mut wanted = HashSet::new();
        for (pos, tx) in transactions.iter().enumerate() {
            if let ValidationResult::Invalid(reason) = check_transaction(tx)? {
                return Err(LedgerError::InvalidTransaction(format!(
                    "{}: {}",
                    hex::encode(tx.id),
                    reason
                )));
            }
            if !ids.insert(tx.id) || self.store.get_outputs(&tx.id)?.is_some() {
                return Err(LedgerError::InvalidTransaction(format!(
                    "duplicate transaction {}",
                    hex::encode(tx.id)
                )));
            }
            if tx.is_coinbase() {
                if pos != 0 {
                    return Err(LedgerError::InvalidTransaction(format!(
                        "coinbase {} is only allowed as the first transaction",
                        hex::encode(tx.id)
                    )));
                }
                let minted = tx
                    .outputs
                    .iter()
                    .try_fold(0i64, |total, output| total.checked_add(output.value));
                if minted != Some(self.config.subsidy) {
                    return Err(LedgerError::InvalidTransaction(format!(
                        "coinbase {} must pay exactly the subsidy {}",
                        hex::encode(tx.id),
                        self.config.subsidy
                    )));
                }
                continue;
            }
            for input in &tx.inputs {
                if let Some(prev_id) = to_hash(&input.prev_tx_id) {
                    wanted.insert(prev_id);
                }
            }
        }

        let prev_txs = match self.resolve_transactions(tip, wanted) {
            Ok(prev_txs) => prev_txs,
            Err(LedgerError::NotFound(what)) => {
                return Err(LedgerError::InvalidTransaction(format!(
                    "references unknown {}",
                    what
                )))
            }
            Err(e) => return Err(e),
        };

        let mut claimed: HashSet<(Hash, u32)> = HashSet::new();
        for tx in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            if !tx.verify(&prev_txs) {
                return Err(LedgerError::InvalidTransaction(format!(
                    "signature verification failed for {}",
                    hex::encode(tx.id)
                )));
            }

            if let (ValidationResult::Invalid(reason), _) = check_tx_inputs(tx, &prev_txs)? {
                return Err(LedgerError::InvalidTransaction(format!(
                    "{}: {}",
                    hex::encode(tx.id),
                    reason
                )));
            }

            for input in &tx.inputs {
                let prev_id = to_hash(&input.prev_tx_id).ok_or_else(|| {
                    LedgerError::InvalidTransaction(format!(
                        "malformed previous id in {}",
                        hex::encode(tx.id)
                    ))
                })?;
                let unspent = self
                    .store
                    .get_outputs(&prev_id)?
                    .map_or(false, |outs| outs.get(input.output_index).is_some());
                if !unspent {
                    return Err(LedgerError::InvalidTransaction(format!(
                        "output {}:{} is already spent",
                        hex::encode(prev_id),
                        input.output_index
                    )));
                }
                if !claimed.insert((prev_id, input.output_index)) {
                    return Err(LedgerError::InvalidTransaction(format!(
                        "output {}:{} is spent twice in one block",
                        hex::encode(prev_id),
                        input.output_index
                    )));
                }
            }
        }

        if self.config.enforce_stake_gate && !stake::accept_stake(stake) {
            return Err(LedgerError::StakeRejected { stake });
        }

        debug!(transactions = transactions.len(), stake, "transactions validated");
        Ok(Block::new(transactions, tip.to_vec(), stake))
    }
}

/// Backward cursor over the chain, tip first, genesis last
pub struct LedgerIter {
    store: LedgerStore,
    next_hash: Option<ByteString>,
}

impl LedgerIter {
    fn new(store: LedgerStore, tip: &Hash) -> Self {
        Self {
            store,
            next_hash: Some(tip.to_vec()),
        }
    }
}

impl Iterator for LedgerIter {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next_hash.take()?;
        match self.store.get_block(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.next_hash = Some(block.prev_block_hash.clone());
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(LedgerError::StorageFault(format!(
                "block {} is referenced but missing",
                hex::encode(&hash)
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
