//! UTXO index: a derived, rebuildable map from transaction id to that
//! transaction's unspent outputs.
//!
//! The index is never authoritative. [`UtxoIndex::reindex`] recomputes it from
//! the chain; [`UtxoIndex::update`] patches it one block at a time. Both must
//! leave the same content behind.

use crate::crypto::to_hash;
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::store::{LedgerStore, WriteBatch};
use crate::types::*;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// View of the UTXO index stored alongside a [`Ledger`]
#[derive(Debug, Clone, Copy)]
pub struct UtxoIndex<'a> {
    ledger: &'a Ledger,
}

impl<'a> UtxoIndex<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Reindex: clear every index record and rebuild from a full chain walk.
    ///
    /// Returns the number of transactions with unspent outputs.
    pub fn reindex(&self) -> Result<usize> {
        let tip = self.ledger.write_tip();
        let store = self.ledger.store();
        let utxo = self.ledger.find_utxo_from(&tip)?;

        let mut batch = WriteBatch::new();
        for key in store.scan_output_keys() {
            batch.delete_key(key?);
        }
        for (tx_id, outputs) in &utxo {
            batch.put_outputs(tx_id, outputs)?;
        }
        batch.set_utxo_tip(&tip);
        store.commit(batch)?;

        info!(
            transactions = utxo.len(),
            tip = %hex::encode(*tip),
            "rebuilt UTXO index"
        );
        Ok(utxo.len())
    }

    /// Update: apply one appended block.
    ///
    /// Returns `Ok(false)` without touching the index if `block` is the last
    /// block already applied. A block that does not extend the index tip is
    /// rejected with `IndexOutOfSync`, so no block is ever applied twice.
    pub fn update(&self, block: &Block) -> Result<bool> {
        let _tip = self.ledger.write_tip();
        let store = self.ledger.store();

        if store.utxo_tip()? == Some(block.hash) {
            debug!(hash = %hex::encode(block.hash), "block already applied to UTXO index");
            return Ok(false);
        }

        match store.get_block(&block.hash)? {
            Some(stored) if stored == *block => {}
            _ => {
                return Err(LedgerError::NotFound(format!(
                    "block {} is not in the ledger",
                    hex::encode(block.hash)
                )))
            }
        }

        let mut batch = WriteBatch::new();
        stage_block(store, block, &mut batch)?;
        store.commit(batch)?;

        debug!(
            hash = %hex::encode(block.hash),
            transactions = block.transactions.len(),
            "applied block to UTXO index"
        );
        Ok(true)
    }

    /// FindSpendableOutputs: 𝕊 × ℤ → ℤ × (ℍ → ℕ*)
    ///
    /// Walk the index in key order collecting outputs locked to
    /// `pub_key_hash`, stopping as soon as the accumulated value reaches
    /// `amount`. Selection is greedy, not sorted by value. If the total locked
    /// to `pub_key_hash` is below `amount`, that total is returned.
    pub fn find_spendable_outputs(&self, pub_key_hash: &[u8], amount: i64) -> Result<SpendableOutputs> {
        let _tip = self.ledger.read_tip();
        let mut unspent: HashMap<Hash, Vec<u32>> = HashMap::new();
        let mut accumulated = 0i64;

        if amount <= 0 {
            return Ok((accumulated, unspent));
        }

        for entry in self.ledger.store().scan_outputs() {
            let (tx_id, outputs) = entry?;
            for unspent_output in &outputs.outputs {
                if !unspent_output.output.is_locked_with_key(pub_key_hash) {
                    continue;
                }
                accumulated = accumulated.saturating_add(unspent_output.output.value);
                unspent.entry(tx_id).or_default().push(unspent_output.index);

                if accumulated >= amount {
                    return Ok((accumulated, unspent));
                }
            }
        }

        Ok((accumulated, unspent))
    }

    /// All unspent outputs locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let _tip = self.ledger.read_tip();
        let mut utxos = Vec::new();
        for entry in self.ledger.store().scan_outputs() {
            let (_, outputs) = entry?;
            utxos.extend(
                outputs
                    .outputs
                    .into_iter()
                    .map(|unspent| unspent.output)
                    .filter(|output| output.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(utxos)
    }

    /// Total unspent value locked to `pub_key_hash`
    pub fn balance(&self, pub_key_hash: &[u8]) -> Result<i64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .fold(0i64, |total, output| total.saturating_add(output.value)))
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        let _tip = self.ledger.read_tip();
        let mut count = 0;
        for key in self.ledger.store().scan_output_keys() {
            key?;
            count += 1;
        }
        Ok(count)
    }

    /// Snapshot of every index record, keyed by transaction id
    pub fn entries(&self) -> Result<BTreeMap<Hash, TxOutputs>> {
        let _tip = self.ledger.read_tip();
        self.ledger.store().scan_outputs().collect()
    }

    /// Hash of the last block reflected in the index
    pub fn tip(&self) -> Result<Option<Hash>> {
        self.ledger.store().utxo_tip()
    }

    /// True when the index reflects the ledger's current tip
    pub fn is_synced(&self) -> Result<bool> {
        let tip = self.ledger.read_tip();
        Ok(self.ledger.store().utxo_tip()? == Some(*tip))
    }
}

/// Stage the index changes for `block` into `batch`.
///
/// The block must extend the block the index currently reflects. Spent
/// positions are removed (records left empty are deleted) and every
/// transaction's outputs get a fresh record. Changes are accumulated in memory
/// first, so a transaction spending an earlier output of the same block is
/// handled in order.
pub(crate) fn stage_block(store: &LedgerStore, block: &Block, batch: &mut WriteBatch) -> Result<()> {
    let index_tip = store.utxo_tip()?;
    let index_tip_bytes = index_tip.map(|hash| hash.to_vec()).unwrap_or_default();
    if index_tip_bytes != block.prev_block_hash {
        return Err(LedgerError::IndexOutOfSync {
            index_tip: index_tip.map(hex::encode).unwrap_or_else(|| "none".to_string()),
            expected: hex::encode(&block.prev_block_hash),
        });
    }

    let mut touched: BTreeMap<Hash, Option<TxOutputs>> = BTreeMap::new();
    for tx in &block.transactions {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let prev_id = match to_hash(&input.prev_tx_id) {
                    Some(id) => id,
                    None => continue,
                };
                let record = match touched.entry(prev_id) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(store.get_outputs(&prev_id)?),
                };
                let emptied = match record {
                    Some(outputs) => {
                        outputs.spend(input.output_index);
                        outputs.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    *record = None;
                }
            }
        }

        touched.insert(tx.id, Some(TxOutputs::from_transaction(tx)));
    }

    for (tx_id, record) in &touched {
        match record {
            Some(outputs) => batch.put_outputs(tx_id, outputs)?,
            None => batch.delete_outputs(tx_id),
        }
    }
    batch.set_utxo_tip(&block.hash);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::constants::*;

    fn new_ledger(dir: &tempfile::TempDir, owner: &[u8]) -> Ledger {
        let mut config = LedgerConfig::with_path(dir.path().join("ledger.db"));
        config.flush_on_commit = false;
        Ledger::create(config, owner).unwrap()
    }

    #[test]
    fn test_genesis_index() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let index = UtxoIndex::new(&ledger);

        let utxos = index.find_utxo(&owner).unwrap();
        assert_eq!(utxos, vec![TxOutput::new(SUBSIDY, owner.clone())]);
        assert_eq!(index.count_transactions().unwrap(), 1);
        assert_eq!(index.balance(&owner).unwrap(), SUBSIDY);
        assert!(index.is_synced().unwrap());
        assert_eq!(index.tip().unwrap(), Some(ledger.tip()));
    }

    #[test]
    fn test_find_spendable_outputs_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        for _ in 0..3 {
            let reward = Transaction::new_coinbase(&owner, b"", SUBSIDY);
            ledger.commit(vec![reward], 60).unwrap();
        }
        let index = UtxoIndex::new(&ledger);

        let (accumulated, selected) = index.find_spendable_outputs(&owner, 15).unwrap();
        assert_eq!(accumulated, 20);
        assert_eq!(selected.values().map(Vec::len).sum::<usize>(), 2);

        let (accumulated, selected) = index.find_spendable_outputs(&owner, 1_000).unwrap();
        assert_eq!(accumulated, 40);
        assert_eq!(selected.len(), 4);

        let (accumulated, selected) = index.find_spendable_outputs(&[9u8; 20], 5).unwrap();
        assert_eq!(accumulated, 0);
        assert!(selected.is_empty());
    }

    #[test]
    fn test_find_spendable_outputs_zero_amount() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let (accumulated, selected) = UtxoIndex::new(&ledger).find_spendable_outputs(&owner, 0).unwrap();
        assert_eq!(accumulated, 0);
        assert!(selected.is_empty());
    }

    #[test]
    fn test_update_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let index = UtxoIndex::new(&ledger);

        let reward = Transaction::new_coinbase(&owner, b"", SUBSIDY);
        let block = ledger.append(vec![reward], 60).unwrap();

        assert!(index.update(&block).unwrap());
        let after_first = index.entries().unwrap();
        assert!(!index.update(&block).unwrap());
        assert_eq!(index.entries().unwrap(), after_first);
        assert_eq!(index.count_transactions().unwrap(), 2);
    }

    #[test]
    fn test_update_rejects_stale_block() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let index = UtxoIndex::new(&ledger);
        let genesis = ledger.iter().next().unwrap().unwrap();

        let reward = Transaction::new_coinbase(&owner, b"", SUBSIDY);
        ledger.commit(vec![reward], 60).unwrap();

        let before = index.entries().unwrap();
        let err = index.update(&genesis).unwrap_err();
        assert!(matches!(err, LedgerError::IndexOutOfSync { .. }));
        assert_eq!(index.entries().unwrap(), before);
    }

    #[test]
    fn test_update_rejects_foreign_block() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let index = UtxoIndex::new(&ledger);

        let reward = Transaction::new_coinbase(&owner, b"", SUBSIDY);
        let foreign = Block::new(vec![reward], ledger.tip().to_vec(), 60);
        let err = index.update(&foreign).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_update_after_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let index = UtxoIndex::new(&ledger);

        let first = ledger.append(vec![Transaction::new_coinbase(&owner, b"", SUBSIDY)], 60).unwrap();
        assert!(index.update(&first).unwrap());
        let second = ledger.append(vec![Transaction::new_coinbase(&owner, b"", SUBSIDY)], 60).unwrap();
        assert!(!index.is_synced().unwrap());

        index.reindex().unwrap();
        assert!(index.is_synced().unwrap());
        assert!(!index.update(&second).unwrap());
        let err = index.update(&first).unwrap_err();
        assert!(matches!(err, LedgerError::IndexOutOfSync { .. }));
        assert_eq!(index.count_transactions().unwrap(), 3);
    }

    #[test]
    fn test_reindex_clears_stray_records() {
        let dir = tempfile::tempdir().unwrap();
        let owner = vec![1u8; 20];
        let ledger = new_ledger(&dir, &owner);
        let index = UtxoIndex::new(&ledger);

        let mut batch = WriteBatch::new();
        batch
            .put_outputs(&[0xab; 32], &TxOutputs::from_transaction(&Transaction::new_coinbase(&owner, b"x", 5)))
            .unwrap();
        ledger.store().commit(batch).unwrap();
        assert_eq!(index.count_transactions().unwrap(), 2);

        assert_eq!(index.reindex().unwrap(), 1);
        assert_eq!(index.count_transactions().unwrap(), 1);
        assert_eq!(index.balance(&owner).unwrap(), SUBSIDY);
    }

    #[test]
    fn test_stage_block_handles_spend_within_block() {
        let store = LedgerStore::temporary().unwrap();
        let owner = vec![1u8; 20];
        let other = vec![2u8; 20];

        let funding = Transaction::new_coinbase(&owner, b"fund", 10);
        let genesis = Block::genesis(funding.clone());
        let mut batch = WriteBatch::new();
        stage_block(&store, &genesis, &mut batch).unwrap();
        store.commit(batch).unwrap();

        // Signatures are not checked here: staging trusts appended blocks
        let first = Transaction::new(
            vec![TxInput::new(funding.id, 0, vec![])],
            vec![TxOutput::new(4, other.clone()), TxOutput::new(6, owner.clone())],
        );
        let second = Transaction::new(
            vec![TxInput::new(first.id, 1, vec![])],
            vec![TxOutput::new(6, other.clone())],
        );
        let block = Block::new(vec![first.clone(), second.clone()], genesis.hash.to_vec(), 60);
        let mut batch = WriteBatch::new();
        stage_block(&store, &block, &mut batch).unwrap();
        store.commit(batch).unwrap();

        assert_eq!(store.get_outputs(&funding.id).unwrap(), None);
        let remaining = store.get_outputs(&first.id).unwrap().unwrap();
        assert_eq!(remaining.outputs.len(), 1);
        assert_eq!(remaining.get(0), Some(&TxOutput::new(4, other.clone())));
        assert_eq!(store.get_outputs(&second.id).unwrap(), Some(TxOutputs::from_transaction(&second)));
        assert_eq!(store.utxo_tip().unwrap(), Some(block.hash));
    }
}
