//! Durable key/value persistence for blocks, the tip and UTXO index records
//!
//! Everything lives in sled's default tree:
//! - block hash (32 bytes) → bincode(Block)
//! - `l` → tip hash
//! - `chainstate_` ‖ tx id → bincode(TxOutputs)
//! - `chainstate-tip` → hash of the last block reflected in the index
//!
//! All mutation goes through [`WriteBatch`], applied atomically by
//! [`LedgerStore::commit`].

use crate::constants::*;
use crate::crypto::to_hash;
use crate::error::{LedgerError, Result};
use crate::types::*;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Handle to the ledger database. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct LedgerStore {
    db: sled::Db,
    flush_on_commit: bool,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("flush_on_commit", &self.flush_on_commit)
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Create a new database at `path`. Fails if anything already exists there.
    pub fn create<P: AsRef<Path>>(path: P, flush_on_commit: bool) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(LedgerError::PreconditionFailed(format!(
                "ledger already exists at {}",
                path.display()
            )));
        }
        let db = sled::Config::new().path(path).create_new(true).open()?;
        Ok(Self { db, flush_on_commit })
    }

    /// Open an existing database at `path`
    pub fn open<P: AsRef<Path>>(path: P, flush_on_commit: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LedgerError::PreconditionFailed(format!(
                "no ledger found at {}; create one first",
                path.display()
            )));
        }
        let db = open_with_retry(path)?;
        Ok(Self { db, flush_on_commit })
    }

    /// Open a throwaway in-memory store (for testing)
    #[cfg(test)]
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            flush_on_commit: false,
        })
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Option<Block>> {
        match self.db.get(hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Hash of the most recently appended block
    pub fn tip(&self) -> Result<Option<Hash>> {
        self.read_hash(TIP_KEY)
    }

    /// Hash of the last block applied to the UTXO index
    pub fn utxo_tip(&self) -> Result<Option<Hash>> {
        self.read_hash(UTXO_TIP_KEY)
    }

    pub fn get_outputs(&self, tx_id: &Hash) -> Result<Option<TxOutputs>> {
        match self.db.get(utxo_key(tx_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan every UTXO index record in key order
    pub fn scan_outputs(&self) -> impl Iterator<Item = Result<(Hash, TxOutputs)>> {
        self.db.scan_prefix(UTXO_PREFIX).map(|entry| {
            let (key, value) = entry?;
            let tx_id = to_hash(&key[UTXO_PREFIX.len()..]).ok_or_else(|| {
                LedgerError::StorageFault(format!(
                    "malformed UTXO index key {}",
                    hex::encode(&key)
                ))
            })?;
            let outputs: TxOutputs = bincode::deserialize(&value)?;
            Ok((tx_id, outputs))
        })
    }

    /// Keys of every UTXO index record
    pub fn scan_output_keys(&self) -> impl Iterator<Item = Result<sled::IVec>> {
        self.db
            .scan_prefix(UTXO_PREFIX)
            .keys()
            .map(|key| key.map_err(LedgerError::from))
    }

    /// Apply `batch` atomically: either every write lands or none does
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.db.apply_batch(batch.inner)?;
        if self.flush_on_commit {
            self.db.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read_hash(&self, key: &[u8]) -> Result<Option<Hash>> {
        match self.db.get(key)? {
            Some(bytes) => to_hash(&bytes).map(Some).ok_or_else(|| {
                LedgerError::StorageFault(format!(
                    "corrupted hash under key {}",
                    String::from_utf8_lossy(key)
                ))
            }),
            None => Ok(None),
        }
    }
}

/// Open the sled database at `path`, retrying while another handle still holds
/// its file lock.
///
/// sled releases the lock only once its background flusher exits, which can lag
/// behind dropping the last `Db` handle. Waits back off exponentially; after
/// `OPEN_RETRY_ATTEMPTS` attempts the lock error is returned as a `StorageFault`.
fn open_with_retry(path: &Path) -> Result<sled::Db> {
    let mut delay = Duration::from_millis(OPEN_RETRY_INITIAL_DELAY_MS);
    let max_delay = Duration::from_millis(OPEN_RETRY_MAX_DELAY_MS);
    let mut attempt = 1;
    loop {
        match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(e) if is_lock_contention(&e) && attempt < OPEN_RETRY_ATTEMPTS => {
                debug!(path = %path.display(), attempt, "database lock busy, retrying");
                thread::sleep(delay);
                delay = (delay * 2).min(max_delay);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// True when `err` means another handle holds the database's file lock
fn is_lock_contention(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("could not acquire lock")
        }
        _ => false,
    }
}

/// Namespaced key of a UTXO index record
pub fn utxo_key(tx_id: &Hash) -> ByteString {
    let mut key = Vec::with_capacity(UTXO_PREFIX.len() + tx_id.len());
    key.extend_from_slice(UTXO_PREFIX);
    key.extend_from_slice(tx_id);
    key
}

/// Buffered writes, applied as one unit by [`LedgerStore::commit`]
#[derive(Default)]
pub struct WriteBatch {
    inner: sled::Batch,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_block(&mut self, block: &Block) -> Result<()> {
        self.inner.insert(&block.hash[..], block.serialize()?);
        Ok(())
    }

    pub fn set_tip(&mut self, hash: &Hash) {
        self.inner.insert(TIP_KEY, &hash[..]);
    }

    pub fn put_outputs(&mut self, tx_id: &Hash, outputs: &TxOutputs) -> Result<()> {
        self.inner.insert(utxo_key(tx_id), bincode::serialize(outputs)?);
        Ok(())
    }

    pub fn delete_outputs(&mut self, tx_id: &Hash) {
        self.inner.remove(utxo_key(tx_id));
    }

    pub fn delete_key(&mut self, key: sled::IVec) {
        self.inner.remove(key);
    }

    pub fn set_utxo_tip(&mut self, hash: &Hash) {
        self.inner.insert(UTXO_TIP_KEY, &hash[..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let coinbase = Transaction::new_coinbase(&[2u8; 20], b"store", SUBSIDY);
        Block::with_timestamp(vec![coinbase], vec![], GENESIS_STAKE, 42)
    }

    #[test]
    fn test_commit_block_and_tip() {
        let store = LedgerStore::temporary().unwrap();
        let block = sample_block();

        let mut batch = WriteBatch::new();
        batch.put_block(&block).unwrap();
        batch.set_tip(&block.hash);
        store.commit(batch).unwrap();

        assert_eq!(store.tip().unwrap(), Some(block.hash));
        assert_eq!(store.get_block(&block.hash).unwrap(), Some(block.clone()));
    }

    #[test]
    fn test_empty_store() {
        let store = LedgerStore::temporary().unwrap();
        assert_eq!(store.tip().unwrap(), None);
        assert_eq!(store.utxo_tip().unwrap(), None);
        assert_eq!(store.get_block(&[0u8; 32]).unwrap(), None);
        assert_eq!(store.scan_outputs().count(), 0);
    }

    #[test]
    fn test_outputs_put_scan_delete() {
        let store = LedgerStore::temporary().unwrap();
        let block = sample_block();
        let tx = &block.transactions[0];

        let mut batch = WriteBatch::new();
        batch.put_outputs(&tx.id, &TxOutputs::from_transaction(tx)).unwrap();
        batch.set_utxo_tip(&block.hash);
        store.commit(batch).unwrap();

        let scanned: Vec<_> = store.scan_outputs().collect::<Result<_>>().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].0, tx.id);
        assert_eq!(store.get_outputs(&tx.id).unwrap(), Some(TxOutputs::from_transaction(tx)));
        // The index tip key is not an index record
        assert_eq!(store.scan_output_keys().count(), 1);

        let mut batch = WriteBatch::new();
        batch.delete_outputs(&tx.id);
        store.commit(batch).unwrap();
        assert_eq!(store.get_outputs(&tx.id).unwrap(), None);
        assert_eq!(store.utxo_tip().unwrap(), Some(block.hash));
    }

    #[test]
    fn test_utxo_key_layout() {
        let key = utxo_key(&[0xaa; 32]);
        assert!(key.starts_with(UTXO_PREFIX));
        assert_eq!(key.len(), UTXO_PREFIX.len() + 32);
    }

    #[test]
    fn test_create_and_open_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let err = LedgerStore::open(&path, false).unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));

        let store = LedgerStore::create(&path, true).unwrap();
        drop(store);

        let err = LedgerStore::create(&path, true).unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));
        assert!(LedgerStore::open(&path, true).is_ok());
    }

    #[test]
    fn test_lock_contention_detection() {
        let busy = sled::Error::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "busy"));
        assert!(is_lock_contention(&busy));

        let message = sled::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "could not acquire lock on \"ledger.db/db\": WouldBlock",
        ));
        assert!(is_lock_contention(&message));

        let missing = sled::Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!is_lock_contention(&missing));
        assert!(!is_lock_contention(&sled::Error::Unsupported("nope".to_string())));
    }

    #[test]
    fn test_open_waits_for_lock_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let holder = LedgerStore::create(&path, false).unwrap();

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(holder);
        });
        let store = LedgerStore::open(&path, false).unwrap();
        release.join().unwrap();
        assert_eq!(store.tip().unwrap(), None);
    }
}
