//! # Stake-Ledger
//!
//! An append-only transactional ledger in the unspent-transaction-output model,
//! with a derived UTXO index and a stake-threshold block admission check.
//!
//! ## Architecture
//!
//! Leaves first:
//! - `crypto`: hashing primitives and public key encoding
//! - `transaction`: transaction identity, per-input signing and verification
//! - `block`: block construction and persisted encoding
//! - `stake`: block hashing and the stake gate
//! - `store`: durable key/value persistence (sled)
//! - `ledger`: the chain itself: append, backward iteration, lookup
//! - `utxo`: the rebuildable index of unspent outputs
//!
//! ## Design Principles
//!
//! 1. **Single Writer**: appends and index maintenance are serialized on one lock
//! 2. **Batch or Nothing**: every mutation is a single atomic write batch
//! 3. **Derived Index**: the UTXO index can always be rebuilt from the chain
//! 4. **Stable Ids**: transaction ids never change when signatures are added
//!
//! ## Usage
//!
//! ```rust
//! use stake_ledger::*;
//! use secp256k1::SecretKey;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let alice = SecretKey::from_slice(&[1u8; 32]).unwrap();
//! let alice_pub = crypto::public_key_from_secret(&alice);
//! let alice_hash = crypto::hash_pub_key(&alice_pub);
//! let bob_hash = vec![2u8; 20];
//!
//! let ledger = Ledger::create(LedgerConfig::with_path(dir.path().join("ledger.db")), &alice_hash).unwrap();
//! let index = UtxoIndex::new(&ledger);
//!
//! let mut tx = new_utxo_transaction(&alice_pub, &bob_hash, 4, &index).unwrap();
//! ledger.sign_transaction(&mut tx, &alice).unwrap();
//! let block = ledger.commit(vec![tx], 60).unwrap();
//!
//! assert!(stake::accept(&block));
//! assert_eq!(index.balance(&bob_hash).unwrap(), 4);
//! assert_eq!(index.balance(&alice_hash).unwrap(), 6);
//! ```

pub mod types;
pub mod constants;
pub mod crypto;
pub mod transaction;
pub mod block;
pub mod stake;
pub mod config;
pub mod store;
pub mod ledger;
pub mod utxo;
pub mod error;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use ledger::{Ledger, LedgerIter};
pub use transaction::{new_utxo_transaction, signature_digest};
pub use utxo::UtxoIndex;
