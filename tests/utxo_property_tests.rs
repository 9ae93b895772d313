//! Property tests for the UTXO index
//!
//! Random transfer histories are replayed against a fresh ledger; the
//! incrementally maintained index must always match a full rebuild.

use proptest::prelude::*;
use secp256k1::SecretKey;
use stake_ledger::crypto::{hash_pub_key, public_key_from_secret};
use stake_ledger::{
    new_utxo_transaction, ByteString, Hash, Ledger, LedgerConfig, LedgerError, PubKeyHash,
    Transaction, TxOutputs, UtxoIndex, SUBSIDY,
};
use std::collections::BTreeMap;

const WALLETS: usize = 3;

struct Wallet {
    secret: SecretKey,
    public: ByteString,
    hash: PubKeyHash,
}

fn wallets() -> Vec<Wallet> {
    (1..=WALLETS as u8)
        .map(|seed| {
            let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
            let public = public_key_from_secret(&secret);
            let hash = hash_pub_key(&public);
            Wallet { secret, public, hash }
        })
        .collect()
}

/// One step of a generated history
#[derive(Debug, Clone)]
enum Op {
    Transfer { from: usize, to: usize, amount: i64, stake: i64 },
    Reward { to: usize, stake: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..WALLETS, 0..WALLETS, 1i64..=15, 0i64..=100)
            .prop_map(|(from, to, amount, stake)| Op::Transfer { from, to, amount, stake }),
        1 => (0..WALLETS, 0i64..=100).prop_map(|(to, stake)| Op::Reward { to, stake }),
    ]
}

fn new_ledger(dir: &tempfile::TempDir, owner: &Wallet) -> Ledger {
    let mut config = LedgerConfig::with_path(dir.path().join("ledger.db"));
    config.flush_on_commit = false;
    Ledger::create(config, &owner.hash).unwrap()
}

/// Replay `ops` with append + update, skipping transfers the sender cannot fund
fn replay(ledger: &Ledger, wallets: &[Wallet], ops: &[Op]) -> usize {
    let index = UtxoIndex::new(ledger);
    let mut applied = 0;
    for op in ops {
        let transactions = match op {
            Op::Transfer { from, to, amount, .. } => {
                let from = &wallets[*from];
                match new_utxo_transaction(&from.public, &wallets[*to].hash, *amount, &index) {
                    Ok(mut tx) => {
                        ledger.sign_transaction(&mut tx, &from.secret).unwrap();
                        vec![tx]
                    }
                    Err(LedgerError::InsufficientFunds { .. }) => continue,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            Op::Reward { to, .. } => vec![Transaction::new_coinbase(
                &wallets[*to].hash,
                b"",
                ledger.config().subsidy,
            )],
        };
        let stake = match op {
            Op::Transfer { stake, .. } | Op::Reward { stake, .. } => *stake,
        };
        let block = ledger.append(transactions, stake).unwrap();
        assert!(index.update(&block).unwrap());
        applied += 1;
    }
    applied
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_reindex_matches_sequential_updates(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let dir = tempfile::tempdir().unwrap();
        let wallets = wallets();
        let ledger = new_ledger(&dir, &wallets[0]);
        let applied = replay(&ledger, &wallets, &ops);

        let index = UtxoIndex::new(&ledger);
        let incremental = index.entries().unwrap();
        let walked: BTreeMap<Hash, TxOutputs> = ledger.find_utxo().unwrap().into_iter().collect();
        prop_assert_eq!(&incremental, &walked);

        let count = index.reindex().unwrap();
        prop_assert_eq!(count, incremental.len());
        prop_assert_eq!(index.entries().unwrap(), incremental);
        prop_assert!(index.is_synced().unwrap());
        prop_assert_eq!(ledger.height().unwrap(), applied as u64);
    }

    #[test]
    fn prop_value_is_conserved(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let dir = tempfile::tempdir().unwrap();
        let wallets = wallets();
        let ledger = new_ledger(&dir, &wallets[0]);
        replay(&ledger, &wallets, &ops);

        let index = UtxoIndex::new(&ledger);
        let coinbases = ledger
            .iter()
            .map(|b| b.unwrap())
            .flat_map(|b| b.transactions)
            .filter(|tx| tx.is_coinbase())
            .count() as i64;
        let total: i64 = wallets.iter().map(|w| index.balance(&w.hash).unwrap()).sum();
        prop_assert_eq!(total, coinbases * SUBSIDY);
    }

    #[test]
    fn prop_spendable_outputs_cover_request(
        ops in prop::collection::vec(op_strategy(), 0..8),
        owner in 0..WALLETS,
        amount in 1i64..=40,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let wallets = wallets();
        let ledger = new_ledger(&dir, &wallets[0]);
        replay(&ledger, &wallets, &ops);

        let index = UtxoIndex::new(&ledger);
        let owner = &wallets[owner].hash;
        let balance = index.balance(owner).unwrap();
        let (accumulated, selected) = index.find_spendable_outputs(owner, amount).unwrap();

        // Either the request is covered or every owned output was taken
        prop_assert!(accumulated >= amount || accumulated == balance);
        prop_assert!(accumulated <= balance);

        let entries = index.entries().unwrap();
        let mut sum = 0;
        for (tx_id, indices) in &selected {
            let record = &entries[tx_id];
            for i in indices {
                let output = record.get(*i).unwrap();
                prop_assert!(output.is_locked_with_key(owner));
                sum += output.value;
            }
        }
        prop_assert_eq!(sum, accumulated);
    }
}
