//! Transaction model: identity, signing and verification over previous outputs

use crate::constants::*;
use crate::crypto::{hash_pub_key, parse_public_key, sha256, sha256d, to_hash};
use crate::error::{LedgerError, Result};
use crate::types::*;
use crate::utxo::UtxoIndex;
use secp256k1::{ecdsa::Signature, Message, Secp256k1, SecretKey};
use std::collections::HashMap;
use std::fmt;

impl Transaction {
    /// Build a transaction and assign its id.
    ///
    /// Public keys must already be in place: they are part of the id, signatures
    /// are not.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Transaction {
            id: [0u8; 32],
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// NewCoinbaseTX: 𝕊 × 𝕊 × ℤ → 𝒯𝒳
    ///
    /// Reward transaction paying `subsidy` to `to`. Empty `data` is replaced by
    /// random bytes so that repeated rewards to the same recipient get distinct
    /// ids.
    pub fn new_coinbase(to: &[u8], data: &[u8], subsidy: i64) -> Self {
        let data = if data.is_empty() {
            let random: [u8; COINBASE_DATA_LEN] = rand::random();
            random.to_vec()
        } else {
            data.to_vec()
        };

        let input = TxInput {
            prev_tx_id: Vec::new(),
            output_index: 0,
            signature: Vec::new(),
            public_key: data,
        };
        Transaction::new(vec![input], vec![TxOutput::new(subsidy, to.to_vec())])
    }

    /// A coinbase has exactly one input and that input references nothing
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_tx_id.is_empty()
    }

    /// TxId: 𝒯𝒳 → ℍ
    ///
    /// SHA256 over the canonical encoding with every signature cleared, so the
    /// id assigned before signing still holds afterwards.
    pub fn compute_id(&self) -> Hash {
        let mut unsigned = self.clone();
        for input in &mut unsigned.inputs {
            input.signature.clear();
        }
        sha256(&encode_transaction(&unsigned))
    }

    /// Copy with all signatures and public keys cleared
    pub fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    prev_tx_id: input.prev_tx_id.clone(),
                    output_index: input.output_index,
                    signature: Vec::new(),
                    public_key: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Sign every input with `secret_key`.
    ///
    /// `prev_txs` must hold every transaction referenced by an input; the
    /// locking hash of each referenced output is bound into that input's
    /// signature. Coinbase transactions are left untouched.
    pub fn sign(&mut self, secret_key: &SecretKey, prev_txs: &HashMap<Hash, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut locking_hashes = Vec::with_capacity(self.inputs.len());
        for (i, input) in self.inputs.iter().enumerate() {
            let prev_id = to_hash(&input.prev_tx_id).ok_or_else(|| {
                LedgerError::InvalidTransaction(format!("Malformed previous id at input {}", i))
            })?;
            let prev_tx = prev_txs
                .get(&prev_id)
                .ok_or_else(|| LedgerError::MissingPreviousTransaction(hex::encode(prev_id)))?;
            let output = prev_tx.outputs.get(input.output_index as usize).ok_or_else(|| {
                LedgerError::InvalidTransaction(format!(
                    "Input {} references output {} of {}, which does not exist",
                    i,
                    input.output_index,
                    hex::encode(prev_id)
                ))
            })?;
            locking_hashes.push(output.pub_key_hash.clone());
        }

        let secp = Secp256k1::signing_only();
        for (i, locking_hash) in locking_hashes.iter().enumerate() {
            let digest = signature_digest(self, i, locking_hash);
            let message = Message::from_digest_slice(&digest)
                .map_err(|e| LedgerError::Signing(e.to_string()))?;
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[i].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Verify every input's signature against `prev_txs`.
    ///
    /// Returns false on any mismatch: missing previous transaction, output index
    /// out of range, public key not hashing to the output's locking hash,
    /// malformed key or signature, or a signature over a different digest.
    pub fn verify(&self, prev_txs: &HashMap<Hash, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let secp = Secp256k1::verification_only();
        for (i, input) in self.inputs.iter().enumerate() {
            let output = match referenced_output(input, prev_txs) {
                Some(output) => output,
                None => return false,
            };

            if hash_pub_key(&input.public_key) != output.pub_key_hash {
                return false;
            }

            let public_key = match parse_public_key(&input.public_key) {
                Some(pk) => pk,
                None => return false,
            };

            let signature = match Signature::from_compact(&input.signature) {
                Ok(sig) => sig,
                Err(_) => return false,
            };

            let digest = signature_digest(self, i, &output.pub_key_hash);
            let message = match Message::from_digest_slice(&digest) {
                Ok(msg) => msg,
                Err(_) => return false,
            };

            if secp.verify_ecdsa(&message, &signature, &public_key).is_err() {
                return false;
            }
        }

        true
    }
}

/// SignatureDigest: 𝒯𝒳 × ℕ × 𝕊 → ℍ
///
/// For transaction tx, input position i and locking hash h:
/// 1. Let tx' = tx with every signature and public key cleared
/// 2. Set tx'.inputs[i].public_key = h
/// 3. Return SHA256D(encode(tx'))
///
/// Each input commits to its own position and to the output it spends, so a
/// signature cannot be moved to another input.
pub fn signature_digest(tx: &Transaction, input_index: usize, locking_hash: &[u8]) -> Hash {
    let mut trimmed = tx.trimmed_copy();
    if let Some(input) = trimmed.inputs.get_mut(input_index) {
        input.public_key = locking_hash.to_vec();
    }

    let mut data = encode_transaction(&trimmed);
    data.extend_from_slice(&(input_index as u32).to_be_bytes());
    sha256d(&data)
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx = (id, ins, outs) is well formed if and only if:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. ∀o ∈ outs: o.value > 0
/// 3. |ins| ≤ M_max_inputs ∧ |outs| ≤ M_max_outputs
/// 4. id = TxId(tx)
pub fn check_transaction(tx: &Transaction) -> Result<ValidationResult> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Ok(ValidationResult::Invalid("Empty inputs or outputs".to_string()));
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value <= 0 {
            return Ok(ValidationResult::Invalid(format!(
                "Invalid output value {} at index {}",
                output.value, i
            )));
        }
    }

    if tx.inputs.len() > MAX_INPUTS {
        return Ok(ValidationResult::Invalid(format!("Too many inputs: {}", tx.inputs.len())));
    }

    if tx.outputs.len() > MAX_OUTPUTS {
        return Ok(ValidationResult::Invalid(format!("Too many outputs: {}", tx.outputs.len())));
    }

    if tx.id != tx.compute_id() {
        return Ok(ValidationResult::Invalid(format!(
            "Id {} does not match transaction content",
            hex::encode(tx.id)
        )));
    }

    Ok(ValidationResult::Valid)
}

/// CheckTxInputs: 𝒯𝒳 × (ℍ → 𝒯𝒳) → {valid, invalid} × ℤ
///
/// 1. If tx is coinbase: return (valid, 0)
/// 2. Let total_in = Σᵢ prev(i).outputs[i.output_index].value
/// 3. Let total_out = Σₒ o.value
/// 4. If total_in < total_out: return (invalid, 0)
/// 5. Return (valid, total_in - total_out)
pub fn check_tx_inputs(
    tx: &Transaction,
    prev_txs: &HashMap<Hash, Transaction>,
) -> Result<(ValidationResult, i64)> {
    if tx.is_coinbase() {
        return Ok((ValidationResult::Valid, 0));
    }

    let mut total_in = 0i64;
    for (i, input) in tx.inputs.iter().enumerate() {
        let output = match referenced_output(input, prev_txs) {
            Some(output) => output,
            None => {
                return Ok((
                    ValidationResult::Invalid(format!("Input {} references an unknown output", i)),
                    0,
                ))
            }
        };
        total_in = match total_in.checked_add(output.value) {
            Some(total) => total,
            None => return Ok((ValidationResult::Invalid("Input value overflow".to_string()), 0)),
        };
    }

    let mut total_out = 0i64;
    for output in &tx.outputs {
        total_out = match total_out.checked_add(output.value) {
            Some(total) => total,
            None => return Ok((ValidationResult::Invalid("Output value overflow".to_string()), 0)),
        };
    }

    if total_in < total_out {
        return Ok((
            ValidationResult::Invalid(format!(
                "Outputs ({}) exceed inputs ({})",
                total_out, total_in
            )),
            0,
        ));
    }

    Ok((ValidationResult::Valid, total_in - total_out))
}

/// NewUTXOTransaction: 𝕊 × 𝕊 × ℤ × 𝒰𝒮 → 𝒯𝒳
///
/// Build an unsigned transfer of `amount` from the owner of `from_public_key`
/// to `to`, funded from the UTXO index. Any excess comes back to the sender as
/// a change output.
pub fn new_utxo_transaction(
    from_public_key: &[u8],
    to: &[u8],
    amount: i64,
    utxo_index: &UtxoIndex<'_>,
) -> Result<Transaction> {
    if amount <= 0 {
        return Err(LedgerError::InvalidTransaction(format!(
            "Transfer amount must be positive, got {}",
            amount
        )));
    }

    let from = hash_pub_key(from_public_key);
    let (accumulated, spendable) = utxo_index.find_spendable_outputs(&from, amount)?;
    if accumulated < amount {
        return Err(LedgerError::InsufficientFunds {
            available: accumulated,
            required: amount,
        });
    }

    // Deterministic input order
    let mut selected: Vec<(Hash, Vec<u32>)> = spendable.into_iter().collect();
    selected.sort();

    let mut inputs = Vec::new();
    for (tx_id, indices) in selected {
        for index in indices {
            inputs.push(TxInput::new(tx_id, index, from_public_key.to_vec()));
        }
    }

    let mut outputs = vec![TxOutput::new(amount, to.to_vec())];
    if accumulated > amount {
        outputs.push(TxOutput::new(accumulated - amount, from));
    }

    Ok(Transaction::new(inputs, outputs))
}

/// Previous output referenced by `input`, if `prev_txs` knows it
fn referenced_output<'a>(
    input: &TxInput,
    prev_txs: &'a HashMap<Hash, Transaction>,
) -> Option<&'a TxOutput> {
    let prev_id = to_hash(&input.prev_tx_id)?;
    prev_txs
        .get(&prev_id)?
        .outputs
        .get(input.output_index as usize)
}

/// Canonical length-prefixed encoding of inputs and outputs. The id itself is
/// not part of the encoding.
fn encode_transaction(tx: &Transaction) -> ByteString {
    fn put_bytes(buf: &mut ByteString, bytes: &[u8]) {
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(bytes);
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&(tx.inputs.len() as u32).to_be_bytes());
    for input in &tx.inputs {
        put_bytes(&mut buf, &input.prev_tx_id);
        buf.extend_from_slice(&input.output_index.to_be_bytes());
        put_bytes(&mut buf, &input.signature);
        put_bytes(&mut buf, &input.public_key);
    }
    buf.extend_from_slice(&(tx.outputs.len() as u32).to_be_bytes());
    for output in &tx.outputs {
        buf.extend_from_slice(&output.value.to_be_bytes());
        put_bytes(&mut buf, &output.pub_key_hash);
    }
    buf
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", hex::encode(self.id))?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            writeln!(f, "       TXID:      {}", hex::encode(&input.prev_tx_id))?;
            writeln!(f, "       Out:       {}", input.output_index)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.public_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}
