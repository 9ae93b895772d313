//! Ledger constants

/// Stake threshold: a block is accepted only with stake strictly above this
pub const STAKE_THRESHOLD: i64 = 50;

/// Stake declared by the genesis block
pub const GENESIS_STAKE: i64 = 51;

/// Coinbase reward
pub const SUBSIDY: i64 = 10;

/// Coinbase data of the genesis block
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Length of random coinbase data when none is supplied
pub const COINBASE_DATA_LEN: usize = 20;

/// Reserved key holding the ledger tip
pub const TIP_KEY: &[u8] = b"l";

/// Key prefix of UTXO index records
pub const UTXO_PREFIX: &[u8] = b"chainstate_";

/// Reserved key holding the hash of the last block reflected in the UTXO index
pub const UTXO_TIP_KEY: &[u8] = b"chainstate-tip";

/// Length of a serialized public key's coordinates (X ‖ Y)
pub const PUBLIC_KEY_COORDS_LEN: usize = 64;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Attempts to open a database whose file lock is still held
pub const OPEN_RETRY_ATTEMPTS: u32 = 20;

/// First wait between open attempts, doubled after each retry
pub const OPEN_RETRY_INITIAL_DELAY_MS: u64 = 5;

/// Upper bound on the wait between open attempts
pub const OPEN_RETRY_MAX_DELAY_MS: u64 = 250;
