//! Coin record stored per outpoint.

use bitcoin::{Amount, Script, ScriptBuf, TxOut};

/// Maximum size of a script pubkey, anything larger can never be spent.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Shared spent coin returned where callers want a uniform "no coin" value.
pub static EMPTY_COIN: Coin = Coin::spent();

/// Unspent transaction output as tracked by the coins views.
///
/// A coin in the spent state is a regular value: caches keep it around as a
/// tombstone until the spend has been written to the layer below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// Whether the coin is from a coinbase transaction.
    pub is_coinbase: bool,
    /// Transfer value in satoshis.
    pub amount: u64,
    /// Block height at which the containing transaction was included.
    pub height: u32,
    /// Spending condition of the output.
    pub script_pubkey: Vec<u8>,
    spent: bool,
}

impl Default for Coin {
    fn default() -> Self {
        Self::spent()
    }
}

impl Coin {
    /// Creates an unspent coin.
    pub fn new(amount: u64, script_pubkey: Vec<u8>, height: u32, is_coinbase: bool) -> Self {
        Self {
            is_coinbase,
            amount,
            height,
            script_pubkey,
            spent: false,
        }
    }

    /// Creates an unspent coin from a transaction output.
    pub fn from_txout(txout: &TxOut, height: u32, is_coinbase: bool) -> Self {
        Self::new(
            txout.value.to_sat(),
            txout.script_pubkey.to_bytes(),
            height,
            is_coinbase,
        )
    }

    /// The empty coin, in the spent state.
    pub const fn spent() -> Self {
        Self {
            is_coinbase: false,
            amount: 0,
            height: 0,
            script_pubkey: Vec::new(),
            spent: true,
        }
    }

    /// Returns `true` if the coin has been spent.
    pub fn is_spent(&self) -> bool {
        self.spent
    }

    /// Resets the coin to the spent state, releasing its script.
    pub fn clear(&mut self) {
        *self = Self::spent();
    }

    /// Returns `true` if the output can never be spent and must not enter the UTXO set.
    pub fn is_unspendable(&self) -> bool {
        self.script_pubkey.len() > MAX_SCRIPT_SIZE
            || Script::from_bytes(&self.script_pubkey).is_op_return()
    }

    /// Heap memory owned by this coin.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.script_pubkey.len()
    }

    /// Converts the coin back into a transaction output.
    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.amount),
            script_pubkey: ScriptBuf::from_bytes(self.script_pubkey.clone()),
        }
    }
}
