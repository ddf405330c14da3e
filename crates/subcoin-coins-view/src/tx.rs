//! Applying transactions to a coins cache.

use crate::{Coin, CoinsViewCache, EMPTY_COIN, Error, Result};
use bitcoin::{OutPoint, Transaction, Txid};
use std::collections::HashSet;

/// The maximum allowed size for a transaction, in bytes.
pub const MAX_TX_SIZE: usize = 1_000_000;

/// Serialized size of the smallest possible output: 8-byte amount and an empty script.
const MIN_TX_OUT_SIZE: usize = 9;

/// Upper bound on the number of outputs a valid transaction can have.
pub const MAX_OUTPUTS_PER_TX: usize = MAX_TX_SIZE / MIN_TX_OUT_SIZE;

/// Coins spent by a transaction, needed to revert it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxUndo {
    /// Spent coins in input order.
    pub spent_coins: Vec<(OutPoint, Coin)>,
}

impl TxUndo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spent UTXO.
    pub fn record_spend(&mut self, outpoint: OutPoint, coin: Coin) {
        self.spent_coins.push((outpoint, coin));
    }

    pub fn len(&self) -> usize {
        self.spent_coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent_coins.is_empty()
    }
}

/// Adds every output of `tx` to the cache.
///
/// Coinbase outputs may always overwrite, to cope with the duplicate coinbase
/// transactions from before BIP30. With `check_for_overwrite`, overwriting is instead
/// allowed exactly when the coin already exists.
pub fn apply_outputs(
    cache: &mut CoinsViewCache<'_>,
    tx: &Transaction,
    height: u32,
    check_for_overwrite: bool,
) -> Result<()> {
    let is_coinbase = tx.is_coinbase();
    let txid = tx.compute_txid();

    for (vout, output) in tx.output.iter().enumerate() {
        let outpoint = OutPoint::new(txid, vout as u32);
        let overwrite = if check_for_overwrite {
            cache.has_coin(&outpoint)?
        } else {
            is_coinbase
        };
        cache.add_coin(outpoint, Coin::from_txout(output, height, is_coinbase), overwrite);
    }

    Ok(())
}

/// Returns `true` if every input of `tx` refers to an unspent coin.
pub fn has_all_inputs(cache: &mut CoinsViewCache<'_>, tx: &Transaction) -> Result<bool> {
    if tx.is_coinbase() {
        return Ok(true);
    }

    for input in &tx.input {
        if !cache.has_coin(&input.previous_output)? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Returns the first unspent output of `txid`, or [`EMPTY_COIN`] if there is none.
pub fn find_unspent_by_txid<'c>(cache: &'c mut CoinsViewCache<'_>, txid: Txid) -> Result<&'c Coin> {
    for vout in 0..MAX_OUTPUTS_PER_TX as u32 {
        let outpoint = OutPoint::new(txid, vout);
        if !cache.access_coin(&outpoint)?.is_spent() {
            return cache.access_coin(&outpoint);
        }
    }

    Ok(&EMPTY_COIN)
}

/// Spends every input of `tx`, returning the spent coins.
///
/// Fails with [`Error::MissingInput`] before touching the cache if an input is missing,
/// already spent, or listed twice.
pub fn spend_inputs(cache: &mut CoinsViewCache<'_>, tx: &Transaction) -> Result<TxUndo> {
    let mut undo = TxUndo::new();

    if tx.is_coinbase() {
        return Ok(undo);
    }

    let mut seen = HashSet::with_capacity(tx.input.len());
    for input in &tx.input {
        let outpoint = input.previous_output;
        // A repeated prevout is already spent by the time its second input is reached.
        if !seen.insert(outpoint) || !cache.has_coin(&outpoint)? {
            return Err(Error::MissingInput(outpoint));
        }
    }

    for input in &tx.input {
        let outpoint = input.previous_output;
        match cache.spend_coin(&outpoint)? {
            Some(coin) if !coin.is_spent() => undo.record_spend(outpoint, coin),
            _ => return Err(Error::MissingInput(outpoint)),
        }
    }

    Ok(undo)
}

/// Applies `tx` to the cache: spends its inputs, then adds its outputs.
pub fn update_coins(
    cache: &mut CoinsViewCache<'_>,
    tx: &Transaction,
    height: u32,
) -> Result<TxUndo> {
    let undo = spend_inputs(cache, tx)?;
    apply_outputs(cache, tx, height, false)?;
    Ok(undo)
}
