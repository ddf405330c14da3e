//! In-memory root view.

use crate::{Coin, CoinsCursor, CoinsMap, CoinsView, Result};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint};
use std::collections::BTreeMap;

/// UTXO set held entirely in memory.
///
/// Serves as the bottom layer of a cache stack where no database is wanted: tests,
/// tooling and short-lived validation contexts. Only unspent coins are stored.
#[derive(Debug, Clone)]
pub struct MemoryCoinsView {
    /// UTXO entries, ordered by outpoint for deterministic enumeration.
    utxos: BTreeMap<OutPoint, Coin>,
    best_block: BlockHash,
    /// Blocks of an interrupted write, empty when the set is consistent.
    head_blocks: Vec<BlockHash>,
    /// Number of batches applied so far.
    batches_written: u64,
}

impl Default for MemoryCoinsView {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoinsView {
    pub fn new() -> Self {
        Self {
            utxos: BTreeMap::new(),
            best_block: BlockHash::all_zeros(),
            head_blocks: Vec::new(),
            batches_written: 0,
        }
    }

    /// Seeds an unspent coin directly, bypassing the batch path.
    pub fn insert(&mut self, outpoint: OutPoint, coin: Coin) {
        debug_assert!(!coin.is_spent(), "Spent coins are never stored");
        self.utxos.insert(outpoint, coin);
    }

    /// Get a UTXO by outpoint.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.utxos.get(outpoint)
    }

    /// Check if a UTXO exists.
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn set_best_block(&mut self, best_block: BlockHash) {
        self.best_block = best_block;
    }

    /// Marks the view as caught in the middle of a write from `old_tip` to `new_tip`.
    pub fn set_head_blocks(&mut self, new_tip: BlockHash, old_tip: BlockHash) {
        self.head_blocks = vec![new_tip, old_tip];
    }

    /// Number of batches written into this view.
    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }
}

impl CoinsView for MemoryCoinsView {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.utxos.contains_key(outpoint))
    }

    fn best_block(&mut self) -> BlockHash {
        self.best_block
    }

    fn head_blocks(&self) -> Vec<BlockHash> {
        self.head_blocks.clone()
    }

    fn batch_write(&mut self, entries: &mut CoinsMap, best_block: BlockHash) -> Result<()> {
        let mut written = 0usize;
        let mut erased = 0usize;

        for (outpoint, entry) in entries.drain() {
            if !entry.is_dirty() {
                continue;
            }
            if entry.coin.is_spent() {
                if self.utxos.remove(&outpoint).is_some() {
                    erased += 1;
                }
            } else {
                self.utxos.insert(outpoint, entry.coin);
                written += 1;
            }
        }

        self.best_block = best_block;
        self.head_blocks.clear();
        self.batches_written += 1;

        tracing::debug!(
            "Wrote coins batch at {best_block}: {written} written, {erased} erased, total: {}",
            self.utxos.len()
        );

        Ok(())
    }

    fn cursor(&self) -> Option<CoinsCursor<'_>> {
        Some(CoinsCursor::new(
            self.best_block,
            self.utxos.iter().map(|(outpoint, coin)| (*outpoint, coin.clone())),
        ))
    }

    fn estimate_size(&self) -> usize {
        self.utxos
            .values()
            .map(|coin| std::mem::size_of::<(OutPoint, Coin)>() + coin.dynamic_memory_usage())
            .sum()
    }
}
