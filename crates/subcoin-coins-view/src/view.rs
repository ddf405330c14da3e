//! The coins view contract and the pass-through view.

use crate::{Coin, CoinsMap, Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint};

/// Full scan over the coins of a view, in the order the view chooses.
pub struct CoinsCursor<'a> {
    best_block: BlockHash,
    inner: Box<dyn Iterator<Item = (OutPoint, Coin)> + 'a>,
}

impl<'a> CoinsCursor<'a> {
    pub fn new(best_block: BlockHash, inner: impl Iterator<Item = (OutPoint, Coin)> + 'a) -> Self {
        Self {
            best_block,
            inner: Box::new(inner),
        }
    }

    /// Best block of the view at the time the cursor was opened.
    pub fn best_block(&self) -> BlockHash {
        self.best_block
    }
}

impl Iterator for CoinsCursor<'_> {
    type Item = (OutPoint, Coin);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// A layer of the UTXO set.
///
/// Read methods take `&mut self` because cache layers populate themselves while
/// answering lookups. The caller serializes all access to a stack of views.
pub trait CoinsView {
    /// Looks up a coin.
    ///
    /// `None` means this view has no information about the outpoint, the coin may
    /// still exist elsewhere. A returned coin can be in the spent state.
    fn get_coin(&mut self, _outpoint: &OutPoint) -> Result<Option<Coin>> {
        Ok(None)
    }

    /// Returns `true` if an unspent coin exists for the outpoint.
    fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.get_coin(outpoint)?.is_some_and(|coin| !coin.is_spent()))
    }

    /// Block hash whose state this view represents.
    fn best_block(&mut self) -> BlockHash {
        BlockHash::all_zeros()
    }

    /// Blocks a partially applied write may be between, empty when consistent.
    fn head_blocks(&self) -> Vec<BlockHash> {
        Vec::new()
    }

    /// Drains `entries` into this view and moves its best block to `best_block`.
    ///
    /// On error, entries that were not applied must be left in `entries`.
    fn batch_write(&mut self, _entries: &mut CoinsMap, _best_block: BlockHash) -> Result<()> {
        Err(Error::BatchWriteUnsupported)
    }

    /// Opens a cursor over every coin, if the view supports enumeration.
    fn cursor(&self) -> Option<CoinsCursor<'_>> {
        None
    }

    /// Estimated storage size in bytes, zero when unknown.
    fn estimate_size(&self) -> usize {
        0
    }
}

/// View with no coins and no writable state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinsViewEmpty;

impl CoinsView for CoinsViewEmpty {}

/// View that forwards every call to another view.
pub struct CoinsViewBacked<'a> {
    base: &'a mut dyn CoinsView,
}

impl<'a> CoinsViewBacked<'a> {
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self { base }
    }

    /// Rebinds the backend, e.g. when the layer stack is rebuilt during reindex.
    pub fn set_backend(&mut self, base: &'a mut dyn CoinsView) {
        self.base = base;
    }
}

impl CoinsView for CoinsViewBacked<'_> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        self.base.get_coin(outpoint)
    }

    fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        self.base.has_coin(outpoint)
    }

    fn best_block(&mut self) -> BlockHash {
        self.base.best_block()
    }

    fn head_blocks(&self) -> Vec<BlockHash> {
        self.base.head_blocks()
    }

    fn batch_write(&mut self, entries: &mut CoinsMap, best_block: BlockHash) -> Result<()> {
        self.base.batch_write(entries, best_block)
    }

    fn cursor(&self) -> Option<CoinsCursor<'_>> {
        self.base.cursor()
    }

    fn estimate_size(&self) -> usize {
        self.base.estimate_size()
    }
}
