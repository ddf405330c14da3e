//! Write-back coins cache.
//!
//! A [`CoinsViewCache`] overlays any [`CoinsView`]. Reads populate the cache from the
//! backend, writes stay in memory until [`CoinsViewCache::flush`] drains every dirty
//! entry into the backend in a single batch.

use crate::{
    Coin, CoinsCacheEntry, CoinsCacheOptions, CoinsCursor, CoinsMap, CoinsView, CoinsViewBacked,
    EMPTY_COIN, EntryFlags, Error, LogOnce, Result, SaltedOutpointHasher,
};
use bitcoin::{BlockHash, OutPoint};
use schnellru::{LruMap, Unlimited};
use std::mem::size_of;

/// Bookkeeping cost of one cached coin besides its script.
const ENTRY_OVERHEAD: usize = size_of::<(OutPoint, CoinsCacheEntry)>();

/// Bookkeeping cost of one access order record.
const ACCESS_RECORD_OVERHEAD: usize = size_of::<OutPoint>() + size_of::<u32>() * 2;

type AccessOrder = LruMap<OutPoint, (), Unlimited, SaltedOutpointHasher>;

/// In-memory UTXO overlay on top of another coins view.
///
/// Not synchronized: lookups mutate the cache, so every method needs exclusive access
/// and the caller must hold the chain state lock across any read-modify-write sequence.
pub struct CoinsViewCache<'a> {
    /// Layer below this cache.
    base: CoinsViewBacked<'a>,

    options: CoinsCacheOptions,

    /// Best block, pulled from the backend on first use when unset.
    best_block: Option<BlockHash>,

    cache_coins: CoinsMap,

    /// Sum of the dynamic memory usage of every cached coin.
    cached_coins_usage: usize,

    /// Cached outpoints from most to least recently used, drives eviction.
    access_order: AccessOrder,

    /// Total number of entries dropped by eviction.
    evictions: u64,

    overwrite_log: LogOnce<OutPoint>,
}

impl<'a> CoinsViewCache<'a> {
    /// Creates a cache over `base` with default options.
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self::with_options(base, CoinsCacheOptions::default())
    }

    pub fn with_options(base: &'a mut dyn CoinsView, options: CoinsCacheOptions) -> Self {
        Self {
            base: CoinsViewBacked::new(base),
            options,
            best_block: None,
            cache_coins: CoinsMap::default(),
            cached_coins_usage: 0,
            access_order: AccessOrder::with_hasher(Unlimited, SaltedOutpointHasher::new()),
            evictions: 0,
            overwrite_log: LogOnce::new(),
        }
    }

    /// Replaces the backend.
    ///
    /// Cached entries are kept, the caller is responsible for the new backend being
    /// consistent with them.
    pub fn set_backend(&mut self, base: &'a mut dyn CoinsView) {
        self.base.set_backend(base);
    }

    pub fn options(&self) -> &CoinsCacheOptions {
        &self.options
    }

    /// Looks up a coin, loading it from the backend into the cache on a miss.
    ///
    /// The returned coin may be a spent tombstone, check [`Coin::is_spent`].
    pub fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        if !self.fetch_coin(outpoint)? {
            return Ok(None);
        }
        Ok(self
            .cache_coins
            .get(outpoint)
            .map(|entry| entry.coin.clone()))
    }

    /// Like [`Self::get_coin`], but returns [`EMPTY_COIN`] when nothing is known.
    pub fn access_coin(&mut self, outpoint: &OutPoint) -> Result<&Coin> {
        if !self.fetch_coin(outpoint)? {
            return Ok(&EMPTY_COIN);
        }
        Ok(self
            .cache_coins
            .get(outpoint)
            .map_or(&EMPTY_COIN, |entry| &entry.coin))
    }

    /// Returns `true` if an unspent coin exists for the outpoint.
    ///
    /// A cached entry answers without touching the backend.
    pub fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        if let Some(entry) = self.cache_coins.get(outpoint) {
            let unspent = !entry.coin.is_spent();
            self.touch(outpoint);
            return Ok(unspent);
        }

        if !self.fetch_coin(outpoint)? {
            return Ok(false);
        }
        Ok(self
            .cache_coins
            .get(outpoint)
            .is_some_and(|entry| !entry.coin.is_spent()))
    }

    /// Returns `true` if an unspent coin for the outpoint is cached. Never does I/O.
    pub fn has_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.cache_coins
            .get(outpoint)
            .is_some_and(|entry| !entry.coin.is_spent())
    }

    /// Adds a coin to the cache.
    ///
    /// An existing unspent coin is only replaced when `possible_overwrite` is set, which
    /// is the case for coinbase outputs (pre-BIP30 duplicate coinbases). Unspendable
    /// coins are dropped silently.
    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin, possible_overwrite: bool) {
        debug_assert!(!coin.is_spent(), "Spent coin added to cache");

        if coin.is_unspendable() {
            return;
        }

        match self.cache_coins.get_mut(&outpoint) {
            Some(entry) => {
                if !entry.coin.is_spent() {
                    if !possible_overwrite {
                        return;
                    }
                    if self.overwrite_log.first_time(outpoint) {
                        tracing::warn!("Overwriting unspent coin {outpoint} (duplicate coinbase)");
                    }
                }
                self.cached_coins_usage -= entry.coin.dynamic_memory_usage();
                entry.coin = coin;
                entry.flags |= EntryFlags::DIRTY;
                self.cached_coins_usage += entry.coin.dynamic_memory_usage();
            }
            None => {
                // Without an overwrite the caller vouches that nothing unspent exists
                // below. A possible overwrite means the backend may hold the coin.
                let mut flags = EntryFlags::DIRTY;
                if !possible_overwrite {
                    flags |= EntryFlags::FRESH;
                }
                self.cached_coins_usage += coin.dynamic_memory_usage();
                self.cache_coins
                    .insert(outpoint, CoinsCacheEntry::with_flags(coin, flags));
            }
        }

        self.touch(&outpoint);

        if self.cached_coins_usage > self.options.max_cache_size {
            self.evict();
        }
    }

    /// Spends a coin and hands the previous value to the caller.
    ///
    /// Returns `None` if the coin is unknown at every layer. A `FRESH` entry is erased,
    /// any other entry is kept as a dirty tombstone so the spend reaches the backend.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        if !self.fetch_coin(outpoint)? {
            return Ok(None);
        }

        let Some(entry) = self.cache_coins.get_mut(outpoint) else {
            return Ok(None);
        };

        if entry.is_fresh() {
            return Ok(self.erase(outpoint).map(|entry| entry.coin));
        }

        self.cached_coins_usage -= entry.coin.dynamic_memory_usage();
        entry.flags |= EntryFlags::DIRTY;
        let coin = std::mem::take(&mut entry.coin);
        self.touch(outpoint);

        Ok(Some(coin))
    }

    /// Drops a cached coin that has no pending changes.
    pub fn uncache(&mut self, outpoint: &OutPoint) {
        if self
            .cache_coins
            .get(outpoint)
            .is_some_and(|entry| !entry.is_dirty())
        {
            self.erase(outpoint);
        }
    }

    /// Drains `child` into this cache and moves the best block to `best_block`.
    ///
    /// `child` holds the pending entries of a cache stacked on top of this one. On
    /// error the offending entry and every entry not yet merged stay in `child`.
    pub fn merge(&mut self, child: &mut CoinsMap, best_block: BlockHash) -> Result<()> {
        let mut merged = 0usize;
        let mut dropped = 0usize;

        let outpoints: Vec<OutPoint> = child.keys().copied().collect();
        for outpoint in outpoints {
            let Some(child_entry) = child.remove(&outpoint) else {
                continue;
            };

            if !child_entry.is_dirty() {
                continue;
            }

            match self.cache_coins.get_mut(&outpoint) {
                None => {
                    // Spent and FRESH in the child: neither layer has anything to record.
                    if child_entry.is_fresh() && child_entry.coin.is_spent() {
                        dropped += 1;
                        continue;
                    }

                    // FRESH carries over only if the child knew nothing exists below.
                    // Otherwise the coin may just have been flushed out of this cache
                    // and already exist in the grandparent.
                    let mut flags = EntryFlags::DIRTY;
                    if child_entry.is_fresh() {
                        flags |= EntryFlags::FRESH;
                    }
                    self.cached_coins_usage += child_entry.coin.dynamic_memory_usage();
                    self.cache_coins
                        .insert(outpoint, CoinsCacheEntry::with_flags(child_entry.coin, flags));
                    self.touch(&outpoint);
                    merged += 1;
                }
                Some(parent_entry) => {
                    if child_entry.is_fresh() && !parent_entry.coin.is_spent() {
                        tracing::error!(
                            "FRESH flag misapplied to coin {outpoint} that exists in parent cache"
                        );
                        child.insert(outpoint, child_entry);
                        return Err(Error::FreshMisapplied(outpoint));
                    }

                    if parent_entry.is_fresh() && child_entry.coin.is_spent() {
                        // The grandparent has no entry and the coin is now spent.
                        tracing::trace!("Dropping spent FRESH coin {outpoint} on merge");
                        self.erase(&outpoint);
                        dropped += 1;
                    } else {
                        self.cached_coins_usage -= parent_entry.coin.dynamic_memory_usage();
                        parent_entry.coin = child_entry.coin;
                        self.cached_coins_usage += parent_entry.coin.dynamic_memory_usage();
                        // Never FRESH here: an earlier spend held by this entry still
                        // has to reach the grandparent.
                        parent_entry.flags |= EntryFlags::DIRTY;
                        self.touch(&outpoint);
                        merged += 1;
                    }
                }
            }
        }

        self.best_block = Some(best_block);

        tracing::trace!("Merged {merged} coins, dropped {dropped} at {best_block}");

        Ok(())
    }

    /// Writes every pending change into the backend and empties the cache.
    pub fn flush(&mut self) -> Result<()> {
        let best_block = self.best_block();
        let entries = self.cache_coins.len();

        if let Err(err) = self.base.batch_write(&mut self.cache_coins, best_block) {
            // Whatever the backend did not apply is still in the map.
            self.recalculate_usage();
            return Err(err);
        }

        self.cache_coins.clear();
        self.access_order.clear();
        self.cached_coins_usage = 0;

        tracing::debug!("Flushed {entries} cache entries at {best_block}");

        Ok(())
    }

    /// Best block of this cache, pulled from the backend the first time.
    pub fn best_block(&mut self) -> BlockHash {
        *self
            .best_block
            .get_or_insert_with(|| self.base.best_block())
    }

    pub fn set_best_block(&mut self, best_block: BlockHash) {
        self.best_block = Some(best_block);
    }

    /// Memory used by cached coins plus the cache's own bookkeeping.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.cache_coins.len() * ENTRY_OVERHEAD
            + self.access_order.len() * ACCESS_RECORD_OVERHEAD
            + self.cached_coins_usage
    }

    /// Number of cached entries, tombstones included.
    pub fn cache_entry_count(&self) -> usize {
        self.cache_coins.len()
    }

    /// Cached entry for the outpoint, flags included. Never does I/O.
    pub fn cache_entry(&self, outpoint: &OutPoint) -> Option<&CoinsCacheEntry> {
        self.cache_coins.get(outpoint)
    }

    /// Get statistics about the cache.
    pub fn cache_stats(&self) -> CacheStats {
        let (dirty_entries, fresh_entries) =
            self.cache_coins
                .values()
                .fold((0, 0), |(dirty, fresh), entry| {
                    (
                        dirty + entry.is_dirty() as usize,
                        fresh + entry.is_fresh() as usize,
                    )
                });

        CacheStats {
            entries: self.cache_coins.len(),
            dirty_entries,
            fresh_entries,
            access_records: self.access_order.len(),
            memory_usage: self.dynamic_memory_usage(),
            evictions: self.evictions,
        }
    }

    /// Checks the internal consistency of the cache.
    ///
    /// Verifies the memory counter, that access records only refer to cached coins and
    /// that every entry is in one of the five reachable flag/spentness states.
    pub fn sanity_check(&self) -> bool {
        let mut usage = 0usize;

        for (outpoint, entry) in &self.cache_coins {
            usage += entry.coin.dynamic_memory_usage();

            let valid = match (entry.is_dirty(), entry.is_fresh(), entry.coin.is_spent()) {
                // FRESH without DIRTY only comes from loading a spent coin.
                (false, true, false) => false,
                // A clean spent coin is always FRESH.
                (false, false, true) => false,
                // Spending a FRESH coin erases it.
                (true, true, true) => false,
                _ => true,
            };

            if !valid {
                tracing::error!("Invalid cache entry state for {outpoint}: {entry:?}");
                return false;
            }
        }

        if usage != self.cached_coins_usage {
            tracing::error!(
                "Cache memory usage mismatch: tracked {}, actual {usage}",
                self.cached_coins_usage
            );
            return false;
        }

        self.access_order.len() <= self.cache_coins.len()
            && self
                .access_order
                .iter()
                .all(|(outpoint, _)| self.cache_coins.contains_key(outpoint))
    }

    /// Ensures the outpoint is cached if any layer below knows about it.
    fn fetch_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        if self.cache_coins.contains_key(outpoint) {
            self.touch(outpoint);
            return Ok(true);
        }

        let Some(coin) = self.base.get_coin(outpoint)? else {
            return Ok(false);
        };

        let mut entry = CoinsCacheEntry::new(coin);
        if entry.coin.is_spent() {
            // The backend only has an empty entry, ours can be considered fresh.
            entry.flags = EntryFlags::FRESH;
        }
        self.cached_coins_usage += entry.coin.dynamic_memory_usage();
        self.cache_coins.insert(*outpoint, entry);
        self.touch(outpoint);

        Ok(true)
    }

    fn touch(&mut self, outpoint: &OutPoint) {
        self.access_order.insert(*outpoint, ());
    }

    fn erase(&mut self, outpoint: &OutPoint) -> Option<CoinsCacheEntry> {
        let entry = self.cache_coins.remove(outpoint)?;
        self.cached_coins_usage -= entry.coin.dynamic_memory_usage();
        self.access_order.remove(outpoint);
        Some(entry)
    }

    /// Evicts least recently used clean entries until usage drops to the target.
    ///
    /// Dirty entries stay, so the cache may remain above its budget until the next flush.
    fn evict(&mut self) {
        let target = self.options.eviction_target();
        let usage_before = self.cached_coins_usage;

        let mut evicted = 0u64;
        let mut dirty = Vec::new();
        while self.cached_coins_usage > target {
            let Some((outpoint, ())) = self.access_order.pop_oldest() else {
                break;
            };
            if self
                .cache_coins
                .get(&outpoint)
                .is_some_and(|entry| entry.is_dirty())
            {
                dirty.push(outpoint);
            } else if self.erase(&outpoint).is_some() {
                evicted += 1;
            }
        }

        // Skipped dirty entries become the most recently used, oldest first.
        for outpoint in dirty {
            self.access_order.insert(outpoint, ());
        }

        self.evictions += evicted;

        tracing::debug!(
            "Evicted {evicted} coins, usage {usage_before} -> {} (budget: {}, target: {target})",
            self.cached_coins_usage,
            self.options.max_cache_size,
        );
    }

    fn recalculate_usage(&mut self) {
        self.cached_coins_usage = self
            .cache_coins
            .values()
            .map(|entry| entry.coin.dynamic_memory_usage())
            .sum();
        let stale: Vec<OutPoint> = self
            .access_order
            .iter()
            .filter(|(outpoint, _)| !self.cache_coins.contains_key(*outpoint))
            .map(|(outpoint, _)| *outpoint)
            .collect();
        for outpoint in stale {
            self.access_order.remove(&outpoint);
        }
    }
}

impl CoinsView for CoinsViewCache<'_> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        CoinsViewCache::get_coin(self, outpoint)
    }

    fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        CoinsViewCache::has_coin(self, outpoint)
    }

    fn best_block(&mut self) -> BlockHash {
        CoinsViewCache::best_block(self)
    }

    fn head_blocks(&self) -> Vec<BlockHash> {
        self.base.head_blocks()
    }

    fn batch_write(&mut self, entries: &mut CoinsMap, best_block: BlockHash) -> Result<()> {
        self.merge(entries, best_block)
    }

    // Pending writes would be invisible to a cursor over the backend.
    fn cursor(&self) -> Option<CoinsCursor<'_>> {
        None
    }

    fn estimate_size(&self) -> usize {
        self.base.estimate_size()
    }
}

/// Statistics about the coins cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached entries.
    pub entries: usize,
    /// Entries with pending changes.
    pub dirty_entries: usize,
    /// Entries known to be absent from the backend.
    pub fresh_entries: usize,
    /// Number of tracked access time records.
    pub access_records: usize,
    /// Same as [`CoinsViewCache::dynamic_memory_usage`].
    pub memory_usage: usize,
    /// Entries evicted since the cache was created.
    pub evictions: u64,
}
