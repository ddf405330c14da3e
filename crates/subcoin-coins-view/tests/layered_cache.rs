//! Tests for stacks of coins caches over a recording root view.
//!
//! The root records every batch it receives so the tests can assert that only the
//! final, coalesced state of each outpoint reaches the bottom of the stack.

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};
use hex_literal::hex;
use subcoin_coins_view::{
    Coin, CoinsMap, CoinsView, CoinsViewCache, CoinsViewErrorCatcher, EntryFlags, Error,
    MemoryCoinsView, Result,
};

/// Root view that records every batch written into it.
#[derive(Default)]
pub struct RecordingView {
    inner: MemoryCoinsView,
    batches: Vec<Vec<(OutPoint, Coin, EntryFlags)>>,
    /// Number of upcoming batches to reject without applying them.
    failures_left: usize,
}

impl RecordingView {
    pub fn with_coins(coins: impl IntoIterator<Item = (OutPoint, Coin)>) -> Self {
        let mut view = Self::default();
        for (outpoint, coin) in coins {
            view.inner.insert(outpoint, coin);
        }
        view
    }

    /// Dirty entries of the only batch written so far.
    fn single_batch(&self) -> Vec<(OutPoint, Coin, EntryFlags)> {
        assert_eq!(self.batches.len(), 1, "Expected exactly one batch");
        let mut batch = self.batches[0].clone();
        batch.sort_by_key(|(outpoint, _, _)| *outpoint);
        batch
    }
}

impl CoinsView for RecordingView {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        self.inner.get_coin(outpoint)
    }

    fn best_block(&mut self) -> BlockHash {
        self.inner.best_block()
    }

    fn batch_write(&mut self, entries: &mut CoinsMap, best_block: BlockHash) -> Result<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(Error::Backend("write rejected".into()));
        }

        self.batches.push(
            entries
                .iter()
                .filter(|(_, entry)| entry.is_dirty())
                .map(|(outpoint, entry)| (*outpoint, entry.coin.clone(), entry.flags))
                .collect(),
        );
        self.inner.batch_write(entries, best_block)
    }
}

fn outpoint(n: u8, vout: u32) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([n; 32]), vout)
}

fn coin(amount: u64, height: u32) -> Coin {
    Coin::new(amount, vec![0x51, 0x52], height, false)
}

fn block_hash(n: u8) -> BlockHash {
    BlockHash::from_byte_array([n; 32])
}

#[test]
fn test_add_then_spend_fresh_coin_never_reaches_store() {
    let tx1 = outpoint(1, 0);
    let mut store = RecordingView::default();
    {
        let mut cache = CoinsViewCache::new(&mut store);

        cache.add_coin(tx1, coin(5000, 10), false);
        let got = cache.get_coin(&tx1).unwrap().unwrap();
        assert_eq!((got.amount, got.height, got.is_spent()), (5000, 10, false));
        assert_eq!(
            cache.cache_entry(&tx1).unwrap().flags,
            EntryFlags::DIRTY | EntryFlags::FRESH
        );

        cache.spend_coin(&tx1).unwrap().unwrap();
        assert!(cache.get_coin(&tx1).unwrap().is_none_or(|coin| coin.is_spent()));

        cache.set_best_block(block_hash(1));
        cache.flush().unwrap();
        assert_eq!(cache.cache_entry_count(), 0);
        assert_eq!(cache.dynamic_memory_usage(), 0);
    }

    assert!(store.single_batch().is_empty());
    assert!(store.inner.get(&tx1).is_none());
    assert_eq!(store.inner.best_block(), block_hash(1));
}

#[test]
fn test_stacked_caches_write_only_final_state() {
    let existing = outpoint(1, 0);
    let mut store = RecordingView::with_coins([(existing, coin(100, 1))]);
    {
        let mut parent = CoinsViewCache::new(&mut store);
        {
            let mut child = CoinsViewCache::new(&mut parent);
            child.spend_coin(&existing).unwrap().unwrap();
            child.add_coin(outpoint(2, 0), coin(1, 2), false);
            child.add_coin(outpoint(2, 1), coin(2, 2), false);
            child.add_coin(outpoint(2, 2), coin(3, 2), false);
            child.set_best_block(block_hash(2));
            child.flush().unwrap();
        }

        assert_eq!(parent.best_block(), block_hash(2));
        assert!(!parent.has_coin(&existing).unwrap());

        // Further changes on the parent replace what the child left behind.
        parent.spend_coin(&outpoint(2, 1)).unwrap().unwrap();
        parent.add_coin(outpoint(2, 2), coin(30, 3), true);
        parent.set_best_block(block_hash(3));
        parent.flush().unwrap();
    }

    let batch = store.single_batch();
    let written: Vec<_> = batch
        .iter()
        .map(|(outpoint, coin, _)| (*outpoint, coin.is_spent(), coin.amount))
        .collect();
    assert_eq!(
        written,
        vec![
            (existing, true, 0),
            (outpoint(2, 0), false, 1),
            (outpoint(2, 2), false, 30),
        ]
    );

    assert!(store.inner.get(&existing).is_none());
    assert_eq!(store.inner.len(), 2);
    assert_eq!(store.inner.best_block(), block_hash(3));
}

#[test]
fn test_draining_child_into_parent_keeps_net_effect() {
    let mut store = MemoryCoinsView::new();
    let mut child_entries = CoinsMap::default();
    for vout in 0..20u32 {
        let coin = if vout % 4 == 0 {
            Coin::spent()
        } else {
            coin(vout as u64, 5)
        };
        child_entries.insert(
            outpoint(7, vout),
            subcoin_coins_view::CoinsCacheEntry::with_flags(
                coin,
                EntryFlags::DIRTY | EntryFlags::FRESH,
            ),
        );
    }
    {
        let mut parent = CoinsViewCache::new(&mut store);
        parent.merge(&mut child_entries, block_hash(5)).unwrap();
        assert!(child_entries.is_empty());
        assert_eq!(parent.cache_entry_count(), 15);
        assert!(parent.sanity_check());
        parent.flush().unwrap();
    }

    assert_eq!(store.len(), 15);
    for vout in 0..20u32 {
        assert_eq!(store.contains(&outpoint(7, vout)), vout % 4 != 0);
    }
    assert_eq!(store.best_block(), block_hash(5));
}

#[test]
fn test_child_recreates_coin_spent_in_parent() {
    let op = outpoint(3, 0);
    let mut store = RecordingView::with_coins([(op, coin(10, 1))]);
    {
        let mut parent = CoinsViewCache::new(&mut store);
        parent.spend_coin(&op).unwrap().unwrap();
        {
            let mut child = CoinsViewCache::new(&mut parent);
            // The parent's tombstone makes the child's copy FRESH.
            assert!(!child.has_coin(&op).unwrap());
            child.add_coin(op, coin(20, 2), false);
            child.flush().unwrap();
        }
        let entry = parent.cache_entry(&op).unwrap();
        assert_eq!(entry.flags, EntryFlags::DIRTY);
        assert_eq!(entry.coin.amount, 20);
        parent.flush().unwrap();
    }

    assert_eq!(store.single_batch().len(), 1);
    assert_eq!(store.inner.get(&op).unwrap().amount, 20);
}

#[test]
fn test_eviction_keeps_dirty_entries_across_layers() {
    let mut store = MemoryCoinsView::new();
    for vout in 0..32u32 {
        store.insert(outpoint(8, vout), coin(vout as u64, 1));
    }
    let options = subcoin_coins_view::CoinsCacheOptions::builder()
        .max_cache_size(8)
        .build();
    {
        let mut cache = CoinsViewCache::with_options(&mut store, options);
        for vout in 0..32u32 {
            assert!(cache.has_coin(&outpoint(8, vout)).unwrap());
            cache.add_coin(outpoint(9, vout), coin(1000 + vout as u64, 2), false);
        }

        let stats = cache.cache_stats();
        assert!(stats.evictions > 0);
        assert_eq!(stats.dirty_entries, 32);
        for vout in 0..32u32 {
            let entry = cache.cache_entry(&outpoint(9, vout)).unwrap();
            assert_eq!(entry.coin.amount, 1000 + vout as u64);
        }
        assert!(cache.sanity_check());
        cache.flush().unwrap();
    }

    assert_eq!(store.len(), 64);
}

#[test]
fn test_error_catcher_sits_below_cache_stack() {
    let op = outpoint(4, 0);
    let mut store = MemoryCoinsView::new();
    store.insert(op, coin(77, 1));
    {
        let mut catcher = CoinsViewErrorCatcher::new(&mut store);
        let mut cache = CoinsViewCache::new(&mut catcher);
        assert_eq!(cache.spend_coin(&op).unwrap().unwrap().amount, 77);
        cache.flush().unwrap();
    }
    assert!(store.is_empty());
}

#[test]
fn test_rebinding_backend_switches_lookups() {
    let op = outpoint(5, 0);
    let mut first = MemoryCoinsView::new();
    let mut second = MemoryCoinsView::new();
    second.insert(op, coin(5, 1));

    let mut cache = CoinsViewCache::new(&mut first);
    assert!(!cache.has_coin(&op).unwrap());

    cache.set_backend(&mut second);
    assert!(cache.has_coin(&op).unwrap());
}

#[test]
fn test_duplicate_coinbase_replaces_stored_coin() {
    // Coinbase of mainnet blocks 91722 and 91880, txid e3bf3d07..5fb468.
    let txid = Txid::from_byte_array(hex!(
        "68b45f58b674e94eb881cd67b04c2cba07fe5552dbf1d5385637b0d4073dbfe3"
    ));
    let op = OutPoint::new(txid, 0);
    let mut store =
        RecordingView::with_coins([(op, Coin::new(50_0000_0000, vec![0x51], 91722, true))]);
    {
        let mut cache = CoinsViewCache::new(&mut store);
        cache.add_coin(op, Coin::new(50_0000_0000, vec![0x51], 91880, true), true);
        assert_eq!(cache.cache_entry(&op).unwrap().flags, EntryFlags::DIRTY);
        cache.flush().unwrap();
    }

    let batch = store.single_batch();
    assert_eq!(batch[0].2, EntryFlags::DIRTY);
    assert_eq!(store.inner.get(&op).unwrap().height, 91880);
}

#[test]
fn test_memory_usage_follows_script_sizes() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut store = MemoryCoinsView::new();
    let mut cache = CoinsViewCache::new(&mut store);

    let mut scripts = 0usize;
    for vout in 0..64u32 {
        let len = rng.usize(1..200);
        let script: Vec<u8> = std::iter::repeat_with(|| rng.u8(..)).take(len).collect();
        let coin = Coin::new(rng.u64(1..1_000_000), script, 1, false);
        if coin.is_unspendable() {
            continue;
        }
        scripts += len;
        cache.add_coin(outpoint(6, vout), coin, false);
    }

    let stats = cache.cache_stats();
    assert!(stats.memory_usage >= scripts);
    assert_eq!(stats.memory_usage, cache.dynamic_memory_usage());
    assert_eq!(stats.entries, stats.fresh_entries);
    assert!(cache.sanity_check());

    for vout in (0..64u32).step_by(2) {
        if let Some(coin) = cache.spend_coin(&outpoint(6, vout)).unwrap() {
            scripts -= coin.script_pubkey.len();
        }
    }
    assert!(cache.dynamic_memory_usage() >= scripts);
    assert!(cache.sanity_check());
}

#[test]
fn test_flush_retries_after_backend_rejects_batch() {
    let op = outpoint(6, 1);
    let mut store = RecordingView {
        failures_left: 1,
        ..Default::default()
    };
    {
        let mut cache = CoinsViewCache::new(&mut store);
        cache.add_coin(op, coin(9, 4), false);

        let err = cache.flush().unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert!(!err.is_fatal());
        assert_eq!(cache.cache_entry_count(), 1);
        assert!(cache.sanity_check());

        cache.flush().unwrap();
        assert_eq!(cache.cache_entry_count(), 0);
    }

    assert_eq!(store.single_batch().len(), 1);
    assert_eq!(store.inner.get(&op).unwrap().amount, 9);
}
