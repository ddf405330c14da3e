//! Layered UTXO set views for Subcoin.
//!
//! This crate provides the write-back coins cache that sits between block/mempool
//! processing and the persistent UTXO store.
//!
//! ## Architecture
//!
//! - **[`CoinsView`]**: the contract every layer implements (lookup, batch write, cursor).
//! - **[`CoinsViewBacked`]**: a pass-through view with a rebindable backend.
//! - **[`CoinsViewCache`]**: an in-memory overlay tracking `DIRTY`/`FRESH` entries,
//!   bounded by an LRU eviction policy and flushed into its backend in one batch.
//! - **[`CoinsViewErrorCatcher`]**: aborts the process on unreadable backing data
//!   instead of reporting the coin as missing.
//!
//! Caches stack: a cache may be backed by another cache, arbitrarily deep, with the
//! persistent store at the bottom. Each layer borrows the one below it, so the caller
//! keeps every layer alive for as long as anything above references it.
//!
//! ## Entry flags
//!
//! - `DIRTY`: the entry differs from the backing layer and must be written on flush.
//! - `FRESH`: the backing layer has no unspent coin for the outpoint, so a spend can
//!   simply erase the entry and a flush needs no tombstone.

mod cache;
mod coin;
mod entry;
mod error;
mod error_catcher;
mod hasher;
mod log_once;
mod memory;
mod options;
mod tx;
mod view;

pub use self::cache::{CacheStats, CoinsViewCache};
pub use self::coin::{Coin, EMPTY_COIN, MAX_SCRIPT_SIZE};
pub use self::entry::{CoinsCacheEntry, CoinsMap, EntryFlags};
pub use self::error::Error;
pub use self::error_catcher::CoinsViewErrorCatcher;
pub use self::hasher::SaltedOutpointHasher;
pub use self::log_once::LogOnce;
pub use self::memory::MemoryCoinsView;
pub use self::options::{CoinsCacheOptions, CoinsCacheOptionsBuilder, DEFAULT_MAX_CACHE_SIZE};
pub use self::tx::{
    MAX_OUTPUTS_PER_TX, MAX_TX_SIZE, TxUndo, apply_outputs, find_unspent_by_txid,
    has_all_inputs, spend_inputs, update_coins,
};
pub use self::view::{CoinsCursor, CoinsView, CoinsViewBacked, CoinsViewEmpty};

/// Result type for coins view operations.
pub type Result<T> = std::result::Result<T, Error>;
