//! Cache entries and their flags.

use crate::{Coin, SaltedOutpointHasher};
use bitcoin::OutPoint;
use bitflags::bitflags;
use std::collections::HashMap;

bitflags! {
    /// Cache entry state relative to the backing layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// The entry differs from the backing layer and must be written on flush.
        const DIRTY = 1 << 0;
        /// The backing layer has no unspent coin for this outpoint.
        ///
        /// A `FRESH` entry can be erased once spent, nothing below needs to learn
        /// about the spend.
        const FRESH = 1 << 1;
    }
}

impl Default for EntryFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// A coin together with its cache flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinsCacheEntry {
    pub coin: Coin,
    pub flags: EntryFlags,
}

impl CoinsCacheEntry {
    pub fn new(coin: Coin) -> Self {
        Self {
            coin,
            flags: EntryFlags::empty(),
        }
    }

    pub fn with_flags(coin: Coin, flags: EntryFlags) -> Self {
        Self { coin, flags }
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    pub fn is_fresh(&self) -> bool {
        self.flags.contains(EntryFlags::FRESH)
    }
}

/// Pending cache entries keyed by outpoint, as handed from one layer to the next.
pub type CoinsMap = HashMap<OutPoint, CoinsCacheEntry, SaltedOutpointHasher>;
