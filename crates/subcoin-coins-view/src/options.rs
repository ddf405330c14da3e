//! Coins cache configuration.

/// Default memory budget of a coins cache, in bytes.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 450 << 20;

/// Default share of the budget eviction shrinks the cache to, in percent.
const DEFAULT_EVICTION_TARGET_PERCENT: u8 = 80;

/// Configuration options for a coins cache.
#[derive(Clone, Debug)]
pub struct CoinsCacheOptions {
    /// Memory usage above which non-dirty entries are evicted, in bytes.
    pub max_cache_size: usize,

    /// Eviction stops once usage is at or below this percentage of `max_cache_size`.
    pub eviction_target_percent: u8,
}

impl Default for CoinsCacheOptions {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            eviction_target_percent: DEFAULT_EVICTION_TARGET_PERCENT,
        }
    }
}

impl CoinsCacheOptions {
    /// Create new cache options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuring cache options
    pub fn builder() -> CoinsCacheOptionsBuilder {
        CoinsCacheOptionsBuilder::default()
    }

    /// Memory usage eviction aims for.
    pub fn eviction_target(&self) -> usize {
        self.max_cache_size / 100 * self.eviction_target_percent as usize
            + self.max_cache_size % 100 * self.eviction_target_percent as usize / 100
    }
}

/// Builder pattern for CoinsCacheOptions
#[derive(Default)]
pub struct CoinsCacheOptionsBuilder {
    options: CoinsCacheOptions,
}

impl CoinsCacheOptionsBuilder {
    /// Set the memory budget in bytes
    pub fn max_cache_size(mut self, size: usize) -> Self {
        self.options.max_cache_size = size;
        self
    }

    /// Set the eviction target, clamped to 100%
    pub fn eviction_target_percent(mut self, percent: u8) -> Self {
        self.options.eviction_target_percent = percent.min(100);
        self
    }

    /// Build the final CoinsCacheOptions
    pub fn build(self) -> CoinsCacheOptions {
        self.options
    }
}
