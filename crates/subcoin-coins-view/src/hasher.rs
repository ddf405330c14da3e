//! Salted hashing for outpoint-keyed maps.

use rand::RngCore;
use rand::rngs::OsRng;
use siphasher::sip::SipHasher24;
use std::hash::BuildHasher;
use std::sync::OnceLock;

/// Salt shared by every cache map in the process.
static SALT: OnceLock<(u64, u64)> = OnceLock::new();

/// SipHash-2-4 keyed with a per-process secret.
///
/// Outpoints are attacker controlled (anyone can craft transactions), so the cache
/// maps must not use a hash an adversary can predict and collide.
#[derive(Clone, Copy)]
pub struct SaltedOutpointHasher {
    k0: u64,
    k1: u64,
}

impl SaltedOutpointHasher {
    pub fn new() -> Self {
        let (k0, k1) = *SALT.get_or_init(|| (OsRng.next_u64(), OsRng.next_u64()));
        Self { k0, k1 }
    }
}

impl Default for SaltedOutpointHasher {
    fn default() -> Self {
        Self::new()
    }
}

// Keys stay out of debug output.
impl std::fmt::Debug for SaltedOutpointHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaltedOutpointHasher").finish_non_exhaustive()
    }
}

impl BuildHasher for SaltedOutpointHasher {
    type Hasher = SipHasher24;

    fn build_hasher(&self) -> Self::Hasher {
        SipHasher24::new_with_keys(self.k0, self.k1)
    }
}
