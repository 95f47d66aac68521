use core::num::NonZeroUsize;
use std::collections::HashSet;

use derivative::Derivative;
use itertools::Itertools as _;
use lru::LruCache;
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use tracing::debug;
use types::primitives::H256;

use crate::fork_choice::ForkChoice;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct ForkChoiceCacheConfig {
    #[derivative(Default(value = "nonzero!(4_usize)"))]
    pub capacity: NonZeroUsize,
    /// Number of consecutive lookups an entry may go unused before it is dropped.
    #[derivative(Default(value = "8"))]
    pub max_inactivity: usize,
}

struct Entry {
    fork_choice: ForkChoice,
    roots: HashSet<H256>,
    inactivity: usize,
}

/// Recent fork choice snapshots keyed by the set of blocks they contain.
pub struct ForkChoiceCache {
    config: ForkChoiceCacheConfig,
    entries: Mutex<LruCache<H256, Entry>>,
}

impl Default for ForkChoiceCache {
    fn default() -> Self {
        Self::new(ForkChoiceCacheConfig::default())
    }
}

impl ForkChoiceCache {
    #[must_use]
    pub fn new(config: ForkChoiceCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(LruCache::new(config.capacity)),
        }
    }

    /// Stores a snapshot of `fork_choice`.
    pub fn add(&self, fork_choice: &ForkChoice) {
        let key = fork_choice.roots_key();

        let entry = Entry {
            fork_choice: fork_choice.clone(),
            roots: fork_choice.roots(),
            inactivity: 0,
        };

        self.entries.lock().put(key, entry);
    }

    /// Finds the largest cached snapshot whose blocks are all in `target_roots`.
    ///
    /// Returns a copy of the snapshot and the roots it lacks, sorted.
    pub fn get_compatible(&self, target_roots: &HashSet<H256>) -> Option<(ForkChoice, Vec<H256>)> {
        let mut entries = self.entries.lock();

        let best_key = entries
            .iter()
            .filter(|(_, entry)| entry.roots.is_subset(target_roots))
            .max_by_key(|(_, entry)| entry.roots.len())
            .map(|(key, _)| *key);

        let mut expired = vec![];

        for (key, entry) in entries.iter_mut() {
            if Some(*key) == best_key {
                entry.inactivity = 0;
            } else {
                entry.inactivity += 1;

                if entry.inactivity > self.config.max_inactivity {
                    expired.push(*key);
                }
            }
        }

        for key in expired {
            entries.pop(&key);
        }

        let Some(entry) = best_key.and_then(|key| entries.get(&key)) else {
            debug!(roots = target_roots.len(), "no compatible fork choice snapshot");
            return None;
        };

        let missing = target_roots.difference(&entry.roots).copied().sorted().collect();

        Some((entry.fork_choice.clone(), missing))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
