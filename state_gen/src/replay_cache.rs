use core::{num::NonZeroUsize, time::Duration};
use std::{collections::HashSet, sync::Arc};

use anyhow::{bail, Result};
use lru::LruCache;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use types::{beacon_state::BeaconState, primitives::H256};

use crate::error::Error;

const BACKOFF_FLOOR: Duration = Duration::from_nanos(100);
const BACKOFF_CEILING: Duration = Duration::from_millis(10);
const BACKOFF_FACTOR: f64 = 1.1;

/// States produced by replaying blocks, with markers for replays still running.
pub struct ReplayCache {
    states: Mutex<LruCache<H256, Arc<BeaconState>>>,
    in_progress: Mutex<HashSet<H256>>,
}

impl ReplayCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            states: Mutex::new(LruCache::new(capacity)),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn get(&self, root: H256) -> Option<Arc<BeaconState>> {
        self.states.lock().get(&root).cloned()
    }

    pub fn put(&self, root: H256, state: Arc<BeaconState>) {
        self.states.lock().put(root, state);
    }

    pub fn delete(&self, root: H256) {
        self.states.lock().pop(&root);
    }

    #[must_use]
    pub fn is_in_progress(&self, root: H256) -> bool {
        self.in_progress.lock().contains(&root)
    }

    /// Claims the replay of `root`. The claim is released when the guard is dropped.
    pub fn mark_in_progress(&self, root: H256) -> Result<InProgressGuard<'_>> {
        if !self.in_progress.lock().insert(root) {
            bail!(Error::AlreadyInProgress { root });
        }

        Ok(InProgressGuard { cache: self, root })
    }

    /// Waits for a running replay of `root` to finish and returns its result if it was cached.
    ///
    /// Returns immediately when no replay of `root` is running.
    pub async fn get_when_ready(
        &self,
        root: H256,
        cancellation_token: &CancellationToken,
    ) -> Result<Option<Arc<BeaconState>>> {
        let mut delay = BACKOFF_FLOOR;

        while self.is_in_progress(root) {
            tokio::select! {
                () = cancellation_token.cancelled() => bail!(Error::Cancelled { root }),
                () = tokio::time::sleep(delay) => {}
            }

            delay = delay.mul_f64(BACKOFF_FACTOR).min(BACKOFF_CEILING);
        }

        let state = self.get(root);

        if state.is_some() {
            debug!(?root, "replay cache hit");
        }

        Ok(state)
    }

    fn mark_not_in_progress(&self, root: H256) {
        self.in_progress.lock().remove(&root);
    }
}

pub struct InProgressGuard<'cache> {
    cache: &'cache ReplayCache,
    root: H256,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.cache.mark_not_in_progress(self.root);
    }
}
