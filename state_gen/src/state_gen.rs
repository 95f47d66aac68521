use core::{
    num::{NonZeroU64, NonZeroUsize},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::sync::Arc;

use anyhow::{bail, Result};
use derivative::Derivative;
use helper_functions::misc;
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use transition_functions::StateTransition;
use types::{
    beacon_state::BeaconState,
    containers::SignedBeaconBlock,
    primitives::{Slot, H256},
};

use crate::{
    caches::{EpochBoundaryCache, HotStateCache, SyncStateCache},
    error::Error,
    replay_cache::ReplayCache,
    storage::{StateSummary, Storage},
};

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct StateGenConfig {
    #[derivative(Default(value = "nonzero!(64_usize)"))]
    pub hot_state_capacity: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(8_usize)"))]
    pub epoch_boundary_capacity: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(8_usize)"))]
    pub replay_cache_capacity: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(2048_u64)"))]
    pub slots_per_archived_point: NonZeroU64,
}

#[derive(Default)]
struct SaveHotStateDb {
    enabled: bool,
    saved_roots: Vec<H256>,
}

/// Access to beacon states by block root, backed by layered caches and block replay.
pub struct StateGen {
    config: StateGenConfig,
    storage: Arc<Storage>,
    transition: Arc<StateTransition>,
    hot_states: HotStateCache,
    epoch_boundary_states: EpochBoundaryCache,
    sync_states: SyncStateCache,
    replay_cache: ReplayCache,
    save_hot_state_db: Mutex<SaveHotStateDb>,
    finalized_slot: AtomicU64,
    backfill_slot: AtomicU64,
    replays: AtomicUsize,
}

impl StateGen {
    #[must_use]
    pub fn new(
        config: StateGenConfig,
        storage: Arc<Storage>,
        transition: Arc<StateTransition>,
    ) -> Self {
        Self {
            config,
            storage,
            transition,
            hot_states: HotStateCache::new(config.hot_state_capacity),
            epoch_boundary_states: EpochBoundaryCache::new(config.epoch_boundary_capacity),
            sync_states: SyncStateCache::default(),
            replay_cache: ReplayCache::new(config.replay_cache_capacity),
            save_hot_state_db: Mutex::default(),
            finalized_slot: AtomicU64::new(0),
            backfill_slot: AtomicU64::new(0),
            replays: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    #[must_use]
    pub const fn transition(&self) -> &Arc<StateTransition> {
        &self.transition
    }

    /// Number of block replays run so far.
    #[must_use]
    pub fn replay_count(&self) -> usize {
        self.replays.load(Ordering::Relaxed)
    }

    /// Lowest slot with block data after a checkpoint sync.
    pub fn set_backfill_slot(&self, slot: Slot) {
        self.backfill_slot.store(slot, Ordering::Relaxed);
    }

    #[must_use]
    pub fn finalized_slot(&self) -> Slot {
        self.finalized_slot.load(Ordering::Relaxed)
    }

    /// Records the post-state of `root` in the hot caches.
    pub fn save_state(&self, root: H256, state: Arc<BeaconState>) -> Result<()> {
        self.storage.save_state_summary(StateSummary {
            slot: state.slot,
            root,
        })?;

        if misc::is_epoch_start(self.transition.config(), state.slot) {
            self.epoch_boundary_states.put(root, Arc::clone(&state));

            let mut save_hot_state_db = self.save_hot_state_db.lock();

            if save_hot_state_db.enabled {
                self.storage.save_state(root, &state)?;
                save_hot_state_db.saved_roots.push(root);
            }
        }

        self.hot_states.put(root, state);

        Ok(())
    }

    /// Records a state produced by initial sync without tracking it in the hot cache.
    pub fn save_sync_state(&self, root: H256, state: Arc<BeaconState>) {
        self.sync_states.put(root, state);
    }

    pub fn clear_sync_states(&self) {
        self.sync_states.clear();
    }

    /// Persists `state` immediately, bypassing the caches.
    pub fn force_checkpoint(&self, root: H256, state: &BeaconState) -> Result<()> {
        self.storage.save_state(root, state)
    }

    pub fn has_state(&self, root: H256) -> Result<bool> {
        Ok(self.hot_states.contains(root)
            || self.epoch_boundary_states.contains(root)
            || self.sync_states.contains(root)
            || self.replay_cache.get(root).is_some()
            || self.storage.has_state(root)?)
    }

    pub fn delete_state(&self, root: H256) -> Result<()> {
        self.hot_states.delete(root);
        self.epoch_boundary_states.delete(root);
        self.sync_states.delete(root);
        self.replay_cache.delete(root);
        self.storage.delete_state(root)
    }

    pub fn enable_save_hot_state_to_db(&self) {
        self.save_hot_state_db.lock().enabled = true;
        info!("saving hot states to database enabled");
    }

    /// Stops persisting hot states and deletes the ones persisted while enabled.
    pub fn disable_save_hot_state_to_db(&self) -> Result<()> {
        let saved_roots = {
            let mut save_hot_state_db = self.save_hot_state_db.lock();
            save_hot_state_db.enabled = false;
            core::mem::take(&mut save_hot_state_db.saved_roots)
        };

        for root in &saved_roots {
            self.storage.delete_state(*root)?;
        }

        info!(deleted = saved_roots.len(), "saving hot states to database disabled");

        Ok(())
    }

    #[must_use]
    pub fn saved_hot_state_count(&self) -> usize {
        self.save_hot_state_db.lock().saved_roots.len()
    }

    pub fn genesis_state(&self) -> Result<Arc<BeaconState>> {
        let Some(root) = self.storage.genesis_block_root()? else {
            bail!(Error::GenesisStateNotFound);
        };

        match self.storage.state(root)? {
            Some(state) => Ok(state),
            None => bail!(Error::GenesisStateNotFound),
        }
    }

    /// Returns a copy of the post-state of block `root`.
    pub async fn state_by_root(
        &self,
        root: H256,
        cancellation_token: &CancellationToken,
    ) -> Result<BeaconState> {
        let state = self
            .state_by_root_without_copy(root, cancellation_token)
            .await?;

        Ok(BeaconState::clone(&state))
    }

    /// Like [`StateGen::state_by_root`] but returns the cached state itself.
    ///
    /// Callers must not assume exclusive access to the result.
    pub async fn state_by_root_without_copy(
        &self,
        root: H256,
        cancellation_token: &CancellationToken,
    ) -> Result<Arc<BeaconState>> {
        if root.is_zero() {
            return self.genesis_state();
        }

        loop {
            if let Some(state) = self.loaded_state(root)? {
                return Ok(state);
            }

            if let Some(state) = self
                .replay_cache
                .get_when_ready(root, cancellation_token)
                .await?
            {
                return Ok(state);
            }

            let guard = match self.replay_cache.mark_in_progress(root) {
                Ok(guard) => guard,
                Err(error)
                    if matches!(
                        error.downcast_ref::<Error>(),
                        Some(Error::AlreadyInProgress { .. }),
                    ) =>
                {
                    if let Some(state) = self
                        .replay_cache
                        .get_when_ready(root, cancellation_token)
                        .await?
                    {
                        return Ok(state);
                    }

                    continue;
                }
                Err(error) => return Err(error),
            };

            let state = self.replay_to(root, cancellation_token).await?;

            self.replay_cache.put(root, Arc::clone(&state));

            drop(guard);

            return Ok(state);
        }
    }

    /// State stored for `slot` by cold migration.
    pub fn archived_state(&self, slot: Slot) -> Result<Option<Arc<BeaconState>>> {
        self.storage.archived_state(slot)
    }

    /// Persists archived states for the finalized range and drops hot states older than it.
    ///
    /// `finalized_root` must be the block of the new finalized checkpoint.
    pub async fn migrate_to_cold(
        &self,
        finalized_root: H256,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        let Some(finalized_block) = self.storage.block(finalized_root)? else {
            bail!(Error::BlockNotFound {
                root: finalized_root,
            });
        };

        let old_finalized_slot = self.finalized_slot();
        let new_finalized_slot = finalized_block.slot();

        if new_finalized_slot <= old_finalized_slot && old_finalized_slot != 0 {
            return Ok(());
        }

        let interval = self.config.slots_per_archived_point.get();
        let chain = self.chain_to_slot(finalized_root, old_finalized_slot)?;

        let archived_slots = (old_finalized_slot..new_finalized_slot)
            .filter(|slot| slot % interval == 0)
            .collect::<Vec<_>>();

        for slot in archived_slots {
            if self.storage.has_archived_point(slot)? {
                continue;
            }

            // The highest block at or below the archived slot.
            let Some((root, _)) = chain.iter().rev().find(|(_, block_slot)| *block_slot <= slot)
            else {
                continue;
            };

            let mut state = self
                .state_by_root_without_copy(*root, cancellation_token)
                .await?;

            if state.slot < slot {
                let mut advanced = BeaconState::clone(&state);
                self.transition.process_slots(&mut advanced, slot)?;
                state = Arc::new(advanced);
            }

            self.storage.save_archived_point(slot, *root, &state)?;
        }

        self.save_hot_state_db.lock().saved_roots.clear();
        self.hot_states.prune_before(new_finalized_slot);
        self.epoch_boundary_states.prune_before(new_finalized_slot);
        self.finalized_slot.store(new_finalized_slot, Ordering::Relaxed);

        info!(
            old_finalized_slot,
            new_finalized_slot,
            "migrated finalized states to cold storage",
        );

        Ok(())
    }

    fn loaded_state(&self, root: H256) -> Result<Option<Arc<BeaconState>>> {
        if let Some(state) = self.hot_states.get(root) {
            debug!(?root, "hot state cache hit");
            return Ok(Some(state));
        }

        if let Some(state) = self.epoch_boundary_states.get(root) {
            debug!(?root, "epoch boundary state cache hit");
            return Ok(Some(state));
        }

        if let Some(state) = self.sync_states.get(root) {
            debug!(?root, "sync state cache hit");
            return Ok(Some(state));
        }

        self.storage.state(root)
    }

    async fn replay_to(
        &self,
        root: H256,
        cancellation_token: &CancellationToken,
    ) -> Result<Arc<BeaconState>> {
        let Some(target) = self.storage.block(root)? else {
            bail!(Error::BlockNotFound { root });
        };

        let (ancestor_state, blocks) = self.ancestor_state_and_blocks(root, target)?;

        debug!(
            ?root,
            ancestor_slot = ancestor_state.slot,
            blocks = blocks.len(),
            "replaying blocks",
        );

        let transition = Arc::clone(&self.transition);
        let cancellation_token = cancellation_token.clone();

        // Replays are CPU bound and must not stall the runtime threads.
        let state = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut state = BeaconState::clone(&ancestor_state);

            for block in blocks.iter().rev() {
                if cancellation_token.is_cancelled() {
                    bail!(Error::Cancelled { root });
                }

                state = transition.execute_trusted(state, block)?;
            }

            Ok(state)
        })
        .await??;

        self.replays.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(state))
    }

    /// Walks parents from `target` until a block with a loaded state is found.
    ///
    /// Returns the ancestor state and the blocks to apply to it, newest first.
    fn ancestor_state_and_blocks(
        &self,
        root: H256,
        target: Arc<SignedBeaconBlock>,
    ) -> Result<(Arc<BeaconState>, Vec<Arc<SignedBeaconBlock>>)> {
        let mut blocks = vec![];
        let mut block = target;
        let mut block_root = root;

        loop {
            let parent_root = block.parent_root();

            if parent_root.is_zero() {
                bail!(Error::NoDataForSlot { slot: block.slot() });
            }

            blocks.push(block);

            if let Some(state) = self
                .loaded_state(parent_root)?
                .or_else(|| self.replay_cache.get(parent_root))
            {
                return Ok((state, blocks));
            }

            let Some(parent) = self.storage.block(parent_root)? else {
                let slot = blocks.last().map_or(0, |child| child.slot());

                debug!(
                    ?block_root,
                    ?parent_root,
                    slot,
                    backfill_slot = self.backfill_slot.load(Ordering::Relaxed),
                    "ancestor block missing",
                );

                bail!(Error::NoDataForSlot { slot });
            };

            block = parent;
            block_root = parent_root;
        }
    }

    /// Roots and slots of the chain ending at `root`, oldest first, down to `min_slot`.
    fn chain_to_slot(&self, root: H256, min_slot: Slot) -> Result<Vec<(H256, Slot)>> {
        let mut chain = vec![];
        let mut current = root;

        while let Some(block) = self.storage.block(current)? {
            chain.push((current, block.slot()));

            if block.slot() <= min_slot || block.parent_root().is_zero() {
                break;
            }

            current = block.parent_root();
        }

        chain.reverse();

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::try_join_all;
    use types::{config::Config, traits::ContentHash as _};

    use super::*;

    struct Chain {
        state_gen: Arc<StateGen>,
        roots: Vec<H256>,
        states: Vec<Arc<BeaconState>>,
    }

    // Saves a genesis state and `length` empty blocks but only the genesis state.
    fn chain(config: StateGenConfig, length: u64) -> Result<Chain> {
        let chain_config = Config::minimal();
        let storage = Arc::new(Storage::in_memory());
        let transition = Arc::new(StateTransition::new(Arc::new(chain_config.clone())));
        let state_gen = Arc::new(StateGen::new(config, Arc::clone(&storage), transition));

        let genesis_state = factory::min_genesis_state(&chain_config)?;
        let genesis_block = factory::genesis_block(&genesis_state);
        let genesis_root = genesis_block.message.hash_tree_root();

        storage.save_genesis_block_root(genesis_root)?;
        storage.save_block(genesis_root, &genesis_block)?;
        storage.save_state(genesis_root, &genesis_state)?;

        let mut roots = vec![genesis_root];
        let mut states = vec![Arc::clone(&genesis_state)];
        let mut state = genesis_state;

        for slot in 1..=length {
            let (block, post_state) =
                factory::empty_block(&chain_config, state, slot, H256::zero())?;
            let root = block.message.hash_tree_root();

            storage.save_block(root, &block)?;

            roots.push(root);
            states.push(Arc::clone(&post_state));
            state = post_state;
        }

        Ok(Chain {
            state_gen,
            roots,
            states,
        })
    }

    #[tokio::test]
    async fn zero_root_yields_genesis_state() -> Result<()> {
        let Chain {
            state_gen, states, ..
        } = chain(StateGenConfig::default(), 0)?;

        let state = state_gen
            .state_by_root(H256::zero(), &CancellationToken::new())
            .await?;

        assert_eq!(state, *states[0]);

        Ok(())
    }

    #[tokio::test]
    async fn missing_states_are_replayed_from_the_closest_ancestor() -> Result<()> {
        let Chain {
            state_gen,
            roots,
            states,
        } = chain(StateGenConfig::default(), 5)?;

        let token = CancellationToken::new();

        state_gen.save_state(roots[2], Arc::clone(&states[2]))?;

        let state = state_gen.state_by_root(roots[5], &token).await?;

        assert_eq!(state, *states[5]);
        assert_eq!(state_gen.replay_count(), 1);

        // The replayed state is served from the replay cache afterwards.
        state_gen.state_by_root(roots[5], &token).await?;

        assert_eq!(state_gen.replay_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_replay_once() -> Result<()> {
        let Chain {
            state_gen,
            roots,
            states,
        } = chain(StateGenConfig::default(), 4)?;

        let token = CancellationToken::new();
        let target = roots[4];

        let requests = (0..8).map(|_| {
            let state_gen = Arc::clone(&state_gen);
            let token = token.clone();

            tokio::spawn(async move { state_gen.state_by_root(target, &token).await })
        });

        let results = try_join_all(requests).await?;

        for result in results {
            assert_eq!(result?, *states[4]);
        }

        assert_eq!(state_gen.replay_count(), 1);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_replay_releases_its_marker() -> Result<()> {
        let Chain {
            state_gen,
            roots,
            states,
        } = chain(StateGenConfig::default(), 4)?;

        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let error = state_gen
            .state_by_root(roots[4], &cancelled)
            .await
            .expect_err("replay should stop once cancelled");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::Cancelled { .. }),
        ));
        assert_eq!(state_gen.replay_count(), 0);

        let state = state_gen
            .state_by_root(roots[4], &CancellationToken::new())
            .await?;

        assert_eq!(state, *states[4]);
        assert_eq!(state_gen.replay_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn missing_ancestors_fail_with_no_data_for_slot() -> Result<()> {
        let Chain {
            state_gen, roots, ..
        } = chain(StateGenConfig::default(), 3)?;

        state_gen.storage().delete_block(roots[1])?;

        let error = state_gen
            .state_by_root(roots[3], &CancellationToken::new())
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("replay succeeded without an ancestor"))?;

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::NoDataForSlot { slot: 2 }),
        ));

        Ok(())
    }

    #[tokio::test]
    async fn cold_migration_archives_states_once() -> Result<()> {
        let config = StateGenConfig {
            slots_per_archived_point: nonzero!(4_u64),
            ..StateGenConfig::default()
        };

        let Chain {
            state_gen,
            roots,
            states,
        } = chain(config, 10)?;

        let token = CancellationToken::new();

        state_gen.enable_save_hot_state_to_db();
        state_gen.save_state(roots[8], Arc::clone(&states[8]))?;

        assert_eq!(state_gen.saved_hot_state_count(), 1);

        state_gen.migrate_to_cold(roots[9], &token).await?;

        assert_eq!(state_gen.finalized_slot(), 9);
        assert_eq!(state_gen.saved_hot_state_count(), 0);

        for slot in [0, 4, 8] {
            let archived = state_gen
                .archived_state(slot)?
                .ok_or_else(|| anyhow::anyhow!("slot {slot} not archived"))?;

            assert_eq!(archived.slot, slot);
        }

        assert!(state_gen.archived_state(9)?.is_none());

        let replays = state_gen.replay_count();

        state_gen.migrate_to_cold(roots[9], &token).await?;

        assert_eq!(state_gen.replay_count(), replays);

        Ok(())
    }

    #[tokio::test]
    async fn disabling_hot_state_saving_deletes_saved_states() -> Result<()> {
        let Chain {
            state_gen,
            roots,
            states,
        } = chain(StateGenConfig::default(), 8)?;

        state_gen.enable_save_hot_state_to_db();
        state_gen.save_state(roots[8], Arc::clone(&states[8]))?;

        assert!(state_gen.storage().has_state(roots[8])?);

        state_gen.disable_save_hot_state_to_db()?;

        assert!(!state_gen.storage().has_state(roots[8])?);
        assert!(state_gen.has_state(roots[8])?);

        state_gen.delete_state(roots[8])?;

        assert!(!state_gen.has_state(roots[8])?);

        Ok(())
    }
}
