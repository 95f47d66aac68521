use core::{
    pin::pin,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};
use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, ensure, Context as _, Result};
use arc_swap::ArcSwap;
use execution_engine::ExecutionEngine;
use fork_choice_store::{
    BlockInfo, Checkpoints, Error as ForkChoiceError, ForkChoice, ForkChoiceCache,
    ForkChoiceConfig, Store,
};
use futures::StreamExt as _;
use helper_functions::{accessors, misc};
use operation_pools::{
    AttestationPool, ExitPool, PrevotePool, SlashingPool, SyncCommitteeMessagePool,
    WithdrawalPool,
};
use parking_lot::Mutex;
use state_gen::{StateGen, Storage};
use tokio::{
    sync::{oneshot, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use transition_functions::{genesis, StateTransition};
use types::{
    beacon_state::BeaconState,
    config::Config,
    consts::GENESIS_EPOCH,
    containers::{Attestation, Checkpoint, Deposit, SignedBeaconBlock},
    nonstandard::PayloadStatus,
    primitives::{Epoch, Slot, UnixSeconds, ValidatorIndex, H256},
    traits::ContentHash as _,
};

use crate::{
    config::ChainServiceConfig,
    creators::CreatorsCache,
    dag_finalizer::DagFinalizer,
    deposit_trie::{DepositSnapshot, DepositTrie},
    error::Error,
    events::{Event, EventChannels, FinalizedCheckpointEvent, NewHeadEvent, ReorgEvent},
    head::{Head, HeadCache},
    head_feed::HeadFeed,
    init_sync_cache::InitSyncBlockCache,
    spine_cache::{FinalizedSpines, OptimisticSpines},
};

/// Data the deposit contract watcher delivers once enough deposits have been made.
#[derive(Clone, Debug)]
pub struct ChainStarted {
    pub genesis_time: UnixSeconds,
    pub eth1_block_hash: H256,
    pub deposits: Vec<Deposit>,
}

pub struct Pools {
    pub attestations: AttestationPool,
    pub exits: ExitPool,
    pub withdrawals: WithdrawalPool,
    pub prevotes: PrevotePool,
    pub slashings: SlashingPool,
    pub sync_committee_messages: SyncCommitteeMessagePool,
}

impl Pools {
    fn new(chain_config: &Arc<Config>) -> Self {
        Self {
            attestations: AttestationPool::new(Arc::clone(chain_config)),
            exits: ExitPool::new(Arc::clone(chain_config)),
            withdrawals: WithdrawalPool::new(Arc::clone(chain_config)),
            prevotes: PrevotePool::new(Arc::clone(chain_config)),
            slashings: SlashingPool::new(Arc::clone(chain_config)),
            sync_committee_messages: SyncCommitteeMessagePool::new(),
        }
    }
}

/// Coordinates block import, fork choice, state generation and DAG finalization.
pub struct ChainService<E> {
    pub(crate) chain_config: Arc<Config>,
    pub(crate) config: ChainServiceConfig,
    pub(crate) execution_engine: Arc<E>,
    pub(crate) storage: Arc<Storage>,
    pub(crate) state_gen: Arc<StateGen>,
    pub(crate) store: Store,
    pub(crate) fork_choice: ArcSwap<ForkChoice>,
    pub(crate) fork_choice_cache: ForkChoiceCache,
    pub(crate) pools: Pools,
    pub(crate) head: HeadCache,
    pub(crate) event_channels: Arc<EventChannels>,
    pub(crate) on_block_mutex: AsyncMutex<()>,
    pub(crate) processing: Mutex<HashSet<H256>>,
    pub(crate) finalized_spines: Arc<FinalizedSpines>,
    pub(crate) optimistic_spines: OptimisticSpines,
    pub(crate) creators: CreatorsCache,
    pub(crate) deposit_trie: DepositTrie,
    pub(crate) init_sync_cache: Arc<InitSyncBlockCache>,
    pub(crate) head_feed: Arc<HeadFeed>,
    pub(crate) dag_finalizer: Arc<DagFinalizer<E>>,
    pub(crate) syncing: AtomicBool,
    pub(crate) started: AtomicBool,
    pub(crate) genesis_time: AtomicU64,
    pub(crate) current_slot: AtomicU64,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: ExecutionEngine + 'static> ChainService<E> {
    pub fn new(
        chain_config: Arc<Config>,
        config: ChainServiceConfig,
        execution_engine: Arc<E>,
        storage: Arc<Storage>,
    ) -> Result<Arc<Self>> {
        let transition = Arc::new(StateTransition::new(Arc::clone(&chain_config)));

        let state_gen = Arc::new(StateGen::new(
            config.state_gen,
            Arc::clone(&storage),
            transition,
        ));

        let finalized_spines = Arc::new(FinalizedSpines::default());
        let init_sync_cache = Arc::new(InitSyncBlockCache::default());

        let dag_finalizer = Arc::new(DagFinalizer::new(
            Arc::clone(&chain_config),
            Arc::clone(&execution_engine),
            Arc::clone(&finalized_spines),
            Arc::clone(&state_gen),
            Arc::clone(&init_sync_cache),
        ));

        let fork_choice = ForkChoice::new(
            ForkChoiceConfig::from(chain_config.as_ref()),
            GENESIS_EPOCH,
            GENESIS_EPOCH,
        );

        let deposit_trie = DepositTrie::load(&storage)?;

        Ok(Arc::new(Self {
            pools: Pools::new(&chain_config),
            chain_config,
            config,
            execution_engine,
            storage,
            state_gen,
            store: Store::default(),
            fork_choice: ArcSwap::from_pointee(fork_choice),
            fork_choice_cache: ForkChoiceCache::new(config.fork_choice_cache),
            head: HeadCache::default(),
            event_channels: Arc::new(EventChannels::new(config.max_events)),
            on_block_mutex: AsyncMutex::new(()),
            processing: Mutex::default(),
            finalized_spines,
            optimistic_spines: OptimisticSpines::default(),
            creators: CreatorsCache::default(),
            deposit_trie,
            init_sync_cache,
            head_feed: Arc::new(HeadFeed::new(config.head_feed_capacity)),
            dag_finalizer,
            syncing: AtomicBool::new(false),
            started: AtomicBool::new(false),
            genesis_time: AtomicU64::new(0),
            current_slot: AtomicU64::new(0),
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::default(),
        }))
    }

    #[must_use]
    pub const fn chain_config(&self) -> &Arc<Config> {
        &self.chain_config
    }

    #[must_use]
    pub const fn config(&self) -> &ChainServiceConfig {
        &self.config
    }

    #[must_use]
    pub const fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    #[must_use]
    pub const fn state_gen(&self) -> &Arc<StateGen> {
        &self.state_gen
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn fork_choice(&self) -> Arc<ForkChoice> {
        self.fork_choice.load_full()
    }

    #[must_use]
    pub const fn pools(&self) -> &Pools {
        &self.pools
    }

    #[must_use]
    pub const fn event_channels(&self) -> &Arc<EventChannels> {
        &self.event_channels
    }

    #[must_use]
    pub fn finalized_spines(&self) -> &FinalizedSpines {
        &self.finalized_spines
    }

    #[must_use]
    pub fn optimistic_spines(&self) -> Vec<Vec<H256>> {
        self.optimistic_spines.get()
    }

    #[must_use]
    pub fn head(&self) -> Option<Arc<Head>> {
        self.head.head()
    }

    #[must_use]
    pub fn head_root(&self) -> H256 {
        self.head.head_root()
    }

    #[must_use]
    pub fn head_slot(&self) -> Slot {
        self.head.head_slot()
    }

    #[must_use]
    pub fn head_block(&self) -> Option<Arc<SignedBeaconBlock>> {
        self.head.head_block()
    }

    #[must_use]
    pub fn head_state(&self) -> Option<BeaconState> {
        self.head.head_state()
    }

    #[must_use]
    pub fn head_state_without_copy(&self) -> Option<Arc<BeaconState>> {
        self.head.head_state_without_copy()
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.store.justified_checkpoint()
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.store.finalized_checkpoint()
    }

    #[must_use]
    pub fn genesis_time(&self) -> UnixSeconds {
        self.genesis_time.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_slot(&self) -> Slot {
        self.current_slot.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Relaxed)
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.syncing.store(syncing, Ordering::Relaxed);
    }

    /// Leaves initial sync and announces it to subscribers.
    pub fn set_synced(&self) {
        self.set_syncing(false);
        self.event_channels.send_synced_event(unix_time_now());
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn deposit_snapshot(&self) -> DepositSnapshot {
        self.deposit_trie.snapshot()
    }

    pub fn current_creators(&self) -> Result<Vec<ValidatorIndex>> {
        let state = self.head_state_without_copy().ok_or(Error::NotStarted)?;
        self.creators.current_creators(&self.chain_config, &state)
    }

    pub fn is_optimistic(&self, root: H256) -> Result<bool> {
        self.fork_choice().is_optimistic(root)
    }

    pub fn set_optimistic_to_valid(&self, root: H256) -> Result<()> {
        self.fork_choice().set_optimistic_to_valid(root)
    }

    /// Starts the chain from a genesis state built elsewhere.
    pub async fn start_from_genesis_state(
        self: &Arc<Self>,
        genesis_state: Arc<BeaconState>,
    ) -> Result<()> {
        let genesis_block = Arc::new(genesis::beacon_block(&genesis_state));
        let genesis_root = genesis_block.message.hash_tree_root();

        self.storage.save_block(genesis_root, &genesis_block)?;
        self.storage.save_genesis_block_root(genesis_root)?;
        self.state_gen.force_checkpoint(genesis_root, &genesis_state)?;
        self.state_gen.save_state(genesis_root, Arc::clone(&genesis_state))?;

        let checkpoint = Checkpoint {
            epoch: GENESIS_EPOCH,
            root: genesis_root,
        };

        self.storage.save_justified_checkpoint(checkpoint)?;
        self.storage.save_finalized_checkpoint(checkpoint)?;
        self.storage.save_last_validated_checkpoint(checkpoint)?;

        let anchor = Arc::new(Head {
            slot: genesis_block.slot(),
            root: genesis_root,
            block: genesis_block,
            state: genesis_state,
        });

        self.initialize(&anchor, checkpoint, checkpoint, true)?;
        self.save_head(genesis_root).await?;

        info!(?genesis_root, "chain started from genesis state");

        self.finish_start(&anchor.state);

        Ok(())
    }

    /// Waits for the deposit contract to reach genesis conditions and starts from the resulting
    /// genesis state.
    pub async fn start_from_powchain(
        self: &Arc<Self>,
        chain_started: oneshot::Receiver<ChainStarted>,
    ) -> Result<()> {
        let ChainStarted {
            genesis_time,
            eth1_block_hash,
            deposits,
        } = chain_started.await.context(Error::ChainStartedMissing)?;

        info!(
            genesis_time,
            deposits = deposits.len(),
            "chain start event received",
        );

        let genesis_state = genesis::initialize_state(
            &self.chain_config,
            genesis_time,
            eth1_block_hash,
            &deposits,
        )?;

        self.start_from_genesis_state(Arc::new(genesis_state))
            .await
    }

    /// Resumes from the finalized checkpoint in storage and replays blocks up to the saved head.
    pub async fn start_from_saved_state(self: &Arc<Self>) -> Result<()> {
        let Some(finalized) = self.storage.finalized_checkpoint()? else {
            bail!(Error::NoSavedState);
        };

        let justified = self.storage.justified_checkpoint()?.unwrap_or(finalized);

        let Some(finalized_block) = self.storage.block(finalized.root)? else {
            bail!(Error::UnknownBlock {
                root: finalized.root,
            });
        };

        let Some(finalized_state) = self.storage.state(finalized.root)? else {
            bail!(Error::NoSavedState);
        };

        self.state_gen
            .save_state(finalized.root, Arc::clone(&finalized_state))?;

        let last_validated = self.storage.last_validated_checkpoint()?;

        // Read before `initialize` replaces it with the anchor root.
        let saved_head_root = self.storage.head_block_root()?;

        let anchor = Arc::new(Head {
            slot: finalized_block.slot(),
            root: finalized.root,
            block: finalized_block,
            state: finalized_state,
        });

        self.initialize(
            &anchor,
            justified,
            finalized,
            last_validated == Some(finalized),
        )?;

        let replayed = match saved_head_root {
            Some(head_root) => self.replay_to_saved_head(&anchor, head_root).await?,
            None => 0,
        };

        {
            let _lock = self.on_block_mutex.lock().await;
            self.update_head().await?;
        }

        info!(
            finalized_epoch = finalized.epoch,
            replayed,
            head_slot = self.head_slot(),
            "chain started from saved state",
        );

        self.finish_start(&anchor.state);

        Ok(())
    }

    /// Writes out pending blocks and the finalized state, then stops background tasks.
    pub async fn stop(&self) -> Result<()> {
        self.init_sync_cache.flush(&self.storage)?;

        if self.is_started() {
            let finalized = self.store.finalized_checkpoint();

            let state = self
                .state_gen
                .state_by_root_without_copy(finalized.root, &self.cancellation_token)
                .await?;

            self.state_gen.force_checkpoint(finalized.root, &state)?;
        }

        self.cancellation_token.cancel();

        let tasks = core::mem::take(&mut *self.tasks.lock());

        for task in tasks {
            task.abort();
        }

        info!("chain service stopped");

        Ok(())
    }

    /// Runs the start of slot routine.
    pub async fn on_tick(self: &Arc<Self>, slot: Slot) -> Result<()> {
        let _lock = self.on_block_mutex.lock().await;

        self.current_slot.store(slot, Ordering::Relaxed);

        let fork_choice = self.fork_choice();

        fork_choice.reset_boost();

        if misc::is_epoch_start(&self.chain_config, slot) {
            self.promote_best_justified(&fork_choice)?;
        }

        self.process_pool_attestations(&fork_choice)?;
        self.update_head().await?;
        self.prune_pools(slot);

        if !self.is_syncing() {
            let service = Arc::clone(self);

            tokio::spawn(async move {
                if let Err(error) = service.update_optimistic_spines().await {
                    warn!("failed to update optimistic spines: {error:?}");
                }
            });
        }

        Ok(())
    }

    /// Builds a fork choice containing exactly `roots`, reusing a cached view when possible.
    pub fn fork_choice_view(&self, roots: &HashSet<H256>) -> Result<ForkChoice> {
        let fork_choice = self.fork_choice();

        let (view, missing) = self
            .fork_choice_cache
            .get_compatible(roots)
            .unwrap_or_else(|| {
                let Checkpoints {
                    justified,
                    finalized,
                    ..
                } = self.store.checkpoints();

                let view = ForkChoice::new(
                    ForkChoiceConfig::from(self.chain_config.as_ref()),
                    justified.epoch,
                    finalized.epoch,
                );

                (view, roots.iter().copied().collect())
            });

        let mut nodes = missing
            .into_iter()
            .map(|root| {
                fork_choice
                    .node_info(root)
                    .ok_or_else(|| ForkChoiceError::UnknownNodeRoot { root }.into())
            })
            .collect::<Result<Vec<_>>>()?;

        nodes.sort_by_key(|node| node.slot);

        for node in nodes {
            let Some((justified_checkpoint, finalized_checkpoint)) =
                fork_choice.node_checkpoints(node.root)
            else {
                bail!(ForkChoiceError::UnknownNodeRoot { root: node.root });
            };

            view.insert_optimistic(BlockInfo {
                slot: node.slot,
                root: node.root,
                parent_root: node.parent_root.unwrap_or_default(),
                justified_checkpoint,
                finalized_checkpoint,
                spine_data: node.spine_data,
                block_voting: node.block_voting,
            })?;

            match node.status {
                PayloadStatus::Valid => view.set_optimistic_to_valid(node.root)?,
                PayloadStatus::Invalid => {
                    view.set_optimistic_to_invalid(node.root)?;
                }
                PayloadStatus::Syncing => {}
            }
        }

        self.fork_choice_cache.add(&view);

        Ok(view)
    }

    /// Checks that the finalized checkpoint a peer reports is compatible with the local chain.
    pub fn validate_peer_status(&self, checkpoint: Checkpoint) -> Result<()> {
        let finalized = self.store.finalized_checkpoint();

        if checkpoint.epoch > finalized.epoch {
            return Ok(());
        }

        if checkpoint.epoch == GENESIS_EPOCH && checkpoint.root.is_zero() {
            return Ok(());
        }

        let start_slot = misc::compute_start_slot_at_epoch(&self.chain_config, checkpoint.epoch);
        let local_root = self.canonical_root_at_slot(start_slot)?;

        ensure!(
            local_root == Some(checkpoint.root),
            Error::InvalidCheckpoint { checkpoint },
        );

        Ok(())
    }

    /// Deletes blocks found invalid along with their descendants and recomputes the head.
    pub async fn remove_invalid_block_and_state(&self, roots: &[H256]) -> Result<()> {
        let _lock = self.on_block_mutex.lock().await;

        let removed = self.fork_choice().remove_nodes(roots)?;

        for root in removed.iter().copied() {
            self.state_gen.delete_state(root)?;
            self.storage.delete_block(root)?;
        }

        info!(removed = removed.len(), "invalid blocks removed");

        self.update_head().await
    }

    pub(crate) fn initialize(
        &self,
        anchor: &Arc<Head>,
        justified: Checkpoint,
        finalized: Checkpoint,
        anchor_valid: bool,
    ) -> Result<()> {
        self.store.set_justified_checkpoint(justified);
        self.store.set_best_justified_checkpoint(justified);
        self.store.set_prev_justified_checkpoint(justified);
        self.store.set_finalized_checkpoint(finalized);
        self.store.set_prev_finalized_checkpoint(finalized);

        let fork_choice = ForkChoice::new(
            ForkChoiceConfig::from(self.chain_config.as_ref()),
            justified.epoch,
            finalized.epoch,
        );

        fork_choice.insert_optimistic(BlockInfo {
            justified_checkpoint: justified,
            finalized_checkpoint: finalized,
            ..self.block_info(anchor.root, &anchor.block, &anchor.state)?
        })?;

        if anchor_valid {
            fork_choice.set_optimistic_to_valid(anchor.root)?;
        }

        fork_choice.update_canonical(anchor.root)?;

        self.fork_choice.store(Arc::new(fork_choice));
        self.head.set(Arc::clone(anchor));
        self.storage.save_head_block_root(anchor.root)?;

        self.finalized_spines
            .reset(anchor.state.spine_data.last_spine().as_slice());

        self.genesis_time
            .store(anchor.state.genesis_time, Ordering::Relaxed);

        self.creators.refresh(&self.chain_config, &anchor.state)?;

        Ok(())
    }

    fn finish_start(self: &Arc<Self>, anchor_state: &BeaconState) {
        self.started.store(true, Ordering::Release);

        self.event_channels
            .send_initialized_event(unix_time_now(), anchor_state.genesis_validators_root);

        self.spawn_tasks();
    }

    fn spawn_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let dag_finalizer = Arc::clone(&self.dag_finalizer);
        let head_feed = Arc::clone(&self.head_feed);
        let cancellation_token = self.cancellation_token.clone();

        tasks.push(tokio::spawn(async move {
            dag_finalizer.run(&head_feed, &cancellation_token).await;
        }));

        if self.config.slot_ticker {
            let service = Arc::clone(self);

            tasks.push(tokio::spawn(async move {
                if let Err(error) = service.run_slot_ticker().await {
                    error!("slot ticker stopped: {error:?}");
                }
            }));
        }
    }

    async fn run_slot_ticker(self: Arc<Self>) -> Result<()> {
        let mut ticks = pin!(clock::ticks(&self.chain_config, self.genesis_time())?);

        loop {
            let tick = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                tick = ticks.next() => tick,
            };

            let Some(tick) = tick.transpose()? else {
                break;
            };

            if tick.is_start_of_slot() {
                if let Err(error) = self.on_tick(tick.slot).await {
                    warn!(slot = tick.slot, "slot tick failed: {error:?}");
                }
            }
        }

        Ok(())
    }

    async fn replay_to_saved_head(&self, anchor: &Head, head_root: H256) -> Result<usize> {
        let mut chain = vec![];
        let mut root = head_root;

        while root != anchor.root {
            let Some(block) = self.storage.block(root)? else {
                warn!(?root, "saved head is not connected to the finalized block");
                return Ok(0);
            };

            if block.slot() <= anchor.slot {
                warn!(?root, "saved head does not descend from the finalized block");
                return Ok(0);
            }

            let parent_root = block.parent_root();
            chain.push((root, block));
            root = parent_root;
        }

        chain.reverse();

        let transition = Arc::clone(self.state_gen.transition());
        let cancellation_token = self.cancellation_token.clone();
        let mut state = Arc::clone(&anchor.state);

        let replayed = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut replayed = Vec::with_capacity(chain.len());

            for (root, block) in chain {
                if cancellation_token.is_cancelled() {
                    bail!(Error::NotStarted);
                }

                let post_state =
                    Arc::new(transition.execute_trusted(BeaconState::clone(&state), &block)?);

                state = Arc::clone(&post_state);
                replayed.push((root, block, post_state));
            }

            Ok(replayed)
        })
        .await??;

        let fork_choice = self.fork_choice();

        for (root, block, post_state) in &replayed {
            fork_choice.insert_optimistic(self.block_info(*root, block, post_state)?)?;
            self.state_gen.save_state(*root, Arc::clone(post_state))?;
        }

        self.storage.save_head_block_root(head_root)?;

        Ok(replayed.len())
    }

    /// Computes the head with the effective balances of the justified state and installs it.
    ///
    /// Callers must hold `on_block_mutex`.
    pub(crate) async fn update_head(&self) -> Result<()> {
        let Checkpoints {
            justified,
            finalized,
            ..
        } = self.store.checkpoints();

        let justified_state = self.state_by_root_without_copy(justified.root).await?;
        let balances = accessors::get_effective_balances(&self.chain_config, &justified_state);

        let head_root = self.fork_choice().head(
            justified.epoch,
            justified.root,
            &balances,
            finalized.epoch,
        )?;

        self.save_head(head_root).await
    }

    /// Installs `new_root` as the head. Fires `Reorg` when the new head does not extend the old
    /// one and `NewHead` otherwise.
    pub(crate) async fn save_head(&self, new_root: H256) -> Result<()> {
        let old_head = self.head.head();

        if old_head
            .as_ref()
            .is_some_and(|old_head| old_head.root == new_root)
        {
            return Ok(());
        }

        let Some(block) = self.block_by_root(new_root)? else {
            bail!(Error::UnknownBlock { root: new_root });
        };

        let state = self.state_by_root_without_copy(new_root).await?;

        self.storage.save_head_block_root(new_root)?;

        let fork_choice = self.fork_choice();

        fork_choice.update_canonical(new_root)?;

        let new_head = Arc::new(Head {
            slot: block.slot(),
            root: new_root,
            block,
            state,
        });

        self.head.set(Arc::clone(&new_head));

        let execution_optimistic = fork_choice.is_optimistic(new_root)?;
        let epoch = misc::compute_epoch_at_slot(&self.chain_config, new_head.slot);

        match old_head {
            Some(old_head) if new_head.block.parent_root() != old_head.root => {
                let depth = new_head.slot.abs_diff(old_head.slot);

                info!(
                    slot = new_head.slot,
                    depth,
                    old_head = ?old_head.root,
                    new_head = ?new_root,
                    "chain reorganized",
                );

                self.reinsert_orphaned_attestations(&fork_choice, &old_head, new_root)?;

                self.event_channels.send(Event::Reorg(ReorgEvent {
                    slot: new_head.slot,
                    depth,
                    old_head_block: old_head.root,
                    new_head_block: new_root,
                    old_head_state: old_head.block.message.state_root,
                    new_head_state: new_head.block.message.state_root,
                    epoch,
                    execution_optimistic,
                }));
            }
            old_head => {
                let epoch_transition = old_head.is_none_or(|old_head| {
                    misc::compute_epoch_at_slot(&self.chain_config, old_head.slot) < epoch
                });

                debug!(slot = new_head.slot, root = ?new_root, "new head");

                self.event_channels.send(Event::NewHead(NewHeadEvent {
                    slot: new_head.slot,
                    block: new_root,
                    state: new_head.block.message.state_root,
                    epoch_transition,
                    previous_duty_dependent_root: self
                        .duty_dependent_root(&new_head, epoch.saturating_sub(1)),
                    current_duty_dependent_root: self.duty_dependent_root(&new_head, epoch),
                    execution_optimistic,
                }));
            }
        }

        self.head_feed.push(new_head);

        Ok(())
    }

    /// Stores new checkpoints of `post_state` and returns the finalized checkpoint if it advanced.
    pub(crate) fn update_checkpoints(&self, post_state: &BeaconState) -> Result<Option<Checkpoint>> {
        let justified = self.resolve_checkpoint(post_state.current_justified_checkpoint)?;
        let finalized = self.resolve_checkpoint(post_state.finalized_checkpoint)?;

        if self.store.update_justified(justified) {
            self.storage.save_justified_checkpoint(justified)?;
            info!(epoch = justified.epoch, root = ?justified.root, "justified checkpoint updated");
        }

        if self.store.update_finalized(justified, finalized) {
            self.storage
                .save_justified_checkpoint(self.store.justified_checkpoint())?;
            self.storage.save_finalized_checkpoint(finalized)?;
            info!(epoch = finalized.epoch, root = ?finalized.root, "finalized checkpoint updated");
            return Ok(Some(finalized));
        }

        Ok(None)
    }

    /// Prunes fork choice and storage caches after finality advanced to `finalized`.
    pub(crate) async fn on_new_finalization(self: &Arc<Self>, finalized: Checkpoint) -> Result<()> {
        let fork_choice = self.fork_choice();

        fork_choice.prune(finalized.root)?;

        let execution_optimistic = fork_choice.is_optimistic(finalized.root)?;

        if !execution_optimistic {
            self.storage.save_last_validated_checkpoint(finalized)?;
        }

        let Some(finalized_block) = self.block_by_root(finalized.root)? else {
            bail!(Error::UnknownBlock {
                root: finalized.root,
            });
        };

        let finalized_state = self.state_by_root_without_copy(finalized.root).await?;

        self.event_channels
            .send(Event::FinalizedCheckpoint(FinalizedCheckpointEvent {
                epoch: finalized.epoch,
                block: finalized.root,
                state: finalized_block.message.state_root,
                execution_optimistic,
                finalization_slot: self.head_slot(),
            }));

        let deposit_task = {
            let service = Arc::clone(self);
            let state = Arc::clone(&finalized_state);

            tokio::task::spawn_blocking(move || {
                service
                    .deposit_trie
                    .insert_finalized(&service.storage, finalized.root, &state)
            })
        };

        spawn_with_deadline(
            "deposit trie insertion",
            self.config.deposit_trie_deadline,
            deposit_task,
        );

        self.init_sync_cache.flush(&self.storage)?;

        self.state_gen
            .migrate_to_cold(finalized.root, &self.cancellation_token)
            .await
    }

    pub(crate) fn spawn_next_slot_cache_update(&self, root: H256, post_state: Arc<BeaconState>) {
        let transition = Arc::clone(self.state_gen.transition());

        let task = tokio::task::spawn_blocking(move || {
            transition.update_next_slot_cache(root, &post_state)
        });

        spawn_with_deadline(
            "next slot cache update",
            self.config.next_slot_cache_deadline,
            task,
        );
    }

    pub(crate) fn block_info(
        &self,
        root: H256,
        block: &SignedBeaconBlock,
        post_state: &BeaconState,
    ) -> Result<BlockInfo> {
        Ok(BlockInfo {
            slot: block.slot(),
            root,
            parent_root: block.parent_root(),
            justified_checkpoint: self.resolve_checkpoint(post_state.current_justified_checkpoint)?,
            finalized_checkpoint: self.resolve_checkpoint(post_state.finalized_checkpoint)?,
            spine_data: block.message.body.spine_data.clone(),
            block_voting: post_state.block_voting.clone(),
        })
    }

    /// Checkpoints of the genesis epoch carry a zero root in beacon states.
    pub(crate) fn resolve_checkpoint(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        if !checkpoint.root.is_zero() {
            return Ok(checkpoint);
        }

        let Some(root) = self.storage.genesis_block_root()? else {
            bail!(Error::NotStarted);
        };

        Ok(Checkpoint { root, ..checkpoint })
    }

    pub(crate) fn block_by_root(&self, root: H256) -> Result<Option<Arc<SignedBeaconBlock>>> {
        if let Some(block) = self.init_sync_cache.get(root) {
            return Ok(Some(block));
        }

        self.storage.block(root)
    }

    /// Blocks held back during initial sync are written out first so that replays can see them.
    pub(crate) async fn state_by_root_without_copy(&self, root: H256) -> Result<Arc<BeaconState>> {
        self.init_sync_cache.flush(&self.storage)?;

        self.state_gen
            .state_by_root_without_copy(root, &self.cancellation_token)
            .await
    }

    pub(crate) fn process_attestations(
        &self,
        fork_choice: &ForkChoice,
        attestations: &[Attestation],
        state: &BeaconState,
    ) -> Result<()> {
        for attestation in attestations {
            let indices = accessors::get_attesting_indices(
                &self.chain_config,
                state,
                attestation.data,
                &attestation.aggregation_bits,
            )?;

            fork_choice.process_attestation(
                &indices,
                attestation.data.beacon_block_root,
                attestation.data.target.epoch,
            )?;
        }

        Ok(())
    }

    fn process_pool_attestations(&self, fork_choice: &ForkChoice) -> Result<()> {
        let attestations = self.pools.attestations.take_for_fork_choice();

        if attestations.is_empty() {
            return Ok(());
        }

        let Some(head_state) = self.head_state_without_copy() else {
            return Ok(());
        };

        debug!(count = attestations.len(), "applying pooled attestations to fork choice");

        self.process_attestations(fork_choice, &attestations, &head_state)
    }

    fn promote_best_justified(&self, fork_choice: &ForkChoice) -> Result<()> {
        let Checkpoints {
            justified,
            best_justified,
            finalized,
            ..
        } = self.store.checkpoints();

        if best_justified.epoch <= justified.epoch {
            return Ok(());
        }

        let finalized_slot = misc::compute_start_slot_at_epoch(&self.chain_config, finalized.epoch);

        if fork_choice.ancestor(best_justified.root, finalized_slot)? == Some(finalized.root) {
            self.store.set_justified_checkpoint(best_justified);
            self.storage.save_justified_checkpoint(best_justified)?;

            info!(epoch = best_justified.epoch, "best justified checkpoint promoted");
        }

        Ok(())
    }

    fn prune_pools(&self, slot: Slot) {
        self.pools.attestations.on_slot(slot);
        self.pools.prevotes.on_slot(slot);
        self.pools.sync_committee_messages.on_slot(slot);

        if let Some(state) = self.head_state_without_copy() {
            self.pools.exits.on_slot(&state);
            self.pools.withdrawals.on_slot(&state);
            self.pools.slashings.on_slot(&state);
        }
    }

    async fn update_optimistic_spines(&self) -> Result<()> {
        let Some(base_spine) = self.finalized_spines.last() else {
            return Ok(());
        };

        let chains = self
            .execution_engine
            .dag_get_optimistic_spines(base_spine)
            .await
            .context(Error::ExecutionEngineUnavailable)?;

        debug!(?base_spine, chains = chains.len(), "optimistic spines updated");

        self.optimistic_spines.set(chains);

        Ok(())
    }

    fn reinsert_orphaned_attestations(
        &self,
        fork_choice: &ForkChoice,
        old_head: &Head,
        new_root: H256,
    ) -> Result<()> {
        let finalized_slot = misc::compute_start_slot_at_epoch(
            &self.chain_config,
            self.store.finalized_epoch(),
        );

        let mut orphaned = vec![];
        let mut block = Arc::clone(&old_head.block);
        let mut root = old_head.root;

        while !fork_choice.is_descendant(root, new_root) && block.slot() > finalized_slot {
            orphaned.extend(block.message.body.attestations.iter().cloned());

            root = block.parent_root();

            let Some(parent) = self.block_by_root(root)? else {
                break;
            };

            block = parent;
        }

        self.pools
            .attestations
            .reinsert_orphaned(orphaned, self.current_slot());

        Ok(())
    }

    fn canonical_root_at_slot(&self, slot: Slot) -> Result<Option<H256>> {
        let Some(head) = self.head.head() else {
            return Ok(None);
        };

        let mut root = head.root;
        let mut block = Arc::clone(&head.block);

        while block.slot() > slot {
            root = block.parent_root();

            if root.is_zero() {
                return Ok(None);
            }

            let Some(parent) = self.block_by_root(root)? else {
                return Ok(None);
            };

            block = parent;
        }

        Ok(Some(root))
    }

    fn duty_dependent_root(&self, head: &Head, epoch: Epoch) -> H256 {
        misc::compute_start_slot_at_epoch(&self.chain_config, epoch)
            .checked_sub(1)
            .filter(|slot| *slot < head.slot)
            .and_then(|slot| {
                accessors::get_block_root_at_slot(&self.chain_config, &head.state, slot).ok()
            })
            .unwrap_or(head.root)
    }
}

fn spawn_with_deadline<T: Send + 'static>(
    name: &'static str,
    deadline: Duration,
    task: JoinHandle<Result<T>>,
) {
    tokio::spawn(async move {
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(_))) => debug!(task = name, "background task finished"),
            Ok(Ok(Err(error))) => warn!(task = name, "background task failed: {error:?}"),
            Ok(Err(error)) => error!(task = name, "background task panicked: {error}"),
            Err(_) => warn!(task = name, ?deadline, "background task exceeded its deadline"),
        }
    });
}

pub(crate) fn duration_since_unix_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn unix_time_now() -> UnixSeconds {
    duration_since_unix_epoch().as_secs()
}
