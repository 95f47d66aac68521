use std::{collections::HashSet, sync::Arc};

use anyhow::{ensure, Context as _, Result};
use execution_engine::ExecutionEngine;
use fork_choice_store::ForkChoice;
use helper_functions::{
    misc,
    verifier::{SignatureBatch, Verifier as _},
};
use parking_lot::Mutex;
use tracing::{debug, info, info_span, warn, Instrument as _};
use transition_functions::count_unique_spines;
use types::{
    beacon_state::BeaconState,
    containers::{Checkpoint, SignedBeaconBlock},
    primitives::{Slot, H256},
    traits::ContentHash as _,
};

use crate::{
    error::Error,
    service::{self, ChainService},
};

/// Removes a root from the in-processing set when import of its block ends.
struct ProcessingGuard<'service> {
    processing: &'service Mutex<HashSet<H256>>,
    root: H256,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.processing.lock().remove(&self.root);
    }
}

impl<E: ExecutionEngine + 'static> ChainService<E> {
    /// Imports a single block received from gossip or requested by root.
    pub async fn on_block(
        self: &Arc<Self>,
        signed_block: Arc<SignedBeaconBlock>,
        block_root: H256,
    ) -> Result<()> {
        let span = info_span!(
            "on_block",
            slot = signed_block.slot(),
            ?block_root,
            parent_root = ?signed_block.parent_root(),
        );

        self.import_block(signed_block, block_root)
            .instrument(span)
            .await
    }

    /// Imports a chain of blocks during initial sync.
    ///
    /// Signatures of all blocks are verified together. Returns the justified and finalized
    /// checkpoints of every block in `blocks` in order, including blocks imported earlier.
    pub async fn on_block_batch(
        self: &Arc<Self>,
        blocks: &[Arc<SignedBeaconBlock>],
        roots: &[H256],
    ) -> Result<Vec<(Checkpoint, Checkpoint)>> {
        ensure!(
            blocks.len() == roots.len(),
            Error::BatchLengthMismatch {
                blocks: blocks.len(),
                roots: roots.len(),
            },
        );

        let Some(first) = blocks.first() else {
            return Ok(vec![]);
        };

        let span = info_span!(
            "on_block_batch",
            first_slot = first.slot(),
            blocks = blocks.len(),
        );

        self.import_batch(blocks, roots).instrument(span).await
    }

    async fn import_block(
        self: &Arc<Self>,
        signed_block: Arc<SignedBeaconBlock>,
        block_root: H256,
    ) -> Result<()> {
        let _processing = self.mark_processing(block_root)?;
        let _lock = self.on_block_mutex.lock().await;

        let computed = signed_block.message.hash_tree_root();

        ensure!(
            computed == block_root,
            Error::BlockRootMismatch {
                root: block_root,
                computed,
            },
        );

        let fork_choice = self.fork_choice();

        if fork_choice.has_node(block_root) {
            debug!("block already imported");
            return Ok(());
        }

        let slot = signed_block.slot();
        let pre_state = self
            .state_by_root_without_copy(signed_block.parent_root())
            .await?;

        if self.should_verify_operations(slot) {
            self.verify_block_operations(block_root, &signed_block, &pre_state)?;
        }

        let post_state = match self.state_gen.transition().execute(&pre_state, &signed_block) {
            Ok(post_state) => Arc::new(post_state),
            Err(error) => {
                warn!("state transition failed: {error:?}");
                return Err(error.context(Error::InvalidStateTransition { root: block_root }));
            }
        };

        self.check_spines_limit(block_root, &post_state)?;

        fork_choice.insert_optimistic(self.block_info(block_root, &signed_block, &post_state)?)?;

        self.process_attestations(
            &fork_choice,
            &signed_block.message.body.attestations,
            &post_state,
        )?;

        if self.is_timely(slot) {
            fork_choice.boost_proposer_root(block_root);
        }

        self.storage.save_block(block_root, &signed_block)?;
        self.state_gen
            .save_state(block_root, Arc::clone(&post_state))?;

        if !self.is_syncing() {
            self.validate_spines(&fork_choice, block_root, &signed_block)
                .await?;
        }

        let new_finalized = self.update_checkpoints(&post_state)?;

        self.update_head().await?;

        if fork_choice.is_canonical(block_root) {
            self.mark_included(&signed_block);
        }

        self.event_channels
            .send_block_processed_event(block_root, Arc::clone(&signed_block), false);

        self.spawn_next_slot_cache_update(block_root, Arc::clone(&post_state));

        if let Some(finalized) = new_finalized {
            self.on_new_finalization(finalized).await?;
        }

        if misc::is_epoch_start(&self.chain_config, slot) {
            self.creators.refresh(&self.chain_config, &post_state)?;
        }

        info!(head = ?self.head_root(), "block imported");

        Ok(())
    }

    async fn import_batch(
        self: &Arc<Self>,
        blocks: &[Arc<SignedBeaconBlock>],
        roots: &[H256],
    ) -> Result<Vec<(Checkpoint, Checkpoint)>> {
        let _lock = self.on_block_mutex.lock().await;

        let fork_choice = self.fork_choice();
        let transition = Arc::clone(self.state_gen.transition());

        let mut pending = Vec::<(H256, Arc<SignedBeaconBlock>, Arc<BeaconState>)>::new();
        // `None` marks blocks whose checkpoints are known only after the batch is imported.
        let mut known_checkpoints = Vec::with_capacity(blocks.len());
        let mut batch = SignatureBatch::default();
        let mut state = None::<Arc<BeaconState>>;

        for (block, root) in blocks.iter().zip(roots.iter().copied()) {
            if let Some(checkpoints) = fork_choice.node_checkpoints(root) {
                known_checkpoints.push(Some(checkpoints));
                continue;
            }

            known_checkpoints.push(None);

            let computed = block.message.hash_tree_root();

            ensure!(
                computed == root,
                Error::BlockRootMismatch { root, computed },
            );

            let parent_root = block.parent_root();

            // Consecutive blocks reuse the previous post-state instead of going through storage.
            let extends_previous = pending
                .last()
                .is_some_and(|(previous_root, _, _)| *previous_root == parent_root);

            let pre_state = match state.take() {
                Some(state) if extends_previous => state,
                _ => {
                    ensure!(
                        fork_choice.has_node(parent_root),
                        Error::UnknownBlock { root: parent_root },
                    );

                    self.state_by_root_without_copy(parent_root).await?
                }
            };

            let (signatures, post_state) = transition.execute_no_verify_any_sig(&pre_state, block)?;
            let post_state = Arc::new(post_state);

            self.check_spines_limit(root, &post_state)?;

            batch.join(signatures);

            state = Some(Arc::clone(&post_state));
            pending.push((root, Arc::clone(block), post_state));
        }

        if !batch.is_empty() {
            batch.finish().context(Error::InvalidSignatureBatch {
                blocks: pending.len(),
            })?;
        }

        let mut imported_checkpoints = Vec::with_capacity(pending.len());

        for (index, (root, block, post_state)) in pending.iter().enumerate() {
            fork_choice.insert_optimistic(self.block_info(*root, block, post_state)?)?;

            self.process_attestations(&fork_choice, &block.message.body.attestations, post_state)?;

            self.init_sync_cache.insert(*root, Arc::clone(block));

            let is_tail = index + 1 == pending.len();

            if is_tail {
                self.state_gen.save_state(*root, Arc::clone(post_state))?;
            } else if misc::is_epoch_start(&self.chain_config, post_state.slot) {
                self.state_gen.save_sync_state(*root, Arc::clone(post_state));
            }

            if self.init_sync_cache.len() >= self.config.init_sync_flush_threshold.get() {
                self.init_sync_cache.flush(&self.storage)?;
            }

            imported_checkpoints.push((
                self.resolve_checkpoint(post_state.current_justified_checkpoint)?,
                self.resolve_checkpoint(post_state.finalized_checkpoint)?,
            ));
        }

        let mut imported_checkpoints = imported_checkpoints.into_iter();

        let checkpoints = known_checkpoints
            .into_iter()
            .filter_map(|known| known.or_else(|| imported_checkpoints.next()))
            .collect::<Vec<_>>();

        let Some((tail_root, _, tail_state)) = pending.last() else {
            debug!("every block of the batch is already known");
            return Ok(checkpoints);
        };

        let new_finalized = self.update_checkpoints(tail_state)?;

        self.update_head().await?;

        if let Some(finalized) = new_finalized {
            self.init_sync_cache.flush(&self.storage)?;
            self.state_gen.clear_sync_states();
            self.on_new_finalization(finalized).await?;
        }

        for (root, block, _) in &pending {
            self.event_channels
                .send_block_processed_event(*root, Arc::clone(block), true);
        }

        info!(
            imported = pending.len(),
            tail = ?tail_root,
            head = ?self.head_root(),
            "block batch imported",
        );

        Ok(checkpoints)
    }

    fn mark_processing(&self, root: H256) -> Result<ProcessingGuard<'_>> {
        ensure!(
            self.processing.lock().insert(root),
            Error::BlockIsProcessing { root },
        );

        Ok(ProcessingGuard {
            processing: &self.processing,
            root,
        })
    }

    fn should_verify_operations(&self, slot: Slot) -> bool {
        !self.is_syncing()
            && self.config.verify_operations_against_pools
            && self.chain_config.is_delegating_stake_slot(slot)
    }

    fn verify_block_operations(
        &self,
        root: H256,
        signed_block: &SignedBeaconBlock,
        pre_state: &BeaconState,
    ) -> Result<()> {
        let body = &signed_block.message.body;

        if body.voluntary_exits.is_empty() && body.withdrawals.is_empty() {
            return Ok(());
        }

        let mut state = pre_state.clone();

        if state.slot < signed_block.slot() {
            self.state_gen
                .transition()
                .process_slots(&mut state, signed_block.slot())?;
        }

        for exit in body.voluntary_exits.iter().copied() {
            self.pools
                .exits
                .validate_for_block(&state, exit)
                .context(Error::InvalidBlockExit {
                    root,
                    validator_index: exit.message.validator_index,
                })?;
        }

        for withdrawal in body.withdrawals.iter().copied() {
            self.pools
                .withdrawals
                .validate_for_block(&state, withdrawal)
                .context(Error::InvalidBlockWithdrawal {
                    root,
                    validator_index: withdrawal.validator_index,
                })?;
        }

        Ok(())
    }

    fn check_spines_limit(&self, root: H256, post_state: &BeaconState) -> Result<()> {
        let count = count_unique_spines(post_state);
        let limit = self.chain_config.all_spines_limit;

        ensure!(
            count <= limit,
            Error::AllSpinesLimitExceeded { root, count, limit },
        );

        Ok(())
    }

    fn is_timely(&self, slot: Slot) -> bool {
        if self.current_slot() != slot {
            return false;
        }

        clock::is_timely(
            &self.chain_config,
            self.genesis_time(),
            slot,
            service::duration_since_unix_epoch(),
            self.config.proposer_boost_denominator,
        )
    }

    async fn validate_spines(
        &self,
        fork_choice: &ForkChoice,
        root: H256,
        signed_block: &SignedBeaconBlock,
    ) -> Result<()> {
        if E::IS_NULL {
            return fork_choice.set_optimistic_to_valid(root);
        }

        let spines = signed_block.message.body.spine_data.spines.clone();

        match self.execution_engine.dag_validate_spines(spines).await {
            Ok(true) => fork_choice.set_optimistic_to_valid(root),
            Ok(false) => {
                let invalidated = fork_choice.set_optimistic_to_invalid(root)?;
                warn!(invalidated, "execution engine rejected block spines");
                Ok(())
            }
            Err(error) => {
                warn!("spine validation unavailable, block stays optimistic: {error:?}");
                Ok(())
            }
        }
    }

    fn mark_included(&self, signed_block: &SignedBeaconBlock) {
        let body = &signed_block.message.body;

        self.pools.attestations.mark_included(&body.attestations);
        self.pools.exits.mark_included(&body.voluntary_exits);
        self.pools.withdrawals.mark_included(&body.withdrawals);
        self.pools
            .slashings
            .mark_included(&body.proposer_slashings, &body.attester_slashings);
    }
}
