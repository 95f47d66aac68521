//! Finalization of execution layer spines.
//!
//! Every new head is turned into [`FinalizationParams`] by walking its ancestors back to the
//! last spine the execution engine already finalized. The engine answers with the last spine it
//! finalized, which bounds the prefix appended to [`FinalizedSpines`].

use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use execution_engine::{ExecutionEngine, FinalizationResult};
use helper_functions::misc;
use itertools::Itertools as _;
use parking_lot::Mutex;
use state_gen::StateGen;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use types::{
    beacon_state::BeaconState,
    config::Config,
    containers::SignedBeaconBlock,
    gwat::{FinalizationParams, GwatSyncParam, SpineCheckpoint},
    primitives::H256,
};

use crate::{
    error::Error, head::Head, head_feed::HeadFeed, init_sync_cache::InitSyncBlockCache,
    spine_cache::FinalizedSpines,
};

/// Collects the spines finalized by `head_block` and its ancestors that the engine has not
/// finalized yet.
///
/// The walk stops at the first block whose finalization sequence contains an already finalized
/// spine. The last such spine becomes the base and only the spines after it are collected. It
/// also stops at the finalized checkpoint and at genesis, in which case there is no base.
pub fn collect_finalization_params(
    config: &Config,
    head_block: &Arc<SignedBeaconBlock>,
    head_state: &BeaconState,
    finalized_spines: &FinalizedSpines,
    checkpoint_spine: Option<H256>,
    mut block_by_root: impl FnMut(H256) -> Result<Option<Arc<SignedBeaconBlock>>>,
) -> Result<FinalizationParams> {
    let finalized_checkpoint = head_state.finalized_checkpoint;
    let finalized_slot = misc::compute_start_slot_at_epoch(config, finalized_checkpoint.epoch);

    let mut segments = vec![];
    let mut base_spine = None;
    let mut block = Arc::clone(head_block);

    loop {
        let finalization = &block.message.body.spine_data.finalization;

        if let Some(position) = finalization
            .iter()
            .rposition(|spine| finalized_spines.contains(*spine))
        {
            base_spine = Some(finalization[position]);
            segments.push(finalization[position + 1..].to_vec());
            break;
        }

        segments.push(finalization.clone());

        let parent_root = block.parent_root();

        if block.slot() <= finalized_slot || parent_root.is_zero() {
            break;
        }

        let Some(parent) = block_by_root(parent_root)? else {
            bail!(Error::UnknownBlock { root: parent_root });
        };

        block = parent;
    }

    let spines = segments
        .into_iter()
        .rev()
        .flatten()
        .filter(|spine| Some(*spine) != base_spine)
        .unique()
        .collect();

    let checkpoint = checkpoint_spine.map(|spine| SpineCheckpoint {
        epoch: finalized_checkpoint.epoch,
        root: finalized_checkpoint.root,
        spine,
    });

    Ok(FinalizationParams {
        spines,
        base_spine,
        checkpoint,
        validator_sync: head_state.validator_sync.clone(),
    })
}

/// `[base_spine, ..spines]` up to and including `last_finalized_spine`.
pub fn finalized_prefix(
    params: &FinalizationParams,
    last_finalized_spine: H256,
) -> Result<Vec<H256>> {
    let candidates = params
        .base_spine
        .into_iter()
        .chain(params.spines.iter().copied())
        .collect_vec();

    let Some(position) = candidates
        .iter()
        .position(|spine| *spine == last_finalized_spine)
    else {
        bail!(Error::UnknownLastFinalizedSpine {
            spine: last_finalized_spine,
        });
    };

    Ok(candidates[..=position].to_vec())
}

pub struct DagFinalizer<E> {
    chain_config: Arc<Config>,
    execution_engine: Arc<E>,
    finalized_spines: Arc<FinalizedSpines>,
    state_gen: Arc<StateGen>,
    init_sync_cache: Arc<InitSyncBlockCache>,
    last_processed: Mutex<Option<H256>>,
}

impl<E: ExecutionEngine> DagFinalizer<E> {
    #[must_use]
    pub fn new(
        chain_config: Arc<Config>,
        execution_engine: Arc<E>,
        finalized_spines: Arc<FinalizedSpines>,
        state_gen: Arc<StateGen>,
        init_sync_cache: Arc<InitSyncBlockCache>,
    ) -> Self {
        Self {
            chain_config,
            execution_engine,
            finalized_spines,
            state_gen,
            init_sync_cache,
            last_processed: Mutex::new(None),
        }
    }

    /// Consumes heads from `feed` until `cancellation_token` is cancelled.
    pub async fn run(&self, feed: &HeadFeed, cancellation_token: &CancellationToken) {
        loop {
            let head = tokio::select! {
                () = cancellation_token.cancelled() => break,
                head = feed.next() => head,
            };

            if let Err(error) = self.process_head(&head, cancellation_token).await {
                error!(
                    slot = head.slot,
                    root = ?head.root,
                    "DAG finalization failed: {error:?}",
                );
            }
        }

        debug!("DAG finalizer stopped");
    }

    /// Finalizes the spines of `head`. A failure clears the deduplication key so that the same
    /// head is retried when it is seen again.
    pub async fn process_head(
        &self,
        head: &Head,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        {
            let mut last_processed = self.last_processed.lock();

            if *last_processed == Some(head.root) {
                debug!(root = ?head.root, "head already processed by DAG finalizer");
                return Ok(());
            }

            *last_processed = Some(head.root);
        }

        let result = self.finalize(head, cancellation_token).await;

        if result.is_err() {
            *self.last_processed.lock() = None;
        }

        result
    }

    async fn finalize(&self, head: &Head, cancellation_token: &CancellationToken) -> Result<()> {
        let last_spine = head.state.spine_data.last_spine();

        if last_spine.is_some() && self.finalized_spines.last() == last_spine {
            debug!(root = ?head.root, "spines of head already finalized");
            return Ok(());
        }

        let finalized_checkpoint = head.state.finalized_checkpoint;

        let checkpoint_state = self
            .state_gen
            .state_by_root_without_copy(finalized_checkpoint.root, cancellation_token)
            .await?;

        let params = collect_finalization_params(
            &self.chain_config,
            &head.block,
            &head.state,
            &self.finalized_spines,
            checkpoint_state.spine_data.last_spine(),
            |root| self.block(root),
        )?;

        if params.spines.is_empty() {
            debug!(root = ?head.root, "no spines to finalize");
            return Ok(());
        }

        let FinalizationResult {
            last_finalized_spine,
        } = self
            .execution_engine
            .dag_finalize(params.clone())
            .await
            .context(Error::ExecutionEngineUnavailable)?;

        let prefix = finalized_prefix(&params, last_finalized_spine)?;

        self.finalized_spines.add_finalized_spines(&prefix);

        if let Some(checkpoint) = params.checkpoint {
            self.finalized_spines.set_checkpoint(checkpoint);
        }

        self.state_gen
            .storage()
            .save_gwat_sync_param(&GwatSyncParam::new(
                finalized_checkpoint,
                params,
                finalized_checkpoint.epoch,
            ))?;

        info!(
            slot = head.slot,
            root = ?head.root,
            ?last_finalized_spine,
            finalized = prefix.len(),
            "spines finalized",
        );

        Ok(())
    }

    fn block(&self, root: H256) -> Result<Option<Arc<SignedBeaconBlock>>> {
        if let Some(block) = self.init_sync_cache.get(root) {
            return Ok(Some(block));
        }

        self.state_gen.storage().block(root)
    }
}
