use std::sync::Arc;

use anyhow::{ensure, Result};
use helper_functions::{
    accessors,
    signing::SignForSingleFork as _,
    verifier::{NullVerifier, SignatureBatch, SingleVerifier, Verifier},
};
use tracing::debug;
use types::{
    beacon_state::BeaconState,
    config::Config,
    containers::{BeaconBlock, SignedBeaconBlock},
    primitives::{Slot, H256},
    traits::ContentHash as _,
};

use crate::{
    block_processing, error::Error, next_slot_cache::NextSlotCache, slot_processing,
    slot_processing::ProcessSlots,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StateRootPolicy {
    Verify,
    Trust,
}

impl StateRootPolicy {
    fn verify(self, state: &BeaconState, block: &BeaconBlock) -> Result<()> {
        match self {
            Self::Verify => {
                let computed = state.hash_tree_root();
                let in_block = block.state_root;

                ensure!(
                    computed == in_block,
                    Error::StateRootMismatch { computed, in_block },
                );

                Ok(())
            }
            Self::Trust => Ok(()),
        }
    }
}

pub fn state_transition(
    config: &Config,
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
    process_slots: ProcessSlots,
    state_root_policy: StateRootPolicy,
    mut verifier: impl Verifier,
) -> Result<()> {
    let block = &signed_block.message;

    // > Process slots (including those with no blocks) since block
    if process_slots.should_process(state, block) {
        slot_processing::process_slots(config, state, block.slot)?;
    }

    // > Verify signature
    let public_key = accessors::validator(state, block.proposer_index)?.pubkey;
    block.verify(config, state, signed_block.signature, &public_key, &mut verifier)?;

    // > Process block
    block_processing::process_block(config, state, block, &mut verifier)?;

    // > Verify state root
    state_root_policy.verify(state, block)
}

/// Number of distinct spine hashes a state refers to.
#[must_use]
pub fn count_unique_spines(state: &BeaconState) -> usize {
    state.spine_data.count_unique_spines()
}

/// Entry point for all state transitions performed by the chain.
pub struct StateTransition {
    config: Arc<Config>,
    next_slot_cache: NextSlotCache,
}

impl StateTransition {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            next_slot_cache: NextSlotCache::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Applies `signed_block` to `pre_state` verifying every signature as it is encountered.
    pub fn execute(
        &self,
        pre_state: &BeaconState,
        signed_block: &SignedBeaconBlock,
    ) -> Result<BeaconState> {
        let mut state = self.starting_state(pre_state, signed_block);

        state_transition(
            &self.config,
            &mut state,
            signed_block,
            ProcessSlots::IfNeeded,
            StateRootPolicy::Verify,
            SingleVerifier,
        )?;

        Ok(state)
    }

    /// Like [`StateTransition::execute`] but collects signatures into a batch instead of
    /// verifying them. The caller is responsible for calling [`Verifier::finish`] on the batch.
    pub fn execute_no_verify_any_sig(
        &self,
        pre_state: &BeaconState,
        signed_block: &SignedBeaconBlock,
    ) -> Result<(SignatureBatch, BeaconState)> {
        let mut state = self.starting_state(pre_state, signed_block);
        let mut batch = SignatureBatch::default();

        state_transition(
            &self.config,
            &mut state,
            signed_block,
            ProcessSlots::IfNeeded,
            StateRootPolicy::Verify,
            &mut batch,
        )?;

        Ok((batch, state))
    }

    /// Replays a block that has already been imported once.
    pub fn execute_trusted(
        &self,
        mut state: BeaconState,
        signed_block: &SignedBeaconBlock,
    ) -> Result<BeaconState> {
        state_transition(
            &self.config,
            &mut state,
            signed_block,
            ProcessSlots::IfNeeded,
            StateRootPolicy::Trust,
            NullVerifier,
        )?;

        Ok(state)
    }

    pub fn process_slots(&self, state: &mut BeaconState, slot: Slot) -> Result<()> {
        slot_processing::process_slots(&self.config, state, slot)
    }

    /// Precomputes the state of the slot after `post_state` for the block built on `block_root`.
    pub fn update_next_slot_cache(
        &self,
        block_root: H256,
        post_state: &BeaconState,
    ) -> Result<()> {
        let mut state = post_state.clone();

        self.process_slots(&mut state, post_state.slot + 1)?;
        self.next_slot_cache.put(block_root, state);

        Ok(())
    }

    #[must_use]
    pub const fn next_slot_cache(&self) -> &NextSlotCache {
        &self.next_slot_cache
    }

    fn starting_state(
        &self,
        pre_state: &BeaconState,
        signed_block: &SignedBeaconBlock,
    ) -> BeaconState {
        let block = &signed_block.message;

        if let Some(state) = self.next_slot_cache.get(block.parent_root) {
            if state.slot <= block.slot && state.slot == pre_state.slot + 1 {
                debug!(
                    slot = block.slot,
                    parent_root = ?block.parent_root,
                    "next slot cache hit",
                );

                return state;
            }
        }

        pre_state.clone()
    }
}
