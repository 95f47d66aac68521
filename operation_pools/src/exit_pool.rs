use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use helper_functions::{
    accessors, predicates,
    verifier::{NullVerifier, SingleVerifier},
};
use parking_lot::RwLock;
use tracing::debug;
use transition_functions::block_processing;
use types::{
    beacon_state::BeaconState, config::Config, containers::SignedVoluntaryExit,
    primitives::ValidatorIndex,
};

use crate::misc::{PoolAdditionOutcome, PoolRejectionReason};

/// Voluntary exits keyed by validator index.
pub struct ExitPool {
    config: Arc<Config>,
    exits: RwLock<BTreeMap<ValidatorIndex, SignedVoluntaryExit>>,
}

impl ExitPool {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            exits: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds `exit` to the pool.
    ///
    /// A pooled exit of the same validator is replaced only if `exit` has an earlier epoch.
    pub fn insert(&self, exit: SignedVoluntaryExit) -> PoolAdditionOutcome {
        let index = exit.message.validator_index;
        let mut exits = self.exits.write();

        if let Some(pooled) = exits.get(&index) {
            if pooled.message.epoch <= exit.message.epoch {
                return PoolAdditionOutcome::Ignore;
            }
        }

        debug!(index, epoch = exit.message.epoch, "voluntary exit added to pool");

        exits.insert(index, exit);

        PoolAdditionOutcome::Accept
    }

    /// Verifies `exit` against `state` including its signature and adds it to the pool.
    pub fn insert_validated(
        &self,
        state: &BeaconState,
        exit: SignedVoluntaryExit,
    ) -> PoolAdditionOutcome {
        if let Err(error) = self.validate_for_block(state, exit) {
            return PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidVoluntaryExit, error);
        }

        self.insert(exit)
    }

    pub fn validate_for_block(&self, state: &BeaconState, exit: SignedVoluntaryExit) -> Result<()> {
        block_processing::validate_voluntary_exit(&self.config, state, exit, SingleVerifier)
    }

    /// Exits that can be included in a block built on `state`.
    ///
    /// Exits over the block limit stay in the pool for later blocks.
    #[must_use]
    pub fn exits_for_block(&self, state: &BeaconState) -> Vec<SignedVoluntaryExit> {
        self.exits
            .read()
            .values()
            .copied()
            .filter(|exit| {
                block_processing::validate_voluntary_exit(&self.config, state, *exit, NullVerifier)
                    .is_ok()
            })
            .take(self.config.max_voluntary_exits)
            .collect()
    }

    pub fn mark_included(&self, included: &[SignedVoluntaryExit]) {
        let mut exits = self.exits.write();

        for exit in included {
            exits.remove(&exit.message.validator_index);
        }
    }

    /// Drops exits of validators that can no longer exit in `state`.
    pub fn on_slot(&self, state: &BeaconState) {
        let current_epoch = accessors::get_current_epoch(&self.config, state);

        self.exits.write().retain(|index, _| {
            accessors::validator(state, *index)
                .is_ok_and(|validator| predicates::is_eligible_for_exit(validator, current_epoch))
        });
    }

    #[must_use]
    pub fn get(&self, index: ValidatorIndex) -> Option<SignedVoluntaryExit> {
        self.exits.read().get(&index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exits.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exits.read().is_empty()
    }
}
