//! Validation of objects received over gossip.
//!
//! `Reject` lowers the score of the sending peer, so it is reserved for messages that are
//! invalid regardless of local state. Messages that cannot be judged right now are ignored.

use std::sync::Arc;

use anyhow::Result;
use execution_engine::ExecutionEngine;
use helper_functions::{
    accessors, misc, predicates,
    signing::{self, SelectionProofSlot, SignForSingleFork as _, SyncCommitteeBlockRoot},
    verifier::SingleVerifier,
};
use operation_pools::PoolAdditionOutcome;
use tracing::debug;
use types::{
    beacon_state::BeaconState,
    containers::{
        Attestation, Prevote, SignedAggregateAndProof, SignedBeaconBlock, SignedVoluntaryExit,
        SyncCommitteeContribution, SyncCommitteeMessage,
    },
    nonstandard::ValidationOutcome,
    primitives::{Slot, SubnetId},
    traits::ContentHash as _,
};

use crate::{
    error::Error,
    service::{self, ChainService},
};

impl<E: ExecutionEngine + 'static> ChainService<E> {
    pub async fn validate_gossip_block(
        self: &Arc<Self>,
        signed_block: Arc<SignedBeaconBlock>,
    ) -> Result<ValidationOutcome> {
        if self.is_syncing() {
            return Ok(ValidationOutcome::Ignore);
        }

        let block_root = signed_block.message.hash_tree_root();
        let parent_root = signed_block.parent_root();
        let fork_choice = self.fork_choice();

        if fork_choice.has_node(block_root) || self.processing.lock().contains(&block_root) {
            return Ok(ValidationOutcome::Ignore);
        }

        if !fork_choice.has_node(parent_root) && !self.init_sync_cache.contains(parent_root) {
            debug!(?block_root, ?parent_root, "gossip block has unknown parent");
            return Ok(ValidationOutcome::Reject);
        }

        match self.on_block(signed_block, block_root).await {
            Ok(()) => Ok(ValidationOutcome::Accept),
            Err(error) if is_invalid_block(&error) => {
                debug!(?block_root, "gossip block rejected: {error:?}");
                Ok(ValidationOutcome::Reject)
            }
            Err(error) => {
                debug!(?block_root, "gossip block ignored: {error:?}");
                Ok(ValidationOutcome::Ignore)
            }
        }
    }

    pub fn validate_unaggregated_attestation(
        &self,
        attestation: Attestation,
        subnet_id: SubnetId,
    ) -> Result<ValidationOutcome> {
        let state = self.head_state_without_copy().ok_or(Error::NotStarted)?;
        let data = attestation.data;

        let expected_subnet =
            misc::compute_subnet_for_attestation(&self.chain_config, data.slot, data.index);

        if subnet_id != expected_subnet {
            debug!(subnet_id, expected_subnet, "attestation published on wrong subnet");
            return Ok(ValidationOutcome::Reject);
        }

        if attestation.aggregation_bits.count_ones() != 1 {
            debug!("unaggregated attestation does not have exactly one bit set");
            return Ok(ValidationOutcome::Reject);
        }

        if !self.fork_choice().has_node(data.beacon_block_root) {
            return Ok(ValidationOutcome::Ignore);
        }

        if let Err(error) = self.verify_attestation(&state, &attestation) {
            debug!("invalid unaggregated attestation: {error:?}");
            return Ok(ValidationOutcome::Reject);
        }

        Ok(pool_outcome(
            self.pools.attestations.insert_unaggregated(attestation),
        ))
    }

    pub fn validate_aggregate_and_proof(
        &self,
        signed_aggregate_and_proof: SignedAggregateAndProof,
    ) -> Result<ValidationOutcome> {
        let state = self.head_state_without_copy().ok_or(Error::NotStarted)?;
        let message = &signed_aggregate_and_proof.message;
        let aggregate = &message.aggregate;
        let data = aggregate.data;

        if aggregate.aggregation_bits.not_any() {
            return Ok(ValidationOutcome::Reject);
        }

        if !self.fork_choice().has_node(data.beacon_block_root) {
            return Ok(ValidationOutcome::Ignore);
        }

        let committee = match accessors::get_beacon_committee(
            &self.chain_config,
            &state,
            data.slot,
            data.index,
        ) {
            Ok(committee) => committee,
            Err(error) => {
                debug!("aggregate of unknown committee: {error:?}");
                return Ok(ValidationOutcome::Reject);
            }
        };

        if !committee.contains(&message.aggregator_index) {
            debug!(
                aggregator_index = message.aggregator_index,
                "aggregator is not a member of the committee",
            );
            return Ok(ValidationOutcome::Reject);
        }

        if !signing::is_aggregator(&self.chain_config, committee.len(), message.selection_proof) {
            debug!(
                aggregator_index = message.aggregator_index,
                "selection proof does not select an aggregator",
            );
            return Ok(ValidationOutcome::Reject);
        }

        let verify = || -> Result<()> {
            let public_key = &accessors::validator(&state, message.aggregator_index)?.pubkey;

            SelectionProofSlot(data.slot).verify(
                &self.chain_config,
                &state,
                message.selection_proof,
                public_key,
                SingleVerifier,
            )?;

            message.verify(
                &self.chain_config,
                &state,
                signed_aggregate_and_proof.signature,
                public_key,
                SingleVerifier,
            )?;

            self.verify_attestation(&state, aggregate)
        };

        if let Err(error) = verify() {
            debug!("invalid aggregate and proof: {error:?}");
            return Ok(ValidationOutcome::Reject);
        }

        Ok(pool_outcome(
            self.pools.attestations.insert_aggregated(aggregate.clone()),
        ))
    }

    pub fn validate_voluntary_exit(
        &self,
        signed_voluntary_exit: SignedVoluntaryExit,
    ) -> Result<ValidationOutcome> {
        let state = self.head_state_without_copy().ok_or(Error::NotStarted)?;
        let validator_index = signed_voluntary_exit.message.validator_index;

        if usize::try_from(validator_index).map_or(true, |index| index >= state.validators.len()) {
            debug!(validator_index, "voluntary exit of unknown validator");
            return Ok(ValidationOutcome::Reject);
        }

        if self.pools.exits.get(validator_index).is_some() {
            return Ok(ValidationOutcome::Ignore);
        }

        match self
            .pools
            .exits
            .insert_validated(&state, signed_voluntary_exit)
        {
            PoolAdditionOutcome::Accept => {
                self.event_channels
                    .send_exit_received_event(signed_voluntary_exit);

                Ok(ValidationOutcome::Accept)
            }
            PoolAdditionOutcome::Ignore => Ok(ValidationOutcome::Ignore),
            PoolAdditionOutcome::Reject(_, error) => {
                debug!(validator_index, "invalid voluntary exit: {error:?}");

                // The head state may be wrong while the execution payload is unverified.
                if self.is_optimistic(self.head_root())? {
                    return Ok(ValidationOutcome::Ignore);
                }

                Ok(ValidationOutcome::Reject)
            }
        }
    }

    pub fn validate_prevote(
        &self,
        prevote: Prevote,
        subnet_id: SubnetId,
    ) -> Result<ValidationOutcome> {
        let state = self.head_state_without_copy().ok_or(Error::NotStarted)?;
        let data = &prevote.data;

        let expected_subnet =
            misc::compute_subnet_for_prevote(&self.chain_config, data.slot, data.index);

        if subnet_id != expected_subnet {
            debug!(subnet_id, expected_subnet, "prevote published on wrong subnet");
            return Ok(ValidationOutcome::Reject);
        }

        let committee = match accessors::get_beacon_committee(
            &self.chain_config,
            &state,
            data.slot,
            data.index,
        ) {
            Ok(committee) => committee,
            Err(error) => {
                debug!("prevote of unknown committee: {error:?}");
                return Ok(ValidationOutcome::Reject);
            }
        };

        let Some(position) = prevote.aggregation_bits.first_one() else {
            return Ok(ValidationOutcome::Reject);
        };

        if prevote.aggregation_bits.count_ones() != 1
            || prevote.aggregation_bits.len() != committee.len()
        {
            debug!("prevote bits are not one-hot in the committee");
            return Ok(ValidationOutcome::Reject);
        }

        let verify = || -> Result<()> {
            let public_key = &accessors::validator(&state, committee[position])?.pubkey;

            data.verify(
                &self.chain_config,
                &state,
                prevote.signature,
                public_key,
                SingleVerifier,
            )
        };

        if let Err(error) = verify() {
            debug!("invalid prevote: {error:?}");
            return Ok(ValidationOutcome::Reject);
        }

        Ok(pool_outcome(self.pools.prevotes.insert(prevote)))
    }

    pub fn validate_sync_committee_message(
        &self,
        message: SyncCommitteeMessage,
    ) -> Result<ValidationOutcome> {
        if !self.is_within_clock_disparity(message.slot) {
            return Ok(ValidationOutcome::Ignore);
        }

        let state = self.head_state_without_copy().ok_or(Error::NotStarted)?;

        if !state
            .current_sync_committee
            .contains(&message.validator_index)
        {
            debug!(
                validator_index = message.validator_index,
                "sync committee message from non-member",
            );
            return Ok(ValidationOutcome::Reject);
        }

        let verify = || -> Result<()> {
            let public_key = &accessors::validator(&state, message.validator_index)?.pubkey;

            SyncCommitteeBlockRoot {
                slot: message.slot,
                root: message.beacon_block_root,
            }
            .verify(
                &self.chain_config,
                &state,
                message.signature,
                public_key,
                SingleVerifier,
            )
        };

        if let Err(error) = verify() {
            debug!("invalid sync committee message: {error:?}");
            return Ok(ValidationOutcome::Reject);
        }

        Ok(pool_outcome(self.pools.sync_committee_messages.insert(message)))
    }

    #[must_use]
    pub fn validate_sync_committee_contribution(
        &self,
        contribution: &SyncCommitteeContribution,
    ) -> ValidationOutcome {
        if !self.is_within_clock_disparity(contribution.slot) {
            return ValidationOutcome::Ignore;
        }

        if contribution.aggregation_bits.not_any() {
            return ValidationOutcome::Reject;
        }

        ValidationOutcome::Accept
    }

    fn verify_attestation(&self, state: &BeaconState, attestation: &Attestation) -> Result<()> {
        let indexed = accessors::get_indexed_attestation(&self.chain_config, state, attestation)?;
        predicates::validate_indexed_attestation(&self.chain_config, state, &indexed, SingleVerifier)
    }

    /// Whether the current time falls within `slot` widened by the allowed clock disparity.
    fn is_within_clock_disparity(&self, slot: Slot) -> bool {
        let genesis_time = self.genesis_time();
        let disparity = self.chain_config.maximum_gossip_clock_disparity();
        let now = service::duration_since_unix_epoch();

        let Some(next_slot) = slot.checked_add(1) else {
            return false;
        };

        let slot_start = clock::slot_start(&self.chain_config, genesis_time, slot);
        let next_slot_start = clock::slot_start(&self.chain_config, genesis_time, next_slot);

        let Some(latest) = next_slot_start.checked_add(disparity) else {
            return false;
        };

        slot_start.saturating_sub(disparity) <= now && now < latest
    }
}

/// Whether `error` shows the block itself is invalid rather than the node being unable to
/// process it right now.
fn is_invalid_block(error: &anyhow::Error) -> bool {
    let block_error = matches!(
        error.downcast_ref::<Error>(),
        Some(
            Error::BlockRootMismatch { .. }
                | Error::AllSpinesLimitExceeded { .. }
                | Error::InvalidBlockExit { .. }
                | Error::InvalidBlockWithdrawal { .. }
                | Error::InvalidStateTransition { .. },
        ),
    );

    block_error
        || matches!(
            error.downcast_ref::<fork_choice_store::Error>(),
            Some(fork_choice_store::Error::InvalidParent { .. }),
        )
}

fn pool_outcome(outcome: PoolAdditionOutcome) -> ValidationOutcome {
    match outcome {
        PoolAdditionOutcome::Accept => ValidationOutcome::Accept,
        PoolAdditionOutcome::Ignore => ValidationOutcome::Ignore,
        PoolAdditionOutcome::Reject(reason, error) => {
            let reason: &str = reason.into();
            debug!(reason, "operation rejected by pool: {error:?}");
            ValidationOutcome::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Error as AnyhowError};
    use test_case::test_case;
    use types::primitives::H256;

    use super::*;

    const ROOT: H256 = H256([1; 32]);

    #[test_case(
        anyhow!("signature mismatch").context(Error::InvalidStateTransition { root: ROOT }),
        true;
        "failed state transition"
    )]
    #[test_case(
        Error::AllSpinesLimitExceeded { root: ROOT, count: 2, limit: 1 }.into(),
        true;
        "too many spines"
    )]
    #[test_case(
        fork_choice_store::Error::InvalidParent { root: ROOT, parent_root: H256::zero() }.into(),
        true;
        "invalid parent"
    )]
    #[test_case(
        fork_choice_store::Error::UnknownParent { root: ROOT, parent_root: H256::zero() }.into(),
        false;
        "unknown parent"
    )]
    #[test_case(Error::BlockIsProcessing { root: ROOT }.into(), false; "already processing")]
    #[test_case(
        AnyhowError::from(state_gen::Error::Cancelled { root: ROOT }).context("loading pre-state"),
        false;
        "cancelled replay"
    )]
    #[test_case(anyhow!("database unavailable"), false; "storage failure")]
    fn only_block_faults_count_as_invalid(error: AnyhowError, invalid: bool) {
        assert_eq!(is_invalid_block(&error), invalid);
    }
}
