use std::collections::BTreeMap;

use anyhow::Result;
use bls::Signature;
use parking_lot::RwLock;
use types::{
    beacon_state::BeaconState,
    containers::{SyncAggregate, SyncCommitteeMessage},
    primitives::{AggregationBits, Slot, ValidatorIndex, H256},
};

use crate::misc::PoolAdditionOutcome;

/// Sync committee messages keyed by slot and validator.
#[derive(Default)]
pub struct SyncCommitteeMessagePool {
    messages: RwLock<BTreeMap<(Slot, ValidatorIndex), SyncCommitteeMessage>>,
}

impl SyncCommitteeMessagePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `message` unless the validator already has a message for the same slot.
    pub fn insert(&self, message: SyncCommitteeMessage) -> PoolAdditionOutcome {
        let key = (message.slot, message.validator_index);
        let mut messages = self.messages.write();

        if messages.contains_key(&key) {
            return PoolAdditionOutcome::Ignore;
        }

        messages.insert(key, message);

        PoolAdditionOutcome::Accept
    }

    #[must_use]
    pub fn messages(&self, slot: Slot, beacon_block_root: H256) -> Vec<SyncCommitteeMessage> {
        self.messages
            .read()
            .range((slot, ValidatorIndex::MIN)..=(slot, ValidatorIndex::MAX))
            .map(|(_, message)| *message)
            .filter(|message| message.beacon_block_root == beacon_block_root)
            .collect()
    }

    /// Aggregates messages for `beacon_block_root` at `slot` over the sync committee in `state`.
    ///
    /// Returns an empty aggregate when no committee member has sent a message.
    pub fn sync_aggregate(
        &self,
        state: &BeaconState,
        slot: Slot,
        beacon_block_root: H256,
    ) -> Result<SyncAggregate> {
        let committee = &state.current_sync_committee;
        let messages = self.messages.read();

        let mut sync_committee_bits = AggregationBits::repeat(false, committee.len());
        let mut signatures = vec![];

        for (position, validator_index) in committee.iter().enumerate() {
            let Some(message) = messages.get(&(slot, *validator_index)) else {
                continue;
            };

            if message.beacon_block_root != beacon_block_root {
                continue;
            }

            sync_committee_bits.set(position, true);
            signatures.push(Signature::try_from(message.signature)?);
        }

        if signatures.is_empty() {
            return Ok(SyncAggregate::empty());
        }

        Ok(SyncAggregate {
            sync_committee_bits,
            sync_committee_signature: Signature::aggregate_nonempty(signatures)?.into(),
        })
    }

    /// Drops messages more than one slot older than `slot`.
    pub fn on_slot(&self, slot: Slot) {
        if let Some(oldest) = slot.checked_sub(1) {
            let mut messages = self.messages.write();
            *messages = messages.split_off(&(oldest, ValidatorIndex::MIN));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helper_functions::verifier::SingleVerifier;
    use transition_functions::block_processing;
    use types::{config::Config, containers::BeaconBlock};

    use super::*;

    #[test]
    fn one_message_per_validator_and_slot() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = SyncCommitteeMessagePool::new();
        let root = H256::repeat_byte(1);

        let message = factory::sync_committee_message(&config, &state, 2, root, 3)?;

        assert!(pool.insert(message).is_publishable());
        assert!(!pool.insert(message).is_publishable());
        assert_eq!(pool.messages(2, root), [message]);
        assert!(pool.messages(2, H256::zero()).is_empty());
        assert!(pool.messages(3, root).is_empty());

        Ok(())
    }

    #[test]
    fn messages_are_purged_one_slot_after_they_expire() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = SyncCommitteeMessagePool::new();

        pool.insert(factory::sync_committee_message(&config, &state, 4, H256::zero(), 0)?);
        pool.on_slot(5);

        assert_eq!(pool.len(), 1);

        pool.on_slot(6);

        assert!(pool.is_empty());

        Ok(())
    }

    #[test]
    fn aggregate_passes_block_verification() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = SyncCommitteeMessagePool::new();
        let parent_root = H256::repeat_byte(7);

        for validator_index in state.current_sync_committee.iter().copied().take(5) {
            let message =
                factory::sync_committee_message(&config, &state, 1, parent_root, validator_index)?;
            pool.insert(message);
        }

        let sync_aggregate = pool.sync_aggregate(&state, 1, parent_root)?;

        assert_eq!(sync_aggregate.sync_committee_bits.count_ones(), 5);

        let mut block = BeaconBlock {
            slot: 2,
            parent_root,
            ..BeaconBlock::default()
        };

        block.body.sync_aggregate = sync_aggregate;

        block_processing::process_sync_aggregate(&config, &state, &block, SingleVerifier)
    }

    #[test]
    fn aggregate_of_nothing_is_empty() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = SyncCommitteeMessagePool::new();

        assert_eq!(pool.sync_aggregate(&state, 1, H256::zero())?, SyncAggregate::empty());

        Ok(())
    }
}
