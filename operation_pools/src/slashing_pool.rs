use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use helper_functions::{accessors, predicates};
use parking_lot::RwLock;
use tracing::debug;
use types::{
    beacon_state::BeaconState,
    config::Config,
    containers::{AttesterSlashing, ProposerSlashing},
    primitives::ValidatorIndex,
};

use crate::{
    error::Error,
    misc::{PoolAdditionOutcome, PoolRejectionReason},
};

#[derive(Default)]
struct Slashings {
    proposer: BTreeMap<ValidatorIndex, ProposerSlashing>,
    attester: Vec<AttesterSlashing>,
}

/// Proposer slashings keyed by proposer and attester slashings that slash someone new.
pub struct SlashingPool {
    config: Arc<Config>,
    slashings: RwLock<Slashings>,
}

impl SlashingPool {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            slashings: RwLock::new(Slashings::default()),
        }
    }

    pub fn insert_proposer_slashing(&self, slashing: ProposerSlashing) -> PoolAdditionOutcome {
        let header_1 = slashing.signed_header_1.message;
        let header_2 = slashing.signed_header_2.message;

        if header_1.proposer_index != header_2.proposer_index
            || header_1.slot != header_2.slot
            || header_1 == header_2
        {
            return PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidProposerSlashing,
                Error::ProposerMismatch.into(),
            );
        }

        let mut slashings = self.slashings.write();

        if slashings.proposer.contains_key(&header_1.proposer_index) {
            return PoolAdditionOutcome::Ignore;
        }

        debug!(index = header_1.proposer_index, "proposer slashing added to pool");

        slashings.proposer.insert(header_1.proposer_index, slashing);

        PoolAdditionOutcome::Accept
    }

    /// Adds `slashing` if it slashes at least one validator not covered by pooled slashings.
    pub fn insert_attester_slashing(&self, slashing: AttesterSlashing) -> PoolAdditionOutcome {
        let data_1 = slashing.attestation_1.data;
        let data_2 = slashing.attestation_2.data;

        if !predicates::is_slashable_attestation_data(data_1, data_2) {
            return PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidAttesterSlashing,
                anyhow::anyhow!("attestation data is not slashable"),
            );
        }

        let offenders = common_attesters(&slashing);

        if offenders.is_empty() {
            return PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidAttesterSlashing,
                Error::NoCommonAttesters.into(),
            );
        }

        let mut slashings = self.slashings.write();

        let covered = slashings
            .attester
            .iter()
            .flat_map(common_attesters)
            .collect::<BTreeSet<_>>();

        if offenders.is_subset(&covered) {
            return PoolAdditionOutcome::Ignore;
        }

        slashings.attester.push(slashing);

        PoolAdditionOutcome::Accept
    }

    /// Slashings that still slash someone in `state`, limited to what a block can carry.
    #[must_use]
    pub fn slashings_for_block(
        &self,
        state: &BeaconState,
    ) -> (Vec<ProposerSlashing>, Vec<AttesterSlashing>) {
        let slashings = self.slashings.read();

        let proposer = slashings
            .proposer
            .iter()
            .filter(|(index, _)| self.is_slashable(state, **index))
            .map(|(_, slashing)| *slashing)
            .take(self.config.max_proposer_slashings)
            .collect();

        let attester = slashings
            .attester
            .iter()
            .filter(|slashing| {
                common_attesters(slashing)
                    .into_iter()
                    .any(|index| self.is_slashable(state, index))
            })
            .take(self.config.max_attester_slashings)
            .cloned()
            .collect();

        (proposer, attester)
    }

    pub fn mark_included(&self, proposer: &[ProposerSlashing], attester: &[AttesterSlashing]) {
        let mut slashings = self.slashings.write();

        for slashing in proposer {
            slashings
                .proposer
                .remove(&slashing.signed_header_1.message.proposer_index);
        }

        slashings
            .attester
            .retain(|pooled| !attester.contains(pooled));
    }

    /// Drops slashings whose validators are all slashed or withdrawn in `state`.
    pub fn on_slot(&self, state: &BeaconState) {
        let mut slashings = self.slashings.write();

        slashings
            .proposer
            .retain(|index, _| self.is_slashable(state, *index));

        slashings.attester.retain(|slashing| {
            common_attesters(slashing)
                .into_iter()
                .any(|index| self.is_slashable(state, index))
        });
    }

    #[must_use]
    pub fn proposer_slashing_count(&self) -> usize {
        self.slashings.read().proposer.len()
    }

    #[must_use]
    pub fn attester_slashing_count(&self) -> usize {
        self.slashings.read().attester.len()
    }

    fn is_slashable(&self, state: &BeaconState, index: ValidatorIndex) -> bool {
        let current_epoch = accessors::get_current_epoch(&self.config, state);

        accessors::validator(state, index)
            .is_ok_and(|validator| predicates::is_slashable_validator(validator, current_epoch))
    }
}

fn common_attesters(slashing: &AttesterSlashing) -> BTreeSet<ValidatorIndex> {
    let attesters_2 = slashing
        .attestation_2
        .attesting_indices
        .iter()
        .collect::<BTreeSet<_>>();

    slashing
        .attestation_1
        .attesting_indices
        .iter()
        .filter(|index| attesters_2.contains(index))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use types::{
        containers::{
            AttestationData, BeaconBlockHeader, Checkpoint, IndexedAttestation,
            SignedBeaconBlockHeader,
        },
        primitives::H256,
    };

    use super::*;

    fn proposer_slashing(proposer_index: ValidatorIndex) -> ProposerSlashing {
        let header = |body_byte| SignedBeaconBlockHeader {
            message: BeaconBlockHeader {
                slot: 5,
                proposer_index,
                body_root: H256::repeat_byte(body_byte),
                ..BeaconBlockHeader::default()
            },
            ..SignedBeaconBlockHeader::default()
        };

        ProposerSlashing {
            signed_header_1: header(1),
            signed_header_2: header(2),
        }
    }

    fn attester_slashing(attesters_1: Vec<u64>, attesters_2: Vec<u64>) -> AttesterSlashing {
        let attestation = |attesting_indices, root_byte| IndexedAttestation {
            attesting_indices,
            data: AttestationData {
                slot: 3,
                beacon_block_root: H256::repeat_byte(root_byte),
                target: Checkpoint {
                    epoch: 0,
                    root: H256::zero(),
                },
                ..AttestationData::default()
            },
            ..IndexedAttestation::default()
        };

        AttesterSlashing {
            attestation_1: attestation(attesters_1, 1),
            attestation_2: attestation(attesters_2, 2),
        }
    }

    #[test]
    fn one_proposer_slashing_per_proposer() {
        let pool = SlashingPool::new(Arc::new(Config::minimal()));

        assert!(pool.insert_proposer_slashing(proposer_slashing(4)).is_publishable());
        assert!(!pool.insert_proposer_slashing(proposer_slashing(4)).is_publishable());

        let mut mismatched = proposer_slashing(5);
        mismatched.signed_header_2.message.proposer_index = 6;

        assert!(matches!(
            pool.insert_proposer_slashing(mismatched),
            PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidProposerSlashing, _),
        ));
        assert_eq!(pool.proposer_slashing_count(), 1);
    }

    #[test]
    fn attester_slashings_must_slash_someone_new() {
        let pool = SlashingPool::new(Arc::new(Config::minimal()));

        assert!(pool
            .insert_attester_slashing(attester_slashing(vec![1, 2, 3], vec![2, 3, 4]))
            .is_publishable());
        assert!(!pool
            .insert_attester_slashing(attester_slashing(vec![2], vec![2, 5]))
            .is_publishable());
        assert!(pool
            .insert_attester_slashing(attester_slashing(vec![3, 6], vec![6]))
            .is_publishable());
        assert!(matches!(
            pool.insert_attester_slashing(attester_slashing(vec![1], vec![2])),
            PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidAttesterSlashing, _),
        ));

        assert_eq!(pool.attester_slashing_count(), 2);
    }

    #[test]
    fn slashings_of_slashed_validators_are_dropped_on_slot() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let pool = SlashingPool::new(Arc::clone(&config));
        let mut state = factory::min_genesis_state(&config)?.as_ref().clone();

        pool.insert_proposer_slashing(proposer_slashing(4));
        pool.insert_attester_slashing(attester_slashing(vec![7, 8], vec![8]));

        let (proposer, attester) = pool.slashings_for_block(&state);

        assert_eq!(proposer.len(), 1);
        assert_eq!(attester.len(), 1);

        accessors::validator_mut(&mut state, 4)?.slashed = true;
        accessors::validator_mut(&mut state, 8)?.slashed = true;

        pool.on_slot(&state);

        assert_eq!(pool.proposer_slashing_count(), 0);
        assert_eq!(pool.attester_slashing_count(), 0);

        Ok(())
    }

    #[test]
    fn included_slashings_are_removed() {
        let pool = SlashingPool::new(Arc::new(Config::minimal()));
        let attester = attester_slashing(vec![1, 2], vec![2]);

        pool.insert_proposer_slashing(proposer_slashing(4));
        pool.insert_attester_slashing(attester.clone());
        pool.mark_included(&[proposer_slashing(4)], &[attester]);

        assert_eq!(pool.proposer_slashing_count(), 0);
        assert_eq!(pool.attester_slashing_count(), 0);
    }
}
