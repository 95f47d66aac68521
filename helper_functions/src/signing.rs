use anyhow::Result;
use bls::{PublicKeyBytes, SecretKey, SignatureBytes};
use derive_more::From;
use serde::Serialize;
use types::{
    beacon_state::BeaconState,
    config::Config,
    consts::{
        DOMAIN_AGGREGATE_AND_PROOF, DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER,
        DOMAIN_DEPOSIT, DOMAIN_PREVOTE, DOMAIN_RANDAO, DOMAIN_SELECTION_PROOF,
        DOMAIN_SYNC_COMMITTEE, DOMAIN_VOLUNTARY_EXIT,
    },
    containers::{
        AggregateAndProof, AttestationData, BeaconBlock, BeaconBlockHeader, DepositMessage,
        PrevoteData, VoluntaryExit,
    },
    primitives::{DomainType, Epoch, Slot, H256},
    traits::ContentHash,
};

use crate::{accessors, error::SignatureKind, misc, verifier::Verifier};

// These wrappers are needed to differentiate between `Epoch` and `Slot`.
// They are aliased to the same type and thus cannot have different trait implementations.
#[derive(Clone, Copy, From, Serialize)]
#[serde(transparent)]
pub struct RandaoEpoch(pub Epoch);

#[derive(Clone, Copy, From, Serialize)]
#[serde(transparent)]
pub struct SelectionProofSlot(pub Slot);

#[derive(Clone, Copy, Serialize)]
pub struct SyncCommitteeBlockRoot {
    pub slot: Slot,
    pub root: H256,
}

impl ContentHash for RandaoEpoch {}
impl ContentHash for SelectionProofSlot {}
impl ContentHash for SyncCommitteeBlockRoot {}

pub trait SignForSingleFork: ContentHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn epoch(&self, config: &Config) -> Epoch;

    fn signing_root(&self, config: &Config, state: &BeaconState) -> H256 {
        let epoch = Some(self.epoch(config));
        let domain = accessors::get_domain(config, state, Self::DOMAIN_TYPE, epoch);
        misc::compute_signing_root(self, domain)
    }

    fn sign(&self, config: &Config, state: &BeaconState, secret_key: &SecretKey) -> SignatureBytes {
        secret_key.sign(self.signing_root(config, state)).to_bytes()
    }

    fn verify(
        &self,
        config: &Config,
        state: &BeaconState,
        signature_bytes: SignatureBytes,
        public_key: &PublicKeyBytes,
        mut verifier: impl Verifier,
    ) -> Result<()> {
        verifier.verify_singular(
            self.signing_root(config, state),
            signature_bytes,
            public_key,
            Self::SIGNATURE_KIND,
        )
    }
}

impl SignForSingleFork for BeaconBlock {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_PROPOSER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Block;

    fn epoch(&self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.slot)
    }
}

impl SignForSingleFork for BeaconBlockHeader {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_PROPOSER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Block;

    fn epoch(&self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.slot)
    }
}

impl SignForSingleFork for RandaoEpoch {
    const DOMAIN_TYPE: DomainType = DOMAIN_RANDAO;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Randao;

    fn epoch(&self, _config: &Config) -> Epoch {
        self.0
    }
}

impl SignForSingleFork for AttestationData {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_ATTESTER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Attestation;

    fn epoch(&self, _config: &Config) -> Epoch {
        self.target.epoch
    }
}

impl SignForSingleFork for AggregateAndProof {
    const DOMAIN_TYPE: DomainType = DOMAIN_AGGREGATE_AND_PROOF;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::AggregateAndProof;

    fn epoch(&self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.aggregate.data.slot)
    }
}

impl SignForSingleFork for SelectionProofSlot {
    const DOMAIN_TYPE: DomainType = DOMAIN_SELECTION_PROOF;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::SelectionProof;

    fn epoch(&self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.0)
    }
}

impl SignForSingleFork for VoluntaryExit {
    const DOMAIN_TYPE: DomainType = DOMAIN_VOLUNTARY_EXIT;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::VoluntaryExit;

    fn epoch(&self, _config: &Config) -> Epoch {
        self.epoch
    }
}

impl SignForSingleFork for PrevoteData {
    const DOMAIN_TYPE: DomainType = DOMAIN_PREVOTE;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Prevote;

    fn epoch(&self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.slot)
    }
}

impl SignForSingleFork for SyncCommitteeBlockRoot {
    const DOMAIN_TYPE: DomainType = DOMAIN_SYNC_COMMITTEE;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::SyncCommitteeMessage;

    fn epoch(&self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.slot)
    }
}

/// Deposits are signed over the genesis fork so that they stay valid across forks.
#[must_use]
pub fn deposit_signing_root(config: &Config, message: &DepositMessage) -> H256 {
    let domain = misc::compute_domain(DOMAIN_DEPOSIT, config.genesis_fork_version, H256::zero());
    misc::compute_signing_root(message, domain)
}

/// Whether the holder of `selection_proof` aggregates for a committee of `committee_length`.
#[must_use]
pub fn is_aggregator(
    config: &Config,
    committee_length: usize,
    selection_proof: SignatureBytes,
) -> bool {
    let target = config.target_aggregators_per_committee.get();
    let modulo = (committee_length as u64 / target).max(1);

    hashing::hash(selection_proof).to_low_u64_le() % modulo == 0
}

#[cfg(test)]
mod tests {
    use crate::verifier::SingleVerifier;

    use super::*;

    #[test]
    fn signature_over_block_verifies_against_signer() -> Result<()> {
        let config = Config::minimal();
        let state = BeaconState::default();
        let secret_key = SecretKey::from_seed([9; 32])?;
        let public_key = secret_key.to_public_key().to_bytes();

        let block = BeaconBlock {
            slot: 3,
            ..BeaconBlock::default()
        };

        let signature = block.sign(&config, &state, &secret_key);

        block.verify(&config, &state, signature, &public_key, SingleVerifier)?;

        let other_block = BeaconBlock {
            slot: 4,
            ..BeaconBlock::default()
        };

        assert!(other_block
            .verify(&config, &state, signature, &public_key, SingleVerifier)
            .is_err());

        Ok(())
    }

    #[test]
    fn signing_roots_differ_across_domains() {
        let config = Config::minimal();
        let state = BeaconState::default();

        assert_ne!(
            RandaoEpoch(1).signing_root(&config, &state),
            SelectionProofSlot(1).signing_root(&config, &state),
        );
    }

    #[test]
    fn small_committees_always_aggregate() {
        let config = Config::minimal();

        assert!(is_aggregator(&config, 3, SignatureBytes::repeat_byte(7)));
    }
}
