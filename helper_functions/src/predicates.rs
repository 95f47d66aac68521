use anyhow::{ensure, Result};
use itertools::Itertools as _;
use types::{
    beacon_state::BeaconState,
    config::Config,
    consts::{DOMAIN_BEACON_ATTESTER, FAR_FUTURE_EPOCH},
    containers::{AttestationData, IndexedAttestation, Validator},
    primitives::Epoch,
};

use crate::{
    accessors,
    error::{Error, SignatureKind},
    misc,
    verifier::Verifier,
};

#[must_use]
pub const fn is_active_validator(validator: &Validator, epoch: Epoch) -> bool {
    validator.activation_epoch <= epoch && epoch < validator.exit_epoch
}

#[must_use]
pub const fn is_slashable_validator(validator: &Validator, epoch: Epoch) -> bool {
    !validator.slashed
        && validator.activation_epoch <= epoch
        && epoch < validator.withdrawable_epoch
}

/// Whether `validator` can still initiate an exit or a withdrawal in `epoch`.
#[must_use]
pub const fn is_eligible_for_exit(validator: &Validator, epoch: Epoch) -> bool {
    is_active_validator(validator, epoch) && validator.exit_epoch == FAR_FUTURE_EPOCH
}

/// Double votes and surround votes.
#[must_use]
pub fn is_slashable_attestation_data(data_1: AttestationData, data_2: AttestationData) -> bool {
    let double_vote = data_1 != data_2 && data_1.target.epoch == data_2.target.epoch;

    let surround_vote = data_1.source.epoch < data_2.source.epoch
        && data_2.target.epoch < data_1.target.epoch;

    double_vote || surround_vote
}

pub fn validate_indexed_attestation(
    config: &Config,
    state: &BeaconState,
    indexed_attestation: &IndexedAttestation,
    mut verifier: impl Verifier,
) -> Result<()> {
    let indices = &indexed_attestation.attesting_indices;

    ensure!(!indices.is_empty(), Error::AttestationHasNoAttestingIndices);

    ensure!(
        indices.iter().tuple_windows().all(|(a, b)| a < b),
        Error::AttestingIndicesNotSortedAndUnique,
    );

    let public_keys = indices
        .iter()
        .map(|index| accessors::validator(state, *index).map(|validator| &validator.pubkey))
        .collect::<Result<Vec<_>>>()?;

    let domain = accessors::get_domain(
        config,
        state,
        DOMAIN_BEACON_ATTESTER,
        Some(indexed_attestation.data.target.epoch),
    );

    verifier.verify_aggregate(
        misc::compute_signing_root(&indexed_attestation.data, domain),
        indexed_attestation.signature,
        public_keys,
        SignatureKind::Attestation,
    )
}
