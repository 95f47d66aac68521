use anyhow::{ensure, Result};
use itertools::Itertools as _;
use tap::TryConv as _;
use types::{
    beacon_state::BeaconState,
    config::Config,
    containers::{Attestation, AttestationData, IndexedAttestation, Validator},
    consts::DOMAIN_BEACON_PROPOSER,
    primitives::{
        AggregationBits, CommitteeIndex, Domain, DomainType, Epoch, Gwei, Slot, ValidatorIndex,
        H256,
    },
    traits::ContentHash as _,
};

use crate::{error::Error, misc, predicates};

#[must_use]
pub const fn get_current_epoch(config: &Config, state: &BeaconState) -> Epoch {
    misc::compute_epoch_at_slot(config, state.slot)
}

#[must_use]
pub const fn get_previous_epoch(config: &Config, state: &BeaconState) -> Epoch {
    get_current_epoch(config, state).saturating_sub(1)
}

pub fn get_block_root_at_slot(config: &Config, state: &BeaconState, slot: Slot) -> Result<H256> {
    let history = config.slots_per_historical_root.get();

    ensure!(
        slot < state.slot && state.slot <= slot + history,
        Error::SlotOutOfRange {
            slot,
            state_slot: state.slot,
        },
    );

    let index = (slot % history).try_conv::<usize>()?;

    Ok(state.block_roots[index])
}

pub fn get_block_root(config: &Config, state: &BeaconState, epoch: Epoch) -> Result<H256> {
    get_block_root_at_slot(config, state, misc::compute_start_slot_at_epoch(config, epoch))
}

/// The root of the latest block applied to `state`.
///
/// The header in the state has a zero `state_root` until the next slot is processed.
#[must_use]
pub fn latest_block_root(state: &BeaconState) -> H256 {
    let mut header = state.latest_block_header;

    if header.state_root.is_zero() {
        header.state_root = state.hash_tree_root();
    }

    header.hash_tree_root()
}

#[must_use]
pub fn get_randao_mix(config: &Config, state: &BeaconState, epoch: Epoch) -> H256 {
    let index = epoch % config.epochs_per_historical_vector.get();

    usize::try_from(index)
        .ok()
        .and_then(|index| state.randao_mixes.get(index))
        .copied()
        .unwrap_or_default()
}

pub fn active_validator_indices(
    state: &BeaconState,
    epoch: Epoch,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    (0..)
        .zip(&state.validators)
        .filter(move |(_, validator)| predicates::is_active_validator(validator, epoch))
        .map(|(index, _)| index)
}

#[must_use]
pub fn get_total_active_balance(config: &Config, state: &BeaconState) -> Gwei {
    let epoch = get_current_epoch(config, state);

    state
        .validators
        .iter()
        .filter(|validator| predicates::is_active_validator(validator, epoch))
        .map(|validator| validator.effective_balance)
        .sum::<Gwei>()
        .max(1)
}

pub fn get_total_balance(
    state: &BeaconState,
    indices: impl IntoIterator<Item = ValidatorIndex>,
) -> Result<Gwei> {
    indices
        .into_iter()
        .map(|index| -> Result<Gwei> { Ok(validator(state, index)?.effective_balance) })
        .sum()
}

/// Balances fork choice weighs votes with. Inactive and slashed validators have no weight.
#[must_use]
pub fn get_effective_balances(config: &Config, state: &BeaconState) -> Vec<Gwei> {
    let epoch = get_current_epoch(config, state);

    state
        .validators
        .iter()
        .map(|validator| {
            if predicates::is_active_validator(validator, epoch) && !validator.slashed {
                validator.effective_balance
            } else {
                0
            }
        })
        .collect()
}

pub fn validator(state: &BeaconState, index: ValidatorIndex) -> Result<&Validator> {
    index
        .try_conv::<usize>()
        .ok()
        .and_then(|index| state.validators.get(index))
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds { index }.into())
}

pub fn validator_mut(state: &mut BeaconState, index: ValidatorIndex) -> Result<&mut Validator> {
    index
        .try_conv::<usize>()
        .ok()
        .and_then(|index| state.validators.get_mut(index))
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds { index }.into())
}

pub fn balance_mut(state: &mut BeaconState, index: ValidatorIndex) -> Result<&mut Gwei> {
    index
        .try_conv::<usize>()
        .ok()
        .and_then(|index| state.balances.get_mut(index))
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds { index }.into())
}

/// The single committee of `slot`.
///
/// Members are the validators active in the epoch of `slot` whose index is congruent to `slot`
/// modulo the number of slots per epoch. Committees are sorted by validator index.
pub fn get_beacon_committee(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    index: CommitteeIndex,
) -> Result<Vec<ValidatorIndex>> {
    ensure!(index == 0, Error::CommitteeIndexOutOfBounds { index });

    let epoch = misc::compute_epoch_at_slot(config, slot);
    let position = misc::slots_since_epoch_start(config, slot);
    let slots_per_epoch = config.slots_per_epoch.get();
    let max_size = config.max_validators_per_committee.try_conv::<usize>()?;

    Ok(active_validator_indices(state, epoch)
        .filter(|validator_index| validator_index % slots_per_epoch == position)
        .take(max_size)
        .collect())
}

fn get_seed(config: &Config, state: &BeaconState, epoch: Epoch, domain_type: DomainType) -> H256 {
    // The mix of an earlier epoch stays fixed for the whole of `epoch`.
    let mix_epoch =
        epoch + config.epochs_per_historical_vector.get() - config.min_seed_lookahead - 1;
    let mix = get_randao_mix(config, state, mix_epoch);

    hashing::hash([domain_type.as_bytes(), &epoch.to_le_bytes(), mix.as_bytes()].concat())
}

/// Selects the proposer of `state.slot` among the active validators.
pub fn get_beacon_proposer_index(config: &Config, state: &BeaconState) -> Result<ValidatorIndex> {
    compute_proposer_index(config, state, state.slot)
}

pub fn compute_proposer_index(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
) -> Result<ValidatorIndex> {
    let epoch = misc::compute_epoch_at_slot(config, slot);
    let seed = get_seed(config, state, epoch, DOMAIN_BEACON_PROPOSER);
    let active = active_validator_indices(state, epoch).collect_vec();

    ensure!(!active.is_empty(), Error::NoActiveValidators);

    let random = hashing::hash_256_64(seed, slot).to_low_u64_le();
    let position = (random % active.len().try_conv::<u64>()?).try_conv::<usize>()?;

    Ok(active[position])
}

pub fn get_attesting_indices(
    config: &Config,
    state: &BeaconState,
    data: AttestationData,
    aggregation_bits: &AggregationBits,
) -> Result<Vec<ValidatorIndex>> {
    let committee = get_beacon_committee(config, state, data.slot, data.index)?;

    ensure!(
        aggregation_bits.len() == committee.len(),
        Error::CommitteeLengthMismatch {
            aggregation_bitlist_length: aggregation_bits.len(),
            committee_length: committee.len(),
        },
    );

    Ok(aggregation_bits
        .iter_ones()
        .map(|position| committee[position])
        .collect())
}

pub fn get_indexed_attestation(
    config: &Config,
    state: &BeaconState,
    attestation: &Attestation,
) -> Result<IndexedAttestation> {
    let attesting_indices =
        get_attesting_indices(config, state, attestation.data, &attestation.aggregation_bits)?;

    Ok(IndexedAttestation {
        attesting_indices,
        data: attestation.data,
        signature: attestation.signature,
    })
}

#[must_use]
pub fn get_domain(
    config: &Config,
    state: &BeaconState,
    domain_type: DomainType,
    epoch: Option<Epoch>,
) -> Domain {
    let epoch = epoch.unwrap_or_else(|| get_current_epoch(config, state));

    let fork_version = if epoch < state.fork.epoch {
        state.fork.previous_version
    } else {
        state.fork.current_version
    };

    misc::compute_domain(domain_type, fork_version, state.genesis_validators_root)
}
