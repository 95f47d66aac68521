use types::{
    config::Config,
    containers::{ForkData, SigningData},
    primitives::{CommitteeIndex, Domain, DomainType, Epoch, Slot, SubnetId, Version, H256},
    traits::ContentHash,
};

#[must_use]
pub const fn compute_epoch_at_slot(config: &Config, slot: Slot) -> Epoch {
    slot / config.slots_per_epoch.get()
}

#[must_use]
pub const fn compute_start_slot_at_epoch(config: &Config, epoch: Epoch) -> Slot {
    epoch.saturating_mul(config.slots_per_epoch.get())
}

#[must_use]
pub const fn is_epoch_start(config: &Config, slot: Slot) -> bool {
    slots_since_epoch_start(config, slot) == 0
}

#[must_use]
pub const fn slots_since_epoch_start(config: &Config, slot: Slot) -> u64 {
    slot % config.slots_per_epoch.get()
}

#[must_use]
pub fn compute_fork_data_root(current_version: Version, genesis_validators_root: H256) -> H256 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .hash_tree_root()
}

#[must_use]
pub fn compute_domain(
    domain_type: DomainType,
    fork_version: Version,
    genesis_validators_root: H256,
) -> Domain {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);

    let mut domain = Domain::zero();
    domain[..DomainType::len_bytes()].copy_from_slice(domain_type.as_bytes());
    domain[DomainType::len_bytes()..]
        .copy_from_slice(&fork_data_root[..H256::len_bytes() - DomainType::len_bytes()]);
    domain
}

#[must_use]
pub fn compute_signing_root(object: &(impl ContentHash + ?Sized), domain: Domain) -> H256 {
    SigningData {
        object_root: object.hash_tree_root(),
        domain,
    }
    .hash_tree_root()
}

/// There is one committee per slot, so the subnet only depends on the position of the slot in
/// its epoch.
#[must_use]
pub const fn compute_subnet_for_attestation(
    config: &Config,
    slot: Slot,
    committee_index: CommitteeIndex,
) -> SubnetId {
    subnet_for_position(
        slots_since_epoch_start(config, slot),
        committee_index,
        config.attestation_subnet_count.get(),
    )
}

#[must_use]
pub const fn compute_subnet_for_prevote(
    config: &Config,
    slot: Slot,
    committee_index: CommitteeIndex,
) -> SubnetId {
    subnet_for_position(
        slots_since_epoch_start(config, slot),
        committee_index,
        config.prevote_subnet_count.get(),
    )
}

// `committee_index` comes from the network and may be arbitrarily large.
const fn subnet_for_position(
    position: u64,
    committee_index: CommitteeIndex,
    subnet_count: u64,
) -> SubnetId {
    let position = position % subnet_count;
    let committee_index = committee_index % subnet_count;
    let remaining = subnet_count - position;

    if committee_index >= remaining {
        committee_index - remaining
    } else {
        position + committee_index
    }
}
