use core::{cmp::Reverse, mem};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use bls::Signature;
use helper_functions::{accessors, misc};
use itertools::Itertools as _;
use parking_lot::RwLock;
use tracing::{debug, warn};
use types::{
    beacon_state::BeaconState,
    config::Config,
    containers::{Attestation, AttestationData},
    primitives::{AggregationBits, Slot, H256},
    traits::ContentHash as _,
};

use crate::{
    error::Error,
    misc::{PoolAdditionOutcome, PoolRejectionReason},
};

type AttestationMap = BTreeMap<Slot, HashMap<AttestationData, Vec<Attestation>>>;

#[derive(Default)]
struct Attestations {
    aggregated: AttestationMap,
    unaggregated: AttestationMap,
    // Keys of every attestation received through gossip, grouped by attestation slot.
    seen: BTreeMap<Slot, HashSet<H256>>,
    for_fork_choice: Vec<Attestation>,
}

impl Attestations {
    fn mark_seen(&mut self, attestation: &Attestation) -> bool {
        self.seen
            .entry(attestation.data.slot)
            .or_default()
            .insert(seen_key(attestation))
    }

    fn add_aggregate(&mut self, attestation: Attestation) -> bool {
        let pooled = self
            .aggregated
            .entry(attestation.data.slot)
            .or_default()
            .entry(attestation.data)
            .or_default();

        if pooled
            .iter()
            .any(|existing| is_subset(&attestation.aggregation_bits, &existing.aggregation_bits))
        {
            return false;
        }

        pooled.retain(|existing| {
            !is_subset(&existing.aggregation_bits, &attestation.aggregation_bits)
        });
        pooled.push(attestation);

        true
    }

    fn add_unaggregated(&mut self, attestation: Attestation) -> bool {
        let pooled = self
            .unaggregated
            .entry(attestation.data.slot)
            .or_default()
            .entry(attestation.data)
            .or_default();

        if pooled
            .iter()
            .any(|existing| existing.aggregation_bits == attestation.aggregation_bits)
        {
            return false;
        }

        pooled.push(attestation);

        true
    }

    fn is_covered_by_aggregate(&self, attestation: &Attestation) -> bool {
        self.aggregated
            .get(&attestation.data.slot)
            .and_then(|by_data| by_data.get(&attestation.data))
            .into_iter()
            .flatten()
            .any(|aggregate| is_subset(&attestation.aggregation_bits, &aggregate.aggregation_bits))
    }
}

/// Aggregated and unaggregated attestations with a filter of attestations already seen.
pub struct AttestationPool {
    config: Arc<Config>,
    attestations: RwLock<Attestations>,
}

impl AttestationPool {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            attestations: RwLock::new(Attestations::default()),
        }
    }

    /// Adds an attestation signed by a single validator.
    pub fn insert_unaggregated(&self, attestation: Attestation) -> PoolAdditionOutcome {
        let count = attestation.aggregation_bits.count_ones();

        if count != 1 {
            return PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidAttestation,
                Error::NotSingular { count }.into(),
            );
        }

        let mut attestations = self.attestations.write();

        if !attestations.mark_seen(&attestation) {
            return PoolAdditionOutcome::Ignore;
        }

        attestations.for_fork_choice.push(attestation.clone());

        if attestations.add_unaggregated(attestation) {
            PoolAdditionOutcome::Accept
        } else {
            PoolAdditionOutcome::Ignore
        }
    }

    /// Adds an aggregate. Aggregates whose bits are a subset of a pooled one are ignored.
    /// Pooled aggregates whose bits are a subset of the new one are replaced.
    pub fn insert_aggregated(&self, attestation: Attestation) -> PoolAdditionOutcome {
        if attestation.aggregation_bits.not_any() {
            return PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidAttestation,
                Error::EmptyAggregationBits.into(),
            );
        }

        let mut attestations = self.attestations.write();

        if !attestations.mark_seen(&attestation) {
            return PoolAdditionOutcome::Ignore;
        }

        attestations.for_fork_choice.push(attestation.clone());

        if attestations.add_aggregate(attestation) {
            PoolAdditionOutcome::Accept
        } else {
            PoolAdditionOutcome::Ignore
        }
    }

    /// Combines unaggregated attestations with equal data into aggregates.
    pub fn aggregate_unaggregated(&self) -> Result<()> {
        let mut attestations = self.attestations.write();
        let unaggregated = mem::take(&mut attestations.unaggregated);

        for group in unaggregated.into_values().flat_map(HashMap::into_values) {
            let Some(aggregate) = aggregate(group)? else {
                continue;
            };

            attestations.add_aggregate(aggregate);
        }

        Ok(())
    }

    /// Attestations that can be included in a block built on `state`, most participants first.
    ///
    /// Attestations over the block limit stay in the pool.
    #[must_use]
    pub fn attestations_for_block(&self, state: &BeaconState) -> Vec<Attestation> {
        let attestations = self.attestations.read();

        let aggregated = attestations
            .aggregated
            .values()
            .flat_map(HashMap::values)
            .flatten();

        let unaggregated = attestations
            .unaggregated
            .values()
            .flat_map(HashMap::values)
            .flatten()
            .filter(|attestation| !attestations.is_covered_by_aggregate(attestation));

        aggregated
            .chain(unaggregated)
            .filter(|attestation| is_includable(&self.config, state, attestation.data))
            .sorted_by_key(|attestation| Reverse(attestation.aggregation_bits.count_ones()))
            .take(self.config.max_attestations)
            .cloned()
            .collect()
    }

    /// Removes and returns attestations not yet applied to fork choice.
    pub fn take_for_fork_choice(&self) -> Vec<Attestation> {
        mem::take(&mut self.attestations.write().for_fork_choice)
    }

    /// Removes pooled attestations covered by attestations included in a canonical block.
    pub fn mark_included(&self, included: &[Attestation]) {
        let mut guard = self.attestations.write();
        let attestations = &mut *guard;

        for attestation in included {
            let slot = attestation.data.slot;
            let bits = &attestation.aggregation_bits;

            for map in [&mut attestations.aggregated, &mut attestations.unaggregated] {
                if let Some(pooled) = map
                    .get_mut(&slot)
                    .and_then(|by_data| by_data.get_mut(&attestation.data))
                {
                    pooled.retain(|existing| !is_subset(&existing.aggregation_bits, bits));
                }
            }

            attestations.mark_seen(attestation);
        }
    }

    /// Re-adds attestations from blocks dropped by a re-organization.
    ///
    /// Attestations more than an epoch older than `current_slot` are discarded.
    /// Returns the number of attestations added back.
    pub fn reinsert_orphaned(
        &self,
        orphaned: impl IntoIterator<Item = Attestation>,
        current_slot: Slot,
    ) -> usize {
        let mut attestations = self.attestations.write();
        let mut reinserted = 0;

        for attestation in orphaned {
            if attestation.data.slot + self.config.slots_per_epoch.get() < current_slot {
                continue;
            }

            let added = if attestation.aggregation_bits.count_ones() == 1 {
                attestations.add_unaggregated(attestation)
            } else {
                attestations.add_aggregate(attestation)
            };

            if added {
                reinserted += 1;
            }
        }

        if reinserted > 0 {
            debug!(reinserted, "orphaned attestations returned to pool");
        }

        reinserted
    }

    /// Drops attestations that can no longer be included in blocks at `slot` or later.
    pub fn on_slot(&self, slot: Slot) {
        let Some(oldest_includable) = slot.checked_sub(self.config.slots_per_epoch.get()) else {
            return;
        };

        let mut attestations = self.attestations.write();

        attestations.aggregated = attestations.aggregated.split_off(&oldest_includable);
        attestations.unaggregated = attestations.unaggregated.split_off(&oldest_includable);
        attestations.seen = attestations.seen.split_off(&oldest_includable);
    }

    #[must_use]
    pub fn aggregated_count(&self) -> usize {
        count(&self.attestations.read().aggregated)
    }

    #[must_use]
    pub fn unaggregated_count(&self) -> usize {
        count(&self.attestations.read().unaggregated)
    }
}

fn seen_key(attestation: &Attestation) -> H256 {
    let bits_root = hashing::hash_serialized(&attestation.aggregation_bits);
    hashing::hash_256_256(attestation.data.hash_tree_root(), bits_root)
}

fn is_subset(subset: &AggregationBits, superset: &AggregationBits) -> bool {
    subset.len() == superset.len()
        && subset
            .iter_ones()
            .all(|position| superset.get(position).is_some_and(|bit| *bit))
}

fn count(map: &AttestationMap) -> usize {
    map.values().flat_map(HashMap::values).map(Vec::len).sum()
}

fn aggregate(attestations: Vec<Attestation>) -> Result<Option<Attestation>> {
    let Some(first) = attestations.first() else {
        return Ok(None);
    };

    let data = first.data;
    let mut aggregation_bits = AggregationBits::repeat(false, first.aggregation_bits.len());
    let mut signatures = vec![];

    for attestation in &attestations {
        if attestation.aggregation_bits.len() != aggregation_bits.len() {
            warn!(?data, "unaggregated attestations disagree on committee size");
            continue;
        }

        if attestation
            .aggregation_bits
            .iter_ones()
            .any(|position| aggregation_bits[position])
        {
            continue;
        }

        for position in attestation.aggregation_bits.iter_ones() {
            aggregation_bits.set(position, true);
        }

        signatures.push(Signature::try_from(attestation.signature)?);
    }

    Ok(Some(Attestation {
        aggregation_bits,
        data,
        signature: Signature::aggregate_nonempty(signatures)?.into(),
    }))
}

fn is_includable(config: &Config, state: &BeaconState, data: AttestationData) -> bool {
    let current_epoch = accessors::get_current_epoch(config, state);
    let previous_epoch = accessors::get_previous_epoch(config, state);
    let target_epoch = data.target.epoch;

    let targets_recent_epoch = (target_epoch == previous_epoch || target_epoch == current_epoch)
        && target_epoch == misc::compute_epoch_at_slot(config, data.slot);

    let in_inclusion_range = data.slot + config.min_attestation_inclusion_delay <= state.slot
        && state.slot <= data.slot + config.slots_per_epoch.get();

    let justified = if target_epoch == current_epoch {
        state.current_justified_checkpoint
    } else {
        state.previous_justified_checkpoint
    };

    targets_recent_epoch && in_inclusion_range && data.source == justified
}
