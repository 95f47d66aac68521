use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use types::{
    config::Config,
    containers::{Prevote, PrevoteData},
    primitives::{AggregationBits, Slot},
};

use crate::{
    error::Error,
    misc::{PoolAdditionOutcome, PoolRejectionReason},
};

type PrevoteMap = BTreeMap<Slot, HashMap<PrevoteData, Vec<Prevote>>>;

/// Prevotes for candidate spines grouped by slot and vote data.
pub struct PrevotePool {
    config: Arc<Config>,
    prevotes: RwLock<PrevoteMap>,
}

impl PrevotePool {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            prevotes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds `prevote` unless a pooled prevote with the same data already covers its bits.
    pub fn insert(&self, prevote: Prevote) -> PoolAdditionOutcome {
        if prevote.aggregation_bits.not_any() {
            return reject(Error::EmptyAggregationBits);
        }

        if prevote.data.candidates.is_empty() {
            return reject(Error::NoCandidates {
                slot: prevote.data.slot,
            });
        }

        let mut prevotes = self.prevotes.write();

        let pooled = prevotes
            .entry(prevote.data.slot)
            .or_default()
            .entry(prevote.data.clone())
            .or_default();

        if pooled
            .iter()
            .any(|existing| covers(&existing.aggregation_bits, &prevote.aggregation_bits))
        {
            return PoolAdditionOutcome::Ignore;
        }

        pooled.retain(|existing| !covers(&prevote.aggregation_bits, &existing.aggregation_bits));
        pooled.push(prevote);

        PoolAdditionOutcome::Accept
    }

    #[must_use]
    pub fn prevotes_for_slot(&self, slot: Slot) -> Vec<Prevote> {
        self.prevotes
            .read()
            .get(&slot)
            .into_iter()
            .flat_map(HashMap::values)
            .flatten()
            .cloned()
            .collect()
    }

    pub fn mark_included(&self, included: &[Prevote]) {
        let mut prevotes = self.prevotes.write();

        for prevote in included {
            if let Some(pooled) = prevotes
                .get_mut(&prevote.data.slot)
                .and_then(|by_data| by_data.get_mut(&prevote.data))
            {
                pooled.retain(|existing| {
                    !covers(&prevote.aggregation_bits, &existing.aggregation_bits)
                });
            }
        }
    }

    /// Drops prevotes more than an epoch older than `slot`.
    pub fn on_slot(&self, slot: Slot) {
        if let Some(oldest) = slot.checked_sub(self.config.slots_per_epoch.get()) {
            let mut prevotes = self.prevotes.write();
            *prevotes = prevotes.split_off(&oldest);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prevotes
            .read()
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn reject(error: Error) -> PoolAdditionOutcome {
    PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidPrevote, error.into())
}

fn covers(superset: &AggregationBits, subset: &AggregationBits) -> bool {
    superset.len() == subset.len()
        && subset
            .iter_ones()
            .all(|position| superset.get(position).is_some_and(|bit| *bit))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use types::primitives::H256;

    use super::*;

    #[test]
    fn prevotes_with_more_bits_replace_their_subsets() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = PrevotePool::new(Arc::clone(&config));
        let candidates = vec![H256::repeat_byte(1), H256::repeat_byte(2)];

        let prevote = |positions: &[usize]| {
            factory::prevote(&config, &state, 3, candidates.clone(), positions)
        };

        assert!(pool.insert(prevote(&[0])?).is_publishable());
        assert!(pool.insert(prevote(&[0, 1])?).is_publishable());
        assert!(!pool.insert(prevote(&[1])?).is_publishable());
        assert!(pool.insert(prevote(&[2])?).is_publishable());

        assert_eq!(pool.prevotes_for_slot(3).len(), 2);
        assert!(pool.prevotes_for_slot(4).is_empty());

        pool.mark_included(&[prevote(&[0, 1, 2])?]);

        assert!(pool.is_empty());

        Ok(())
    }

    #[test]
    fn prevotes_without_candidates_are_rejected() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = PrevotePool::new(Arc::clone(&config));

        let prevote = factory::prevote(&config, &state, 1, vec![], &[0])?;

        assert!(matches!(
            pool.insert(prevote),
            PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidPrevote, _),
        ));

        Ok(())
    }

    #[test]
    fn old_prevotes_are_dropped_on_slot() -> Result<()> {
        let config = Arc::new(Config::minimal());
        let state = factory::min_genesis_state(&config)?;
        let pool = PrevotePool::new(Arc::clone(&config));

        pool.insert(factory::prevote(&config, &state, 1, vec![H256::repeat_byte(1)], &[0])?);
        pool.on_slot(9);

        assert_eq!(pool.len(), 1);

        pool.on_slot(10);

        assert!(pool.is_empty());

        Ok(())
    }
}
