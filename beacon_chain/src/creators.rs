use anyhow::Result;
use helper_functions::{accessors, misc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::debug;
use types::{
    beacon_state::BeaconState,
    config::Config,
    primitives::{Epoch, ValidatorIndex},
};

/// Block proposers of the current epoch, one per slot.
#[derive(Default)]
pub struct CreatorsCache {
    assignment: RwLock<Option<(Epoch, Vec<ValidatorIndex>)>>,
}

impl CreatorsCache {
    /// Returns the proposers of the epoch of `state.slot`, computing them on a miss.
    ///
    /// Only one upgradable reader exists at a time, so two misses never race to upgrade.
    pub fn current_creators(
        &self,
        config: &Config,
        state: &BeaconState,
    ) -> Result<Vec<ValidatorIndex>> {
        let epoch = accessors::get_current_epoch(config, state);
        let assignment = self.assignment.upgradable_read();

        if let Some((cached_epoch, creators)) = assignment.as_ref() {
            if *cached_epoch == epoch {
                return Ok(creators.clone());
            }
        }

        let creators = compute_creators(config, state, epoch)?;

        debug!(epoch, "creators assignment computed");

        *RwLockUpgradableReadGuard::upgrade(assignment) = Some((epoch, creators.clone()));

        Ok(creators)
    }

    /// Replaces the cached assignment with the one of the epoch of `state.slot`.
    pub fn refresh(&self, config: &Config, state: &BeaconState) -> Result<()> {
        let epoch = accessors::get_current_epoch(config, state);
        let creators = compute_creators(config, state, epoch)?;

        *self.assignment.write() = Some((epoch, creators));

        Ok(())
    }

    #[must_use]
    pub fn cached_epoch(&self) -> Option<Epoch> {
        self.assignment.read().as_ref().map(|(epoch, _)| *epoch)
    }
}

fn compute_creators(
    config: &Config,
    state: &BeaconState,
    epoch: Epoch,
) -> Result<Vec<ValidatorIndex>> {
    let start_slot = misc::compute_start_slot_at_epoch(config, epoch);

    (start_slot..start_slot + config.slots_per_epoch.get())
        .map(|slot| accessors::compute_proposer_index(config, state, slot))
        .collect()
}

#[cfg(test)]
mod tests {
    use factory::genesis_state;

    use super::*;

    #[test]
    fn creators_are_cached_per_epoch() -> Result<()> {
        let config = Config::minimal();
        let state = genesis_state(&config, 16)?;
        let cache = CreatorsCache::default();

        assert_eq!(cache.cached_epoch(), None);

        let creators = cache.current_creators(&config, &state)?;

        assert_eq!(creators.len(), 8);
        assert_eq!(cache.cached_epoch(), Some(0));
        assert_eq!(cache.current_creators(&config, &state)?, creators);

        for (slot, creator) in (0..).zip(&creators) {
            assert_eq!(
                accessors::compute_proposer_index(&config, &state, slot)?,
                *creator,
            );
        }

        Ok(())
    }
}
