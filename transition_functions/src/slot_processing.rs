use anyhow::{ensure, Result};
use helper_functions::misc;
use tap::TryConv as _;
use types::{
    beacon_state::BeaconState, config::Config, containers::BeaconBlock, primitives::Slot,
    traits::ContentHash as _,
};

use crate::{epoch_processing, error::Error};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessSlots {
    Always,
    IfNeeded,
    Never,
}

impl ProcessSlots {
    #[must_use]
    pub const fn should_process(self, state: &BeaconState, block: &BeaconBlock) -> bool {
        match self {
            Self::Always => true,
            // The test for equality rejects blocks attempting to rewind the state early,
            // in `process_slots` rather than while verifying the state root.
            Self::IfNeeded => state.slot != block.slot,
            Self::Never => false,
        }
    }
}

pub fn process_slots(config: &Config, state: &mut BeaconState, slot: Slot) -> Result<()> {
    ensure!(
        state.slot < slot,
        Error::SlotNotLater {
            current: state.slot,
            target: slot,
        },
    );

    while state.slot < slot {
        process_slot(config, state)?;

        // > Process epoch on the start slot of the next epoch
        if misc::is_epoch_start(config, state.slot + 1) {
            epoch_processing::process_epoch(config, state)?;
        }

        state.slot += 1;
    }

    Ok(())
}

fn process_slot(config: &Config, state: &mut BeaconState) -> Result<()> {
    let index = (state.slot % config.slots_per_historical_root.get()).try_conv::<usize>()?;

    // > Cache state root
    let previous_state_root = state.hash_tree_root();
    state.state_roots[index] = previous_state_root;

    // > Cache latest block header state root
    if state.latest_block_header.state_root.is_zero() {
        state.latest_block_header.state_root = previous_state_root;
    }

    // > Cache block root
    state.block_roots[index] = state.latest_block_header.hash_tree_root();

    Ok(())
}
