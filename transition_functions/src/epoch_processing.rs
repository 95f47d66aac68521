use anyhow::Result;
use helper_functions::{accessors, misc, predicates};
use tap::TryConv as _;
use types::{
    beacon_state::BeaconState,
    config::Config,
    consts::{EFFECTIVE_BALANCE_INCREMENT, FAR_FUTURE_EPOCH, JUSTIFICATION_BITS_LENGTH},
    containers::Checkpoint,
    gwat::{ValidatorSync, ValidatorSyncOp},
    primitives::{Epoch, Gwei},
};

pub fn process_epoch(config: &Config, state: &mut BeaconState) -> Result<()> {
    process_justification_and_finalization(config, state)?;
    process_registry_updates(config, state);
    process_effective_balance_updates(config, state);
    process_spine_data_reset(config, state);
    process_block_voting_pruning(config, state);
    process_randao_mixes_reset(config, state)?;
    process_participation_rotation(state);
    Ok(())
}

/// Casper FFG justification and finalization over a 4 epoch window.
pub fn process_justification_and_finalization(
    config: &Config,
    state: &mut BeaconState,
) -> Result<()> {
    let current_epoch = accessors::get_current_epoch(config, state);
    let previous_epoch = accessors::get_previous_epoch(config, state);
    let total_active_balance = accessors::get_total_active_balance(config, state);

    let previous_target_balance =
        target_balance(state, &state.previous_epoch_participation, previous_epoch);
    let current_target_balance =
        target_balance(state, &state.current_epoch_participation, current_epoch);

    let old_previous_justified_checkpoint = state.previous_justified_checkpoint;
    let old_current_justified_checkpoint = state.current_justified_checkpoint;

    // > Process justifications
    state.previous_justified_checkpoint = state.current_justified_checkpoint;
    state.justification_bits.copy_within(..JUSTIFICATION_BITS_LENGTH - 1, 1);
    state.justification_bits[0] = false;

    if previous_epoch < current_epoch && previous_target_balance * 3 >= total_active_balance * 2 {
        state.current_justified_checkpoint = Checkpoint {
            epoch: previous_epoch,
            root: accessors::get_block_root(config, state, previous_epoch)?,
        };

        state.justification_bits[1] = true;
    }

    if current_target_balance * 3 >= total_active_balance * 2 {
        state.current_justified_checkpoint = Checkpoint {
            epoch: current_epoch,
            root: accessors::get_block_root(config, state, current_epoch)?,
        };

        state.justification_bits[0] = true;
    }

    // > Process finalizations
    let bits = state.justification_bits;

    // > The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source
    if bits[1..4].iter().all(|bit| *bit)
        && old_previous_justified_checkpoint.epoch + 3 == current_epoch
    {
        state.finalized_checkpoint = old_previous_justified_checkpoint;
    }

    // > The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source
    if bits[1..3].iter().all(|bit| *bit)
        && old_previous_justified_checkpoint.epoch + 2 == current_epoch
    {
        state.finalized_checkpoint = old_previous_justified_checkpoint;
    }

    // > The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source
    if bits[0..3].iter().all(|bit| *bit)
        && old_current_justified_checkpoint.epoch + 2 == current_epoch
    {
        state.finalized_checkpoint = old_current_justified_checkpoint;
    }

    // > The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source
    if bits[0..2].iter().all(|bit| *bit)
        && old_current_justified_checkpoint.epoch + 1 == current_epoch
    {
        state.finalized_checkpoint = old_current_justified_checkpoint;
    }

    Ok(())
}

fn target_balance(state: &BeaconState, participation: &[bool], epoch: Epoch) -> Gwei {
    state
        .validators
        .iter()
        .zip(participation)
        .filter(|(validator, participated)| {
            **participated
                && !validator.slashed
                && predicates::is_active_validator(validator, epoch)
        })
        .map(|(validator, _)| validator.effective_balance)
        .sum()
}

/// Activates validators whose deposits have been finalized and ejects validators whose balance
/// dropped too low.
pub fn process_registry_updates(config: &Config, state: &mut BeaconState) {
    let current_epoch = accessors::get_current_epoch(config, state);
    let activation_epoch = current_epoch + 1 + config.min_seed_lookahead;
    let finalized_epoch = state.finalized_checkpoint.epoch;

    let mut activated = vec![];

    for (index, validator) in (0..).zip(&mut state.validators) {
        if validator.activation_eligibility_epoch == FAR_FUTURE_EPOCH
            && validator.effective_balance == config.max_effective_balance
        {
            validator.activation_eligibility_epoch = current_epoch + 1;
        }

        if predicates::is_active_validator(validator, current_epoch)
            && validator.effective_balance <= config.ejection_balance
            && validator.exit_epoch == FAR_FUTURE_EPOCH
        {
            validator.exit_epoch = activation_epoch;
            validator.withdrawable_epoch =
                activation_epoch + config.min_validator_withdrawability_delay;
        }

        if validator.activation_epoch == FAR_FUTURE_EPOCH
            && validator.activation_eligibility_epoch <= finalized_epoch
        {
            validator.activation_epoch = activation_epoch;
            activated.push(index);
        }
    }

    state
        .validator_sync
        .extend(activated.into_iter().map(|index| ValidatorSync {
            op_type: ValidatorSyncOp::Activate,
            index,
            proc_epoch: current_epoch,
            amount: None,
            tx_hash: None,
        }));

    // Entries below the finalized epoch have already been reported to the execution layer.
    state
        .validator_sync
        .retain(|sync| sync.proc_epoch >= finalized_epoch);
}

pub fn process_effective_balance_updates(config: &Config, state: &mut BeaconState) {
    for (validator, balance) in state.validators.iter_mut().zip(&state.balances) {
        validator.effective_balance = (balance - balance % EFFECTIVE_BALANCE_INCREMENT)
            .min(config.max_effective_balance);
    }
}

/// Moves the finalization spines of the ending epoch into `cp_finalized`.
pub fn process_spine_data_reset(config: &Config, state: &mut BeaconState) {
    let spine_data = &mut state.spine_data;
    let epoch_finalization = core::mem::take(&mut spine_data.epoch_finalization);

    for spine in epoch_finalization {
        if !spine_data.cp_finalized.contains(&spine) {
            spine_data.cp_finalized.push(spine);
        }
    }

    let excess = spine_data
        .cp_finalized
        .len()
        .saturating_sub(config.cp_finalized_limit);

    spine_data.cp_finalized.drain(..excess);
}

pub fn process_block_voting_pruning(config: &Config, state: &mut BeaconState) {
    let finalized_slot =
        misc::compute_start_slot_at_epoch(config, state.finalized_checkpoint.epoch);

    state
        .block_voting
        .retain(|voting| voting.slot >= finalized_slot);
}

pub fn process_randao_mixes_reset(config: &Config, state: &mut BeaconState) -> Result<()> {
    let current_epoch = accessors::get_current_epoch(config, state);
    let next_epoch = current_epoch + 1;
    let mix = accessors::get_randao_mix(config, state, current_epoch);
    let index = (next_epoch % config.epochs_per_historical_vector.get()).try_conv::<usize>()?;

    state.randao_mixes[index] = mix;

    Ok(())
}

pub fn process_participation_rotation(state: &mut BeaconState) {
    let validator_count = state.validators.len();

    state.previous_epoch_participation = core::mem::replace(
        &mut state.current_epoch_participation,
        vec![false; validator_count],
    );
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::{containers::Validator, primitives::H256};

    use super::*;

    fn state(validator_count: usize, slot: u64) -> BeaconState {
        let validator = Validator {
            effective_balance: 32_000_000_000,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        BeaconState {
            slot,
            validators: vec![validator; validator_count],
            balances: vec![32_000_000_000; validator_count],
            block_roots: (0..64).map(|byte| H256::repeat_byte(byte)).collect(),
            randao_mixes: vec![H256::zero(); 64],
            previous_epoch_participation: vec![false; validator_count],
            current_epoch_participation: vec![false; validator_count],
            ..BeaconState::default()
        }
    }

    #[test_case(2, false; "half of the stake")]
    #[test_case(3, true; "three quarters of the stake")]
    fn current_epoch_is_justified_by_supermajority(
        participants: usize,
        justified: bool,
    ) -> Result<()> {
        let config = Config::minimal();
        let mut state = state(4, 15);

        state.current_epoch_participation[..participants].fill(true);

        process_justification_and_finalization(&config, &mut state)?;

        assert_eq!(state.justification_bits[0], justified);
        assert_eq!(state.current_justified_checkpoint.epoch == 1, justified);

        Ok(())
    }

    #[test]
    fn consecutive_justification_finalizes_previous_checkpoint() -> Result<()> {
        let config = Config::minimal();
        let mut state = state(4, 7);

        // End of epoch 0.
        state.current_epoch_participation.fill(true);
        process_justification_and_finalization(&config, &mut state)?;
        process_participation_rotation(&mut state);

        assert_eq!(state.current_justified_checkpoint.epoch, 0);
        assert_eq!(state.finalized_checkpoint.epoch, 0);

        // End of epoch 1.
        state.slot = 15;
        state.current_epoch_participation.fill(true);
        process_justification_and_finalization(&config, &mut state)?;

        assert_eq!(state.current_justified_checkpoint.epoch, 1);
        assert_eq!(state.current_justified_checkpoint.root, H256::repeat_byte(8));
        assert_eq!(state.finalized_checkpoint.epoch, 0);
        assert_eq!(state.finalized_checkpoint.root, H256::repeat_byte(0));

        // End of epoch 2.
        process_participation_rotation(&mut state);
        state.slot = 23;
        state.current_epoch_participation.fill(true);
        process_justification_and_finalization(&config, &mut state)?;

        assert_eq!(state.finalized_checkpoint.epoch, 1);
        assert_eq!(state.finalized_checkpoint.root, H256::repeat_byte(8));

        Ok(())
    }

    #[test]
    fn spine_data_reset_moves_epoch_finalization_and_bounds_it() {
        let config = Config {
            cp_finalized_limit: 3,
            ..Config::minimal()
        };

        let mut state = state(1, 7);

        state.spine_data.cp_finalized = vec![H256::repeat_byte(1), H256::repeat_byte(2)];
        state.spine_data.epoch_finalization =
            vec![H256::repeat_byte(2), H256::repeat_byte(3), H256::repeat_byte(4)];

        process_spine_data_reset(&config, &mut state);

        assert!(state.spine_data.epoch_finalization.is_empty());
        assert_eq!(
            state.spine_data.cp_finalized,
            [H256::repeat_byte(2), H256::repeat_byte(3), H256::repeat_byte(4)],
        );
    }

    #[test]
    fn finalized_deposits_activate() {
        let config = Config::minimal();
        let mut state = state(2, 7);

        state.validators[1].activation_epoch = FAR_FUTURE_EPOCH;
        state.validators[1].activation_eligibility_epoch = 0;

        process_registry_updates(&config, &mut state);

        assert_eq!(state.validators[1].activation_epoch, 2);
        assert_eq!(state.validator_sync.len(), 1);
        assert_eq!(state.validator_sync[0].op_type, ValidatorSyncOp::Activate);
    }
}
