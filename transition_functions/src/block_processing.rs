use anyhow::{ensure, Result};
use bls::PublicKeyBytes;
use helper_functions::{
    accessors,
    error::SignatureKind,
    misc, predicates,
    signing::{self, RandaoEpoch, SignForSingleFork as _, SyncCommitteeBlockRoot},
    verifier::{SingleVerifier, Verifier},
};
use itertools::Itertools as _;
use tap::TryConv as _;
use tracing::debug;
use types::{
    beacon_state::{BeaconState, BlockVoting},
    config::Config,
    consts::{
        EFFECTIVE_BALANCE_INCREMENT, FAR_FUTURE_EPOCH, MIN_SLASHING_PENALTY_QUOTIENT,
        WHISTLEBLOWER_REWARD_QUOTIENT,
    },
    containers::{
        Attestation, AttesterSlashing, BeaconBlock, BeaconBlockBody, BlockSpineData, Deposit,
        DepositMessage, ProposerSlashing, SignedVoluntaryExit, Validator, Withdrawal,
    },
    gwat::{ValidatorSync, ValidatorSyncOp},
    primitives::{Slot, ValidatorIndex, H256},
    spines::Spines,
    traits::ContentHash as _,
};

use crate::error::Error;

pub fn process_block(
    config: &Config,
    state: &mut BeaconState,
    block: &BeaconBlock,
    mut verifier: impl Verifier,
) -> Result<()> {
    debug_assert_eq!(state.slot, block.slot);

    let parent_slot = state.latest_block_header.slot;

    process_block_header(config, state, block)?;
    process_randao(config, state, &block.body, &mut verifier)?;
    process_eth1_data(state, &block.body)?;
    process_spine_data(
        config,
        state,
        &block.body.spine_data,
        block.parent_root,
        parent_slot,
    )?;
    process_operations(config, state, &block.body, &mut verifier)?;
    process_sync_aggregate(config, state, block, &mut verifier)
}

pub fn process_block_header(
    config: &Config,
    state: &mut BeaconState,
    block: &BeaconBlock,
) -> Result<()> {
    // > Verify that the slots match
    ensure!(
        block.slot == state.slot,
        Error::SlotMismatch {
            state_slot: state.slot,
            block_slot: block.slot,
        },
    );

    // > Verify that the block is newer than latest block header
    ensure!(
        block.slot > state.latest_block_header.slot,
        Error::BlockNotNewerThanLatestBlockHeader {
            block_slot: block.slot,
            block_header_slot: state.latest_block_header.slot,
        },
    );

    // > Verify that proposer index is the correct index
    let computed = accessors::get_beacon_proposer_index(config, state)?;

    ensure!(
        block.proposer_index == computed,
        Error::ProposerIndexMismatch {
            computed,
            in_block: block.proposer_index,
        },
    );

    // > Verify that the parent matches
    let in_state = state.latest_block_header.hash_tree_root();

    ensure!(
        block.parent_root == in_state,
        Error::ParentRootMismatch {
            in_state,
            in_block: block.parent_root,
        },
    );

    // > Verify proposer is not slashed
    let proposer = accessors::validator(state, block.proposer_index)?;

    ensure!(
        !proposer.slashed,
        Error::ProposerSlashed {
            index: block.proposer_index,
        },
    );

    // > Cache current block as the new latest block
    state.latest_block_header = block.to_header();

    // > Overwritten in the next `process_slot` call
    state.latest_block_header.state_root = H256::zero();

    Ok(())
}

pub fn process_randao(
    config: &Config,
    state: &mut BeaconState,
    body: &BeaconBlockBody,
    mut verifier: impl Verifier,
) -> Result<()> {
    let epoch = accessors::get_current_epoch(config, state);
    let proposer_index = accessors::get_beacon_proposer_index(config, state)?;
    let public_key = accessors::validator(state, proposer_index)?.pubkey;

    // > Verify RANDAO reveal
    RandaoEpoch(epoch).verify(config, state, body.randao_reveal, &public_key, &mut verifier)?;

    // > Mix in RANDAO reveal
    let index = (epoch % config.epochs_per_historical_vector.get()).try_conv::<usize>()?;
    let mix = accessors::get_randao_mix(config, state, epoch) ^ hashing::hash(body.randao_reveal);

    state.randao_mixes[index] = mix;

    Ok(())
}

/// Execution layer data is supplied by the proposer. The deposit count may only grow.
pub fn process_eth1_data(state: &mut BeaconState, body: &BeaconBlockBody) -> Result<()> {
    let in_state = state.eth1_data.deposit_count;
    let in_block = body.eth1_data.deposit_count;

    ensure!(
        in_block >= in_state,
        Error::Eth1DepositCountDecreased { in_state, in_block },
    );

    state.eth1_data = body.eth1_data.clone();

    Ok(())
}

/// Records the spines carried by the block.
///
/// The spines of the previous block move into `parent_spines` and the parent receives a voting
/// record over its prefix, which attestations included later add votes to.
pub fn process_spine_data(
    config: &Config,
    state: &mut BeaconState,
    block_spine_data: &BlockSpineData,
    parent_root: H256,
    parent_slot: Slot,
) -> Result<()> {
    let BlockSpineData {
        spines,
        prefix,
        finalization,
    } = block_spine_data;

    ensure!(spines.starts_with(prefix), Error::SpinePrefixMismatch);

    if let Some(spine) = finalization.iter().duplicates().next() {
        return Err(Error::DuplicateFinalizationSpine { spine: *spine }.into());
    }

    if !state.block_voting.iter().any(|voting| voting.root == parent_root) {
        state.block_voting.push(BlockVoting {
            root: parent_root,
            slot: parent_slot,
            candidates: state.spine_data.prefix.clone(),
            votes: 0,
        });
    }

    let spine_data = &mut state.spine_data;
    let previous_spines = core::mem::replace(&mut spine_data.spines, spines.clone());

    spine_data.parent_spines.push(Spines::from(previous_spines));

    let excess = spine_data
        .parent_spines
        .len()
        .saturating_sub(config.parent_spines_limit);

    spine_data.parent_spines.drain(..excess);
    spine_data.prefix.clone_from(prefix);
    spine_data.finalization.clone_from(finalization);

    for spine in finalization {
        if !spine_data.epoch_finalization.contains(spine) {
            spine_data.epoch_finalization.push(*spine);
        }
    }

    Ok(())
}

fn process_operations(
    config: &Config,
    state: &mut BeaconState,
    body: &BeaconBlockBody,
    mut verifier: impl Verifier,
) -> Result<()> {
    ensure_within_limit(
        "proposer slashings",
        body.proposer_slashings.len(),
        config.max_proposer_slashings,
    )?;
    ensure_within_limit(
        "attester slashings",
        body.attester_slashings.len(),
        config.max_attester_slashings,
    )?;
    ensure_within_limit(
        "attestations",
        body.attestations.len(),
        config.max_attestations,
    )?;
    ensure_within_limit(
        "voluntary exits",
        body.voluntary_exits.len(),
        config.max_voluntary_exits,
    )?;
    ensure_within_limit(
        "withdrawals",
        body.withdrawals.len(),
        config.max_withdrawals,
    )?;

    // > Verify that outstanding deposits are processed up to the maximum number of deposits
    let computed = config
        .max_deposits
        .try_conv::<u64>()?
        .min(state.eth1_data.deposit_count.saturating_sub(state.eth1_deposit_index));
    let in_block = body.deposits.len().try_conv::<u64>()?;

    ensure!(
        computed == in_block,
        Error::DepositCountMismatch { computed, in_block },
    );

    for proposer_slashing in body.proposer_slashings.iter().copied() {
        process_proposer_slashing(config, state, proposer_slashing, &mut verifier)?;
    }

    for attester_slashing in &body.attester_slashings {
        process_attester_slashing(config, state, attester_slashing, &mut verifier)?;
    }

    for attestation in &body.attestations {
        process_attestation(config, state, attestation, &mut verifier)?;
    }

    for deposit in body.deposits.iter().copied() {
        process_deposit(config, state, deposit)?;
    }

    for voluntary_exit in body.voluntary_exits.iter().copied() {
        process_voluntary_exit(config, state, voluntary_exit, &mut verifier)?;
    }

    for withdrawal in body.withdrawals.iter().copied() {
        process_withdrawal(config, state, withdrawal)?;
    }

    Ok(())
}

fn ensure_within_limit(kind: &'static str, count: usize, limit: usize) -> Result<()> {
    ensure!(count <= limit, Error::TooManyOperations { kind, count, limit });
    Ok(())
}

pub fn process_proposer_slashing(
    config: &Config,
    state: &mut BeaconState,
    proposer_slashing: ProposerSlashing,
    mut verifier: impl Verifier,
) -> Result<()> {
    let header_1 = proposer_slashing.signed_header_1.message;
    let header_2 = proposer_slashing.signed_header_2.message;

    ensure!(
        header_1.slot == header_2.slot,
        Error::ProposerSlashingInvalid {
            reason: "header slots do not match",
        },
    );

    ensure!(
        header_1.proposer_index == header_2.proposer_index,
        Error::ProposerSlashingInvalid {
            reason: "proposer indices do not match",
        },
    );

    ensure!(
        header_1 != header_2,
        Error::ProposerSlashingInvalid {
            reason: "headers are identical",
        },
    );

    let index = header_1.proposer_index;
    let proposer = accessors::validator(state, index)?;
    let current_epoch = accessors::get_current_epoch(config, state);

    ensure!(
        predicates::is_slashable_validator(proposer, current_epoch),
        Error::ProposerSlashingInvalid {
            reason: "proposer is not slashable",
        },
    );

    let public_key = proposer.pubkey;

    for signed_header in [
        proposer_slashing.signed_header_1,
        proposer_slashing.signed_header_2,
    ] {
        signed_header.message.verify(
            config,
            state,
            signed_header.signature,
            &public_key,
            &mut verifier,
        )?;
    }

    slash_validator(config, state, index)
}

pub fn process_attester_slashing(
    config: &Config,
    state: &mut BeaconState,
    attester_slashing: &AttesterSlashing,
    mut verifier: impl Verifier,
) -> Result<()> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    ensure!(
        predicates::is_slashable_attestation_data(attestation_1.data, attestation_2.data),
        Error::AttestationDataNotSlashable {
            data_1: attestation_1.data,
            data_2: attestation_2.data,
        },
    );

    predicates::validate_indexed_attestation(config, state, attestation_1, &mut verifier)?;
    predicates::validate_indexed_attestation(config, state, attestation_2, &mut verifier)?;

    let current_epoch = accessors::get_current_epoch(config, state);

    let slashable_indices = attestation_1
        .attesting_indices
        .iter()
        .filter(|index| attestation_2.attesting_indices.contains(index))
        .copied()
        .filter(|index| {
            accessors::validator(state, *index)
                .is_ok_and(|validator| predicates::is_slashable_validator(validator, current_epoch))
        })
        .collect_vec();

    ensure!(!slashable_indices.is_empty(), Error::NoSlashableIndices);

    for index in slashable_indices {
        slash_validator(config, state, index)?;
    }

    Ok(())
}

pub fn process_attestation(
    config: &Config,
    state: &mut BeaconState,
    attestation: &Attestation,
    verifier: impl Verifier,
) -> Result<()> {
    let data = attestation.data;
    let current_epoch = accessors::get_current_epoch(config, state);
    let previous_epoch = accessors::get_previous_epoch(config, state);

    ensure!(
        (data.target.epoch == previous_epoch || data.target.epoch == current_epoch)
            && data.target.epoch == misc::compute_epoch_at_slot(config, data.slot),
        Error::AttestationTargetsWrongEpoch { data },
    );

    ensure!(
        data.slot + config.min_attestation_inclusion_delay <= state.slot
            && state.slot <= data.slot + config.slots_per_epoch.get(),
        Error::AttestationOutsideInclusionRange {
            state_slot: state.slot,
            attestation_slot: data.slot,
        },
    );

    let in_state = if data.target.epoch == current_epoch {
        state.current_justified_checkpoint
    } else {
        state.previous_justified_checkpoint
    };

    ensure!(
        data.source == in_state,
        Error::AttestationSourceMismatch {
            in_state,
            in_block: data.source,
        },
    );

    let indexed_attestation = accessors::get_indexed_attestation(config, state, attestation)?;

    predicates::validate_indexed_attestation(config, state, &indexed_attestation, verifier)?;

    let target_root = accessors::get_block_root(config, state, data.target.epoch)?;

    if data.target.root == target_root {
        let participation = if data.target.epoch == current_epoch {
            &mut state.current_epoch_participation
        } else {
            &mut state.previous_epoch_participation
        };

        for index in &indexed_attestation.attesting_indices {
            if let Some(flag) = participation.get_mut((*index).try_conv::<usize>()?) {
                *flag = true;
            }
        }
    }

    if let Some(voting) = state
        .block_voting
        .iter_mut()
        .find(|voting| voting.root == data.beacon_block_root)
    {
        voting.votes += indexed_attestation.attesting_indices.len().try_conv::<u64>()?;
    }

    Ok(())
}

/// Deposits carry no inclusion proof. Their order is fixed by `eth1_deposit_index`.
pub fn process_deposit(config: &Config, state: &mut BeaconState, deposit: Deposit) -> Result<()> {
    let data = deposit.data;

    state.eth1_deposit_index += 1;

    if let Some(position) = state
        .validators
        .iter()
        .position(|validator| validator.pubkey == data.pubkey)
    {
        state.balances[position] += data.amount;
        return Ok(());
    }

    let message = DepositMessage {
        pubkey: data.pubkey,
        withdrawal_credentials: data.withdrawal_credentials,
        amount: data.amount,
    };

    // > Fork-agnostic domain since deposits are valid across forks
    let signing_root = signing::deposit_signing_root(config, &message);

    if let Err(error) = SingleVerifier.verify_singular(
        signing_root,
        data.signature,
        &data.pubkey,
        SignatureKind::Deposit,
    ) {
        debug!(
            pubkey = ?data.pubkey,
            %error,
            "skipping deposit with invalid signature",
        );

        return Ok(());
    }

    add_validator_to_registry(
        config,
        state,
        data.pubkey,
        data.withdrawal_credentials,
        data.amount,
    );

    Ok(())
}

fn add_validator_to_registry(
    config: &Config,
    state: &mut BeaconState,
    pubkey: PublicKeyBytes,
    withdrawal_credentials: H256,
    amount: u64,
) {
    let effective_balance =
        (amount - amount % EFFECTIVE_BALANCE_INCREMENT).min(config.max_effective_balance);

    state.validators.push(Validator {
        pubkey,
        withdrawal_credentials,
        effective_balance,
        slashed: false,
        activation_eligibility_epoch: FAR_FUTURE_EPOCH,
        activation_epoch: FAR_FUTURE_EPOCH,
        exit_epoch: FAR_FUTURE_EPOCH,
        withdrawable_epoch: FAR_FUTURE_EPOCH,
    });

    state.balances.push(amount);
    state.previous_epoch_participation.push(false);
    state.current_epoch_participation.push(false);
}

pub fn process_voluntary_exit(
    config: &Config,
    state: &mut BeaconState,
    signed_voluntary_exit: SignedVoluntaryExit,
    verifier: impl Verifier,
) -> Result<()> {
    validate_voluntary_exit(config, state, signed_voluntary_exit, verifier)?;

    let exit = signed_voluntary_exit.message;
    let current_epoch = accessors::get_current_epoch(config, state);

    initiate_validator_exit(config, state, exit.validator_index)?;

    state.validator_sync.push(ValidatorSync {
        op_type: ValidatorSyncOp::Exit,
        index: exit.validator_index,
        proc_epoch: current_epoch,
        amount: None,
        tx_hash: Some(exit.init_tx_hash),
    });

    Ok(())
}

/// Checks shared by block processing, the exit pool and gossip validation.
pub fn validate_voluntary_exit(
    config: &Config,
    state: &BeaconState,
    signed_voluntary_exit: SignedVoluntaryExit,
    verifier: impl Verifier,
) -> Result<()> {
    let exit = signed_voluntary_exit.message;
    let index = exit.validator_index;
    let validator = accessors::validator(state, index)?;
    let current_epoch = accessors::get_current_epoch(config, state);

    // > Verify the validator is active and has not initiated an exit
    ensure!(
        predicates::is_eligible_for_exit(validator, current_epoch),
        Error::ValidatorNotEligibleForExit { index },
    );

    // > Exits must specify an epoch when they become valid; they are not valid before then
    ensure!(
        exit.epoch <= current_epoch,
        Error::ExitEpochInTheFuture {
            index,
            exit_epoch: exit.epoch,
            current_epoch,
        },
    );

    exit.verify(
        config,
        state,
        signed_voluntary_exit.signature,
        &validator.pubkey,
        verifier,
    )
}

pub fn process_withdrawal(
    config: &Config,
    state: &mut BeaconState,
    withdrawal: Withdrawal,
) -> Result<()> {
    validate_withdrawal(config, state, withdrawal)?;

    let current_epoch = accessors::get_current_epoch(config, state);
    let balance = accessors::balance_mut(state, withdrawal.validator_index)?;

    *balance -= withdrawal.amount;

    state.validator_sync.push(ValidatorSync {
        op_type: ValidatorSyncOp::Withdrawal,
        index: withdrawal.validator_index,
        proc_epoch: current_epoch,
        amount: Some(withdrawal.amount),
        tx_hash: Some(withdrawal.init_tx_hash),
    });

    Ok(())
}

pub fn validate_withdrawal(
    config: &Config,
    state: &BeaconState,
    withdrawal: Withdrawal,
) -> Result<()> {
    let index = withdrawal.validator_index;
    let validator = accessors::validator(state, index)?;
    let current_epoch = accessors::get_current_epoch(config, state);

    ensure!(
        predicates::is_active_validator(validator, current_epoch),
        Error::ValidatorNotEligibleForExit { index },
    );

    let balance = state
        .balances
        .get(index.try_conv::<usize>()?)
        .copied()
        .unwrap_or_default();

    ensure!(
        withdrawal.amount <= balance,
        Error::WithdrawalExceedsBalance {
            index,
            amount: withdrawal.amount,
            balance,
        },
    );

    Ok(())
}

pub fn process_sync_aggregate(
    config: &Config,
    state: &BeaconState,
    block: &BeaconBlock,
    mut verifier: impl Verifier,
) -> Result<()> {
    let sync_aggregate = &block.body.sync_aggregate;
    let bits = &sync_aggregate.sync_committee_bits;
    let committee = &state.current_sync_committee;

    ensure!(
        bits.is_empty() || bits.len() == committee.len(),
        Error::SyncAggregateLengthMismatch {
            bit_count: bits.len(),
            committee_size: committee.len(),
        },
    );

    let participant_keys = bits
        .iter_ones()
        .map(|position| accessors::validator(state, committee[position]).map(|v| &v.pubkey))
        .collect::<Result<Vec<_>>>()?;

    let signing_root = SyncCommitteeBlockRoot {
        slot: block.slot.saturating_sub(1),
        root: block.parent_root,
    }
    .signing_root(config, state);

    verifier.verify_aggregate_allowing_empty(
        signing_root,
        sync_aggregate.sync_committee_signature,
        participant_keys,
        SignatureKind::SyncAggregate,
    )
}

pub fn initiate_validator_exit(
    config: &Config,
    state: &mut BeaconState,
    index: ValidatorIndex,
) -> Result<()> {
    let current_epoch = accessors::get_current_epoch(config, state);
    let validator = accessors::validator_mut(state, index)?;

    if validator.exit_epoch != FAR_FUTURE_EPOCH {
        return Ok(());
    }

    validator.exit_epoch = current_epoch + 1 + config.min_seed_lookahead;
    validator.withdrawable_epoch =
        validator.exit_epoch + config.min_validator_withdrawability_delay;

    Ok(())
}

pub fn slash_validator(
    config: &Config,
    state: &mut BeaconState,
    slashed_index: ValidatorIndex,
) -> Result<()> {
    initiate_validator_exit(config, state, slashed_index)?;

    let validator = accessors::validator_mut(state, slashed_index)?;
    let effective_balance = validator.effective_balance;

    validator.slashed = true;

    let penalty = effective_balance / MIN_SLASHING_PENALTY_QUOTIENT;
    let balance = accessors::balance_mut(state, slashed_index)?;

    *balance = balance.saturating_sub(penalty);

    let proposer_index = accessors::get_beacon_proposer_index(config, state)?;
    let whistleblower_reward = effective_balance / WHISTLEBLOWER_REWARD_QUOTIENT;

    *accessors::balance_mut(state, proposer_index)? += whistleblower_reward;

    Ok(())
}

#[cfg(test)]
mod tests {
    use types::containers::Checkpoint;

    use super::*;

    fn state_with_validators(count: usize) -> BeaconState {
        let validator = Validator {
            effective_balance: 32_000_000_000,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        BeaconState {
            slot: 10,
            validators: vec![validator; count],
            balances: vec![32_000_000_000; count],
            randao_mixes: vec![H256::zero(); 64],
            block_roots: vec![H256::zero(); 64],
            previous_epoch_participation: vec![false; count],
            current_epoch_participation: vec![false; count],
            ..BeaconState::default()
        }
    }

    #[test]
    fn spine_data_is_rotated_into_parent_spines() -> Result<()> {
        let config = Config {
            parent_spines_limit: 2,
            ..Config::minimal()
        };

        let mut state = state_with_validators(1);

        for byte in 1..=3 {
            let block_spine_data = BlockSpineData {
                spines: vec![H256::repeat_byte(byte), H256::repeat_byte(byte + 10)],
                prefix: vec![H256::repeat_byte(byte)],
                finalization: vec![H256::repeat_byte(byte)],
            };

            process_spine_data(
                &config,
                &mut state,
                &block_spine_data,
                H256::repeat_byte(byte + 100),
                u64::from(byte),
            )?;
        }

        let spine_data = &state.spine_data;

        assert_eq!(spine_data.spines[0], H256::repeat_byte(3));
        assert_eq!(spine_data.parent_spines.len(), 2);
        assert_eq!(spine_data.parent_spines[1][0], H256::repeat_byte(2));
        assert_eq!(spine_data.epoch_finalization.len(), 3);
        assert_eq!(spine_data.last_spine(), Some(H256::repeat_byte(3)));
        assert_eq!(state.block_voting.len(), 3);
        assert_eq!(state.block_voting[2].candidates, [H256::repeat_byte(2)]);

        Ok(())
    }

    #[test]
    fn spines_must_start_with_prefix() {
        let mut state = state_with_validators(1);

        let block_spine_data = BlockSpineData {
            spines: vec![H256::repeat_byte(1)],
            prefix: vec![H256::repeat_byte(2)],
            finalization: vec![],
        };

        let result = process_spine_data(
            &Config::minimal(),
            &mut state,
            &block_spine_data,
            H256::zero(),
            0,
        );

        assert!(matches!(
            result.map_err(|error| error.downcast::<Error>()),
            Err(Ok(Error::SpinePrefixMismatch)),
        ));
    }

    #[test]
    fn duplicate_finalization_spines_are_rejected() {
        let mut state = state_with_validators(1);

        let block_spine_data = BlockSpineData {
            spines: vec![],
            prefix: vec![],
            finalization: vec![H256::repeat_byte(1), H256::repeat_byte(1)],
        };

        let result = process_spine_data(
            &Config::minimal(),
            &mut state,
            &block_spine_data,
            H256::zero(),
            0,
        );

        assert!(result.is_err());
    }

    #[test]
    fn withdrawal_deducts_balance_and_records_sync() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_with_validators(2);

        let withdrawal = Withdrawal {
            epoch: 1,
            validator_index: 1,
            amount: 1_000,
            init_tx_hash: H256::repeat_byte(7),
        };

        process_withdrawal(&config, &mut state, withdrawal)?;

        assert_eq!(state.balances[1], 32_000_000_000 - 1_000);
        assert_eq!(state.validator_sync.len(), 1);
        assert_eq!(state.validator_sync[0].op_type, ValidatorSyncOp::Withdrawal);
        assert_eq!(state.validator_sync[0].amount, Some(1_000));
        assert_eq!(state.validator_sync[0].tx_hash, Some(H256::repeat_byte(7)));

        Ok(())
    }

    #[test]
    fn withdrawal_exceeding_balance_is_rejected() {
        let config = Config::minimal();
        let state = state_with_validators(1);

        let withdrawal = Withdrawal {
            validator_index: 0,
            amount: 33_000_000_000,
            ..Withdrawal::default()
        };

        assert!(validate_withdrawal(&config, &state, withdrawal).is_err());
    }

    #[test]
    fn eth1_deposit_count_cannot_decrease() {
        let mut state = state_with_validators(1);
        state.eth1_data.deposit_count = 5;

        let body = BeaconBlockBody::default();

        assert!(process_eth1_data(&mut state, &body).is_err());
    }

    #[test]
    fn exits_are_delayed_by_seed_lookahead() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_with_validators(1);

        initiate_validator_exit(&config, &mut state, 0)?;

        // Slot 10 is in epoch 1.
        assert_eq!(state.validators[0].exit_epoch, 3);
        assert_eq!(state.validators[0].withdrawable_epoch, 11);

        Ok(())
    }

    #[test]
    fn attestation_with_wrong_source_is_rejected() {
        let config = Config::minimal();
        let mut state = state_with_validators(8);

        let attestation = Attestation {
            data: types::containers::AttestationData {
                slot: 9,
                index: 0,
                beacon_block_root: H256::zero(),
                source: Checkpoint {
                    epoch: 1,
                    root: H256::repeat_byte(1),
                },
                target: Checkpoint {
                    epoch: 1,
                    root: H256::zero(),
                },
            },
            ..Attestation::default()
        };

        let result = process_attestation(
            &config,
            &mut state,
            &attestation,
            helper_functions::verifier::NullVerifier,
        );

        assert!(matches!(
            result.map_err(|error| error.downcast::<Error>()),
            Err(Ok(Error::AttestationSourceMismatch { .. })),
        ));
    }
}
