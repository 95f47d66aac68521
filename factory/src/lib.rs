//! Builders for genesis states, blocks and operations signed by deterministic validator keys.
//!
//! Only meant for tests. Every function produces output that passes full verification.

use std::sync::Arc;

use anyhow::{ensure, Result};
use bls::{SecretKey, Signature};
use helper_functions::{
    accessors, misc,
    signing::{self, RandaoEpoch, SignForSingleFork as _, SyncCommitteeBlockRoot},
};
use tap::TryConv as _;
use transition_functions::{genesis, StateTransition};
use types::{
    beacon_state::BeaconState,
    config::Config,
    containers::{
        Attestation, AttestationData, BeaconBlock, BeaconBlockBody, BlockSpineData, Checkpoint,
        Deposit, DepositData, DepositMessage, Prevote, PrevoteData, SignedBeaconBlock,
        SignedVoluntaryExit, SyncAggregate, SyncCommitteeMessage, VoluntaryExit, Withdrawal,
    },
    primitives::{AggregationBits, Epoch, Slot, UnixSeconds, ValidatorIndex, H256},
    traits::ContentHash as _,
};

/// Block hash of the execution chain the genesis state is built from.
pub const GENESIS_ETH1_BLOCK_HASH: H256 = H256([0x42; 32]);

const GENESIS_TIME: UnixSeconds = 0;

#[derive(Default)]
struct Operations {
    graffiti: H256,
    attestations: Vec<Attestation>,
    voluntary_exits: Vec<SignedVoluntaryExit>,
    withdrawals: Vec<Withdrawal>,
    spine_data: BlockSpineData,
}

pub fn secret_key(validator_index: ValidatorIndex) -> Result<SecretKey> {
    let seed = hashing::hash(validator_index.to_le_bytes());
    SecretKey::from_seed(seed.to_fixed_bytes()).map_err(Into::into)
}

pub fn deposit_data(config: &Config, validator_index: ValidatorIndex) -> Result<DepositData> {
    let secret_key = secret_key(validator_index)?;

    let message = DepositMessage {
        pubkey: secret_key.to_public_key().into(),
        withdrawal_credentials: hashing::hash_256_64(H256::zero(), validator_index),
        amount: config.max_effective_balance,
    };

    let signature = secret_key
        .sign(signing::deposit_signing_root(config, &message))
        .into();

    Ok(DepositData {
        pubkey: message.pubkey,
        withdrawal_credentials: message.withdrawal_credentials,
        amount: message.amount,
        signature,
    })
}

pub fn deposits(config: &Config, validator_count: u64) -> Result<Vec<Deposit>> {
    (0..validator_count)
        .map(|index| Ok(Deposit { data: deposit_data(config, index)? }))
        .collect()
}

/// Genesis state with `validator_count` fully funded validators.
pub fn genesis_state(config: &Config, validator_count: u64) -> Result<Arc<BeaconState>> {
    let deposits = deposits(config, validator_count)?;
    let state =
        genesis::initialize_state(config, GENESIS_TIME, GENESIS_ETH1_BLOCK_HASH, &deposits)?;

    Ok(Arc::new(state))
}

pub fn min_genesis_state(config: &Config) -> Result<Arc<BeaconState>> {
    genesis_state(config, config.min_genesis_active_validator_count)
}

#[must_use]
pub fn genesis_block(genesis_state: &BeaconState) -> Arc<SignedBeaconBlock> {
    Arc::new(genesis::beacon_block(genesis_state))
}

pub fn empty_block(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
    graffiti: H256,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let operations = Operations {
        graffiti,
        ..Operations::default()
    };

    block(config, pre_state, slot, operations)
}

pub fn block_with_spines(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
    spine_data: BlockSpineData,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let operations = Operations {
        spine_data,
        ..Operations::default()
    };

    block(config, pre_state, slot, operations)
}

pub fn block_with_exits(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
    voluntary_exits: Vec<SignedVoluntaryExit>,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let operations = Operations {
        voluntary_exits,
        ..Operations::default()
    };

    block(config, pre_state, slot, operations)
}

pub fn block_with_withdrawals(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
    withdrawals: Vec<Withdrawal>,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let operations = Operations {
        withdrawals,
        ..Operations::default()
    };

    block(config, pre_state, slot, operations)
}

pub fn block_with_attestations(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
    attestations: Vec<Attestation>,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let operations = Operations {
        attestations,
        ..Operations::default()
    };

    block(config, pre_state, slot, operations)
}

/// Block at `slot` containing an attestation from the whole committee of the previous slot.
pub fn full_block(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let mut state = pre_state.as_ref().clone();

    if state.slot < slot {
        transition_functions::process_slots(config, &mut state, slot)?;
    }

    let attestations = match slot.checked_sub(1) {
        Some(attested_slot) if attested_slot >= pre_state.latest_block_header.slot => {
            let head_root = accessors::latest_block_root(&pre_state);
            committee_attestation(config, &state, attested_slot, head_root)?
                .into_iter()
                .collect()
        }
        _ => vec![],
    };

    block_with_attestations(config, pre_state, slot, attestations)
}

/// Full blocks in every slot after `pre_state` up to the start of `epoch`.
pub fn full_blocks_up_to_epoch(
    config: &Config,
    mut pre_state: Arc<BeaconState>,
    epoch: Epoch,
) -> Result<(Vec<Arc<SignedBeaconBlock>>, Arc<BeaconState>)> {
    let end_slot = misc::compute_start_slot_at_epoch(config, epoch);
    let mut blocks = vec![];

    for slot in pre_state.slot + 1..=end_slot {
        let (block, post_state) = full_block(config, pre_state, slot)?;
        blocks.push(block);
        pre_state = post_state;
    }

    Ok((blocks, pre_state))
}

/// Attestation by a single validator for `beacon_block_root` at `slot`.
///
/// `state` must be the state of `beacon_block_root` advanced to `slot` or later within the same
/// epoch range the block processing accepts.
pub fn singular_attestation(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    beacon_block_root: H256,
    validator_index: ValidatorIndex,
) -> Result<Attestation> {
    let committee = accessors::get_beacon_committee(config, state, slot, 0)?;

    let position = committee
        .iter()
        .position(|member| *member == validator_index)
        .ok_or_else(|| anyhow::anyhow!("validator {validator_index} is not in committee"))?;

    let data = attestation_data(config, state, slot, beacon_block_root)?;
    let signature = data.sign(config, state, &secret_key(validator_index)?);

    let mut aggregation_bits = AggregationBits::repeat(false, committee.len());
    aggregation_bits.set(position, true);

    Ok(Attestation {
        aggregation_bits,
        data,
        signature,
    })
}

/// Attestation by the whole committee of `slot`, or `None` if the committee is empty.
pub fn committee_attestation(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    beacon_block_root: H256,
) -> Result<Option<Attestation>> {
    let committee = accessors::get_beacon_committee(config, state, slot, 0)?;

    if committee.is_empty() {
        return Ok(None);
    }

    let data = attestation_data(config, state, slot, beacon_block_root)?;
    let signing_root = data.signing_root(config, state);

    let signatures = committee
        .iter()
        .map(|index| Ok(secret_key(*index)?.sign(signing_root)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Attestation {
        aggregation_bits: AggregationBits::repeat(true, committee.len()),
        data,
        signature: Signature::aggregate_nonempty(signatures)?.into(),
    }))
}

pub fn attestation_data(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    beacon_block_root: H256,
) -> Result<AttestationData> {
    let current_epoch = accessors::get_current_epoch(config, state);
    let target_epoch = misc::compute_epoch_at_slot(config, slot);
    let target_start = misc::compute_start_slot_at_epoch(config, target_epoch);

    ensure!(
        target_epoch + 1 >= current_epoch && target_epoch <= current_epoch,
        "attestation slot {slot} is too far from state slot {}",
        state.slot,
    );

    let target_root = if target_start < state.slot {
        accessors::get_block_root_at_slot(config, state, target_start)?
    } else {
        beacon_block_root
    };

    let source = if target_epoch == current_epoch {
        state.current_justified_checkpoint
    } else {
        state.previous_justified_checkpoint
    };

    Ok(AttestationData {
        slot,
        index: 0,
        beacon_block_root,
        source,
        target: Checkpoint {
            epoch: target_epoch,
            root: target_root,
        },
    })
}

pub fn signed_voluntary_exit(
    config: &Config,
    state: &BeaconState,
    validator_index: ValidatorIndex,
    init_tx_hash: H256,
) -> Result<SignedVoluntaryExit> {
    let message = VoluntaryExit {
        epoch: accessors::get_current_epoch(config, state),
        validator_index,
        init_tx_hash,
    };

    let signature = message.sign(config, state, &secret_key(validator_index)?);

    Ok(SignedVoluntaryExit { message, signature })
}

#[must_use]
pub fn withdrawal(
    config: &Config,
    state: &BeaconState,
    validator_index: ValidatorIndex,
    amount: u64,
    init_tx_hash: H256,
) -> Withdrawal {
    Withdrawal {
        epoch: accessors::get_current_epoch(config, state),
        validator_index,
        amount,
        init_tx_hash,
    }
}

/// Prevote by the validators at `positions` in the committee of `slot`.
pub fn prevote(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    candidates: Vec<H256>,
    positions: &[usize],
) -> Result<Prevote> {
    let committee = accessors::get_beacon_committee(config, state, slot, 0)?;

    let data = PrevoteData {
        slot,
        index: 0,
        candidates,
    };

    let signing_root = data.signing_root(config, state);
    let mut aggregation_bits = AggregationBits::repeat(false, committee.len());

    let signatures = positions
        .iter()
        .copied()
        .map(|position| {
            let index = *committee
                .get(position)
                .ok_or_else(|| anyhow::anyhow!("position {position} is not in committee"))?;

            aggregation_bits.set(position, true);

            Ok(secret_key(index)?.sign(signing_root))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Prevote {
        aggregation_bits,
        data,
        signature: Signature::aggregate_nonempty(signatures)?.into(),
    })
}

pub fn sync_committee_message(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    beacon_block_root: H256,
    validator_index: ValidatorIndex,
) -> Result<SyncCommitteeMessage> {
    let signature = SyncCommitteeBlockRoot {
        slot,
        root: beacon_block_root,
    }
    .sign(config, state, &secret_key(validator_index)?);

    Ok(SyncCommitteeMessage {
        slot,
        beacon_block_root,
        validator_index,
        signature,
    })
}

fn block(
    config: &Config,
    pre_state: Arc<BeaconState>,
    slot: Slot,
    operations: Operations,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let mut state = pre_state.as_ref().clone();

    if state.slot < slot {
        transition_functions::process_slots(config, &mut state, slot)?;
    }

    let proposer_index = accessors::get_beacon_proposer_index(config, &state)?;
    let proposer_secret_key = secret_key(proposer_index)?;
    let epoch = accessors::get_current_epoch(config, &state);

    let Operations {
        graffiti,
        attestations,
        voluntary_exits,
        withdrawals,
        spine_data,
    } = operations;

    let pending_deposits = state
        .eth1_data
        .deposit_count
        .saturating_sub(state.eth1_deposit_index);

    ensure!(
        pending_deposits == 0,
        "{pending_deposits} deposits are pending and blocks built here cannot include them",
    );

    let mut block = BeaconBlock {
        slot,
        proposer_index,
        parent_root: accessors::latest_block_root(&state),
        state_root: H256::zero(),
        body: BeaconBlockBody {
            randao_reveal: RandaoEpoch(epoch).sign(config, &state, &proposer_secret_key),
            eth1_data: state.eth1_data.clone(),
            graffiti,
            attestations,
            voluntary_exits,
            withdrawals,
            sync_aggregate: SyncAggregate::empty(),
            spine_data,
            ..BeaconBlockBody::default()
        },
    };

    let unsigned = SignedBeaconBlock {
        message: block.clone(),
        signature: bls::SignatureBytes::empty(),
    };

    let transition = StateTransition::new(Arc::new(config.clone()));
    let post_state = transition.execute_trusted(state, &unsigned)?;

    block.state_root = post_state.hash_tree_root();

    let signature = block.sign(config, &post_state, &proposer_secret_key);

    let signed_block = SignedBeaconBlock {
        message: block,
        signature,
    };

    Ok((Arc::new(signed_block), Arc::new(post_state)))
}

/// Indices of validators in the committee of `slot`, in committee order.
pub fn committee(config: &Config, state: &BeaconState, slot: Slot) -> Result<Vec<ValidatorIndex>> {
    accessors::get_beacon_committee(config, state, slot, 0)
}

/// Number of validators active in the epoch of `state`.
pub fn active_validator_count(config: &Config, state: &BeaconState) -> Result<u64> {
    accessors::active_validator_indices(state, accessors::get_current_epoch(config, state))
        .count()
        .try_conv::<u64>()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn empty_blocks_pass_full_verification() -> Result<()> {
        let config = Config::minimal();
        let genesis_state = min_genesis_state(&config)?;
        let transition = StateTransition::new(Arc::new(config.clone()));

        let (block, post_state) = empty_block(&config, genesis_state.clone(), 3, H256::zero())?;

        assert_eq!(transition.execute(&genesis_state, &block)?, *post_state);
        assert_eq!(
            block.message.parent_root,
            genesis_block(&genesis_state).message.hash_tree_root(),
        );

        Ok(())
    }

    #[test]
    fn graffiti_distinguishes_blocks_in_the_same_slot() -> Result<()> {
        let config = Config::minimal();
        let genesis_state = min_genesis_state(&config)?;

        let (block_a, _) = empty_block(&config, genesis_state.clone(), 1, H256::repeat_byte(1))?;
        let (block_b, _) = empty_block(&config, genesis_state, 1, H256::repeat_byte(2))?;

        assert_ne!(
            block_a.message.hash_tree_root(),
            block_b.message.hash_tree_root(),
        );

        Ok(())
    }

    #[test]
    fn full_blocks_justify_and_finalize() -> Result<()> {
        let config = Config::minimal();
        let genesis_state = min_genesis_state(&config)?;
        let transition = StateTransition::new(Arc::new(config.clone()));

        let (blocks, state) = full_blocks_up_to_epoch(&config, genesis_state.clone(), 5)?;

        assert_eq!(blocks.len(), 40);
        assert!(state.current_justified_checkpoint.epoch >= 3);
        assert!(state.finalized_checkpoint.epoch >= 2);

        let mut replayed = genesis_state.as_ref().clone();

        for block in &blocks {
            replayed = transition.execute(&replayed, block)?;
        }

        assert_eq!(replayed, *state);

        Ok(())
    }

    #[test]
    fn secret_keys_are_deterministic() -> Result<()> {
        assert_eq!(
            secret_key(7)?.to_public_key().to_bytes(),
            secret_key(7)?.to_public_key().to_bytes(),
        );

        assert_ne!(
            secret_key(7)?.to_public_key().to_bytes(),
            secret_key(8)?.to_public_key().to_bytes(),
        );

        Ok(())
    }
}
