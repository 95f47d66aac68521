use anyhow::Result;
use bls::SignatureBytes;
use helper_functions::{accessors, predicates};
use tap::TryConv as _;
use types::{
    beacon_state::BeaconState,
    config::Config,
    consts::{EFFECTIVE_BALANCE_INCREMENT, GENESIS_EPOCH, GENESIS_SLOT},
    containers::{
        BeaconBlock, BeaconBlockBody, BeaconBlockHeader, Deposit, Eth1Data, Fork,
        SignedBeaconBlock,
    },
    primitives::{UnixSeconds, H256},
    traits::ContentHash as _,
};

use crate::block_processing;

/// Builds the genesis state from the deposits made before `eth1_block_hash`.
///
/// `eth1_block_hash` doubles as the first finalized spine and seeds the RANDAO mixes.
pub fn initialize_state(
    config: &Config,
    genesis_time: UnixSeconds,
    eth1_block_hash: H256,
    deposits: &[Deposit],
) -> Result<BeaconState> {
    let fork = Fork {
        previous_version: config.genesis_fork_version,
        current_version: config.genesis_fork_version,
        epoch: GENESIS_EPOCH,
    };

    let latest_block_header = BeaconBlockHeader {
        body_root: BeaconBlockBody::default().hash_tree_root(),
        ..BeaconBlockHeader::default()
    };

    let history_length = config.slots_per_historical_root.get().try_conv::<usize>()?;
    let mixes_length = config.epochs_per_historical_vector.get().try_conv::<usize>()?;

    let mut state = BeaconState {
        genesis_time,
        fork,
        eth1_data: Eth1Data {
            deposit_count: deposits.len().try_conv::<u64>()?,
            block_hash: eth1_block_hash,
            ..Eth1Data::default()
        },
        latest_block_header,
        block_roots: vec![H256::zero(); history_length],
        state_roots: vec![H256::zero(); history_length],
        randao_mixes: vec![eth1_block_hash; mixes_length],
        ..BeaconState::default()
    };

    state.spine_data.cp_finalized.push(eth1_block_hash);

    // > Process deposits
    for deposit in deposits.iter().copied() {
        block_processing::process_deposit(config, &mut state, deposit)?;
    }

    // > Process activations
    for (validator, balance) in state.validators.iter_mut().zip(&state.balances) {
        validator.effective_balance = (balance - balance % EFFECTIVE_BALANCE_INCREMENT)
            .min(config.max_effective_balance);

        if validator.effective_balance == config.max_effective_balance {
            validator.activation_eligibility_epoch = GENESIS_EPOCH;
            validator.activation_epoch = GENESIS_EPOCH;
        }
    }

    // > Set genesis validators root for domain separation and chain versioning
    state.genesis_validators_root = hashing::hash_serialized(&state.validators);

    let sync_committee_size = config.sync_committee_size.try_conv::<usize>()?;

    state.current_sync_committee = accessors::active_validator_indices(&state, GENESIS_EPOCH)
        .take(sync_committee_size)
        .collect();

    Ok(state)
}

#[must_use]
pub fn is_valid_genesis_state(config: &Config, state: &BeaconState) -> bool {
    let active_validator_count = state
        .validators
        .iter()
        .filter(|validator| predicates::is_active_validator(validator, GENESIS_EPOCH))
        .count();

    state.genesis_time >= config.min_genesis_time
        && active_validator_count
            .try_conv::<u64>()
            .is_ok_and(|count| count >= config.min_genesis_active_validator_count)
}

/// The block whose header is embedded in the genesis state.
#[must_use]
pub fn beacon_block(state: &BeaconState) -> SignedBeaconBlock {
    SignedBeaconBlock {
        message: BeaconBlock {
            slot: GENESIS_SLOT,
            state_root: state.hash_tree_root(),
            ..BeaconBlock::default()
        },
        signature: SignatureBytes::empty(),
    }
}

#[cfg(test)]
mod tests {
    use bls::SecretKey;
    use helper_functions::signing;
    use types::containers::{DepositData, DepositMessage};

    use crate::{ProcessSlots, StateRootPolicy, StateTransition};

    use super::*;

    fn deposits(config: &Config, count: u8) -> Result<Vec<Deposit>> {
        (1..=count)
            .map(|byte| {
                let secret_key = SecretKey::from_seed([byte; 32])?;
                let message = DepositMessage {
                    pubkey: secret_key.to_public_key().into(),
                    withdrawal_credentials: H256::repeat_byte(byte),
                    amount: config.max_effective_balance,
                };
                let signing_root = signing::deposit_signing_root(config, &message);

                Ok(Deposit {
                    data: DepositData {
                        pubkey: message.pubkey,
                        withdrawal_credentials: message.withdrawal_credentials,
                        amount: message.amount,
                        signature: secret_key.sign(signing_root).into(),
                    },
                })
            })
            .collect()
    }

    #[test]
    fn genesis_activates_full_deposits() -> Result<()> {
        let config = Config::minimal();
        let deposits = deposits(&config, 4)?;
        let state = initialize_state(&config, 100, H256::repeat_byte(9), &deposits)?;

        assert_eq!(state.validators.len(), 4);
        assert_eq!(state.eth1_deposit_index, 4);
        assert!(state
            .validators
            .iter()
            .all(|validator| validator.activation_epoch == GENESIS_EPOCH));
        assert_eq!(state.current_sync_committee, [0, 1, 2, 3]);
        assert_eq!(state.spine_data.last_spine(), Some(H256::repeat_byte(9)));
        assert!(!is_valid_genesis_state(&config, &state));

        Ok(())
    }

    #[test]
    fn deposit_with_bad_signature_is_skipped() -> Result<()> {
        let config = Config::minimal();
        let mut deposits = deposits(&config, 2)?;

        deposits[1].data.signature = deposits[0].data.signature;

        let state = initialize_state(&config, 0, H256::zero(), &deposits)?;

        assert_eq!(state.validators.len(), 1);
        assert_eq!(state.eth1_deposit_index, 2);

        Ok(())
    }

    #[test]
    fn empty_blocks_apply_on_top_of_genesis() -> Result<()> {
        let config = Config::minimal();
        let deposits = deposits(&config, 8)?;
        let genesis_state = initialize_state(&config, 0, H256::repeat_byte(1), &deposits)?;
        let genesis_block = beacon_block(&genesis_state);
        let transition = StateTransition::new(config.clone().into());

        let mut advanced = genesis_state.clone();
        transition.process_slots(&mut advanced, 1)?;

        let block = SignedBeaconBlock {
            message: BeaconBlock {
                slot: 1,
                proposer_index: accessors::get_beacon_proposer_index(&config, &advanced)?,
                parent_root: genesis_block.message.hash_tree_root(),
                body: BeaconBlockBody {
                    eth1_data: genesis_state.eth1_data.clone(),
                    ..BeaconBlockBody::default()
                },
                ..BeaconBlock::default()
            },
            signature: SignatureBytes::empty(),
        };

        let post_state = transition.execute_trusted(genesis_state.clone(), &block)?;

        assert_eq!(post_state.slot, 1);
        assert_eq!(post_state.latest_block_header.parent_root, block.message.parent_root);

        // The state root was not verified, so full verification must fail.
        assert!(transition.execute(&genesis_state, &block).is_err());

        let mut state = genesis_state;
        crate::state_transition(
            &config,
            &mut state,
            &block,
            ProcessSlots::Always,
            StateRootPolicy::Trust,
            helper_functions::verifier::NullVerifier,
        )?;

        assert_eq!(state, post_state);

        Ok(())
    }

    #[test]
    fn process_slots_crosses_epoch_boundary() -> Result<()> {
        let config = Config::minimal();
        let deposits = deposits(&config, 8)?;
        let mut state = initialize_state(&config, 0, H256::zero(), &deposits)?;

        crate::process_slots(&config, &mut state, 9)?;

        assert_eq!(state.slot, 9);
        assert_ne!(state.block_roots[0], H256::zero());
        assert!(crate::process_slots(&config, &mut state, 9).is_err());

        Ok(())
    }
}
