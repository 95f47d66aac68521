use serde::{Deserialize, Serialize};

use crate::{
    consts::JUSTIFICATION_BITS_LENGTH,
    containers::{BeaconBlockHeader, Checkpoint, Eth1Data, Fork, Validator},
    gwat::ValidatorSync,
    primitives::{DepositIndex, Gwei, Slot, UnixSeconds, ValidatorIndex, H256},
    spines::SpineData,
    traits::ContentHash,
};

/// Votes accumulated for a block from attestations included in its descendants.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct BlockVoting {
    pub root: H256,
    pub slot: Slot,
    pub candidates: Vec<H256>,
    pub votes: u64,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct BeaconState {
    // Versioning
    pub genesis_time: UnixSeconds,
    pub genesis_validators_root: H256,
    pub slot: Slot,
    pub fork: Fork,

    // History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: Vec<H256>,
    pub state_roots: Vec<H256>,

    // Eth1
    pub eth1_data: Eth1Data,
    pub eth1_deposit_index: DepositIndex,

    // Registry
    pub validators: Vec<Validator>,
    pub balances: Vec<Gwei>,

    // Randomness
    pub randao_mixes: Vec<H256>,

    // Participation: whether each validator attested to the correct target
    pub previous_epoch_participation: Vec<bool>,
    pub current_epoch_participation: Vec<bool>,

    // Finality
    pub justification_bits: [bool; JUSTIFICATION_BITS_LENGTH],
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,

    // Sync
    pub current_sync_committee: Vec<ValidatorIndex>,

    // DAG coordination
    pub spine_data: SpineData,
    pub block_voting: Vec<BlockVoting>,
    pub validator_sync: Vec<ValidatorSync>,
}

impl ContentHash for BeaconState {}

impl BeaconState {
    #[must_use]
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }
}
