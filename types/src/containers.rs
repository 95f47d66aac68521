use bls::{PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};

use crate::{
    primitives::{
        AggregationBits, CommitteeIndex, Epoch, Gwei, Slot, ValidatorIndex, Version, H256,
    },
    traits::ContentHash,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Fork {
    pub previous_version: Version,
    pub current_version: Version,
    pub epoch: Epoch,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct ForkData {
    pub current_version: Version,
    pub genesis_validators_root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SigningData {
    pub object_root: H256,
    pub domain: H256,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Eth1Data {
    pub deposit_root: H256,
    pub deposit_count: u64,
    pub block_hash: H256,
    /// Execution block hashes proposed as spine candidates.
    pub candidates: Vec<H256>,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Validator {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
pub struct AttestationData {
    pub slot: Slot,
    pub index: CommitteeIndex,
    pub beacon_block_root: H256,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Attestation {
    pub aggregation_bits: AggregationBits,
    pub data: AttestationData,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct IndexedAttestation {
    pub attesting_indices: Vec<ValidatorIndex>,
    pub data: AttestationData,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct AggregateAndProof {
    pub aggregator_index: ValidatorIndex,
    pub aggregate: Attestation,
    pub selection_proof: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SignedAggregateAndProof {
    pub message: AggregateAndProof,
    pub signature: SignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct BeaconBlockHeader {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body_root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: SignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct DepositMessage {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    pub amount: Gwei,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct DepositData {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    pub amount: Gwei,
    pub signature: SignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Deposit {
    pub data: DepositData,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
pub struct VoluntaryExit {
    pub epoch: Epoch,
    pub validator_index: ValidatorIndex,
    /// Hash of the execution layer transaction that requested the exit.
    pub init_tx_hash: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: SignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
pub struct Withdrawal {
    pub epoch: Epoch,
    pub validator_index: ValidatorIndex,
    pub amount: Gwei,
    pub init_tx_hash: H256,
}

#[derive(Clone, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
pub struct PrevoteData {
    pub slot: Slot,
    pub index: CommitteeIndex,
    pub candidates: Vec<H256>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Prevote {
    pub aggregation_bits: AggregationBits,
    pub data: PrevoteData,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SyncAggregate {
    pub sync_committee_bits: AggregationBits,
    pub sync_committee_signature: SignatureBytes,
}

impl SyncAggregate {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sync_committee_bits: AggregationBits::new(),
            sync_committee_signature: SignatureBytes::empty(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SyncCommitteeMessage {
    pub slot: Slot,
    pub beacon_block_root: H256,
    pub validator_index: ValidatorIndex,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SyncCommitteeContribution {
    pub slot: Slot,
    pub beacon_block_root: H256,
    pub subcommittee_index: u64,
    pub aggregation_bits: AggregationBits,
    pub signature: SignatureBytes,
}

/// Spine sequences carried by a block.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct BlockSpineData {
    pub spines: Vec<H256>,
    pub prefix: Vec<H256>,
    pub finalization: Vec<H256>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct BeaconBlockBody {
    pub randao_reveal: SignatureBytes,
    pub eth1_data: Eth1Data,
    pub graffiti: H256,
    pub proposer_slashings: Vec<ProposerSlashing>,
    pub attester_slashings: Vec<AttesterSlashing>,
    pub attestations: Vec<Attestation>,
    pub deposits: Vec<Deposit>,
    pub voluntary_exits: Vec<SignedVoluntaryExit>,
    pub withdrawals: Vec<Withdrawal>,
    pub sync_aggregate: SyncAggregate,
    pub spine_data: BlockSpineData,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body: BeaconBlockBody,
}

impl BeaconBlock {
    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.hash_tree_root(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: SignatureBytes,
}

impl SignedBeaconBlock {
    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.message.slot
    }

    #[must_use]
    pub const fn parent_root(&self) -> H256 {
        self.message.parent_root
    }
}

impl ContentHash for AggregateAndProof {}
impl ContentHash for AttestationData {}
impl ContentHash for BeaconBlockBody {}
impl ContentHash for BeaconBlockHeader {}
impl ContentHash for Checkpoint {}
impl ContentHash for DepositMessage {}
impl ContentHash for ForkData {}
impl ContentHash for PrevoteData {}
impl ContentHash for SigningData {}
impl ContentHash for VoluntaryExit {}
impl ContentHash for Withdrawal {}

// Blocks are identified by the root of their header so that `BeaconState.latest_block_header`
// and the block itself agree on the root.
impl ContentHash for BeaconBlock {
    fn hash_tree_root(&self) -> H256 {
        self.to_header().hash_tree_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_root_matches_header_root() {
        let block = BeaconBlock {
            slot: 3,
            proposer_index: 1,
            parent_root: H256::repeat_byte(1),
            state_root: H256::repeat_byte(2),
            body: BeaconBlockBody::default(),
        };

        assert_eq!(block.hash_tree_root(), block.to_header().hash_tree_root());
    }

    #[test]
    fn block_root_commits_to_body() {
        let block = BeaconBlock::default();

        let mut other = block.clone();
        other.body.graffiti = H256::repeat_byte(7);

        assert_ne!(block.hash_tree_root(), other.hash_tree_root());
    }
}
