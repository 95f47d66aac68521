use thiserror::Error;
use types::{
    containers::{AttestationData, Checkpoint},
    primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("attestation data is not slashable (data_1: {data_1:?}, data_2: {data_2:?})")]
    AttestationDataNotSlashable {
        data_1: AttestationData,
        data_2: AttestationData,
    },
    #[error(
        "attestation in slot {attestation_slot} is outside \
         inclusion range for state at slot {state_slot}"
    )]
    AttestationOutsideInclusionRange {
        state_slot: Slot,
        attestation_slot: Slot,
    },
    #[error(
        "attestation source does not match justified checkpoint \
         (in_state: {in_state:?}, in_block: {in_block:?})"
    )]
    AttestationSourceMismatch {
        in_state: Checkpoint,
        in_block: Checkpoint,
    },
    #[error("attestation votes for a checkpoint in the wrong epoch: {data:?}")]
    AttestationTargetsWrongEpoch { data: AttestationData },
    #[error("block is not newer than latest block header ({block_slot} <= {block_header_slot})")]
    BlockNotNewerThanLatestBlockHeader {
        block_slot: Slot,
        block_header_slot: Slot,
    },
    #[error("deposit count is incorrect (computed: {computed}, in_block: {in_block})")]
    DepositCountMismatch { computed: u64, in_block: u64 },
    #[error("finalization spine {spine:?} appears more than once")]
    DuplicateFinalizationSpine { spine: H256 },
    #[error("deposit count in eth1 data decreased from {in_state} to {in_block}")]
    Eth1DepositCountDecreased { in_state: u64, in_block: u64 },
    #[error("exit of validator {index} is for epoch {exit_epoch} after current epoch {current_epoch}")]
    ExitEpochInTheFuture {
        index: ValidatorIndex,
        exit_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error("attester slashing has no slashable indices")]
    NoSlashableIndices,
    #[error("parent root does not match (in_state: {in_state:?}, in_block: {in_block:?})")]
    ParentRootMismatch { in_state: H256, in_block: H256 },
    #[error("proposer index is incorrect (computed: {computed}, in_block: {in_block})")]
    ProposerIndexMismatch {
        computed: ValidatorIndex,
        in_block: ValidatorIndex,
    },
    #[error("proposer {index} is slashed")]
    ProposerSlashed { index: ValidatorIndex },
    #[error("proposer slashing is invalid: {reason}")]
    ProposerSlashingInvalid { reason: &'static str },
    #[error("block slot {block_slot} does not match state slot {state_slot}")]
    SlotMismatch { state_slot: Slot, block_slot: Slot },
    #[error("slot {target} is not later than {current}")]
    SlotNotLater { current: Slot, target: Slot },
    #[error("block spines do not start with the block prefix")]
    SpinePrefixMismatch,
    #[error("state root is incorrect (computed: {computed:?}, in_block: {in_block:?})")]
    StateRootMismatch { computed: H256, in_block: H256 },
    #[error(
        "sync aggregate bit count {bit_count} does not match committee size {committee_size}"
    )]
    SyncAggregateLengthMismatch {
        bit_count: usize,
        committee_size: usize,
    },
    #[error("block contains {count} {kind}, more than the limit of {limit}")]
    TooManyOperations {
        kind: &'static str,
        count: usize,
        limit: usize,
    },
    #[error("validator {index} is not eligible for exit")]
    ValidatorNotEligibleForExit { index: ValidatorIndex },
    #[error("withdrawal of {amount} from validator {index} exceeds its balance of {balance}")]
    WithdrawalExceedsBalance {
        index: ValidatorIndex,
        amount: Gwei,
        balance: Gwei,
    },
}
