use thiserror::Error;
use types::{
    containers::Checkpoint,
    primitives::{ValidatorIndex, H256},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("block {root:?} is already being processed")]
    BlockIsProcessing { root: H256 },
    #[error("block {root:?} leads to {count} unique spines, more than the limit of {limit}")]
    AllSpinesLimitExceeded {
        root: H256,
        count: usize,
        limit: usize,
    },
    #[error("signatures of a batch of {blocks} blocks are invalid")]
    InvalidSignatureBatch { blocks: usize },
    #[error("execution engine is unavailable")]
    ExecutionEngineUnavailable,
    #[error("finalized checkpoint {checkpoint:?} is not part of the local chain")]
    InvalidCheckpoint { checkpoint: Checkpoint },
    #[error("block root {root:?} does not match computed root {computed:?}")]
    BlockRootMismatch { root: H256, computed: H256 },
    #[error("{blocks} blocks were passed with {roots} roots")]
    BatchLengthMismatch { blocks: usize, roots: usize },
    #[error("block {root:?} contains an invalid voluntary exit of validator {validator_index}")]
    InvalidBlockExit {
        root: H256,
        validator_index: ValidatorIndex,
    },
    #[error("block {root:?} contains an invalid withdrawal of validator {validator_index}")]
    InvalidBlockWithdrawal {
        root: H256,
        validator_index: ValidatorIndex,
    },
    #[error("state transition of block {root:?} failed")]
    InvalidStateTransition { root: H256 },
    #[error("block {root:?} is not known")]
    UnknownBlock { root: H256 },
    #[error("chain service has not been started")]
    NotStarted,
    #[error("no finalized checkpoint saved")]
    NoSavedState,
    #[error("last finalized spine {spine:?} is not among the finalization candidates")]
    UnknownLastFinalizedSpine { spine: H256 },
    #[error("chain started event was never received")]
    ChainStartedMissing,
}
