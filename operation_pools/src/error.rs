use thiserror::Error;
use types::primitives::{Slot, ValidatorIndex};

#[derive(Debug, Error)]
pub enum Error {
    #[error("aggregation bits are empty")]
    EmptyAggregationBits,
    #[error("expected exactly one aggregation bit, found {count}")]
    NotSingular { count: usize },
    #[error("proposer slashing headers are for different proposers")]
    ProposerMismatch,
    #[error("attester slashing has no common attesting indices")]
    NoCommonAttesters,
    #[error("prevote for slot {slot} has no candidates")]
    NoCandidates { slot: Slot },
    #[error("withdrawal by validator {index} has zero amount")]
    ZeroWithdrawal { index: ValidatorIndex },
}
