use derive_more::Display;
use thiserror::Error;
use types::primitives::{CommitteeIndex, Slot, ValidatorIndex};

#[derive(Debug, Error)]
pub enum Error {
    #[error("attestation has no attesting indices")]
    AttestationHasNoAttestingIndices,
    #[error("attesting indices are not sorted and unique")]
    AttestingIndicesNotSortedAndUnique,
    #[error("committee index {index} is out of bounds")]
    CommitteeIndexOutOfBounds { index: CommitteeIndex },
    #[error(
        "aggregation bitlist length {aggregation_bitlist_length} \
         does not match committee length {committee_length}"
    )]
    CommitteeLengthMismatch {
        aggregation_bitlist_length: usize,
        committee_length: usize,
    },
    #[error("no validators are active")]
    NoActiveValidators,
    #[error("{0} is invalid")]
    SignatureInvalid(SignatureKind),
    #[error("slot {slot} is out of range of state at slot {state_slot}")]
    SlotOutOfRange { slot: Slot, state_slot: Slot },
    #[error("validator index {index} is out of bounds")]
    ValidatorIndexOutOfBounds { index: ValidatorIndex },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum SignatureKind {
    #[display("aggregate and proof signature")]
    AggregateAndProof,
    #[display("attestation signature")]
    Attestation,
    #[display("block signature")]
    Block,
    #[display("deposit signature")]
    Deposit,
    #[display("collection of multiple signatures")]
    Multi,
    #[display("prevote signature")]
    Prevote,
    #[display("RANDAO reveal")]
    Randao,
    #[display("selection proof")]
    SelectionProof,
    #[display("sync aggregate signature")]
    SyncAggregate,
    #[display("sync committee message signature")]
    SyncCommitteeMessage,
    #[display("voluntary exit signature")]
    VoluntaryExit,
}
