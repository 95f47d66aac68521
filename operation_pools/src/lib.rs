//! Pools of operations waiting for inclusion in blocks.
//!
//! Every pool owns a single lock and never calls into other components while holding it.

pub use crate::{
    attestation_pool::AttestationPool,
    error::Error,
    exit_pool::ExitPool,
    misc::{PoolAdditionOutcome, PoolRejectionReason},
    prevote_pool::PrevotePool,
    slashing_pool::SlashingPool,
    sync_committee_message_pool::SyncCommitteeMessagePool,
    withdrawal_pool::WithdrawalPool,
};

mod attestation_pool;
mod error;
mod exit_pool;
mod misc;
mod prevote_pool;
mod slashing_pool;
mod sync_committee_message_pool;
mod withdrawal_pool;
