use anyhow::Error;
use serde::Serialize;
use strum::IntoStaticStr;

pub enum PoolAdditionOutcome {
    Accept,
    Ignore,
    Reject(PoolRejectionReason, Error),
}

impl PoolAdditionOutcome {
    #[must_use]
    pub const fn is_publishable(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

#[expect(clippy::enum_variant_names)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum PoolRejectionReason {
    InvalidAttestation,
    InvalidAttesterSlashing,
    InvalidPrevote,
    InvalidProposerSlashing,
    InvalidSyncCommitteeMessage,
    InvalidVoluntaryExit,
    InvalidWithdrawal,
}
