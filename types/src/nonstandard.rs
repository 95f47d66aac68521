use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Result of validating a gossip message.
///
/// `Reject` lowers the score of the peer that sent the message. `Ignore` does not.
#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ValidationOutcome {
    Accept,
    Ignore,
    Reject,
}

/// Status of the execution payload of a block as known to the consensus layer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize, Serialize, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PayloadStatus {
    #[default]
    Syncing,
    Valid,
    Invalid,
}

impl PayloadStatus {
    #[must_use]
    pub const fn is_optimistic(self) -> bool {
        matches!(self, Self::Syncing)
    }

    #[must_use]
    pub const fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid)
    }
}
