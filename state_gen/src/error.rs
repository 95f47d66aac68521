use thiserror::Error;
use types::primitives::{Slot, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no data available for slot {slot}")]
    NoDataForSlot { slot: Slot },
    #[error("state replay already in progress for block {root:?}")]
    AlreadyInProgress { root: H256 },
    #[error("block not found: {root:?}")]
    BlockNotFound { root: H256 },
    #[error("genesis state not found")]
    GenesisStateNotFound,
    #[error("state lookup cancelled for block {root:?}")]
    Cancelled { root: H256 },
}
