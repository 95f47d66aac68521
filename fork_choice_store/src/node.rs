use types::{
    beacon_state::BlockVoting,
    containers::{BlockSpineData, Checkpoint},
    nonstandard::PayloadStatus,
    primitives::{Epoch, Gwei, Slot, H256},
};

/// A block as seen by fork choice when it is inserted.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct BlockInfo {
    pub slot: Slot,
    pub root: H256,
    pub parent_root: H256,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub spine_data: BlockSpineData,
    pub block_voting: Vec<BlockVoting>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub slot: Slot,
    pub root: H256,
    pub parent: Option<usize>,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub justified_root: H256,
    pub finalized_root: H256,
    pub weight: Gwei,
    pub best_child: Option<usize>,
    pub best_descendant: Option<usize>,
    pub status: PayloadStatus,
    pub spine_data: BlockSpineData,
    pub block_voting: Vec<BlockVoting>,
}

/// Copy of a node with its indices resolved to roots.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeInfo {
    pub slot: Slot,
    pub root: H256,
    pub parent_root: Option<H256>,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub weight: Gwei,
    pub status: PayloadStatus,
    pub spine_data: BlockSpineData,
    pub block_voting: Vec<BlockVoting>,
}

/// A chain from a leaf back to the oldest node in fork choice.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ForkInfo {
    pub tip_root: H256,
    pub tip_slot: Slot,
    /// Roots of the chain ordered from the tip backwards.
    pub roots: Vec<H256>,
}
