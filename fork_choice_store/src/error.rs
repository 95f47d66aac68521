use thiserror::Error;
use types::primitives::H256;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node is not in fork choice: {root:?}")]
    UnknownNodeRoot { root: H256 },
    #[error("parent of block is not in fork choice (root: {root:?}, parent_root: {parent_root:?})")]
    UnknownParent { root: H256, parent_root: H256 },
    #[error("parent of block is invalid (root: {root:?}, parent_root: {parent_root:?})")]
    InvalidParent { root: H256, parent_root: H256 },
    #[error("block has an invalid ancestor and cannot be marked valid: {root:?}")]
    InvalidAncestorOfValidBlock { root: H256 },
    #[error("justified block is invalid: {justified_root:?}")]
    InvalidJustifiedNode { justified_root: H256 },
    #[error(
        "best descendant of justified block is not viable for head \
         (justified_root: {justified_root:?}, best_root: {best_root:?})"
    )]
    InvalidBestNode { justified_root: H256, best_root: H256 },
    #[error("node index out of bounds: {index}")]
    InvalidNodeIndex { index: usize },
    #[error("weight delta overflowed at node {index}")]
    DeltaOverflow { index: usize },
}
