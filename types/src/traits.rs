use serde::Serialize;

use crate::primitives::H256;

/// Content addressing for containers.
pub trait ContentHash: Serialize {
    fn hash_tree_root(&self) -> H256 {
        hashing::hash_serialized(self)
    }
}
