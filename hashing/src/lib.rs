//! SHA-256 helpers.
//!
//! Container roots are computed by hashing the `bincode` encoding of the container.
//! The encoding is deterministic for every type in the workspace because none of them contain
//! unordered collections.

use ethereum_types::H256;
use serde::Serialize;
use sha2::{Digest as _, Sha256};

#[must_use]
pub fn hash(bytes: impl AsRef<[u8]>) -> H256 {
    H256(Sha256::digest(bytes).into())
}

#[must_use]
pub fn hash_256_256(left: H256, right: H256) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    H256(hasher.finalize().into())
}

#[must_use]
pub fn hash_256_64(root: H256, number: u64) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(root);
    hasher.update(number.to_le_bytes());
    H256(hasher.finalize().into())
}

#[must_use]
pub fn hash_hashes(hashes: impl IntoIterator<Item = H256>) -> H256 {
    let mut hasher = Sha256::new();

    for hash in hashes {
        hasher.update(hash);
    }

    H256(hasher.finalize().into())
}

/// Hashes the `bincode` encoding of `value`.
///
/// Encoding into a `Vec` can only fail for types whose `Serialize` impl returns an error,
/// which none of the containers do. Such failures are folded into the zero hash.
#[must_use]
pub fn hash_serialized<T: Serialize + ?Sized>(value: &T) -> H256 {
    bincode::serialize(value)
        .map(hash)
        .unwrap_or_else(|_| H256::zero())
}
