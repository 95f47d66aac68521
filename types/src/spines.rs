use anyhow::{ensure, Result};
use derive_more::{Deref, From, Into};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

use crate::{error::Error, primitives::H256};

/// An ordered sequence of execution layer block hashes.
///
/// Stored as the raw concatenation of the hashes and keyed by the hash of that concatenation.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug, Deref, From, Into, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Spines(Vec<H256>);

impl FromIterator<H256> for Spines {
    fn from_iter<I: IntoIterator<Item = H256>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Spines {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0
            .iter()
            .flat_map(|hash| hash.as_bytes())
            .copied()
            .collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() % H256::len_bytes() == 0,
            Error::SpinesLength {
                length: bytes.len(),
            },
        );

        Ok(bytes
            .chunks_exact(H256::len_bytes())
            .map(H256::from_slice)
            .collect())
    }

    /// The storage key. Empty sequences map to the zero hash.
    #[must_use]
    pub fn key(&self) -> H256 {
        if self.0.is_empty() {
            return H256::zero();
        }

        hashing::hash(self.to_bytes())
    }
}

/// Spine bookkeeping carried by every beacon state.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct SpineData {
    /// Spines of the latest block.
    pub spines: Vec<H256>,
    /// The part of `spines` shared with the candidate set of execution heads.
    pub prefix: Vec<H256>,
    /// Spines the latest block declared finalized.
    pub finalization: Vec<H256>,
    /// Finalization spines as of the latest checkpoint.
    pub cp_finalized: Vec<H256>,
    /// Spines of preceding blocks, newest last.
    pub parent_spines: Vec<Spines>,
    /// Finalization spines accumulated during the current epoch.
    pub epoch_finalization: Vec<H256>,
}

impl SpineData {
    /// The spine the chain has most recently agreed on.
    #[must_use]
    pub fn last_spine(&self) -> Option<H256> {
        self.finalization
            .last()
            .or_else(|| self.cp_finalized.last())
            .copied()
    }

    /// Number of distinct hashes across all sequences.
    #[must_use]
    pub fn count_unique_spines(&self) -> usize {
        self.spines
            .iter()
            .chain(&self.prefix)
            .chain(&self.finalization)
            .chain(&self.epoch_finalization)
            .chain(self.parent_spines.iter().flat_map(|spines| spines.iter()))
            .unique()
            .count()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn empty_spines_have_zero_key() {
        assert_eq!(Spines::default().key(), H256::zero());
        assert!(Spines::default().to_bytes().is_empty());
    }

    #[test]
    fn spines_survive_byte_encoding() -> Result<()> {
        let spines = Spines::from(vec![H256::repeat_byte(1), H256::repeat_byte(2)]);
        let bytes = spines.to_bytes();

        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..32], H256::repeat_byte(1).as_bytes());
        assert_eq!(Spines::from_bytes(&bytes)?, spines);
        assert_eq!(spines.key(), hashing::hash(bytes));

        Ok(())
    }

    #[test_case(1)]
    #[test_case(33)]
    #[test_case(63)]
    fn spines_from_truncated_bytes_fail(length: usize) {
        assert!(Spines::from_bytes(&vec![0; length]).is_err());
    }

    #[test]
    fn count_unique_spines_ignores_duplicates() {
        let spine_data = SpineData {
            spines: vec![H256::repeat_byte(1), H256::repeat_byte(2)],
            prefix: vec![H256::repeat_byte(1)],
            finalization: vec![H256::repeat_byte(3)],
            parent_spines: vec![Spines::from(vec![H256::repeat_byte(2), H256::repeat_byte(4)])],
            ..SpineData::default()
        };

        assert_eq!(spine_data.count_unique_spines(), 4);
    }
}
