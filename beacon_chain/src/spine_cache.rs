use std::collections::HashSet;

use parking_lot::RwLock;
use types::{gwat::SpineCheckpoint, primitives::H256};

#[derive(Default)]
struct FinalizedSpinesInner {
    spines: Vec<H256>,
    index: HashSet<H256>,
    checkpoint: Option<SpineCheckpoint>,
}

/// Ordered set of spines finalized by the execution engine, newest last.
#[derive(Default)]
pub struct FinalizedSpines {
    inner: RwLock<FinalizedSpinesInner>,
}

impl FinalizedSpines {
    /// Appends the part of `spines` that follows the last element already present.
    ///
    /// Appending is idempotent and never reorders existing entries.
    pub fn add_finalized_spines(&self, spines: &[H256]) {
        let mut inner = self.inner.write();

        let start = spines
            .iter()
            .rposition(|spine| inner.index.contains(spine))
            .map_or(0, |position| position + 1);

        for spine in &spines[start..] {
            if inner.index.insert(*spine) {
                inner.spines.push(*spine);
            }
        }
    }

    /// Records `checkpoint` and drops spines finalized before its spine.
    pub fn set_checkpoint(&self, checkpoint: SpineCheckpoint) {
        let mut inner = self.inner.write();

        if let Some(position) = inner
            .spines
            .iter()
            .position(|spine| *spine == checkpoint.spine)
        {
            let removed = inner.spines.drain(..position).collect::<Vec<_>>();

            for spine in removed {
                inner.index.remove(&spine);
            }
        }

        inner.checkpoint = Some(checkpoint);
    }

    pub fn reset(&self, spines: &[H256]) {
        let mut inner = self.inner.write();

        inner.spines.clear();
        inner.index.clear();

        for spine in spines {
            if inner.index.insert(*spine) {
                inner.spines.push(*spine);
            }
        }
    }

    #[must_use]
    pub fn contains(&self, spine: H256) -> bool {
        self.inner.read().index.contains(&spine)
    }

    #[must_use]
    pub fn last(&self) -> Option<H256> {
        self.inner.read().spines.last().copied()
    }

    #[must_use]
    pub fn spines(&self) -> Vec<H256> {
        self.inner.read().spines.clone()
    }

    #[must_use]
    pub fn checkpoint(&self) -> Option<SpineCheckpoint> {
        self.inner.read().checkpoint
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().spines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().spines.is_empty()
    }
}

/// Spine chains the execution engine reported as candidates for the next block.
#[derive(Default)]
pub struct OptimisticSpines {
    chains: RwLock<Vec<Vec<H256>>>,
}

impl OptimisticSpines {
    pub fn set(&self, chains: Vec<Vec<H256>>) {
        *self.chains.write() = chains;
    }

    #[must_use]
    pub fn get(&self) -> Vec<Vec<H256>> {
        self.chains.read().clone()
    }
}
