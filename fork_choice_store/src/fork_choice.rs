#![expect(clippy::module_name_repetitions)]

use core::num::NonZeroU64;
use std::collections::{HashMap, HashSet};

use anyhow::Result;
use itertools::Itertools as _;
use parking_lot::RwLock;
use tap::TryConv as _;
use tracing::debug;
use types::{
    config::Config,
    containers::Checkpoint,
    nonstandard::PayloadStatus,
    primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
};

use crate::{
    error::Error,
    node::{BlockInfo, ForkInfo, NodeInfo},
    proto_array::{ProposerBoost, ProtoArray},
};

#[derive(Clone, Copy, Debug)]
pub struct ForkChoiceConfig {
    /// Percentage of a committee's weight granted to a timely proposal.
    pub proposer_score_boost: u64,
    pub slots_per_epoch: NonZeroU64,
}

impl From<&Config> for ForkChoiceConfig {
    fn from(config: &Config) -> Self {
        Self {
            proposer_score_boost: config.proposer_score_boost,
            slots_per_epoch: config.slots_per_epoch,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
struct Vote {
    current_root: H256,
    next_root: H256,
    next_epoch: Epoch,
}

#[derive(Clone, Default)]
struct ForkChoiceState {
    proto_array: ProtoArray,
    votes: Vec<Vote>,
    balances: Vec<Gwei>,
    proposer_boost_root: H256,
    canonical: HashSet<H256>,
}

/// LMD-GHOST over an array of optimistically imported blocks.
///
/// Reads take a shared lock. Insertion, pruning, status changes and head computation are
/// exclusive.
pub struct ForkChoice {
    config: ForkChoiceConfig,
    state: RwLock<ForkChoiceState>,
}

impl Clone for ForkChoice {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            state: RwLock::new(self.state.read().clone()),
        }
    }
}

impl ForkChoice {
    #[must_use]
    pub fn new(config: ForkChoiceConfig, justified_epoch: Epoch, finalized_epoch: Epoch) -> Self {
        Self {
            config,
            state: RwLock::new(ForkChoiceState {
                proto_array: ProtoArray::new(justified_epoch, finalized_epoch),
                ..ForkChoiceState::default()
            }),
        }
    }

    /// Inserts a block with [`PayloadStatus::Syncing`]. Known blocks are left untouched.
    pub fn insert_optimistic(&self, block: BlockInfo) -> Result<()> {
        self.state.write().proto_array.insert(block)
    }

    /// Records the latest vote of each validator in `indices`.
    ///
    /// A vote only replaces an older one if its target epoch is later.
    pub fn process_attestation(
        &self,
        indices: &[ValidatorIndex],
        block_root: H256,
        target_epoch: Epoch,
    ) -> Result<()> {
        let mut state = self.state.write();

        for validator_index in indices.iter().copied() {
            let validator_index = validator_index.try_conv::<usize>()?;

            if validator_index >= state.votes.len() {
                state.votes.resize(validator_index + 1, Vote::default());
            }

            let vote = &mut state.votes[validator_index];

            if target_epoch > vote.next_epoch || *vote == Vote::default() {
                vote.next_root = block_root;
                vote.next_epoch = target_epoch;
            }
        }

        Ok(())
    }

    pub fn boost_proposer_root(&self, root: H256) {
        self.state.write().proposer_boost_root = root;
    }

    pub fn reset_boost(&self) {
        self.state.write().proposer_boost_root = H256::zero();
    }

    #[must_use]
    pub fn proposer_boost_root(&self) -> H256 {
        self.state.read().proposer_boost_root
    }

    /// Applies pending votes and balance changes, then finds the head from `justified_root`.
    ///
    /// `balances` are the effective balances of the justified state indexed by validator.
    pub fn head(
        &self,
        justified_epoch: Epoch,
        justified_root: H256,
        balances: &[Gwei],
        finalized_epoch: Epoch,
    ) -> Result<H256> {
        let mut state = self.state.write();
        let ForkChoiceState {
            proto_array,
            votes,
            balances: old_balances,
            proposer_boost_root,
            ..
        } = &mut *state;

        let deltas = compute_deltas(proto_array.indices(), votes, old_balances, balances)?;

        let boost = ProposerBoost {
            root: *proposer_boost_root,
            score: proposer_boost_score(self.config, balances),
        };

        proto_array.apply_score_changes(deltas, justified_epoch, finalized_epoch, boost)?;

        *old_balances = balances.to_vec();

        proto_array.find_head(justified_root)
    }

    /// Keeps only `finalized_root` and its descendants.
    pub fn prune(&self, finalized_root: H256) -> Result<()> {
        let mut state = self.state.write();
        let removed = state.proto_array.prune(finalized_root)?;

        for root in &removed {
            state.canonical.remove(root);
        }

        debug!(
            finalized_root = ?finalized_root,
            removed = removed.len(),
            remaining = state.proto_array.len(),
            "pruned fork choice",
        );

        Ok(())
    }

    /// Marks `root` and every optimistic ancestor valid.
    pub fn set_optimistic_to_valid(&self, root: H256) -> Result<()> {
        self.state.write().proto_array.set_valid(root)
    }

    /// Marks `root` and all of its descendants invalid. Returns how many nodes were marked.
    pub fn set_optimistic_to_invalid(&self, root: H256) -> Result<usize> {
        self.state.write().proto_array.set_invalid(root)
    }

    /// Deletes `roots` along with their descendants and returns every deleted root.
    pub fn remove_nodes(&self, roots: &[H256]) -> Result<Vec<H256>> {
        let mut state = self.state.write();
        let roots = roots.iter().copied().collect();
        let removed = state.proto_array.remove(&roots)?;

        for root in &removed {
            state.canonical.remove(root);
        }

        Ok(removed)
    }

    pub fn is_optimistic(&self, root: H256) -> Result<bool> {
        self.status(root).map(PayloadStatus::is_optimistic)
    }

    pub fn status(&self, root: H256) -> Result<PayloadStatus> {
        self.state
            .read()
            .proto_array
            .node(root)
            .map(|node| node.status)
            .ok_or_else(|| Error::UnknownNodeRoot { root }.into())
    }

    #[must_use]
    pub fn has_node(&self, root: H256) -> bool {
        self.state.read().proto_array.contains(root)
    }

    #[must_use]
    pub fn node_info(&self, root: H256) -> Option<NodeInfo> {
        self.state.read().proto_array.node_info(root)
    }

    pub fn ancestor(&self, root: H256, slot: Slot) -> Result<Option<H256>> {
        self.state.read().proto_array.ancestor(root, slot)
    }

    #[must_use]
    pub fn is_descendant(&self, ancestor_root: H256, root: H256) -> bool {
        self.state.read().proto_array.is_descendant(ancestor_root, root)
    }

    #[must_use]
    pub fn is_canonical(&self, root: H256) -> bool {
        self.state.read().canonical.contains(&root)
    }

    /// Replaces the canonical set with the chain ending at `head_root`.
    pub fn update_canonical(&self, head_root: H256) -> Result<()> {
        let mut state = self.state.write();
        let roots = state.proto_array.chain_roots(head_root)?;

        state.canonical = roots.into_iter().collect();

        Ok(())
    }

    #[must_use]
    pub fn get_forks(&self) -> Vec<ForkInfo> {
        self.state.read().proto_array.forks()
    }

    /// The latest node shared by every fork.
    #[must_use]
    pub fn get_common_ancestor(&self) -> Option<NodeInfo> {
        let state = self.state.read();
        let forks = state.proto_array.forks();
        let (first, rest) = forks.split_first()?;

        let rest = rest
            .iter()
            .map(|fork| fork.roots.iter().copied().collect::<HashSet<_>>())
            .collect_vec();

        let common_root = first
            .roots
            .iter()
            .copied()
            .find(|root| rest.iter().all(|roots| roots.contains(root)))?;

        state.proto_array.node_info(common_root)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().proto_array.len()
    }

    #[must_use]
    pub fn justified_epoch(&self) -> Epoch {
        self.state.read().proto_array.justified_epoch()
    }

    #[must_use]
    pub fn finalized_epoch(&self) -> Epoch {
        self.state.read().proto_array.finalized_epoch()
    }

    /// Justified and finalized checkpoints recorded in the node for `root`.
    #[must_use]
    pub fn node_checkpoints(&self, root: H256) -> Option<(Checkpoint, Checkpoint)> {
        let state = self.state.read();
        let node = state.proto_array.node(root)?;

        Some((
            Checkpoint {
                epoch: node.justified_epoch,
                root: node.justified_root,
            },
            Checkpoint {
                epoch: node.finalized_epoch,
                root: node.finalized_root,
            },
        ))
    }

    #[must_use]
    pub fn roots(&self) -> HashSet<H256> {
        self.state.read().proto_array.indices().keys().copied().collect()
    }

    /// Identifies the set of blocks in fork choice regardless of insertion order.
    #[must_use]
    pub fn roots_key(&self) -> H256 {
        roots_key(self.state.read().proto_array.indices().keys().copied())
    }
}

pub fn roots_key(roots: impl IntoIterator<Item = H256>) -> H256 {
    hashing::hash_hashes(roots.into_iter().sorted())
}

fn compute_deltas(
    indices: &HashMap<H256, usize>,
    votes: &mut [Vote],
    old_balances: &[Gwei],
    new_balances: &[Gwei],
) -> Result<Vec<i64>> {
    let mut deltas = vec![0_i64; indices.len()];

    for (validator_index, vote) in votes.iter_mut().enumerate() {
        if vote.current_root.is_zero() && vote.next_root.is_zero() {
            continue;
        }

        // Validators missing from a balance list have no weight in it.
        let old_balance = old_balances.get(validator_index).copied().unwrap_or_default();
        let new_balance = new_balances.get(validator_index).copied().unwrap_or_default();

        if vote.current_root == vote.next_root && old_balance == new_balance {
            continue;
        }

        // Votes for blocks outside fork choice predate finalization and are ignored.
        if let Some(index) = indices.get(&vote.current_root).copied() {
            deltas[index] = deltas[index]
                .checked_sub(old_balance.try_conv::<i64>()?)
                .ok_or(Error::DeltaOverflow { index })?;
        }

        if let Some(index) = indices.get(&vote.next_root).copied() {
            deltas[index] = deltas[index]
                .checked_add(new_balance.try_conv::<i64>()?)
                .ok_or(Error::DeltaOverflow { index })?;
        }

        vote.current_root = vote.next_root;
    }

    Ok(deltas)
}

fn proposer_boost_score(config: ForkChoiceConfig, balances: &[Gwei]) -> Gwei {
    let total_balance = balances.iter().copied().fold(0, Gwei::saturating_add);
    let committee_weight = total_balance / config.slots_per_epoch;

    committee_weight.saturating_mul(config.proposer_score_boost) / 100
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::containers::BlockSpineData;

    use super::*;

    const BALANCE: Gwei = 32;

    fn config() -> ForkChoiceConfig {
        ForkChoiceConfig {
            proposer_score_boost: 40,
            slots_per_epoch: NonZeroU64::MIN,
        }
    }

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn block(slot: Slot, byte: u8, parent: Option<u8>) -> BlockInfo {
        BlockInfo {
            slot,
            root: root(byte),
            parent_root: parent.map(root).unwrap_or_default(),
            spine_data: BlockSpineData {
                spines: vec![root(byte)],
                ..BlockSpineData::default()
            },
            ..BlockInfo::default()
        }
    }

    // 1 ← 2 ← 3
    //   ↖ 4
    fn fork_choice() -> Result<ForkChoice> {
        let fork_choice = ForkChoice::new(config(), 0, 0);

        fork_choice.insert_optimistic(block(0, 1, None))?;
        fork_choice.insert_optimistic(block(1, 2, Some(1)))?;
        fork_choice.insert_optimistic(block(2, 3, Some(2)))?;
        fork_choice.insert_optimistic(block(1, 4, Some(1)))?;

        Ok(fork_choice)
    }

    fn head(fork_choice: &ForkChoice, validator_count: usize) -> Result<H256> {
        fork_choice.head(0, root(1), &vec![BALANCE; validator_count], 0)
    }

    #[test_case(&[5, 6, 7]; "ascending")]
    #[test_case(&[7, 5, 6]; "rotated")]
    #[test_case(&[6, 7, 5]; "shuffled")]
    fn head_does_not_depend_on_insertion_order(siblings: &[u8]) -> Result<()> {
        let fork_choice = ForkChoice::new(config(), 0, 0);

        fork_choice.insert_optimistic(block(0, 1, None))?;

        for byte in siblings.iter().copied() {
            fork_choice.insert_optimistic(block(1, byte, Some(1)))?;
        }

        // Equal weights resolve to the highest root.
        assert_eq!(head(&fork_choice, 0)?, root(7));

        fork_choice.process_attestation(&[0, 1], root(5), 1)?;

        assert_eq!(head(&fork_choice, 2)?, root(5));

        Ok(())
    }

    #[test]
    fn later_votes_move_the_head() -> Result<()> {
        let fork_choice = fork_choice()?;

        fork_choice.process_attestation(&[0, 1], root(4), 1)?;
        fork_choice.process_attestation(&[2], root(3), 1)?;

        assert_eq!(head(&fork_choice, 3)?, root(4));

        // Votes for the same epoch do not replace earlier ones.
        fork_choice.process_attestation(&[0], root(3), 1)?;

        assert_eq!(head(&fork_choice, 3)?, root(4));

        fork_choice.process_attestation(&[0], root(3), 2)?;

        assert_eq!(head(&fork_choice, 3)?, root(3));

        let node = fork_choice.node_info(root(2)).ok_or(Error::UnknownNodeRoot { root: root(2) })?;

        assert_eq!(node.weight, 2 * BALANCE);

        Ok(())
    }

    #[test]
    fn proposer_boost_lasts_until_reset() -> Result<()> {
        let fork_choice = fork_choice()?;

        fork_choice.process_attestation(&[0], root(3), 1)?;
        fork_choice.boost_proposer_root(root(4));

        // The boost is 40% of 3 validators' balance, more than a single vote.
        assert_eq!(head(&fork_choice, 3)?, root(4));

        fork_choice.reset_boost();

        assert_eq!(head(&fork_choice, 3)?, root(3));
        assert_eq!(
            fork_choice.node_info(root(4)).map(|node| node.weight),
            Some(0),
        );

        Ok(())
    }

    #[test]
    fn insertion_rejects_unknown_parents_and_ignores_duplicates() -> Result<()> {
        let fork_choice = fork_choice()?;

        let error = fork_choice
            .insert_optimistic(block(3, 9, Some(8)))
            .expect_err("parent 8 is not in fork choice");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::UnknownParent { .. }),
        ));

        fork_choice.insert_optimistic(block(5, 3, Some(2)))?;

        assert_eq!(fork_choice.len(), 4);
        assert_eq!(fork_choice.node_info(root(3)).map(|node| node.slot), Some(2));

        Ok(())
    }

    #[test]
    fn head_fails_for_unknown_justified_root() -> Result<()> {
        let fork_choice = fork_choice()?;

        let error = fork_choice
            .head(0, root(9), &[], 0)
            .expect_err("root 9 is not in fork choice");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::UnknownNodeRoot { .. }),
        ));

        Ok(())
    }

    #[test]
    fn validation_flips_ancestors_only() -> Result<()> {
        let fork_choice = fork_choice()?;

        assert!(fork_choice.is_optimistic(root(2))?);

        fork_choice.set_optimistic_to_valid(root(2))?;

        assert!(!fork_choice.is_optimistic(root(1))?);
        assert!(!fork_choice.is_optimistic(root(2))?);
        assert!(fork_choice.is_optimistic(root(3))?);
        assert!(fork_choice.is_optimistic(root(4))?);

        assert!(fork_choice.set_optimistic_to_valid(root(9)).is_err());

        Ok(())
    }

    #[test]
    fn invalid_branch_loses_the_head() -> Result<()> {
        let fork_choice = fork_choice()?;

        fork_choice.process_attestation(&[0, 1], root(3), 1)?;

        assert_eq!(head(&fork_choice, 3)?, root(3));
        assert_eq!(fork_choice.set_optimistic_to_invalid(root(2))?, 2);
        assert_eq!(head(&fork_choice, 3)?, root(4));
        assert_eq!(fork_choice.status(root(3))?, PayloadStatus::Invalid);
        assert_eq!(fork_choice.node_info(root(2)).map(|node| node.weight), Some(0));

        let error = fork_choice
            .insert_optimistic(block(3, 5, Some(3)))
            .expect_err("parent 3 is invalid");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::InvalidParent { .. }),
        ));

        Ok(())
    }

    #[test]
    fn removal_takes_descendants_along() -> Result<()> {
        let fork_choice = fork_choice()?;

        fork_choice.update_canonical(root(3))?;

        let removed = fork_choice.remove_nodes(&[root(2)])?;

        assert_eq!(removed, [root(2), root(3)]);
        assert_eq!(fork_choice.len(), 2);
        assert!(!fork_choice.is_canonical(root(3)));
        assert!(fork_choice.is_canonical(root(1)));
        assert_eq!(head(&fork_choice, 0)?, root(4));

        fork_choice.insert_optimistic(block(2, 5, Some(4)))?;

        assert_eq!(head(&fork_choice, 0)?, root(5));

        Ok(())
    }

    #[test]
    fn pruning_keeps_descendants_of_finalized_block() -> Result<()> {
        let fork_choice = fork_choice()?;

        fork_choice.process_attestation(&[0], root(3), 1)?;
        fork_choice.prune(root(2))?;

        assert_eq!(fork_choice.len(), 2);
        assert!(!fork_choice.has_node(root(1)));
        assert!(!fork_choice.has_node(root(4)));
        assert_eq!(fork_choice.head(0, root(2), &[BALANCE], 0)?, root(3));
        assert_eq!(
            fork_choice.node_info(root(2)).and_then(|node| node.parent_root),
            None,
        );
        assert!(fork_choice.prune(root(1)).is_err());

        Ok(())
    }

    #[test]
    fn ancestor_walks_back_to_slot() -> Result<()> {
        let fork_choice = fork_choice()?;

        assert_eq!(fork_choice.ancestor(root(3), 2)?, Some(root(3)));
        assert_eq!(fork_choice.ancestor(root(3), 1)?, Some(root(2)));
        assert_eq!(fork_choice.ancestor(root(3), 0)?, Some(root(1)));
        assert!(fork_choice.is_descendant(root(1), root(4)));
        assert!(!fork_choice.is_descendant(root(2), root(4)));

        Ok(())
    }

    #[test]
    fn forks_share_their_common_ancestor() -> Result<()> {
        let fork_choice = fork_choice()?;

        let forks = fork_choice.get_forks();

        assert_eq!(forks.len(), 2);
        assert_eq!(forks[0].roots, [root(3), root(2), root(1)]);
        assert_eq!(forks[1].roots, [root(4), root(1)]);
        assert_eq!(
            fork_choice.get_common_ancestor().map(|node| node.root),
            Some(root(1)),
        );

        fork_choice.insert_optimistic(block(3, 5, Some(3)))?;
        fork_choice.remove_nodes(&[root(4)])?;

        assert_eq!(
            fork_choice.get_common_ancestor().map(|node| node.root),
            Some(root(5)),
        );

        Ok(())
    }

    #[test]
    fn roots_key_ignores_insertion_order() -> Result<()> {
        let fork_choice = fork_choice()?;
        let other = ForkChoice::new(config(), 0, 0);

        other.insert_optimistic(block(0, 1, None))?;
        other.insert_optimistic(block(1, 4, Some(1)))?;
        other.insert_optimistic(block(1, 2, Some(1)))?;

        assert_ne!(fork_choice.roots_key(), other.roots_key());

        other.insert_optimistic(block(2, 3, Some(2)))?;

        assert_eq!(fork_choice.roots_key(), other.roots_key());

        Ok(())
    }
}
