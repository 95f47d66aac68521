use std::collections::{HashMap, HashSet};

use anyhow::{bail, ensure, Result};
use tap::TryConv as _;
use types::{
    consts::GENESIS_EPOCH,
    nonstandard::PayloadStatus,
    primitives::{Epoch, Gwei, Slot, H256},
};

use crate::{
    error::Error,
    node::{BlockInfo, ForkInfo, Node, NodeInfo},
};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ProposerBoost {
    pub root: H256,
    pub score: Gwei,
}

/// Blocks stored in insertion order. A parent always precedes its children.
#[derive(Clone, Default, Debug)]
pub struct ProtoArray {
    justified_epoch: Epoch,
    finalized_epoch: Epoch,
    nodes: Vec<Node>,
    indices: HashMap<H256, usize>,
    previous_boost: ProposerBoost,
}

impl ProtoArray {
    pub fn new(justified_epoch: Epoch, finalized_epoch: Epoch) -> Self {
        Self {
            justified_epoch,
            finalized_epoch,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub const fn justified_epoch(&self) -> Epoch {
        self.justified_epoch
    }

    pub const fn finalized_epoch(&self) -> Epoch {
        self.finalized_epoch
    }

    pub const fn indices(&self) -> &HashMap<H256, usize> {
        &self.indices
    }

    pub fn contains(&self, root: H256) -> bool {
        self.indices.contains_key(&root)
    }

    pub fn node(&self, root: H256) -> Option<&Node> {
        let index = self.indices.get(&root).copied()?;
        self.nodes.get(index)
    }

    pub fn node_info(&self, root: H256) -> Option<NodeInfo> {
        let node = self.node(root)?;

        let parent_root = node
            .parent
            .and_then(|parent| self.nodes.get(parent))
            .map(|parent| parent.root);

        Some(NodeInfo {
            slot: node.slot,
            root: node.root,
            parent_root,
            justified_epoch: node.justified_epoch,
            finalized_epoch: node.finalized_epoch,
            weight: node.weight,
            status: node.status,
            spine_data: node.spine_data.clone(),
            block_voting: node.block_voting.clone(),
        })
    }

    pub fn insert(&mut self, block: BlockInfo) -> Result<()> {
        if self.contains(block.root) {
            return Ok(());
        }

        let parent = match self.indices.get(&block.parent_root).copied() {
            Some(parent_index) => {
                ensure!(
                    !self.node_at(parent_index)?.status.is_invalid(),
                    Error::InvalidParent {
                        root: block.root,
                        parent_root: block.parent_root,
                    },
                );

                Some(parent_index)
            }
            None => {
                // The first node may be an anchor whose parent was never known.
                ensure!(
                    block.parent_root.is_zero() || self.nodes.is_empty(),
                    Error::UnknownParent {
                        root: block.root,
                        parent_root: block.parent_root,
                    },
                );

                None
            }
        };

        let index = self.nodes.len();

        self.indices.insert(block.root, index);

        self.nodes.push(Node {
            slot: block.slot,
            root: block.root,
            parent,
            justified_epoch: block.justified_checkpoint.epoch,
            finalized_epoch: block.finalized_checkpoint.epoch,
            justified_root: block.justified_checkpoint.root,
            finalized_root: block.finalized_checkpoint.root,
            weight: 0,
            best_child: None,
            best_descendant: None,
            status: PayloadStatus::Syncing,
            spine_data: block.spine_data,
            block_voting: block.block_voting,
        });

        if let Some(parent_index) = parent {
            self.maybe_update_best_child_and_descendant(parent_index, index)?;
        }

        Ok(())
    }

    /// Applies vote deltas and the proposer boost, then refreshes best children.
    ///
    /// `deltas` must have one entry per node.
    pub fn apply_score_changes(
        &mut self,
        mut deltas: Vec<i64>,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
        new_boost: ProposerBoost,
    ) -> Result<()> {
        ensure!(
            deltas.len() == self.nodes.len(),
            Error::InvalidNodeIndex {
                index: deltas.len(),
            },
        );

        self.justified_epoch = justified_epoch;
        self.finalized_epoch = finalized_epoch;

        for index in (0..self.nodes.len()).rev() {
            let node = &mut self.nodes[index];
            let invalid = node.status.is_invalid();

            // Invalid nodes shed all of their weight.
            let mut delta = if invalid {
                0_i64
                    .checked_sub(node.weight.try_conv::<i64>()?)
                    .ok_or(Error::DeltaOverflow { index })?
            } else {
                deltas[index]
            };

            if !invalid && !self.previous_boost.root.is_zero() && self.previous_boost.root == node.root
            {
                delta = delta
                    .checked_sub(self.previous_boost.score.try_conv::<i64>()?)
                    .ok_or(Error::DeltaOverflow { index })?;
            }

            if !invalid && !new_boost.root.is_zero() && new_boost.root == node.root {
                delta = delta
                    .checked_add(new_boost.score.try_conv::<i64>()?)
                    .ok_or(Error::DeltaOverflow { index })?;
            }

            node.weight = apply_delta(node.weight, delta).ok_or(Error::DeltaOverflow { index })?;

            if let Some(parent) = node.parent {
                let parent_delta = deltas
                    .get_mut(parent)
                    .ok_or(Error::InvalidNodeIndex { index: parent })?;

                *parent_delta = parent_delta
                    .checked_add(delta)
                    .ok_or(Error::DeltaOverflow { index: parent })?;
            }
        }

        self.previous_boost = new_boost;

        for index in (0..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[index].parent {
                self.maybe_update_best_child_and_descendant(parent, index)?;
            }
        }

        Ok(())
    }

    pub fn find_head(&self, justified_root: H256) -> Result<H256> {
        let justified_index = self
            .indices
            .get(&justified_root)
            .copied()
            .ok_or(Error::UnknownNodeRoot {
                root: justified_root,
            })?;

        let justified_node = self.node_at(justified_index)?;

        ensure!(
            !justified_node.status.is_invalid(),
            Error::InvalidJustifiedNode { justified_root },
        );

        let best_node = self.node_at(justified_node.best_descendant.unwrap_or(justified_index))?;

        ensure!(
            self.node_is_viable_for_head(best_node),
            Error::InvalidBestNode {
                justified_root,
                best_root: best_node.root,
            },
        );

        Ok(best_node.root)
    }

    /// Drops every node that does not descend from `finalized_root`.
    ///
    /// Returns the roots of the removed nodes.
    pub fn prune(&mut self, finalized_root: H256) -> Result<Vec<H256>> {
        let finalized_index = self
            .indices
            .get(&finalized_root)
            .copied()
            .ok_or(Error::UnknownNodeRoot {
                root: finalized_root,
            })?;

        let mut keep = vec![false; self.nodes.len()];

        keep[finalized_index] = true;

        for index in finalized_index + 1..self.nodes.len() {
            if let Some(parent) = self.nodes[index].parent {
                keep[index] = keep[parent];
            }
        }

        self.retain(&keep)
    }

    /// Removes the nodes in `roots` together with all of their descendants.
    ///
    /// Unknown roots are ignored. Returns the roots of the removed nodes.
    pub fn remove(&mut self, roots: &HashSet<H256>) -> Result<Vec<H256>> {
        let mut removed = vec![false; self.nodes.len()];

        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];

            removed[index] =
                roots.contains(&node.root) || node.parent.is_some_and(|parent| removed[parent]);
        }

        let keep = removed.into_iter().map(|removed| !removed).collect::<Vec<_>>();

        self.retain(&keep)
    }

    pub fn set_valid(&mut self, root: H256) -> Result<()> {
        let mut index = Some(
            self.indices
                .get(&root)
                .copied()
                .ok_or(Error::UnknownNodeRoot { root })?,
        );

        while let Some(current) = index {
            let node = self
                .nodes
                .get_mut(current)
                .ok_or(Error::InvalidNodeIndex { index: current })?;

            match node.status {
                PayloadStatus::Syncing => {
                    node.status = PayloadStatus::Valid;
                    index = node.parent;
                }
                PayloadStatus::Valid => break,
                PayloadStatus::Invalid => bail!(Error::InvalidAncestorOfValidBlock { root }),
            }
        }

        Ok(())
    }

    /// Marks `root` and its descendants invalid. Returns the number of nodes marked.
    pub fn set_invalid(&mut self, root: H256) -> Result<usize> {
        let start = self
            .indices
            .get(&root)
            .copied()
            .ok_or(Error::UnknownNodeRoot { root })?;

        let mut invalid = vec![false; self.nodes.len()];
        let mut count = 0;

        for index in start..self.nodes.len() {
            let node = &mut self.nodes[index];

            if index == start || node.parent.is_some_and(|parent| invalid[parent]) {
                invalid[index] = true;
                node.status = PayloadStatus::Invalid;
                count += 1;
            }
        }

        let points_to_invalid = |index: Option<usize>| index.is_some_and(|index| invalid[index]);

        for node in &mut self.nodes {
            if points_to_invalid(node.best_child) || points_to_invalid(node.best_descendant) {
                node.best_child = None;
                node.best_descendant = None;
            }
        }

        Ok(count)
    }

    /// The root of the latest block at or before `slot` in the chain ending at `root`.
    pub fn ancestor(&self, root: H256, slot: Slot) -> Result<Option<H256>> {
        let index = self
            .indices
            .get(&root)
            .copied()
            .ok_or(Error::UnknownNodeRoot { root })?;

        Ok(self
            .chain(index)
            .find(|node| node.slot <= slot)
            .map(|node| node.root))
    }

    pub fn is_descendant(&self, ancestor_root: H256, root: H256) -> bool {
        let (Some(ancestor), Some(index)) = (self.node(ancestor_root), self.indices.get(&root))
        else {
            return false;
        };

        self.chain(*index)
            .take_while(|node| node.slot >= ancestor.slot)
            .any(|node| node.root == ancestor_root)
    }

    /// Roots from `root` back to the oldest node, `root` included.
    pub fn chain_roots(&self, root: H256) -> Result<Vec<H256>> {
        let index = self
            .indices
            .get(&root)
            .copied()
            .ok_or(Error::UnknownNodeRoot { root })?;

        Ok(self.chain(index).map(|node| node.root).collect())
    }

    pub fn forks(&self) -> Vec<ForkInfo> {
        let mut has_child = vec![false; self.nodes.len()];

        for node in &self.nodes {
            if let Some(parent) = node.parent {
                has_child[parent] = true;
            }
        }

        has_child
            .into_iter()
            .enumerate()
            .filter(|(_, has_child)| !has_child)
            .map(|(index, _)| {
                let tip = &self.nodes[index];

                ForkInfo {
                    tip_root: tip.root,
                    tip_slot: tip.slot,
                    roots: self.chain(index).map(|node| node.root).collect(),
                }
            })
            .collect()
    }

    fn chain(&self, index: usize) -> impl Iterator<Item = &Node> {
        core::iter::successors(self.nodes.get(index), |node| {
            node.parent.and_then(|parent| self.nodes.get(parent))
        })
    }

    fn retain(&mut self, keep: &[bool]) -> Result<Vec<H256>> {
        let mut new_indices = Vec::with_capacity(self.nodes.len());
        let mut next_index = 0;

        for kept in keep.iter().copied() {
            if kept {
                new_indices.push(Some(next_index));
                next_index += 1;
            } else {
                new_indices.push(None);
            }
        }

        let remap = |index: Option<usize>| index.and_then(|index| new_indices[index]);

        let mut removed = vec![];
        let mut nodes = Vec::with_capacity(next_index);

        for (mut node, kept) in core::mem::take(&mut self.nodes).into_iter().zip(keep) {
            if *kept {
                node.parent = remap(node.parent);
                node.best_child = remap(node.best_child);
                node.best_descendant = remap(node.best_descendant);
                nodes.push(node);
            } else {
                removed.push(node.root);
            }
        }

        self.indices = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.root, index))
            .collect();

        self.nodes = nodes;

        self.refresh_best_descendants()?;

        Ok(removed)
    }

    fn refresh_best_descendants(&mut self) -> Result<()> {
        for node in &mut self.nodes {
            node.best_child = None;
            node.best_descendant = None;
        }

        for index in (0..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[index].parent {
                self.maybe_update_best_child_and_descendant(parent, index)?;
            }
        }

        Ok(())
    }

    fn maybe_update_best_child_and_descendant(
        &mut self,
        parent_index: usize,
        child_index: usize,
    ) -> Result<()> {
        let child = self.node_at(child_index)?;
        let parent = self.node_at(parent_index)?;

        let child_leads_to_viable_head = self.node_leads_to_viable_head(child)?;

        let change_to_child = (
            Some(child_index),
            Some(child.best_descendant.unwrap_or(child_index)),
        );
        let change_to_none = (None, None);
        let no_change = (parent.best_child, parent.best_descendant);

        let (best_child, best_descendant) = match parent.best_child {
            Some(best_child_index) if best_child_index == child_index => {
                if child_leads_to_viable_head {
                    change_to_child
                } else {
                    change_to_none
                }
            }
            Some(best_child_index) => {
                let best_child = self.node_at(best_child_index)?;
                let best_child_leads_to_viable_head = self.node_leads_to_viable_head(best_child)?;

                if child_leads_to_viable_head && !best_child_leads_to_viable_head {
                    change_to_child
                } else if !child_leads_to_viable_head && best_child_leads_to_viable_head {
                    no_change
                } else if child.weight == best_child.weight {
                    // Equal weights go to the higher root.
                    if child.root >= best_child.root {
                        change_to_child
                    } else {
                        no_change
                    }
                } else if child.weight > best_child.weight {
                    change_to_child
                } else {
                    no_change
                }
            }
            None => {
                if child_leads_to_viable_head {
                    change_to_child
                } else {
                    no_change
                }
            }
        };

        let parent = self
            .nodes
            .get_mut(parent_index)
            .ok_or(Error::InvalidNodeIndex {
                index: parent_index,
            })?;

        parent.best_child = best_child;
        parent.best_descendant = best_descendant;

        Ok(())
    }

    fn node_leads_to_viable_head(&self, node: &Node) -> Result<bool> {
        let best_descendant_is_viable = match node.best_descendant {
            Some(index) => self.node_is_viable_for_head(self.node_at(index)?),
            None => false,
        };

        Ok(best_descendant_is_viable || self.node_is_viable_for_head(node))
    }

    fn node_is_viable_for_head(&self, node: &Node) -> bool {
        if node.status.is_invalid() {
            return false;
        }

        (node.justified_epoch == self.justified_epoch || self.justified_epoch == GENESIS_EPOCH)
            && (node.finalized_epoch == self.finalized_epoch
                || self.finalized_epoch == GENESIS_EPOCH)
    }

    fn node_at(&self, index: usize) -> Result<&Node> {
        self.nodes
            .get(index)
            .ok_or_else(|| Error::InvalidNodeIndex { index }.into())
    }
}

fn apply_delta(weight: Gwei, delta: i64) -> Option<Gwei> {
    if delta < 0 {
        weight.checked_sub(delta.unsigned_abs())
    } else {
        weight.checked_add(delta.unsigned_abs())
    }
}
