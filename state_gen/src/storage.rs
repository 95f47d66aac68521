use core::fmt::Display;
use std::sync::Arc;

use anyhow::Result;
use database::{Database, WriteBatch, BLOCK_SLOT_INDEX_PREFIX};
use derive_more::Display;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use types::{
    beacon_state::BeaconState,
    containers::{Checkpoint, SignedBeaconBlock},
    gwat::GwatSyncParam,
    primitives::{Epoch, Slot, H256},
    spines::Spines,
};

/// Typed access to everything the chain persists.
pub struct Storage {
    database: Database,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct StateSummary {
    pub slot: Slot,
    pub root: H256,
}

impl Storage {
    /// Wraps `database`, migrating its schema first.
    pub fn new(database: Database) -> Result<Self> {
        database::migrate_block_slot_index(&database)?;
        Ok(Self { database })
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            database: Database::in_memory(),
        }
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    pub fn save_block(&self, root: H256, block: &SignedBeaconBlock) -> Result<()> {
        let batch = WriteBatch::default()
            .put(serialize_key(BlockByRoot(root)), serialize_value(block)?)
            .put(block_slot_index_key(block.slot()), root.as_bytes());

        self.database.write_batch(batch)
    }

    pub fn save_blocks<'block>(
        &self,
        blocks: impl IntoIterator<Item = (H256, &'block SignedBeaconBlock)>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        for (root, block) in blocks {
            batch = batch
                .put(serialize_key(BlockByRoot(root)), serialize_value(block)?)
                .put(block_slot_index_key(block.slot()), root.as_bytes());
        }

        self.database.write_batch(batch)
    }

    pub fn block(&self, root: H256) -> Result<Option<Arc<SignedBeaconBlock>>> {
        Ok(get(&self.database, BlockByRoot(root))?.map(Arc::new))
    }

    pub fn has_block(&self, root: H256) -> Result<bool> {
        self.database.contains_key(serialize_key(BlockByRoot(root)))
    }

    pub fn delete_block(&self, root: H256) -> Result<()> {
        let Some(block) = self.block(root)? else {
            return Ok(());
        };

        let mut batch = WriteBatch::default().delete(serialize_key(BlockByRoot(root)));

        if self.block_root_by_slot(block.slot())? == Some(root) {
            batch = batch.delete(block_slot_index_key(block.slot()));
        }

        self.database.write_batch(batch)
    }

    /// Root of the latest block saved for `slot`.
    pub fn block_root_by_slot(&self, slot: Slot) -> Result<Option<H256>> {
        Ok(self
            .database
            .get(block_slot_index_key(slot))?
            .map(|bytes| H256::from_slice(&bytes)))
    }

    pub fn save_state(&self, root: H256, state: &BeaconState) -> Result<()> {
        let summary = StateSummary {
            slot: state.slot,
            root,
        };

        let batch = WriteBatch::default()
            .put(serialize_key(StateByBlockRoot(root)), serialize_value(state)?)
            .put(serialize_key(SummaryByBlockRoot(root)), serialize_value(summary)?);

        self.database.write_batch(batch)
    }

    pub fn state(&self, root: H256) -> Result<Option<Arc<BeaconState>>> {
        Ok(get(&self.database, StateByBlockRoot(root))?.map(Arc::new))
    }

    pub fn has_state(&self, root: H256) -> Result<bool> {
        self.database.contains_key(serialize_key(StateByBlockRoot(root)))
    }

    pub fn delete_state(&self, root: H256) -> Result<()> {
        self.database.delete(serialize_key(StateByBlockRoot(root)))
    }

    pub fn save_state_summary(&self, summary: StateSummary) -> Result<()> {
        save(&self.database, SummaryByBlockRoot(summary.root), summary)
    }

    pub fn state_summary(&self, root: H256) -> Result<Option<StateSummary>> {
        get(&self.database, SummaryByBlockRoot(root))
    }

    pub fn save_archived_point(&self, slot: Slot, root: H256, state: &BeaconState) -> Result<()> {
        let batch = WriteBatch::default()
            .put(serialize_key(ArchivedState(slot)), serialize_value(state)?)
            .put(serialize_key(ArchivedRoot(slot)), root.as_bytes());

        debug!(slot, ?root, "archived state saved");

        self.database.write_batch(batch)
    }

    pub fn archived_state(&self, slot: Slot) -> Result<Option<Arc<BeaconState>>> {
        Ok(get(&self.database, ArchivedState(slot))?.map(Arc::new))
    }

    pub fn has_archived_point(&self, slot: Slot) -> Result<bool> {
        self.database.contains_key(serialize_key(ArchivedState(slot)))
    }

    pub fn archived_root(&self, slot: Slot) -> Result<Option<H256>> {
        Ok(self
            .database
            .get(serialize_key(ArchivedRoot(slot)))?
            .map(|bytes| H256::from_slice(&bytes)))
    }

    pub fn save_genesis_block_root(&self, root: H256) -> Result<()> {
        self.database.put(GENESIS_BLOCK_ROOT_KEY, root.as_bytes())
    }

    pub fn genesis_block_root(&self) -> Result<Option<H256>> {
        Ok(self
            .database
            .get(GENESIS_BLOCK_ROOT_KEY)?
            .map(|bytes| H256::from_slice(&bytes)))
    }

    pub fn save_head_block_root(&self, root: H256) -> Result<()> {
        self.database.put(HEAD_BLOCK_ROOT_KEY, root.as_bytes())
    }

    pub fn head_block_root(&self) -> Result<Option<H256>> {
        Ok(self
            .database
            .get(HEAD_BLOCK_ROOT_KEY)?
            .map(|bytes| H256::from_slice(&bytes)))
    }

    pub fn save_justified_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        save(&self.database, JUSTIFIED_CHECKPOINT_KEY, checkpoint)
    }

    pub fn justified_checkpoint(&self) -> Result<Option<Checkpoint>> {
        get(&self.database, JUSTIFIED_CHECKPOINT_KEY)
    }

    pub fn save_finalized_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        save(&self.database, FINALIZED_CHECKPOINT_KEY, checkpoint)
    }

    pub fn finalized_checkpoint(&self) -> Result<Option<Checkpoint>> {
        get(&self.database, FINALIZED_CHECKPOINT_KEY)
    }

    pub fn save_last_validated_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        save(&self.database, LAST_VALIDATED_CHECKPOINT_KEY, checkpoint)
    }

    pub fn last_validated_checkpoint(&self) -> Result<Option<Checkpoint>> {
        get(&self.database, LAST_VALIDATED_CHECKPOINT_KEY)
    }

    pub fn save_deposit_trie(&self, trie: &impl Serialize) -> Result<()> {
        save(&self.database, DEPOSIT_TRIE_KEY, trie)
    }

    pub fn deposit_trie<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        get(&self.database, DEPOSIT_TRIE_KEY)
    }

    pub fn save_gwat_sync_param(&self, param: &GwatSyncParam) -> Result<()> {
        self.database.put(
            serialize_key(GwatSyncParamByEpoch(param.fin_epoch)),
            param.to_bytes()?,
        )
    }

    pub fn gwat_sync_param(&self, fin_epoch: Epoch) -> Result<Option<GwatSyncParam>> {
        self.database
            .get(serialize_key(GwatSyncParamByEpoch(fin_epoch)))?
            .map(|bytes| GwatSyncParam::from_bytes(&bytes))
            .transpose()
    }

    /// Saves `spines` under [`Spines::key`] and returns the key.
    pub fn save_spines(&self, spines: &Spines) -> Result<H256> {
        let key = spines.key();
        self.database
            .put(serialize_key(SpinesByKey(key)), spines.to_bytes())?;
        Ok(key)
    }

    pub fn spines(&self, key: H256) -> Result<Option<Spines>> {
        if key.is_zero() {
            return Ok(Some(Spines::default()));
        }

        self.database
            .get(serialize_key(SpinesByKey(key)))?
            .map(|bytes| Spines::from_bytes(&bytes))
            .transpose()
    }
}

const GENESIS_BLOCK_ROOT_KEY: &str = "genesis_block_root";
const HEAD_BLOCK_ROOT_KEY: &str = "head_block_root";
const JUSTIFIED_CHECKPOINT_KEY: &str = "justified_checkpoint";
const FINALIZED_CHECKPOINT_KEY: &str = "finalized_checkpoint";
const LAST_VALIDATED_CHECKPOINT_KEY: &str = "last_validated_checkpoint";
const DEPOSIT_TRIE_KEY: &str = "deposit_trie";

#[derive(Display)]
#[display("b{_0:x}")]
struct BlockByRoot(H256);

#[derive(Display)]
#[display("s{_0:x}")]
struct StateByBlockRoot(H256);

#[derive(Display)]
#[display("m{_0:x}")]
struct SummaryByBlockRoot(H256);

#[derive(Display)]
#[display("cstate{_0:020}")]
struct ArchivedState(Slot);

#[derive(Display)]
#[display("croot{_0:020}")]
struct ArchivedRoot(Slot);

#[derive(Display)]
#[display("gwat_sync_param{_0:020}")]
struct GwatSyncParamByEpoch(Epoch);

#[derive(Display)]
#[display("spines{_0:x}")]
struct SpinesByKey(H256);

fn block_slot_index_key(slot: Slot) -> Vec<u8> {
    [BLOCK_SLOT_INDEX_PREFIX, &slot.to_be_bytes()].concat()
}

fn save(database: &Database, key: impl Display, value: impl Serialize) -> Result<()> {
    database.put(serialize_key(key), serialize_value(value)?)
}

fn get<V: DeserializeOwned>(database: &Database, key: impl Display) -> Result<Option<V>> {
    database
        .get(serialize_key(key))?
        .map(|bytes| bincode::deserialize(&bytes))
        .transpose()
        .map_err(Into::into)
}

fn serialize_key(key: impl Display) -> String {
    key.to_string()
}

fn serialize_value(value: impl Serialize) -> Result<Vec<u8>> {
    bincode::serialize(&value).map_err(Into::into)
}
