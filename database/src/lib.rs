use core::ops::Bound;
use std::sync::Arc;

use anyhow::Result;
use im::OrdMap;
use parking_lot::Mutex;
use tap::Pipe as _;

pub use crate::migrations::{migrate_block_slot_index, BLOCK_SLOT_INDEX_PREFIX};

mod migrations;

// Values are cloned by `OrdMap` on every copy-on-write update and by every iterator,
// so they have to be cheap to clone.
type InMemoryMap = OrdMap<Arc<[u8]>, Arc<[u8]>>;

/// Ordered key-value store.
///
/// Writes replace the whole map at once, so readers and iterators always observe either all or
/// none of the pairs written by a single batch.
#[derive(Default)]
pub struct Database {
    map: Mutex<InMemoryMap>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
enum BatchOperation {
    Put(Arc<[u8]>, Arc<[u8]>),
    Delete(Arc<[u8]>),
}

/// Puts and deletes applied atomically by [`Database::write_batch`].
#[derive(Clone, Default, Debug)]
pub struct WriteBatch {
    operations: Vec<BatchOperation>,
}

impl WriteBatch {
    #[must_use]
    pub fn put(mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        self.operations
            .push(BatchOperation::Put(key.as_ref().into(), value.as_ref().into()));
        self
    }

    #[must_use]
    pub fn delete(mut self, key: impl AsRef<[u8]>) -> Self {
        self.operations.push(BatchOperation::Delete(key.as_ref().into()));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Database {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.map.lock().remove(key.as_ref());
        Ok(())
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.map.lock().contains_key(key.as_ref()))
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.map
            .lock()
            .get(key.as_ref())
            .map(|value| value.to_vec())
            .pipe(Ok)
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.put_batch(core::iter::once((key, value)))
    }

    pub fn put_batch(
        &self,
        pairs: impl IntoIterator<Item = (impl AsRef<[u8]>, impl AsRef<[u8]>)>,
    ) -> Result<()> {
        let batch = pairs
            .into_iter()
            .fold(WriteBatch::default(), |batch, (key, value)| batch.put(key, value));

        self.write_batch(batch)
    }

    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut map = self.map.lock();
        let mut new_map = map.clone();

        for operation in batch.operations {
            match operation {
                BatchOperation::Put(key, value) => {
                    new_map.insert(key, value);
                }
                BatchOperation::Delete(key) => {
                    new_map.remove(&key);
                }
            }
        }

        *map = new_map;

        Ok(())
    }

    /// Pairs whose keys start with `prefix` in ascending order.
    ///
    /// The pairs are read from a snapshot taken when the call is made.
    pub fn iterate_prefix(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)>> {
        let prefix = prefix.as_ref();
        let snapshot = self.map.lock().clone();

        let pairs = snapshot
            .range::<_, [u8]>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.to_vec(), value.to_vec()))
            .collect::<Vec<_>>();

        Ok(pairs.into_iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}
