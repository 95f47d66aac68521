use anyhow::Result;
use tracing::info;

use crate::{Database, WriteBatch};

pub const BLOCK_SLOT_INDEX_PREFIX: &[u8] = b"block_slot_index/";

const BLOCK_SLOT_INDEX_MIGRATION_KEY: &[u8] = b"migration/block_slot_index_0";

/// Rewrites block slot index keys from decimal strings to 8-byte big-endian slots.
///
/// Big-endian keys sort in slot order, which decimal strings do not. The migration records its
/// completion and does nothing when run again. Returns the number of keys rewritten.
pub fn migrate_block_slot_index(database: &Database) -> Result<usize> {
    if database.contains_key(BLOCK_SLOT_INDEX_MIGRATION_KEY)? {
        return Ok(0);
    }

    let mut batch = WriteBatch::default();
    let mut migrated = 0;

    for (key, value) in database.iterate_prefix(BLOCK_SLOT_INDEX_PREFIX)? {
        let Some(slot) = parse_decimal_slot(&key[BLOCK_SLOT_INDEX_PREFIX.len()..]) else {
            continue;
        };

        let new_key = block_slot_index_key(slot);

        // A big-endian entry for the slot written before the migration wins.
        if !database.contains_key(&new_key)? {
            batch = batch.put(new_key, value);
        }

        batch = batch.delete(key);
        migrated += 1;
    }

    database.write_batch(batch.put(BLOCK_SLOT_INDEX_MIGRATION_KEY, b""))?;

    if migrated > 0 {
        info!(migrated, "migrated block slot index keys to big-endian encoding");
    }

    Ok(migrated)
}

fn block_slot_index_key(slot: u64) -> Vec<u8> {
    [BLOCK_SLOT_INDEX_PREFIX, &slot.to_be_bytes()].concat()
}

fn parse_decimal_slot(suffix: &[u8]) -> Option<u64> {
    if suffix.is_empty() || !suffix.iter().all(u8::is_ascii_digit) {
        return None;
    }

    core::str::from_utf8(suffix).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn legacy_key(slot: u64) -> Vec<u8> {
        [BLOCK_SLOT_INDEX_PREFIX, slot.to_string().as_bytes()].concat()
    }

    #[test]
    fn migration_converts_keys_once() -> Result<()> {
        let database = Database::in_memory();

        database.put_batch([
            (legacy_key(9), vec![1_u8]),
            (legacy_key(10), vec![2_u8]),
            (block_slot_index_key(11), vec![3_u8]),
        ])?;

        assert_eq!(migrate_block_slot_index(&database)?, 2);

        let slots = database
            .iterate_prefix(BLOCK_SLOT_INDEX_PREFIX)?
            .map(|(key, value)| (key[BLOCK_SLOT_INDEX_PREFIX.len()..].to_vec(), value))
            .collect::<Vec<_>>();

        assert_eq!(
            slots,
            [
                (9_u64.to_be_bytes().to_vec(), vec![1]),
                (10_u64.to_be_bytes().to_vec(), vec![2]),
                (11_u64.to_be_bytes().to_vec(), vec![3]),
            ],
        );

        database.put(legacy_key(12), [4_u8])?;

        assert_eq!(migrate_block_slot_index(&database)?, 0);
        assert!(database.contains_key(legacy_key(12))?);

        Ok(())
    }

    #[test_case(b"123", Some(123))]
    #[test_case(b"", None)]
    #[test_case(b"12a", None)]
    #[test_case(&[0, 0, 0, 0, 0, 0, 0, 1], None)]
    fn decimal_suffixes_are_recognized(suffix: &[u8], expected: Option<u64>) {
        assert_eq!(parse_decimal_slot(suffix), expected);
    }
}
