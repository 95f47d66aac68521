use std::sync::Arc;

use anyhow::Result;
use helpers::Context;
use types::{containers::BlockSpineData, nonstandard::PayloadStatus, primitives::H256};

mod helpers;

#[tokio::test]
async fn blocks_stay_optimistic_while_engine_is_unavailable() -> Result<()> {
    let context = Context::started().await?;
    let service = &context.service;

    context.engine.set_available(false);

    let (block_1, state_1) = factory::empty_block(
        &context.config,
        Arc::clone(&context.genesis_state),
        1,
        H256::zero(),
    )?;

    let (block_2, _) = factory::empty_block(&context.config, state_1, 2, H256::zero())?;

    let root_1 = context.import(&block_1).await?;

    assert!(service.is_optimistic(root_1)?);
    assert!(!service.is_optimistic(context.genesis_root)?);

    service.set_optimistic_to_valid(root_1)?;

    assert!(!service.is_optimistic(root_1)?);

    let root_2 = context.import(&block_2).await?;

    assert!(service.is_optimistic(root_2)?);
    assert_eq!(service.head_root(), root_2);

    service.remove_invalid_block_and_state(&[root_2]).await?;

    assert!(!service.fork_choice().has_node(root_2));
    assert!(!context.storage.has_block(root_2)?);
    assert!(!service.state_gen().has_state(root_2)?);
    assert_eq!(service.head_root(), root_1);

    Ok(())
}

#[tokio::test]
async fn engine_verdict_on_spines_sets_payload_status() -> Result<()> {
    let context = Context::started().await?;
    let service = &context.service;
    let invalid_spine = H256::repeat_byte(0xbb);

    context.engine.set_invalid_spines(vec![invalid_spine]);

    let (valid_block, _) = factory::block_with_spines(
        &context.config,
        Arc::clone(&context.genesis_state),
        1,
        BlockSpineData {
            spines: vec![H256::repeat_byte(0xaa)],
            ..BlockSpineData::default()
        },
    )?;

    let (invalid_block, _) = factory::block_with_spines(
        &context.config,
        Arc::clone(&context.genesis_state),
        2,
        BlockSpineData {
            spines: vec![invalid_spine],
            ..BlockSpineData::default()
        },
    )?;

    let valid_root = context.import(&valid_block).await?;
    let invalid_root = context.import(&invalid_block).await?;

    let fork_choice = service.fork_choice();

    assert_eq!(fork_choice.status(valid_root)?, PayloadStatus::Valid);
    assert_eq!(fork_choice.status(invalid_root)?, PayloadStatus::Invalid);
    assert_eq!(service.head_root(), valid_root);
    assert_eq!(context.engine.validate_calls(), 2);

    Ok(())
}
