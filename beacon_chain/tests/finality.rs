use std::sync::Arc;

use anyhow::Result;
use beacon_chain::{Event, Topic};
use helpers::Context;

mod helpers;

#[tokio::test]
async fn full_blocks_finalize_and_prune_fork_choice() -> Result<()> {
    let context = Context::started().await?;
    let mut finalized_events = context
        .service
        .event_channels()
        .receiver_for(Topic::FinalizedCheckpoint);

    let (blocks, post_state) = factory::full_blocks_up_to_epoch(
        &context.config,
        Arc::clone(&context.genesis_state),
        5,
    )?;

    let mut last_finalized_epoch = 0;

    for block in &blocks {
        let root = context.import(block).await?;

        assert_eq!(context.service.head_root(), root);

        let finalized_epoch = context.service.finalized_checkpoint().epoch;
        assert!(finalized_epoch >= last_finalized_epoch);
        last_finalized_epoch = finalized_epoch;
    }

    let finalized = context.service.finalized_checkpoint();

    assert_eq!(finalized.epoch, post_state.finalized_checkpoint.epoch);
    assert!(finalized.epoch >= 2);
    assert_eq!(context.storage.finalized_checkpoint()?, Some(finalized));
    assert_eq!(context.storage.last_validated_checkpoint()?, Some(finalized));

    let fork_choice = context.service.fork_choice();

    assert!(!fork_choice.has_node(context.genesis_root));
    assert!(fork_choice.has_node(finalized.root));
    assert!(fork_choice.len() < blocks.len());

    let Event::FinalizedCheckpoint(event) = finalized_events.recv().await? else {
        panic!("event of unexpected topic received");
    };

    assert!(event.epoch >= 1);
    assert!(!event.execution_optimistic);

    Ok(())
}

#[tokio::test]
async fn justified_checkpoint_never_moves_back() -> Result<()> {
    let context = Context::started().await?;

    let (blocks, _) = factory::full_blocks_up_to_epoch(
        &context.config,
        Arc::clone(&context.genesis_state),
        4,
    )?;

    let mut last_justified_epoch = 0;

    for block in &blocks {
        context.import(block).await?;

        let justified = context.service.justified_checkpoint();
        let finalized = context.service.finalized_checkpoint();

        assert!(justified.epoch >= last_justified_epoch);
        assert!(justified.epoch >= finalized.epoch);

        last_justified_epoch = justified.epoch;
    }

    assert!(last_justified_epoch >= 2);

    Ok(())
}
