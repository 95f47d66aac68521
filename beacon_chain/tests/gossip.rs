use std::sync::Arc;

use anyhow::Result;
use helper_functions::misc;
use helpers::Context;
use types::{
    containers::{
        AggregateAndProof, SignedAggregateAndProof, SignedBeaconBlock, SignedVoluntaryExit,
        SyncCommitteeContribution, SyncCommitteeMessage,
    },
    nonstandard::ValidationOutcome,
    primitives::{Slot, H256},
};

mod helpers;

#[tokio::test]
async fn gossip_block_outcomes() -> Result<()> {
    let context = Context::started().await?;
    let service = &context.service;

    let (block_1, state_1) = factory::empty_block(
        &context.config,
        Arc::clone(&context.genesis_state),
        1,
        H256::zero(),
    )?;

    let (block_2, _) = factory::empty_block(&context.config, state_1, 2, H256::zero())?;

    assert_eq!(
        service.validate_gossip_block(Arc::clone(&block_2)).await?,
        ValidationOutcome::Reject,
    );

    service.set_syncing(true);

    assert_eq!(
        service.validate_gossip_block(Arc::clone(&block_1)).await?,
        ValidationOutcome::Ignore,
    );

    service.set_syncing(false);

    assert_eq!(
        service.validate_gossip_block(Arc::clone(&block_1)).await?,
        ValidationOutcome::Accept,
    );

    assert_eq!(
        service.validate_gossip_block(block_1).await?,
        ValidationOutcome::Ignore,
    );

    assert_eq!(
        service.validate_gossip_block(block_2).await?,
        ValidationOutcome::Accept,
    );

    Ok(())
}

#[tokio::test]
async fn unaggregated_attestation_outcomes() -> Result<()> {
    let context = Context::started().await?;
    let config = &context.config;
    let service = &context.service;

    let (block, state) =
        factory::empty_block(config, Arc::clone(&context.genesis_state), 1, H256::zero())?;
    let root = context.import(&block).await?;

    let committee = factory::committee(config, &state, 1)?;
    let attestation = factory::singular_attestation(config, &state, 1, root, committee[0])?;
    let subnet_id = misc::compute_subnet_for_attestation(config, 1, 0);

    assert_eq!(
        service.validate_unaggregated_attestation(attestation.clone(), subnet_id + 1)?,
        ValidationOutcome::Reject,
    );

    let mut forged = attestation.clone();
    forged.signature = factory::singular_attestation(config, &state, 1, root, committee[1])?
        .signature;

    assert_eq!(
        service.validate_unaggregated_attestation(forged, subnet_id)?,
        ValidationOutcome::Reject,
    );

    assert_eq!(
        service.validate_unaggregated_attestation(attestation.clone(), subnet_id)?,
        ValidationOutcome::Accept,
    );

    assert_eq!(
        service.validate_unaggregated_attestation(attestation, subnet_id)?,
        ValidationOutcome::Ignore,
    );

    assert_eq!(service.pools().attestations.unaggregated_count(), 1);

    Ok(())
}

#[tokio::test]
async fn prevote_outcomes() -> Result<()> {
    let context = Context::started().await?;
    let config = &context.config;
    let service = &context.service;
    let state = &context.genesis_state;

    let prevote = factory::prevote(config, state, 1, vec![H256::repeat_byte(3)], &[0])?;
    let subnet_id = misc::compute_subnet_for_prevote(config, 1, 0);

    assert_eq!(
        service.validate_prevote(prevote.clone(), subnet_id + 1)?,
        ValidationOutcome::Reject,
    );

    assert_eq!(
        service.validate_prevote(prevote.clone(), subnet_id)?,
        ValidationOutcome::Accept,
    );

    assert_eq!(
        service.validate_prevote(prevote, subnet_id)?,
        ValidationOutcome::Ignore,
    );

    let aggregated = factory::prevote(config, state, 1, vec![H256::repeat_byte(3)], &[0, 1])?;

    assert_eq!(
        service.validate_prevote(aggregated, subnet_id)?,
        ValidationOutcome::Reject,
    );

    Ok(())
}

#[tokio::test]
async fn voluntary_exit_of_unknown_validator_is_rejected() -> Result<()> {
    let context = Context::started().await?;
    let validator_count = context.genesis_state.validators.len();

    let exit = factory::signed_voluntary_exit(
        &context.config,
        &context.genesis_state,
        validator_count.try_into()?,
        H256::zero(),
    )?;

    assert_eq!(
        context.service.validate_voluntary_exit(exit)?,
        ValidationOutcome::Reject,
    );

    assert_eq!(
        context
            .service
            .validate_voluntary_exit(SignedVoluntaryExit::default())?,
        ValidationOutcome::Reject,
    );

    Ok(())
}

#[tokio::test]
async fn sync_committee_message_outside_clock_disparity_is_ignored() -> Result<()> {
    let context = Context::started().await?;

    let message = SyncCommitteeMessage {
        slot: 1,
        ..SyncCommitteeMessage::default()
    };

    assert_eq!(
        context.service.validate_sync_committee_message(message)?,
        ValidationOutcome::Ignore,
    );

    Ok(())
}

#[tokio::test]
async fn gossip_block_with_invalid_signature_is_rejected() -> Result<()> {
    let context = Context::started().await?;
    let service = &context.service;

    let (block_1, state_1) = factory::empty_block(
        &context.config,
        Arc::clone(&context.genesis_state),
        1,
        H256::zero(),
    )?;

    let (block_2, _) = factory::empty_block(&context.config, state_1, 2, H256::zero())?;

    let forged = Arc::new(SignedBeaconBlock {
        signature: block_2.signature,
        ..SignedBeaconBlock::clone(&block_1)
    });

    assert_eq!(
        service.validate_gossip_block(forged).await?,
        ValidationOutcome::Reject,
    );

    assert_eq!(
        service.validate_gossip_block(block_1).await?,
        ValidationOutcome::Accept,
    );

    Ok(())
}

#[tokio::test]
async fn attestation_with_out_of_range_committee_index_is_rejected() -> Result<()> {
    let context = Context::started().await?;
    let config = &context.config;
    let service = &context.service;

    let (block, state) =
        factory::empty_block(config, Arc::clone(&context.genesis_state), 1, H256::zero())?;
    let root = context.import(&block).await?;

    let committee = factory::committee(config, &state, 1)?;
    let mut attestation = factory::singular_attestation(config, &state, 1, root, committee[0])?;

    attestation.data.index = u64::MAX;

    let subnet_id = misc::compute_subnet_for_attestation(config, 1, u64::MAX);

    assert_eq!(
        service.validate_unaggregated_attestation(attestation, subnet_id)?,
        ValidationOutcome::Reject,
    );

    assert_eq!(service.pools().attestations.unaggregated_count(), 0);

    Ok(())
}

#[tokio::test]
async fn aggregate_of_unknown_committee_is_rejected() -> Result<()> {
    let context = Context::started().await?;
    let config = &context.config;

    let (block, state) =
        factory::empty_block(config, Arc::clone(&context.genesis_state), 1, H256::zero())?;
    let root = context.import(&block).await?;

    let Some(mut aggregate) = factory::committee_attestation(config, &state, 1, root)? else {
        panic!("committee of slot 1 should not be empty");
    };

    aggregate.data.index = 1;

    let signed_aggregate_and_proof = SignedAggregateAndProof {
        message: AggregateAndProof {
            aggregator_index: factory::committee(config, &state, 1)?[0],
            aggregate,
            ..AggregateAndProof::default()
        },
        ..SignedAggregateAndProof::default()
    };

    assert_eq!(
        context
            .service
            .validate_aggregate_and_proof(signed_aggregate_and_proof)?,
        ValidationOutcome::Reject,
    );

    Ok(())
}

#[tokio::test]
async fn prevote_with_out_of_range_committee_index_is_rejected() -> Result<()> {
    let context = Context::started().await?;
    let config = &context.config;
    let state = &context.genesis_state;

    let mut prevote = factory::prevote(config, state, 1, vec![H256::repeat_byte(3)], &[0])?;

    prevote.data.index = u64::MAX;

    let subnet_id = misc::compute_subnet_for_prevote(config, 1, u64::MAX);

    assert_eq!(
        context.service.validate_prevote(prevote, subnet_id)?,
        ValidationOutcome::Reject,
    );

    assert!(context.service.pools().prevotes.is_empty());

    Ok(())
}

#[tokio::test]
async fn sync_committee_messages_from_far_future_slots_are_ignored() -> Result<()> {
    let context = Context::started().await?;
    let service = &context.service;

    for slot in [Slot::MAX - 1, Slot::MAX] {
        let message = SyncCommitteeMessage {
            slot,
            ..SyncCommitteeMessage::default()
        };

        let contribution = SyncCommitteeContribution {
            slot,
            ..SyncCommitteeContribution::default()
        };

        assert_eq!(
            service.validate_sync_committee_message(message)?,
            ValidationOutcome::Ignore,
        );

        assert_eq!(
            service.validate_sync_committee_contribution(&contribution),
            ValidationOutcome::Ignore,
        );
    }

    Ok(())
}
