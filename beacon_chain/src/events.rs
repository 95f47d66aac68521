use std::sync::Arc;

use anyhow::Result;
use strum::AsRefStr;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::warn;
use types::{
    containers::{SignedBeaconBlock, SignedVoluntaryExit},
    primitives::{Epoch, Slot, UnixSeconds, H256},
};

pub const DEFAULT_MAX_EVENTS: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    BlockProcessed,
    ExitReceived,
    FinalizedCheckpoint,
    Initialized,
    NewHead,
    Reorg,
    Synced,
}

#[derive(Clone, Debug)]
pub enum Event {
    BlockProcessed(BlockProcessedEvent),
    ExitReceived(Box<SignedVoluntaryExit>),
    FinalizedCheckpoint(FinalizedCheckpointEvent),
    Initialized(InitializedEvent),
    NewHead(NewHeadEvent),
    Reorg(ReorgEvent),
    Synced(SyncedEvent),
}

impl Event {
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::BlockProcessed(_) => Topic::BlockProcessed,
            Self::ExitReceived(_) => Topic::ExitReceived,
            Self::FinalizedCheckpoint(_) => Topic::FinalizedCheckpoint,
            Self::Initialized(_) => Topic::Initialized,
            Self::NewHead(_) => Topic::NewHead,
            Self::Reorg(_) => Topic::Reorg,
            Self::Synced(_) => Topic::Synced,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InitializedEvent {
    pub start_time: UnixSeconds,
    pub genesis_validators_root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SyncedEvent {
    pub start_time: UnixSeconds,
}

#[derive(Clone, Debug)]
pub struct BlockProcessedEvent {
    pub slot: Slot,
    pub block_root: H256,
    pub signed_block: Arc<SignedBeaconBlock>,
    pub verified: bool,
    pub initial_sync: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NewHeadEvent {
    pub slot: Slot,
    pub block: H256,
    pub state: H256,
    pub epoch_transition: bool,
    pub previous_duty_dependent_root: H256,
    pub current_duty_dependent_root: H256,
    pub execution_optimistic: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReorgEvent {
    pub slot: Slot,
    pub depth: u64,
    pub old_head_block: H256,
    pub new_head_block: H256,
    pub old_head_state: H256,
    pub new_head_state: H256,
    pub epoch: Epoch,
    pub execution_optimistic: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FinalizedCheckpointEvent {
    pub epoch: Epoch,
    pub block: H256,
    pub state: H256,
    pub execution_optimistic: bool,
    pub finalization_slot: Slot,
}

/// One broadcast channel per topic. Sending never blocks and succeeds without subscribers.
#[derive(Clone, Debug)]
pub struct EventChannels {
    pub blocks_processed: Sender<Event>,
    pub exits_received: Sender<Event>,
    pub finalized_checkpoints: Sender<Event>,
    pub initialized: Sender<Event>,
    pub new_heads: Sender<Event>,
    pub reorgs: Sender<Event>,
    pub synced: Sender<Event>,
}

impl Default for EventChannels {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

impl EventChannels {
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            blocks_processed: broadcast::channel(max_events).0,
            exits_received: broadcast::channel(max_events).0,
            finalized_checkpoints: broadcast::channel(max_events).0,
            initialized: broadcast::channel(max_events).0,
            new_heads: broadcast::channel(max_events).0,
            reorgs: broadcast::channel(max_events).0,
            synced: broadcast::channel(max_events).0,
        }
    }

    #[must_use]
    pub fn receiver_for(&self, topic: Topic) -> Receiver<Event> {
        self.sender_for(topic).subscribe()
    }

    pub fn send(&self, event: Event) {
        let topic = event.topic();

        if let Err(error) = self.send_internal(event) {
            warn!(topic = topic.as_ref(), "unable to send event: {error}");
        }
    }

    pub fn send_initialized_event(&self, start_time: UnixSeconds, genesis_validators_root: H256) {
        self.send(Event::Initialized(InitializedEvent {
            start_time,
            genesis_validators_root,
        }));
    }

    pub fn send_synced_event(&self, start_time: UnixSeconds) {
        self.send(Event::Synced(SyncedEvent { start_time }));
    }

    pub fn send_block_processed_event(
        &self,
        block_root: H256,
        signed_block: Arc<SignedBeaconBlock>,
        initial_sync: bool,
    ) {
        self.send(Event::BlockProcessed(BlockProcessedEvent {
            slot: signed_block.slot(),
            block_root,
            signed_block,
            verified: true,
            initial_sync,
        }));
    }

    pub fn send_exit_received_event(&self, exit: SignedVoluntaryExit) {
        self.send(Event::ExitReceived(Box::new(exit)));
    }

    fn sender_for(&self, topic: Topic) -> &Sender<Event> {
        match topic {
            Topic::BlockProcessed => &self.blocks_processed,
            Topic::ExitReceived => &self.exits_received,
            Topic::FinalizedCheckpoint => &self.finalized_checkpoints,
            Topic::Initialized => &self.initialized,
            Topic::NewHead => &self.new_heads,
            Topic::Reorg => &self.reorgs,
            Topic::Synced => &self.synced,
        }
    }

    fn send_internal(&self, event: Event) -> Result<()> {
        let sender = self.sender_for(event.topic());

        if sender.receiver_count() > 0 {
            sender.send(event)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sending_without_subscribers_does_not_fail() {
        let channels = EventChannels::new(4);

        channels.send_synced_event(7);
        channels.send_initialized_event(7, H256::repeat_byte(1));
    }

    #[tokio::test]
    async fn events_reach_subscribers_of_their_topic_only() -> Result<()> {
        let channels = EventChannels::new(4);
        let mut synced = channels.receiver_for(Topic::Synced);
        let mut initialized = channels.receiver_for(Topic::Initialized);

        channels.send_synced_event(9);

        assert!(matches!(
            synced.recv().await?,
            Event::Synced(SyncedEvent { start_time: 9 }),
        ));

        assert!(initialized.try_recv().is_err());

        Ok(())
    }
}
