pub use crate::{
    config::ChainServiceConfig,
    creators::CreatorsCache,
    dag_finalizer::DagFinalizer,
    deposit_trie::{DepositSnapshot, DepositTrie},
    error::Error,
    events::{
        BlockProcessedEvent, Event, EventChannels, FinalizedCheckpointEvent, InitializedEvent,
        NewHeadEvent, ReorgEvent, SyncedEvent, Topic, DEFAULT_MAX_EVENTS,
    },
    head::{Head, HeadCache},
    head_feed::HeadFeed,
    init_sync_cache::InitSyncBlockCache,
    service::{ChainService, ChainStarted, Pools},
    spine_cache::{FinalizedSpines, OptimisticSpines},
};

pub mod dag_finalizer;

mod block_pipeline;
mod config;
mod creators;
mod deposit_trie;
mod error;
mod events;
mod gossip;
mod head;
mod head_feed;
mod init_sync_cache;
mod service;
mod spine_cache;
