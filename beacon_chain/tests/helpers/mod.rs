// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use beacon_chain::{ChainService, ChainServiceConfig};
use execution_engine::MockExecutionEngine;
use state_gen::Storage;
use types::{
    beacon_state::BeaconState, config::Config, containers::SignedBeaconBlock, primitives::H256,
    traits::ContentHash as _,
};

pub type Service = ChainService<MockExecutionEngine>;

pub struct Context {
    pub config: Arc<Config>,
    pub engine: Arc<MockExecutionEngine>,
    pub storage: Arc<Storage>,
    pub service: Arc<Service>,
    pub genesis_state: Arc<BeaconState>,
    pub genesis_root: H256,
}

impl Context {
    pub fn new() -> Result<Self> {
        let config = Arc::new(Config::minimal());
        let engine = Arc::new(MockExecutionEngine::new());
        let storage = Arc::new(Storage::in_memory());
        let genesis_state = factory::min_genesis_state(&config)?;
        let genesis_root = factory::genesis_block(&genesis_state)
            .message
            .hash_tree_root();

        let service = ChainService::new(
            Arc::clone(&config),
            service_config(),
            Arc::clone(&engine),
            Arc::clone(&storage),
        )?;

        Ok(Self {
            config,
            engine,
            storage,
            service,
            genesis_state,
            genesis_root,
        })
    }

    pub async fn started() -> Result<Self> {
        let context = Self::new()?;

        context
            .service
            .start_from_genesis_state(Arc::clone(&context.genesis_state))
            .await?;

        Ok(context)
    }

    pub async fn import(&self, block: &Arc<SignedBeaconBlock>) -> Result<H256> {
        let root = block.message.hash_tree_root();
        self.service.on_block(Arc::clone(block), root).await?;
        Ok(root)
    }
}

pub fn service_config() -> ChainServiceConfig {
    ChainServiceConfig {
        slot_ticker: false,
        ..ChainServiceConfig::default()
    }
}

pub fn roots(blocks: &[Arc<SignedBeaconBlock>]) -> Vec<H256> {
    blocks
        .iter()
        .map(|block| block.message.hash_tree_root())
        .collect()
}
