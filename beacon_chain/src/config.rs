use core::{
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use derivative::Derivative;
use fork_choice_store::ForkChoiceCacheConfig;
use nonzero_ext::nonzero;
use state_gen::StateGenConfig;

use crate::events::DEFAULT_MAX_EVENTS;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct ChainServiceConfig {
    /// Blocks arriving within `seconds_per_slot / proposer_boost_denominator` of their slot start
    /// receive the proposer boost.
    #[derivative(Default(value = "nonzero!(3_u64)"))]
    pub proposer_boost_denominator: NonZeroU64,
    #[derivative(Default(value = "Duration::from_secs(5)"))]
    pub next_slot_cache_deadline: Duration,
    #[derivative(Default(value = "Duration::from_secs(20)"))]
    pub deposit_trie_deadline: Duration,
    #[derivative(Default(value = "nonzero!(16_usize)"))]
    pub head_feed_capacity: NonZeroUsize,
    /// Check exits and withdrawals in blocks from the delegating stake fork onward against the
    /// operation pool validators.
    #[derivative(Default(value = "true"))]
    pub verify_operations_against_pools: bool,
    /// Number of blocks kept in memory during initial sync before they are written out.
    #[derivative(Default(value = "nonzero!(64_usize)"))]
    pub init_sync_flush_threshold: NonZeroUsize,
    #[derivative(Default(value = "DEFAULT_MAX_EVENTS"))]
    pub max_events: usize,
    #[derivative(Default(value = "true"))]
    pub slot_ticker: bool,
    pub state_gen: StateGenConfig,
    pub fork_choice_cache: ForkChoiceCacheConfig,
}
