pub use crate::{
    cache::{ForkChoiceCache, ForkChoiceCacheConfig},
    error::Error,
    fork_choice::{ForkChoice, ForkChoiceConfig},
    node::{BlockInfo, ForkInfo, NodeInfo},
    store::{Checkpoints, Store},
};

mod cache;
mod error;
mod fork_choice;
mod node;
mod proto_array;
mod store;
