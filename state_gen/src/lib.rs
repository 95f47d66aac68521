pub use crate::{
    error::Error,
    replay_cache::{InProgressGuard, ReplayCache},
    state_gen::{StateGen, StateGenConfig},
    storage::{StateSummary, Storage},
};

mod caches;
mod error;
mod replay_cache;
mod state_gen;
mod storage;
