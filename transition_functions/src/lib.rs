pub use crate::{
    error::Error,
    next_slot_cache::NextSlotCache,
    slot_processing::{process_slots, ProcessSlots},
    state_transition::{count_unique_spines, state_transition, StateRootPolicy, StateTransition},
};

pub mod block_processing;
pub mod epoch_processing;
pub mod genesis;

mod error;
mod next_slot_cache;
mod slot_processing;
mod state_transition;
