pub mod beacon_state;
pub mod config;
pub mod consts;
pub mod containers;
pub mod gwat;
pub mod nonstandard;
pub mod primitives;
pub mod spines;
pub mod traits;

mod error;

pub use crate::error::Error;
