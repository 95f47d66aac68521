pub use crate::{
    execution_engine::{Error, ExecutionEngine, MockExecutionEngine, NullExecutionEngine},
    types::{
        ExecutionPayload, FinalizationResult, ForkChoiceStateV1, ForkChoiceUpdatedResponse,
        PayloadAttributes, PayloadId, PayloadStatusV1, PayloadValidationStatus,
    },
};

mod execution_engine;
mod types;
