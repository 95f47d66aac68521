use ethereum_types::{H160, H64};
use serde::{Deserialize, Serialize};
use types::{
    containers::Withdrawal,
    primitives::{ExecutionBlockHash, UnixSeconds, H256},
};

/// Response of `dag_finalize` and `dag_coordinatedState`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationResult {
    pub last_finalized_spine: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PayloadId(pub H64);

/// [`ForkchoiceStateV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#forkchoicestatev1)
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkChoiceStateV1 {
    pub head_block_hash: ExecutionBlockHash,
    pub safe_block_hash: ExecutionBlockHash,
    pub finalized_block_hash: ExecutionBlockHash,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
    pub timestamp: UnixSeconds,
    pub prev_randao: H256,
    pub suggested_fee_recipient: H160,
    pub withdrawals: Vec<Withdrawal>,
}

/// Execution layer block as exchanged with the engine.
///
/// `candidates` are the DAG tips the block builds on.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    pub parent_hash: ExecutionBlockHash,
    pub block_hash: ExecutionBlockHash,
    pub block_number: u64,
    pub timestamp: UnixSeconds,
    pub candidates: Vec<H256>,
    pub transactions: Vec<Vec<u8>>,
}

/// [`PayloadStatusV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#payloadstatusv1)
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatusV1 {
    pub status: PayloadValidationStatus,
    pub latest_valid_hash: Option<ExecutionBlockHash>,
    pub validation_error: Option<String>,
}

impl PayloadStatusV1 {
    #[must_use]
    pub const fn valid(latest_valid_hash: ExecutionBlockHash) -> Self {
        Self {
            status: PayloadValidationStatus::Valid,
            latest_valid_hash: Some(latest_valid_hash),
            validation_error: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadValidationStatus {
    Valid,
    Invalid,
    Syncing,
    Accepted,
    InvalidBlockHash,
}

impl PayloadValidationStatus {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub const fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid | Self::InvalidBlockHash)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkChoiceUpdatedResponse {
    pub payload_status: PayloadStatusV1,
    pub payload_id: Option<PayloadId>,
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use hex_literal::hex;
    use serde_json::json;

    use super::*;

    #[test]
    fn finalization_result_uses_camel_case() -> Result<()> {
        let result = FinalizationResult {
            last_finalized_spine: H256(hex!(
                "0101010101010101010101010101010101010101010101010101010101010101"
            )),
        };

        let json = serde_json::to_value(result)?;

        assert_eq!(
            json,
            json!({
                "lastFinalizedSpine": "0x0101010101010101010101010101010101010101010101010101010101010101",
            }),
        );

        assert_eq!(serde_json::from_value::<FinalizationResult>(json)?, result);

        Ok(())
    }

    #[test]
    fn payload_status_deserializes_engine_response() -> Result<()> {
        let status = serde_json::from_value::<PayloadStatusV1>(json!({
            "status": "INVALID_BLOCK_HASH",
            "latestValidHash": null,
            "validationError": "bad hash",
        }))?;

        assert!(status.status.is_invalid());
        assert_eq!(status.latest_valid_hash, None);
        assert_eq!(status.validation_error.as_deref(), Some("bad hash"));

        Ok(())
    }
}
