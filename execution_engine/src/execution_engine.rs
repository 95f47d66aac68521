#![expect(clippy::module_name_repetitions)]

use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use types::{
    gwat::FinalizationParams,
    primitives::{Slot, H256},
};

use crate::types::{
    ExecutionPayload, FinalizationResult, ForkChoiceStateV1, ForkChoiceUpdatedResponse,
    PayloadAttributes, PayloadId, PayloadStatusV1,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("execution engine is unavailable")]
    Unavailable,
    #[error("unknown payload {payload_id:?}")]
    UnknownPayload { payload_id: PayloadId },
}

/// RPC methods of the DAG execution engine consumed by the beacon chain.
///
/// Transport concerns (JSON-RPC framing, authentication, timeouts) belong to implementors.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    const IS_NULL: bool;

    /// Finalizes `params.spines` on top of `params.base_spine`.
    async fn dag_finalize(&self, params: FinalizationParams) -> Result<FinalizationResult>;

    async fn dag_validate_spines(&self, spines: Vec<H256>) -> Result<bool>;

    /// Candidate spine sequences the engine would build on `base_spine`.
    async fn dag_get_optimistic_spines(&self, base_spine: H256) -> Result<Vec<Vec<H256>>>;

    async fn dag_get_candidates(&self, slot: Slot) -> Result<Vec<H256>>;

    async fn dag_coordinated_state(&self) -> Result<FinalizationResult>;

    async fn forkchoice_updated(
        &self,
        state: ForkChoiceStateV1,
        attributes: Option<PayloadAttributes>,
    ) -> Result<ForkChoiceUpdatedResponse>;

    async fn new_payload(&self, payload: ExecutionPayload) -> Result<PayloadStatusV1>;

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayload>;
}

#[async_trait]
impl<E: ExecutionEngine> ExecutionEngine for Arc<E> {
    const IS_NULL: bool = E::IS_NULL;

    async fn dag_finalize(&self, params: FinalizationParams) -> Result<FinalizationResult> {
        self.as_ref().dag_finalize(params).await
    }

    async fn dag_validate_spines(&self, spines: Vec<H256>) -> Result<bool> {
        self.as_ref().dag_validate_spines(spines).await
    }

    async fn dag_get_optimistic_spines(&self, base_spine: H256) -> Result<Vec<Vec<H256>>> {
        self.as_ref().dag_get_optimistic_spines(base_spine).await
    }

    async fn dag_get_candidates(&self, slot: Slot) -> Result<Vec<H256>> {
        self.as_ref().dag_get_candidates(slot).await
    }

    async fn dag_coordinated_state(&self) -> Result<FinalizationResult> {
        self.as_ref().dag_coordinated_state().await
    }

    async fn forkchoice_updated(
        &self,
        state: ForkChoiceStateV1,
        attributes: Option<PayloadAttributes>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        self.as_ref().forkchoice_updated(state, attributes).await
    }

    async fn new_payload(&self, payload: ExecutionPayload) -> Result<PayloadStatusV1> {
        self.as_ref().new_payload(payload).await
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayload> {
        self.as_ref().get_payload(payload_id).await
    }
}

/// Accepts everything and finalizes every spine it is offered.
#[derive(Clone, Copy, Default)]
pub struct NullExecutionEngine;

#[async_trait]
impl ExecutionEngine for NullExecutionEngine {
    const IS_NULL: bool = true;

    async fn dag_finalize(&self, params: FinalizationParams) -> Result<FinalizationResult> {
        let last_finalized_spine = params
            .spines
            .last()
            .copied()
            .or(params.base_spine)
            .unwrap_or_default();

        Ok(FinalizationResult {
            last_finalized_spine,
        })
    }

    async fn dag_validate_spines(&self, _spines: Vec<H256>) -> Result<bool> {
        Ok(true)
    }

    async fn dag_get_optimistic_spines(&self, _base_spine: H256) -> Result<Vec<Vec<H256>>> {
        Ok(vec![])
    }

    async fn dag_get_candidates(&self, _slot: Slot) -> Result<Vec<H256>> {
        Ok(vec![])
    }

    async fn dag_coordinated_state(&self) -> Result<FinalizationResult> {
        Ok(FinalizationResult::default())
    }

    async fn forkchoice_updated(
        &self,
        state: ForkChoiceStateV1,
        _attributes: Option<PayloadAttributes>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        Ok(ForkChoiceUpdatedResponse {
            payload_status: PayloadStatusV1::valid(state.head_block_hash),
            payload_id: None,
        })
    }

    async fn new_payload(&self, payload: ExecutionPayload) -> Result<PayloadStatusV1> {
        Ok(PayloadStatusV1::valid(payload.block_hash))
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayload> {
        bail!(Error::UnknownPayload { payload_id })
    }
}

/// Scriptable engine for tests.
///
/// `dag_finalize` fails with [`Error::Unavailable`] until a finalized spine is configured.
#[derive(Default)]
pub struct MockExecutionEngine {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    unavailable: bool,
    last_finalized_spine: Option<H256>,
    invalid_spines: Vec<H256>,
    optimistic_spines: Vec<Vec<H256>>,
    candidates: Vec<H256>,
    payloads: HashMap<PayloadId, ExecutionPayload>,
    finalize_calls: Vec<FinalizationParams>,
    validate_calls: usize,
}

impl MockExecutionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    pub fn set_last_finalized_spine(&self, spine: Option<H256>) {
        self.state.lock().last_finalized_spine = spine;
    }

    /// Spines that make `dag_validate_spines` return `false` when any of them is passed in.
    pub fn set_invalid_spines(&self, spines: Vec<H256>) {
        self.state.lock().invalid_spines = spines;
    }

    pub fn set_optimistic_spines(&self, spines: Vec<Vec<H256>>) {
        self.state.lock().optimistic_spines = spines;
    }

    pub fn set_candidates(&self, candidates: Vec<H256>) {
        self.state.lock().candidates = candidates;
    }

    pub fn insert_payload(&self, payload_id: PayloadId, payload: ExecutionPayload) {
        self.state.lock().payloads.insert(payload_id, payload);
    }

    #[must_use]
    pub fn finalize_calls(&self) -> Vec<FinalizationParams> {
        self.state.lock().finalize_calls.clone()
    }

    #[must_use]
    pub fn validate_calls(&self) -> usize {
        self.state.lock().validate_calls
    }

    fn ensure_available(&self) -> Result<()> {
        if self.state.lock().unavailable {
            bail!(Error::Unavailable);
        }

        Ok(())
    }
}

#[async_trait]
impl ExecutionEngine for MockExecutionEngine {
    const IS_NULL: bool = false;

    async fn dag_finalize(&self, params: FinalizationParams) -> Result<FinalizationResult> {
        self.ensure_available()?;

        let mut state = self.state.lock();

        state.finalize_calls.push(params);

        match state.last_finalized_spine {
            Some(last_finalized_spine) => Ok(FinalizationResult {
                last_finalized_spine,
            }),
            None => bail!(Error::Unavailable),
        }
    }

    async fn dag_validate_spines(&self, spines: Vec<H256>) -> Result<bool> {
        self.ensure_available()?;

        let mut state = self.state.lock();

        state.validate_calls += 1;

        Ok(!spines
            .iter()
            .any(|spine| state.invalid_spines.contains(spine)))
    }

    async fn dag_get_optimistic_spines(&self, _base_spine: H256) -> Result<Vec<Vec<H256>>> {
        self.ensure_available()?;
        Ok(self.state.lock().optimistic_spines.clone())
    }

    async fn dag_get_candidates(&self, _slot: Slot) -> Result<Vec<H256>> {
        self.ensure_available()?;
        Ok(self.state.lock().candidates.clone())
    }

    async fn dag_coordinated_state(&self) -> Result<FinalizationResult> {
        self.ensure_available()?;

        Ok(FinalizationResult {
            last_finalized_spine: self.state.lock().last_finalized_spine.unwrap_or_default(),
        })
    }

    async fn forkchoice_updated(
        &self,
        state: ForkChoiceStateV1,
        _attributes: Option<PayloadAttributes>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        self.ensure_available()?;

        Ok(ForkChoiceUpdatedResponse {
            payload_status: PayloadStatusV1::valid(state.head_block_hash),
            payload_id: None,
        })
    }

    async fn new_payload(&self, payload: ExecutionPayload) -> Result<PayloadStatusV1> {
        self.ensure_available()?;
        Ok(PayloadStatusV1::valid(payload.block_hash))
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayload> {
        self.ensure_available()?;

        match self.state.lock().payloads.get(&payload_id) {
            Some(payload) => Ok(payload.clone()),
            None => bail!(Error::UnknownPayload { payload_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(spines: &[u8], base_spine: Option<u8>) -> FinalizationParams {
        FinalizationParams {
            spines: spines.iter().copied().map(H256::repeat_byte).collect(),
            base_spine: base_spine.map(H256::repeat_byte),
            ..FinalizationParams::default()
        }
    }

    #[tokio::test]
    async fn null_engine_finalizes_last_spine() -> Result<()> {
        let engine = NullExecutionEngine;

        let result = engine.dag_finalize(params(&[1, 2], Some(0))).await?;
        assert_eq!(result.last_finalized_spine, H256::repeat_byte(2));

        let result = engine.dag_finalize(params(&[], Some(7))).await?;
        assert_eq!(result.last_finalized_spine, H256::repeat_byte(7));

        assert!(engine.dag_validate_spines(vec![H256::zero()]).await?);

        Ok(())
    }

    #[tokio::test]
    async fn mock_engine_reports_unavailability() -> Result<()> {
        let engine = Arc::new(MockExecutionEngine::new());

        let error = engine
            .dag_finalize(params(&[1], None))
            .await
            .expect_err("no finalized spine is configured");

        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::Unavailable)));

        engine.set_last_finalized_spine(Some(H256::repeat_byte(1)));

        let result = engine.dag_finalize(params(&[1], None)).await?;

        assert_eq!(result.last_finalized_spine, H256::repeat_byte(1));
        assert_eq!(engine.finalize_calls().len(), 2);

        engine.set_available(false);

        assert!(engine.dag_get_candidates(0).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn mock_engine_rejects_invalid_spines() -> Result<()> {
        let engine = MockExecutionEngine::new();

        engine.set_invalid_spines(vec![H256::repeat_byte(3)]);

        assert!(engine.dag_validate_spines(vec![H256::repeat_byte(1)]).await?);
        assert!(
            !engine
                .dag_validate_spines(vec![H256::repeat_byte(1), H256::repeat_byte(3)])
                .await?
        );
        assert_eq!(engine.validate_calls(), 2);

        Ok(())
    }
}
