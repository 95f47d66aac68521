use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use parking_lot::RwLock;
use tracing::debug;
use transition_functions::block_processing;
use types::{
    beacon_state::BeaconState, config::Config, containers::Withdrawal, primitives::ValidatorIndex,
};

use crate::{
    error::Error,
    misc::{PoolAdditionOutcome, PoolRejectionReason},
};

/// Withdrawal requests keyed by validator index. Follows the same rules as [`ExitPool`].
///
/// [`ExitPool`]: crate::ExitPool
pub struct WithdrawalPool {
    config: Arc<Config>,
    withdrawals: RwLock<BTreeMap<ValidatorIndex, Withdrawal>>,
}

impl WithdrawalPool {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            withdrawals: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, withdrawal: Withdrawal) -> PoolAdditionOutcome {
        let index = withdrawal.validator_index;

        if withdrawal.amount == 0 {
            return PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidWithdrawal,
                Error::ZeroWithdrawal { index }.into(),
            );
        }

        let mut withdrawals = self.withdrawals.write();

        if let Some(pooled) = withdrawals.get(&index) {
            if pooled.epoch <= withdrawal.epoch {
                return PoolAdditionOutcome::Ignore;
            }
        }

        debug!(index, amount = withdrawal.amount, "withdrawal added to pool");

        withdrawals.insert(index, withdrawal);

        PoolAdditionOutcome::Accept
    }

    pub fn insert_validated(
        &self,
        state: &BeaconState,
        withdrawal: Withdrawal,
    ) -> PoolAdditionOutcome {
        if let Err(error) = self.validate_for_block(state, withdrawal) {
            return PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidWithdrawal, error);
        }

        self.insert(withdrawal)
    }

    pub fn validate_for_block(&self, state: &BeaconState, withdrawal: Withdrawal) -> Result<()> {
        block_processing::validate_withdrawal(&self.config, state, withdrawal)
    }

    #[must_use]
    pub fn withdrawals_for_block(&self, state: &BeaconState) -> Vec<Withdrawal> {
        self.withdrawals
            .read()
            .values()
            .copied()
            .filter(|withdrawal| self.validate_for_block(state, *withdrawal).is_ok())
            .take(self.config.max_withdrawals)
            .collect()
    }

    pub fn mark_included(&self, included: &[Withdrawal]) {
        let mut withdrawals = self.withdrawals.write();

        for withdrawal in included {
            withdrawals.remove(&withdrawal.validator_index);
        }
    }

    /// Drops withdrawals by inactive validators and withdrawals exceeding the balance in `state`.
    pub fn on_slot(&self, state: &BeaconState) {
        self.withdrawals.write().retain(|_, withdrawal| {
            block_processing::validate_withdrawal(&self.config, state, *withdrawal).is_ok()
        });
    }

    #[must_use]
    pub fn get(&self, index: ValidatorIndex) -> Option<Withdrawal> {
        self.withdrawals.read().get(&index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.withdrawals.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.withdrawals.read().is_empty()
    }
}
