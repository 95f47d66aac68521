use core::{num::NonZeroU64, time::Duration};
use std::borrow::Cow;

use hex_literal::hex;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::{
    consts::FAR_FUTURE_EPOCH,
    primitives::{Epoch, Gwei, Slot, UnixSeconds, Version, H32},
};

/// Chain parameters.
///
/// Missing fields are filled in from [`Config::default`], so a YAML document only needs to list
/// the values that differ from mainnet.
#[expect(
    clippy::unsafe_derive_deserialize,
    reason = "A false positive triggered by `nonzero!`. `Config` has no invariants."
)]
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    // Meta
    pub config_name: Cow<'static, str>,

    // Genesis
    pub genesis_delay: u64,
    pub genesis_fork_version: Version,
    pub min_genesis_active_validator_count: u64,
    pub min_genesis_time: UnixSeconds,

    // Forking
    pub delegating_stake_fork_epoch: Epoch,

    // Time parameters
    pub seconds_per_slot: NonZeroU64,
    pub slots_per_epoch: NonZeroU64,
    pub min_attestation_inclusion_delay: u64,
    pub min_seed_lookahead: u64,
    pub min_validator_withdrawability_delay: u64,

    // State list lengths
    pub slots_per_historical_root: NonZeroU64,
    pub epochs_per_historical_vector: NonZeroU64,

    // Gwei values
    pub max_effective_balance: Gwei,
    pub ejection_balance: Gwei,

    // Max operations per block
    pub max_proposer_slashings: usize,
    pub max_attester_slashings: usize,
    pub max_attestations: usize,
    pub max_deposits: usize,
    pub max_voluntary_exits: usize,
    pub max_withdrawals: usize,

    // Committees
    pub max_validators_per_committee: u64,
    pub target_aggregators_per_committee: NonZeroU64,
    pub sync_committee_size: u64,

    // Fork choice
    pub proposer_score_boost: u64,

    // Spines
    pub all_spines_limit: usize,
    pub parent_spines_limit: usize,
    pub cp_finalized_limit: usize,

    // Networking
    pub attestation_subnet_count: NonZeroU64,
    pub prevote_subnet_count: NonZeroU64,
    pub maximum_gossip_clock_disparity_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Meta
            //
            // Use `default` as the default `config_name` and override it in `Config::mainnet`.
            // This keeps data of custom networks apart from mainnet data.
            config_name: Cow::Borrowed("default"),

            // Genesis
            genesis_delay: 604_800,
            genesis_fork_version: H32(hex!("00000000")),
            min_genesis_active_validator_count: 1 << 14,
            min_genesis_time: 0,

            // Forking
            delegating_stake_fork_epoch: FAR_FUTURE_EPOCH,

            // Time parameters
            seconds_per_slot: nonzero!(4_u64),
            slots_per_epoch: nonzero!(32_u64),
            min_attestation_inclusion_delay: 1,
            min_seed_lookahead: 1,
            min_validator_withdrawability_delay: 256,

            // State list lengths
            slots_per_historical_root: nonzero!(8192_u64),
            epochs_per_historical_vector: nonzero!(65536_u64),

            // Gwei values
            max_effective_balance: 32_000_000_000,
            ejection_balance: 16_000_000_000,

            // Max operations per block
            max_proposer_slashings: 16,
            max_attester_slashings: 2,
            max_attestations: 128,
            max_deposits: 16,
            max_voluntary_exits: 16,
            max_withdrawals: 16,

            // Committees
            max_validators_per_committee: 2048,
            target_aggregators_per_committee: nonzero!(16_u64),
            sync_committee_size: 512,

            // Fork choice
            proposer_score_boost: 40,

            // Spines
            all_spines_limit: 128,
            parent_spines_limit: 8,
            cp_finalized_limit: 256,

            // Networking
            attestation_subnet_count: nonzero!(64_u64),
            prevote_subnet_count: nonzero!(64_u64),
            maximum_gossip_clock_disparity_millis: 500,
        }
    }
}

impl Config {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            min_genesis_time: 1_606_824_000,
            ..Self::default()
        }
    }

    /// Small epochs and short historical vectors for fast tests.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            // Meta
            config_name: Cow::Borrowed("minimal"),

            // Genesis
            genesis_delay: 300,
            genesis_fork_version: H32(hex!("00000001")),
            min_genesis_active_validator_count: 64,
            min_genesis_time: 1_578_009_600,

            // Time parameters
            seconds_per_slot: nonzero!(6_u64),
            slots_per_epoch: nonzero!(8_u64),
            min_validator_withdrawability_delay: 8,

            // State list lengths
            slots_per_historical_root: nonzero!(64_u64),
            epochs_per_historical_vector: nonzero!(64_u64),

            // Max operations per block
            max_attestations: 16,

            // Committees
            target_aggregators_per_committee: nonzero!(4_u64),
            sync_committee_size: 32,

            // Spines
            all_spines_limit: 64,

            ..Self::default()
        }
    }

    #[must_use]
    pub const fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot.get())
    }

    #[must_use]
    pub const fn maximum_gossip_clock_disparity(&self) -> Duration {
        Duration::from_millis(self.maximum_gossip_clock_disparity_millis)
    }

    #[must_use]
    pub const fn is_delegating_stake_slot(&self, slot: Slot) -> bool {
        slot / self.slots_per_epoch.get() >= self.delegating_stake_fork_epoch
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn partial_yaml_overrides_defaults() -> anyhow::Result<()> {
        let config = serde_yaml::from_str::<Config>(
            "
            CONFIG_NAME: testnet
            SLOTS_PER_EPOCH: 16
            ALL_SPINES_LIMIT: 10
            ",
        )?;

        assert_eq!(config.config_name, "testnet");
        assert_eq!(config.slots_per_epoch.get(), 16);
        assert_eq!(config.all_spines_limit, 10);
        assert_eq!(config.seconds_per_slot, Config::default().seconds_per_slot);

        Ok(())
    }

    #[test_case(Config::mainnet(), 0, false)]
    #[test_case(Config { delegating_stake_fork_epoch: 2, ..Config::minimal() }, 15, false)]
    #[test_case(Config { delegating_stake_fork_epoch: 2, ..Config::minimal() }, 16, true)]
    fn delegating_stake_region(config: Config, slot: Slot, expected: bool) {
        assert_eq!(config.is_delegating_stake_slot(slot), expected);
    }
}
