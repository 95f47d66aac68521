use hex_literal::hex;

use crate::primitives::{DomainType, Epoch, Gwei, Slot, H32};

pub const DOMAIN_AGGREGATE_AND_PROOF: DomainType = H32(hex!("06000000"));
pub const DOMAIN_BEACON_ATTESTER: DomainType = H32(hex!("01000000"));
pub const DOMAIN_BEACON_PROPOSER: DomainType = H32(hex!("00000000"));
pub const DOMAIN_DEPOSIT: DomainType = H32(hex!("03000000"));
pub const DOMAIN_PREVOTE: DomainType = H32(hex!("0a000000"));
pub const DOMAIN_RANDAO: DomainType = H32(hex!("02000000"));
pub const DOMAIN_SELECTION_PROOF: DomainType = H32(hex!("05000000"));
pub const DOMAIN_SYNC_COMMITTEE: DomainType = H32(hex!("07000000"));
pub const DOMAIN_VOLUNTARY_EXIT: DomainType = H32(hex!("04000000"));

pub const EFFECTIVE_BALANCE_INCREMENT: Gwei = 1_000_000_000;
pub const FAR_FUTURE_EPOCH: Epoch = Epoch::MAX;
pub const GENESIS_EPOCH: Epoch = 0;
pub const GENESIS_SLOT: Slot = 0;

pub const JUSTIFICATION_BITS_LENGTH: usize = 4;

/// Share of the effective balance a slashed validator loses immediately.
pub const MIN_SLASHING_PENALTY_QUOTIENT: u64 = 128;
pub const WHISTLEBLOWER_REWARD_QUOTIENT: u64 = 512;
