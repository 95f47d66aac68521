use bitvec::{order::Lsb0, vec::BitVec};

pub use ethereum_types::{H160, H256, H32};

pub type CommitteeIndex = u64;
pub type DepositIndex = u64;
pub type Epoch = u64;
pub type Gwei = u64;
pub type Slot = u64;
pub type SubnetId = u64;
pub type UnixSeconds = u64;
pub type ValidatorIndex = u64;
pub type WithdrawalIndex = u64;

pub type Domain = H256;
pub type DomainType = H32;
pub type ExecutionBlockHash = H256;
pub type Version = H32;

/// Bits indexed by position in a committee.
pub type AggregationBits = BitVec<u8, Lsb0>;
