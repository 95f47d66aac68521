//! Parameters exchanged with the execution engine during DAG finalization.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::{
    containers::Checkpoint,
    error::Error,
    primitives::{Epoch, Gwei, ValidatorIndex, H256},
};

const HEADER_SIZE: usize = 48;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize, Serialize, AsRefStr)]
#[serde(rename_all = "camelCase")]
pub enum ValidatorSyncOp {
    Activate,
    Exit,
    Withdrawal,
}

/// A validator lifecycle operation the execution layer has to apply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ValidatorSync {
    pub op_type: ValidatorSyncOp,
    pub index: ValidatorIndex,
    pub proc_epoch: Epoch,
    pub amount: Option<Gwei>,
    pub tx_hash: Option<H256>,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SpineCheckpoint {
    pub epoch: Epoch,
    pub root: H256,
    pub spine: H256,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FinalizationParams {
    pub spines: Vec<H256>,
    pub base_spine: Option<H256>,
    pub checkpoint: Option<SpineCheckpoint>,
    pub validator_sync: Vec<ValidatorSync>,
}

/// Finalization parameters as of a finalized epoch, persisted for execution layer sync.
///
/// Layout: big-endian `fin_epoch` ‖ big-endian `checkpoint.epoch` ‖ `checkpoint.root` ‖ JSON
/// encoding of `params`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GwatSyncParam {
    pub checkpoint: Checkpoint,
    pub params: FinalizationParams,
    pub fin_epoch: Epoch,
}

impl GwatSyncParam {
    #[must_use]
    pub const fn new(checkpoint: Checkpoint, params: FinalizationParams, fin_epoch: Epoch) -> Self {
        Self {
            checkpoint,
            params,
            fin_epoch,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(&self.params)?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + json.len());
        bytes.extend_from_slice(&self.fin_epoch.to_be_bytes());
        bytes.extend_from_slice(&self.checkpoint.epoch.to_be_bytes());
        bytes.extend_from_slice(self.checkpoint.root.as_bytes());
        bytes.extend_from_slice(&json);

        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= HEADER_SIZE,
            Error::BadBitlen {
                length: bytes.len(),
            },
        );

        let (fin_epoch, rest) = bytes.split_at(size_of::<Epoch>());
        let (checkpoint_epoch, rest) = rest.split_at(size_of::<Epoch>());
        let (checkpoint_root, json) = rest.split_at(H256::len_bytes());

        let fin_epoch = Epoch::from_be_bytes(fin_epoch.try_into()?);
        let checkpoint_epoch = Epoch::from_be_bytes(checkpoint_epoch.try_into()?);

        let checkpoint = Checkpoint {
            epoch: checkpoint_epoch,
            root: H256::from_slice(checkpoint_root),
        };

        let params = serde_json::from_slice(json)?;

        Ok(Self::new(checkpoint, params, fin_epoch))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn params() -> FinalizationParams {
        FinalizationParams {
            spines: vec![H256::repeat_byte(1), H256::repeat_byte(2)],
            base_spine: Some(H256::repeat_byte(0xaa)),
            checkpoint: Some(SpineCheckpoint {
                epoch: 3,
                root: H256::repeat_byte(3),
                spine: H256::repeat_byte(4),
            }),
            validator_sync: vec![ValidatorSync {
                op_type: ValidatorSyncOp::Exit,
                index: 7,
                proc_epoch: 2,
                amount: None,
                tx_hash: Some(H256::repeat_byte(5)),
            }],
        }
    }

    #[test_case(FinalizationParams::default())]
    #[test_case(params())]
    fn gwat_sync_param_round_trip(params: FinalizationParams) -> Result<()> {
        let checkpoint = Checkpoint {
            epoch: 5,
            root: H256::repeat_byte(9),
        };

        let original = GwatSyncParam::new(checkpoint, params, 6);
        let decoded = GwatSyncParam::from_bytes(&original.to_bytes()?)?;

        assert_eq!(decoded, original);

        Ok(())
    }

    #[test]
    fn header_is_big_endian() -> Result<()> {
        let checkpoint = Checkpoint {
            epoch: 2,
            root: H256::repeat_byte(1),
        };

        let bytes = GwatSyncParam::new(checkpoint, FinalizationParams::default(), 1).to_bytes()?;

        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(&bytes[16..48], H256::repeat_byte(1).as_bytes());

        Ok(())
    }

    #[test]
    fn short_input_is_rejected() {
        let error = GwatSyncParam::from_bytes(&[0; 40]).expect_err("40 bytes is too short");

        assert_eq!(error.to_string(), "bad bitlen");
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::BadBitlen { length: 40 }),
        ));
    }

    #[test]
    fn header_followed_by_json_decodes() -> Result<()> {
        let mut bytes = vec![0; HEADER_SIZE];
        bytes.extend_from_slice(br#"{"spines":[],"baseSpine":null,"checkpoint":null,"validatorSync":[]}"#);

        let decoded = GwatSyncParam::from_bytes(&bytes)?;

        assert_eq!(decoded.params, FinalizationParams::default());
        assert_eq!(decoded.fin_epoch, 0);

        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut bytes = vec![0; HEADER_SIZE];
        bytes.extend_from_slice(
            br#"{"spines":[],"baseSpine":null,"checkpoint":null,"validatorSync":[],"extra":1}"#,
        );

        assert!(GwatSyncParam::from_bytes(&bytes).is_err());
    }
}
