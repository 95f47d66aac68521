use core::fmt::{Debug, Formatter, Result as FmtResult};

use blst::min_pk::SecretKey as RawSecretKey;

use crate::{consts::DOMAIN_SEPARATION_TAG, error::Error, public_key::PublicKey, signature::Signature};

pub const SIZE: usize = 32;

pub struct SecretKey(RawSecretKey);

// Keep secret keys out of logs.
impl Debug for SecretKey {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        formatter.write_str("[REDACTED]")
    }
}

impl SecretKey {
    /// Derives a key from input keying material as described in EIP-2333.
    pub fn from_seed(seed: [u8; SIZE]) -> Result<Self, Error> {
        RawSecretKey::key_gen(&seed, &[])
            .map(Self)
            .map_err(|_| Error::InvalidSecretKey)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        RawSecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidSecretKey)
    }

    #[must_use]
    pub fn to_public_key(&self) -> PublicKey {
        self.0.sk_to_pk().into()
    }

    #[must_use]
    pub fn sign(&self, message: impl AsRef<[u8]>) -> Signature {
        self.0
            .sign(message.as_ref(), DOMAIN_SEPARATION_TAG, &[])
            .into()
    }
}
