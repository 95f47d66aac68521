use static_assertions::assert_eq_size;
use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("no public keys to aggregate")]
    NoPublicKeysToAggregate,
    #[error("no signatures to aggregate")]
    NoSignaturesToAggregate,
}

assert_eq_size!(Error, u8);
