pub use crate::{
    error::Error,
    public_key::PublicKey,
    public_key_bytes::PublicKeyBytes,
    secret_key::SecretKey,
    signature::Signature,
    signature_bytes::SignatureBytes,
};

mod consts;
mod error;
mod public_key;
mod public_key_bytes;
mod secret_key;
mod signature;
mod signature_bytes;
