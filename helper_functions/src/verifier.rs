use anyhow::{ensure, Result};
use bls::{PublicKey, PublicKeyBytes, Signature, SignatureBytes};
use derive_more::Constructor;
use itertools::Itertools as _;
use static_assertions::assert_not_impl_any;
use tap::TryConv as _;
use types::primitives::H256;

use crate::error::{Error, SignatureKind};

pub trait Verifier {
    const IS_NULL: bool;

    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_key: &PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    /// Like [`Verifier::verify_aggregate`] but accepts the empty signature with no signers.
    fn verify_aggregate_allowing_empty<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_keys = public_keys.into_iter().collect_vec();

        if signature_bytes.is_empty() {
            ensure!(public_keys.is_empty(), Error::SignatureInvalid(signature_kind));
            return Ok(());
        }

        self.verify_aggregate(message, signature_bytes, public_keys, signature_kind)
    }

    fn finish(&self) -> Result<()>;
}

impl<V: Verifier> Verifier for &mut V {
    const IS_NULL: bool = V::IS_NULL;

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_key: &PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_singular(message, signature_bytes, public_key, signature_kind)
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_aggregate(message, signature_bytes, public_keys, signature_kind)
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        (**self).finish()
    }
}

/// Skips all checks. Used when replaying blocks that were already verified.
pub struct NullVerifier;

impl Verifier for NullVerifier {
    const IS_NULL: bool = true;

    #[inline]
    fn verify_singular(
        &mut self,
        _message: H256,
        _signature_bytes: SignatureBytes,
        _public_key: &PublicKeyBytes,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        _message: H256,
        _signature_bytes: SignatureBytes,
        _public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Verifies every signature as soon as it is encountered.
pub struct SingleVerifier;

impl Verifier for SingleVerifier {
    const IS_NULL: bool = false;

    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_key: &PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_key = PublicKey::try_from(*public_key)?;
        let signature = signature_bytes.try_conv::<Signature>()?;

        ensure!(
            signature.verify(message, &public_key),
            Error::SignatureInvalid(signature_kind),
        );

        Ok(())
    }

    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_keys = decompress_all(public_keys)?;
        let signature = signature_bytes.try_conv::<Signature>()?;

        ensure!(
            signature.fast_aggregate_verify(message, &public_keys),
            Error::SignatureInvalid(signature_kind),
        );

        Ok(())
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Collects signatures and verifies all of them at once in [`Verifier::finish`].
///
/// Batches from several blocks can be combined with [`MultiVerifier::join`].
#[derive(Default)]
pub struct MultiVerifier {
    triples: Vec<Triple>,
}

pub type SignatureBatch = MultiVerifier;

impl Verifier for MultiVerifier {
    const IS_NULL: bool = false;

    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_key: &PublicKeyBytes,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_key = PublicKey::try_from(*public_key)?;
        self.triples
            .push(Triple::new(message, signature_bytes, public_key));
        Ok(())
    }

    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_keys = decompress_all(public_keys)?;

        ensure!(
            !public_keys.is_empty(),
            Error::SignatureInvalid(signature_kind),
        );

        let public_key = PublicKey::aggregate_nonempty(public_keys)?;
        self.triples
            .push(Triple::new(message, signature_bytes, public_key));
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.triples.is_empty() {
            return Ok(());
        }

        let messages = self.triples.iter().map(|triple| triple.message.as_bytes());

        let signatures = self
            .triples
            .iter()
            .map(|triple| triple.signature_bytes.try_conv::<Signature>())
            .collect::<Result<Vec<_>, _>>()?;

        let public_keys = self.triples.iter().map(|triple| &triple.public_key);

        ensure!(
            Signature::multi_verify(messages, signatures.iter(), public_keys),
            Error::SignatureInvalid(SignatureKind::Multi),
        );

        Ok(())
    }
}

impl MultiVerifier {
    pub fn join(&mut self, other: Self) {
        self.triples.extend(other.triples);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

#[derive(Constructor)]
struct Triple {
    message: H256,
    signature_bytes: SignatureBytes,
    public_key: PublicKey,
}

assert_not_impl_any!(Triple: Copy);

fn decompress_all<'keys>(
    public_keys: impl IntoIterator<Item = &'keys PublicKeyBytes>,
) -> Result<Vec<PublicKey>> {
    public_keys
        .into_iter()
        .map(|bytes| PublicKey::try_from(*bytes).map_err(Into::into))
        .collect()
}
