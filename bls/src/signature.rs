use core::num::NonZeroU64;

use blst::{
    blst_scalar,
    min_pk::{AggregateSignature as RawAggregateSignature, Signature as RawSignature},
    BLST_ERROR,
};
use derive_more::From;
use itertools::Itertools as _;
use rand::Rng as _;

use crate::{
    consts::DOMAIN_SEPARATION_TAG, error::Error, public_key::PublicKey,
    signature_bytes::SignatureBytes,
};

const MULTI_VERIFY_RANDOM_BYTES: usize = size_of::<NonZeroU64>();
const MULTI_VERIFY_RANDOM_BITS: usize = MULTI_VERIFY_RANDOM_BYTES * 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug, From)]
pub struct Signature(RawSignature);

impl TryFrom<SignatureBytes> for Signature {
    type Error = Error;

    #[inline]
    fn try_from(bytes: SignatureBytes) -> Result<Self, Self::Error> {
        RawSignature::uncompress(bytes.as_bytes())
            .map(Self)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl From<Signature> for SignatureBytes {
    #[inline]
    fn from(signature: Signature) -> Self {
        Self(signature.as_raw().compress())
    }
}

impl Signature {
    #[must_use]
    pub fn verify(&self, message: impl AsRef<[u8]>, public_key: &PublicKey) -> bool {
        let result = self.as_raw().verify(
            true,
            message.as_ref(),
            DOMAIN_SEPARATION_TAG,
            &[],
            public_key.as_raw(),
            false,
        );

        result == BLST_ERROR::BLST_SUCCESS
    }

    #[must_use]
    pub fn fast_aggregate_verify<'keys>(
        &self,
        message: impl AsRef<[u8]>,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
    ) -> bool {
        let public_keys = public_keys.into_iter().map(PublicKey::as_raw).collect_vec();

        if public_keys.is_empty() {
            return false;
        }

        let result = self.as_raw().fast_aggregate_verify(
            true,
            message.as_ref(),
            DOMAIN_SEPARATION_TAG,
            public_keys.as_slice(),
        );

        result == BLST_ERROR::BLST_SUCCESS
    }

    /// Verifies many `(message, signature, public key)` triples at once.
    ///
    /// Each signature is weighted by a random scalar so that invalid signatures cannot cancel
    /// each other out.
    #[must_use]
    pub fn multi_verify<'all>(
        messages: impl IntoIterator<Item = &'all [u8]>,
        signatures: impl IntoIterator<Item = &'all Self>,
        public_keys: impl IntoIterator<Item = &'all PublicKey>,
    ) -> bool {
        let messages = messages.into_iter().collect_vec();
        let signatures = signatures.into_iter().map(Self::as_raw).collect_vec();
        let public_keys = public_keys.into_iter().map(PublicKey::as_raw).collect_vec();

        if signatures.is_empty() {
            return true;
        }

        // `ThreadRng` is cryptographically secure.
        let mut rng = rand::thread_rng();

        let randoms = core::iter::repeat_with(|| {
            let mut scalar = blst_scalar::default();
            let nonzero_bytes = rng.gen::<NonZeroU64>().get().to_le_bytes();
            scalar.b[..MULTI_VERIFY_RANDOM_BYTES].copy_from_slice(&nonzero_bytes);
            scalar
        })
        .take(signatures.len())
        .collect_vec();

        let result = RawSignature::verify_multiple_aggregate_signatures(
            messages.as_slice(),
            DOMAIN_SEPARATION_TAG,
            public_keys.as_slice(),
            false,
            signatures.as_slice(),
            true,
            randoms.as_slice(),
            MULTI_VERIFY_RANDOM_BITS,
        );

        result == BLST_ERROR::BLST_SUCCESS
    }

    pub fn aggregate_nonempty(signatures: impl IntoIterator<Item = Self>) -> Result<Self, Error> {
        let mut signatures = signatures.into_iter();
        let first = signatures.next().ok_or(Error::NoSignaturesToAggregate)?;

        let mut aggregate = RawAggregateSignature::from_signature(first.as_raw());

        for signature in signatures {
            aggregate.add_aggregate(&RawAggregateSignature::from_signature(signature.as_raw()));
        }

        Ok(Self(aggregate.to_signature()))
    }

    #[must_use]
    pub fn to_bytes(self) -> SignatureBytes {
        self.into()
    }

    #[must_use]
    pub const fn as_raw(&self) -> &RawSignature {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use crate::secret_key::SecretKey;

    use super::*;

    const MESSAGE: &str = "foo";

    fn secret_key(byte: u8) -> SecretKey {
        SecretKey::from_seed([byte; 32]).expect("32 bytes of keying material are enough")
    }

    #[test]
    fn signature_verify_succeeds_on_correct_triple() {
        let secret_key = secret_key(1);
        let public_key = secret_key.to_public_key();
        let signature = secret_key.sign(MESSAGE);

        assert!(signature.verify(MESSAGE, &public_key));
    }

    #[test]
    fn signature_verify_fails_on_incorrect_public_key() {
        let signature = secret_key(1).sign(MESSAGE);
        let public_key = secret_key(2).to_public_key();

        assert!(!signature.verify(MESSAGE, &public_key));
    }

    #[test]
    fn signature_survives_compression() -> Result<(), Error> {
        let signature = secret_key(3).sign(MESSAGE);
        let decompressed = Signature::try_from(signature.to_bytes())?;

        assert_eq!(decompressed, signature);

        Ok(())
    }

    #[test]
    fn aggregate_signature_verifies_against_all_signers() -> Result<(), Error> {
        let secret_keys = [secret_key(4), secret_key(5), secret_key(6)];
        let public_keys = secret_keys.iter().map(SecretKey::to_public_key).collect_vec();
        let aggregate = Signature::aggregate_nonempty(secret_keys.iter().map(|key| key.sign(MESSAGE)))?;

        assert!(aggregate.fast_aggregate_verify(MESSAGE, &public_keys));
        assert!(!aggregate.fast_aggregate_verify(MESSAGE, &public_keys[..2]));

        Ok(())
    }

    #[test]
    fn multi_verify_detects_a_single_bad_triple() {
        let keys = [secret_key(7), secret_key(8)];
        let public_keys = keys.iter().map(SecretKey::to_public_key).collect_vec();
        let messages: [&[u8]; 2] = [b"a", b"b"];
        let good = [keys[0].sign(messages[0]), keys[1].sign(messages[1])];
        let bad = [keys[0].sign(messages[0]), keys[1].sign(messages[0])];

        assert!(Signature::multi_verify(messages, &good, &public_keys));
        assert!(!Signature::multi_verify(messages, &bad, &public_keys));
    }
}
