use derive_more::AsRef;
use fixed_hash::construct_fixed_hash;
use impl_serde::impl_fixed_hash_serde;

pub const COMPRESSED_SIZE: usize = 96;

construct_fixed_hash! {
    #[derive(AsRef)]
    pub struct SignatureBytes(COMPRESSED_SIZE);
}

impl_fixed_hash_serde!(SignatureBytes, COMPRESSED_SIZE);

impl SignatureBytes {
    /// The compressed point at infinity.
    #[must_use]
    pub fn empty() -> Self {
        let mut bytes = Self::zero();
        bytes.as_mut()[0] = 0xc0;
        bytes
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self == Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_signature_bytes_are_recognized() {
        assert!(SignatureBytes::empty().is_empty());
        assert!(!SignatureBytes::zero().is_empty());
    }

    #[test]
    fn signature_bytes_serialize_as_prefixed_hex() -> anyhow::Result<()> {
        let json = serde_json::to_string(&SignatureBytes::empty())?;

        assert!(json.starts_with("\"0xc000"));
        assert_eq!(serde_json::from_str::<SignatureBytes>(&json)?, SignatureBytes::empty());

        Ok(())
    }
}
