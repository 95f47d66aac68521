use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad bitlen")]
    BadBitlen { length: usize },
    #[error("spine bytes are not a multiple of 32 (length: {length})")]
    SpinesLength { length: usize },
}
