use std::io;

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key or IV width does not match the primitive.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("stream closed")]
    StreamClosed,

    /// The block cipher primitive itself failed. Never retried.
    #[error("cipher primitive failure: {0}")]
    Primitive(String),

    #[error("invalid buffer size {requested}: must hold at least one {block_size}-byte block")]
    InvalidBufferSize { requested: usize, block_size: usize },

    #[error("stream offset cannot move backwards: {requested} < {current}")]
    InvalidOffset { requested: u64, current: u64 },

    #[error("stream offset overflow: {len} bytes past offset {offset}")]
    OffsetOverflow { offset: u64, len: usize },

    /// `process` was called before the previous output was consumed.
    #[error("{pending} bytes of transformed output not yet consumed")]
    OutputPending { pending: usize },

    #[error("invalid chunk size: must be non-zero")]
    InvalidChunkSize,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CryptoError {
    /// Recover a typed error from an `io::Error` produced by the
    /// `Read`/`Write` adapters. Plain I/O failures become `CryptoError::Io`.
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<CryptoError>()) {
            return CryptoError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
            Some(Ok(typed)) => *typed,
            _ => CryptoError::Io(io::Error::from(kind)),
        }
    }
}

impl From<CryptoError> for io::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(e) => e,
            CryptoError::StreamClosed => io::Error::new(io::ErrorKind::BrokenPipe, err),
            CryptoError::InvalidKeyMaterial(_)
            | CryptoError::InvalidBufferSize { .. }
            | CryptoError::InvalidOffset { .. }
            | CryptoError::OffsetOverflow { .. }
            | CryptoError::InvalidChunkSize
            | CryptoError::InvalidEncoding(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            CryptoError::Primitive(_) | CryptoError::OutputPending { .. } => io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_closed_survives_io_roundtrip() {
        let io_err: io::Error = CryptoError::StreamClosed.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
        assert!(matches!(CryptoError::from_io(io_err), CryptoError::StreamClosed));
    }

    #[test]
    fn plain_io_error_stays_io() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        match CryptoError::from_io(io_err) {
            CryptoError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn key_material_maps_to_invalid_input() {
        let io_err: io::Error = CryptoError::InvalidKeyMaterial("bad".into()).into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
    }
}
