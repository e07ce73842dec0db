use kuber_crypto::CryptoError;
use thiserror::Error;

pub type KuberResult<T> = Result<T, KuberError>;

#[derive(Debug, Error)]
pub enum KuberError {
    #[error("config error: {0}")]
    Config(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
