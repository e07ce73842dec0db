//! Key material: cipher keys, IV generation, base64 decoding

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::IV_SIZE;

/// A symmetric cipher key (16, 24, or 32 bytes for AES). Zeroized on drop.
///
/// Width is validated by the primitive when a stream is built, not here, so
/// the same type can carry keys for any [`CtrPrimitive`](crate::CtrPrimitive).
#[derive(Clone)]
pub struct CipherKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl CipherKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
        }
    }

    /// Decode a base64 key. Surrounding whitespace (e.g. a trailing newline
    /// from a key file) is ignored.
    pub fn from_base64(encoded: &SecretString) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.expose_secret().trim())
            .map_err(|e| CryptoError::InvalidEncoding(format!("key is not valid base64: {e}")))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random base IV for a new stream.
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}
