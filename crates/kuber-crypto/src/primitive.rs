//! Block cipher primitives behind a single counter-mode trait
//!
//! The stream engine only needs four things from a primitive: its block
//! size, a way to (re)seed it with `(key, iv)`, a buffer-to-buffer transform
//! for each direction, and whether the last transform lost its counter
//! context. Two adapters are provided:
//!
//! - [`AesCtr`]: RustCrypto `ctr::Ctr128BE` over AES-128/192/256. Keeps the
//!   keystream position across calls, including mid-block.
//! - [`BlockwiseAesCtr`]: builds each keystream block straight from the raw
//!   AES block function. Every call starts again from the seeded IV, so it
//!   reports a context reset and the engine reseeds it from the stream offset.

use aes::cipher::{BlockEncrypt, InvalidLength, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256, Block};
use zeroize::Zeroizing;

use crate::counter::derive_iv_into;
use crate::error::{CryptoError, CryptoResult};
use crate::BLOCK_SIZE;

/// Key widths accepted by the AES adapters.
pub const AES_KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Which way bytes flow through the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Encrypt,
    Decrypt,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Encrypt => f.write_str("encrypt"),
            Direction::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// A counter-mode capable block cipher.
///
/// `encrypt` and `decrypt` must consume all of `input` and write exactly
/// `input.len()` bytes into `output` (the two slices have equal length).
pub trait CtrPrimitive {
    /// Block size in bytes. The IV is one block wide.
    fn block_size(&self) -> usize;

    /// Reject keys the primitive cannot use. Called at engine construction.
    fn validate_key(&self, key: &[u8]) -> CryptoResult<()>;

    /// Seed the primitive with a key and the IV of the next block.
    fn init(&mut self, key: &[u8], iv: &[u8]) -> CryptoResult<()>;

    fn encrypt(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()>;

    fn decrypt(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()>;

    /// True when the last `encrypt`/`decrypt` left the primitive unable to
    /// continue the keystream; the caller must `init` it again.
    fn is_context_reset(&self) -> bool;
}

fn invalid_key_len(len: usize) -> CryptoError {
    CryptoError::InvalidKeyMaterial(format!("AES key must be 16, 24, or 32 bytes (got {len})"))
}

fn check_aes_key(key: &[u8]) -> CryptoResult<()> {
    if AES_KEY_SIZES.contains(&key.len()) {
        Ok(())
    } else {
        Err(invalid_key_len(key.len()))
    }
}

fn check_lengths(input: &[u8], output: &[u8]) -> CryptoResult<()> {
    if input.len() != output.len() {
        return Err(CryptoError::Primitive(format!(
            "output buffer is {} bytes for {} input bytes",
            output.len(),
            input.len()
        )));
    }
    Ok(())
}

// ── AesCtr ────────────────────────────────────────────────────────────────────

enum CtrState {
    Aes128(ctr::Ctr128BE<Aes128>),
    Aes192(ctr::Ctr128BE<Aes192>),
    Aes256(ctr::Ctr128BE<Aes256>),
}

impl CtrState {
    fn new(key: &[u8], iv: &[u8]) -> CryptoResult<Self> {
        let invalid = |_: InvalidLength| {
            CryptoError::InvalidKeyMaterial(format!(
                "AES-CTR rejected key ({} bytes) / IV ({} bytes)",
                key.len(),
                iv.len()
            ))
        };
        match key.len() {
            16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
                .map(Self::Aes128)
                .map_err(invalid),
            24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv)
                .map(Self::Aes192)
                .map_err(invalid),
            32 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
                .map(Self::Aes256)
                .map_err(invalid),
            len => Err(invalid_key_len(len)),
        }
    }

    fn apply(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        let result = match self {
            Self::Aes128(c) => c.apply_keystream_b2b(input, output),
            Self::Aes192(c) => c.apply_keystream_b2b(input, output),
            Self::Aes256(c) => c.apply_keystream_b2b(input, output),
        };
        result.map_err(|e| CryptoError::Primitive(format!("AES-CTR keystream: {e}")))
    }
}

/// AES in CTR mode with a 128-bit big-endian counter.
///
/// The whole IV is the counter, so incrementing it carries across all 16
/// bytes and wraps at 2^128, the same arithmetic as
/// [`derive_iv`](crate::counter::derive_iv).
#[derive(Default)]
pub struct AesCtr {
    state: Option<CtrState>,
}

impl AesCtr {
    pub fn new() -> Self {
        Self::default()
    }

    fn process(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        check_lengths(input, output)?;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CryptoError::Primitive("AES-CTR used before init".into()))?;
        state.apply(input, output)
    }
}

impl std::fmt::Debug for AesCtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCtr")
            .field("initialized", &self.state.is_some())
            .finish()
    }
}

impl CtrPrimitive for AesCtr {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn validate_key(&self, key: &[u8]) -> CryptoResult<()> {
        check_aes_key(key)
    }

    fn init(&mut self, key: &[u8], iv: &[u8]) -> CryptoResult<()> {
        self.state = Some(CtrState::new(key, iv)?);
        Ok(())
    }

    fn encrypt(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        self.process(input, output)
    }

    fn decrypt(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        self.process(input, output)
    }

    fn is_context_reset(&self) -> bool {
        false
    }
}

// ── BlockwiseAesCtr ───────────────────────────────────────────────────────────

enum AesBlock {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesBlock {
    fn new(key: &[u8]) -> CryptoResult<Self> {
        let invalid = |_: InvalidLength| {
            CryptoError::InvalidKeyMaterial(format!("AES rejected {}-byte key", key.len()))
        };
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            len => Err(invalid_key_len(len)),
        }
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// AES-CTR computed one counter block at a time from the raw block cipher.
///
/// Each call restarts the keystream at the seeded IV, so after every
/// transform [`is_context_reset`](CtrPrimitive::is_context_reset) is true.
#[derive(Default)]
pub struct BlockwiseAesCtr {
    cipher: Option<AesBlock>,
    iv: Zeroizing<[u8; BLOCK_SIZE]>,
    context_reset: bool,
}

impl BlockwiseAesCtr {
    pub fn new() -> Self {
        Self::default()
    }

    fn process(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        check_lengths(input, output)?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| CryptoError::Primitive("blockwise AES-CTR used before init".into()))?;

        let mut keystream = Block::default();
        for (index, (src, dst)) in input
            .chunks(BLOCK_SIZE)
            .zip(output.chunks_mut(BLOCK_SIZE))
            .enumerate()
        {
            derive_iv_into(self.iv.as_slice(), index as u64, keystream.as_mut_slice());
            cipher.encrypt_block(&mut keystream);
            for ((d, s), k) in dst.iter_mut().zip(src).zip(keystream.iter()) {
                *d = s ^ k;
            }
        }
        keystream.as_mut_slice().fill(0);

        self.context_reset = true;
        Ok(())
    }
}

impl std::fmt::Debug for BlockwiseAesCtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockwiseAesCtr")
            .field("initialized", &self.cipher.is_some())
            .field("context_reset", &self.context_reset)
            .finish()
    }
}

impl CtrPrimitive for BlockwiseAesCtr {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn validate_key(&self, key: &[u8]) -> CryptoResult<()> {
        check_aes_key(key)
    }

    fn init(&mut self, key: &[u8], iv: &[u8]) -> CryptoResult<()> {
        if iv.len() != BLOCK_SIZE {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "IV must be {BLOCK_SIZE} bytes (got {})",
                iv.len()
            )));
        }
        self.cipher = Some(AesBlock::new(key)?);
        self.iv.copy_from_slice(iv);
        self.context_reset = false;
        Ok(())
    }

    fn encrypt(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        self.process(input, output)
    }

    fn decrypt(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<()> {
        self.process(input, output)
    }

    fn is_context_reset(&self) -> bool {
        self.context_reset
    }
}
