//! Offset-tracking counter-mode engine
//!
//! The engine turns a [`CtrPrimitive`] into a byte-stream transform with a
//! 1:1 mapping between input and output positions. Everything hangs off the
//! stream offset:
//!
//! ```text
//! counter = offset / block_size     iv      = base_iv + counter
//! padding = offset % block_size     staged  = [padding placeholder bytes][data...]
//! ```
//!
//! When a stream starts (or restarts) mid-block, `padding` placeholder bytes
//! are put in front of the input so the data lines up with its keystream
//! position; the matching output bytes are skipped and never emitted.
//!
//! The engine does no I/O. [`CryptoWriter`](crate::CryptoWriter),
//! [`CryptoReader`](crate::CryptoReader) and the
//! [`ChunkedPipeline`](crate::ChunkedPipeline) move bytes in and out of it.
//! It is not thread-safe; one owner drives it at a time.

use tracing::{trace, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::counter::{block_position, derive_iv_into};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::CipherKey;
use crate::primitive::{CtrPrimitive, Direction};

/// Default input/output buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Construction parameters for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub direction: Direction,
    /// Absolute position of the first byte in the cipher stream.
    pub stream_offset: u64,
    /// Requested buffer size; rounded down to a multiple of the block size.
    pub buffer_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Encrypt,
            stream_offset: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl StreamOptions {
    pub fn encrypt() -> Self {
        Self::default()
    }

    pub fn decrypt() -> Self {
        Self {
            direction: Direction::Decrypt,
            ..Self::default()
        }
    }

    pub fn at_offset(mut self, stream_offset: u64) -> Self {
        self.stream_offset = stream_offset;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

pub struct CtrEngine<P> {
    primitive: P,
    direction: Direction,
    key: Zeroizing<Vec<u8>>,
    base_iv: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
    block_size: usize,
    buffer_size: usize,

    /// Staged input. `in_buf[..padding]` are placeholders, data follows up
    /// to `in_len`.
    in_buf: Zeroizing<Vec<u8>>,
    in_len: usize,

    /// Transformed bytes not yet handed out: `out_buf[out_pos..out_len]`.
    out_buf: Zeroizing<Vec<u8>>,
    out_pos: usize,
    out_len: usize,

    stream_offset: u64,
    padding: usize,
    needs_reseed: bool,
    released: bool,
}

impl<P: CtrPrimitive> CtrEngine<P> {
    /// Build an engine and seed the primitive at `options.stream_offset`.
    ///
    /// Fails with [`CryptoError::InvalidKeyMaterial`] if the key or IV width
    /// does not suit the primitive, and with
    /// [`CryptoError::InvalidBufferSize`] if the buffer cannot hold a block.
    pub fn new(
        primitive: P,
        key: &CipherKey,
        iv: &[u8],
        options: StreamOptions,
    ) -> CryptoResult<Self> {
        let block_size = primitive.block_size();
        if block_size == 0 {
            return Err(CryptoError::Primitive("block size must be non-zero".into()));
        }
        primitive.validate_key(key.as_bytes())?;
        if iv.len() != block_size {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "IV must be {block_size} bytes (got {})",
                iv.len()
            )));
        }

        let buffer_size = options.buffer_size - options.buffer_size % block_size;
        if buffer_size == 0 {
            return Err(CryptoError::InvalidBufferSize {
                requested: options.buffer_size,
                block_size,
            });
        }

        let mut engine = Self {
            primitive,
            direction: options.direction,
            key: Zeroizing::new(key.as_bytes().to_vec()),
            base_iv: Zeroizing::new(iv.to_vec()),
            iv: Zeroizing::new(vec![0u8; block_size]),
            block_size,
            buffer_size,
            in_buf: Zeroizing::new(vec![0u8; buffer_size]),
            in_len: 0,
            out_buf: Zeroizing::new(vec![0u8; buffer_size]),
            out_pos: 0,
            out_len: 0,
            stream_offset: options.stream_offset,
            padding: 0,
            needs_reseed: true,
            released: false,
        };
        engine.seed()?;
        Ok(engine)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Bytes emitted so far, plus the initial offset.
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// Keystream bytes that will be discarded before the next emitted byte.
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Effective buffer capacity (a multiple of the block size).
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Data bytes staged and not yet processed (placeholders excluded).
    pub fn staged(&self) -> usize {
        self.in_len.saturating_sub(self.padding)
    }

    pub fn is_full(&self) -> bool {
        !self.released && self.in_len == self.in_buf.len()
    }

    pub fn is_closed(&self) -> bool {
        self.released
    }

    /// Copy as much of `data` into the input buffer as fits. Returns the
    /// number of bytes taken; the caller must [`process`](Self::process) a
    /// full buffer before staging more.
    pub fn stage(&mut self, data: &[u8]) -> CryptoResult<usize> {
        let spare = self.spare_mut()?;
        let n = spare.len().min(data.len());
        spare[..n].copy_from_slice(&data[..n]);
        self.commit(n);
        Ok(n)
    }

    /// Free space at the end of the input buffer, for reading directly from
    /// a source. Follow with [`commit`](Self::commit).
    pub fn spare_mut(&mut self) -> CryptoResult<&mut [u8]> {
        self.ensure_seeded()?;
        Ok(&mut self.in_buf[self.in_len..])
    }

    /// Mark `n` bytes written through [`spare_mut`](Self::spare_mut) as staged.
    pub fn commit(&mut self, n: usize) {
        assert!(
            n <= self.in_buf.len() - self.in_len,
            "commit of {n} bytes exceeds input buffer capacity"
        );
        self.in_len += n;
    }

    /// Run the primitive over the staged input.
    ///
    /// Returns the number of bytes now available from
    /// [`output`](Self::output); zero when nothing beyond the padding was
    /// staged. Fails with [`CryptoError::OutputPending`] while earlier
    /// output has not been consumed, and with
    /// [`CryptoError::OffsetOverflow`] if the staged bytes would carry the
    /// stream offset past `u64::MAX`; neither touches any state.
    ///
    /// If the primitive fails, the stream offset is left unchanged, the
    /// staged input is discarded, and the primitive is reseeded at the
    /// unchanged offset before the next use.
    pub fn process(&mut self) -> CryptoResult<usize> {
        self.ensure_seeded()?;
        debug_assert!(self.in_len >= self.padding);
        if self.out_pos != self.out_len {
            return Err(CryptoError::OutputPending {
                pending: self.out_len - self.out_pos,
            });
        }
        if self.in_len == self.padding {
            return Ok(0);
        }

        let len = self.in_len;
        let emitted = len - self.padding;
        let next_offset = self
            .stream_offset
            .checked_add(emitted as u64)
            .ok_or(CryptoError::OffsetOverflow {
                offset: self.stream_offset,
                len: emitted,
            })?;

        let input = &self.in_buf[..len];
        let output = &mut self.out_buf[..len];
        let result = match self.direction {
            Direction::Encrypt => self.primitive.encrypt(input, output),
            Direction::Decrypt => self.primitive.decrypt(input, output),
        };
        self.in_buf[..len].zeroize();
        self.in_len = 0;

        if let Err(err) = result {
            warn!(
                offset = self.stream_offset,
                direction = %self.direction,
                error = %err,
                "cipher primitive failed, staged input discarded"
            );
            self.out_buf[..len].zeroize();
            self.out_pos = 0;
            self.out_len = 0;
            self.needs_reseed = true;
            return Err(err);
        }

        self.out_pos = self.padding;
        self.out_len = len;
        self.padding = 0;
        self.stream_offset = next_offset;

        if self.primitive.is_context_reset() {
            // The primitive restarted its keystream; reseed from the new
            // offset before more input is staged.
            self.needs_reseed = true;
        }
        Ok(emitted)
    }

    /// Transformed bytes waiting to be delivered.
    pub fn output(&self) -> &[u8] {
        &self.out_buf[self.out_pos..self.out_len]
    }

    /// Mark `n` bytes of [`output`](Self::output) as delivered.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.out_len - self.out_pos,
            "consume of {n} bytes exceeds pending output"
        );
        self.out_pos += n;
        if self.out_pos == self.out_len {
            self.out_buf[..self.out_len].zeroize();
            self.out_pos = 0;
            self.out_len = 0;
        }
    }

    /// Recompute counter and padding for `offset` and reseed the primitive.
    ///
    /// Key and base IV are unchanged. Staged input is discarded. The offset
    /// may jump forward but never backwards.
    pub fn reinit(&mut self, offset: u64) -> CryptoResult<()> {
        self.check_open()?;
        if offset < self.stream_offset {
            return Err(CryptoError::InvalidOffset {
                requested: offset,
                current: self.stream_offset,
            });
        }
        self.in_buf[..self.in_len].zeroize();
        self.in_len = 0;
        self.stream_offset = offset;
        self.seed()
    }

    /// Zeroize and free the buffers and the key copy. Further use fails with
    /// [`CryptoError::StreamClosed`]. Calling it twice is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.in_buf = Zeroizing::new(Vec::new());
        self.out_buf = Zeroizing::new(Vec::new());
        self.key.zeroize();
        self.in_len = 0;
        self.out_pos = 0;
        self.out_len = 0;
        self.released = true;
    }

    fn check_open(&self) -> CryptoResult<()> {
        if self.released {
            return Err(CryptoError::StreamClosed);
        }
        Ok(())
    }

    fn ensure_seeded(&mut self) -> CryptoResult<()> {
        self.check_open()?;
        if self.needs_reseed {
            self.seed()?;
        }
        Ok(())
    }

    /// Derive the IV for the block holding `stream_offset`, seed the
    /// primitive, and stage the padding placeholders. Expects an empty
    /// input buffer.
    fn seed(&mut self) -> CryptoResult<()> {
        debug_assert_eq!(self.in_len, 0);
        let (counter, padding) = block_position(self.stream_offset, self.block_size);
        derive_iv_into(&self.base_iv, counter, &mut self.iv);

        self.needs_reseed = true;
        self.primitive.init(&self.key, &self.iv)?;
        self.needs_reseed = false;

        self.in_buf[..padding].fill(0);
        self.in_len = padding;
        self.padding = padding;
        trace!(offset = self.stream_offset, counter, padding, "keystream seeded");
        Ok(())
    }
}

impl<P> std::fmt::Debug for CtrEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrEngine")
            .field("direction", &self.direction)
            .field("stream_offset", &self.stream_offset)
            .field("padding", &self.padding)
            .field("buffer_size", &self.buffer_size)
            .field("staged", &self.in_len)
            .field("pending", &(self.out_len - self.out_pos))
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
