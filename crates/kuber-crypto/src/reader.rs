//! Decrypting input stream: `std::io::Read` over a [`CtrEngine`]

use std::io::{self, Read};

use crate::engine::{CtrEngine, StreamOptions};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::CipherKey;
use crate::primitive::{AesCtr, CtrPrimitive, Direction};

/// Pulls bytes from `R` and yields them transformed.
///
/// Byte `i` of the output is byte `i` of the source run through the
/// keystream at `stream_offset + i`, so a reader and a
/// [`CryptoWriter`](crate::CryptoWriter) with the same key, IV and offset
/// produce identical bytes.
pub struct CryptoReader<R: Read, P: CtrPrimitive = AesCtr> {
    inner: Option<R>,
    engine: CtrEngine<P>,
    eof: bool,
}

impl<R: Read> CryptoReader<R, AesCtr> {
    pub fn new(
        inner: R,
        key: &CipherKey,
        iv: &[u8],
        options: StreamOptions,
    ) -> CryptoResult<Self> {
        let engine = CtrEngine::new(AesCtr::new(), key, iv, options)?;
        Ok(Self::with_engine(inner, engine))
    }
}

impl<R: Read, P: CtrPrimitive> CryptoReader<R, P> {
    pub fn with_engine(inner: R, engine: CtrEngine<P>) -> Self {
        Self {
            inner: Some(inner),
            engine,
            eof: false,
        }
    }

    /// Offset of the next byte the source will be read at. Bytes already
    /// transformed but not yet returned by `read` are counted.
    pub fn stream_offset(&self) -> u64 {
        self.engine.stream_offset()
    }

    pub fn direction(&self) -> Direction {
        self.engine.direction()
    }

    pub fn get_ref(&self) -> Option<&R> {
        self.inner.as_ref()
    }

    /// Drop the source and release the buffers. Idempotent.
    pub fn close(&mut self) {
        self.inner = None;
        self.engine.release();
    }

    /// Release the buffers and return the source. Unread transformed bytes
    /// are discarded.
    pub fn into_inner(mut self) -> CryptoResult<R> {
        self.engine.release();
        self.inner.take().ok_or(CryptoError::StreamClosed)
    }

    /// One read from the source into the engine, then transform.
    fn fill(&mut self) -> io::Result<()> {
        let source = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::from(CryptoError::StreamClosed))?;
        let spare = self.engine.spare_mut()?;
        let n = loop {
            match source.read(spare) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
        }
        self.engine.commit(n);
        self.engine.process()?;
        Ok(())
    }
}

impl<R: Read, P: CtrPrimitive> Read for CryptoReader<R, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.engine.is_closed() {
            return Err(CryptoError::StreamClosed.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let pending = self.engine.output();
            if !pending.is_empty() {
                let n = pending.len().min(buf.len());
                buf[..n].copy_from_slice(&pending[..n]);
                self.engine.consume(n);
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

impl<R: Read, P: CtrPrimitive> std::fmt::Debug for CryptoReader<R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoReader")
            .field("engine", &self.engine)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}
