//! Encrypting output stream: `std::io::Write` over a [`CtrEngine`]

use std::io::{self, Write};

use tracing::{debug, warn};

use crate::engine::{CtrEngine, StreamOptions};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::CipherKey;
use crate::primitive::{AesCtr, CtrPrimitive, Direction};

/// Transforms everything written to it and forwards the result to `W`.
///
/// Output is produced a buffer at a time, so bytes may sit in the engine
/// until the buffer fills or [`flush`](Write::flush) is called. Splitting the
/// input differently across `write` calls never changes the output.
///
/// Call [`close`](Self::close) (or [`into_inner`](Self::into_inner)) to
/// observe errors. Dropping an open writer flushes on a best-effort basis
/// and discards any error.
pub struct CryptoWriter<W: Write, P: CtrPrimitive = AesCtr> {
    inner: Option<W>,
    engine: CtrEngine<P>,
    closed: bool,
}

impl<W: Write> CryptoWriter<W, AesCtr> {
    /// AES-CTR writer. Key width picks AES-128/192/256.
    pub fn new(
        inner: W,
        key: &CipherKey,
        iv: &[u8],
        options: StreamOptions,
    ) -> CryptoResult<Self> {
        let engine = CtrEngine::new(AesCtr::new(), key, iv, options)?;
        Ok(Self::with_engine(inner, engine))
    }
}

impl<W: Write, P: CtrPrimitive> CryptoWriter<W, P> {
    pub fn with_engine(inner: W, engine: CtrEngine<P>) -> Self {
        Self {
            inner: Some(inner),
            engine,
            closed: false,
        }
    }

    pub fn stream_offset(&self) -> u64 {
        self.engine.stream_offset()
    }

    pub fn direction(&self) -> Direction {
        self.engine.direction()
    }

    /// The sink, or `None` once the writer is closed.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush all buffered bytes, flush and drop the sink, release the
    /// buffers. Idempotent: later calls return `Ok(())`.
    pub fn close(&mut self) -> CryptoResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.finish();
        self.inner = None;
        self.engine.release();
        self.closed = true;
        debug!(
            offset = self.engine.stream_offset(),
            direction = %self.engine.direction(),
            "crypto writer closed"
        );
        result.map_err(CryptoError::from_io)
    }

    /// Flush everything and hand back the sink instead of dropping it.
    pub fn into_inner(mut self) -> CryptoResult<W> {
        if self.closed {
            return Err(CryptoError::StreamClosed);
        }
        let result = self.finish();
        self.engine.release();
        self.closed = true;
        result.map_err(CryptoError::from_io)?;
        self.inner.take().ok_or(CryptoError::StreamClosed)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.transform_and_drain()?;
        self.sink()?.flush()
    }

    fn sink(&mut self) -> io::Result<&mut W> {
        self.inner
            .as_mut()
            .ok_or_else(|| CryptoError::StreamClosed.into())
    }

    /// Deliver output left over from an earlier failed sink write, then
    /// transform what is staged and deliver that.
    fn transform_and_drain(&mut self) -> io::Result<()> {
        self.write_pending()?;
        self.engine.process()?;
        self.write_pending()
    }

    /// Hand pending output to the sink, consuming it as the sink accepts
    /// it, so a failed write leaves exactly the undelivered tail pending.
    fn write_pending(&mut self) -> io::Result<()> {
        while !self.engine.output().is_empty() {
            let sink = self
                .inner
                .as_mut()
                .ok_or_else(|| io::Error::from(CryptoError::StreamClosed))?;
            match sink.write(self.engine.output()) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "sink accepted no transformed bytes",
                    ))
                }
                Ok(n) => self.engine.consume(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<W: Write, P: CtrPrimitive> Write for CryptoWriter<W, P> {
    /// Stage `buf`, transforming and delivering each full buffer.
    ///
    /// A sink failure after some of `buf` was taken reports the bytes taken
    /// so far; the undelivered output stays pending and the next call
    /// retries it first, surfacing the error again if the sink still fails.
    /// A primitive failure is always an error and the offset stays at
    /// [`stream_offset`](Self::stream_offset).
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(CryptoError::StreamClosed.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.write_pending()?;

        let mut taken = 0;
        while taken < buf.len() {
            taken += self.engine.stage(&buf[taken..])?;
            if self.engine.is_full() {
                self.engine.process()?;
                if let Err(e) = self.write_pending() {
                    if taken == 0 {
                        return Err(e);
                    }
                    debug!(taken, error = %e, "sink write failed, output kept pending");
                    return Ok(taken);
                }
            }
        }
        Ok(taken)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(CryptoError::StreamClosed.into());
        }
        self.finish()
    }
}

impl<W: Write, P: CtrPrimitive> Drop for CryptoWriter<W, P> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(error = %e, "crypto writer dropped with unflushed data");
            }
        }
    }
}

impl<W: Write, P: CtrPrimitive> std::fmt::Debug for CryptoWriter<W, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoWriter")
            .field("engine", &self.engine)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
