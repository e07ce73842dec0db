//! Chunked pipeline: pump a source through a transform into a sink
//!
//! Reads fixed-size chunks until the source reports end of input, feeds each
//! chunk to the transform, then flushes and closes both ends. Both ends are
//! closed even when the source fails mid-read; in that case whatever was
//! transformed before the failure has already reached the sink.
//!
//! The transform keeps one keystream for the whole run, so the output does
//! not depend on the chunk size.

use std::io::{self, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::engine::CtrEngine;
use crate::error::{CryptoError, CryptoResult};
use crate::primitive::CtrPrimitive;
use crate::writer::CryptoWriter;

/// Chunk size for interactive file encryption.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Chunk size for bulk transfers (100 KiB).
pub const BULK_CHUNK_SIZE: usize = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedPipeline {
    chunk_size: usize,
}

impl Default for ChunkedPipeline {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkedPipeline {
    pub fn new(chunk_size: usize) -> CryptoResult<Self> {
        if chunk_size == 0 {
            return Err(CryptoError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    pub fn bulk() -> Self {
        Self {
            chunk_size: BULK_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Pump `source` through `writer` and close it. Returns the number of
    /// bytes read from the source.
    ///
    /// The source is dropped and the writer closed on every path. If both
    /// the pump and the close fail, the pump error is returned and the close
    /// error is logged.
    pub fn run<R, W, P>(&self, source: R, mut writer: CryptoWriter<W, P>) -> CryptoResult<u64>
    where
        R: Read,
        W: Write,
        P: CtrPrimitive,
    {
        debug!(
            chunk_size = self.chunk_size,
            direction = %writer.direction(),
            offset = writer.stream_offset(),
            "pipeline started"
        );
        let pumped = self.pump(source, &mut writer);
        let closed = writer.close();
        self.settle(pumped, closed)
    }

    fn pump<R, W, P>(&self, mut source: R, writer: &mut CryptoWriter<W, P>) -> CryptoResult<u64>
    where
        R: Read,
        W: Write,
        P: CtrPrimitive,
    {
        let mut chunk = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut total = 0u64;
        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CryptoError::Io(e)),
            };
            writer
                .write_all(&chunk[..n])
                .map_err(CryptoError::from_io)?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Async variant of [`run`](Self::run) over tokio I/O.
    ///
    /// Only source and sink I/O is awaited; the transform runs inline on the
    /// calling task. On every path the engine output is drained, the sink is
    /// flushed and shut down, and the engine is released.
    pub async fn run_async<R, W, P>(
        &self,
        source: R,
        mut sink: W,
        mut engine: CtrEngine<P>,
    ) -> CryptoResult<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        P: CtrPrimitive,
    {
        debug!(
            chunk_size = self.chunk_size,
            direction = %engine.direction(),
            offset = engine.stream_offset(),
            "async pipeline started"
        );
        let pumped = self.pump_async(source, &mut sink, &mut engine).await;
        let finished = finish_async(&mut engine, &mut sink).await;
        engine.release();
        self.settle(pumped, finished)
    }

    async fn pump_async<R, W, P>(
        &self,
        mut source: R,
        sink: &mut W,
        engine: &mut CtrEngine<P>,
    ) -> CryptoResult<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        P: CtrPrimitive,
    {
        let mut chunk = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut total = 0u64;
        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let mut taken = 0;
            while taken < n {
                taken += engine.stage(&chunk[taken..n])?;
                if engine.is_full() {
                    drain_async(engine, sink).await?;
                }
            }
            total += n as u64;
        }
        Ok(total)
    }

    fn settle(&self, pumped: CryptoResult<u64>, closed: CryptoResult<()>) -> CryptoResult<u64> {
        match (pumped, closed) {
            (Ok(total), Ok(())) => {
                debug!(bytes = total, chunk_size = self.chunk_size, "pipeline finished");
                Ok(total)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "closing transform after failed pipeline run");
                Err(e)
            }
        }
    }
}

async fn write_pending_async<W, P>(engine: &mut CtrEngine<P>, sink: &mut W) -> CryptoResult<()>
where
    W: AsyncWrite + Unpin,
    P: CtrPrimitive,
{
    while !engine.output().is_empty() {
        let n = sink.write(engine.output()).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        engine.consume(n);
    }
    Ok(())
}

async fn drain_async<W, P>(engine: &mut CtrEngine<P>, sink: &mut W) -> CryptoResult<()>
where
    W: AsyncWrite + Unpin,
    P: CtrPrimitive,
{
    write_pending_async(engine, sink).await?;
    engine.process()?;
    write_pending_async(engine, sink).await
}

async fn finish_async<W, P>(engine: &mut CtrEngine<P>, sink: &mut W) -> CryptoResult<()>
where
    W: AsyncWrite + Unpin,
    P: CtrPrimitive,
{
    let drained = drain_async(engine, sink).await;
    let flushed = sink.flush().await;
    let shut = sink.shutdown().await;
    drained?;
    flushed?;
    shut?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StreamOptions;
    use crate::keys::CipherKey;
    use crate::primitive::AesCtr;

    fn key() -> CipherKey {
        CipherKey::from_bytes(vec![0x24u8; 16])
    }

    /// Yields `data`, then fails.
    struct Broken<'a> {
        data: &'a [u8],
    }

    impl Read for Broken<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away"));
            }
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkedPipeline::new(0),
            Err(CryptoError::InvalidChunkSize)
        ));
        assert_eq!(ChunkedPipeline::default().chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(ChunkedPipeline::bulk().chunk_size(), 102_400);
    }

    #[test]
    fn test_run_counts_bytes() {
        let data = vec![0x61u8; 10_000];
        let mut sink = Vec::new();
        let writer = CryptoWriter::new(&mut sink, &key(), &[0u8; 16], StreamOptions::encrypt())
            .unwrap();
        let total = ChunkedPipeline::new(333).unwrap().run(&data[..], writer).unwrap();
        assert_eq!(total, 10_000);
        assert_eq!(sink.len(), 10_000);
    }

    #[test]
    fn test_empty_input() {
        let mut sink = Vec::new();
        let writer = CryptoWriter::new(&mut sink, &key(), &[0u8; 16], StreamOptions::encrypt())
            .unwrap();
        let total = ChunkedPipeline::default().run(io::empty(), writer).unwrap();
        assert_eq!(total, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_source_failure_still_flushes_sink() {
        let data = [0x11u8; 100];
        let mut sink = Vec::new();
        let writer = CryptoWriter::new(&mut sink, &key(), &[0u8; 16], StreamOptions::encrypt())
            .unwrap();
        let err = ChunkedPipeline::new(64)
            .unwrap()
            .run(Broken { data: &data }, writer)
            .unwrap_err();
        match err {
            CryptoError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected Io, got {other:?}"),
        }
        // Partial output: everything read before the failure was delivered.
        assert_eq!(sink.len(), 100);
    }

    #[tokio::test]
    async fn test_async_matches_blocking() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        let options = StreamOptions::encrypt().with_buffer_size(1000);

        let mut blocking = Vec::new();
        let writer = CryptoWriter::new(&mut blocking, &key(), &[3u8; 16], options).unwrap();
        ChunkedPipeline::new(777).unwrap().run(&data[..], writer).unwrap();

        let mut async_out = Vec::new();
        let engine = CtrEngine::new(AesCtr::new(), &key(), &[3u8; 16], options).unwrap();
        let total = ChunkedPipeline::bulk()
            .run_async(&data[..], &mut async_out, engine)
            .await
            .unwrap();
        assert_eq!(total, 20_000);
        assert_eq!(async_out, blocking);
    }

    #[tokio::test]
    async fn test_async_empty_input() {
        let mut out = Vec::new();
        let engine =
            CtrEngine::new(AesCtr::new(), &key(), &[0u8; 16], StreamOptions::decrypt()).unwrap();
        let total = ChunkedPipeline::default()
            .run_async(tokio::io::empty(), &mut out, engine)
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(out.is_empty());
    }
}
