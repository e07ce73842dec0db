//! kuber-crypto: streaming AES-CTR transform for kuber
//!
//! Encrypts and decrypts byte streams of unbounded length through a fixed
//! buffer, one block-cipher counter per 16-byte block:
//!
//! ```text
//! source ─► ChunkedPipeline ─► CryptoWriter ─► CtrEngine ─► sink
//!                                                 │
//!                        CtrPrimitive (AesCtr) ◄──┘  iv = base_iv + offset / 16
//! ```
//!
//! Output is byte-for-byte the same however the input is split, and a stream
//! started at offset `k` continues exactly where a stream stopped at `k`, so
//! partial uploads can resume mid-file. There is no framing and no
//! authentication; callers persist the base IV next to the ciphertext.

pub mod counter;
pub mod engine;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod primitive;
pub mod reader;
pub mod writer;

pub use counter::{block_position, derive_iv, derive_iv_into};
pub use engine::{CtrEngine, StreamOptions, DEFAULT_BUFFER_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use keys::{generate_iv, CipherKey};
pub use pipeline::{ChunkedPipeline, BULK_CHUNK_SIZE, DEFAULT_CHUNK_SIZE};
pub use primitive::{AesCtr, BlockwiseAesCtr, CtrPrimitive, Direction, AES_KEY_SIZES};
pub use reader::CryptoReader;
pub use writer::CryptoWriter;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Size of the base IV in bytes (one AES block)
pub const IV_SIZE: usize = BLOCK_SIZE;
