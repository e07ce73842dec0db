//! Counter arithmetic for CTR mode
//!
//! The IV for block `n` of a stream is `base_iv + n`, treating the IV as a
//! big-endian unsigned integer. The counter is a `u64`, so only the lowest
//! 8 bytes of the IV absorb counter bytes, but the carry runs through every
//! byte of the IV. Overflow past the most significant byte wraps.
//!
//! ```text
//! offset ──► counter = offset / block_size ──► iv = base_iv + counter
//!        └─► padding = offset % block_size   (keystream bytes to discard)
//! ```

/// Number of counter bytes absorbed by the IV (a `u64` is 8 bytes).
const COUNTER_BYTES: usize = 8;

/// Write `base_iv + counter` into `iv`.
///
/// `base_iv` and `iv` must have the same length. Allocation-free, so the
/// engine can reseed its primitive without touching the heap.
pub fn derive_iv_into(base_iv: &[u8], counter: u64, iv: &mut [u8]) {
    debug_assert_eq!(base_iv.len(), iv.len(), "IV width mismatch");

    let mut counter = counter;
    let mut carry = 0u16;
    for (i, (out, &base)) in iv.iter_mut().zip(base_iv).rev().enumerate() {
        let mut sum = base as u16 + carry;
        if i < COUNTER_BYTES {
            sum += (counter & 0xff) as u16;
            counter >>= 8;
        }
        *out = sum as u8;
        carry = sum >> 8;
    }
}

/// Return `base_iv + counter` as a new array.
///
/// `counter == 0` returns `base_iv` unchanged.
pub fn derive_iv<const N: usize>(base_iv: &[u8; N], counter: u64) -> [u8; N] {
    let mut iv = [0u8; N];
    derive_iv_into(base_iv, counter, &mut iv);
    iv
}

/// Split an absolute stream offset into `(block counter, padding)`.
pub fn block_position(offset: u64, block_size: usize) -> (u64, usize) {
    let block_size = block_size as u64;
    (offset / block_size, (offset % block_size) as usize)
}
