//! Chaining register: the IV, counter or shift register a mode carries
//! between calls, plus the helpers lanes use to derive their own copies.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Private register copy owned by one parallel lane. Wiped on drop.
pub type LaneState = Zeroizing<Vec<u8>>;

/// Mutable chaining state of a mode.
///
/// Holds the CBC IV (1, 4 or 8 blocks), the CFB shift register, the CTR
/// counter or the OFB feedback block. Always sized to the mode's register
/// width, overwritten with zeros when dropped or when the mode is destroyed.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct Register {
    bytes: Vec<u8>,
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Register({} bytes)", self.bytes.len())
    }
}

impl Register {
    /// A zeroed register `width` bytes wide.
    pub fn zeroed(width: usize) -> Self {
        Register {
            bytes: vec![0u8; width],
        }
    }

    /// A `width` byte register holding `iv` right-aligned, zero padded on the left.
    ///
    /// Callers check the IV length first; a longer `iv` panics.
    pub(crate) fn from_iv(iv: &[u8], width: usize) -> Self {
        assert!(iv.len() <= width, "iv wider than the register");
        let mut reg = Register::zeroed(width);
        reg.bytes[width - iv.len()..].copy_from_slice(iv);
        reg
    }

    /// Register contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Register width in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the register is empty (an uninitialized mode).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A lane-private copy of the register.
    pub fn to_lane(&self) -> LaneState {
        Zeroizing::new(self.bytes.clone())
    }

    /// Overwrites the register with a lane's final state.
    ///
    /// `state` must be exactly the register width.
    pub(crate) fn store(&mut self, state: &[u8]) {
        self.bytes.copy_from_slice(state);
    }

    /// Drops the oldest `block.len()` bytes and appends `block`.
    pub(crate) fn shift_in(&mut self, block: &[u8]) {
        let n = block.len();
        assert!(n <= self.bytes.len());
        self.bytes.rotate_left(n);
        let width = self.bytes.len();
        self.bytes[width - n..].copy_from_slice(block);
    }

    /// Adds one to the register as a big-endian counter.
    pub fn increment(&mut self) {
        increment(&mut self.bytes);
    }

    /// The register advanced by `n` counter steps, leaving `self` untouched.
    pub fn increased(&self, n: u64) -> LaneState {
        let mut lane = self.to_lane();
        increase(&mut lane, n);
        lane
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }
}

/// Adds one to `counter`, read as a big-endian integer, wrapping at the full width.
pub fn increment(counter: &mut [u8]) {
    for byte in counter.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            return;
        }
    }
}

/// Adds `n` to `counter`, read as a big-endian integer, wrapping at the full width.
///
/// Equivalent to calling [`increment`] `n` times.
pub fn increase(counter: &mut [u8], n: u64) {
    let mut carry = u128::from(n);
    for byte in counter.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = u128::from(*byte) + (carry & 0xFF);
        *byte = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
}

/// Applies `op(dst_part, stream_part)` over `stream[offset..offset + dst.len()]`,
/// where `stream` is the virtual concatenation `seed ‖ input`.
///
/// For a feedback mode with register width `seed.len()`, position `x` of this
/// stream is the ciphertext that chains into input byte `x`.
fn with_feedback(
    seed: &[u8],
    input: &[u8],
    offset: usize,
    dst: &mut [u8],
    op: impl Fn(&mut [u8], &[u8]),
) {
    let width = seed.len();
    let end = offset + dst.len();

    if offset >= width {
        op(dst, &input[offset - width..end - width]);
    } else if end <= width {
        op(dst, &seed[offset..end]);
    } else {
        let split = width - offset;
        op(&mut dst[..split], &seed[offset..]);
        op(&mut dst[split..], &input[..end - width]);
    }
}

/// Copies the feedback stream at `offset` into `dst`.
pub(crate) fn copy_feedback(seed: &[u8], input: &[u8], offset: usize, dst: &mut [u8]) {
    with_feedback(seed, input, offset, dst, |d, s| d.copy_from_slice(s));
}

/// XORs the feedback stream at `offset` into `dst`.
pub(crate) fn xor_feedback(seed: &[u8], input: &[u8], offset: usize, dst: &mut [u8]) {
    with_feedback(seed, input, offset, dst, xor_in_place);
}

/// The `seed.len()` bytes of `seed ‖ input[..end]` that precede `input[end]`.
///
/// This is the register a feedback mode holds right before processing
/// `input[end..]`, which lets a lane start mid-stream without waiting for
/// the lanes before it.
pub(crate) fn window_before(seed: &[u8], input: &[u8], end: usize) -> LaneState {
    let mut window = Zeroizing::new(vec![0u8; seed.len()]);
    copy_feedback(seed, input, end, &mut window);
    window
}

/// `dst[i] ^= src[i]` over the common length.
pub(crate) fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}
