//! Error types for the mode engines and their block cipher collaborators.

use thiserror::Error;

/// Errors raised by a [`BlockCipher`](crate::cipher::BlockCipher) adapter.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CipherError {
    /// The key length is not one of the cipher's legal sizes.
    #[error("invalid key length {len}; legal sizes are {legal:?}")]
    InvalidKey {
        /// Length of the rejected key in bytes.
        len: usize,
        /// Key lengths the cipher accepts.
        legal: &'static [usize],
    },
}

/// Errors raised while configuring or driving a cipher mode.
///
/// Every variant is detected before the first block cipher call of the
/// failing operation, so the chaining register is never left half-updated.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ModeError {
    /// The key length is not accepted by the underlying cipher.
    #[error("invalid key length {len}; legal sizes are {legal:?}")]
    InvalidKey {
        /// Length of the rejected key in bytes.
        len: usize,
        /// Key lengths the cipher accepts.
        legal: &'static [usize],
    },
    /// The IV is too short, too long, or the wrong width for the mode.
    #[error("invalid iv length {len}: {reason}")]
    InvalidIv {
        /// Length of the rejected IV in bytes.
        len: usize,
        /// Which sizing rule was violated.
        reason: &'static str,
    },
    /// A feedback segment is empty or wider than the cipher block.
    #[error("segment size {size} is outside 1..={block_size}")]
    InvalidSegmentSize {
        /// The rejected segment size in bytes.
        size: usize,
        /// Cipher block size, the widest legal segment.
        block_size: usize,
    },
    /// The parallel degree or parallel block size is out of bounds or misaligned.
    #[error("invalid parallel configuration: {0}")]
    InvalidParallelConfig(&'static str),
    /// `transform` was called before a successful `initialize`.
    #[error("the mode has not been initialized")]
    NotInitialized,
    /// The requested batch width needs instructions this processor lacks.
    #[error("{feature} batching is not supported by this cipher on this processor")]
    HardwareUnsupported {
        /// The missing capability, e.g. `"8-wide"`.
        feature: &'static str,
    },
    /// The input length is not a multiple of the mode's block size.
    #[error("input length {len} is not a multiple of the {block_size} byte block size")]
    UnalignedInput {
        /// Number of bytes supplied.
        len: usize,
        /// Block size the mode requires.
        block_size: usize,
    },
    /// The output buffer cannot hold the transformed bytes.
    #[error("output buffer has {available} bytes after the offset, {needed} required")]
    OutputTooSmall {
        /// Bytes the transform will write.
        needed: usize,
        /// Bytes available after the output offset.
        available: usize,
    },
    /// An offset points past the end of its buffer.
    #[error("offset {offset} exceeds buffer length {len}")]
    OffsetOutOfRange {
        /// The rejected offset.
        offset: usize,
        /// Length of the buffer it indexes.
        len: usize,
    },
}

impl From<CipherError> for ModeError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::InvalidKey { len, legal } => ModeError::InvalidKey { len, legal },
        }
    }
}
