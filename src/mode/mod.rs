//! Mode engines and the contract they share.
//!
//! Every engine owns its block cipher and a [`ModeState`]: the
//! configuration flags, the chaining [`Register`] and the
//! [`ParallelProfile`]. A `transform` validates all buffer and state
//! preconditions first, then either runs serially or hands full passes to
//! the fork-join scheduler. Output and the final register are the same
//! bytes a single-threaded, single-block implementation would produce.

mod cbc;
mod cfb;
mod ctr;
mod ecb;
mod ofb;

pub use cbc::Cbc;
pub use cfb::Cfb;
pub use ctr::Ctr;
pub use ecb::Ecb;
pub use ofb::Ofb;

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::cipher::BlockCipher;
use crate::error::ModeError;
use crate::parallel::ParallelProfile;
use crate::register::Register;

/// Public surface of a block cipher mode.
pub trait CipherMode {
    /// Mode and cipher name, e.g. `"AES-CBC"`.
    fn name(&self) -> String;

    /// Bytes per mode step: the cipher block, or the IV width for wide CBC.
    fn block_size(&self) -> usize;

    /// Key lengths the underlying cipher accepts.
    fn legal_key_sizes(&self) -> &'static [usize];

    /// Keys the cipher and loads the chaining register from `iv`.
    ///
    /// All arguments are checked before any state changes, so a failed call
    /// leaves a previously initialized mode usable. Calling it again rekeys.
    fn initialize(&mut self, encryption: bool, key: &[u8], iv: &[u8]) -> Result<(), ModeError>;

    /// Transforms `input[in_offset..]` into `output[out_offset..]`.
    ///
    /// The register advances so that consecutive calls whose lengths are
    /// multiples of [`block_size`](Self::block_size) behave like a single
    /// call over the concatenated input. A call ending on a partial block
    /// (CFB, OFB, CTR) consumes that block's whole keystream, so the next
    /// call starts on a fresh block.
    fn transform_at(
        &mut self,
        input: &[u8],
        in_offset: usize,
        output: &mut [u8],
        out_offset: usize,
    ) -> Result<(), ModeError>;

    /// Transforms all of `input` into the front of `output`.
    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), ModeError> {
        self.transform_at(input, 0, output, 0)
    }

    /// Whether large inputs are split across parallel lanes.
    fn is_parallel(&self) -> bool;

    /// Whether the mode was initialized for encryption.
    fn is_encryption(&self) -> bool;

    /// Whether `initialize` has succeeded since construction or `destroy`.
    fn is_initialized(&self) -> bool;

    /// Current chaining register (IV, counter or shift register).
    fn iv(&self) -> &[u8];

    /// Zeroizes the register, unkeys the cipher and returns to the uninitialized state.
    fn destroy(&mut self);

    /// Parallel profile in force.
    fn profile(&self) -> &ParallelProfile;

    /// Bytes handled per parallel pass.
    fn parallel_block_size(&self) -> usize {
        self.profile().parallel_block_size()
    }

    /// Smallest input that is split across lanes.
    fn parallel_minimum_size(&self) -> usize {
        self.profile().parallel_minimum_size()
    }

    /// See [`ParallelProfile::set_parallel_block_size`].
    fn set_parallel_block_size(&mut self, size: usize) -> Result<(), ModeError>;

    /// See [`ParallelProfile::set_parallel`].
    fn set_parallel(&mut self, enabled: bool);

    /// See [`ParallelProfile::set_max_degree`].
    fn set_max_degree(&mut self, degree: usize) -> Result<(), ModeError>;
}

/// Direction flag, initialized flag and mode block size.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct ModeConfig {
    pub(crate) encryption: bool,
    pub(crate) initialized: bool,
    pub(crate) block_size: usize,
}

/// State owned by exactly one mode instance.
#[derive(Debug)]
pub(crate) struct ModeState {
    pub(crate) config: ModeConfig,
    pub(crate) register: Register,
    pub(crate) profile: ParallelProfile,
}

impl ModeState {
    pub(crate) fn new(block_size: usize, profile: ParallelProfile) -> Self {
        ModeState {
            config: ModeConfig {
                encryption: false,
                initialized: false,
                block_size,
            },
            register: Register::default(),
            profile,
        }
    }

    /// Installs a fully validated configuration.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    pub(crate) fn commit(
        &mut self,
        name: &str,
        encryption: bool,
        block_size: usize,
        register: Register,
    ) {
        self.register = register;
        self.config = ModeConfig {
            encryption,
            initialized: true,
            block_size,
        };

        #[cfg(feature = "tracing")]
        debug!(
            mode = name,
            encryption,
            block_size,
            register = self.register.len(),
            degree = self.profile.max_degree(),
            simd = ?self.profile.simd_width(),
            "initialized"
        );
    }

    pub(crate) fn destroy(&mut self, block_size: usize) {
        self.register.clear();
        self.config = ModeConfig {
            encryption: false,
            initialized: false,
            block_size,
        };
    }

    /// Validates a transform request and returns the number of bytes to process.
    pub(crate) fn check_transform(
        &self,
        input: &[u8],
        in_offset: usize,
        output: &[u8],
        out_offset: usize,
        aligned: bool,
    ) -> Result<usize, ModeError> {
        if !self.config.initialized {
            return Err(ModeError::NotInitialized);
        }
        if in_offset > input.len() {
            return Err(ModeError::OffsetOutOfRange {
                offset: in_offset,
                len: input.len(),
            });
        }
        if out_offset > output.len() {
            return Err(ModeError::OffsetOutOfRange {
                offset: out_offset,
                len: output.len(),
            });
        }

        let len = input.len() - in_offset;
        if aligned && !len.is_multiple_of(self.config.block_size) {
            return Err(ModeError::UnalignedInput {
                len,
                block_size: self.config.block_size,
            });
        }

        let available = output.len() - out_offset;
        if available < len {
            return Err(ModeError::OutputTooSmall {
                needed: len,
                available,
            });
        }
        Ok(len)
    }
}

/// Rejects a profile the cipher can not serve.
pub(crate) fn check_profile<C: BlockCipher>(
    cipher: &C,
    profile: &ParallelProfile,
) -> Result<(), ModeError> {
    if profile.block_size() != cipher.block_size() {
        return Err(ModeError::InvalidParallelConfig(
            "profile block size does not match the cipher block size",
        ));
    }
    if profile.simd_width() > cipher.simd_width() {
        return Err(ModeError::HardwareUnsupported {
            feature: profile.simd_width().feature(),
        });
    }
    profile.validate()
}

/// Rejects a key length the cipher does not accept.
pub(crate) fn check_key<C: BlockCipher>(cipher: &C, key: &[u8]) -> Result<(), ModeError> {
    if cipher.legal_key_sizes().contains(&key.len()) {
        Ok(())
    } else {
        Err(ModeError::InvalidKey {
            len: key.len(),
            legal: cipher.legal_key_sizes(),
        })
    }
}

/// Checks a 1..=`width` byte IV that is left-padded into the register.
pub(crate) fn check_padded_iv(iv: &[u8], width: usize) -> Result<(), ModeError> {
    if iv.is_empty() {
        return Err(ModeError::InvalidIv {
            len: 0,
            reason: "the iv can not be empty",
        });
    }
    if iv.len() > width {
        return Err(ModeError::InvalidIv {
            len: iv.len(),
            reason: "longer than the mode register",
        });
    }
    Ok(())
}

/// Checks a feedback segment of 1..=`block_size` bytes.
pub(crate) fn check_segment(size: usize, block_size: usize) -> Result<(), ModeError> {
    if size == 0 || size > block_size {
        return Err(ModeError::InvalidSegmentSize { size, block_size });
    }
    Ok(())
}

/// Accessors every engine implements the same way over `self.cipher` and `self.state`.
macro_rules! mode_accessors {
    ($label:literal) => {
        fn name(&self) -> String {
            format!("{}-{}", self.cipher.name(), $label)
        }

        fn block_size(&self) -> usize {
            self.state.config.block_size
        }

        fn legal_key_sizes(&self) -> &'static [usize] {
            self.cipher.legal_key_sizes()
        }

        fn is_encryption(&self) -> bool {
            self.state.config.encryption
        }

        fn is_initialized(&self) -> bool {
            self.state.config.initialized
        }

        fn iv(&self) -> &[u8] {
            self.state.register.as_bytes()
        }

        fn destroy(&mut self) {
            self.cipher.destroy();
            self.state.destroy(self.cipher.block_size());
        }

        fn profile(&self) -> &$crate::parallel::ParallelProfile {
            &self.state.profile
        }

        fn set_parallel_block_size(&mut self, size: usize) -> Result<(), $crate::error::ModeError> {
            self.state.profile.set_parallel_block_size(size)
        }

        fn set_parallel(&mut self, enabled: bool) {
            self.state.profile.set_parallel(enabled);
        }

        fn set_max_degree(&mut self, degree: usize) -> Result<(), $crate::error::ModeError> {
            self.state.profile.set_max_degree(degree)
        }
    };
}

pub(crate) use mode_accessors;
