//! Electronic Codebook. Every block is independent, so it splits across
//! lanes with no shared state at all. There is no chaining to hide
//! repeated plaintext blocks; use it for testing, not for data.

use super::{CipherMode, ModeState, check_key, check_profile, mode_accessors};
use crate::cipher::{BlockCipher, Rijndael, apply_blocks_dyn};
use crate::error::ModeError;
use crate::parallel::{ParallelProfile, fork_join};
use crate::register::Register;

/// ECB mode over any [`BlockCipher`], AES by default.
pub struct Ecb<C: BlockCipher = Rijndael> {
    cipher: C,
    state: ModeState,
}

impl Default for Ecb<Rijndael> {
    fn default() -> Self {
        Ecb::new(Rijndael::new())
    }
}

impl<C: BlockCipher> Ecb<C> {
    /// ECB over `cipher` with a profile detected from the machine.
    pub fn new(cipher: C) -> Self {
        let profile = ParallelProfile::detect(cipher.block_size(), cipher.simd_width());
        let state = ModeState::new(cipher.block_size(), profile);
        Ecb { cipher, state }
    }

    /// ECB over `cipher` with an explicit profile.
    pub fn with_profile(cipher: C, profile: ParallelProfile) -> Result<Self, ModeError> {
        check_profile(&cipher, &profile)?;
        let state = ModeState::new(cipher.block_size(), profile);
        Ok(Ecb { cipher, state })
    }

    /// The underlying block cipher.
    pub fn cipher(&self) -> &C {
        &self.cipher
    }
}

impl<C: BlockCipher> CipherMode for Ecb<C> {
    mode_accessors!("ECB");

    /// `iv` is ignored.
    fn initialize(&mut self, encryption: bool, key: &[u8], _iv: &[u8]) -> Result<(), ModeError> {
        check_key(&self.cipher, key)?;
        self.state.profile.validate()?;

        self.cipher.initialize(encryption, key)?;
        let name = self.name();
        let block_size = self.cipher.block_size();
        self.state
            .commit(&name, encryption, block_size, Register::default());
        Ok(())
    }

    fn transform_at(
        &mut self,
        input: &[u8],
        in_offset: usize,
        output: &mut [u8],
        out_offset: usize,
    ) -> Result<(), ModeError> {
        let len = self
            .state
            .check_transform(input, in_offset, output, out_offset, true)?;
        let input = &input[in_offset..];
        let output = &mut output[out_offset..out_offset + len];
        let simd = self.state.profile.simd_width();
        let decrypt = !self.state.config.encryption;
        let cipher = &self.cipher;

        let plan = self.state.profile.plan(len, cipher.block_size());
        for pass in &plan.passes {
            let range = pass.range();
            fork_join(pass, &input[range.clone()], &mut output[range], |_, inp, out| {
                apply_blocks_dyn(cipher, simd, decrypt, inp, out)
            });
        }

        let tail = plan.serial;
        apply_blocks_dyn(cipher, simd, decrypt, &input[tail.clone()], &mut output[tail]);
        Ok(())
    }

    fn is_parallel(&self) -> bool {
        self.state.profile.is_parallel()
    }
}
