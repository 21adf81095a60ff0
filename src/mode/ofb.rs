//! Output Feedback.
//!
//! `O_i = E(R_{i-1})`, `Output_i = Input_i ⊕ O_i[..s]`, and the register
//! shifts in `O_i[..s]`. With the default full-block segment the register
//! is simply the last keystream block. Every keystream block depends on the
//! previous one and nothing else, so this mode always runs on the calling
//! thread whatever the profile says.

use zeroize::Zeroizing;

use super::{
    CipherMode, ModeState, check_key, check_padded_iv, check_profile, check_segment,
    mode_accessors,
};
use crate::cipher::{BlockCipher, Rijndael};
use crate::error::ModeError;
use crate::parallel::ParallelProfile;
use crate::register::{Register, xor_in_place};

/// OFB mode over any [`BlockCipher`], AES by default.
pub struct Ofb<C: BlockCipher = Rijndael> {
    cipher: C,
    state: ModeState,
    segment_size: usize,
}

impl Default for Ofb<Rijndael> {
    fn default() -> Self {
        Ofb::new(Rijndael::new())
    }
}

impl<C: BlockCipher> Ofb<C> {
    /// OFB over `cipher`.
    pub fn new(cipher: C) -> Self {
        let profile = ParallelProfile::detect(cipher.block_size(), cipher.simd_width());
        Ofb::build(cipher, profile)
    }

    /// OFB over `cipher` with an explicit profile. The profile is kept for
    /// inspection; it never makes OFB parallel.
    pub fn with_profile(cipher: C, profile: ParallelProfile) -> Result<Self, ModeError> {
        check_profile(&cipher, &profile)?;
        Ok(Ofb::build(cipher, profile))
    }

    fn build(cipher: C, profile: ParallelProfile) -> Self {
        let block_size = cipher.block_size();
        Ofb {
            cipher,
            state: ModeState::new(block_size, profile),
            segment_size: block_size,
        }
    }

    /// Sets the keystream bytes used and fed back per step, 1..=block size.
    ///
    /// Takes effect at the next `initialize`.
    pub fn with_segment_size(mut self, size: usize) -> Result<Self, ModeError> {
        check_segment(size, self.cipher.block_size())?;
        self.segment_size = size;
        Ok(self)
    }

    /// Bytes per feedback step.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// The underlying block cipher.
    pub fn cipher(&self) -> &C {
        &self.cipher
    }
}

impl<C: BlockCipher> CipherMode for Ofb<C> {
    mode_accessors!("OFB");

    fn initialize(&mut self, encryption: bool, key: &[u8], iv: &[u8]) -> Result<(), ModeError> {
        let block_size = self.cipher.block_size();
        check_padded_iv(iv, block_size)?;
        check_key(&self.cipher, key)?;

        self.cipher.initialize(true, key)?;
        let name = self.name();
        self.state.commit(
            &name,
            encryption,
            self.segment_size,
            Register::from_iv(iv, block_size),
        );
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
            .check_transform(input, in_offset, output, out_offset, false)?;
        let input = &input[in_offset..];
        let output = &mut output[out_offset..out_offset + len];
        let segment = self.segment_size;
        let mut keystream = Zeroizing::new(vec![0u8; self.cipher.block_size()]);

        for (inp, out) in input.chunks(segment).zip(output.chunks_mut(segment)) {
            self.cipher
                .encrypt_block(self.state.register.as_bytes(), &mut keystream);
            self.state.register.shift_in(&keystream[..segment]);
            out.copy_from_slice(&keystream[..inp.len()]);
            xor_in_place(out, inp);
        }
        Ok(())
    }

    fn is_parallel(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::SimdWidth;

    #[test]
    fn never_parallel() {
        let profile = ParallelProfile::manual(16, 8, SimdWidth::Single).unwrap();
        let mut mode = Ofb::with_profile(Rijndael::with_simd(SimdWidth::Single), profile).unwrap();
        assert!(!mode.is_parallel());
        mode.set_parallel_block_size(128 * 4).unwrap();
        mode.initialize(false, &[1u8; 24], &[2u8; 16]).unwrap();
        assert!(!mode.is_parallel());
        assert_eq!(mode.parallel_block_size(), 512);
    }

    #[test]
    fn register_is_last_keystream_block() {
        let mut mode = Ofb::new(Rijndael::new());
        mode.initialize(true, &[1u8; 16], &[2u8; 16]).unwrap();
        let mut out = [0u8; 20];
        mode.transform(&[0u8; 20], &mut out).unwrap();

        let mut aes = Rijndael::new();
        aes.initialize(true, &[1u8; 16]).unwrap();
        let mut o1 = [0u8; 16];
        let mut o2 = [0u8; 16];
        aes.encrypt_block(&[2u8; 16], &mut o1);
        aes.encrypt_block(&o1, &mut o2);
        assert_eq!(&out[..16], &o1);
        assert_eq!(&out[16..], &o2[..4]);
        assert_eq!(mode.iv(), &o2);
    }

    #[test]
    fn narrow_segment_feeds_back_keystream() {
        let iv = [2u8; 16];
        let mut mode = Ofb::new(Rijndael::new()).with_segment_size(1).unwrap();
        assert!(Ofb::new(Rijndael::new()).with_segment_size(0).is_err());
        mode.initialize(true, &[1u8; 16], &iv).unwrap();
        assert_eq!(mode.block_size(), 1);
        let mut out = [0u8; 3];
        mode.transform(&[0u8; 3], &mut out).unwrap();

        let mut aes = Rijndael::new();
        aes.initialize(true, &[1u8; 16]).unwrap();
        let mut register = iv.to_vec();
        let mut expect = Vec::new();
        for _ in 0..3 {
            let mut o = [0u8; 16];
            aes.encrypt_block(&register, &mut o);
            expect.push(o[0]);
            register.remove(0);
            register.push(o[0]);
        }
        assert_eq!(out.to_vec(), expect);
        assert_eq!(mode.iv(), &register[..]);

        let mut back = [0u8; 3];
        mode.initialize(false, &[1u8; 16], &iv).unwrap();
        mode.transform(&out, &mut back).unwrap();
        assert_eq!(back, [0u8; 3]);
    }
}
