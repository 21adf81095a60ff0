//! Cipher Feedback with an `s`-byte segment and a shift register of one or
//! more cipher blocks.
//!
//! Each step encrypts the oldest block of the register, XORs the first `s`
//! keystream bytes into the input and shifts the resulting ciphertext
//! segment in. With a full-block segment and a `W`-block register this is
//! `C_i = P_i ⊕ E(C_{i-W})`; a one-byte segment is CFB-8. Decryption reads
//! its feedback from ciphertext the caller already holds, which makes it
//! parallel the same way CBC decryption is.

use zeroize::Zeroizing;

use super::{
    CipherMode, ModeState, check_key, check_padded_iv, check_profile, check_segment,
    mode_accessors,
};
use crate::cipher::{BlockCipher, Rijndael, SimdWidth, apply_blocks};
use crate::error::ModeError;
use crate::parallel::{ParallelPass, ParallelProfile, fork_join};
use crate::register::{LaneState, Register, copy_feedback, window_before, xor_in_place};

const BATCH_SEGMENTS: usize = 64;

/// CFB mode over any [`BlockCipher`], AES by default.
pub struct Cfb<C: BlockCipher = Rijndael> {
    cipher: C,
    state: ModeState,
    register_size: usize,
    segment_size: usize,
}

impl Default for Cfb<Rijndael> {
    fn default() -> Self {
        Cfb::new(Rijndael::new())
    }
}

impl<C: BlockCipher> Cfb<C> {
    /// CFB over `cipher` with a one-block register, full-block segments and a detected profile.
    pub fn new(cipher: C) -> Self {
        let profile = ParallelProfile::detect(cipher.block_size(), cipher.simd_width());
        Cfb::build(cipher, profile)
    }

    /// CFB over `cipher` with an explicit profile.
    pub fn with_profile(cipher: C, profile: ParallelProfile) -> Result<Self, ModeError> {
        check_profile(&cipher, &profile)?;
        Ok(Cfb::build(cipher, profile))
    }

    fn build(cipher: C, profile: ParallelProfile) -> Self {
        let block_size = cipher.block_size();
        Cfb {
            cipher,
            state: ModeState::new(block_size, profile),
            register_size: block_size,
            segment_size: block_size,
        }
    }

    /// Widens the shift register to `size` bytes, a positive multiple of the cipher block.
    ///
    /// Takes effect at the next `initialize`.
    pub fn with_register_size(mut self, size: usize) -> Result<Self, ModeError> {
        let block_size = self.cipher.block_size();
        if size < block_size || !size.is_multiple_of(block_size) {
            return Err(ModeError::InvalidIv {
                len: size,
                reason: "register size must be a positive multiple of the cipher block",
            });
        }
        self.register_size = size;
        Ok(self)
    }

    /// Sets the bytes processed and shifted per step, 1..=block size.
    ///
    /// A one-byte segment gives CFB-8. Takes effect at the next `initialize`.
    pub fn with_segment_size(mut self, size: usize) -> Result<Self, ModeError> {
        check_segment(size, self.cipher.block_size())?;
        self.segment_size = size;
        Ok(self)
    }

    /// Shift register width in bytes.
    pub fn register_size(&self) -> usize {
        self.register_size
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

impl<C: BlockCipher> CipherMode for Cfb<C> {
    mode_accessors!("CFB");

    fn initialize(&mut self, encryption: bool, key: &[u8], iv: &[u8]) -> Result<(), ModeError> {
        check_padded_iv(iv, self.register_size)?;
        check_key(&self.cipher, key)?;
        self.state.profile.validate()?;

        // both directions run the forward cipher
        self.cipher.initialize(true, key)?;
        let name = self.name();
        self.state.commit(
            &name,
            encryption,
            self.segment_size,
            Register::from_iv(iv, self.register_size),
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

        if self.state.config.encryption {
            for (inp, out) in input.chunks(segment).zip(output.chunks_mut(segment)) {
                feedback_step(&self.cipher, &mut self.state.register, true, segment, inp, out);
            }
            return Ok(());
        }

        let simd = self.state.profile.simd_width();
        let plan = self.state.profile.plan(len, segment);
        for pass in &plan.passes {
            let range = pass.range();
            decrypt_pass(
                &self.cipher,
                simd,
                segment,
                &mut self.state.register,
                pass,
                &input[range.clone()],
                &mut output[range],
            );
        }

        let tail = plan.serial;
        let aligned = tail.start + (tail.len() / segment) * segment;
        if aligned > tail.start {
            let last = decrypt_lane(
                &self.cipher,
                simd,
                segment,
                self.state.register.as_bytes(),
                &input[tail.start..aligned],
                &mut output[tail.start..aligned],
            );
            self.state.register.store(&last);
        }
        if aligned < len {
            feedback_step(
                &self.cipher,
                &mut self.state.register,
                false,
                segment,
                &input[aligned..],
                &mut output[aligned..],
            );
        }
        Ok(())
    }

    fn is_parallel(&self) -> bool {
        self.state.profile.is_parallel()
            && !(self.state.config.initialized && self.state.config.encryption)
    }
}

/// One segment, or a final partial segment, through the shift register.
///
/// A partial segment shifts in its ciphertext followed by the unused
/// keystream bytes, which is the register a zero-padded segment would leave.
fn feedback_step<C: BlockCipher>(
    cipher: &C,
    register: &mut Register,
    encryption: bool,
    segment: usize,
    input: &[u8],
    output: &mut [u8],
) {
    let block_size = cipher.block_size();
    let n = input.len();
    let mut keystream = Zeroizing::new(vec![0u8; block_size]);

    cipher.encrypt_block(&register.as_bytes()[..block_size], &mut keystream);
    output.copy_from_slice(&keystream[..n]);
    xor_in_place(output, input);

    let cipher_text = if encryption { &*output } else { input };
    keystream[..n].copy_from_slice(cipher_text);
    register.shift_in(&keystream[..segment]);
}

fn decrypt_pass<C: BlockCipher>(
    cipher: &C,
    simd: SimdWidth,
    segment: usize,
    register: &mut Register,
    pass: &ParallelPass,
    input: &[u8],
    output: &mut [u8],
) {
    let seed = register.as_bytes();
    let last = fork_join(pass, input, output, |lane, inp, out| {
        let lane_seed = window_before(seed, input, lane * pass.chunk);
        decrypt_lane(cipher, simd, segment, &lane_seed, inp, out)
    });
    if let Some(state) = last {
        register.store(&state);
    }
}

/// Decrypts whole segments chained from the shift register `seed`.
///
/// The cipher input for the segment at byte `x` is `(seed ‖ input)[x..x + B]`.
/// With full-block segments a batch of cipher inputs is one contiguous copy;
/// narrower segments gather one overlapping window per segment.
fn decrypt_lane<C: BlockCipher>(
    cipher: &C,
    simd: SimdWidth,
    segment: usize,
    seed: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> LaneState {
    let block_size = cipher.block_size();
    let count = input.len() / segment;
    let batch = BATCH_SEGMENTS.min(count) * block_size;
    let mut feedback = Zeroizing::new(vec![0u8; batch]);
    let mut keystream = Zeroizing::new(vec![0u8; batch]);

    for first in (0..count).step_by(BATCH_SEGMENTS) {
        let segments = BATCH_SEGMENTS.min(count - first);
        let span = segments * block_size;
        let start = first * segment;
        let end = start + segments * segment;

        if segment == block_size {
            copy_feedback(seed, input, start, &mut feedback[..span]);
        } else {
            for (i, window) in feedback[..span].chunks_exact_mut(block_size).enumerate() {
                copy_feedback(seed, input, start + i * segment, window);
            }
        }
        apply_blocks::<false, C>(cipher, simd, &feedback[..span], &mut keystream[..span]);

        for (out, ks) in output[start..end]
            .chunks_exact_mut(segment)
            .zip(keystream[..span].chunks_exact(block_size))
        {
            out.copy_from_slice(&ks[..segment]);
        }
        xor_in_place(&mut output[start..end], &input[start..end]);
    }

    window_before(seed, input, input.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x2b; 16];

    fn cfb(degree: usize, register_size: usize) -> Cfb {
        let profile = ParallelProfile::manual(16, degree, SimdWidth::Wide4).unwrap();
        Cfb::with_profile(Rijndael::with_simd(SimdWidth::Wide4), profile)
            .unwrap()
            .with_register_size(register_size)
            .unwrap()
    }

    #[test]
    fn register_size_rules() {
        let base = || {
            let profile = ParallelProfile::manual(16, 1, SimdWidth::Single).unwrap();
            Cfb::with_profile(Rijndael::with_simd(SimdWidth::Single), profile).unwrap()
        };
        assert!(base().with_register_size(8).is_err());
        assert!(base().with_register_size(24).is_err());
        assert_eq!(base().with_register_size(48).unwrap().register_size(), 48);
    }

    #[test]
    fn wide_register_feeds_oldest_block() {
        let iv: Vec<u8> = (0..32).collect();
        let plain = [0u8; 48];
        let mut enc = cfb(1, 32);
        enc.initialize(true, &KEY, &iv).unwrap();
        let mut out = [0u8; 48];
        enc.transform(&plain, &mut out).unwrap();

        let mut aes = Rijndael::with_simd(SimdWidth::Single);
        aes.initialize(true, &KEY).unwrap();
        let mut expect = [0u8; 48];
        aes.encrypt_block(&iv[..16], &mut expect[..16]);
        aes.encrypt_block(&iv[16..], &mut expect[16..32]);
        let first = expect[..16].to_vec();
        aes.encrypt_block(&first, &mut expect[32..]);
        assert_eq!(out, expect);
        assert_eq!(enc.iv(), &out[16..]);
    }

    #[test]
    fn partial_block_matches_zero_padded_block() {
        let iv = [9u8; 16];
        let plain: Vec<u8> = (0..21).collect();

        let mut partial = cfb(1, 16);
        partial.initialize(true, &KEY, &iv).unwrap();
        let mut short = vec![0u8; 21];
        partial.transform(&plain, &mut short).unwrap();

        let mut padded_plain = plain.clone();
        padded_plain.resize(32, 0);
        let mut padded = cfb(1, 16);
        padded.initialize(true, &KEY, &iv).unwrap();
        let mut full = vec![0u8; 32];
        padded.transform(&padded_plain, &mut full).unwrap();

        assert_eq!(short, full[..21]);
        assert_eq!(partial.iv(), padded.iv());
    }

    #[test]
    fn parallel_decrypt_with_wide_register() {
        let iv: Vec<u8> = (100..164).collect();
        let plain: Vec<u8> = (0..3000).map(|i| (i % 253) as u8).collect();

        let mut enc = cfb(1, 64);
        enc.initialize(true, &KEY, &iv).unwrap();
        let mut cipher_text = vec![0u8; plain.len()];
        enc.transform(&plain, &mut cipher_text).unwrap();

        let mut dec = cfb(4, 64);
        dec.set_parallel_block_size(1024).unwrap();
        dec.initialize(false, &KEY, &iv).unwrap();
        let mut back = vec![0u8; plain.len()];
        dec.transform(&cipher_text, &mut back).unwrap();
        assert_eq!(back, plain);
        assert_eq!(dec.iv(), enc.iv());
    }

    #[test]
    fn segment_size_rules() {
        let mode = || Cfb::new(Rijndael::with_simd(SimdWidth::Single));
        assert!(matches!(
            mode().with_segment_size(0),
            Err(ModeError::InvalidSegmentSize { size: 0, block_size: 16 })
        ));
        assert!(mode().with_segment_size(17).is_err());

        let mut cfb8 = mode().with_segment_size(1).unwrap();
        assert_eq!(cfb8.segment_size(), 1);
        cfb8.initialize(true, &KEY, &[3u8; 16]).unwrap();
        assert_eq!(cfb8.block_size(), 1);
        assert_eq!(cfb8.iv().len(), 16);
    }

    #[test]
    fn narrow_segment_shifts_by_segment() {
        let iv: Vec<u8> = (0..16).collect();
        let mut mode = cfb(1, 16).with_segment_size(4).unwrap();
        mode.initialize(true, &KEY, &iv).unwrap();
        let plain = [0x5au8; 4];
        let mut out = [0u8; 4];
        mode.transform(&plain, &mut out).unwrap();

        let mut aes = Rijndael::with_simd(SimdWidth::Single);
        aes.initialize(true, &KEY).unwrap();
        let mut keystream = [0u8; 16];
        aes.encrypt_block(&iv, &mut keystream);
        let expect: Vec<u8> = keystream[..4].iter().map(|k| k ^ 0x5a).collect();
        assert_eq!(out.to_vec(), expect);
        assert_eq!(&mode.iv()[..12], &iv[4..]);
        assert_eq!(&mode.iv()[12..], &out);
    }

    #[test]
    fn parallel_decrypt_with_narrow_segments() {
        let iv: Vec<u8> = (7..23).collect();
        let plain: Vec<u8> = (0..2000).map(|i| (i * 31 % 251) as u8).collect();

        for (segment, register) in [(1, 16), (5, 16), (3, 32)] {
            let mut enc = cfb(1, register).with_segment_size(segment).unwrap();
            enc.initialize(true, &KEY, &iv).unwrap();
            let mut cipher_text = vec![0u8; plain.len()];
            enc.transform(&plain, &mut cipher_text).unwrap();

            for degree in [1, 2, 3, 4] {
                let mut dec = cfb(degree, register).with_segment_size(segment).unwrap();
                let minimum = dec.parallel_minimum_size();
                dec.set_parallel_block_size(minimum * 2).unwrap();
                dec.initialize(false, &KEY, &iv).unwrap();
                let mut back = vec![0u8; plain.len()];
                dec.transform(&cipher_text, &mut back).unwrap();
                assert_eq!(back, plain, "segment {segment} degree {degree}");
                assert_eq!(dec.iv(), enc.iv(), "segment {segment} degree {degree}");
            }
        }
    }
}
