//! Cipher Block Chaining.
//!
//! Encryption is strictly sequential: `C_i = E(P_i ⊕ C_{i-1})`.
//! Decryption only needs ciphertext the caller already supplied,
//! `P_i = D(C_i) ⊕ C_{i-1}`, so every lane can seed itself from the
//! ciphertext just before its chunk and run independently.
//!
//! An IV of 4 or 8 cipher blocks selects wide CBC: each step chains a
//! whole IV-sized group of blocks through one batched cipher call.

use zeroize::Zeroizing;

use super::{CipherMode, ModeState, check_key, check_profile, mode_accessors};
use crate::cipher::{BlockCipher, Rijndael, SimdWidth, apply_blocks};
use crate::error::ModeError;
use crate::parallel::{ParallelPass, ParallelProfile, fork_join};
use crate::register::{LaneState, Register, window_before, xor_feedback, xor_in_place};

/// Cipher blocks decrypted before the chaining XOR is applied, per lane step.
const SEGMENT_BLOCKS: usize = 64;

/// CBC mode over any [`BlockCipher`], AES by default.
pub struct Cbc<C: BlockCipher = Rijndael> {
    cipher: C,
    state: ModeState,
}

impl Default for Cbc<Rijndael> {
    fn default() -> Self {
        Cbc::new(Rijndael::new())
    }
}

impl<C: BlockCipher> Cbc<C> {
    /// CBC over `cipher` with a profile detected from the machine.
    pub fn new(cipher: C) -> Self {
        let profile = ParallelProfile::detect(cipher.block_size(), cipher.simd_width());
        let state = ModeState::new(cipher.block_size(), profile);
        Cbc { cipher, state }
    }

    /// CBC over `cipher` with an explicit profile.
    pub fn with_profile(cipher: C, profile: ParallelProfile) -> Result<Self, ModeError> {
        check_profile(&cipher, &profile)?;
        let state = ModeState::new(cipher.block_size(), profile);
        Ok(Cbc { cipher, state })
    }

    /// The underlying block cipher.
    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    fn iv_width(&self, iv: &[u8]) -> Result<SimdWidth, ModeError> {
        let block_size = self.cipher.block_size();
        if iv.len() < block_size {
            return Err(ModeError::InvalidIv {
                len: iv.len(),
                reason: "shorter than the cipher block",
            });
        }

        let width = Some(iv.len())
            .filter(|len| len.is_multiple_of(block_size))
            .and_then(|len| SimdWidth::from_blocks(len / block_size))
            .ok_or(ModeError::InvalidIv {
                len: iv.len(),
                reason: "must be 1, 4 or 8 cipher blocks",
            })?;

        let supported = match width {
            SimdWidth::Single => true,
            SimdWidth::Wide4 => self.cipher.has_wide4(),
            SimdWidth::Wide8 => self.cipher.has_wide8(),
        };
        if !supported {
            return Err(ModeError::HardwareUnsupported {
                feature: width.feature(),
            });
        }
        Ok(width)
    }
}

impl<C: BlockCipher> CipherMode for Cbc<C> {
    mode_accessors!("CBC");

    fn initialize(&mut self, encryption: bool, key: &[u8], iv: &[u8]) -> Result<(), ModeError> {
        self.iv_width(iv)?;
        check_key(&self.cipher, key)?;
        self.state.profile.validate()?;

        self.cipher.initialize(encryption, key)?;
        let name = self.name();
        self.state
            .commit(&name, encryption, iv.len(), Register::from_iv(iv, iv.len()));
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

        if self.state.config.encryption {
            encrypt(&self.cipher, &mut self.state.register, input, output);
            return Ok(());
        }

        let plan = self.state.profile.plan(len, self.state.config.block_size);
        for pass in &plan.passes {
            let range = pass.range();
            decrypt_pass(
                &self.cipher,
                simd,
                &mut self.state.register,
                pass,
                &input[range.clone()],
                &mut output[range],
            );
        }

        let tail = plan.serial;
        if !tail.is_empty() {
            let last = decrypt_lane(
                &self.cipher,
                simd,
                self.state.register.as_bytes(),
                &input[tail.clone()],
                &mut output[tail],
            );
            self.state.register.store(&last);
        }
        Ok(())
    }

    fn is_parallel(&self) -> bool {
        self.state.profile.is_parallel()
            && !(self.state.config.initialized && self.state.config.encryption)
    }
}

fn encrypt<C: BlockCipher>(cipher: &C, register: &mut Register, input: &[u8], output: &mut [u8]) {
    let width = register.len();
    let batch = SimdWidth::from_blocks(width / cipher.block_size()).unwrap_or_default();
    let mut buffer = Zeroizing::new(vec![0u8; width]);

    for (inp, out) in input.chunks_exact(width).zip(output.chunks_exact_mut(width)) {
        buffer.copy_from_slice(inp);
        xor_in_place(&mut buffer, register.as_bytes());
        apply_blocks::<false, C>(cipher, batch, &buffer, out);
        register.store(out);
    }
}

fn decrypt_pass<C: BlockCipher>(
    cipher: &C,
    simd: SimdWidth,
    register: &mut Register,
    pass: &ParallelPass,
    input: &[u8],
    output: &mut [u8],
) {
    let seed = register.as_bytes();
    let last = fork_join(pass, input, output, |lane, inp, out| {
        let lane_seed = window_before(seed, input, lane * pass.chunk);
        decrypt_lane(cipher, simd, &lane_seed, inp, out)
    });
    if let Some(state) = last {
        register.store(&state);
    }
}

/// Decrypts a contiguous run of ciphertext chained from `seed`, returning
/// the register that follows it (its last `seed.len()` ciphertext bytes).
fn decrypt_lane<C: BlockCipher>(
    cipher: &C,
    simd: SimdWidth,
    seed: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> LaneState {
    let segment = SEGMENT_BLOCKS * cipher.block_size();

    for start in (0..input.len()).step_by(segment) {
        let end = (start + segment).min(input.len());
        apply_blocks::<true, C>(cipher, simd, &input[start..end], &mut output[start..end]);
        xor_feedback(seed, input, start, &mut output[start..end]);
    }

    window_before(seed, input, input.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    fn cbc(degree: usize, simd: SimdWidth) -> Cbc {
        let profile = ParallelProfile::manual(16, degree, simd).unwrap();
        Cbc::with_profile(Rijndael::with_simd(simd), profile).unwrap()
    }

    #[test]
    fn register_holds_last_ciphertext_block() {
        let iv = [3u8; 16];
        let plain: Vec<u8> = (0..80).collect();
        let mut enc = cbc(1, SimdWidth::Single);
        enc.initialize(true, &KEY, &iv).unwrap();
        let mut cipher_text = vec![0u8; 80];
        enc.transform(&plain, &mut cipher_text).unwrap();
        assert_eq!(enc.iv(), &cipher_text[64..]);

        let mut dec = cbc(4, SimdWidth::Wide4);
        dec.initialize(false, &KEY, &iv).unwrap();
        let mut back = vec![0u8; 80];
        dec.transform(&cipher_text, &mut back).unwrap();
        assert_eq!(back, plain);
        assert_eq!(dec.iv(), &cipher_text[64..]);
    }

    #[test]
    fn wide_iv_needs_wide_cipher() {
        let mut narrow = cbc(1, SimdWidth::Single);
        assert_eq!(
            narrow.initialize(true, &KEY, &[0u8; 64]),
            Err(ModeError::HardwareUnsupported { feature: "4-wide" })
        );

        let mut four = cbc(1, SimdWidth::Wide4);
        assert_eq!(
            four.initialize(true, &KEY, &[0u8; 128]),
            Err(ModeError::HardwareUnsupported { feature: "8-wide" })
        );
        four.initialize(true, &KEY, &[0u8; 64]).unwrap();
        assert_eq!(four.block_size(), 64);
    }

    #[test]
    fn iv_width_rules() {
        let mut mode = cbc(1, SimdWidth::Wide8);
        assert!(matches!(
            mode.initialize(true, &KEY, &[0u8; 8]),
            Err(ModeError::InvalidIv { len: 8, .. })
        ));
        assert!(matches!(
            mode.initialize(true, &KEY, &[0u8; 32]),
            Err(ModeError::InvalidIv { len: 32, .. })
        ));
        assert!(!mode.is_initialized());
    }

    #[test]
    fn encryption_is_never_parallel() {
        let mut mode = cbc(4, SimdWidth::Single);
        assert!(mode.is_parallel());
        mode.initialize(true, &KEY, &[0u8; 16]).unwrap();
        assert!(!mode.is_parallel());
        mode.initialize(false, &KEY, &[0u8; 16]).unwrap();
        assert!(mode.is_parallel());
    }

    #[test]
    fn wide_cbc_round_trip() {
        let iv: Vec<u8> = (0..128).collect();
        let plain: Vec<u8> = (0..1024).map(|i| (i * 31 % 251) as u8).collect();

        let mut enc = cbc(1, SimdWidth::Wide8);
        enc.initialize(true, &KEY, &iv).unwrap();
        let mut cipher_text = vec![0u8; plain.len()];
        enc.transform(&plain, &mut cipher_text).unwrap();

        let mut dec = cbc(4, SimdWidth::Wide8);
        dec.initialize(false, &KEY, &iv).unwrap();
        let mut back = vec![0u8; plain.len()];
        dec.transform(&cipher_text, &mut back).unwrap();
        assert_eq!(back, plain);
        assert_eq!(dec.iv(), enc.iv());
    }
}
