//! Counter mode.
//!
//! The register is a big-endian counter. Block `i` of a call is XORed with
//! `E(counter + i)`, so any lane can start from `counter + offset / B`
//! without waiting for the others. Encryption and decryption are the same
//! transform.

use zeroize::Zeroizing;

use super::{CipherMode, ModeState, check_key, check_padded_iv, check_profile, mode_accessors};
use crate::cipher::{BlockCipher, Rijndael, SimdWidth, apply_blocks};
use crate::error::ModeError;
use crate::parallel::{ParallelPass, ParallelProfile, fork_join};
use crate::register::{Register, increment, xor_in_place};

/// CTR mode over any [`BlockCipher`], AES by default.
pub struct Ctr<C: BlockCipher = Rijndael> {
    cipher: C,
    state: ModeState,
}

impl Default for Ctr<Rijndael> {
    fn default() -> Self {
        Ctr::new(Rijndael::new())
    }
}

impl<C: BlockCipher> Ctr<C> {
    /// CTR over `cipher` with a profile detected from the machine.
    pub fn new(cipher: C) -> Self {
        let profile = ParallelProfile::detect(cipher.block_size(), cipher.simd_width());
        let state = ModeState::new(cipher.block_size(), profile);
        Ctr { cipher, state }
    }

    /// CTR over `cipher` with an explicit profile.
    pub fn with_profile(cipher: C, profile: ParallelProfile) -> Result<Self, ModeError> {
        check_profile(&cipher, &profile)?;
        let state = ModeState::new(cipher.block_size(), profile);
        Ok(Ctr { cipher, state })
    }

    /// The underlying block cipher.
    pub fn cipher(&self) -> &C {
        &self.cipher
    }
}

impl<C: BlockCipher> CipherMode for Ctr<C> {
    mode_accessors!("CTR");

    /// `iv` is the initial counter, 1 to `block_size` bytes, zero padded on the left.
    fn initialize(&mut self, encryption: bool, key: &[u8], iv: &[u8]) -> Result<(), ModeError> {
        let block_size = self.cipher.block_size();
        check_padded_iv(iv, block_size)?;
        check_key(&self.cipher, key)?;
        self.state.profile.validate()?;

        self.cipher.initialize(true, key)?;
        let name = self.name();
        self.state.commit(
            &name,
            encryption,
            block_size,
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
        let simd = self.state.profile.simd_width();

        let plan = self.state.profile.plan(len, self.cipher.block_size());
        for pass in &plan.passes {
            let range = pass.range();
            ctr_pass(
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
            let mut counter = self.state.register.to_lane();
            ctr_lane(
                &self.cipher,
                simd,
                &mut counter,
                &input[tail.clone()],
                &mut output[tail],
            );
            self.state.register.store(&counter);
        }
        Ok(())
    }

    fn is_parallel(&self) -> bool {
        self.state.profile.is_parallel()
    }
}

fn ctr_pass<C: BlockCipher>(
    cipher: &C,
    simd: SimdWidth,
    register: &mut Register,
    pass: &ParallelPass,
    input: &[u8],
    output: &mut [u8],
) {
    let lane_blocks = (pass.chunk / cipher.block_size()) as u64;
    let start = &*register;
    let last = fork_join(pass, input, output, |lane, inp, out| {
        let mut counter = start.increased(lane as u64 * lane_blocks);
        ctr_lane(cipher, simd, &mut counter, inp, out);
        counter
    });
    if let Some(counter) = last {
        register.store(&counter);
    }
}

/// XORs `input` with the keystream starting at `counter` and leaves
/// `counter` one past the last block used. A trailing partial block still
/// consumes a whole counter value.
fn ctr_lane<C: BlockCipher>(
    cipher: &C,
    simd: SimdWidth,
    counter: &mut [u8],
    input: &[u8],
    output: &mut [u8],
) {
    let block_size = cipher.block_size();
    let batch = simd.blocks() * block_size;
    let mut counters = Zeroizing::new(vec![0u8; batch]);
    let mut keystream = Zeroizing::new(vec![0u8; batch]);

    for (inp, out) in input.chunks(batch).zip(output.chunks_mut(batch)) {
        let span = inp.len().div_ceil(block_size) * block_size;

        for block in counters[..span].chunks_exact_mut(block_size) {
            block.copy_from_slice(counter);
            increment(counter);
        }

        apply_blocks::<false, C>(cipher, simd, &counters[..span], &mut keystream[..span]);
        out.copy_from_slice(&keystream[..inp.len()]);
        xor_in_place(out, inp);
    }
}
