//! Block cipher collaborator contract and the AES adapter.
//!
//! Modes never touch round keys or S-boxes directly. They see a
//! [`BlockCipher`]: a keyed, read-only transform of one block, plus optional
//! 4-wide and 8-wide batch variants that process consecutive blocks in one
//! call. The batch variants must give the same bytes as the single-block
//! path; they only exist so hardware pipelines (AES-NI, AVX2) stay full.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use zeroize::Zeroize;

use crate::error::CipherError;
use crate::parallel::CpuFeatures;

/// Number of blocks a cipher can transform in one batched call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SimdWidth {
    /// One block per call.
    #[default]
    Single,
    /// Four blocks per call (128-bit SIMD, SSE/NEON class).
    Wide4,
    /// Eight blocks per call (256-bit SIMD, AVX2 class).
    Wide8,
}

impl SimdWidth {
    /// Blocks processed per batched call.
    pub const fn blocks(self) -> usize {
        match self {
            SimdWidth::Single => 1,
            SimdWidth::Wide4 => 4,
            SimdWidth::Wide8 => 8,
        }
    }

    /// Width whose batch holds exactly `blocks` blocks.
    pub const fn from_blocks(blocks: usize) -> Option<Self> {
        match blocks {
            1 => Some(SimdWidth::Single),
            4 => Some(SimdWidth::Wide4),
            8 => Some(SimdWidth::Wide8),
            _ => None,
        }
    }

    /// Name used in capability errors.
    pub const fn feature(self) -> &'static str {
        match self {
            SimdWidth::Single => "single-block",
            SimdWidth::Wide4 => "4-wide",
            SimdWidth::Wide8 => "8-wide",
        }
    }

    /// Batch sizes tried in order, widest first.
    pub(crate) const fn batches(self) -> &'static [usize] {
        match self {
            SimdWidth::Single => &[1],
            SimdWidth::Wide4 => &[4, 1],
            SimdWidth::Wide8 => &[8, 4, 1],
        }
    }
}

/// A keyed block cipher as consumed by the mode engines.
///
/// Implementations are shared read-only between parallel lanes once
/// initialized, hence the `Send + Sync` bound. All block methods take
/// exactly `n * block_size()` bytes of input and output.
///
/// # Panics
///
/// Block methods panic when called before [`initialize`](Self::initialize)
/// or with buffers of the wrong length. The mode engines validate both
/// before calling in.
pub trait BlockCipher: Send + Sync {
    /// Short algorithm name, e.g. `"AES"`.
    fn name(&self) -> &'static str;

    /// Cipher block size in bytes.
    fn block_size(&self) -> usize;

    /// Key lengths accepted by [`initialize`](Self::initialize).
    fn legal_key_sizes(&self) -> &'static [usize];

    /// Expands `key` into the round-key schedule.
    ///
    /// `encryption` records the direction used by the `transform_*` methods;
    /// the explicit `encrypt_*`/`decrypt_*` methods work in both directions.
    fn initialize(&mut self, encryption: bool, key: &[u8]) -> Result<(), CipherError>;

    /// Whether a key schedule is loaded.
    fn is_initialized(&self) -> bool;

    /// Drops and wipes the key schedule.
    fn destroy(&mut self);

    /// Direction selected at the last [`initialize`](Self::initialize).
    fn is_encryption(&self) -> bool;

    /// Encrypts one block.
    fn encrypt_block(&self, input: &[u8], output: &mut [u8]);

    /// Decrypts one block.
    fn decrypt_block(&self, input: &[u8], output: &mut [u8]);

    /// Widest batch this cipher runs natively on the current processor.
    fn simd_width(&self) -> SimdWidth {
        SimdWidth::Single
    }

    /// Whether 4-block batches are hardware accelerated.
    fn has_wide4(&self) -> bool {
        self.simd_width() >= SimdWidth::Wide4
    }

    /// Whether 8-block batches are hardware accelerated.
    fn has_wide8(&self) -> bool {
        self.simd_width() >= SimdWidth::Wide8
    }

    /// Encrypts four consecutive blocks.
    fn encrypt_wide4(&self, input: &[u8], output: &mut [u8]) {
        each_block(self.block_size(), 4, input, output, |i, o| self.encrypt_block(i, o));
    }

    /// Encrypts eight consecutive blocks.
    fn encrypt_wide8(&self, input: &[u8], output: &mut [u8]) {
        each_block(self.block_size(), 8, input, output, |i, o| self.encrypt_block(i, o));
    }

    /// Decrypts four consecutive blocks.
    fn decrypt_wide4(&self, input: &[u8], output: &mut [u8]) {
        each_block(self.block_size(), 4, input, output, |i, o| self.decrypt_block(i, o));
    }

    /// Decrypts eight consecutive blocks.
    fn decrypt_wide8(&self, input: &[u8], output: &mut [u8]) {
        each_block(self.block_size(), 8, input, output, |i, o| self.decrypt_block(i, o));
    }

    /// Transforms one block in the initialized direction.
    fn transform_block(&self, input: &[u8], output: &mut [u8]) {
        if self.is_encryption() {
            self.encrypt_block(input, output);
        } else {
            self.decrypt_block(input, output);
        }
    }

    /// Transforms four blocks in the initialized direction.
    fn transform_wide4(&self, input: &[u8], output: &mut [u8]) {
        if self.is_encryption() {
            self.encrypt_wide4(input, output);
        } else {
            self.decrypt_wide4(input, output);
        }
    }

    /// Transforms eight blocks in the initialized direction.
    fn transform_wide8(&self, input: &[u8], output: &mut [u8]) {
        if self.is_encryption() {
            self.encrypt_wide8(input, output);
        } else {
            self.decrypt_wide8(input, output);
        }
    }
}

fn each_block(
    block_size: usize,
    blocks: usize,
    input: &[u8],
    output: &mut [u8],
    mut f: impl FnMut(&[u8], &mut [u8]),
) {
    assert!(input.len() == blocks * block_size && output.len() == blocks * block_size);
    input
        .chunks_exact(block_size)
        .zip(output.chunks_exact_mut(block_size))
        .for_each(|(i, o)| f(i, o));
}

/// Runs every block of `input` through the cipher into `output`, grouping
/// blocks into the widest batch `width` allows (8, then 4, then single).
///
/// # Panics
/// Panics if the buffers differ in length or are not block aligned.
pub(crate) fn apply_blocks<const DECRYPT: bool, C: BlockCipher + ?Sized>(
    cipher: &C,
    width: SimdWidth,
    input: &[u8],
    output: &mut [u8],
) {
    let block_size = cipher.block_size();
    let len = input.len();

    assert!(len == output.len() && len.is_multiple_of(block_size));

    let mut offset = 0;
    for &batch in width.batches() {
        let span = batch * block_size;
        let end = offset + ((len - offset) / span) * span;

        input[offset..end]
            .chunks_exact(span)
            .zip(output[offset..end].chunks_exact_mut(span))
            .for_each(|(i, o)| match (batch, DECRYPT) {
                (8, false) => cipher.encrypt_wide8(i, o),
                (8, true) => cipher.decrypt_wide8(i, o),
                (4, false) => cipher.encrypt_wide4(i, o),
                (4, true) => cipher.decrypt_wide4(i, o),
                (_, false) => cipher.encrypt_block(i, o),
                (_, true) => cipher.decrypt_block(i, o),
            });

        offset = end;
    }
}

/// Runtime-direction form of [`apply_blocks`].
pub(crate) fn apply_blocks_dyn<C: BlockCipher + ?Sized>(
    cipher: &C,
    width: SimdWidth,
    decrypt: bool,
    input: &[u8],
    output: &mut [u8],
) {
    if decrypt {
        apply_blocks::<true, C>(cipher, width, input, output);
    } else {
        apply_blocks::<false, C>(cipher, width, input, output);
    }
}

const AES_BLOCK_SIZE: usize = 16;
const AES_KEY_SIZES: &[usize] = &[16, 24, 32];

enum KeySchedule {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

macro_rules! with_schedule {
    ($schedule:expr, $ks:ident => $body:expr) => {
        match $schedule {
            KeySchedule::Aes128($ks) => $body,
            KeySchedule::Aes192($ks) => $body,
            KeySchedule::Aes256($ks) => $body,
        }
    };
}

/// AES (Rijndael with a 128-bit block) backed by the RustCrypto `aes` crate.
///
/// The key length picks AES-128, AES-192 or AES-256. The crate selects
/// AES-NI or ARMv8 crypto extensions at runtime and pipelines batched
/// calls, which is what the 4-wide and 8-wide methods feed.
pub struct Rijndael {
    schedule: Option<KeySchedule>,
    encryption: bool,
    simd: SimdWidth,
}

impl Default for Rijndael {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Rijndael {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rijndael")
            .field("initialized", &self.schedule.is_some())
            .field("encryption", &self.encryption)
            .field("simd", &self.simd)
            .finish()
    }
}

impl Rijndael {
    /// Block size in bytes.
    pub const BLOCK_SIZE: usize = AES_BLOCK_SIZE;

    /// Creates an unkeyed cipher whose batch width matches the processor.
    pub fn new() -> Self {
        Self::with_simd(CpuFeatures::get().aes_simd_width())
    }

    /// Creates an unkeyed cipher reporting the given batch width.
    ///
    /// Batched calls stay correct at any width; forcing one is useful to
    /// pin a profile across machines or to exercise a specific batch path.
    pub fn with_simd(simd: SimdWidth) -> Self {
        Rijndael {
            schedule: None,
            encryption: true,
            simd,
        }
    }

    fn schedule(&self) -> &KeySchedule {
        match &self.schedule {
            Some(schedule) => schedule,
            None => panic!("Rijndael block transform called before initialize"),
        }
    }

    fn crypt_batch<const N: usize, const DECRYPT: bool>(&self, input: &[u8], output: &mut [u8]) {
        // Sizing the batch up front lets the copies below compile without bounds checks.
        assert!(input.len() == N * AES_BLOCK_SIZE && output.len() == N * AES_BLOCK_SIZE);

        let mut blocks: [Block; N] = core::array::from_fn(|i| {
            Block::clone_from_slice(&input[i * AES_BLOCK_SIZE..(i + 1) * AES_BLOCK_SIZE])
        });

        with_schedule!(self.schedule(), ks => {
            if DECRYPT {
                ks.decrypt_blocks(&mut blocks);
            } else {
                ks.encrypt_blocks(&mut blocks);
            }
        });

        for (out, block) in output.chunks_exact_mut(AES_BLOCK_SIZE).zip(blocks.iter_mut()) {
            out.copy_from_slice(block);
            block.as_mut_slice().zeroize();
        }
    }
}

impl BlockCipher for Rijndael {
    fn name(&self) -> &'static str {
        "AES"
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn legal_key_sizes(&self) -> &'static [usize] {
        AES_KEY_SIZES
    }

    fn initialize(&mut self, encryption: bool, key: &[u8]) -> Result<(), CipherError> {
        let invalid = || CipherError::InvalidKey {
            len: key.len(),
            legal: AES_KEY_SIZES,
        };

        let schedule = match key.len() {
            16 => KeySchedule::Aes128(Aes128::new_from_slice(key).map_err(|_| invalid())?),
            24 => KeySchedule::Aes192(Aes192::new_from_slice(key).map_err(|_| invalid())?),
            32 => KeySchedule::Aes256(Aes256::new_from_slice(key).map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };

        self.schedule = Some(schedule);
        self.encryption = encryption;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.schedule.is_some()
    }

    fn destroy(&mut self) {
        // the aes crate zeroizes round keys on drop
        self.schedule = None;
    }

    fn is_encryption(&self) -> bool {
        self.encryption
    }

    fn encrypt_block(&self, input: &[u8], output: &mut [u8]) {
        with_schedule!(self.schedule(), ks => ks.encrypt_block_b2b(
            GenericArray::from_slice(input),
            GenericArray::from_mut_slice(output),
        ));
    }

    fn decrypt_block(&self, input: &[u8], output: &mut [u8]) {
        with_schedule!(self.schedule(), ks => ks.decrypt_block_b2b(
            GenericArray::from_slice(input),
            GenericArray::from_mut_slice(output),
        ));
    }

    fn simd_width(&self) -> SimdWidth {
        self.simd
    }

    fn encrypt_wide4(&self, input: &[u8], output: &mut [u8]) {
        self.crypt_batch::<4, false>(input, output);
    }

    fn encrypt_wide8(&self, input: &[u8], output: &mut [u8]) {
        self.crypt_batch::<8, false>(input, output);
    }

    fn decrypt_wide4(&self, input: &[u8], output: &mut [u8]) {
        self.crypt_batch::<4, true>(input, output);
    }

    fn decrypt_wide8(&self, input: &[u8], output: &mut [u8]) {
        self.crypt_batch::<8, true>(input, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY128: [u8; 16] = hex!("2b7e151628aed2a6abf7158809cf4f3c");
    const PLAIN: [u8; 16] = hex!("6bc1bee22e409f96e93d7e117393172a");
    const CIPHER: [u8; 16] = hex!("3ad77bb40d7a3660a89ecaf32466ef97");

    fn keyed(simd: SimdWidth) -> Rijndael {
        let mut aes = Rijndael::with_simd(simd);
        aes.initialize(true, &KEY128).unwrap();
        aes
    }

    #[test]
    fn encrypt_block_matches_fips197() {
        let aes = keyed(SimdWidth::Single);
        let mut out = [0u8; 16];
        aes.encrypt_block(&PLAIN, &mut out);
        assert_eq!(out, CIPHER);
        let mut back = [0u8; 16];
        aes.decrypt_block(&out, &mut back);
        assert_eq!(back, PLAIN);
    }

    #[test]
    fn wide_batches_match_single_blocks() {
        let aes = keyed(SimdWidth::Wide8);
        let input: Vec<u8> = (0..128u8).collect();

        let mut single = vec![0u8; 128];
        for (i, o) in input.chunks_exact(16).zip(single.chunks_exact_mut(16)) {
            aes.encrypt_block(i, o);
        }

        let mut wide8 = vec![0u8; 128];
        aes.encrypt_wide8(&input, &mut wide8);
        assert_eq!(wide8, single);

        let mut wide4 = vec![0u8; 128];
        aes.encrypt_wide4(&input[..64], &mut wide4[..64]);
        aes.encrypt_wide4(&input[64..], &mut wide4[64..]);
        assert_eq!(wide4, single);

        let mut back = vec![0u8; 128];
        aes.decrypt_wide8(&wide8, &mut back);
        assert_eq!(back, input);
    }

    #[test]
    fn apply_blocks_handles_mixed_batches() {
        let aes = keyed(SimdWidth::Wide8);
        // 13 blocks: one 8-batch, one 4-batch, one single
        let input: Vec<u8> = (0..208).map(|i| (i * 7) as u8).collect();
        let mut batched = vec![0u8; 208];
        apply_blocks::<false, _>(&aes, SimdWidth::Wide8, &input, &mut batched);

        let mut single = vec![0u8; 208];
        apply_blocks::<false, _>(&aes, SimdWidth::Single, &input, &mut single);
        assert_eq!(batched, single);
    }

    #[test]
    fn rejects_illegal_key_length() {
        let mut aes = Rijndael::new();
        let err = aes.initialize(true, &[0u8; 20]).unwrap_err();
        assert_eq!(
            err,
            CipherError::InvalidKey {
                len: 20,
                legal: AES_KEY_SIZES
            }
        );
        assert!(!aes.is_initialized());
    }

    #[test]
    fn transform_follows_initialized_direction() {
        let mut aes = Rijndael::with_simd(SimdWidth::Single);
        aes.initialize(false, &KEY128).unwrap();
        let mut out = [0u8; 16];
        aes.transform_block(&CIPHER, &mut out);
        assert_eq!(out, PLAIN);
    }

    #[test]
    fn simd_width_capabilities() {
        assert!(Rijndael::with_simd(SimdWidth::Wide8).has_wide4());
        assert!(Rijndael::with_simd(SimdWidth::Wide8).has_wide8());
        assert!(Rijndael::with_simd(SimdWidth::Wide4).has_wide4());
        assert!(!Rijndael::with_simd(SimdWidth::Wide4).has_wide8());
        assert!(!Rijndael::with_simd(SimdWidth::Single).has_wide4());
        assert_eq!(SimdWidth::from_blocks(4), Some(SimdWidth::Wide4));
        assert_eq!(SimdWidth::from_blocks(2), None);
    }
}
