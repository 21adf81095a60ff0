//! Parallel profile and the fork-join scheduler behind every parallel-capable mode.
//!
//! A [`ParallelProfile`] captures how work may be split: the degree (number
//! of lanes), the SIMD batch width and the size of one parallel pass. A
//! transform asks the profile for a [`ParallelPlan`], runs each
//! [`ParallelPass`] through [`fork_join`], then finishes the remainder
//! serially. Lanes own disjoint, contiguous chunks of the pass and report
//! their final register state; only the last lane's state survives.

use std::ops::Range;
use std::sync::OnceLock;

use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::cipher::SimdWidth;
use crate::error::ModeError;

/// Per-degree share of the default parallel block size (one L1 data cache worth).
pub const DEFAULT_DATA_CACHE: usize = 16_384;

/// Upper bound for the parallel block size.
pub const PARALLEL_MAXIMUM_SIZE: usize = 100_000_000;

/// Processor capabilities relevant to AES batching.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CpuFeatures {
    /// Hardware AES round instructions (AES-NI, ARMv8 AES).
    pub aes: bool,
    /// 256-bit integer SIMD.
    pub avx2: bool,
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

impl CpuFeatures {
    /// Features of the running processor, detected once and cached.
    pub fn get() -> CpuFeatures {
        *FEATURES.get_or_init(CpuFeatures::detect)
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn detect() -> CpuFeatures {
        CpuFeatures {
            aes: std::arch::is_x86_feature_detected!("aes")
                && std::arch::is_x86_feature_detected!("sse2"),
            avx2: std::arch::is_x86_feature_detected!("avx2"),
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn detect() -> CpuFeatures {
        CpuFeatures {
            aes: std::arch::is_aarch64_feature_detected!("aes"),
            avx2: false,
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    fn detect() -> CpuFeatures {
        CpuFeatures::default()
    }

    /// Widest AES batch worth issuing on this processor.
    pub const fn aes_simd_width(self) -> SimdWidth {
        match (self.aes, self.avx2) {
            (true, true) => SimdWidth::Wide8,
            (true, false) => SimdWidth::Wide4,
            _ => SimdWidth::Single,
        }
    }
}

/// How a detected processor count is turned into a parallel degree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DegreePolicy {
    /// Degrees above one must be even; odd counts are rounded down.
    #[default]
    Even,
    /// Any positive degree is accepted.
    Any,
}

impl DegreePolicy {
    /// Degree this policy derives from `count` available processors.
    pub const fn normalize(self, count: usize) -> usize {
        match self {
            DegreePolicy::Even if count > 1 && count % 2 != 0 => count - 1,
            _ if count == 0 => 1,
            _ => count,
        }
    }

    /// Whether `degree` is acceptable under this policy.
    pub const fn accepts(self, degree: usize) -> bool {
        degree == 1 || matches!(self, DegreePolicy::Any) || degree % 2 == 0
    }
}

/// Immutable-per-transform description of how a mode may split its work.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParallelProfile {
    block_size: usize,
    processor_count: usize,
    max_degree: usize,
    simd_width: SimdWidth,
    parallel_block_size: usize,
    parallel: bool,
    policy: DegreePolicy,
}

impl ParallelProfile {
    /// Profile for the running machine under the [`DegreePolicy::Even`] policy.
    pub fn detect(block_size: usize, simd_width: SimdWidth) -> ParallelProfile {
        ParallelProfile::detect_with_policy(block_size, simd_width, DegreePolicy::Even)
    }

    /// Profile for the running machine, deriving the degree from the rayon pool size.
    pub fn detect_with_policy(
        block_size: usize,
        simd_width: SimdWidth,
        policy: DegreePolicy,
    ) -> ParallelProfile {
        let processors = policy.normalize(rayon::current_num_threads());
        let profile = ParallelProfile::build(block_size, processors, simd_width, policy);

        #[cfg(feature = "tracing")]
        debug!(
            threads = rayon::current_num_threads(),
            degree = profile.max_degree,
            simd = ?profile.simd_width,
            parallel_block_size = profile.parallel_block_size,
            "detected parallel profile"
        );

        profile
    }

    /// Profile with an explicit degree, independent of the machine.
    ///
    /// Results are identical for every degree, so fixing one is mostly
    /// useful for reproducible benchmarks and tests.
    pub fn manual(
        block_size: usize,
        degree: usize,
        simd_width: SimdWidth,
    ) -> Result<ParallelProfile, ModeError> {
        if block_size == 0 {
            return Err(ModeError::InvalidParallelConfig("block size can not be zero"));
        }
        if degree == 0 {
            return Err(ModeError::InvalidParallelConfig("degree can not be zero"));
        }
        minimum_size(block_size, degree, simd_width)?;
        Ok(ParallelProfile::build(
            block_size,
            degree,
            simd_width,
            DegreePolicy::Any,
        ))
    }

    fn build(
        block_size: usize,
        processors: usize,
        simd_width: SimdWidth,
        policy: DegreePolicy,
    ) -> ParallelProfile {
        assert!(block_size > 0, "block size must be positive");

        let mut profile = ParallelProfile {
            block_size,
            processor_count: processors,
            max_degree: processors,
            simd_width,
            parallel_block_size: 0,
            parallel: processors > 1,
            policy,
        };
        profile.parallel_block_size = profile.default_parallel_block_size();
        profile
    }

    fn default_parallel_block_size(&self) -> usize {
        let minimum = self.parallel_minimum_size();
        let target = self
            .max_degree
            .saturating_mul(DEFAULT_DATA_CACHE)
            .min(PARALLEL_MAXIMUM_SIZE);
        (target - target % minimum).max(minimum)
    }

    /// Cipher block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Processors available when the profile was built.
    pub fn processor_count(&self) -> usize {
        self.processor_count
    }

    /// Current parallel degree (number of lanes).
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// SIMD batch width lanes use.
    pub fn simd_width(&self) -> SimdWidth {
        self.simd_width
    }

    /// Degree policy in force.
    pub fn policy(&self) -> DegreePolicy {
        self.policy
    }

    /// Bytes handled by one parallel pass.
    pub fn parallel_block_size(&self) -> usize {
        self.parallel_block_size
    }

    /// Smallest input that is split across lanes: degree × block size × batch width.
    pub fn parallel_minimum_size(&self) -> usize {
        self.max_degree
            .saturating_mul(self.block_size)
            .saturating_mul(self.simd_width.blocks())
    }

    /// Whether transforms above the minimum size run in parallel.
    pub fn is_parallel(&self) -> bool {
        self.parallel && self.max_degree > 1
    }

    /// Enables or disables parallel processing. A degree of one stays serial.
    pub fn set_parallel(&mut self, enabled: bool) {
        self.parallel = enabled;
    }

    /// Sets the bytes handled per parallel pass.
    ///
    /// Must lie within `parallel_minimum_size()..=PARALLEL_MAXIMUM_SIZE` and
    /// be a multiple of the minimum size.
    pub fn set_parallel_block_size(&mut self, size: usize) -> Result<(), ModeError> {
        let minimum = self.parallel_minimum_size();
        if size < minimum {
            return Err(ModeError::InvalidParallelConfig(
                "parallel block size is below the parallel minimum size",
            ));
        }
        if size > PARALLEL_MAXIMUM_SIZE {
            return Err(ModeError::InvalidParallelConfig(
                "parallel block size exceeds the parallel maximum size",
            ));
        }
        if !size.is_multiple_of(minimum) {
            return Err(ModeError::InvalidParallelConfig(
                "parallel block size must be a multiple of the parallel minimum size",
            ));
        }
        self.parallel_block_size = size;
        Ok(())
    }

    /// Sets the parallel degree and realigns the parallel block size to it.
    pub fn set_max_degree(&mut self, degree: usize) -> Result<(), ModeError> {
        if degree == 0 {
            return Err(ModeError::InvalidParallelConfig("degree can not be zero"));
        }
        if !self.policy.accepts(degree) {
            return Err(ModeError::InvalidParallelConfig(
                "degree must be one or an even number",
            ));
        }
        if self.policy == DegreePolicy::Even && degree > self.processor_count {
            return Err(ModeError::InvalidParallelConfig(
                "degree can not exceed the processor count",
            ));
        }

        let minimum = minimum_size(self.block_size, degree, self.simd_width)?;
        self.max_degree = degree;
        let ceiling = PARALLEL_MAXIMUM_SIZE - PARALLEL_MAXIMUM_SIZE % minimum;
        let aligned = self.parallel_block_size - self.parallel_block_size % minimum;
        self.parallel_block_size = aligned.clamp(minimum, ceiling);
        Ok(())
    }

    /// Checks the profile invariants a transform relies on.
    pub fn validate(&self) -> Result<(), ModeError> {
        if self.max_degree == 0 {
            return Err(ModeError::InvalidParallelConfig("degree can not be zero"));
        }
        if !self.is_parallel() {
            return Ok(());
        }
        let minimum = self.parallel_minimum_size();
        if self.parallel_block_size < minimum
            || self.parallel_block_size > PARALLEL_MAXIMUM_SIZE
            || !self.parallel_block_size.is_multiple_of(minimum)
        {
            return Err(ModeError::InvalidParallelConfig(
                "parallel block size is not aligned to the parallel minimum size",
            ));
        }
        Ok(())
    }

    /// Splits `len` bytes into parallel passes followed by a serial remainder.
    ///
    /// `unit` is the mode's block size; every lane chunk is a multiple of it.
    /// Inputs shorter than [`parallel_minimum_size`](Self::parallel_minimum_size)
    /// or a serial profile produce no passes.
    pub fn plan(&self, len: usize, unit: usize) -> ParallelPlan {
        let mut passes = Vec::new();
        let mut offset = 0;

        if self.is_parallel() {
            let minimum = self.parallel_minimum_size();
            let lanes = self.max_degree;

            while len - offset >= minimum {
                let span = (len - offset).min(self.parallel_block_size);
                let chunk = (span / lanes / unit) * unit;
                if chunk == 0 {
                    break;
                }
                passes.push(ParallelPass {
                    offset,
                    lanes,
                    chunk,
                });
                offset += lanes * chunk;
            }
        }

        ParallelPlan {
            passes,
            serial: offset..len,
        }
    }
}

/// `degree × block_size × simd` bytes, or an error when that exceeds
/// [`PARALLEL_MAXIMUM_SIZE`] or overflows.
fn minimum_size(block_size: usize, degree: usize, simd: SimdWidth) -> Result<usize, ModeError> {
    degree
        .checked_mul(block_size)
        .and_then(|bytes| bytes.checked_mul(simd.blocks()))
        .filter(|&bytes| bytes <= PARALLEL_MAXIMUM_SIZE)
        .ok_or(ModeError::InvalidParallelConfig(
            "degree makes the parallel minimum size exceed the maximum",
        ))
}

/// One fork-join pass: `lanes` contiguous chunks of `chunk` bytes starting at `offset`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParallelPass {
    /// Byte offset of the pass within the transform.
    pub offset: usize,
    /// Number of lanes.
    pub lanes: usize,
    /// Bytes per lane.
    pub chunk: usize,
}

impl ParallelPass {
    /// Bytes covered by the pass.
    pub fn len(&self) -> usize {
        self.lanes * self.chunk
    }

    /// Whether the pass covers nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte range of the pass within the transform.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// Work split of one transform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParallelPlan {
    /// Parallel passes in stream order.
    pub passes: Vec<ParallelPass>,
    /// Bytes left for the serial path, after the last pass.
    pub serial: Range<usize>,
}

/// Runs `lane` on every chunk of `pass` concurrently and returns the last lane's result.
///
/// `lane` receives the lane index and that lane's input and output chunks.
/// All lanes have joined when this returns.
///
/// # Panics
/// Panics if `input` or `output` is not exactly `pass.len()` bytes.
pub(crate) fn fork_join<S, F>(
    pass: &ParallelPass,
    input: &[u8],
    output: &mut [u8],
    lane: F,
) -> Option<S>
where
    S: Send,
    F: Fn(usize, &[u8], &mut [u8]) -> S + Sync,
{
    assert!(input.len() == pass.len() && output.len() == pass.len());

    #[cfg(feature = "tracing")]
    trace!(
        offset = pass.offset,
        lanes = pass.lanes,
        chunk = pass.chunk,
        "parallel pass"
    );

    output
        .par_chunks_exact_mut(pass.chunk)
        .zip(input.par_chunks_exact(pass.chunk))
        .enumerate()
        .map(|(index, (out, inp))| lane(index, inp, out))
        .collect::<Vec<S>>()
        .pop()
}
