//! # Modefast
//!
//! Block cipher modes of operation (CBC, CFB, CTR, OFB and ECB) that split
//! large buffers across threads and batch blocks for SIMD cipher backends
//! while producing exactly the bytes a sequential implementation would.
//!
//! ## Parallel Dispatch
//! Every mode owns a [`ParallelProfile`] describing its parallel degree
//! (lanes), SIMD batch width and pass size. A transform call is split into
//! passes of `parallel_block_size` bytes; each pass is cut into one
//! contiguous chunk per lane and run with Rayon fork-join. Whatever does
//! not fill a lane runs serially on the calling thread.
//! * **Parallel**: CBC decryption, CFB decryption, CTR (both directions), ECB.
//! * **Serial only**: CBC and CFB encryption, all of OFB. Each block needs
//!   the previous block's output.
//!
//! Lanes never share mutable state. A CBC or CFB lane seeds its register
//! from the ciphertext just before its chunk; a CTR lane advances a copy
//! of the counter by its block offset. The last lane's register becomes the
//! mode's register, so the next call continues the stream.
//!
//! ## SIMD Batching
//! The [`BlockCipher`] trait exposes 4-wide and 8-wide block calls. Lanes
//! and the serial path group blocks into the widest batch the cipher
//! supports. The bundled [`Rijndael`] adapter reports 4-wide when the
//! processor has AES instructions and 8-wide when it also has AVX2.
//!
//! ## Requirements
//! * **Alignment**: CBC and ECB only accept whole blocks. CFB, CTR and OFB
//!   take any length; a trailing partial block still consumes a full
//!   keystream block.
//! * **Initialization**: `transform` fails with
//!   [`ModeError::NotInitialized`] until `initialize` succeeds.
//!
//! ## Logging
//! With the default `tracing` feature, profile detection and initialization
//! log at `debug` and every parallel pass at `trace`. Keys and register
//! contents are never logged.
//!
//! ## Examples
//!
//! ```rust
//! use modefast::{Cbc, CipherMode, Rijndael};
//!
//! let key = [0x2B; 32];
//! let iv = [0x00; 16];
//! let plain = vec![0u8; 64 * 1024];
//!
//! let mut cbc = Cbc::new(Rijndael::new());
//! cbc.initialize(true, &key, &iv).unwrap();
//! let mut sealed = vec![0u8; plain.len()];
//! cbc.transform(&plain, &mut sealed).unwrap();
//!
//! cbc.initialize(false, &key, &iv).unwrap();
//! let mut opened = vec![0u8; sealed.len()];
//! cbc.transform(&sealed, &mut opened).unwrap();
//! assert_eq!(opened, plain);
//! ```

pub mod cipher;
pub mod error;
pub mod mode;
pub mod parallel;
pub mod register;

pub use cipher::{BlockCipher, Rijndael, SimdWidth};
pub use error::{CipherError, ModeError};
pub use mode::{Cbc, Cfb, CipherMode, Ctr, Ecb, Ofb};
pub use parallel::{
    CpuFeatures, DEFAULT_DATA_CACHE, DegreePolicy, PARALLEL_MAXIMUM_SIZE, ParallelPass,
    ParallelPlan, ParallelProfile,
};
pub use register::{LaneState, Register};
