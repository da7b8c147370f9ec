//! # strand-kernels
//!
//! The compute core of a convolutional network over encoded DNA
//! sequences: 1D sequence convolution, max-pooling, sum-pooling and a
//! fully-connected variant, each with forward and backward kernels.
//!
//! Provides:
//! - CPU reference kernels, generic over precision, rayon-parallel
//!   across rows (`cpu_conv`, `cpu_pool`, `cpu_fc`)
//! - Pre-launch geometry validation (`geometry`)
//! - CUDA dispatch behind the `cuda` feature: NVRTC-compiled kernels
//!   with shared-memory tiling and barrier tree reductions (`cuda`)
//!
//! Kernels never allocate, validate or synchronize across blocks;
//! buffers, launch geometry and cross-kernel ordering are the caller's
//! responsibility. The two-stage weight-gradient reduction is the one
//! place the dispatch layer chains launches itself.

pub mod cpu_conv;
pub mod cpu_fc;
pub mod cpu_pool;
pub mod geometry;

#[cfg(feature = "cuda")]
pub mod cuda;

/// Default thread count per execution block. Reduction-based kernels
/// require a power of two; callers picking another size must keep that
/// invariant (see `geometry`).
pub const BLOCK_SIZE: usize = 256;
