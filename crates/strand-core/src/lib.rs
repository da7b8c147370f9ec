//! # strand-core
//!
//! Shared leaf types for the strand sequence-convolution kernel suite:
//! - Bit-flag nucleotide encoding with ambiguity codes (§ encoding)
//! - Offset + row-stride sub-region views over flat buffers (§ view)
//! - A sealed float abstraction selecting the matching GPU kernel
//!   instantiation per precision (§ scalar)

pub mod encoding;
pub mod error;
pub mod scalar;
pub mod view;

pub use encoding::{
    accumulate_bases, base_weights, check_nt, encode_sequence, score_position, Nucleotide,
    BASE_WEIGHTS, STRIDE,
};
pub use error::StrandError;
pub use scalar::Scalar;
pub use view::View;

pub type Result<T> = std::result::Result<T, StrandError>;

/// Ceiling division. Pooled output widths and grid dimensions use this
/// instead of ad-hoc `(a + b - 1) / b` arithmetic.
pub fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}
