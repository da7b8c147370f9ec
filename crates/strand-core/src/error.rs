//! Core error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrandError {
    #[error("invalid nucleotide '{ch}' at position {position}")]
    InvalidNucleotide { ch: char, position: usize },

    #[error("view out of bounds: {msg}")]
    ViewOutOfBounds { msg: String },
}
