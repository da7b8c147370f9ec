//! Bit-flag nucleotide encoding.
//!
//! Each sequence element is a single byte whose bits mark canonical base
//! membership: the four canonical bases are single bits, the two ambiguity
//! codes are unions of two bits, and the wildcard occupies a bit of its
//! own so it matches no canonical base. One branch cascade over the four
//! canonical bits therefore scores every code, and ambiguity codes score
//! as the equal-weighted average of their constituents.

use crate::error::StrandError;
use crate::scalar::Scalar;

/// Number of canonical base categories scored per filter position
/// (A, C, G, T, in that order everywhere).
pub const STRIDE: usize = 4;

/// Closed set of nucleotide codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Nucleotide {
    A = 0b0000_0001,
    C = 0b0000_0010,
    G = 0b0000_0100,
    T = 0b0000_1000,
    /// Purine ambiguity: A or G.
    R = 0b0000_0101,
    /// Pyrimidine ambiguity: C or T.
    Y = 0b0000_1010,
    /// Wildcard. Shares no bits with the canonical bases, so it scores
    /// zero against every filter position.
    N = 0b0001_0000,
}

impl Nucleotide {
    pub const ALL: [Nucleotide; 7] = [
        Nucleotide::A,
        Nucleotide::C,
        Nucleotide::G,
        Nucleotide::T,
        Nucleotide::R,
        Nucleotide::Y,
        Nucleotide::N,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Nucleotide> {
        Nucleotide::ALL.into_iter().find(|nt| nt.code() == code)
    }

    pub fn from_ascii(ch: u8) -> Option<Nucleotide> {
        match ch.to_ascii_uppercase() {
            b'A' => Some(Nucleotide::A),
            b'C' => Some(Nucleotide::C),
            b'G' => Some(Nucleotide::G),
            b'T' => Some(Nucleotide::T),
            b'R' => Some(Nucleotide::R),
            b'Y' => Some(Nucleotide::Y),
            b'N' => Some(Nucleotide::N),
            _ => None,
        }
    }

    pub fn to_ascii(self) -> u8 {
        match self {
            Nucleotide::A => b'A',
            Nucleotide::C => b'C',
            Nucleotide::G => b'G',
            Nucleotide::T => b'T',
            Nucleotide::R => b'R',
            Nucleotide::Y => b'Y',
            Nucleotide::N => b'N',
        }
    }
}

/// Membership predicate: does `value` contain base `code`?
///
/// Mirrors the device-side `CHECK_NT` macro. `check_nt(R, A)` and
/// `check_nt(R, G)` are both true; `check_nt(N, x)` is false for every
/// canonical `x`.
pub fn check_nt(value: u8, code: Nucleotide) -> bool {
    value & code.code() != 0
}

/// Explicit decoding table: `[w_A, w_C, w_G, w_T]` scoring weight of each
/// code against the four canonical base categories. Ambiguity codes carry
/// half weight per constituent; the wildcard carries none.
pub const BASE_WEIGHTS: [(Nucleotide, [f64; STRIDE]); 7] = [
    (Nucleotide::A, [1.0, 0.0, 0.0, 0.0]),
    (Nucleotide::C, [0.0, 1.0, 0.0, 0.0]),
    (Nucleotide::G, [0.0, 0.0, 1.0, 0.0]),
    (Nucleotide::T, [0.0, 0.0, 0.0, 1.0]),
    (Nucleotide::R, [0.5, 0.0, 0.5, 0.0]),
    (Nucleotide::Y, [0.0, 0.5, 0.0, 0.5]),
    (Nucleotide::N, [0.0, 0.0, 0.0, 0.0]),
];

/// Base-category weights for a raw code byte.
///
/// Derived from the bit flags with the same branch cascade the kernels
/// use: sum matching single-base indicators, halving when two bases
/// match. Unknown bit patterns decode like the wildcard.
pub fn base_weights(code: u8) -> [f64; STRIDE] {
    let mut w = [0.0; STRIDE];
    let mut matched = 0u32;
    for (i, base) in [Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T]
        .into_iter()
        .enumerate()
    {
        if check_nt(code, base) {
            w[i] = 1.0;
            matched += 1;
        }
    }
    if matched == 2 {
        for v in &mut w {
            *v *= 0.5;
        }
    }
    w
}

/// Score one filter position against a code byte.
///
/// `weights` holds the position's `[w_A, w_C, w_G, w_T]`. This is the
/// branch cascade every scoring kernel runs: sum the weights of matched
/// canonical bases, halving when an ambiguity code matched two.
pub fn score_position<T: Scalar>(code: u8, weights: &[T]) -> T {
    debug_assert!(weights.len() >= STRIDE);
    let mut s = T::ZERO;
    let mut matched = 0u32;
    for (i, base) in [Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T]
        .into_iter()
        .enumerate()
    {
        if check_nt(code, base) {
            s += weights[i];
            matched += 1;
        }
    }
    if matched == 2 {
        s = s * T::HALF;
    }
    s
}

/// Accumulate `g` into the per-base slots matched by `code`, with the
/// same half-weight rule. The transpose of [`score_position`], used by
/// the weight-gradient kernels.
pub fn accumulate_bases<T: Scalar>(code: u8, g: T, acc: &mut [T; STRIDE]) {
    let matched = [Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T]
        .into_iter()
        .filter(|&b| check_nt(code, b))
        .count();
    let w = if matched == 2 { g * T::HALF } else { g };
    for (i, base) in [Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T]
        .into_iter()
        .enumerate()
    {
        if check_nt(code, base) {
            acc[i] += w;
        }
    }
}

/// Encode an ASCII sequence (case-insensitive `ACGTRYN`) into code bytes.
pub fn encode_sequence(seq: &str) -> Result<Vec<u8>, StrandError> {
    seq.bytes()
        .enumerate()
        .map(|(i, ch)| {
            Nucleotide::from_ascii(ch)
                .map(Nucleotide::code)
                .ok_or(StrandError::InvalidNucleotide { ch: ch as char, position: i })
        })
        .collect()
}
