//! Orthogonal Space-Time Block Coding (OSTBC)
//!
//! Spreads a symbol stream over several transmit antennas using an
//! orthogonal code matrix. Each code block maps `k` symbols onto `t` time
//! slots, giving a code rate of `k / t`:
//!
//! | antennas | rate | block (k symbols → t slots) |
//! |----------|------|-----------------------------|
//! | 1        | 1    | pass-through                |
//! | 2        | 1    | Alamouti, 2 → 2             |
//! | 3, 4     | 3/4  | 3 → 4                       |
//! | 3, 4     | 1/2  | 4 → 8                       |
//!
//! Alamouti:
//! ```text
//!   slot 0: [  s1,   s2  ]
//!   slot 1: [ -s2*,  s1* ]
//! ```
//!
//! Input that does not fill a whole code block is truncated.

use crate::error::{CsrdError, CsrdResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

const CZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Code rate for 3 and 4 antenna codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OstbcRate {
    One,
    ThreeQuarters,
    Half,
}

impl OstbcRate {
    pub fn value(&self) -> f64 {
        match self {
            OstbcRate::One => 1.0,
            OstbcRate::ThreeQuarters => 0.75,
            OstbcRate::Half => 0.5,
        }
    }
}

/// OSTBC encoder for 1..=4 transmit antennas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OstbcEncoder {
    num_tx: usize,
    rate: OstbcRate,
}

impl OstbcEncoder {
    /// Create an encoder. One and two antennas always use rate 1; three and
    /// four antennas accept rate 3/4 or 1/2.
    pub fn new(num_tx: usize, rate: OstbcRate) -> CsrdResult<Self> {
        match (num_tx, rate) {
            (0, _) => Err(CsrdError::invalid_parameter(
                "num_tx_antennas",
                "at least one antenna is required",
            )),
            (1 | 2, _) => Ok(Self {
                num_tx,
                rate: OstbcRate::One,
            }),
            (3 | 4, OstbcRate::One) => Err(CsrdError::InconsistentConfiguration(format!(
                "no rate-1 orthogonal code exists for {} antennas",
                num_tx
            ))),
            (3 | 4, rate) => Ok(Self { num_tx, rate }),
            (n, _) => Err(CsrdError::invalid_parameter(
                "num_tx_antennas",
                format!("OSTBC supports at most 4 antennas, got {}", n),
            )),
        }
    }

    pub fn num_tx(&self) -> usize {
        self.num_tx
    }

    pub fn rate(&self) -> OstbcRate {
        self.rate
    }

    /// Symbols consumed and time slots produced per code block
    pub fn block_size(&self) -> (usize, usize) {
        match (self.num_tx, self.rate) {
            (1, _) => (1, 1),
            (2, _) => (2, 2),
            (_, OstbcRate::ThreeQuarters) => (3, 4),
            _ => (4, 8),
        }
    }

    /// Symbols per time slot
    pub fn code_rate(&self) -> f64 {
        let (k, t) = self.block_size();
        k as f64 / t as f64
    }

    /// Number of input symbols actually used for `n` offered symbols
    pub fn usable_symbols(&self, n: usize) -> usize {
        let (k, _) = self.block_size();
        n / k * k
    }

    /// Time slots produced by `n` offered symbols
    pub fn slots_for_symbols(&self, n: usize) -> usize {
        let (k, t) = self.block_size();
        n / k * t
    }

    /// Symbols needed to fill at least `slots` time slots, in whole code blocks
    pub fn symbols_for_slots(&self, slots: usize) -> usize {
        let (k, t) = self.block_size();
        slots.div_ceil(t) * k
    }

    /// Encode a symbol stream into per-antenna streams, `[antenna][time]`.
    pub fn encode(&self, symbols: &[Complex64]) -> Vec<Vec<Complex64>> {
        let (k, t) = self.block_size();
        let blocks = symbols.len() / k;
        let mut out = vec![Vec::with_capacity(blocks * t); self.num_tx];

        for block in symbols.chunks_exact(k) {
            for slot in self.encode_block(block) {
                for (ant, value) in slot.into_iter().enumerate() {
                    out[ant].push(value);
                }
            }
        }
        out
    }

    /// Encode one code block into `[slot][antenna]`
    fn encode_block(&self, s: &[Complex64]) -> Vec<Vec<Complex64>> {
        match (self.num_tx, self.rate) {
            (1, _) => vec![vec![s[0]]],
            (2, _) => vec![vec![s[0], s[1]], vec![-s[1].conj(), s[0].conj()]],
            (n, OstbcRate::ThreeQuarters) => {
                let full = rate_three_quarters(s[0], s[1], s[2]);
                full.into_iter().map(|row| row[..n].to_vec()).collect()
            }
            (n, _) => {
                let full = rate_half(s[0], s[1], s[2], s[3]);
                full.into_iter().map(|row| row[..n].to_vec()).collect()
            }
        }
    }
}

/// Rate 3/4 code for four antennas; the three-antenna code keeps the first
/// three columns.
///
/// ```text
///   [  s1,    s2,    s3,    0  ]
///   [ -s2*,   s1*,   0,     s3 ]
///   [ -s3*,   0,     s1*,  -s2 ]
///   [  0,    -s3*,   s2*,   s1 ]
/// ```
fn rate_three_quarters(s1: Complex64, s2: Complex64, s3: Complex64) -> [[Complex64; 4]; 4] {
    [
        [s1, s2, s3, CZERO],
        [-s2.conj(), s1.conj(), CZERO, s3],
        [-s3.conj(), CZERO, s1.conj(), -s2],
        [CZERO, -s3.conj(), s2.conj(), s1],
    ]
}

/// Rate 1/2 generalised complex orthogonal design (8 slots, 4 symbols)
fn rate_half(s1: Complex64, s2: Complex64, s3: Complex64, s4: Complex64) -> [[Complex64; 4]; 8] {
    let c = |z: Complex64| z.conj();
    [
        [s1, s2, s3, s4],
        [-s2, s1, -s4, s3],
        [-s3, s4, s1, -s2],
        [-s4, -s3, s2, s1],
        [c(s1), c(s2), c(s3), c(s4)],
        [-c(s2), c(s1), -c(s4), c(s3)],
        [-c(s3), c(s4), c(s1), -c(s2)],
        [-c(s4), -c(s3), c(s2), c(s1)],
    ]
}
