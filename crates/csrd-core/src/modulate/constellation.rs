//! Constellation tables for the linear and multicarrier modulators
//!
//! Every table is indexed by the symbol value (the integer formed by
//! `log2(M)` message bits, MSB first) and scaled to unit average energy.
//!
//! ```text
//!   16-QAM            8-PSK              16-APSK (4+12)
//!   ● ● │ ● ●          ●  ●                 ●  ●  ●
//!   ● ● │ ● ●        ●  ─┼─  ●            ●   ● ●   ●
//!  ─────┼─────         ●  ●               ●   ● ●   ●
//!   ● ● │ ● ●                               ●  ●  ●
//!   ● ● │ ● ●
//! ```
//!
//! PSK, PAM, ASK and square QAM use Gray labelling. Rectangular 8-QAM and
//! the cross constellations (32/128/512) are labelled in raster order.

use crate::error::{CsrdError, CsrdResult};
use crate::types::IQSample;
use std::f64::consts::PI;

/// APSK ring layouts: (points per ring, ring radius)
const APSK_16: &[(usize, f64)] = &[(4, 1.0), (12, 2.57)];
const APSK_32: &[(usize, f64)] = &[(4, 1.0), (12, 2.53), (16, 4.3)];
const APSK_64: &[(usize, f64)] = &[(4, 1.0), (12, 2.4), (20, 4.3), (28, 7.0)];
const APSK_128: &[(usize, f64)] = &[(8, 1.0), (16, 2.0), (24, 3.0), (36, 4.0), (44, 5.0)];
const APSK_256: &[(usize, f64)] = &[
    (8, 1.0),
    (16, 2.0),
    (24, 3.0),
    (32, 4.0),
    (40, 5.0),
    (56, 6.0),
    (80, 7.0),
];

/// Number of bits per symbol for a power-of-two order
pub fn bits_per_symbol(order: usize) -> usize {
    order.max(1).trailing_zeros() as usize
}

/// Gray code to binary position
pub fn gray_to_binary(mut g: usize) -> usize {
    let mut b = g;
    while g > 0 {
        g >>= 1;
        b ^= g;
    }
    b
}

/// Binary position to Gray code
pub fn binary_to_gray(b: usize) -> usize {
    b ^ (b >> 1)
}

/// Group bits (one per byte, MSB first) into symbol values, dropping a
/// trailing partial group.
pub fn bits_to_symbols(bits: &[u8], bits_per_symbol: usize) -> Vec<usize> {
    if bits_per_symbol == 0 {
        return vec![];
    }
    bits.chunks_exact(bits_per_symbol)
        .map(|chunk| chunk.iter().fold(0usize, |acc, &b| (acc << 1) | (b & 1) as usize))
        .collect()
}

/// Scale a point set to unit average energy
pub fn normalize(points: &mut [IQSample]) {
    if points.is_empty() {
        return;
    }
    let avg = points.iter().map(|p| p.norm_sqr()).sum::<f64>() / points.len() as f64;
    if avg > 0.0 {
        let scale = 1.0 / avg.sqrt();
        for p in points.iter_mut() {
            *p *= scale;
        }
    }
}

/// Average energy of a point set
pub fn average_energy(points: &[IQSample]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.norm_sqr()).sum::<f64>() / points.len() as f64
}

fn require_power_of_two(name: &str, order: usize, min: usize) -> CsrdResult<()> {
    if order < min || !order.is_power_of_two() {
        return Err(CsrdError::invalid_order(
            name,
            order,
            format!("must be a power of two >= {}", min),
        ));
    }
    Ok(())
}

/// M-PSK on the unit circle, rotated by `phase_offset` radians
pub fn psk(order: usize, phase_offset: f64) -> CsrdResult<Vec<IQSample>> {
    require_power_of_two("PSK", order, 2)?;
    Ok((0..order)
        .map(|v| {
            let pos = gray_to_binary(v) as f64;
            IQSample::from_polar(1.0, 2.0 * PI * pos / order as f64 + phase_offset)
        })
        .collect())
}

/// Bipolar M-PAM on the real axis: levels ±1, ±3, ... ±(M-1)
pub fn pam(order: usize) -> CsrdResult<Vec<IQSample>> {
    require_power_of_two("PAM", order, 2)?;
    let mut points: Vec<IQSample> = (0..order)
        .map(|v| {
            let pos = gray_to_binary(v) as f64;
            IQSample::new(2.0 * pos - (order as f64 - 1.0), 0.0)
        })
        .collect();
    normalize(&mut points);
    Ok(points)
}

/// Unipolar M-ASK: amplitudes 0, 1, ... M-1
pub fn ask(order: usize) -> CsrdResult<Vec<IQSample>> {
    require_power_of_two("ASK", order, 2)?;
    let mut points: Vec<IQSample> = (0..order)
        .map(|v| IQSample::new(gray_to_binary(v) as f64, 0.0))
        .collect();
    normalize(&mut points);
    Ok(points)
}

/// On-off keying
pub fn ook(order: usize) -> CsrdResult<Vec<IQSample>> {
    if order != 2 {
        return Err(CsrdError::invalid_order("OOK", order, "OOK is binary"));
    }
    Ok(vec![IQSample::new(0.0, 0.0), IQSample::new(2f64.sqrt(), 0.0)])
}

/// M-QAM: square grids for even bit counts, 4x2 rectangle for 8-QAM and
/// cross constellations for 32, 128 and 512.
pub fn qam(order: usize) -> CsrdResult<Vec<IQSample>> {
    require_power_of_two("QAM", order, 4)?;
    let k = bits_per_symbol(order);

    let mut points = if k % 2 == 0 {
        square_qam(order)
    } else if order == 8 {
        rectangular_qam(4, 2)
    } else {
        cross_qam(k)
    };
    normalize(&mut points);
    Ok(points)
}

fn square_qam(order: usize) -> Vec<IQSample> {
    let side = (order as f64).sqrt().round() as usize;
    let half_bits = bits_per_symbol(side);
    let level = |g: usize| 2.0 * gray_to_binary(g) as f64 - (side as f64 - 1.0);
    (0..order)
        .map(|v| {
            let i_bits = v >> half_bits;
            let q_bits = v & (side - 1);
            IQSample::new(level(i_bits), level(q_bits))
        })
        .collect()
}

fn rectangular_qam(i_levels: usize, q_levels: usize) -> Vec<IQSample> {
    let q_bits = bits_per_symbol(q_levels);
    (0..i_levels * q_levels)
        .map(|v| {
            let i = gray_to_binary(v >> q_bits) as f64;
            let q = gray_to_binary(v & (q_levels - 1)) as f64;
            IQSample::new(
                2.0 * i - (i_levels as f64 - 1.0),
                2.0 * q - (q_levels as f64 - 1.0),
            )
        })
        .collect()
}

/// Cross constellation: an n x n grid (n = 3 * 2^((k-3)/2)) with an
/// (n/6) x (n/6) square removed from each corner.
fn cross_qam(k: usize) -> Vec<IQSample> {
    let n = 3 * (1usize << ((k - 3) / 2));
    let corner = n / 6;
    let mut points = Vec::with_capacity(1 << k);
    for row in 0..n {
        for col in 0..n {
            let in_corner_row = row < corner || row >= n - corner;
            let in_corner_col = col < corner || col >= n - corner;
            if in_corner_row && in_corner_col {
                continue;
            }
            points.push(IQSample::new(
                2.0 * col as f64 - (n as f64 - 1.0),
                2.0 * row as f64 - (n as f64 - 1.0),
            ));
        }
    }
    points
}

/// Amplitude-phase shift keying with concentric rings
pub fn apsk(order: usize) -> CsrdResult<Vec<IQSample>> {
    let rings = match order {
        16 => APSK_16,
        32 => APSK_32,
        64 => APSK_64,
        128 => APSK_128,
        256 => APSK_256,
        _ => {
            return Err(CsrdError::invalid_order(
                "APSK",
                order,
                "supported orders are 16, 32, 64, 128 and 256",
            ))
        }
    };

    let mut points = Vec::with_capacity(order);
    for &(count, radius) in rings {
        let offset = PI / count as f64;
        for i in 0..count {
            points.push(IQSample::from_polar(
                radius,
                2.0 * PI * i as f64 / count as f64 + offset,
            ));
        }
    }
    normalize(&mut points);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit_energy(points: &[IQSample], what: &str) {
        let e = average_energy(points);
        assert!((e - 1.0).abs() < 1e-6, "{} energy {}", what, e);
    }

    #[test]
    fn test_unit_energy_all_linear_orders() {
        for m in [2, 4, 8, 16, 32, 64] {
            assert_unit_energy(&pam(m).unwrap(), "PAM");
            assert_unit_energy(&ask(m).unwrap(), "ASK");
            assert_unit_energy(&psk(m, 0.0).unwrap(), "PSK");
        }
        for m in [4, 8, 16, 32, 64, 128, 256, 512, 1024] {
            let pts = qam(m).unwrap();
            assert_eq!(pts.len(), m);
            assert_unit_energy(&pts, "QAM");
        }
        for m in [16, 32, 64, 128, 256] {
            let pts = apsk(m).unwrap();
            assert_eq!(pts.len(), m);
            assert_unit_energy(&pts, "APSK");
        }
        assert_unit_energy(&ook(2).unwrap(), "OOK");
    }

    #[test]
    fn test_invalid_orders() {
        assert!(matches!(qam(6), Err(CsrdError::InvalidOrder { .. })));
        assert!(qam(2).is_err());
        assert!(psk(3, 0.0).is_err());
        assert!(apsk(8).is_err());
        assert!(ook(4).is_err());
    }

    #[test]
    fn test_points_are_distinct() {
        for pts in [qam(32).unwrap(), qam(128).unwrap(), qam(8).unwrap(), apsk(64).unwrap()] {
            for i in 0..pts.len() {
                for j in i + 1..pts.len() {
                    assert!((pts[i] - pts[j]).norm() > 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_gray_neighbours_differ_by_one_bit() {
        // Adjacent PSK points carry labels differing in exactly one bit
        let m = 8;
        let mut by_pos = vec![0usize; m];
        for v in 0..m {
            by_pos[gray_to_binary(v)] = v;
        }
        for p in 0..m {
            let a = by_pos[p];
            let b = by_pos[(p + 1) % m];
            assert_eq!((a ^ b).count_ones(), 1);
        }
        assert_eq!(binary_to_gray(gray_to_binary(5)), 5);
    }

    #[test]
    fn test_bits_to_symbols_truncates() {
        let bits = [1, 0, 1, 1, 0, 0, 1];
        assert_eq!(bits_to_symbols(&bits, 2), vec![2, 3, 0]);
        assert_eq!(bits_to_symbols(&bits, 4), vec![11]);
    }
}
