//! DCT-based perceptual hashing of grayscale frames.
//!
//! The full pipeline is: 7x7 box filter at native resolution, nearest-neighbor
//! downsample to 32x32, 32x32 DCT, then a 64-bit hash from the low-frequency
//! 8x8 block (the DC coefficient excluded) by comparing each coefficient
//! against their median.

use super::dct::{self, N};
use super::hamming::Hamming;

/// Side length of the reduced tile fed into the DCT.
pub const TILE: usize = N;

const FILTER_RADIUS: usize = 3; // 7x7 box

/// Hashes a pre-reduced 32x32 grayscale tile. Returns `None` for the
/// all-zeros sentinel, which uniform frames collapse into.
pub fn hash_tile(tile: &[u8; TILE * TILE]) -> Option<Hamming> {
    let mut floats = [0.0f32; TILE * TILE];
    for (f, b) in floats.iter_mut().zip(tile.iter()) {
        *f = *b as f32;
    }
    hash_reduced(&floats)
}

/// Hashes a full-resolution single-channel luma buffer of `width * height`
/// bytes in row-major order.
pub fn hash_luma(luma: &[u8], width: usize, height: usize) -> Option<Hamming> {
    if width == 0 || height == 0 || luma.len() < width * height {
        return None;
    }

    let filtered = box_filter(luma, width, height);
    let tile = downsample_nearest(&filtered, width, height);
    hash_reduced(&tile)
}

fn hash_reduced(tile: &[f32; TILE * TILE]) -> Option<Hamming> {
    let coeffs = dct_block(tile);

    let mut sorted = coeffs;
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];

    // A flat tile leaves nothing but rounding noise in the block. The noise
    // would hash to an arbitrary bit pattern that matches other flat tiles at
    // random, so collapse it into the rejected all-zeros sentinel.
    let spread = sorted[sorted.len() - 1] - sorted[0];
    if spread <= 1e-3 {
        return None;
    }

    let mut hash = 0u64;
    for (i, coeff) in coeffs.iter().enumerate() {
        if *coeff > median {
            hash |= 1 << (63 - i);
        }
    }

    if hash == 0 {
        return None;
    }
    Some(Hamming(hash))
}

/// The 8x8 low-frequency block at rows and columns 1..=8, row-major. Skipping
/// row and column 0 excludes the DC coefficient.
fn dct_block(tile: &[f32; TILE * TILE]) -> [f32; 64] {
    let spectrum = dct::dct_2d(tile);
    let mut block = [0.0f32; 64];
    for y in 1..9 {
        for x in 1..9 {
            block[(y - 1) * 8 + (x - 1)] = spectrum[y * N + x];
        }
    }
    block
}

/// 7x7 mean filter with clamped borders.
fn box_filter(luma: &[u8], width: usize, height: usize) -> Vec<f32> {
    let r = FILTER_RADIUS as isize;
    let mut out = vec![0.0f32; width * height];

    for y in 0..height as isize {
        for x in 0..width as isize {
            let mut sum = 0.0f32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let sy = (y + dy).clamp(0, height as isize - 1) as usize;
                    let sx = (x + dx).clamp(0, width as isize - 1) as usize;
                    sum += luma[sy * width + sx] as f32;
                }
            }
            let window = (2 * r + 1) * (2 * r + 1);
            out[y as usize * width + x as usize] = sum / window as f32;
        }
    }
    out
}

fn downsample_nearest(filtered: &[f32], width: usize, height: usize) -> [f32; TILE * TILE] {
    let mut tile = [0.0f32; TILE * TILE];
    for y in 0..TILE {
        for x in 0..TILE {
            let sy = y * height / TILE;
            let sx = x * width / TILE;
            tile[y * TILE + x] = filtered[sy * width + sx];
        }
    }
    tile
}

#[cfg(test)]
mod test {
    use super::*;

    // A textured tile with energy across the spectrum. A plain gradient is no
    // good here: its DCT collapses into row and column 0, which the hash
    // excludes, and the tile would count as flat.
    fn textured_tile() -> [u8; TILE * TILE] {
        let mut tile = [0u8; TILE * TILE];
        for y in 0..TILE {
            for x in 0..TILE {
                tile[y * TILE + x] = ((x * 37 + y * 101 + x * y * 7) % 200) as u8;
            }
        }
        tile
    }

    #[test]
    fn deterministic() {
        let tile = textured_tile();
        let a = hash_tile(&tile).unwrap();
        let b = hash_tile(&tile).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn uniform_tile_is_rejected() {
        assert_eq!(None, hash_tile(&[0u8; TILE * TILE]));
        assert_eq!(None, hash_tile(&[128u8; TILE * TILE]));
        assert_eq!(None, hash_tile(&[255u8; TILE * TILE]));
    }

    #[test]
    fn brightness_offset_barely_changes_the_hash() {
        // A constant offset only moves the DC coefficient, which the hash
        // excludes. Coefficients sitting right at the median may still flip.
        let tile = textured_tile();
        let mut brighter = tile;
        for b in brighter.iter_mut() {
            *b += 20;
        }

        let a = hash_tile(&tile).unwrap();
        let b = hash_tile(&brighter).unwrap();
        assert!(a.distance_to(b) <= 10, "distance was {}", a.distance_to(b));
    }

    #[test]
    fn different_structures_hash_differently() {
        let textured = hash_tile(&textured_tile()).unwrap();

        let mut checker = [0u8; TILE * TILE];
        for y in 0..TILE {
            for x in 0..TILE {
                checker[y * TILE + x] = if (x / 4 + y / 4) % 2 == 0 { 0 } else { 200 };
            }
        }
        let checker = hash_tile(&checker).unwrap();

        assert_ne!(textured, checker);
        assert!(textured.distance_to(checker) > 5);
    }

    #[test]
    fn full_resolution_input_hashes() {
        let (w, h) = (160, 90);
        let mut luma = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                luma[y * w + x] = ((x * 37 + y * 101 + x * y * 7) % 251) as u8;
            }
        }

        let hash = hash_luma(&luma, w, h).unwrap();
        assert_eq!(Some(hash), hash_luma(&luma, w, h));
    }

    #[test]
    fn hash_luma_rejects_empty_input() {
        assert_eq!(None, hash_luma(&[], 0, 0));
        assert_eq!(None, hash_luma(&[1, 2, 3], 100, 100));
    }
}
