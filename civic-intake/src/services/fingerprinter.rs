//! Perceptual image fingerprinting
//!
//! **Algorithm (mean hash):**
//! 1. Decode the image
//! 2. Convert to greyscale and downsample to an 8×8 grid
//! 3. Compute the mean intensity of the 64 cells
//! 4. Bit = 1 where cell ≥ mean, else 0 (row-major, most significant bit first)
//! 5. Pack the 64 bits as 16 hex digits
//!
//! Two fingerprints denote the same document iff their Hamming distance is
//! below the configured threshold. Images that cannot be decoded fall back
//! to a SHA-256 digest of the raw bytes, which still catches exact
//! re-uploads.

use civic_common::identity::sha256_hex;
use image::imageops::FilterType;
use thiserror::Error;

/// Side length of the downsampled grid
pub const GRID_SIZE: u32 = 8;

const PERCEPTUAL_PREFIX: &str = "phash:";
const DIGEST_PREFIX: &str = "sha256:";

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Failed to decode image: {0}")]
    DecodeError(String),
}

/// Comparable fingerprint of an image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// 64-bit mean hash
    Perceptual(u64),
    /// SHA-256 of the raw bytes (image could not be decoded)
    Digest(String),
}

impl Fingerprint {
    /// Stored form: `phash:<16 hex>` or `sha256:<64 hex>`
    pub fn to_storage_string(&self) -> String {
        match self {
            Fingerprint::Perceptual(bits) => format!("{}{:016x}", PERCEPTUAL_PREFIX, bits),
            Fingerprint::Digest(hex) => format!("{}{}", DIGEST_PREFIX, hex),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if let Some(hex) = value.strip_prefix(PERCEPTUAL_PREFIX) {
            return u64::from_str_radix(hex, 16).ok().map(Fingerprint::Perceptual);
        }
        value
            .strip_prefix(DIGEST_PREFIX)
            .map(|hex| Fingerprint::Digest(hex.to_string()))
    }

    /// Bit distance between two perceptual fingerprints
    ///
    /// `None` when either side is a digest; digests only compare for equality.
    pub fn hamming_distance(&self, other: &Fingerprint) -> Option<u32> {
        match (self, other) {
            (Fingerprint::Perceptual(a), Fingerprint::Perceptual(b)) => Some((a ^ b).count_ones()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

/// Fingerprint plus the exact-content hash used by the fast path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFingerprint {
    pub fingerprint: Fingerprint,
    pub content_hash: String,
    /// False when the perceptual hash fell back to the byte digest
    pub decoded: bool,
}

/// Fingerprint engine
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    hamming_threshold: u32,
}

impl Fingerprinter {
    pub fn new(hamming_threshold: u32) -> Self {
        Self { hamming_threshold }
    }

    pub fn hamming_threshold(&self) -> u32 {
        self.hamming_threshold
    }

    /// Mean hash of an encoded image
    pub fn perceptual_hash(&self, bytes: &[u8]) -> Result<u64, FingerprintError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| FingerprintError::DecodeError(e.to_string()))?;

        let grey = decoded.to_luma8();
        let grid = image::imageops::resize(&grey, GRID_SIZE, GRID_SIZE, FilterType::Triangle);

        let cells: Vec<u8> = grid.pixels().map(|p| p.0[0]).collect();
        let sum: u32 = cells.iter().map(|&c| c as u32).sum();
        let mean = sum as f64 / cells.len() as f64;

        let bits = cells
            .iter()
            .fold(0u64, |acc, &cell| (acc << 1) | u64::from(cell as f64 >= mean));

        Ok(bits)
    }

    /// Fingerprint with digest fallback for undecodable input
    pub fn fingerprint(&self, bytes: &[u8]) -> ImageFingerprint {
        let content_hash = sha256_hex(bytes);
        match self.perceptual_hash(bytes) {
            Ok(bits) => ImageFingerprint {
                fingerprint: Fingerprint::Perceptual(bits),
                content_hash,
                decoded: true,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Perceptual hash unavailable, using byte digest");
                ImageFingerprint {
                    fingerprint: Fingerprint::Digest(content_hash.clone()),
                    content_hash,
                    decoded: false,
                }
            }
        }
    }

    /// Same-document test: exact equality, or Hamming distance below threshold
    pub fn is_same_document(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        if a == b {
            return true;
        }
        a.hamming_distance(b)
            .is_some_and(|distance| distance < self.hamming_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn left_half_white() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, _| if x < 32 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) })
    }

    fn top_half_white() -> RgbImage {
        RgbImage::from_fn(64, 64, |_, y| if y < 32 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) })
    }

    #[test]
    fn hash_is_deterministic() {
        let engine = Fingerprinter::new(5);
        let png = encode(left_half_white(), ImageFormat::Png);
        assert_eq!(engine.perceptual_hash(&png).unwrap(), engine.perceptual_hash(&png).unwrap());
    }

    #[test]
    fn known_patterns_produce_expected_bits() {
        let engine = Fingerprinter::new(5);
        let left = engine.perceptual_hash(&encode(left_half_white(), ImageFormat::Png)).unwrap();
        let top = engine.perceptual_hash(&encode(top_half_white(), ImageFormat::Png)).unwrap();

        assert_eq!(left, 0xF0F0_F0F0_F0F0_F0F0);
        assert_eq!(top, 0xFFFF_FFFF_0000_0000);
    }

    #[test]
    fn distinct_images_are_far_apart() {
        let engine = Fingerprinter::new(5);
        let a = engine.fingerprint(&encode(left_half_white(), ImageFormat::Png));
        let b = engine.fingerprint(&encode(top_half_white(), ImageFormat::Png));

        let distance = a.fingerprint.hamming_distance(&b.fingerprint).unwrap();
        assert!(distance >= engine.hamming_threshold(), "distance {} too small", distance);
        assert!(!engine.is_same_document(&a.fingerprint, &b.fingerprint));
    }

    #[test]
    fn lossless_reencode_has_zero_distance() {
        let engine = Fingerprinter::new(5);
        let png = engine.fingerprint(&encode(left_half_white(), ImageFormat::Png));
        let bmp = engine.fingerprint(&encode(left_half_white(), ImageFormat::Bmp));

        assert_ne!(png.content_hash, bmp.content_hash);
        assert_eq!(png.fingerprint.hamming_distance(&bmp.fingerprint), Some(0));
        assert!(engine.is_same_document(&png.fingerprint, &bmp.fingerprint));
    }

    #[test]
    fn small_edit_is_near_duplicate() {
        let engine = Fingerprinter::new(5);
        let mut edited = left_half_white();
        // A 4×4 speck in one corner shifts at most one cell
        for x in 60..64 {
            for y in 60..64 {
                edited.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let original = engine.fingerprint(&encode(left_half_white(), ImageFormat::Png));
        let speck = engine.fingerprint(&encode(edited, ImageFormat::Png));
        assert!(engine.is_same_document(&original.fingerprint, &speck.fingerprint));
    }

    #[test]
    fn undecodable_bytes_fall_back_to_digest() {
        let engine = Fingerprinter::new(5);
        let garbage = b"\x89PNG\r\n\x1a\nnot really a png";

        assert!(matches!(
            engine.perceptual_hash(garbage),
            Err(FingerprintError::DecodeError(_))
        ));

        let fp = engine.fingerprint(garbage);
        assert!(!fp.decoded);
        assert_eq!(fp.fingerprint, Fingerprint::Digest(fp.content_hash.clone()));
        assert_eq!(engine.fingerprint(garbage), fp);
    }

    #[test]
    fn storage_string_roundtrip() {
        let p = Fingerprint::Perceptual(0x00FF_00FF_00FF_00FF);
        assert_eq!(p.to_storage_string(), "phash:00ff00ff00ff00ff");
        assert_eq!(Fingerprint::parse(&p.to_storage_string()), Some(p));

        let d = Fingerprint::Digest("abc".to_string());
        assert_eq!(Fingerprint::parse("sha256:abc"), Some(d.clone()));
        assert_eq!(Fingerprint::parse("md5:abc"), None);
        assert_eq!(d.hamming_distance(&Fingerprint::Perceptual(0)), None);
    }
}
