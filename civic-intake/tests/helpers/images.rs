//! Synthetic flyer images
//!
//! Each seed yields a 64×64 image built from an 8×8 grid of black/white
//! blocks, so distinct seeds are visually distinct with overwhelming
//! probability.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

const BLOCK: u32 = 8;

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn block_image(seed: u64) -> RgbImage {
    let pattern = splitmix64(seed);
    RgbImage::from_fn(BLOCK * 8, BLOCK * 8, |x, y| {
        let bit = (y / BLOCK) * 8 + (x / BLOCK);
        if pattern >> (63 - bit) & 1 == 1 {
            Rgb([250, 250, 250])
        } else {
            Rgb([10, 10, 10])
        }
    })
}

fn encode_png(img: RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// PNG flyer stand-in for `seed`
pub fn flyer_png(seed: u64) -> Vec<u8> {
    encode_png(block_image(seed))
}

/// Same picture as `flyer_png(seed)` with a one-pixel edit: different bytes,
/// same perceptual fingerprint
pub fn flyer_png_with_speck(seed: u64) -> Vec<u8> {
    let mut img = block_image(seed);
    let Rgb([r, _, _]) = *img.get_pixel(BLOCK / 2, BLOCK / 2);
    let tweak = if r > 128 { 240 } else { 20 };
    img.put_pixel(BLOCK / 2, BLOCK / 2, Rgb([tweak, tweak, tweak]));
    encode_png(img)
}

/// Bytes that no image sniffer accepts
pub fn not_an_image() -> Vec<u8> {
    b"%PDF-1.7\n% campaign flyer, honest\n".to_vec()
}
