use image::{imageops::FilterType, GenericImageView};

use crate::error::CaptureError;

const HASH_SIZE: usize = 8;
const HIGHFREQ_FACTOR: usize = 4;
const IMG_SIZE: usize = HASH_SIZE * HIGHFREQ_FACTOR;

/// Perceptual hash of a screenshot, computed off the event loop via
/// `spawn_blocking` since it is CPU-bound. The algorithm (resize to a
/// small grayscale square, 2D DCT, threshold the low-frequency block
/// against its median) follows the well-known "pHash" technique
/// popularized by hackerfactor.com; this is an independent
/// implementation, not a port of any particular library.
pub fn phash(png_bytes: &[u8]) -> Result<String, CaptureError> {
    let image = image::load_from_memory(png_bytes)?;
    let gray = image
        .resize_exact(IMG_SIZE as u32, IMG_SIZE as u32, FilterType::Lanczos3)
        .to_luma8();

    let mut pixels = [[0f64; IMG_SIZE]; IMG_SIZE];
    for y in 0..IMG_SIZE {
        for x in 0..IMG_SIZE {
            pixels[y][x] = gray.get_pixel(x as u32, y as u32).0[0] as f64;
        }
    }

    let dct = dct2d(&pixels);

    let mut lowfreq = Vec::with_capacity(HASH_SIZE * HASH_SIZE);
    for row in dct.iter().take(HASH_SIZE) {
        lowfreq.extend_from_slice(&row[..HASH_SIZE]);
    }
    let median = median_of(&mut lowfreq.clone());

    let bits: Vec<bool> = lowfreq.iter().map(|v| *v > median).collect();
    Ok(bits_to_hex(&bits))
}

/// Direct O(n^2) two-dimensional DCT-II. `IMG_SIZE` is small (32) so this
/// is fast enough without an FFT-based shortcut.
fn dct2d(input: &[[f64; IMG_SIZE]; IMG_SIZE]) -> Vec<Vec<f64>> {
    let n = IMG_SIZE;
    let coeff = |k: usize| -> f64 {
        if k == 0 {
            (1.0 / n as f64).sqrt()
        } else {
            (2.0 / n as f64).sqrt()
        }
    };

    // Separable 1D DCT applied along rows, then along columns.
    let mut rows_transformed = vec![vec![0f64; n]; n];
    for (y, row) in input.iter().enumerate() {
        for u in 0..n {
            let mut sum = 0.0;
            for (x, &value) in row.iter().enumerate() {
                sum += value * ((std::f64::consts::PI / n as f64) * (x as f64 + 0.5) * u as f64).cos();
            }
            rows_transformed[y][u] = coeff(u) * sum;
        }
    }

    let mut result = vec![vec![0f64; n]; n];
    for u in 0..n {
        for v in 0..n {
            let mut sum = 0.0;
            for (y, row) in rows_transformed.iter().enumerate() {
                sum += row[u] * ((std::f64::consts::PI / n as f64) * (y as f64 + 0.5) * v as f64).cos();
            }
            result[v][u] = coeff(v) * sum;
        }
    }
    result
}

fn median_of(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn bits_to_hex(bits: &[bool]) -> String {
    let bit_string: String = bits.iter().map(|b| if *b { '1' } else { '0' }).collect();
    let width = bit_string.len().div_ceil(4);
    let value = u128::from_str_radix(&bit_string, 2).unwrap_or(0);
    format!("{value:0width$x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(IMG_SIZE as u32, IMG_SIZE as u32, image::Rgb([128, 128, 128]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn produces_fixed_length_hash_for_uniform_image() {
        let hash = phash(&tiny_png()).unwrap();
        assert!(!hash.is_empty());
    }

    #[test]
    fn is_deterministic() {
        let bytes = tiny_png();
        assert_eq!(phash(&bytes).unwrap(), phash(&bytes).unwrap());
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(phash(b"not a png").is_err());
    }
}
