//! Pixel-level statistics over raw RGBA buffers.
//!
//! Operates on `(width, height, rgba bytes)` rather than a decoded image
//! type so both the `image` crate and the hashing crate's re-exported
//! image types can feed the same computations.

use std::collections::HashMap;

/// Percentage (0-100) of pixels that are pure white.
///
/// A pixel counts as white only when all three color channels are
/// exactly 255; the alpha channel is ignored.
pub fn white_pixel_percentage(width: u32, height: u32, rgba: &[u8]) -> f64 {
    let total = (width as usize) * (height as usize);
    if total == 0 {
        return 0.0;
    }
    let white = rgba
        .chunks_exact(4)
        .filter(|px| px[0] == 255 && px[1] == 255 && px[2] == 255)
        .count();
    (white as f64 / total as f64) * 100.0
}

/// Percentage (0-100) of pixels sharing the single most frequent color.
pub fn most_frequent_color_percentage(width: u32, height: u32, rgba: &[u8]) -> f64 {
    let total = (width as usize) * (height as usize);
    if total == 0 {
        return 0.0;
    }
    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    for px in rgba.chunks_exact(4) {
        *counts.entry([px[0], px[1], px[2]]).or_insert(0) += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    (max as f64 / total as f64) * 100.0
}

/// Per-row ink density of a grayscale image: `1 - mean(row) / 255`.
///
/// A fully white row yields 0.0, a fully black row 1.0.
pub fn row_ink_profile(width: u32, height: u32, luma: &[u8]) -> Vec<f32> {
    let w = width as usize;
    if w == 0 {
        return vec![0.0; height as usize];
    }
    luma.chunks_exact(w)
        .map(|row| {
            let sum: u64 = row.iter().map(|&v| v as u64).sum();
            1.0 - (sum as f32 / row.len() as f32) / 255.0
        })
        .collect()
}

/// Bounding box `(x0, y0, x1, y1)` of all non-white pixels, exclusive on
/// the upper bounds. Returns `None` when every pixel is white.
pub fn non_white_bbox(width: u32, height: u32, rgba: &[u8]) -> Option<(u32, u32, u32, u32)> {
    let w = width as usize;
    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;

    for (i, px) in rgba.chunks_exact(4).enumerate() {
        if px[0] == 255 && px[1] == 255 && px[2] == 255 {
            continue;
        }
        let x = (i % w) as u32;
        let y = (i / w) as u32;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
        found = true;
    }

    found.then_some((min_x, min_y, max_x + 1, max_y + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        (0..width * height).flat_map(|_| color).collect()
    }

    #[test]
    fn white_percentage_of_solid_images() {
        let white = solid(10, 10, [255, 255, 255, 255]);
        assert_eq!(white_pixel_percentage(10, 10, &white), 100.0);

        let black = solid(10, 10, [0, 0, 0, 255]);
        assert_eq!(white_pixel_percentage(10, 10, &black), 0.0);
    }

    #[test]
    fn white_percentage_partial() {
        // 95 white rows, 5 black rows on a 100x100 image.
        let mut rgba = solid(100, 100, [255, 255, 255, 255]);
        for px in rgba.chunks_exact_mut(4).take(5 * 100) {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
        }
        assert_eq!(white_pixel_percentage(100, 100, &rgba), 95.0);
    }

    #[test]
    fn most_frequent_color_of_constant_image() {
        let black = solid(10, 10, [0, 0, 0, 255]);
        assert_eq!(most_frequent_color_percentage(10, 10, &black), 100.0);
    }

    #[test]
    fn most_frequent_color_of_split_image() {
        let mut rgba = solid(10, 10, [255, 255, 255, 255]);
        for px in rgba.chunks_exact_mut(4).take(25) {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
        }
        assert_eq!(most_frequent_color_percentage(10, 10, &rgba), 75.0);
    }

    #[test]
    fn ink_profile_distinguishes_rows() {
        // Two rows: white then black.
        let luma = vec![255u8, 255, 255, 0, 0, 0];
        let profile = row_ink_profile(3, 2, &luma);
        assert!(profile[0].abs() < 1e-6);
        assert!((profile[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn bbox_of_centered_mark() {
        let mut rgba = solid(10, 10, [255, 255, 255, 255]);
        // Mark pixel (4, 5).
        let idx = (5 * 10 + 4) * 4;
        rgba[idx] = 0;
        assert_eq!(non_white_bbox(10, 10, &rgba), Some((4, 5, 5, 6)));
    }

    #[test]
    fn bbox_of_all_white_is_none() {
        let rgba = solid(4, 4, [255, 255, 255, 255]);
        assert_eq!(non_white_bbox(4, 4, &rgba), None);
    }
}
