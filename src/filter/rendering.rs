//! Perceptual near-duplicate and triviality rejection for rendered
//! images.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use img_hash::{HashAlg, HasherConfig};
use serde_json::Value;

use crate::error::FilterError;
use crate::filter::{FilterInfo, RenderingFilter};
use crate::util::image::{most_frequent_color_percentage, white_pixel_percentage};

/// Tuning for [`NonTrivialRenderingFilter`].
#[derive(Debug, Clone)]
pub struct NonTrivialRenderingFilterConfig {
    /// Hash size for mostly-background images. Backgrounds are naturally
    /// self-similar, so they get the coarser fingerprint.
    pub hash_size_background: u32,
    /// Hash size for everything else.
    pub hash_size_detail: u32,
    /// Above this background percentage the image is rejected outright.
    pub max_background_percentage: f64,
    /// Above this background percentage the coarse hash is used.
    pub background_threshold_percentage: f64,
}

impl Default for NonTrivialRenderingFilterConfig {
    fn default() -> Self {
        Self {
            hash_size_background: 5,
            hash_size_detail: 8,
            max_background_percentage: 95.0,
            background_threshold_percentage: 50.0,
        }
    }
}

/// Rejects near-blank, near-constant and near-duplicate images.
///
/// Near-duplicate detection uses a mean perceptual hash with adaptive
/// granularity keyed on the background percentage, and a shared set of
/// seen hashes guarded by a single mutex.
pub struct NonTrivialRenderingFilter {
    config: NonTrivialRenderingFilterConfig,
    background_hasher: img_hash::HasherConfig,
    detail_hasher: img_hash::HasherConfig,
    seen: Mutex<HashSet<Vec<u8>>>,
}

impl NonTrivialRenderingFilter {
    pub fn new(config: NonTrivialRenderingFilterConfig) -> Self {
        let background_hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(config.hash_size_background, config.hash_size_background);
        let detail_hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(config.hash_size_detail, config.hash_size_detail);
        Self {
            config,
            background_hasher,
            detail_hasher,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(NonTrivialRenderingFilterConfig::default())
    }

    /// Hash the image and record the hash. Returns whether the hash was
    /// new, plus its printable form.
    fn record_hash(
        &self,
        image: &img_hash::image::DynamicImage,
        background_percentage: f64,
    ) -> (bool, String) {
        let hasher_config = if background_percentage > self.config.background_threshold_percentage {
            &self.background_hasher
        } else {
            &self.detail_hasher
        };
        let hasher = hasher_config.to_hasher();
        let hash = hasher.hash_image(image);
        let printable = hash.to_base64();
        let mut seen = self.seen.lock().expect("hash set lock poisoned");
        (seen.insert(hash.as_bytes().to_vec()), printable)
    }
}

impl RenderingFilter for NonTrivialRenderingFilter {
    fn name(&self) -> &'static str {
        "NonTrivialRenderingFilter"
    }

    fn check_and_accept_image(
        &self,
        image_path: &Path,
    ) -> Result<(bool, FilterInfo), FilterError> {
        let image =
            img_hash::image::open(image_path).map_err(|e| FilterError::Image(e.to_string()))?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let buffer: &[u8] = &rgba;

        let mut info = FilterInfo::new();

        let white_pixels_ratio = white_pixel_percentage(width, height, buffer);
        info.insert("white_pixels_ratio".to_string(), Value::from(white_pixels_ratio));
        if white_pixels_ratio > self.config.max_background_percentage {
            info.insert("reason".to_string(), Value::from("white image"));
            return Ok((false, info));
        }

        let (added, hash) = self.record_hash(&image, white_pixels_ratio);
        info.insert("hash".to_string(), Value::from(hash));
        if !added {
            info.insert("reason".to_string(), Value::from("similar image"));
            return Ok((false, info));
        }

        let most_frequent_color_ratio = most_frequent_color_percentage(width, height, buffer);
        info.insert(
            "most_frequent_color_ratio".to_string(),
            Value::from(most_frequent_color_ratio),
        );
        if most_frequent_color_ratio > self.config.max_background_percentage {
            info.insert("reason".to_string(), Value::from("constant image"));
            return Ok((false, info));
        }

        Ok((true, info))
    }
}
