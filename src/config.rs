//! Run configuration for the training and apply-only paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TokenizeError;
use crate::grid::ClassId;

/// Configuration of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    /// Largest class id appearing in any input cell (e.g. 255 for 8-bit
    /// inputs); the base vocabulary is `[0, base_class_max]`.
    pub base_class_max: ClassId,
    /// Number of merge iterations, i.e. the maximum number of rules.
    pub rules_to_learn: u32,
    /// Expected width of every input grid.
    pub image_width: u32,
    /// Expected height of every input grid.
    pub image_height: u32,
    /// Fan-out of the sharded output directory.
    pub bucket_modulus: u32,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), TokenizeError> {
        validate_common(self.image_width, self.image_height, self.bucket_modulus)
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }
}

/// Configuration for applying an existing rule set to a fresh corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplyConfig {
    /// Path to a `rules.dat` produced by a training run.
    pub rule_file: PathBuf,
    /// Directory of `token_NNNN.dat` shape files from the same run.
    pub token_dir: PathBuf,
    pub image_width: u32,
    pub image_height: u32,
    pub bucket_modulus: u32,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl ApplyConfig {
    pub fn validate(&self) -> Result<(), TokenizeError> {
        validate_common(self.image_width, self.image_height, self.bucket_modulus)
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }
}

fn validate_common(width: u32, height: u32, modulus: u32) -> Result<(), TokenizeError> {
    if width == 0 || height == 0 {
        return Err(TokenizeError::Config(format!(
            "image size must be non-zero, got {width}x{height}"
        )));
    }
    if modulus == 0 {
        return Err(TokenizeError::Config(
            "bucket modulus must be non-zero".to_string(),
        ));
    }
    Ok(())
}
