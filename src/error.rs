use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed input '{}': {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error(
        "Dimension mismatch in '{}': expected {expected_width}x{expected_height}, got {width}x{height}",
        path.display()
    )]
    DimensionMismatch {
        path: PathBuf,
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Class {value} in '{}' exceeds base vocabulary maximum {max}", path.display())]
    ClassOutOfRange { path: PathBuf, value: i64, max: u32 },

    #[error("Class {class} not present in shape table of size {len}")]
    ShapeIndex { class: u32, len: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Corrupt tokenizer state: {0}")]
    Corrupt(String),
}
