//! Output directory layout and id-based sharding.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rule file name at the output root.
pub const RULES_FILE_NAME: &str = "rules.dat";
/// Directory holding one shape file per token class.
pub const TOKENS_DIR_NAME: &str = "tokens";
/// Directory holding the sharded per-image sequence files.
pub const TRANSCRIBED_DIR_NAME: &str = "transcribed_data";

/// Two-level bucket path for an image id: `<id % modulus>/<id>`, both
/// zero-padded to six digits so large corpora don't pile up in one folder.
pub fn bucket_dir(id: u32, modulus: u32) -> PathBuf {
    PathBuf::from(format!("{:06}", id % modulus)).join(format!("{id:06}"))
}

/// Resolved paths of one output tree.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub rules_file: PathBuf,
    pub tokens_dir: PathBuf,
    pub transcribed_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(root: &Path) -> Self {
        OutputLayout {
            rules_file: root.join(RULES_FILE_NAME),
            tokens_dir: root.join(TOKENS_DIR_NAME),
            transcribed_dir: root.join(TRANSCRIBED_DIR_NAME),
        }
    }

    /// Create the top-level output directories.
    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.tokens_dir)?;
        fs::create_dir_all(&self.transcribed_dir)?;
        Ok(())
    }
}
