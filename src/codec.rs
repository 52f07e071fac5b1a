//! Binary `.dat` readers and writers.
//!
//! All formats are sequences of little-endian `int32` fields:
//!
//! - input grid: `width . height . classes[width*height]` row-major
//! - rule file: `(source_class . target_class . offset_x . offset_y .
//!   new_class)*` in emission order
//! - shape file `token_NNNN.dat`: `class_id . num_cells . (x . y .
//!   base_class)*`
//! - sequence file: `(class . anchor_x . anchor_y)*`, one record per token
//!   instance in row-major first-visit order
//!
//! Readers validate eagerly and fail fast with the offending path; writers
//! assemble the whole record in memory and write once.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::counter::Constellation;
use crate::error::TokenizeError;
use crate::grid::{Cell, ClassId, Grid, ImageState, Offset, TokenId};
use crate::layout;
use crate::merge::Rule;
use crate::shape::{ShapeCell, ShapeTable, TokenShape};

/// Byte size of one rule record (five i32 fields).
const RULE_RECORD_BYTES: usize = 20;

// ---------------------------------------------------------------------------
// Field-level helpers
// ---------------------------------------------------------------------------

/// Little-endian i32 cursor over one file's bytes.
///
/// Underruns surface as `Malformed` with the source path so truncated
/// records are reported against the file, not as a bare IO error.
struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> RecordReader<'a> {
    fn new(data: &'a [u8], path: &'a Path) -> Self {
        RecordReader { data, pos: 0, path }
    }

    fn read_i32(&mut self) -> Result<i32, TokenizeError> {
        if self.pos + 4 > self.data.len() {
            return Err(TokenizeError::Malformed {
                path: self.path.to_path_buf(),
                reason: format!("truncated record at byte {}", self.pos),
            });
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read an i32 that must be a non-negative class or count value.
    fn read_non_negative(&mut self, what: &str) -> Result<u32, TokenizeError> {
        let value = self.read_i32()?;
        if value < 0 {
            return Err(TokenizeError::Malformed {
                path: self.path.to_path_buf(),
                reason: format!("negative {what}: {value}"),
            });
        }
        Ok(value as u32)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

fn push_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Input grids
// ---------------------------------------------------------------------------

/// Read one input grid file and validate it against the configured size.
///
/// When `max_class` is given, every cell must lie in `[0, max_class]`;
/// this is the bounds check for freshly loaded training corpora.
pub fn read_grid(
    path: &Path,
    expected: (u32, u32),
    max_class: Option<ClassId>,
) -> Result<Grid<ClassId>, TokenizeError> {
    let data = fs::read(path)?;
    let mut reader = RecordReader::new(&data, path);

    let width = reader.read_i32()?;
    let height = reader.read_i32()?;
    if width <= 0 || height <= 0 {
        return Err(TokenizeError::Malformed {
            path: path.to_path_buf(),
            reason: format!("non-positive dimensions {width}x{height}"),
        });
    }
    let (width, height) = (width as u32, height as u32);
    if (width, height) != expected {
        return Err(TokenizeError::DimensionMismatch {
            path: path.to_path_buf(),
            expected_width: expected.0,
            expected_height: expected.1,
            width,
            height,
        });
    }

    let cell_count = (width as usize) * (height as usize);
    let mut cells = Vec::with_capacity(cell_count);
    for _ in 0..cell_count {
        let value = reader.read_i32()?;
        if value < 0 {
            return Err(TokenizeError::Malformed {
                path: path.to_path_buf(),
                reason: format!("negative class value {value}"),
            });
        }
        if let Some(max) = max_class {
            if value as u32 > max {
                return Err(TokenizeError::ClassOutOfRange {
                    path: path.to_path_buf(),
                    value: value as i64,
                    max,
                });
            }
        }
        cells.push(value as ClassId);
    }
    if reader.remaining() != 0 {
        return Err(TokenizeError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{} trailing bytes after cell data", reader.remaining()),
        });
    }

    Ok(Grid::from_cells(width, height, cells))
}

/// Write a grid in the input `.dat` format.
pub fn write_grid(path: &Path, grid: &Grid<ClassId>) -> Result<(), TokenizeError> {
    let mut out = Vec::with_capacity(8 + 4 * (grid.width() as usize) * (grid.height() as usize));
    push_i32(&mut out, grid.width() as i32);
    push_i32(&mut out, grid.height() as i32);
    for (_, value) in grid.iter_cells() {
        push_i32(&mut out, value as i32);
    }
    fs::write(path, out)?;
    Ok(())
}

/// Extract the image id from a file stem of the form `<id>` or `<name>_<id>`.
fn parse_image_id(stem: &str) -> Option<u32> {
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.as_slice() {
        [id] => id.parse().ok(),
        [_, id] => id.parse().ok(),
        _ => None,
    }
}

fn collect_dat_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), TokenizeError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dat_files(&path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("dat") {
            warn!("skipping non-.dat file: {}", path.display());
            continue;
        }
        out.push(path);
    }
    Ok(())
}

/// Load every `.dat` grid under `dir` (recursively) into per-image state.
///
/// Files whose stem does not carry an image id are skipped with a warning;
/// malformed grid contents abort the load. The result is sorted by image id
/// so downstream output is independent of directory iteration order.
pub fn read_corpus(
    dir: &Path,
    expected: (u32, u32),
    max_class: Option<ClassId>,
) -> Result<Vec<ImageState>, TokenizeError> {
    if !dir.is_dir() {
        return Err(TokenizeError::Malformed {
            path: dir.to_path_buf(),
            reason: "input folder does not exist".to_string(),
        });
    }

    let mut files = Vec::new();
    collect_dat_files(dir, &mut files)?;

    let mut images = Vec::with_capacity(files.len());
    for path in files {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => {
                warn!("skipping file with unusable name: {}", path.display());
                continue;
            }
        };
        let id = match parse_image_id(stem) {
            Some(id) => id,
            None => {
                warn!("file does not match <id>.dat or <name>_<id>.dat: {}", path.display());
                continue;
            }
        };
        let grid = read_grid(&path, expected, max_class)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.to_string());
        debug!(id, "loaded {}", path.display());
        images.push(ImageState::new(filename, id, grid));
    }

    images.sort_by_key(|image| image.id());
    info!(count = images.len(), "corpus loaded from {}", dir.display());
    Ok(images)
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Write the rule list in emission order.
pub fn write_rules(rules: &[Rule], path: &Path) -> Result<(), TokenizeError> {
    let mut out = Vec::with_capacity(rules.len() * RULE_RECORD_BYTES);
    for rule in rules {
        push_i32(&mut out, rule.constellation.source_class as i32);
        push_i32(&mut out, rule.constellation.target_class as i32);
        push_i32(&mut out, rule.constellation.offset.dx);
        push_i32(&mut out, rule.constellation.offset.dy);
        push_i32(&mut out, rule.new_class as i32);
    }
    fs::write(path, out)?;
    Ok(())
}

/// Read a rule file back in emission order.
pub fn read_rules(path: &Path) -> Result<Vec<Rule>, TokenizeError> {
    let data = fs::read(path)?;
    if data.len() % RULE_RECORD_BYTES != 0 {
        return Err(TokenizeError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "rule file size {} is not a multiple of {} bytes",
                data.len(),
                RULE_RECORD_BYTES
            ),
        });
    }

    let mut reader = RecordReader::new(&data, path);
    let mut rules = Vec::with_capacity(data.len() / RULE_RECORD_BYTES);
    while reader.remaining() > 0 {
        let source_class = reader.read_non_negative("source class")?;
        let target_class = reader.read_non_negative("target class")?;
        let dx = reader.read_i32()?;
        let dy = reader.read_i32()?;
        let new_class = reader.read_non_negative("new class")?;
        rules.push(Rule {
            constellation: Constellation {
                source_class,
                target_class,
                offset: Offset::new(dx, dy),
            },
            new_class,
        });
    }
    info!(count = rules.len(), "rules loaded from {}", path.display());
    Ok(rules)
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

fn shape_file_name(class: ClassId) -> String {
    format!("token_{class:04}.dat")
}

/// Write every shape in the table to `dir`, one `token_NNNN.dat` per class.
pub fn write_shapes(shapes: &ShapeTable, dir: &Path) -> Result<(), TokenizeError> {
    fs::create_dir_all(dir)?;
    for (class, shape) in shapes.iter() {
        let mut out = Vec::with_capacity(8 + 12 * shape.len());
        push_i32(&mut out, class as i32);
        push_i32(&mut out, shape.len() as i32);
        for cell in shape.cells() {
            push_i32(&mut out, cell.offset.dx);
            push_i32(&mut out, cell.offset.dy);
            push_i32(&mut out, cell.base_class as i32);
        }
        fs::write(dir.join(shape_file_name(class)), out)?;
    }
    info!(count = shapes.len(), "token shapes written to {}", dir.display());
    Ok(())
}

fn read_shape_file(path: &Path) -> Result<(ClassId, TokenShape), TokenizeError> {
    let data = fs::read(path)?;
    let mut reader = RecordReader::new(&data, path);

    let class_id = reader.read_non_negative("class id")?;
    let num_cells = reader.read_non_negative("cell count")?;
    if num_cells == 0 {
        return Err(TokenizeError::Malformed {
            path: path.to_path_buf(),
            reason: "shape has no cells".to_string(),
        });
    }

    let mut cells = Vec::with_capacity(num_cells as usize);
    for _ in 0..num_cells {
        let dx = reader.read_i32()?;
        let dy = reader.read_i32()?;
        let base_class = reader.read_non_negative("base class")?;
        cells.push(ShapeCell {
            offset: Offset::new(dx, dy),
            base_class,
        });
    }
    if reader.remaining() != 0 {
        return Err(TokenizeError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{} trailing bytes after cell data", reader.remaining()),
        });
    }
    if cells[0].offset != Offset::new(0, 0) {
        return Err(TokenizeError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "first shape cell must be the anchor (0,0), got ({},{})",
                cells[0].offset.dx, cells[0].offset.dy
            ),
        });
    }

    // The filename's numeric part must agree with the stored class id.
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        if let Some(digits) = stem.strip_prefix("token_") {
            if digits.parse::<u32>() != Ok(class_id) {
                return Err(TokenizeError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("filename does not match stored class id {class_id}"),
                });
            }
        }
    }

    Ok((class_id, TokenShape::from_cells(cells)))
}

/// Read every `token_*.dat` in `dir` and rebuild the shape table.
///
/// The shapes are sorted by class id and must form the contiguous range
/// `0..len`, matching the append-only allocation of a training run.
pub fn read_shapes(dir: &Path) -> Result<ShapeTable, TokenizeError> {
    if !dir.is_dir() {
        return Err(TokenizeError::Malformed {
            path: dir.to_path_buf(),
            reason: "token folder does not exist".to_string(),
        });
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("dat") {
            warn!("skipping non-.dat file: {}", path.display());
            continue;
        }
        let is_token_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("token_"));
        if !is_token_file {
            warn!("skipping non-token file: {}", path.display());
            continue;
        }
        entries.push(read_shape_file(&path)?);
    }

    entries.sort_by_key(|(class, _)| *class);
    for (index, (class, _)) in entries.iter().enumerate() {
        if *class as usize != index {
            return Err(TokenizeError::Malformed {
                path: dir.to_path_buf(),
                reason: format!("token classes are not contiguous: expected {index}, got {class}"),
            });
        }
    }

    info!(count = entries.len(), "token shapes loaded from {}", dir.display());
    Ok(ShapeTable::from_shapes(
        entries.into_iter().map(|(_, shape)| shape).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Token sequences
// ---------------------------------------------------------------------------

fn sequence_file_name(image: &ImageState) -> String {
    let stem = Path::new(image.filename())
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(image.filename());
    format!("{stem}_sequence.dat")
}

/// Write the compact token sequence of every image.
///
/// The sequence lists each distinct instance id once, in row-major
/// first-visit order, as `(class, anchor_x, anchor_y)`. The kept-anchor
/// rule guarantees the first visited cell of an instance is its anchor;
/// anything else means the grids are corrupt and aborts the write.
pub fn write_sequences(
    images: &[ImageState],
    transcribed_dir: &Path,
    bucket_modulus: u32,
) -> Result<(), TokenizeError> {
    for image in images {
        let mut out = Vec::new();
        let mut visited: HashSet<TokenId> = HashSet::new();

        for y in 0..image.height() as i32 {
            for x in 0..image.width() as i32 {
                let cell = Cell::new(x, y);
                let id = image.id_at(cell);
                if !visited.insert(id) {
                    continue;
                }

                let anchor = image.anchor_of(id);
                if anchor != cell {
                    return Err(TokenizeError::Corrupt(format!(
                        "image '{}': token {} first visited at ({}, {}) but anchored at ({}, {})",
                        image.filename(),
                        id,
                        cell.x,
                        cell.y,
                        anchor.x,
                        anchor.y
                    )));
                }

                push_i32(&mut out, image.class_at(cell) as i32);
                push_i32(&mut out, anchor.x);
                push_i32(&mut out, anchor.y);
            }
        }

        let dir = transcribed_dir.join(layout::bucket_dir(image.id(), bucket_modulus));
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(sequence_file_name(image)), out)?;
    }
    info!(
        count = images.len(),
        "token sequences written to {}",
        transcribed_dir.display()
    );
    Ok(())
}
