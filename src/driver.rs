//! Rule driver: sequences counting and merging for N iterations, then
//! persists the learned vocabulary; also hosts the apply-only path that
//! replays an existing rule file over a fresh corpus.

use serde::Serialize;
use tracing::info;

use crate::codec;
use crate::config::{ApplyConfig, TrainConfig};
use crate::counter;
use crate::error::TokenizeError;
use crate::grid::{Cell, ImageState};
use crate::layout::OutputLayout;
use crate::merge::{self, Rule};
use crate::shape::ShapeTable;

/// Outcome of a training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    /// Number of corpus images processed.
    pub images: usize,
    /// Rules actually emitted; less than `rules_to_learn` when the corpus
    /// ran out of candidates.
    pub rules_learned: usize,
    /// Final vocabulary size (base classes plus composites).
    pub vocab_size: usize,
    /// Whether the loop terminated on an exhausted corpus.
    pub exhausted: bool,
}

/// Outcome of an apply-only run.
#[derive(Debug, Clone, Serialize)]
pub struct ApplySummary {
    pub images: usize,
    pub rules_applied: usize,
}

/// Learn `rules_to_learn` merge rules over the corpus and write the rule
/// file, shape files, and per-image token sequences.
///
/// Each iteration elects the most common constellation, synthesises its
/// composite shape, and rewrites every occurrence. The loop stops early
/// when no candidate remains. Writers run only after the loop completes,
/// so a failed run persists nothing.
pub fn train(config: &TrainConfig) -> Result<TrainSummary, TokenizeError> {
    config.validate()?;

    info!("reading corpus from {}", config.input_dir.display());
    let mut images = codec::read_corpus(
        &config.input_dir,
        config.image_size(),
        Some(config.base_class_max),
    )?;

    let layout = OutputLayout::new(&config.output_dir);
    layout.create()?;

    let mut shapes = ShapeTable::with_base_classes(config.base_class_max);
    let mut rules: Vec<Rule> = Vec::with_capacity(config.rules_to_learn as usize);
    let mut exhausted = false;

    for iteration in 0..config.rules_to_learn {
        let Some((constellation, count)) = counter::most_common_constellation(&images) else {
            info!(iteration, "corpus exhausted, stopping early");
            exhausted = true;
            break;
        };

        let shape = merge::combine_shapes(&constellation, &shapes)?;
        let new_class = shapes.append(shape);
        let rule = Rule {
            constellation,
            new_class,
        };
        merge::apply_rule(&rule, &shapes, &mut images)?;
        rules.push(rule);

        info!(
            iteration = iteration + 1,
            total = config.rules_to_learn,
            new_class,
            count,
            "learned rule"
        );

        if cfg!(debug_assertions) {
            verify_corpus(&images, &shapes)?;
        }
    }

    codec::write_rules(&rules, &layout.rules_file)?;
    codec::write_shapes(&shapes, &layout.tokens_dir)?;
    codec::write_sequences(&images, &layout.transcribed_dir, config.bucket_modulus)?;

    Ok(TrainSummary {
        images: images.len(),
        rules_learned: rules.len(),
        vocab_size: shapes.len(),
        exhausted,
    })
}

/// Replay an existing rule file over a fresh corpus and write its token
/// sequences.
///
/// Rules whose constellation never matches are no-ops; the output is
/// byte-identical to the sequences of the original training run when fed
/// the same corpus.
pub fn apply_rules_to_folder(config: &ApplyConfig) -> Result<ApplySummary, TokenizeError> {
    config.validate()?;

    let rules = codec::read_rules(&config.rule_file)?;
    let shapes = codec::read_shapes(&config.token_dir)?;
    let mut images = codec::read_corpus(&config.input_dir, config.image_size(), None)?;

    let layout = OutputLayout::new(&config.output_dir);
    layout.create()?;

    info!(rules = rules.len(), images = images.len(), "applying rules");
    merge::apply_rules(&rules, &shapes, &mut images)?;

    codec::write_sequences(&images, &layout.transcribed_dir, config.bucket_modulus)?;

    Ok(ApplySummary {
        images: images.len(),
        rules_applied: rules.len(),
    })
}

/// Check the per-cell invariants of every image against the shape table.
///
/// For each cell: its instance anchor must be in bounds and carry the same
/// class, the class's shape must cover the cell, and the base class the
/// shape records there must equal the initial input cell. Violations are
/// implementation bugs and reported as [`TokenizeError::Corrupt`].
pub fn verify_corpus(images: &[ImageState], shapes: &ShapeTable) -> Result<(), TokenizeError> {
    for image in images {
        for y in 0..image.height() as i32 {
            for x in 0..image.width() as i32 {
                let cell = Cell::new(x, y);
                let id = image.id_at(cell);
                if id >= image.next_id() {
                    return Err(TokenizeError::Corrupt(format!(
                        "image '{}': cell ({x}, {y}) holds unallocated id {id}",
                        image.filename()
                    )));
                }
                let anchor = image.anchor_of(id);
                if !image.in_bounds(anchor) {
                    return Err(TokenizeError::Corrupt(format!(
                        "image '{}': token {id} anchored out of bounds at ({}, {})",
                        image.filename(),
                        anchor.x,
                        anchor.y
                    )));
                }
                let class = image.class_at(cell);
                if image.class_at(anchor) != class {
                    return Err(TokenizeError::Corrupt(format!(
                        "image '{}': cell ({x}, {y}) class {class} disagrees with its anchor",
                        image.filename()
                    )));
                }
                let shape = shapes.shape(class)?;
                match shape.base_class_at(cell - anchor) {
                    Some(base) if base == image.initial_class_at(cell) => {}
                    Some(base) => {
                        return Err(TokenizeError::Corrupt(format!(
                            "image '{}': cell ({x}, {y}) base class {} does not match shape ({base})",
                            image.filename(),
                            image.initial_class_at(cell)
                        )));
                    }
                    None => {
                        return Err(TokenizeError::Corrupt(format!(
                            "image '{}': shape of class {class} does not cover cell ({x}, {y})",
                            image.filename()
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
