//! Constellation counting: find the most frequent adjacency pattern in the
//! corpus.
//!
//! A constellation is the directed triple `(source_class, target_class,
//! anchor_offset)` describing how two token instances touch: the offset runs
//! from the anchor of the token under the scan cursor to the anchor of its
//! right or down neighbour. Each pair of touching instances votes exactly
//! once per image regardless of how many cells the contact spans.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::grid::{Cell, ClassId, ImageState, Offset};

/// A directed adjacency pattern between two token classes.
///
/// The key is ordered: `source_class` is the class at the cell scanned
/// first, and `offset` points from the source anchor to the target anchor.
/// Reversing it would describe a different merge, so the two directions are
/// never folded together.
///
/// The derived `Ord` compares `(source_class, target_class, offset.y,
/// offset.x)` lexicographically; this is the total order used to break
/// count ties deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constellation {
    pub source_class: ClassId,
    pub target_class: ClassId,
    pub offset: Offset,
}

/// Scan directions: down, then right. Restricting to these two prevents
/// counting the same undirected contact from both sides.
const SCAN_DIRECTIONS: [Offset; 2] = [Offset::DOWN, Offset::RIGHT];

/// Count every constellation across the corpus and return the most common
/// one together with its count.
///
/// Per image, a pair of distinct token instances contributes at most one
/// vote: the instance pair is keyed by its two anchors in canonical
/// (row-major smaller first) order and deduplicated. A composite token
/// touching a neighbour along several cells therefore still counts once.
///
/// Returns `None` when the corpus yields no candidate at all (every image
/// is a single token or empty); the rule loop treats that as exhaustion.
///
/// Ties on the count are broken by the total order on [`Constellation`],
/// smallest key first, which makes the result independent of map iteration
/// order and reproducible across runs.
pub fn most_common_constellation(images: &[ImageState]) -> Option<(Constellation, u64)> {
    let mut counts: HashMap<Constellation, u64> = HashMap::new();

    for image in images {
        // Instance pairs already counted, scoped to this image.
        let mut used: HashSet<(Cell, Cell)> = HashSet::new();

        for y in 0..image.height() as i32 {
            for x in 0..image.width() as i32 {
                let cell = Cell::new(x, y);
                for dir in SCAN_DIRECTIONS {
                    let neighbor = cell + dir;
                    if !image.in_bounds(neighbor) {
                        continue;
                    }

                    let cell_id = image.id_at(cell);
                    let neighbor_id = image.id_at(neighbor);
                    // A token cannot merge with itself.
                    if cell_id == neighbor_id {
                        continue;
                    }

                    let cell_anchor = image.anchor_of(cell_id);
                    let neighbor_anchor = image.anchor_of(neighbor_id);

                    let key = if cell_anchor <= neighbor_anchor {
                        (cell_anchor, neighbor_anchor)
                    } else {
                        (neighbor_anchor, cell_anchor)
                    };
                    if !used.insert(key) {
                        continue;
                    }

                    let constellation = Constellation {
                        source_class: image.class_at(cell),
                        target_class: image.class_at(neighbor),
                        offset: neighbor_anchor - cell_anchor,
                    };
                    *counts.entry(constellation).or_insert(0) += 1;
                }
            }
        }
    }

    let winner = counts
        .into_iter()
        .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.cmp(ca)));

    if let Some((constellation, count)) = &winner {
        debug!(
            source = constellation.source_class,
            target = constellation.target_class,
            dx = constellation.offset.dx,
            dy = constellation.offset.dy,
            count,
            "most common constellation"
        );
    }

    winner
}
