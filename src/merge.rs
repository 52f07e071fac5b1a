//! Merge engine: shape combination and the corpus-wide rewrite pass.
//!
//! Given a winning constellation, [`combine_shapes`] synthesises the new
//! composite shape and [`apply_rule`] rewrites every matching occurrence in
//! every image. Both sides agree on the same anchor-choice predicate so the
//! shape's offsets and the rewrite's base cell line up.

use tracing::debug;

use crate::counter::Constellation;
use crate::error::TokenizeError;
use crate::grid::{Cell, ClassId, ImageState, Offset};
use crate::shape::{ShapeCell, ShapeTable, TokenShape};

/// One learned merge: a constellation and the composite class it produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rule {
    pub constellation: Constellation,
    pub new_class: ClassId,
}

/// Whether the merged token keeps the source anchor.
///
/// True iff the source anchor precedes the target anchor in row-major
/// order, so the kept anchor is always the scan-first cell of the
/// composite.
fn keep_source_anchor(offset: Offset) -> bool {
    offset.dy > 0 || (offset.dy == 0 && offset.dx > 0)
}

/// Synthesise the shape of the composite produced by `constellation`.
///
/// The surviving anchor is the row-major smaller of the two instance
/// anchors; the other shape's cells are translated into the kept anchor's
/// frame. Cell order is kept-shape first, then the translated other shape,
/// which fixes the serialized form.
pub fn combine_shapes(
    constellation: &Constellation,
    shapes: &ShapeTable,
) -> Result<TokenShape, TokenizeError> {
    let source = shapes.shape(constellation.source_class)?;
    let target = shapes.shape(constellation.target_class)?;
    let offset = constellation.offset;

    let mut cells = Vec::with_capacity(source.len() + target.len());
    if keep_source_anchor(offset) {
        cells.extend_from_slice(source.cells());
        cells.extend(target.cells().iter().map(|c| ShapeCell {
            offset: c.offset + offset,
            base_class: c.base_class,
        }));
    } else {
        cells.extend_from_slice(target.cells());
        cells.extend(source.cells().iter().map(|c| ShapeCell {
            offset: c.offset - offset,
            base_class: c.base_class,
        }));
    }
    Ok(TokenShape::from_cells(cells))
}

/// Rewrite every occurrence of `rule` across all images.
///
/// Each image is scanned row-major. A match requires the source class at
/// its own anchor and the target class at its own anchor exactly
/// `constellation.offset` away. On a match a fresh instance id is
/// allocated and every in-bounds cell of the composite shape is rewritten;
/// cells of the shape falling outside the image are skipped.
///
/// Cells just rewritten carry the new class and so cannot match again
/// later in the same pass; disjoint occurrences merge independently in
/// scan order.
pub fn apply_rule(
    rule: &Rule,
    shapes: &ShapeTable,
    images: &mut [ImageState],
) -> Result<(), TokenizeError> {
    let constellation = &rule.constellation;
    let offset = constellation.offset;
    let shape = shapes.shape(rule.new_class)?;
    let keep_source = keep_source_anchor(offset);

    let mut applied = 0u64;
    for image in images.iter_mut() {
        for y in 0..image.height() as i32 {
            for x in 0..image.width() as i32 {
                let cell = Cell::new(x, y);

                if image.class_at(cell) != constellation.source_class {
                    continue;
                }
                let source_anchor = image.anchor_of(image.id_at(cell));
                // Only act at the source anchor itself.
                if source_anchor != cell {
                    continue;
                }

                let target_cell = cell + offset;
                if !image.in_bounds(target_cell) {
                    continue;
                }
                if image.class_at(target_cell) != constellation.target_class {
                    continue;
                }
                let target_anchor = image.anchor_of(image.id_at(target_cell));
                if target_anchor != target_cell {
                    continue;
                }

                // Both classes and both anchors line up: merge.
                let new_anchor = if keep_source { source_anchor } else { target_anchor };
                let new_id = image.allocate_token(new_anchor);
                for shape_cell in shape.cells() {
                    let covered = new_anchor + shape_cell.offset;
                    if !image.in_bounds(covered) {
                        // Composites may hang off the boundary; clip.
                        continue;
                    }
                    image.set_cell(covered, rule.new_class, new_id);
                }
                applied += 1;
            }
        }
    }

    debug!(
        new_class = rule.new_class,
        occurrences = applied,
        "applied rule"
    );
    Ok(())
}

/// Apply an existing rule list in emission order.
///
/// A rule whose constellation never matches is a no-op, not an error.
pub fn apply_rules(
    rules: &[Rule],
    shapes: &ShapeTable,
    images: &mut [ImageState],
) -> Result<(), TokenizeError> {
    for rule in rules {
        apply_rule(rule, shapes, images)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    fn image_from_rows(id: u32, rows: &[&[u32]]) -> ImageState {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let cells: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        ImageState::new(format!("img_{id}.dat"), id, Grid::from_cells(width, height, cells))
    }

    fn shape_cells(shape: &TokenShape) -> Vec<(Offset, ClassId)> {
        shape.cells().iter().map(|c| (c.offset, c.base_class)).collect()
    }

    #[test]
    fn test_keep_source_anchor_predicate() {
        assert!(keep_source_anchor(Offset::RIGHT));
        assert!(keep_source_anchor(Offset::DOWN));
        assert!(keep_source_anchor(Offset::new(-3, 1)));
        assert!(!keep_source_anchor(Offset::new(-1, 0)));
        assert!(!keep_source_anchor(Offset::new(0, -1)));
        assert!(!keep_source_anchor(Offset::new(2, -1)));
    }

    #[test]
    fn test_combine_horizontal_singletons() {
        let shapes = ShapeTable::with_base_classes(7);
        let c = Constellation {
            source_class: 7,
            target_class: 7,
            offset: Offset::RIGHT,
        };
        let shape = combine_shapes(&c, &shapes).unwrap();
        assert_eq!(
            shape_cells(&shape),
            vec![(Offset::new(0, 0), 7), (Offset::new(1, 0), 7)]
        );
    }

    #[test]
    fn test_combine_upward_offset_keeps_target_anchor() {
        // Offset (0,-1): the target sits above, so its anchor survives and
        // the source cells are translated down by one.
        let mut shapes = ShapeTable::with_base_classes(7);
        let domino = shapes.append(TokenShape::from_cells(vec![
            ShapeCell {
                offset: Offset::new(0, 0),
                base_class: 6,
            },
            ShapeCell {
                offset: Offset::new(1, 0),
                base_class: 6,
            },
        ]));
        let c = Constellation {
            source_class: domino,
            target_class: 5,
            offset: Offset::new(0, -1),
        };
        let shape = combine_shapes(&c, &shapes).unwrap();
        assert_eq!(
            shape_cells(&shape),
            vec![
                (Offset::new(0, 0), 5),
                (Offset::new(0, 1), 6),
                (Offset::new(1, 1), 6),
            ]
        );
    }

    #[test]
    fn test_combine_negative_x_positive_y_keeps_source_anchor() {
        let shapes = ShapeTable::with_base_classes(9);
        let c = Constellation {
            source_class: 3,
            target_class: 4,
            offset: Offset::new(-1, 1),
        };
        let shape = combine_shapes(&c, &shapes).unwrap();
        assert_eq!(
            shape_cells(&shape),
            vec![(Offset::new(0, 0), 3), (Offset::new(-1, 1), 4)]
        );
    }

    #[test]
    fn test_combine_unknown_class_errors() {
        let shapes = ShapeTable::with_base_classes(3);
        let c = Constellation {
            source_class: 11,
            target_class: 0,
            offset: Offset::RIGHT,
        };
        assert!(matches!(
            combine_shapes(&c, &shapes),
            Err(TokenizeError::ShapeIndex { class: 11, .. })
        ));
    }

    #[test]
    fn test_apply_rule_basic_merge() {
        let mut shapes = ShapeTable::with_base_classes(7);
        let c = Constellation {
            source_class: 7,
            target_class: 7,
            offset: Offset::RIGHT,
        };
        let new_class = shapes.append(combine_shapes(&c, &shapes).unwrap());
        let rule = Rule {
            constellation: c,
            new_class,
        };

        let mut images = vec![image_from_rows(0, &[&[7, 7]])];
        apply_rule(&rule, &shapes, &mut images).unwrap();

        let image = &images[0];
        let left = Cell::new(0, 0);
        let right = Cell::new(1, 0);
        assert_eq!(image.class_at(left), 8);
        assert_eq!(image.class_at(right), 8);
        assert_eq!(image.id_at(left), image.id_at(right));
        assert_eq!(image.id_at(left), 2);
        assert_eq!(image.anchor_of(image.id_at(left)), left);
    }

    #[test]
    fn test_apply_rule_scan_order_on_run() {
        // A run of three identical cells: the leftmost pair merges first,
        // consuming cells 0 and 1; the third cell stays a singleton.
        let mut shapes = ShapeTable::with_base_classes(7);
        let c = Constellation {
            source_class: 7,
            target_class: 7,
            offset: Offset::RIGHT,
        };
        let new_class = shapes.append(combine_shapes(&c, &shapes).unwrap());
        let rule = Rule {
            constellation: c,
            new_class,
        };

        let mut images = vec![image_from_rows(0, &[&[7, 7, 7]])];
        apply_rule(&rule, &shapes, &mut images).unwrap();

        let image = &images[0];
        assert_eq!(image.class_at(Cell::new(0, 0)), 8);
        assert_eq!(image.class_at(Cell::new(1, 0)), 8);
        assert_eq!(image.class_at(Cell::new(2, 0)), 7);
        assert_ne!(image.id_at(Cell::new(1, 0)), image.id_at(Cell::new(2, 0)));
    }

    #[test]
    fn test_apply_rule_disjoint_occurrences() {
        let mut shapes = ShapeTable::with_base_classes(7);
        let c = Constellation {
            source_class: 7,
            target_class: 7,
            offset: Offset::RIGHT,
        };
        let new_class = shapes.append(combine_shapes(&c, &shapes).unwrap());
        let rule = Rule {
            constellation: c,
            new_class,
        };

        let mut images = vec![image_from_rows(0, &[&[7, 7, 7, 7]])];
        apply_rule(&rule, &shapes, &mut images).unwrap();

        let image = &images[0];
        for x in 0..4 {
            assert_eq!(image.class_at(Cell::new(x, 0)), 8);
        }
        let first = image.id_at(Cell::new(0, 0));
        let second = image.id_at(Cell::new(2, 0));
        assert_eq!(image.id_at(Cell::new(1, 0)), first);
        assert_eq!(image.id_at(Cell::new(3, 0)), second);
        assert_ne!(first, second);
        assert_eq!(image.anchor_of(second), Cell::new(2, 0));
    }

    #[test]
    fn test_apply_rule_requires_anchor_match() {
        // The target cell holds the right class but is not at its own
        // anchor: no merge may fire.
        let mut shapes = ShapeTable::with_base_classes(7);
        let domino = shapes.append(TokenShape::from_cells(vec![
            ShapeCell {
                offset: Offset::new(0, 0),
                base_class: 7,
            },
            ShapeCell {
                offset: Offset::new(1, 0),
                base_class: 7,
            },
        ]));

        let mut image = image_from_rows(0, &[&[5, 7, 7]]);
        let id = image.allocate_token(Cell::new(1, 0));
        image.set_cell(Cell::new(1, 0), domino, id);
        image.set_cell(Cell::new(2, 0), domino, id);

        // (5, domino) with offset (2,0) targets the domino's non-anchor
        // cell; nothing matches.
        let c = Constellation {
            source_class: 5,
            target_class: domino,
            offset: Offset::new(2, 0),
        };
        let new_class = shapes.append(combine_shapes(&c, &shapes).unwrap());
        let rule = Rule {
            constellation: c,
            new_class,
        };
        let mut images = vec![image];
        apply_rule(&rule, &shapes, &mut images).unwrap();
        assert_eq!(images[0].class_at(Cell::new(0, 0)), 5);
        assert_eq!(images[0].class_at(Cell::new(1, 0)), domino);
    }

    #[test]
    fn test_apply_rule_boundary_clipping() {
        // A clipped instance of a two-wide domino (class 5) occupies the
        // single column of a 1x2 image; merging it with the class-4 cell
        // below produces an L-shaped composite whose (1,0) cell falls
        // outside the grid and is silently skipped.
        let mut shapes = ShapeTable::with_base_classes(4);
        let domino = shapes.append(TokenShape::from_cells(vec![
            ShapeCell {
                offset: Offset::new(0, 0),
                base_class: 3,
            },
            ShapeCell {
                offset: Offset::new(1, 0),
                base_class: 3,
            },
        ]));

        let mut image = image_from_rows(0, &[&[3], &[4]]);
        let clipped = image.allocate_token(Cell::new(0, 0));
        image.set_cell(Cell::new(0, 0), domino, clipped);

        let c = Constellation {
            source_class: domino,
            target_class: 4,
            offset: Offset::DOWN,
        };
        let new_class = shapes.append(combine_shapes(&c, &shapes).unwrap());
        let rule = Rule {
            constellation: c,
            new_class,
        };

        let mut images = vec![image];
        apply_rule(&rule, &shapes, &mut images).unwrap();

        let image = &images[0];
        let top = Cell::new(0, 0);
        let bottom = Cell::new(0, 1);
        assert_eq!(image.class_at(top), new_class);
        assert_eq!(image.class_at(bottom), new_class);
        assert_eq!(image.id_at(top), image.id_at(bottom));
        assert_eq!(image.anchor_of(image.id_at(top)), top);

        // Interior cells still agree with the shape and the initial grid.
        let shape = shapes.get(new_class).unwrap();
        for cell in [top, bottom] {
            let offset = cell - image.anchor_of(image.id_at(cell));
            assert_eq!(
                shape.base_class_at(offset),
                Some(image.initial_class_at(cell))
            );
        }
    }

    #[test]
    fn test_apply_rule_no_match_is_noop() {
        let mut shapes = ShapeTable::with_base_classes(7);
        let c = Constellation {
            source_class: 1,
            target_class: 2,
            offset: Offset::RIGHT,
        };
        let new_class = shapes.append(combine_shapes(&c, &shapes).unwrap());
        let rule = Rule {
            constellation: c,
            new_class,
        };
        let mut images = vec![image_from_rows(0, &[&[7, 7]])];
        apply_rule(&rule, &shapes, &mut images).unwrap();
        assert_eq!(images[0].class_at(Cell::new(0, 0)), 7);
        assert_eq!(images[0].next_id(), 2);
    }

    #[test]
    fn test_apply_rules_in_order() {
        // Two rules chained: (7,7,(1,0)) -> 8, then (8,7,(2,0)) -> 9.
        let mut shapes = ShapeTable::with_base_classes(7);
        let c1 = Constellation {
            source_class: 7,
            target_class: 7,
            offset: Offset::RIGHT,
        };
        let class8 = shapes.append(combine_shapes(&c1, &shapes).unwrap());
        let c2 = Constellation {
            source_class: class8,
            target_class: 7,
            offset: Offset::new(2, 0),
        };
        let class9 = shapes.append(combine_shapes(&c2, &shapes).unwrap());

        let rules = vec![
            Rule {
                constellation: c1,
                new_class: class8,
            },
            Rule {
                constellation: c2,
                new_class: class9,
            },
        ];

        let mut images = vec![image_from_rows(0, &[&[7, 7, 7]])];
        apply_rules(&rules, &shapes, &mut images).unwrap();

        let image = &images[0];
        for x in 0..3 {
            assert_eq!(image.class_at(Cell::new(x, 0)), class9);
            assert_eq!(image.id_at(Cell::new(x, 0)), image.id_at(Cell::new(0, 0)));
        }
        assert_eq!(image.anchor_of(image.id_at(Cell::new(0, 0))), Cell::new(0, 0));
    }
}
