pub mod codec;
pub mod config;
pub mod counter;
pub mod driver;
pub mod error;
pub mod grid;
pub mod layout;
pub mod merge;
pub mod shape;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::{ApplyConfig, TrainConfig};
pub use counter::{most_common_constellation, Constellation};
pub use driver::{apply_rules_to_folder, train, ApplySummary, TrainSummary};
pub use error::TokenizeError;
pub use grid::{Cell, ClassId, Grid, ImageState, Offset, TokenId};
pub use merge::{apply_rule, apply_rules, combine_shapes, Rule};
pub use shape::{ShapeCell, ShapeTable, TokenShape};
