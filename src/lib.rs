pub mod cli;
pub mod compose;
pub mod config;
pub mod core;
pub mod download;
pub mod error;
pub mod logging;
pub mod pypi;
pub mod refine;
pub mod runtime;
pub mod segment;

pub use config::{Preset, RefineConfig};
pub use error::{CutoutError, Result};
pub use refine::{MaskStats, RefineReport, Refined, refine};
pub use segment::Segmenter;
