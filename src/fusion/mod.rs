//! Fusion module - multi-source alarm decisions with temporal debounce

mod engine;
mod hotcell;
mod policy;

pub use engine::{FusionEngine, FusionInputs, FusionResult, LocationSnapshot, SourceChannel};
pub use hotcell::HotCellGrid;
pub use policy::{build_policy, ChannelContribution, ConfidencePolicy, MaxExceedance, MeanExceedance};
