//! stripreco-algorithms: Cluster and hit reconstruction for strip modules.
//!
//! This crate provides the reconstruction chain:
//! - **Cluster finder** - streaming per-channel grouping under a time-coincidence rule
//! - **Cluster estimator** - position, time and charge for 1, 2 or N digis
//! - **Hit finder** - stereo and orthogonal front/back intersection
//! - **Module pipeline** - per-module stage sequencing with a locked input queue
//! - **Reconstruction** - parallel scheduling over all modules and output merging
//!
#![warn(missing_docs)]

mod cluster_estimator;
mod cluster_finder;
pub mod hit_finder;
mod module;
mod reconstruction;
mod statistics;

pub use cluster_estimator::{ClusterEstimator, SINGLE_CHANNEL_ERROR};
pub use cluster_finder::{ChannelTiming, ClusterFinder, SideDigi};
pub use hit_finder::{
    HitCuts, HitFinder, HitFinderStatistics, OrthogonalHitFinder, StereoHitFinder,
};
pub use module::{ModulePipeline, ModuleStatistics, PipelineStage};
pub use reconstruction::{EventRecord, ModulePartition, RecoOutput, Reconstruction};
pub use statistics::{BatchStatistics, RunStatistics, StageTimings};

// Re-export core reconstruction types
pub use stripreco_core::params::{RecoMode, RecoParams};
pub use stripreco_core::timing::TimingPolicy;
