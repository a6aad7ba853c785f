//! The POPS sleep stager: dataset construction, training, prediction, and
//! feature attribution around a gradient-boosted-tree backend.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod dataset;
pub mod model;
pub mod shap;

pub use dataset::{build_dataset, trim_wake_epochs, WeightSpec};
pub use model::{ClassModel, PopsModel, TrainConfig};
pub use shap::{attribute, summarize_per_individual, ShapResult};
