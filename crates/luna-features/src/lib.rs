//! Feature specification, per-epoch extraction, and level-2 post-processing.
//!
//! Level-1 blocks (§4.4/§4.5) depend only on a single epoch's samples;
//! level-2 blocks (§4.6) are temporal or cross-epoch transforms applied
//! afterward in declaration order.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod extractor;
pub mod post;
pub mod signal;
pub mod spec;
pub mod spectral;
pub mod timedomain;

pub use extractor::{ExtractResult, WelchParams};
pub use signal::EdfSource;
pub use spec::{ColumnLayout, FeatureKind, FeatureLine};
