//! Posterior refinement for Luna: feature-range gate, elapsed-sleep priors,
//! SOAP discriminant refinement, and channel-equivalence combining.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod equiv;
pub mod es_prior;
pub mod gate;
pub mod soap;

pub use equiv::{combine, ChannelSolution, CombineRule};
pub use es_prior::{apply_es_priors, EsPriorConfig, EsPriorTable, Posterior};
pub use gate::{apply_gate, RangeTable};
pub use soap::{refine, refine_from_features, Discriminant, RareStagePolicy, SoapConfig};
