//! Core data types shared across the Luna workspace: the tick/interval time
//! model, the polymorphic annotation `Value`, the `Stage` enum, the
//! annotation data model (`AnnotationClass`/`Instance`/`AnnotationSet`), its
//! lazily-built interval index, and the shared error taxonomy.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod annot;
pub mod error;
pub mod interval_tree;
pub mod stage;
pub mod tick;
pub mod value;

pub use annot::{AnnotationClass, AnnotationSet, Instance, InstanceKey};
pub use error::LunaError;
pub use interval_tree::IntervalTree;
pub use stage::Stage;
pub use tick::{Interval, Tick};
pub use value::{Value, ValueType};
