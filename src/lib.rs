//! Transactional, filterable store of kymograph statistics.
//!
//! Stats are grouped by the source file they were measured on. A [`Model`]
//! wraps the grouped [`StatCollection`] with nested updates that coalesce
//! into one change event per outermost update.

pub mod data;
pub mod error;
pub mod events;
pub mod selection;
pub mod settings;
pub mod state;
pub mod workers;

pub use data::collection::StatCollection;
pub use data::filter::FeatureFilter;
pub use data::model::{FeatureValue, IdGenerator, Stat, StatRef};
pub use data::schema::{Dimension, FeatureSchema};
pub use state::Model;
