//! Backend selection and passive health tracking.

pub mod health;
pub mod selector;

pub use health::{HealthPolicy, HealthState, HealthTable, HealthTransition, Verdict};
pub use selector::WeightedSelector;
