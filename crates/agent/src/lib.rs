//! Client-side failover over a weighted pool of HTTP backends.
//!
//! Backends are registered once with a weight. Each dispatch walks the
//! weighted sequence, skipping backends that are down and cooling off, and
//! probing them again once the cooldown has passed.

mod agent;
mod error;

pub use agent::{AgentConfig, Backend, FailoverAgent};
pub use error::AgentError;
