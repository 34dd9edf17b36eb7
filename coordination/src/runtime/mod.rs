//! Incident runtime
//!
//! - `instance.rs`: the per-incident event loop task
//! - `handle.rs`: [`IncidentHandle`], the cloneable client of one loop
//! - `registry.rs`: [`IncidentRegistry`], create-or-attach by service

mod handle;
mod instance;
pub mod registry;

pub use handle::IncidentHandle;
pub use registry::IncidentRegistry;
