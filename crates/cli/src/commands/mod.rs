//! CLI command implementations

pub mod analysis;
pub mod collectors;
pub mod metrics;
pub mod status;
