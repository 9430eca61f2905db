// Navmesh pipeline - shared components
// Configuration and logging used by the navigator crate and its tools.

pub mod config;
pub mod log;
