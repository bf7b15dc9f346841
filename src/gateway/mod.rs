//! The `Rampart` facade: one instance owns every resilience structure.

mod builder;
mod facade;

pub use builder::RampartBuilder;
pub use facade::{MaintenanceHandle, Rampart};
