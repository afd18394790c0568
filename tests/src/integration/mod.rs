//! Integration tests. Each module holds a `#[cfg(test)]` suite.

pub mod registry;
pub mod relay_bus;
