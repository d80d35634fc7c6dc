//! Domain Module
//!
//! Core domain types and port traits for the volume driver.

pub mod array;
pub mod ports;

pub use array::*;
pub use ports::*;
