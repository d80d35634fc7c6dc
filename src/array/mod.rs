//! Array Client Adapters
//!
//! Provides [`ArrayClient`](crate::domain::ports::ArrayClient) implementations:
//! - Unisphere: REST management API of a real array
//! - InMemory: simulated array for standalone mode and tests

pub mod memory;
pub mod unisphere;

pub use memory::*;
pub use unisphere::*;
