//! API Module
//!
//! REST surface over a storage driver.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
