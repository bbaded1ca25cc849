//! Devserver API models
//!
//! Wire shapes of the JSON documents returned by devserver RPCs.

pub mod models;

pub use models::*;
