//! Common types shared across the driveback crates.
//!
//! Every crate in the workspace reports failures through the single
//! [`Error`] enum defined here, so the HTTP layer can map any failure
//! to a response without knowing which crate produced it.

pub mod error;

pub use error::{Error, Result};
