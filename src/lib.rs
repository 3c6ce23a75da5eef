//! pack-exec - buildpack lifecycle execution
//!
//! Runs the phases of a Cloud Native Buildpacks lifecycle in short-lived
//! containers to turn application source into an OCI image.

pub mod archive;
pub mod auth;
pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod logging;
pub mod names;
pub mod reference;

#[cfg(test)]
pub(crate) mod fakes;

pub use error::{PackError, PackResult};
