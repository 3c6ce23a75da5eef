//! Lifecycle execution
//!
//! Everything needed to turn application source into an image by running
//! the buildpack lifecycle inside containers:
//!
//! - [`api`]: platform API versions and negotiation
//! - [`mount_paths`]: where volumes are mounted inside phase containers
//! - [`builder`]: builder image metadata
//! - [`phase_config`]: container configuration for one phase
//! - [`container_ops`]: file operations applied before a phase starts
//! - [`phase`]: running and cleaning up a single phase container
//! - [`lifecycle`]: sequencing phases for one build

pub mod api;
pub mod builder;
pub mod container_ops;
pub mod lifecycle;
pub mod mount_paths;
pub mod options;
pub mod phase;
pub mod phase_config;

pub use api::{ApiSet, ApiVersion};
pub use builder::{Builder, ImageBuilder};
pub use container_ops::ContainerOperation;
pub use lifecycle::LifecycleExecution;
pub use mount_paths::{ContainerOs, MountPaths};
pub use options::{LifecycleOptions, ProxySettings};
pub use phase::{DefaultPhaseFactory, PhaseFactory, RunnerCleaner};
pub use phase_config::{PhaseConfigProvider, PhaseOption};
