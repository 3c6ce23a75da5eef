//! Container runtime abstraction
//!
//! The lifecycle core only talks to the runtime through this trait, which
//! mirrors the subset of the Docker Engine API phases need.

use crate::docker::types::{
    AttachedStreams, ContainerConfig, ContainerInfo, HostConfig, ImageInfo, TarStream,
};
use crate::error::PackResult;
use async_trait::async_trait;

/// Abstract Docker API client
///
/// Implemented by [`DockerCli`](super::DockerCli) for real daemons and by an
/// in-memory fake in tests.
#[async_trait]
pub trait DockerClient: Send + Sync {
    /// Create a container and return its ID
    async fn container_create(
        &self,
        config: &ContainerConfig,
        host: &HostConfig,
        name: Option<&str>,
    ) -> PackResult<String>;

    /// Start a created container
    async fn container_start(&self, id: &str) -> PackResult<()>;

    /// Attach to the stdout/stderr streams of a started container
    async fn container_attach(&self, id: &str) -> PackResult<AttachedStreams>;

    /// Block until the container exits and return its exit code
    async fn container_wait(&self, id: &str) -> PackResult<i64>;

    /// Remove a container. Succeeds when the container does not exist
    async fn container_remove(&self, id: &str, force: bool) -> PackResult<()>;

    /// Inspect a container
    async fn container_inspect(&self, id: &str) -> PackResult<ContainerInfo>;

    /// Extract a tar archive into the container filesystem at `path`
    async fn copy_to_container(&self, id: &str, path: &str, tar: TarStream) -> PackResult<()>;

    /// Read `path` out of the container as a tar archive
    async fn copy_from_container(&self, id: &str, path: &str) -> PackResult<TarStream>;

    /// Remove a volume. Succeeds when the volume does not exist
    async fn volume_remove(&self, name: &str, force: bool) -> PackResult<()>;

    /// Inspect a local image; `None` when it is not present
    async fn image_inspect(&self, reference: &str) -> PackResult<Option<ImageInfo>>;

    /// Remove a local image. Succeeds when the image does not exist
    async fn image_remove(&self, reference: &str, force: bool) -> PackResult<()>;
}
