//! Phase runner
//!
//! A phase is created from a [`PhaseConfigProvider`], run to completion and
//! cleaned up. The execution drives phases through the [`PhaseFactory`]
//! seam so tests can observe configurations without a runtime.

use crate::build::container_ops;
use crate::build::phase_config::PhaseConfigProvider;
use crate::docker::{forward_lines, DockerClient};
use crate::error::{PackError, PackResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on removing a container or volume during cleanup
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// A runnable phase that owns one container
#[async_trait]
pub trait RunnerCleaner: Send {
    /// Create, prepare, start and wait for the phase container
    async fn run(&mut self, cancel: &CancellationToken) -> PackResult<()>;

    /// Remove the phase container. Not affected by cancellation
    async fn cleanup(&mut self) -> PackResult<()>;
}

/// Turns phase configurations into runnable phases
pub trait PhaseFactory: Send + Sync {
    fn new_phase(&self, provider: PhaseConfigProvider) -> Box<dyn RunnerCleaner>;
}

/// Factory producing phases backed by a real runtime
pub struct DefaultPhaseFactory {
    docker: Arc<dyn DockerClient>,
}

impl DefaultPhaseFactory {
    pub fn new(docker: Arc<dyn DockerClient>) -> Self {
        Self { docker }
    }
}

impl PhaseFactory for DefaultPhaseFactory {
    fn new_phase(&self, provider: PhaseConfigProvider) -> Box<dyn RunnerCleaner> {
        Box::new(Phase::new(provider, Arc::clone(&self.docker)))
    }
}

/// Removes a container or volume on drop unless disarmed
pub(crate) struct CleanupGuard {
    docker: Arc<dyn DockerClient>,
    containers: Vec<String>,
    volumes: Vec<String>,
    armed: bool,
}

impl CleanupGuard {
    pub(crate) fn containers(docker: Arc<dyn DockerClient>, ids: Vec<String>) -> Self {
        Self {
            docker,
            containers: ids,
            volumes: Vec::new(),
            armed: true,
        }
    }

    pub(crate) fn volumes(docker: Arc<dyn DockerClient>, names: Vec<String>) -> Self {
        Self {
            docker,
            containers: Vec::new(),
            volumes: names,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime to clean up containers {:?} and volumes {:?}",
                self.containers, self.volumes
            );
            return;
        };

        let docker = Arc::clone(&self.docker);
        let containers = std::mem::take(&mut self.containers);
        let volumes = std::mem::take(&mut self.volumes);
        handle.spawn(async move {
            for id in containers {
                let removal = tokio::time::timeout(CLEANUP_TIMEOUT, docker.container_remove(&id, true));
                if !matches!(removal.await, Ok(Ok(()))) {
                    warn!("Failed to remove abandoned container {}", id);
                }
            }
            for name in volumes {
                let removal = tokio::time::timeout(CLEANUP_TIMEOUT, docker.volume_remove(&name, true));
                if !matches!(removal.await, Ok(Ok(()))) {
                    warn!("Failed to remove abandoned volume {}", name);
                }
            }
        });
    }
}

/// Phase backed by a runtime container
pub struct Phase {
    provider: PhaseConfigProvider,
    docker: Arc<dyn DockerClient>,
    container_id: Option<String>,
    guard: Option<CleanupGuard>,
}

impl Phase {
    pub fn new(provider: PhaseConfigProvider, docker: Arc<dyn DockerClient>) -> Self {
        Self {
            provider,
            docker,
            container_id: None,
            guard: None,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }
}

#[async_trait]
impl RunnerCleaner for Phase {
    async fn run(&mut self, cancel: &CancellationToken) -> PackResult<()> {
        let name = self.provider.name().to_string();
        let docker = Arc::clone(&self.docker);

        let id = docker
            .container_create(
                self.provider.container_config(),
                self.provider.host_config(),
                None,
            )
            .await
            .map_err(|e| PackError::container_create(&name, e))?;
        debug!("Created {} container {}", name, id);
        self.container_id = Some(id.clone());
        self.guard = Some(CleanupGuard::containers(Arc::clone(&docker), vec![id.clone()]));

        container_ops::apply_all(self.provider.container_ops(), docker.as_ref(), &id).await?;

        docker
            .container_start(&id)
            .await
            .map_err(|e| PackError::container_start(&name, e))?;
        let streams = docker
            .container_attach(&id)
            .await
            .map_err(|e| PackError::container_attach(&name, e))?;

        let stdout = tokio::spawn(forward_lines(streams.stdout, self.provider.info_writer()));
        let stderr = tokio::spawn(forward_lines(streams.stderr, self.provider.error_writer()));

        let outcome = tokio::select! {
            code = docker.container_wait(&id) => {
                code.map_err(|e| PackError::container_wait(&name, e))
            }
            _ = cancel.cancelled() => {
                Err(PackError::Cancelled { phase: name.clone() })
            }
        };

        if outcome.is_err() {
            stdout.abort();
            stderr.abort();
        }
        let _ = stdout.await;
        let _ = stderr.await;

        match outcome? {
            0 => container_ops::apply_all(self.provider.post_run_ops(), docker.as_ref(), &id).await,
            code => Err(PackError::PhaseFailed { phase: name, code }),
        }
    }

    async fn cleanup(&mut self) -> PackResult<()> {
        let Some(id) = self.container_id.take() else {
            return Ok(());
        };
        if let Some(mut guard) = self.guard.take() {
            guard.disarm();
        }

        let name = self.provider.name();
        match tokio::time::timeout(CLEANUP_TIMEOUT, self.docker.container_remove(&id, true)).await {
            Ok(removed) => removed.map_err(|e| PackError::container_remove(name, e)),
            Err(_) => Err(PackError::Cleanup(format!(
                "timed out removing {} container {}",
                name, id
            ))),
        }
    }
}
