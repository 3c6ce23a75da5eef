//! Docker client backed by the `docker` CLI
//!
//! Implements the DockerClient trait by executing the docker binary. Tar
//! archives travel over stdin/stdout of `docker cp -`.

use crate::docker::client::DockerClient;
use crate::docker::types::{
    AttachedStreams, ContainerConfig, ContainerInfo, HostConfig, ImageInfo, Isolation, TarStream,
};
use crate::error::{PackError, PackResult};
use async_trait::async_trait;
use std::io::Cursor;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

/// Docker client using the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: Option<String>,
}

impl DockerCli {
    /// Client using `docker` from PATH and the ambient `DOCKER_HOST`
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            host: None,
        }
    }

    /// Use a different docker-compatible binary
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Talk to a specific daemon. `inherit` keeps the ambient `DOCKER_HOST`
    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host.filter(|h| !h.is_empty() && h != "inherit");
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(ref host) = self.host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    /// Execute a docker command and return the output
    async fn exec(&self, args: &[String]) -> PackResult<Output> {
        debug!("Executing: {} {:?}", self.binary, args);

        self.command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::command_failed(self.describe(args), e))
    }

    /// Execute a docker command, failing on a non-zero exit
    async fn exec_ok(&self, args: &[String]) -> PackResult<Output> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(PackError::command_exec(
                self.describe(args),
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    /// Execute a removal command, treating "no such ..." as success
    async fn exec_remove(&self, args: &[String]) -> PackResult<()> {
        let output = self.exec(args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            debug!("Nothing to remove: {}", stderr.trim());
            return Ok(());
        }
        Err(PackError::command_exec(self.describe(args), stderr.trim()))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container")
        || stderr.contains("no such volume")
        || stderr.contains("no such image")
        || stderr.contains("not found")
}

/// Arguments for `docker create`
pub(crate) fn create_args(
    config: &ContainerConfig,
    host: &HostConfig,
    name: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["create".to_string()];

    if let Some(name) = name {
        args.push("--name".to_string());
        args.push(name.to_string());
    }

    for (key, value) in &config.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    if !config.user.is_empty() {
        args.push("--user".to_string());
        args.push(config.user.clone());
    }

    if !host.network_mode.is_empty() {
        args.push("--network".to_string());
        args.push(host.network_mode.clone());
    }

    if host.isolation != Isolation::Default {
        args.push("--isolation".to_string());
        args.push(host.isolation.to_string());
    }

    for opt in &host.security_opt {
        args.push("--security-opt".to_string());
        args.push(opt.clone());
    }

    if !host.userns_mode.is_empty() {
        args.push("--userns".to_string());
        args.push(host.userns_mode.clone());
    }

    for bind in &host.binds {
        args.push("-v".to_string());
        args.push(bind.clone());
    }

    for env in &config.env {
        args.push("-e".to_string());
        args.push(env.clone());
    }

    let mut cmd = config.cmd.clone();
    if let Some(ref entrypoint) = config.entrypoint {
        args.push("--entrypoint".to_string());
        match entrypoint.split_first() {
            Some((first, rest)) => {
                args.push(first.clone());
                cmd.splice(0..0, rest.iter().cloned());
            }
            None => args.push(String::new()),
        }
    }

    args.push(config.image.clone());
    args.extend(cmd);
    args
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

#[async_trait]
impl DockerClient for DockerCli {
    async fn container_create(
        &self,
        config: &ContainerConfig,
        host: &HostConfig,
        name: Option<&str>,
    ) -> PackResult<String> {
        let args = create_args(config, host, name);
        let output = self.exec_ok(&args).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Container created: {}", &id[..12.min(id.len())]);
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> PackResult<()> {
        self.exec_ok(&owned(&["start", id])).await.map(|_| ())
    }

    async fn container_attach(&self, id: &str) -> PackResult<AttachedStreams> {
        let args = owned(&["logs", "--follow", id]);
        debug!("Executing: {} {:?}", self.binary, args);

        let mut child = self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PackError::command_failed(self.describe(&args), e))?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => return Err(PackError::Internal("docker logs streams not piped".to_string())),
        };

        // Reap the follower once the container stops producing output
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!("docker logs follower failed: {}", e);
            }
        });

        Ok(AttachedStreams {
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
        })
    }

    async fn container_wait(&self, id: &str) -> PackResult<i64> {
        let args = owned(&["wait", id]);
        let output = self.exec_ok(&args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.trim().parse::<i64>().map_err(|_| {
            PackError::command_exec(self.describe(&args), format!("unexpected output: {}", stdout.trim()))
        })
    }

    async fn container_remove(&self, id: &str, force: bool) -> PackResult<()> {
        let mut args = owned(&["rm"]);
        if force {
            args.push("-f".to_string());
        }
        args.push(id.to_string());
        self.exec_remove(&args).await
    }

    async fn container_inspect(&self, id: &str) -> PackResult<ContainerInfo> {
        let output = self.exec_ok(&owned(&["container", "inspect", id])).await?;
        let mut infos: Vec<ContainerInfo> = serde_json::from_slice(&output.stdout)?;
        infos
            .pop()
            .ok_or_else(|| PackError::Internal(format!("empty inspect result for {}", id)))
    }

    async fn copy_to_container(&self, id: &str, path: &str, mut tar: TarStream) -> PackResult<()> {
        let args = owned(&["cp", "-", &format!("{}:{}", id, path)]);
        debug!("Executing: {} {:?}", self.binary, args);

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PackError::command_failed(self.describe(&args), e))?;

        // A write error usually means docker exited early; its stderr says why
        let streamed = match child.stdin.take() {
            Some(mut stdin) => tokio::io::copy(&mut tar, &mut stdin).await.map(|_| ()),
            None => Ok(()),
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PackError::command_failed(self.describe(&args), e))?;

        if !output.status.success() {
            return Err(PackError::command_exec(
                self.describe(&args),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        streamed.map_err(|e| PackError::io(format!("streaming archive to {}", path), e))
    }

    async fn copy_from_container(&self, id: &str, path: &str) -> PackResult<TarStream> {
        let output = self
            .exec_ok(&owned(&["cp", &format!("{}:{}", id, path), "-"]))
            .await?;
        Ok(Box::pin(Cursor::new(output.stdout)))
    }

    async fn volume_remove(&self, name: &str, force: bool) -> PackResult<()> {
        let mut args = owned(&["volume", "rm"]);
        if force {
            args.push("-f".to_string());
        }
        args.push(name.to_string());
        self.exec_remove(&args).await
    }

    async fn image_inspect(&self, reference: &str) -> PackResult<Option<ImageInfo>> {
        let args = owned(&["image", "inspect", reference]);
        let output = self.exec(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(PackError::command_exec(self.describe(&args), stderr.trim()));
        }

        let mut infos: Vec<ImageInfo> = serde_json::from_slice(&output.stdout)?;
        Ok(infos.pop())
    }

    async fn image_remove(&self, reference: &str, force: bool) -> PackResult<()> {
        let mut args = owned(&["image", "rm"]);
        if force {
            args.push("-f".to_string());
        }
        args.push(reference.to_string());
        self.exec_remove(&args).await
    }
}
