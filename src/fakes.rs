//! In-memory test doubles for the runtime, builder and phase factory

use crate::build::api::ApiVersion;
use crate::build::builder::{Builder, LifecycleDescriptor, RunImageMetadata, StackMetadata};
use crate::build::phase::{PhaseFactory, RunnerCleaner};
use crate::build::phase_config::PhaseConfigProvider;
use crate::build::ApiSet;
use crate::docker::{
    AttachedStreams, ContainerConfig, ContainerInfo, ContainerState, DockerClient, HostConfig,
    ImageInfo, MountPoint, TarStream,
};
use crate::error::{PackError, PackResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Container recorded by [`FakeDocker::container_create`]
#[derive(Debug, Clone)]
pub struct CreatedContainer {
    pub id: String,
    pub config: ContainerConfig,
    pub host: HostConfig,
}

impl CreatedContainer {
    /// Lifecycle binary name, e.g. `detector`
    pub fn binary(&self) -> &str {
        binary_name(&self.config)
    }
}

/// Archive recorded by [`FakeDocker::copy_to_container`]
#[derive(Debug, Clone)]
pub struct CopiedArchive {
    pub container: String,
    /// Binary of the receiving container
    pub binary: String,
    pub path: String,
    pub bytes: Vec<u8>,
}

struct FakeContainer {
    config: ContainerConfig,
    host: HostConfig,
    status: String,
    exit_code: i64,
    /// Archives copied in, with the path they were extracted at
    archives: Vec<(String, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    containers: BTreeMap<String, FakeContainer>,
    created: Vec<CreatedContainer>,
    removed: Vec<String>,
    calls: Vec<String>,
    copies: Vec<CopiedArchive>,
    volumes: BTreeSet<String>,
    images: HashMap<String, ImageInfo>,
    exit_codes: HashMap<String, i64>,
    output: HashMap<String, Vec<String>>,
    blocking: HashSet<String>,
    failing_create: HashSet<String>,
    cancel_on_start: Option<(String, CancellationToken)>,
    failing_volume_remove: bool,
}

/// Runtime double that records calls and keeps copied files in memory
#[derive(Default)]
pub struct FakeDocker {
    state: Mutex<State>,
}

impl FakeDocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make `reference` inspectable with the given OS
    pub fn with_image(self, reference: &str, os: &str) -> Self {
        let info = ImageInfo {
            id: format!("sha256:{}", reference.len()),
            os: os.to_string(),
            ..Default::default()
        };
        self.state().images.insert(reference.to_string(), info);
        self
    }

    pub fn with_image_info(self, reference: &str, info: ImageInfo) -> Self {
        self.state().images.insert(reference.to_string(), info);
        self
    }

    /// Containers running `binary` exit with `code`
    pub fn with_exit_code(self, binary: &str, code: i64) -> Self {
        self.state().exit_codes.insert(binary.to_string(), code);
        self
    }

    /// Containers running `binary` print `lines` to stdout
    pub fn with_output(self, binary: &str, lines: &[&str]) -> Self {
        self.state().output.insert(
            binary.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Waiting on containers running `binary` never returns
    pub fn with_blocking_wait(self, binary: &str) -> Self {
        self.state().blocking.insert(binary.to_string());
        self
    }

    pub fn with_failing_create(self, binary: &str) -> Self {
        self.state().failing_create.insert(binary.to_string());
        self
    }

    /// Cancel `token` once a container running `binary` starts
    pub fn with_cancel_on_start(self, binary: &str, token: CancellationToken) -> Self {
        self.state().cancel_on_start = Some((binary.to_string(), token));
        self
    }

    pub fn with_failing_volume_remove(self) -> Self {
        self.state().failing_volume_remove = true;
        self
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.state().volumes.insert(name.to_string());
        self
    }

    pub fn created(&self) -> Vec<CreatedContainer> {
        self.state().created.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Every archive copied into any container, in order
    pub fn copies(&self) -> Vec<CopiedArchive> {
        self.state().copies.clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    /// Containers created and not yet removed
    pub fn live_containers(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn volumes(&self) -> BTreeSet<String> {
        self.state().volumes.clone()
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state().images.contains_key(reference)
    }

    fn no_such_container(id: &str) -> PackError {
        PackError::command_exec("docker", format!("Error: No such container: {}", id))
    }
}

/// Mount reported by inspect for a `source:destination[:mode]` bind
fn mount_point(bind: &str) -> MountPoint {
    let (source, destination) = bind.split_once(':').unwrap_or((bind, ""));
    let destination = destination
        .strip_suffix(":ro")
        .or_else(|| destination.strip_suffix(":rw"))
        .unwrap_or(destination);
    let is_volume = !source.starts_with('/') && !source.starts_with('\\');
    MountPoint {
        name: if is_volume { source.to_string() } else { String::new() },
        source: source.to_string(),
        destination: destination.to_string(),
    }
}

fn binary_name(config: &ContainerConfig) -> &str {
    config
        .cmd
        .first()
        .map(|cmd| cmd.rsplit('/').next().unwrap_or(cmd))
        .unwrap_or_default()
}

/// Entry-name prefix for a container path, without drive or slashes
fn entry_prefix(path: &str) -> String {
    let without_drive = match path.split_once(':') {
        Some((drive, rest)) if drive.len() == 1 => rest,
        _ => path,
    };
    without_drive.replace('\\', "/").trim_matches('/').to_string()
}

fn join_entry(root: &str, name: &str) -> String {
    let root = entry_prefix(root);
    if root.is_empty() {
        name.trim_start_matches('/').to_string()
    } else {
        format!("{}/{}", root, name.trim_start_matches('/'))
    }
}

#[async_trait]
impl DockerClient for FakeDocker {
    async fn container_create(
        &self,
        config: &ContainerConfig,
        host: &HostConfig,
        _name: Option<&str>,
    ) -> PackResult<String> {
        let mut state = self.state();
        let binary = binary_name(config).to_string();
        state.calls.push(format!("create:{}", binary));

        if state.failing_create.contains(&binary) {
            return Err(PackError::command_exec("docker create", "no space left on device"));
        }

        state.next_id += 1;
        let id = format!("container-{}", state.next_id);

        for bind in &host.binds {
            let source = bind.split(':').next().unwrap_or_default();
            if !source.is_empty() && !source.starts_with('/') && !source.starts_with('\\') {
                state.volumes.insert(source.to_string());
            }
        }

        state.containers.insert(
            id.clone(),
            FakeContainer {
                config: config.clone(),
                host: host.clone(),
                status: "created".to_string(),
                exit_code: 0,
                archives: Vec::new(),
            },
        );
        state.created.push(CreatedContainer {
            id: id.clone(),
            config: config.clone(),
            host: host.clone(),
        });
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> PackResult<()> {
        let mut state = self.state();
        state.calls.push(format!("start:{}", id));

        let binary = {
            let container = state
                .containers
                .get_mut(id)
                .ok_or_else(|| Self::no_such_container(id))?;
            container.status = "running".to_string();
            binary_name(&container.config).to_string()
        };

        if let Some((target, token)) = &state.cancel_on_start {
            if *target == binary {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn container_attach(&self, id: &str) -> PackResult<AttachedStreams> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| Self::no_such_container(id))?;
        let binary = binary_name(&container.config);

        let stdout = state
            .output
            .get(binary)
            .map(|lines| lines.iter().map(|l| format!("{}\n", l)).collect::<String>())
            .unwrap_or_default();

        Ok(AttachedStreams {
            stdout: Box::pin(Cursor::new(stdout.into_bytes())),
            stderr: Box::pin(Cursor::new(Vec::new())),
        })
    }

    async fn container_wait(&self, id: &str) -> PackResult<i64> {
        let blocked = {
            let mut state = self.state();
            state.calls.push(format!("wait:{}", id));

            let (binary, exists) = match state.containers.get(id) {
                Some(container) => (binary_name(&container.config).to_string(), true),
                None => (String::new(), false),
            };
            if !exists {
                return Err(Self::no_such_container(id));
            }

            if state.blocking.contains(&binary) {
                true
            } else {
                let code = state.exit_codes.get(&binary).copied().unwrap_or(0);
                if let Some(container) = state.containers.get_mut(id) {
                    container.status = "exited".to_string();
                    container.exit_code = code;
                }
                return Ok(code);
            }
        };

        if blocked {
            std::future::pending::<()>().await;
        }
        Ok(0)
    }

    async fn container_remove(&self, id: &str, _force: bool) -> PackResult<()> {
        let mut state = self.state();
        state.calls.push(format!("remove:{}", id));
        if state.containers.remove(id).is_some() {
            state.removed.push(id.to_string());
        }
        Ok(())
    }

    async fn container_inspect(&self, id: &str) -> PackResult<ContainerInfo> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| Self::no_such_container(id))?;
        Ok(ContainerInfo {
            id: id.to_string(),
            image: container.config.image.clone(),
            state: ContainerState {
                status: container.status.clone(),
                running: container.status == "running",
                exit_code: container.exit_code,
            },
            mounts: container.host.binds.iter().map(String::as_str).map(mount_point).collect(),
        })
    }

    async fn copy_to_container(&self, id: &str, path: &str, mut tar: TarStream) -> PackResult<()> {
        let mut bytes = Vec::new();
        tar.read_to_end(&mut bytes)
            .await
            .map_err(|e| PackError::io("reading archive", e))?;

        let mut state = self.state();
        state.calls.push(format!("copy-to:{}:{}", id, path));
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Self::no_such_container(id))?;
        container.archives.push((path.to_string(), bytes.clone()));
        let binary = binary_name(&container.config).to_string();
        state.copies.push(CopiedArchive {
            container: id.to_string(),
            binary,
            path: path.to_string(),
            bytes,
        });
        Ok(())
    }

    async fn copy_from_container(&self, id: &str, path: &str) -> PackResult<TarStream> {
        let mut state = self.state();
        state.calls.push(format!("copy-from:{}:{}", id, path));
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| Self::no_such_container(id))?;

        let prefix = entry_prefix(path);
        // Entries are named from the copied path's base name, as `docker cp` does
        let parent = prefix.rsplit_once('/').map(|(dir, _)| format!("{}/", dir));
        let mut builder = tar::Builder::new(Vec::new());
        for (root, bytes) in &container.archives {
            let mut archive = tar::Archive::new(bytes.as_slice());
            let entries = archive
                .entries()
                .map_err(|e| PackError::archive("fake copy-out", e))?;
            for entry in entries {
                let mut entry = entry.map_err(|e| PackError::archive("fake copy-out", e))?;
                let name = entry
                    .path()
                    .map_err(|e| PackError::archive("fake copy-out", e))?
                    .to_string_lossy()
                    .into_owned();
                let full = join_entry(root, &name);
                let full_trimmed = full.trim_end_matches('/');
                if full_trimmed != prefix && !full_trimmed.starts_with(&format!("{}/", prefix)) {
                    continue;
                }

                let mut header = entry.header().clone();
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| PackError::io("reading entry", e))?;
                let name = parent
                    .as_deref()
                    .and_then(|p| full_trimmed.strip_prefix(p))
                    .unwrap_or(full_trimmed);
                builder
                    .append_data(&mut header, name, data.as_slice())
                    .map_err(|e| PackError::archive("fake copy-out", e))?;
            }
        }

        let bytes = builder
            .into_inner()
            .map_err(|e| PackError::archive("fake copy-out", e))?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn volume_remove(&self, name: &str, _force: bool) -> PackResult<()> {
        let mut state = self.state();
        state.calls.push(format!("volume-rm:{}", name));
        if state.failing_volume_remove {
            return Err(PackError::command_exec(
                "docker volume rm",
                format!("volume {} is in use", name),
            ));
        }
        state.volumes.remove(name);
        Ok(())
    }

    async fn image_inspect(&self, reference: &str) -> PackResult<Option<ImageInfo>> {
        Ok(self.state().images.get(reference).cloned())
    }

    async fn image_remove(&self, reference: &str, _force: bool) -> PackResult<()> {
        let mut state = self.state();
        state.calls.push(format!("image-rm:{}", reference));
        state.images.remove(reference);
        Ok(())
    }
}

/// Builder double with a fixed build user and run image
#[derive(Debug, Clone)]
pub struct FakeBuilder {
    name: String,
    uid: u32,
    gid: u32,
    stack: StackMetadata,
    run_images: Vec<RunImageMetadata>,
    lifecycle: LifecycleDescriptor,
}

impl FakeBuilder {
    pub const NAME: &'static str = "example.com/builder:1";

    pub fn new(platform_apis: &[&str]) -> Self {
        let run_image = RunImageMetadata {
            image: "example.com/run:1".to_string(),
            mirrors: vec!["mirror.example.com/run:1".to_string()],
        };
        Self {
            name: Self::NAME.to_string(),
            uid: 1234,
            gid: 4321,
            stack: StackMetadata {
                run_image: run_image.clone(),
            },
            run_images: vec![run_image],
            lifecycle: LifecycleDescriptor {
                version: semver::Version::new(0, 20, 5),
                buildpack_apis: ApiSet::default(),
                platform_apis: ApiSet {
                    deprecated: Vec::new(),
                    supported: platform_apis
                        .iter()
                        .map(|v| v.parse::<ApiVersion>().unwrap())
                        .collect(),
                },
            },
        }
    }
}

impl Builder for FakeBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn uid(&self) -> u32 {
        self.uid
    }

    fn gid(&self) -> u32 {
        self.gid
    }

    fn stack(&self) -> &StackMetadata {
        &self.stack
    }

    fn run_images(&self) -> &[RunImageMetadata] {
        &self.run_images
    }

    fn lifecycle_descriptor(&self) -> &LifecycleDescriptor {
        &self.lifecycle
    }
}

/// Phase factory that records configurations instead of running containers
#[derive(Default, Clone)]
pub struct FakePhaseFactory {
    providers: Arc<Mutex<Vec<PhaseConfigProvider>>>,
    runs: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, i64>>>,
}

impl FakePhaseFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs of `phase` exit with `code`
    pub fn failing(self, phase: &str, code: i64) -> Self {
        self.failures.lock().unwrap().insert(phase.to_string(), code);
        self
    }

    pub fn providers(&self) -> Vec<PhaseConfigProvider> {
        self.providers.lock().unwrap().clone()
    }

    pub fn provider(&self, name: &str) -> Option<PhaseConfigProvider> {
        self.providers().into_iter().find(|p| p.name() == name)
    }

    pub fn phase_names(&self) -> Vec<String> {
        self.providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Phases in the order `run` was called
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

impl PhaseFactory for FakePhaseFactory {
    fn new_phase(&self, provider: PhaseConfigProvider) -> Box<dyn RunnerCleaner> {
        let name = provider.name().to_string();
        self.providers.lock().unwrap().push(provider);
        Box::new(FakePhase {
            name: name.clone(),
            runs: Arc::clone(&self.runs),
            exit_code: self.failures.lock().unwrap().get(&name).copied(),
        })
    }
}

struct FakePhase {
    name: String,
    runs: Arc<Mutex<Vec<String>>>,
    exit_code: Option<i64>,
}

#[async_trait]
impl RunnerCleaner for FakePhase {
    async fn run(&mut self, _cancel: &CancellationToken) -> PackResult<()> {
        self.runs.lock().unwrap().push(self.name.clone());
        match self.exit_code {
            Some(code) => Err(PackError::PhaseFailed {
                phase: self.name.clone(),
                code,
            }),
            None => Ok(()),
        }
    }

    async fn cleanup(&mut self) -> PackResult<()> {
        Ok(())
    }
}
