//! Lifecycle execution
//!
//! Negotiates the platform API, owns the per-run layers and app volumes
//! and runs either the creator or the five separate phases. Volumes are
//! removed on every exit path.

use crate::auth;
use crate::build::api::{self, ApiVersion};
use crate::build::builder::{self, Builder};
use crate::build::container_ops::ContainerOperation;
use crate::build::mount_paths::{ContainerOs, MountPaths};
use crate::build::options::LifecycleOptions;
use crate::build::phase::{CleanupGuard, PhaseFactory, CLEANUP_TIMEOUT};
use crate::build::phase_config::{PhaseConfigProvider, PhaseContext, PhaseOption};
use crate::cache::{Cache, CacheFormat, CacheInfo, VolumeCache};
use crate::docker::DockerClient;
use crate::error::{PackError, PackResult};
use crate::logging::Logger;
use crate::names;
use crate::reference::ImageReference;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_PROCESS_TYPE: &str = "web";
const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";
const METADATA_FILE_MODE: u32 = 0o644;

/// One build of one application image
pub struct LifecycleExecution {
    logger: Logger,
    docker: Arc<dyn DockerClient>,
    opts: LifecycleOptions,
    platform_api: ApiVersion,
    os: ContainerOs,
    layers_volume: String,
    app_volume: String,
    mount_paths: MountPaths,
}

impl LifecycleExecution {
    pub async fn new(
        logger: Logger,
        docker: Arc<dyn DockerClient>,
        opts: LifecycleOptions,
    ) -> PackResult<Self> {
        Self::new_with_rng(logger, docker, opts, StdRng::from_entropy()).await
    }

    /// Like [`new`](Self::new) with volume names drawn from `rng`
    pub async fn new_with_rng(
        logger: Logger,
        docker: Arc<dyn DockerClient>,
        opts: LifecycleOptions,
        mut rng: StdRng,
    ) -> PackResult<Self> {
        let mut builder_apis = opts.builder.lifecycle_descriptor().platform_apis.all();
        if !opts.lifecycle_apis.is_empty() {
            builder_apis = api::intersection(&builder_apis, &opts.lifecycle_apis);
        }
        let platform_api = api::find_latest_supported(&api::supported_platform_apis(), &builder_apis)?;

        let os = builder_os(docker.as_ref(), opts.builder.name()).await?;

        let layers_volume = names::run_volume_name(&mut rng, "layers");
        let app_volume = names::run_volume_name(&mut rng, "app");
        let mount_paths = MountPaths::new(os, &opts.workspace);

        debug!(
            "Platform API {} on {} (layers volume {}, app volume {})",
            platform_api, os, layers_volume, app_volume
        );

        Ok(Self {
            logger,
            docker,
            opts,
            platform_api,
            os,
            layers_volume,
            app_volume,
            mount_paths,
        })
    }

    pub fn platform_api(&self) -> ApiVersion {
        self.platform_api
    }

    pub fn os(&self) -> ContainerOs {
        self.os
    }

    pub fn layers_volume(&self) -> &str {
        &self.layers_volume
    }

    pub fn app_volume(&self) -> &str {
        &self.app_volume
    }

    pub fn mount_paths(&self) -> &MountPaths {
        &self.mount_paths
    }

    pub fn builder(&self) -> &dyn Builder {
        self.opts.builder.as_ref()
    }

    /// Whether the single creator phase replaces the five separate phases
    pub fn use_creator(&self) -> bool {
        self.platform_api >= self.opts.creator_min_api
            && (!self.opts.publish || self.opts.trust_builder)
    }

    /// Run every phase, then remove the per-run volumes.
    ///
    /// A run error is returned in preference to a cleanup error; when both
    /// occur the cleanup error is attached to it.
    pub async fn run(&self, factory: &dyn PhaseFactory, cancel: &CancellationToken) -> PackResult<()> {
        let mut guard = CleanupGuard::volumes(
            Arc::clone(&self.docker),
            vec![self.layers_volume.clone(), self.app_volume.clone()],
        );

        let result = self.run_phases(factory, cancel).await;
        guard.disarm();

        let cleanup = self.cleanup().await;
        PackError::merge(result, cleanup)
    }

    async fn run_phases(&self, factory: &dyn PhaseFactory, cancel: &CancellationToken) -> PackResult<()> {
        let build_cache = self.build_cache()?;
        if self.opts.clear_cache {
            build_cache.clear(self.docker.as_ref()).await?;
            self.debug_line(&format!("Build cache {} cleared", build_cache.name()));
        }

        let launch_cache = match self.opts.cache.launch.format {
            CacheFormat::Bind => Cache::new(&self.opts.cache.launch, &self.opts.image, "launch")?,
            _ => Cache::Volume(VolumeCache::new(&self.opts.image, &self.opts.cache.launch, "launch")),
        };
        build_cache.prepare().await?;
        launch_cache.prepare().await?;

        if self.use_creator() {
            self.step("CREATING");
            return self.create(factory, cancel, &build_cache, &launch_cache).await;
        }

        self.step("DETECTING");
        self.detect(factory, cancel).await?;

        self.step("ANALYZING");
        self.analyze(factory, cancel, &build_cache, &launch_cache).await?;

        if self.opts.clear_cache {
            self.info_line("Skipping 'restore' due to clearing cache");
        } else {
            self.step("RESTORING");
            self.restore(factory, cancel, &build_cache).await?;
        }

        self.step("BUILDING");
        self.build(factory, cancel).await?;

        self.step("EXPORTING");
        self.export(factory, cancel, &build_cache, &launch_cache).await
    }

    /// Remove the layers and app volumes, bounded by [`CLEANUP_TIMEOUT`]
    pub async fn cleanup(&self) -> PackResult<()> {
        let mut failures = Vec::new();
        for volume in [&self.layers_volume, &self.app_volume] {
            match tokio::time::timeout(CLEANUP_TIMEOUT, self.docker.volume_remove(volume, true)).await {
                Ok(Ok(())) => debug!("Removed volume {}", volume),
                Ok(Err(e)) => failures.push(format!("failed to clean up volume {}: {}", volume, e)),
                Err(_) => failures.push(format!("timed out removing volume {}", volume)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let message = failures.join("; ");
            warn!("{}", message);
            Err(PackError::Cleanup(message))
        }
    }

    pub async fn create(
        &self,
        factory: &dyn PhaseFactory,
        cancel: &CancellationToken,
        build_cache: &Cache,
        launch_cache: &Cache,
    ) -> PackResult<()> {
        let paths = &self.mount_paths;
        let previous_image = self.previous_image()?;

        let mut flags = self.log_level_flags();
        if !self.opts.run_image.is_empty() {
            flags.extend(strings(["-run-image", &self.opts.run_image]));
        }
        flags.extend(self.tag_flags());
        flags.extend(strings(["-cache-dir", &paths.cache_dir()]));

        let mut binds = self.opts.volumes.clone();
        match build_cache {
            Cache::Image(cache) => flags.extend(strings(["-cache-image", cache.name()])),
            Cache::Volume(_) | Cache::Bind(_) => {
                binds.push(format!("{}:{}", build_cache.name(), paths.cache_dir()))
            }
        }

        flags.extend(strings(["-app", &paths.app_dir()]));
        if self.opts.clear_cache {
            flags.push("-skip-restore".to_string());
        }
        flags.extend(self.id_flags());
        if let Some(previous) = &previous_image {
            flags.extend(strings(["-previous-image", previous]));
        }

        let mut ops = vec![ContainerOperation::copy_dir(
            &self.opts.app_path,
            paths.app_dir(),
            self.build_uid(),
            self.build_gid(),
            self.os,
            self.opts.file_filter.clone(),
        )];
        if self.platform_api.at_least("0.12") {
            flags.extend(strings(["-run", &paths.run_path()]));
            ops.push(self.write_run_toml()?);
        }

        let process_type = self.default_process_type();
        if !process_type.is_empty() {
            flags.extend(strings(["-process-type", &process_type]));
        }

        let mut options = vec![
            PhaseOption::LogPrefix("creator".to_string()),
            PhaseOption::Flags(flags),
            PhaseOption::args([self.opts.image.as_str()]),
            PhaseOption::Network(self.opts.network.clone()),
            PhaseOption::Binds(binds),
            PhaseOption::ContainerOperations(ops),
            PhaseOption::Env(self.epoch_env()),
            PhaseOption::Root,
            PhaseOption::PostRunOperations(self.report_copies()),
        ];

        if self.opts.publish {
            let auth = self
                .registry_auth(build_cache, previous_image.as_deref())
                .await?;
            options.push(PhaseOption::RegistryAccess(auth));
        } else {
            options.extend(self.daemon_export_options(launch_cache));
        }

        self.run_phase(factory, cancel, "creator", options).await
    }

    pub async fn detect(&self, factory: &dyn PhaseFactory, cancel: &CancellationToken) -> PackResult<()> {
        let paths = &self.mount_paths;

        let mut flags = self.log_level_flags();
        flags.extend(strings(["-app", &paths.app_dir()]));
        flags.extend(self.id_flags());

        let options = vec![
            PhaseOption::LogPrefix("detector".to_string()),
            PhaseOption::Flags(flags),
            PhaseOption::Network(self.opts.network.clone()),
            PhaseOption::Binds(self.opts.volumes.clone()),
            PhaseOption::ContainerOperations(vec![
                ContainerOperation::ensure_volume_access(
                    self.build_uid(),
                    self.build_gid(),
                    self.os,
                    &[&self.layers_volume, &self.app_volume],
                ),
                ContainerOperation::copy_dir(
                    &self.opts.app_path,
                    paths.app_dir(),
                    self.build_uid(),
                    self.build_gid(),
                    self.os,
                    self.opts.file_filter.clone(),
                ),
            ]),
        ];

        self.run_phase(factory, cancel, "detector", options).await
    }

    pub async fn analyze(
        &self,
        factory: &dyn PhaseFactory,
        cancel: &CancellationToken,
        build_cache: &Cache,
        launch_cache: &Cache,
    ) -> PackResult<()> {
        let paths = &self.mount_paths;
        let previous_image = self.previous_image()?;
        let mut repo = self.opts.image.as_str().to_string();

        let mut flags = self.log_level_flags();
        if !self.opts.publish {
            flags.push("-daemon".to_string());
        }

        let mut binds = Vec::new();
        if self.opts.clear_cache {
            flags.push("-skip-layers".to_string());
        } else {
            flags.extend(strings(["-cache-dir", &paths.cache_dir()]));
            match build_cache {
                Cache::Image(cache) => flags.extend(strings(["-cache-image", cache.name()])),
                Cache::Volume(_) | Cache::Bind(_) => {
                    binds.push(format!("{}:{}", build_cache.name(), paths.cache_dir()))
                }
            }
        }

        if self.platform_api.at_least("0.9") && !self.opts.publish {
            flags.extend(strings(["-launch-cache", &paths.launch_cache_dir()]));
            binds.push(format!("{}:{}", launch_cache.name(), paths.launch_cache_dir()));
        }

        flags.extend(self.id_flags());

        if let Some(previous) = &previous_image {
            if self.platform_api.less_than("0.7") {
                repo = previous.clone();
            } else {
                flags.extend(strings(["-previous-image", previous]));
            }
        }

        let mut ops = Vec::new();
        if self.platform_api.at_least("0.7") {
            flags.extend(self.tag_flags());
            if !self.opts.run_image.is_empty() {
                flags.extend(strings(["-run-image", &self.opts.run_image]));
            }
            if self.platform_api.less_than("0.12") {
                flags.extend(strings(["-stack", &paths.stack_path()]));
                ops.push(self.write_stack_toml()?);
            } else {
                flags.extend(strings(["-run", &paths.run_path()]));
                ops.push(self.write_run_toml()?);
            }
        }

        let mut options = vec![
            PhaseOption::LogPrefix("analyzer".to_string()),
            PhaseOption::Image(self.opts.lifecycle_image.clone()),
            PhaseOption::Env(self.user_env()),
            PhaseOption::Root,
            PhaseOption::Flags(flags),
            PhaseOption::Args(vec![repo]),
            PhaseOption::Network(self.opts.network.clone()),
            PhaseOption::Binds(binds),
            PhaseOption::ContainerOperations(ops),
            PhaseOption::PostRunOperations(self.report_copies()),
        ];

        if self.opts.publish {
            let auth = self
                .registry_auth(build_cache, previous_image.as_deref())
                .await?;
            options.push(PhaseOption::RegistryAccess(auth));
        } else {
            options.push(PhaseOption::DaemonAccess(self.opts.docker_host.clone()));
        }

        self.run_phase(factory, cancel, "analyzer", options).await
    }

    pub async fn restore(
        &self,
        factory: &dyn PhaseFactory,
        cancel: &CancellationToken,
        build_cache: &Cache,
    ) -> PackResult<()> {
        let paths = &self.mount_paths;

        let mut flags = self.log_level_flags();
        flags.extend(strings(["-cache-dir", &paths.cache_dir()]));

        let mut binds = Vec::new();
        match build_cache {
            Cache::Image(cache) => flags.extend(strings(["-cache-image", cache.name()])),
            Cache::Volume(_) | Cache::Bind(_) => {
                binds.push(format!("{}:{}", build_cache.name(), paths.cache_dir()))
            }
        }

        flags.extend(self.id_flags());
        if !self.opts.publish && self.platform_api.at_least("0.12") {
            flags.push("-daemon".to_string());
        }

        let mut options = vec![
            PhaseOption::LogPrefix("restorer".to_string()),
            PhaseOption::Image(self.opts.lifecycle_image.clone()),
            PhaseOption::Env(self.user_env()),
            PhaseOption::Root,
            PhaseOption::Flags(flags),
            PhaseOption::Network(self.opts.network.clone()),
            PhaseOption::Binds(binds),
        ];

        if self.opts.publish {
            let auth = self.registry_auth(build_cache, None).await?;
            options.push(PhaseOption::RegistryAccess(auth));
        } else {
            options.push(PhaseOption::DaemonAccess(self.opts.docker_host.clone()));
        }

        self.run_phase(factory, cancel, "restorer", options).await
    }

    pub async fn build(&self, factory: &dyn PhaseFactory, cancel: &CancellationToken) -> PackResult<()> {
        let mut flags = self.log_level_flags();
        flags.extend(strings(["-app", &self.mount_paths.app_dir()]));
        flags.extend(self.id_flags());

        let options = vec![
            PhaseOption::LogPrefix("builder".to_string()),
            PhaseOption::Flags(flags),
            PhaseOption::Network(self.opts.network.clone()),
            PhaseOption::Binds(self.opts.volumes.clone()),
        ];

        self.run_phase(factory, cancel, "builder", options).await
    }

    pub async fn export(
        &self,
        factory: &dyn PhaseFactory,
        cancel: &CancellationToken,
        build_cache: &Cache,
        launch_cache: &Cache,
    ) -> PackResult<()> {
        let paths = &self.mount_paths;
        let previous_image = self.previous_image()?;

        let mut flags = self.log_level_flags();
        flags.extend(strings([
            "-app",
            &paths.app_dir(),
            "-cache-dir",
            &paths.cache_dir(),
            "-stack",
            &paths.stack_path(),
        ]));
        if !self.opts.run_image.is_empty() {
            flags.extend(strings(["-run-image", &self.opts.run_image]));
        }

        let mut ops = vec![self.write_stack_toml()?];
        if self.platform_api.at_least("0.12") {
            flags.extend(strings(["-run", &paths.run_path()]));
            ops.push(self.write_run_toml()?);
        }

        let process_type = self.default_process_type();
        if !process_type.is_empty() {
            flags.extend(strings(["-process-type", &process_type]));
        }

        let mut binds = Vec::new();
        match build_cache {
            Cache::Image(cache) => flags.extend(strings(["-cache-image", cache.name()])),
            Cache::Volume(_) | Cache::Bind(_) => {
                binds.push(format!("{}:{}", build_cache.name(), paths.cache_dir()))
            }
        }

        flags.extend(self.id_flags());

        let mut env = self.user_env();
        env.extend(self.epoch_env());

        let mut args = vec![self.opts.image.as_str().to_string()];
        args.extend(self.opts.additional_tags.iter().cloned());

        let mut options = vec![
            PhaseOption::LogPrefix("exporter".to_string()),
            PhaseOption::Image(self.opts.lifecycle_image.clone()),
            PhaseOption::Env(env),
            PhaseOption::Root,
            PhaseOption::Flags(flags),
            PhaseOption::Args(args),
            PhaseOption::Network(self.opts.network.clone()),
            PhaseOption::Binds(binds),
            PhaseOption::ContainerOperations(ops),
        ];

        if self.opts.publish {
            let auth = self
                .registry_auth(build_cache, previous_image.as_deref())
                .await?;
            options.push(PhaseOption::RegistryAccess(auth));
        } else {
            options.extend(self.daemon_export_options(launch_cache));
        }

        self.run_phase(factory, cancel, "exporter", options).await
    }

    async fn run_phase(
        &self,
        factory: &dyn PhaseFactory,
        cancel: &CancellationToken,
        name: &str,
        options: Vec<PhaseOption>,
    ) -> PackResult<()> {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled {
                phase: name.to_string(),
            });
        }

        let provider = PhaseConfigProvider::new(name, &self.phase_context(), options);
        let mut phase = factory.new_phase(provider);
        let result = phase.run(cancel).await;
        let cleanup = phase.cleanup().await;
        PackError::merge(result, cleanup)
    }

    fn phase_context(&self) -> PhaseContext {
        PhaseContext {
            builder_image: self.opts.builder.name().to_string(),
            os: self.os,
            platform_api: self.platform_api,
            layers_volume: self.layers_volume.clone(),
            app_volume: self.app_volume.clone(),
            mount_paths: self.mount_paths.clone(),
            proxy: self.opts.proxy.clone(),
            logger: self.logger.clone(),
        }
    }

    fn build_cache(&self) -> PackResult<Cache> {
        let info = match self.opts.cache_image.as_deref() {
            Some(name) if !name.is_empty() => CacheInfo {
                format: CacheFormat::Image,
                source: name.to_string(),
            },
            _ => self.opts.cache.build.clone(),
        };
        Cache::new(&info, &self.opts.image, "build")
    }

    /// Copy the SBOM layer and export report out of a finished export
    fn report_copies(&self) -> Vec<ContainerOperation> {
        let paths = &self.mount_paths;
        let copies: Vec<ContainerOperation> = [
            (paths.sbom_dir(), &self.opts.sbom_destination_dir),
            (paths.report_path(), &self.opts.report_destination_dir),
        ]
        .into_iter()
        .filter_map(|(src, dst)| dst.as_ref().map(|dst| ContainerOperation::copy_out_to(src, dst)))
        .collect();

        if copies.is_empty() {
            return copies;
        }
        let mut ops = vec![ContainerOperation::ensure_volume_access(
            self.build_uid(),
            self.build_gid(),
            self.os,
            &[&self.layers_volume, &self.app_volume],
        )];
        ops.extend(copies);
        ops
    }

    /// Flags shared by daemon-backed export and create
    fn daemon_export_options(&self, launch_cache: &Cache) -> Vec<PhaseOption> {
        let dir = self.mount_paths.launch_cache_dir();
        vec![
            PhaseOption::DaemonAccess(self.opts.docker_host.clone()),
            PhaseOption::Flags(strings(["-daemon", "-launch-cache", &dir])),
            PhaseOption::Binds(vec![format!("{}:{}", launch_cache.name(), dir)]),
        ]
    }

    /// `CNB_REGISTRY_AUTH` covering every image a publishing phase touches
    async fn registry_auth(&self, build_cache: &Cache, previous_image: Option<&str>) -> PackResult<String> {
        let mut images = vec![self.opts.image.as_str(), self.opts.run_image.as_str()];
        if let Cache::Image(cache) = build_cache {
            images.push(cache.name());
        }
        if let Some(previous) = previous_image {
            images.push(previous);
        }
        images.extend(self.opts.additional_tags.iter().map(String::as_str));

        auth::build_env_var(self.opts.keychain.as_ref(), &images).await
    }

    /// Validated previous image; publishing requires it on the target's registry
    fn previous_image(&self) -> PackResult<Option<String>> {
        let Some(previous) = self.opts.previous_image.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };

        let reference = ImageReference::parse(previous)?;
        if self.opts.publish && reference.registry() != self.opts.image.registry() {
            return Err(PackError::invalid_reference(
                previous,
                format!(
                    "when publishing, previous image must be in the same registry as the image (image registry = {}, previous image registry = {})",
                    self.opts.image.registry(),
                    reference.registry()
                ),
            ));
        }
        Ok(Some(previous.to_string()))
    }

    fn default_process_type(&self) -> String {
        determine_default_process_type(self.platform_api, &self.opts.default_process_type)
    }

    fn write_stack_toml(&self) -> PackResult<ContainerOperation> {
        Ok(ContainerOperation::write_file(
            self.mount_paths.stack_path(),
            builder::stack_toml(self.opts.builder.stack())?,
            METADATA_FILE_MODE,
            self.os,
        ))
    }

    fn write_run_toml(&self) -> PackResult<ContainerOperation> {
        Ok(ContainerOperation::write_file(
            self.mount_paths.run_path(),
            builder::run_toml(self.opts.builder.run_images())?,
            METADATA_FILE_MODE,
            self.os,
        ))
    }

    fn build_uid(&self) -> u32 {
        u32::try_from(self.opts.uid).unwrap_or_else(|_| self.opts.builder.uid())
    }

    fn build_gid(&self) -> u32 {
        u32::try_from(self.opts.gid).unwrap_or_else(|_| self.opts.builder.gid())
    }

    fn user_env(&self) -> Vec<String> {
        vec![
            format!("{}={}", builder::ENV_UID, self.build_uid()),
            format!("{}={}", builder::ENV_GID, self.build_gid()),
        ]
    }

    fn epoch_env(&self) -> Vec<String> {
        match self.opts.creation_time {
            Some(time) if self.platform_api.at_least("0.9") => {
                vec![format!("{}={}", SOURCE_DATE_EPOCH_ENV, time.timestamp())]
            }
            _ => Vec::new(),
        }
    }

    fn log_level_flags(&self) -> Vec<String> {
        if self.logger.is_verbose() {
            strings(["-log-level", "debug"])
        } else {
            Vec::new()
        }
    }

    fn id_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.opts.gid >= 0 {
            flags.extend(["-gid".to_string(), self.opts.gid.to_string()]);
        }
        if self.opts.uid >= 0 {
            flags.extend(["-uid".to_string(), self.opts.uid.to_string()]);
        }
        flags
    }

    fn tag_flags(&self) -> Vec<String> {
        self.opts
            .additional_tags
            .iter()
            .flat_map(|tag| ["-tag".to_string(), tag.clone()])
            .collect()
    }

    fn step(&self, name: &str) {
        info!("Running {}", name.to_lowercase());
        self.info_line(&format!("===> {}", name));
    }

    fn info_line(&self, line: &str) {
        (self.logger.info_writer())(line);
    }

    fn debug_line(&self, line: &str) {
        debug!("{}", line);
        if self.logger.is_verbose() {
            self.info_line(line);
        }
    }
}

/// Process type passed to the exporter.
///
/// Platform APIs 0.4 and 0.5 had no default process, so `web` is forced
/// when the caller did not pick one.
pub fn determine_default_process_type(platform_api: ApiVersion, provided: &str) -> String {
    let forced = platform_api.at_least("0.4") && platform_api.less_than("0.6");
    if provided.is_empty() && forced {
        DEFAULT_PROCESS_TYPE.to_string()
    } else {
        provided.to_string()
    }
}

async fn builder_os(docker: &dyn DockerClient, builder: &str) -> PackResult<ContainerOs> {
    let introspection = |reason: String| PackError::BuilderIntrospection {
        builder: builder.to_string(),
        reason,
    };

    match docker.image_inspect(builder).await {
        Ok(Some(info)) => Ok(ContainerOs::from_image_os(&info.os)),
        Ok(None) => Err(introspection("image not found locally".to_string())),
        Err(e) => Err(introspection(e.to_string())),
    }
}

fn strings<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
