//! Phase container configuration
//!
//! A [`PhaseConfigProvider`] starts from the defaults every phase shares
//! and applies a list of [`PhaseOption`]s in order. Flags and arguments are
//! collected separately so the final command is always
//! `[binary, flags.., args..]` regardless of option order.

use crate::auth::REGISTRY_AUTH_ENV;
use crate::build::api::ApiVersion;
use crate::build::container_ops::ContainerOperation;
use crate::build::mount_paths::{ContainerOs, MountPaths};
use crate::build::options::ProxySettings;
use crate::docker::{ContainerConfig, HostConfig, Isolation};
use crate::logging::{self, LineWriter, Logger};
use std::collections::BTreeMap;
use std::env;
use std::fmt;

/// Directory holding the lifecycle binaries inside phase images
pub const LIFECYCLE_BIN_DIR: &str = "/cnb/lifecycle";

const POSIX_DAEMON_SOCKET: &str = "/var/run/docker.sock";
const WINDOWS_DAEMON_PIPE: &str = r"\\.\pipe\docker_engine";

/// Options understood by [`PhaseConfigProvider::new`]
#[derive(Clone)]
pub enum PhaseOption {
    /// Positional arguments, after all flags
    Args(Vec<String>),
    /// Flag tokens, directly after the binary
    Flags(Vec<String>),
    Binds(Vec<String>),
    /// `KEY=value` pairs
    Env(Vec<String>),
    /// Replace the builder image
    Image(String),
    Network(String),
    /// Mount the daemon socket, optionally overriding its location
    DaemonAccess(Option<String>),
    /// Value for `CNB_REGISTRY_AUTH`
    RegistryAccess(String),
    Root,
    LogPrefix(String),
    ContainerOperations(Vec<ContainerOperation>),
    /// Operations applied after the container exits with status 0
    PostRunOperations(Vec<ContainerOperation>),
}

impl PhaseOption {
    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Args(args.into_iter().map(Into::into).collect())
    }

    pub fn flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Flags(flags.into_iter().map(Into::into).collect())
    }

    pub fn binds<I, S>(binds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Binds(binds.into_iter().map(Into::into).collect())
    }

    pub fn env<I, S>(env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Env(env.into_iter().map(Into::into).collect())
    }
}

/// Per-run settings shared by every phase
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub builder_image: String,
    pub os: ContainerOs,
    pub platform_api: ApiVersion,
    pub layers_volume: String,
    pub app_volume: String,
    pub mount_paths: MountPaths,
    pub proxy: ProxySettings,
    pub logger: Logger,
}

/// Complete create request for one phase container
#[derive(Clone)]
pub struct PhaseConfigProvider {
    name: String,
    config: ContainerConfig,
    host: HostConfig,
    ops: Vec<ContainerOperation>,
    post_ops: Vec<ContainerOperation>,
    info_writer: LineWriter,
    error_writer: LineWriter,
}

impl PhaseConfigProvider {
    pub fn new(name: &str, ctx: &PhaseContext, options: Vec<PhaseOption>) -> Self {
        let paths = &ctx.mount_paths;

        let mut env = vec![format!("CNB_PLATFORM_API={}", ctx.platform_api)];
        env.extend(ctx.proxy.env());
        env.push(format!("HOME={}", paths.layers_dir()));

        let mut host = HostConfig {
            binds: vec![
                format!("{}:{}", ctx.layers_volume, paths.layers_dir()),
                format!("{}:{}", ctx.app_volume, paths.app_dir()),
            ],
            userns_mode: "host".to_string(),
            ..Default::default()
        };
        if ctx.os.is_windows() {
            host.isolation = Isolation::Process;
        } else {
            host.security_opt = vec!["no-new-privileges=true".to_string()];
        }

        let mut provider = Self {
            name: name.to_string(),
            config: ContainerConfig {
                image: ctx.builder_image.clone(),
                env,
                labels: BTreeMap::from([("author".to_string(), "pack".to_string())]),
                ..Default::default()
            },
            host,
            ops: Vec::new(),
            post_ops: Vec::new(),
            info_writer: ctx.logger.info_writer(),
            error_writer: ctx.logger.error_writer(),
        };

        let mut flags = Vec::new();
        let mut args = Vec::new();
        for option in options {
            match option {
                PhaseOption::Args(more) => args.extend(more),
                PhaseOption::Flags(more) => flags.extend(more),
                other => provider.apply(other, ctx.os),
            }
        }

        let mut cmd = Vec::with_capacity(1 + flags.len() + args.len());
        cmd.push(format!("{}/{}", LIFECYCLE_BIN_DIR, name));
        cmd.extend(flags);
        cmd.extend(args);
        provider.config.cmd = cmd;

        provider
    }

    fn apply(&mut self, option: PhaseOption, os: ContainerOs) {
        match option {
            PhaseOption::Args(_) | PhaseOption::Flags(_) => {}
            PhaseOption::Binds(binds) => self.host.binds.extend(binds),
            PhaseOption::Env(env) => self.config.env.extend(env),
            PhaseOption::Image(image) => self.config.image = image,
            PhaseOption::Network(mode) => self.host.network_mode = mode,
            PhaseOption::DaemonAccess(host) => self.daemon_access(host, os),
            PhaseOption::RegistryAccess(auth) => {
                self.config
                    .env
                    .push(format!("{}={}", REGISTRY_AUTH_ENV, auth));
            }
            PhaseOption::Root => self.config.user = root_user(os).to_string(),
            PhaseOption::LogPrefix(prefix) => {
                self.info_writer = logging::with_prefix(self.info_writer.clone(), &prefix);
                self.error_writer = logging::with_prefix(self.error_writer.clone(), &prefix);
            }
            PhaseOption::ContainerOperations(ops) => self.ops.extend(ops),
            PhaseOption::PostRunOperations(ops) => self.post_ops.extend(ops),
        }
    }

    fn daemon_access(&mut self, host: Option<String>, os: ContainerOs) {
        self.config.user = root_user(os).to_string();

        let host = match host.as_deref() {
            Some("inherit") => env::var("DOCKER_HOST").unwrap_or_default(),
            Some(host) => host.to_string(),
            None => String::new(),
        };

        let bind = if host.is_empty() {
            if os.is_windows() {
                Some(format!("{}:{}", WINDOWS_DAEMON_PIPE, WINDOWS_DAEMON_PIPE))
            } else {
                Some(format!("{}:{}", POSIX_DAEMON_SOCKET, POSIX_DAEMON_SOCKET))
            }
        } else if let Some(socket) = host.strip_prefix("unix://") {
            Some(format!("{}:{}", socket, POSIX_DAEMON_SOCKET))
        } else if let Some(pipe) = host
            .strip_prefix("npipe://")
            .or_else(|| host.strip_prefix(r"npipe:\\"))
        {
            Some(format!("{}:{}", pipe, WINDOWS_DAEMON_PIPE))
        } else {
            self.config.env.push(format!("DOCKER_HOST={}", host));
            None
        };

        if let Some(bind) = bind {
            self.host.binds.push(bind);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host
    }

    pub fn container_ops(&self) -> &[ContainerOperation] {
        &self.ops
    }

    pub fn post_run_ops(&self) -> &[ContainerOperation] {
        &self.post_ops
    }

    pub fn info_writer(&self) -> LineWriter {
        self.info_writer.clone()
    }

    pub fn error_writer(&self) -> LineWriter {
        self.error_writer.clone()
    }

    /// Command tokens after the binary
    pub fn arguments(&self) -> &[String] {
        self.config.cmd.get(1..).unwrap_or_default()
    }
}

impl fmt::Debug for PhaseConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseConfigProvider")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("host", &self.host)
            .field("ops", &self.ops)
            .field("post_ops", &self.post_ops)
            .finish_non_exhaustive()
    }
}

fn root_user(os: ContainerOs) -> &'static str {
    if os.is_windows() {
        "ContainerAdministrator"
    } else {
        "root"
    }
}
