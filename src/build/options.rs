//! Inputs to a lifecycle execution

use crate::archive::FileFilter;
use crate::auth::Keychain;
use crate::build::api::ApiVersion;
use crate::build::builder::Builder;
use crate::cache::CacheOpts;
use crate::reference::ImageReference;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Lifecycle image used when the caller does not pick one
pub const DEFAULT_LIFECYCLE_IMAGE: &str = "docker.io/buildpacksio/lifecycle:0.20.5";

/// Lowest platform API the creator is used for
pub const DEFAULT_CREATOR_MIN_API: ApiVersion = ApiVersion::new(0, 4);

/// Proxy settings copied into every phase container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxySettings {
    /// `KEY=value` pairs, upper then lower case, for each proxy that is set
    pub fn env(&self) -> Vec<String> {
        let mut env = Vec::new();
        for (key, value) in [
            ("HTTP_PROXY", &self.http_proxy),
            ("HTTPS_PROXY", &self.https_proxy),
            ("NO_PROXY", &self.no_proxy),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                env.push(format!("{}={}", key, value));
                env.push(format!("{}={}", key.to_lowercase(), value));
            }
        }
        env
    }
}

/// Everything a lifecycle execution needs from its caller
#[derive(Clone)]
pub struct LifecycleOptions {
    /// Directory or zip file holding the application source
    pub app_path: PathBuf,
    /// Image to produce
    pub image: ImageReference,
    pub builder: Arc<dyn Builder>,
    pub run_image: String,
    pub lifecycle_image: String,
    /// Platform APIs the lifecycle image supports; empty defers to the builder
    pub lifecycle_apis: Vec<ApiVersion>,
    pub publish: bool,
    pub trust_builder: bool,
    pub clear_cache: bool,
    /// Registry image backing the build cache
    pub cache_image: Option<String>,
    pub cache: CacheOpts,
    pub previous_image: Option<String>,
    pub network: String,
    /// Caller bind specs added to detect, build and create
    pub volumes: Vec<String>,
    pub additional_tags: Vec<String>,
    pub default_process_type: String,
    pub workspace: String,
    pub file_filter: Option<FileFilter>,
    /// Group override; negative leaves the builder's group
    pub gid: i64,
    /// User override; negative leaves the builder's user
    pub uid: i64,
    pub proxy: ProxySettings,
    pub keychain: Arc<dyn Keychain>,
    /// Daemon socket override; `inherit` reads `DOCKER_HOST`
    pub docker_host: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub creator_min_api: ApiVersion,
    /// Host directory receiving the SBOM layer after export
    pub sbom_destination_dir: Option<PathBuf>,
    /// Host directory receiving `report.toml` after export
    pub report_destination_dir: Option<PathBuf>,
}

impl LifecycleOptions {
    pub fn new(
        app_path: impl Into<PathBuf>,
        image: ImageReference,
        builder: Arc<dyn Builder>,
        keychain: Arc<dyn Keychain>,
    ) -> Self {
        let run_image = builder.stack().run_image.image.clone();
        Self {
            app_path: app_path.into(),
            image,
            builder,
            run_image,
            lifecycle_image: DEFAULT_LIFECYCLE_IMAGE.to_string(),
            lifecycle_apis: Vec::new(),
            publish: false,
            trust_builder: false,
            clear_cache: false,
            cache_image: None,
            cache: CacheOpts::default(),
            previous_image: None,
            network: String::new(),
            volumes: Vec::new(),
            additional_tags: Vec::new(),
            default_process_type: String::new(),
            workspace: String::new(),
            file_filter: None,
            gid: -1,
            uid: -1,
            proxy: ProxySettings::default(),
            keychain,
            docker_host: None,
            creation_time: None,
            creator_min_api: DEFAULT_CREATOR_MIN_API,
            sbom_destination_dir: None,
            report_destination_dir: None,
        }
    }
}

impl fmt::Debug for LifecycleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOptions")
            .field("app_path", &self.app_path)
            .field("image", &self.image.as_str())
            .field("builder", &self.builder.name())
            .field("run_image", &self.run_image)
            .field("lifecycle_image", &self.lifecycle_image)
            .field("lifecycle_apis", &self.lifecycle_apis)
            .field("publish", &self.publish)
            .field("trust_builder", &self.trust_builder)
            .field("clear_cache", &self.clear_cache)
            .field("cache_image", &self.cache_image)
            .field("cache", &self.cache)
            .field("network", &self.network)
            .field("gid", &self.gid)
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}
