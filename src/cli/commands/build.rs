//! Build command - run the lifecycle for one application image

use crate::archive::FileFilter;
use crate::auth::{DockerConfigKeychain, Keychain, MultiKeychain, StaticKeychain};
use crate::build::builder::lifecycle_image_apis;
use crate::build::{DefaultPhaseFactory, ImageBuilder, LifecycleExecution, LifecycleOptions};
use crate::cache::{CacheFormat, CacheOpts};
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::docker::{DockerCli, DockerClient};
use crate::error::{PackError, PackResult};
use crate::logging::Logger;
use crate::reference::ImageReference;
use chrono::{DateTime, TimeZone, Utc};
use console::style;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config, verbose: bool) -> PackResult<()> {
    let docker_host = args.docker_host.clone().or_else(|| config.docker.host.clone());
    let docker: Arc<dyn DockerClient> = Arc::new(
        DockerCli::new()
            .with_binary(&config.docker.binary)
            .with_host(docker_host.clone()),
    );

    let opts = build_options(args, config, docker.as_ref(), docker_host).await?;
    let image = opts.image.as_str().to_string();
    debug!("Build options: {:?}", opts);

    let logger = Logger::new(verbose || config.general.verbose);
    let execution = LifecycleExecution::new(logger, Arc::clone(&docker), opts).await?;
    debug!(
        "Using platform API {} ({})",
        execution.platform_api(),
        if execution.use_creator() { "creator" } else { "separate phases" }
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping build");
            on_interrupt.cancel();
        }
    });

    let factory = DefaultPhaseFactory::new(docker);
    let result = execution.run(&factory, &cancel).await;
    interrupt.abort();
    result?;

    println!("{} Successfully built image {}", style("✓").green(), style(&image).bold());
    Ok(())
}

async fn build_options(
    args: BuildArgs,
    config: &Config,
    docker: &dyn DockerClient,
    docker_host: Option<String>,
) -> PackResult<LifecycleOptions> {
    let image = ImageReference::parse(&args.image)?;

    let app_path = match args.path {
        Some(path) => path,
        None => env::current_dir().map_err(|e| PackError::io("getting current directory", e))?,
    };
    if !app_path.exists() {
        return Err(PackError::PathNotFound(app_path));
    }

    let cache = cache_options(&args.cache, args.cache_image.as_deref(), args.publish)?;

    let builder = ImageBuilder::inspect(docker, &args.builder).await?;
    let mut opts = LifecycleOptions::new(&app_path, image, Arc::new(builder), keychain(config));

    if let Some(run_image) = args.run_image {
        opts.run_image = run_image;
    }
    if let Some(lifecycle_image) = args.lifecycle_image {
        opts.lifecycle_apis = lifecycle_image_apis(docker, &lifecycle_image).await?;
        opts.lifecycle_image = lifecycle_image;
    } else {
        opts.lifecycle_image = config.lifecycle.image.clone();
    }
    opts.publish = args.publish;
    opts.trust_builder = args.trust_builder || config.lifecycle.trust_builder;
    opts.clear_cache = args.clear_cache;
    opts.cache_image = args.cache_image;
    opts.cache = cache;
    opts.previous_image = args.previous_image;
    opts.network = args.network.unwrap_or_else(|| config.network.mode.clone());
    opts.volumes = args.volume;
    opts.additional_tags = args.tag;
    opts.default_process_type = args.default_process.unwrap_or_default();
    opts.workspace = args.workspace.unwrap_or_default();
    opts.file_filter = exclude_filter(&app_path, &args.exclude);
    opts.gid = args.gid;
    opts.uid = args.uid;
    opts.proxy = config.proxy_settings();
    opts.docker_host = docker_host;
    opts.creation_time = args.creation_time.as_deref().map(parse_creation_time).transpose()?;
    opts.creator_min_api = config.creator_min_api()?;
    opts.sbom_destination_dir = args.sbom_output_dir;
    opts.report_destination_dir = args.report_output_dir;

    Ok(opts)
}

/// Credentials from the config file first, then the docker CLI configuration
fn keychain(config: &Config) -> Arc<dyn Keychain> {
    Arc::new(MultiKeychain::new(vec![
        Box::new(StaticKeychain::from_user_pass(&config.registry.auth)),
        Box::new(DockerConfigKeychain::new()),
    ]))
}

/// Combine `--cache` values and `--cache-image` into cache settings
pub(crate) fn cache_options(
    values: &[String],
    cache_image: Option<&str>,
    publish: bool,
) -> PackResult<CacheOpts> {
    if cache_image.is_some() && !values.is_empty() {
        return Err(PackError::InvalidCacheOptions(
            "'cache' flag with 'image' format cannot be used with 'cache-image' flag".to_string(),
        ));
    }

    let mut cache = CacheOpts::default();
    for value in values {
        cache.apply(value)?;
    }
    if let Some(reference) = cache_image {
        cache = cache.with_cache_image(reference);
    }

    if !publish && cache.build.format == CacheFormat::Image {
        return Err(PackError::InvalidCacheOptions(
            "image cache format requires the 'publish' flag".to_string(),
        ));
    }
    Ok(cache)
}

/// `now` or seconds since the epoch
fn parse_creation_time(value: &str) -> PackResult<DateTime<Utc>> {
    if value == "now" {
        return Ok(Utc::now());
    }

    let seconds: i64 = value.parse().map_err(|_| {
        PackError::User(format!(
            "Invalid creation time '{}': expected 'now' or seconds since the epoch",
            value
        ))
    })?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| PackError::User(format!("Creation time {} is out of range", seconds)))
}

/// Skip app paths matching an `--exclude` entry, compared relative to the app root
fn exclude_filter(root: &Path, excludes: &[String]) -> Option<FileFilter> {
    let excluded: Vec<PathBuf> = excludes
        .iter()
        .map(|e| PathBuf::from(e.trim_start_matches("./").trim_end_matches('/')))
        .filter(|e| !e.as_os_str().is_empty())
        .collect();
    if excluded.is_empty() {
        return None;
    }

    let root = root.to_path_buf();
    Some(Arc::new(move |path: &Path| {
        let relative = path.strip_prefix(&root).unwrap_or(path);
        !excluded.iter().any(|e| relative.starts_with(e))
    }))
}
