//! Cache command - manage build caches

use crate::cache::Cache;
use crate::cli::args::{CacheAction, CacheArgs};
use crate::cli::commands::build::cache_options;
use crate::config::Config;
use crate::docker::DockerCli;
use crate::error::PackResult;
use crate::reference::ImageReference;
use console::style;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> PackResult<()> {
    match args.action {
        CacheAction::Clear {
            image,
            cache_image,
            cache,
        } => clear(config, &image, cache_image.as_deref(), &cache).await,
    }
}

/// Remove the build cache `build` would use for `image`
async fn clear(
    config: &Config,
    image: &str,
    cache_image: Option<&str>,
    values: &[String],
) -> PackResult<()> {
    let target = ImageReference::parse(image)?;
    // Clearing never publishes, so image caches are always allowed here
    let opts = cache_options(values, cache_image, true)?;
    let cache = Cache::new(&opts.build, &target, "build")?;
    debug!("Clearing {}", cache);

    let docker = DockerCli::new()
        .with_binary(&config.docker.binary)
        .with_host(config.docker.host.clone());
    cache.clear(&docker).await?;

    println!("{} Cleared {} cache {}", style("✓").green(), cache.kind(), style(cache.name()).bold());
    Ok(())
}
