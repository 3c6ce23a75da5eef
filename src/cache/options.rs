//! User-facing cache settings
//!
//! Parses `--cache` values such as
//! `type=build;format=image;name=registry.example.com/app-cache:build`.
//! A `bind` cache names a host directory; the build and launch caches live
//! in its `build-cache` and `launch-cache` subdirectories.

use crate::error::{PackError, PackResult};
use std::fmt;
use std::path::Path;

/// Storage format of a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheFormat {
    #[default]
    Volume,
    Image,
    Bind,
}

impl fmt::Display for CacheFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume => write!(f, "volume"),
            Self::Image => write!(f, "image"),
            Self::Bind => write!(f, "bind"),
        }
    }
}

/// Format and optional explicit name of one cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheInfo {
    pub format: CacheFormat,
    /// Volume name, image reference or host path; empty derives a volume name
    pub source: String,
}

/// Settings for the build and launch caches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOpts {
    pub build: CacheInfo,
    pub launch: CacheInfo,
}

impl CacheOpts {
    /// Image-backed build cache, as selected by `--cache-image`
    pub fn with_cache_image(mut self, reference: &str) -> Self {
        self.build = CacheInfo {
            format: CacheFormat::Image,
            source: reference.to_string(),
        };
        self
    }

    /// Apply one `--cache` value. Later values override earlier ones
    pub fn apply(&mut self, value: &str) -> PackResult<()> {
        let mut fields = Vec::new();
        for field in value.split(';').map(str::trim).filter(|f| !f.is_empty()) {
            let (key, value) = field.split_once('=').ok_or_else(|| {
                PackError::InvalidCacheOptions(format!(
                    "invalid field '{}' must be a key=value pair",
                    field
                ))
            })?;
            fields.push((key.to_lowercase(), value.to_string()));
        }

        let mut is_launch = false;
        for (key, value) in &fields {
            if key == "type" {
                is_launch = match value.to_lowercase().as_str() {
                    "build" => false,
                    "launch" => true,
                    other => {
                        return Err(PackError::InvalidCacheOptions(format!(
                            "invalid cache type '{}'",
                            other
                        )))
                    }
                };
            }
        }

        let (cache, subdir) = if is_launch {
            (&mut self.launch, "launch-cache")
        } else {
            (&mut self.build, "build-cache")
        };

        let mut name = None;
        for (key, value) in fields {
            match key.as_str() {
                "format" => {
                    cache.format = match value.to_lowercase().as_str() {
                        "volume" => CacheFormat::Volume,
                        "image" => CacheFormat::Image,
                        "bind" => CacheFormat::Bind,
                        other => {
                            return Err(PackError::InvalidCacheOptions(format!(
                                "invalid cache format '{}'",
                                other
                            )))
                        }
                    }
                }
                "name" => name = Some(value),
                _ => {}
            }
        }

        // Host paths keep their case
        match name {
            Some(path) if cache.format == CacheFormat::Bind && !path.is_empty() => {
                cache.source = bind_source(&path, subdir)?;
            }
            Some(other) => cache.source = other.to_lowercase(),
            None => {}
        }

        self.validate()
    }

    fn validate(&self) -> PackResult<()> {
        for cache in [&self.build, &self.launch] {
            let named = matches!(cache.format, CacheFormat::Image | CacheFormat::Bind);
            if named && cache.source.is_empty() {
                return Err(PackError::InvalidCacheOptions(
                    "cache 'name' is required".to_string(),
                ));
            }
        }
        if self.launch.format == CacheFormat::Image {
            return Err(PackError::InvalidCacheOptions(
                "image format is not supported for the launch cache".to_string(),
            ));
        }
        Ok(())
    }
}

/// `<absolute path>/<subdir>` for a bind cache named `path`
fn bind_source(path: &str, subdir: &str) -> PackResult<String> {
    let resolved = std::path::absolute(Path::new(path)).map_err(|e| {
        PackError::InvalidCacheOptions(format!("cannot resolve bind path '{}': {}", path, e))
    })?;
    Ok(resolved.join(subdir).to_string_lossy().into_owned())
}

impl std::str::FromStr for CacheOpts {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut opts = Self::default();
        opts.apply(s)?;
        Ok(opts)
    }
}

impl fmt::Display for CacheOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type=build;format={};name={};type=launch;format={};name={};",
            self.build.format, self.build.source, self.launch.format, self.launch.source
        )
    }
}
