//! Builder image capabilities
//!
//! The lifecycle execution only needs a narrow view of the builder: its
//! image name, the build user, run-image metadata and the lifecycle it
//! ships. [`ImageBuilder`] reads that view from a local image.

use crate::build::api::{ApiSet, ApiVersion};
use crate::docker::{DockerClient, ImageInfo};
use crate::error::{PackError, PackResult};
use serde::{Deserialize, Serialize};

/// Label holding the builder metadata JSON
pub const METADATA_LABEL: &str = "io.buildpacks.builder.metadata";
/// Label on lifecycle images listing the APIs they speak
pub const LIFECYCLE_APIS_LABEL: &str = "io.buildpacks.lifecycle.apis";
/// Image env var naming the build user
pub const ENV_UID: &str = "CNB_USER_ID";
/// Image env var naming the build group
pub const ENV_GID: &str = "CNB_GROUP_ID";

/// What the lifecycle execution needs from a builder
pub trait Builder: Send + Sync {
    /// Builder image reference
    fn name(&self) -> &str;
    fn uid(&self) -> u32;
    fn gid(&self) -> u32;
    fn stack(&self) -> &StackMetadata;
    fn run_images(&self) -> &[RunImageMetadata];
    fn lifecycle_descriptor(&self) -> &LifecycleDescriptor;
}

/// Lifecycle version and the APIs it speaks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleDescriptor {
    pub version: semver::Version,
    pub buildpack_apis: ApiSet,
    pub platform_apis: ApiSet,
}

/// A run image and its registry mirrors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunImageMetadata {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackMetadata {
    #[serde(rename = "runImage", default)]
    pub run_image: RunImageMetadata,
}

#[derive(Serialize)]
struct StackToml<'a> {
    #[serde(rename = "run-image")]
    run_image: &'a RunImageMetadata,
}

#[derive(Serialize)]
struct RunToml<'a> {
    images: &'a [RunImageMetadata],
}

/// Contents of `stack.toml`
pub fn stack_toml(stack: &StackMetadata) -> PackResult<Vec<u8>> {
    let toml = toml::to_string(&StackToml {
        run_image: &stack.run_image,
    })?;
    Ok(toml.into_bytes())
}

/// Contents of `run.toml`
pub fn run_toml(images: &[RunImageMetadata]) -> PackResult<Vec<u8>> {
    Ok(toml::to_string(&RunToml { images })?.into_bytes())
}

#[derive(Debug, Default, Deserialize)]
struct BuilderMetadata {
    #[serde(default)]
    stack: StackMetadata,
    #[serde(default)]
    images: Vec<RunImageMetadata>,
    #[serde(default)]
    lifecycle: LifecycleMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct LifecycleMetadata {
    #[serde(default)]
    version: String,
    /// Single-version form written by older builders
    #[serde(default)]
    api: LegacyApis,
    #[serde(default)]
    apis: Option<LifecycleApis>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyApis {
    #[serde(default)]
    buildpack: Option<ApiVersion>,
    #[serde(default)]
    platform: Option<ApiVersion>,
}

#[derive(Debug, Default, Deserialize)]
struct LifecycleApis {
    #[serde(default)]
    buildpack: ApiSet,
    #[serde(default)]
    platform: ApiSet,
}

/// Builder backed by a local image
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    name: String,
    uid: u32,
    gid: u32,
    stack: StackMetadata,
    run_images: Vec<RunImageMetadata>,
    lifecycle: LifecycleDescriptor,
}

impl ImageBuilder {
    /// Read builder metadata from the local image `reference`
    pub async fn inspect(docker: &dyn DockerClient, reference: &str) -> PackResult<Self> {
        let info = docker
            .image_inspect(reference)
            .await
            .map_err(|e| introspection(reference, e))?
            .ok_or_else(|| introspection(reference, "image not found locally"))?;

        Self::from_image(reference, &info)
    }

    /// Build from already-inspected image metadata
    pub fn from_image(reference: &str, info: &ImageInfo) -> PackResult<Self> {
        let raw = info
            .label(METADATA_LABEL)
            .ok_or_else(|| introspection(reference, format!("missing label {}", METADATA_LABEL)))?;
        let metadata: BuilderMetadata = serde_json::from_str(raw)
            .map_err(|e| introspection(reference, format!("invalid builder metadata: {}", e)))?;

        let uid = env_id(reference, info, ENV_UID)?;
        let gid = env_id(reference, info, ENV_GID)?;

        let version = semver::Version::parse(&metadata.lifecycle.version).map_err(|e| {
            introspection(
                reference,
                format!("invalid lifecycle version '{}': {}", metadata.lifecycle.version, e),
            )
        })?;

        let (buildpack_apis, platform_apis) = match metadata.lifecycle.apis {
            Some(apis) => (apis.buildpack, apis.platform),
            None => (
                single_api(metadata.lifecycle.api.buildpack),
                single_api(metadata.lifecycle.api.platform),
            ),
        };

        let run_images = if metadata.images.is_empty() && !metadata.stack.run_image.image.is_empty() {
            vec![metadata.stack.run_image.clone()]
        } else {
            metadata.images
        };

        Ok(Self {
            name: reference.to_string(),
            uid,
            gid,
            stack: metadata.stack,
            run_images,
            lifecycle: LifecycleDescriptor {
                version,
                buildpack_apis,
                platform_apis,
            },
        })
    }
}

impl Builder for ImageBuilder {
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

/// Platform APIs advertised by the lifecycle image `reference`.
///
/// Empty when the image is not present locally or carries no label, in which
/// case negotiation uses the builder's lifecycle alone.
pub async fn lifecycle_image_apis(docker: &dyn DockerClient, reference: &str) -> PackResult<Vec<ApiVersion>> {
    let Some(info) = docker
        .image_inspect(reference)
        .await
        .map_err(|e| introspection(reference, e))?
    else {
        return Ok(Vec::new());
    };
    let Some(raw) = info.label(LIFECYCLE_APIS_LABEL) else {
        return Ok(Vec::new());
    };

    let apis: LifecycleApis = serde_json::from_str(raw)
        .map_err(|e| introspection(reference, format!("invalid {} label: {}", LIFECYCLE_APIS_LABEL, e)))?;
    Ok(apis.platform.all())
}

fn single_api(version: Option<ApiVersion>) -> ApiSet {
    ApiSet {
        deprecated: Vec::new(),
        supported: version.into_iter().collect(),
    }
}

fn env_id(reference: &str, info: &ImageInfo, key: &str) -> PackResult<u32> {
    let value = info
        .env_value(key)
        .ok_or_else(|| introspection(reference, format!("image env {} not set", key)))?;
    value
        .parse()
        .map_err(|_| introspection(reference, format!("{} must be a number, got '{}'", key, value)))
}

fn introspection(builder: &str, reason: impl ToString) -> PackError {
    PackError::BuilderIntrospection {
        builder: builder.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDocker;
    use std::collections::HashMap;

    const METADATA: &str = r#"{
        "description": "test builder",
        "stack": {"runImage": {"image": "example.com/run:1", "mirrors": ["mirror.example.com/run:1"]}},
        "images": [{"image": "example.com/run:1", "mirrors": ["mirror.example.com/run:1"]}],
        "lifecycle": {
            "version": "0.20.5",
            "apis": {
                "buildpack": {"deprecated": [], "supported": ["0.2", "0.10"]},
                "platform": {"deprecated": ["0.3"], "supported": ["0.4", "0.13"]}
            }
        }
    }"#;

    fn image(labels: &[(&str, &str)], env: &[&str]) -> ImageInfo {
        let mut info = ImageInfo::default();
        info.config.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        info.config.env = env.iter().map(|e| e.to_string()).collect();
        info
    }

    #[test]
    fn reads_builder_metadata() {
        let info = image(
            &[(METADATA_LABEL, METADATA)],
            &["CNB_USER_ID=1000", "CNB_GROUP_ID=1001"],
        );
        let builder = ImageBuilder::from_image("example.com/builder:1", &info).unwrap();

        assert_eq!(builder.name(), "example.com/builder:1");
        assert_eq!(builder.uid(), 1000);
        assert_eq!(builder.gid(), 1001);
        assert_eq!(builder.stack().run_image.image, "example.com/run:1");
        assert_eq!(builder.run_images().len(), 1);

        let lifecycle = builder.lifecycle_descriptor();
        assert_eq!(lifecycle.version, semver::Version::new(0, 20, 5));
        assert_eq!(lifecycle.platform_apis.all().len(), 3);
        assert_eq!(lifecycle.buildpack_apis.supported[1], ApiVersion::new(0, 10));
    }

    #[test]
    fn legacy_single_api_metadata() {
        let legacy = r#"{
            "stack": {"runImage": {"image": "example.com/run:1"}},
            "lifecycle": {"version": "0.6.1", "api": {"buildpack": "0.2", "platform": "0.3"}}
        }"#;
        let info = image(&[(METADATA_LABEL, legacy)], &["CNB_USER_ID=1", "CNB_GROUP_ID=2"]);
        let builder = ImageBuilder::from_image("builder", &info).unwrap();

        assert_eq!(
            builder.lifecycle_descriptor().platform_apis.supported,
            vec![ApiVersion::new(0, 3)]
        );
        assert_eq!(builder.run_images()[0].image, "example.com/run:1");
    }

    #[test]
    fn missing_label_or_user_fails() {
        let err = ImageBuilder::from_image("builder", &image(&[], &[])).unwrap_err();
        assert!(matches!(err, PackError::BuilderIntrospection { .. }));

        let info = image(&[(METADATA_LABEL, METADATA)], &["CNB_USER_ID=abc"]);
        let err = ImageBuilder::from_image("builder", &info).unwrap_err();
        assert!(err.to_string().contains("CNB_USER_ID"));
    }

    #[test]
    fn stack_toml_contents() {
        let stack = StackMetadata {
            run_image: RunImageMetadata {
                image: "example.com/run:1".to_string(),
                mirrors: vec!["mirror.example.com/run:1".to_string()],
            },
        };
        let toml = String::from_utf8(stack_toml(&stack).unwrap()).unwrap();
        assert!(toml.contains("[run-image]"));
        assert!(toml.contains("image = \"example.com/run:1\""));
        assert!(toml.contains("mirrors = [\"mirror.example.com/run:1\"]"));
    }

    #[test]
    fn run_toml_contents() {
        let images = vec![RunImageMetadata {
            image: "example.com/run:1".to_string(),
            mirrors: Vec::new(),
        }];
        let toml = String::from_utf8(run_toml(&images).unwrap()).unwrap();
        assert!(toml.contains("[[images]]"));
        assert!(toml.contains("image = \"example.com/run:1\""));
        assert!(!toml.contains("mirrors"));
    }

    #[tokio::test]
    async fn lifecycle_image_label_lists_platform_apis() {
        let apis = r#"{
            "buildpack": {"deprecated": [], "supported": ["0.10"]},
            "platform": {"deprecated": ["0.3"], "supported": ["0.12", "0.9"]}
        }"#;
        let docker = FakeDocker::new()
            .with_image_info("example.com/lifecycle:1", image(&[(LIFECYCLE_APIS_LABEL, apis)], &[]))
            .with_image_info("example.com/lifecycle:bad", image(&[(LIFECYCLE_APIS_LABEL, "{")], &[]))
            .with_image_info("example.com/lifecycle:bare", image(&[], &[]));

        let found = lifecycle_image_apis(&docker, "example.com/lifecycle:1").await.unwrap();
        let expected: Vec<ApiVersion> = ["0.3", "0.9", "0.12"].iter().map(|v| v.parse().unwrap()).collect();
        assert_eq!(found, expected);

        assert!(lifecycle_image_apis(&docker, "example.com/lifecycle:bare").await.unwrap().is_empty());
        assert!(lifecycle_image_apis(&docker, "example.com/lifecycle:absent").await.unwrap().is_empty());

        let err = lifecycle_image_apis(&docker, "example.com/lifecycle:bad").await.unwrap_err();
        assert!(matches!(err, PackError::BuilderIntrospection { .. }));
    }
}
