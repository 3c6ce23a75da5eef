//! Registry-image-backed caches

use crate::error::{PackError, PackResult};
use crate::reference::ImageReference;

/// Cache stored as an image in a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCache {
    reference: ImageReference,
}

impl ImageCache {
    /// Validate `name` as an image reference
    pub fn new(name: &str) -> PackResult<Self> {
        let reference = ImageReference::parse(name).map_err(|e| PackError::InvalidCacheImage {
            reference: name.to_string(),
            reason: match e {
                PackError::InvalidReference { reason, .. } => reason,
                other => other.to_string(),
            },
        })?;
        Ok(Self { reference })
    }

    /// The reference as supplied by the caller
    pub fn name(&self) -> &str {
        self.reference.as_str()
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }
}
