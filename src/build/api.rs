//! Platform API versions and negotiation

use crate::error::{PackError, PackResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Platform API versions this tool can drive, oldest first
pub const SUPPORTED_PLATFORM_APIS: &[&str] = &[
    "0.3", "0.4", "0.5", "0.6", "0.7", "0.8", "0.9", "0.10", "0.11", "0.12", "0.13",
];

/// `major.minor` API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u64,
    pub minor: u64,
}

impl ApiVersion {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, other: &str) -> bool {
        other.parse::<Self>().map_or(false, |other| *self >= other)
    }

    pub fn less_than(&self, other: &str) -> bool {
        other.parse::<Self>().map_or(false, |other| *self < other)
    }
}

impl FromStr for ApiVersion {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let invalid = || PackError::InvalidApiVersion(s.to_string());

        let (major, minor) = trimmed.split_once('.').unwrap_or((trimmed, "0"));
        let major = major.parse::<u64>().map_err(|_| invalid())?;
        let minor = minor.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { major, minor })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Supported and deprecated versions advertised by a lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSet {
    #[serde(default)]
    pub deprecated: Vec<ApiVersion>,
    #[serde(default)]
    pub supported: Vec<ApiVersion>,
}

impl ApiSet {
    /// Every version the lifecycle accepts
    pub fn all(&self) -> Vec<ApiVersion> {
        let mut all: Vec<ApiVersion> = self
            .deprecated
            .iter()
            .chain(self.supported.iter())
            .copied()
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

/// Versions of [`SUPPORTED_PLATFORM_APIS`]
pub fn supported_platform_apis() -> Vec<ApiVersion> {
    SUPPORTED_PLATFORM_APIS
        .iter()
        .filter_map(|v| v.parse().ok())
        .collect()
}

/// Latest version both sides support.
///
/// The result is the maximum of `engine ∩ builder`, independent of the
/// order either list is given in.
pub fn find_latest_supported(
    engine: &[ApiVersion],
    builder: &[ApiVersion],
) -> PackResult<ApiVersion> {
    builder
        .iter()
        .filter(|v| engine.contains(v))
        .max()
        .copied()
        .ok_or_else(|| PackError::NoSupportedPlatformApi {
            builder: builder.iter().map(ToString::to_string).collect(),
            supported: engine.iter().map(ToString::to_string).collect(),
        })
}

/// Versions present in both lists, in the order of `a`
pub fn intersection(a: &[ApiVersion], b: &[ApiVersion]) -> Vec<ApiVersion> {
    a.iter().filter(|v| b.contains(v)).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<ApiVersion> {
        list.iter().map(|v| v.parse().unwrap()).collect()
    }

    #[test]
    fn parse_and_order() {
        let v: ApiVersion = "0.10".parse().unwrap();
        assert_eq!(v, ApiVersion::new(0, 10));
        assert!(v > "0.9".parse().unwrap());
        assert_eq!(v.to_string(), "0.10");
        assert_eq!("v1".parse::<ApiVersion>().unwrap(), ApiVersion::new(1, 0));
        assert!("zero.four".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn gates() {
        let v = ApiVersion::new(0, 5);
        assert!(v.at_least("0.4"));
        assert!(v.at_least("0.5"));
        assert!(v.less_than("0.6"));
        assert!(!v.less_than("0.5"));
    }

    #[test]
    fn selects_latest_common_version() {
        let engine = versions(&["0.3", "0.4", "0.5", "0.6"]);
        let builder = versions(&["0.2", "0.4", "0.5", "0.7"]);
        assert_eq!(
            find_latest_supported(&engine, &builder).unwrap(),
            ApiVersion::new(0, 5)
        );
    }

    #[test]
    fn selection_is_order_independent() {
        let engine = versions(&["0.6", "0.3", "0.5"]);
        let mut builder = versions(&["0.5", "0.3", "0.9"]);
        let first = find_latest_supported(&engine, &builder).unwrap();
        builder.reverse();
        assert_eq!(find_latest_supported(&engine, &builder).unwrap(), first);
    }

    #[test]
    fn empty_intersection_fails() {
        let err = find_latest_supported(&versions(&["0.3"]), &versions(&["0.1", "0.2"])).unwrap_err();
        assert!(matches!(err, PackError::NoSupportedPlatformApi { .. }));
    }

    #[test]
    fn intersection_keeps_shared_versions() {
        let builder = versions(&["0.3", "0.9", "0.12"]);
        let lifecycle = versions(&["0.12", "0.9", "0.13"]);
        assert_eq!(intersection(&builder, &lifecycle), versions(&["0.9", "0.12"]));
        assert!(intersection(&builder, &[]).is_empty());
    }

    #[test]
    fn api_set_union() {
        let set = ApiSet {
            deprecated: versions(&["0.2"]),
            supported: versions(&["0.4", "0.3", "0.2"]),
        };
        assert_eq!(set.all(), versions(&["0.2", "0.3", "0.4"]));
    }

    #[test]
    fn engine_list_parses() {
        let all = supported_platform_apis();
        assert_eq!(all.len(), SUPPORTED_PLATFORM_APIS.len());
        assert_eq!(all.last().unwrap().to_string(), "0.13");
    }
}
