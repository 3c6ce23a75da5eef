//! Canonical paths inside phase containers

use crate::archive::TarFlavor;
use std::fmt;

const DEFAULT_WORKSPACE: &str = "workspace";

/// Operating system of the phase containers, taken from the builder image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerOs {
    #[default]
    Linux,
    Windows,
}

impl ContainerOs {
    /// Map an image `Os` field. Anything other than `windows` runs as POSIX
    pub fn from_image_os(os: &str) -> Self {
        if os.eq_ignore_ascii_case("windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    pub fn tar_flavor(&self) -> TarFlavor {
        match self {
            Self::Linux => TarFlavor::Posix,
            Self::Windows => TarFlavor::Windows,
        }
    }
}

impl fmt::Display for ContainerOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// OS-aware mount points shared by every phase of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPaths {
    os: ContainerOs,
    /// Components of the app directory below the root
    workspace: Vec<String>,
}

impl MountPaths {
    /// Paths for `os`, with the app mounted at `<root>/<workspace>`.
    ///
    /// An empty override keeps `workspace`. Nested overrides keep their
    /// structure; `.`, `..` and drive components are dropped so the app
    /// directory never leaves the root.
    pub fn new(os: ContainerOs, workspace_override: &str) -> Self {
        let mut workspace: Vec<String> = workspace_override
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .filter(|part| !part.ends_with(':'))
            .map(str::to_string)
            .collect();
        if workspace.is_empty() {
            workspace.push(DEFAULT_WORKSPACE.to_string());
        }

        Self { os, workspace }
    }

    pub fn os(&self) -> ContainerOs {
        self.os
    }

    pub fn root(&self) -> &'static str {
        match self.os {
            ContainerOs::Linux => "/",
            ContainerOs::Windows => "c:\\",
        }
    }

    pub fn separator(&self) -> &'static str {
        match self.os {
            ContainerOs::Linux => "/",
            ContainerOs::Windows => "\\",
        }
    }

    fn join<S: AsRef<str>>(&self, parts: &[S]) -> String {
        let parts: Vec<&str> = parts.iter().map(AsRef::as_ref).collect();
        format!("{}{}", self.root(), parts.join(self.separator()))
    }

    pub fn layers_dir(&self) -> String {
        self.join(&["layers"])
    }

    pub fn app_dir(&self) -> String {
        self.join(self.workspace.as_slice())
    }

    pub fn cache_dir(&self) -> String {
        self.join(&["cache"])
    }

    pub fn launch_cache_dir(&self) -> String {
        self.join(&["launch-cache"])
    }

    pub fn platform_dir(&self) -> String {
        self.join(&["platform"])
    }

    pub fn stack_path(&self) -> String {
        self.join(&["layers", "stack.toml"])
    }

    pub fn run_path(&self) -> String {
        self.join(&["layers", "run.toml"])
    }

    pub fn sbom_dir(&self) -> String {
        self.join(&["layers", "sbom"])
    }

    pub fn report_path(&self) -> String {
        self.join(&["layers", "report.toml"])
    }
}
