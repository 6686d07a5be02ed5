//! ---
//! vigil_section: "14-versioning"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Build and version metadata helpers."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use serde::Serialize;

/// Compile-time version metadata captured via `vergen` in the binary crates.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Build timestamp from the compilation environment.
    pub build_timestamp: String,
    /// Target triple used for the build.
    pub target: String,
    /// Optimisation level used during compilation.
    pub opt_level: String,
}

impl VersionInfo {
    /// Construct from explicit build metadata, normally the `VERGEN_*`
    /// variables of the calling binary.
    #[must_use]
    pub fn new(
        semver: &str,
        build_timestamp: Option<&str>,
        target: Option<&str>,
        opt_level: Option<&str>,
    ) -> Self {
        Self {
            semver: semver.to_owned(),
            build_timestamp: build_timestamp.unwrap_or("UNKNOWN").to_owned(),
            target: target.unwrap_or("UNKNOWN").to_owned(),
            opt_level: opt_level.unwrap_or("UNKNOWN").to_owned(),
        }
    }

    /// Human readable banner used in logging surfaces.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("Vigil v{}", self.semver)
    }

    /// Extended string containing build metadata suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nBuilt: {built}\nTarget: {target}\nOpt level: {opt_level}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            opt_level = self.opt_level
        )
    }
}
