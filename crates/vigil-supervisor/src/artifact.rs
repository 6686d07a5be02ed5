//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Artifact provider resolving service executables."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::error::ConfigurationError;
use crate::registry::ServiceSpec;

/// Supplies the executable for a service, or explains why it cannot.
pub trait ArtifactProvider: Send + Sync {
    fn resolve(&self, spec: &ServiceSpec) -> Result<PathBuf, ConfigurationError>;
}

/// Uses the executable already present at the configured path.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalArtifacts;

impl ArtifactProvider for LocalArtifacts {
    fn resolve(&self, spec: &ServiceSpec) -> Result<PathBuf, ConfigurationError> {
        let missing = || ConfigurationError::MissingExecutable {
            service: spec.name.clone(),
            path: spec.executable.clone(),
        };
        let metadata = fs::metadata(&spec.executable).map_err(|_| missing())?;
        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
            return Err(missing());
        }
        Ok(spec.executable.clone())
    }
}
