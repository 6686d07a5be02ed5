//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Operator helper commands installed next to the units."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

const ACTIONS: [&str; 4] = ["start", "stop", "restart", "status"];

/// `<prefix>-start` style wrappers that `exec` the control binary.
#[derive(Debug, Clone)]
pub struct HelperCommands {
    bin_dir: PathBuf,
    prefix: String,
    control_binary: PathBuf,
    config_path: Option<PathBuf>,
}

impl HelperCommands {
    pub fn new(
        bin_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        control_binary: impl Into<PathBuf>,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            prefix: prefix.into(),
            control_binary: control_binary.into(),
            config_path,
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        ACTIONS
            .iter()
            .map(|action| self.bin_dir.join(format!("{}-{action}", self.prefix)))
            .collect()
    }

    fn script(&self, action: &str) -> String {
        let mut command = format!("exec {}", shell_quote(&self.control_binary));
        if let Some(config) = &self.config_path {
            command.push_str(&format!(" --config {}", shell_quote(config)));
        }
        format!("#!/bin/sh\n# Installed by vigilctl.\n{command} {action} \"$@\"\n")
    }

    /// Write every helper with mode 0755, returning the written paths.
    pub fn install(&self) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.bin_dir)?;
        let mut written = Vec::with_capacity(ACTIONS.len());
        for (action, path) in ACTIONS.iter().zip(self.paths()) {
            fs::write(&path, self.script(action))?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            debug!(helper = %path.display(), "helper command installed");
            written.push(path);
        }
        Ok(written)
    }

    /// Remove every helper; absent files are fine.
    pub fn remove(&self) -> io::Result<()> {
        for path in self.paths() {
            match fs::remove_file(&path) {
                Ok(()) => debug!(helper = %path.display(), "helper command removed"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn installs_executable_wrappers_and_removes_them() {
        let dir = tempdir().unwrap();
        let helpers = HelperCommands::new(
            dir.path(),
            "vigil",
            "/usr/local/bin/vigilctl",
            Some(PathBuf::from("/etc/vigil/vigil.toml")),
        );
        let written = helpers.install().unwrap();
        assert_eq!(written.len(), 4);

        let start = fs::read_to_string(dir.path().join("vigil-start")).unwrap();
        assert!(start.starts_with("#!/bin/sh\n"));
        assert!(start.contains(
            "exec '/usr/local/bin/vigilctl' --config '/etc/vigil/vigil.toml' start \"$@\""
        ));
        let mode = fs::metadata(dir.path().join("vigil-status"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);

        helpers.remove().unwrap();
        helpers.remove().unwrap();
        assert!(helpers.paths().iter().all(|p| !p.exists()));
    }

    #[test]
    fn quotes_single_quotes_in_paths() {
        assert_eq!(shell_quote(Path::new("/opt/it's")), r"'/opt/it'\''s'");
    }
}
