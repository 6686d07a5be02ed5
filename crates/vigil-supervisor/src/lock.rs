//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Advisory lock serializing lifecycle operations across invocations."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, SupervisorError};

const LOCK_FILE: &str = "lifecycle.lock";

/// Exclusive `flock` held for the duration of a lifecycle command.
/// Released on drop.
pub struct OperationLock {
    _file: Flock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for OperationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLock")
            .field("path", &self.path)
            .finish()
    }
}

impl OperationLock {
    /// Take the lock without waiting; a held lock is `SupervisorError::Busy`.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(file) => Ok(Self { _file: file, path }),
            Err((_, Errno::EWOULDBLOCK)) => Err(SupervisorError::Busy(path)),
            Err((_, errno)) => Err(SupervisorError::Io(errno.into())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_holder_is_rejected_until_release() {
        let dir = tempdir().unwrap();
        let first = OperationLock::acquire(dir.path()).unwrap();
        let err = OperationLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, SupervisorError::Busy(_)));
        drop(first);
        let again = OperationLock::acquire(dir.path()).unwrap();
        assert!(again.path().ends_with(LOCK_FILE));
    }
}
