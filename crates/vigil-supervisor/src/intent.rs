//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Stop-intent markers shared between the controller and the stop hook."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! The controller runs in one process and the stop hook in another, so an
//! intentional stop is announced through a marker file. The hook consumes it
//! and classifies the stop as clean.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};

const MARKER_SUFFIX: &str = "stop";
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Marker directory for intentional stops.
#[derive(Debug, Clone)]
pub struct StopIntents {
    dir: PathBuf,
    max_age: Duration,
}

impl StopIntents {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("intents"),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Markers older than `max_age` are treated as leftovers and ignored.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn marker(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.{MARKER_SUFFIX}"))
    }

    /// Record that the next stop of `service` is intentional.
    pub fn mark(&self, service: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.marker(service), Utc::now().to_rfc3339())?;
        debug!(service, "stop intent recorded");
        Ok(())
    }

    /// Remove the marker for `service`, returning whether a fresh one existed.
    pub fn consume(&self, service: &str) -> bool {
        let path = self.marker(service);
        let fresh = match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age <= self.max_age)
                .unwrap_or(true),
            Err(_) => return false,
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            // Another hook instance consumed it first.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return false,
            Err(err) => warn!(service, error = %err, "unable to remove stop intent marker"),
        }
        if !fresh {
            debug!(service, "ignoring stale stop intent");
        }
        fresh
    }

    /// Drop any marker for `service` without consulting it.
    pub fn clear(&self, service: &str) {
        match fs::remove_file(self.marker(service)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(service, error = %err, "unable to clear stop intent marker"),
        }
    }

    pub fn is_marked(&self, service: &str) -> bool {
        self.marker(service).exists()
    }
}
