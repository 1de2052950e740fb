//! Session management.
//!
//! A session is one logging run: a directory named
//! `{experiment}_{yymmdd_HHMM}` under the configured storage root, holding
//! the numbered segment files, a small JSON manifest describing how the run
//! was configured, and — after finalization — the merged artifact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::flush::FlushMode;

/// Manifest file name inside a session directory. Non-numeric on purpose so
/// the merger never mistakes it for a segment.
pub const MANIFEST_FILE_NAME: &str = "session.json";

/// How a session was configured, recorded at start for later inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub experiment: String,
    pub started_at: DateTime<Utc>,
    pub segment_row_limit: u64,
    pub flush_mode: FlushMode,
}

impl SessionManifest {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            experiment: settings.acquisition.experiment.clone(),
            started_at: Utc::now(),
            segment_row_limit: settings.storage.segment_row_limit,
            flush_mode: settings.flush.mode,
        }
    }
}

/// Create the per-run session directory and write its manifest.
/// Returns the directory path.
pub fn create_session(settings: &Settings) -> Result<PathBuf> {
    let stamp = Local::now().format("%y%m%d_%H%M");
    let dir = Path::new(&settings.storage.session_root)
        .join(format!("{}_{stamp}", settings.acquisition.experiment));
    fs::create_dir_all(&dir)?;
    let manifest = SessionManifest::from_settings(settings);
    save_manifest(&manifest, &dir.join(MANIFEST_FILE_NAME))?;
    Ok(dir)
}

/// Saves a session manifest to a file.
pub fn save_manifest(manifest: &SessionManifest, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json)?;
    Ok(())
}

/// Loads a session manifest from a file.
pub fn load_manifest(path: &Path) -> Result<SessionManifest> {
    let json = fs::read_to_string(path)?;
    let manifest = serde_json::from_str(&json)?;
    Ok(manifest)
}
