//! Local activation state.
//!
//! The state lives in a single `license_state.json` next to the application
//! executable (or in an override directory). It is written atomically: the
//! new content goes to `license_state.json.tmp` in the same directory, is
//! flushed to disk, and is then renamed over the old file. A crash or error
//! at any point leaves either the old file or the new one, never a mix.
//!
//! Reads are forgiving. A missing, unreadable or corrupt file is reported as
//! "no state" so the application falls back to the activation prompt.
//!
//! ## Storage Locations
//! 1. `dir_override` (`GOCBT_STATE_DIR`) when given
//! 2. The directory containing the running executable
//! 3. `dirs::data_dir()/gocbt` when the executable path is unavailable

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::LicenseResult;

/// File name for stored state.
pub const STATE_FILE: &str = "license_state.json";

const TEMP_SUFFIX: &str = ".tmp";

/// Activation state persisted on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub license_key: String,
    pub activation_token: String,
    /// Id the server bound; may differ from the fingerprint when overridden.
    pub machine_id: String,
    /// Fingerprint of the machine that made the activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensed_to: Option<String>,
    /// RFC 3339 timestamp of the activation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl LocalState {
    /// All three required fields are non-empty.
    pub fn is_usable(&self) -> bool {
        !self.license_key.trim().is_empty()
            && !self.activation_token.trim().is_empty()
            && !self.machine_id.trim().is_empty()
    }

    /// Fingerprint this state is tied to. Files written before the field
    /// existed fall back to the bound machine id.
    pub fn owner_fingerprint(&self) -> &str {
        self.fingerprint.as_deref().unwrap_or(&self.machine_id)
    }
}

/// Reads and writes [`LocalState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in `dir_override`, else beside the executable, else the user
    /// data directory. Never the current working directory.
    pub fn beside_executable(dir_override: Option<&Path>) -> Self {
        let dir = dir_override
            .map(Path::to_path_buf)
            .or_else(executable_dir)
            .or_else(|| dirs::data_dir().map(|p| p.join("gocbt")))
            .unwrap_or_else(std::env::temp_dir);
        Self::new(dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Load the saved state. Any problem reading it means "no state".
    pub async fn load(&self) -> Option<LocalState> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("could not read {}: {e}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str::<LocalState>(&data) {
            Ok(state) if state.is_usable() => Some(state),
            Ok(_) => {
                log::debug!("{} is missing required fields", self.path.display());
                None
            }
            Err(e) => {
                log::warn!("ignoring corrupt {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Atomically replace the saved state.
    pub async fn save(&self, state: &LocalState) -> LicenseResult<()> {
        let tmp = self.temp_path();
        if let Err(e) = self.write_temp(state).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        log::debug!("saved activation state to {}", self.path.display());
        Ok(())
    }

    /// First half of [`LocalStore::save`]: the temp file is complete and
    /// durable but the live file has not been touched yet.
    pub(crate) async fn write_temp(&self, state: &LocalState) -> LicenseResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(self.temp_path()).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the saved state. Absent state is not an error.
    pub async fn clear(&self) -> LicenseResult<()> {
        let _ = fs::remove_file(self.temp_path()).await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                log::debug!("cleared activation state at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
