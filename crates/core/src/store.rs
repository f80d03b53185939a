use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, MatchRecord, Progress};
use crate::settings::Settings;

const CANDIDATES_KEY: &str = "candidates";
const MATCHED_KEY: &str = "matched";
const SETTINGS_KEY: &str = "settings";
const PROGRESS_KEY: &str = "progress";
const STATUS_KEY: &str = "status";

/// Failure reading or writing a store document.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error on `key`.
    #[error("store key {key:?}: {source}")]
    Io {
        /// Document key.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// `key` holds something that is not the expected JSON shape.
    #[error("store key {key:?}: malformed json: {source}")]
    Json {
        /// Document key.
        key: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Key contains characters that cannot name a file.
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
    /// The blocking I/O task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

/// Externally visible "monitoring on/off" flag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// A sweep is running (or about to auto-restart).
    On,
    /// Monitoring is stopped.
    #[default]
    Off,
}

/// A directory of JSON documents, one file per key.
///
/// Writes go to a temp file that is renamed into place, on a blocking thread.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Open (lazily create) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_STATE_HOME/rosterwatch`, falling back to `~/.local/state/rosterwatch`.
    pub fn default_dir() -> anyhow::Result<PathBuf> {
        Ok(xdg_state_home()?.join("rosterwatch"))
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Read and decode `key`; `Ok(None)` when it was never written.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = self.key_path(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || read_file(&path, &key))
            .await
            .map_err(|err| StoreError::Join(format!("{err:#}")))?
    }

    /// Encode and atomically replace `key`.
    pub async fn set<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + ?Sized,
    {
        let path = self.key_path(key)?;
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || write_file(&path, &key, &json))
            .await
            .map_err(|err| StoreError::Join(format!("{err:#}")))?
    }

    /// Delete `key`; absent keys are fine.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { key, source }),
        })
        .await
        .map_err(|err| StoreError::Join(format!("{err:#}")))?
    }

    /// Ordered candidate list (empty when never imported).
    pub async fn candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(self.get(CANDIDATES_KEY).await?.unwrap_or_default())
    }

    /// Replace the candidate list wholesale.
    pub async fn set_candidates(&self, candidates: &[Candidate]) -> Result<(), StoreError> {
        self.set(CANDIDATES_KEY, candidates).await
    }

    /// Durable matched list, oldest first.
    pub async fn matched(&self) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(self.get(MATCHED_KEY).await?.unwrap_or_default())
    }

    /// Append one match unless its target is already listed. Returns whether it was added.
    pub async fn append_match(&self, record: &MatchRecord) -> Result<bool, StoreError> {
        let mut matched = self.matched().await?;
        if matched.iter().any(|m| m.target_url == record.target_url) {
            return Ok(false);
        }
        matched.push(record.clone());
        self.set(MATCHED_KEY, &matched).await?;
        Ok(true)
    }

    /// Forget every match (the only way dedup entries are removed).
    pub async fn clear_matched(&self) -> Result<(), StoreError> {
        self.remove(MATCHED_KEY).await
    }

    /// Settings, defaulted and normalized.
    pub async fn settings(&self) -> Result<Settings, StoreError> {
        let mut settings: Settings = self.get(SETTINGS_KEY).await?.unwrap_or_default();
        settings.normalize();
        Ok(settings)
    }

    /// Persist settings after normalizing them.
    pub async fn set_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let mut settings = settings.clone();
        settings.normalize();
        self.set(SETTINGS_KEY, &settings).await
    }

    /// Current sweep progress; `None` means not running.
    pub async fn progress(&self) -> Result<Option<Progress>, StoreError> {
        self.get(PROGRESS_KEY).await
    }

    /// Write progress, or clear it with `None`.
    pub async fn set_progress(&self, progress: Option<Progress>) -> Result<(), StoreError> {
        match progress {
            Some(progress) => self.set(PROGRESS_KEY, &progress).await,
            None => self.remove(PROGRESS_KEY).await,
        }
    }

    /// Persisted on/off flag.
    pub async fn status(&self) -> Result<MonitorStatus, StoreError> {
        Ok(self.get(STATUS_KEY).await?.unwrap_or_default())
    }

    /// Persist the on/off flag.
    pub async fn set_status(&self, status: MonitorStatus) -> Result<(), StoreError> {
        self.set(STATUS_KEY, &status).await
    }
}

fn read_file<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                key: key.to_string(),
                source,
            });
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })
}

fn write_file(path: &Path, key: &str, json: &str) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        key: key.to_string(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(tmp, path).map_err(io_err)?;
    Ok(())
}

fn xdg_state_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_STATE_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_STATE_HOME is set but empty");
        }
        return Ok(dir);
    }

    #[cfg(windows)]
    {
        if let Some(dir) = std::env::var_os("LOCALAPPDATA") {
            let dir = PathBuf::from(dir);
            if dir.as_os_str().is_empty() {
                anyhow::bail!("LOCALAPPDATA is set but empty");
            }
            return Ok(dir);
        }
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".local").join("state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_keys_read_as_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path().join("state"));
        assert!(store.candidates().await.unwrap().is_empty());
        assert!(store.matched().await.unwrap().is_empty());
        assert_eq!(store.settings().await.unwrap(), Settings::default());
        assert_eq!(store.progress().await.unwrap(), None);
        assert_eq!(store.status().await.unwrap(), MonitorStatus::Off);
    }

    #[tokio::test]
    async fn candidates_replace_wholesale() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path());
        let first = vec![Candidate::new("a", "https://x.test/a", Some(1))];
        store.set_candidates(&first).await.unwrap();
        assert_eq!(store.candidates().await.unwrap(), first);

        let second = vec![
            Candidate::new("b", "https://x.test/b", None),
            Candidate::new("c", "https://x.test/c", Some(9)),
        ];
        store.set_candidates(&second).await.unwrap();
        assert_eq!(store.candidates().await.unwrap(), second);
        assert!(!tmp.path().join("candidates.json.tmp").exists());
    }

    #[tokio::test]
    async fn append_match_skips_known_targets_and_clear_forgets() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path());
        let c = Candidate::new("a", "https://x.test/a", None);
        let rec = MatchRecord::for_candidate(&c, Some(serde_json::json!({"marker": "Submitted"}))).unwrap();
        assert!(store.append_match(&rec).await.unwrap());
        assert!(!store.append_match(&rec).await.unwrap());
        assert_eq!(store.matched().await.unwrap().len(), 1);

        store.clear_matched().await.unwrap();
        store.clear_matched().await.unwrap();
        assert!(store.matched().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn progress_none_removes_the_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path());
        let p = Progress { current: 2, total: 7 };
        store.set_progress(Some(p)).await.unwrap();
        assert_eq!(store.progress().await.unwrap(), Some(p));
        store.set_progress(None).await.unwrap();
        assert_eq!(store.progress().await.unwrap(), None);
        assert!(!tmp.path().join("progress.json").exists());
    }

    #[tokio::test]
    async fn malformed_document_is_a_json_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("settings.json"), "{not json").unwrap();
        let store = JsonStore::open(tmp.path());
        assert!(matches!(store.settings().await, Err(StoreError::Json { .. })));
    }

    #[tokio::test]
    async fn settings_are_normalized_on_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path());
        let s = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        store.set_settings(&s).await.unwrap();
        assert_eq!(store.settings().await.unwrap().concurrency, 1);
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path());
        assert!(matches!(
            store.set("../escape", &1u32).await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
