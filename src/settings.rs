//! Runtime-editable settings and their on-disk form.
//!
//! [`Settings`] is the record the control API reads and writes: model choice,
//! sampling defaults, UI flags and the upstream credential. It is persisted as
//! camelCase JSON by [`SettingsFile`] after every successful save.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

#[cfg(unix)]
use std::{fs::File, os::unix::fs::OpenOptionsExt};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Live gateway settings.
///
/// Missing keys in a persisted or submitted document fall back to the defaults
/// below, so older settings files keep loading after new fields are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub show_reasoning: bool,
    pub enable_thinking: bool,
    /// Log the model substitution and completion of every proxied request.
    pub log_requests: bool,
    pub context_size: u64,
    /// Default `max_tokens` for the upstream; `0` means unbounded.
    pub max_tokens: u64,
    pub temperature: f64,
    pub streaming_enabled: bool,
    /// Model sent upstream regardless of what the caller asked for.
    pub current_model: String,
    /// Upstream bearer credential. Empty means unset.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_reasoning: false,
            enable_thinking: false,
            log_requests: true,
            context_size: 128_000,
            max_tokens: 0,
            temperature: 0.7,
            streaming_enabled: true,
            current_model: "deepseek-ai/deepseek-v3.2".into(),
            api_key: String::new(),
        }
    }
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Replace these settings with `incoming`, keeping the stored credential
    /// unless `incoming` carries a non-empty one.
    pub fn merge_save(&mut self, mut incoming: Settings) {
        if incoming.api_key.is_empty() {
            incoming.api_key = std::mem::take(&mut self.api_key);
        }
        *self = incoming;
    }

    /// JSON view for HTTP responses: the credential is dropped and replaced
    /// by an `apiKeyConfigured` flag.
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()));
        if let Some(obj) = value.as_object_mut() {
            obj.remove("apiKey");
            obj.insert("apiKeyConfigured".into(), Value::Bool(self.has_api_key()));
        }
        value
    }
}

/// JSON settings document on disk.
///
/// Clones share one write lock, so writes through any of them never overlap.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SettingsFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted settings.
    ///
    /// Returns `None` when the file is absent or cannot be parsed; the caller
    /// then keeps its defaults.
    pub fn load(&self) -> Option<Settings> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read settings");
                return None;
            }
        };

        match serde_json::from_slice::<Settings>(&data) {
            Ok(settings) => {
                info!(path = %self.path.display(), "loaded settings");
                Some(settings)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unparsable settings file");
                None
            }
        }
    }

    /// Persist `settings`, replacing the file atomically.
    pub fn save(&self, settings: &Settings) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(settings).map_err(io::Error::other)?;
        write_atomic(&self.path, &data)
    }

    /// Write whatever `current` returns, on the blocking pool.
    ///
    /// `current` is evaluated only after every earlier write has finished, and
    /// the lock is held until this write lands (even if the caller is dropped).
    /// Passing a closure that reads the live settings therefore leaves the
    /// newest state on disk however concurrent saves interleave.
    pub async fn save_latest(&self, current: impl FnOnce() -> Settings) -> io::Result<()> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let settings = current();
        let file = self.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            file.save(&settings)
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// temp file → fsync → rename. The file holds the credential, so it is
/// created owner-only on Unix.
fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "settings path has no parent"))?;
    fs::create_dir_all(parent)?;

    // Unique per write: two writers never share a temp file.
    let temp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    let written = (|| {
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            opts.mode(0o600);
        }

        let mut file = opts.open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_key(key: &str) -> Settings {
        Settings {
            api_key: key.into(),
            ..Settings::default()
        }
    }

    // -----------------------------------------------------------------------
    // Defaults & serde shape
    // -----------------------------------------------------------------------

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert!(!s.show_reasoning);
        assert!(!s.enable_thinking);
        assert!(s.log_requests);
        assert_eq!(s.context_size, 128_000);
        assert_eq!(s.max_tokens, 0);
        assert_eq!(s.temperature, 0.7);
        assert!(s.streaming_enabled);
        assert_eq!(s.current_model, "deepseek-ai/deepseek-v3.2");
        assert!(!s.has_api_key());
    }

    #[test]
    fn deserializes_camel_case_and_fills_missing_keys() {
        let s: Settings =
            serde_json::from_value(json!({ "currentModel": "m1", "maxTokens": 512 })).unwrap();
        assert_eq!(s.current_model, "m1");
        assert_eq!(s.max_tokens, 512);
        assert_eq!(s.context_size, 128_000);
        assert!(s.streaming_enabled);
    }

    #[test]
    fn empty_api_key_is_not_serialized() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert!(value.get("apiKey").is_none());
        assert_eq!(value["currentModel"], "deepseek-ai/deepseek-v3.2");
    }

    #[test]
    fn redacted_hides_key_but_reports_presence() {
        let value = with_key("nvapi-secret").redacted();
        assert!(value.get("apiKey").is_none());
        assert_eq!(value["apiKeyConfigured"], true);
        assert!(!value.to_string().contains("nvapi-secret"));

        assert_eq!(Settings::default().redacted()["apiKeyConfigured"], false);
    }

    // -----------------------------------------------------------------------
    // Credential-preserving merge
    // -----------------------------------------------------------------------

    #[test]
    fn merge_with_empty_key_keeps_stored_credential() {
        let mut current = with_key("nvapi-old");
        let incoming = Settings {
            current_model: "m2".into(),
            temperature: 0.2,
            ..Settings::default()
        };
        current.merge_save(incoming);
        assert_eq!(current.api_key, "nvapi-old");
        assert_eq!(current.current_model, "m2");
        assert_eq!(current.temperature, 0.2);
    }

    #[test]
    fn merge_with_new_key_replaces_credential() {
        let mut current = with_key("nvapi-old");
        current.merge_save(with_key("nvapi-new"));
        assert_eq!(current.api_key, "nvapi-new");
    }

    #[test]
    fn merge_into_unset_credential_with_empty_key_stays_unset() {
        let mut current = Settings::default();
        current.merge_save(Settings::default());
        assert!(!current.has_api_key());
    }

    // -----------------------------------------------------------------------
    // SettingsFile
    // -----------------------------------------------------------------------

    #[test]
    fn load_returns_none_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = SettingsFile::new(dir.path().join("settings.json"));
        assert!(file.load().is_none());
    }

    #[test]
    fn load_returns_none_for_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(SettingsFile::new(path).load().is_none());
    }

    #[test]
    fn save_then_load_preserves_credential_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = SettingsFile::new(dir.path().join("nested").join("settings.json"));
        let settings = Settings {
            current_model: "meta/llama-3.3-70b-instruct".into(),
            ..with_key("nvapi-on-disk")
        };
        file.save(&settings).unwrap();

        let loaded = file.load().expect("saved settings should load");
        assert_eq!(loaded, settings);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = SettingsFile::new(dir.path().join("settings.json"));
        file.save(&with_key("k")).unwrap();
        let mode = fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn save_latest_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = SettingsFile::new(dir.path().join("settings.json"));
        file.save_latest(|| with_key("k")).await.unwrap();
        assert_eq!(file.load().unwrap().api_key, "k");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_all_succeed_and_leave_a_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = SettingsFile::new(dir.path().join("settings.json"));

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let file = file.clone();
                tokio::spawn(async move {
                    file.save_latest(move || Settings {
                        current_model: format!("m{i}"),
                        ..with_key("nvapi-k")
                    })
                    .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().expect("every save succeeds");
        }

        let loaded = file.load().expect("file must still parse");
        assert_eq!(loaded.api_key, "nvapi-k");
        assert!(loaded.current_model.starts_with('m'));

        // No temp files are left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| *n != "settings.json")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn failed_write_removes_its_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // The target is a non-empty directory, so the final rename fails.
        let target = dir.path().join("settings.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();

        assert!(SettingsFile::new(target.clone()).save(&with_key("k")).is_err());
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["settings.json"]);
    }
}
