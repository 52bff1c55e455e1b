//! TOML-backed passcode cache, keyed by stable device identity.
//!
//! The cache maps `app_id` (never the ephemeral bus name) to the passcode
//! last confirmed for that device. Absence of an entry means "use the
//! default passcode", not an error, so reads are infallible.
//!
//! The transport invokes the controller's password hook synchronously during
//! its authentication handshake, and that hook answers from this store.
//! Reads therefore come from an in-memory mirror loaded once at startup;
//! only mutations touch the disk (write-through of the whole file).
//!
//! File location follows the platform convention:
//! - Windows:  `%APPDATA%\GatewayController\passcodes.toml`
//! - Linux:    `~/.config/gateway-controller/passcodes.toml`
//! - macOS:    `~/Library/Application Support/GatewayController/passcodes.toml`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use gateway_core::AppId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for passcode cache mutations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing passcode cache at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse passcode cache TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The cache could not be serialized to TOML.
    #[error("failed to serialize passcode cache: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Injected write failure (test stores only).
    #[error("simulated write failure")]
    WriteFailed,
}

/// The abstract persistent string store the credential core writes through.
pub trait PasscodeStore: Send + Sync {
    /// Returns the persisted passcode for `app_id`, if any. Answers from
    /// memory; safe to call from the transport's handshake hook.
    fn get(&self, app_id: &AppId) -> Option<String>;

    /// Persists `{app_id → passcode}`, replacing any earlier entry.
    fn put(&self, app_id: AppId, passcode: &str) -> Result<(), StorageError>;

    /// Removes the entry for `app_id`. Removing an absent entry is a no-op.
    fn remove(&self, app_id: &AppId) -> Result<(), StorageError>;
}

// ── On-disk schema ────────────────────────────────────────────────────────────

/// Serialized shape of the cache file. Keys are `app_id` strings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PasscodeFile {
    #[serde(default)]
    passcodes: HashMap<String, String>,
}

// ── TOML-backed store ─────────────────────────────────────────────────────────

/// Write-through passcode cache persisted as a TOML file.
pub struct TomlPasscodeStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl TomlPasscodeStore {
    /// Opens (or initializes) the cache at the platform config location.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoPlatformConfigDir`] when the base directory
    /// cannot be determined, [`StorageError::Io`] for file-system errors
    /// other than "not found", and [`StorageError::Parse`] for a malformed
    /// file.
    pub fn open_default() -> Result<Self, StorageError> {
        let dir = platform_config_dir().ok_or(StorageError::NoPlatformConfigDir)?;
        Self::open(dir.join("passcodes.toml"))
    }

    /// Opens (or initializes) the cache at an explicit path.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let cache = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<PasscodeFile>(&content)?.passcodes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(StorageError::Io {
                    path,
                    source: e,
                })
            }
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Writes the current cache contents to disk, creating the parent
    /// directory if needed.
    fn flush(&self, cache: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = PasscodeFile {
            passcodes: cache.clone(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(&self.path, content).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl PasscodeStore for TomlPasscodeStore {
    fn get(&self, app_id: &AppId) -> Option<String> {
        self.cache
            .lock()
            .expect("passcode cache mutex poisoned")
            .get(&app_id.to_string())
            .cloned()
    }

    fn put(&self, app_id: AppId, passcode: &str) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().expect("passcode cache mutex poisoned");
        cache.insert(app_id.to_string(), passcode.to_string());
        self.flush(&cache)
    }

    fn remove(&self, app_id: &AppId) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().expect("passcode cache mutex poisoned");
        if cache.remove(&app_id.to_string()).is_none() {
            return Ok(());
        }
        self.flush(&cache)
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// Volatile store for tests and the headless demo when no config directory
/// is available. `fail_writes` lets tests exercise the path where the remote
/// call succeeded but local persistence did not.
#[derive(Default)]
pub struct MemoryPasscodeStore {
    map: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryPasscodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put`/`remove` fail until called again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl PasscodeStore for MemoryPasscodeStore {
    fn get(&self, app_id: &AppId) -> Option<String> {
        self.map
            .lock()
            .expect("passcode map mutex poisoned")
            .get(&app_id.to_string())
            .cloned()
    }

    fn put(&self, app_id: AppId, passcode: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed);
        }
        self.map
            .lock()
            .expect("passcode map mutex poisoned")
            .insert(app_id.to_string(), passcode.to_string());
        Ok(())
    }

    fn remove(&self, app_id: &AppId) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed);
        }
        self.map
            .lock()
            .expect("passcode map mutex poisoned")
            .remove(&app_id.to_string());
        Ok(())
    }
}

/// Resolves the platform config base directory including the application
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("GatewayController"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("gateway-controller"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("GatewayController")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
