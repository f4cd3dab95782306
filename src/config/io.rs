use std::env::{current_exe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::{ProjectDirs};
use tokio::fs::{File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Preferences;
use crate::device::types::DeviceIdentity;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\coinbox.exe => F:\coinbox.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to coinbox-session.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "coinbox", "coinbox-session").map(|dirs| {
        dirs.config_dir().join("coinbox-session.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct PreferenceLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl PreferenceLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

enum Backend {
    File(std::fs::File),
    Memory(Preferences),
}

/// Durable per-user preference storage holding the remembered device identity and the session
/// settings.
#[derive(Clone)]
pub struct PreferenceStore {
    inner: Arc<Mutex<Backend>>,
}

impl PreferenceStore {
    pub fn open_default() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        info!("Using preferences file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        Ok(PreferenceStore { inner: Arc::new(Mutex::new(Backend::File(file))) })
    }

    /// A store that lives only as long as the process.
    pub fn in_memory(preferences: Preferences) -> Self {
        PreferenceStore { inner: Arc::new(Mutex::new(Backend::Memory(preferences))) }
    }

    /// Obtain a locker for an exclusive file lock so that the preferences file is used by only
    /// one instance of this application. Returns `None` for in-memory stores.
    pub fn locker(&self) -> Result<Option<PreferenceLocker>, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock PreferenceStore inner");

        match &*inner {
            Backend::File(file) => Ok(Some(PreferenceLocker {
                rw_lock: RwLock::new(file.try_clone()?),
            })),
            Backend::Memory(_) => Ok(None),
        }
    }

    // The File returned from here should never be closed!
    // Returns Err(preferences) for in-memory stores.
    fn get_file(&self) -> Result<Result<File, Preferences>, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock PreferenceStore inner");
        match &*inner {
            Backend::File(file) => Ok(Ok(File::from_std(file.try_clone()?))), // std File => tokio File
            Backend::Memory(preferences) => Ok(Err(preferences.clone())),
        }
    }

    pub async fn read(&self) -> Result<Preferences, ConfigError> {
        let mut file = match self.get_file()? {
            Ok(file) => file,
            Err(preferences) => return Ok(preferences),
        };

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Preferences::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub async fn save(&self, preferences: &Preferences) -> Result<(), ConfigError> {
        let mut file = match self.get_file()? {
            Ok(file) => file,
            Err(_) => {
                let mut inner = self.inner.lock().expect("Failed to lock PreferenceStore inner");
                *inner = Backend::Memory(preferences.clone());
                return Ok(());
            },
        };

        let content = serde_json::to_string_pretty(preferences)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn saved_device(&self) -> Result<Option<DeviceIdentity>, ConfigError> {
        Ok(self.read().await?.saved_device)
    }

    /// Overwrite the remembered identity. At most one identity is remembered at a time.
    pub async fn remember_device(&self, identity: &DeviceIdentity) -> Result<(), ConfigError> {
        let mut preferences = self.read().await?;
        if preferences.saved_device.as_ref() == Some(identity) {
            return Ok(());
        }

        info!("Remembering device {}", identity);
        preferences.saved_device = Some(identity.clone());
        self.save(&preferences).await
    }

    pub async fn forget_device(&self) -> Result<(), ConfigError> {
        let mut preferences = self.read().await?;
        if preferences.saved_device.take().is_some() {
            info!("Forgetting remembered device");
            self.save(&preferences).await?;
        }
        Ok(())
    }
}
