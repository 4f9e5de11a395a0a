//! Path provider abstraction.
//!
//! Resolves where the index database, derivative cache, settings and logs
//! live, so services never hard-code a data directory.

use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "PHOTOINDEX_DATA_DIR";

/// Trait for providing application data paths.
pub trait PathProvider: Send + Sync {
    /// Get the root application data directory.
    fn app_data_dir(&self) -> PathBuf;

    /// Get the database directory.
    fn database_dir(&self) -> PathBuf {
        self.app_data_dir().join("Database")
    }

    /// Root of the content-addressed derivative cache.
    fn derivative_cache_dir(&self) -> PathBuf {
        self.app_data_dir().join("Cache")
    }

    /// Get the settings file path.
    fn settings_path(&self) -> PathBuf {
        self.app_data_dir().join("Config").join("settings.json")
    }

    /// Get the logs directory.
    fn logs_dir(&self) -> PathBuf {
        self.app_data_dir().join("Logs")
    }

    /// Get the database file path.
    fn database_path(&self) -> PathBuf {
        self.database_dir().join("photoindex.db")
    }
}

/// Shared reference to a PathProvider implementation.
pub type SharedPathProvider = Arc<dyn PathProvider>;

/// Default provider rooted at the platform data directory
/// (`$XDG_DATA_HOME/Photoindex` on Linux).
#[derive(Debug, Clone)]
pub struct DataDirPathProvider {
    app_data_dir: PathBuf,
}

impl DataDirPathProvider {
    pub fn new() -> Self {
        let app_data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Photoindex");
        Self { app_data_dir }
    }

    /// Honour `PHOTOINDEX_DATA_DIR` when set and non-empty.
    pub fn from_env() -> Self {
        match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::with_base_dir(PathBuf::from(dir)),
            _ => Self::new(),
        }
    }

    /// Create a provider with a custom base directory.
    ///
    /// Useful for testing.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            app_data_dir: base_dir,
        }
    }
}

impl Default for DataDirPathProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PathProvider for DataDirPathProvider {
    fn app_data_dir(&self) -> PathBuf {
        self.app_data_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_base_dir() {
        let provider = DataDirPathProvider::with_base_dir(PathBuf::from("/data/pi"));
        assert_eq!(
            provider.database_path(),
            PathBuf::from("/data/pi/Database/photoindex.db")
        );
        assert_eq!(provider.derivative_cache_dir(), PathBuf::from("/data/pi/Cache"));
        assert_eq!(
            provider.settings_path(),
            PathBuf::from("/data/pi/Config/settings.json")
        );
    }
}
