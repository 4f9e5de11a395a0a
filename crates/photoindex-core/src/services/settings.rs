//! 应用程序设置服务
//!
//! 负责设置的读取、保存和管理

use std::fs;
use std::path::PathBuf;

use crate::models::AppSettings;
use crate::paths::PathProvider;
use crate::utils::error::AppError;

/// 设置管理器
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// 创建新的设置管理器
    pub fn new(provider: &dyn PathProvider) -> Result<Self, AppError> {
        Self::from_path(provider.settings_path())
    }

    pub fn from_path(settings_path: PathBuf) -> Result<Self, AppError> {
        if let Some(dir) = settings_path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| AppError::Config(format!("无法创建配置目录: {}", e)))?;
        }
        Ok(Self { settings_path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// 加载设置
    pub fn load(&self) -> Result<AppSettings, AppError> {
        if !self.settings_path.exists() {
            tracing::info!("设置文件不存在，使用默认设置");
            return Ok(AppSettings::default());
        }

        let content = fs::read_to_string(&self.settings_path)
            .map_err(|e| AppError::Config(format!("无法读取设置文件: {}", e)))?;

        let settings: AppSettings = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("设置文件格式错误: {}", e)))?;

        tracing::info!("成功加载设置: {:?}", self.settings_path);
        Ok(settings)
    }

    /// 保存设置
    pub fn save(&self, settings: &AppSettings) -> Result<(), AppError> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| AppError::Config(format!("无法序列化设置: {}", e)))?;

        fs::write(&self.settings_path, content)
            .map_err(|e| AppError::Config(format!("无法保存设置文件: {}", e)))?;

        tracing::info!("成功保存设置: {:?}", self.settings_path);
        Ok(())
    }

    /// 重置为默认设置
    pub fn reset(&self) -> Result<AppSettings, AppError> {
        let default_settings = AppSettings::default();
        self.save(&default_settings)?;
        Ok(default_settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RootConfig;
    use crate::paths::DataDirPathProvider;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let provider = DataDirPathProvider::with_base_dir(tmp.path().to_path_buf());
        let manager = SettingsManager::new(&provider).unwrap();

        assert_eq!(manager.load().unwrap(), AppSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let manager = SettingsManager::from_path(tmp.path().join("conf/settings.json")).unwrap();

        let mut settings = AppSettings::default();
        settings.roots.push(RootConfig {
            owner_id: String::from("alice"),
            path: String::from("/srv/photos"),
        });
        settings.scan.periodic_interval_secs = 0;
        manager.save(&settings).unwrap();

        assert_eq!(manager.load().unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let manager = SettingsManager::from_path(tmp.path().join("settings.json")).unwrap();
        fs::write(manager.path(), "{ not json").unwrap();

        assert!(matches!(manager.load(), Err(AppError::Config(_))));
    }
}
