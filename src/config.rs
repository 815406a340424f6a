use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::tasks::timings::TaskTimings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("配置文件格式错误 {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 客户端配置，所有字段都有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    pub token: Option<String>,
    pub state_file: PathBuf,
    pub timings: TaskTimings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080/".to_string(),
            token: None,
            state_file: PathBuf::from("vault_tasks.json"),
            timings: TaskTimings::default(),
        }
    }
}

impl AppConfig {
    /// 读取 JSON 配置；未指定文件时使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("已加载配置文件: {:?}", path);
        Ok(config)
    }

    /// 命令行参数覆盖配置文件
    pub fn with_overrides(
        mut self,
        server_url: Option<String>,
        token: Option<String>,
        state_file: Option<PathBuf>,
    ) -> Self {
        if let Some(server_url) = server_url {
            self.server_url = server_url;
        }
        if token.is_some() {
            self.token = token;
        }
        if let Some(state_file) = state_file {
            self.state_file = state_file;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"server_url":"https://vault.example","timings":{"cleanup_delay_ms":100}}"#)
                .unwrap();
        assert_eq!(config.server_url, "https://vault.example");
        assert_eq!(config.state_file, PathBuf::from("vault_tasks.json"));
        assert_eq!(config.timings.cleanup_delay_ms, 100);
        assert_eq!(config.timings.poll_interval_ms, 1_000);
    }

    #[test]
    fn command_line_overrides_win() {
        let config = AppConfig::default().with_overrides(
            Some("http://10.0.0.2/".to_string()),
            None,
            Some(PathBuf::from("/tmp/state.json")),
        );
        assert_eq!(config.server_url, "http://10.0.0.2/");
        assert_eq!(config.token, None);
        assert_eq!(config.state_file, PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("vault-config-{}.json", uuid::Uuid::new_v4()));
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Io { .. })
        ));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
        let _ = std::fs::remove_file(&path);
    }
}
