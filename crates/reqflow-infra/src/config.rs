//! Global configuration loader for reqflow.
//!
//! Reads `config.toml` from the data directory (`~/.reqflow/` unless
//! `REQFLOW_DATA_DIR` is set) and deserializes it into [`GlobalConfig`].
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use reqflow_types::config::GlobalConfig;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "REQFLOW_DATA_DIR";

/// The data directory: `$REQFLOW_DATA_DIR`, else `~/.reqflow`, else `./.reqflow`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reqflow")
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config; absent fields take their defaults.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
        assert_eq!(config.flow_timeout_secs, 60);
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
flow_timeout_secs = 5
small_flow_threshold = 2
max_workers = 3
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.flow_timeout_secs, 5);
        assert_eq!(config.small_flow_threshold, 2);
        assert_eq!(config.workers(), 3);
        assert_eq!(config.compression_threshold_bytes, 1024);
    }

    #[tokio::test]
    async fn load_global_config_malformed_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "flow_timeout_secs = \"soon\"")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn data_dir_ends_in_reqflow_without_override() {
        if std::env::var(DATA_DIR_ENV).is_err() {
            assert!(resolve_data_dir().ends_with(".reqflow"));
        }
    }
}
