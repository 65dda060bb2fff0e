use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{ErrorCode, ViewerError};
use crate::marker_catalog::MarkerCatalog;
use crate::remote::normalize_base_url;
use crate::size_standard::SizeLadderCatalog;
use crate::view_state::{DEFAULT_PEAK_THRESHOLD, SignalToggleMode, clamp_peak_threshold};
use crate::{MARKER_CATALOG, SIZE_LADDERS};

pub const BASE_URL_ENV: &str = "ALLELESCOPE_BASE_URL";
pub const TIMEOUT_ENV: &str = "ALLELESCOPE_TIMEOUT_SECS";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8888";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub default_peak_threshold: f64,
    pub signal_toggle_mode: SignalToggleMode,
    /// JSON marker table replacing the built-in one.
    pub marker_catalog_path: Option<String>,
    pub size_standard_catalog_path: Option<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_peak_threshold: DEFAULT_PEAK_THRESHOLD,
            signal_toggle_mode: SignalToggleMode::Independent,
            marker_catalog_path: None,
            size_standard_catalog_path: None,
        }
    }
}

impl ViewerConfig {
    pub fn load_from_path(path: &str) -> Result<Self, ViewerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ViewerError::new(
                ErrorCode::Io,
                format!("Could not read config file '{path}': {e}"),
            )
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ViewerError::invalid_input(format!("Could not parse config JSON '{path}': {e}"))
        })?;
        Ok(config.normalized())
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), ViewerError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| {
            ViewerError::new(
                ErrorCode::Internal,
                format!("Could not serialize config: {e}"),
            )
        })?;
        std::fs::write(path, text).map_err(|e| {
            ViewerError::new(
                ErrorCode::Io,
                format!("Could not write config file '{path}': {e}"),
            )
        })
    }

    /// Clamps the threshold and tidies the base URL. Unusable values fall back to defaults.
    pub fn normalized(mut self) -> Self {
        self.base_url =
            normalize_base_url(&self.base_url).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        self.default_peak_threshold = if self.default_peak_threshold.is_finite() {
            clamp_peak_threshold(self.default_peak_threshold)
        } else {
            DEFAULT_PEAK_THRESHOLD
        };
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        self
    }

    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(BASE_URL_ENV).and_then(|v| normalize_base_url(&v)) {
            self.base_url = url;
        }
        if let Some(secs) = lookup(TIMEOUT_ENV).and_then(|v| v.trim().parse::<u64>().ok()) {
            self.request_timeout_secs = secs;
        }
        self.normalized()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn marker_catalog(&self) -> Result<MarkerCatalog, ViewerError> {
        match self.marker_catalog_path.as_deref() {
            Some(path) => {
                let catalog = MarkerCatalog::from_json_file(path)?;
                info!(path, markers = catalog.len(), "loaded marker catalog");
                Ok(catalog)
            }
            None => Ok(MARKER_CATALOG.clone()),
        }
    }

    pub fn size_ladders(&self) -> Result<SizeLadderCatalog, ViewerError> {
        match self.size_standard_catalog_path.as_deref() {
            Some(path) => SizeLadderCatalog::from_json_file(path),
            None => Ok(SIZE_LADDERS.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        std::fs::write(
            &path,
            r#"{"base_url":"analysis.local:9000/","default_peak_threshold":900,"signal_toggle_mode":"exclusive"}"#,
        )
        .unwrap();
        let config = ViewerConfig::load_from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(config.base_url, "http://analysis.local:9000");
        assert_eq!(config.default_peak_threshold, 500.0);
        assert_eq!(config.signal_toggle_mode, SignalToggleMode::Exclusive);
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.marker_catalog_path.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        let path = path.to_str().unwrap();
        let config = ViewerConfig {
            request_timeout_secs: 5,
            ..ViewerConfig::default()
        };
        config.save_to_path(path).unwrap();
        assert_eq!(ViewerConfig::load_from_path(path).unwrap(), config);
    }

    #[test]
    fn test_missing_or_broken_file() {
        let err = ViewerConfig::load_from_path("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();
        let err = ViewerConfig::load_from_path(path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (BASE_URL_ENV, "https://str.example.org/"),
            (TIMEOUT_ENV, "7"),
        ]);
        let config = ViewerConfig::default()
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.base_url, "https://str.example.org");
        assert_eq!(config.request_timeout(), Duration::from_secs(7));

        let config = ViewerConfig::default().apply_overrides_from(|key| {
            (key == TIMEOUT_ENV).then(|| "soon".to_string())
        });
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_custom_marker_catalog_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        std::fs::write(&path, r#"{"AMEL": {"channel": 3, "size_range": [100, 115], "repeat": 1}}"#)
            .unwrap();
        let config = ViewerConfig {
            marker_catalog_path: Some(path.to_str().unwrap().to_string()),
            ..ViewerConfig::default()
        };
        let catalog = config.marker_catalog().unwrap();
        assert_eq!(catalog.names_sorted(), vec!["AMEL".to_string()]);
        assert_eq!(ViewerConfig::default().marker_catalog().unwrap().len(), 15);
        assert_eq!(ViewerConfig::default().size_ladders().unwrap().names_sorted().len(), 3);
    }
}
