use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use figseg_core::DrawThresholds;
use figseg_core::drawing::{DEFAULT_MIN_NORMALIZED_EXTENT, DEFAULT_MIN_PIXEL_EXTENT};
use figseg_service::{DEFAULT_API_BASE_URL, ServiceConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "figseg";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "FIGSEG_";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PREVIEW_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_PREFETCH_BEHIND: usize = 1;
pub const DEFAULT_PREFETCH_AHEAD: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_min_pixel_extent")]
    pub min_pixel_extent: f64,
    #[serde(default = "default_min_normalized_extent")]
    pub min_normalized_extent: f64,
    #[serde(default = "default_preview_debounce_ms")]
    pub preview_debounce_ms: u64,
    #[serde(default = "default_prefetch_behind")]
    pub prefetch_behind: usize,
    #[serde(default = "default_prefetch_ahead")]
    pub prefetch_ahead: usize,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            min_pixel_extent: default_min_pixel_extent(),
            min_normalized_extent: default_min_normalized_extent(),
            preview_debounce_ms: default_preview_debounce_ms(),
            prefetch_behind: default_prefetch_behind(),
            prefetch_ahead: default_prefetch_ahead(),
        }
    }
}

impl WorkspaceSettings {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new(
            &self.api_base_url,
            Duration::from_millis(self.request_timeout_ms),
        )
    }

    pub fn draw_thresholds(&self) -> DrawThresholds {
        DrawThresholds {
            min_pixel_extent: self.min_pixel_extent,
            min_normalized_extent: self.min_normalized_extent,
        }
    }

    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.preview_debounce_ms)
    }

    pub fn normalized(mut self) -> Self {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = default_api_base_url();
        }
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = default_request_timeout_ms();
        }

        // Negative or NaN thresholds would accept every gesture; fall back instead.
        if !(self.min_pixel_extent.is_finite() && self.min_pixel_extent >= 0.0) {
            self.min_pixel_extent = default_min_pixel_extent();
        }
        if !(self.min_normalized_extent.is_finite()
            && (0.0..1.0).contains(&self.min_normalized_extent))
        {
            self.min_normalized_extent = default_min_normalized_extent();
        }

        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<WorkspaceSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".figseg"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<WorkspaceSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: WorkspaceSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> WorkspaceSettings {
        let mut figment = Figment::from(Serialized::defaults(WorkspaceSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<WorkspaceSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                WorkspaceSettings::default()
            }
        }
    }

    fn persist(&self, settings: &WorkspaceSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_min_pixel_extent() -> f64 {
    DEFAULT_MIN_PIXEL_EXTENT
}

fn default_min_normalized_extent() -> f64 {
    DEFAULT_MIN_NORMALIZED_EXTENT
}

fn default_preview_debounce_ms() -> u64 {
    DEFAULT_PREVIEW_DEBOUNCE_MS
}

fn default_prefetch_behind() -> usize {
    DEFAULT_PREFETCH_BEHIND
}

fn default_prefetch_ahead() -> usize {
    DEFAULT_PREFETCH_AHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("figseg-settings-{}-{name}", std::process::id()))
            .join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(scratch_path("missing"));
        let settings = store.settings();
        assert_eq!(settings.preview_debounce_ms, DEFAULT_PREVIEW_DEBOUNCE_MS);
        assert_eq!(settings.draw_thresholds(), DrawThresholds::default());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let path = scratch_path("partial");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        std::fs::write(
            &path,
            r#"{"api_base_url":"https://api.example.com/","min_pixel_extent":8.0}"#,
        )
        .expect("write");

        let settings = SettingsStore::new(path.clone()).settings();
        assert_eq!(settings.api_base_url, "https://api.example.com");
        assert_eq!(settings.min_pixel_extent, 8.0);
        assert_eq!(settings.prefetch_ahead, DEFAULT_PREFETCH_AHEAD);

        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn update_persists_and_reloads() {
        let path = scratch_path("update");
        let store = SettingsStore::new(path.clone());
        let mut next = (*store.settings()).clone();
        next.preview_debounce_ms = 250;
        next.min_normalized_extent = -1.0;
        store.update(next).expect("persist");

        assert_eq!(store.settings().preview_debounce_ms, 250);
        assert_eq!(
            store.settings().min_normalized_extent,
            DEFAULT_MIN_NORMALIZED_EXTENT
        );

        let reloaded = SettingsStore::new(path.clone()).settings();
        assert_eq!(reloaded.preview_debounce_ms, 250);

        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }
}
