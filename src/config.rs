use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_DIR: &str = "nvr-live";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_ms: u64,
    pub detection: DetectionSettings,
    pub player: PlayerSettings,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:8080".to_owned(),
            username: None,
            password: None,
            request_timeout_ms: 5_000,
            detection: DetectionSettings::default(),
            player: PlayerSettings::default(),
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub error_threshold: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 1_000,
            max_interval_ms: 5_000,
            error_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub refresh_interval_secs: u64,
    pub retry_delay_ms: u64,
    pub play_timeout_secs: u64,
    pub autoplay: bool,
    /// Touch-first environments try muted autoplay before asking the user.
    pub touch_capable: bool,
    /// go2rtc restream template, e.g. `rtsp://nvr.local:8554/{stream}`.
    /// When set, the native RTSP engine is preferred over HLS.
    pub rtsp_restream: Option<String>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            retry_delay_ms: 1_000,
            play_timeout_secs: 10,
            autoplay: true,
            touch_capable: false,
            rtsp_restream: None,
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(100))
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.server)
            .with_context(|| format!("server '{}' is not a valid URL", self.server))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "server '{}' must use http or https, got '{}'",
                self.server,
                parsed.scheme()
            ));
        }
        if self.detection.base_interval_ms == 0
            || self.detection.max_interval_ms < self.detection.base_interval_ms
        {
            return Err(anyhow!(
                "detection intervals must satisfy 0 < base_interval_ms <= max_interval_ms"
            ));
        }
        if let Some(template) = self.player.rtsp_restream.as_deref()
            && !template.contains("{stream}")
        {
            return Err(anyhow!(
                "player.rtsp_restream must contain a {{stream}} placeholder, got '{template}'"
            ));
        }
        Ok(())
    }

    pub fn apply_overrides(
        &mut self,
        server: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) {
        if let Some(server) = server {
            server.trim_end_matches('/').clone_into(&mut self.server);
        }
        if let Some(username) = username {
            self.username = Some(username.to_owned());
        }
        if let Some(password) = password {
            self.password = Some(password.to_owned());
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    scoped_path("config.json")
}

/// Loads the config from `path` (or the default location), writing the
/// defaults first when the file does not exist yet.
pub fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };

    if !path.exists() {
        let config = AppConfig::default();
        write_config_file(&path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config at {}", path.display()))?;
    let parsed = serde_json::from_str::<AppConfig>(&raw)
        .with_context(|| format!("failed parsing config at {}", path.display()))?;
    Ok(parsed)
}

fn write_config_file(path: &Path, config: &AppConfig) -> Result<()> {
    ensure_parent_dir(path)?;
    let payload = serde_json::to_string_pretty(config).context("failed serializing config")?;
    fs::write(path, payload)
        .with_context(|| format!("failed writing config at {}", path.display()))?;
    Ok(())
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }
    Ok(())
}

pub(crate) fn data_root() -> Result<PathBuf> {
    Ok(dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("unable to determine user data directory")?
        .join(APP_DIR))
}

pub(crate) fn scoped_path(file: &str) -> Result<PathBuf> {
    Ok(data_root()?.join(file))
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, load_or_create_config};

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.base_interval_ms, 1_000);
        assert_eq!(config.detection.max_interval_ms, 5_000);
        assert_eq!(config.player.refresh_interval_secs, 30);
    }

    #[test]
    fn rejects_restream_template_without_placeholder() {
        let mut config = AppConfig::default();
        config.player.rtsp_restream = Some("rtsp://nvr:8554/cam".to_owned());
        assert!(config.validate().is_err());
        config.player.rtsp_restream = Some("rtsp://nvr:8554/{stream}".to_owned());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_http_server() {
        let mut config = AppConfig::default();
        config.apply_overrides(Some("ftp://nvr/"), None, None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_trim_trailing_slash() {
        let mut config = AppConfig::default();
        config.apply_overrides(Some("http://nvr:8080/"), Some("admin"), None);
        assert_eq!(config.server, "http://nvr:8080");
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.password, None);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let created = load_or_create_config(Some(&path)).unwrap();
        assert!(path.exists());
        let reloaded = load_or_create_config(Some(&path)).unwrap();
        assert_eq!(created, reloaded);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server":"http://10.0.0.2:8080","player":{"autoplay":false}}"#)
            .unwrap();
        let config = load_or_create_config(Some(&path)).unwrap();
        assert_eq!(config.server, "http://10.0.0.2:8080");
        assert!(!config.player.autoplay);
        assert_eq!(config.player.retry_delay_ms, 1_000);
        assert_eq!(config.request_timeout_ms, 5_000);
    }
}
