use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub name: String,
    pub url: String,
    /// Local folder the downloaded files end up in.
    pub folder: String,
    /// Folder name passed to the download queue.
    pub metube_folder: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub metube_url: String,
    pub playlists: Vec<PlaylistConfig>,
    pub history_path: String,
    pub id_map_path: String,
    pub activity_path: String,
    pub port: u16,
    pub quality: String,
    pub format: String,
    pub yt_dlp_path: String,
    pub request_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub monitor_downloads: bool,
    /// Hours between dashboard-scheduled runs; 0 turns the schedule off.
    pub schedule_interval: u64,
    pub last_run: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            metube_url: "http://localhost:8081".to_string(),
            playlists: Vec::new(),
            history_path: "download_history.json".to_string(),
            id_map_path: "id_map.json".to_string(),
            activity_path: "activity.redb".to_string(),
            port: 5000,
            quality: "best".to_string(),
            format: "m4a".to_string(),
            yt_dlp_path: "yt-dlp".to_string(),
            request_timeout_secs: 10,
            metadata_timeout_secs: 300,
            poll_interval_secs: 10,
            error_backoff_secs: 30,
            monitor_downloads: true,
            schedule_interval: 0,
            last_run: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Replaces zero and blank values with defaults.
    fn fill_defaults(&mut self) {
        let defaults = ServerConfig::default();
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.history_path.trim().is_empty() {
            self.history_path = defaults.history_path;
        }
        if self.id_map_path.trim().is_empty() {
            self.id_map_path = defaults.id_map_path;
        }
        if self.activity_path.trim().is_empty() {
            self.activity_path = defaults.activity_path;
        }
        if self.port == 0 {
            self.port = defaults.port;
        }
        if self.quality.trim().is_empty() {
            self.quality = defaults.quality;
        }
        if self.format.trim().is_empty() {
            self.format = defaults.format;
        }
        if self.yt_dlp_path.trim().is_empty() {
            self.yt_dlp_path = defaults.yt_dlp_path;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = defaults.request_timeout_secs;
        }
        if self.metadata_timeout_secs == 0 {
            self.metadata_timeout_secs = defaults.metadata_timeout_secs;
        }
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = defaults.poll_interval_secs;
        }
        if self.error_backoff_secs == 0 {
            self.error_backoff_secs = defaults.error_backoff_secs;
        }
        let trimmed = self.metube_url.trim().trim_end_matches('/').to_string();
        self.metube_url = trimmed;
    }
}

/// Dashboard edit of the operator-facing settings.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub metube_url: String,
    #[serde(default)]
    pub schedule_interval: u64,
    #[serde(default)]
    pub playlists: Vec<PlaylistUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistUpdate {
    pub name: String,
    pub url: String,
    pub folder: String,
    #[serde(default)]
    pub metube_folder: Option<String>,
}

impl ConfigUpdate {
    /// Validates the edit and writes it into `config`. Nothing is changed
    /// when validation fails.
    pub fn apply(self, config: &mut ServerConfig) -> Result<(), String> {
        let metube_url = self.metube_url.trim().trim_end_matches('/');
        if metube_url.is_empty() {
            return Err("metube_url is required".to_string());
        }
        let mut playlists = Vec::with_capacity(self.playlists.len());
        for (index, playlist) in self.playlists.into_iter().enumerate() {
            let name = playlist.name.trim();
            let url = playlist.url.trim();
            let folder = playlist.folder.trim();
            if name.is_empty() || url.is_empty() || folder.is_empty() {
                return Err(format!(
                    "playlist {} needs a name, url and folder",
                    index + 1
                ));
            }
            let metube_folder = match playlist.metube_folder.as_deref().map(str::trim) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => name.to_string(),
            };
            playlists.push(PlaylistConfig {
                name: name.to_string(),
                url: url.to_string(),
                folder: folder.to_string(),
                metube_folder,
            });
        }

        config.metube_url = metube_url.to_string();
        config.schedule_interval = self.schedule_interval;
        config.playlists = playlists;
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("UPLINK_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = if contents.trim().is_empty() {
            ServerConfig::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        config.fill_defaults();
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_or_create_config, resolve_path, ConfigUpdate, ServerConfig};

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.format, "m4a");
        assert!(config.playlists.is_empty());

        let (_, created_again) = load_or_create_config(&path).unwrap();
        assert!(!created_again);
    }

    #[test]
    fn reads_playlists_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
metube_url: "http://nas:8081/"
poll_interval_secs: 0
playlists:
  - name: Favourites
    url: https://www.youtube.com/playlist?list=PL123
    folder: /music/favourites
    metube_folder: favourites
"#,
        )
        .unwrap();
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.metube_url, "http://nas:8081");
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.history_path, "download_history.json");
        assert_eq!(config.playlists.len(), 1);
        assert_eq!(config.playlists[0].metube_folder, "favourites");
    }

    #[test]
    fn relative_paths_resolve_next_to_config() {
        let config_path = std::path::Path::new("/etc/uplink/config.yaml");
        assert_eq!(
            resolve_path(config_path, "id_map.json"),
            std::path::PathBuf::from("/etc/uplink/id_map.json")
        );
        assert_eq!(
            resolve_path(config_path, "/var/lib/id_map.json"),
            std::path::PathBuf::from("/var/lib/id_map.json")
        );
    }

    #[test]
    fn config_update_replaces_playlists_and_defaults_queue_folder() {
        let mut config = ServerConfig::default();
        config.last_run = Some("2026-10-01 08:00".to_string());
        let update: ConfigUpdate = serde_json::from_str(
            r#"{
                "metube_url": " http://nas:8081/ ",
                "schedule_interval": 6,
                "playlists": [
                    {"name": "Gym", "url": "https://example.com/list?list=PL1", "folder": "/music/gym"},
                    {"name": "Chill", "url": "https://example.com/list?list=PL2", "folder": "chill", "metube_folder": "lofi"}
                ]
            }"#,
        )
        .unwrap();
        update.apply(&mut config).unwrap();

        assert_eq!(config.metube_url, "http://nas:8081");
        assert_eq!(config.schedule_interval, 6);
        assert_eq!(config.playlists.len(), 2);
        assert_eq!(config.playlists[0].metube_folder, "Gym");
        assert_eq!(config.playlists[1].metube_folder, "lofi");
        assert_eq!(config.last_run.as_deref(), Some("2026-10-01 08:00"));
        assert_eq!(config.format, "m4a");
    }

    #[test]
    fn invalid_config_update_changes_nothing() {
        let mut config = ServerConfig::default();
        let update: ConfigUpdate = serde_json::from_str(
            r#"{"metube_url": "http://nas:8081", "playlists": [{"name": "Gym", "url": "", "folder": "gym"}]}"#,
        )
        .unwrap();
        let err = update.apply(&mut config).unwrap_err();
        assert!(err.contains("playlist 1"));
        assert_eq!(config.metube_url, "http://localhost:8081");
        assert!(config.playlists.is_empty());

        let blank: ConfigUpdate = serde_json::from_str(r#"{"metube_url": "  "}"#).unwrap();
        assert!(blank.apply(&mut config).is_err());
    }
}
