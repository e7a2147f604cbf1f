use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::MediaKind;
use metadata::{ProbeSettings, ProbeTool};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub catalog_path: String,
    pub probe_program: String,
    pub probe_timeout_secs: u64,
    pub tag_timeout_secs: u64,
    pub insert_batch_size: usize,
    pub delete_batch_size: usize,
    pub classifier_cache_capacity: usize,
    pub poll_interval_ms: u64,
    pub audio_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    /// Refuse to scan when the probe tool cannot be run.
    pub require_probe_tool: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            catalog_path: "data/catalog.redb".to_string(),
            probe_program: "ffprobe".to_string(),
            probe_timeout_secs: 30,
            tag_timeout_secs: 5,
            insert_batch_size: 50,
            delete_batch_size: 100,
            classifier_cache_capacity: 8192,
            poll_interval_ms: 100,
            audio_extensions: vec!["mp3".to_string()],
            video_extensions: ["mp4", "mkv", "avi", "mov", "wmv", "flv"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            require_probe_tool: true,
        }
    }
}

impl ScanConfig {
    pub fn media_kind(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        let matches = |list: &[String]| {
            list.iter()
                .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        };
        if matches(&self.audio_extensions) {
            Some(MediaKind::Audio)
        } else if matches(&self.video_extensions) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            tool: ProbeTool::new(
                PathBuf::from(&self.probe_program),
                Duration::from_secs(self.probe_timeout_secs.max(1)),
            ),
            tag_timeout: Duration::from_secs(self.tag_timeout_secs.max(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
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
    match env::var("MEDIA_SCAN_CONFIG") {
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

/// Reads the config at `path`; a missing file means defaults.
pub fn load_config(path: &Path) -> Result<ScanConfig, ConfigError> {
    if !path.exists() {
        return Ok(ScanConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(ScanConfig::default());
    }
    let mut config: ScanConfig = serde_yaml::from_str(&contents)?;
    config.insert_batch_size = config.insert_batch_size.max(1);
    config.delete_batch_size = config.delete_batch_size.max(1);
    config.classifier_cache_capacity = config.classifier_cache_capacity.max(1);
    Ok(config)
}

/// Resolves `value` against the directory holding the config file.
pub fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return path;
    }
    match base.parent() {
        Some(dir) => dir.join(path),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::{load_config, resolve_path, ScanConfig};
    use common::MediaKind;
    use std::fs;
    use std::path::Path;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.insert_batch_size, 50);
        assert_eq!(config.delete_batch_size, 100);
        assert_eq!(config.probe_program, "ffprobe");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "insert_batch_size: 10\nprobe_program: /opt/ffprobe\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.insert_batch_size, 10);
        assert_eq!(config.probe_program, "/opt/ffprobe");
        assert_eq!(config.tag_timeout_secs, 5);
    }

    #[test]
    fn media_kind_follows_extension_lists() {
        let config = ScanConfig::default();
        assert_eq!(config.media_kind(Path::new("a/b.MP3")), Some(MediaKind::Audio));
        assert_eq!(config.media_kind(Path::new("a/b.mkv")), Some(MediaKind::Video));
        assert_eq!(config.media_kind(Path::new("a/b.txt")), None);
        assert_eq!(config.media_kind(Path::new("a/noext")), None);
    }

    #[test]
    fn relative_paths_resolve_next_to_config() {
        let base = Path::new("/etc/media/config.yaml");
        assert_eq!(
            resolve_path(base, "catalog.redb"),
            Path::new("/etc/media/catalog.redb")
        );
        assert_eq!(resolve_path(base, "/var/c.redb"), Path::new("/var/c.redb"));
    }
}
