use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Category used when the folder layout does not provide one.
    pub fn fallback_category(self) -> &'static str {
        match self {
            MediaKind::Audio => "Audio",
            MediaKind::Video => "Video",
        }
    }
}

/// One catalog row. `path` is the unique key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub filename: String,
    pub path: String,
    pub parent_folder: String,
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub genre: String,
    pub duration_minutes: f64,
    #[serde(default)]
    pub contributors: String,
    #[serde(default)]
    pub actors: String,
    #[serde(default)]
    pub comment: String,
    pub category: String,
    pub file_size: u64,
    pub bitrate: u64,
    #[serde(default)]
    pub video_codec: String,
    #[serde(default)]
    pub audio_codec: String,
    #[serde(default)]
    pub resolution: String,
    pub frame_rate: f64,
    pub audio_channels: u32,
    pub sample_rate: u32,
    pub has_metadata: bool,
    pub fingerprint: String,
    pub scanned_at: u64,
    pub modified_at: u64,
}

/// Cheap change detector over file size and modification time.
pub fn content_fingerprint(path_key: &str, size: u64, modified: SystemTime) -> String {
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(path_key.as_bytes());
    hasher.update(&size.to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_string()
}

pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Absolute, symlink-free spelling of a scan root. Every key and scope
/// prefix is derived from this form.
pub fn resolve_root(path: &Path) -> io::Result<PathBuf> {
    let resolved = fs::canonicalize(path)?;
    Ok(strip_verbatim(resolved))
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    // `\\?\C:\x` -> `C:\x`; UNC and device paths keep their prefix.
    let plain = path
        .to_str()
        .and_then(|text| text.strip_prefix(r"\\?\"))
        .filter(|rest| rest.as_bytes().get(1) == Some(&b':'))
        .map(PathBuf::from);
    plain.unwrap_or(path)
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

/// Catalog key for a path: lossy UTF-8 with trailing separators removed.
pub fn path_key(path: &Path) -> String {
    let mut out = path.to_string_lossy().to_string();
    while out.len() > 1 && out.ends_with(std::path::MAIN_SEPARATOR) && !out.ends_with(":\\") {
        out.pop();
    }
    out
}

/// Prefix that every catalog key below `root` starts with.
pub fn scope_prefix(root: &Path) -> String {
    let mut out = path_key(root);
    if !out.ends_with(std::path::MAIN_SEPARATOR) {
        out.push(std::path::MAIN_SEPARATOR);
    }
    out
}

/// Directory segments of `path` below `root`, skipping prefixes, empty and
/// drive-letter segments. The file name itself is not included.
pub fn folder_segments(root: &Path, path: &Path) -> Vec<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parent = match rel.parent() {
        Some(parent) => parent,
        None => return Vec::new(),
    };
    parent
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .filter(|part| !part.trim().is_empty() && !part.ends_with(':'))
        .collect()
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{content_fingerprint, folder_segments, path_key, resolve_root, scope_prefix};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn fingerprint_tracks_size_and_mtime() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let base = content_fingerprint("/m/a.mp3", 1024, mtime);
        assert_eq!(base, content_fingerprint("/m/a.mp3", 1024, mtime));
        assert_ne!(base, content_fingerprint("/m/a.mp3", 1025, mtime));
        assert_ne!(
            base,
            content_fingerprint("/m/a.mp3", 1024, mtime + Duration::from_secs(1))
        );
        assert_eq!(base.len(), 32);
    }

    #[test]
    fn segments_skip_file_name_and_empty_parts() {
        let root = Path::new("/media");
        let file = Path::new("/media/Filme//Action/Movie (2015).mp4");
        assert_eq!(folder_segments(root, file), vec!["Filme", "Action"]);
        assert!(folder_segments(root, Path::new("/media/loose.mp3")).is_empty());
    }

    #[test]
    fn scope_prefix_ends_with_separator() {
        let root: PathBuf = ["/", "media", "music"].iter().collect();
        let prefix = scope_prefix(&root);
        assert!(prefix.ends_with(std::path::MAIN_SEPARATOR));
        assert_eq!(path_key(&root).len() + 1, prefix.len());
    }

    #[test]
    fn root_spellings_resolve_to_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        fs::create_dir_all(root.join("Filme")).unwrap();
        let plain = resolve_root(&root).unwrap();
        assert!(plain.is_absolute());
        assert_eq!(resolve_root(&root.join(".")).unwrap(), plain);
        assert_eq!(resolve_root(&root.join("Filme").join("..")).unwrap(), plain);
        assert!(resolve_root(&root.join("missing")).is_err());
    }
}
