use std::path::Path;
use std::time::SystemTime;

use common::{content_fingerprint, unix_secs, MediaKind, MediaRecord};
use metadata::{year_from_tag, MediaProbe};

use crate::classify::PathClassification;
use crate::genre::normalize_genre;

/// Filesystem facts gathered for one file before reconciliation.
#[derive(Clone, Debug)]
pub struct FileFacts<'a> {
    pub path: &'a Path,
    pub key: &'a str,
    pub kind: MediaKind,
    pub size: u64,
    pub modified: SystemTime,
    pub scanned_at: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldSource {
    Tag,
    Path,
    Fallback,
}

#[derive(Clone, Debug)]
pub struct Reconciled {
    pub record: MediaRecord,
    /// True when genre, year, album or actors came from the folder layout.
    pub used_path_metadata: bool,
}

struct Sources<'a> {
    kind: MediaKind,
    probe: &'a MediaProbe,
    path: &'a PathClassification,
}

struct Rule {
    source: FieldSource,
    extract: fn(&Sources<'_>) -> Option<String>,
}

const GENRE_RULES: &[Rule] = &[
    Rule {
        source: FieldSource::Tag,
        extract: tag_genre,
    },
    Rule {
        source: FieldSource::Path,
        extract: path_genre,
    },
];

const YEAR_RULES: &[Rule] = &[
    Rule {
        source: FieldSource::Tag,
        extract: tag_year,
    },
    Rule {
        source: FieldSource::Path,
        extract: path_year,
    },
];

const ALBUM_RULES: &[Rule] = &[
    Rule {
        source: FieldSource::Tag,
        extract: tag_album,
    },
    Rule {
        source: FieldSource::Path,
        extract: path_sub_hierarchy,
    },
];

const ACTOR_RULES: &[Rule] = &[
    Rule {
        source: FieldSource::Tag,
        extract: tag_artist,
    },
    Rule {
        source: FieldSource::Path,
        extract: path_sub_hierarchy,
    },
];

const CATEGORY_RULES: &[Rule] = &[
    Rule {
        source: FieldSource::Path,
        extract: path_category,
    },
    Rule {
        source: FieldSource::Fallback,
        extract: kind_category,
    },
];

fn resolve(rules: &[Rule], sources: &Sources<'_>) -> Option<(String, FieldSource)> {
    rules.iter().find_map(|rule| {
        (rule.extract)(sources)
            .filter(|value| !value.trim().is_empty())
            .map(|value| (value, rule.source))
    })
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn tag_genre(s: &Sources<'_>) -> Option<String> {
    normalize_genre(&s.probe.genre)
}

fn path_genre(s: &Sources<'_>) -> Option<String> {
    s.path.genre.as_deref().and_then(normalize_genre)
}

fn tag_year(s: &Sources<'_>) -> Option<String> {
    let raw = s.probe.year.trim();
    year_from_tag(raw).or_else(|| non_empty(raw))
}

fn path_year(s: &Sources<'_>) -> Option<String> {
    s.path.year.clone()
}

fn tag_album(s: &Sources<'_>) -> Option<String> {
    non_empty(&s.probe.album)
}

fn tag_artist(s: &Sources<'_>) -> Option<String> {
    non_empty(&s.probe.artist)
}

fn path_sub_hierarchy(s: &Sources<'_>) -> Option<String> {
    s.path.sub_genre.clone()
}

fn path_category(s: &Sources<'_>) -> Option<String> {
    s.path.main_category.clone()
}

fn kind_category(s: &Sources<'_>) -> Option<String> {
    Some(s.kind.fallback_category().to_string())
}

/// Merges probe output and path-derived fields into one catalog row.
pub fn reconcile(
    facts: &FileFacts<'_>,
    probe: &MediaProbe,
    path: &PathClassification,
) -> Reconciled {
    let sources = Sources {
        kind: facts.kind,
        probe,
        path,
    };
    let mut used_path_metadata = false;
    let mut take = |rules: &[Rule]| match resolve(rules, &sources) {
        Some((value, source)) => {
            if source == FieldSource::Path {
                used_path_metadata = true;
            }
            value
        }
        None => String::new(),
    };

    let genre = take(GENRE_RULES);
    let year = take(YEAR_RULES);
    let (album, actors, contributors) = match facts.kind {
        MediaKind::Audio => (take(ALBUM_RULES), String::new(), probe.artist.trim().to_string()),
        MediaKind::Video => (String::new(), take(ACTOR_RULES), String::new()),
    };
    let category = resolve(CATEGORY_RULES, &sources)
        .map(|(value, _)| value)
        .unwrap_or_else(|| facts.kind.fallback_category().to_string());

    let has_metadata = match facts.kind {
        MediaKind::Audio => !album.is_empty() && !category.is_empty() && !contributors.is_empty(),
        MediaKind::Video => !genre.is_empty() && !year.is_empty(),
    };

    let record = MediaRecord {
        filename: facts
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: facts.key.to_string(),
        parent_folder: facts
            .path
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        kind: Some(facts.kind),
        album,
        track_number: probe.track_number.clone(),
        year,
        genre,
        duration_minutes: probe.duration_minutes.max(0.0),
        contributors,
        actors,
        comment: probe.comment.trim().to_string(),
        category,
        file_size: facts.size,
        bitrate: probe.bitrate,
        video_codec: probe.video_codec.clone(),
        audio_codec: probe.audio_codec.clone(),
        resolution: probe.resolution.clone(),
        frame_rate: probe.frame_rate,
        audio_channels: probe.audio_channels,
        sample_rate: probe.sample_rate,
        has_metadata,
        fingerprint: content_fingerprint(facts.key, facts.size, facts.modified),
        scanned_at: facts.scanned_at,
        modified_at: unix_secs(facts.modified),
    };

    Reconciled {
        record,
        used_path_metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::{reconcile, FileFacts};
    use crate::classify::classify_path;
    use common::MediaKind;
    use metadata::MediaProbe;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, UNIX_EPOCH};

    fn facts<'a>(path: &'a Path, key: &'a str, kind: MediaKind) -> FileFacts<'a> {
        FileFacts {
            path,
            key,
            kind,
            size: 4096,
            modified: UNIX_EPOCH + Duration::from_secs(1_600_000_000),
            scanned_at: 1_700_000_000,
        }
    }

    #[test]
    fn video_falls_back_to_path_fields() {
        let root = Path::new("/media");
        let file: PathBuf = ["/media", "Filme", "Action", "Movie (2015).mp4"].iter().collect();
        let key = file.to_string_lossy().to_string();
        let classification = classify_path(root, &file);
        let out = reconcile(
            &facts(&file, &key, MediaKind::Video),
            &MediaProbe::default(),
            &classification,
        );
        assert_eq!(out.record.category, "Filme");
        assert_eq!(out.record.genre, "Action");
        assert_eq!(out.record.year, "2015");
        assert_eq!(out.record.parent_folder, "Action");
        assert_eq!(out.record.filename, "Movie (2015).mp4");
        assert!(out.record.has_metadata);
        assert!(out.used_path_metadata);
    }

    #[test]
    fn tags_win_over_path() {
        let root = Path::new("/media");
        let file: PathBuf = ["/media", "Musik", "rock", "Live", "01.mp3"].iter().collect();
        let key = file.to_string_lossy().to_string();
        let probe = MediaProbe {
            album: "Greatest Hits".to_string(),
            artist: "The Band".to_string(),
            year: "1999-04-01".to_string(),
            genre: "hip hop".to_string(),
            ..MediaProbe::default()
        };
        let out = reconcile(
            &facts(&file, &key, MediaKind::Audio),
            &probe,
            &classify_path(root, &file),
        );
        assert_eq!(out.record.genre, "Hip-Hop");
        assert_eq!(out.record.year, "1999");
        assert_eq!(out.record.album, "Greatest Hits");
        assert_eq!(out.record.contributors, "The Band");
        assert_eq!(out.record.category, "Musik");
        assert!(out.record.has_metadata);
        assert!(!out.used_path_metadata);
    }

    #[test]
    fn rejected_tag_genre_uses_path_genre() {
        let root = Path::new("/media");
        let file: PathBuf = ["/media", "Musik", "ROCK", "a.mp3"].iter().collect();
        let key = file.to_string_lossy().to_string();
        let probe = MediaProbe {
            genre: "Other".to_string(),
            ..MediaProbe::default()
        };
        let out = reconcile(
            &facts(&file, &key, MediaKind::Audio),
            &probe,
            &classify_path(root, &file),
        );
        assert_eq!(out.record.genre, "Rock");
        assert!(!out.record.has_metadata);
    }

    #[test]
    fn root_level_files_use_kind_category() {
        let root = Path::new("/media");
        let file: PathBuf = ["/media", "clip.mkv"].iter().collect();
        let key = file.to_string_lossy().to_string();
        let out = reconcile(
            &facts(&file, &key, MediaKind::Video),
            &MediaProbe::default(),
            &classify_path(root, &file),
        );
        assert_eq!(out.record.category, "Video");
        assert!(out.record.genre.is_empty());
        assert!(!out.record.has_metadata);
    }

    #[test]
    fn video_actors_prefer_artist_tag_then_sub_hierarchy() {
        let root = Path::new("/media");
        let file: PathBuf = ["/media", "Serien", "Krimi", "Tatort", "folge.mkv"].iter().collect();
        let key = file.to_string_lossy().to_string();
        let classification = classify_path(root, &file);
        let plain = reconcile(
            &facts(&file, &key, MediaKind::Video),
            &MediaProbe::default(),
            &classification,
        );
        assert_eq!(plain.record.actors, "Tatort");

        let tagged = reconcile(
            &facts(&file, &key, MediaKind::Video),
            &MediaProbe {
                artist: "Jane Doe".to_string(),
                ..MediaProbe::default()
            },
            &classification,
        );
        assert_eq!(tagged.record.actors, "Jane Doe");
        assert!(tagged.record.album.is_empty());
    }

    #[test]
    fn audio_album_falls_back_to_joined_sub_hierarchy() {
        let root = Path::new("/media");
        let file: PathBuf = ["/media", "Musik", "Rock", "Artist", "Album", "01.mp3"]
            .iter()
            .collect();
        let key = file.to_string_lossy().to_string();
        let out = reconcile(
            &facts(&file, &key, MediaKind::Audio),
            &MediaProbe::default(),
            &classify_path(root, &file),
        );
        let expected = ["Artist", "Album"].join(std::path::MAIN_SEPARATOR.to_string().as_str());
        assert_eq!(out.record.album, expected);
        assert!(out.used_path_metadata);

        let shallow: PathBuf = ["/media", "Musik", "Rock", "Album", "01.mp3"].iter().collect();
        let key = shallow.to_string_lossy().to_string();
        let out = reconcile(
            &facts(&shallow, &key, MediaKind::Audio),
            &MediaProbe::default(),
            &classify_path(root, &shallow),
        );
        assert_eq!(out.record.album, "Album");
    }
}
