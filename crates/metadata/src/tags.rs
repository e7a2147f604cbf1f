use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

use crate::MetadataError;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub album: String,
    pub artist: String,
    pub track_number: String,
    pub year: String,
    pub genre: String,
    pub comment: String,
    pub duration_secs: f64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AudioQuality {
    /// Bits per second.
    pub bitrate: u64,
    pub sample_rate: u32,
    pub channels: u32,
    pub codec: String,
}

#[derive(Debug, Default, Clone)]
pub struct AudioRead {
    pub tags: TagInfo,
    pub quality: AudioQuality,
}

pub fn read_tags(path: &Path) -> Result<AudioRead, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut read = AudioRead::default();
    read.tags.duration_secs = properties.duration().as_secs_f64();

    let kbps = properties
        .audio_bitrate()
        .or(properties.overall_bitrate())
        .unwrap_or(0);
    read.quality = AudioQuality {
        bitrate: u64::from(kbps) * 1000,
        sample_rate: properties.sample_rate().unwrap_or(0),
        channels: properties.channels().map(u32::from).unwrap_or(0),
        codec: codec_label(path),
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        let text = |key: &ItemKey| {
            tag.get_string(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        read.tags.album = text(&ItemKey::AlbumTitle);
        read.tags.artist = text(&ItemKey::TrackArtist);
        if read.tags.artist.is_empty() {
            read.tags.artist = text(&ItemKey::AlbumArtist);
        }
        read.tags.track_number = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_track)
            .unwrap_or_default();
        read.tags.year = text(&ItemKey::Year);
        if read.tags.year.is_empty() {
            read.tags.year = text(&ItemKey::RecordingDate);
        }
        read.tags.genre = text(&ItemKey::Genre);
        read.tags.comment = text(&ItemKey::Comment);
    }

    Ok(read)
}

/// Reads tags on a helper thread, giving up after `timeout`. An abandoned
/// reader finishes in the background and its result is dropped.
pub fn read_tags_with_timeout(path: &Path, timeout: Duration) -> Result<AudioRead, MetadataError> {
    let owned: PathBuf = path.to_path_buf();
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("tag-reader".to_string())
        .spawn(move || {
            let _ = tx.send(read_tags(&owned));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(MetadataError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(MetadataError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "tag reader exited without a result",
        ))),
    }
}

fn codec_label(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn parse_track(text: &str) -> Option<String> {
    let head = text.split('/').next().unwrap_or(text).trim();
    let number: u16 = head.parse().ok()?;
    Some(number.to_string())
}

/// First run of four digits, e.g. "2015-03-01" -> "2015".
pub fn year_from_tag(text: &str) -> Option<String> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                return Some(digits);
            }
        } else {
            digits.clear();
        }
    }
    None
}
