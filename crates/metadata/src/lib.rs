use std::path::Path;
use std::time::Duration;

use common::MediaKind;
use lofty::error::LoftyError;
use tracing::{debug, warn};

mod probe;
mod process;
mod tags;

pub use probe::{ContainerTags, DurationLookup, DurationSource, ProbeTool, VideoInfo};
pub use tags::{read_tags, read_tags_with_timeout, year_from_tag, AudioQuality, AudioRead, TagInfo};

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Json(serde_json::Error),
    Timeout(Duration),
    ToolUnavailable(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Json(err) => write!(f, "probe output error: {}", err),
            MetadataError::Timeout(after) => write!(f, "timed out after {:?}", after),
            MetadataError::ToolUnavailable(reason) => {
                write!(f, "probe tool unavailable: {}", reason)
            }
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub tool: ProbeTool,
    pub tag_timeout: Duration,
}

/// Everything the probe stage learned about one file. Empty strings and
/// zeros stand for "unknown".
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MediaProbe {
    pub album: String,
    pub artist: String,
    pub track_number: String,
    pub year: String,
    pub genre: String,
    pub comment: String,
    pub duration_minutes: f64,
    pub bitrate: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub resolution: String,
    pub frame_rate: f64,
    pub audio_channels: u32,
    pub sample_rate: u32,
    /// Failed or timed-out reads while probing this file.
    pub errors: u32,
    pub duration_missing: bool,
}

/// Probes one file. Failures are logged and counted in `errors`, never
/// returned.
pub fn probe_media(path: &Path, kind: MediaKind, settings: &ProbeSettings) -> MediaProbe {
    match kind {
        MediaKind::Audio => probe_audio(path, settings),
        MediaKind::Video => probe_video(path, settings),
    }
}

fn probe_audio(path: &Path, settings: &ProbeSettings) -> MediaProbe {
    let mut out = MediaProbe::default();
    let mut duration_secs = 0.0;
    match read_tags_with_timeout(path, settings.tag_timeout) {
        Ok(read) => {
            out.album = read.tags.album;
            out.artist = read.tags.artist;
            out.track_number = read.tags.track_number;
            out.year = read.tags.year;
            out.genre = read.tags.genre;
            out.comment = read.tags.comment;
            out.bitrate = read.quality.bitrate;
            out.sample_rate = read.quality.sample_rate;
            out.audio_channels = read.quality.channels;
            out.audio_codec = read.quality.codec;
            duration_secs = read.tags.duration_secs;
        }
        Err(err) => {
            debug!("Tag read failed for {:?}: {}", path, err);
            out.errors += 1;
        }
    }

    if duration_secs > 0.0 {
        out.duration_minutes = probe::round2(duration_secs / 60.0);
    } else {
        let lookup = settings.tool.resolve_duration(path, None);
        out.duration_minutes = lookup.minutes();
        out.duration_missing = lookup.source == DurationSource::Missing;
    }
    out
}

fn probe_video(path: &Path, settings: &ProbeSettings) -> MediaProbe {
    let mut out = MediaProbe::default();
    let mut container_secs = None;
    match settings.tool.probe_container(path) {
        Ok(Some(info)) => {
            out.video_codec = info.video_codec;
            out.audio_codec = info.audio_codec;
            out.resolution = info.resolution;
            out.frame_rate = info.frame_rate;
            out.bitrate = info.bitrate;
            out.audio_channels = info.audio_channels;
            out.sample_rate = info.sample_rate;
            out.genre = info.tags.genre;
            out.artist = info.tags.artist;
            out.comment = info.tags.comment;
            out.year = info.tags.date;
            container_secs = info.duration_secs;
        }
        Ok(None) => {
            debug!("Probe returned no data for {:?}", path);
            out.errors += 1;
        }
        Err(err) => {
            warn!("Probe failed for {:?}: {}", path, err);
            out.errors += 1;
        }
    }

    let lookup = settings.tool.resolve_duration(path, container_secs);
    out.duration_minutes = lookup.minutes();
    out.duration_missing = lookup.source == DurationSource::Missing;
    out
}
