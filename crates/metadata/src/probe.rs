use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::process::{quiet_command, run_with_timeout};
use crate::MetadataError;

const MIN_WIDTH: u32 = 640;
const MIN_HEIGHT: u32 = 360;

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    bit_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    disposition: Disposition,
}

#[derive(Debug, Default, Deserialize)]
struct Disposition {
    #[serde(default)]
    attached_pic: i32,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ContainerTags {
    pub genre: String,
    pub artist: String,
    pub comment: String,
    pub date: String,
}

/// Technical fields of a container file as reported by ffprobe.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VideoInfo {
    pub video_codec: String,
    pub audio_codec: String,
    pub resolution: String,
    pub frame_rate: f64,
    /// Bits per second.
    pub bitrate: u64,
    pub audio_channels: u32,
    pub sample_rate: u32,
    pub tags: ContainerTags,
    /// Duration found in the JSON document, format first then video stream.
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSource {
    Format,
    Stream,
    Container,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationLookup {
    pub seconds: f64,
    pub source: DurationSource,
}

impl DurationLookup {
    pub fn minutes(&self) -> f64 {
        round2(self.seconds / 60.0)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeTool {
    program: PathBuf,
    timeout: Duration,
}

impl ProbeTool {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `ffprobe -version` and returns its first output line.
    pub fn check_available(&self) -> Result<String, MetadataError> {
        let mut command = quiet_command(&self.program);
        command.arg("-version");
        match run_with_timeout(command, self.timeout) {
            Ok(Some(output)) => Ok(output.lines().next().unwrap_or_default().to_string()),
            Ok(None) => Err(MetadataError::ToolUnavailable(format!(
                "{} -version produced no output",
                self.program.display()
            ))),
            Err(err) => Err(MetadataError::ToolUnavailable(format!(
                "{}: {}",
                self.program.display(),
                err
            ))),
        }
    }

    pub fn probe_container(&self, path: &Path) -> Result<Option<VideoInfo>, MetadataError> {
        let mut command = quiet_command(&self.program);
        command
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path);
        match run_with_timeout(command, self.timeout)? {
            Some(text) => Ok(Some(parse_probe_json(&text)?)),
            None => Ok(None),
        }
    }

    /// Dedicated format query, then video stream query, then the value
    /// already parsed from the JSON document. Zero when nothing answers.
    pub fn resolve_duration(&self, path: &Path, container_secs: Option<f64>) -> DurationLookup {
        let format_args = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ];
        if let Some(seconds) = self.query_duration(path, &format_args) {
            return DurationLookup {
                seconds,
                source: DurationSource::Format,
            };
        }

        let stream_args = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ];
        if let Some(seconds) = self.query_duration(path, &stream_args) {
            return DurationLookup {
                seconds,
                source: DurationSource::Stream,
            };
        }

        if let Some(seconds) = container_secs.filter(|s| s.is_finite() && *s > 0.0) {
            return DurationLookup {
                seconds,
                source: DurationSource::Container,
            };
        }

        warn!("No duration found for {:?}", path);
        DurationLookup {
            seconds: 0.0,
            source: DurationSource::Missing,
        }
    }

    fn query_duration(&self, path: &Path, args: &[&str]) -> Option<f64> {
        let mut command = quiet_command(&self.program);
        command.args(args).arg(path);
        match run_with_timeout(command, self.timeout) {
            Ok(Some(text)) => parse_duration(&text),
            Ok(None) => None,
            Err(err) => {
                debug!("Duration query failed for {:?}: {}", path, err);
                None
            }
        }
    }
}

fn parse_probe_json(text: &str) -> Result<VideoInfo, MetadataError> {
    let output: ProbeOutput = serde_json::from_str(text)?;
    let mut info = VideoInfo::default();

    let video = select_video_stream(&output.streams);
    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    if let Some(stream) = video {
        info.video_codec = stream.codec_name.clone().unwrap_or_default();
        if let (Some(width), Some(height)) = (stream.width, stream.height) {
            if width > 0 && height > 0 {
                info.resolution = format!("{}x{}", width, height);
            }
        }
        info.frame_rate = stream
            .r_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0);
    }

    info.bitrate = video
        .and_then(|s| s.bit_rate.as_deref())
        .and_then(parse_u64)
        .or_else(|| output.format.bit_rate.as_deref().and_then(parse_u64))
        .unwrap_or(0);

    if let Some(stream) = audio {
        info.audio_codec = stream.codec_name.clone().unwrap_or_default();
        info.audio_channels = stream.channels.unwrap_or(0);
        info.sample_rate = stream
            .sample_rate
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
    }

    info.tags = ContainerTags {
        genre: tag_value(&output.format.tags, "genre"),
        artist: tag_value(&output.format.tags, "artist"),
        comment: tag_value(&output.format.tags, "comment"),
        date: tag_value(&output.format.tags, "date"),
    };

    let first_video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    info.duration_secs = output
        .format
        .duration
        .as_deref()
        .and_then(parse_duration)
        .or_else(|| first_video.and_then(|s| s.duration.as_deref()).and_then(parse_duration));

    Ok(info)
}

/// Skips attached cover pictures and prefers the first stream of at least
/// 640x360; smaller streams are only used when nothing larger exists.
fn select_video_stream(streams: &[ProbeStream]) -> Option<&ProbeStream> {
    let mut fallback = None;
    for stream in streams {
        if stream.codec_type.as_deref() != Some("video") {
            continue;
        }
        if stream.codec_name.as_deref() == Some("mjpeg") && stream.disposition.attached_pic == 1 {
            continue;
        }
        let width = stream.width.unwrap_or(0);
        let height = stream.height.unwrap_or(0);
        if width > 0 && height > 0 && (width < MIN_WIDTH || height < MIN_HEIGHT) {
            if fallback.is_none() {
                fallback = Some(stream);
            }
            continue;
        }
        return Some(stream);
    }
    fallback
}

fn tag_value(tags: &HashMap<String, String>, key: &str) -> String {
    tags.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_default()
}

fn parse_frame_rate(text: &str) -> f64 {
    let mut parts = text.trim().splitn(2, '/');
    let num: f64 = match parts.next().and_then(|v| v.trim().parse().ok()) {
        Some(num) => num,
        None => return 0.0,
    };
    let den: f64 = match parts.next() {
        Some(den) => match den.trim().parse() {
            Ok(den) => den,
            Err(_) => return 0.0,
        },
        None => 1.0,
    };
    if den > 0.0 && num.is_finite() {
        round2(num / den)
    } else {
        0.0
    }
}

fn parse_duration(text: &str) -> Option<f64> {
    let first = text.lines().next()?.trim();
    if first.is_empty() || first.eq_ignore_ascii_case("N/A") {
        return None;
    }
    let seconds: f64 = first.parse().ok()?;
    if seconds.is_finite() && seconds > 0.0 {
        Some(seconds)
    } else {
        None
    }
}

fn parse_u64(text: &str) -> Option<u64> {
    text.trim().parse().ok()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{parse_duration, parse_frame_rate, parse_probe_json, DurationSource, ProbeTool};
    use std::path::Path;
    use std::time::Duration;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "mjpeg", "width": 600, "height": 600,
             "disposition": {"attached_pic": 1}},
            {"codec_type": "video", "codec_name": "h264", "width": 320, "height": 240,
             "r_frame_rate": "25/1", "bit_rate": "300000", "disposition": {"attached_pic": 0}},
            {"codec_type": "video", "codec_name": "hevc", "width": 1920, "height": 1080,
             "r_frame_rate": "30000/1001", "duration": "61.5"},
            {"codec_type": "audio", "codec_name": "aac", "channels": 6, "sample_rate": "48000"},
            {"codec_type": "audio", "codec_name": "ac3", "channels": 2, "sample_rate": "44100"}
        ],
        "format": {"duration": "5400.25", "bit_rate": "4500000",
                   "tags": {"GENRE": "Action", "artist": "Some Actor", "date": "2015-06-01"}}
    }"#;

    #[test]
    fn picks_full_size_stream_over_thumbnail_and_cover() {
        let info = parse_probe_json(SAMPLE).unwrap();
        assert_eq!(info.video_codec, "hevc");
        assert_eq!(info.resolution, "1920x1080");
        assert_eq!(info.frame_rate, 29.97);
        assert_eq!(info.audio_codec, "aac");
        assert_eq!(info.audio_channels, 6);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.tags.genre, "Action");
        assert_eq!(info.tags.artist, "Some Actor");
        assert_eq!(info.tags.date, "2015-06-01");
        assert_eq!(info.duration_secs, Some(5400.25));
    }

    #[test]
    fn bitrate_falls_back_to_container() {
        let info = parse_probe_json(SAMPLE).unwrap();
        assert_eq!(info.bitrate, 4_500_000);
    }

    #[test]
    fn small_stream_is_used_when_nothing_larger_exists() {
        let json = r#"{"streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 320, "height": 240,
             "r_frame_rate": "25/1", "bit_rate": "300000"}
        ], "format": {}}"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.resolution, "320x240");
        assert_eq!(info.bitrate, 300_000);
        assert_eq!(info.duration_secs, None);
    }

    #[test]
    fn frame_rate_guards_zero_denominator() {
        assert_eq!(parse_frame_rate("0/0"), 0.0);
        assert_eq!(parse_frame_rate("24/1"), 24.0);
        assert_eq!(parse_frame_rate("garbage"), 0.0);
    }

    #[test]
    fn duration_rejects_unusable_values() {
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("-3.0"), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("12.5\n"), Some(12.5));
    }

    #[test]
    fn missing_tool_resolves_to_zero() {
        let tool = ProbeTool::new("definitely-not-a-real-probe-binary", Duration::from_secs(2));
        let lookup = tool.resolve_duration(Path::new("/nowhere/movie.mkv"), None);
        assert_eq!(lookup.seconds, 0.0);
        assert_eq!(lookup.source, DurationSource::Missing);

        let lookup = tool.resolve_duration(Path::new("/nowhere/movie.mkv"), Some(90.0));
        assert_eq!(lookup.source, DurationSource::Container);
        assert_eq!(lookup.minutes(), 1.5);
    }

    #[test]
    fn missing_tool_fails_availability_check() {
        let tool = ProbeTool::new("definitely-not-a-real-probe-binary", Duration::from_secs(2));
        assert!(tool.check_available().is_err());
    }
}
