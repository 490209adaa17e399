//! Media inspection through ffprobe's JSON output.

use std::path::Path;

use serde::Deserialize;

use super::ffmpeg::{capture_stdout, FfmpegError};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FormatInfo>,
    streams: Option<Vec<StreamInfo>>,
}

#[derive(Deserialize)]
struct FormatInfo {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
///
/// Duration comes from the container, then from the first stream that has one.
pub fn parse_probe_output(json: &str) -> Result<MediaInfo, FfmpegError> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| FfmpegError::InvalidOutput(e.to_string()))?;
    let streams = probe.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            streams
                .iter()
                .filter_map(|s| s.duration.as_deref())
                .find_map(|d| d.parse::<f64>().ok())
        })
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(MediaInfo {
        duration_secs,
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
    })
}

/// Probe a media file.
pub fn probe(ffprobe: &str, path: &Path) -> Result<MediaInfo, FfmpegError> {
    let path_arg = path.as_os_str().to_owned();
    let args: Vec<std::ffi::OsString> = vec![
        "-v".into(),
        "quiet".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        path_arg,
    ];
    let stdout = capture_stdout(ffprobe, &args)?;
    parse_probe_output(&stdout)
}

/// Media duration in seconds, or `default` when it cannot be measured.
pub fn duration_or(ffprobe: &str, path: &Path, default: f64) -> f64 {
    match probe(ffprobe, path) {
        Ok(MediaInfo {
            duration_secs: Some(secs),
            ..
        }) => secs,
        Ok(_) => {
            log::warn!("No duration reported for {}, assuming {}s", path.display(), default);
            default
        }
        Err(e) => {
            log::warn!("Could not probe {} ({}), assuming {}s", path.display(), e, default);
            default
        }
    }
}
