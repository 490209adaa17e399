//! Thin wrappers over the ffmpeg and ffprobe command-line tools.

mod ffmpeg;
mod probe;

pub use ffmpeg::{capture_stdout, run, FfmpegError, FfmpegProcess};
pub use probe::{duration_or, parse_probe_output, probe, MediaInfo};
