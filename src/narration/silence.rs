//! Silent MP3 writer.
//!
//! Emits MPEG-1 Layer III frames (32 kbps, 44.1 kHz, mono) whose side info
//! and main data are all zero, which every decoder plays back as silence.

use std::path::Path;

/// Frame header: sync, MPEG-1, Layer III, no CRC, 32 kbps, 44.1 kHz, mono.
pub const SILENT_FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x10, 0xC0];

/// `144 * 32000 / 44100`, no padding.
pub const SILENT_FRAME_LEN: usize = 104;

const SAMPLES_PER_FRAME: f64 = 1152.0;
const SAMPLE_RATE: f64 = 44_100.0;

/// Seconds of audio carried by one frame.
pub fn frame_duration_secs() -> f64 {
    SAMPLES_PER_FRAME / SAMPLE_RATE
}

/// Number of frames needed to cover at least `seconds`.
pub fn frames_for(seconds: f64) -> usize {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    ((seconds / frame_duration_secs()).ceil() as usize).max(1)
}

/// Encoded silent MP3 covering at least `seconds`.
pub fn silent_mp3(seconds: f64) -> Vec<u8> {
    let mut frame = [0u8; SILENT_FRAME_LEN];
    frame[..4].copy_from_slice(&SILENT_FRAME_HEADER);

    let count = frames_for(seconds);
    let mut out = Vec::with_capacity(count * SILENT_FRAME_LEN);
    for _ in 0..count {
        out.extend_from_slice(&frame);
    }
    out
}

/// Write a silent MP3 of at least `seconds` to `dest`.
pub fn write_silent_mp3(dest: &Path, seconds: f64) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, silent_mp3(seconds))
}
