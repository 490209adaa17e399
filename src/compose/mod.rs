//! Video composition: per-scene media and narration -> one encoded video.
//!
//! Each scene becomes a video-only segment at a shared canvas size. Stills
//! are rendered frame by frame with camera motion and piped to ffmpeg as raw
//! RGB; clips are looped and cut. Narration is laid out on one audio track
//! with the same per-scene durations, then muxed with the concatenated
//! segments.

pub mod motion;

pub use motion::{progress, CropWindow, MotionStyle, ROTATION};

use std::path::{Path, PathBuf};

use crate::assets;
use crate::config::VideoConfig;
use crate::media::{self, FfmpegError, FfmpegProcess};
use crate::narration;

/// Silence appended after each narration.
pub const SCENE_TAIL_SECS: f64 = 0.5;

/// Shortest segment ever produced.
pub const MIN_SCENE_SECS: f64 = 1.0;

const AUDIO_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Got {media} media files but {audio} narration files")]
    CountMismatch { media: usize, audio: usize },

    #[error("No scenes to compose")]
    NoScenes,

    #[error("Media for scene {index} not found: {}", path.display())]
    MissingMedia { index: usize, path: PathBuf },

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("Could not read image: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns ordered scene media and narration into a single video.
pub trait VideoComposer: Send + Sync {
    /// `media[i]` and `audio[i]` belong to scene `i + 1`. Blocking.
    fn compose(&self, media: &[PathBuf], audio: &[PathBuf], output: &Path, motion: bool)
        -> Result<PathBuf, ComposeError>;
}

/// Segment length for a narration of `audio_secs`.
pub fn scene_duration(audio_secs: f64) -> f64 {
    (audio_secs + SCENE_TAIL_SECS).max(MIN_SCENE_SECS)
}

/// Reject inputs that cannot produce a video.
pub fn validate_inputs(media: &[PathBuf], audio: &[PathBuf]) -> Result<(), ComposeError> {
    if media.len() != audio.len() {
        return Err(ComposeError::CountMismatch {
            media: media.len(),
            audio: audio.len(),
        });
    }
    if media.is_empty() {
        return Err(ComposeError::NoScenes);
    }
    for (i, path) in media.iter().enumerate() {
        if !path.is_file() {
            return Err(ComposeError::MissingMedia {
                index: i + 1,
                path: path.clone(),
            });
        }
    }
    Ok(())
}

/// Frames needed to cover `duration` at `fps`; at least one.
pub fn frame_count(duration: f64, fps: u32) -> u64 {
    ((duration * fps as f64).round() as u64).max(1)
}

/// `duration` snapped to a whole number of frames, so audio and video agree.
pub fn aligned_duration(duration: f64, fps: u32) -> f64 {
    let fps = fps.max(1);
    frame_count(duration, fps) as f64 / fps as f64
}

/// Round a dimension up to the next even number (yuv420p needs it).
pub fn even(dim: u32) -> u32 {
    dim + (dim % 2)
}

/// Quote a path for an ffmpeg concat list.
pub fn concat_entry(path: &Path) -> String {
    format!("file '{}'\n", path.display().to_string().replace('\'', "'\\''"))
}

/// One scene as the composer sees it.
#[derive(Debug, Clone)]
struct Clip {
    media: PathBuf,
    audio: Option<PathBuf>,
    duration: f64,
}

/// Segment directory that is removed however the compose call ends.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> std::io::Result<Self> {
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            log::debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// Intermediate file that is removed however the compose call ends.
struct TempFile {
    path: PathBuf,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// Per-scene audio chain: resample, pad with silence, cut to the scene, then
/// concatenate every scene into `[aout]`.
fn audio_filter_graph(clips: &[Clip]) -> String {
    let mut filter = String::new();
    for (i, clip) in clips.iter().enumerate() {
        filter.push_str(&format!(
            "[{i}:a]aresample={rate},aformat=sample_fmts=fltp:channel_layouts=stereo,apad,atrim=0:{d:.3},asetpts=PTS-STARTPTS[a{i}];",
            i = i,
            rate = AUDIO_SAMPLE_RATE,
            d = clip.duration
        ));
    }
    for i in 0..clips.len() {
        filter.push_str(&format!("[a{}]", i));
    }
    filter.push_str(&format!("concat=n={}:v=0:a=1[aout]", clips.len()));
    filter
}

fn mux_args(concat_list: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        concat_list.display().to_string(),
        "-i".into(),
        audio.display().to_string(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.display().to_string(),
    ]
}

/// Composer backed by the ffmpeg command line.
pub struct FfmpegComposer {
    ffmpeg: String,
    ffprobe: String,
    fps: u32,
    video_codec: String,
    audio_codec: String,
}

impl FfmpegComposer {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            fps: config.fps.max(1),
            video_codec: config.video_codec.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }

    fn media_dimensions(&self, path: &Path) -> Result<(u32, u32), ComposeError> {
        if assets::is_video(path) {
            let info = media::probe(&self.ffprobe, path)?;
            match (info.width, info.height) {
                (Some(w), Some(h)) => Ok((w, h)),
                _ => Err(FfmpegError::InvalidOutput(format!("no video stream in {}", path.display())).into()),
            }
        } else {
            Ok(image::image_dimensions(path)?)
        }
    }

    fn canvas(&self, clips: &[Clip]) -> Result<(u32, u32), ComposeError> {
        let mut canvas = (0, 0);
        for clip in clips {
            let (w, h) = self.media_dimensions(&clip.media)?;
            canvas = (canvas.0.max(w), canvas.1.max(h));
        }
        Ok((even(canvas.0.max(2)), even(canvas.1.max(2))))
    }

    fn pad_filter(&self, canvas: (u32, u32)) -> String {
        format!(
            "pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,format=yuv420p",
            w = canvas.0,
            h = canvas.1
        )
    }

    fn video_output_args(&self, dest: &Path) -> Vec<String> {
        vec![
            "-r".into(),
            self.fps.to_string(),
            "-c:v".into(),
            self.video_codec.clone(),
            "-preset".into(),
            "veryfast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-an".into(),
            dest.display().to_string(),
        ]
    }

    /// Render a still with motion into a segment.
    fn render_still(&self, clip: &Clip, style: MotionStyle, canvas: (u32, u32), dest: &Path) -> Result<(), ComposeError> {
        let source = image::open(&clip.media)?.to_rgb8();
        let (width, height) = source.dimensions();

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", width, height),
            "-r".into(),
            self.fps.to_string(),
            "-i".into(),
            "-".into(),
            "-vf".into(),
            self.pad_filter(canvas),
        ];
        args.extend(self.video_output_args(dest));

        let mut process = FfmpegProcess::spawn_with_stdin(&self.ffmpeg, &args)?;
        let frames = frame_count(clip.duration, self.fps);
        for i in 0..frames {
            let t = i as f64 / self.fps as f64;
            let frame = style.apply(&source, progress(t, clip.duration));
            if let Err(e) = process.write_frame(frame.as_raw()) {
                // A dead encoder explains itself better than the broken pipe.
                return Err(process.finish().err().unwrap_or(e).into());
            }
        }
        process.finish()?;
        Ok(())
    }

    /// Loop a clip from the start and cut it to the scene duration.
    fn video_segment_args(&self, clip: &Clip, canvas: (u32, u32), dest: &Path) -> Vec<String> {
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,{pad},fps={fps}",
            w = canvas.0,
            h = canvas.1,
            pad = self.pad_filter(canvas),
            fps = self.fps
        );
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-stream_loop".into(),
            "-1".into(),
            "-i".into(),
            clip.media.display().to_string(),
            "-t".into(),
            format!("{:.3}", clip.duration),
            "-vf".into(),
            filter,
        ];
        args.extend(self.video_output_args(dest));
        args
    }

    fn render_video(&self, clip: &Clip, canvas: (u32, u32), dest: &Path) -> Result<(), ComposeError> {
        media::run(&self.ffmpeg, &self.video_segment_args(clip, canvas, dest))?;
        Ok(())
    }

    /// Lay every narration out on one track, each padded with silence to its
    /// scene duration. Scenes without audio get a silent source at the same
    /// input index.
    fn audio_args(&self, clips: &[Clip], dest: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into()];
        for clip in clips {
            match &clip.audio {
                Some(audio) => {
                    args.push("-i".into());
                    args.push(audio.display().to_string());
                }
                None => {
                    args.extend([
                        "-f".into(),
                        "lavfi".into(),
                        "-t".into(),
                        format!("{:.3}", clip.duration),
                        "-i".into(),
                        format!("anullsrc=r={}:cl=stereo", AUDIO_SAMPLE_RATE),
                    ]);
                }
            }
        }
        args.extend([
            "-filter_complex".into(),
            audio_filter_graph(clips),
            "-map".into(),
            "[aout]".into(),
            "-c:a".into(),
            self.audio_codec.clone(),
            "-b:a".into(),
            "192k".into(),
            dest.display().to_string(),
        ]);
        args
    }

    fn render_audio(&self, clips: &[Clip], dest: &Path) -> Result<(), ComposeError> {
        media::run(&self.ffmpeg, &self.audio_args(clips, dest))?;
        Ok(())
    }

    fn mux(&self, concat_list: &Path, audio: &Path, output: &Path) -> Result<(), ComposeError> {
        media::run(&self.ffmpeg, &mux_args(concat_list, audio, output))?;
        Ok(())
    }
}

impl VideoComposer for FfmpegComposer {
    fn compose(
        &self,
        media: &[PathBuf],
        audio: &[PathBuf],
        output: &Path,
        motion: bool,
    ) -> Result<PathBuf, ComposeError> {
        validate_inputs(media, audio)?;

        let clips: Vec<Clip> = media
            .iter()
            .zip(audio)
            .map(|(media, audio)| {
                let (audio, secs) = if audio.is_file() {
                    (Some(audio.clone()), narration::audio_duration(&self.ffprobe, audio))
                } else {
                    log::warn!("Narration {} missing, scene will be silent", audio.display());
                    (None, narration::DEFAULT_AUDIO_DURATION_SECS)
                };
                Clip {
                    media: media.clone(),
                    audio,
                    duration: aligned_duration(scene_duration(secs), self.fps),
                }
            })
            .collect();

        let canvas = self.canvas(&clips)?;
        log::info!("Composing {} scenes at {}x{}", clips.len(), canvas.0, canvas.1);

        let out_dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&out_dir)?;
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        let scratch = ScratchDir::create(out_dir.join(format!(".{}_segments", stem)))?;
        let mut concat_list = String::new();

        for (i, clip) in clips.iter().enumerate() {
            let segment = scratch.path.join(format!("segment_{:03}.mp4", i + 1));
            if assets::is_video(&clip.media) {
                log::info!("Scene {}/{}: clip, {:.1}s", i + 1, clips.len(), clip.duration);
                self.render_video(clip, canvas, &segment)?;
            } else {
                let style = MotionStyle::for_scene(i, motion);
                log::info!("Scene {}/{}: {:?}, {:.1}s", i + 1, clips.len(), style, clip.duration);
                self.render_still(clip, style, canvas, &segment)?;
            }
            concat_list.push_str(&concat_entry(&segment.canonicalize()?));
        }

        let list_path = scratch.path.join("concat.txt");
        std::fs::write(&list_path, concat_list)?;

        let temp_audio = TempFile {
            path: out_dir.join(format!("{}_temp_audio.m4a", stem)),
        };
        self.render_audio(&clips, &temp_audio.path)?;
        self.mux(&list_path, &temp_audio.path, output)?;

        log::info!("Video written to {}", output.display());
        Ok(output.to_path_buf())
    }
}
