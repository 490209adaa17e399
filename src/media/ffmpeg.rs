//! FFmpeg process management.
//!
//! Spawns ffmpeg (or ffprobe), drains stderr on a background thread, and
//! guarantees the child is gone when the handle is dropped.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

/// Lines of stderr kept in a `ProcessFailed` error.
const STDERR_TAIL_LINES: usize = 20;

/// Errors that can occur while running media tools
#[derive(Debug)]
pub enum FfmpegError {
    /// Executable not found on PATH
    FfmpegNotFound(String),
    /// Failed to spawn the process
    SpawnFailed(std::io::Error),
    /// Process exited with non-zero status
    ProcessFailed { exit_code: Option<i32>, stderr: String },
    /// Output could not be understood (ffprobe JSON)
    InvalidOutput(String),
    /// I/O error while talking to the process
    IoError(std::io::Error),
}

impl std::fmt::Display for FfmpegError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FfmpegError::FfmpegNotFound(program) => {
                write!(
                    f,
                    "{} not found. Please install FFmpeg, e.g.:\n\n    brew install ffmpeg\n    sudo apt install ffmpeg\n",
                    program
                )
            }
            FfmpegError::SpawnFailed(e) => write!(f, "Failed to spawn FFmpeg: {}", e),
            FfmpegError::ProcessFailed { exit_code, stderr } => {
                write!(f, "FFmpeg exited with code {:?}\n{}", exit_code, stderr)
            }
            FfmpegError::InvalidOutput(message) => write!(f, "Unexpected ffprobe output: {}", message),
            FfmpegError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for FfmpegError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FfmpegError::SpawnFailed(e) | FfmpegError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FfmpegError {
    fn from(e: std::io::Error) -> Self {
        FfmpegError::IoError(e)
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> FfmpegError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FfmpegError::FfmpegNotFound(program.to_string())
    } else {
        FfmpegError::SpawnFailed(e)
    }
}

/// A running ffmpeg process.
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_thread: Option<JoinHandle<Vec<String>>>,
}

impl FfmpegProcess {
    /// Spawn `program` with `args` and no stdin.
    pub fn spawn<S: AsRef<std::ffi::OsStr>>(program: &str, args: &[S]) -> Result<Self, FfmpegError> {
        Self::spawn_inner(program, args, false)
    }

    /// Spawn `program` with a piped stdin for raw frame input.
    pub fn spawn_with_stdin<S: AsRef<std::ffi::OsStr>>(program: &str, args: &[S]) -> Result<Self, FfmpegError> {
        Self::spawn_inner(program, args, true)
    }

    fn spawn_inner<S: AsRef<std::ffi::OsStr>>(program: &str, args: &[S], piped_stdin: bool) -> Result<Self, FfmpegError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if piped_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
        let stdin = child.stdin.take();

        let stderr = child.stderr.take();
        let stderr_thread = stderr.map(|stderr| {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                let mut lines = Vec::new();
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            log::trace!("[ffmpeg] {}", l);
                            lines.push(l);
                        }
                        Err(_) => break,
                    }
                }
                lines
            })
        });

        Ok(FfmpegProcess {
            child,
            stdin,
            stderr_thread,
        })
    }

    /// Write one chunk (usually a raw frame) to the process stdin.
    pub fn write_frame(&mut self, data: &[u8]) -> Result<(), FfmpegError> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data).map_err(FfmpegError::IoError),
            None => Err(FfmpegError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin is not piped",
            ))),
        }
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to complete and return the exit status.
    pub fn wait(&mut self) -> Result<ExitStatus, FfmpegError> {
        self.stdin.take();
        self.child.wait().map_err(FfmpegError::IoError)
    }

    /// Get the collected stderr output after the process has finished.
    pub fn take_stderr_output(&mut self) -> Vec<String> {
        self.stderr_thread
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }

    /// Close stdin, wait, and turn a non-zero exit into `ProcessFailed`.
    pub fn finish(mut self) -> Result<(), FfmpegError> {
        let status = self.wait()?;
        let stderr = self.take_stderr_output();
        if status.success() {
            return Ok(());
        }

        let start = stderr.len().saturating_sub(STDERR_TAIL_LINES);
        Err(FfmpegError::ProcessFailed {
            exit_code: status.code(),
            stderr: stderr[start..].join("\n"),
        })
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        // Never leave an encoder behind on early return.
        self.stdin.take();
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Run a media tool to completion.
pub fn run<S: AsRef<std::ffi::OsStr>>(program: &str, args: &[S]) -> Result<(), FfmpegError> {
    log::debug!(
        "{} {}",
        program,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );
    FfmpegProcess::spawn(program, args)?.finish()
}

/// Run a tool and capture stdout (used for ffprobe).
pub fn capture_stdout<S: AsRef<std::ffi::OsStr>>(program: &str, args: &[S]) -> Result<String, FfmpegError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(program, e))?;

    if !output.status.success() {
        return Err(FfmpegError::ProcessFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
