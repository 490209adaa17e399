//! Asset naming and rediscovery on disk.
//!
//! Every generated file is named by its 1-based scene index so a later run
//! (or a human) can find it again. Listing uses a natural-numeric sort:
//! `scene_2` comes before `scene_10`.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Extensions accepted as still images, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Extensions treated as motion clips by the composer, lowercase.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "webm"];

/// Extensions accepted as narration audio, lowercase.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg"];

/// Name of the per-run working subdirectory under the output directory.
pub const RUN_DIR_NAME: &str = "run";

/// Subdirectory of the run directory holding character portraits.
pub const CHARACTERS_DIR_NAME: &str = "characters";

/// `scene_007.png`
pub fn scene_image_name(scene_number: u32) -> String {
    format!("scene_{:03}.png", scene_number)
}

/// `narration_007.mp3`
pub fn narration_name(scene_number: u32) -> String {
    format!("narration_{:03}.mp3", scene_number)
}

/// Motion clip path for a scene image: `scene_007.png` -> `scene_007.scene.mp4`.
pub fn scene_clip_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("scene.mp4")
}

/// `character_<sanitized>.png`
pub fn character_portrait_name(name: &str) -> String {
    format!("character_{}.png", sanitize_filename(name))
}

/// Replace every character other than alphanumerics, space, hyphen and
/// underscore with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// One piece of a filename stem: a run of digits or a run of anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StemPiece {
    Text(String),
    Number(u128, String),
}

impl Ord for StemPiece {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (StemPiece::Number(a, a_raw), StemPiece::Number(b, b_raw)) => {
                a.cmp(b).then_with(|| a_raw.cmp(b_raw))
            }
            (StemPiece::Text(a), StemPiece::Text(b)) => a.cmp(b),
            // Digits sort before letters, as they do in plain string order.
            (StemPiece::Number(..), StemPiece::Text(_)) => Ordering::Less,
            (StemPiece::Text(_), StemPiece::Number(..)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for StemPiece {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_stem(stem: &str) -> Vec<StemPiece> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for c in stem.to_lowercase().chars() {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            pieces.push(finish_piece(std::mem::take(&mut current), in_digits));
        }
        in_digits = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        pieces.push(finish_piece(current, in_digits));
    }
    pieces
}

fn finish_piece(raw: String, digits: bool) -> StemPiece {
    if digits {
        // Digit runs too long for u128 still compare sensibly by length first.
        match raw.parse::<u128>() {
            Ok(n) => StemPiece::Number(n, raw),
            Err(_) => StemPiece::Number(u128::MAX, raw),
        }
    } else {
        StemPiece::Text(raw)
    }
}

/// Natural-numeric comparison of two paths by file stem.
pub fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    let stem = |p: &Path| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    split_stem(&stem(a))
        .cmp(&split_stem(&stem(b)))
        .then_with(|| a.cmp(b))
}

/// Sort paths in place by natural-numeric file stem.
pub fn natural_sort(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| natural_cmp(a, b));
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_image(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

pub fn is_video(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

pub fn is_audio(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

/// List regular files in `dir` accepted by `filter`, natural-sorted.
///
/// A missing directory yields an empty list.
pub fn list_sorted<F>(dir: &Path, filter: F) -> Result<Vec<PathBuf>, std::io::Error>
where
    F: Fn(&Path) -> bool,
{
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && filter(&path) {
            files.push(path);
        }
    }
    natural_sort(&mut files);
    Ok(files)
}

/// Images in a user-supplied folder, natural-sorted.
pub fn images_in_folder(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    list_sorted(dir, is_image)
}

fn stem_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().starts_with(prefix))
        .unwrap_or(false)
}

/// Previously generated `scene_*` stills in a run directory.
///
/// Motion clips (`scene_NNN.scene.mp4`) are not images and are skipped.
pub fn discover_scene_images(run_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    list_sorted(run_dir, |p| is_image(p) && stem_starts_with(p, "scene_"))
}

/// Previously generated `narration_*` audio in a run directory.
pub fn discover_narration(run_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    list_sorted(run_dir, |p| is_audio(p) && stem_starts_with(p, "narration_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_natural_sort_numeric_pieces() {
        let mut paths = vec![
            PathBuf::from("scene_10.png"),
            PathBuf::from("scene_2.png"),
            PathBuf::from("scene_1.png"),
        ];
        natural_sort(&mut paths);
        assert_eq!(names(&paths), vec!["scene_1.png", "scene_2.png", "scene_10.png"]);
    }

    #[test]
    fn test_natural_sort_mixed_prefixes() {
        let mut paths = vec![
            PathBuf::from("b1.png"),
            PathBuf::from("a10.png"),
            PathBuf::from("a9.png"),
            PathBuf::from("10.png"),
            PathBuf::from("2.png"),
        ];
        natural_sort(&mut paths);
        assert_eq!(names(&paths), vec!["2.png", "10.png", "a9.png", "a10.png", "b1.png"]);
    }

    #[test]
    fn test_natural_sort_is_case_insensitive() {
        let mut paths = vec![PathBuf::from("Scene_3.png"), PathBuf::from("scene_2.png")];
        natural_sort(&mut paths);
        assert_eq!(names(&paths), vec!["scene_2.png", "Scene_3.png"]);
    }

    #[test]
    fn test_zero_padded_and_plain_numbers_interleave() {
        let mut paths = vec![
            PathBuf::from("scene_010.png"),
            PathBuf::from("scene_9.png"),
            PathBuf::from("scene_001.png"),
        ];
        natural_sort(&mut paths);
        assert_eq!(names(&paths), vec!["scene_001.png", "scene_9.png", "scene_010.png"]);
    }

    #[test]
    fn test_asset_names() {
        assert_eq!(scene_image_name(1), "scene_001.png");
        assert_eq!(narration_name(12), "narration_012.mp3");
        assert_eq!(
            scene_clip_path(Path::new("/run/scene_003.png")),
            PathBuf::from("/run/scene_003.scene.mp4")
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Maya O'Neil"), "Maya O_Neil");
        assert_eq!(sanitize_filename("old-man_2"), "old-man_2");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename("   "), "unnamed");
        assert_eq!(character_portrait_name("Dr. Who"), "character_Dr_ Who.png");
    }

    #[test]
    fn test_extension_checks() {
        assert!(is_image(Path::new("a.PNG")));
        assert!(is_video(Path::new("a.scene.mp4")));
        assert!(!is_image(Path::new("a.scene.mp4")));
        assert!(is_audio(Path::new("narration_001.mp3")));
        assert!(!is_audio(Path::new("notes.txt")));
    }

    #[test]
    fn test_discover_skips_clips_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "scene_010.png",
            "scene_002.png",
            "scene_002.scene.mp4",
            "cover.png",
            "narration_002.mp3",
            "narration_010.mp3",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let images = discover_scene_images(dir.path()).unwrap();
        assert_eq!(names(&images), vec!["scene_002.png", "scene_010.png"]);

        let audio = discover_narration(dir.path()).unwrap();
        assert_eq!(names(&audio), vec!["narration_002.mp3", "narration_010.mp3"]);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let files = images_in_folder(Path::new("/definitely/not/here")).unwrap();
        assert!(files.is_empty());
    }
}
