//! Deterministic placeholder stills rendered with a built-in bitmap font.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::{Rgb, RgbImage};

use super::{ImageBackend, ImageError, ImageRequest};

pub const BACKGROUND: Rgb<u8> = Rgb([30, 30, 45]);
const TITLE_COLOR: Rgb<u8> = Rgb([220, 220, 230]);
const CAPTION_COLOR: Rgb<u8> = Rgb([180, 180, 200]);

/// Captions longer than this are cut and suffixed with `...`.
pub const MAX_CAPTION_CHARS: usize = 80;

const GLYPH_SIZE: u32 = 8;

/// Shorten a caption to [`MAX_CAPTION_CHARS`] characters plus `...`.
pub fn short_caption(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > MAX_CAPTION_CHARS {
        let head: String = text.chars().take(MAX_CAPTION_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn glyph(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE * scale
}

/// Largest scale up to `preferred` at which `text` fits in `max_width`.
fn fit_scale(text: &str, preferred: u32, max_width: u32) -> u32 {
    let mut scale = preferred.max(1);
    while scale > 1 && text_width(text, scale) > max_width {
        scale -= 1;
    }
    scale
}

/// Greedy word wrap to at most `max_chars` per line; long words are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn draw_text(canvas: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    let scale = scale as i64;

    for (index, c) in text.chars().enumerate() {
        let origin_x = x + index as i64 * GLYPH_SIZE as i64 * scale;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_SIZE as i64 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as i64 * scale + dy;
                        if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}

/// Render a title and a caption centered on a solid background.
pub fn render(title: &str, caption: &str, width: u32, height: u32) -> RgbImage {
    let width = width.max(1);
    let height = height.max(1);
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);

    let usable = (width as f64 * 0.9) as u32;
    let title_scale = fit_scale(title, height / 96, usable);
    let caption_scale = (height / 192).max(1).min(title_scale.max(1));
    let chars_per_line = (usable / (GLYPH_SIZE * caption_scale)).max(1) as usize;
    let caption = short_caption(caption);
    let lines = wrap(&caption, chars_per_line);

    let title_h = (GLYPH_SIZE * title_scale) as i64;
    let line_h = (GLYPH_SIZE * caption_scale + caption_scale * 4) as i64;
    let gap = if lines.is_empty() { 0 } else { title_h / 2 + 8 };
    let block_h = title_h + gap + line_h * lines.len() as i64;
    let mut y = (height as i64 - block_h) / 2;

    let x = (width as i64 - text_width(title, title_scale) as i64) / 2;
    draw_text(&mut canvas, title, x, y, title_scale, TITLE_COLOR);
    y += title_h + gap;

    for line in &lines {
        let x = (width as i64 - text_width(line, caption_scale) as i64) / 2;
        draw_text(&mut canvas, line, x, y, caption_scale, CAPTION_COLOR);
        y += line_h;
    }

    canvas
}

/// Render a placeholder and write it as PNG, creating parent directories.
pub fn write_placeholder(title: &str, caption: &str, dest: &Path, width: u32, height: u32) -> Result<PathBuf, ImageError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    render(title, caption, width, height).save_with_format(dest, image::ImageFormat::Png)?;
    Ok(dest.to_path_buf())
}

/// Backend that never calls out and only draws placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderBackend;

#[async_trait]
impl ImageBackend for PlaceholderBackend {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn generate(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<(), ImageError> {
        write_placeholder(request.title, request.caption, dest, request.width, request.height)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_caption() {
        assert_eq!(short_caption("short"), "short");
        let long = "x".repeat(100);
        let cut = short_caption(&long);
        assert_eq!(cut.chars().count(), 83);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_render_dimensions_and_background() {
        let img = render("Scene 1", "A lighthouse", 320, 180);
        assert_eq!(img.dimensions(), (320, 180));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert!(img.pixels().any(|p| *p == TITLE_COLOR));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render("Scene 2", "Rain on the window", 200, 120);
        let b = render("Scene 2", "Rain on the window", 200, 120);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_render_handles_odd_content() {
        let long = "y".repeat(5000);
        for caption in ["", "日本語のテキスト 🎬", long.as_str(), "\n\t\r"] {
            let img = render("Scene 9", caption, 64, 36);
            assert_eq!(img.dimensions(), (64, 36));
        }
        let tiny = render("", "", 0, 0);
        assert_eq!(tiny.dimensions(), (1, 1));
    }

    #[test]
    fn test_wrap_respects_width() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 10);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(lines.join(" "), "the quick brown fox jumps over the lazy dog");

        let split = wrap("abcdefghijkl", 5);
        assert_eq!(split, vec!["abcde", "fghij", "kl"]);
    }

    #[test]
    fn test_write_placeholder_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("scene_001.png");
        let path = write_placeholder("Scene 1", "desc", &dest, 160, 90).unwrap();
        assert_eq!(path, dest);
        let decoded = image::open(&dest).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 90));
    }
}
