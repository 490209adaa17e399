//! Camera motion for still images.
//!
//! A style maps progress `p` in `[0, 1]` to a zoom factor and a pan offset.
//! The frame is conceptually enlarged by the zoom factor and cropped back to
//! its original size; [`MotionStyle::window`] returns that crop expressed in
//! source pixels so the renderer only resamples once per frame.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Peak extra zoom for zoom styles.
pub const SCALE_AMPLITUDE: f64 = 0.15;

/// Peak pan offset as a fraction of the frame size.
pub const PAN_AMPLITUDE: f64 = 0.08;

/// Extra zoom of the gentle Ken Burns used when motion is disabled.
pub const KEN_BURNS_ZOOM: f64 = 0.12;

/// Shortest duration used when computing progress.
pub const MIN_PROGRESS_DURATION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionStyle {
    ZoomIn,
    PanRight,
    ZoomOut,
    PanLeft,
    ZoomPan,
    SlowRise,
    KenBurns,
}

/// Styles cycled through scene by scene.
pub const ROTATION: [MotionStyle; 6] = [
    MotionStyle::ZoomIn,
    MotionStyle::PanRight,
    MotionStyle::ZoomOut,
    MotionStyle::PanLeft,
    MotionStyle::ZoomPan,
    MotionStyle::SlowRise,
];

/// Zoom factor and pan offsets (fractions of width/height) at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: f64,
    pub pan_x: f64,
    pub pan_y: f64,
}

/// Crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// `min(1, t / duration)`, with the duration floored at 0.1 s.
pub fn progress(t: f64, duration: f64) -> f64 {
    let duration = duration.max(MIN_PROGRESS_DURATION);
    (t / duration).clamp(0.0, 1.0)
}

/// Zoom needed so the window can travel `pan` of the frame.
fn pan_headroom(pan: f64) -> f64 {
    1.0 / (1.0 - pan)
}

impl MotionStyle {
    /// Style for the scene at `index`: the rotation when motion is on,
    /// otherwise Ken Burns.
    pub fn for_scene(index: usize, motion: bool) -> Self {
        if motion {
            ROTATION[index % ROTATION.len()]
        } else {
            MotionStyle::KenBurns
        }
    }

    /// Pan offsets move the window centre away from the frame centre and are
    /// fractions of the source width/height. Over a full scene the centre
    /// travels exactly the style's pan amplitude.
    pub fn transform(self, p: f64) -> Transform {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        let sweep = p - 0.5;

        match self {
            MotionStyle::ZoomIn => Transform {
                scale: 1.0 + SCALE_AMPLITUDE * p,
                pan_x: 0.0,
                pan_y: 0.0,
            },
            MotionStyle::ZoomOut => Transform {
                scale: 1.0 + SCALE_AMPLITUDE * (1.0 - p),
                pan_x: 0.0,
                pan_y: 0.0,
            },
            MotionStyle::PanRight => Transform {
                scale: pan_headroom(PAN_AMPLITUDE),
                pan_x: PAN_AMPLITUDE * sweep,
                pan_y: 0.0,
            },
            MotionStyle::PanLeft => Transform {
                scale: pan_headroom(PAN_AMPLITUDE),
                pan_x: -PAN_AMPLITUDE * sweep,
                pan_y: 0.0,
            },
            MotionStyle::ZoomPan => {
                let pan = PAN_AMPLITUDE * 0.5;
                Transform {
                    scale: pan_headroom(pan) + SCALE_AMPLITUDE * 0.5 * p,
                    pan_x: pan * sweep,
                    pan_y: 0.0,
                }
            }
            // Starts centred and sinks, so it needs room on both sides.
            MotionStyle::SlowRise => {
                let pan = PAN_AMPLITUDE * 0.5;
                Transform {
                    scale: pan_headroom(2.0 * pan) + SCALE_AMPLITUDE * 0.3 * p,
                    pan_x: 0.0,
                    pan_y: pan * p,
                }
            }
            MotionStyle::KenBurns => Transform {
                scale: 1.0 + KEN_BURNS_ZOOM * p,
                pan_x: 0.0,
                pan_y: 0.0,
            },
        }
    }

    /// Crop window for a `width`x`height` frame at progress `p`.
    ///
    /// The window always lies inside the frame and is at least 1x1.
    pub fn window(self, width: u32, height: u32, p: f64) -> CropWindow {
        let t = self.transform(p);
        let (width, height) = (width.max(1), height.max(1));
        let (w, h) = (width as f64, height as f64);

        let crop_w = ((w / t.scale).round() as u32).clamp(1, width);
        let crop_h = ((h / t.scale).round() as u32).clamp(1, height);

        // Source pixels left over around the window, clamped to what exists.
        let margin_x = w - w / t.scale;
        let margin_y = h - h / t.scale;
        let x = (margin_x / 2.0 + t.pan_x * w).clamp(0.0, margin_x.max(0.0));
        let y = (margin_y / 2.0 + t.pan_y * h).clamp(0.0, margin_y.max(0.0));

        CropWindow {
            x: (x.round() as u32).min(width - crop_w),
            y: (y.round() as u32).min(height - crop_h),
            width: crop_w,
            height: crop_h,
        }
    }

    /// Render one frame of `source` at progress `p`, same size as the source.
    pub fn apply(self, source: &RgbImage, p: f64) -> RgbImage {
        let (width, height) = source.dimensions();
        let window = self.window(width, height, p);
        if window.width == width && window.height == height {
            return source.clone();
        }
        let crop = imageops::crop_imm(source, window.x, window.y, window.width, window.height).to_image();
        imageops::resize(&crop, width, height, FilterType::Triangle)
    }
}
