use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use log::{debug, warn};

use crate::image_utils::{BLUE, DARK_GREEN, GREEN, PINK, RAINBOW, RED};
use crate::layout::ContestLayout;
use crate::scoring::BallotMark;

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut result = PathBuf::from(base);
    result.set_file_name(format!("{}_debug_{}.png", stem, label));
    result
}

/// Writes debug images next to an input image. A disabled writer does
/// nothing, so callers can draw unconditionally.
#[derive(Debug, Clone)]
pub struct ImageDebugWriter {
    input: Option<(PathBuf, GrayImage)>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf, input_image: GrayImage) -> Self {
        ImageDebugWriter {
            input: Some((input_path, input_image)),
        }
    }

    pub fn disabled() -> Self {
        ImageDebugWriter { input: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.input.is_some()
    }

    /// Draws on a color copy of the input image and saves it as
    /// `<stem>_debug_<label>.png`. Returns the path written, if any.
    pub fn write(&self, label: &str, draw: impl FnOnce(&mut RgbImage)) -> Option<PathBuf> {
        let (input_path, input_image) = self.input.as_ref()?;
        self.write_over(label, input_image, input_path, draw)
    }

    /// Like `write`, but draws on `background` instead of the input image.
    pub fn write_on(
        &self,
        label: &str,
        background: &GrayImage,
        draw: impl FnOnce(&mut RgbImage),
    ) -> Option<PathBuf> {
        let (input_path, _) = self.input.as_ref()?;
        self.write_over(label, background, input_path, draw)
    }

    fn write_over(
        &self,
        label: &str,
        background: &GrayImage,
        input_path: &Path,
        draw: impl FnOnce(&mut RgbImage),
    ) -> Option<PathBuf> {
        let mut canvas = DynamicImage::ImageLuma8(background.clone()).into_rgb8();
        draw(&mut canvas);

        let path = debug_image_path(input_path, label);
        match canvas.save(&path) {
            Ok(()) => {
                debug!("wrote debug image {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("failed to write debug image {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Outlines contests in rainbow order, with their targets and corners.
pub fn draw_contest_layout_debug_image_mut(canvas: &mut RgbImage, contests: &[ContestLayout]) {
    for (i, contest) in contests.iter().enumerate() {
        draw_hollow_rect_mut(canvas, contest.bounds, RAINBOW[i % RAINBOW.len()]);
        for corner in &contest.corners {
            let (x, y) = (corner.x.round() as i32, corner.y.round() as i32);
            draw_cross_mut(canvas, PINK, x, y);
        }
        for target in &contest.targets {
            draw_hollow_rect_mut(canvas, target.bounds, GREEN);
            draw_hollow_rect_mut(canvas, target.inner, BLUE);
        }
    }
}

/// Outlines each scored target, green if it counts as a vote and red if not,
/// with a bar beneath it as long as the target is filled in.
pub fn draw_scored_marks_debug_image_mut(
    canvas: &mut RgbImage,
    marks: &[BallotMark],
    threshold: f32,
) {
    for mark in marks {
        let bounds = mark.target.bounds;
        let color = if mark.score <= threshold {
            DARK_GREEN
        } else {
            RED
        };
        draw_hollow_rect_mut(canvas, bounds, color);

        let bar_width = (bounds.width() as f32 * mark.fill_ratio).round() as u32;
        if bar_width > 0 {
            draw_filled_rect_mut(
                canvas,
                Rect::at(bounds.left(), bounds.bottom() + 3).of_size(bar_width, 3),
                color,
            );
        }
    }
}
