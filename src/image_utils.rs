use image::{imageops, GrayImage, Luma, Rgb};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::rect::Rect;
use logging_timer::time;
use serde::{Deserialize, Serialize};

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const DARK_GREEN: Rgb<u8> = Rgb([0, 127, 0]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);

pub const RAINBOW: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 127, 0]),
    Rgb([255, 255, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([75, 0, 130]),
    Rgb([148, 0, 211]),
];

/// How grayscale pixels are split into ink and paper. This is the main
/// sensitivity point for scan quality, so it is always chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "level")]
pub enum Threshold {
    /// Pixels at or below this luma are ink.
    Fixed(u8),
    /// Use Otsu's method to pick the level per image.
    Otsu,
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Otsu
    }
}

/// Converts a grayscale image to pure `BLACK` (ink) and `WHITE` (paper).
#[time]
pub fn binarize(img: &GrayImage, level: Threshold) -> GrayImage {
    let level = match level {
        Threshold::Fixed(level) => level,
        Threshold::Otsu => otsu_level(img),
    };
    threshold(img, level)
}

/// Rotates an image 180°, i.e. flips it both vertically and horizontally.
pub fn flip_vh(img: &GrayImage) -> GrayImage {
    imageops::rotate180(img)
}

/// Copies the part of `img` covered by `rect`. Any part of `rect` outside the
/// image is filled with `WHITE`.
pub fn crop(img: &GrayImage, rect: &Rect) -> GrayImage {
    GrayImage::from_fn(rect.width(), rect.height(), |x, y| {
        pixel_or_white(img, rect.left() + x as i32, rect.top() + y as i32)
    })
}

/// Gets a pixel, treating everything outside the image as paper.
pub fn pixel_or_white(img: &GrayImage, x: i32, y: i32) -> Luma<u8> {
    if x < 0 || y < 0 || x as u32 >= img.width() || y as u32 >= img.height() {
        WHITE
    } else {
        *img.get_pixel(x as u32, y as u32)
    }
}

/// Bleed the given luma value outwards from any pixels that match it.
pub fn bleed(img: &GrayImage, luma: &Luma<u8>) -> GrayImage {
    let mut out = img.clone();
    for (x, y, pixel) in img.enumerate_pixels() {
        if *pixel != *luma {
            continue;
        }

        if x > 0 {
            out.put_pixel(x - 1, y, *pixel);
        }
        if x < img.width() - 1 {
            out.put_pixel(x + 1, y, *pixel);
        }
        if y > 0 {
            out.put_pixel(x, y - 1, *pixel);
        }
        if y < img.height() - 1 {
            out.put_pixel(x, y + 1, *pixel);
        }
    }

    out
}

/// Counts pixels that are `WHITE` in `base` but `BLACK` in `compare`, i.e.
/// newly inked pixels. `base_rect` and `compare_rect` must be the same size
/// and select the corresponding regions of each image.
///
/// ```text
///         BASE                  COMPARE                 NEW INK
/// ┌───────────────────┐  ┌───────────────────┐  ┌───────────────────┐
/// │                   │  │        █ █ ███    │  │        █ █ ███    │
/// │ █ █               │  │ █ █    ███  █     │  │        ███  █     │
/// │  █                │  │  █     █ █ ███    │  │        █ █ ███    │
/// │ █ █ █████████████ │  │ █ █ █████████████ │  │                   │
/// └───────────────────┘  └───────────────────┘  └───────────────────┘
/// ```
pub fn count_new_black_pixels(
    base: &GrayImage,
    base_rect: &Rect,
    compare: &GrayImage,
    compare_rect: &Rect,
) -> u32 {
    assert_eq!(
        (base_rect.width(), base_rect.height()),
        (compare_rect.width(), compare_rect.height())
    );

    let mut count = 0;
    for y in 0..base_rect.height() as i32 {
        for x in 0..base_rect.width() as i32 {
            let base_pixel = pixel_or_white(base, base_rect.left() + x, base_rect.top() + y);
            let compare_pixel =
                pixel_or_white(compare, compare_rect.left() + x, compare_rect.top() + y);
            if base_pixel == WHITE && compare_pixel == BLACK {
                count += 1;
            }
        }
    }
    count
}

/// Determines the number of pixels in an image that match the given luma.
pub fn count_pixels(img: &GrayImage, luma: &Luma<u8>) -> u32 {
    img.pixels().filter(|p| *p == luma).count() as u32
}
