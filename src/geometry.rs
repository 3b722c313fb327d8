use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

/// Corner points in top-left, top-right, bottom-right, bottom-left order.
pub type Corners = [Point<f32>; 4];

/// Gets the corners of a rect, in top-left, top-right, bottom-right,
/// bottom-left order.
pub fn rect_corners(rect: &Rect) -> Corners {
    let left = rect.left() as f32;
    let top = rect.top() as f32;
    let right = rect.right() as f32;
    let bottom = rect.bottom() as f32;
    [
        Point::new(left, top),
        Point::new(right, top),
        Point::new(right, bottom),
        Point::new(left, bottom),
    ]
}

pub fn offset_rect(rect: &Rect, dx: i32, dy: i32) -> Rect {
    Rect::at(rect.left() + dx, rect.top() + dy).of_size(rect.width(), rect.height())
}

/// Shrinks a rect by `amount` on every side, or `None` if nothing is left.
pub fn shrink_rect(rect: &Rect, amount: u32) -> Option<Rect> {
    if rect.width() <= amount * 2 || rect.height() <= amount * 2 {
        return None;
    }
    Some(
        Rect::at(rect.left() + amount as i32, rect.top() + amount as i32)
            .of_size(rect.width() - amount * 2, rect.height() - amount * 2),
    )
}

/// Whether `inner` lies entirely within `outer`.
pub fn rect_contains_rect(outer: &Rect, inner: &Rect) -> bool {
    inner.left() >= outer.left()
        && inner.top() >= outer.top()
        && inner.right() <= outer.right()
        && inner.bottom() <= outer.bottom()
}

pub fn rect_area(rect: &Rect) -> u32 {
    rect.width() * rect.height()
}

pub fn center_of_rect(rect: &Rect) -> Point<f32> {
    Point::new(
        rect.left() as f32 + rect.width() as f32 / 2.0,
        rect.top() as f32 + rect.height() as f32 / 2.0,
    )
}

/// Gets the smallest rect containing all the given points.
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    let (width, height) = ((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32);
    Some(Rect::at(min_x, min_y).of_size(width, height))
}

/// Picks the extreme points of a contour as its corners. Works for shapes that
/// are roughly axis-aligned quadrilaterals, even when slightly skewed.
pub fn contour_corners(points: &[Point<i32>]) -> Option<Corners> {
    let top_left = points.iter().min_by_key(|p| p.x + p.y)?;
    let top_right = points.iter().max_by_key(|p| p.x - p.y)?;
    let bottom_right = points.iter().max_by_key(|p| p.x + p.y)?;
    let bottom_left = points.iter().max_by_key(|p| p.y - p.x)?;
    let corners = [top_left, top_right, bottom_right, bottom_left];
    Some(corners.map(|p| Point::new(p.x as f32, p.y as f32)))
}

/// Serde support for `imageproc::rect::Rect` as `{ x, y, width, height }`.
pub mod serde_rect {
    use imageproc::rect::Rect;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RectDef {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    }

    pub fn serialize<S: Serializer>(rect: &Rect, serializer: S) -> Result<S::Ok, S::Error> {
        RectDef {
            x: rect.left(),
            y: rect.top(),
            width: rect.width(),
            height: rect.height(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Rect, D::Error> {
        let def = RectDef::deserialize(deserializer)?;
        if def.width == 0 || def.height == 0 {
            return Err(serde::de::Error::custom("rect must have a non-zero size"));
        }
        Ok(Rect::at(def.x, def.y).of_size(def.width, def.height))
    }
}

/// Serde support for `Corners` as `[{ x, y }; 4]`.
pub mod serde_corners {
    use imageproc::point::Point;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Corners;

    #[derive(Serialize, Deserialize)]
    struct PointDef {
        x: f32,
        y: f32,
    }

    pub fn serialize<S: Serializer>(corners: &Corners, serializer: S) -> Result<S::Ok, S::Error> {
        corners
            .map(|p| PointDef { x: p.x, y: p.y })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Corners, D::Error> {
        let points = <[PointDef; 4]>::deserialize(deserializer)?;
        Ok(points.map(|p| Point::new(p.x, p.y)))
    }
}
