use image::GrayImage;
use imageproc::contours::{find_contours_with_threshold, BorderType, Contour};
use imageproc::rect::Rect;
use log::debug;
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::geometry::{
    bounding_rect, center_of_rect, contour_corners, rect_area, rect_contains_rect, serde_corners,
    serde_rect, shrink_rect, Corners, Size,
};
use crate::metadata::BallotPageMetadata;

/// A selectable target, e.g. a bubble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetShape {
    /// Outer edge of the target's ink.
    #[serde(with = "serde_rect")]
    pub bounds: Rect,
    /// The fillable area enclosed by the target's ink.
    #[serde(with = "serde_rect")]
    pub inner: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestLayout {
    #[serde(with = "serde_rect")]
    pub bounds: Rect,
    #[serde(with = "serde_corners")]
    pub corners: Corners,
    /// Targets in reading order. Empty for observed (non-template) pages.
    pub targets: Vec<TargetShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BallotImage {
    #[serde(skip)]
    pub image: GrayImage,
    pub metadata: BallotPageMetadata,
}

/// The geometry of one ballot page: a blank template or an observed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotPageLayout {
    pub ballot_image: BallotImage,
    pub contests: Vec<ContestLayout>,
}

impl BallotPageLayout {
    pub fn metadata(&self) -> &BallotPageMetadata {
        &self.ballot_image.metadata
    }

    pub fn image(&self) -> &GrayImage {
        &self.ballot_image.image
    }
}

/// Size limits used to tell contest boxes and targets apart from text and
/// other ink on the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorOptions {
    /// Minimum contest width as a fraction of the page width.
    pub min_contest_width_ratio: f32,
    /// Minimum contest height as a fraction of the page height.
    pub min_contest_height_ratio: f32,
    pub min_target_size: Size<u32>,
    pub max_target_size: Size<u32>,
    /// Minimum fraction of a target's bounds taken up by its fillable area.
    pub min_target_inner_ratio: f32,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        LocatorOptions {
            min_contest_width_ratio: 0.15,
            min_contest_height_ratio: 0.03,
            min_target_size: Size {
                width: 10,
                height: 8,
            },
            max_target_size: Size {
                width: 80,
                height: 60,
            },
            min_target_inner_ratio: 0.25,
        }
    }
}

/// Contours of a binarized page and, for each, the indexes of its children.
struct ContourTree {
    contours: Vec<Contour<i32>>,
    children: Vec<Vec<usize>>,
}

impl ContourTree {
    fn new(img: &GrayImage) -> Self {
        let contours = find_contours_with_threshold::<i32>(img, u8::MAX / 2);
        let mut children = vec![vec![]; contours.len()];
        for (i, contour) in contours.iter().enumerate() {
            if let Some(parent) = contour.parent {
                children[parent].push(i);
            }
        }
        ContourTree { contours, children }
    }

    /// Gets the ink bounds of a hole contour along with the bounds of the
    /// largest paper region it encloses. Ink shapes are holes in the paper, and
    /// their borders are traced one pixel outside the ink.
    fn hollow_ink_shape(&self, index: usize) -> Option<(Rect, Rect)> {
        let contour = &self.contours[index];
        if contour.border_type != BorderType::Hole {
            return None;
        }
        let ink_bounds = shrink_rect(&bounding_rect(&contour.points)?, 1)?;
        let interior = self.children[index]
            .iter()
            .filter(|&&child| self.contours[child].border_type == BorderType::Outer)
            .filter_map(|&child| bounding_rect(&self.contours[child].points))
            .max_by_key(rect_area)?;
        Some((ink_bounds, interior))
    }
}

/// Finds contest boxes in a binarized ballot image, in reading order. Targets
/// are left empty, as for an observed ballot page.
#[time]
pub fn find_contests(img: &GrayImage, options: &LocatorOptions) -> Vec<ContestLayout> {
    let tree = ContourTree::new(img);
    let contests = locate_contests(&tree, img, options)
        .into_iter()
        .map(|(contest, _)| contest)
        .collect::<Vec<_>>();
    debug!("found {} contest(s)", contests.len());
    contests
}

/// Finds contest boxes and the targets within them in a binarized image of a
/// blank ballot.
#[time]
pub fn find_contests_with_targets(img: &GrayImage, options: &LocatorOptions) -> Vec<ContestLayout> {
    let tree = ContourTree::new(img);
    locate_contests(&tree, img, options)
        .into_iter()
        .map(|(mut contest, interior)| {
            contest.targets = find_targets(&tree, &interior, options);
            debug!(
                "contest at {:?} has {} target(s)",
                contest.bounds,
                contest.targets.len()
            );
            contest
        })
        .collect()
}

fn locate_contests(
    tree: &ContourTree,
    img: &GrayImage,
    options: &LocatorOptions,
) -> Vec<(ContestLayout, Rect)> {
    let min_width = (img.width() as f32 * options.min_contest_width_ratio).ceil() as u32;
    let min_height = (img.height() as f32 * options.min_contest_height_ratio).ceil() as u32;

    let contests = (0..tree.contours.len())
        .filter_map(|i| {
            let (bounds, interior) = tree.hollow_ink_shape(i)?;
            if bounds.width() < min_width || bounds.height() < min_height {
                return None;
            }
            // a box outline encloses most of its own area, text does not
            if rect_area(&interior) * 2 < rect_area(&bounds) {
                return None;
            }
            let corners = contour_corners(&tree.contours[i].points)?;
            Some((
                ContestLayout {
                    bounds,
                    corners,
                    targets: vec![],
                },
                interior,
            ))
        })
        .collect::<Vec<_>>();

    // contests nested inside another contest are decoration, not contests
    let top_level = contests
        .iter()
        .filter(|(contest, _)| {
            !contests.iter().any(|(other, other_interior)| {
                other.bounds != contest.bounds
                    && rect_contains_rect(other_interior, &contest.bounds)
            })
        })
        .cloned()
        .collect();

    order_contests(top_level)
}

fn find_targets(
    tree: &ContourTree,
    contest_interior: &Rect,
    options: &LocatorOptions,
) -> Vec<TargetShape> {
    let targets = (0..tree.contours.len())
        .filter_map(|i| {
            let (bounds, inner) = tree.hollow_ink_shape(i)?;
            if !rect_contains_rect(contest_interior, &bounds) {
                return None;
            }
            if bounds.width() < options.min_target_size.width
                || bounds.height() < options.min_target_size.height
                || bounds.width() > options.max_target_size.width
                || bounds.height() > options.max_target_size.height
            {
                return None;
            }
            let inner_ratio = rect_area(&inner) as f32 / rect_area(&bounds) as f32;
            if inner_ratio < options.min_target_inner_ratio {
                return None;
            }
            Some(TargetShape { bounds, inner })
        })
        .collect();

    order_targets(targets)
}

/// Orders contests in columns from left to right, top to bottom within each
/// column.
fn order_contests(mut contests: Vec<(ContestLayout, Rect)>) -> Vec<(ContestLayout, Rect)> {
    contests.sort_by_key(|(contest, _)| (contest.bounds.left(), contest.bounds.top()));

    let mut columns: Vec<Vec<(ContestLayout, Rect)>> = vec![];
    for entry in contests {
        let center_x = center_of_rect(&entry.0.bounds).x;
        let column = columns.iter_mut().find(|column| {
            let first = &column[0].0.bounds;
            center_x >= first.left() as f32 && center_x <= first.right() as f32
        });
        match column {
            Some(column) => column.push(entry),
            None => columns.push(vec![entry]),
        }
    }

    columns
        .into_iter()
        .flat_map(|mut column| {
            column.sort_by_key(|(contest, _)| contest.bounds.top());
            column
        })
        .collect()
}

fn in_same_row(first: &TargetShape, target: &TargetShape) -> bool {
    target.bounds.top() - first.bounds.top() <= (first.bounds.height() / 2) as i32
}

/// Orders targets in rows from top to bottom, left to right within each row.
fn order_targets(mut targets: Vec<TargetShape>) -> Vec<TargetShape> {
    targets.sort_by_key(|target| (target.bounds.top(), target.bounds.left()));

    let mut rows: Vec<Vec<TargetShape>> = vec![];
    for target in targets {
        match rows.last_mut() {
            Some(row) if in_same_row(&row[0], &target) => row.push(target),
            _ => rows.push(vec![target]),
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by_key(|target| target.bounds.left());
            row
        })
        .collect()
}
