use image::GrayImage;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::point::Point;
use log::debug;
use logging_timer::time;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::error::{InterpretError, LayoutKind, Result};
use crate::image_utils::WHITE;
use crate::layout::BallotPageLayout;

/// A planar perspective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    pub matrix: Matrix3<f64>,
}

/// Similarity transform that moves the points' centroid to the origin and
/// scales them to an average distance of √2, which keeps the least squares
/// system well conditioned for pixel coordinates.
fn normalizing_transform(points: &[Point<f32>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let mean_distance = points
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_distance <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_distance;
    let transform = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    Some(transform)
}

fn apply(matrix: &Matrix3<f64>, p: &Point<f32>) -> (f64, f64) {
    let v = matrix * Vector3::new(p.x as f64, p.y as f64, 1.0);
    (v[0] / v[2], v[1] / v[2])
}

impl Homography {
    /// Fits the homography mapping each `from` point onto the corresponding
    /// `to` point, in the least squares sense when there are more than four
    /// correspondences. Returns `None` for degenerate point sets.
    pub fn fit(from: &[Point<f32>], to: &[Point<f32>]) -> Option<Self> {
        if from.len() != to.len() || from.len() < 4 {
            return None;
        }

        let from_norm = normalizing_transform(from)?;
        let to_norm = normalizing_transform(to)?;

        let mut ata = SMatrix::<f64, 8, 8>::zeros();
        let mut atb = SVector::<f64, 8>::zeros();
        for (p, q) in from.iter().zip(to) {
            let (x, y) = apply(&from_norm, p);
            let (u, v) = apply(&to_norm, q);
            let rows = [
                (SVector::<f64, 8>::from([x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]), u),
                (SVector::<f64, 8>::from([0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]), v),
            ];
            for (row, rhs) in rows {
                ata += row * row.transpose();
                atb += row * rhs;
            }
        }

        // collinear or repeated points leave the system (nearly) singular
        let eigenvalues = ata.symmetric_eigenvalues().map(f64::abs);
        let (min_eigenvalue, max_eigenvalue) = (eigenvalues.min(), eigenvalues.max());
        if max_eigenvalue <= 0.0 || min_eigenvalue / max_eigenvalue < 1e-12 {
            return None;
        }

        let h = ata.lu().solve(&atb)?;
        let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        let matrix = to_norm.try_inverse()? * normalized * from_norm;
        if matrix[(2, 2)].abs() <= f64::EPSILON || !matrix.iter().all(|v| v.is_finite()) {
            return None;
        }
        let matrix = matrix / matrix[(2, 2)];
        matrix.try_inverse()?;
        Some(Homography { matrix })
    }

    pub fn project(&self, p: &Point<f32>) -> Point<f32> {
        let (x, y) = apply(&self.matrix, p);
        Point::new(x as f32, y as f32)
    }

    fn to_projection(&self) -> Option<Projection> {
        let m = &self.matrix;
        Projection::from_matrix([
            m[(0, 0)] as f32,
            m[(0, 1)] as f32,
            m[(0, 2)] as f32,
            m[(1, 0)] as f32,
            m[(1, 1)] as f32,
            m[(1, 2)] as f32,
            m[(2, 0)] as f32,
            m[(2, 1)] as f32,
            m[(2, 2)] as f32,
        ])
    }
}

/// Resamples `img` through `homography` into an image of the given size.
/// Pixels with no source are paper white.
pub fn warp_image(
    img: &GrayImage,
    homography: &Homography,
    width: u32,
    height: u32,
) -> Result<GrayImage> {
    let projection = homography
        .to_projection()
        .ok_or_else(|| InterpretError::RegistrationFailed {
            reason: "transform is not invertible".to_string(),
        })?;
    let mut out = GrayImage::from_pixel(width, height, WHITE);
    warp_into(img, &projection, Interpolation::Nearest, WHITE, &mut out);
    Ok(out)
}

/// Aligns an observed ballot page with its template by matching up the
/// corners of their contests, returning the observed image in the template's
/// pixel space. Corners come from the contest outlines rather than their
/// bounding boxes so that a skewed scan is straightened out.
#[time]
pub fn map_onto_template(
    ballot: &BallotPageLayout,
    template: &BallotPageLayout,
) -> Result<GrayImage> {
    if ballot.contests.len() != template.contests.len() {
        return Err(InterpretError::ContestCountMismatch {
            layout: LayoutKind::Ballot,
            found: ballot.contests.len(),
            expected: template.contests.len(),
        });
    }

    let mut ballot_points = Vec::with_capacity(ballot.contests.len() * 4);
    let mut template_points = Vec::with_capacity(template.contests.len() * 4);
    for (ballot_contest, template_contest) in ballot.contests.iter().zip(&template.contests) {
        ballot_points.extend(ballot_contest.corners);
        template_points.extend(template_contest.corners);
    }

    let homography = Homography::fit(&ballot_points, &template_points).ok_or_else(|| {
        InterpretError::RegistrationFailed {
            reason: format!(
                "could not fit a transform to {} contest corner(s)",
                ballot_points.len()
            ),
        }
    })?;
    debug!("ballot to template transform: {:?}", homography.matrix);

    let (width, height) = template.image().dimensions();
    warp_image(ballot.image(), &homography, width, height)
}
