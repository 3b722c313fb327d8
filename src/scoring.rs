use image::GrayImage;
use imageproc::rect::Rect;
use log::{debug, warn};
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::election::{Candidate, Contest, ContestId, YesNoOption};
use crate::error::{InterpretError, LayoutKind, Result};
use crate::geometry::offset_rect;
use crate::image_utils::{bleed, count_new_black_pixels, count_pixels, crop, BLACK, WHITE};
use crate::layout::{BallotPageLayout, TargetShape};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringOptions {
    /// Offsets of the target's inner area to try, in pixels. The lowest fill
    /// ratio across offsets wins, so small registration errors are not read
    /// as marks.
    pub offsets: Vec<(i32, i32)>,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        ScoringOptions {
            offsets: vec![(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)],
        }
    }
}

/// What a target is a vote for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MarkOption {
    Candidate(Candidate),
    YesNo(YesNoOption),
}

/// How filled in one target is on a ballot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotMark {
    pub contest_id: ContestId,
    pub option: MarkOption,
    pub target: TargetShape,
    /// Fraction of the target's fillable area with new ink.
    pub fill_ratio: f32,
    /// `1 - fill_ratio`: lower means darker.
    pub score: f32,
}

impl BallotMark {
    pub fn new(
        contest_id: ContestId,
        option: MarkOption,
        target: TargetShape,
        fill_ratio: f32,
    ) -> Self {
        BallotMark {
            contest_id,
            option,
            target,
            fill_ratio,
            score: 1.0 - fill_ratio,
        }
    }
}

/// Measures the fraction of a target's fillable area that is ink in `ballot`
/// but paper in `template`. Both images must be binarized and aligned.
pub fn target_fill_ratio(
    template: &GrayImage,
    ballot: &GrayImage,
    target: &TargetShape,
    offsets: &[(i32, i32)],
) -> f32 {
    // the target's own outline, grown by a pixel, never counts as new ink
    let template_target = bleed(&crop(template, &target.bounds), &BLACK);
    let inner_in_target = Rect::at(
        target.inner.left() - target.bounds.left(),
        target.inner.top() - target.bounds.top(),
    )
    .of_size(target.inner.width(), target.inner.height());
    let available = count_pixels(&crop(&template_target, &inner_in_target), &WHITE);
    if available == 0 {
        warn!(
            "target {:?} has no paper to fill in the template",
            target.bounds
        );
        return 0.0;
    }

    let offsets: &[(i32, i32)] = if offsets.is_empty() {
        &[(0, 0)]
    } else {
        offsets
    };
    offsets
        .iter()
        .map(|&(dx, dy)| {
            let new_ink = count_new_black_pixels(
                &template_target,
                &inner_in_target,
                ballot,
                &offset_rect(&target.inner, dx, dy),
            );
            new_ink as f32 / available as f32
        })
        .fold(f32::INFINITY, f32::min)
        .min(1.0)
}

/// Scores every target on a ballot page registered onto `template`.
/// `contests` are the election's contests for this page, in ballot order.
#[time]
pub fn score_marks(
    template: &BallotPageLayout,
    mapped_ballot: &GrayImage,
    contests: &[&Contest],
    options: &ScoringOptions,
) -> Result<Vec<BallotMark>> {
    if template.contests.len() != contests.len() {
        return Err(InterpretError::ContestCountMismatch {
            layout: LayoutKind::Template,
            found: template.contests.len(),
            expected: contests.len(),
        });
    }

    let fill_ratio = |target: &TargetShape| {
        target_fill_ratio(template.image(), mapped_ballot, target, &options.offsets)
    };
    let mut marks = vec![];

    for (contest_layout, contest) in template.contests.iter().zip(contests) {
        debug!("getting marks for {}", contest);
        let targets = &contest_layout.targets;

        match contest {
            Contest::Candidate {
                id,
                seats,
                allow_write_ins,
                candidates,
                ..
            } => {
                let write_in_count = if *allow_write_ins { *seats as usize } else { 0 };
                let expected = candidates.len() + write_in_count;
                if targets.len() != expected {
                    return Err(InterpretError::ContestOptionCountMismatch {
                        contest_id: id.clone(),
                        expected,
                        found: targets.len(),
                    });
                }

                let choices = candidates
                    .iter()
                    .cloned()
                    .chain((0..write_in_count).map(Candidate::write_in));
                for (target, candidate) in targets.iter().zip(choices) {
                    let fill = fill_ratio(target);
                    debug!(
                        "candidate '{}' target filled in with ratio {}",
                        candidate.name, fill
                    );
                    marks.push(BallotMark::new(
                        id.clone(),
                        MarkOption::Candidate(candidate),
                        *target,
                        fill,
                    ));
                }
            }

            Contest::YesNo { id, .. } => {
                if targets.len() != 2 {
                    return Err(InterpretError::UnexpectedOptionCount {
                        contest_id: id.clone(),
                        found: targets.len(),
                    });
                }

                for (target, option) in targets.iter().zip([YesNoOption::Yes, YesNoOption::No]) {
                    let fill = fill_ratio(target);
                    debug!("'{}' target filled in with ratio {}", option, fill);
                    let option = MarkOption::YesNo(option);
                    marks.push(BallotMark::new(id.clone(), option, *target, fill));
                }
            }
        }
    }

    Ok(marks)
}

#[cfg(test)]
mod tests {
    use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};

    use super::*;
    use crate::geometry::rect_corners;
    use crate::layout::{BallotImage, ContestLayout};
    use crate::metadata::BallotPageMetadata;

    fn target_at(x: i32, y: i32) -> TargetShape {
        TargetShape {
            bounds: Rect::at(x, y).of_size(20, 14),
            inner: Rect::at(x + 1, y + 1).of_size(18, 12),
        }
    }

    fn blank_with_targets(targets: &[TargetShape]) -> GrayImage {
        let mut img = GrayImage::from_pixel(200, 200, WHITE);
        for target in targets {
            draw_hollow_rect_mut(&mut img, target.bounds, BLACK);
        }
        img
    }

    #[test]
    fn blank_target_scores_zero_fill() {
        let target = target_at(10, 10);
        let template = blank_with_targets(&[target]);
        let offsets = ScoringOptions::default().offsets;
        let fill = target_fill_ratio(&template, &template, &target, &offsets);
        assert_eq!(fill, 0.0);
    }

    #[test]
    fn filled_target_scores_full() {
        let target = target_at(10, 10);
        let template = blank_with_targets(&[target]);
        let mut ballot = template.clone();
        draw_filled_rect_mut(&mut ballot, target.bounds, BLACK);
        let offsets = ScoringOptions::default().offsets;
        let fill = target_fill_ratio(&template, &ballot, &target, &offsets);
        assert_eq!(fill, 1.0);
    }

    #[test]
    fn takes_the_lowest_score_across_offsets() {
        let target = target_at(10, 10);
        let template = blank_with_targets(&[target]);
        // the target's outline drawn two pixels to the right, as if misaligned
        let mut ballot = GrayImage::from_pixel(200, 200, WHITE);
        draw_hollow_rect_mut(&mut ballot, offset_rect(&target.bounds, 2, 0), BLACK);

        let unshifted = target_fill_ratio(&template, &ballot, &target, &[(0, 0)]);
        let offsets = ScoringOptions::default().offsets;
        let shifted = target_fill_ratio(&template, &ballot, &target, &offsets);
        assert!(unshifted > 0.0);
        assert_eq!(shifted, 0.0);
    }

    #[test]
    fn partially_filled_target() {
        let target = target_at(10, 10);
        let template = blank_with_targets(&[target]);
        let mut ballot = template.clone();
        // fill the left half of the fillable area
        draw_filled_rect_mut(&mut ballot, Rect::at(11, 11).of_size(9, 12), BLACK);
        let fill = target_fill_ratio(&template, &ballot, &target, &[(0, 0)]);
        assert!(fill > 0.3 && fill < 0.6, "{}", fill);
    }

    fn template(targets_per_contest: &[Vec<TargetShape>]) -> BallotPageLayout {
        let all_targets: Vec<_> = targets_per_contest.iter().flatten().copied().collect();
        BallotPageLayout {
            ballot_image: BallotImage {
                image: blank_with_targets(&all_targets),
                metadata: BallotPageMetadata {
                    locales: None,
                    ballot_style_id: "1".into(),
                    precinct_id: "1".into(),
                    page_number: 1,
                    page_count: 1,
                    is_test_ballot: false,
                },
            },
            contests: targets_per_contest
                .iter()
                .map(|targets| ContestLayout {
                    bounds: Rect::at(0, 0).of_size(200, 200),
                    corners: rect_corners(&Rect::at(0, 0).of_size(200, 200)),
                    targets: targets.clone(),
                })
                .collect(),
        }
    }

    fn candidate_contest(candidate_count: usize, allow_write_ins: bool) -> Contest {
        Contest::Candidate {
            id: "mayor".into(),
            district_id: "d".into(),
            party_id: None,
            title: "Mayor".to_string(),
            seats: 1,
            allow_write_ins,
            candidates: (0..candidate_count)
                .map(|i| Candidate {
                    id: format!("c{}", i).into(),
                    name: format!("Candidate {}", i),
                    party_id: None,
                    is_write_in: false,
                })
                .collect(),
        }
    }

    fn yes_no_contest() -> Contest {
        Contest::YesNo {
            id: "prop-1".into(),
            district_id: "d".into(),
            party_id: None,
            title: "Proposition 1".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn scores_candidates_and_write_ins() {
        let targets = (0..4).map(|i| target_at(10, 10 + 20 * i)).collect::<Vec<_>>();
        let template = template(&[targets.clone()]);
        let mut ballot = template.image().clone();
        draw_filled_rect_mut(&mut ballot, targets[3].bounds, BLACK);

        let contest = candidate_contest(3, true);
        let options = ScoringOptions::default();
        let marks = score_marks(&template, &ballot, &[&contest], &options).unwrap();
        assert_eq!(marks.len(), 4);
        assert_eq!(
            marks[3].option,
            MarkOption::Candidate(Candidate::write_in(0))
        );
        assert_eq!(marks[3].score, 0.0);
        assert!(marks[..3].iter().all(|mark| mark.score == 1.0));
    }

    #[test]
    fn scores_yes_no() {
        let targets = vec![target_at(10, 10), target_at(10, 40)];
        let template = template(&[targets.clone()]);
        let mut ballot = template.image().clone();
        draw_filled_rect_mut(&mut ballot, targets[1].bounds, BLACK);

        let contest = yes_no_contest();
        let options = ScoringOptions::default();
        let marks = score_marks(&template, &ballot, &[&contest], &options).unwrap();
        assert_eq!(
            marks
                .iter()
                .map(|m| (m.option.clone(), m.score))
                .collect::<Vec<_>>(),
            vec![
                (MarkOption::YesNo(YesNoOption::Yes), 1.0),
                (MarkOption::YesNo(YesNoOption::No), 0.0),
            ]
        );
    }

    #[test]
    fn yes_no_contest_with_three_targets() {
        let targets = (0..3).map(|i| target_at(10, 10 + 20 * i)).collect::<Vec<_>>();
        let template = template(&[targets]);
        let contest = yes_no_contest();
        let options = ScoringOptions::default();
        let result = score_marks(&template, template.image(), &[&contest], &options);
        match result {
            Err(InterpretError::UnexpectedOptionCount { contest_id, found }) => {
                assert_eq!(contest_id.as_str(), "prop-1");
                assert_eq!(found, 3);
            }
            result => panic!("unexpected result: {:?}", result),
        }
    }

    #[test]
    fn candidate_contest_with_wrong_target_count() {
        let targets = (0..3).map(|i| target_at(10, 10 + 20 * i)).collect::<Vec<_>>();
        let template = template(&[targets]);
        let contest = candidate_contest(3, true);
        let options = ScoringOptions::default();
        assert!(matches!(
            score_marks(&template, template.image(), &[&contest], &options),
            Err(InterpretError::ContestOptionCountMismatch {
                expected: 4,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn template_and_definition_contest_counts_must_agree() {
        let template = template(&[vec![], vec![]]);
        let contest = yes_no_contest();
        let options = ScoringOptions::default();
        assert!(matches!(
            score_marks(&template, template.image(), &[&contest], &options),
            Err(InterpretError::ContestCountMismatch {
                layout: LayoutKind::Template,
                found: 2,
                expected: 1,
            })
        ));
    }
}
