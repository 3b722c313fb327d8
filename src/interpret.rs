use std::path::Path;

use image::GrayImage;
use log::{debug, info};
use logging_timer::time;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::debug::{
    draw_contest_layout_debug_image_mut, draw_scored_marks_debug_image_mut, ImageDebugWriter,
};
use crate::election::{Contest, Election};
use crate::error::{InterpretError, LayoutKind, Result};
use crate::image_utils::{binarize, flip_vh, Threshold};
use crate::layout::{
    find_contests, find_contests_with_targets, BallotImage, BallotPageLayout, LocatorOptions,
};
use crate::metadata::{
    detect, BallotLocales, BallotPageMetadata, BallotPayload, BarcodeDetector, QrCodeDetector,
    SearchArea, SummaryBallotPayload,
};
use crate::registration::map_onto_template;
use crate::scoring::{score_marks, BallotMark, ScoringOptions};
use crate::templates::{PartialTemplateSpecifier, TemplateKey, TemplateStore};
use crate::votes::{cvr_from_marks, decode_summary_selections, CastVoteRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterpreterOptions {
    /// Whether this session accepts test ballots (and only test ballots).
    pub test_mode: bool,
    /// Marks with a score at or below this are votes. A mark's score is one
    /// minus its fill ratio, so the default of 0.2 only counts targets that
    /// are at least 80% filled in.
    pub mark_score_vote_threshold: f32,
    pub binarize_threshold: Threshold,
    pub locator: LocatorOptions,
    pub scoring: ScoringOptions,
    /// Every locale pairing ballots are printed in.
    pub locale_configs: Vec<Option<BallotLocales>>,
    pub barcode_search_area: SearchArea,
    pub debug: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        InterpreterOptions {
            test_mode: false,
            mark_score_vote_threshold: 0.2,
            binarize_threshold: Threshold::default(),
            locator: LocatorOptions::default(),
            scoring: ScoringOptions::default(),
            locale_configs: vec![None],
            barcode_search_area: SearchArea::default(),
            debug: false,
        }
    }
}

/// The result of interpreting one ballot image.
#[derive(Debug, Clone)]
pub enum InterpretedBallot {
    HandMarked {
        /// The observed page, upright and binarized.
        layout: BallotPageLayout,
        marks: Vec<BallotMark>,
        cvr: CastVoteRecord,
        flipped: bool,
    },
    Summary {
        cvr: CastVoteRecord,
        flipped: bool,
    },
}

impl InterpretedBallot {
    pub fn cvr(&self) -> &CastVoteRecord {
        match self {
            InterpretedBallot::HandMarked { cvr, .. } => cvr,
            InterpretedBallot::Summary { cvr, .. } => cvr,
        }
    }

    pub fn into_cvr(self) -> CastVoteRecord {
        match self {
            InterpretedBallot::HandMarked { cvr, .. } => cvr,
            InterpretedBallot::Summary { cvr, .. } => cvr,
        }
    }

    pub fn flipped(&self) -> bool {
        match self {
            InterpretedBallot::HandMarked { flipped, .. } => *flipped,
            InterpretedBallot::Summary { flipped, .. } => *flipped,
        }
    }
}

/// A binarized, upright page and what its barcode says.
struct NormalizedPage {
    image: GrayImage,
    payload: BallotPayload,
    flipped: bool,
}

/// An interpretation session for one election. Templates are added with
/// `&mut self` first; ballots are interpreted with `&self` afterwards, which
/// lets many run in parallel.
pub struct Interpreter {
    election: Election,
    options: InterpreterOptions,
    templates: TemplateStore,
    detector: Box<dyn BarcodeDetector>,
}

impl Interpreter {
    pub fn new(election: Election, options: InterpreterOptions) -> Self {
        Self::with_detector(election, options, Box::new(QrCodeDetector))
    }

    pub fn with_detector(
        election: Election,
        options: InterpreterOptions,
        detector: Box<dyn BarcodeDetector>,
    ) -> Self {
        let templates = TemplateStore::new(options.test_mode, options.locale_configs.clone());
        Interpreter {
            election,
            options,
            templates,
            detector,
        }
    }

    pub fn election(&self) -> &Election {
        &self.election
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn missing_templates(
        &self,
    ) -> impl Iterator<Item = PartialTemplateSpecifier> + Clone + '_ {
        self.templates.missing_templates(&self.election)
    }

    fn debug_writer(&self, path: &Path, image: &GrayImage) -> ImageDebugWriter {
        if self.options.debug {
            ImageDebugWriter::new(path.to_path_buf(), image.clone())
        } else {
            ImageDebugWriter::disabled()
        }
    }

    /// Binarizes the page, turns it upright and works out its metadata. The
    /// barcode is read unless `metadata` is given, in which case `flipped`
    /// says whether the page is upside down.
    #[time]
    fn normalize(
        &self,
        image: &GrayImage,
        metadata: Option<&BallotPageMetadata>,
        flipped: bool,
    ) -> Result<NormalizedPage> {
        let binarized = binarize(image, self.options.binarize_threshold);

        if let Some(metadata) = metadata {
            let image = if flipped {
                flip_vh(&binarized)
            } else {
                binarized
            };
            return Ok(NormalizedPage {
                image,
                payload: BallotPayload::HandMarked(metadata.clone()),
                flipped,
            });
        }

        let search_area = &self.options.barcode_search_area;
        let detected = detect(&binarized, self.detector.as_ref(), search_area)?;
        let image = if detected.flipped {
            debug!("ballot image is upside down, flipping it");
            flip_vh(&binarized)
        } else {
            binarized
        };
        Ok(NormalizedPage {
            image,
            payload: detected.payload,
            flipped: detected.flipped,
        })
    }

    /// Finds the contests and targets on an image of a blank ballot page.
    /// `flipped` is only used along with `metadata`.
    #[time]
    pub fn interpret_template(
        &self,
        image: &GrayImage,
        metadata: Option<&BallotPageMetadata>,
        flipped: bool,
    ) -> Result<BallotPageLayout> {
        let page = self.normalize(image, metadata, flipped)?;
        let metadata = match page.payload {
            BallotPayload::HandMarked(metadata) => metadata,
            BallotPayload::Summary(_) => {
                return Err(InterpretError::metadata_decode(
                    "summary ballots cannot be used as templates",
                ))
            }
        };

        let contests = find_contests_with_targets(&page.image, &self.options.locator);
        Ok(BallotPageLayout {
            ballot_image: BallotImage {
                image: page.image,
                metadata,
            },
            contests,
        })
    }

    /// Interprets and registers a blank ballot page, returning its metadata.
    pub fn add_template(
        &mut self,
        image: &GrayImage,
        metadata: Option<&BallotPageMetadata>,
        flipped: bool,
    ) -> Result<BallotPageMetadata> {
        let layout = self.interpret_template(image, metadata, flipped)?;
        self.add_template_layout(layout)
    }

    /// Registers an already located template layout.
    pub fn add_template_layout(&mut self, layout: BallotPageLayout) -> Result<BallotPageMetadata> {
        let metadata = layout.metadata().clone();
        info!(
            "adding template for ballot style {} precinct {} page {}/{} with {} contest(s)",
            metadata.ballot_style_id,
            metadata.precinct_id,
            metadata.page_number,
            metadata.page_count,
            layout.contests.len()
        );
        self.templates.register(layout)?;
        Ok(metadata)
    }

    pub fn add_template_file(&mut self, path: &Path) -> Result<BallotPageMetadata> {
        let image = load_image(path)?;
        let layout = self.interpret_template(&image, None, false)?;
        self.debug_writer(path, layout.image()).write("template", |canvas| {
            draw_contest_layout_debug_image_mut(canvas, &layout.contests)
        });
        self.add_template_layout(layout)
    }

    /// Interprets a ballot image of either kind, reading its barcode to tell
    /// which kind it is.
    pub fn interpret_ballot(&self, image: &GrayImage) -> Result<InterpretedBallot> {
        let page = self.normalize(image, None, false)?;
        self.interpret_page(page, &ImageDebugWriter::disabled())
    }

    /// Interprets a hand-marked ballot page whose metadata is already known,
    /// turning it over first if `flipped`.
    pub fn interpret_hand_marked_ballot(
        &self,
        image: &GrayImage,
        metadata: &BallotPageMetadata,
        flipped: bool,
    ) -> Result<InterpretedBallot> {
        let page = self.normalize(image, Some(metadata), flipped)?;
        self.interpret_page(page, &ImageDebugWriter::disabled())
    }

    /// Interprets a ballot image file. Debug images, when enabled, are drawn
    /// over the upright binarized page.
    pub fn interpret_file(&self, path: &Path) -> Result<InterpretedBallot> {
        let image = load_image(path)?;
        let page = self.normalize(&image, None, false)?;
        let debug = self.debug_writer(path, &page.image);
        self.interpret_page(page, &debug)
    }

    #[time]
    fn interpret_page(
        &self,
        page: NormalizedPage,
        debug: &ImageDebugWriter,
    ) -> Result<InterpretedBallot> {
        match page.payload {
            BallotPayload::HandMarked(metadata) => {
                self.interpret_hand_marked_page(page.image, metadata, page.flipped, debug)
            }
            BallotPayload::Summary(payload) => self.interpret_summary(&payload, page.flipped),
        }
    }

    fn interpret_summary(
        &self,
        payload: &SummaryBallotPayload,
        flipped: bool,
    ) -> Result<InterpretedBallot> {
        debug!(
            "interpreting summary ballot for ballot style {} precinct {}",
            payload.ballot_style_id, payload.precinct_id
        );
        Ok(InterpretedBallot::Summary {
            cvr: decode_summary_selections(&self.election, payload)?,
            flipped,
        })
    }

    /// Number of contests on the pages before this one.
    fn contest_offset(&self, metadata: &BallotPageMetadata) -> usize {
        (1..metadata.page_number)
            .filter_map(|page_number| {
                self.templates.lookup(&TemplateKey {
                    page_number,
                    ..TemplateKey::from(metadata)
                })
            })
            .map(|template| template.contests.len())
            .sum()
    }

    fn interpret_hand_marked_page(
        &self,
        image: GrayImage,
        metadata: BallotPageMetadata,
        flipped: bool,
        debug: &ImageDebugWriter,
    ) -> Result<InterpretedBallot> {
        if metadata.is_test_ballot != self.options.test_mode {
            return Err(InterpretError::TestModeMismatch {
                kind: LayoutKind::Ballot,
                test_mode: self.options.test_mode,
                is_test_ballot: metadata.is_test_ballot,
            });
        }

        let template = match self.templates.lookup(&TemplateKey::from(&metadata)) {
            Some(template) if self.templates.can_interpret(&metadata) => template,
            _ => return Err(InterpretError::TemplatesIncomplete { metadata }),
        };

        let ballot_style = self
            .election
            .ballot_style(&metadata.ballot_style_id)
            .ok_or_else(|| InterpretError::UnknownBallotStyle(metadata.ballot_style_id.clone()))?;
        let page_contests: Vec<&Contest> = self
            .election
            .contests_for_ballot_style(ballot_style)
            .into_iter()
            .skip(self.contest_offset(&metadata))
            .take(template.contests.len())
            .collect();

        let contests = find_contests(&image, &self.options.locator);
        debug.write("contests", |canvas| {
            draw_contest_layout_debug_image_mut(canvas, &contests)
        });
        let layout = BallotPageLayout {
            ballot_image: BallotImage { image, metadata },
            contests,
        };

        let mapped = map_onto_template(&layout, template)?;
        let marks = score_marks(template, &mapped, &page_contests, &self.options.scoring)?;
        let threshold = self.options.mark_score_vote_threshold;
        debug.write_on("marks", &mapped, |canvas| {
            draw_scored_marks_debug_image_mut(canvas, &marks, threshold)
        });

        let cvr = cvr_from_marks(layout.metadata(), &page_contests, &marks, threshold);
        Ok(InterpretedBallot::HandMarked {
            layout,
            marks,
            cvr,
            flipped,
        })
    }

    /// Interprets many ballot images in parallel. Each image gets its own
    /// result, in the same order as `images`.
    #[time]
    pub fn interpret_batch(&self, images: &[GrayImage]) -> Vec<Result<InterpretedBallot>> {
        images
            .par_iter()
            .map(|image| self.interpret_ballot(image))
            .collect()
    }

    pub fn interpret_files<P: AsRef<Path> + Sync>(
        &self,
        paths: &[P],
    ) -> Vec<Result<InterpretedBallot>> {
        paths
            .par_iter()
            .map(|path| self.interpret_file(path.as_ref()))
            .collect()
    }
}

#[time]
pub fn load_image(path: &Path) -> Result<GrayImage> {
    image::open(path)
        .map(|img| img.into_luma8())
        .map_err(|source| InterpretError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })
}
