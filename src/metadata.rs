use image::GrayImage;
use imageproc::rect::Rect;
use log::debug;
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::election::{BallotStyleId, PrecinctId};
use crate::error::{InterpretError, Result};
use crate::image_utils::{crop, flip_vh};

/// First character of the `t` value that marks a test ballot.
const TEST_BALLOT_FLAG: char = 't';
/// Separates ballot style, precinct, selections, and ballot id in a summary
/// ballot payload.
const SUMMARY_FIELD_DELIMITER: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotLocales {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

/// Identifies a single page of a hand-marked paper ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotPageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locales: Option<BallotLocales>,
    pub ballot_style_id: BallotStyleId,
    pub precinct_id: PrecinctId,
    pub page_number: u32,
    pub page_count: u32,
    pub is_test_ballot: bool,
}

/// The contents of a machine-printed summary ballot's barcode. Selections are
/// kept raw since they can only be read against the election definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryBallotPayload {
    pub ballot_style_id: BallotStyleId,
    pub precinct_id: PrecinctId,
    pub selections: String,
    pub ballot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BallotPayload {
    HandMarked(BallotPageMetadata),
    Summary(SummaryBallotPayload),
}

/// Decodes a barcode payload in either the URL-style or the delimited summary
/// grammar.
pub fn decode_payload(data: &[u8]) -> Result<BallotPayload> {
    let text = std::str::from_utf8(data)
        .map_err(|e| InterpretError::metadata_decode(format!("payload is not UTF-8: {}", e)))?;

    if let Some((_, query)) = text.split_once('?') {
        return decode_search_params(query).map(BallotPayload::HandMarked);
    }

    if text.contains('=') {
        return decode_search_params(text).map(BallotPayload::HandMarked);
    }

    decode_summary_payload(text).map(BallotPayload::Summary)
}

/// Decodes URL search params such as `t=_&pr=11&bs=22&p=3-4&l1=en-US`.
pub fn decode_search_params(query: &str) -> Result<BallotPageMetadata> {
    let mut test_flag = None;
    let mut precinct_id = None;
    let mut ballot_style_id = None;
    let mut page = None;
    let mut primary_locale = None;
    let mut secondary_locale = None;

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode(value)?;
        match percent_decode(key)?.as_str() {
            "t" => test_flag = Some(value),
            "pr" => precinct_id = Some(value),
            "bs" => ballot_style_id = Some(value),
            "p" => page = Some(value),
            "l1" => primary_locale = Some(value),
            "l2" => secondary_locale = Some(value),
            key => debug!("ignoring unknown ballot metadata key: {}", key),
        }
    }

    let precinct_id = required(precinct_id, "precinct id (pr)")?;
    let ballot_style_id = required(ballot_style_id, "ballot style id (bs)")?;
    let (page_number, page_count) = parse_page_info(&required(page, "page info (p)")?)?;

    Ok(BallotPageMetadata {
        locales: primary_locale.map(|primary| BallotLocales {
            primary,
            secondary: secondary_locale,
        }),
        ballot_style_id: BallotStyleId::from(ballot_style_id),
        precinct_id: PrecinctId::from(precinct_id),
        page_number,
        page_count,
        is_test_ballot: test_flag.map_or(false, |t| t.starts_with(TEST_BALLOT_FLAG)),
    })
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value.ok_or_else(|| InterpretError::metadata_decode(format!("missing {}", name)))
}

fn parse_page_info(page: &str) -> Result<(u32, u32)> {
    let invalid = || InterpretError::metadata_decode(format!("invalid page info: {:?}", page));
    let (number, count) = page.split_once('-').ok_or_else(invalid)?;
    let parse = |part: &str| {
        part.parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(invalid)
    };
    let (page_number, page_count) = (parse(number)?, parse(count)?);
    if page_number > page_count {
        return Err(InterpretError::metadata_decode(format!(
            "page number {} is greater than page count {}",
            page_number, page_count
        )));
    }
    Ok((page_number, page_count))
}

/// Decodes `ballotStyleId.precinctId.selections[.ballotId]`.
pub fn decode_summary_payload(text: &str) -> Result<SummaryBallotPayload> {
    let mut fields = text.splitn(4, SUMMARY_FIELD_DELIMITER);
    let head = (fields.next(), fields.next(), fields.next());
    let (ballot_style_id, precinct_id, selections) = match head {
        (Some(ballot_style_id), Some(precinct_id), Some(selections))
            if !ballot_style_id.is_empty() && !precinct_id.is_empty() =>
        {
            (ballot_style_id, precinct_id, selections)
        }
        _ => {
            return Err(InterpretError::metadata_decode(format!(
                "payload is neither URL-style nor a summary ballot: {:?}",
                text
            )))
        }
    };

    let is_allowed = |c: char| c.is_ascii_digit() || c == '|' || c == ',';
    if let Some(c) = selections.chars().find(|c| !is_allowed(*c)) {
        return Err(InterpretError::metadata_decode(format!(
            "unexpected character {:?} in summary ballot selections",
            c
        )));
    }

    Ok(SummaryBallotPayload {
        ballot_style_id: BallotStyleId::from(ballot_style_id),
        precinct_id: PrecinctId::from(precinct_id),
        selections: selections.to_string(),
        ballot_id: fields
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string),
    })
}

fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| {
                        InterpretError::metadata_decode(format!(
                            "invalid percent-encoding in {:?}",
                            value
                        ))
                    })?;
                out.push(hex);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).map_err(|e| InterpretError::metadata_decode(e.to_string()))
}

/// Finds and reads a barcode in an image.
pub trait BarcodeDetector: Send + Sync {
    /// Returns the raw payload of the first barcode found, if any.
    fn detect(&self, img: &GrayImage) -> Option<Vec<u8>>;
}

/// Reads QR codes.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrCodeDetector;

impl BarcodeDetector for QrCodeDetector {
    fn detect(&self, img: &GrayImage) -> Option<Vec<u8>> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            img.width() as usize,
            img.height() as usize,
            |x, y| img.get_pixel(x as u32, y as u32).0[0],
        );
        prepared.detect_grids().iter().find_map(|grid| {
            let mut data = Vec::new();
            match grid.decode_to(&mut data) {
                Ok(_) => Some(data),
                Err(e) => {
                    debug!("found QR code grid but could not decode it: {:?}", e);
                    None
                }
            }
        })
    }
}

/// The part of a correctly oriented page to search for the barcode, as
/// fractions of the page size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchArea {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SearchArea {
    pub const FULL_PAGE: SearchArea = SearchArea {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn to_rect(&self, width: u32, height: u32) -> Rect {
        let left = (self.x * width as f32).floor() as i32;
        let top = (self.y * height as f32).floor() as i32;
        let area_width = ((self.width * width as f32).ceil() as u32).max(1);
        let area_height = ((self.height * height as f32).ceil() as u32).max(1);
        Rect::at(left, top).of_size(area_width, area_height)
    }
}

impl Default for SearchArea {
    /// Ballot barcodes are printed in the bottom half of the page, so a page
    /// fed upside down has its barcode in the top half.
    fn default() -> Self {
        SearchArea {
            x: 0.0,
            y: 0.5,
            width: 1.0,
            height: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectResult {
    pub payload: BallotPayload,
    pub flipped: bool,
}

fn detect_in_area(
    img: &GrayImage,
    detector: &dyn BarcodeDetector,
    area: &SearchArea,
) -> Option<Result<BallotPayload>> {
    let region = crop(img, &area.to_rect(img.width(), img.height()));
    detector.detect(&region).map(|data| decode_payload(&data))
}

/// Finds and decodes the ballot barcode, flipping the image 180° and trying
/// once more if the first attempt fails. Callers must apply the same flip to
/// the image when `flipped` is true.
#[time]
pub fn detect(
    img: &GrayImage,
    detector: &dyn BarcodeDetector,
    area: &SearchArea,
) -> Result<DetectResult> {
    let first_error = match detect_in_area(img, detector, area) {
        Some(Ok(payload)) => {
            return Ok(DetectResult {
                payload,
                flipped: false,
            })
        }
        Some(Err(e)) => Some(e),
        None => None,
    };

    debug!("no usable barcode found in original orientation, trying flipped image");
    match detect_in_area(&flip_vh(img), detector, area) {
        Some(Ok(payload)) => Ok(DetectResult {
            payload,
            flipped: true,
        }),
        Some(Err(e)) => Err(first_error.unwrap_or(e)),
        None => Err(first_error.unwrap_or(InterpretError::NoBarcodeFound)),
    }
}
