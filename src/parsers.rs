//! Turns free-form model text into geometry and plain text.
//!
//! The computer-use model answers in prose. Coordinates arrive either as a
//! labelled list (`Image coordinates: [[x1,y1,x2,y2], ...]`), as a JSON object
//! when the model honours a structured reply, or as a bare click point buried
//! in a sentence. None of these parsers fail: unusable input yields an empty
//! result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{BoundingBox, Point, ResponseItem};

static COORDINATE_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)image coordinates:\s*(\[.*\])").unwrap());

static BOX_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*(-?\d+)\s*,\s*(-?\d+)\s*,\s*(-?\d+)\s*,\s*(-?\d+)\s*\]").unwrap()
});

// Tried in order; the first pattern that matches wins.
static CLICK_POINT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"['"](\d+),(\d+)['"]"#,
        r"(\d+),(\d+)",
        r"(\d+),\s*(\d+)",
        r"\((\d+),\s*(\d+)\)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Extract the bounding boxes listed after an `image coordinates:` marker.
pub fn extract_coordinates(text: &str) -> Vec<BoundingBox> {
    let Some(section) = COORDINATE_SECTION.captures(text).and_then(|c| c.get(1)) else {
        return Vec::new();
    };

    let mut boxes = Vec::new();
    for group in BOX_GROUP.captures_iter(section.as_str()) {
        let parsed: Result<Vec<i64>, _> = (1..=4).map(|i| group[i].parse::<i64>()).collect();
        match parsed {
            Ok(values) => {
                let bbox = BoundingBox::new(values[0], values[1], values[2], values[3]);
                if !bbox.is_ordered() {
                    warn!("Inverted bounding box from model: {:?}", bbox);
                }
                boxes.push(bbox);
            }
            Err(e) => warn!("Dropping coordinate group '{}': {}", &group[0], e),
        }
    }
    boxes
}

/// Center point of each box, in input order.
pub fn calculate_centers(boxes: &[BoundingBox]) -> Vec<Point> {
    boxes
        .iter()
        .enumerate()
        .map(|(idx, bbox)| {
            let center = bbox.center();
            debug!(
                "Image {}: rectangle [{},{},{},{}] -> center ({},{})",
                idx + 1,
                bbox.x1,
                bbox.y1,
                bbox.x2,
                bbox.y2,
                center.x,
                center.y
            );
            center
        })
        .collect()
}

/// Heuristic: a raw `x,y` click point embedded in a message.
pub fn extract_coordinates_from_message(text: &str) -> Option<Point> {
    for pattern in CLICK_POINT_PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        match (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
            (Ok(x), Ok(y)) => return Some(Point::new(x, y)),
            _ => continue,
        }
    }
    None
}

/// A detection answer given as JSON instead of prose.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StructuredDetection {
    #[serde(alias = "results_visible")]
    pub visible: bool,
    #[serde(default, alias = "image_coordinates")]
    pub boxes: Vec<[i64; 4]>,
}

impl StructuredDetection {
    pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
        self.boxes.iter().copied().map(BoundingBox::from).collect()
    }
}

/// Parse a JSON detection answer, tolerating markdown fences and prose
/// around the object. `None` when the text carries no such object.
pub fn parse_structured_detection(text: &str) -> Option<StructuredDetection> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}

/// First text-bearing content part of a message item, or `""`.
pub fn extract_text_content(item: &ResponseItem) -> &str {
    match item {
        ResponseItem::Message { content } => content
            .iter()
            .find_map(|part| part.text.as_deref())
            .unwrap_or(""),
        _ => "",
    }
}

/// First non-empty text across an output list, trimmed.
pub fn first_text(items: &[ResponseItem]) -> Option<&str> {
    items
        .iter()
        .map(|item| extract_text_content(item).trim())
        .find(|text| !text.is_empty())
}

/// Whether the model's answer confirms that search results are visible.
///
/// Any occurrence of "yes" counts, so "No results, yes somewhere" confirms.
pub fn check_for_search_results(text: &str) -> bool {
    text.to_lowercase().contains("yes")
}
