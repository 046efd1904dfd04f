//! Detector output → page-space [`LayoutItem`]s.
//!
//! ## Rule Order
//!
//! 1. Drop detections below the score threshold (and non-finite scores)
//! 2. Undo the letterbox: subtract padding, divide by scale, clip to page
//! 3. Drop boxes that collapsed to zero area
//! 4. Resolve the class id through the [`LabelTable`]
//! 5. Class-wise non-maximum suppression
//!
//! Filtering before NMS keeps the quadratic suppression loop small; the
//! inverse mapping runs before NMS so IoU is measured in page pixels.

use crate::config::PostprocessConfig;
use crate::labels::LabelTable;
use crate::pipeline::preprocess::PreprocessMeta;
use crate::types::{BBox, LayoutItem};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// One raw detector output row, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: usize,
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RawDetection {
    /// Decode a flat `[x1, y1, x2, y2, score, class_id]` row buffer.
    ///
    /// A trailing partial row is ignored. Negative or non-finite class ids
    /// are skipped.
    pub fn from_rows(data: &[f32]) -> Vec<RawDetection> {
        data.chunks_exact(6)
            .filter(|row| row[5].is_finite() && row[5] >= 0.0)
            .map(|row| RawDetection {
                x1: row[0],
                y1: row[1],
                x2: row[2],
                y2: row[3],
                score: row[4],
                class_id: row[5] as usize,
            })
            .collect()
    }

    fn bbox(&self) -> BBox {
        BBox::new(self.x1, self.y1, self.x2, self.y2)
    }
}

/// Turn raw detections into ordered page-space layout items.
///
/// Output: classes in ascending class-id order, each score-descending.
pub fn postprocess(
    detections: &[RawDetection],
    meta: &PreprocessMeta,
    labels: &LabelTable,
    config: &PostprocessConfig,
) -> Vec<LayoutItem> {
    let mut candidates: Vec<(usize, LayoutItem)> = Vec::with_capacity(detections.len());

    for det in detections {
        if !det.score.is_finite() || det.score < config.score_threshold {
            continue;
        }
        let bbox = meta.to_original(&det.bbox());
        if !bbox.is_valid() {
            debug!("Dropping degenerate detection {:?}", det);
            continue;
        }
        let Some(name) = labels.class_name(det.class_id) else {
            warn!(
                "Detection class id {} outside the {}-entry label table; dropped",
                det.class_id,
                labels.len()
            );
            continue;
        };
        candidates.push((det.class_id, LayoutItem::new(bbox, name, det.score)));
    }

    // Stable: first appearance of each class in NMS follows class id order.
    candidates.sort_by_key(|(class_id, _)| *class_id);
    let before = candidates.len();
    let kept = non_max_suppression(
        candidates.into_iter().map(|(_, item)| item).collect(),
        config.iou_threshold,
    );

    debug!(
        "Postprocess: {} raw → {} above threshold → {} after NMS",
        detections.len(),
        before,
        kept.len()
    );
    kept
}

/// Class-wise non-maximum suppression.
///
/// Items are grouped by `class_name` (groups ordered by first appearance),
/// each group sorted by score descending (stable), and an item is kept only
/// if its IoU with every already-kept item of its group is at most
/// `iou_threshold`. A threshold of 1.0 keeps everything; 0.0 keeps one item
/// per cluster of mutually overlapping boxes. Applying the function to its
/// own output returns it unchanged.
pub fn non_max_suppression(items: Vec<LayoutItem>, iou_threshold: f32) -> Vec<LayoutItem> {
    let mut groups: Vec<(String, Vec<LayoutItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(name, _)| *name == item.class_name) {
            Some((_, members)) => members.push(item),
            None => groups.push((item.class_name.clone(), vec![item])),
        }
    }

    let mut out = Vec::new();
    for (_, mut members) in groups {
        members.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut keep: Vec<LayoutItem> = Vec::with_capacity(members.len());
        for candidate in members {
            if keep
                .iter()
                .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
            {
                keep.push(candidate);
            }
        }
        out.extend(keep);
    }
    out
}
