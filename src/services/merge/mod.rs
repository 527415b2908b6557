// Result merger: reconcile OCR geometry with translation output
//
// Geometry comes from the OCR collaborator (precise boxes, raw text);
// translations come from a vision/translation collaborator (good text,
// rough or missing boxes). The merge keeps the best of each.

use std::cmp::Ordering;
use tracing::{debug, info, warn};

use crate::core::errors::{MergeError, MergeResult};
use crate::core::types::{BoundingBox, GeometryDetection, Region, TranslationDetection};

/// Counts reported alongside the merged regions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub matched: usize,
    pub unmatched_geometry: usize,
    pub unmatched_translation: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub regions: Vec<Region>,
    pub stats: MergeStats,
}

struct GeometryCandidate<'a> {
    key: String,
    text: &'a str,
    bbox: Option<BoundingBox>,
    confidence: Option<f32>,
}

struct TranslationCandidate<'a> {
    key: String,
    text: &'a str,
    translated: &'a str,
    bbox: Option<BoundingBox>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MatchTier {
    Exact,
    Containment,
}

/// Merge two detection sets into the canonical ordered region list.
pub fn merge(geometry: &[GeometryDetection], translations: &[TranslationDetection]) -> Vec<Region> {
    merge_detailed(geometry, translations).regions
}

/// Same as [`merge`], with match statistics.
pub fn merge_detailed(
    geometry: &[GeometryDetection],
    translations: &[TranslationDetection],
) -> MergeOutcome {
    let mut stats = MergeStats::default();

    let geo: Vec<GeometryCandidate> = geometry
        .iter()
        .enumerate()
        .filter_map(|(index, g)| keep_valid(validate_geometry(index, g), &mut stats))
        .collect();

    let trans: Vec<TranslationCandidate> = translations
        .iter()
        .enumerate()
        .filter_map(|(index, t)| keep_valid(validate_translation(index, t), &mut stats))
        .collect();

    // pairing[g] = index into `trans`
    let mut pairing: Vec<Option<usize>> = vec![None; geo.len()];
    let mut used = vec![false; trans.len()];

    for tier in [MatchTier::Exact, MatchTier::Containment] {
        for (gi, g) in geo.iter().enumerate() {
            if pairing[gi].is_some() {
                continue;
            }
            if let Some(ti) = best_match(g, &trans, &used, tier) {
                used[ti] = true;
                pairing[gi] = Some(ti);
            }
        }
    }

    let mut located: Vec<Region> = Vec::new();
    let mut unlocated: Vec<Region> = Vec::new();

    for (gi, g) in geo.iter().enumerate() {
        let translated_text = match pairing[gi] {
            Some(ti) => {
                stats.matched += 1;
                trans[ti].translated.to_string()
            }
            None => {
                stats.unmatched_geometry += 1;
                debug!("Unmatched geometry: '{}' keeps its source text", g.text);
                g.text.to_string()
            }
        };

        let region = Region {
            id: 0,
            bbox: g.bbox,
            source_text: g.text.to_string(),
            translated_text,
            confidence: g.confidence,
        };

        if region.bbox.is_some() {
            located.push(region);
        } else {
            unlocated.push(region);
        }
    }

    for (ti, t) in trans.iter().enumerate() {
        if used[ti] {
            continue;
        }
        stats.unmatched_translation += 1;
        debug!("Unmatched translation: '{}' kept without location", t.text);
        unlocated.push(Region {
            id: 0,
            bbox: None,
            source_text: t.text.to_string(),
            translated_text: t.translated.to_string(),
            confidence: None,
        });
    }

    // Reading order; sort_by is stable so equal positions keep input order
    located.sort_by(|a, b| match (a.bbox, b.bbox) {
        (Some(a), Some(b)) => a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)),
        _ => Ordering::Equal,
    });

    let regions: Vec<Region> = located
        .into_iter()
        .chain(unlocated)
        .enumerate()
        .map(|(id, region)| Region { id, ..region })
        .collect();

    info!(
        "Merged {} regions ({} matched, {} geometry-only, {} translation-only, {} dropped)",
        regions.len(),
        stats.matched,
        stats.unmatched_geometry,
        stats.unmatched_translation,
        stats.dropped
    );

    MergeOutcome { regions, stats }
}

fn keep_valid<T>(candidate: MergeResult<T>, stats: &mut MergeStats) -> Option<T> {
    match candidate {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("{}; region dropped", e);
            stats.dropped += 1;
            None
        }
    }
}

fn validate_geometry(index: usize, g: &GeometryDetection) -> MergeResult<GeometryCandidate<'_>> {
    let text = g.text.trim();
    if text.is_empty() {
        return Err(malformed("geometry", index, "empty text"));
    }

    Ok(GeometryCandidate {
        key: normalize(text),
        text,
        bbox: check_bbox("geometry", index, g.bbox)?,
        confidence: g.confidence,
    })
}

fn validate_translation(
    index: usize,
    t: &TranslationDetection,
) -> MergeResult<TranslationCandidate<'_>> {
    let text = t.text.trim();
    if text.is_empty() {
        return Err(malformed("translation", index, "empty source text"));
    }

    // An empty translation degrades to the source text
    let translated = match t.translated_text.trim() {
        "" => text,
        translated => translated,
    };

    Ok(TranslationCandidate {
        key: normalize(text),
        text,
        translated,
        bbox: check_bbox("translation", index, t.bbox)?,
    })
}

fn check_bbox(
    origin: &'static str,
    index: usize,
    bbox: Option<BoundingBox>,
) -> MergeResult<Option<BoundingBox>> {
    match bbox {
        None => Ok(None),
        Some(b) if !b.is_finite() => Err(malformed(origin, index, "non-finite bounding box")),
        Some(b) if b.width < 0.0 || b.height < 0.0 => Err(malformed(
            origin,
            index,
            &format!("negative bounding box size {}x{}", b.width, b.height),
        )),
        Some(b) if b.is_degenerate() => Ok(None),
        Some(b) => Ok(Some(b)),
    }
}

fn malformed(origin: &'static str, index: usize, reason: &str) -> MergeError {
    MergeError::MalformedRegion {
        origin,
        index,
        reason: reason.to_string(),
    }
}

/// Collapse whitespace; case is kept for the exact tier
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_match(g: &GeometryCandidate, t: &TranslationCandidate, tier: MatchTier) -> bool {
    match tier {
        MatchTier::Exact => g.key == t.key,
        MatchTier::Containment => {
            let a = g.key.to_lowercase();
            let b = t.key.to_lowercase();
            a.contains(&b) || b.contains(&a)
        }
    }
}

/// Closest unused candidate of the given tier: spatial distance when both
/// sides have boxes, then smaller length difference, then input order.
fn best_match(
    g: &GeometryCandidate,
    trans: &[TranslationCandidate],
    used: &[bool],
    tier: MatchTier,
) -> Option<usize> {
    trans
        .iter()
        .enumerate()
        .filter(|(ti, t)| !used[*ti] && is_match(g, t, tier))
        .min_by(|(ai, a), (bi, b)| {
            distance(g, a)
                .total_cmp(&distance(g, b))
                .then(length_gap(g, a).cmp(&length_gap(g, b)))
                .then(ai.cmp(bi))
        })
        .map(|(ti, _)| ti)
}

fn distance(g: &GeometryCandidate, t: &TranslationCandidate) -> f64 {
    match (g.bbox, t.bbox) {
        (Some(a), Some(b)) => a.center_distance(&b),
        _ => f64::INFINITY,
    }
}

fn length_gap(g: &GeometryCandidate, t: &TranslationCandidate) -> usize {
    g.key.chars().count().abs_diff(t.key.chars().count())
}
