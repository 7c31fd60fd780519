use crate::gallery::Gallery;
use crate::types::{Encoding, MatchOutcome, MatchResult};

/// Similarity reported when no gallery entry could be compared at all.
pub const NO_COMPARABLE_SIMILARITY: f32 = -1.0;

/// Strategy for comparing a query encoding against a gallery.
pub trait Matcher {
    fn compare(&self, query: &Encoding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over cosine similarity.
///
/// The first entry reaching the maximum similarity wins. A best similarity
/// at or above `threshold` is a match; below it the label is dropped but the
/// similarity is still reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, query: &Encoding, gallery: &Gallery, threshold: f32) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::unknown(MatchOutcome::EmptyGallery, 0.0);
        }

        let mut best: Option<(f32, usize)> = None;
        let mut skipped = 0usize;

        for (i, entry) in gallery.iter().enumerate() {
            if query.overlap(&entry.encoding) == 0 {
                skipped += 1;
                continue;
            }
            let sim = query.similarity(&entry.encoding);
            if best.map_or(true, |(best_sim, _)| sim > best_sim) {
                best = Some((sim, i));
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, total = gallery.len(), "gallery entries without overlap skipped");
        }

        let Some((similarity, idx)) = best else {
            return MatchResult::unknown(MatchOutcome::NoComparableEntries, NO_COMPARABLE_SIMILARITY);
        };

        if similarity >= threshold {
            MatchResult {
                label: Some(gallery.entries()[idx].label.clone()),
                similarity,
                outcome: MatchOutcome::Matched,
            }
        } else {
            MatchResult::unknown(MatchOutcome::BelowThreshold, similarity)
        }
    }
}
