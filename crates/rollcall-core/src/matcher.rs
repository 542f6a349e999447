use crate::types::{Descriptor, Gallery, MatchResult};

/// Default maximum Euclidean distance still considered a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Strategy for finding the closest enrolled person for a live descriptor.
pub trait Matcher {
    fn closest(&self, gallery: &Gallery, probe: &Descriptor, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbor matcher.
///
/// A person's effective distance is the minimum over their own descriptor
/// set — any enrolled view close enough counts. The gallery entry with the
/// globally smallest effective distance wins; the threshold is exclusive,
/// so a distance exactly equal to it is reported as unknown. Always
/// iterates every entry; ties keep the earliest-inserted entry.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn closest(&self, gallery: &Gallery, probe: &Descriptor, threshold: f32) -> MatchResult {
        let mut best_idx: Option<usize> = None;
        let mut best_dist = f32::INFINITY;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let dist = entry
                .descriptors()
                .iter()
                .map(|d| d.euclidean_distance(probe))
                .fold(f32::INFINITY, f32::min);

            // Strict comparison: an equal later distance never displaces
            // an earlier entry, keeping selection deterministic.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => {
                let entry = &gallery.entries()[idx];
                MatchResult::Match {
                    person_id: entry.person_id.clone(),
                    label: entry.label.clone(),
                    distance: best_dist,
                }
            }
            Some(_) => MatchResult::Unknown {
                distance: Some(best_dist),
            },
            None => MatchResult::Unknown { distance: None },
        }
    }
}
