use log::debug;
use serde::{Deserialize, Serialize};

use crate::distance::cosine_distance;
use crate::error::{FaceError, Result};
use crate::storage::StoreData;

/// Largest cosine distance accepted as the same person.
pub const THRESHOLD: f32 = 0.30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub nim: String,
    pub name: String,
    pub distance: f32,
    /// Percent, 100 at distance 0 down to 0 at the threshold.
    pub confidence: f32,
}

impl MatchResult {
    /// Distance to 4 decimals, confidence to 2, as reported to callers.
    pub fn rounded(self) -> Self {
        Self {
            distance: round_to(self.distance, 4),
            confidence: round_to(self.confidence, 2),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(MatchResult),
    /// Nothing within the threshold. `best_distance` is `None` for an empty
    /// store.
    Unrecognized { best_distance: Option<f32> },
}

/// Exhaustive nearest-neighbour search under cosine distance.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    threshold: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            threshold: THRESHOLD,
        }
    }
}

impl Matcher {
    /// The threshold must lie in `(0, 2]`, the range of cosine distance.
    pub fn new(threshold: f32) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 2.0) {
            return Err(FaceError::InvalidInput(format!(
                "match threshold must be in (0, 2], got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Inclusive: a distance equal to the threshold is a match.
    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.threshold
    }

    pub fn confidence(&self, distance: f32) -> f32 {
        ((1.0 - distance / self.threshold) * 100.0).clamp(0.0, 100.0)
    }

    /// Scan every stored embedding and keep the strictly closest. Entries
    /// arrive ordered by identity key, so equal distances resolve to the
    /// lowest key.
    ///
    /// A length mismatch, zero-norm or non-finite vector aborts the scan: it
    /// means the store and the probe come from different embedding
    /// configurations, or one of them is corrupt.
    pub fn best_match(&self, data: &StoreData, probe: &[f32]) -> Result<MatchOutcome> {
        let mut best: Option<(f32, &str, &str)> = None;

        for entry in data.entries() {
            let d = cosine_distance(entry.vector, probe)?;
            if best.map_or(true, |(best_d, _, _)| d < best_d) {
                best = Some((d, entry.nim, entry.name));
            }
        }

        let Some((distance, nim, name)) = best else {
            return Ok(MatchOutcome::Unrecognized {
                best_distance: None,
            });
        };
        debug!("closest: {nim} at {distance:.4} (threshold {})", self.threshold);

        if !self.accepts(distance) {
            return Ok(MatchOutcome::Unrecognized {
                best_distance: Some(distance),
            });
        }
        Ok(MatchOutcome::Matched(MatchResult {
            nim: nim.to_string(),
            name: name.to_string(),
            distance,
            confidence: self.confidence(distance),
        }))
    }
}

pub fn round_to(value: f32, places: i32) -> f32 {
    let factor = 10f64.powi(places);
    ((value as f64 * factor).round() / factor) as f32
}

/// `"97.12%"`, the form stored in the audit log.
pub fn format_confidence(confidence: f32) -> String {
    format!("{confidence:.2}%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AppendPolicy, EnrollmentRecord, StoredEmbedding, VectorStore};
    use uuid::Uuid;

    fn store_with(entries: &[(&str, &str, Vec<f32>)]) -> VectorStore {
        let store = VectorStore::in_memory();
        for (nim, name, v) in entries {
            store
                .append_embeddings(
                    nim,
                    vec![v.clone()],
                    AppendPolicy::CreateWithName(name.to_string()),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn empty_store_is_unrecognized() {
        let outcome = Matcher::default()
            .best_match(&StoreData::default(), &[1.0, 0.0])
            .unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Unrecognized {
                best_distance: None
            }
        );
    }

    #[test]
    fn picks_the_closest_identity() {
        let store = store_with(&[
            ("A001", "Alice", vec![1.0, 0.0, 0.0]),
            ("B002", "Bob", vec![0.0, 1.0, 0.0]),
            ("C003", "Carol", vec![0.0, 0.0, 1.0]),
        ]);
        let outcome = Matcher::default()
            .best_match(&store.snapshot(), &[0.05, 0.99, 0.0])
            .unwrap();
        let MatchOutcome::Matched(m) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(m.nim, "B002");
        assert_eq!(m.name, "Bob");
        assert!(m.distance < 0.01);
        assert!(m.confidence > 95.0);
    }

    #[test]
    fn exact_probe_gives_full_confidence() {
        let store = store_with(&[("A001", "Alice", vec![0.2, 0.4, 0.6, 0.8])]);
        let MatchOutcome::Matched(m) = Matcher::default()
            .best_match(&store.snapshot(), &[0.2, 0.4, 0.6, 0.8])
            .unwrap()
        else {
            panic!("expected a match");
        };
        let m = m.rounded();
        assert_eq!(m.distance, 0.0);
        assert_eq!(m.confidence, 100.0);
    }

    #[test]
    fn far_probe_is_rejected_with_its_distance() {
        let store = store_with(&[("A001", "Alice", vec![1.0, 0.0])]);
        let outcome = Matcher::default()
            .best_match(&store.snapshot(), &[0.0, 1.0])
            .unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Unrecognized {
                best_distance: Some(1.0)
            }
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let m = Matcher::default();
        assert!(m.accepts(THRESHOLD));
        assert!(!m.accepts(THRESHOLD + f32::EPSILON));
        assert_eq!(m.confidence(THRESHOLD), 0.0);
        assert_eq!(m.confidence(0.0), 100.0);
    }

    #[test]
    fn scan_accepts_probe_exactly_at_threshold() {
        let stored = vec![1.0, 0.0];
        let probe = [0.7, 0.71];
        let d = cosine_distance(&stored, &probe).unwrap();
        let store = store_with(&[("A001", "Alice", stored)]);

        let at = Matcher::new(d).unwrap().best_match(&store.snapshot(), &probe).unwrap();
        assert!(matches!(at, MatchOutcome::Matched(ref m) if m.confidence == 0.0));

        let below = Matcher::new(d - 1e-4)
            .unwrap()
            .best_match(&store.snapshot(), &probe)
            .unwrap();
        assert!(matches!(below, MatchOutcome::Unrecognized { .. }));
    }

    #[test]
    fn confidence_decreases_with_distance() {
        let m = Matcher::default();
        let samples: Vec<f32> = (0..=30).map(|i| m.confidence(i as f32 * 0.01)).collect();
        assert!(samples.windows(2).all(|w| w[0] > w[1]));
        assert!((m.confidence(0.15) - 50.0).abs() < 1e-3);
        assert_eq!(m.confidence(0.5), 0.0);
    }

    #[test]
    fn ties_go_to_lowest_identity_key() {
        let store = store_with(&[
            ("B002", "Bob", vec![0.6, 0.8]),
            ("A001", "Alice", vec![0.6, 0.8]),
            ("C003", "Carol", vec![0.6, 0.8]),
        ]);
        let MatchOutcome::Matched(m) = Matcher::default()
            .best_match(&store.snapshot(), &[0.8, 0.6])
            .unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(m.nim, "A001");
        assert_eq!(m.name, "Alice");
    }

    #[test]
    fn dimension_mismatch_aborts_scan() {
        let store = store_with(&[("A001", "Alice", vec![1.0, 0.0, 0.0])]);
        let err = Matcher::default()
            .best_match(&store.snapshot(), &[1.0, 0.0])
            .unwrap_err();
        assert!(matches!(
            err,
            FaceError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn zero_probe_is_an_error_not_a_rejection() {
        let store = store_with(&[("A001", "Alice", vec![1.0, 0.0])]);
        assert!(matches!(
            Matcher::default().best_match(&store.snapshot(), &[0.0, 0.0]),
            Err(FaceError::ZeroNorm)
        ));
    }

    #[test]
    fn non_finite_vectors_abort_the_scan() {
        // written by an older store that did not validate on append
        let mut data = StoreData {
            dimension: Some(2),
            ..StoreData::default()
        };
        for (nim, vector) in [("A000", vec![f32::NAN, 1.0]), ("B001", vec![1.0, 0.0])] {
            data.identities.insert(
                nim.to_string(),
                EnrollmentRecord {
                    name: nim.to_string(),
                    embeddings: vec![StoredEmbedding {
                        id: Uuid::new_v4(),
                        vector,
                    }],
                },
            );
        }
        assert!(matches!(
            Matcher::default().best_match(&data, &[1.0, 0.0]),
            Err(FaceError::NonFinite)
        ));

        let store = store_with(&[("A001", "Alice", vec![1.0, 0.0])]);
        assert!(matches!(
            Matcher::default().best_match(&store.snapshot(), &[f32::NAN, 0.0]),
            Err(FaceError::NonFinite)
        ));
    }

    #[test]
    fn threshold_outside_distance_range_is_refused() {
        for bad in [0.0, -0.3, 2.5, f32::NAN, f32::INFINITY] {
            assert!(matches!(Matcher::new(bad), Err(FaceError::InvalidInput(_))));
        }
        assert_eq!(Matcher::new(2.0).unwrap().threshold(), 2.0);
        assert_eq!(Matcher::default().threshold(), THRESHOLD);
    }

    #[test]
    fn rounding_for_reports() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(97.12345, 2), 97.12);
        assert_eq!(format_confidence(97.1234), "97.12%");
        assert_eq!(format_confidence(100.0), "100.00%");
    }
}
