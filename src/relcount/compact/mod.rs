//! # Compaction
//!
//! Keeps the number of cached descriptors per node bounded by merging
//! specific degrees into more general ones.
//!
//! ```text
//! check ──(≤ threshold)──▶ done
//!   │
//!   ▼
//! propose ──(no candidate covers ≥ 2 entries)──▶ threshold unreachable
//!   │
//!   ▼
//! merge covered entries into the candidate ──▶ check
//! ```
//!
//! Candidates come from a [`GeneralizationStrategy`], best first. Every
//! merge removes at least one entry, so the loop always terminates.

mod frequency;
mod generalize;
mod worker;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::caching_node::CachingNode;
use super::descriptor::RelationshipDescriptor;
use super::predicate::TreatMissingAs;

pub use frequency::GeneralizeFrequentlyChanging;
pub use generalize::{AverageCardinality, ClassStatistics, GeneralizationStrategy, TypeStatistics};
pub use worker::{compact_in_own_transaction, AsyncCompactor, CompactionMessage};

/// Default maximum number of cached descriptors per node.
pub const DEFAULT_THRESHOLD: usize = 20;

/// Result of one compaction run on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The node was already within the threshold.
    Unnecessary,
    /// The node is within the threshold after `merges` merges.
    Compacted { merges: usize },
    /// No further merge is possible and `remaining` descriptors are still
    /// cached, more than the threshold allows.
    ThresholdUnreachable { merges: usize, remaining: usize },
}

/// Reduces the number of descriptors cached on a node.
pub trait CompactionStrategy: Send + Sync + fmt::Debug {
    fn compact(&self, node: &mut CachingNode) -> CompactionOutcome;
}

// ============================================================================
// ThresholdBasedCompaction
// ============================================================================

/// Merges degrees until at most `threshold` descriptors remain.
#[derive(Debug, Clone)]
pub struct ThresholdBasedCompaction {
    threshold: usize,
    generalization: Arc<dyn GeneralizationStrategy>,
}

impl ThresholdBasedCompaction {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            generalization: Arc::new(GeneralizeFrequentlyChanging),
        }
    }

    pub fn with_generalization(mut self, generalization: Arc<dyn GeneralizationStrategy>) -> Self {
        self.generalization = generalization;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The best candidate that covers at least two cached descriptors,
    /// together with the descriptors it covers.
    fn next_merge(&self, node: &CachingNode) -> Option<(RelationshipDescriptor, Vec<RelationshipDescriptor>)> {
        let degrees = node.degrees();
        self.generalization.generalizations(degrees).find_map(|candidate| {
            let covered: Vec<RelationshipDescriptor> = degrees
                .keys()
                .filter(|cached| candidate.is_more_general_than(cached, TreatMissingAs::Undefined))
                .cloned()
                .collect();
            (covered.len() >= 2).then_some((candidate, covered))
        })
    }
}

impl Default for ThresholdBasedCompaction {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl CompactionStrategy for ThresholdBasedCompaction {
    fn compact(&self, node: &mut CachingNode) -> CompactionOutcome {
        let mut merges = 0;
        loop {
            let cached = node.cache().len();
            if cached <= self.threshold {
                if merges > 0 {
                    debug!(node = %node.id(), merges, cached, "compaction finished");
                    return CompactionOutcome::Compacted { merges };
                }
                return CompactionOutcome::Unnecessary;
            }

            let Some((generalization, covered)) = self.next_merge(node) else {
                warn!(
                    node = %node.id(),
                    threshold = self.threshold,
                    cached,
                    "compaction threshold unreachable, consider raising it or excluding properties"
                );
                return CompactionOutcome::ThresholdUnreachable { merges, remaining: cached };
            };
            node.merge(generalization, &covered);
            merges += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, NodeId, PropertyMap};
    use crate::relcount::cache::{PropertyBuffer, SingleNodePropertyCaching};
    use crate::relcount::counter::count_cached;
    use crate::relcount::degree_cache::DegreeMap;
    use crate::relcount::descriptor::DescriptorFormat;
    use crate::Error;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn d(s: &str) -> RelationshipDescriptor {
        s.parse().unwrap()
    }

    fn node_with(degrees: &[(&str, i64)]) -> CachingNode {
        let mut node = CachingNode::from_buffer(
            PropertyBuffer::from_properties(NodeId(1), PropertyMap::new()),
            &SingleNodePropertyCaching,
            &DescriptorFormat::default(),
        )
        .unwrap();
        for (descriptor, degree) in degrees {
            node.increment(d(descriptor), *degree).unwrap();
        }
        node
    }

    fn strategies() -> Vec<Arc<dyn GeneralizationStrategy>> {
        vec![Arc::new(GeneralizeFrequentlyChanging), Arc::new(AverageCardinality)]
    }

    #[test]
    fn nothing_to_do_within_threshold() {
        let mut node = node_with(&[("test#OUTGOING#k1#v1", 1), ("test#OUTGOING#k1#v2", 1)]);
        assert_eq!(ThresholdBasedCompaction::new(2).compact(&mut node), CompactionOutcome::Unnecessary);
        assert_eq!(node.cache().len(), 2);
    }

    #[test]
    fn single_key_collapses_into_wildcard() {
        for strategy in strategies() {
            let mut node = node_with(&[
                ("test#OUTGOING#k1#v1", 14),
                ("test#OUTGOING#k1#v2", 1),
                ("test#OUTGOING#k1#v3", 2),
                ("test#OUTGOING#k1#v4", 3),
            ]);
            let outcome = ThresholdBasedCompaction::new(3).with_generalization(strategy).compact(&mut node);

            assert_eq!(outcome, CompactionOutcome::Compacted { merges: 1 });
            assert_eq!(node.degrees(), &DegreeMap::from([(d("test#OUTGOING#k1#*"), 20)]));
            assert!(matches!(
                count_cached(node.degrees(), &d("test#OUTGOING#k1#v1"), TreatMissingAs::Undefined),
                Err(Error::UnableToCount(_))
            ));
            assert_eq!(count_cached(node.degrees(), &d("test#OUTGOING"), TreatMissingAs::Any).unwrap(), 20);
        }
    }

    fn two_key_grid() -> Vec<(String, i64)> {
        let mut entries = Vec::new();
        for k1 in ["v1", "v2"] {
            for k2 in ["v1", "v2", "v3", "v4"] {
                entries.push((format!("test#OUTGOING#k1#{k1}#k2#{k2}"), 1));
            }
        }
        entries
    }

    #[test]
    fn frequently_changing_key_is_generalized_first() {
        for strategy in strategies() {
            let grid = two_key_grid();
            let refs: Vec<(&str, i64)> = grid.iter().map(|(s, c)| (s.as_str(), *c)).collect();
            let mut node = node_with(&refs);

            let outcome = ThresholdBasedCompaction::new(4).with_generalization(strategy).compact(&mut node);

            assert_eq!(outcome, CompactionOutcome::Compacted { merges: 2 });
            assert_eq!(
                node.degrees(),
                &DegreeMap::from([
                    (d("test#OUTGOING#k1#v1#k2#*"), 4),
                    (d("test#OUTGOING#k1#v2#k2#*"), 4),
                ])
            );
        }
    }

    #[test]
    fn multi_level_generalization() {
        let mut node = node_with(&[
            ("test#OUTGOING#z1#v1#k2#a#k3#a", 1),
            ("test#OUTGOING#z1#v1#k2#b#k3#b", 1),
            ("test#OUTGOING#z1#v1#k2#c#k3#c", 1),
            ("test#OUTGOING#z1#v1#k2#d#k3#d", 1),
            ("test#OUTGOING#z1#v1#k2#e#k3#e", 1),
        ]);
        let outcome = ThresholdBasedCompaction::new(4).compact(&mut node);

        assert_eq!(outcome, CompactionOutcome::Compacted { merges: 1 });
        assert_eq!(node.degrees(), &DegreeMap::from([(d("test#OUTGOING#z1#v1#k2#*#k3#*"), 5)]));
        assert!(matches!(
            count_cached(node.degrees(), &d("test#OUTGOING#k2#whatever"), TreatMissingAs::Any),
            Err(Error::UnableToCount(_))
        ));
        assert_eq!(count_cached(node.degrees(), &d("test#OUTGOING#z1#v1"), TreatMissingAs::Any).unwrap(), 5);
    }

    #[test]
    fn impossible_compaction_is_detected() {
        for strategy in strategies() {
            let mut node = node_with(&[
                ("A#OUTGOING#k#1", 1),
                ("B#OUTGOING#k#1", 1),
                ("C#INCOMING#k#1", 1),
                ("D#OUTGOING", 1),
                ("E#INCOMING#x#y", 1),
            ]);
            let before = node.degrees().clone();
            let outcome = ThresholdBasedCompaction::new(4).with_generalization(strategy).compact(&mut node);

            assert_eq!(outcome, CompactionOutcome::ThresholdUnreachable { merges: 0, remaining: 5 });
            assert_eq!(node.degrees(), &before);
        }
    }

    #[test]
    fn wildcards_of_other_classes_are_left_alone() {
        let mut node = node_with(&[("T#OUTGOING#k#*", 5)]);
        node.increment(d("U#OUTGOING#k#a"), 1).unwrap();
        node.increment(d("U#OUTGOING#k#b"), 1).unwrap();
        let outcome = ThresholdBasedCompaction::new(2).compact(&mut node);

        assert_eq!(outcome, CompactionOutcome::Compacted { merges: 1 });
        assert_eq!(node.cache().get(&d("U#OUTGOING#k#*")), Some(2));
        assert_eq!(node.cache().total(), 7);
    }

    fn arb_cached() -> impl Strategy<Value = Vec<(RelationshipDescriptor, i64)>> {
        let concrete = prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")];
        let descriptor = (
            prop_oneof![Just("R"), Just("S")],
            prop_oneof![Just(Direction::Outgoing), Just(Direction::Incoming)],
            prop::collection::btree_map(prop_oneof![Just("p"), Just("q"), Just("r")], concrete, 0..3),
        )
            .prop_map(|(t, dir, props)| RelationshipDescriptor::with_properties(t, dir, props));
        prop::collection::vec((descriptor, 1i64..20), 0..16)
    }

    proptest! {
        #[test]
        fn compaction_conserves_counts(entries in arb_cached(), threshold in 1usize..6, average in any::<bool>()) {
            let mut node = node_with(&[]);
            for (descriptor, degree) in &entries {
                node.increment(descriptor.clone(), *degree).unwrap();
            }
            let before = node.cache().total();
            let strategy: Arc<dyn GeneralizationStrategy> = if average {
                Arc::new(AverageCardinality)
            } else {
                Arc::new(GeneralizeFrequentlyChanging)
            };

            let outcome = ThresholdBasedCompaction::new(threshold).with_generalization(strategy).compact(&mut node);

            prop_assert_eq!(node.cache().total(), before);
            for (descriptor, _) in &entries {
                prop_assert!(node.cache().find_covering(descriptor).is_some());
            }
            match outcome {
                CompactionOutcome::ThresholdUnreachable { remaining, .. } => prop_assert!(remaining > threshold),
                _ => prop_assert!(node.cache().len() <= threshold),
            }
        }
    }
}
