//! Candidate generalizations, best first.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::Direction;
use crate::relcount::degree_cache::DegreeMap;
use crate::relcount::descriptor::RelationshipDescriptor;
use crate::relcount::predicate::{Predicate, TreatMissingAs};

/// Proposes generalizations of the cached descriptors of one node.
///
/// The iterator is consumed lazily: compaction stops at the first candidate
/// worth merging. Every candidate must stay within the type and direction
/// of the descriptors it generalizes.
pub trait GeneralizationStrategy: Send + Sync + fmt::Debug {
    fn generalizations<'a>(&self, cached: &'a DegreeMap) -> Box<dyn Iterator<Item = RelationshipDescriptor> + 'a>;
}

// ============================================================================
// Statistics
// ============================================================================

/// (type, direction): the scope of every generalization.
pub type DescriptorClass = (String, Direction);

/// Value statistics of the cached descriptors, per [`DescriptorClass`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeStatistics {
    classes: BTreeMap<DescriptorClass, ClassStatistics>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassStatistics {
    degree: i64,
    keys: BTreeMap<String, KeyStatistics>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct KeyStatistics {
    /// Distinct concrete values; `None` stands for "property absent".
    values: BTreeSet<Option<String>>,
    /// Degree already hidden behind a wildcard for this key.
    wildcarded: i64,
}

impl TypeStatistics {
    pub fn collect(cached: &DegreeMap) -> Self {
        let mut classes: BTreeMap<DescriptorClass, ClassStatistics> = BTreeMap::new();
        for (descriptor, degree) in cached {
            let class = classes.entry(class_of(descriptor)).or_default();
            class.degree += degree;
            for key in descriptor.keys() {
                class.keys.entry(key.clone()).or_default();
            }
        }

        for (descriptor, degree) in cached {
            let Some(class) = classes.get_mut(&class_of(descriptor)) else { continue };
            for (key, stats) in class.keys.iter_mut() {
                match descriptor.get(key, TreatMissingAs::Undefined) {
                    Predicate::Any => stats.wildcarded += degree,
                    Predicate::Concrete(v) => {
                        stats.values.insert(Some(v.clone()));
                    }
                    Predicate::Undefined => {
                        stats.values.insert(None);
                    }
                }
            }
        }
        Self { classes }
    }

    pub fn class(&self, rel_type: &str, direction: Direction) -> Option<&ClassStatistics> {
        self.classes.get(&(rel_type.to_string(), direction))
    }

    pub fn of(&self, descriptor: &RelationshipDescriptor) -> Option<&ClassStatistics> {
        self.class(descriptor.rel_type(), descriptor.direction())
    }

    pub fn classes(&self) -> impl Iterator<Item = (&DescriptorClass, &ClassStatistics)> {
        self.classes.iter()
    }
}

impl ClassStatistics {
    /// Sum of the cached degrees of the class.
    pub fn degree(&self) -> i64 {
        self.degree
    }

    /// Every property key seen on a descriptor of the class.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.keys()
    }

    /// How close the number of values of `key` comes to the number of
    /// relationships: `(distinct values + wildcarded degree) / (degree + 1)`.
    pub fn frequency(&self, key: &str) -> f64 {
        self.keys.get(key).map_or(0.0, |stats| {
            (stats.values.len() as f64 + stats.wildcarded as f64) / (self.degree as f64 + 1.0)
        })
    }
}

pub(super) fn class_of(descriptor: &RelationshipDescriptor) -> DescriptorClass {
    (descriptor.rel_type().to_string(), descriptor.direction())
}

// ============================================================================
// AverageCardinality
// ============================================================================

/// Scores every generalization of every cached descriptor by the average
/// specificity of its keys and proposes the highest scores first.
///
/// A concrete key scores 1; a wildcard key scores the frequency of that key.
/// Erasing a key that takes about as many values as there are relationships
/// therefore costs little, while erasing a stable key costs a lot.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageCardinality;

impl AverageCardinality {
    fn score(stats: &ClassStatistics, candidate: &RelationshipDescriptor) -> f64 {
        let keys: Vec<&String> = stats.keys().collect();
        let sum: f64 = keys
            .iter()
            .map(|key| match candidate.get(key, TreatMissingAs::Undefined) {
                Predicate::Any => stats.frequency(key),
                _ => 1.0,
            })
            .sum();
        (1.0 + sum) / (keys.len() as f64 + 1.0)
    }
}

impl GeneralizationStrategy for AverageCardinality {
    fn generalizations<'a>(&self, cached: &'a DegreeMap) -> Box<dyn Iterator<Item = RelationshipDescriptor> + 'a> {
        let stats = TypeStatistics::collect(cached);

        let mut candidates = BTreeSet::new();
        for descriptor in cached.keys() {
            let Some(class) = stats.of(descriptor) else { continue };
            candidates.extend(descriptor.generalize_all(class.keys()));
        }

        let mut scored: Vec<(f64, RelationshipDescriptor)> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let class = stats.of(&candidate)?;
                Some((Self::score(class, &candidate), candidate))
            })
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.cmp(b)));

        Box::new(scored.into_iter().map(|(_, candidate)| candidate))
    }
}
