use std::collections::{BTreeSet, VecDeque};

use crate::relcount::degree_cache::DegreeMap;
use crate::relcount::descriptor::RelationshipDescriptor;
use crate::relcount::predicate::{Predicate, TreatMissingAs};

use super::generalize::{class_of, DescriptorClass, GeneralizationStrategy, TypeStatistics};

/// Generalizes the properties that change most often first.
///
/// Property keys are ranked by [`super::ClassStatistics::frequency`]. Key
/// sets to erase are then built lazily in rank order: each newly ranked key
/// forms a set of its own, plus one set per earlier set of the same class
/// extended by it. For each key set the generalization covering the most
/// cached descriptors is proposed, provided it covers more than one.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralizeFrequentlyChanging;

impl GeneralizationStrategy for GeneralizeFrequentlyChanging {
    fn generalizations<'a>(&self, cached: &'a DegreeMap) -> Box<dyn Iterator<Item = RelationshipDescriptor> + 'a> {
        Box::new(LazyGeneralizations::new(cached))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeySet {
    class: DescriptorClass,
    keys: BTreeSet<String>,
}

struct LazyGeneralizations<'a> {
    cached: &'a DegreeMap,
    ranked: std::vec::IntoIter<(DescriptorClass, String)>,
    built: Vec<KeySet>,
    pending: VecDeque<KeySet>,
    proposed: BTreeSet<RelationshipDescriptor>,
}

impl<'a> LazyGeneralizations<'a> {
    fn new(cached: &'a DegreeMap) -> Self {
        let stats = TypeStatistics::collect(cached);
        let mut ranked: Vec<(f64, DescriptorClass, String)> = stats
            .classes()
            .flat_map(|(class, class_stats)| {
                class_stats
                    .keys()
                    .map(move |key| (class_stats.frequency(key), class.clone(), key.clone()))
            })
            .collect();
        ranked.sort_by(|(fa, ca, ka), (fb, cb, kb)| {
            fb.total_cmp(fa).then_with(|| ca.cmp(cb)).then_with(|| ka.cmp(kb))
        });

        Self {
            cached,
            ranked: ranked
                .into_iter()
                .map(|(_, class, key)| (class, key))
                .collect::<Vec<_>>()
                .into_iter(),
            built: Vec::new(),
            pending: VecDeque::new(),
            proposed: BTreeSet::new(),
        }
    }

    /// Queue the key sets the next ranked key gives rise to. False when all
    /// keys have been used.
    fn extend_key_sets(&mut self) -> bool {
        let Some((class, key)) = self.ranked.next() else {
            return false;
        };
        let mut fresh = vec![KeySet { class: class.clone(), keys: BTreeSet::from([key.clone()]) }];
        for earlier in self.built.iter().filter(|s| s.class == class) {
            let mut keys = earlier.keys.clone();
            keys.insert(key.clone());
            fresh.push(KeySet { class: class.clone(), keys });
        }
        self.built.extend(fresh.iter().cloned());
        self.pending.extend(fresh);
        true
    }

    /// The generalization erasing `set` that covers the most cached
    /// descriptors, if it covers more than one.
    fn best_for(&self, set: &KeySet) -> Option<RelationshipDescriptor> {
        let candidates: BTreeSet<RelationshipDescriptor> = self
            .cached
            .keys()
            .filter(|d| class_of(d) == set.class)
            .map(|d| set.keys.iter().fold(d.clone(), |g, key| g.with(key.clone(), Predicate::Any)))
            .collect();

        let mut best: Option<(usize, RelationshipDescriptor)> = None;
        for candidate in candidates {
            let covered = self
                .cached
                .keys()
                .filter(|c| candidate.is_more_general_than(c, TreatMissingAs::Undefined))
                .count();
            if covered > 1 && best.as_ref().is_none_or(|(most, _)| covered > *most) {
                best = Some((covered, candidate));
            }
        }
        best.map(|(_, candidate)| candidate)
    }
}

impl Iterator for LazyGeneralizations<'_> {
    type Item = RelationshipDescriptor;

    fn next(&mut self) -> Option<RelationshipDescriptor> {
        loop {
            let set = match self.pending.pop_front() {
                Some(set) => set,
                None if self.extend_key_sets() => continue,
                None => return None,
            };
            if let Some(candidate) = self.best_for(&set)
                && self.proposed.insert(candidate.clone())
            {
                return Some(candidate);
            }
        }
    }
}
