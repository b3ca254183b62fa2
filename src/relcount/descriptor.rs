//! Relationship descriptors: the cache keys of the degree cache.
//!
//! A [`RelationshipDescriptor`] is a (type, direction, property predicates)
//! shape. Descriptors form a partial order by generality: turning a concrete
//! predicate into [`Predicate::Any`] yields a more general descriptor that
//! covers every relationship the original covered, and more.
//!
//! The order is evaluated with an explicit [`TreatMissingAs`] for the general
//! (query) side. The specific side is always a cached shape, whose missing
//! keys mean "property absent".

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::predicate::{Predicate, TreatMissingAs, ANY_TOKEN};
use crate::model::Direction;
use crate::{Error, Result};

/// Separator between the parts of a serialized descriptor.
pub const DEFAULT_SEPARATOR: &str = "#";

/// Marks the next character of a serialized descriptor as literal.
pub const ESCAPE: char = '\\';

static UNDEFINED: Predicate = Predicate::Undefined;
static ANY: Predicate = Predicate::Any;

/// A (type, direction, property predicates) shape.
///
/// Explicit [`Predicate::Undefined`] entries are never stored: absence of a
/// key already carries that meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationshipDescriptor {
    rel_type: String,
    direction: Direction,
    properties: BTreeMap<String, Predicate>,
}

impl RelationshipDescriptor {
    pub fn new(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_properties<K, P>(
        rel_type: impl Into<String>,
        direction: Direction,
        properties: impl IntoIterator<Item = (K, P)>,
    ) -> Self
    where
        K: Into<String>,
        P: Into<Predicate>,
    {
        properties
            .into_iter()
            .fold(Self::new(rel_type, direction), |d, (k, p)| d.with(k, p))
    }

    /// Copy of this descriptor with `key` constrained by `predicate`.
    pub fn with(&self, key: impl Into<String>, predicate: impl Into<Predicate>) -> Self {
        let mut result = self.clone();
        let key = key.into();
        match predicate.into() {
            Predicate::Undefined => {
                result.properties.remove(&key);
            }
            p => {
                result.properties.insert(key, p);
            }
        }
        result
    }

    /// Copy of this descriptor with a different direction.
    pub fn with_direction(&self, direction: Direction) -> Self {
        Self { direction, ..self.clone() }
    }

    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn properties(&self) -> &BTreeMap<String, Predicate> {
        &self.properties
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    /// Predicate for `key`, falling back to `missing` when the key is absent.
    pub fn get(&self, key: &str, missing: TreatMissingAs) -> &Predicate {
        self.properties.get(key).unwrap_or(match missing {
            TreatMissingAs::Undefined => &UNDEFINED,
            TreatMissingAs::Any => &ANY,
        })
    }

    pub fn concrete_keys(&self) -> impl Iterator<Item = &String> {
        self.properties.iter().filter(|(_, p)| p.is_concrete()).map(|(k, _)| k)
    }

    pub fn wildcard_count(&self) -> usize {
        self.properties.values().filter(|p| p.is_any()).count()
    }

    // ========================================================================
    // Partial order
    // ========================================================================

    /// True if every relationship matching `other` (a cached shape) also
    /// matches `self`, where `self` treats its missing keys as `missing`.
    /// Reflexive.
    pub fn is_more_general_than(&self, other: &Self, missing: TreatMissingAs) -> bool {
        covers(self, missing, other)
    }

    /// True if every relationship matching `self` (a cached shape) also
    /// matches `other`, where `other` treats its missing keys as `missing`.
    /// Reflexive.
    pub fn is_more_specific_than(&self, other: &Self, missing: TreatMissingAs) -> bool {
        covers(other, missing, self)
    }

    /// Cached-shape comparison that excludes equality.
    pub fn is_strictly_more_general_than(&self, other: &Self) -> bool {
        self != other && self.is_more_general_than(other, TreatMissingAs::Undefined)
    }

    /// True if no relationship can match both `self` (a cached shape) and
    /// `other`, where `other` treats its missing keys as `missing`.
    pub fn is_mutually_exclusive(&self, other: &Self, missing: TreatMissingAs) -> bool {
        if self.rel_type != other.rel_type || !self.direction.matches(other.direction) {
            return true;
        }
        union_keys(self, other).any(|key| {
            !self.get(key, TreatMissingAs::Undefined).compatible(other.get(key, missing))
        })
    }

    // ========================================================================
    // Generalization
    // ========================================================================

    /// Descriptors with exactly one concrete key turned into a wildcard.
    pub fn generalize_one_step(&self) -> BTreeSet<Self> {
        self.concrete_keys().map(|k| self.with(k.clone(), Predicate::Any)).collect()
    }

    /// Every strictly more general descriptor.
    ///
    /// `known_keys` adds keys this descriptor does not carry (the property is
    /// absent here) as further candidates for a wildcard, so that shapes of the
    /// same type and direction but with different key sets can meet in a
    /// common generalization. The result has `2^n - 1` members for `n`
    /// generalizable keys.
    pub fn generalize_all<'k>(&self, known_keys: impl IntoIterator<Item = &'k String>) -> BTreeSet<Self> {
        let mut keys: BTreeSet<String> = self.concrete_keys().cloned().collect();
        keys.extend(known_keys.into_iter().filter(|k| !self.properties.contains_key(*k)).cloned());

        let mut lattice = BTreeSet::from([self.clone()]);
        for key in keys {
            let widened: Vec<Self> = lattice.iter().map(|d| d.with(key.clone(), Predicate::Any)).collect();
            lattice.extend(widened);
        }
        lattice.remove(self);
        lattice
    }
}

/// `general` (missing keys as `missing`) covers `specific` (missing keys undefined).
fn covers(general: &RelationshipDescriptor, missing: TreatMissingAs, specific: &RelationshipDescriptor) -> bool {
    if general.rel_type != specific.rel_type {
        return false;
    }
    if general.direction != Direction::Both && general.direction != specific.direction {
        return false;
    }
    union_keys(general, specific).all(|key| {
        general.get(key, missing).covers(specific.get(key, TreatMissingAs::Undefined))
    })
}

fn union_keys<'a>(
    a: &'a RelationshipDescriptor,
    b: &'a RelationshipDescriptor,
) -> impl Iterator<Item = &'a String> + 'a {
    a.properties
        .keys()
        .chain(b.properties.keys().filter(|k| !a.properties.contains_key(*k)))
}

// ============================================================================
// Total order
// ============================================================================

/// More specific shapes sort first: fewer wildcards, then fewer keys, then
/// type, direction and properties. A strictly more general descriptor always
/// carries more wildcards, so it always sorts after what it generalizes.
impl Ord for RelationshipDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wildcard_count()
            .cmp(&other.wildcard_count())
            .then_with(|| self.properties.len().cmp(&other.properties.len()))
            .then_with(|| self.rel_type.cmp(&other.rel_type))
            .then_with(|| self.direction.cmp(&other.direction))
            .then_with(|| self.properties.cmp(&other.properties))
    }
}

impl PartialOrd for RelationshipDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// Key layout of serialized descriptors:
/// `prefix + type + sep + DIRECTION + (sep + key + sep + value)*`.
///
/// Inside type, keys and values, [`ESCAPE`] and the first character of the
/// separator are preceded by [`ESCAPE`]. A concrete value equal to
/// [`ANY_TOKEN`] is escaped too, so only a wildcard renders as a bare `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorFormat {
    prefix: String,
    separator: String,
}

/// One separator-delimited part of a serialized descriptor.
#[derive(Debug, Default)]
struct Token {
    text: String,
    escaped: bool,
}

impl DescriptorFormat {
    /// Fails if `separator` is empty or contains [`ESCAPE`] or [`ANY_TOKEN`].
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Result<Self> {
        let separator = separator.into();
        if separator.is_empty() || separator.contains(ESCAPE) || separator.contains(ANY_TOKEN) {
            return Err(Error::InvalidDescriptor(format!("unusable separator '{separator}'")));
        }
        Ok(Self { prefix: prefix.into(), separator })
    }

    /// Format used for the degrees cached by the module with the given id.
    pub fn for_module(id: &str) -> Self {
        Self {
            prefix: format!("_RC_{id}_"),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn is_degree_key(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    pub fn serialize(&self, descriptor: &RelationshipDescriptor) -> String {
        let mut out = String::with_capacity(self.prefix.len() + descriptor.rel_type.len() + 16);
        out.push_str(&self.prefix);
        self.escape_into(&mut out, &descriptor.rel_type);
        out.push_str(&self.separator);
        out.push_str(descriptor.direction.as_str());
        for (key, predicate) in &descriptor.properties {
            out.push_str(&self.separator);
            self.escape_into(&mut out, key);
            out.push_str(&self.separator);
            match predicate {
                Predicate::Any => out.push_str(ANY_TOKEN),
                Predicate::Concrete(value) => {
                    if value == ANY_TOKEN {
                        out.push(ESCAPE);
                    }
                    self.escape_into(&mut out, value);
                }
                Predicate::Undefined => {}
            }
        }
        out
    }

    pub fn parse(&self, key: &str) -> Result<RelationshipDescriptor> {
        let body = key.strip_prefix(self.prefix.as_str()).ok_or_else(|| {
            Error::InvalidDescriptor(format!("'{key}' does not start with '{}'", self.prefix))
        })?;

        let mut parts = self.tokens(key, body)?.into_iter();
        let rel_type = match parts.next() {
            Some(t) if !t.text.is_empty() => t.text,
            _ => return Err(Error::InvalidDescriptor(format!("'{key}' has no relationship type"))),
        };
        let direction = match parts.next() {
            Some(t) if !t.escaped => t.text.parse::<Direction>().map_err(Error::InvalidDescriptor)?,
            _ => return Err(Error::InvalidDescriptor(format!("'{key}' has no direction"))),
        };

        let rest: Vec<Token> = parts.collect();
        // "type#DIR#" is accepted as a descriptor without properties
        let rest = match &rest[..] {
            [only] if only.text.is_empty() && !only.escaped => &[][..],
            all => all,
        };
        if rest.len() % 2 != 0 {
            return Err(Error::InvalidDescriptor(format!("'{key}' has a property key without a value")));
        }

        let mut descriptor = RelationshipDescriptor::new(rel_type, direction);
        for pair in rest.chunks(2) {
            let value = &pair[1];
            let predicate = if !value.escaped && value.text == ANY_TOKEN {
                Predicate::Any
            } else {
                Predicate::Concrete(value.text.clone())
            };
            descriptor.properties.insert(pair[0].text.clone(), predicate);
        }
        Ok(descriptor)
    }

    fn escape_into(&self, out: &mut String, text: &str) {
        let lead = self.separator.chars().next();
        for c in text.chars() {
            if c == ESCAPE || Some(c) == lead {
                out.push(ESCAPE);
            }
            out.push(c);
        }
    }

    fn tokens(&self, key: &str, body: &str) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut current = Token::default();
        let mut rest = body;
        while let Some(c) = rest.chars().next() {
            if c == ESCAPE {
                let mut chars = rest[c.len_utf8()..].chars();
                let literal = chars.next().ok_or_else(|| {
                    Error::InvalidDescriptor(format!("'{key}' ends in a dangling escape"))
                })?;
                current.text.push(literal);
                current.escaped = true;
                rest = chars.as_str();
            } else if let Some(after) = rest.strip_prefix(self.separator.as_str()) {
                tokens.push(std::mem::take(&mut current));
                rest = after;
            } else {
                current.text.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
        tokens.push(current);
        Ok(tokens)
    }
}

impl Default for DescriptorFormat {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl fmt::Display for RelationshipDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&DescriptorFormat::default().serialize(self))
    }
}

impl FromStr for RelationshipDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DescriptorFormat::default().parse(s)
    }
}

impl TryFrom<String> for RelationshipDescriptor {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<RelationshipDescriptor> for String {
    fn from(d: RelationshipDescriptor) -> Self {
        d.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(s: &str) -> RelationshipDescriptor {
        s.parse().unwrap()
    }

    const CACHED: TreatMissingAs = TreatMissingAs::Undefined;
    const WILDCARD: TreatMissingAs = TreatMissingAs::Any;

    #[test]
    fn wildcard_is_more_general_than_concrete() {
        assert!(d("T#OUTGOING#k1#*").is_more_general_than(&d("T#OUTGOING#k1#v1"), CACHED));
        assert!(d("T#OUTGOING#k1#v1").is_more_specific_than(&d("T#OUTGOING#k1#*"), CACHED));
        assert!(!d("T#OUTGOING#k1#v1").is_more_general_than(&d("T#OUTGOING#k1#*"), CACHED));
    }

    #[test]
    fn order_is_reflexive() {
        let a = d("T#OUTGOING#k1#v1#k2#*");
        assert!(a.is_more_general_than(&a, CACHED));
        assert!(a.is_more_specific_than(&a, CACHED));
        assert!(!a.is_strictly_more_general_than(&a));
    }

    #[test]
    fn wildcard_covers_absent_key_of_cached_shape() {
        assert!(d("T#OUTGOING#k1#*").is_more_general_than(&d("T#OUTGOING"), CACHED));
        assert!(!d("T#OUTGOING").is_more_general_than(&d("T#OUTGOING#k1#v1"), CACHED));
    }

    #[test]
    fn missing_key_semantics_decide_query_matching() {
        let cached = d("T#OUTGOING#k1#v1#k2#v2");
        let query = d("T#OUTGOING#k1#v1");
        assert!(cached.is_more_specific_than(&query, WILDCARD));
        assert!(!cached.is_more_specific_than(&query, CACHED));
        assert!(cached.is_mutually_exclusive(&query, CACHED));
        assert!(!cached.is_mutually_exclusive(&query, WILDCARD));
    }

    #[test]
    fn type_and_direction_must_match() {
        assert!(!d("A#OUTGOING#k#*").is_more_general_than(&d("B#OUTGOING#k#v"), CACHED));
        assert!(!d("A#INCOMING#k#*").is_more_general_than(&d("A#OUTGOING#k#v"), CACHED));
        assert!(d("A#BOTH").is_more_general_than(&d("A#INCOMING"), WILDCARD));
        assert!(d("A#OUTGOING").is_mutually_exclusive(&d("A#INCOMING"), WILDCARD));
        assert!(!d("A#OUTGOING").is_mutually_exclusive(&d("A#BOTH"), WILDCARD));
    }

    #[test]
    fn mutual_exclusivity() {
        let cached = d("T#OUTGOING#k1#v1");
        assert!(cached.is_mutually_exclusive(&d("T#OUTGOING#k1#v2"), WILDCARD));
        assert!(!cached.is_mutually_exclusive(&d("T#OUTGOING#k1#*"), WILDCARD));
        assert!(!d("T#OUTGOING#k1#*").is_mutually_exclusive(&d("T#OUTGOING#k1#v2"), WILDCARD));
        assert!(d("T#OUTGOING").is_mutually_exclusive(&d("T#OUTGOING#k1#v1"), WILDCARD));
    }

    #[test]
    fn with_undefined_removes_key() {
        let a = d("T#OUTGOING#k1#v1").with("k1", Predicate::Undefined);
        assert_eq!(a, d("T#OUTGOING"));
    }

    #[test]
    fn one_step_generalization() {
        let result = d("T#OUTGOING#k1#v1#k2#v2#k3#*").generalize_one_step();
        let expected = BTreeSet::from([d("T#OUTGOING#k1#*#k2#v2#k3#*"), d("T#OUTGOING#k1#v1#k2#*#k3#*")]);
        assert_eq!(result, expected);
    }

    #[test]
    fn all_generalizations_form_a_lattice() {
        let result = d("T#OUTGOING#k1#v1#k2#v2").generalize_all(&[]);
        let expected = BTreeSet::from([
            d("T#OUTGOING#k1#*#k2#v2"),
            d("T#OUTGOING#k1#v1#k2#*"),
            d("T#OUTGOING#k1#*#k2#*"),
        ]);
        assert_eq!(result, expected);
    }

    #[test]
    fn all_generalizations_include_known_absent_keys() {
        let known = ["k1".to_string(), "w".to_string()];
        let result = d("T#OUTGOING#k1#v1").generalize_all(&known);
        assert_eq!(result.len(), 3);
        assert!(result.contains(&d("T#OUTGOING#w#*#k1#v1")));
        assert!(result.contains(&d("T#OUTGOING#k1#*#w#*")));
        assert!(result.iter().all(|g| g.is_strictly_more_general_than(&d("T#OUTGOING#k1#v1"))));
    }

    #[test]
    fn total_order_puts_general_after_specific() {
        let mut list = vec![d("T#OUTGOING#k1#*"), d("T#OUTGOING#k1#v1"), d("S#OUTGOING#k1#v9")];
        list.sort();
        assert_eq!(list, vec![d("S#OUTGOING#k1#v9"), d("T#OUTGOING#k1#v1"), d("T#OUTGOING#k1#*")]);
    }

    #[test]
    fn serialization_with_prefix() {
        let format = DescriptorFormat::for_module("FRC");
        let descriptor = RelationshipDescriptor::new("FRIEND_OF", Direction::Incoming)
            .with("since", "2012")
            .with("weight", Predicate::Any);
        let key = format.serialize(&descriptor);
        assert_eq!(key, "_RC_FRC_FRIEND_OF#INCOMING#since#2012#weight#*");
        assert!(format.is_degree_key(&key));
        assert_eq!(format.parse(&key).unwrap(), descriptor);
    }

    #[test]
    fn keys_are_sorted_for_determinism() {
        let a = RelationshipDescriptor::with_properties("T", Direction::Outgoing, [("b", "1"), ("a", "2")]);
        assert_eq!(a.to_string(), "T#OUTGOING#a#2#b#1");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!("".parse::<RelationshipDescriptor>(), Err(Error::InvalidDescriptor(_))));
        assert!(matches!("T".parse::<RelationshipDescriptor>(), Err(Error::InvalidDescriptor(_))));
        assert!(matches!("T#UP".parse::<RelationshipDescriptor>(), Err(Error::InvalidDescriptor(_))));
        assert!(matches!("T#OUTGOING#k1".parse::<RelationshipDescriptor>(), Err(Error::InvalidDescriptor(_))));
        assert!(DescriptorFormat::for_module("X").parse("T#OUTGOING").is_err());
        assert_eq!(d("T#OUTGOING#"), d("T#OUTGOING"));
    }

    #[test]
    fn serde_uses_string_form() {
        let a = d("T#INCOMING#k#*");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"T#INCOMING#k#*\"");
        assert_eq!(serde_json::from_str::<RelationshipDescriptor>(&json).unwrap(), a);
    }

    #[test]
    fn separator_inside_values_is_escaped() {
        let tagged = RelationshipDescriptor::new("TAGGED", Direction::Outgoing).with("tag", "#rust");
        let key = tagged.to_string();
        assert_eq!(key, "TAGGED#OUTGOING#tag#\\#rust");
        assert_eq!(d(&key), tagged);

        let odd = RelationshipDescriptor::new("A#B", Direction::Incoming).with("k#\\", "v\\");
        assert_eq!(d(&odd.to_string()), odd);
    }

    #[test]
    fn concrete_star_stays_concrete() {
        let star = RelationshipDescriptor::new("RATED", Direction::Outgoing).with("stars", "*");
        assert_eq!(star.to_string(), "RATED#OUTGOING#stars#\\*");
        assert_eq!(d(&star.to_string()).get("stars", CACHED), &Predicate::equal_to("*"));
        assert_eq!(d("RATED#OUTGOING#stars#*").get("stars", CACHED), &Predicate::Any);
        assert!(!star.is_mutually_exclusive(&d("RATED#OUTGOING#stars#*"), CACHED));
        assert!(star.is_mutually_exclusive(&d("RATED#OUTGOING#stars#5"), CACHED));
    }

    #[test]
    fn multi_character_separator() {
        let format = DescriptorFormat::new("p:", "::").unwrap();
        let descriptor = RelationshipDescriptor::new("T:", Direction::Outgoing).with("a", "x:::y").with("b:", Predicate::Any);
        let key = format.serialize(&descriptor);
        assert_eq!(format.parse(&key).unwrap(), descriptor);
    }

    #[test]
    fn unusable_separators_are_rejected() {
        assert!(DescriptorFormat::new("", "").is_err());
        assert!(DescriptorFormat::new("", "*").is_err());
        assert!(DescriptorFormat::new("", "\\").is_err());
        assert!(DescriptorFormat::new("", "|").is_ok());
    }

    #[test]
    fn dangling_escape_is_rejected() {
        assert!(matches!("T#OUTGOING#k#v\\".parse::<RelationshipDescriptor>(), Err(Error::InvalidDescriptor(_))));
    }

    fn arb_descriptor() -> impl Strategy<Value = RelationshipDescriptor> {
        let predicate = prop_oneof![
            1 => Just(Predicate::Any),
            1 => Just(Predicate::equal_to("*")),
            3 => "[a-z0-9#*\\\\]{0,4}".prop_map(Predicate::Concrete),
        ];
        (
            "[A-Z#*\\\\]{1,5}",
            prop_oneof![Just(Direction::Outgoing), Just(Direction::Incoming)],
            prop::collection::btree_map("[a-z#*\\\\]{0,3}", predicate, 0..4),
        )
            .prop_map(|(t, dir, props)| RelationshipDescriptor::with_properties(t, dir, props))
    }

    proptest! {
        #[test]
        fn serialization_round_trips(descriptor in arb_descriptor()) {
            let format = DescriptorFormat::for_module("P");
            prop_assert_eq!(format.parse(&format.serialize(&descriptor)).unwrap(), descriptor);
        }

        #[test]
        fn every_generalization_sorts_after_its_source(descriptor in arb_descriptor()) {
            for g in descriptor.generalize_all(&[]) {
                prop_assert!(g.is_strictly_more_general_than(&descriptor));
                prop_assert!(g > descriptor);
            }
        }
    }
}
