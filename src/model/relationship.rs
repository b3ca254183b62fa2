//! Relationship (edge) in the property graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use super::{NodeId, PropertyMap, Value};

/// Opaque relationship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a relationship as seen from one of its nodes.
///
/// `Both` only ever appears in queries; cached degrees are always recorded
/// as `Outgoing` or `Incoming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Both => Direction::Both,
        }
    }

    /// True if a relationship seen in direction `other` satisfies `self`.
    pub fn matches(self, other: Direction) -> bool {
        self == other || self == Direction::Both || other == Direction::Both
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Outgoing => "OUTGOING",
            Direction::Incoming => "INCOMING",
            Direction::Both => "BOTH",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OUTGOING" => Ok(Direction::Outgoing),
            "INCOMING" => Ok(Direction::Incoming),
            "BOTH" => Ok(Direction::Both),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// A relationship (directed edge) in the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(id: RelId, src: NodeId, dst: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            src,
            dst,
            rel_type: rel_type.into(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_loop(&self) -> bool {
        self.src == self.dst
    }

    /// Every (node, direction) pair this relationship is visible from.
    ///
    /// A loop yields both directions on the same node.
    pub fn perspectives(&self) -> SmallVec<[(NodeId, Direction); 2]> {
        smallvec![(self.src, Direction::Outgoing), (self.dst, Direction::Incoming)]
    }

    /// Directions this relationship has when viewed from `node`.
    pub fn directions_from(&self, node: NodeId) -> SmallVec<[Direction; 2]> {
        self.perspectives()
            .into_iter()
            .filter(|(n, _)| *n == node)
            .map(|(_, d)| d)
            .collect()
    }
}
