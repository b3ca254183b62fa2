//! # Relationship degree cache
//!
//! Per-node counts of relationships by (type, direction, properties),
//! kept in node properties and compacted by generalization.
//!
//! ```text
//! TransactionData ──▶ RelcountModule ──▶ CachingSession ──▶ CachingNode ──▶ DegreeCachingStrategy
//!                                                               │                    │
//!                                                      CompactionStrategy      PropertyBuffer
//!                                                               │                    │
//!                                                   GeneralizationStrategy    StorageBackend
//! ```
//!
//! | Piece | Module |
//! |-------|--------|
//! | Descriptor lattice | `predicate`, `descriptor` |
//! | Cached degrees of one node | `degree_cache`, `caching_node` |
//! | Storage encodings | `cache` |
//! | Compaction and its heuristics | `compact` |
//! | Queries | `counter` |
//! | Lifecycle and event routing | `session`, `module`, `config` |

pub mod cache;
pub mod caching_node;
pub mod compact;
pub mod config;
pub mod counter;
pub mod degree_cache;
pub mod descriptor;
pub mod module;
pub mod predicate;
pub mod session;

pub use cache::{DegreeCachingStrategy, NodePropertiesCaching, PropertyBuffer, SingleNodePropertyCaching};
pub use caching_node::CachingNode;
pub use compact::{
    AsyncCompactor, AverageCardinality, CompactionOutcome, CompactionStrategy, GeneralizationStrategy,
    GeneralizeFrequentlyChanging, ThresholdBasedCompaction,
};
pub use config::{
    CompactionMode, ExcludeProperties, ExtractAsIs, IncludeAllProperties, IncludeAllRelationships,
    IncludeNoProperties, OneForEach, PropertyExtractionStrategy, PropertyInclusionPolicy, RelcountConfig,
    RelationshipInclusionPolicy, WeighingStrategy,
};
pub use counter::{count_cached, CachedRelationshipCounter};
pub use degree_cache::{DegreeCache, DegreeMap};
pub use descriptor::{DescriptorFormat, RelationshipDescriptor};
pub use module::{RelcountModule, DEFAULT_MODULE_ID};
pub use predicate::{Predicate, TreatMissingAs};
pub use session::CachingSession;
