//! Query-time degree lookups.

use std::sync::Arc;

use crate::model::NodeId;
use crate::storage::StorageBackend;
use crate::{Error, Result};

use super::cache::{DegreeCachingStrategy, PropertyBuffer};
use super::degree_cache::DegreeMap;
use super::descriptor::{DescriptorFormat, RelationshipDescriptor};
use super::predicate::TreatMissingAs;

/// Sum of the cached degrees matching `query`.
///
/// `missing` states what the keys `query` does not mention mean: any value
/// ([`TreatMissingAs::Any`]) or no such property ([`TreatMissingAs::Undefined`]).
/// A cached descriptor that neither matches nor provably excludes the query
/// was generalized beyond what the query asks for, so the cache cannot
/// answer it.
pub fn count_cached(degrees: &DegreeMap, query: &RelationshipDescriptor, missing: TreatMissingAs) -> Result<i64> {
    let mut count = 0;
    for (cached, degree) in degrees {
        if cached.is_more_specific_than(query, missing) {
            count += degree;
        } else if !cached.is_mutually_exclusive(query, missing) {
            return Err(Error::UnableToCount(format!(
                "'{query}' is more specific than the cached '{cached}'"
            )));
        }
    }
    Ok(count)
}

/// Counts relationships of a node from its cached degrees.
#[derive(Debug, Clone)]
pub struct CachedRelationshipCounter {
    caching: Arc<dyn DegreeCachingStrategy>,
    format: DescriptorFormat,
}

impl CachedRelationshipCounter {
    pub fn new(caching: Arc<dyn DegreeCachingStrategy>, format: DescriptorFormat) -> Self {
        Self { caching, format }
    }

    /// Relationships matching `query`, where keys `query` does not mention
    /// may take any value or be absent.
    pub async fn count<B: StorageBackend>(
        &self,
        backend: &B,
        tx: &B::Tx,
        node: NodeId,
        query: &RelationshipDescriptor,
    ) -> Result<i64> {
        self.count_with(backend, tx, node, query, TreatMissingAs::Any).await
    }

    /// Relationships matching `query` exactly: keys `query` does not mention
    /// must be absent.
    pub async fn count_literally<B: StorageBackend>(
        &self,
        backend: &B,
        tx: &B::Tx,
        node: NodeId,
        query: &RelationshipDescriptor,
    ) -> Result<i64> {
        self.count_with(backend, tx, node, query, TreatMissingAs::Undefined).await
    }

    async fn count_with<B: StorageBackend>(
        &self,
        backend: &B,
        tx: &B::Tx,
        node: NodeId,
        query: &RelationshipDescriptor,
        missing: TreatMissingAs,
    ) -> Result<i64> {
        let props = PropertyBuffer::load(backend, tx, node).await?;
        let degrees = self.caching.read_degrees(&props, &self.format)?;
        count_cached(&degrees, query, missing)
    }
}
