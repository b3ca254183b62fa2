use std::collections::BTreeSet;

use tracing::trace;

use crate::model::Value;
use crate::relcount::degree_cache::DegreeMap;
use crate::relcount::descriptor::{DescriptorFormat, RelationshipDescriptor};
use crate::{Error, Result};

use super::{DegreeCachingStrategy, PropertyBuffer};

/// The whole degree map as one JSON-encoded byte property, stored under the
/// bare key prefix.
///
/// Any change rewrites the full map; an emptied map removes the property.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNodePropertyCaching;

impl DegreeCachingStrategy for SingleNodePropertyCaching {
    fn read_degrees(&self, props: &PropertyBuffer, format: &DescriptorFormat) -> Result<DegreeMap> {
        match props.get(format.prefix()) {
            None => Ok(DegreeMap::new()),
            Some(Value::Bytes(bytes)) => Ok(serde_json::from_slice(bytes)?),
            Some(other) => Err(Error::StorageError(format!(
                "cached degrees on node {} are a {}, expected bytes",
                props.node(),
                other.type_name()
            ))),
        }
    }

    fn write_degrees(
        &self,
        props: &mut PropertyBuffer,
        format: &DescriptorFormat,
        degrees: &DegreeMap,
        updated: &BTreeSet<RelationshipDescriptor>,
        removed: &BTreeSet<RelationshipDescriptor>,
    ) -> Result<()> {
        if updated.is_empty() && removed.is_empty() {
            return Ok(());
        }
        if degrees.is_empty() {
            props.remove(format.prefix());
            return Ok(());
        }
        let encoded = serde_json::to_vec(degrees)?;
        trace!(node = %props.node(), bytes = encoded.len(), "writing degree blob");
        props.set(format.prefix(), Value::Bytes(encoded));
        Ok(())
    }
}
