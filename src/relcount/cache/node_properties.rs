use std::collections::BTreeSet;

use crate::model::Value;
use crate::relcount::degree_cache::DegreeMap;
use crate::relcount::descriptor::{DescriptorFormat, RelationshipDescriptor};
use crate::{Error, Result};

use super::{DegreeCachingStrategy, PropertyBuffer};

/// One integer property per cached descriptor, keyed by the serialized
/// descriptor.
///
/// Only the entries a transaction touched are rewritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodePropertiesCaching;

impl DegreeCachingStrategy for NodePropertiesCaching {
    fn read_degrees(&self, props: &PropertyBuffer, format: &DescriptorFormat) -> Result<DegreeMap> {
        let mut degrees = DegreeMap::new();
        for key in props.keys_with_prefix(format.prefix()) {
            let descriptor = format.parse(&key)?;
            let degree = props.get(&key).and_then(Value::as_int).ok_or_else(|| {
                Error::StorageError(format!("cached degree '{key}' on node {} is not an integer", props.node()))
            })?;
            degrees.insert(descriptor, degree);
        }
        Ok(degrees)
    }

    fn write_degrees(
        &self,
        props: &mut PropertyBuffer,
        format: &DescriptorFormat,
        degrees: &DegreeMap,
        updated: &BTreeSet<RelationshipDescriptor>,
        removed: &BTreeSet<RelationshipDescriptor>,
    ) -> Result<()> {
        for descriptor in removed {
            props.remove(&format.serialize(descriptor));
        }
        for descriptor in updated {
            if let Some(&degree) = degrees.get(descriptor) {
                props.set(format.serialize(descriptor), Value::Int(degree));
            }
        }
        Ok(())
    }
}
