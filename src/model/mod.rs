//! # Property Graph Model
//!
//! Clean DTOs for the property graph whose relationships are being counted.
//! These types cross every boundary: storage ↔ transaction events ↔ degree cache.
//!
//! This module is pure data: no I/O, no state, no async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, Direction};
pub use value::Value;
pub use property_map::{PropertyMap, props};
