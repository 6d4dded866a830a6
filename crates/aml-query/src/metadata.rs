//! Item type metadata consumed by the compiler.
//!
//! The compiler never talks to a live schema. Declared property types and
//! default sort order come from a [`MetadataProvider`]; caching and
//! staleness are the provider's concern.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared data type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Date,
    Integer,
    Decimal,
    Float,
    Boolean,
    Text,
    /// No declared type; values are sniffed as number, then date, then text
    #[default]
    Unknown,
}

/// Metadata for a single property of an item type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyMeta {
    #[serde(default)]
    pub data_type: PropertyType,

    /// Position in the default sort order (lower sorts first)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<i32>,

    /// Sort descending when used in the default order
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub descending: bool,
}

impl PropertyMeta {
    pub fn of_type(data_type: PropertyType) -> Self {
        Self {
            data_type,
            ..Default::default()
        }
    }

    /// Mark this property as part of the default sort order
    pub fn ordered(mut self, index: i32) -> Self {
        self.order_by = Some(index);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Source of property metadata for item types.
pub trait MetadataProvider: Send + Sync {
    /// Properties declared on `item_type`, keyed by property name.
    ///
    /// Unknown item types yield an empty map.
    fn get_properties(&self, item_type: &str) -> HashMap<String, PropertyMeta>;
}

/// In-memory metadata, typically loaded from a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticMetadata {
    types: HashMap<String, HashMap<String, PropertyMeta>>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) one property of an item type
    pub fn with_property(
        mut self,
        item_type: impl Into<String>,
        name: impl Into<String>,
        meta: PropertyMeta,
    ) -> Self {
        self.insert(item_type, name, meta);
        self
    }

    pub fn insert(&mut self, item_type: impl Into<String>, name: impl Into<String>, meta: PropertyMeta) {
        self.types
            .entry(item_type.into())
            .or_default()
            .insert(name.into(), meta);
    }

    /// Names of the item types with declared metadata
    pub fn item_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl MetadataProvider for StaticMetadata {
    fn get_properties(&self, item_type: &str) -> HashMap<String, PropertyMeta> {
        self.types.get(item_type).cloned().unwrap_or_default()
    }
}
