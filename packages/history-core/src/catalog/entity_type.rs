//! Entity type definitions: properties, keys, relations and exclusion markers.

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};
use crate::value::{Snapshot, Value, ValueKind};

/// Property definition within an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Declared value kind
    pub kind: ValueKind,
    /// Whether `null` is a valid value
    pub nullable: bool,
    /// Part of the primary key
    #[serde(default)]
    pub key: bool,
    /// Never included in captured history
    #[serde(default)]
    pub excluded: bool,
}

impl PropertyDef {
    /// Creates a nullable, non-key property.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            key: false,
            excluded: false,
        }
    }

    /// Creates a key property.
    pub fn key(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            key: true,
            ..Self::new(name, kind)
        }
    }

    /// Marks the property as not nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the property as excluded from history.
    pub fn exclude_from_history(mut self) -> Self {
        self.excluded = true;
        self
    }
}

/// Relation between entity types for foreign key references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Name of the target table
    pub to_table: String,
    /// Field name in source table
    pub from_field: String,
    /// Field name in target table
    pub to_field: String,
}

/// Entity type: schema of one persisted record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Logical type name, stored on history records
    pub name: String,
    /// Table (collection) name
    pub table: String,
    /// Properties in declaration order
    pub properties: Vec<PropertyDef>,
    /// Foreign key relations to other tables
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// The whole type is never included in captured history
    #[serde(default)]
    pub excluded_from_history: bool,
}

impl EntityType {
    /// Creates a new entity type with no relations.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        properties: Vec<PropertyDef>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            properties,
            relations: Vec::new(),
            excluded_from_history: false,
        }
    }

    /// Adds a foreign key relation.
    pub fn with_relation(mut self, from_field: &str, to_table: &str, to_field: &str) -> Self {
        self.relations.push(Relation {
            to_table: to_table.to_string(),
            from_field: from_field.to_string(),
            to_field: to_field.to_string(),
        });
        self
    }

    /// Marks the whole type as excluded from history.
    pub fn exclude_from_history(mut self) -> Self {
        self.excluded_from_history = true;
        self
    }

    /// Validates property names, key presence and relations.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(HistoryError::DataCorruption(format!(
                    "Property '{}' declared twice on entity '{}'",
                    property.name, self.name
                )));
            }
        }

        if self.key_properties().next().is_none() {
            return Err(HistoryError::DataCorruption(format!(
                "Entity '{}' declares no key property",
                self.name
            )));
        }

        // Restoring a deleted row has no captured value for an excluded property
        if !self.excluded_from_history {
            if let Some(property) = self
                .properties
                .iter()
                .find(|p| p.excluded && !p.nullable && !p.key)
            {
                return Err(HistoryError::DataCorruption(format!(
                    "Property '{}' on entity '{}' is excluded from history and must be nullable",
                    property.name, self.name
                )));
            }
        }

        for relation in &self.relations {
            if !seen.contains(relation.from_field.as_str()) {
                return Err(HistoryError::PropertyNotFound {
                    entity: self.name.clone(),
                    property: relation.from_field.clone(),
                });
            }
        }
        Ok(())
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Result<&PropertyDef> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| HistoryError::PropertyNotFound {
                entity: self.name.clone(),
                property: name.to_string(),
            })
    }

    /// Key properties in declaration order.
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.key)
    }

    /// Returns `true` if the property is the source of a relation.
    pub fn is_foreign_key(&self, name: &str) -> bool {
        self.relations.iter().any(|r| r.from_field == name)
    }

    /// Returns `true` if the property is excluded from history.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.properties
            .iter()
            .any(|p| p.name == name && p.excluded)
    }

    /// Builds the row id from the key values: non-null key values in
    /// declaration order, comma-joined.
    pub fn row_id(&self, values: &Snapshot) -> String {
        self.key_properties()
            .filter_map(|p| values.get(&p.name))
            .filter(|v| !v.is_null())
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns `true` when every key property has a non-null value.
    pub fn has_resolvable_key(&self, values: &Snapshot) -> bool {
        self.key_properties()
            .all(|p| values.get(&p.name).is_some_and(|v| !v.is_null()))
    }

    /// Parses a row id back into key values.
    pub fn parse_row_id(&self, row_id: &str) -> Result<Snapshot> {
        let keys: Vec<&PropertyDef> = self.key_properties().collect();
        let parts: Vec<&str> = row_id.split(',').collect();
        if row_id.is_empty() || parts.len() != keys.len() {
            return Err(HistoryError::Precondition {
                entity: self.name.clone(),
                reason: format!("row id '{}' does not match the key", row_id),
            });
        }

        let mut values = Snapshot::new();
        for (property, part) in keys.into_iter().zip(parts) {
            let value = match property.kind {
                ValueKind::Int => part.parse::<i64>().map(Value::Int).ok(),
                ValueKind::Float => part.parse::<f64>().map(Value::Float).ok(),
                ValueKind::Bool => part.parse::<bool>().map(Value::Bool).ok(),
                ValueKind::Text => Some(Value::Text(part.to_string())),
            }
            .ok_or_else(|| HistoryError::Precondition {
                entity: self.name.clone(),
                reason: format!("'{}' is not a valid {} key", part, property.kind),
            })?;
            values.insert(property.name.clone(), value);
        }
        Ok(values)
    }

    /// Returns the single auto-increment integer key, if the type has one.
    pub fn identity_key(&self) -> Option<&PropertyDef> {
        let mut keys = self.key_properties();
        match (keys.next(), keys.next()) {
            (Some(key), None) if key.kind == ValueKind::Int => Some(key),
            _ => None,
        }
    }

    /// Builds a full property snapshot from partial values.
    ///
    /// Properties are placed in declaration order, missing ones become `null`,
    /// and every value is checked against its declared kind.
    pub fn conform(&self, values: &Snapshot) -> std::result::Result<Snapshot, String> {
        for name in values.keys() {
            if self.property(name).is_err() {
                return Err(format!("unknown property '{}'", name));
            }
        }

        let mut conformed = Snapshot::new();
        for property in &self.properties {
            let raw = values.get(&property.name).cloned().unwrap_or_default();
            let found = raw.kind();
            let value = raw.coerce(property.kind, property.nullable || property.key).ok_or_else(|| {
                format!(
                    "property '{}' expects {}, found {}",
                    property.name,
                    property.kind,
                    found.map_or_else(|| "null".to_string(), |k| k.to_string())
                )
            })?;
            conformed.insert(property.name.clone(), value);
        }
        Ok(conformed)
    }
}
