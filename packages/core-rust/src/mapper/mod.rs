//! Stream transform mappers.
//!
//! A [`MapperConfig`] is the declared, ordered transform a user attaches to
//! a stream. A [`Mapper`] is the implementation that knows how to rewrite
//! the stream's field list (and its records) for one operation name. The
//! [`MapperRegistry`] resolves configs to implementations and runs a whole
//! chain, collecting every failure instead of stopping at the first.

pub mod hashing;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::schema::Field;

pub use hashing::{HashingConfig, HashingMapper, HashingMethod, HASHING};

// ---------------------------------------------------------------------------
// MapperConfig
// ---------------------------------------------------------------------------

/// A declared mapper attached to a stream configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapperConfig {
    /// Operation identifier, e.g. `"hashing"`.
    #[serde(rename = "type")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<Uuid>,
    /// Operation-specific configuration, opaque at this level.
    #[serde(default)]
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub documentation_url: Option<String>,
}

impl MapperConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            id: None,
            config,
            documentation_url: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// Returns the mappers with a fresh random id assigned to every entry that
/// has none. Existing ids are preserved.
#[must_use]
pub fn assign_mapper_ids(mappers: &[MapperConfig]) -> Vec<MapperConfig> {
    mappers
        .iter()
        .map(|mapper| match mapper.id {
            Some(_) => mapper.clone(),
            None => mapper.clone().with_id(Uuid::new_v4()),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classification of a mapper failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapperErrorType {
    /// No implementation is registered for the mapper's operation name.
    MissingMapper,
    /// The mapper's configuration is malformed or inapplicable to the
    /// stream's fields.
    InvalidMapperConfig,
}

/// A single mapper failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_type:?}: {message}")]
pub struct MapperError {
    #[serde(rename = "type")]
    pub error_type: MapperErrorType,
    pub message: String,
}

impl MapperError {
    #[must_use]
    pub fn missing_mapper(name: &str) -> Self {
        Self {
            error_type: MapperErrorType::MissingMapper,
            message: format!("no mapper registered for operation '{name}'"),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self {
            error_type: MapperErrorType::InvalidMapperConfig,
            message: message.into(),
        }
    }
}

/// A mapper that failed while running a chain, with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct MapperFailure {
    /// Position of the mapper in the stream's mapper list.
    pub index: usize,
    pub mapper: MapperConfig,
    pub error: MapperError,
}

// ---------------------------------------------------------------------------
// Mapper trait
// ---------------------------------------------------------------------------

/// Implementation of one mapper operation.
pub trait Mapper: Send + Sync {
    /// Operation name this mapper handles.
    fn name(&self) -> &'static str;

    /// Validates `config` against the incoming fields and returns the
    /// field list the mapper produces.
    ///
    /// # Errors
    ///
    /// Returns [`MapperErrorType::InvalidMapperConfig`] when the config
    /// cannot be parsed or does not apply to `fields`.
    fn schema(&self, config: &MapperConfig, fields: Vec<Field>) -> Result<Vec<Field>, MapperError>;

    /// Rewrites one record in place.
    ///
    /// # Errors
    ///
    /// Returns [`MapperErrorType::InvalidMapperConfig`] when the config
    /// cannot be parsed.
    fn map_record(
        &self,
        config: &MapperConfig,
        record: &mut Map<String, Value>,
    ) -> Result<(), MapperError>;
}

// ---------------------------------------------------------------------------
// MapperRegistry
// ---------------------------------------------------------------------------

/// Result of running a mapper chain over a field list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapperChainResult {
    /// Fields after every successful mapper ran.
    pub fields: Vec<Field>,
    /// Mappers that ran successfully, in order.
    pub applied: Vec<MapperConfig>,
    /// Mappers that failed; they were skipped.
    pub failures: Vec<MapperFailure>,
}

/// Lookup table from operation name to mapper implementation.
pub struct MapperRegistry {
    mappers: BTreeMap<&'static str, Box<dyn Mapper>>,
}

impl MapperRegistry {
    /// Creates a registry with no mappers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mappers: BTreeMap::new(),
        }
    }

    /// Creates a registry with every built-in mapper.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(HashingMapper);
        registry
    }

    /// Registers a mapper, replacing any previous one with the same name.
    pub fn register<M: Mapper + 'static>(&mut self, mapper: M) {
        self.mappers.insert(mapper.name(), Box::new(mapper));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Mapper> {
        self.mappers.get(name).map(|mapper| mapper.as_ref())
    }

    /// Runs `mappers` in order over `fields`.
    ///
    /// A mapper that is unknown or fails is recorded and skipped; the next
    /// mapper sees the fields as they were before the failing one.
    #[must_use]
    pub fn apply_schema_chain(&self, mappers: &[MapperConfig], fields: Vec<Field>) -> MapperChainResult {
        let mut result = MapperChainResult {
            fields,
            ..MapperChainResult::default()
        };

        for (index, config) in mappers.iter().enumerate() {
            let outcome = match self.get(&config.name) {
                Some(mapper) => mapper.schema(config, result.fields.clone()),
                None => Err(MapperError::missing_mapper(&config.name)),
            };
            match outcome {
                Ok(fields) => {
                    result.fields = fields;
                    result.applied.push(config.clone());
                }
                Err(error) => {
                    tracing::debug!(mapper = %config.name, index, error = %error.message, "mapper failed");
                    result.failures.push(MapperFailure {
                        index,
                        mapper: config.clone(),
                        error,
                    });
                }
            }
        }

        result
    }

    /// Runs `mappers` in order over a record.
    ///
    /// # Errors
    ///
    /// Returns the first failure; records are only mapped after the chain
    /// has been validated with [`apply_schema_chain`](Self::apply_schema_chain).
    pub fn map_record(
        &self,
        mappers: &[MapperConfig],
        record: &mut Map<String, Value>,
    ) -> Result<(), MapperError> {
        for config in mappers {
            let mapper = self
                .get(&config.name)
                .ok_or_else(|| MapperError::missing_mapper(&config.name))?;
            mapper.map_record(config, record)?;
        }
        Ok(())
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("mappers", &self.mappers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::FieldType;

    fn hashing(target: &str) -> MapperConfig {
        MapperConfig::new(HASHING, json!({ "targetField": target, "method": "SHA-256" }))
    }

    #[test]
    fn assigns_ids_only_where_missing() {
        let existing = Uuid::new_v4();
        let mappers = vec![hashing("a").with_id(existing), hashing("b")];

        let assigned = assign_mapper_ids(&mappers);
        assert_eq!(assigned[0].id, Some(existing));
        assert!(assigned[1].id.is_some());
        assert_ne!(assigned[1].id, Some(existing));
    }

    #[test]
    fn mapper_config_serde_uses_type_key() {
        let config = hashing("email");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], json!("hashing"));
        assert!(json.get("id").is_none());

        let parsed: MapperConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn chain_skips_unknown_and_failing_mappers() {
        let registry = MapperRegistry::with_defaults();
        let fields = vec![
            Field::new("email", FieldType::String),
            Field::new("name", FieldType::String),
        ];
        let mappers = vec![
            MapperConfig::new("encryption", json!({})),
            hashing("missing"),
            hashing("email"),
        ];

        let result = registry.apply_schema_chain(&mappers, fields);

        assert_eq!(result.applied, vec![hashing("email")]);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].index, 0);
        assert_eq!(result.failures[0].error.error_type, MapperErrorType::MissingMapper);
        assert_eq!(result.failures[1].index, 1);
        assert_eq!(
            result.failures[1].error.error_type,
            MapperErrorType::InvalidMapperConfig
        );
        assert_eq!(
            result.fields,
            vec![
                Field::new("email_hashed", FieldType::String),
                Field::new("name", FieldType::String),
            ]
        );
    }

    #[test]
    fn empty_registry_reports_missing_mapper() {
        let registry = MapperRegistry::empty();
        let result = registry.apply_schema_chain(&[hashing("email")], vec![]);
        assert!(result.applied.is_empty());
        assert_eq!(result.failures[0].error.error_type, MapperErrorType::MissingMapper);
    }

    #[test]
    fn record_chain_applies_in_order() {
        let registry = MapperRegistry::default();
        let mut record = json!({ "email": "a@b.c", "id": 1 })
            .as_object()
            .cloned()
            .unwrap();

        registry.map_record(&[hashing("email")], &mut record).unwrap();

        assert!(record.get("email").is_none());
        assert!(record.get("email_hashed").is_some());
        assert_eq!(record["id"], json!(1));
    }
}
