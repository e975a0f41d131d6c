//! Destination-side view of a catalog.
//!
//! [`generate`] derives, for every selected stream, the operation a
//! destination will be asked to run: object name, sync mode and the JSON
//! schema after the stream's mapper chain. [`validate_against_destination`]
//! checks those operations against what a destination declares it can do
//! and reports every violation at once.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::mapper::{MapperConfig, MapperErrorType, MapperFailure, MapperRegistry};
use crate::merge::effective_mappers;
use crate::schema::{regenerate_json_schema, top_level_fields, Field};
use crate::types::{same_key_set, DestinationSyncMode, FieldPath, StreamDescriptor};

// ---------------------------------------------------------------------------
// Destination-declared catalog
// ---------------------------------------------------------------------------

/// One operation a destination declares it supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationOperation {
    pub object_name: String,
    pub sync_mode: DestinationSyncMode,
    #[serde(default)]
    pub json_schema: Value,
    /// Candidate unique keys; a configured primary key must equal one of
    /// them as a set of paths.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub matching_keys: Option<Vec<Vec<FieldPath>>>,
}

impl DestinationOperation {
    #[must_use]
    pub fn new(object_name: impl Into<String>, sync_mode: DestinationSyncMode, json_schema: Value) -> Self {
        Self {
            object_name: object_name.into(),
            sync_mode,
            json_schema,
            matching_keys: None,
        }
    }

    #[must_use]
    pub fn with_matching_keys(mut self, keys: Vec<Vec<FieldPath>>) -> Self {
        self.matching_keys = Some(keys);
        self
    }

    fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.json_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }

    fn forbids_additional_fields(&self) -> bool {
        self.json_schema.get("additionalProperties") == Some(&Value::Bool(false))
    }

    fn declares(&self, field: &str) -> bool {
        self.json_schema
            .get("properties")
            .and_then(|p| p.get(field))
            .is_some()
    }
}

/// Every operation a destination declares.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationCatalog {
    pub operations: Vec<DestinationOperation>,
}

impl DestinationCatalog {
    /// Finds the operation for an object name and sync mode.
    #[must_use]
    pub fn find(&self, object_name: &str, sync_mode: DestinationSyncMode) -> Option<&DestinationOperation> {
        self.operations
            .iter()
            .find(|op| op.object_name == object_name && op.sync_mode == sync_mode)
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// The operation derived for one selected stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedStream {
    pub descriptor: StreamDescriptor,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub object_name: Option<String>,
    pub destination_sync_mode: DestinationSyncMode,
    pub json_schema: Value,
    /// Top-level fields after the mapper chain.
    pub fields: Vec<Field>,
    /// Mappers that applied cleanly, in order.
    pub mappers: Vec<MapperConfig>,
    pub primary_key: Vec<FieldPath>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub matching_keys: Option<Vec<Vec<FieldPath>>>,
}

/// Output of [`generate`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedDestinationCatalog {
    pub streams: Vec<GeneratedStream>,
    /// Failing mappers per stream. Streams whose chain ran cleanly are absent.
    pub mapper_errors: BTreeMap<StreamDescriptor, Vec<MapperFailure>>,
}

impl GeneratedDestinationCatalog {
    /// Total number of failing mappers across all streams.
    #[must_use]
    pub fn mapper_error_count(&self) -> usize {
        self.mapper_errors.values().map(Vec::len).sum()
    }
}

/// Derives destination operations for every selected stream.
///
/// The stream's schema is trimmed to its selected fields, then run through
/// its mappers. A failing mapper is recorded and left out of the stream's
/// mapper list; generation always covers every stream. `destination`
/// supplies matching keys when given.
#[must_use]
pub fn generate(
    catalog: &Catalog,
    registry: &MapperRegistry,
    destination: Option<&DestinationCatalog>,
) -> GeneratedDestinationCatalog {
    let mut generated = GeneratedDestinationCatalog::default();

    for entry in catalog.selected_streams() {
        let source_schema = entry.selected_json_schema();
        let chain = registry.apply_schema_chain(&effective_mappers(&entry.config), top_level_fields(&source_schema));

        let object_name = entry.config.destination_object_name.clone();
        let destination_sync_mode = entry.config.destination_sync_mode;
        let matching_keys = match (destination, object_name.as_deref()) {
            (Some(dest), Some(name)) => dest
                .find(name, destination_sync_mode)
                .and_then(|op| op.matching_keys.clone()),
            _ => None,
        };

        if !chain.failures.is_empty() {
            tracing::debug!(
                stream = %entry.descriptor(),
                failures = chain.failures.len(),
                "mapper chain reported failures"
            );
            generated
                .mapper_errors
                .insert(entry.descriptor().clone(), chain.failures);
        }

        generated.streams.push(GeneratedStream {
            descriptor: entry.descriptor().clone(),
            object_name,
            destination_sync_mode,
            json_schema: regenerate_json_schema(&chain.fields, &source_schema),
            fields: chain.fields,
            mappers: chain.applied,
            primary_key: entry.config.primary_key.clone(),
            matching_keys,
        });
    }

    generated
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One reason a catalog cannot run against a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationViolation {
    #[error("stream '{stream}' has no destination object name")]
    MissingObjectName { stream: StreamDescriptor },

    #[error("stream '{stream}': destination has no operation '{object_name}' for sync mode {sync_mode:?}")]
    InvalidOperation {
        stream: StreamDescriptor,
        object_name: String,
        sync_mode: DestinationSyncMode,
    },

    #[error("stream '{stream}' is missing required field '{field}'")]
    MissingRequiredField { stream: StreamDescriptor, field: String },

    #[error("stream '{stream}' has field '{field}' not accepted by the destination")]
    InvalidAdditionalField { stream: StreamDescriptor, field: String },

    #[error("stream '{stream}' needs a primary key matching one of the destination's keys")]
    MissingPrimaryKey { stream: StreamDescriptor },

    #[error("stream '{stream}' primary key matches none of the destination's keys")]
    InvalidPrimaryKey { stream: StreamDescriptor },

    #[error("stream '{stream}': mapper '{mapper}' failed ({error_type:?}): {message}")]
    MapperFailure {
        stream: StreamDescriptor,
        mapper: String,
        error_type: MapperErrorType,
        message: String,
    },
}

impl DestinationViolation {
    #[must_use]
    pub fn stream(&self) -> &StreamDescriptor {
        match self {
            Self::MissingObjectName { stream }
            | Self::InvalidOperation { stream, .. }
            | Self::MissingRequiredField { stream, .. }
            | Self::InvalidAdditionalField { stream, .. }
            | Self::MissingPrimaryKey { stream }
            | Self::InvalidPrimaryKey { stream }
            | Self::MapperFailure { stream, .. } => stream,
        }
    }
}

/// Every violation found while validating a catalog against a destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "destination catalog validation failed with {} violation(s){}",
    .violations.len(),
    bullet_list(.violations)
)]
pub struct DestinationCatalogError {
    pub violations: Vec<DestinationViolation>,
}

fn bullet_list(violations: &[DestinationViolation]) -> String {
    violations.iter().map(|v| format!("\n  - {v}")).collect()
}

/// Validates every selected stream against a destination's declared
/// operations.
///
/// # Errors
///
/// Returns one [`DestinationCatalogError`] listing every violation across
/// every stream, one entry per failing check and per failing mapper.
pub fn validate_against_destination(
    catalog: &Catalog,
    destination: &DestinationCatalog,
    registry: &MapperRegistry,
) -> Result<(), DestinationCatalogError> {
    let generated = generate(catalog, registry, Some(destination));
    let mut violations = Vec::new();

    for stream in &generated.streams {
        check_stream(stream, destination, &mut violations);

        for failure in generated.mapper_errors.get(&stream.descriptor).into_iter().flatten() {
            violations.push(DestinationViolation::MapperFailure {
                stream: stream.descriptor.clone(),
                mapper: failure.mapper.name.clone(),
                error_type: failure.error.error_type,
                message: failure.error.message.clone(),
            });
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        tracing::info!(violations = violations.len(), "catalog rejected by destination validation");
        Err(DestinationCatalogError { violations })
    }
}

fn check_stream(stream: &GeneratedStream, destination: &DestinationCatalog, out: &mut Vec<DestinationViolation>) {
    let descriptor = &stream.descriptor;
    let Some(object_name) = stream.object_name.as_deref() else {
        out.push(DestinationViolation::MissingObjectName {
            stream: descriptor.clone(),
        });
        return;
    };
    let Some(operation) = destination.find(object_name, stream.destination_sync_mode) else {
        out.push(DestinationViolation::InvalidOperation {
            stream: descriptor.clone(),
            object_name: object_name.to_string(),
            sync_mode: stream.destination_sync_mode,
        });
        return;
    };

    let present: BTreeSet<&str> = stream.fields.iter().map(|f| f.name.as_str()).collect();
    for required in operation.required_fields() {
        if !present.contains(required) {
            out.push(DestinationViolation::MissingRequiredField {
                stream: descriptor.clone(),
                field: required.to_string(),
            });
        }
    }

    if operation.forbids_additional_fields() {
        for field in &stream.fields {
            if !operation.declares(&field.name) {
                out.push(DestinationViolation::InvalidAdditionalField {
                    stream: descriptor.clone(),
                    field: field.name.clone(),
                });
            }
        }
    }

    match operation.matching_keys.as_deref() {
        Some(candidates) if !candidates.is_empty() => {
            if stream.primary_key.is_empty() {
                out.push(DestinationViolation::MissingPrimaryKey {
                    stream: descriptor.clone(),
                });
            } else if !candidates
                .iter()
                .any(|candidate| same_key_set(candidate, &stream.primary_key))
            {
                out.push(DestinationViolation::InvalidPrimaryKey {
                    stream: descriptor.clone(),
                });
            }
        }
        _ => {}
    }
}
