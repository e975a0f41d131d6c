//! Catalog model and boundary conversions.
//!
//! A [`Catalog`] pairs each stream's source-owned [`StreamSchema`] with its
//! user-owned [`StreamConfiguration`], keyed by [`StreamDescriptor`]. Three
//! external formats convert to and from it:
//!
//! - [`DiscoveredCatalog`]: what a source connector reports (protocol names)
//! - the catalog itself: the user-configuration format, every stream with a
//!   `selected` flag
//! - [`ConfiguredCatalog`]: the persisted run format, selected streams only,
//!   schemas trimmed to the selected fields
//!
//! Catalogs are values. Every modification returns a new catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CatalogError;
use crate::mapper::MapperConfig;
use crate::merge::{default_configuration, effective_mappers};
use crate::schema::{
    collect_field_nodes, has_top_level_property, retain_top_level_properties, top_level_fields,
    Field, FieldNode,
};
use crate::types::{DestinationSyncMode, FieldPath, StreamDescriptor, SyncMode};
use crate::validation::selected_field_names;

// ---------------------------------------------------------------------------
// StreamSchema
// ---------------------------------------------------------------------------

/// Source-owned description of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSchema {
    #[serde(flatten)]
    pub descriptor: StreamDescriptor,
    #[serde(default)]
    pub json_schema: Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(default)]
    pub source_defined_cursor: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_cursor_field: Option<FieldPath>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_defined_primary_key: Option<Vec<FieldPath>>,
    #[serde(default)]
    pub is_file_based: bool,
}

impl StreamSchema {
    /// Creates a schema supporting full refresh only, with no source-defined
    /// cursor or key.
    #[must_use]
    pub fn new(descriptor: StreamDescriptor, json_schema: Value) -> Self {
        Self {
            descriptor,
            json_schema,
            supported_sync_modes: vec![SyncMode::FullRefresh],
            source_defined_cursor: false,
            default_cursor_field: None,
            source_defined_primary_key: None,
            is_file_based: false,
        }
    }

    #[must_use]
    pub fn with_json_schema(mut self, json_schema: Value) -> Self {
        self.json_schema = json_schema;
        self
    }

    #[must_use]
    pub fn with_supported_sync_modes(mut self, modes: Vec<SyncMode>) -> Self {
        self.supported_sync_modes = modes;
        self
    }

    #[must_use]
    pub fn with_source_defined_cursor(mut self, source_defined: bool) -> Self {
        self.source_defined_cursor = source_defined;
        self
    }

    #[must_use]
    pub fn with_default_cursor_field(mut self, cursor: Option<FieldPath>) -> Self {
        self.default_cursor_field = cursor;
        self
    }

    #[must_use]
    pub fn with_source_defined_primary_key(mut self, key: Option<Vec<FieldPath>>) -> Self {
        self.source_defined_primary_key = key;
        self
    }

    #[must_use]
    pub fn with_file_based(mut self, file_based: bool) -> Self {
        self.is_file_based = file_based;
        self
    }

    /// Source-defined primary key, when declared and non-empty.
    #[must_use]
    pub fn source_primary_key(&self) -> Option<&[FieldPath]> {
        self.source_defined_primary_key
            .as_deref()
            .filter(|key| !key.is_empty())
    }

    /// Every addressable field node, keyed by path.
    #[must_use]
    pub fn field_nodes(&self) -> BTreeMap<FieldPath, FieldNode> {
        collect_field_nodes(&self.json_schema)
    }

    /// Top-level fields in property-name order.
    #[must_use]
    pub fn top_level_fields(&self) -> Vec<Field> {
        top_level_fields(&self.json_schema)
    }

    #[must_use]
    pub fn supports(&self, mode: SyncMode) -> bool {
        self.supported_sync_modes.contains(&mode)
    }
}

// ---------------------------------------------------------------------------
// StreamConfiguration
// ---------------------------------------------------------------------------

/// User-owned configuration of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfiguration {
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor_field: Option<FieldPath>,
    #[serde(default)]
    pub primary_key: Vec<FieldPath>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub suggested: bool,
    #[serde(default)]
    pub field_selection_enabled: bool,
    #[serde(default)]
    pub selected_fields: Vec<FieldPath>,
    #[serde(default)]
    pub hashed_fields: Vec<FieldPath>,
    #[serde(default)]
    pub mappers: Vec<MapperConfig>,
    #[serde(default)]
    pub alias_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub destination_object_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub include_files: Option<bool>,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::FullRefresh,
            destination_sync_mode: DestinationSyncMode::Overwrite,
            cursor_field: None,
            primary_key: Vec::new(),
            selected: false,
            suggested: false,
            field_selection_enabled: false,
            selected_fields: Vec::new(),
            hashed_fields: Vec::new(),
            mappers: Vec::new(),
            alias_name: String::new(),
            destination_object_name: None,
            include_files: None,
        }
    }
}

impl StreamConfiguration {
    #[must_use]
    pub fn with_sync_modes(mut self, sync_mode: SyncMode, destination: DestinationSyncMode) -> Self {
        self.sync_mode = sync_mode;
        self.destination_sync_mode = destination;
        self
    }

    #[must_use]
    pub fn with_cursor_field(mut self, cursor: Option<FieldPath>) -> Self {
        self.cursor_field = cursor;
        self
    }

    #[must_use]
    pub fn with_primary_key(mut self, key: Vec<FieldPath>) -> Self {
        self.primary_key = key;
        self
    }

    #[must_use]
    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    #[must_use]
    pub fn with_suggested(mut self, suggested: bool) -> Self {
        self.suggested = suggested;
        self
    }

    /// Enables field selection with the given top-level fields.
    #[must_use]
    pub fn with_selected_fields(mut self, fields: Vec<FieldPath>) -> Self {
        self.field_selection_enabled = true;
        self.selected_fields = fields;
        self
    }

    #[must_use]
    pub fn with_hashed_fields(mut self, fields: Vec<FieldPath>) -> Self {
        self.hashed_fields = fields;
        self
    }

    #[must_use]
    pub fn with_mappers(mut self, mappers: Vec<MapperConfig>) -> Self {
        self.mappers = mappers;
        self
    }

    #[must_use]
    pub fn with_alias_name(mut self, alias: impl Into<String>) -> Self {
        self.alias_name = alias.into();
        self
    }

    #[must_use]
    pub fn with_destination_object_name(mut self, name: Option<String>) -> Self {
        self.destination_object_name = name;
        self
    }

    #[must_use]
    pub fn with_include_files(mut self, include: Option<bool>) -> Self {
        self.include_files = include;
        self
    }
}

// ---------------------------------------------------------------------------
// StreamEntry
// ---------------------------------------------------------------------------

/// One stream of a catalog: its schema and its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub stream: StreamSchema,
    pub config: StreamConfiguration,
}

impl StreamEntry {
    #[must_use]
    pub fn new(stream: StreamSchema, config: StreamConfiguration) -> Self {
        Self { stream, config }
    }

    #[must_use]
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.stream.descriptor
    }

    #[must_use]
    pub fn with_config(mut self, config: StreamConfiguration) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamSchema) -> Self {
        self.stream = stream;
        self
    }

    /// JSON schema as the destination will see it: trimmed to the selected
    /// top-level fields when field selection is enabled.
    ///
    /// Performs no validation; see [`to_configured`](Self::to_configured).
    #[must_use]
    pub fn selected_json_schema(&self) -> Value {
        if !self.config.field_selection_enabled {
            return self.stream.json_schema.clone();
        }
        let names: Vec<&str> = self
            .config
            .selected_fields
            .iter()
            .filter_map(|path| path.first().map(String::as_str))
            .collect();
        retain_top_level_properties(&self.stream.json_schema, &names)
    }

    /// Converts a selected stream to its persisted run format.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::FieldSelection`] when field selection is
    /// enabled and violates its invariants.
    pub fn to_configured(&self) -> Result<ConfiguredStream, CatalogError> {
        let mut stream = self.stream.clone();

        if self.config.field_selection_enabled {
            let names = selected_field_names(&self.stream.descriptor, &self.config)?;
            for name in &names {
                if !has_top_level_property(&stream.json_schema, name) {
                    tracing::info!(
                        stream = %self.stream.descriptor,
                        field = %name,
                        "requested selected field not found in JSON schema"
                    );
                }
            }
            let keep: Vec<&str> = names.iter().map(String::as_str).collect();
            stream.json_schema = retain_top_level_properties(&stream.json_schema, &keep);
        }

        let fields = top_level_fields(&stream.json_schema);
        Ok(ConfiguredStream {
            stream,
            sync_mode: self.config.sync_mode,
            destination_sync_mode: self.config.destination_sync_mode,
            cursor_field: self.config.cursor_field.clone(),
            primary_key: self.config.primary_key.clone(),
            destination_object_name: self.config.destination_object_name.clone(),
            fields,
            mappers: effective_mappers(&self.config),
            include_files: self.config.include_files,
        })
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// A set of streams keyed by descriptor.
///
/// Iteration is in descriptor order. Construction rejects duplicate
/// descriptors, so a `Catalog` value always satisfies that invariant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "CatalogRepr", into = "CatalogRepr")]
pub struct Catalog {
    streams: BTreeMap<StreamDescriptor, StreamEntry>,
}

#[derive(Serialize, Deserialize)]
struct CatalogRepr {
    streams: Vec<StreamEntry>,
}

impl TryFrom<CatalogRepr> for Catalog {
    type Error = CatalogError;

    fn try_from(repr: CatalogRepr) -> Result<Self, Self::Error> {
        Self::new(repr.streams)
    }
}

impl From<Catalog> for CatalogRepr {
    fn from(catalog: Catalog) -> Self {
        Self {
            streams: catalog.streams.into_values().collect(),
        }
    }
}

impl Catalog {
    /// Builds a catalog from stream entries.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateStream`] when two entries share a
    /// descriptor.
    pub fn new(entries: impl IntoIterator<Item = StreamEntry>) -> Result<Self, CatalogError> {
        let mut streams = BTreeMap::new();
        for entry in entries {
            let descriptor = entry.descriptor().clone();
            if streams.insert(descriptor.clone(), entry).is_some() {
                return Err(CatalogError::DuplicateStream(descriptor));
            }
        }
        Ok(Self { streams })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    #[must_use]
    pub fn get(&self, descriptor: &StreamDescriptor) -> Option<&StreamEntry> {
        self.streams.get(descriptor)
    }

    #[must_use]
    pub fn contains(&self, descriptor: &StreamDescriptor) -> bool {
        self.streams.contains_key(descriptor)
    }

    /// All streams in descriptor order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamEntry> {
        self.streams.values()
    }

    /// Streams whose configuration is selected, in descriptor order.
    pub fn selected_streams(&self) -> impl Iterator<Item = &StreamEntry> {
        self.streams.values().filter(|entry| entry.config.selected)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.keys()
    }

    /// Returns a copy with `entry` inserted, replacing any stream with the
    /// same descriptor.
    #[must_use]
    pub fn with_stream(&self, entry: StreamEntry) -> Self {
        let mut streams = self.streams.clone();
        streams.insert(entry.descriptor().clone(), entry);
        Self { streams }
    }

    /// Returns a copy without the given stream.
    #[must_use]
    pub fn without_stream(&self, descriptor: &StreamDescriptor) -> Self {
        let mut streams = self.streams.clone();
        streams.remove(descriptor);
        Self { streams }
    }

    /// Returns a copy with `f` applied to every stream configuration.
    #[must_use]
    pub fn map_configs(&self, mut f: impl FnMut(&StreamEntry) -> StreamConfiguration) -> Self {
        let streams = self
            .streams
            .iter()
            .map(|(descriptor, entry)| {
                let config = f(entry);
                (descriptor.clone(), entry.clone().with_config(config))
            })
            .collect();
        Self { streams }
    }

    // -- Boundary conversions --

    /// Builds a catalog from a source's discovery output, giving every
    /// stream a default configuration.
    ///
    /// A stream is pre-selected (and marked suggested) when it is the only
    /// stream, or when `suggested` lists its name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateStream`] when discovery reported the
    /// same descriptor twice.
    pub fn from_discovered(
        discovered: &DiscoveredCatalog,
        suggested: Option<&[String]>,
    ) -> Result<Self, CatalogError> {
        let only_one = discovered.streams.len() == 1;
        let entries = discovered.streams.iter().map(|raw| {
            let schema = StreamSchema::from(raw.clone());
            let is_suggested =
                only_one || suggested.is_some_and(|names| names.contains(&schema.descriptor.name));
            let config = default_configuration(&schema)
                .with_selected(is_suggested)
                .with_suggested(is_suggested);
            StreamEntry::new(schema, config)
        });
        Self::new(entries)
    }

    /// The source-side view of this catalog, configurations dropped.
    #[must_use]
    pub fn to_discovered(&self) -> DiscoveredCatalog {
        DiscoveredCatalog {
            streams: self
                .streams
                .values()
                .map(|entry| DiscoveredStream::from(entry.stream.clone()))
                .collect(),
        }
    }

    /// Converts to the persisted run format: selected streams only, schemas
    /// trimmed to their selected fields, mappers resolved.
    ///
    /// # Errors
    ///
    /// Returns the first field-selection violation found.
    pub fn to_configured(&self) -> Result<ConfiguredCatalog, CatalogError> {
        let streams = self
            .selected_streams()
            .map(StreamEntry::to_configured)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ConfiguredCatalog { streams })
    }
}

// ---------------------------------------------------------------------------
// Discovered format
// ---------------------------------------------------------------------------

/// Catalog as reported by a source connector's discovery.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscoveredCatalog {
    pub streams: Vec<DiscoveredStream>,
}

/// One stream in protocol form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredStream {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub json_schema: Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_defined_cursor: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_cursor_field: Option<FieldPath>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_defined_primary_key: Option<Vec<FieldPath>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_file_based: Option<bool>,
}

impl From<DiscoveredStream> for StreamSchema {
    fn from(raw: DiscoveredStream) -> Self {
        Self {
            descriptor: StreamDescriptor {
                name: raw.name,
                namespace: raw.namespace,
            },
            json_schema: raw.json_schema,
            supported_sync_modes: raw.supported_sync_modes,
            source_defined_cursor: raw.source_defined_cursor.unwrap_or(false),
            default_cursor_field: raw.default_cursor_field.filter(|c| !c.is_empty()),
            source_defined_primary_key: raw.source_defined_primary_key,
            is_file_based: raw.is_file_based.unwrap_or(false),
        }
    }
}

impl From<StreamSchema> for DiscoveredStream {
    fn from(schema: StreamSchema) -> Self {
        Self {
            name: schema.descriptor.name,
            namespace: schema.descriptor.namespace,
            json_schema: schema.json_schema,
            supported_sync_modes: schema.supported_sync_modes,
            source_defined_cursor: Some(schema.source_defined_cursor),
            default_cursor_field: schema.default_cursor_field,
            source_defined_primary_key: schema.source_defined_primary_key,
            is_file_based: Some(schema.is_file_based),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted (configured) format
// ---------------------------------------------------------------------------

/// Persisted run catalog: only the streams that will sync.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

/// One stream of the run catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    pub stream: StreamSchema,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor_field: Option<FieldPath>,
    #[serde(default)]
    pub primary_key: Vec<FieldPath>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub destination_object_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub mappers: Vec<MapperConfig>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub include_files: Option<bool>,
}
