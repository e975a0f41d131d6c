//! Merging a freshly discovered catalog into a user-configured one.
//!
//! The discovered schema is the source of truth for types and supported
//! sync modes; the previous configuration is the source of truth for
//! everything the user chose. A handful of source-defined attributes
//! (primary key, cursor) override the user's choice because the source
//! enforces them anyway.

use std::collections::BTreeSet;

use crate::catalog::{Catalog, StreamConfiguration, StreamEntry, StreamSchema};
use crate::mapper::{HashingConfig, MapperConfig, HASHING};
use crate::schema::has_top_level_property;
use crate::types::{ActorVersion, DestinationSyncMode, FieldPath, SyncMode};

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Merges `newly_discovered` into `previously_configured`.
///
/// - streams in both keep their configuration on top of the new schema
///   (see [`merge_stream`])
/// - streams only discovered are added unselected with default sync modes
/// - streams only configured are dropped; deciding whether their state must
///   be wiped is up to the caller
#[must_use]
pub fn merge(previously_configured: &Catalog, newly_discovered: &Catalog) -> Catalog {
    let entries = newly_discovered.streams().map(|discovered| {
        match previously_configured.get(discovered.descriptor()) {
            Some(previous) => merge_stream(previous, &discovered.stream),
            None => new_stream_entry(&discovered.stream),
        }
    });

    // Descriptors come from a valid catalog, so they are unique.
    entries.fold(Catalog::default(), |catalog, entry| catalog.with_stream(entry))
}

/// Carries one stream's configuration over onto its newly discovered schema.
///
/// Every configured attribute is copied, except:
/// - a non-empty source-defined primary key replaces the configured key
/// - a source-defined cursor with a default cursor field replaces the
///   configured cursor
/// - hashed fields (and their hashing mappers) whose top-level field was
///   removed from the schema are dropped
///
/// `isFileBased` comes with the new schema; an unset `includeFiles` stays
/// unset.
#[must_use]
pub fn merge_stream(previous: &StreamEntry, discovered: &StreamSchema) -> StreamEntry {
    let mut config = previous.config.clone();

    if let Some(source_key) = discovered.source_primary_key() {
        config.primary_key = source_key.to_vec();
    }

    if discovered.source_defined_cursor {
        if let Some(cursor) = &discovered.default_cursor_field {
            config.cursor_field = Some(cursor.clone());
        }
    }

    let previous_fields = previous.stream.top_level_fields();
    let removed: BTreeSet<&str> = previous_fields
        .iter()
        .filter(|f| !has_top_level_property(&discovered.json_schema, &f.name))
        .map(|f| f.name.as_str())
        .collect();
    if !removed.is_empty() {
        config = drop_hashing_of(config, &removed);
    }

    StreamEntry::new(discovered.clone(), config)
}

fn drop_hashing_of(mut config: StreamConfiguration, removed: &BTreeSet<&str>) -> StreamConfiguration {
    let targets_removed =
        |path: &FieldPath| path.first().is_some_and(|root| removed.contains(root.as_str()));

    config.hashed_fields.retain(|path| !targets_removed(path));
    config.mappers.retain(|mapper| {
        if mapper.name != HASHING {
            return true;
        }
        match HashingConfig::from_mapper(mapper) {
            Ok(hashing) => !removed.contains(hashing.target_field.as_str()),
            Err(_) => true,
        }
    });
    config
}

fn new_stream_entry(schema: &StreamSchema) -> StreamEntry {
    StreamEntry::new(schema.clone(), default_configuration(schema))
}

// ---------------------------------------------------------------------------
// Defaults for new streams
// ---------------------------------------------------------------------------

/// Picks sync modes for a stream nobody has configured yet.
///
/// | source cursor | source key | full refresh supported | result |
/// |---|---|---|---|
/// | yes | yes | any | incremental / append_dedup |
/// | yes | no | yes | full_refresh / overwrite |
/// | yes | no | no | incremental / append |
/// | no | any | any | full_refresh / overwrite |
#[must_use]
pub fn default_sync_modes(schema: &StreamSchema) -> (SyncMode, DestinationSyncMode) {
    let has_cursor = schema.source_defined_cursor;
    let has_key = schema.source_primary_key().is_some();
    match (has_cursor, has_key, schema.supports(SyncMode::FullRefresh)) {
        (true, true, _) => (SyncMode::Incremental, DestinationSyncMode::AppendDedup),
        (true, false, true) | (false, _, _) => {
            (SyncMode::FullRefresh, DestinationSyncMode::Overwrite)
        }
        (true, false, false) => (SyncMode::Incremental, DestinationSyncMode::Append),
    }
}

/// Default configuration for a newly discovered stream: unselected, not
/// suggested, no field selection, default sync modes, the source's cursor
/// and key.
#[must_use]
pub fn default_configuration(schema: &StreamSchema) -> StreamConfiguration {
    let (sync_mode, destination_sync_mode) = default_sync_modes(schema);
    StreamConfiguration::default()
        .with_sync_modes(sync_mode, destination_sync_mode)
        .with_cursor_field(schema.default_cursor_field.clone())
        .with_primary_key(schema.source_primary_key().map(<[FieldPath]>::to_vec).unwrap_or_default())
        .with_alias_name(alias_name(&schema.descriptor.name))
}

/// Normalizes a stream name to ASCII letters, digits, and underscores.
#[must_use]
pub fn alias_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Falls back to a supported sync-mode pair when the configured one is not
/// available.
///
/// An empty `supported_destination_modes` means the destination's
/// capabilities are unknown and do not constrain the choice. Preference
/// order for the fallback is full_refresh/overwrite, then full_refresh/append,
/// then the first supported pair.
#[must_use]
pub fn ensure_compatible_sync_modes(
    config: StreamConfiguration,
    supported_sync_modes: &[SyncMode],
    supported_destination_modes: &[DestinationSyncMode],
) -> StreamConfiguration {
    let dest_ok = |mode: DestinationSyncMode| {
        supported_destination_modes.is_empty() || supported_destination_modes.contains(&mode)
    };

    if supported_sync_modes.contains(&config.sync_mode) && dest_ok(config.destination_sync_mode) {
        return config;
    }

    let candidates = [
        (SyncMode::FullRefresh, DestinationSyncMode::Overwrite),
        (SyncMode::FullRefresh, DestinationSyncMode::Append),
    ];
    let fallback = candidates
        .into_iter()
        .find(|(sync, dest)| supported_sync_modes.contains(sync) && dest_ok(*dest))
        .or_else(|| {
            let sync = supported_sync_modes.first()?;
            let dest = supported_destination_modes
                .first()
                .copied()
                .unwrap_or(config.destination_sync_mode);
            Some((*sync, dest))
        });

    match fallback {
        Some((sync_mode, destination_sync_mode)) => {
            tracing::warn!(
                configured_sync_mode = ?config.sync_mode,
                configured_destination_sync_mode = ?config.destination_sync_mode,
                ?sync_mode,
                ?destination_sync_mode,
                "configured sync modes are not supported, falling back"
            );
            config.with_sync_modes(sync_mode, destination_sync_mode)
        }
        None => config,
    }
}

// ---------------------------------------------------------------------------
// includeFiles default derivation
// ---------------------------------------------------------------------------

/// Sets `includeFiles` on every file-based stream that has no explicit
/// value, to whether the destination can receive files.
///
/// Streams that are not file-based, or that already carry a value, are
/// left untouched.
#[must_use]
pub fn apply_default_include_files(
    catalog: &Catalog,
    source: &ActorVersion,
    destination: &ActorVersion,
) -> Catalog {
    catalog.map_configs(|entry| {
        if !entry.stream.is_file_based || entry.config.include_files.is_some() {
            return entry.config.clone();
        }
        tracing::debug!(
            stream = %entry.descriptor(),
            source = %source.docker_repository,
            destination = %destination.docker_repository,
            include_files = destination.supports_file_transfer,
            "defaulting includeFiles"
        );
        entry
            .config
            .clone()
            .with_include_files(Some(destination.supports_file_transfer))
    })
}

// ---------------------------------------------------------------------------
// Hashed fields <-> hashing mappers
// ---------------------------------------------------------------------------

/// Materializes hashed fields as hashing mappers, one per top-level path.
#[must_use]
pub fn hashing_mappers_from_hashed_fields(hashed_fields: &[FieldPath]) -> Vec<MapperConfig> {
    hashed_fields
        .iter()
        .filter_map(|path| path.first())
        .map(|field| HashingConfig::new(field.clone()).to_mapper())
        .collect()
}

/// Derives the hashed-field view of a mapper list. Non-hashing mappers and
/// unparsable hashing configs contribute nothing.
#[must_use]
pub fn hashed_fields_from_mappers(mappers: &[MapperConfig]) -> Vec<FieldPath> {
    mappers
        .iter()
        .filter(|mapper| mapper.name == HASHING)
        .filter_map(|mapper| HashingConfig::from_mapper(mapper).ok())
        .map(|hashing| vec![hashing.target_field])
        .collect()
}

/// The mappers a stream actually runs: its declared mappers, or hashing
/// mappers derived from its hashed fields when none are declared.
#[must_use]
pub fn effective_mappers(config: &StreamConfiguration) -> Vec<MapperConfig> {
    if config.mappers.is_empty() {
        hashing_mappers_from_hashed_fields(&config.hashed_fields)
    } else {
        config.mappers.clone()
    }
}

/// Makes `hashedFields` and `mappers` agree.
///
/// Declared mappers win: when present, the hashed-field list is re-derived
/// from them. Otherwise mappers are synthesized from the hashed fields.
#[must_use]
pub fn reconcile_hashed_fields(config: StreamConfiguration) -> StreamConfiguration {
    if config.mappers.is_empty() {
        let mappers = hashing_mappers_from_hashed_fields(&config.hashed_fields);
        config.with_mappers(mappers)
    } else {
        let hashed = hashed_fields_from_mappers(&config.mappers);
        config.with_hashed_fields(hashed)
    }
}
