//! Structural validation run before a catalog is diffed, merged, or
//! persisted.

use crate::catalog::{Catalog, StreamConfiguration, StreamEntry};
use crate::error::{CatalogError, FieldSelectionError, IncludeFilesError};
use crate::types::{format_path, StreamDescriptor, SyncMode};

/// Returns the top-level names selected by a field-selecting stream.
///
/// # Errors
///
/// - no selected fields, or an empty/nested selected path
/// - the cursor is not selected in an incremental sync
/// - a primary-key component is not selected in a dedup sync
pub fn selected_field_names(
    stream: &StreamDescriptor,
    config: &StreamConfiguration,
) -> Result<Vec<String>, CatalogError> {
    let fail = |reason| CatalogError::FieldSelection {
        stream: stream.clone(),
        reason,
    };

    if config.selected_fields.is_empty() {
        return Err(fail(FieldSelectionError::NoSelectedFields));
    }

    let mut names = Vec::with_capacity(config.selected_fields.len());
    for path in &config.selected_fields {
        match path.as_slice() {
            [] => return Err(fail(FieldSelectionError::EmptyPath)),
            [name] => names.push(name.clone()),
            _ => return Err(fail(FieldSelectionError::NestedSelection(format_path(path)))),
        }
    }

    if config.sync_mode == SyncMode::Incremental {
        if let Some(cursor_root) = config.cursor_field.as_ref().and_then(|c| c.first()) {
            if !names.contains(cursor_root) {
                return Err(fail(FieldSelectionError::CursorNotSelected(cursor_root.clone())));
            }
        }
    }

    if config.destination_sync_mode.is_dedup() {
        for component in &config.primary_key {
            if let Some(root) = component.first() {
                if !names.contains(root) {
                    return Err(fail(FieldSelectionError::PrimaryKeyNotSelected(root.clone())));
                }
            }
        }
    }

    Ok(names)
}

/// Validates a single stream's field selection, if enabled.
///
/// # Errors
///
/// See [`selected_field_names`].
pub fn validate_field_selection(entry: &StreamEntry) -> Result<(), CatalogError> {
    if entry.config.field_selection_enabled {
        selected_field_names(entry.descriptor(), &entry.config)?;
    }
    Ok(())
}

/// Validates every selected stream of a catalog.
///
/// Descriptor uniqueness is already guaranteed by [`Catalog`] construction.
///
/// # Errors
///
/// Returns the first field-selection violation, in descriptor order.
pub fn validate_catalog(catalog: &Catalog) -> Result<(), CatalogError> {
    catalog.selected_streams().try_for_each(validate_field_selection)
}

/// Checks that every selected stream asking for files can get them.
///
/// # Errors
///
/// Returns [`CatalogError::IncludeFiles`] for the first stream with
/// `includeFiles = true` when either connector lacks file transfer or the
/// stream is not file-based.
pub fn validate_include_files(
    catalog: &Catalog,
    source_supports_file_transfer: bool,
    destination_supports_file_transfer: bool,
) -> Result<(), CatalogError> {
    for entry in catalog.selected_streams() {
        if entry.config.include_files != Some(true) {
            continue;
        }
        let reason = if !source_supports_file_transfer {
            Some(IncludeFilesError::SourceUnsupported)
        } else if !destination_supports_file_transfer {
            Some(IncludeFilesError::DestinationUnsupported)
        } else if !entry.stream.is_file_based {
            Some(IncludeFilesError::NotFileBased)
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(CatalogError::IncludeFiles {
                stream: entry.descriptor().clone(),
                reason,
            });
        }
    }
    Ok(())
}
