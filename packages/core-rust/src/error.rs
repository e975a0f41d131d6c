//! Structural validation errors for catalogs.
//!
//! These are raised before any diff or merge runs. Destination-side
//! violations are aggregated separately in
//! [`DestinationCatalogError`](crate::destination::DestinationCatalogError).

use crate::types::StreamDescriptor;

/// A catalog failed a structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate stream '{0}' in catalog")]
    DuplicateStream(StreamDescriptor),

    #[error("invalid field selection for stream '{stream}': {reason}")]
    FieldSelection {
        stream: StreamDescriptor,
        reason: FieldSelectionError,
    },

    #[error("cannot include files for stream '{stream}': {reason}")]
    IncludeFiles {
        stream: StreamDescriptor,
        reason: IncludeFilesError,
    },
}

/// Why a stream's field selection is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldSelectionError {
    #[error("field selection is enabled but no selected fields were provided")]
    NoSelectedFields,

    #[error("selected field path cannot be empty")]
    EmptyPath,

    #[error("nested field selection is not supported (path '{0}')")]
    NestedSelection(String),

    #[error("cursor field '{0}' cannot be de-selected in incremental syncs")]
    CursorNotSelected(String),

    #[error("primary key field '{0}' cannot be de-selected in dedup mode")]
    PrimaryKeyNotSelected(String),
}

/// Why `includeFiles` cannot be honored for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IncludeFilesError {
    #[error("the source connector does not support file transfer")]
    SourceUnsupported,

    #[error("the destination connector does not support file transfer")]
    DestinationUnsupported,

    #[error("the stream is not file-based")]
    NotFileBased,
}
