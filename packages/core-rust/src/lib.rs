//! `schemasync` core: catalog model, diffing, merging, propagation policy and
//! destination validation.
//!
//! Everything here is pure and synchronous. Catalogs are values; every
//! operation returns a new one.

pub mod catalog;
pub mod destination;
pub mod diff;
pub mod error;
pub mod mapper;
pub mod merge;
pub mod propagation;
pub mod schema;
pub mod types;
pub mod validation;

pub use catalog::{
    Catalog, ConfiguredCatalog, ConfiguredStream, DiscoveredCatalog, DiscoveredStream,
    StreamConfiguration, StreamEntry, StreamSchema,
};
pub use destination::{
    generate, validate_against_destination, DestinationCatalog, DestinationCatalogError,
    DestinationOperation, DestinationViolation, GeneratedDestinationCatalog, GeneratedStream,
};
pub use diff::{
    configuration_diff, contains_breaking_change, diff, format_diff, format_transform, CatalogDiff,
    FieldTransform, StreamAttributeTransform, StreamTransform, StreamUpdate,
};
pub use error::{CatalogError, FieldSelectionError, IncludeFilesError};
pub use mapper::{MapperConfig, MapperError, MapperErrorType, MapperRegistry};
pub use merge::{
    apply_default_include_files, default_configuration, default_sync_modes,
    ensure_compatible_sync_modes, merge, reconcile_hashed_fields,
};
pub use propagation::{
    apply_schema_change, deactivated_streams, decide, PropagationAction, PropagationDecision,
    PropagationNotification, PropagationScope, UpdateSchemaResult,
};
pub use schema::{Field, FieldType};
pub use types::{
    ActorVersion, ConnectionStatus, DestinationSyncMode, FieldPath, NonBreakingChangesPreference,
    StreamDescriptor, SyncMode,
};
pub use validation::{validate_catalog, validate_include_files};


// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
