use schemasync_core::{CatalogError, DestinationCatalogError};
use uuid::Uuid;

/// Errors from [`SchemaChangeService`](super::SchemaChangeService).
///
/// Nothing is written when one of these is returned, except for
/// [`Internal`](Self::Internal) raised by a state wipe after the catalog
/// write succeeded.
#[derive(Debug, thiserror::Error)]
pub enum SchemaChangeError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),
    #[error("invalid catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Destination(#[from] DestinationCatalogError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
