use std::collections::BTreeSet;

use async_trait::async_trait;
use schemasync_core::{
    ActorVersion, Catalog, CatalogDiff, ConnectionStatus, DestinationCatalog, StreamDescriptor,
    SyncMode,
};
use uuid::Uuid;

use crate::connection::{CatalogId, ConnectionInfo};

/// Persistence for connections and their configured catalogs.
/// Implementations: relational store (external), memory (tests, CLI).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Load a connection. Returns `None` if it does not exist.
    async fn get_connection(&self, connection_id: Uuid) -> anyhow::Result<Option<ConnectionInfo>>;

    /// Load the catalog currently configured on a connection.
    async fn get_configured_catalog(&self, connection_id: Uuid) -> anyhow::Result<Catalog>;

    /// Replace a connection's catalog, its breaking-change flag and
    /// optionally its status. All three land together or not at all.
    async fn write_configured_catalog(
        &self,
        connection_id: Uuid,
        catalog: &Catalog,
        breaking_change: bool,
        new_status: Option<ConnectionStatus>,
    ) -> anyhow::Result<()>;
}

/// Access to the catalogs a source connector has discovered.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Load a discovered catalog. `None` means the latest one for the source.
    async fn discover_catalog(
        &self,
        source_id: Uuid,
        catalog_id: Option<CatalogId>,
    ) -> anyhow::Result<Catalog>;

    /// Id of the most recent discovery for a source, if any.
    async fn most_recent_discovered_catalog_id(
        &self,
        source_id: Uuid,
    ) -> anyhow::Result<Option<CatalogId>>;
}

/// Per-stream sync state (cursors, checkpoints).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Drop the state of the given streams so their next sync starts over.
    async fn bulk_delete_state(
        &self,
        connection_id: Uuid,
        streams: &BTreeSet<StreamDescriptor>,
    ) -> anyhow::Result<()>;
}

/// Outbound schema change notifications (email, webhooks).
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// A diff was applied to the connection's catalog automatically.
    async fn notify_schema_propagated(
        &self,
        diff: &CatalogDiff,
        connection: &ConnectionInfo,
    ) -> anyhow::Result<()>;

    /// A diff is waiting for the user; `disabled_for_breaking` tells whether
    /// the connection was disabled because of it.
    async fn notify_schema_diff_to_apply(
        &self,
        diff: &CatalogDiff,
        connection: &ConnectionInfo,
        disabled_for_breaking: bool,
    ) -> anyhow::Result<()>;
}

/// What the source and destination connectors can do.
/// Answers come from connector specs and are synchronous.
pub trait ConnectorCapabilities: Send + Sync {
    /// Whether the connector at this version can transfer raw files.
    fn supports_file_transfer(&self, version: &ActorVersion) -> bool;

    /// Sync modes the source offers for a stream. Empty means unknown.
    fn supported_sync_modes(&self, stream: &StreamDescriptor) -> BTreeSet<SyncMode>;

    /// Operations a destination declares, if it declares any.
    fn destination_catalog(&self, version: &ActorVersion) -> Option<DestinationCatalog>;
}
