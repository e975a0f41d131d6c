//! In-memory collaborator implementations.
//!
//! Back the CLI and tests. Storage is [`DashMap`] keyed by id; recorders use
//! a `parking_lot` mutex since they are only appended to and snapshotted.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use schemasync_core::{
    ActorVersion, Catalog, CatalogDiff, ConnectionStatus, DestinationCatalog, StreamDescriptor,
    SyncMode,
};
use uuid::Uuid;

use crate::connection::{CatalogId, ConnectionInfo};
use crate::traits::{
    CatalogStore, ConnectorCapabilities, DiscoveryProvider, NotificationDispatcher, StateStore,
};

// ---------------------------------------------------------------------------
// CatalogStore
// ---------------------------------------------------------------------------

struct StoredConnection {
    info: ConnectionInfo,
    catalog: Catalog,
}

/// Connections and their catalogs held in memory.
///
/// A write updates catalog, breaking flag and status under one shard lock,
/// so readers never see half of it.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    connections: DashMap<Uuid, StoredConnection>,
    writes: Mutex<usize>,
}

impl InMemoryCatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a connection and its catalog.
    pub fn insert(&self, info: ConnectionInfo, catalog: Catalog) {
        self.connections
            .insert(info.connection_id, StoredConnection { info, catalog });
    }

    #[must_use]
    pub fn connection(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        self.connections.get(&connection_id).map(|c| c.info.clone())
    }

    #[must_use]
    pub fn catalog(&self, connection_id: Uuid) -> Option<Catalog> {
        self.connections
            .get(&connection_id)
            .map(|c| c.catalog.clone())
    }

    /// Number of successful catalog writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get_connection(&self, connection_id: Uuid) -> anyhow::Result<Option<ConnectionInfo>> {
        Ok(self.connection(connection_id))
    }

    async fn get_configured_catalog(&self, connection_id: Uuid) -> anyhow::Result<Catalog> {
        self.catalog(connection_id)
            .ok_or_else(|| anyhow!("no catalog stored for connection {connection_id}"))
    }

    async fn write_configured_catalog(
        &self,
        connection_id: Uuid,
        catalog: &Catalog,
        breaking_change: bool,
        new_status: Option<ConnectionStatus>,
    ) -> anyhow::Result<()> {
        let Some(mut stored) = self.connections.get_mut(&connection_id) else {
            bail!("cannot write catalog of unknown connection {connection_id}");
        };
        stored.catalog = catalog.clone();
        stored.info.breaking_change = breaking_change;
        if let Some(status) = new_status {
            stored.info.status = status;
        }
        *self.writes.lock() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DiscoveryProvider
// ---------------------------------------------------------------------------

/// Discovered catalogs per source; the last one added is the most recent.
#[derive(Default)]
pub struct InMemoryDiscoveryProvider {
    catalogs: DashMap<CatalogId, (Uuid, Catalog)>,
    latest: DashMap<Uuid, CatalogId>,
}

impl InMemoryDiscoveryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a discovery for `source_id` and returns its id.
    pub fn add(&self, source_id: Uuid, catalog: Catalog) -> CatalogId {
        let id = Uuid::new_v4();
        self.catalogs.insert(id, (source_id, catalog));
        self.latest.insert(source_id, id);
        id
    }
}

#[async_trait]
impl DiscoveryProvider for InMemoryDiscoveryProvider {
    async fn discover_catalog(
        &self,
        source_id: Uuid,
        catalog_id: Option<CatalogId>,
    ) -> anyhow::Result<Catalog> {
        let id = match catalog_id {
            Some(id) => id,
            None => *self
                .latest
                .get(&source_id)
                .ok_or_else(|| anyhow!("source {source_id} has never been discovered"))?,
        };
        let entry = self
            .catalogs
            .get(&id)
            .ok_or_else(|| anyhow!("unknown discovered catalog {id}"))?;
        let (owner, catalog) = entry.value();
        if *owner != source_id {
            bail!("discovered catalog {id} does not belong to source {source_id}");
        }
        Ok(catalog.clone())
    }

    async fn most_recent_discovered_catalog_id(
        &self,
        source_id: Uuid,
    ) -> anyhow::Result<Option<CatalogId>> {
        Ok(self.latest.get(&source_id).map(|id| *id))
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Records which stream states were deleted.
#[derive(Default)]
pub struct InMemoryStateStore {
    deleted: DashMap<Uuid, BTreeSet<StreamDescriptor>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stream whose state was deleted for the connection.
    #[must_use]
    pub fn deleted(&self, connection_id: Uuid) -> BTreeSet<StreamDescriptor> {
        self.deleted
            .get(&connection_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn bulk_delete_state(
        &self,
        connection_id: Uuid,
        streams: &BTreeSet<StreamDescriptor>,
    ) -> anyhow::Result<()> {
        self.deleted
            .entry(connection_id)
            .or_default()
            .extend(streams.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NotificationDispatcher
// ---------------------------------------------------------------------------

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedNotification {
    SchemaPropagated {
        connection_id: Uuid,
        diff: CatalogDiff,
    },
    DiffToApply {
        connection_id: Uuid,
        diff: CatalogDiff,
        disabled_for_breaking: bool,
    },
}

/// Captures notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    recorded: Mutex<Vec<RecordedNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails without recording anything.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            recorded: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedNotification> {
        self.recorded.lock().clone()
    }

    fn record(&self, notification: RecordedNotification) -> anyhow::Result<()> {
        if self.fail {
            bail!("notification channel unavailable");
        }
        self.recorded.lock().push(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify_schema_propagated(
        &self,
        diff: &CatalogDiff,
        connection: &ConnectionInfo,
    ) -> anyhow::Result<()> {
        self.record(RecordedNotification::SchemaPropagated {
            connection_id: connection.connection_id,
            diff: diff.clone(),
        })
    }

    async fn notify_schema_diff_to_apply(
        &self,
        diff: &CatalogDiff,
        connection: &ConnectionInfo,
        disabled_for_breaking: bool,
    ) -> anyhow::Result<()> {
        self.record(RecordedNotification::DiffToApply {
            connection_id: connection.connection_id,
            diff: diff.clone(),
            disabled_for_breaking,
        })
    }
}

// ---------------------------------------------------------------------------
// ConnectorCapabilities
// ---------------------------------------------------------------------------

/// Fixed connector capabilities.
///
/// File transfer support is read from the version itself. Streams without
/// an entry report no sync modes, which callers treat as unknown.
/// Destination catalogs are keyed by docker repository.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    sync_modes: BTreeMap<StreamDescriptor, BTreeSet<SyncMode>>,
    destination_catalogs: BTreeMap<String, DestinationCatalog>,
}

impl StaticCapabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sync_modes(mut self, stream: StreamDescriptor, modes: BTreeSet<SyncMode>) -> Self {
        self.sync_modes.insert(stream, modes);
        self
    }

    #[must_use]
    pub fn with_destination_catalog(
        mut self,
        destination: &ActorVersion,
        catalog: DestinationCatalog,
    ) -> Self {
        self.destination_catalogs
            .insert(destination.docker_repository.clone(), catalog);
        self
    }
}

impl ConnectorCapabilities for StaticCapabilities {
    fn supports_file_transfer(&self, version: &ActorVersion) -> bool {
        version.supports_file_transfer
    }

    fn supported_sync_modes(&self, stream: &StreamDescriptor) -> BTreeSet<SyncMode> {
        self.sync_modes.get(stream).cloned().unwrap_or_default()
    }

    fn destination_catalog(&self, version: &ActorVersion) -> Option<DestinationCatalog> {
        self.destination_catalogs
            .get(&version.docker_repository)
            .cloned()
    }
}
