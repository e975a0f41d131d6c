//! Applies discovered schemas and user catalog edits to stored connections.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use schemasync_core::mapper::assign_mapper_ids;
use schemasync_core::{
    apply_default_include_files, apply_schema_change, configuration_diff, contains_breaking_change,
    deactivated_streams, decide, ensure_compatible_sync_modes, reconcile_hashed_fields,
    validate_against_destination, validate_catalog, validate_include_files, ActorVersion, Catalog,
    CatalogDiff, CatalogError, MapperRegistry, PropagationAction, PropagationDecision,
    PropagationNotification, StreamDescriptor, SyncMode,
};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::connection::{CatalogId, ConnectionInfo};
use crate::service::config::SchemaChangeConfig;
use crate::service::error::SchemaChangeError;
use crate::traits::{
    CatalogStore, ConnectorCapabilities, DiscoveryProvider, NotificationDispatcher, StateStore,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of [`SchemaChangeService::apply_discovered_catalog`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaChangeOutcome {
    /// The discovery that was actually applied, after re-resolution.
    pub catalog_id: CatalogId,
    /// Full diff between the stored catalog and the discovered one.
    pub diff: CatalogDiff,
    pub decision: PropagationDecision,
    /// Subset of `diff` merged into the catalog; empty unless propagated.
    pub applied_diff: CatalogDiff,
    pub change_description: String,
    /// The catalog as stored after the call.
    pub catalog: Catalog,
    pub wiped_streams: BTreeSet<StreamDescriptor>,
}

/// Result of [`SchemaChangeService::update_catalog`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogUpdateOutcome {
    pub catalog: Catalog,
    /// Streams whose runtime-relevant configuration changed.
    pub changed_streams: BTreeSet<StreamDescriptor>,
    pub wiped_streams: BTreeSet<StreamDescriptor>,
}

// ---------------------------------------------------------------------------
// SchemaChangeService
// ---------------------------------------------------------------------------

/// Orchestrates schema changes for connections.
///
/// All decisions are delegated to `schemasync_core`; this type only loads,
/// writes, wipes state and notifies. Calls for the same connection are
/// serialized so two discoveries never merge against the same stale base.
pub struct SchemaChangeService {
    store: Arc<dyn CatalogStore>,
    discovery: Arc<dyn DiscoveryProvider>,
    state: Arc<dyn StateStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    capabilities: Arc<dyn ConnectorCapabilities>,
    mappers: MapperRegistry,
    config: SchemaChangeConfig,
    /// One entry per connection with a call running or queued.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SchemaChangeService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CatalogStore>,
        discovery: Arc<dyn DiscoveryProvider>,
        state: Arc<dyn StateStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        capabilities: Arc<dyn ConnectorCapabilities>,
        config: SchemaChangeConfig,
    ) -> Self {
        Self {
            store,
            discovery,
            state,
            notifier,
            capabilities,
            mappers: MapperRegistry::with_defaults(),
            config,
            locks: DashMap::new(),
        }
    }

    /// Replaces the mapper registry used for destination validation.
    #[must_use]
    pub fn with_mappers(mut self, mappers: MapperRegistry) -> Self {
        self.mappers = mappers;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SchemaChangeConfig {
        &self.config
    }

    /// Reacts to a new discovery for the connection's source.
    ///
    /// Diffs the stored catalog against the discovered one, decides per the
    /// connection's preference, merges when propagating and writes the
    /// result together with the breaking flag and status. An empty diff
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// - [`SchemaChangeError::ConnectionNotFound`] for an unknown connection.
    /// - [`SchemaChangeError::Catalog`] when the resulting catalog breaks a
    ///   structural invariant; nothing is written.
    /// - [`SchemaChangeError::Internal`] when a collaborator fails.
    pub async fn apply_discovered_catalog(
        &self,
        connection_id: Uuid,
        discovered_catalog_id: CatalogId,
    ) -> Result<SchemaChangeOutcome, SchemaChangeError> {
        let lock = self.connection_lock(connection_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_discovered_locked(connection_id, discovered_catalog_id).await
        };
        self.release_lock(connection_id, &lock);
        result
    }

    async fn apply_discovered_locked(
        &self,
        connection_id: Uuid,
        discovered_catalog_id: CatalogId,
    ) -> Result<SchemaChangeOutcome, SchemaChangeError> {
        let connection = self.load_connection(connection_id).await?;
        let current = self.store.get_configured_catalog(connection_id).await?;
        let mut catalog_id = self.resolve_catalog_id(&connection, discovered_catalog_id).await?;
        let discovered = self
            .discovery
            .discover_catalog(connection.source_id, Some(catalog_id))
            .await?;

        let mut diff = schemasync_core::diff(&current, &discovered);
        let preference = connection.non_breaking_changes_preference;
        let mut decision = decide(&diff, preference, connection.status);

        if decision.action == PropagationAction::Noop {
            tracing::debug!(connection_id = %connection_id, %catalog_id, "schema unchanged");
            record_outcome(decision.action);
            return Ok(SchemaChangeOutcome {
                catalog_id,
                diff,
                decision,
                applied_diff: CatalogDiff::default(),
                change_description: String::new(),
                catalog: current,
                wiped_streams: BTreeSet::new(),
            });
        }

        let mut applied_diff = CatalogDiff::default();
        let mut change_description = String::new();
        let mut candidate = current.clone();

        if decision.should_merge() {
            let result = apply_schema_change(&current, &discovered, &diff, preference);
            candidate = self.align_sync_modes(&result.catalog, &result.applied_diff);
            applied_diff = result.applied_diff;
            change_description = result.change_description;

            // A breaking discovery that landed while merging wins over the merge.
            if let Some((latest_id, latest_diff)) = self
                .breaking_discovery_since(&connection, &current, catalog_id)
                .await?
            {
                tracing::warn!(
                    connection_id = %connection_id,
                    merged = %catalog_id,
                    latest = %latest_id,
                    "breaking discovery arrived during propagation, disabling instead"
                );
                decision = decide(&latest_diff, preference, connection.status);
                catalog_id = latest_id;
                diff = latest_diff;
                candidate.clone_from(&current);
                applied_diff = CatalogDiff::default();
                change_description.clear();
            }
        }

        let (source, destination) = self.connector_versions(&connection);
        candidate = apply_default_include_files(&candidate, &source, &destination);
        self.validate_structure(&candidate, &source, &destination)?;

        self.store
            .write_configured_catalog(
                connection_id,
                &candidate,
                decision.breaking_change,
                decision.new_status,
            )
            .await?;

        let mut wiped_streams = sync_mode_changes(&current, &candidate);
        if self.config.reset_streams_state_when_disabled {
            wiped_streams.extend(deactivated_streams(&current, &candidate));
        }
        self.wipe_state(connection_id, &wiped_streams).await?;

        let connection = ConnectionInfo {
            status: decision.new_status.unwrap_or(connection.status),
            breaking_change: decision.breaking_change,
            ..connection
        };
        self.notify(&connection, decision.notification, &diff, &applied_diff)
            .await;

        record_outcome(decision.action);
        tracing::info!(
            connection_id = %connection_id,
            %catalog_id,
            transforms = diff.len(),
            applied = applied_diff.len(),
            breaking = decision.breaking_change,
            action = ?decision.action,
            wiped = wiped_streams.len(),
            "schema change applied"
        );

        Ok(SchemaChangeOutcome {
            catalog_id,
            diff,
            decision,
            applied_diff,
            change_description,
            catalog: candidate,
            wiped_streams,
        })
    }

    /// Stores a catalog edited by the user.
    ///
    /// The catalog is validated structurally, its hashed fields and mappers
    /// are reconciled, and it is checked against the destination's declared
    /// operations when the destination has any.
    ///
    /// # Errors
    ///
    /// - [`SchemaChangeError::ConnectionNotFound`] for an unknown connection.
    /// - [`SchemaChangeError::Catalog`] for a structural violation.
    /// - [`SchemaChangeError::Destination`] with every destination violation.
    /// - [`SchemaChangeError::Internal`] when a collaborator fails.
    pub async fn update_catalog(
        &self,
        connection_id: Uuid,
        requested: &Catalog,
    ) -> Result<CatalogUpdateOutcome, SchemaChangeError> {
        let lock = self.connection_lock(connection_id);
        let result = {
            let _guard = lock.lock().await;
            self.update_catalog_locked(connection_id, requested).await
        };
        self.release_lock(connection_id, &lock);
        result
    }

    async fn update_catalog_locked(
        &self,
        connection_id: Uuid,
        requested: &Catalog,
    ) -> Result<CatalogUpdateOutcome, SchemaChangeError> {
        let connection = self.load_connection(connection_id).await?;
        validate_catalog(requested)?;

        let catalog = requested.map_configs(|entry| {
            let config = reconcile_hashed_fields(entry.config.clone());
            let mappers = assign_mapper_ids(&config.mappers);
            config.with_mappers(mappers)
        });

        let (source, destination) = self.connector_versions(&connection);
        if self.config.validate_include_files {
            validate_include_files(
                &catalog,
                source.supports_file_transfer,
                destination.supports_file_transfer,
            )?;
        }
        if self.config.validate_destination_catalog {
            if let Some(declared) = self.capabilities.destination_catalog(&destination) {
                validate_against_destination(&catalog, &declared, &self.mappers)?;
            }
        }

        let stored = self.store.get_configured_catalog(connection_id).await?;
        let changed_streams = configuration_diff(&stored, &catalog);

        self.store
            .write_configured_catalog(connection_id, &catalog, connection.breaking_change, None)
            .await?;

        let wiped_streams = if self.config.reset_streams_state_when_disabled {
            changed_streams.clone()
        } else {
            sync_mode_changes(&stored, &catalog)
        };
        self.wipe_state(connection_id, &wiped_streams).await?;

        tracing::info!(
            connection_id = %connection_id,
            streams = catalog.len(),
            changed = changed_streams.len(),
            wiped = wiped_streams.len(),
            "catalog updated"
        );

        Ok(CatalogUpdateOutcome {
            catalog,
            changed_streams,
            wiped_streams,
        })
    }

    // -- internals --

    fn connection_lock(&self, connection_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(connection_id).or_default().clone()
    }

    /// Drops the connection's lock entry once no other caller holds or
    /// waits on it. Two references remain at that point: the map's and
    /// the caller's.
    fn release_lock(&self, connection_id: Uuid, lock: &Arc<Mutex<()>>) {
        self.locks.remove_if(&connection_id, |_, held| {
            Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2
        });
    }

    async fn load_connection(&self, connection_id: Uuid) -> Result<ConnectionInfo, SchemaChangeError> {
        self.store
            .get_connection(connection_id)
            .await?
            .ok_or(SchemaChangeError::ConnectionNotFound(connection_id))
    }

    /// A newer discovery may have landed between scheduling and running.
    async fn resolve_catalog_id(
        &self,
        connection: &ConnectionInfo,
        requested: CatalogId,
    ) -> Result<CatalogId, SchemaChangeError> {
        let latest = self
            .discovery
            .most_recent_discovered_catalog_id(connection.source_id)
            .await?;
        match latest {
            Some(latest) if latest != requested => {
                tracing::info!(
                    connection_id = %connection.connection_id,
                    %requested,
                    %latest,
                    "using more recent discovered catalog"
                );
                Ok(latest)
            }
            _ => Ok(requested),
        }
    }

    /// Latest discovery for the source when it is newer than `merged` and
    /// breaking against the stored catalog.
    async fn breaking_discovery_since(
        &self,
        connection: &ConnectionInfo,
        current: &Catalog,
        merged: CatalogId,
    ) -> Result<Option<(CatalogId, CatalogDiff)>, SchemaChangeError> {
        let latest = self
            .discovery
            .most_recent_discovered_catalog_id(connection.source_id)
            .await?;
        let Some(latest) = latest.filter(|latest| *latest != merged) else {
            return Ok(None);
        };
        let discovered = self
            .discovery
            .discover_catalog(connection.source_id, Some(latest))
            .await?;
        let diff = schemasync_core::diff(current, &discovered);
        Ok(contains_breaking_change(&diff).then_some((latest, diff)))
    }

    /// Connector versions with their file-transfer support filled in from
    /// the capabilities.
    fn connector_versions(&self, connection: &ConnectionInfo) -> (ActorVersion, ActorVersion) {
        let source = connection.source_version.clone().with_file_transfer(
            self.capabilities
                .supports_file_transfer(&connection.source_version),
        );
        let destination = connection.destination_version.clone().with_file_transfer(
            self.capabilities
                .supports_file_transfer(&connection.destination_version),
        );
        (source, destination)
    }

    fn validate_structure(
        &self,
        catalog: &Catalog,
        source: &ActorVersion,
        destination: &ActorVersion,
    ) -> Result<(), CatalogError> {
        validate_catalog(catalog)?;
        if self.config.validate_include_files {
            validate_include_files(
                catalog,
                source.supports_file_transfer,
                destination.supports_file_transfer,
            )?;
        }
        Ok(())
    }

    /// Re-checks sync modes of the streams an auto-propagation touched.
    ///
    /// The connector's answer wins; the stream's own list is used when the
    /// connector does not know the stream.
    fn align_sync_modes(&self, catalog: &Catalog, applied: &CatalogDiff) -> Catalog {
        let touched: BTreeSet<&StreamDescriptor> = applied.descriptors().collect();
        catalog.map_configs(|entry| {
            if !touched.contains(entry.descriptor()) {
                return entry.config.clone();
            }
            let mut supported: Vec<SyncMode> = self
                .capabilities
                .supported_sync_modes(entry.descriptor())
                .into_iter()
                .collect();
            if supported.is_empty() {
                supported.clone_from(&entry.stream.supported_sync_modes);
            }
            ensure_compatible_sync_modes(entry.config.clone(), &supported, &[])
        })
    }

    async fn wipe_state(
        &self,
        connection_id: Uuid,
        streams: &BTreeSet<StreamDescriptor>,
    ) -> Result<(), SchemaChangeError> {
        if streams.is_empty() {
            return Ok(());
        }
        self.state.bulk_delete_state(connection_id, streams).await?;
        metrics::counter!("schemasync_state_wipes_total").increment(streams.len() as u64);
        tracing::info!(
            connection_id = %connection_id,
            streams = ?streams.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "stream state wiped"
        );
        Ok(())
    }

    /// Sends the notification the decision calls for. Failures are logged.
    async fn notify(
        &self,
        connection: &ConnectionInfo,
        notification: Option<PropagationNotification>,
        diff: &CatalogDiff,
        applied_diff: &CatalogDiff,
    ) {
        if !connection.notify_schema_changes {
            return;
        }
        let result = match notification {
            None => return,
            Some(PropagationNotification::SchemaPropagated) if applied_diff.is_empty() => return,
            Some(PropagationNotification::SchemaPropagated) => {
                self.notifier
                    .notify_schema_propagated(applied_diff, connection)
                    .await
            }
            Some(PropagationNotification::DiffToApply {
                disabled_for_breaking,
            }) => {
                self.notifier
                    .notify_schema_diff_to_apply(diff, connection, disabled_for_breaking)
                    .await
            }
        };
        if let Err(err) = result {
            tracing::warn!(
                connection_id = %connection.connection_id,
                error = %err,
                "failed to send schema change notification"
            );
        }
    }
}

/// Selected streams whose sync mode or destination sync mode changed.
fn sync_mode_changes(before: &Catalog, after: &Catalog) -> BTreeSet<StreamDescriptor> {
    configuration_diff(before, after)
        .into_iter()
        .filter(|descriptor| {
            let (Some(old), Some(new)) = (before.get(descriptor), after.get(descriptor)) else {
                return false;
            };
            new.config.selected
                && (old.config.sync_mode != new.config.sync_mode
                    || old.config.destination_sync_mode != new.config.destination_sync_mode)
        })
        .collect()
}

fn record_outcome(action: PropagationAction) {
    let outcome = match action {
        PropagationAction::Noop => "noop",
        PropagationAction::ManualApply => "manual_apply",
        PropagationAction::Disable => "disabled",
        PropagationAction::Propagate(_) => "propagated",
    };
    metrics::counter!("schemasync_schema_changes_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use schemasync_core::{
        default_configuration, ConnectionStatus, DestinationCatalog, DestinationOperation,
        DestinationSyncMode, NonBreakingChangesPreference, StreamEntry, StreamSchema,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;
    use crate::memory::{
        InMemoryCatalogStore, InMemoryDiscoveryProvider, InMemoryStateStore, RecordedNotification,
        RecordingNotifier, StaticCapabilities,
    };

    fn schema_with(fields: &[&str]) -> Value {
        let properties: serde_json::Map<String, Value> = fields
            .iter()
            .map(|f| ((*f).to_string(), json!({"type": "string"})))
            .collect();
        json!({ "type": "object", "properties": properties })
    }

    fn stream(name: &str, fields: &[&str]) -> StreamSchema {
        StreamSchema::new(StreamDescriptor::new(name), schema_with(fields))
            .with_supported_sync_modes(vec![SyncMode::FullRefresh, SyncMode::Incremental])
    }

    fn selected(schema: StreamSchema) -> StreamEntry {
        let config = default_configuration(&schema).with_selected(true);
        StreamEntry::new(schema, config)
    }

    fn catalog(entries: Vec<StreamEntry>) -> Catalog {
        Catalog::new(entries).unwrap()
    }

    struct Harness {
        store: Arc<InMemoryCatalogStore>,
        discovery: Arc<InMemoryDiscoveryProvider>,
        state: Arc<InMemoryStateStore>,
        notifier: Arc<RecordingNotifier>,
        service: SchemaChangeService,
        connection: ConnectionInfo,
    }

    fn harness_with(
        connection: ConnectionInfo,
        stored: Catalog,
        capabilities: StaticCapabilities,
        notifier: RecordingNotifier,
        config: SchemaChangeConfig,
    ) -> Harness {
        let store = Arc::new(InMemoryCatalogStore::new());
        store.insert(connection.clone(), stored);
        let discovery = Arc::new(InMemoryDiscoveryProvider::new());
        let state = Arc::new(InMemoryStateStore::new());
        let notifier = Arc::new(notifier);
        let service = SchemaChangeService::new(
            store.clone(),
            discovery.clone(),
            state.clone(),
            notifier.clone(),
            Arc::new(capabilities),
            config,
        );
        Harness {
            store,
            discovery,
            state,
            notifier,
            service,
            connection,
        }
    }

    fn harness(preference: NonBreakingChangesPreference, stored: Catalog) -> Harness {
        let connection = ConnectionInfo::new(
            ActorVersion::new("source-postgres", "3.6.0"),
            ActorVersion::new("destination-s3", "1.2.0"),
        )
        .with_preference(preference)
        .with_notifications(true);
        harness_with(
            connection,
            stored,
            StaticCapabilities::new(),
            RecordingNotifier::new(),
            SchemaChangeConfig::default(),
        )
    }

    #[tokio::test]
    async fn unchanged_schema_is_a_noop() {
        let stored = catalog(vec![selected(stream("users", &["id", "name"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored.clone());
        let id = h.discovery.add(h.connection.source_id, stored.clone());

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert_eq!(outcome.decision.action, PropagationAction::Noop);
        assert!(outcome.diff.is_empty());
        assert_eq!(h.store.write_count(), 0);
        assert!(h.notifier.recorded().is_empty());
    }

    #[tokio::test]
    async fn propagate_columns_merges_added_field_and_notifies() {
        let stored = catalog(vec![selected(stream("shoes", &["sku"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored);
        let id = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("shoes", &["sku", "a-different-column"]))]),
        );

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert!(outcome.decision.should_merge());
        assert_eq!(outcome.applied_diff.len(), 1);
        assert!(outcome.change_description.contains("a-different-column"));

        let written = h.store.catalog(h.connection.connection_id).unwrap();
        let shoes = written.get(&StreamDescriptor::new("shoes")).unwrap();
        assert!(shoes.stream.json_schema["properties"]
            .get("a-different-column")
            .is_some());
        assert!(shoes.config.selected);

        let info = h.store.connection(h.connection.connection_id).unwrap();
        assert_eq!(info.status, ConnectionStatus::Active);
        assert!(!info.breaking_change);

        let recorded = h.notifier.recorded();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(recorded[0], RecordedNotification::SchemaPropagated { .. }));
    }

    #[tokio::test]
    async fn breaking_change_disables_active_connection() {
        let stored = catalog(vec![selected(stream("users", &["id", "email"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateFully, stored.clone());
        let id = h
            .discovery
            .add(h.connection.source_id, catalog(vec![selected(stream("users", &["id"]))]));

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert_eq!(outcome.decision.action, PropagationAction::Disable);
        assert!(outcome.applied_diff.is_empty());
        assert_eq!(outcome.catalog, stored);

        let info = h.store.connection(h.connection.connection_id).unwrap();
        assert_eq!(info.status, ConnectionStatus::Inactive);
        assert!(info.breaking_change);

        let recorded = h.notifier.recorded();
        assert_eq!(
            recorded,
            vec![RecordedNotification::DiffToApply {
                connection_id: h.connection.connection_id,
                diff: outcome.diff.clone(),
                disabled_for_breaking: true,
            }]
        );
    }

    #[tokio::test]
    async fn ignore_preference_keeps_catalog_and_waits_for_user() {
        let stored = catalog(vec![selected(stream("users", &["id"]))]);
        let h = harness(NonBreakingChangesPreference::Ignore, stored.clone());
        let id = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("users", &["id", "nickname"]))]),
        );

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert_eq!(outcome.decision.action, PropagationAction::ManualApply);
        assert_eq!(h.store.catalog(h.connection.connection_id).unwrap(), stored);
        assert_eq!(
            h.store.connection(h.connection.connection_id).unwrap().status,
            ConnectionStatus::Active
        );
        assert!(matches!(
            h.notifier.recorded()[0],
            RecordedNotification::DiffToApply {
                disabled_for_breaking: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn more_recent_discovery_wins() {
        let stored = catalog(vec![selected(stream("users", &["id"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored);
        let stale = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("users", &["id", "a"]))]),
        );
        let latest = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("users", &["id", "a", "b"]))]),
        );

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, stale)
            .await
            .unwrap();

        assert_eq!(outcome.catalog_id, latest);
        let written = h.store.catalog(h.connection.connection_id).unwrap();
        let users = written.get(&StreamDescriptor::new("users")).unwrap();
        assert!(users.stream.json_schema["properties"].get("b").is_some());
    }

    #[tokio::test]
    async fn removed_stream_under_full_propagation_wipes_its_state() {
        let stored = catalog(vec![
            selected(stream("users", &["id"])),
            selected(stream("orders", &["id"])),
        ]);
        let h = harness(NonBreakingChangesPreference::PropagateFully, stored);
        let id = h
            .discovery
            .add(h.connection.source_id, catalog(vec![selected(stream("users", &["id"]))]));

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        let orders = StreamDescriptor::new("orders");
        assert!(!outcome.catalog.contains(&orders));
        assert_eq!(outcome.wiped_streams, BTreeSet::from([orders.clone()]));
        assert_eq!(
            h.state.deleted(h.connection.connection_id),
            BTreeSet::from([orders])
        );
    }

    #[tokio::test]
    async fn removed_stream_keeps_state_when_reset_disabled() {
        let stored = catalog(vec![
            selected(stream("users", &["id"])),
            selected(stream("orders", &["id"])),
        ]);
        let connection = ConnectionInfo::new(ActorVersion::new("s", "1"), ActorVersion::new("d", "1"))
            .with_preference(NonBreakingChangesPreference::PropagateFully);
        let h = harness_with(
            connection,
            stored,
            StaticCapabilities::new(),
            RecordingNotifier::new(),
            SchemaChangeConfig {
                reset_streams_state_when_disabled: false,
                ..SchemaChangeConfig::default()
            },
        );
        let id = h
            .discovery
            .add(h.connection.source_id, catalog(vec![selected(stream("users", &["id"]))]));

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert!(outcome.wiped_streams.is_empty());
        assert!(h.state.deleted(h.connection.connection_id).is_empty());
    }

    #[tokio::test]
    async fn unsupported_sync_mode_falls_back_and_wipes_state() {
        let users = StreamDescriptor::new("users");
        let schema = stream("users", &["id", "updated_at"]);
        let config = default_configuration(&schema)
            .with_selected(true)
            .with_sync_modes(SyncMode::Incremental, DestinationSyncMode::Append)
            .with_cursor_field(Some(vec!["updated_at".to_string()]));
        let stored = catalog(vec![StreamEntry::new(schema, config)]);
        let connection = ConnectionInfo::new(ActorVersion::new("s", "1"), ActorVersion::new("d", "1"))
            .with_preference(NonBreakingChangesPreference::PropagateColumns);
        let h = harness_with(
            connection,
            stored,
            StaticCapabilities::new()
                .with_sync_modes(users.clone(), BTreeSet::from([SyncMode::FullRefresh])),
            RecordingNotifier::new(),
            SchemaChangeConfig::default(),
        );
        let id = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("users", &["id", "updated_at", "email"]))]),
        );

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        let entry = outcome.catalog.get(&users).unwrap();
        assert_eq!(entry.config.sync_mode, SyncMode::FullRefresh);
        assert_eq!(entry.config.destination_sync_mode, DestinationSyncMode::Overwrite);
        assert_eq!(outcome.wiped_streams, BTreeSet::from([users]));
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_change() {
        let stored = catalog(vec![selected(stream("users", &["id", "email"]))]);
        let connection = ConnectionInfo::new(ActorVersion::new("s", "1"), ActorVersion::new("d", "1"))
            .with_notifications(true);
        let h = harness_with(
            connection,
            stored,
            StaticCapabilities::new(),
            RecordingNotifier::failing(),
            SchemaChangeConfig::default(),
        );
        let id = h
            .discovery
            .add(h.connection.source_id, catalog(vec![selected(stream("users", &["id"]))]));

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert!(outcome.decision.breaking_change);
        assert_eq!(h.store.write_count(), 1);
    }

    #[tokio::test]
    async fn notifications_off_sends_nothing() {
        let stored = catalog(vec![selected(stream("users", &["id", "email"]))]);
        let connection = ConnectionInfo::new(ActorVersion::new("s", "1"), ActorVersion::new("d", "1"));
        let h = harness_with(
            connection,
            stored,
            StaticCapabilities::new(),
            RecordingNotifier::new(),
            SchemaChangeConfig::default(),
        );
        let id = h
            .discovery
            .add(h.connection.source_id, catalog(vec![selected(stream("users", &["id"]))]));

        h.service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert!(h.notifier.recorded().is_empty());
    }

    #[tokio::test]
    async fn unknown_connection_is_reported() {
        let h = harness(NonBreakingChangesPreference::Ignore, Catalog::default());
        let missing = Uuid::new_v4();
        let err = h
            .service
            .apply_discovered_catalog(missing, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaChangeError::ConnectionNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn file_based_streams_get_default_include_files() {
        let stored = catalog(vec![selected(stream("docs", &["path"]).with_file_based(true))]);
        let connection = ConnectionInfo::new(
            ActorVersion::new("source-s3", "4.0.0").with_file_transfer(true),
            ActorVersion::new("destination-s3", "1.0.0").with_file_transfer(true),
        )
        .with_preference(NonBreakingChangesPreference::PropagateColumns);
        let h = harness_with(
            connection,
            stored,
            StaticCapabilities::new(),
            RecordingNotifier::new(),
            SchemaChangeConfig::default(),
        );
        let id = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(
                stream("docs", &["path", "size"]).with_file_based(true),
            )]),
        );

        let outcome = h
            .service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        let docs = outcome.catalog.get(&StreamDescriptor::new("docs")).unwrap();
        assert_eq!(docs.config.include_files, Some(true));
    }

    #[tokio::test]
    async fn update_catalog_reconciles_hashed_fields_and_reports_changes() {
        let stored = catalog(vec![selected(stream("users", &["id", "email"]))]);
        let h = harness(NonBreakingChangesPreference::Ignore, stored);

        let schema = stream("users", &["id", "email"]);
        let config = default_configuration(&schema)
            .with_selected(true)
            .with_sync_modes(SyncMode::FullRefresh, DestinationSyncMode::Append)
            .with_hashed_fields(vec![vec!["email".to_string()]]);
        let requested = catalog(vec![StreamEntry::new(schema, config)]);

        let outcome = h
            .service
            .update_catalog(h.connection.connection_id, &requested)
            .await
            .unwrap();

        let users = StreamDescriptor::new("users");
        let entry = outcome.catalog.get(&users).unwrap();
        assert_eq!(entry.config.mappers.len(), 1);
        assert_eq!(entry.config.mappers[0].name, "hashing");
        assert!(entry.config.mappers[0].id.is_some());
        assert_eq!(outcome.changed_streams, BTreeSet::from([users.clone()]));
        assert_eq!(h.state.deleted(h.connection.connection_id), BTreeSet::from([users]));
        assert_eq!(h.store.catalog(h.connection.connection_id).unwrap(), outcome.catalog);
    }

    #[tokio::test]
    async fn update_catalog_rejects_invalid_field_selection() {
        let h = harness(NonBreakingChangesPreference::Ignore, Catalog::default());
        let schema = stream("users", &["id", "email"]);
        let config = default_configuration(&schema)
            .with_selected(true)
            .with_selected_fields(vec![vec!["address".to_string(), "city".to_string()]]);
        let requested = catalog(vec![StreamEntry::new(schema, config)]);

        let err = h
            .service
            .update_catalog(h.connection.connection_id, &requested)
            .await
            .unwrap_err();

        assert!(matches!(err, SchemaChangeError::Catalog(_)));
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn update_catalog_reports_every_destination_violation() {
        let destination = ActorVersion::new("destination-crm", "0.4.0");
        let declared = DestinationCatalog {
            operations: vec![DestinationOperation::new(
                "contacts",
                DestinationSyncMode::Append,
                json!({
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["field2"],
                    "properties": { "field2": {"type": "string"} }
                }),
            )],
        };
        let connection = ConnectionInfo::new(ActorVersion::new("s", "1"), destination.clone());
        let h = harness_with(
            connection,
            Catalog::default(),
            StaticCapabilities::new().with_destination_catalog(&destination, declared),
            RecordingNotifier::new(),
            SchemaChangeConfig::default(),
        );

        let schema = stream("people", &["field1"]);
        let config = default_configuration(&schema)
            .with_selected(true)
            .with_sync_modes(SyncMode::FullRefresh, DestinationSyncMode::Append)
            .with_destination_object_name(Some("contacts".to_string()));
        let requested = catalog(vec![StreamEntry::new(schema, config)]);

        let err = h
            .service
            .update_catalog(h.connection.connection_id, &requested)
            .await
            .unwrap_err();

        let SchemaChangeError::Destination(err) = err else {
            panic!("expected destination error, got {err:?}");
        };
        assert_eq!(err.violations.len(), 2);
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn destination_validation_can_be_switched_off() {
        let destination = ActorVersion::new("destination-crm", "0.4.0");
        let declared = DestinationCatalog { operations: vec![] };
        let connection = ConnectionInfo::new(ActorVersion::new("s", "1"), destination.clone());
        let h = harness_with(
            connection,
            Catalog::default(),
            StaticCapabilities::new().with_destination_catalog(&destination, declared),
            RecordingNotifier::new(),
            SchemaChangeConfig {
                validate_destination_catalog: false,
                ..SchemaChangeConfig::default()
            },
        );
        let requested = catalog(vec![selected(stream("people", &["field1"]))]);

        h.service
            .update_catalog(h.connection.connection_id, &requested)
            .await
            .unwrap();

        assert_eq!(h.store.write_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_discoveries_for_one_connection_are_serialized() {
        let stored = catalog(vec![selected(stream("users", &["id"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored);
        let id = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("users", &["id", "email"]))]),
        );
        let service = Arc::new(h.service);

        let first = {
            let service = service.clone();
            let connection_id = h.connection.connection_id;
            tokio::spawn(async move { service.apply_discovered_catalog(connection_id, id).await })
        };
        let second = {
            let service = service.clone();
            let connection_id = h.connection.connection_id;
            tokio::spawn(async move { service.apply_discovered_catalog(connection_id, id).await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        // Whichever ran second saw the merged catalog and found nothing to do.
        let actions = [first.decision.action, second.decision.action];
        assert!(actions.contains(&PropagationAction::Noop));
        assert_eq!(h.store.write_count(), 1);
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_each_call() {
        let stored = catalog(vec![selected(stream("users", &["id"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored.clone());
        let id = h.discovery.add(
            h.connection.source_id,
            catalog(vec![selected(stream("users", &["id", "email"]))]),
        );

        h.service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();
        assert!(h.service.locks.is_empty());

        h.service
            .update_catalog(h.connection.connection_id, &stored)
            .await
            .unwrap();
        let missing = h.service.apply_discovered_catalog(Uuid::new_v4(), id).await;
        assert!(matches!(missing, Err(SchemaChangeError::ConnectionNotFound(_))));
        assert!(h.service.locks.is_empty());
    }

    // -- discovery racing a propagation --

    /// Publishes one more discovery for the source the first time a catalog
    /// is loaded, as if the connector finished discovering mid-merge.
    struct RacingDiscovery {
        inner: Arc<InMemoryDiscoveryProvider>,
        pending: SyncMutex<Option<(Uuid, Catalog)>>,
    }

    #[async_trait]
    impl DiscoveryProvider for RacingDiscovery {
        async fn discover_catalog(
            &self,
            source_id: Uuid,
            catalog_id: Option<CatalogId>,
        ) -> anyhow::Result<Catalog> {
            let catalog = self.inner.discover_catalog(source_id, catalog_id).await?;
            if let Some((source, late)) = self.pending.lock().take() {
                self.inner.add(source, late);
            }
            Ok(catalog)
        }

        async fn most_recent_discovered_catalog_id(
            &self,
            source_id: Uuid,
        ) -> anyhow::Result<Option<CatalogId>> {
            self.inner.most_recent_discovered_catalog_id(source_id).await
        }
    }

    #[tokio::test]
    async fn breaking_discovery_during_propagation_disables_instead() {
        let stored = catalog(vec![selected(stream("users", &["id", "email"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored.clone());
        let source_id = h.connection.source_id;
        let id = h.discovery.add(
            source_id,
            catalog(vec![selected(stream("users", &["id", "email", "nick"]))]),
        );
        let racing = Arc::new(RacingDiscovery {
            inner: h.discovery.clone(),
            pending: SyncMutex::new(Some((
                source_id,
                catalog(vec![selected(stream("users", &["id"]))]),
            ))),
        });
        let service = SchemaChangeService::new(
            h.store.clone(),
            racing,
            h.state.clone(),
            h.notifier.clone(),
            Arc::new(StaticCapabilities::new()),
            SchemaChangeConfig::default(),
        );

        let outcome = service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert_eq!(outcome.decision.action, PropagationAction::Disable);
        assert_ne!(outcome.catalog_id, id);
        assert!(contains_breaking_change(&outcome.diff));
        assert!(outcome.applied_diff.is_empty());
        assert_eq!(h.store.catalog(h.connection.connection_id).unwrap(), stored);

        let info = h.store.connection(h.connection.connection_id).unwrap();
        assert_eq!(info.status, ConnectionStatus::Inactive);
        assert!(info.breaking_change);
        assert!(matches!(
            h.notifier.recorded().as_slice(),
            [RecordedNotification::DiffToApply {
                disabled_for_breaking: true,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn non_breaking_discovery_during_propagation_still_merges() {
        let stored = catalog(vec![selected(stream("users", &["id"]))]);
        let h = harness(NonBreakingChangesPreference::PropagateColumns, stored);
        let source_id = h.connection.source_id;
        let id = h.discovery.add(
            source_id,
            catalog(vec![selected(stream("users", &["id", "email"]))]),
        );
        let racing = Arc::new(RacingDiscovery {
            inner: h.discovery.clone(),
            pending: SyncMutex::new(Some((
                source_id,
                catalog(vec![selected(stream("users", &["id", "email", "nick"]))]),
            ))),
        });
        let service = SchemaChangeService::new(
            h.store.clone(),
            racing,
            h.state.clone(),
            h.notifier.clone(),
            Arc::new(StaticCapabilities::new()),
            SchemaChangeConfig::default(),
        );

        let outcome = service
            .apply_discovered_catalog(h.connection.connection_id, id)
            .await
            .unwrap();

        assert!(outcome.decision.should_merge());
        assert_eq!(outcome.catalog_id, id);
        let info = h.store.connection(h.connection.connection_id).unwrap();
        assert_eq!(info.status, ConnectionStatus::Active);
        assert!(!info.breaking_change);
    }

    // -- properties --

    const FIELD_POOL: [&str; 6] = ["email", "name", "nick", "age", "city", "zip"];

    proptest! {
        #[test]
        fn applying_the_same_discovery_twice_writes_once(
            added in proptest::sample::subsequence(FIELD_POOL.to_vec(), 0..=FIELD_POOL.len()),
            fully in any::<bool>(),
        ) {
            let preference = if fully {
                NonBreakingChangesPreference::PropagateFully
            } else {
                NonBreakingChangesPreference::PropagateColumns
            };
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (first, second, writes) = runtime.block_on(async {
                let h = harness(preference, catalog(vec![selected(stream("users", &["id"]))]));
                let mut fields = vec!["id"];
                fields.extend(added.iter().copied());
                let id = h.discovery.add(
                    h.connection.source_id,
                    catalog(vec![selected(stream("users", &fields))]),
                );
                let first = h
                    .service
                    .apply_discovered_catalog(h.connection.connection_id, id)
                    .await
                    .unwrap();
                let second = h
                    .service
                    .apply_discovered_catalog(h.connection.connection_id, id)
                    .await
                    .unwrap();
                (first, second, h.store.write_count())
            });

            prop_assert_eq!(second.decision.action, PropagationAction::Noop);
            prop_assert_eq!(&second.catalog, &first.catalog);
            prop_assert_eq!(writes, usize::from(!added.is_empty()));
        }
    }
}
