//! Connection metadata the orchestrator reads before touching a catalog.

use schemasync_core::{ActorVersion, ConnectionStatus, NonBreakingChangesPreference};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one discovered catalog snapshot.
pub type CatalogId = Uuid;

/// Everything about a connection that schema change handling depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub source_id: Uuid,
    pub destination_id: Uuid,
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub non_breaking_changes_preference: NonBreakingChangesPreference,
    pub source_version: ActorVersion,
    pub destination_version: ActorVersion,
    /// Whether the workspace wants schema change notifications for this
    /// connection.
    #[serde(default)]
    pub notify_schema_changes: bool,
    /// Set while the stored catalog lags a breaking source change.
    #[serde(default)]
    pub breaking_change: bool,
}

impl ConnectionInfo {
    /// Creates an active connection with fresh ids and the default
    /// preference.
    #[must_use]
    pub fn new(source_version: ActorVersion, destination_version: ActorVersion) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            status: ConnectionStatus::Active,
            non_breaking_changes_preference: NonBreakingChangesPreference::default(),
            source_version,
            destination_version,
            notify_schema_changes: false,
            breaking_change: false,
        }
    }

    #[must_use]
    pub fn with_preference(mut self, preference: NonBreakingChangesPreference) -> Self {
        self.non_breaking_changes_preference = preference;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notify_schema_changes = enabled;
        self
    }
}
