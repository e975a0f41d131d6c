//! Identity keys and small enums shared by every catalog representation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered sequence of property names addressing a field inside a nested
/// JSON schema, e.g. `["user", "address", "zip"]`.
///
/// Array element schemas are addressed with the literal segment `items`.
pub type FieldPath = Vec<String>;

/// Renders a field path as a dot-joined string (`user.address.zip`).
#[must_use]
pub fn format_path(path: &[String]) -> String {
    path.join(".")
}

/// Returns true when two composite keys contain the same paths, ignoring
/// the order in which the paths are listed.
///
/// Used for primary keys and destination matching keys, where `[[a], [b]]`
/// and `[[b], [a]]` describe the same key. The segments inside each path
/// stay order-sensitive.
#[must_use]
pub fn same_key_set(left: &[FieldPath], right: &[FieldPath]) -> bool {
    let left: BTreeSet<&FieldPath> = left.iter().collect();
    let right: BTreeSet<&FieldPath> = right.iter().collect();
    left == right
}

// ---------------------------------------------------------------------------
// StreamDescriptor
// ---------------------------------------------------------------------------

/// Identity of one stream within a catalog.
///
/// Ordering is by name first, then namespace (absent namespace sorts first),
/// which gives every catalog and diff a deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// Stream name as reported by the source.
    pub name: String,
    /// Optional namespace (schema, database, ...).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    /// Creates a descriptor without a namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Creates a namespaced descriptor.
    #[must_use]
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync modes
// ---------------------------------------------------------------------------

/// How records are read from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

/// How records are written to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
    OverwriteDedup,
    Update,
    SoftDelete,
}

impl DestinationSyncMode {
    /// Returns true for modes that deduplicate on the configured primary key.
    #[must_use]
    pub fn is_dedup(self) -> bool {
        matches!(self, Self::AppendDedup | Self::OverwriteDedup)
    }
}

// ---------------------------------------------------------------------------
// ActorVersion
// ---------------------------------------------------------------------------

/// A connector image version and the capabilities it advertises.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorVersion {
    pub docker_repository: String,
    pub docker_image_tag: String,
    #[serde(default)]
    pub supports_file_transfer: bool,
}

impl ActorVersion {
    #[must_use]
    pub fn new(docker_repository: impl Into<String>, docker_image_tag: impl Into<String>) -> Self {
        Self {
            docker_repository: docker_repository.into(),
            docker_image_tag: docker_image_tag.into(),
            supports_file_transfer: false,
        }
    }

    #[must_use]
    pub fn with_file_transfer(mut self, supported: bool) -> Self {
        self.supports_file_transfer = supported;
        self
    }
}

// ---------------------------------------------------------------------------
// Connection-level enums
// ---------------------------------------------------------------------------

/// What a connection should do when the source schema changes without a
/// breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonBreakingChangesPreference {
    /// Record the diff and wait for a manual apply.
    #[default]
    Ignore,
    /// Disable the connection and wait for a manual apply.
    Disable,
    /// Apply field-level changes only; stream additions/removals wait.
    PropagateColumns,
    /// Apply every change, including stream additions and removals.
    PropagateFully,
}

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Active,
    Inactive,
    Deprecated,
    Locked,
}
