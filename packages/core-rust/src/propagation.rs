//! What to do with a connection when its source schema changed.
//!
//! [`decide`] maps a diff and the connection's preference to an action.
//! [`apply_schema_change`] then produces the catalog for the propagating
//! actions. Both are pure; the server crate performs the writes, state
//! wipes and notifications they call for.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, StreamEntry};
use crate::diff::{contains_breaking_change, format_diff, CatalogDiff, FieldTransform, StreamTransform};
use crate::merge::{default_configuration, merge_stream};
use crate::types::{ConnectionStatus, NonBreakingChangesPreference, StreamDescriptor};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Which transforms an auto-propagation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationScope {
    /// Field-level changes of existing streams only.
    Columns,
    /// Every transform, including stream additions and removals.
    Full,
}

impl PropagationScope {
    #[must_use]
    pub fn for_preference(preference: NonBreakingChangesPreference) -> Self {
        match preference {
            NonBreakingChangesPreference::PropagateFully => Self::Full,
            _ => Self::Columns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationAction {
    /// Empty diff: nothing to do.
    Noop,
    /// Keep the catalog and wait for the user to apply the diff.
    ManualApply,
    /// Keep the catalog and disable the connection.
    Disable,
    /// Merge the diff into the catalog.
    Propagate(PropagationScope),
}

/// Notification the caller should dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationNotification {
    SchemaPropagated,
    DiffToApply { disabled_for_breaking: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationDecision {
    pub action: PropagationAction,
    pub breaking_change: bool,
    /// Status to write, or `None` to leave the connection's status alone.
    pub new_status: Option<ConnectionStatus>,
    pub notification: Option<PropagationNotification>,
}

impl PropagationDecision {
    const NOOP: Self = Self {
        action: PropagationAction::Noop,
        breaking_change: false,
        new_status: None,
        notification: None,
    };

    #[must_use]
    pub fn should_merge(&self) -> bool {
        matches!(self.action, PropagationAction::Propagate(_))
    }
}

/// Decides how a connection reacts to `diff`.
///
/// | breaking | preference | action |
/// |---|---|---|
/// | yes | any | disable, diff-to-apply notification |
/// | no | ignore | manual apply, diff-to-apply notification |
/// | no | disable | disable, diff-to-apply notification |
/// | no | propagate_columns | propagate columns |
/// | no | propagate_fully | propagate everything |
///
/// An empty diff is a no-op. Only an active connection is ever moved to
/// inactive, so deciding twice on the same diff gives the same result.
#[must_use]
pub fn decide(
    diff: &CatalogDiff,
    preference: NonBreakingChangesPreference,
    status: ConnectionStatus,
) -> PropagationDecision {
    if diff.is_empty() {
        return PropagationDecision::NOOP;
    }

    let disable_to = (status == ConnectionStatus::Active).then_some(ConnectionStatus::Inactive);

    if contains_breaking_change(diff) {
        return PropagationDecision {
            action: PropagationAction::Disable,
            breaking_change: true,
            new_status: disable_to,
            notification: Some(PropagationNotification::DiffToApply {
                disabled_for_breaking: true,
            }),
        };
    }

    let (action, new_status, notification) = match preference {
        NonBreakingChangesPreference::Ignore => (
            PropagationAction::ManualApply,
            None,
            PropagationNotification::DiffToApply {
                disabled_for_breaking: false,
            },
        ),
        NonBreakingChangesPreference::Disable => (
            PropagationAction::Disable,
            disable_to,
            PropagationNotification::DiffToApply {
                disabled_for_breaking: true,
            },
        ),
        NonBreakingChangesPreference::PropagateColumns | NonBreakingChangesPreference::PropagateFully => (
            PropagationAction::Propagate(PropagationScope::for_preference(preference)),
            None,
            PropagationNotification::SchemaPropagated,
        ),
    };

    PropagationDecision {
        action,
        breaking_change: false,
        new_status,
        notification: Some(notification),
    }
}

// ---------------------------------------------------------------------------
// Applying a diff
// ---------------------------------------------------------------------------

/// Catalog produced by an auto-propagation, with the part of the diff that
/// was actually applied.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSchemaResult {
    pub catalog: Catalog,
    pub applied_diff: CatalogDiff,
    /// Human-readable [`applied_diff`](Self::applied_diff), one line per
    /// stream; empty when nothing was applied.
    pub change_description: String,
}

/// Applies the transforms of `diff` that `preference` allows to `current`.
///
/// Updated streams take their schema from `discovered` and keep their
/// configuration (see [`merge_stream`]). Under full propagation, added
/// streams are inserted with a default (unselected) configuration and
/// removed streams are dropped; otherwise both are left as they are.
///
/// For a field-selecting stream, newly added top-level fields are selected.
/// A new subfield is covered by its parent when the parent is selected and
/// stays out otherwise.
#[must_use]
pub fn apply_schema_change(
    current: &Catalog,
    discovered: &Catalog,
    diff: &CatalogDiff,
    preference: NonBreakingChangesPreference,
) -> UpdateSchemaResult {
    let scope = PropagationScope::for_preference(preference);
    let mut catalog = current.clone();
    let mut applied = Vec::new();

    for transform in &diff.transforms {
        let descriptor = transform.descriptor();
        match transform {
            StreamTransform::UpdateStream(update) => {
                let (Some(previous), Some(found)) = (current.get(descriptor), discovered.get(descriptor)) else {
                    tracing::warn!(stream = %descriptor, "update for a stream missing on one side, skipping");
                    continue;
                };
                let mut entry = merge_stream(previous, &found.stream);
                select_added_fields(&mut entry, &update.field_transforms);
                catalog = catalog.with_stream(entry);
                applied.push(transform.clone());
            }
            StreamTransform::AddStream { .. } if scope == PropagationScope::Full => {
                let Some(found) = discovered.get(descriptor) else {
                    tracing::warn!(stream = %descriptor, "added stream not in discovered catalog, skipping");
                    continue;
                };
                let config = default_configuration(&found.stream);
                catalog = catalog.with_stream(StreamEntry::new(found.stream.clone(), config));
                applied.push(transform.clone());
            }
            StreamTransform::RemoveStream { .. } if scope == PropagationScope::Full => {
                catalog = catalog.without_stream(descriptor);
                applied.push(transform.clone());
            }
            StreamTransform::AddStream { .. } | StreamTransform::RemoveStream { .. } => {
                tracing::debug!(stream = %descriptor, ?scope, "stream transform left for manual apply");
            }
        }
    }

    let applied_diff = CatalogDiff { transforms: applied };
    let change_description = format_diff(&applied_diff);
    UpdateSchemaResult {
        catalog,
        applied_diff,
        change_description,
    }
}

fn select_added_fields(entry: &mut StreamEntry, field_transforms: &[FieldTransform]) {
    if !entry.config.field_selection_enabled {
        return;
    }
    for transform in field_transforms {
        let FieldTransform::AddField { path, .. } = transform else {
            continue;
        };
        if path.len() == 1 && !entry.config.selected_fields.contains(path) {
            entry.config.selected_fields.push(path.clone());
        }
    }
}

/// Streams selected in `before` that are unselected or gone in `after`.
#[must_use]
pub fn deactivated_streams(before: &Catalog, after: &Catalog) -> BTreeSet<StreamDescriptor> {
    before
        .selected_streams()
        .filter(|entry| {
            !after
                .get(entry.descriptor())
                .is_some_and(|now| now.config.selected)
        })
        .map(|entry| entry.descriptor().clone())
        .collect()
}
