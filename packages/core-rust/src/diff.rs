//! Structural diff between two versions of a catalog.
//!
//! Streams are matched by descriptor only, so a renamed stream shows up as
//! one removal plus one addition. Fields are matched by path across the
//! whole nested schema. Every field and attribute change carries a
//! `breaking` flag computed against the `before` configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{Catalog, StreamEntry};
use crate::schema::{is_safe_widening, FieldNode, FieldType};
use crate::types::{format_path, same_key_set, FieldPath, StreamDescriptor};

// ---------------------------------------------------------------------------
// Transform types
// ---------------------------------------------------------------------------

/// Ordered list of stream-level changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDiff {
    pub transforms: Vec<StreamTransform>,
}

impl CatalogDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Descriptors of every stream the diff touches, in order.
    pub fn descriptors(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.transforms.iter().map(StreamTransform::descriptor)
    }
}

/// A change to one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transformType", rename_all = "snake_case")]
pub enum StreamTransform {
    AddStream {
        #[serde(rename = "streamDescriptor")]
        descriptor: StreamDescriptor,
    },
    RemoveStream {
        #[serde(rename = "streamDescriptor")]
        descriptor: StreamDescriptor,
    },
    UpdateStream(StreamUpdate),
}

impl StreamTransform {
    #[must_use]
    pub fn descriptor(&self) -> &StreamDescriptor {
        match self {
            Self::AddStream { descriptor } | Self::RemoveStream { descriptor } => descriptor,
            Self::UpdateStream(update) => &update.descriptor,
        }
    }

    /// True when any field or attribute change of an update is breaking.
    /// Stream additions and removals never are.
    #[must_use]
    pub fn is_breaking(&self) -> bool {
        match self {
            Self::AddStream { .. } | Self::RemoveStream { .. } => false,
            Self::UpdateStream(update) => update.is_breaking(),
        }
    }
}

/// Field and attribute changes of a stream present on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    #[serde(rename = "streamDescriptor")]
    pub descriptor: StreamDescriptor,
    #[serde(default)]
    pub field_transforms: Vec<FieldTransform>,
    #[serde(default)]
    pub attribute_transforms: Vec<StreamAttributeTransform>,
}

impl StreamUpdate {
    #[must_use]
    pub fn is_breaking(&self) -> bool {
        self.field_transforms.iter().any(FieldTransform::is_breaking)
            || self
                .attribute_transforms
                .iter()
                .any(StreamAttributeTransform::is_breaking)
    }
}

/// A change to one field node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transformType", rename_all = "snake_case")]
pub enum FieldTransform {
    AddField {
        #[serde(rename = "fieldName")]
        path: FieldPath,
        schema: Value,
        breaking: bool,
    },
    RemoveField {
        #[serde(rename = "fieldName")]
        path: FieldPath,
        schema: Value,
        breaking: bool,
    },
    UpdateField {
        #[serde(rename = "fieldName")]
        path: FieldPath,
        #[serde(rename = "oldSchema")]
        old_schema: Value,
        #[serde(rename = "newSchema")]
        new_schema: Value,
        breaking: bool,
    },
}

impl FieldTransform {
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::AddField { path, .. }
            | Self::RemoveField { path, .. }
            | Self::UpdateField { path, .. } => path,
        }
    }

    #[must_use]
    pub fn is_breaking(&self) -> bool {
        match self {
            Self::AddField { breaking, .. }
            | Self::RemoveField { breaking, .. }
            | Self::UpdateField { breaking, .. } => *breaking,
        }
    }
}

/// A change to a stream-level attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transformType", rename_all = "snake_case")]
pub enum StreamAttributeTransform {
    UpdatePrimaryKey {
        #[serde(rename = "oldPrimaryKey")]
        old: Vec<FieldPath>,
        #[serde(rename = "newPrimaryKey")]
        new: Vec<FieldPath>,
        breaking: bool,
    },
}

impl StreamAttributeTransform {
    #[must_use]
    pub fn is_breaking(&self) -> bool {
        match self {
            Self::UpdatePrimaryKey { breaking, .. } => *breaking,
        }
    }
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Computes the structural diff from `before` to `after`.
///
/// Transforms are sorted by descriptor, field transforms by path.
#[must_use]
pub fn diff(before: &Catalog, after: &Catalog) -> CatalogDiff {
    let descriptors: BTreeSet<&StreamDescriptor> =
        before.descriptors().chain(after.descriptors()).collect();

    let transforms = descriptors
        .into_iter()
        .filter_map(|descriptor| match (before.get(descriptor), after.get(descriptor)) {
            (None, Some(_)) => Some(StreamTransform::AddStream {
                descriptor: descriptor.clone(),
            }),
            (Some(_), None) => Some(StreamTransform::RemoveStream {
                descriptor: descriptor.clone(),
            }),
            (Some(old), Some(new)) => diff_stream(old, new).map(StreamTransform::UpdateStream),
            (None, None) => None,
        })
        .collect();

    CatalogDiff { transforms }
}

fn diff_stream(before: &StreamEntry, after: &StreamEntry) -> Option<StreamUpdate> {
    let field_transforms = diff_fields(before, &before.stream.field_nodes(), &after.stream.field_nodes());
    let attribute_transforms = diff_primary_key(before, after).into_iter().collect::<Vec<_>>();

    if field_transforms.is_empty() && attribute_transforms.is_empty() {
        return None;
    }
    Some(StreamUpdate {
        descriptor: before.descriptor().clone(),
        field_transforms,
        attribute_transforms,
    })
}

fn diff_fields(
    before: &StreamEntry,
    old_nodes: &BTreeMap<FieldPath, FieldNode>,
    new_nodes: &BTreeMap<FieldPath, FieldNode>,
) -> Vec<FieldTransform> {
    let paths: BTreeSet<&FieldPath> = old_nodes.keys().chain(new_nodes.keys()).collect();
    let mut transforms = Vec::new();

    for path in paths {
        match (old_nodes.get(path), new_nodes.get(path)) {
            (None, Some(added)) => transforms.push(FieldTransform::AddField {
                path: path.clone(),
                schema: added.schema.clone(),
                breaking: is_key_path(before, path) && !added.field_type.is_key_compatible(),
            }),
            (Some(removed), None) => transforms.push(FieldTransform::RemoveField {
                path: path.clone(),
                schema: removed.schema.clone(),
                breaking: true,
            }),
            (Some(old), Some(new)) if old.field_type != new.field_type => {
                let breaking = if old.field_type == FieldType::Unknown
                    || new.field_type == FieldType::Unknown
                {
                    tracing::debug!(
                        stream = %before.descriptor(),
                        path = %format_path(path),
                        old_type = ?old.field_type,
                        new_type = ?new.field_type,
                        "unresolvable field type change treated as non-breaking"
                    );
                    false
                } else {
                    !is_safe_widening(old.field_type, new.field_type)
                };
                transforms.push(FieldTransform::UpdateField {
                    path: path.clone(),
                    old_schema: old.schema.clone(),
                    new_schema: new.schema.clone(),
                    breaking,
                });
            }
            _ => {}
        }
    }

    transforms
}

/// True when `path` is the configured cursor or one of the configured
/// primary-key paths of the stream.
fn is_key_path(entry: &StreamEntry, path: &FieldPath) -> bool {
    entry.config.cursor_field.as_ref() == Some(path) || entry.config.primary_key.contains(path)
}

fn diff_primary_key(before: &StreamEntry, after: &StreamEntry) -> Option<StreamAttributeTransform> {
    let old = before.stream.source_primary_key().unwrap_or_default();
    let new = after.stream.source_primary_key().unwrap_or_default();
    if same_key_set(old, new) {
        return None;
    }

    let breaking = before.config.destination_sync_mode.is_dedup()
        && !new.is_empty()
        && !same_key_set(new, &before.config.primary_key);

    Some(StreamAttributeTransform::UpdatePrimaryKey {
        old: old.to_vec(),
        new: new.to_vec(),
        breaking,
    })
}

/// Returns true when any transform of the diff is breaking.
#[must_use]
pub fn contains_breaking_change(diff: &CatalogDiff) -> bool {
    diff.transforms.iter().any(StreamTransform::is_breaking)
}

// ---------------------------------------------------------------------------
// Configuration diff
// ---------------------------------------------------------------------------

/// Streams selected in `before` whose runtime-relevant configuration
/// changed in `after`.
///
/// A stream is reported when it was deselected or removed, or when its
/// sync mode, destination sync mode, cursor (order-sensitive) or primary
/// key (order-insensitive) changed.
#[must_use]
pub fn configuration_diff(before: &Catalog, after: &Catalog) -> BTreeSet<StreamDescriptor> {
    before
        .selected_streams()
        .filter(|old| {
            let Some(new) = after.get(old.descriptor()).filter(|e| e.config.selected) else {
                return true;
            };
            let (old, new) = (&old.config, &new.config);
            old.sync_mode != new.sync_mode
                || old.destination_sync_mode != new.destination_sync_mode
                || old.cursor_field != new.cursor_field
                || !same_key_set(&old.primary_key, &new.primary_key)
        })
        .map(|entry| entry.descriptor().clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// One-line human-readable description of a stream transform.
#[must_use]
pub fn format_transform(transform: &StreamTransform) -> String {
    match transform {
        StreamTransform::AddStream { descriptor } => format!("Added new stream '{descriptor}'"),
        StreamTransform::RemoveStream { descriptor } => format!("Removed stream '{descriptor}'"),
        StreamTransform::UpdateStream(update) => {
            let mut added = Vec::new();
            let mut removed = Vec::new();
            let mut altered = Vec::new();
            for field in &update.field_transforms {
                let quoted = format!("'{}'", format_path(field.path()));
                match field {
                    FieldTransform::AddField { .. } => added.push(quoted),
                    FieldTransform::RemoveField { .. } => removed.push(quoted),
                    FieldTransform::UpdateField { .. } => altered.push(quoted),
                }
            }

            let mut parts = Vec::new();
            for (label, fields) in [
                ("Added fields", added),
                ("Removed fields", removed),
                ("Altered fields", altered),
            ] {
                if !fields.is_empty() {
                    parts.push(format!("{label} [{}]", fields.join(", ")));
                }
            }
            for attribute in &update.attribute_transforms {
                match attribute {
                    StreamAttributeTransform::UpdatePrimaryKey { new, .. } => {
                        let key: Vec<String> =
                            new.iter().map(|p| format!("'{}'", format_path(p))).collect();
                        parts.push(format!("Primary key changed to [{}]", key.join(", ")));
                    }
                }
            }

            format!("Modified stream '{}': {}", update.descriptor, parts.join(", "))
        }
    }
}

/// Formats every transform of a diff, one per line.
#[must_use]
pub fn format_diff(diff: &CatalogDiff) -> String {
    diff.transforms
        .iter()
        .map(format_transform)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::catalog::{StreamConfiguration, StreamSchema};
    use crate::types::{DestinationSyncMode, SyncMode};

    fn path(segments: &[&str]) -> FieldPath {
        segments.iter().map(|s| (*s).to_string()).collect()
    }

    fn object(properties: Value) -> Value {
        json!({ "type": "object", "properties": properties })
    }

    fn entry(name: &str, json_schema: Value) -> StreamEntry {
        StreamEntry::new(
            StreamSchema::new(StreamDescriptor::new(name), json_schema),
            StreamConfiguration::default().with_selected(true),
        )
    }

    fn catalog(entries: Vec<StreamEntry>) -> Catalog {
        Catalog::new(entries).unwrap()
    }

    fn only_update(diff: &CatalogDiff) -> &StreamUpdate {
        assert_eq!(diff.len(), 1, "{diff:?}");
        match &diff.transforms[0] {
            StreamTransform::UpdateStream(update) => update,
            other => panic!("expected update, got {other:?}"),
        }
    }

    // ---- Streams ----

    #[test]
    fn identical_catalogs_have_empty_diff() {
        let c = catalog(vec![entry("users", object(json!({"id": {"type": "integer"}})))]);
        let d = diff(&c, &c);
        assert!(d.is_empty());
        assert!(!contains_breaking_change(&d));
    }

    #[test]
    fn renamed_stream_is_remove_plus_add() {
        let before = catalog(vec![entry("users", object(json!({})))]);
        let after = catalog(vec![entry("people", object(json!({})))]);

        let d = diff(&before, &after);
        assert_eq!(
            d.transforms,
            vec![
                StreamTransform::AddStream {
                    descriptor: StreamDescriptor::new("people")
                },
                StreamTransform::RemoveStream {
                    descriptor: StreamDescriptor::new("users")
                },
            ]
        );
        assert!(!contains_breaking_change(&d));
    }

    #[test]
    fn namespace_is_part_of_identity() {
        let a = StreamEntry::new(
            StreamSchema::new(StreamDescriptor::namespaced("users", "a"), json!({})),
            StreamConfiguration::default(),
        );
        let b = StreamEntry::new(
            StreamSchema::new(StreamDescriptor::namespaced("users", "b"), json!({})),
            StreamConfiguration::default(),
        );
        let d = diff(&catalog(vec![a]), &catalog(vec![b]));
        assert_eq!(d.len(), 2);
    }

    // ---- Fields ----

    #[test]
    fn shoes_gains_a_column() {
        let before = catalog(vec![entry("shoes", object(json!({"sku": {"type": "string"}})))]);
        let after = catalog(vec![entry(
            "shoes",
            object(json!({
                "sku": {"type": "string"},
                "a-different-column": {"type": "string"}
            })),
        )]);

        let d = diff(&before, &after);
        let update = only_update(&d);
        assert_eq!(
            update.field_transforms,
            vec![FieldTransform::AddField {
                path: path(&["a-different-column"]),
                schema: json!({"type": "string"}),
                breaking: false,
            }]
        );
        assert!(!contains_breaking_change(&d));
    }

    #[test]
    fn removed_field_is_breaking() {
        let before = catalog(vec![entry(
            "users",
            object(json!({"id": {"type": "integer"}, "email": {"type": "string"}})),
        )]);
        let after = catalog(vec![entry("users", object(json!({"id": {"type": "integer"}})))]);

        let d = diff(&before, &after);
        assert!(matches!(
            &only_update(&d).field_transforms[..],
            [FieldTransform::RemoveField { breaking: true, .. }]
        ));
        assert!(contains_breaking_change(&d));
    }

    #[test]
    fn type_changes_follow_widening_table() {
        let cases = [
            ("integer", json!({"type": "number"}), false),
            ("number", json!({"type": "integer"}), true),
            ("string", json!({"type": "boolean"}), true),
            ("string", json!({"oneOf": [{"type": "string"}, {"type": "integer"}]}), false),
        ];
        for (old, new_schema, breaking) in cases {
            let before = catalog(vec![entry("s", object(json!({"f": {"type": old}})))]);
            let after = catalog(vec![entry("s", object(json!({ "f": new_schema })))]);
            let d = diff(&before, &after);
            assert_eq!(contains_breaking_change(&d), breaking, "{old} -> {new_schema}");
        }
    }

    #[test]
    fn unresolvable_types_never_break() {
        let before = catalog(vec![entry("s", object(json!({"f": {"type": "string"}})))]);
        let after = catalog(vec![entry("s", object(json!({"f": {"type": "no-such-type"}})))]);
        let d = diff(&before, &after);
        assert!(matches!(
            &only_update(&d).field_transforms[..],
            [FieldTransform::UpdateField { breaking: false, .. }]
        ));

        // Unknown on both sides is skipped even if the declarations differ.
        let before = catalog(vec![entry("s", object(json!({"f": {"type": "bogus"}})))]);
        let after = catalog(vec![entry("s", object(json!({"f": {"type": "also-bogus"}})))]);
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn nested_fields_are_diffed_by_path() {
        let before = catalog(vec![entry(
            "s",
            object(json!({"user": {"type": "object", "properties": {"zip": {"type": "string"}}}})),
        )]);
        let after = catalog(vec![entry(
            "s",
            object(json!({"user": {"type": "object", "properties": {
                "zip": {"type": "string"},
                "city": {"type": "string"}
            }}})),
        )]);

        let d = diff(&before, &after);
        let paths: Vec<&FieldPath> = only_update(&d).field_transforms.iter().map(FieldTransform::path).collect();
        assert_eq!(paths, vec![&path(&["user", "city"])]);
    }

    #[test]
    fn adding_an_unusable_key_field_is_breaking() {
        let config = StreamConfiguration::default()
            .with_selected(true)
            .with_sync_modes(SyncMode::Incremental, DestinationSyncMode::AppendDedup)
            .with_cursor_field(Some(path(&["updated_at"])))
            .with_primary_key(vec![path(&["id"])]);
        let before = catalog(vec![entry("s", object(json!({}))).with_config(config.clone())]);

        let object_key = catalog(vec![entry(
            "s",
            object(json!({"id": {"type": "object"}, "updated_at": {"type": "string"}})),
        )
        .with_config(config.clone())]);
        let d = diff(&before, &object_key);
        assert!(contains_breaking_change(&d));
        let breaking: Vec<&FieldPath> = only_update(&d)
            .field_transforms
            .iter()
            .filter(|t| t.is_breaking())
            .map(FieldTransform::path)
            .collect();
        assert_eq!(breaking, vec![&path(&["id"])]);

        let scalar_keys = catalog(vec![entry(
            "s",
            object(json!({"id": {"type": "integer"}, "updated_at": {"type": "string"}})),
        )
        .with_config(config)]);
        assert!(!contains_breaking_change(&diff(&before, &scalar_keys)));
    }

    #[test]
    fn field_transforms_are_sorted_by_path() {
        let before = catalog(vec![entry("s", object(json!({"m": {"type": "string"}})))]);
        let after = catalog(vec![entry(
            "s",
            object(json!({"z": {"type": "string"}, "a": {"type": "string"}})),
        )]);
        let d = diff(&before, &after);
        let paths: Vec<String> = only_update(&d)
            .field_transforms
            .iter()
            .map(|t| format_path(t.path()))
            .collect();
        assert_eq!(paths, vec!["a", "m", "z"]);
    }

    // ---- Primary key attribute ----

    fn keyed(key: Option<Vec<FieldPath>>, mode: DestinationSyncMode, configured: Vec<FieldPath>) -> Catalog {
        let schema = StreamSchema::new(
            StreamDescriptor::new("s"),
            object(json!({"id": {"type": "integer"}, "email": {"type": "string"}})),
        )
        .with_source_defined_primary_key(key);
        let config = StreamConfiguration::default()
            .with_selected(true)
            .with_sync_modes(SyncMode::FullRefresh, mode)
            .with_primary_key(configured);
        catalog(vec![StreamEntry::new(schema, config)])
    }

    #[test]
    fn changed_source_key_breaks_dedup_streams_only() {
        let before = keyed(Some(vec![path(&["id"])]), DestinationSyncMode::AppendDedup, vec![path(&["id"])]);
        let after = keyed(Some(vec![path(&["email"])]), DestinationSyncMode::AppendDedup, vec![path(&["id"])]);

        let d = diff(&before, &after);
        assert_eq!(
            only_update(&d).attribute_transforms,
            vec![StreamAttributeTransform::UpdatePrimaryKey {
                old: vec![path(&["id"])],
                new: vec![path(&["email"])],
                breaking: true,
            }]
        );

        let before = keyed(Some(vec![path(&["id"])]), DestinationSyncMode::Append, vec![path(&["id"])]);
        let after = keyed(Some(vec![path(&["email"])]), DestinationSyncMode::Append, vec![path(&["id"])]);
        let d = diff(&before, &after);
        assert_eq!(only_update(&d).attribute_transforms.len(), 1);
        assert!(!contains_breaking_change(&d));
    }

    #[test]
    fn dropping_or_reordering_source_key_is_not_breaking() {
        let composite = vec![path(&["id"]), path(&["email"])];
        let before = keyed(Some(composite.clone()), DestinationSyncMode::AppendDedup, composite.clone());

        let dropped = keyed(None, DestinationSyncMode::AppendDedup, composite.clone());
        assert!(!contains_breaking_change(&diff(&before, &dropped)));

        let reordered = keyed(
            Some(vec![path(&["email"]), path(&["id"])]),
            DestinationSyncMode::AppendDedup,
            composite,
        );
        assert!(diff(&before, &reordered).is_empty());
    }

    // ---- Configuration diff ----

    fn configured(name: &str, config: StreamConfiguration) -> StreamEntry {
        entry(name, object(json!({"id": {"type": "integer"}}))).with_config(config)
    }

    #[test]
    fn configuration_diff_reports_runtime_changes() {
        let base = StreamConfiguration::default()
            .with_selected(true)
            .with_primary_key(vec![path(&["a"]), path(&["b"])])
            .with_cursor_field(Some(path(&["x", "y"])));
        let before = catalog(vec![
            configured("same", base.clone()),
            configured("mode", base.clone()),
            configured("cursor", base.clone()),
            configured("key_order", base.clone()),
            configured("unselected", base.clone().with_selected(false)),
        ]);
        let after = catalog(vec![
            configured("same", base.clone()),
            configured(
                "mode",
                base.clone()
                    .with_sync_modes(SyncMode::Incremental, DestinationSyncMode::Overwrite),
            ),
            configured("cursor", base.clone().with_cursor_field(Some(path(&["y", "x"])))),
            configured(
                "key_order",
                base.clone().with_primary_key(vec![path(&["b"]), path(&["a"])]),
            ),
            configured("unselected", base.with_sync_modes(SyncMode::Incremental, DestinationSyncMode::Append)),
        ]);

        let changed = configuration_diff(&before, &after);
        assert_eq!(
            changed,
            BTreeSet::from([StreamDescriptor::new("cursor"), StreamDescriptor::new("mode")])
        );
    }

    #[test]
    fn deselect_and_rename_with_unrelated_streams() {
        let selected = StreamConfiguration::default().with_selected(true);
        let before = catalog(vec![
            configured("a", selected.clone()),
            configured("b", selected.clone()),
            configured("old_name", selected.clone()),
        ]);
        let after = catalog(vec![
            configured("a", selected.clone()),
            configured("b", selected),
            configured("new_name", StreamConfiguration::default()),
        ]);

        let merged = crate::merge::merge(&before, &after);
        assert_eq!(merged.len(), 3);
        assert!(!merged.contains(&StreamDescriptor::new("old_name")));
        assert!(merged.contains(&StreamDescriptor::new("new_name")));

        assert_eq!(
            configuration_diff(&before, &after),
            BTreeSet::from([StreamDescriptor::new("old_name")])
        );
    }

    // ---- Formatting ----

    #[test]
    fn formats_stream_transforms() {
        assert_eq!(
            format_transform(&StreamTransform::AddStream {
                descriptor: StreamDescriptor::namespaced("foo", "bar")
            }),
            "Added new stream 'bar.foo'"
        );
        assert_eq!(
            format_transform(&StreamTransform::RemoveStream {
                descriptor: StreamDescriptor::new("foo")
            }),
            "Removed stream 'foo'"
        );

        let update = StreamTransform::UpdateStream(StreamUpdate {
            descriptor: StreamDescriptor::namespaced("foo", "bar"),
            field_transforms: vec![
                FieldTransform::AddField {
                    path: path(&["path", "new_field"]),
                    schema: json!({}),
                    breaking: false,
                },
                FieldTransform::RemoveField {
                    path: path(&["old_field"]),
                    schema: json!({}),
                    breaking: true,
                },
                FieldTransform::RemoveField {
                    path: path(&["old_path", "deprecated"]),
                    schema: json!({}),
                    breaking: true,
                },
                FieldTransform::UpdateField {
                    path: path(&["properties", "changed_type"]),
                    old_schema: json!({}),
                    new_schema: json!({}),
                    breaking: false,
                },
            ],
            attribute_transforms: vec![],
        });
        assert_eq!(
            format_transform(&update),
            "Modified stream 'bar.foo': Added fields ['path.new_field'], Removed fields \
             ['old_field', 'old_path.deprecated'], Altered fields ['properties.changed_type']"
        );
    }

    #[test]
    fn diff_serializes_with_transform_tags() {
        let before = catalog(vec![entry("shoes", object(json!({"sku": {"type": "string"}})))]);
        let after = catalog(vec![entry("shoes", object(json!({})))]);
        let json = serde_json::to_value(diff(&before, &after)).unwrap();

        assert_eq!(json["transforms"][0]["transformType"], json!("update_stream"));
        assert_eq!(json["transforms"][0]["streamDescriptor"]["name"], json!("shoes"));
        let field = &json["transforms"][0]["fieldTransforms"][0];
        assert_eq!(field["transformType"], json!("remove_field"));
        assert_eq!(field["fieldName"], json!(["sku"]));
        assert_eq!(field["breaking"], json!(true));
    }

    // ---- Properties ----

    fn arb_catalog() -> impl Strategy<Value = Catalog> {
        let field_type = prop_oneof![
            Just("string"),
            Just("integer"),
            Just("number"),
            Just("boolean")
        ];
        let stream = proptest::collection::btree_map("[a-d]", field_type, 0..4);
        proptest::collection::btree_map("[a-e]", stream, 0..4).prop_map(|streams| {
            let entries = streams.into_iter().map(|(name, fields)| {
                let properties: serde_json::Map<String, Value> = fields
                    .into_iter()
                    .map(|(field, ty)| (field, json!({ "type": ty })))
                    .collect();
                entry(&name, object(Value::Object(properties)))
            });
            Catalog::new(entries).unwrap()
        })
    }

    fn adds_and_removes(d: &CatalogDiff) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut added = BTreeSet::new();
        let mut removed = BTreeSet::new();
        for transform in &d.transforms {
            match transform {
                StreamTransform::AddStream { descriptor } => {
                    added.insert(descriptor.to_string());
                }
                StreamTransform::RemoveStream { descriptor } => {
                    removed.insert(descriptor.to_string());
                }
                StreamTransform::UpdateStream(update) => {
                    for field in &update.field_transforms {
                        let key = format!("{}:{}", update.descriptor, format_path(field.path()));
                        match field {
                            FieldTransform::AddField { .. } => {
                                added.insert(key);
                            }
                            FieldTransform::RemoveField { .. } => {
                                removed.insert(key);
                            }
                            FieldTransform::UpdateField { .. } => {}
                        }
                    }
                }
            }
        }
        (added, removed)
    }

    proptest! {
        #[test]
        fn diff_of_catalog_with_itself_is_empty(c in arb_catalog()) {
            prop_assert!(diff(&c, &c).is_empty());
        }

        #[test]
        fn adds_and_removes_are_symmetric(a in arb_catalog(), b in arb_catalog()) {
            let (forward_added, forward_removed) = adds_and_removes(&diff(&a, &b));
            let (backward_added, backward_removed) = adds_and_removes(&diff(&b, &a));
            prop_assert_eq!(forward_added, backward_removed);
            prop_assert_eq!(forward_removed, backward_added);
        }
    }
}
