/// Feature switches for schema change handling.
///
/// Resolved by the caller (flag service, CLI, tests) and passed in whole;
/// the service never looks them up itself.
#[derive(Debug, Clone)]
pub struct SchemaChangeConfig {
    /// Wipe the state of streams that an update unselected or removed.
    pub reset_streams_state_when_disabled: bool,
    /// Check catalogs against the destination's declared operations before
    /// writing them.
    pub validate_destination_catalog: bool,
    /// Reject catalogs asking for files the connectors cannot transfer.
    pub validate_include_files: bool,
}

impl Default for SchemaChangeConfig {
    fn default() -> Self {
        Self {
            reset_streams_state_when_disabled: true,
            validate_destination_catalog: true,
            validate_include_files: true,
        }
    }
}
