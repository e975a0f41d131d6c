//! Schema change orchestration.
//!
//! Two entry points, both serialized per connection:
//!
//! 1. **Discovery** (`apply_discovered_catalog`): diff the stored catalog
//!    against a new discovery, decide, merge, write, wipe state, notify.
//! 2. **User edit** (`update_catalog`): validate, reconcile hashed fields,
//!    check against the destination, write, wipe state.
//!
//! Feature switches live in [`config`]; failures in [`error`].

pub mod config;
pub mod error;
pub mod schema_change;

// Re-export key types for convenient access.
pub use config::SchemaChangeConfig;
pub use error::SchemaChangeError;
pub use schema_change::{CatalogUpdateOutcome, SchemaChangeOutcome, SchemaChangeService};
