//! `schemasync` server: schema change orchestration over pluggable
//! persistence, discovery, state and notification backends.

pub mod cli;
pub mod connection;
pub mod memory;
pub mod service;
pub mod telemetry;
pub mod traits;

pub use connection::{CatalogId, ConnectionInfo};
pub use service::{
    CatalogUpdateOutcome, SchemaChangeConfig, SchemaChangeError, SchemaChangeOutcome,
    SchemaChangeService,
};
pub use traits::{
    CatalogStore, ConnectorCapabilities, DiscoveryProvider, NotificationDispatcher, StateStore,
};
