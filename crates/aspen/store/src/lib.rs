//! Repository traits and storage backends for the ASPEN engine.
//!
//! Traits define the persistence boundary; the in-memory backend serves
//! development and tests, and the PostgreSQL backend (behind the `postgres`
//! feature) serves production.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::{
    InMemoryAgentRepository, InMemoryConnectionRepository, InMemoryEntityCatalog,
    InMemoryEntityStateRepository, InMemoryEventStore, InMemoryMetricSource,
};
pub use traits::{
    AgentRepository, ConnectionRepository, EntityCatalog, EntityStateRepository, EventStore,
    MetricSource,
};
