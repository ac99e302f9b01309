//! Durable storage for aggregates and the domain event records emitted
//! by the commands that changed them.

pub mod aggregate;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use aggregate::{AggregateUpdate, NewAggregate, StoredAggregate};
pub use common::AggregateId;
pub use error::{Result, StoreError};
pub use memory::{InMemoryDurableStore, InMemoryTransaction};
pub use postgres::{PostgresDurableStore, PostgresTransaction};
pub use query::RecordQuery;
pub use record::{
    CommandParamsRecord, DomainEventRecord, DomainEventRecordBuilder, RecordId, Version,
};
pub use store::{DurableStore, DurableStoreExt, RecordValidationError, StoreTransaction};
