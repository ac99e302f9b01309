use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a domain event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version number of an aggregate, used for optimistic concurrency control.
///
/// A fresh aggregate is at version 0; every applied event adds exactly 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version reached by the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Command parameters as persisted alongside every event the command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParamsRecord {
    pub command_id: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_application: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CommandParamsRecord {
    /// Creates params with the correlation id defaulting to the command id.
    pub fn new(command_id: impl Into<String>) -> Self {
        let command_id = command_id.into();
        Self {
            correlation_id: command_id.clone(),
            command_id,
            expected_version: None,
            originating_ip_address: None,
            originating_application: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// A durable row describing one event emitted by one command.
///
/// `published` starts false and only ever flips to true. A record that stays
/// unpublished is owed a redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEventRecord {
    pub id: RecordId,

    /// Aggregate type name (e.g. "Counter").
    pub aggregate_type: String,

    /// Aggregate id in string form.
    pub aggregate_id: String,

    /// Aggregate version reached by applying this event.
    pub aggregate_version: Version,

    /// Command type name (e.g. "CreateCounter").
    pub command_type: String,

    pub command_params: CommandParamsRecord,

    /// Event type name (e.g. "Incremented").
    pub event_type: String,

    /// The event payload as JSON.
    pub event_data: serde_json::Value,

    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,

    pub published: bool,
}

impl DomainEventRecord {
    /// Creates a new record builder.
    pub fn builder() -> DomainEventRecordBuilder {
        DomainEventRecordBuilder::default()
    }

    /// The command id this record was produced by.
    pub fn command_id(&self) -> &str {
        &self.command_params.command_id
    }

    /// Flips the record to published. Never reverts.
    pub fn mark_published(&mut self) {
        self.published = true;
    }
}

/// Builder for constructing domain event records.
#[derive(Debug, Default)]
pub struct DomainEventRecordBuilder {
    id: Option<RecordId>,
    aggregate_type: Option<String>,
    aggregate_id: Option<String>,
    aggregate_version: Option<Version>,
    command_type: Option<String>,
    command_params: Option<CommandParamsRecord>,
    event_type: Option<String>,
    event_data: Option<serde_json::Value>,
    timestamp: Option<DateTime<Utc>>,
}

impl DomainEventRecordBuilder {
    /// Sets the record ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn aggregate_id(mut self, aggregate_id: impl ToString) -> Self {
        self.aggregate_id = Some(aggregate_id.to_string());
        self
    }

    pub fn aggregate_version(mut self, version: Version) -> Self {
        self.aggregate_version = Some(version);
        self
    }

    pub fn command_type(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = Some(command_type.into());
        self
    }

    pub fn command_params(mut self, params: CommandParamsRecord) -> Self {
        self.command_params = Some(params);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn event_data<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.event_data = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn event_data_raw(mut self, payload: serde_json::Value) -> Self {
        self.event_data = Some(payload);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Tries to build the record, returning None if required fields are missing.
    pub fn try_build(self) -> Option<DomainEventRecord> {
        Some(DomainEventRecord {
            id: self.id.unwrap_or_default(),
            aggregate_type: self.aggregate_type?,
            aggregate_id: self.aggregate_id?,
            aggregate_version: self.aggregate_version?,
            command_type: self.command_type?,
            command_params: self.command_params?,
            event_type: self.event_type?,
            event_data: self.event_data?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            published: false,
        })
    }
}
