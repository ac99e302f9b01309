use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// An aggregate row as held by the durable store.
///
/// The store owns the identity, the concurrency counter and the timestamps;
/// `state` is the aggregate's own serialized fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAggregate {
    /// The type of aggregate (e.g., "Counter").
    pub aggregate_type: String,

    pub id: AggregateId,

    /// Aggregate version after the last committed event.
    pub version: Version,

    /// Incremented on every write to the row.
    pub concurrency_version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

/// A not-yet-persisted aggregate. The store assigns its id on insert.
#[derive(Debug, Clone)]
pub struct NewAggregate {
    pub aggregate_type: String,
    pub version: Version,
    pub state: serde_json::Value,
}

impl NewAggregate {
    /// Creates a new aggregate row from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_type: aggregate_type.into(),
            version,
            state: serde_json::to_value(state)?,
        })
    }
}

/// A guarded write to an existing aggregate row.
///
/// The write only succeeds while the stored version still equals
/// `expected_version`, i.e. nobody committed in between load and save.
#[derive(Debug, Clone)]
pub struct AggregateUpdate {
    pub aggregate_type: String,
    pub id: AggregateId,
    pub expected_version: Version,
    pub new_version: Version,
    pub state: serde_json::Value,
}

impl AggregateUpdate {
    /// Creates an update from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_type: impl Into<String>,
        id: AggregateId,
        expected_version: Version,
        new_version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_type: aggregate_type.into(),
            id,
            expected_version,
            new_version,
            state: serde_json::to_value(state)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct CounterState {
        value: i64,
    }

    #[test]
    fn new_aggregate_serializes_state() {
        let row =
            NewAggregate::from_state("Counter", Version::first(), &CounterState { value: 3 })
                .unwrap();
        assert_eq!(row.aggregate_type, "Counter");
        assert_eq!(row.state, serde_json::json!({"value": 3}));
    }

    #[test]
    fn update_keeps_expected_and_new_versions() {
        let id = AggregateId::new();
        let update = AggregateUpdate::from_state(
            "Counter",
            id,
            Version::new(2),
            Version::new(4),
            &CounterState { value: 9 },
        )
        .unwrap();
        assert_eq!(update.expected_version, Version::new(2));
        assert_eq!(update.new_version, Version::new(4));
        assert_eq!(update.id, id);
    }
}
