//! Core aggregate and domain event traits.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DomainError;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense. Each event is its
/// own type, so an aggregate's apply table can dispatch on it.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the event type name stored with every record of this event.
    fn event_type() -> &'static str;
}

/// An event applied to an aggregate but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEvent {
    event_type: &'static str,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
    version: Version,
}

impl AggregateEvent {
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// The aggregate version reached by applying this event.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Deserializes the payload back into its typed event.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Identity, version and uncommitted events of an aggregate.
///
/// Aggregates embed one of these (skipped during serialization) and expose
/// it through [`Aggregate::root`].
#[derive(Debug, Clone, Default)]
pub struct AggregateRoot {
    id: Option<AggregateId>,
    version: Version,
    uncommitted: Vec<AggregateEvent>,
}

impl AggregateRoot {
    pub fn id(&self) -> Option<AggregateId> {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn uncommitted(&self) -> &[AggregateEvent] {
        &self.uncommitted
    }

    /// Sets the identity assigned by the durable store.
    pub fn assign_id(&mut self, id: AggregateId) {
        self.id = Some(id);
    }

    /// Restores identity and version after loading from the store.
    pub fn restore(&mut self, id: AggregateId, version: Version) {
        self.id = Some(id);
        self.version = version;
        self.uncommitted.clear();
    }

    fn record(&mut self, event: AggregateEvent) {
        self.version = event.version;
        self.uncommitted.push(event);
    }

    fn flush(&mut self) -> Vec<AggregateEvent> {
        std::mem::take(&mut self.uncommitted)
    }
}

type ApplyFn<A> = Box<dyn Fn(&mut A, &dyn Any) + Send + Sync>;

/// Maps event types to the functions an aggregate applies them with.
///
/// Built once per aggregate type through [`Aggregate::register`] and shared
/// by every instance of that type.
pub struct ApplyTable<A> {
    appliers: HashMap<TypeId, ApplyFn<A>>,
}

impl<A: 'static> ApplyTable<A> {
    fn new() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    /// Registers the apply function for event type `E`.
    pub fn on<E: DomainEvent>(&mut self, apply: fn(&mut A, &E)) -> &mut Self {
        self.appliers.insert(
            TypeId::of::<E>(),
            Box::new(move |aggregate, event| {
                if let Some(event) = event.downcast_ref::<E>() {
                    apply(aggregate, event);
                }
            }),
        );
        self
    }

    /// Returns true if an apply function exists for `E`.
    pub fn handles<E: DomainEvent>(&self) -> bool {
        self.appliers.contains_key(&TypeId::of::<E>())
    }

    pub fn len(&self) -> usize {
        self.appliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appliers.is_empty()
    }
}

type TableCache = RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>;

static APPLY_TABLES: OnceLock<TableCache> = OnceLock::new();

/// Returns the shared apply table for `A`, building it on first use.
pub fn apply_table<A: Aggregate>() -> &'static ApplyTable<A> {
    let tables = APPLY_TABLES.get_or_init(Default::default);
    let key = TypeId::of::<A>();

    if let Some(table) = tables
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .copied()
        .and_then(|table| table.downcast_ref::<ApplyTable<A>>())
    {
        return table;
    }

    let mut tables = tables.write().unwrap_or_else(PoisonError::into_inner);
    // Another thread may have built it between the two locks.
    if let Some(table) = tables
        .get(&key)
        .copied()
        .and_then(|table| table.downcast_ref::<ApplyTable<A>>())
    {
        return table;
    }

    let mut table = ApplyTable::new();
    A::register(&mut table);
    let table: &'static ApplyTable<A> = Box::leak(Box::new(table));
    tables.insert(key, table);
    table
}

/// Trait for event-sourced aggregates.
///
/// An aggregate is a consistency boundary whose state only changes by
/// applying events. Its serialized fields are persisted as the aggregate
/// row's state; the embedded [`AggregateRoot`] is not.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Returns the aggregate type name.
    ///
    /// Used for storage, idempotency keys and handler routing.
    fn aggregate_type() -> &'static str;

    /// Registers the apply function of every event this aggregate handles.
    fn register(table: &mut ApplyTable<Self>);

    fn root(&self) -> &AggregateRoot;

    fn root_mut(&mut self) -> &mut AggregateRoot;

    /// Returns the aggregate's identifier, None until the store assigned one.
    fn id(&self) -> Option<AggregateId> {
        self.root().id()
    }

    /// Returns the current version: the number of events ever applied.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// Events applied since the last flush, in application order.
    fn uncommitted_events(&self) -> &[AggregateEvent] {
        self.root().uncommitted()
    }

    /// Applies an event, increments the version and buffers the event.
    ///
    /// Fails with `UnhandledEventType` if the aggregate registered no apply
    /// function for `E`. Nothing changes when it fails.
    fn apply<E: DomainEvent>(
        &mut self,
        event: E,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let table = apply_table::<Self>();
        let Some(applier) = table.appliers.get(&TypeId::of::<E>()) else {
            return Err(DomainError::UnhandledEventType {
                aggregate_type: Self::aggregate_type(),
                event_type: E::event_type(),
            });
        };

        let payload = serde_json::to_value(&event)?;
        applier(self, &event);

        let version = self.version().next();
        self.root_mut().record(AggregateEvent {
            event_type: E::event_type(),
            timestamp,
            payload,
            version,
        });
        Ok(())
    }

    /// Applies an event stamped with the current time.
    fn emit<E: DomainEvent>(&mut self, event: E) -> Result<(), DomainError> {
        self.apply(event, Utc::now())
    }

    /// Drains the uncommitted events in application order.
    fn flush_events(&mut self) -> Vec<AggregateEvent> {
        self.root_mut().flush()
    }
}
