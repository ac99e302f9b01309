//! Explicit registry of domain event handlers.
//!
//! Handlers are registered against an (aggregate, event) pair under a stable
//! [`HandlerId`]. Local delivery and the queue worker both dispatch through
//! the same registry, the worker by id alone.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{Aggregate, BoxError, CommandContext, DomainEvent, DomainEventEnvelope};
use event_store::DomainEventRecord;
use serde::{Deserialize, Serialize};

use crate::error::{HandlerError, PublishError};

/// Stable name of a registered handler, carried by queued jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Per-handler delivery options, fixed at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    strictly_background: bool,
    local_timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never run this handler in-process unless the queue is unusable.
    pub fn strictly_background(mut self) -> Self {
        self.strictly_background = true;
        self
    }

    pub fn local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = Some(timeout);
        self
    }
}

/// A handler resolved for one (aggregate, event) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub handler_id: HandlerId,
    pub strictly_background: bool,
    /// The handler's own timeout, or the configured default.
    pub local_timeout: Duration,
}

/// Reacts to one committed event type.
///
/// The context is one nesting level below the publish that delivered the
/// event; commands issued from the handler should run in it.
#[async_trait]
pub trait DomainEventHandler<E: DomainEvent>: Send + Sync + 'static {
    async fn handle(
        &self,
        event: DomainEventEnvelope<E>,
        ctx: &CommandContext,
    ) -> Result<(), BoxError>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(
        &self,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), HandlerError>;
}

struct Typed<E, H> {
    handler: H,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, H> ErasedHandler for Typed<E, H>
where
    E: DomainEvent,
    H: DomainEventHandler<E>,
{
    async fn invoke(
        &self,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), HandlerError> {
        let envelope = DomainEventEnvelope::<E>::from_record(record)?;
        self.handler
            .handle(envelope, ctx)
            .await
            .map_err(HandlerError::Failed)
    }
}

struct Registration {
    id: HandlerId,
    aggregate_type: &'static str,
    event_type: &'static str,
    options: HandlerOptions,
    handler: Arc<dyn ErasedHandler>,
}

type ResolvedKey = (String, String);

/// Handlers keyed by id, resolvable by (aggregate type, event type).
///
/// Resolution results are cached; registering a handler clears the cache.
pub struct HandlerRegistry {
    default_local_timeout: Duration,
    registrations: RwLock<Vec<Registration>>,
    resolved: RwLock<HashMap<ResolvedKey, Arc<[HandlerDescriptor]>>>,
}

impl HandlerRegistry {
    pub fn new(default_local_timeout: Duration) -> Self {
        Self {
            default_local_timeout,
            registrations: RwLock::new(Vec::new()),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handler` for events `E` of aggregate `A`.
    ///
    /// Handlers of the same pair are resolved in registration order.
    pub fn register<A, E, H>(
        &self,
        id: impl Into<HandlerId>,
        handler: H,
        options: HandlerOptions,
    ) -> Result<(), PublishError>
    where
        A: Aggregate,
        E: DomainEvent,
        H: DomainEventHandler<E>,
    {
        let id = id.into();
        {
            let mut registrations = self
                .registrations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if registrations.iter().any(|r| r.id == id) {
                return Err(PublishError::DuplicateHandler(id));
            }

            tracing::debug!(
                handler = %id,
                aggregate = A::aggregate_type(),
                event = E::event_type(),
                "registered domain event handler"
            );
            registrations.push(Registration {
                id,
                aggregate_type: A::aggregate_type(),
                event_type: E::event_type(),
                options,
                handler: Arc::new(Typed {
                    handler,
                    _event: PhantomData,
                }),
            });
        }

        self.resolved
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    /// Returns the handlers subscribed to an event type of an aggregate type.
    pub fn descriptors(&self, aggregate_type: &str, event_type: &str) -> Arc<[HandlerDescriptor]> {
        let key = (aggregate_type.to_string(), event_type.to_string());
        if let Some(cached) = self
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return cached.clone();
        }

        // Resolve under the cache lock so a concurrent registration clears
        // this entry after it is inserted, never before.
        let mut resolved = self
            .resolved
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let descriptors: Arc<[HandlerDescriptor]> = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.aggregate_type == aggregate_type && r.event_type == event_type)
            .map(|r| HandlerDescriptor {
                handler_id: r.id.clone(),
                strictly_background: r.options.strictly_background,
                local_timeout: r.options.local_timeout.unwrap_or(self.default_local_timeout),
            })
            .collect();
        resolved.insert(key, descriptors.clone());
        descriptors
    }

    pub fn contains(&self, handler_id: &HandlerId) -> bool {
        self.lookup(handler_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one handler against a record.
    pub async fn invoke(
        &self,
        handler_id: &HandlerId,
        record: &DomainEventRecord,
        ctx: &CommandContext,
    ) -> Result<(), HandlerError> {
        let handler = self
            .lookup(handler_id)
            .ok_or_else(|| HandlerError::UnknownHandler(handler_id.clone()))?;
        handler.invoke(record, ctx).await
    }

    fn lookup(&self, handler_id: &HandlerId) -> Option<Arc<dyn ErasedHandler>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| &r.id == handler_id)
            .map(|r| r.handler.clone())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("default_local_timeout", &self.default_local_timeout)
            .field("handlers", &self.len())
            .finish()
    }
}
