//! Commands, their parameters and the handler registry.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use event_store::{CommandParamsRecord, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;

/// Identity and routing metadata every command carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParams {
    /// Caller-chosen id used as the idempotency key.
    pub command_id: String,

    /// Defaults to the command id when unset.
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// When set, a modify command only runs against this exact version.
    #[serde(default)]
    pub expected_version: Option<Version>,

    #[serde(default)]
    pub originating_ip_address: Option<String>,

    #[serde(default)]
    pub originating_application: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CommandParams {
    pub fn new(command_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            ..Default::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn expect_version(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn originating_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.originating_ip_address = Some(ip.into());
        self
    }

    pub fn originating_application(mut self, application: impl Into<String>) -> Self {
        self.originating_application = Some(application.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the correlation id, falling back to the command id.
    pub fn correlation_id(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or(&self.command_id)
    }

    /// Returns true if the command id is missing or blank.
    pub fn has_blank_command_id(&self) -> bool {
        self.command_id.trim().is_empty()
    }

    /// Converts to the form persisted with every event record.
    pub fn to_record(&self) -> CommandParamsRecord {
        CommandParamsRecord {
            command_id: self.command_id.clone(),
            correlation_id: self.correlation_id().to_string(),
            expected_version: self.expected_version,
            originating_ip_address: self.originating_ip_address.clone(),
            originating_application: self.originating_application.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Trait for commands.
///
/// Commands represent an intention to perform an action. They may be rejected
/// if the aggregate's current state doesn't allow the action.
pub trait Command: Send + Sync + 'static {
    /// The type of aggregate this command targets.
    type Aggregate: Aggregate;

    /// Returns the command type name stored with every record it produces.
    fn command_type() -> &'static str;

    fn params(&self) -> &CommandParams;
}

/// A command that changes an existing aggregate.
pub trait ModifyCommand: Command {
    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Handles one command type by emitting events on the aggregate.
///
/// Create commands receive a fresh aggregate; modify commands receive the
/// loaded one. Returning an error aborts the command without committing.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, aggregate: &mut C::Aggregate, command: &C) -> Result<(), DomainError>;
}

/// Registry of command handlers keyed by command type.
///
/// Resolution requires exactly one handler per command type.
#[derive(Default, Clone)]
pub struct CommandHandlers {
    handlers: HashMap<TypeId, Vec<Arc<dyn Any + Send + Sync>>>,
}

impl CommandHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for command type `C`.
    pub fn register<C, H>(&mut self, handler: H) -> &mut Self
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let handler: Arc<dyn CommandHandler<C>> = Arc::new(handler);
        self.handlers
            .entry(TypeId::of::<C>())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<C, H>(mut self, handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        self.register::<C, H>(handler);
        self
    }

    /// Resolves the single handler registered for `C`.
    pub fn resolve<C: Command>(&self) -> Result<Arc<dyn CommandHandler<C>>, DomainError> {
        let candidates = self
            .handlers
            .get(&TypeId::of::<C>())
            .map(Vec::as_slice)
            .unwrap_or_default();

        match candidates {
            [] => Err(DomainError::HandlerNotRegistered {
                command_type: C::command_type(),
            }),
            [handler] => handler
                .downcast_ref::<Arc<dyn CommandHandler<C>>>()
                .cloned()
                .ok_or(DomainError::HandlerNotRegistered {
                    command_type: C::command_type(),
                }),
            _ => Err(DomainError::TooManyHandlersRegistered {
                command_type: C::command_type(),
                count: candidates.len(),
            }),
        }
    }
}

impl std::fmt::Debug for CommandHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandlers")
            .field("command_types", &self.handlers.len())
            .finish()
    }
}
