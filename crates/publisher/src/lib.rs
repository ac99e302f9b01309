//! Tiered delivery of committed domain events.
//!
//! Each handler subscribed to a committed event gets a recipe chain: run it
//! in-process under a timeout, hand it to a background queue guarded by a
//! circuit breaker, or run it in-process without a deadline as a last resort.
//! Queue workers dispatch jobs through the same registry used for local
//! delivery.

pub mod circuit;
pub mod config;
pub mod error;
pub mod executor;
pub mod flags;
pub mod publisher;
pub mod queue;
pub mod recipe;
pub mod registry;
pub mod worker;

pub use circuit::{CircuitBreaker, CircuitPermit, CircuitState};
pub use config::{CircuitBreakerConfig, PublisherConfig};
pub use error::{HandlerError, PublishError, QueueError};
pub use executor::RecipeExecutor;
pub use flags::{FeatureFlags, StaticFeatureFlags};
pub use publisher::RecipeEventPublisher;
pub use queue::{BackgroundQueue, DeliveryJob, InMemoryBackgroundQueue, JobSource};
pub use recipe::{ExecutionRecipe, RecipeDecision, RecipeInputs, Strategy, select_recipe};
pub use registry::{DomainEventHandler, HandlerDescriptor, HandlerId, HandlerOptions, HandlerRegistry};
pub use worker::QueueWorker;
