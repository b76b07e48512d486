//! Action execution engine.
//!
//! Validates actions against closed per-kind schemas, dispatches them to
//! handlers through a registry, retries transient failures with linear
//! backoff, and caches idempotent extraction results behind a TTL + LRU
//! bound.

pub mod cache;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod types;

pub use cache::{action_fingerprint, ResultCache};
pub use errors::{ActionError, ExecError, ValidationError};
pub use handlers::ActionHandler;
pub use registry::HandlerRegistry;
pub use retry::{RetryController, RetryPolicy};
pub use schema::{schema_for, validate, KindSchema, ParamSpec, ParamType, SelectorRule};
pub use types::{Action, ActionKind};
