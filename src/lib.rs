//! modelroute - Task-based LLM routing with ordered fallback
//!
//! This library resolves a task category to a model from a configured pool,
//! invokes it through a provider adapter, and falls back to the next
//! untried candidate when a call fails.

pub mod adapter;
pub mod config;
pub mod error;
pub mod pool;
pub mod router;
pub mod storage;

pub use adapter::{HttpInvoker, Invoker, Message, Role};
pub use config::{Config, RoutingPolicy};
pub use error::{Error, Result};
pub use pool::{Mode, ModelDescriptor, ModelPool, ProviderKind};
pub use router::{RouteRequest, RoutedResponse, RoutedStream, Router};
