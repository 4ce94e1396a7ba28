//! Router module for model selection.
//!
//! This module resolves a task to its default model and, on failure, walks
//! the pool's ordered candidate list:
//! - Default mapping lookup per task and mode
//! - Priority-ordered fallback without repeats
//! - Attempt budget and retry-on-failure policy

mod attempt;
pub mod mapping;
mod request;
mod selector;
mod stream;

pub use mapping::{DefaultMapping, MappingTable};
pub use request::{RouteRequest, RoutedResponse};
pub use selector::Router;
pub use stream::{BlockingStream, RoutedStream};
