//! Shared fixtures: a scripted in-process invoker and pool/router builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use modelroute::adapter::{Completion, FragmentStream, InvocationRequest, Invoker, Usage};
use modelroute::error::InvocationError;
use modelroute::router::{DefaultMapping, MappingTable};
use modelroute::{Message, Mode, ModelDescriptor, ModelPool, RouteRequest, Router, RoutingPolicy};

/// What a scripted model does when invoked.
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer with this text; streams split it on spaces.
    Answer(&'static str),
    /// Fail the call (503) before anything is returned.
    Fail,
    /// Never respond.
    Hang,
    /// Open the stream, then fail before the first fragment.
    FailBeforeFirst,
    /// Stream these fragments, then fail.
    Interrupt(Vec<&'static str>),
}

/// Invoker that follows a fixed per-model script and records every call.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, model: &str, script: Script) -> Self {
        self.scripts.insert(model.to_string(), script);
        self
    }

    /// Model names in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, model: &ModelDescriptor) -> Script {
        self.calls.lock().unwrap().push(model.name.clone());
        self.scripts.get(&model.name).cloned().unwrap_or(Script::Fail)
    }
}

fn unavailable() -> InvocationError {
    InvocationError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        _request: &InvocationRequest,
    ) -> Result<Completion, InvocationError> {
        match self.record(model) {
            Script::Answer(text) => Ok(Completion {
                content: text.to_string(),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                }),
            }),
            Script::Hang => std::future::pending().await,
            _ => Err(unavailable()),
        }
    }

    async fn invoke_stream(
        &self,
        model: &ModelDescriptor,
        _request: &InvocationRequest,
    ) -> Result<FragmentStream, InvocationError> {
        let items: Vec<Result<String, InvocationError>> = match self.record(model) {
            Script::Answer(text) => text
                .split_inclusive(' ')
                .map(|s| Ok(s.to_string()))
                .collect(),
            Script::Fail => return Err(unavailable()),
            Script::Hang => return std::future::pending().await,
            Script::FailBeforeFirst => vec![Err(InvocationError::Transport(
                "connection reset".to_string(),
            ))],
            Script::Interrupt(fragments) => fragments
                .into_iter()
                .map(|s| Ok(s.to_string()))
                .chain(std::iter::once(Err(InvocationError::Transport(
                    "connection reset".to_string(),
                ))))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

pub fn model(name: &str, priority: i32) -> ModelDescriptor {
    ModelDescriptor::new(name, name.to_lowercase(), Mode::Cloud)
        .with_tags(["general"])
        .with_priority(priority)
}

/// M1 (priority 10) and M2 (priority 5), both cloud and general.
pub fn scenario_pool() -> ModelPool {
    ModelPool::new(vec![model("M1", 10), model("M2", 5)]).unwrap()
}

pub fn mapping(pool: &ModelPool, entries: &[(&str, Mode, &str)]) -> DefaultMapping {
    let mut table = MappingTable::new();
    for (task, mode, name) in entries {
        table
            .entry(task.to_string())
            .or_default()
            .insert(*mode, name.to_string());
    }
    DefaultMapping::new(table, pool).unwrap()
}

pub fn policy(retry_on_failure: bool, max_total_attempts: u32) -> RoutingPolicy {
    let mut policy = RoutingPolicy::new(Mode::Cloud);
    policy.retry_on_failure = retry_on_failure;
    policy.max_total_attempts = max_total_attempts;
    policy
}

/// Router over `pool` with `general -> first` in cloud mode.
pub fn router(
    pool: ModelPool,
    first: &str,
    policy: RoutingPolicy,
    invoker: Arc<ScriptedInvoker>,
) -> Router {
    let mapping = mapping(&pool, &[("general", Mode::Cloud, first)]);
    Router::new(Arc::new(pool), policy, mapping, invoker).unwrap()
}

pub fn hello() -> RouteRequest {
    RouteRequest::new(vec![Message::user("hello")])
}
