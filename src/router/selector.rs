//! Model selection and fallback.

use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::attempt::CallAttempt;
use super::mapping::{violations, DefaultMapping};
use super::request::{RouteRequest, RoutedResponse};
use super::stream::{BlockingStream, RoutedStream};
use crate::adapter::{FragmentStream, InvocationRequest, Invoker};
use crate::config::{Config, ConfigError, RoutingPolicy};
use crate::error::{Error, InvocationError, Result};
use crate::pool::{Mode, ModelDescriptor, ModelPool};

/// Routes logical calls to models, falling back on failure.
///
/// Pool, policy, and mapping are read-only after construction, so one router
/// can serve any number of concurrent calls.
pub struct Router {
    pool: Arc<ModelPool>,
    policy: RoutingPolicy,
    mapping: DefaultMapping,
    state: RouterState,
    invoker: Arc<dyn Invoker>,
}

/// Default mapping resolved against the router's own pool.
///
/// `defaults[task][mode]` is an index into `pool.models()`.
struct RouterState {
    defaults: BTreeMap<String, BTreeMap<Mode, usize>>,
}

impl RouterState {
    fn resolve(
        pool: &ModelPool,
        mapping: &DefaultMapping,
    ) -> std::result::Result<Self, ConfigError> {
        let problems = violations(mapping.table(), pool.models());
        if !problems.is_empty() {
            return Err(ConfigError::Validation { problems });
        }

        let mut defaults: BTreeMap<String, BTreeMap<Mode, usize>> = BTreeMap::new();
        for (task, mode, name) in mapping.entries() {
            if let Some(index) = pool.models().iter().position(|m| m.name == name) {
                defaults.entry(task.to_string()).or_default().insert(mode, index);
            }
        }
        Ok(Self { defaults })
    }

    fn initial<'a>(
        &self,
        pool: &'a ModelPool,
        task: &str,
        mode: Mode,
    ) -> Option<&'a ModelDescriptor> {
        self.defaults
            .get(task)
            .and_then(|modes| modes.get(&mode))
            .and_then(|&index| pool.models().get(index))
    }
}

/// What a call resolved to before the first invocation.
struct Plan<'a> {
    task: &'a str,
    mode: Mode,
    initial: &'a ModelDescriptor,
    invocation: InvocationRequest,
}

impl Router {
    /// Build a router, resolving every mapping entry against `pool`.
    ///
    /// Entries naming a model that is missing from `pool`, disabled, or of
    /// another mode are all reported in one [`ConfigError::Validation`].
    pub fn new(
        pool: Arc<ModelPool>,
        policy: RoutingPolicy,
        mapping: DefaultMapping,
        invoker: Arc<dyn Invoker>,
    ) -> std::result::Result<Self, ConfigError> {
        let state = RouterState::resolve(&pool, &mapping)?;
        tracing::info!(
            models = pool.len(),
            defaults = mapping.len(),
            default_mode = %policy.default_mode,
            max_attempts = policy.max_total_attempts,
            retry_on_failure = policy.retry_on_failure,
            "Router initialized"
        );
        Ok(Self {
            pool,
            policy,
            mapping,
            state,
            invoker,
        })
    }

    /// Validate `config` and build a router over it.
    pub fn from_config(config: Config, invoker: Arc<dyn Invoker>) -> Result<Self> {
        let (pool, policy, mapping) = config.into_parts()?;
        Ok(Self::new(Arc::new(pool), policy, mapping, invoker)?)
    }

    pub fn pool(&self) -> &ModelPool {
        &self.pool
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn mapping(&self) -> &DefaultMapping {
        &self.mapping
    }

    /// Route one call and return the complete answer.
    pub async fn get_response(&self, request: RouteRequest) -> Result<RoutedResponse> {
        let plan = self.plan(&request, false)?;
        let mut attempt = CallAttempt::new(&self.pool, &self.policy, plan.task, plan.mode);
        let mut model = plan.initial;

        loop {
            attempt.begin(model);
            let timeout = plan.invocation.timeout;
            let outcome = tokio::time::timeout(timeout, self.invoker.invoke(model, &plan.invocation))
                .await
                .unwrap_or(Err(InvocationError::Timeout(timeout)));

            match outcome {
                Ok(completion) => {
                    tracing::info!(
                        model = %model.name,
                        attempts = attempt.tried().len(),
                        "Model invocation succeeded"
                    );
                    return Ok(RoutedResponse {
                        content: completion.content,
                        model_name: model.name.clone(),
                        provider: model.provider,
                        backend_model: model.backend_model.clone(),
                        tried: attempt.into_tried(),
                        usage: completion.usage,
                    });
                }
                Err(err) => model = attempt.fail(err)?,
            }
        }
    }

    /// Route one call and stream the answer.
    ///
    /// Fallback covers opening the stream and waiting for its first fragment.
    /// After that the serving model is fixed.
    pub async fn get_response_stream(&self, request: RouteRequest) -> Result<RoutedStream> {
        let plan = self.plan(&request, true)?;
        let mut attempt = CallAttempt::new(&self.pool, &self.policy, plan.task, plan.mode);
        let mut model = plan.initial;

        loop {
            attempt.begin(model);
            let timeout = plan.invocation.timeout;
            let opened = tokio::time::timeout(timeout, self.open_stream(model, &plan.invocation))
                .await
                .unwrap_or(Err(InvocationError::Timeout(timeout)));

            match opened {
                Ok((first, fragments)) => {
                    tracing::info!(
                        model = %model.name,
                        attempts = attempt.tried().len(),
                        "Model stream opened"
                    );
                    return Ok(RoutedStream::new(model, attempt.into_tried(), first, fragments));
                }
                Err(err) => model = attempt.fail(err)?,
            }
        }
    }

    /// Blocking form of [`get_response`](Self::get_response).
    ///
    /// Runs the call on a private current-thread runtime, so it must not be
    /// called from inside an async context.
    pub fn get_response_blocking(&self, request: RouteRequest) -> Result<RoutedResponse> {
        let runtime = blocking_runtime()?;
        runtime.block_on(self.get_response(request))
    }

    /// Blocking form of [`get_response_stream`](Self::get_response_stream).
    pub fn get_response_stream_blocking(&self, request: RouteRequest) -> Result<BlockingStream> {
        let runtime = blocking_runtime()?;
        let stream = runtime.block_on(self.get_response_stream(request))?;
        Ok(BlockingStream::new(runtime, stream))
    }

    /// Open a stream on `model` and wait for its first fragment.
    ///
    /// An error before any fragment is still a plain attempt failure.
    async fn open_stream(
        &self,
        model: &ModelDescriptor,
        invocation: &InvocationRequest,
    ) -> std::result::Result<(Option<String>, FragmentStream), InvocationError> {
        let mut fragments = self.invoker.invoke_stream(model, invocation).await?;
        match fragments.next().await {
            Some(Ok(first)) => Ok((Some(first), fragments)),
            Some(Err(err)) => Err(err),
            None => Ok((None, fragments)),
        }
    }

    fn plan<'a>(&'a self, request: &'a RouteRequest, stream: bool) -> Result<Plan<'a>> {
        if request.messages.is_empty() {
            return Err(Error::InvalidRequest("message list is empty".to_string()));
        }

        let task = request.task.as_str();
        let mode = request.mode.unwrap_or(self.policy.default_mode);
        let initial = self
            .state
            .initial(&self.pool, task, mode)
            .ok_or_else(|| {
                tracing::warn!(task = %task, mode = %mode, "No default model configured");
                Error::NoDefaultModel {
                    task: task.to_string(),
                    mode,
                }
            })?;

        tracing::debug!(task = %task, mode = %mode, model = %initial.name, stream, "Resolved initial model");

        Ok(Plan {
            task,
            mode,
            initial,
            invocation: InvocationRequest {
                messages: request.messages.clone(),
                stream,
                timeout: request.timeout.unwrap_or_else(|| self.policy.attempt_timeout()),
            },
        })
    }
}

fn blocking_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)
}
