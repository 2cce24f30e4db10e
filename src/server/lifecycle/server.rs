use std::{mem, sync::Arc, time::Duration};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::{
    sync::CancellationToken,
    task::{task_tracker::TaskTrackerToken, TaskTracker},
};
use tracing::{error, info, warn, Instrument};

use super::{ReleaseReport, ResourceProvider, ServerState, SharedContext};
use crate::{
    lib::{
        errors::{StartupError, ToolError},
        telemetry::InvocationSpan,
    },
    server::config::{EnvKey, EnvironmentConfig},
    tools::{Arguments, ToolEntry, ToolRegistry},
};

/// Limits applied to invocations and shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub shutdown_timeout: Duration,
    pub invocation_timeout: Duration,
    pub max_concurrent_invocations: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            invocation_timeout: Duration::from_secs(60),
            max_concurrent_invocations: 16,
        }
    }
}

/// What `stop()` did.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// State observed when `stop()` was called.
    pub previous: ServerState,
    /// `false` when in-flight invocations had to be cancelled after the timeout.
    pub drained: bool,
    pub release: ReleaseReport,
}

impl ShutdownReport {
    fn without_teardown(previous: ServerState) -> Self {
        Self {
            previous,
            drained: true,
            release: ReleaseReport::default(),
        }
    }
}

enum Phase {
    Uninitialized,
    Starting,
    Ready {
        context: Arc<SharedContext>,
        ready_at: DateTime<Utc>,
    },
    ShuttingDown,
    Stopped,
}

impl Phase {
    /// Replace the phase, returning the previous one. Debug builds check the
    /// edge against the lifecycle.
    fn advance(&mut self, next: Phase) -> Phase {
        debug_assert!(
            self.state().can_transition_to(next.state()),
            "illegal lifecycle transition {} -> {}",
            self.state(),
            next.state()
        );
        mem::replace(self, next)
    }

    fn state(&self) -> ServerState {
        match self {
            Phase::Uninitialized => ServerState::Uninitialized,
            Phase::Starting => ServerState::Starting,
            Phase::Ready { .. } => ServerState::Ready,
            Phase::ShuttingDown => ServerState::ShuttingDown,
            Phase::Stopped => ServerState::Stopped,
        }
    }
}

/// Holds the context and the in-flight token for one invocation. The context
/// reference is dropped before the token so shutdown never observes an idle
/// tracker while a reference is still alive.
struct Admission {
    context: Arc<SharedContext>,
    _token: TaskTrackerToken,
}

/// Owns the lifecycle of the shared resources and dispatches tool invocations.
pub struct ToolServer {
    registry: Arc<ToolRegistry>,
    providers: Vec<Arc<dyn ResourceProvider>>,
    env: EnvironmentConfig,
    settings: LifecycleSettings,
    phase: RwLock<Phase>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    limiter: Semaphore,
}

impl ToolServer {
    pub fn builder(registry: ToolRegistry) -> ToolServerBuilder {
        ToolServerBuilder {
            registry,
            providers: Vec::new(),
            env: EnvironmentConfig::default(),
            settings: LifecycleSettings::default(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub async fn state(&self) -> ServerState {
        self.phase.read().await.state()
    }

    /// Number of invocations currently admitted.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// The shared context while the server is Ready.
    pub async fn context(&self) -> Option<Arc<SharedContext>> {
        match &*self.phase.read().await {
            Phase::Ready { context, .. } => Some(context.clone()),
            _ => None,
        }
    }

    pub async fn ready_since(&self) -> Option<DateTime<Utc>> {
        match &*self.phase.read().await {
            Phase::Ready { ready_at, .. } => Some(*ready_at),
            _ => None,
        }
    }

    /// Every environment key declared by the providers.
    pub fn declared_env_keys(&self) -> Vec<&'static EnvKey> {
        self.providers
            .iter()
            .flat_map(|provider| provider.env_keys().iter())
            .collect()
    }

    /// Validate the environment and acquire every resource. Resources acquired
    /// before a failure are released before this returns.
    pub async fn start(&self) -> Result<(), StartupError> {
        {
            let mut phase = self.phase.write().await;
            let current = phase.state();
            if current != ServerState::Uninitialized {
                return Err(StartupError::AlreadyStarted { state: current });
            }
            phase.advance(Phase::Starting);
        }
        info!(
            target: "sheets_mcp::lifecycle",
            providers = self.providers.len(),
            tools = self.registry.len(),
            "Starting tool server"
        );

        let acquired = self.acquire_context().await;

        let mut phase = self.phase.write().await;
        match acquired {
            Ok(context) if self.shutdown.is_cancelled() => {
                warn!(
                    target: "sheets_mcp::lifecycle",
                    "Shutdown requested during startup; releasing acquired resources"
                );
                context.release_all().await;
                phase.advance(Phase::Stopped);
                Err(StartupError::Aborted)
            }
            Ok(context) => {
                info!(
                    target: "sheets_mcp::lifecycle",
                    resources = ?context.names().collect::<Vec<_>>(),
                    "Tool server is ready"
                );
                phase.advance(Phase::Ready {
                    context: Arc::new(context),
                    ready_at: Utc::now(),
                });
                Ok(())
            }
            Err(err) => {
                error!(
                    target: "sheets_mcp::lifecycle",
                    reason = %err,
                    "Tool server failed to start"
                );
                phase.advance(Phase::Stopped);
                Err(err)
            }
        }
    }

    async fn acquire_context(&self) -> Result<SharedContext, StartupError> {
        self.env.validate(self.declared_env_keys())?;
        Ok(SharedContext::acquire(&self.providers, &self.env).await?)
    }

    /// Invoke a tool by name.
    pub async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        self.invoke_with_cancel(name, arguments, CancellationToken::new())
            .await
    }

    /// Invoke a tool with a caller-owned cancellation token.
    pub async fn invoke_with_cancel(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Value, ToolError> {
        let admission = self.admit().await?;
        let span = InvocationSpan::start(name);

        let outcome = async {
            let entry = self.registry.get(name).ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;
            let arguments = entry.descriptor.validate(arguments)?;
            self.execute(entry, &admission.context, arguments, &cancel)
                .await
        }
        .instrument(span.span().clone())
        .await;

        span.finish(match &outcome {
            Ok(_) => "succeeded",
            Err(err) => err.kind(),
        });
        outcome
    }

    async fn admit(&self) -> Result<Admission, ToolError> {
        match &*self.phase.read().await {
            Phase::Ready { context, .. } => Ok(Admission {
                context: context.clone(),
                _token: self.tracker.token(),
            }),
            other => Err(ToolError::NotReady {
                state: other.state(),
            }),
        }
    }

    async fn execute(
        &self,
        entry: &ToolEntry,
        context: &SharedContext,
        arguments: Arguments,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = entry.descriptor.name;
        let failed = |source: anyhow::Error| ToolError::Execution {
            tool: tool.to_string(),
            source,
        };

        let _permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return Err(failed(anyhow!("invocation cancelled by server shutdown")));
            }
            _ = cancel.cancelled() => {
                return Err(failed(anyhow!("invocation was cancelled by the caller")));
            }
            permit = self.limiter.acquire() => {
                permit.map_err(|_| failed(anyhow!("invocation limiter is closed")))?
            }
        };

        let timeout = self.settings.invocation_timeout;
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(anyhow!("invocation cancelled by server shutdown")),
            _ = cancel.cancelled() => Err(anyhow!("invocation was cancelled by the caller")),
            outcome = tokio::time::timeout(timeout, entry.handler.call(context, arguments)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!(
                        "invocation timed out after {}s",
                        timeout.as_secs_f64()
                    )),
                }
            }
        };

        let value = result.map_err(failed)?;
        if !entry.descriptor.returns.matches(&value) {
            return Err(failed(anyhow!(
                "tool returned a value that does not match its declared {} result",
                entry.descriptor.returns
            )));
        }
        Ok(value)
    }

    /// Stop accepting invocations, drain in-flight work, and release every
    /// resource exactly once. Safe to call repeatedly.
    pub async fn stop(&self) -> ShutdownReport {
        let context = {
            let mut phase = self.phase.write().await;
            let previous = phase.state();
            match previous {
                ServerState::Ready => {}
                ServerState::Uninitialized => {
                    phase.advance(Phase::Stopped);
                    return ShutdownReport::without_teardown(previous);
                }
                ServerState::Starting => {
                    // start() observes the cancellation and tears down what it acquired.
                    self.shutdown.cancel();
                    return ShutdownReport::without_teardown(previous);
                }
                ServerState::ShuttingDown | ServerState::Stopped => {
                    return ShutdownReport::without_teardown(previous);
                }
            }
            match phase.advance(Phase::ShuttingDown) {
                Phase::Ready { context, .. } => context,
                _ => return ShutdownReport::without_teardown(previous),
            }
        };

        info!(
            target: "sheets_mcp::lifecycle",
            in_flight = self.tracker.len(),
            timeout_secs = self.settings.shutdown_timeout.as_secs_f64(),
            "Shutting down tool server"
        );
        self.tracker.close();
        let drained = tokio::time::timeout(self.settings.shutdown_timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                target: "sheets_mcp::lifecycle",
                in_flight = self.tracker.len(),
                "Shutdown timeout elapsed; cancelling in-flight invocations"
            );
            self.shutdown.cancel();
            self.tracker.wait().await;
        }
        self.limiter.close();

        let release = context.release_all().await;
        self.phase.write().await.advance(Phase::Stopped);
        info!(
            target: "sheets_mcp::lifecycle",
            released = release.released.len(),
            release_failures = release.failures.len(),
            drained,
            "Tool server stopped"
        );

        ShutdownReport {
            previous: ServerState::Ready,
            drained,
            release,
        }
    }
}

impl Drop for ToolServer {
    fn drop(&mut self) {
        if let Phase::Ready { context, .. } = self.phase.get_mut() {
            if !context.is_released() {
                warn!(
                    target: "sheets_mcp::lifecycle",
                    "Tool server dropped while Ready; call stop() to release shared resources"
                );
            }
        }
    }
}

pub struct ToolServerBuilder {
    registry: ToolRegistry,
    providers: Vec<Arc<dyn ResourceProvider>>,
    env: EnvironmentConfig,
    settings: LifecycleSettings,
}

impl ToolServerBuilder {
    pub fn provider(mut self, provider: impl ResourceProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn environment(mut self, env: EnvironmentConfig) -> Self {
        self.env = env;
        self
    }

    pub fn settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> ToolServer {
        let permits = self.settings.max_concurrent_invocations.max(1);
        ToolServer {
            registry: Arc::new(self.registry),
            providers: self.providers,
            env: self.env,
            settings: self.settings,
            phase: RwLock::new(Phase::Uninitialized),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            limiter: Semaphore::new(permits),
        }
    }
}
