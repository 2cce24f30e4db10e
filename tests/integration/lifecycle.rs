use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sheets_mcp::{
    lib::errors::{ConfigError, StartupError, ToolError},
    server::{
        config::{EnvKey, EnvironmentConfig},
        lifecycle::{
            LifecycleSettings, Resource, ResourceProvider, ServerState, SharedContext, ToolServer,
        },
    },
    tools::{builtin, Arguments, ToolDescriptor, ToolHandler, ToolRegistry, ValueType},
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const API_KEY: EnvKey = EnvKey::required("API_KEY", "Credential for the counted resource");

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

struct Counted {
    counters: Arc<Counters>,
}

#[async_trait]
impl Resource for Counted {
    async fn release(&self) -> anyhow::Result<()> {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct CountingProvider {
    name: &'static str,
    keys: &'static [EnvKey],
    fail: bool,
    delay: Duration,
    counters: Arc<Counters>,
}

impl CountingProvider {
    fn new(name: &'static str, counters: &Arc<Counters>) -> Self {
        Self {
            name,
            keys: &[API_KEY],
            fail: false,
            delay: Duration::ZERO,
            counters: counters.clone(),
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ResourceProvider for CountingProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn env_keys(&self) -> &'static [EnvKey] {
        self.keys
    }

    async fn acquire(&self, _env: &EnvironmentConfig) -> anyhow::Result<Arc<dyn Resource>> {
        sleep(self.delay).await;
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Counted {
            counters: self.counters.clone(),
        }))
    }
}

/// Sleeps without observing cancellation, like a handler blocked on I/O.
struct Sleep(Duration);

#[async_trait]
impl ToolHandler for Sleep {
    async fn call(&self, _context: &SharedContext, _arguments: Arguments) -> anyhow::Result<Value> {
        sleep(self.0).await;
        Ok(json!("done"))
    }
}

struct WrongShape;

#[async_trait]
impl ToolHandler for WrongShape {
    async fn call(&self, _context: &SharedContext, _arguments: Arguments) -> anyhow::Result<Value> {
        Ok(json!(42))
    }
}

struct Fails;

#[async_trait]
impl ToolHandler for Fails {
    async fn call(&self, context: &SharedContext, _arguments: Arguments) -> anyhow::Result<Value> {
        context.require::<Counted>("counted")?;
        Err(anyhow!("upstream returned 503"))
    }
}

fn registry(sleep_for: Duration) -> ToolRegistry {
    ToolRegistry::builder()
        .register(builtin::ping_descriptor(), builtin::Ping)
        .register(
            ToolDescriptor::new("sleep", "Sleep before answering", ValueType::String),
            Sleep(sleep_for),
        )
        .register(
            ToolDescriptor::new("wrong_shape", "Returns a number", ValueType::String),
            WrongShape,
        )
        .register(
            ToolDescriptor::new("fails", "Always fails", ValueType::Object),
            Fails,
        )
        .build()
        .expect("registry builds")
}

fn with_key() -> EnvironmentConfig {
    EnvironmentConfig::from_pairs([("API_KEY", "secret")])
}

fn server(counters: &Arc<Counters>, settings: LifecycleSettings, sleep_for: Duration) -> ToolServer {
    ToolServer::builder(registry(sleep_for))
        .provider(CountingProvider::new("counted", counters))
        .environment(with_key())
        .settings(settings)
        .build()
}

async fn ready_server(counters: &Arc<Counters>) -> ToolServer {
    let server = server(counters, LifecycleSettings::default(), Duration::from_millis(10));
    server.start().await.expect("server starts");
    server
}

async fn wait_for_in_flight(server: &ToolServer, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while server.in_flight() < expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("invocations should be admitted");
}

#[tokio::test]
async fn missing_required_key_fails_before_any_resource_is_acquired() {
    let counters = Arc::new(Counters::default());
    let server = ToolServer::builder(registry(Duration::ZERO))
        .provider(CountingProvider::new("counted", &counters))
        .environment(EnvironmentConfig::default())
        .build();

    let err = server.start().await.expect_err("start must fail");
    assert!(
        matches!(
            &err,
            StartupError::Configuration(ConfigError::MissingEnv { key: "API_KEY", .. })
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.exit_code_value(), 78);
    assert!(err.to_string().contains("API_KEY"));
    assert_eq!(counters.acquired.load(Ordering::SeqCst), 0);
    assert_eq!(server.state().await, ServerState::Stopped);

    let not_ready = server.invoke("ping", Map::new()).await.expect_err("not ready");
    assert!(matches!(
        not_ready,
        ToolError::NotReady {
            state: ServerState::Stopped
        }
    ));
}

#[tokio::test]
async fn ping_returns_pong_once_ready() {
    let counters = Arc::new(Counters::default());
    let server = ready_server(&counters).await;
    assert_eq!(server.state().await, ServerState::Ready);
    assert!(server.ready_since().await.is_some());

    let value = server.invoke("ping", Map::new()).await.expect("ping succeeds");
    assert_eq!(value, json!("pong"));
    assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);

    server.stop().await;
}

#[tokio::test]
async fn invalid_arguments_are_rejected_and_the_server_stays_ready() {
    let counters = Arc::new(Counters::default());
    let server = ready_server(&counters).await;

    let mut arguments = Map::new();
    arguments.insert("unexpected".into(), json!(1));
    let err = server
        .invoke("ping", arguments)
        .await
        .expect_err("unexpected parameter must be rejected");
    match &err {
        ToolError::InvalidArgument { tool, parameter, .. } => {
            assert_eq!(tool, "ping");
            assert_eq!(parameter, "unexpected");
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    assert_eq!(err.kind(), "INVALID_ARGUMENT");

    assert_eq!(server.state().await, ServerState::Ready);
    assert_eq!(
        server.invoke("ping", Map::new()).await.expect("still serving"),
        json!("pong")
    );
    server.stop().await;
}

#[tokio::test]
async fn failed_invocations_leave_the_context_untouched() {
    let counters = Arc::new(Counters::default());
    let server = ready_server(&counters).await;
    let before = server.context().await.expect("context while ready");

    let unknown = server
        .invoke("nonexistent_tool", Map::new())
        .await
        .expect_err("unknown tool");
    assert!(matches!(&unknown, ToolError::UnknownTool { name } if name == "nonexistent_tool"));

    let failed = server.invoke("fails", Map::new()).await.expect_err("fails");
    assert!(matches!(&failed, ToolError::Execution { tool, .. } if tool == "fails"));
    assert!(failed.to_string().contains("upstream returned 503"));

    let shape = server
        .invoke("wrong_shape", Map::new())
        .await
        .expect_err("declared string, returned number");
    assert_eq!(shape.kind(), "TOOL_EXECUTION_FAILED");

    let after = server.context().await.expect("context while ready");
    assert!(Arc::ptr_eq(&before, &after));
    assert!(!after.is_released());
    assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    server.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_once() {
    let counters = Arc::new(Counters::default());
    let server = ready_server(&counters).await;

    let first = server.stop().await;
    assert_eq!(first.previous, ServerState::Ready);
    assert!(first.drained);
    assert_eq!(first.release.released, vec!["counted"]);

    let second = server.stop().await;
    assert_eq!(second.previous, ServerState::Stopped);
    assert!(second.release.released.is_empty());
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);

    let err = server.invoke("ping", Map::new()).await.expect_err("stopped");
    assert!(matches!(
        err,
        ToolError::NotReady {
            state: ServerState::Stopped
        }
    ));
}

#[tokio::test]
async fn invoke_before_start_is_not_ready_and_start_is_single_use() {
    let counters = Arc::new(Counters::default());
    let server = server(&counters, LifecycleSettings::default(), Duration::ZERO);

    let err = server.invoke("ping", Map::new()).await.expect_err("not started");
    assert!(matches!(
        err,
        ToolError::NotReady {
            state: ServerState::Uninitialized
        }
    ));

    server.start().await.expect("first start");
    let again = server.start().await.expect_err("second start");
    assert!(matches!(
        again,
        StartupError::AlreadyStarted {
            state: ServerState::Ready
        }
    ));
    server.stop().await;
}

#[tokio::test]
async fn partial_initialization_failure_releases_acquired_resources() {
    let counters = Arc::new(Counters::default());
    let server = ToolServer::builder(registry(Duration::ZERO))
        .provider(CountingProvider::new("first", &counters))
        .provider(CountingProvider::new("second", &counters).failing())
        .environment(with_key())
        .build();

    let err = server.start().await.expect_err("second provider fails");
    match &err {
        StartupError::Initialization(init) => assert_eq!(init.resource, "second"),
        other => panic!("expected Initialization, got {other:?}"),
    }
    assert_eq!(err.exit_code_value(), 69);
    assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(server.state().await, ServerState::Stopped);
}

#[tokio::test]
async fn stop_waits_for_in_flight_invocations_to_finish() {
    let counters = Arc::new(Counters::default());
    let server = Arc::new(server(
        &counters,
        LifecycleSettings {
            shutdown_timeout: Duration::from_secs(5),
            ..LifecycleSettings::default()
        },
        Duration::from_millis(100),
    ));
    server.start().await.expect("starts");

    let invocation = tokio::spawn({
        let server = server.clone();
        async move { server.invoke("sleep", Map::new()).await }
    });
    wait_for_in_flight(&server, 1).await;

    let report = server.stop().await;
    assert!(report.drained);
    let result = invocation.await.expect("task joins");
    assert_eq!(result.expect("completed during drain"), json!("done"));
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_cancels_invocations_that_outlive_the_shutdown_timeout() {
    let counters = Arc::new(Counters::default());
    let server = Arc::new(server(
        &counters,
        LifecycleSettings {
            shutdown_timeout: Duration::from_millis(50),
            ..LifecycleSettings::default()
        },
        Duration::from_secs(30),
    ));
    server.start().await.expect("starts");

    let invocation = tokio::spawn({
        let server = server.clone();
        async move { server.invoke("sleep", Map::new()).await }
    });
    wait_for_in_flight(&server, 1).await;

    let report = timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop returns after cancelling");
    assert!(!report.drained);
    let err = invocation
        .await
        .expect("task joins")
        .expect_err("cancelled by shutdown");
    assert_eq!(err.kind(), "TOOL_EXECUTION_FAILED");
    assert_eq!(server.in_flight(), 0);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelling_one_invocation_does_not_affect_others() {
    let counters = Arc::new(Counters::default());
    let server = Arc::new(server(
        &counters,
        LifecycleSettings::default(),
        Duration::from_millis(200),
    ));
    server.start().await.expect("starts");

    let cancel = CancellationToken::new();
    let cancelled = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move { server.invoke_with_cancel("sleep", Map::new(), cancel).await }
    });
    let survivor = tokio::spawn({
        let server = server.clone();
        async move { server.invoke("sleep", Map::new()).await }
    });
    wait_for_in_flight(&server, 2).await;
    cancel.cancel();

    let err = cancelled
        .await
        .expect("task joins")
        .expect_err("caller cancelled");
    assert!(err.to_string().contains("cancelled"));
    assert_eq!(
        survivor.await.expect("task joins").expect("unaffected"),
        json!("done")
    );
    assert_eq!(server.state().await, ServerState::Ready);
    server.stop().await;
}

#[tokio::test]
async fn slow_invocations_time_out_without_stopping_the_server() {
    let counters = Arc::new(Counters::default());
    let server = server(
        &counters,
        LifecycleSettings {
            invocation_timeout: Duration::from_millis(50),
            ..LifecycleSettings::default()
        },
        Duration::from_secs(30),
    );
    server.start().await.expect("starts");

    let err = server.invoke("sleep", Map::new()).await.expect_err("times out");
    assert!(err.to_string().contains("timed out"), "{err}");
    assert_eq!(
        server.invoke("ping", Map::new()).await.expect("still serving"),
        json!("pong")
    );
    server.stop().await;
}

#[tokio::test]
async fn concurrency_limit_queues_excess_invocations() {
    let counters = Arc::new(Counters::default());
    let server = Arc::new(server(
        &counters,
        LifecycleSettings {
            max_concurrent_invocations: 1,
            ..LifecycleSettings::default()
        },
        Duration::from_millis(100),
    ));
    server.start().await.expect("starts");

    let started = std::time::Instant::now();
    let first = tokio::spawn({
        let server = server.clone();
        async move { server.invoke("sleep", Map::new()).await }
    });
    let second = tokio::spawn({
        let server = server.clone();
        async move { server.invoke("sleep", Map::new()).await }
    });
    first.await.expect("joins").expect("first completes");
    second.await.expect("joins").expect("second completes");
    assert!(started.elapsed() >= Duration::from_millis(200));
    server.stop().await;
}

#[tokio::test]
async fn stop_during_startup_aborts_and_releases_what_was_acquired() {
    let counters = Arc::new(Counters::default());
    let server = Arc::new(
        ToolServer::builder(registry(Duration::ZERO))
            .provider(CountingProvider::new("counted", &counters).slow(Duration::from_millis(200)))
            .environment(with_key())
            .build(),
    );

    let starting = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.state().await, ServerState::Starting);

    let report = server.stop().await;
    assert_eq!(report.previous, ServerState::Starting);

    let err = starting
        .await
        .expect("task joins")
        .expect_err("startup is aborted");
    assert!(matches!(err, StartupError::Aborted), "unexpected error: {err:?}");
    assert_eq!(server.state().await, ServerState::Stopped);
    assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn draining_server_rejects_new_work_and_repeated_stop_returns_at_once() {
    let counters = Arc::new(Counters::default());
    let server = Arc::new(server(
        &counters,
        LifecycleSettings {
            shutdown_timeout: Duration::from_secs(5),
            ..LifecycleSettings::default()
        },
        Duration::from_millis(300),
    ));
    server.start().await.expect("starts");

    let invocation = tokio::spawn({
        let server = server.clone();
        async move { server.invoke("sleep", Map::new()).await }
    });
    wait_for_in_flight(&server, 1).await;

    let first_stop = tokio::spawn({
        let server = server.clone();
        async move { server.stop().await }
    });
    timeout(Duration::from_secs(5), async {
        while server.state().await != ServerState::ShuttingDown {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server enters ShuttingDown");

    let rejected = server
        .invoke("ping", Map::new())
        .await
        .expect_err("no new work while draining");
    assert!(matches!(
        rejected,
        ToolError::NotReady {
            state: ServerState::ShuttingDown
        }
    ));

    let second = timeout(Duration::from_millis(100), server.stop())
        .await
        .expect("second stop does not wait for the drain");
    assert_eq!(second.previous, ServerState::ShuttingDown);
    assert!(second.release.released.is_empty());

    let report = first_stop.await.expect("task joins");
    assert!(report.drained);
    assert_eq!(
        invocation.await.expect("task joins").expect("finishes during drain"),
        json!("done")
    );
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}
