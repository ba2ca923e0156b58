//! Wait strategy engine.
//!
//! A [`WaitStrategy`] pairs a [`WaitCondition`] with a timeout and a poll
//! interval. [`WaitEngine::await_ready`] evaluates the condition until it
//! holds, the elapsed time exceeds the timeout, or the engine's cancellation
//! token fires.
//!
//! Elapsed time is measured with [`tokio::time::Instant`], and every single
//! evaluation is bounded by the remaining budget, so a wait never overshoots
//! its timeout by more than one poll interval.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::RuntimeError;
use crate::mapper::RuntimeHandle;
use crate::runtime::{HealthStatus, RuntimeGateway};

/// Default readiness timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait errors.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The condition never held within the timeout.
    #[error(
        "`{condition}` not satisfied after {elapsed:?} (timeout {timeout:?}); last observed: {last_observed}"
    )]
    Timeout {
        /// Description of the condition.
        condition: String,
        /// Configured timeout.
        timeout: Duration,
        /// Time actually spent waiting.
        elapsed: Duration,
        /// Outcome of the last evaluation.
        last_observed: String,
    },

    /// The wait was cancelled.
    #[error("wait cancelled")]
    Cancelled,

    /// The container terminated while being waited on.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Inputs handed to a custom readiness probe.
#[derive(Clone)]
pub struct ProbeContext {
    /// Gateway for exec/log access.
    pub runtime: Arc<dyn RuntimeGateway>,
    /// Coordinates of the container under test.
    pub handle: RuntimeHandle,
}

/// Service-specific readiness predicate (e.g. running a trivial query).
pub trait ReadinessProbe: Send + Sync {
    /// Return `true` once the service is usable.
    fn probe(&self, ctx: ProbeContext) -> Pin<Box<dyn Future<Output = bool> + Send>>;
}

impl<F, Fut> ReadinessProbe for F
where
    F: Fn(ProbeContext) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn probe(&self, ctx: ProbeContext) -> Pin<Box<dyn Future<Output = bool> + Send>> {
        Box::pin(self(ctx))
    }
}

/// Readiness predicate over a [`RuntimeHandle`].
#[derive(Clone)]
pub enum WaitCondition {
    /// TCP connect succeeds on each listed container port (empty: every declared port).
    ListeningPorts(Vec<u16>),

    /// Accumulated log output matches `pattern` at least `times` times.
    LogMessage {
        /// Text searched in stdout and stderr.
        pattern: LogMatcher,
        /// Minimum number of matches.
        times: usize,
    },

    /// The runtime health check reports healthy.
    Healthy,

    /// Custom predicate.
    Probe(Arc<dyn ReadinessProbe>),

    /// Every nested condition holds in the same evaluation.
    All(Vec<WaitCondition>),
}

impl WaitCondition {
    /// Wait for every declared port to accept TCP connections.
    #[must_use]
    pub fn all_ports() -> Self {
        Self::ListeningPorts(Vec::new())
    }

    /// Wait for specific declared ports to accept TCP connections.
    #[must_use]
    pub fn listening_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self::ListeningPorts(ports.into_iter().collect())
    }

    /// Wait for a literal message to appear once in the logs.
    #[must_use]
    pub fn log_message(message: &str) -> Self {
        Self::log_message_times(message, 1)
    }

    /// Wait for a literal message to appear `times` times in the logs.
    #[must_use]
    pub fn log_message_times(message: &str, times: usize) -> Self {
        Self::LogMessage {
            pattern: LogMatcher::Literal(message.to_string()),
            times,
        }
    }

    /// Wait for a regular expression to match in the logs.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error.
    pub fn log_pattern(pattern: &str, times: usize) -> Result<Self, regex::Error> {
        Ok(Self::LogMessage {
            pattern: LogMatcher::Pattern(Regex::new(pattern)?),
            times,
        })
    }

    /// Wait for a custom predicate.
    #[must_use]
    pub fn probe(probe: impl ReadinessProbe + 'static) -> Self {
        Self::Probe(Arc::new(probe))
    }

    /// Wait for all conditions.
    #[must_use]
    pub fn all(conditions: impl IntoIterator<Item = WaitCondition>) -> Self {
        Self::All(conditions.into_iter().collect())
    }

    fn evaluate<'a>(
        &'a self,
        runtime: &'a Arc<dyn RuntimeGateway>,
        handle: &'a RuntimeHandle,
    ) -> Pin<Box<dyn Future<Output = Observation> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Self::ListeningPorts(ports) => {
                    let ports: Vec<u16> = if ports.is_empty() {
                        handle.ports().map(|(c, _)| c).collect()
                    } else {
                        ports.clone()
                    };
                    for port in ports {
                        let mapped = match handle.mapped_port(port) {
                            Ok(p) => p,
                            Err(e) => return Observation::pending(e.to_string()),
                        };
                        if let Err(e) = TcpStream::connect((handle.host(), mapped)).await {
                            return Observation::pending(format!(
                                "port {port} ({}:{mapped}) not accepting connections: {e}",
                                handle.host()
                            ));
                        }
                    }
                    Observation::ready()
                }
                Self::LogMessage { pattern, times } => match runtime.logs(handle.id()).await {
                    Ok(raw) => {
                        let text = String::from_utf8_lossy(&raw);
                        let found = pattern.count(&text);
                        if found >= *times {
                            Observation::ready()
                        } else {
                            Observation::pending(format!(
                                "log pattern `{pattern}` matched {found}/{times} times"
                            ))
                        }
                    }
                    Err(e) => Observation::pending(format!("log fetch failed: {e}")),
                },
                Self::Healthy => match runtime.inspect(handle.id()).await {
                    Ok(info) if info.health == HealthStatus::Healthy => Observation::ready(),
                    Ok(info) if info.state.is_terminal() => Observation::fatal(RuntimeError::StartFailed {
                        id: handle.id().as_str().to_string(),
                        reason: format!(
                            "container {} (exit code {})",
                            info.state,
                            info.exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
                        ),
                    }),
                    Ok(info) => Observation::pending(format!(
                        "container {} with health {}",
                        info.state, info.health
                    )),
                    Err(e) => Observation::pending(format!("inspect failed: {e}")),
                },
                Self::Probe(probe) => {
                    let ctx = ProbeContext {
                        runtime: Arc::clone(runtime),
                        handle: handle.clone(),
                    };
                    if probe.probe(ctx).await {
                        Observation::ready()
                    } else {
                        Observation::pending("readiness probe returned false".to_string())
                    }
                }
                Self::All(conditions) => {
                    for condition in conditions {
                        let observed = condition.evaluate(runtime, handle).await;
                        if !observed.ready {
                            return observed;
                        }
                    }
                    Observation::ready()
                }
            }
        })
    }
}

/// Literal or regular-expression log matcher.
#[derive(Debug, Clone)]
pub enum LogMatcher {
    /// Exact substring.
    Literal(String),
    /// Regular expression.
    Pattern(Regex),
}

impl LogMatcher {
    fn count(&self, text: &str) -> usize {
        match self {
            Self::Literal(needle) if needle.is_empty() => 0,
            Self::Literal(needle) => text.matches(needle.as_str()).count(),
            Self::Pattern(regex) => regex.find_iter(text).count(),
        }
    }
}

impl fmt::Display for LogMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(needle) => f.write_str(needle),
            Self::Pattern(regex) => f.write_str(regex.as_str()),
        }
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListeningPorts(ports) if ports.is_empty() => write!(f, "all declared ports listening"),
            Self::ListeningPorts(ports) => write!(f, "ports {ports:?} listening"),
            Self::LogMessage { pattern, times } => write!(f, "log matches `{pattern}` {times}x"),
            Self::Healthy => write!(f, "health check healthy"),
            Self::Probe(_) => write!(f, "readiness probe"),
            Self::All(conditions) => {
                write!(f, "all of [")?;
                for (i, c) in conditions.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "]")
            }
        }
    }
}

struct Observation {
    ready: bool,
    detail: String,
    fatal: Option<RuntimeError>,
}

impl Observation {
    fn ready() -> Self {
        Self {
            ready: true,
            detail: String::new(),
            fatal: None,
        }
    }

    fn pending(detail: String) -> Self {
        Self {
            ready: false,
            detail,
            fatal: None,
        }
    }

    fn fatal(error: RuntimeError) -> Self {
        Self {
            ready: false,
            detail: error.to_string(),
            fatal: Some(error),
        }
    }
}

/// Condition plus timeout and poll policy.
#[derive(Debug, Clone)]
pub struct WaitStrategy {
    /// Readiness predicate.
    pub condition: WaitCondition,
    /// Total time budget.
    pub timeout: Duration,
    /// Pause between evaluations.
    pub poll_interval: Duration,
}

impl WaitStrategy {
    /// Create a strategy with default timeout and poll interval.
    #[must_use]
    pub fn new(condition: WaitCondition) -> Self {
        Self {
            condition,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set total time budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set pause between evaluations.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::new(WaitCondition::all_ports())
    }
}

/// Polls wait conditions.
#[derive(Debug, Clone, Default)]
pub struct WaitEngine {
    cancel: CancellationToken,
}

impl WaitEngine {
    /// Create an engine that is never cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort waits as soon as `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Poll until the strategy's condition holds.
    ///
    /// Returns the time spent waiting.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] with the last observation once the
    /// timeout elapses, [`WaitError::Runtime`] if the container terminated,
    /// or [`WaitError::Cancelled`].
    pub async fn await_ready(
        &self,
        runtime: &Arc<dyn RuntimeGateway>,
        handle: &RuntimeHandle,
        strategy: &WaitStrategy,
    ) -> Result<Duration, WaitError> {
        let started = Instant::now();
        let deadline = started + strategy.timeout;
        let mut last_observed = "condition never evaluated".to_string();
        let mut polls: u32 = 0;

        debug!(id = %handle.id(), condition = %strategy.condition, timeout = ?strategy.timeout, "waiting for container");

        loop {
            polls += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let evaluation = strategy.condition.evaluate(runtime, handle);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(WaitError::Cancelled),
                outcome = tokio::time::timeout(remaining, evaluation) => match outcome {
                    Ok(Observation { fatal: Some(error), .. }) => {
                        debug!(id = %handle.id(), error = %error, "container died while waiting");
                        return Err(WaitError::Runtime(error));
                    }
                    Ok(observed) if observed.ready => {
                        let elapsed = started.elapsed();
                        debug!(id = %handle.id(), polls, elapsed = ?elapsed, "container ready");
                        return Ok(elapsed);
                    }
                    Ok(observed) => {
                        trace!(id = %handle.id(), polls, detail = %observed.detail, "not ready");
                        last_observed = observed.detail;
                    }
                    Err(_) => {
                        last_observed = format!("evaluation still running at deadline ({last_observed})");
                    }
                },
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    condition: strategy.condition.to_string(),
                    timeout: strategy.timeout,
                    elapsed: now - started,
                    last_observed,
                });
            }

            let pause = strategy.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(WaitError::Cancelled),
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContainerId;
    use crate::mapper::ResourceMapper;
    use crate::runtime::{ContainerInspection, PortBinding};
    use crate::spec::ContainerSpec;
    use crate::testing::ScriptedRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle_for(spec: &ContainerSpec, ports: Vec<PortBinding>) -> RuntimeHandle {
        let info = ContainerInspection {
            ports,
            host: Some("127.0.0.1".to_string()),
            ..Default::default()
        };
        ResourceMapper::new()
            .resolve(ContainerId::new_unchecked("c1"), spec, &info)
            .expect("resolve")
    }

    fn runtime(scripted: ScriptedRuntime) -> Arc<dyn RuntimeGateway> {
        Arc::new(scripted)
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_true_probe_times_out_within_budget() {
        let rt = runtime(ScriptedRuntime::new());
        let handle = handle_for(&ContainerSpec::new("alpine"), Vec::new());
        let timeout = Duration::from_secs(5);
        let interval = Duration::from_millis(300);
        let strategy = WaitStrategy::new(WaitCondition::probe(|_ctx: ProbeContext| async { false }))
            .with_timeout(timeout)
            .with_poll_interval(interval);

        let started = Instant::now();
        let err = WaitEngine::new()
            .await_ready(&rt, &handle, &strategy)
            .await
            .expect_err("never ready");
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + interval);
        match err {
            WaitError::Timeout { last_observed, .. } => {
                assert!(last_observed.contains("probe returned false"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_is_bounded_by_timeout() {
        let rt = runtime(ScriptedRuntime::new());
        let handle = handle_for(&ContainerSpec::new("alpine"), Vec::new());
        let strategy = WaitStrategy::new(WaitCondition::probe(|_ctx: ProbeContext| async {
            std::future::pending::<bool>().await
        }))
        .with_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let result = WaitEngine::new().await_ready(&rt, &handle, &strategy).await;
        assert!(matches!(result, Err(WaitError::Timeout { .. })));
        assert!(started.elapsed() <= Duration::from_secs(2) + DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_succeeds_after_polls() {
        let rt = runtime(ScriptedRuntime::new());
        let handle = handle_for(&ContainerSpec::new("alpine"), Vec::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let strategy = WaitStrategy::new(WaitCondition::probe(move |_ctx: ProbeContext| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { n >= 3 }
        }));

        WaitEngine::new()
            .await_ready(&rt, &handle, &strategy)
            .await
            .expect("ready on fourth poll");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_message_counts_matches() {
        let scripted = ScriptedRuntime::new();
        scripted.push_logs(&ContainerId::new_unchecked("c1"), "Starting listening for CQL clients\n");
        let rt = runtime(scripted);
        let handle = handle_for(&ContainerSpec::new("cassandra"), Vec::new());

        let once = WaitStrategy::new(WaitCondition::log_message("listening for CQL clients"));
        WaitEngine::new()
            .await_ready(&rt, &handle, &once)
            .await
            .expect("matched once");

        let twice = WaitStrategy::new(WaitCondition::log_message_times("listening for CQL clients", 2))
            .with_timeout(Duration::from_secs(1));
        let err = WaitEngine::new()
            .await_ready(&rt, &handle, &twice)
            .await
            .expect_err("only one match");
        assert!(err.to_string().contains("matched 1/2 times"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_pattern_waits_for_required_matches() {
        let scripted = Arc::new(ScriptedRuntime::new());
        let id = ContainerId::new_unchecked("c1");
        scripted.push_logs(&id, "Starting listening for CQL clients on /0.0.0.0:9042 (unencrypted)...\n");
        scripted.push_logs(&id, "Not starting RPC server; listening for CQL clients on localhost\n");
        let rt: Arc<dyn RuntimeGateway> = scripted.clone();
        let handle = handle_for(&ContainerSpec::new("cassandra"), Vec::new());

        let late = Arc::clone(&scripted);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            late.push_logs(
                &ContainerId::new_unchecked("c1"),
                "Starting listening for CQL clients on /172.17.0.2:9042 (unencrypted)...\n",
            );
        });

        let condition =
            WaitCondition::log_pattern(r"listening for CQL clients on /\d+\.\d+\.\d+\.\d+:\d+", 2)
                .expect("valid pattern");
        let strategy = WaitStrategy::new(condition).with_timeout(Duration::from_secs(10));
        let elapsed = WaitEngine::new()
            .await_ready(&rt, &handle, &strategy)
            .await
            .expect("second match arrives");

        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_log_pattern_is_rejected() {
        assert!(WaitCondition::log_pattern("listening on (port", 1).is_err());
        assert!(WaitCondition::log_pattern(r"port \d+", 1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let rt = runtime(ScriptedRuntime::new());
        let handle = handle_for(&ContainerSpec::new("alpine"), Vec::new());
        let token = CancellationToken::new();
        let strategy = WaitStrategy::new(WaitCondition::probe(|_ctx: ProbeContext| async { false }))
            .with_timeout(Duration::from_secs(3600));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = WaitEngine::new()
            .with_cancellation(token)
            .await_ready(&rt, &handle, &strategy)
            .await;
        assert!(matches!(result, Err(WaitError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_listening_ports_against_real_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let spec = ContainerSpec::new("alpine").with_exposed_port(8080);
        let handle = handle_for(&spec, vec![PortBinding::tcp(8080, port)]);
        let rt = runtime(ScriptedRuntime::new());

        let strategy = WaitStrategy::new(WaitCondition::all_ports()).with_timeout(Duration::from_secs(5));
        WaitEngine::new()
            .await_ready(&rt, &handle, &strategy)
            .await
            .expect("listener accepts");
    }

    #[tokio::test]
    async fn test_all_reports_first_pending_condition() {
        let rt = runtime(ScriptedRuntime::new());
        let handle = handle_for(&ContainerSpec::new("alpine"), Vec::new());
        let strategy = WaitStrategy::new(WaitCondition::all([
            WaitCondition::probe(|_ctx: ProbeContext| async { true }),
            WaitCondition::Healthy,
        ]))
        .with_timeout(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(10));

        let err = WaitEngine::new()
            .await_ready(&rt, &handle, &strategy)
            .await
            .expect_err("no health status scripted");
        assert!(err.to_string().contains("health"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_fails_fast_on_exited_container() {
        let scripted = ScriptedRuntime::new();
        let spec = ContainerSpec::new("alpine");
        let id = scripted.create(&spec).await.expect("create");
        scripted.exit_container(&id, 137);
        let rt = runtime(scripted);
        let info = ContainerInspection::default();
        let handle = ResourceMapper::new().resolve(id, &spec, &info).expect("resolve");

        let strategy = WaitStrategy::new(WaitCondition::Healthy);
        let started = Instant::now();
        let err = WaitEngine::new()
            .await_ready(&rt, &handle, &strategy)
            .await
            .expect_err("exited");
        assert!(matches!(err, WaitError::Runtime(_)));
        assert!(err.to_string().contains("137"));
        assert!(started.elapsed() < DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_condition_display() {
        let condition = WaitCondition::all([
            WaitCondition::listening_ports([9042]),
            WaitCondition::log_message("ready"),
        ]);
        assert_eq!(condition.to_string(), "all of [ports [9042] listening, log matches `ready` 1x]");
    }
}
