use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{BackendDefinition, BreakerConfig};
use crate::error::GatewayError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass through, outcomes feed the rolling window
    Closed,

    /// Requests short-circuit without a network call
    Open,

    /// Exactly one trial request is allowed through
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Outcome of a backend call, as seen by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
}

impl CallOutcome {
    fn is_failure(&self) -> bool {
        !matches!(self, CallOutcome::Success)
    }
}

/// Result of asking the breaker for admission
#[derive(Debug)]
pub enum Admission {
    /// Closed, call proceeds normally
    Allowed,

    /// Half-open trial call, its outcome decides the next state. Holds the
    /// probe permit; dropping it without recording re-opens the breaker.
    Probe(ProbeGuard),

    /// Open or a trial already in flight, do not contact the backend
    ShortCircuit,
}

impl Admission {
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Admission::ShortCircuit)
    }
}

/// Permit for the single half-open trial call. The caller is expected to
/// hand it back through `record`; if the caller's future is cancelled
/// mid-call (e.g. the client disconnected) the permit is released on drop
/// and the abandoned trial counts as a failure, so the breaker re-opens
/// instead of waiting forever for an outcome that will never arrive.
#[derive(Debug)]
pub struct ProbeGuard {
    inner: Arc<Mutex<BreakerInner>>,
    name: String,
    armed: bool,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        warn!(backend = %self.name, "breaker probe abandoned, half-open -> open");
        inner.probe_in_flight = false;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    window_start: Instant,
    requests: u32,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Read-only view of a breaker's state and rolling statistics
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub requests: u32,
    pub failures: u32,
    pub failure_rate_pct: f64,
    pub open_for: Option<Duration>,
}

/// Per-backend failure tracker. Purely in-memory; resets to Closed on
/// process restart. Time-gated transitions are evaluated on each admission
/// check rather than by a background timer.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window_start: Instant::now(),
                requests: 0,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
        }
    }

    /// Per-call timeout every admitted call must be bounded by
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout()
    }

    /// Ask for admission of one call
    pub fn try_acquire(&self) -> Admission {
        self.acquire_at(Instant::now())
    }

    /// Record the outcome of an admitted call
    pub fn record(&self, admission: Admission, outcome: CallOutcome) {
        self.record_at(Instant::now(), admission, outcome)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        let failure_rate_pct = if inner.requests == 0 {
            0.0
        } else {
            inner.failures as f64 * 100.0 / inner.requests as f64
        };

        BreakerSnapshot {
            state: inner.state,
            requests: inner.requests,
            failures: inner.failures,
            failure_rate_pct,
            open_for: match inner.state {
                BreakerState::Open => inner.opened_at.map(|at| at.elapsed()),
                _ => None,
            },
        }
    }

    fn acquire_at(&self, now: Instant) -> Admission {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::Closed => {
                Self::roll_window(&mut inner, now, self.config.window());
                Admission::Allowed
            }
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) >= self.config.reset_timeout() {
                    info!(backend = %self.name, "breaker transitioning open -> half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Admission::Probe(self.probe_guard())
                } else {
                    Admission::ShortCircuit
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::ShortCircuit
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe(self.probe_guard())
                }
            }
        }
    }

    fn probe_guard(&self) -> ProbeGuard {
        ProbeGuard {
            inner: self.inner.clone(),
            name: self.name.clone(),
            armed: true,
        }
    }

    fn record_at(&self, now: Instant, admission: Admission, outcome: CallOutcome) {
        if let Admission::Probe(mut guard) = admission {
            guard.armed = false;
            let mut inner = self.inner.lock().unwrap();
            inner.probe_in_flight = false;
            if outcome.is_failure() {
                warn!(backend = %self.name, "breaker probe failed, half-open -> open");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
            } else {
                info!(backend = %self.name, "breaker probe succeeded, half-open -> closed");
                Self::reset_counters(&mut inner, now);
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
            }
            return;
        }

        let mut inner = self.inner.lock().unwrap();

        // A call admitted while Closed may complete after the breaker has
        // already tripped; its outcome no longer matters.
        if inner.state != BreakerState::Closed {
            return;
        }

        Self::roll_window(&mut inner, now, self.config.window());
        inner.requests += 1;
        if outcome.is_failure() {
            inner.failures += 1;
        }

        if inner.requests >= self.config.volume_threshold
            && inner.failures * 100 >= inner.requests * self.config.error_threshold_pct
        {
            warn!(
                backend = %self.name,
                requests = inner.requests,
                failures = inner.failures,
                "breaker tripping closed -> open"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
        }
    }

    fn roll_window(inner: &mut BreakerInner, now: Instant, window: Duration) {
        if now.duration_since(inner.window_start) >= window {
            Self::reset_counters(inner, now);
        }
    }

    fn reset_counters(inner: &mut BreakerInner, now: Instant) {
        inner.window_start = now;
        inner.requests = 0;
        inner.failures = 0;
    }
}

/// One downstream system, its network location and its breaker
pub struct BackendService {
    pub name: String,
    pub base_url: String,
    pub breaker: CircuitBreaker,
}

/// All backends the gateway fronts, keyed by name. Built once at startup;
/// the set never changes for the process lifetime.
pub struct BreakerRegistry {
    backends: HashMap<String, Arc<BackendService>>,
}

impl BreakerRegistry {
    pub fn new(definitions: &[BackendDefinition], config: &BreakerConfig) -> Self {
        let backends = definitions
            .iter()
            .map(|def| {
                let service = BackendService {
                    name: def.name.clone(),
                    base_url: def.base_url.trim_end_matches('/').to_string(),
                    breaker: CircuitBreaker::new(&def.name, config.clone()),
                };
                (def.name.clone(), Arc::new(service))
            })
            .collect();

        Self { backends }
    }

    pub fn get(&self, name: &str) -> Result<Arc<BackendService>, GatewayError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::InternalError(format!("unknown backend '{}'", name)))
    }

    pub fn names(&self) -> std::collections::HashSet<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn services(&self) -> Vec<Arc<BackendService>> {
        let mut services: Vec<_> = self.backends.values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }
}
