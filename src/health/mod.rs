use std::sync::Arc;

use serde::Serialize;

use crate::breaker::{BreakerRegistry, BreakerState};

/// Per-backend view of breaker state and rolling statistics
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub state: &'static str,
    pub requests: u32,
    pub failures: u32,
    pub failure_rate_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_for_ms: Option<u64>,
}

/// Liveness/readiness report built purely from in-memory breaker state
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub backends: Vec<BackendHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Answers health queries by polling breaker snapshots; makes no live
/// network calls.
pub struct HealthAggregator {
    registry: Arc<BreakerRegistry>,
}

impl HealthAggregator {
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self { registry }
    }

    /// Overall status is healthy only while no backend's breaker is Open
    pub fn report(&self) -> HealthReport {
        let backends: Vec<BackendHealth> = self
            .registry
            .services()
            .iter()
            .map(|service| {
                let snapshot = service.breaker.snapshot();
                BackendHealth {
                    name: service.name.clone(),
                    state: snapshot.state.as_str(),
                    requests: snapshot.requests,
                    failures: snapshot.failures,
                    failure_rate_pct: snapshot.failure_rate_pct,
                    open_for_ms: snapshot.open_for.map(|d| d.as_millis() as u64),
                }
            })
            .collect();

        let any_open = backends.iter().any(|b| b.state == BreakerState::Open.as_str());

        HealthReport {
            status: if any_open { "degraded" } else { "healthy" },
            backends,
        }
    }
}
