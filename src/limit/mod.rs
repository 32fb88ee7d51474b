use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;
use crate::error::GatewayError;

/// Per-address fixed window: start timestamp and admitted count, both
/// atomics so concurrent requests from the same address never take a lock
struct WindowSlot {
    window_start_ms: AtomicU64,
    count: AtomicU32,
}

/// Fixed-window per-client-address rate limiter. Decisions are synchronous
/// in-memory computations; the map lock is only taken for writing when an
/// address is seen for the first time. Windows are best-effort: a roll-over
/// racing an increment may admit one extra request, which the contract
/// allows.
pub struct RateLimiter {
    config: RateLimitConfig,
    slots: RwLock<HashMap<IpAddr, Arc<WindowSlot>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Admit or reject one request from `addr`
    pub fn check(&self, addr: IpAddr) -> Result<(), GatewayError> {
        self.check_at(addr, now_ms())
    }

    fn check_at(&self, addr: IpAddr, now_ms: u64) -> Result<(), GatewayError> {
        let slot = self.slot_for(addr, now_ms);

        let start = slot.window_start_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(start) >= self.config.window_ms {
            // window elapsed: whoever wins the CAS resets the count
            if slot
                .window_start_ms
                .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.count.store(0, Ordering::Release);
            }
        }

        let admitted = slot.count.fetch_add(1, Ordering::AcqRel) + 1;
        if admitted > self.config.ceiling {
            return Err(GatewayError::RateLimited);
        }

        Ok(())
    }

    fn slot_for(&self, addr: IpAddr, now_ms: u64) -> Arc<WindowSlot> {
        if let Some(slot) = self.slots.read().unwrap().get(&addr) {
            return slot.clone();
        }

        let mut slots = self.slots.write().unwrap();
        // Already on the write path for a first-seen address, so shed slots
        // whose window expired more than a full window ago; an address that
        // stays active keeps rolling its start forward and survives.
        let stale_after = self.config.window_ms.saturating_mul(2);
        slots.retain(|_, slot| {
            now_ms.saturating_sub(slot.window_start_ms.load(Ordering::Acquire)) < stale_after
        });
        slots
            .entry(addr)
            .or_insert_with(|| {
                Arc::new(WindowSlot {
                    window_start_ms: AtomicU64::new(now_ms),
                    count: AtomicU32::new(0),
                })
            })
            .clone()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
