use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use tailor_core::ids::SessionId;
use tailor_core::worker::{WorkerChannel, WorkerConnector};
use tailor_telemetry::MetricsRecorder;

use crate::bridge::ExecutionBridge;
use crate::error::EngineError;

pub const DEFAULT_CAPACITY: usize = 3;

/// Snapshot of the pool for health reporting.
#[derive(Clone, Debug, Serialize)]
pub struct PoolStatus {
    pub available: usize,
    pub in_use: usize,
    pub initialized: bool,
    pub capacity: usize,
}

struct PoolState {
    available: Vec<Box<dyn WorkerChannel>>,
    in_use: HashSet<SessionId>,
    initialized: bool,
    shut_down: bool,
    // Bumped by force_reset; sessions from an older generation are
    // disconnected instead of re-admitted.
    epoch: u64,
}

/// Fixed-capacity pool of worker sessions.
///
/// A session is owned either by `available` or by exactly one in-flight
/// request (tracked by id in `in_use`), never both. `acquire` moves the
/// session out; `release` moves it back, repairing a dead channel with one
/// reconnect attempt. A failed repair shrinks effective capacity and is
/// observable through `status` and the `pool_sessions_lost` counter.
pub struct SessionPool {
    capacity: usize,
    connector: Arc<dyn WorkerConnector>,
    bridge: Arc<ExecutionBridge>,
    state: Mutex<PoolState>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl SessionPool {
    pub fn new(
        capacity: usize,
        connector: Arc<dyn WorkerConnector>,
        bridge: Arc<ExecutionBridge>,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Self {
        Self {
            capacity,
            connector,
            bridge,
            state: Mutex::new(PoolState {
                available: Vec::with_capacity(capacity),
                in_use: HashSet::new(),
                initialized: false,
                shut_down: false,
                epoch: 0,
            }),
            metrics,
        }
    }

    /// Connect up to `capacity` sessions. Individual connect failures are
    /// logged and skipped; the pool comes up with whatever succeeded.
    /// Idempotent.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> Result<(), EngineError> {
        let epoch = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(EngineError::WorkerUnavailable("pool is shut down".into()));
            }
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
            state.epoch
        };

        let mut connected = Vec::with_capacity(self.capacity);
        for slot in 0..self.capacity {
            let connector = self.connector.clone();
            match self.bridge.run_blocking(async move { connector.connect().await })? {
                Ok(session) => connected.push(session),
                Err(e) => {
                    warn!(slot, error = %e, "worker session failed to connect");
                }
            }
        }

        info!(sessions = connected.len(), capacity = self.capacity, "pool initialized");
        let shut_down = {
            let mut state = self.state.lock();
            if !state.shut_down && state.epoch == epoch {
                state.available.extend(connected);
                self.publish_gauges(&state);
                return Ok(());
            }
            state.shut_down
        };

        // A shutdown or reset won the race while we were connecting; these
        // sessions were never in `available`, so disconnect them here.
        for mut session in connected {
            let _ = self
                .bridge
                .run_blocking(async move { session.disconnect().await });
        }
        if shut_down {
            Err(EngineError::WorkerUnavailable("pool is shut down".into()))
        } else {
            // A newer reset owns the pool and re-initialized it itself.
            Ok(())
        }
    }

    /// Take a session out of the pool. `None` means exhausted, not an error.
    pub fn acquire(&self) -> Option<Box<dyn WorkerChannel>> {
        let mut state = self.state.lock();
        if state.shut_down {
            return None;
        }
        let session = state.available.pop()?;
        state.in_use.insert(session.id().clone());
        self.publish_gauges(&state);
        Some(session)
    }

    /// Return a session to the pool. A disconnected session gets one
    /// reconnect attempt; on failure it is dropped and the capacity loss is
    /// recorded, never surfaced to the caller.
    #[instrument(skip(self, session), fields(session_id = %session.id()))]
    pub fn release(&self, mut session: Box<dyn WorkerChannel>) {
        let stale;
        let shut_down;
        let epoch;
        {
            let mut state = self.state.lock();
            stale = !state.in_use.remove(session.id());
            shut_down = state.shut_down;
            epoch = state.epoch;
        }

        // Sessions discarded by a reset while checked out, or released after
        // shutdown, are not re-admitted.
        if stale || shut_down {
            let _ = self
                .bridge
                .run_blocking(async move { session.disconnect().await });
            return;
        }

        if !session.connected() {
            let id = session.id().clone();
            let repaired = self
                .bridge
                .run_blocking(async move {
                    let result = session.reconnect().await;
                    (session, result)
                });
            session = match repaired {
                Ok((session, Ok(()))) => {
                    info!(session_id = %id, "worker session reconnected on release");
                    session
                }
                Ok((_, Err(e))) => {
                    warn!(session_id = %id, error = %e, "reconnect failed, dropping session");
                    self.count_lost(1);
                    return;
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "bridge failure during reconnect, dropping session");
                    self.count_lost(1);
                    return;
                }
            };
        }

        {
            let mut state = self.state.lock();
            if !state.shut_down && state.epoch == epoch {
                state.available.push(session);
                self.publish_gauges(&state);
                return;
            }
        }

        // A shutdown or reset ran between the two lock windows; neither saw
        // this session, so it is on us to disconnect it.
        let _ = self
            .bridge
            .run_blocking(async move { session.disconnect().await });
    }

    /// Record a session that was lost while checked out (its id still sat in
    /// `in_use` but the session itself is gone).
    pub fn forget(&self, id: &SessionId) {
        let mut state = self.state.lock();
        if state.in_use.remove(id) {
            warn!(session_id = %id, "worker session lost in flight");
            self.count_lost(1);
            self.publish_gauges(&state);
        }
    }

    /// Disconnect and discard every pooled session, then reconnect from
    /// scratch. Sessions currently checked out are discarded on release.
    #[instrument(skip(self))]
    pub fn force_reset(&self) -> Result<(), EngineError> {
        let discarded = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(EngineError::WorkerUnavailable("pool is shut down".into()));
            }
            state.in_use.clear();
            state.initialized = false;
            state.epoch += 1;
            std::mem::take(&mut state.available)
        };

        info!(discarded = discarded.len(), "pool reset requested");
        for mut session in discarded {
            let _ = self
                .bridge
                .run_blocking(async move { session.disconnect().await });
        }

        self.initialize()
    }

    /// Disconnect everything once. Safe concurrently with acquire/release.
    pub fn shutdown(&self) {
        let sessions = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            std::mem::take(&mut state.available)
        };

        info!(sessions = sessions.len(), "pool shutting down");
        for mut session in sessions {
            let _ = self
                .bridge
                .run_blocking(async move { session.disconnect().await });
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            available: state.available.len(),
            in_use: state.in_use.len(),
            initialized: state.initialized,
            capacity: self.capacity,
        }
    }

    fn count_lost(&self, n: u64) {
        if let Some(m) = &self.metrics {
            m.counter_inc("pool_sessions_lost", &[], n);
        }
    }

    fn publish_gauges(&self, state: &PoolState) {
        if let Some(m) = &self.metrics {
            m.gauge_set("pool_available", &[], state.available.len() as f64);
            m.gauge_set("pool_in_use", &[], state.in_use.len() as f64);
        }
    }
}
