//! Scheduler state and counters, shared with the health endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Built, first cycle not started yet.
    Idle,
    Running,
    /// Stopped after cancellation.
    Stopped,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    state: AtomicU8,
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_abandoned: AtomicU64,
    provider_errors: AtomicU64,
    provider_timeouts: AtomicU64,
    last_cycle_ms: AtomicU64,
    /// Unix millis, 0 before the first cycle.
    last_cycle_started_ms: AtomicI64,
}

/// Serializable copy of [`SchedulerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub state: SchedulerState,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_abandoned: u64,
    pub provider_errors: u64,
    pub provider_timeouts: u64,
    pub last_cycle_ms: u64,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns the 1-based number of the cycle being started.
    pub(crate) fn cycle_started(&self, at: DateTime<Utc>) -> u64 {
        self.last_cycle_started_ms.store(at.timestamp_millis(), Ordering::Relaxed);
        self.cycles_started.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn cycle_completed(&self, elapsed_ms: u64) {
        self.last_cycle_ms.store(elapsed_ms, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cycle_abandoned(&self) {
        self.cycles_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn provider_timeout(&self) {
        self.provider_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_abandoned(&self) -> u64 {
        self.cycles_abandoned.load(Ordering::Relaxed)
    }

    pub fn provider_errors(&self) -> u64 {
        self.provider_errors.load(Ordering::Relaxed)
    }

    pub fn provider_timeouts(&self) -> u64 {
        self.provider_timeouts.load(Ordering::Relaxed)
    }

    pub fn last_cycle_started_at(&self) -> Option<DateTime<Utc>> {
        match self.last_cycle_started_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::<Utc>::from_timestamp_millis(ms),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            state: self.state(),
            cycles_started: self.cycles_started(),
            cycles_completed: self.cycles_completed(),
            cycles_abandoned: self.cycles_abandoned(),
            provider_errors: self.provider_errors(),
            provider_timeouts: self.provider_timeouts(),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            last_cycle_started_at: self.last_cycle_started_at(),
        }
    }
}
