//! # Recovery Circuit Breaker
//!
//! Shared gate in front of every recovery attempt. Consecutive recovery
//! failures open the circuit; once the reset delay has elapsed the next state
//! check moves it to half-open, where a single trial is admitted. A trial
//! success closes the circuit and a trial failure reopens it.

use crate::config::CircuitBreakerConfig;
use crate::constants::metrics as metric_names;
use crate::metrics::{emit_metric, MetricsSink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Recovery attempts are allowed
    Closed = 0,
    /// Recovery attempts are skipped
    Open = 1,
    /// One trial attempt is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_delay_seconds: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub reset_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct OpenWindow {
    opened_at: Option<Instant>,
    reset_time: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Set while the half-open trial is outstanding
    trial_in_flight: AtomicBool,
    config: CircuitBreakerConfig,
    window: Mutex<OpenWindow>,
    last_failure_time: Mutex<Option<DateTime<Utc>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .field("consecutive_failures", &self.consecutive_failures.load(Ordering::Acquire))
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_delay_ms = config.reset_delay_ms,
            "🛡️ Circuit breaker initialized"
        );
        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            trial_in_flight: AtomicBool::new(false),
            config,
            window: Mutex::new(OpenWindow::default()),
            last_failure_time: Mutex::new(None),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn current_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Current state. An open circuit whose reset delay has elapsed moves to
    /// half-open here; only the caller that wins the swap logs the change.
    pub fn state(&self) -> CircuitState {
        let state = self.current_state();
        if state != CircuitState::Open {
            return state;
        }

        let elapsed = {
            let window = self.window.lock();
            window
                .opened_at
                .is_some_and(|opened| opened.elapsed() >= self.config.reset_delay())
        };
        if !elapsed {
            return CircuitState::Open;
        }

        if self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!(component = %self.name, "🟡 Circuit breaker half-open (testing recovery)");
        }
        self.current_state()
    }

    /// Whether recovery may currently run, without claiming the half-open trial
    pub fn allows_recovery(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Claims permission for one recovery attempt. In half-open only the
    /// first caller gets through until an outcome is recorded.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Records the outcome of a recovery attempt
    pub fn record_outcome(&self, failure: bool) {
        if failure {
            self.record_failure();
        } else {
            self.record_success();
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        match self.state() {
            CircuitState::HalfOpen => self.transition_to_closed(),
            CircuitState::Closed => {
                debug!(component = %self.name, "🟢 Recovery succeeded");
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        *self.last_failure_time.lock() = Some(Utc::now());
        error!(
            component = %self.name,
            consecutive_failures = failures,
            "🔴 Recovery failed"
        );

        match self.state() {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                self.transition_to_open(CircuitState::Closed, failures);
            }
            CircuitState::HalfOpen => {
                self.transition_to_open(CircuitState::HalfOpen, failures);
            }
            _ => {}
        }
    }

    fn transition_to_open(&self, from: CircuitState, failures: u32) {
        if self
            .state
            .compare_exchange(from as u8, CircuitState::Open as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let reset_time = Utc::now()
            + chrono::Duration::from_std(self.config.reset_delay()).unwrap_or_else(|_| chrono::Duration::zero());
        {
            let mut window = self.window.lock();
            window.opened_at = Some(Instant::now());
            window.reset_time = Some(reset_time);
        }
        self.trial_in_flight.store(false, Ordering::Release);

        emit_metric(
            self.metrics.as_ref(),
            metric_names::CIRCUIT_OPENED,
            1.0,
            json!({
                "failure_count": failures,
                "threshold": self.config.failure_threshold,
                "reset_delay_ms": self.config.reset_delay_ms,
            }),
        );
        error!(
            component = %self.name,
            consecutive_failures = failures,
            failure_threshold = self.config.failure_threshold,
            reset_time = %reset_time.to_rfc3339(),
            "🔴 Circuit breaker opened (skipping recovery)"
        );
    }

    fn transition_to_closed(&self) {
        let previous = CircuitState::from(self.state.swap(CircuitState::Closed as u8, Ordering::AcqRel));
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
        *self.window.lock() = OpenWindow::default();
        if previous != CircuitState::Closed {
            emit_metric(
                self.metrics.as_ref(),
                metric_names::CIRCUIT_CLOSED,
                1.0,
                json!({ "previous_state": previous.to_string() }),
            );
            info!(component = %self.name, from = %previous, "🟢 Circuit breaker closed (recovered)");
        }
    }

    /// Forces the circuit closed and clears failure history
    pub fn manual_reset(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker manually reset");
        self.transition_to_closed();
        *self.last_failure_time.lock() = None;
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let state = self.state();
        let reset_time = self.window.lock().reset_time;
        CircuitBreakerStatus {
            state,
            failure_count: self.consecutive_failures.load(Ordering::Acquire),
            failure_threshold: self.config.failure_threshold,
            reset_delay_seconds: Duration::from_millis(self.config.reset_delay_ms).as_secs_f64(),
            last_failure_time: *self.last_failure_time.lock(),
            reset_time,
        }
    }
}
