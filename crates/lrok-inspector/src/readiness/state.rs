//! Readiness states, events and the pure transition function.

use crate::error::{ProbeError, StartupError};
use std::fmt;

/// Attempt budgets that bound the health-check and warm-up phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessLimits {
    pub health_attempts: u32,
    pub warmup_requests: u32,
}

/// Why startup ended in [`ReadinessState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Bind(String),
    HealthCheckExhausted { attempts: u32, last_error: String },
    WarmUpFailed { attempts: u32, last_error: String },
    Aborted(String),
}

impl FailureCause {
    pub fn into_error(self) -> StartupError {
        match self {
            FailureCause::HealthCheckExhausted {
                attempts,
                last_error,
            } => StartupError::HealthCheckExhausted {
                attempts,
                last_error,
            },
            FailureCause::WarmUpFailed {
                attempts,
                last_error,
            } => StartupError::WarmUpFailed {
                attempts,
                last_error,
            },
            cause @ (FailureCause::Bind(_) | FailureCause::Aborted(_)) => {
                StartupError::Aborted(cause.to_string())
            }
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Bind(reason) => write!(f, "bind failed: {reason}"),
            FailureCause::HealthCheckExhausted {
                attempts,
                last_error,
            } => write!(f, "health check exhausted after {attempts} attempts: {last_error}"),
            FailureCause::WarmUpFailed {
                attempts,
                last_error,
            } => write!(f, "all {attempts} warm-up requests failed: {last_error}"),
            FailureCause::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Startup phase of one proxy instance.
///
/// `Starting → Listening → HealthChecking → WarmingUp → Ready`, with `Failed`
/// reachable from every non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Listening {
        port: u16,
    },
    /// `failures` probes have failed so far
    HealthChecking {
        port: u16,
        failures: u32,
    },
    /// `completed` warm-up requests have finished; `reached_proxy` is set once
    /// any of them got an answer from the proxy
    WarmingUp {
        port: u16,
        completed: u32,
        reached_proxy: bool,
    },
    Ready {
        port: u16,
    },
    Failed {
        cause: FailureCause,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessEvent {
    Bound { port: u16 },
    BindFailed { reason: String },
    Serving,
    ProbeSucceeded,
    ProbeFailed { error: ProbeError },
    WarmUpSucceeded,
    WarmUpFailed { error: ProbeError },
    Aborted { reason: String },
}

impl ReadinessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ReadinessEvent::Bound { .. } => "Bound",
            ReadinessEvent::BindFailed { .. } => "BindFailed",
            ReadinessEvent::Serving => "Serving",
            ReadinessEvent::ProbeSucceeded => "ProbeSucceeded",
            ReadinessEvent::ProbeFailed { .. } => "ProbeFailed",
            ReadinessEvent::WarmUpSucceeded => "WarmUpSucceeded",
            ReadinessEvent::WarmUpFailed { .. } => "WarmUpFailed",
            ReadinessEvent::Aborted { .. } => "Aborted",
        }
    }
}

impl ReadinessState {
    pub fn name(&self) -> &'static str {
        match self {
            ReadinessState::Starting => "Starting",
            ReadinessState::Listening { .. } => "Listening",
            ReadinessState::HealthChecking { .. } => "HealthChecking",
            ReadinessState::WarmingUp { .. } => "WarmingUp",
            ReadinessState::Ready { .. } => "Ready",
            ReadinessState::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReadinessState::Ready { .. } | ReadinessState::Failed { .. }
        )
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            ReadinessState::Listening { port }
            | ReadinessState::HealthChecking { port, .. }
            | ReadinessState::WarmingUp { port, .. }
            | ReadinessState::Ready { port } => Some(*port),
            ReadinessState::Starting | ReadinessState::Failed { .. } => None,
        }
    }

    /// Compute the state that follows `event`. Pure: no IO, no clocks.
    pub fn transition(
        &self,
        event: ReadinessEvent,
        limits: &ReadinessLimits,
    ) -> Result<ReadinessState, StartupError> {
        use ReadinessEvent as E;
        use ReadinessState as S;

        let next = match (self, event) {
            (S::Starting, E::Bound { port }) => S::Listening { port },
            (S::Starting, E::BindFailed { reason }) => S::Failed {
                cause: FailureCause::Bind(reason),
            },
            (S::Listening { port }, E::Serving) => S::HealthChecking {
                port: *port,
                failures: 0,
            },
            (S::HealthChecking { port, .. }, E::ProbeSucceeded) => {
                if limits.warmup_requests == 0 {
                    S::Ready { port: *port }
                } else {
                    S::WarmingUp {
                        port: *port,
                        completed: 0,
                        reached_proxy: false,
                    }
                }
            }
            (S::HealthChecking { port, failures }, E::ProbeFailed { error }) => {
                let failures = failures + 1;
                if failures >= limits.health_attempts {
                    S::Failed {
                        cause: FailureCause::HealthCheckExhausted {
                            attempts: failures,
                            last_error: error.to_string(),
                        },
                    }
                } else {
                    S::HealthChecking {
                        port: *port,
                        failures,
                    }
                }
            }
            (S::WarmingUp { port, completed, .. }, E::WarmUpSucceeded) => {
                let completed = completed + 1;
                if completed >= limits.warmup_requests {
                    S::Ready { port: *port }
                } else {
                    S::WarmingUp {
                        port: *port,
                        completed,
                        reached_proxy: true,
                    }
                }
            }
            (
                S::WarmingUp {
                    port,
                    completed,
                    reached_proxy,
                },
                E::WarmUpFailed { error },
            ) => {
                let completed = completed + 1;
                let reached_proxy = *reached_proxy || error.reached_proxy();
                if completed < limits.warmup_requests {
                    S::WarmingUp {
                        port: *port,
                        completed,
                        reached_proxy,
                    }
                } else if reached_proxy {
                    S::Ready { port: *port }
                } else {
                    S::Failed {
                        cause: FailureCause::WarmUpFailed {
                            attempts: completed,
                            last_error: error.to_string(),
                        },
                    }
                }
            }
            (
                S::Listening { .. } | S::HealthChecking { .. } | S::WarmingUp { .. },
                E::Aborted { reason },
            ) => S::Failed {
                cause: FailureCause::Aborted(reason),
            },
            (state, event) => {
                return Err(StartupError::InvalidTransition {
                    from: state.name().to_string(),
                    event: event.name().to_string(),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Failed { cause } => write!(f, "Failed ({cause})"),
            other => match other.port() {
                Some(port) => write!(f, "{} (port {})", other.name(), port),
                None => f.write_str(other.name()),
            },
        }
    }
}
