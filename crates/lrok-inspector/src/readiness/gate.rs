//! Drives the readiness state machine with a probe.

use super::probe::ReadinessProbe;
use super::state::{ReadinessEvent, ReadinessLimits, ReadinessState};
use crate::config::ReadinessConfig;
use crate::error::StartupError;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns the current readiness state and the path taken to reach it.
#[derive(Debug)]
pub struct ReadinessGate {
    state: ReadinessState,
    history: Vec<ReadinessState>,
    limits: ReadinessLimits,
    health_interval: Duration,
    warmup_backoff: Duration,
}

impl ReadinessGate {
    pub fn new(config: &ReadinessConfig) -> Self {
        Self {
            state: ReadinessState::Starting,
            history: vec![ReadinessState::Starting],
            limits: ReadinessLimits {
                health_attempts: config.health_attempts,
                warmup_requests: config.warmup_requests,
            },
            health_interval: config.health_interval(),
            warmup_backoff: config.warmup_backoff(),
        }
    }

    pub fn state(&self) -> &ReadinessState {
        &self.state
    }

    /// Every state entered so far, starting with `Starting`.
    pub fn history(&self) -> &[ReadinessState] {
        &self.history
    }

    /// Apply one event. Invalid events leave the state untouched.
    pub fn apply(&mut self, event: ReadinessEvent) -> Result<&ReadinessState, StartupError> {
        let next = self.state.transition(event, &self.limits)?;
        if next != self.state {
            debug!("Readiness: {} -> {}", self.state, next);
            self.history.push(next.clone());
        }
        self.state = next;
        Ok(&self.state)
    }

    /// Run health checks and warm-up until the gate is `Ready` or `Failed`.
    /// Returns the listening port on success.
    pub async fn run<P>(&mut self, probe: &P, addr: SocketAddr) -> Result<u16, StartupError>
    where
        P: ReadinessProbe + ?Sized,
    {
        loop {
            match &self.state {
                ReadinessState::Ready { port } => {
                    info!("Proxy on port {} is ready", port);
                    return Ok(*port);
                }
                ReadinessState::Failed { cause } => return Err(cause.clone().into_error()),
                ReadinessState::HealthChecking { .. } => {
                    let event = match probe.check_liveness(addr).await {
                        Ok(()) => ReadinessEvent::ProbeSucceeded,
                        Err(error) => {
                            debug!("Liveness probe failed: {}", error);
                            ReadinessEvent::ProbeFailed { error }
                        }
                    };
                    let failed = matches!(event, ReadinessEvent::ProbeFailed { .. });
                    self.apply(event)?;
                    if failed && !self.state.is_terminal() {
                        tokio::time::sleep(self.health_interval).await;
                    }
                }
                ReadinessState::WarmingUp { .. } => {
                    let event = match probe.warm_up(addr).await {
                        Ok(()) => ReadinessEvent::WarmUpSucceeded,
                        Err(error) => {
                            warn!("Warm-up request failed: {}", error);
                            ReadinessEvent::WarmUpFailed { error }
                        }
                    };
                    let failed = matches!(event, ReadinessEvent::WarmUpFailed { .. });
                    self.apply(event)?;
                    if failed && !self.state.is_terminal() {
                        tokio::time::sleep(self.warmup_backoff).await;
                    }
                }
                ReadinessState::Starting | ReadinessState::Listening { .. } => {
                    return Err(StartupError::InvalidTransition {
                        from: self.state.name().to_string(),
                        event: "run".to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Probe answering from scripted result queues; empty queues succeed.
    #[derive(Default)]
    struct ScriptedProbe {
        liveness: Mutex<VecDeque<Result<(), ProbeError>>>,
        warm_up: Mutex<VecDeque<Result<(), ProbeError>>>,
        liveness_calls: Mutex<u32>,
        warm_up_calls: Mutex<u32>,
    }

    impl ScriptedProbe {
        fn with(
            liveness: Vec<Result<(), ProbeError>>,
            warm_up: Vec<Result<(), ProbeError>>,
        ) -> Self {
            Self {
                liveness: Mutex::new(liveness.into()),
                warm_up: Mutex::new(warm_up.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ReadinessProbe for ScriptedProbe {
        async fn check_liveness(&self, _addr: SocketAddr) -> Result<(), ProbeError> {
            *self.liveness_calls.lock() += 1;
            self.liveness.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn warm_up(&self, _addr: SocketAddr) -> Result<(), ProbeError> {
            *self.warm_up_calls.lock() += 1;
            self.warm_up.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn config() -> ReadinessConfig {
        ReadinessConfig {
            health_attempts: 4,
            health_interval_ms: 0,
            warmup_requests: 3,
            warmup_backoff_ms: 0,
            ..Default::default()
        }
    }

    fn serving_gate() -> ReadinessGate {
        let mut gate = ReadinessGate::new(&config());
        gate.apply(ReadinessEvent::Bound { port: 4100 }).unwrap();
        gate.apply(ReadinessEvent::Serving).unwrap();
        gate
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:4100".parse().unwrap()
    }

    fn refused() -> Result<(), ProbeError> {
        Err(ProbeError::Unreachable("connection refused".to_string()))
    }

    #[tokio::test]
    async fn test_reaches_ready() {
        let probe = ScriptedProbe::default();
        let mut gate = serving_gate();

        assert_eq!(gate.run(&probe, addr()).await.unwrap(), 4100);
        let names: Vec<_> = gate.history().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "Starting",
                "Listening",
                "HealthChecking",
                "WarmingUp",
                "WarmingUp",
                "WarmingUp",
                "Ready"
            ]
        );
        assert_eq!(*probe.liveness_calls.lock(), 1);
        assert_eq!(*probe.warm_up_calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_health_check_exhaustion_reports_attempts() {
        let probe = ScriptedProbe::with(vec![refused(); 4], vec![]);
        let mut gate = serving_gate();

        let err = gate.run(&probe, addr()).await.unwrap_err();
        match err {
            StartupError::HealthCheckExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*probe.warm_up_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_slow_start_within_budget() {
        let probe = ScriptedProbe::with(vec![refused(), refused(), refused()], vec![]);
        let mut gate = serving_gate();

        assert!(gate.run(&probe, addr()).await.is_ok());
        assert_eq!(*probe.liveness_calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_target_never_answering_warm_up_is_tolerated() {
        let timeout = Err(ProbeError::Timeout(Duration::from_millis(10)));
        let probe = ScriptedProbe::with(vec![], vec![timeout.clone(), timeout.clone(), timeout]);
        let mut gate = serving_gate();

        assert_eq!(gate.run(&probe, addr()).await.unwrap(), 4100);
        assert_eq!(*probe.warm_up_calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_warm_up_total_failure() {
        let probe = ScriptedProbe::with(vec![], vec![refused(); 3]);
        let mut gate = serving_gate();

        let err = gate.run(&probe, addr()).await.unwrap_err();
        assert!(matches!(err, StartupError::WarmUpFailed { attempts: 3, .. }));
        assert_eq!(gate.state().name(), "Failed");
    }

    #[tokio::test]
    async fn test_run_before_serving_is_rejected() {
        let probe = ScriptedProbe::default();
        let mut gate = ReadinessGate::new(&config());

        let err = gate.run(&probe, addr()).await.unwrap_err();
        assert!(matches!(err, StartupError::InvalidTransition { .. }));
        assert_eq!(*probe.liveness_calls.lock(), 0);
    }

    #[test]
    fn test_invalid_event_keeps_state() {
        let mut gate = ReadinessGate::new(&config());
        assert!(gate.apply(ReadinessEvent::Serving).is_err());
        assert_eq!(gate.state(), &ReadinessState::Starting);
        assert_eq!(gate.history().len(), 1);
    }
}
