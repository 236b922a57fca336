use std::time::Duration;

use crate::transport::CloseFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Clean shutdown; the session is done and stays down.
    Finished,
    /// Schedule attempt `attempt` of `max` after `delay`.
    Reconnect {
        attempt: u32,
        max: u32,
        delay: Duration,
    },
    /// Retry budget spent.
    Exhausted { attempts: u32 },
}

/// Per-session retry bookkeeping.
///
/// `attempts` counts consecutive abnormal closures since the last
/// successful open and is reset by every open. Each session has its own
/// supervisor, so one flaky session cannot spend another's budget.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    state: SupervisorState,
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectSupervisor {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            state: SupervisorState::Connecting,
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_failed(&self) -> bool {
        self.state == SupervisorState::Failed
    }

    pub fn on_open(&mut self) {
        self.state = SupervisorState::Open;
        self.attempts = 0;
    }

    pub fn on_close(&mut self, frame: &CloseFrame) -> CloseDecision {
        if self.state == SupervisorState::Failed {
            return CloseDecision::Finished;
        }
        if frame.is_normal() {
            self.state = SupervisorState::Failed;
            return CloseDecision::Finished;
        }
        if self.attempts < self.max_attempts {
            self.state = SupervisorState::Reconnecting;
            CloseDecision::Reconnect {
                attempt: self.attempts + 1,
                max: self.max_attempts,
                delay: self.delay,
            }
        } else {
            self.state = SupervisorState::Failed;
            CloseDecision::Exhausted {
                attempts: self.attempts,
            }
        }
    }

    /// The backoff delay elapsed. Returns the attempt number now starting,
    /// or `None` if the supervisor is not waiting to reconnect.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.state != SupervisorState::Reconnecting {
            return None;
        }
        self.attempts += 1;
        self.state = SupervisorState::Connecting;
        Some(self.attempts)
    }

    /// Stop supervising; nothing will be reopened.
    pub fn fail(&mut self) {
        self.state = SupervisorState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CloseCode;

    fn dropped() -> CloseFrame {
        CloseFrame::new(CloseCode::ABNORMAL, "reset")
    }

    #[test]
    fn abnormal_close_schedules_reconnect() {
        let mut supervisor = ReconnectSupervisor::new(3, Duration::from_secs(3));
        supervisor.on_open();
        let decision = supervisor.on_close(&dropped());
        assert_eq!(
            decision,
            CloseDecision::Reconnect {
                attempt: 1,
                max: 3,
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(supervisor.state(), SupervisorState::Reconnecting);
        assert_eq!(supervisor.begin_attempt(), Some(1));
        assert_eq!(supervisor.state(), SupervisorState::Connecting);

        supervisor.on_open();
        assert_eq!(supervisor.attempts(), 0);
    }

    #[test]
    fn normal_close_never_reconnects() {
        let mut supervisor = ReconnectSupervisor::new(3, Duration::ZERO);
        supervisor.on_open();
        supervisor.on_close(&dropped());
        supervisor.begin_attempt();
        assert_eq!(
            supervisor.on_close(&CloseFrame::normal("bye")),
            CloseDecision::Finished
        );
        assert!(supervisor.is_failed());
        assert_eq!(supervisor.begin_attempt(), None);
    }

    #[test]
    fn budget_is_bounded_by_max_attempts() {
        let mut supervisor = ReconnectSupervisor::new(3, Duration::ZERO);
        let mut attempts = 0;
        for _ in 0..10 {
            match supervisor.on_close(&dropped()) {
                CloseDecision::Reconnect { .. } => {
                    supervisor.begin_attempt();
                    attempts += 1;
                }
                CloseDecision::Exhausted { attempts: spent } => {
                    assert_eq!(spent, 3);
                    break;
                }
                CloseDecision::Finished => panic!("abnormal close treated as clean"),
            }
        }
        assert_eq!(attempts, 3);
        assert!(supervisor.is_failed());
    }

    #[test]
    fn zero_budget_fails_immediately() {
        let mut supervisor = ReconnectSupervisor::new(0, Duration::ZERO);
        supervisor.on_open();
        assert_eq!(
            supervisor.on_close(&dropped()),
            CloseDecision::Exhausted { attempts: 0 }
        );
    }
}
