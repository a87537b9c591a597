use std::time::{Duration, Instant};

/// Failure threshold and cooldown shared by every backend in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_fails: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Healthy,
    Down { retry_at: Instant },
}

/// What the caller should do with a backend it was just handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Send,
    Probe,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    consecutive_failures: u32,
    status: Status,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            consecutive_failures: 0,
            status: Status::Healthy,
        }
    }

    pub fn is_down(&self) -> bool {
        matches!(self.status, Status::Down { .. })
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Instant from which a down backend may be probed again.
    pub fn retry_at(&self) -> Option<Instant> {
        match self.status {
            Status::Healthy => None,
            Status::Down { retry_at } => Some(retry_at),
        }
    }

    pub fn verdict(&self, now: Instant) -> Verdict {
        match self.status {
            Status::Healthy => Verdict::Send,
            Status::Down { retry_at } if now < retry_at => Verdict::Skip,
            Status::Down { .. } => Verdict::Probe,
        }
    }

    /// Only a recovering backend is reset. A healthy backend keeps any
    /// partial failure count it has accumulated.
    pub fn record_success(&mut self) -> Option<HealthTransition> {
        match self.status {
            Status::Healthy => None,
            Status::Down { .. } => {
                self.consecutive_failures = 0;
                self.status = Status::Healthy;
                Some(HealthTransition::BecameHealthy)
            }
        }
    }

    /// A failed probe bumps the count but leaves `retry_at` where it was, so
    /// the backend stays probeable once its first cooldown has run out.
    pub fn record_failure(
        &mut self,
        now: Instant,
        policy: &HealthPolicy,
    ) -> Option<HealthTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.status {
            Status::Down { .. } => None,
            Status::Healthy if self.consecutive_failures >= policy.max_fails => {
                self.status = Status::Down {
                    retry_at: now + policy.cooldown,
                };
                Some(HealthTransition::BecameUnhealthy)
            }
            Status::Healthy => None,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health entries addressed by the index handed out at registration.
pub struct HealthTable {
    policy: HealthPolicy,
    states: Vec<HealthState>,
}

impl HealthTable {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            states: Vec::new(),
        }
    }

    /// Appends a fresh healthy entry and returns its index.
    pub fn push(&mut self) -> usize {
        self.states.push(HealthState::new());
        self.states.len() - 1
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<HealthState> {
        self.states.get(index).copied()
    }

    pub fn verdict(&self, index: usize, now: Instant) -> Option<Verdict> {
        self.states.get(index).map(|state| state.verdict(now))
    }

    pub fn mark_success(&mut self, index: usize) -> Option<HealthTransition> {
        self.states.get_mut(index)?.record_success()
    }

    pub fn mark_failure(&mut self, index: usize, now: Instant) -> Option<HealthTransition> {
        let policy = self.policy;
        self.states.get_mut(index)?.record_failure(now, &policy)
    }
}
