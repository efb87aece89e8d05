//! Deciding whether an advertisement should trigger a connection attempt.

use crate::types::HostState;

/// Device-specific polling predicate
pub trait PollPolicy: Send + Sync {
    /// Whether the device wants to be polled, given the time since the last poll
    fn poll_needed(&self, seconds_since_last_poll: Option<f64>) -> bool;
}

/// The cuff is always polled; pacing comes from the session cycle itself
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPoll;

impl PollPolicy for AlwaysPoll {
    fn poll_needed(&self, _seconds_since_last_poll: Option<f64>) -> bool {
        true
    }
}

impl<P: PollPolicy + ?Sized> PollPolicy for Box<P> {
    fn poll_needed(&self, seconds_since_last_poll: Option<f64>) -> bool {
        (**self).poll_needed(seconds_since_last_poll)
    }
}

/// Evaluated once per advertisement observation
#[derive(Debug, Clone, Copy, Default)]
pub struct PollScheduler<P = AlwaysPoll> {
    policy: P,
}

impl<P: PollPolicy> PollScheduler<P> {
    /// Create a scheduler around a polling policy
    #[must_use]
    pub const fn new(policy: P) -> Self {
        Self { policy }
    }

    /// A connection attempt is warranted only when the host is running,
    /// the policy wants a poll and a connectable path to the device exists
    #[must_use]
    pub fn poll_warranted(
        &self,
        host_state: HostState,
        seconds_since_last_poll: Option<f64>,
        connectable: bool,
    ) -> bool {
        host_state == HostState::Running
            && self.policy.poll_needed(seconds_since_last_poll)
            && connectable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverPoll;

    impl PollPolicy for NeverPoll {
        fn poll_needed(&self, _seconds_since_last_poll: Option<f64>) -> bool {
            false
        }
    }

    #[test]
    fn test_all_conditions_required() {
        let scheduler = PollScheduler::new(AlwaysPoll);

        assert!(scheduler.poll_warranted(HostState::Running, None, true));
        assert!(scheduler.poll_warranted(HostState::Running, Some(3.5), true));
        assert!(!scheduler.poll_warranted(HostState::Starting, None, true));
        assert!(!scheduler.poll_warranted(HostState::Stopping, None, true));
        assert!(!scheduler.poll_warranted(HostState::Running, None, false));
    }

    #[test]
    fn test_policy_can_veto() {
        let scheduler = PollScheduler::new(NeverPoll);
        assert!(!scheduler.poll_warranted(HostState::Running, None, true));
    }

    #[test]
    fn test_boxed_policy() {
        let scheduler: PollScheduler<Box<dyn PollPolicy>> = PollScheduler::new(Box::new(NeverPoll));
        assert!(!scheduler.poll_warranted(HostState::Running, None, true));

        let scheduler: PollScheduler<Box<dyn PollPolicy>> = PollScheduler::new(Box::new(AlwaysPoll));
        assert!(scheduler.poll_warranted(HostState::Running, Some(0.5), true));
    }
}
