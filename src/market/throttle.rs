use crate::market::types::EmitPolicy;
use std::time::Instant;

/// Decides whether a mutation is worth a fresh snapshot.
#[derive(Debug)]
pub struct EmissionThrottle {
    policy: EmitPolicy,
    last_emit: Option<Instant>,
}

impl EmissionThrottle {
    pub fn new(policy: EmitPolicy) -> Self {
        Self {
            policy,
            last_emit: None,
        }
    }

    /// Returns `true` and records `now` when a snapshot should be emitted.
    pub fn allow(&mut self, now: Instant) -> bool {
        let allowed = match (self.policy, self.last_emit) {
            (_, None) => true,
            (EmitPolicy::EveryMutation, Some(_)) => true,
            (EmitPolicy::Throttled(interval), Some(last)) => {
                now.saturating_duration_since(last) >= interval
            }
        };

        if allowed {
            self.last_emit = Some(now);
        }
        allowed
    }
}
