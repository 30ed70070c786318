use std::ops::Mul;
use std::time::Duration;

use rand::Rng;

const JITTER_RANGE: f32 = 0.5;

/// Retransmission pacing for a flight: starts at the configured RTO, doubles
/// per retry with a ±0.25 s jitter, and gives up after a bounded number of
/// attempts.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            jitter: Self::jitter(),
            left: retries,
        }
    }

    /// Restart for a new flight.
    pub fn reset(&mut self) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter();
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            self.rto.saturating_sub(Duration::from_secs_f32(self.jitter.abs()))
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(Duration::from_millis(50))
    }

    fn jitter() -> f32 {
        rand::thread_rng().gen::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self) {
        let (n, overflow) = self.left.overflowing_sub(1);
        if overflow {
            return;
        }
        self.left = n;
        self.jitter = Self::jitter();
        self.rto = self.rto.mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_spent() {
        let mut exp = ExponentialBackoff::new(Duration::from_secs(1), 2);
        let first = exp.rto();
        assert!(exp.can_retry());

        exp.attempt();
        let second = exp.rto();
        assert!(second > first);
        assert!(exp.can_retry());

        exp.attempt();
        assert!(!exp.can_retry());

        // Further attempts are a no-op.
        let spent = exp.rto();
        exp.attempt();
        assert_eq!(exp.rto(), spent);
    }

    #[test]
    fn reset_restores_retries() {
        let mut exp = ExponentialBackoff::new(Duration::from_secs(1), 1);
        exp.attempt();
        assert!(!exp.can_retry());
        exp.reset();
        assert!(exp.can_retry());
    }
}
