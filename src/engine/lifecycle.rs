//! Lifecycle state machine and the context-resume protocol
//!
//! The resume protocol is an explicit bounded loop over an injectable clock,
//! so backoff timing is deterministic under test without real timers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::audio::backend::AudioContext;
use crate::constants::{MAX_RESUME_ATTEMPTS, RESUME_BASE_DELAY_MS};

/// Engine lifecycle states.
///
/// `Idle -> Acquiring -> Running -> Suspended -> ... -> Stopping -> Idle`,
/// with `Failed` terminal and reachable from `Acquiring` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Acquiring,
    Running,
    Suspended,
    Stopping,
    Failed,
}

/// Page/tab visibility as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Sleep source for the resume backoff, injectable for deterministic tests
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Clock backed by the tokio timer
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Bounded counter of consecutive failed resume attempts.
///
/// Resets on success; reaching the maximum means automatic recovery is over
/// and a user gesture is required.
#[derive(Debug)]
pub struct ResumeAttempts {
    count: u32,
    max: u32,
}

impl Default for ResumeAttempts {
    fn default() -> Self {
        Self {
            count: 0,
            max: MAX_RESUME_ATTEMPTS,
        }
    }
}

impl ResumeAttempts {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.max
    }

    /// Backoff delay before the next attempt: `100ms * 2^count`
    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(RESUME_BASE_DELAY_MS << self.count)
    }

    pub fn record_failure(&mut self) {
        self.count = (self.count + 1).min(self.max);
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Outcome of the resume protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The context is running again; the attempt counter was reset
    Resumed,
    /// All retries failed; the platform now requires a user gesture
    NeedsUserGesture,
}

/// Runs the bounded exponential-backoff resume protocol against a suspended
/// context. Each attempt waits `100ms * 2^n`, then calls `resume()`; success
/// resets the counter, exhaustion reports [`ResumeOutcome::NeedsUserGesture`]
/// without further automatic retries.
pub async fn resume_with_backoff(
    context: &mut dyn AudioContext,
    attempts: &mut ResumeAttempts,
    clock: &dyn Clock,
    mut on_attempt: impl FnMut(u32),
) -> ResumeOutcome {
    while !attempts.is_exhausted() {
        clock.sleep(attempts.next_delay()).await;
        on_attempt(attempts.count() + 1);

        match context.resume() {
            Ok(()) => {
                attempts.reset();
                return ResumeOutcome::Resumed;
            }
            Err(e) => {
                attempts.record_failure();
                tracing::debug!(
                    "resume attempt {} failed: {}",
                    attempts.count(),
                    e
                );
            }
        }
    }
    ResumeOutcome::NeedsUserGesture
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;
    use crate::audio::backend::mock::MockBackend;
    use crate::audio::backend::{CaptureBackend, CaptureConstraints, ContextState};
    use crate::graph::shared_chain;

    fn open_mock(backend: &MockBackend) -> Box<dyn AudioContext> {
        backend
            .open(None, &CaptureConstraints::default(), shared_chain(48000))
            .unwrap()
    }

    #[test]
    fn test_backoff_schedule() {
        let mut attempts = ResumeAttempts::default();
        let mut delays = Vec::new();
        while !attempts.is_exhausted() {
            delays.push(attempts.next_delay().as_millis() as u64);
            attempts.record_failure();
        }
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn test_counter_reset() {
        let mut attempts = ResumeAttempts::default();
        attempts.record_failure();
        attempts.record_failure();
        assert_eq!(attempts.count(), 2);
        attempts.reset();
        assert_eq!(attempts.count(), 0);
        assert_eq!(attempts.next_delay().as_millis(), 100);
    }

    #[tokio::test]
    async fn test_resume_exhaustion_after_five_retries() {
        let backend = MockBackend::new();
        // More failures scripted than the bound allows
        backend.script_resumes(&[false, false, false, false, false, false]);
        let mut context = open_mock(&backend);
        backend.last_probe().unwrap().force_suspend();

        let clock = ManualClock::default();
        let mut attempts = ResumeAttempts::default();
        let outcome =
            resume_with_backoff(context.as_mut(), &mut attempts, &clock, |_| {}).await;

        assert_eq!(outcome, ResumeOutcome::NeedsUserGesture);
        // Exactly 5 retries with the doubling schedule
        assert_eq!(clock.sleeps_ms(), vec![100, 200, 400, 800, 1600]);
        let probe = backend.last_probe().unwrap();
        assert_eq!(
            probe.resume_calls.load(std::sync::atomic::Ordering::SeqCst),
            5
        );
        // Counter stays exhausted; only an intervening success resets it
        assert!(attempts.is_exhausted());
    }

    #[tokio::test]
    async fn test_resume_success_resets_counter() {
        let backend = MockBackend::new();
        backend.script_resumes(&[false, false, true]);
        let mut context = open_mock(&backend);
        backend.last_probe().unwrap().force_suspend();

        let clock = ManualClock::default();
        let mut attempts = ResumeAttempts::default();
        let outcome =
            resume_with_backoff(context.as_mut(), &mut attempts, &clock, |_| {}).await;

        assert_eq!(outcome, ResumeOutcome::Resumed);
        assert_eq!(attempts.count(), 0);
        assert_eq!(clock.sleeps_ms(), vec![100, 200, 400]);
        assert_eq!(context.state(), ContextState::Running);
    }

    #[tokio::test]
    async fn test_resume_reports_attempt_numbers() {
        let backend = MockBackend::new();
        backend.script_resumes(&[false, true]);
        let mut context = open_mock(&backend);

        let clock = ManualClock::default();
        let mut attempts = ResumeAttempts::default();
        let mut seen = Vec::new();
        resume_with_backoff(context.as_mut(), &mut attempts, &clock, |n| seen.push(n)).await;
        assert_eq!(seen, vec![1, 2]);
    }
}
