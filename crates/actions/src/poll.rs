//! Fixed-cadence polling for wait-style leaf actions.
//!
//! Distinct from retry: the probe runs every `interval_ms` until it reports
//! true or `timeout_ms` of wall clock (measured from the start of the
//! invocation) has elapsed. A timeout is a definitive, non-retryable
//! failure; cancellation aborts the poll and surfaces as an interrupt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ActionError;

/// Cadence and deadline for a polled wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between consecutive probes, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Wall-clock budget for the whole wait, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    250
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Run `probe` on the policy's cadence until it reports true.
///
/// `what` names the awaited condition in the timeout message. The probe is
/// always run at least once, immediately.
pub async fn poll_until<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut probe: F,
) -> Result<(), ActionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ActionError>>,
{
    let started = Instant::now();
    let timeout = Duration::from_millis(policy.timeout_ms);
    let interval = Duration::from_millis(policy.interval_ms);

    loop {
        if cancel.is_cancelled() {
            return Err(ActionError::Interrupted);
        }

        if probe().await? {
            return Ok(());
        }

        if started.elapsed() >= timeout {
            return Err(ActionError::Fatal(format!(
                "{what}: condition not met within {}ms",
                policy.timeout_ms
            )));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ActionError::Interrupted),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(interval_ms: u64, timeout_ms: u64) -> PollPolicy {
        PollPolicy {
            interval_ms,
            timeout_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_the_probe_turns_true() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = poll_until(&policy(100, 5_000), &cancel, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 3) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_fatal_failure() {
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let result = poll_until(&policy(100, 450), &cancel, "wait for element", || async {
            Ok(false)
        })
        .await;

        match result {
            Err(ActionError::Fatal(msg)) => assert!(msg.contains("450ms")),
            other => panic!("expected fatal timeout, got {other:?}"),
        }
        // The deadline is honoured on the probe after it passes.
        assert!(started.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_poll() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = poll_until(&policy(100, 5_000), &cancel, "test", || async { Ok(false) })
            .await;

        assert!(matches!(result, Err(ActionError::Interrupted)));
    }
}
