//! Waiting for asynchronous remote operations to settle
//!
//! Remote APIs accept a change and then report progress through a status
//! field. `StateChangeConf` polls that field until it reaches a target value.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::provider::{ProviderError, ProviderResult};

/// Polling configuration for one wait
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// States that mean "still working, keep polling"
    pub pending: Vec<String>,
    /// States that mean "done"
    pub target: Vec<String>,
    /// Total budget for the wait
    pub timeout: Duration,
    /// Sleep before the first poll
    pub delay: Duration,
    /// Sleep between polls while pending
    pub poll_interval: Duration,
    cancel: Option<CancellationToken>,
}

impl StateChangeConf {
    pub fn new<P, T>(pending: P, target: T, timeout: Duration) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            cancel: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `refresh` until it reports a target state.
    ///
    /// Returns the target state that was observed. Fails with a timeout error
    /// when the budget runs out, and with a remote-operation error when a state
    /// outside both the pending and target sets is observed.
    pub async fn wait_for_state<F, Fut>(&self, mut refresh: F) -> ProviderResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<String>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_state: Option<String> = None;

        if !self.delay.is_zero() {
            self.sleep(self.delay).await?;
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let polled =
                tokio::time::timeout(remaining, cancellable(self.cancel.as_ref(), refresh())).await;
            let state = match polled {
                Ok(result) => result?,
                Err(_) => return Err(self.timeout_error(last_state.as_deref())),
            };

            if self.target.iter().any(|t| *t == state) {
                log::debug!("Reached target state {:?}", state);
                return Ok(state);
            }

            if !self.pending.iter().any(|p| *p == state) {
                return Err(ProviderError::remote(format!(
                    "unexpected state {:?}, wanted target {:?}",
                    state, self.target
                )));
            }

            log::debug!(
                "Waiting for {:?} (current state {:?}), next poll in {:?}",
                self.target,
                state,
                self.poll_interval
            );
            last_state = Some(state);

            if Instant::now() + self.poll_interval > deadline {
                return Err(self.timeout_error(last_state.as_deref()));
            }
            self.sleep(self.poll_interval).await?;
        }
    }

    async fn sleep(&self, duration: Duration) -> ProviderResult<()> {
        cancellable(self.cancel.as_ref(), async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    fn timeout_error(&self, last_state: Option<&str>) -> ProviderError {
        ProviderError::timeout(format!(
            "timeout while waiting for state to become {:?} (last state: {:?}, timeout: {:?})",
            self.target,
            last_state.unwrap_or(""),
            self.timeout
        ))
    }
}

/// Run `fut` unless `token` fires first, in which case a cancellation error is returned.
///
/// An already cancelled token wins even when `fut` would complete on its first poll.
pub async fn cancellable<T, Fut>(token: Option<&CancellationToken>, fut: Fut) -> ProviderResult<T>
where
    Fut: Future<Output = ProviderResult<T>>,
{
    match token {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ProviderError::cancelled("operation cancelled")),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorKind;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn scripted(states: &[&str]) -> Arc<Mutex<VecDeque<String>>> {
        Arc::new(Mutex::new(states.iter().map(|s| s.to_string()).collect()))
    }

    fn load_balancer_conf() -> StateChangeConf {
        StateChangeConf::new(["Accepted", "Updating"], ["Succeeded"], Duration::from_secs(600))
            .with_poll_interval(Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_waits() {
        let script = scripted(&["Accepted", "Updating", "Succeeded"]);
        let calls = Arc::new(Mutex::new(0usize));
        let start = Instant::now();

        let conf = load_balancer_conf();
        let state = conf
            .wait_for_state(|| {
                let script = Arc::clone(&script);
                let calls = Arc::clone(&calls);
                async move {
                    *calls.lock().unwrap() += 1;
                    Ok(script.lock().unwrap().pop_front().unwrap())
                }
            })
            .await
            .unwrap();

        assert_eq!(state, "Succeeded");
        assert_eq!(*calls.lock().unwrap(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_stuck_pending() {
        let conf =
            StateChangeConf::new(["Accepted", "Updating"], ["Succeeded"], Duration::from_secs(60))
                .with_poll_interval(Duration::from_secs(5));

        let err = conf
            .wait_for_state(|| async { Ok("Updating".to_string()) })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("Updating"));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_is_fatal() {
        let conf = load_balancer_conf();
        let err = conf
            .wait_for_state(|| async { Ok("Failed".to_string()) })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::RemoteOperation);
        assert!(err.message.contains("Failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_propagates() {
        let conf = load_balancer_conf();
        let err = conf
            .wait_for_state(|| async { Err(ProviderError::remote("boom")) })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::RemoteOperation);
        assert_eq!(err.message, "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_is_honoured() {
        let start = Instant::now();
        let conf = load_balancer_conf().with_delay(Duration::from_secs(3));

        conf.wait_for_state(|| async { Ok("Succeeded".to_string()) })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_polling() {
        let token = CancellationToken::new();
        let conf = load_balancer_conf().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            token.cancel();
        });

        let err = conf
            .wait_for_state(|| async { Ok("Updating".to_string()) })
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_future() {
        let token = CancellationToken::new();
        token.cancel();

        for _ in 0..100 {
            let polled = Arc::new(Mutex::new(false));
            let flag = Arc::clone(&polled);
            let err = cancellable(Some(&token), async move {
                *flag.lock().unwrap() = true;
                Ok::<_, ProviderError>(7)
            })
            .await
            .unwrap_err();

            assert!(err.is_cancelled());
            assert!(!*polled.lock().unwrap());
        }
    }

    #[tokio::test]
    async fn cancellable_passes_through_without_token() {
        let value = cancellable(None, async { Ok::<_, ProviderError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
