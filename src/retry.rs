/*
 *  retry.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::{error, info, warn};
use std::future::Future;
use std::time::Duration;

use crate::transport::TransportFault;

/// Bounded, linearly backed-off retries.
///
/// Attempt `n` (1-based) that fails waits `base_delay * n`, plus
/// `socket_penalty` when the fault smells of the socket layer. Nothing after
/// the last attempt, and nothing escapes: exhaustion is just `None`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub socket_penalty: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(3),
            socket_penalty: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32, fault: &TransportFault) -> Duration {
        let mut delay = self.base_delay * attempt;
        if fault.is_socket_related() {
            delay += self.socket_penalty;
        }
        delay
    }

    pub async fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportFault>>,
    {
        let max = self.max_attempts.max(1);
        for attempt in 1..=max {
            match op().await {
                Ok(value) => return Some(value),
                Err(fault) => {
                    warn!("{} failed (attempt {}/{}): {}", label, attempt, max, fault);
                    if attempt < max {
                        let delay = self.delay_for(attempt, &fault);
                        info!("Retrying {} in {:.1}s...", label, delay.as_secs_f32());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        error!("{} gave up after {} attempts", label, max);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[test]
    fn test_linear_delay_with_socket_penalty() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1, &TransportFault::ProtocolError("HTTP 500".into())), Duration::from_secs(3));
        assert_eq!(policy.delay_for(2, &TransportFault::ProtocolError("HTTP 500".into())), Duration::from_secs(6));
        assert_eq!(policy.delay_for(1, &TransportFault::Timeout), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2, &TransportFault::ConnectionError("reset".into())), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_none_after_max_attempts() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let out: Option<()> = policy
            .with_retry("metadata", || {
                calls.set(calls.get() + 1);
                async { Err(TransportFault::Timeout) }
            })
            .await;

        assert!(out.is_none());
        assert_eq!(calls.get(), 3);
        // (3+2) + (6+2), no sleep after the last attempt
        assert_eq!(start.elapsed(), Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let out = policy
            .with_retry("artwork", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n == 1 { Err(TransportFault::ProtocolError("HTTP 503".into())) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(out, Some(2));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        let calls = Cell::new(0u32);
        let out = policy
            .with_retry("head", || {
                calls.set(calls.get() + 1);
                async { Ok::<_, TransportFault>("ok") }
            })
            .await;
        assert_eq!(out, Some("ok"));
        assert_eq!(calls.get(), 1);
    }
}
