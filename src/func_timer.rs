use log::{debug, warn};
use std::time::Duration;
use tokio::time::Instant;

/// Logs how long a scope took when it is dropped.
///
/// Scopes slower than the optional budget are reported at warn level.
pub struct FunctionTimer {
    name: &'static str,
    start: Instant,
    budget: Option<Duration>,
}

impl FunctionTimer {
    pub fn new(name: &'static str) -> Self {
        FunctionTimer {
            name,
            start: Instant::now(),
            budget: None,
        }
    }

    pub fn with_budget(name: &'static str, budget: Duration) -> Self {
        FunctionTimer {
            budget: Some(budget),
            ..Self::new(name)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for FunctionTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        match self.budget {
            Some(budget) if duration > budget => {
                warn!("'{}' took {:.2}s (budget {:.2}s)", self.name, duration.as_secs_f32(), budget.as_secs_f32())
            }
            _ => debug!("'{}' took {:?}", self.name, duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_follows_clock() {
        let timer = FunctionTimer::with_budget("tick", Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(timer.elapsed(), Duration::from_millis(1500));
    }
}
