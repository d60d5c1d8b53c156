//! Synthetic load against a scheduler
//!
//! Floods the scheduler with fake provider calls and records when each one
//! actually started, which makes the concurrency and rate limits visible.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{FetchError, SchedulerError};
use crate::priority::Priority;
use crate::scheduler::{QueueState, ScheduleOptions, Scheduler, saturating_millis};

/// Shape of a synthetic flood
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    /// Key prefix, i.e. the provider (e.g. `BITUNIX`)
    pub key_prefix: String,
    pub requests: usize,
    /// Time each fake call takes
    pub latency: Duration,
    /// Probability (0.0 - 1.0) that an attempt fails with a retryable 503
    pub fail_rate: f64,
    pub priority: Priority,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            key_prefix: "BITUNIX".to_string(),
            requests: 20,
            latency: Duration::from_millis(50),
            fail_rate: 0.0,
            priority: Priority::NORMAL,
        }
    }
}

/// What happened to one simulated request
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub key: String,
    /// Offset from the start of the run at which each attempt began
    pub attempts_ms: Vec<u64>,
    pub outcome: String,
}

/// Result of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub requests: Vec<RequestRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
    pub elapsed_ms: u64,
    pub final_state: QueueState,
}

impl SimulationReport {
    /// Number of attempts that started at or before `offset`
    pub fn started_by(&self, offset: Duration) -> usize {
        let limit = saturating_millis(offset);
        self.requests
            .iter()
            .flat_map(|r| r.attempts_ms.iter())
            .filter(|ms| **ms <= limit)
            .count()
    }
}

/// Run `plan` against `scheduler` and wait for every admitted request
pub async fn run(scheduler: &Scheduler, plan: &SimulationPlan) -> SimulationReport {
    debug!(?plan, "simulate::run: called");
    let start = Instant::now();
    let mut records = Vec::with_capacity(plan.requests);
    let mut pending = Vec::new();
    let mut rejected = 0;

    for i in 0..plan.requests {
        let key = format!("{}:SIM:{}", plan.key_prefix, i);
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let latency = plan.latency;
        let fail_rate = plan.fail_rate.clamp(0.0, 1.0);

        let work = {
            let attempts = attempts.clone();
            move || {
                let attempts = attempts.clone();
                async move {
                    attempts
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .push(saturating_millis(start.elapsed()));
                    tokio::time::sleep(latency).await;
                    if fail_rate > 0.0 && rand::rng().random_bool(fail_rate) {
                        return Err(FetchError::Http {
                            status: 503,
                            message: "simulated outage".to_string(),
                        });
                    }
                    Ok(saturating_millis(latency))
                }
            }
        };

        match scheduler.submit(&key, work, ScheduleOptions::priority(plan.priority.clone()).without_cache()) {
            Ok(handle) => pending.push((key, attempts, handle)),
            Err(e) => {
                debug!(%key, error = %e, "simulate::run: rejected");
                rejected += 1;
                records.push(RequestRecord {
                    key,
                    attempts_ms: Vec::new(),
                    outcome: e.to_string(),
                });
            }
        }
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for (key, attempts, handle) in pending {
        let result: Result<u64, SchedulerError> = handle.await;
        let outcome = match result {
            Ok(_) => {
                succeeded += 1;
                "ok".to_string()
            }
            Err(e) => {
                failed += 1;
                e.to_string()
            }
        };
        let attempts_ms = attempts.lock().unwrap_or_else(|p| p.into_inner()).clone();
        records.push(RequestRecord {
            key,
            attempts_ms,
            outcome,
        });
    }

    records.sort_by_key(|r| r.attempts_ms.first().copied().unwrap_or(u64::MAX));

    SimulationReport {
        requests: records,
        succeeded,
        failed,
        rejected,
        elapsed_ms: saturating_millis(start.elapsed()),
        final_state: scheduler.queue_state(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::limiter::{PrefixClassifier, ProviderConfig};
    use crate::scheduler::SchedulerConfig;

    #[tokio::test(start_paused = true)]
    async fn test_simulation_respects_rate() {
        let classifier = PrefixClassifier::new(&[ProviderConfig::new("BITUNIX", 10.0)]).unwrap();
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(classifier)).unwrap();
        let plan = SimulationPlan {
            requests: 20,
            latency: Duration::ZERO,
            ..Default::default()
        };

        let report = run(&scheduler, &plan).await;

        assert_eq!(report.succeeded, 20);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.started_by(Duration::ZERO), 10);
        assert!(report.elapsed_ms >= 1000);
        assert_eq!(report.final_state.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_counts_rejections() {
        let config = SchedulerConfig {
            max_concurrent: 1,
            max_queue_size: 2,
            ..Default::default()
        };
        let scheduler = Scheduler::unthrottled(config).unwrap();
        let plan = SimulationPlan {
            key_prefix: "OTHER".to_string(),
            requests: 5,
            latency: Duration::from_millis(10),
            ..Default::default()
        };

        let report = run(&scheduler, &plan).await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.requests.len(), 5);
    }
}
