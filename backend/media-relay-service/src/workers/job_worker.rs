use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::metrics;
use crate::services::calendar::QuotaCalendar;
use crate::services::job_queue::JobQueue;
use crate::services::pipeline::{DeliveryReceipt, MediaPipeline};
use crate::services::usage_counter::UsageCounterStore;
use media_core::Job;
use resilience::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Terminal result of one job as seen by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Delivered; `usage` is the counter after charging, `None` if charging failed
    Delivered {
        receipt: DeliveryReceipt,
        usage: Option<u64>,
    },
    Failed {
        kind: ErrorKind,
        requester_notified: bool,
    },
}

/// Waits between failed pops. `max_attempts` is how many consecutive
/// failures a worker tolerates before it stops.
pub fn default_pop_backoff() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_backoff: Duration::from_secs(2),
        max_backoff: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    }
}

/// Pops jobs and drives them through the pipeline, one at a time.
///
/// Failed jobs are reported to the requester and never retried.
pub struct JobWorker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<MediaPipeline>,
    counters: Arc<dyn UsageCounterStore>,
    calendar: QuotaCalendar,
    pop_timeout: Duration,
    pop_backoff: RetryConfig,
}

impl JobWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<MediaPipeline>,
        counters: Arc<dyn UsageCounterStore>,
        calendar: QuotaCalendar,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            pipeline,
            counters,
            calendar,
            pop_timeout,
            pop_backoff: default_pop_backoff(),
        }
    }

    pub fn with_pop_backoff(mut self, backoff: RetryConfig) -> Self {
        self.pop_backoff = backoff;
        self
    }

    /// Run until shutdown is signalled or the queue backend is lost.
    ///
    /// A connectivity error stops the worker at once. Other pop errors are
    /// waited out with backoff and stop the worker once they repeat
    /// `pop_backoff.max_attempts` times in a row.
    ///
    /// Shutdown is only observed between jobs, so an in-flight job always finishes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> ServiceResult<()> {
        info!(worker_id = self.id, "Job worker started");
        let mut pop_failures: u32 = 0;

        while !*shutdown.borrow() {
            let job = match self.queue.pop(self.pop_timeout).await {
                Ok(Some(job)) => {
                    pop_failures = 0;
                    job
                }
                Ok(None) => {
                    pop_failures = 0;
                    continue;
                }
                Err(e) if e.is_connectivity() => {
                    error!(worker_id = self.id, error = %e, "Queue backend lost, stopping worker");
                    return Err(e);
                }
                Err(e) => {
                    pop_failures += 1;
                    if pop_failures >= self.pop_backoff.max_attempts.max(1) {
                        error!(
                            worker_id = self.id,
                            failures = pop_failures,
                            error = %e,
                            "Queue keeps failing, stopping worker"
                        );
                        return Err(e);
                    }

                    let delay = self.pop_backoff.backoff_for(pop_failures - 1);
                    warn!(
                        worker_id = self.id,
                        failures = pop_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Queue pop failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            self.process(job).await;
        }

        info!(worker_id = self.id, "Job worker stopped");
        Ok(())
    }

    pub async fn process(&self, mut job: Job) -> JobOutcome {
        job.attempt_count += 1;
        info!(
            worker_id = self.id,
            job_id = %job.id,
            url = %job.url,
            attempt = job.attempt_count,
            "Processing job"
        );

        match self.pipeline.run(&job).await {
            Ok(receipt) => {
                let usage = self.charge(&job).await;
                metrics::record_job_outcome("delivered");
                info!(
                    worker_id = self.id,
                    job_id = %job.id,
                    format = receipt.format.as_str(),
                    size_bytes = receipt.size_bytes,
                    transformed = receipt.transformed,
                    usage,
                    "Job delivered"
                );
                JobOutcome::Delivered { receipt, usage }
            }
            Err(e) => {
                let kind = e.kind();
                metrics::record_job_outcome(kind.as_str());
                warn!(
                    worker_id = self.id,
                    job_id = %job.id,
                    kind = kind.as_str(),
                    error = %e,
                    "Job failed"
                );

                let requester_notified = match self
                    .pipeline
                    .delivery()
                    .notify(&job.conversation_identity, kind.user_message())
                    .await
                {
                    Ok(()) => true,
                    Err(notify_err) => {
                        error!(
                            job_id = %job.id,
                            error = %notify_err,
                            "Could not tell requester about failure"
                        );
                        false
                    }
                };
                JobOutcome::Failed {
                    kind,
                    requester_notified,
                }
            }
        }
    }

    /// Quota is charged only here, after a confirmed delivery.
    async fn charge(&self, job: &Job) -> Option<u64> {
        let day = self.calendar.today();
        match self
            .counters
            .increment_and_get(&job.requester_identity, day)
            .await
        {
            Ok(count) => {
                debug!(job_id = %job.id, requester = %job.requester_identity, count, "Usage recorded");
                Some(count)
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    requester = %job.requester_identity,
                    error = %e,
                    "Delivered but failed to record usage"
                );
                None
            }
        }
    }
}

/// Run every worker until shutdown. The first worker that fails ends the
/// pool with its error: the others are told to stop and are awaited, so a
/// job that is already in flight still gets delivered and charged.
pub async fn run_worker_pool(
    workers: Vec<JobWorker>,
    mut shutdown: watch::Receiver<bool>,
) -> ServiceResult<()> {
    let (stop_tx, stop_rx) = watch::channel(*shutdown.borrow());
    let mut set = JoinSet::new();
    for worker in workers {
        set.spawn(worker.run(stop_rx.clone()));
    }

    let mut first_error: Option<ServiceError> = None;
    let mut watching = true;
    loop {
        tokio::select! {
            joined = set.join_next() => {
                let Some(joined) = joined else { break };
                let failure = match joined {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e,
                    Err(join_err) => ServiceError::Internal(format!("worker task failed: {join_err}")),
                };

                if first_error.is_none() {
                    error!(error = %failure, remaining = set.len(), "Worker failed, stopping pool");
                    let _ = stop_tx.send(true);
                    first_error = Some(failure);
                } else {
                    warn!(error = %failure, "Another worker failed while the pool was stopping");
                }
            }
            changed = shutdown.changed(), if watching => {
                match changed {
                    Ok(()) => {
                        if *shutdown.borrow_and_update() {
                            let _ = stop_tx.send(true);
                        }
                    }
                    Err(_) => watching = false,
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
