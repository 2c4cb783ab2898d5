//! Worker loop that claims and runs queued liberation jobs.

use crate::config::LiberationConfig;
use crate::error::Result;
use crate::notify::Notifier;
use crate::pipeline::LiberationPipeline;
use crate::store::DataStore;
use std::sync::Arc;
use tokio::time::sleep;

pub struct LiberationWorker {
    store: Arc<dyn DataStore>,
    notifier: Arc<dyn Notifier>,
    config: LiberationConfig,
}

impl LiberationWorker {
    pub fn new(
        store: Arc<dyn DataStore>,
        notifier: Arc<dyn Notifier>,
        config: LiberationConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Run the worker loop forever.
    pub async fn run(self) -> ! {
        log::info!("liberation worker started");

        loop {
            match self.run_once().await {
                Ok(true) => {} // processed a job, poll again immediately
                Ok(false) => sleep(self.config.poll_interval).await,
                Err(err) => {
                    log::error!("worker: failed to poll for jobs: {}", err);
                    sleep(self.config.error_backoff).await;
                }
            }
        }
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    ///
    /// A failed pipeline still counts as a processed claim: the status row is
    /// deliberately left `running = true` with no completion stamp so
    /// operators can spot the stuck job.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.store.claim_next_job().await? else {
            return Ok(false);
        };

        log::info!(
            "worker: claimed liberation job {} for account {}",
            job.handle,
            job.account_id
        );

        let pipeline = LiberationPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            self.config.clone(),
        );

        match pipeline.run(job.account_id, job.request).await {
            Ok(report) => {
                log::info!(
                    "account {}: liberation complete - {} inbox(es), {} message(s), {} failure(s)",
                    job.account_id,
                    report.inboxes,
                    report.messages_exported,
                    report.failures.len()
                );
            }
            Err(err) => {
                log::error!("account {}: liberation failed: {}", job.account_id, err);
            }
        }

        Ok(true)
    }
}
