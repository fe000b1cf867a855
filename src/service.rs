//! Administrative operations and the batch runner over all active jobs.

use crate::api::{Connector, Credentials};
use crate::error::{Error, Result};
use crate::executor::{Pacing, ReplyExecutor, RunSummary};
use crate::generate::ReplyGenerator;
use crate::job::{Account, JobStats, NewJob, ReplyJob, ReplyRecord};
use crate::store::Store;
use serde::Serialize;
use std::sync::Arc;

/// Jobs at or above this many replies are left out of batch runs.
pub const BATCH_REPLY_CEILING: u32 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub jobs_seen: usize,
    pub jobs_run: usize,
    pub jobs_failed: usize,
}

pub struct ReplyJobService {
    store: Arc<Store>,
    generator: Arc<dyn ReplyGenerator>,
    connector: Arc<dyn Connector>,
    pacing: Pacing,
}

impl ReplyJobService {
    pub fn new(
        store: Arc<Store>,
        generator: Arc<dyn ReplyGenerator>,
        connector: Arc<dyn Connector>,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            generator,
            connector,
            pacing,
        }
    }

    /// A fresh executor bound to the account's credentials.
    fn executor_for(&self, account: &Account) -> Result<ReplyExecutor> {
        let platform = self.connector.connect(account)?;
        Ok(ReplyExecutor::new(
            self.store.clone(),
            platform,
            self.generator.clone(),
            self.pacing,
        ))
    }

    async fn require_job(&self, job_id: &str) -> Result<ReplyJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    async fn require_account(&self, account_id: &str) -> Result<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| Error::account_not_found(account_id))
    }

    pub async fn register_account(&self, label: &str, credentials: Credentials) -> Result<Account> {
        if label.trim().is_empty() {
            return Err(Error::Invalid("account label cannot be empty".into()));
        }
        credentials.validate()?;
        let account = self.store.insert_account(label.trim(), credentials).await?;
        tracing::info!(account_id = %account.id, label = %account.label, "account registered");
        Ok(account)
    }

    pub async fn create_job(&self, new: NewJob) -> Result<ReplyJob> {
        new.validate()?;
        self.require_account(&new.account_id).await?;
        let job = self.store.insert_job(new).await?;
        tracing::info!(
            job_id = %job.id,
            target = ?job.target,
            max = job.max_replies,
            "reply job created"
        );
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Result<Vec<ReplyJob>> {
        self.store.list_jobs().await
    }

    /// Runs the job once, now.
    pub async fn start_job(&self, job_id: &str) -> Result<RunSummary> {
        let job = self.require_job(job_id).await?;
        let account = self.require_account(&job.account_id).await?;
        let executor = self.executor_for(&account)?;
        Ok(executor.run_job(job_id).await)
    }

    /// Deactivates the job. A run already in progress is not interrupted.
    pub async fn stop_job(&self, job_id: &str) -> Result<()> {
        if !self.store.set_active(job_id, false).await? {
            return Err(Error::job_not_found(job_id));
        }
        tracing::info!(job_id, "reply job stopped");
        Ok(())
    }

    pub async fn activate_job(&self, job_id: &str) -> Result<()> {
        if !self.store.set_active(job_id, true).await? {
            return Err(Error::job_not_found(job_id));
        }
        tracing::info!(job_id, "reply job activated");
        Ok(())
    }

    pub async fn get_job_stats(&self, job_id: &str) -> Result<JobStats> {
        let job = self.require_job(job_id).await?;
        let records = self.store.replies(job_id).await?;
        Ok(JobStats::new(job, &records))
    }

    pub async fn job_replies(&self, job_id: &str) -> Result<Vec<ReplyRecord>> {
        self.require_job(job_id).await?;
        self.store.replies(job_id).await
    }

    /// Runs every active job under the batch ceiling, one after another.
    /// A job that cannot be started is logged and skipped.
    pub async fn run_all_active_jobs(&self) -> Result<BatchSummary> {
        let jobs = self.store.list_active_jobs(BATCH_REPLY_CEILING).await?;
        let mut summary = BatchSummary {
            jobs_seen: jobs.len(),
            ..Default::default()
        };
        tracing::info!(count = jobs.len(), "running active reply jobs");

        for (i, job) in jobs.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing.job_delay).await;
            }
            match self.run_one(job).await {
                Ok(run) => {
                    summary.jobs_run += 1;
                    tracing::debug!(job_id = %job.id, ?run, "batch job done");
                }
                Err(e) => {
                    summary.jobs_failed += 1;
                    tracing::error!(job_id = %job.id, error = %e, "batch job failed");
                }
            }
        }
        Ok(summary)
    }

    async fn run_one(&self, job: &ReplyJob) -> Result<RunSummary> {
        let account = self.require_account(&job.account_id).await?;
        let executor = self.executor_for(&account)?;
        Ok(executor.run_job(&job.id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobTarget;
    use crate::testing::{FakeConnector, FakeGenerator, FakePlatform, credentials, new_job, tweet};
    use chrono::Utc;
    use std::time::Duration;

    fn no_delay() -> Pacing {
        Pacing {
            reply_delay: Duration::ZERO,
            job_delay: Duration::ZERO,
        }
    }

    fn service_with(
        platform: FakePlatform,
        pacing: Pacing,
    ) -> (ReplyJobService, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::new(Arc::new(platform)));
        let service = ReplyJobService::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(FakeGenerator::default()),
            connector.clone(),
            pacing,
        );
        (service, connector)
    }

    #[tokio::test]
    async fn start_and_stats_fail_for_missing_job() {
        let (service, _) = service_with(FakePlatform::default(), no_delay());
        assert!(matches!(
            service.start_job("ghost").await,
            Err(Error::NotFound { kind: "reply job", .. })
        ));
        assert!(matches!(
            service.get_job_stats("ghost").await,
            Err(Error::NotFound { .. })
        ));
        assert!(service.stop_job("ghost").await.is_err());
    }

    #[tokio::test]
    async fn start_job_runs_once() {
        let (service, connector) = service_with(FakePlatform::default(), no_delay());
        let account = service.register_account("main", credentials()).await.unwrap();
        let job = service
            .create_job(new_job(&account.id, JobTarget::Tweet("T1".into()), 2))
            .await
            .unwrap();

        let run = service.start_job(&job.id).await.unwrap();

        assert_eq!(run.succeeded, 1);
        assert_eq!(connector.platform.posted_to(), vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn stopped_job_no_longer_runs() {
        let (service, connector) = service_with(
            FakePlatform {
                timeline: vec![tweet("t1", "one"), tweet("t2", "two")],
                ..Default::default()
            },
            no_delay(),
        );
        let account = service.register_account("main", credentials()).await.unwrap();
        let job = service
            .create_job(new_job(&account.id, JobTarget::User("alice".into()), 5))
            .await
            .unwrap();

        service.stop_job(&job.id).await.unwrap();
        let stats = service.get_job_stats(&job.id).await.unwrap();
        assert!(!stats.job.is_active);

        let run = service.start_job(&job.id).await.unwrap();
        assert_eq!(run, RunSummary::default());
        assert!(connector.platform.calls().is_empty());

        service.activate_job(&job.id).await.unwrap();
        assert_eq!(service.start_job(&job.id).await.unwrap().succeeded, 2);
    }

    #[tokio::test]
    async fn stats_report_success_rate() {
        let (service, _) = service_with(FakePlatform::default(), no_delay());
        let account = service.register_account("main", credentials()).await.unwrap();
        let job = service
            .create_job(new_job(&account.id, JobTarget::User("alice".into()), 10))
            .await
            .unwrap();
        let store = &service.store;
        for i in 0..3 {
            store
                .record_success(&job.id, &format!("s{i}"), &format!("r{i}"), "hi", Utc::now())
                .await
                .unwrap();
        }
        store
            .record_failure(&job.id, "s9", "hi", "boom", Utc::now())
            .await
            .unwrap();

        let stats = service.get_job_stats(&job.id).await.unwrap();

        assert_eq!(stats.total_replies, 4);
        assert_eq!(stats.successful_replies, 3);
        assert_eq!(stats.failed_replies, 1);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.remaining_replies, 7);
        assert_eq!(service.job_replies(&job.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn create_job_rejects_unknown_account_and_bad_input() {
        let (service, _) = service_with(FakePlatform::default(), no_delay());
        assert!(matches!(
            service
                .create_job(new_job("nobody", JobTarget::Tweet("1".into()), 1))
                .await,
            Err(Error::NotFound { kind: "account", .. })
        ));

        let account = service.register_account("main", credentials()).await.unwrap();
        assert!(matches!(
            service
                .create_job(new_job(&account.id, JobTarget::None, 1))
                .await,
            Err(Error::Invalid(_))
        ));

        let mut bad = credentials();
        bad.api_key = " ".into();
        assert!(service.register_account("other", bad).await.is_err());
    }

    #[tokio::test]
    async fn batch_skips_inactive_and_capped_jobs() {
        let (service, connector) = service_with(FakePlatform::default(), no_delay());
        let account = service.register_account("main", credentials()).await.unwrap();
        let runnable = service
            .create_job(new_job(&account.id, JobTarget::Tweet("A".into()), 20))
            .await
            .unwrap();
        let stopped = service
            .create_job(new_job(&account.id, JobTarget::Tweet("B".into()), 20))
            .await
            .unwrap();
        let capped = service
            .create_job(new_job(&account.id, JobTarget::Tweet("C".into()), 20))
            .await
            .unwrap();
        service.stop_job(&stopped.id).await.unwrap();
        for i in 0..BATCH_REPLY_CEILING {
            service
                .store
                .record_success(&capped.id, &format!("s{i}"), &format!("r{i}"), "hi", Utc::now())
                .await
                .unwrap();
        }

        let summary = service.run_all_active_jobs().await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                jobs_seen: 1,
                jobs_run: 1,
                jobs_failed: 0
            }
        );
        assert_eq!(connector.platform.posted_to(), vec!["A".to_string()]);
        assert_eq!(
            service.get_job_stats(&runnable.id).await.unwrap().job.current_replies,
            1
        );
    }

    #[tokio::test]
    async fn batch_continues_after_a_failing_job() {
        let platform = FakePlatform::default();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let broken = store.insert_account("broken", credentials()).await.unwrap();
        let healthy = store.insert_account("healthy", credentials()).await.unwrap();
        store
            .insert_job(new_job(&broken.id, JobTarget::Tweet("X1".into()), 3))
            .await
            .unwrap();
        store
            .insert_job(new_job(&healthy.id, JobTarget::Tweet("X2".into()), 3))
            .await
            .unwrap();

        let mut connector = FakeConnector::new(Arc::new(platform));
        connector.broken_accounts.insert(broken.id.clone());
        let connector = Arc::new(connector);
        let service = ReplyJobService::new(
            store,
            Arc::new(FakeGenerator::default()),
            connector.clone(),
            no_delay(),
        );

        let summary = service.run_all_active_jobs().await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                jobs_seen: 2,
                jobs_run: 1,
                jobs_failed: 1
            }
        );
        assert_eq!(connector.platform.posted_to(), vec!["X2".to_string()]);
        assert_eq!(connector.connected.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_pauses_between_jobs() {
        let (service, _) = service_with(FakePlatform::default(), Pacing::default());
        let account = service.register_account("main", credentials()).await.unwrap();
        for id in ["A", "B", "C"] {
            service
                .create_job(new_job(&account.id, JobTarget::Tweet(id.into()), 5))
                .await
                .unwrap();
        }

        let start = tokio::time::Instant::now();
        let summary = service.run_all_active_jobs().await.unwrap();

        assert_eq!(summary.jobs_run, 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    }
}
