//! Runs one reply job: resolve candidates, drop the ones already handled,
//! then reply to each in turn with a fixed pause in between.

use crate::api::{MAX_TWEET_LENGTH, SocialPlatform, Tweet};
use crate::config::PacingConfig;
use crate::error::Result;
use crate::generate::{ReplyGenerator, ReplyRequest};
use crate::job::{JobState, JobTarget, ReplyJob, keyword_query};
use crate::store::Store;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const USER_TIMELINE_LIMIT: u32 = 5;
pub const SEARCH_LIMIT: u32 = 10;
const SEARCH_FIELDS: &[&str] = &["created_at", "author_id", "public_metrics"];
const MISSING_TEXT: &str = "Tweet content not available";

#[derive(Clone, Copy, Debug)]
pub struct Pacing {
    pub reply_delay: Duration,
    pub job_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        PacingConfig::default().into()
    }
}

impl From<PacingConfig> for Pacing {
    fn from(config: PacingConfig) -> Self {
        Self {
            reply_delay: config.reply_delay(),
            job_delay: config.job_delay(),
        }
    }
}

/// A tweet selected for a reply. Text is unknown for explicitly targeted ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub tweet_id: String,
    pub text: Option<String>,
}

impl From<Tweet> for Candidate {
    fn from(tweet: Tweet) -> Self {
        Self {
            tweet_id: tweet.id,
            text: Some(tweet.text),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Executes reply jobs on behalf of one account.
pub struct ReplyExecutor {
    store: Arc<Store>,
    platform: Arc<dyn SocialPlatform>,
    generator: Arc<dyn ReplyGenerator>,
    reply_delay: Duration,
}

impl ReplyExecutor {
    pub fn new(
        store: Arc<Store>,
        platform: Arc<dyn SocialPlatform>,
        generator: Arc<dyn ReplyGenerator>,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            platform,
            generator,
            reply_delay: pacing.reply_delay,
        }
    }

    /// Runs the job once. Never fails: job-level errors are logged and the
    /// summary reflects whatever was done before the error.
    pub async fn run_job(&self, job_id: &str) -> RunSummary {
        let mut summary = RunSummary::default();
        if let Err(e) = self.try_run_job(job_id, &mut summary).await {
            tracing::error!(job_id, error = %e, "reply job aborted");
        }
        summary
    }

    async fn try_run_job(&self, job_id: &str, summary: &mut RunSummary) -> Result<()> {
        let Some((job, account)) = self.store.load_job(job_id).await? else {
            tracing::debug!(job_id, "reply job not found, skipping");
            return Ok(());
        };
        if job.state() == JobState::Inactive {
            tracing::debug!(
                job_id,
                active = job.is_active,
                replies = job.current_replies,
                max = job.max_replies,
                "reply job not runnable, skipping"
            );
            return Ok(());
        }

        tracing::info!(job_id, account = %account.label, target = ?job.target, "running reply job");

        let candidates = self.resolve_candidates(&job.target).await?;
        let seen = self.store.recorded_source_ids(job_id).await?;
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| !seen.contains(&c.tweet_id))
            .take(job.remaining_replies() as usize)
            .collect();
        tracing::debug!(job_id, count = candidates.len(), "candidates after dedup");

        for (i, candidate) in candidates.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.reply_delay).await;
            }
            summary.attempted += 1;

            let (content, result) = match self.compose(&job, candidate).await {
                Ok(text) => {
                    let posted = self.platform.post_reply(&candidate.tweet_id, &text).await;
                    (text, posted)
                }
                Err(e) => (String::new(), Err(e)),
            };

            match result {
                Ok(posted) => {
                    let recorded = self
                        .store
                        .record_success(
                            job_id,
                            &candidate.tweet_id,
                            &posted.id,
                            &content,
                            Utc::now(),
                        )
                        .await;
                    match recorded {
                        Ok(counted) => {
                            if !counted {
                                tracing::warn!(
                                    job_id,
                                    "reply posted after quota was reached elsewhere"
                                );
                            }
                            summary.succeeded += 1;
                            tracing::info!(
                                job_id,
                                source = %candidate.tweet_id,
                                reply = %posted.id,
                                "reply posted"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                job_id,
                                source = %candidate.tweet_id,
                                reply = %posted.id,
                                error = %e,
                                "reply posted but not recorded"
                            );
                            let message =
                                format!("reply {} posted but not recorded: {e}", posted.id);
                            self.record_failed(job_id, candidate, &content, &message, summary)
                                .await;
                        }
                    }
                }
                Err(e) => {
                    self.record_failed(job_id, candidate, &content, &e.to_string(), summary)
                        .await;
                }
            }
        }

        self.store.touch_processed(job_id, Utc::now()).await?;
        tracing::info!(
            job_id,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "reply job finished"
        );
        Ok(())
    }

    /// Logs a failed attempt. A store error here is logged too, so one bad
    /// write never ends the run.
    async fn record_failed(
        &self,
        job_id: &str,
        candidate: &Candidate,
        content: &str,
        message: &str,
        summary: &mut RunSummary,
    ) {
        summary.failed += 1;
        tracing::warn!(job_id, source = %candidate.tweet_id, error = %message, "reply failed");
        if let Err(e) = self
            .store
            .record_failure(job_id, &candidate.tweet_id, content, message, Utc::now())
            .await
        {
            tracing::error!(
                job_id,
                source = %candidate.tweet_id,
                error = %e,
                "failed reply could not be recorded"
            );
        }
    }

    async fn resolve_candidates(&self, target: &JobTarget) -> Result<Vec<Candidate>> {
        let tweets = match target {
            JobTarget::Tweet(id) => {
                return Ok(vec![Candidate {
                    tweet_id: id.clone(),
                    text: None,
                }]);
            }
            JobTarget::User(username) => {
                self.platform
                    .user_recent_tweets(username, USER_TIMELINE_LIMIT)
                    .await?
            }
            JobTarget::Keywords(keywords) => {
                self.platform
                    .search_recent(&keyword_query(keywords), SEARCH_LIMIT, SEARCH_FIELDS)
                    .await?
            }
            JobTarget::None => Vec::new(),
        };
        Ok(tweets.into_iter().map(Candidate::from).collect())
    }

    /// Static text, or a generated reply when the job has AI options.
    async fn compose(&self, job: &ReplyJob, candidate: &Candidate) -> Result<String> {
        let Some(ai) = &job.ai else {
            return Ok(job.reply_text.clone());
        };
        let request = ReplyRequest {
            source_text: candidate
                .text
                .clone()
                .unwrap_or_else(|| MISSING_TEXT.to_string()),
            context: job.target.describe(),
            tone: ai.tone,
            max_length: MAX_TWEET_LENGTH,
            include_hashtags: ai.include_hashtags,
            include_emojis: ai.include_emojis,
            custom_instructions: ai.custom_instructions.clone(),
        };
        self.generator
            .generate_reply(&request, ai.model.as_deref())
            .await
    }
}
