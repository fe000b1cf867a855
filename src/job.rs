use crate::api::Credentials;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Serialize)]
pub struct Account {
    pub id: String,
    pub label: String,
    #[serde(skip)]
    pub credentials: Credentials,
    pub created_at: DateTime<Utc>,
}

/// What a job replies to. Resolved once per run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JobTarget {
    Tweet(String),
    User(String),
    Keywords(Vec<String>),
    None,
}

impl JobTarget {
    /// Picks a target from loose fields: tweet id first, then username, then keywords.
    /// Blank values are ignored and a leading `@` is dropped from usernames.
    pub fn from_fields(
        tweet_id: Option<&str>,
        username: Option<&str>,
        keywords: &[String],
    ) -> Self {
        if let Some(id) = tweet_id.map(str::trim).filter(|s| !s.is_empty()) {
            return JobTarget::Tweet(id.to_string());
        }
        if let Some(name) = username
            .map(|s| s.trim().trim_start_matches('@'))
            .filter(|s| !s.is_empty())
        {
            return JobTarget::User(name.to_string());
        }
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if keywords.is_empty() {
            JobTarget::None
        } else {
            JobTarget::Keywords(keywords)
        }
    }

    pub fn tweet_id(&self) -> Option<&str> {
        match self {
            JobTarget::Tweet(id) => Some(id),
            _ => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            JobTarget::User(name) => Some(name),
            _ => None,
        }
    }

    pub fn keywords(&self) -> &[String] {
        match self {
            JobTarget::Keywords(k) => k.as_slice(),
            _ => &[],
        }
    }

    /// Context line handed to the reply generator.
    pub fn describe(&self) -> String {
        match self {
            JobTarget::Tweet(id) => format!("Replying to tweet {id}"),
            JobTarget::User(name) => format!("Replying to a recent tweet from @{name}"),
            JobTarget::Keywords(k) => format!("Replying to a tweet about: {}", k.join(", ")),
            JobTarget::None => "Replying to a tweet".to_string(),
        }
    }
}

/// Disjunctive recent-search query, e.g. `["foo", "bar"]` -> `foo OR bar`.
pub fn keyword_query(keywords: &[String]) -> String {
    keywords.join(" OR ")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Friendly,
    Humorous,
    Informative,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Friendly => "friendly",
            Tone::Humorous => "humorous",
            Tone::Informative => "informative",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Present on a job iff replies are AI-generated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiOptions {
    pub tone: Tone,
    pub include_hashtags: bool,
    pub include_emojis: bool,
    pub custom_instructions: Option<String>,
    pub model: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Active,
    Inactive,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplyJob {
    pub id: String,
    pub account_id: String,
    pub target: JobTarget,
    pub reply_text: String,
    pub ai: Option<AiOptions>,
    pub max_replies: u32,
    pub current_replies: u32,
    pub is_active: bool,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReplyJob {
    pub fn remaining_replies(&self) -> u32 {
        self.max_replies.saturating_sub(self.current_replies)
    }

    /// A job stops being runnable once stopped or once its quota is used up.
    pub fn state(&self) -> JobState {
        if self.is_active && self.current_replies < self.max_replies {
            JobState::Active
        } else {
            JobState::Inactive
        }
    }
}

/// Fields accepted when creating a job.
#[derive(Clone, Debug)]
pub struct NewJob {
    pub account_id: String,
    pub target: JobTarget,
    pub reply_text: String,
    pub ai: Option<AiOptions>,
    pub max_replies: u32,
}

impl NewJob {
    pub fn validate(&self) -> Result<()> {
        if self.max_replies == 0 {
            return Err(Error::Invalid("max_replies must be greater than zero".into()));
        }
        if self.target == JobTarget::None {
            return Err(Error::Invalid(
                "a job needs a target tweet id, a username or at least one keyword".into(),
            ));
        }
        if self.ai.is_none() && self.reply_text.trim().is_empty() {
            return Err(Error::Invalid(
                "reply_text is required when AI generation is off".into(),
            ));
        }
        Ok(())
    }
}

/// One attempted reply. Never modified after insertion.
#[derive(Clone, Debug, Serialize)]
pub struct ReplyRecord {
    pub id: i64,
    pub job_id: String,
    pub source_tweet_id: String,
    /// Empty when the attempt failed.
    pub reply_tweet_id: String,
    pub content: String,
    pub successful: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct JobStats {
    pub job: ReplyJob,
    pub total_replies: usize,
    pub successful_replies: usize,
    pub failed_replies: usize,
    pub success_rate: f64,
    pub remaining_replies: u32,
}

impl JobStats {
    pub fn new(job: ReplyJob, records: &[ReplyRecord]) -> Self {
        let total_replies = records.len();
        let successful_replies = records.iter().filter(|r| r.successful).count();
        let success_rate = if total_replies == 0 {
            0.0
        } else {
            successful_replies as f64 / total_replies as f64 * 100.0
        };
        Self {
            remaining_replies: job.remaining_replies(),
            job,
            total_replies,
            successful_replies,
            failed_replies: total_replies - successful_replies,
            success_rate,
        }
    }
}
