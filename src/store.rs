//! SQLite persistence for accounts, reply jobs and the append-only reply log.
//!
//! A single connection sits behind an async mutex; every method holds the lock
//! only for the duration of its own statements.

use crate::api::Credentials;
use crate::error::Result;
use crate::job::{Account, AiOptions, JobTarget, NewJob, ReplyJob, ReplyRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::Mutex;

const JOB_COLUMNS: &str = "id, account_id, target_tweet_id, target_username, keywords, \
     reply_text, ai_options, max_replies, current_replies, is_active, last_processed_at, \
     created_at";

const RECORD_COLUMNS: &str = "id, job_id, source_tweet_id, reply_tweet_id, content, \
     successful, error_message, created_at";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                api_key TEXT NOT NULL,
                api_key_secret TEXT NOT NULL,
                access_token TEXT NOT NULL,
                access_token_secret TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reply_jobs (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                target_tweet_id TEXT,
                target_username TEXT,
                keywords TEXT NOT NULL DEFAULT '[]',
                reply_text TEXT NOT NULL,
                ai_options TEXT,
                max_replies INTEGER NOT NULL,
                current_replies INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_processed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_active ON reply_jobs(is_active, current_replies);

            CREATE TABLE IF NOT EXISTS reply_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES reply_jobs(id),
                source_tweet_id TEXT NOT NULL,
                reply_tweet_id TEXT NOT NULL,
                content TEXT NOT NULL,
                successful INTEGER NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_job ON reply_records(job_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- accounts ---

    pub async fn insert_account(&self, label: &str, credentials: Credentials) -> Result<Account> {
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            credentials,
            created_at: Utc::now(),
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO accounts (id, label, api_key, api_key_secret, access_token, \
             access_token_secret, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.id,
                account.label,
                account.credentials.api_key,
                account.credentials.api_key_secret,
                account.credentials.access_token,
                account.credentials.access_token_secret,
                account.created_at,
            ],
        )?;
        Ok(account)
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().await;
        let account = conn
            .query_row(
                "SELECT id, label, api_key, api_key_secret, access_token, access_token_secret, \
                 created_at FROM accounts WHERE id = ?1",
                [id],
                |row| {
                    Ok(Account {
                        id: row.get(0)?,
                        label: row.get(1)?,
                        credentials: Credentials {
                            api_key: row.get(2)?,
                            api_key_secret: row.get(3)?,
                            access_token: row.get(4)?,
                            access_token_secret: row.get(5)?,
                        },
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    // --- jobs ---

    pub async fn insert_job(&self, new: NewJob) -> Result<ReplyJob> {
        let job = ReplyJob {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: new.account_id,
            target: new.target,
            reply_text: new.reply_text,
            ai: new.ai,
            max_replies: new.max_replies,
            current_replies: 0,
            is_active: true,
            last_processed_at: None,
            created_at: Utc::now(),
        };
        let keywords = serde_json::to_string(job.target.keywords())?;
        let ai_options = job.ai.as_ref().map(serde_json::to_string).transpose()?;

        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO reply_jobs ({JOB_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                job.id,
                job.account_id,
                job.target.tweet_id(),
                job.target.username(),
                keywords,
                job.reply_text,
                ai_options,
                job.max_replies,
                job.current_replies,
                job.is_active,
                job.last_processed_at,
                job.created_at,
            ],
        )?;
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<ReplyJob>> {
        let conn = self.conn.lock().await;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM reply_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// The job joined with its owning account.
    pub async fn load_job(&self, id: &str) -> Result<Option<(ReplyJob, Account)>> {
        let Some(job) = self.get_job(id).await? else {
            return Ok(None);
        };
        let account = self.get_account(&job.account_id).await?;
        Ok(account.map(|account| (job, account)))
    }

    pub async fn list_jobs(&self) -> Result<Vec<ReplyJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM reply_jobs ORDER BY created_at, rowid"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Active jobs whose reply count is below `ceiling`.
    pub async fn list_active_jobs(&self, ceiling: u32) -> Result<Vec<ReplyJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM reply_jobs \
             WHERE is_active = 1 AND current_replies < ?1 ORDER BY created_at, rowid"
        ))?;
        let jobs = stmt
            .query_map([ceiling], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Returns false when no such job exists.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE reply_jobs SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(changed > 0)
    }

    pub async fn touch_processed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE reply_jobs SET last_processed_at = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    }

    // --- reply records ---

    /// Source tweet ids of every recorded attempt for the job.
    pub async fn recorded_source_ids(&self, job_id: &str) -> Result<HashSet<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT source_tweet_id FROM reply_records WHERE job_id = ?1")?;
        let ids = stmt
            .query_map([job_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    /// Appends a successful record and bumps the job's counter in one transaction.
    ///
    /// The increment is conditional on the quota, so overlapping runs can never
    /// push `current_replies` past `max_replies`. Returns whether it was counted.
    ///
    /// An uncounted reply was still posted, so its record is stored as successful
    /// anyway. In that case the job's successful records outnumber the counter
    /// delta, while `current_replies` stays equal to `max_replies`.
    pub async fn record_success(
        &self,
        job_id: &str,
        source_tweet_id: &str,
        reply_tweet_id: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO reply_records (job_id, source_tweet_id, reply_tweet_id, content, \
             successful, error_message, created_at) VALUES (?1, ?2, ?3, ?4, 1, NULL, ?5)",
            params![job_id, source_tweet_id, reply_tweet_id, content, at],
        )?;
        let counted = tx.execute(
            "UPDATE reply_jobs SET current_replies = current_replies + 1, last_processed_at = ?2 \
             WHERE id = ?1 AND current_replies < max_replies",
            params![job_id, at],
        )?;
        tx.commit()?;
        Ok(counted > 0)
    }

    #[cfg(test)]
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().await.execute_batch(sql)?;
        Ok(())
    }

    pub async fn record_failure(
        &self,
        job_id: &str,
        source_tweet_id: &str,
        content: &str,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reply_records (job_id, source_tweet_id, reply_tweet_id, content, \
             successful, error_message, created_at) VALUES (?1, ?2, '', ?3, 0, ?4, ?5)",
            params![job_id, source_tweet_id, content, error_message, at],
        )?;
        Ok(())
    }

    /// All records for the job, newest first.
    pub async fn replies(&self, job_id: &str) -> Result<Vec<ReplyRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM reply_records WHERE job_id = ?1 ORDER BY id DESC"
        ))?;
        let records = stmt
            .query_map([job_id], |row| {
                Ok(ReplyRecord {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    source_tweet_id: row.get(2)?,
                    reply_tweet_id: row.get(3)?,
                    content: row.get(4)?,
                    successful: row.get(5)?,
                    error_message: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ReplyJob> {
    let tweet_id: Option<String> = row.get(2)?;
    let username: Option<String> = row.get(3)?;
    let keywords: Vec<String> = json_column(row, 4)?;
    let ai_raw: Option<String> = row.get(6)?;
    let ai = match ai_raw {
        Some(raw) => Some(
            serde_json::from_str::<AiOptions>(&raw)
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
                })?,
        ),
        None => None,
    };

    Ok(ReplyJob {
        id: row.get(0)?,
        account_id: row.get(1)?,
        target: JobTarget::from_fields(tweet_id.as_deref(), username.as_deref(), &keywords),
        reply_text: row.get(5)?,
        ai,
        max_replies: row.get(7)?,
        current_replies: row.get(8)?,
        is_active: row.get(9)?,
        last_processed_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Tone;
    use crate::testing::{credentials, new_job};

    async fn store_with_job(max_replies: u32) -> (Store, ReplyJob) {
        let store = Store::open_in_memory().unwrap();
        let account = store.insert_account("main", credentials()).await.unwrap();
        let job = store
            .insert_job(new_job(&account.id, JobTarget::User("alice".into()), max_replies))
            .await
            .unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn job_round_trips_through_columns() {
        let store = Store::open_in_memory().unwrap();
        let account = store.insert_account("main", credentials()).await.unwrap();
        let mut new = new_job(
            &account.id,
            JobTarget::Keywords(vec!["rust".into(), "tokio".into()]),
            4,
        );
        new.ai = Some(AiOptions {
            tone: Tone::Humorous,
            include_hashtags: true,
            include_emojis: false,
            custom_instructions: Some("be brief".into()),
            model: None,
        });
        let created = store.insert_job(new).await.unwrap();

        let (job, owner) = store.load_job(&created.id).await.unwrap().unwrap();
        assert_eq!(owner.id, account.id);
        assert_eq!(owner.credentials.access_token, "token");
        assert_eq!(job.target, JobTarget::Keywords(vec!["rust".into(), "tokio".into()]));
        assert_eq!(job.ai.unwrap().tone, Tone::Humorous);
        assert_eq!(job.max_replies, 4);
        assert_eq!(job.current_replies, 0);
        assert!(job.is_active);
        assert!(job.last_processed_at.is_none());
    }

    #[tokio::test]
    async fn missing_job_loads_as_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_job("nope").await.unwrap().is_none());
        assert!(store.load_job("nope").await.unwrap().is_none());
        assert!(!store.set_active("nope", false).await.unwrap());
    }

    #[tokio::test]
    async fn success_increment_never_exceeds_quota() {
        let (store, job) = store_with_job(1).await;
        let now = Utc::now();

        assert!(store.record_success(&job.id, "t1", "r1", "hi", now).await.unwrap());
        assert!(!store.record_success(&job.id, "t2", "r2", "hi", now).await.unwrap());

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.current_replies, 1);
        assert_eq!(job.last_processed_at.map(|t| t.timestamp()), Some(now.timestamp()));
        let records = store.replies(&job.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.successful));
    }

    #[tokio::test]
    async fn failures_are_recorded_without_counting() {
        let (store, job) = store_with_job(3).await;
        store
            .record_failure(&job.id, "t1", "hi", "Rate limited (429).", Utc::now())
            .await
            .unwrap();

        let records = store.replies(&job.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].successful);
        assert_eq!(records[0].reply_tweet_id, "");
        assert_eq!(records[0].error_message.as_deref(), Some("Rate limited (429)."));
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().current_replies, 0);

        let seen = store.recorded_source_ids(&job.id).await.unwrap();
        assert!(seen.contains("t1"));
    }

    #[tokio::test]
    async fn active_listing_respects_flag_and_ceiling() {
        let store = Store::open_in_memory().unwrap();
        let account = store.insert_account("main", credentials()).await.unwrap();
        let a = store
            .insert_job(new_job(&account.id, JobTarget::Tweet("1".into()), 20))
            .await
            .unwrap();
        let b = store
            .insert_job(new_job(&account.id, JobTarget::Tweet("2".into()), 20))
            .await
            .unwrap();
        let c = store
            .insert_job(new_job(&account.id, JobTarget::Tweet("3".into()), 20))
            .await
            .unwrap();

        store.set_active(&b.id, false).await.unwrap();
        for i in 0..2 {
            store
                .record_success(&c.id, &format!("s{i}"), &format!("r{i}"), "hi", Utc::now())
                .await
                .unwrap();
        }

        let ids: Vec<String> = store
            .list_active_jobs(2)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![a.id.clone()]);
        assert_eq!(store.list_jobs().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn replies_are_newest_first() {
        let (store, job) = store_with_job(5).await;
        store.record_success(&job.id, "t1", "r1", "one", Utc::now()).await.unwrap();
        store.record_success(&job.id, "t2", "r2", "two", Utc::now()).await.unwrap();

        let records = store.replies(&job.id).await.unwrap();
        assert_eq!(records[0].source_tweet_id, "t2");
        assert_eq!(records[1].source_tweet_id, "t1");
    }
}
