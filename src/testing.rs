//! Recording fakes for the platform and generator seams.

use crate::api::{Connector, Credentials, PostedReply, SocialPlatform, Tweet};
use crate::error::{Error, Result};
use crate::generate::{ReplyGenerator, ReplyRequest};
use crate::job::{Account, JobTarget, NewJob};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub fn credentials() -> Credentials {
    Credentials {
        api_key: "key".into(),
        api_key_secret: "key-secret".into(),
        access_token: "token".into(),
        access_token_secret: "token-secret".into(),
    }
}

pub fn new_job(account_id: &str, target: JobTarget, max_replies: u32) -> NewJob {
    NewJob {
        account_id: account_id.to_string(),
        target,
        reply_text: "Thanks for sharing!".into(),
        ai: None,
        max_replies,
    }
}

pub fn tweet(id: &str, text: &str) -> Tweet {
    Tweet {
        id: id.to_string(),
        text: text.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Search {
        query: String,
        max_results: u32,
        fields: Vec<String>,
    },
    Timeline {
        username: String,
        max_results: u32,
    },
    Post {
        tweet_id: String,
        text: String,
    },
}

#[derive(Default)]
pub struct FakePlatform {
    pub search_results: Vec<Tweet>,
    pub timeline: Vec<Tweet>,
    pub fail_search: bool,
    pub fail_posts_for: HashSet<String>,
    pub calls: Mutex<Vec<Call>>,
}

impl FakePlatform {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posted_to(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Post { tweet_id, .. } => Some(tweet_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SocialPlatform for FakePlatform {
    async fn search_recent(
        &self,
        query: &str,
        max_results: u32,
        fields: &[&str],
    ) -> Result<Vec<Tweet>> {
        self.calls.lock().unwrap().push(Call::Search {
            query: query.to_string(),
            max_results,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        if self.fail_search {
            return Err(Error::Platform("X API error (503 Service Unavailable): ".into()));
        }
        Ok(self.search_results.iter().take(max_results as usize).cloned().collect())
    }

    async fn user_recent_tweets(&self, username: &str, max_results: u32) -> Result<Vec<Tweet>> {
        self.calls.lock().unwrap().push(Call::Timeline {
            username: username.to_string(),
            max_results,
        });
        Ok(self.timeline.iter().take(max_results as usize).cloned().collect())
    }

    async fn post_reply(&self, tweet_id: &str, text: &str) -> Result<PostedReply> {
        self.calls.lock().unwrap().push(Call::Post {
            tweet_id: tweet_id.to_string(),
            text: text.to_string(),
        });
        if self.fail_posts_for.contains(tweet_id) {
            return Err(Error::Platform("Rate limited (429). Try again later.".into()));
        }
        Ok(PostedReply {
            id: format!("reply-{tweet_id}"),
        })
    }
}

#[derive(Default)]
pub struct FakeGenerator {
    pub fail: bool,
    pub requests: Mutex<Vec<(ReplyRequest, Option<String>)>>,
}

impl FakeGenerator {
    pub fn requests(&self) -> Vec<(ReplyRequest, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for FakeGenerator {
    async fn generate_reply(&self, request: &ReplyRequest, model: Option<&str>) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), model.map(String::from)));
        if self.fail {
            return Err(Error::Generation("model overloaded".into()));
        }
        Ok(format!("AI reply to: {}", request.source_text))
    }
}

/// Hands out the same fake platform for every account, except those listed as broken.
pub struct FakeConnector {
    pub platform: Arc<FakePlatform>,
    pub broken_accounts: HashSet<String>,
    pub connected: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(platform: Arc<FakePlatform>) -> Self {
        Self {
            platform,
            broken_accounts: HashSet::new(),
            connected: Mutex::new(Vec::new()),
        }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, account: &Account) -> Result<Arc<dyn SocialPlatform>> {
        self.connected.lock().unwrap().push(account.id.clone());
        if self.broken_accounts.contains(&account.id) {
            return Err(Error::Invalid("'access_token' is empty".into()));
        }
        Ok(self.platform.clone())
    }
}
