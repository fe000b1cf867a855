use crate::error::{Error, Result};
use crate::job::Account;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const API_BASE: &str = "https://api.x.com/2";

pub const MAX_TWEET_LENGTH: usize = 280;

/// RFC 3986 unreserved characters; everything else gets percent-encoded.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

type HmacSha1 = Hmac<sha1::Sha1>;

/// OAuth 1.0a user-context credentials of one X account.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_key_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***REDACTED***")
            .field("api_key_secret", &"***REDACTED***")
            .field("access_token", &"***REDACTED***")
            .field("access_token_secret", &"***REDACTED***")
            .finish()
    }
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("api_key", &self.api_key),
            ("api_key_secret", &self.api_key_secret),
            ("access_token", &self.access_token),
            ("access_token_secret", &self.access_token_secret),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::Invalid(format!("'{name}' is empty")));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedReply {
    pub id: String,
}

/// The subset of X API v2 the reply executor needs.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    async fn search_recent(
        &self,
        query: &str,
        max_results: u32,
        fields: &[&str],
    ) -> Result<Vec<Tweet>>;

    async fn user_recent_tweets(&self, username: &str, max_results: u32) -> Result<Vec<Tweet>>;

    async fn post_reply(&self, tweet_id: &str, text: &str) -> Result<PostedReply>;
}

/// Builds a platform client bound to one account's credentials.
pub trait Connector: Send + Sync {
    fn connect(&self, account: &Account) -> Result<Arc<dyn SocialPlatform>>;
}

pub struct XConnector;

impl Connector for XConnector {
    fn connect(&self, account: &Account) -> Result<Arc<dyn SocialPlatform>> {
        account.credentials.validate()?;
        Ok(Arc::new(XClient::new(account.credentials.clone())?))
    }
}

pub struct XClient {
    credentials: Credentials,
    http: Client,
}

#[derive(Serialize)]
struct TweetBody<'a> {
    text: &'a str,
    reply: TweetReply<'a>,
}

#[derive(Serialize)]
struct TweetReply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// List endpoints omit `data` entirely when nothing matched.
#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct IdData {
    id: String,
}

impl XClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Platform(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { credentials, http })
    }

    async fn get(&self, url: &str, query: &BTreeMap<String, String>) -> Result<Response> {
        let auth = self.oauth_header("GET", url, query);
        let full_url = if query.is_empty() {
            url.to_string()
        } else {
            format!("{url}?{}", encode_params(query))
        };

        let resp = self
            .http
            .get(full_url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| Error::Platform(format!("HTTP request failed: {e}")))?;
        self.check_response(resp).await
    }

    async fn check_response(&self, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.as_u16() == 401 {
            tracing::error!(
                "Received 401 Unauthorized from X API. \
                 The account's OAuth credentials may be revoked or invalid."
            );
        }
        if status.as_u16() == 429 {
            let reset = rate_limit_reset(&resp);
            return Err(Error::Platform(format!(
                "Rate limited (429). {reset}Try again later."
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Platform(format!("X API error ({status}): {body}")));
        }
        Ok(resp)
    }

    async fn lookup_user_id(&self, username: &str) -> Result<String> {
        let url = format!("{API_BASE}/users/by/username/{}", pct_encode(username));
        let resp = self.get(&url, &BTreeMap::new()).await?;
        let user: DataResponse<IdData> = resp
            .json()
            .await
            .map_err(|e| Error::Platform(format!("Failed to parse user lookup: {e}")))?;
        Ok(user.data.id)
    }

    // --- OAuth 1.0a ---

    fn oauth_header(
        &self,
        method: &str,
        url: &str,
        extra_params: &BTreeMap<String, String>,
    ) -> String {
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let nonce = {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill(&mut bytes);
            bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
        };

        let mut params = BTreeMap::new();
        params.insert("oauth_consumer_key".to_string(), self.credentials.api_key.clone());
        params.insert("oauth_nonce".to_string(), nonce);
        params.insert("oauth_signature_method".to_string(), "HMAC-SHA1".to_string());
        params.insert("oauth_timestamp".to_string(), timestamp);
        params.insert("oauth_token".to_string(), self.credentials.access_token.clone());
        params.insert("oauth_version".to_string(), "1.0".to_string());

        for (k, v) in extra_params {
            params.insert(k.clone(), v.clone());
        }

        let base_string = signature_base_string(method, url, &params);
        let signature = sign(
            &base_string,
            &self.credentials.api_key_secret,
            &self.credentials.access_token_secret,
        );
        params.insert("oauth_signature".to_string(), signature);

        let header_parts: Vec<String> = params
            .iter()
            .filter(|(k, _)| k.starts_with("oauth_"))
            .map(|(k, v)| format!("{}=\"{}\"", pct_encode(k), pct_encode(v)))
            .collect();

        format!("OAuth {}", header_parts.join(", "))
    }
}

#[async_trait]
impl SocialPlatform for XClient {
    async fn search_recent(
        &self,
        query: &str,
        max_results: u32,
        fields: &[&str],
    ) -> Result<Vec<Tweet>> {
        let url = format!("{API_BASE}/tweets/search/recent");
        let mut params = BTreeMap::new();
        params.insert("query".to_string(), query.to_string());
        params.insert("max_results".to_string(), max_results.to_string());
        if !fields.is_empty() {
            params.insert("tweet.fields".to_string(), fields.join(","));
        }

        let resp = self.get(&url, &params).await?;
        let list: ListResponse<Tweet> = resp
            .json()
            .await
            .map_err(|e| Error::Platform(format!("Failed to parse search response: {e}")))?;
        tracing::debug!(query, found = list.data.len(), "recent search");
        Ok(list.data)
    }

    async fn user_recent_tweets(&self, username: &str, max_results: u32) -> Result<Vec<Tweet>> {
        let user_id = self.lookup_user_id(username).await?;
        let url = format!("{API_BASE}/users/{user_id}/tweets");
        let mut params = BTreeMap::new();
        params.insert("max_results".to_string(), max_results.to_string());
        params.insert("tweet.fields".to_string(), "created_at,author_id".to_string());

        let resp = self.get(&url, &params).await?;
        let list: ListResponse<Tweet> = resp
            .json()
            .await
            .map_err(|e| Error::Platform(format!("Failed to parse timeline response: {e}")))?;
        tracing::debug!(username, found = list.data.len(), "user timeline");
        Ok(list.data)
    }

    async fn post_reply(&self, tweet_id: &str, text: &str) -> Result<PostedReply> {
        validate_tweet_text(text)?;

        let url = format!("{API_BASE}/tweets");
        let body = TweetBody {
            text,
            reply: TweetReply {
                in_reply_to_tweet_id: tweet_id,
            },
        };

        let auth = self.oauth_header("POST", &url, &BTreeMap::new());
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Platform(format!("HTTP request failed: {e}")))?;
        let resp = self.check_response(resp).await?;

        let tweet: DataResponse<IdData> = resp
            .json()
            .await
            .map_err(|e| Error::Platform(format!("Failed to parse tweet response: {e}")))?;
        Ok(PostedReply { id: tweet.data.id })
    }
}

fn validate_tweet_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::Platform("Reply text cannot be empty".into()));
    }
    let len = text.chars().count();
    if len > MAX_TWEET_LENGTH {
        return Err(Error::Platform(format!(
            "Reply text is {len} characters (max {MAX_TWEET_LENGTH})"
        )));
    }
    Ok(())
}

fn rate_limit_reset(resp: &Response) -> String {
    resp.headers()
        .get("x-rate-limit-reset")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("Rate limit resets at timestamp {v}. "))
        .unwrap_or_default()
}

fn encode_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", pct_encode(k), pct_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn signature_base_string(method: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        pct_encode(url),
        pct_encode(&encode_params(params))
    )
}

fn sign(base_string: &str, consumer_secret: &str, token_secret: &str) -> String {
    let signing_key = format!("{}&{}", pct_encode(consumer_secret), pct_encode(token_secret));
    let mut mac =
        HmacSha1::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(base_string.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn pct_encode(input: &str) -> String {
    utf8_percent_encode(input, RFC3986).to_string()
}
