//! AI reply text generation over the Anthropic Messages API.

use crate::error::{Error, Result};
use crate::job::Tone;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 300;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyRequest {
    pub source_text: String,
    pub context: String,
    pub tone: Tone,
    pub max_length: usize,
    pub include_hashtags: bool,
    pub include_emojis: bool,
    pub custom_instructions: Option<String>,
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `model` overrides the generator's default model when set.
    async fn generate_reply(&self, request: &ReplyRequest, model: Option<&str>) -> Result<String>;
}

pub struct AnthropicGenerator {
    http: Client,
    api_key: Option<String>,
    default_model: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicGenerator {
    /// Without an API key every generation fails, which only matters for AI-enabled jobs.
    pub fn new(api_key: Option<String>, default_model: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Generation(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

#[async_trait]
impl ReplyGenerator for AnthropicGenerator {
    async fn generate_reply(&self, request: &ReplyRequest, model: Option<&str>) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            Error::Generation(
                "no AI API key configured (set [ai].api_key or ANTHROPIC_API_KEY)".into(),
            )
        })?;
        let model = model.unwrap_or(&self.default_model);
        let (system, user) = build_prompt(request);

        let body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let resp = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("HTTP request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("API error ({status}): {text}")));
        }

        let message: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| Error::Generation(format!("Failed to parse response: {e}")))?;
        let text: String = message
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        let reply = clean_reply(&text, request.max_length);
        if reply.is_empty() {
            return Err(Error::Generation("model returned an empty reply".into()));
        }
        tracing::debug!(model, chars = reply.chars().count(), "generated reply");
        Ok(reply)
    }
}

/// System and user prompts for one reply.
fn build_prompt(request: &ReplyRequest) -> (String, String) {
    let mut rules = vec![
        format!("Write in a {} tone.", request.tone),
        format!(
            "Keep the reply under {} characters, including spaces.",
            request.max_length
        ),
    ];
    rules.push(if request.include_hashtags {
        "Include one or two relevant hashtags.".to_string()
    } else {
        "Do not use hashtags.".to_string()
    });
    rules.push(if request.include_emojis {
        "Use an emoji where it fits naturally.".to_string()
    } else {
        "Do not use emojis.".to_string()
    });
    if let Some(extra) = request
        .custom_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        rules.push(extra.to_string());
    }

    let system = format!(
        "You write replies to posts on X (Twitter). Respond with the reply text only, \
         no quotes or preamble.\n- {}",
        rules.join("\n- ")
    );
    let user = format!(
        "Context: {}\n\nPost:\n{}\n\nWrite the reply.",
        request.context, request.source_text
    );
    (system, user)
}

/// Trims whitespace and wrapping quotes, then cuts to `max_length` characters.
fn clean_reply(raw: &str, max_length: usize) -> String {
    let mut text = raw.trim();
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    text.chars().take(max_length).collect::<String>().trim_end().to_string()
}
