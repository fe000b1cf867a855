use crate::job::Tone;
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobIdParams {
    #[schemars(description = "The reply job id")]
    pub job_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct RegisterAccountParams {
    #[schemars(description = "A name for this X account, e.g. its handle")]
    pub label: String,
    #[schemars(description = "OAuth 1.0a consumer key")]
    pub api_key: String,
    #[schemars(description = "OAuth 1.0a consumer secret")]
    pub api_key_secret: String,
    #[schemars(description = "OAuth 1.0a access token of the account")]
    pub access_token: String,
    #[schemars(description = "OAuth 1.0a access token secret of the account")]
    pub access_token_secret: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateJobParams {
    #[schemars(description = "Id of the registered account that posts the replies")]
    pub account_id: String,
    #[schemars(description = "Reply to this single tweet. Takes precedence over username and keywords.")]
    pub target_tweet_id: Option<String>,
    #[schemars(description = "Reply to recent tweets from this user (without @). Takes precedence over keywords.")]
    pub target_username: Option<String>,
    #[schemars(description = "Reply to recent tweets matching any of these keywords")]
    pub keywords: Option<Vec<String>>,
    #[schemars(description = "Static reply text (max 280 characters). Required unless use_ai is true.")]
    pub reply_text: Option<String>,
    #[schemars(description = "Generate each reply with AI instead of posting reply_text")]
    pub use_ai: Option<bool>,
    #[schemars(description = "Tone of AI replies: professional, casual, friendly, humorous or informative")]
    pub tone: Option<Tone>,
    #[schemars(description = "Let AI replies include hashtags")]
    pub include_hashtags: Option<bool>,
    #[schemars(description = "Let AI replies include emojis")]
    pub include_emojis: Option<bool>,
    #[schemars(description = "Extra instructions for the AI")]
    pub custom_instructions: Option<String>,
    #[schemars(description = "Model id for AI replies; the configured default is used when omitted")]
    pub ai_model: Option<String>,
    #[schemars(description = "Maximum number of successful replies for this job")]
    pub max_replies: u32,
}
