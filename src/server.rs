use crate::api::Credentials;
use crate::error::Error;
use crate::job::{AiOptions, JobTarget, NewJob};
use crate::params::{CreateJobParams, JobIdParams, RegisterAccountParams};
use crate::service::ReplyJobService;
use rmcp::{
    ErrorData as McpError, ServerHandler, handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters, model::*, tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReplyJobServer {
    service: Arc<ReplyJobService>,
    tool_router: ToolRouter<Self>,
}

impl ReplyJobServer {
    fn respond<T: Serialize>(result: Result<T, Error>) -> Result<CallToolResult, McpError> {
        match result {
            Ok(value) => match serde_json::to_string_pretty(&value) {
                Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
                Err(e) => Err(McpError::internal_error(e.to_string(), None)),
            },
            Err(Error::Invalid(msg)) => Err(McpError::invalid_params(msg, None)),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    fn new_job(params: CreateJobParams) -> NewJob {
        let keywords = params.keywords.unwrap_or_default();
        let ai = params.use_ai.unwrap_or(false).then(|| AiOptions {
            tone: params.tone.unwrap_or_default(),
            include_hashtags: params.include_hashtags.unwrap_or(false),
            include_emojis: params.include_emojis.unwrap_or(false),
            custom_instructions: params.custom_instructions,
            model: params.ai_model,
        });
        NewJob {
            account_id: params.account_id,
            target: JobTarget::from_fields(
                params.target_tweet_id.as_deref(),
                params.target_username.as_deref(),
                &keywords,
            ),
            reply_text: params.reply_text.unwrap_or_default(),
            ai,
            max_replies: params.max_replies,
        }
    }
}

#[tool_router]
impl ReplyJobServer {
    pub fn new(service: Arc<ReplyJobService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Register an X (Twitter) account with its OAuth 1.0a credentials. Returns the account id.")]
    async fn register_account(
        &self,
        Parameters(params): Parameters<RegisterAccountParams>,
    ) -> Result<CallToolResult, McpError> {
        let credentials = Credentials {
            api_key: params.api_key,
            api_key_secret: params.api_key_secret,
            access_token: params.access_token,
            access_token_secret: params.access_token_secret,
        };
        Self::respond(self.service.register_account(&params.label, credentials).await)
    }

    #[tool(description = "Create a reply job targeting a tweet id, a username or keywords. The job starts active.")]
    async fn create_job(
        &self,
        Parameters(params): Parameters<CreateJobParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.create_job(Self::new_job(params)).await)
    }

    #[tool(description = "List all reply jobs")]
    async fn list_jobs(&self) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.list_jobs().await)
    }

    #[tool(description = "Run a reply job once now. Replies are posted one at a time with a pause between them.")]
    async fn start_job(
        &self,
        Parameters(params): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.start_job(&params.job_id).await)
    }

    #[tool(description = "Deactivate a reply job so future runs skip it")]
    async fn stop_job(
        &self,
        Parameters(params): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.stop_job(&params.job_id).await.map(|()| "stopped"))
    }

    #[tool(description = "Reactivate a stopped reply job")]
    async fn activate_job(
        &self,
        Parameters(params): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.activate_job(&params.job_id).await.map(|()| "activated"))
    }

    #[tool(description = "Get a reply job with its attempt counts, success rate and remaining quota")]
    async fn get_job_stats(
        &self,
        Parameters(params): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.get_job_stats(&params.job_id).await)
    }

    #[tool(description = "List every reply attempt of a job, newest first")]
    async fn job_replies(
        &self,
        Parameters(params): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.job_replies(&params.job_id).await)
    }

    #[tool(description = "Run every active reply job that has fewer than 10 replies, one after another")]
    async fn run_all_active_jobs(&self) -> Result<CallToolResult, McpError> {
        Self::respond(self.service.run_all_active_jobs().await)
    }
}

#[tool_handler]
impl ServerHandler for ReplyJobServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "reply-jobs".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Automated X (Twitter) replies. Register an account, create a job with \
                 create_job, then run it with start_job or run_all_active_jobs. \
                 Use get_job_stats to check progress and stop_job to halt a job."
                    .to_string(),
            ),
        }
    }
}
