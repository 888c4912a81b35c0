//! Conversational front-end: command dispatch and URL submission.
//!
//! Transport-agnostic; the chat transport turns updates into [`Incoming`]
//! and sends back the [`Reply`] text.

use crate::metrics;
use crate::services::job_queue::JobQueue;
use crate::services::rate_limiter::{Admission, RateLimiter, TierDirectory};
use crate::services::url_extractor::extract_media_url;
use media_core::Job;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const QUEUED_REPLY: &str = "Queued, will process shortly.";
pub const QUEUE_UNAVAILABLE_REPLY: &str =
    "The download queue is unavailable right now. Please try again in a few minutes.";
pub const NO_URL_REPLY: &str =
    "Send me a link to an Instagram reel or post and I'll send the video back.";
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command. Send /help to see what I can do.";

/// A message received from the chat channel
#[derive(Debug, Clone)]
pub struct Incoming {
    pub conversation_identity: String,
    pub requester_identity: String,
    pub text: String,
}

/// Text to send back, plus the job it created, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub enqueued: Option<Uuid>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            enqueued: None,
        }
    }
}

/// Handler for a slash command; receives the daily limit for its wording
pub type CommandHandler = fn(u32) -> String;

fn start_command(limit: u32) -> String {
    format!(
        "Hi! Send me an Instagram reel or post link and I'll download it for you.\n\
         You can download up to {limit} videos per day."
    )
}

fn help_command(limit: u32) -> String {
    format!(
        "How to use:\n\
         1. Copy the link of an Instagram reel or post.\n\
         2. Send it here.\n\
         3. Wait for the video.\n\n\
         Videos over the upload limit arrive as an animation with a link to the original.\n\
         Daily limit: {limit} downloads."
    )
}

fn delete_command(_limit: u32) -> String {
    "Nothing to delete: downloads are sent straight to this chat and not kept on a server."
        .to_string()
}

/// Explicit mapping from command names to handlers
pub struct CommandTable {
    handlers: HashMap<&'static str, CommandHandler>,
}

impl Default for CommandTable {
    fn default() -> Self {
        let mut table = Self {
            handlers: HashMap::new(),
        };
        table.register("start", start_command);
        table.register("help", help_command);
        table.register("delete", delete_command);
        table
    }
}

impl CommandTable {
    pub fn register(&mut self, name: &'static str, handler: CommandHandler) {
        self.handlers.insert(name, handler);
    }

    pub fn lookup(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).copied()
    }
}

/// Parse `/name@bot args` into `name`, lowercased.
pub fn parse_command(text: &str) -> Option<String> {
    let rest = text.trim_start().strip_prefix('/')?;
    let token = rest.split_whitespace().next()?;
    let name = token.split('@').next().unwrap_or(token);
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

pub struct Frontend {
    commands: CommandTable,
    limiter: RateLimiter,
    tiers: TierDirectory,
    queue: Arc<dyn JobQueue>,
    daily_limit: u32,
}

impl Frontend {
    pub fn new(
        commands: CommandTable,
        limiter: RateLimiter,
        tiers: TierDirectory,
        queue: Arc<dyn JobQueue>,
        daily_limit: u32,
    ) -> Self {
        Self {
            commands,
            limiter,
            tiers,
            queue,
            daily_limit,
        }
    }

    pub async fn handle(&self, incoming: &Incoming) -> Reply {
        if let Some(name) = parse_command(&incoming.text) {
            return match self.commands.lookup(&name) {
                Some(handler) => Reply::text(handler(self.daily_limit)),
                None => Reply::text(UNKNOWN_COMMAND_REPLY),
            };
        }

        match extract_media_url(&incoming.text) {
            Some(url) => self.submit(incoming, url).await,
            None => Reply::text(NO_URL_REPLY),
        }
    }

    async fn submit(&self, incoming: &Incoming, url: String) -> Reply {
        let requester = incoming.requester_identity.as_str();
        let tier = self.tiers.tier_of(requester);

        if let Admission::Denied { used, limit } =
            self.limiter.admit(requester, tier, self.daily_limit).await
        {
            info!(requester, used, limit, "Submission denied by daily quota");
            return Reply::text(daily_limit_reply(limit));
        }

        let job = Job::new(
            incoming.conversation_identity.clone(),
            incoming.requester_identity.clone(),
            url,
        );
        match self.queue.push(&job).await {
            Ok(()) => {
                info!(job_id = %job.id, requester, url = %job.url, "Job queued");
                Reply {
                    text: QUEUED_REPLY.to_string(),
                    enqueued: Some(job.id),
                }
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to enqueue job");
                metrics::record_job_outcome("enqueue_failed");
                Reply::text(QUEUE_UNAVAILABLE_REPLY)
            }
        }
    }
}

pub fn daily_limit_reply(limit: u32) -> String {
    format!("Daily limit of {limit} downloads reached. Try again tomorrow.")
}
