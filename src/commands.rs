//! Command dispatch for platform adapters.
//!
//! Adapters parse their platform's message into a command name plus
//! arguments and hand it to the router; every handler has the same
//! signature and delegates to the query façade. Replies are structured;
//! rendering them as platform text is the adapter's job.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::error::TrackerError;
use crate::types::{Platform, Registration};
use crate::{MilestoneReport, WagerStatus, WagerTracker};

/// A parsed platform command.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub platform: Platform,
    pub platform_user_id: String,
    pub args: Vec<String>,
}

/// Structured command outcome for the adapter to render.
#[derive(Debug)]
pub enum CommandReply {
    Registered(Registration),
    Unregistered(Registration),
    Status(WagerStatus),
    Milestones(MilestoneReport),
    Usage { usage: &'static str },
    Unknown { command: String },
    Failed(TrackerError),
}

type HandlerFuture = Pin<Box<dyn Future<Output = CommandReply> + Send>>;
type Handler = Box<dyn Fn(Arc<WagerTracker>, CommandRequest) -> HandlerFuture + Send + Sync>;

/// Table of command name → handler.
pub struct CommandRouter {
    tracker: Arc<WagerTracker>,
    handlers: HashMap<&'static str, Handler>,
}

impl CommandRouter {
    /// Build the router with the standard command set: `register`,
    /// `wager`, `milestones`, `unregister`.
    #[must_use]
    pub fn new(tracker: Arc<WagerTracker>) -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert(
            "register",
            Box::new(|tracker, request| Box::pin(handle_register(tracker, request))),
        );
        handlers.insert(
            "wager",
            Box::new(|tracker, request| Box::pin(handle_wager(tracker, request))),
        );
        handlers.insert(
            "milestones",
            Box::new(|tracker, request| Box::pin(handle_milestones(tracker, request))),
        );
        handlers.insert(
            "unregister",
            Box::new(|tracker, request| Box::pin(handle_unregister(tracker, request))),
        );
        Self { tracker, handlers }
    }

    /// Command names the router understands.
    #[must_use]
    pub fn commands(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Dispatch one command.
    pub async fn dispatch(&self, command: &str, request: CommandRequest) -> CommandReply {
        debug!(
            command = %command,
            platform = %request.platform,
            user = %request.platform_user_id,
            "dispatching command"
        );
        match self.handlers.get(command) {
            Some(handler) => handler(Arc::clone(&self.tracker), request).await,
            None => CommandReply::Unknown {
                command: command.to_string(),
            },
        }
    }
}

async fn handle_register(tracker: Arc<WagerTracker>, request: CommandRequest) -> CommandReply {
    let Some(affiliate_id) = request.args.first() else {
        return CommandReply::Usage {
            usage: "register <affiliate-id>",
        };
    };
    match tracker.register(request.platform, &request.platform_user_id, affiliate_id) {
        Ok(registration) => CommandReply::Registered(registration),
        Err(error) => CommandReply::Failed(error),
    }
}

async fn handle_wager(tracker: Arc<WagerTracker>, request: CommandRequest) -> CommandReply {
    match tracker
        .get_wager_status(request.platform, &request.platform_user_id)
        .await
    {
        Ok(status) => CommandReply::Status(status),
        Err(error) => CommandReply::Failed(error),
    }
}

async fn handle_milestones(tracker: Arc<WagerTracker>, request: CommandRequest) -> CommandReply {
    match tracker
        .get_milestones(request.platform, &request.platform_user_id)
        .await
    {
        Ok(report) => CommandReply::Milestones(report),
        Err(error) => CommandReply::Failed(error),
    }
}

async fn handle_unregister(tracker: Arc<WagerTracker>, request: CommandRequest) -> CommandReply {
    match tracker.unregister(request.platform, &request.platform_user_id) {
        Ok(registration) => CommandReply::Unregistered(registration),
        Err(error) => CommandReply::Failed(error),
    }
}
