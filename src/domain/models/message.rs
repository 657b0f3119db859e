//! Inter-agent messages routed by the message router (C5).

use crate::domain::ids::{AgentId, MessageId};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: AgentId,
    /// `None` marks a broadcast.
    pub to: Option<AgentId>,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub timestamp: SystemTime,
    pub priority: i32,
    /// Invariant enforced by the router: a message is never delivered
    /// after this point.
    pub expiry: Option<SystemTime>,
}

impl Message {
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(expiry: Option<SystemTime>) -> Message {
        Message {
            id: MessageId::new(),
            from: AgentId::new(),
            to: Some(AgentId::new()),
            message_type: "ping".into(),
            payload: serde_json::Value::Null,
            timestamp: SystemTime::UNIX_EPOCH,
            priority: 0,
            expiry,
        }
    }

    #[test]
    fn no_expiry_never_expires() {
        let msg = sample(None);
        assert!(!msg.is_expired(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)));
    }

    #[test]
    fn past_expiry_is_expired() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let msg = sample(Some(now));
        assert!(msg.is_expired(now));
        assert!(!msg.is_expired(now - Duration::from_secs(1)));
    }
}
