//! Inbound events, buffered messages, and composite payloads.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::time::Instant,
};

use crate::MessageQueueMode;

/// An event addressed to a session, as handed to
/// [`QueueManager::enqueue_message`](crate::QueueManager::enqueue_message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_key: String,
    /// Lane to run on. Falls back to the configured default lane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    pub content: String,
    /// Switches the session's mode before this message is evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MessageQueueMode>,
    /// Opaque to the engine; handed through to the executor.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl InboundMessage {
    pub fn new(session_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            lane: None,
            content: content.into(),
            mode: None,
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: MessageQueueMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What a buffered entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    /// A single message as received.
    Message,
    /// Placeholder for messages folded away by the summarize drop strategy.
    Collapsed {
        count: usize,
        first_seq: u64,
        last_seq: u64,
    },
}

/// A message recorded in a session buffer. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    seq: u64,
    content: String,
    lane: String,
    received_at: Instant,
    metadata: Value,
    kind: MessageKind,
}

impl PendingMessage {
    pub fn new(
        seq: u64,
        content: impl Into<String>,
        lane: impl Into<String>,
        received_at: Instant,
        metadata: Value,
    ) -> Self {
        Self {
            seq,
            content: content.into(),
            lane: lane.into(),
            received_at,
            metadata,
            kind: MessageKind::Message,
        }
    }

    /// Fold `messages` into one placeholder. Placeholders among them are
    /// expanded so counts stay exact. Returns `None` for an empty slice.
    pub fn collapsed(messages: &[PendingMessage]) -> Option<Self> {
        let first = messages.first()?;
        let last = messages.last()?;
        let count = messages
            .iter()
            .map(|m| match m.kind {
                MessageKind::Collapsed { count, .. } => count,
                MessageKind::Message => 1,
            })
            .sum();
        let first_seq = match first.kind {
            MessageKind::Collapsed { first_seq, .. } => first_seq,
            MessageKind::Message => first.seq,
        };
        Some(Self {
            seq: last.seq,
            content: format!("[{count} earlier messages collapsed]"),
            lane: first.lane.clone(),
            received_at: first.received_at,
            metadata: Value::Null,
            kind: MessageKind::Collapsed {
                count,
                first_seq,
                last_seq: last.seq,
            },
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_collapsed(&self) -> bool {
        matches!(self.kind, MessageKind::Collapsed { .. })
    }
}

/// The composite input handed to one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Message contents joined by the configured separator, oldest first.
    pub text: String,
    pub messages: Vec<PendingMessage>,
    /// Lane of the oldest message in the batch.
    pub lane: String,
}

impl Payload {
    /// Join `messages` in arrival order. Returns `None` when there is nothing
    /// to deliver.
    pub fn compose(messages: Vec<PendingMessage>, separator: &str) -> Option<Self> {
        let lane = messages.first()?.lane.clone();
        let text = messages
            .iter()
            .map(PendingMessage::content)
            .collect::<Vec<_>>()
            .join(separator);
        Some(Self {
            text,
            messages,
            lane,
        })
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first_seq(&self) -> Option<u64> {
        self.messages.first().map(PendingMessage::seq)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.messages.last().map(PendingMessage::seq)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: u64, content: &str, lane: &str) -> PendingMessage {
        PendingMessage::new(seq, content, lane, Instant::now(), Value::Null)
    }

    #[test]
    fn compose_joins_in_order_and_takes_oldest_lane() {
        let payload = Payload::compose(
            vec![msg(1, "a", "cron"), msg(2, "b", "main"), msg(3, "c", "main")],
            " ",
        )
        .unwrap();
        assert_eq!(payload.text, "a b c");
        assert_eq!(payload.lane, "cron");
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.first_seq(), Some(1));
        assert_eq!(payload.last_seq(), Some(3));
    }

    #[test]
    fn compose_empty_is_none() {
        assert!(Payload::compose(Vec::new(), "\n").is_none());
    }

    #[test]
    fn collapsed_counts_nested_placeholders() {
        let inner = PendingMessage::collapsed(&[msg(1, "a", "main"), msg(2, "b", "main")]).unwrap();
        assert_eq!(inner.kind(), MessageKind::Collapsed {
            count: 2,
            first_seq: 1,
            last_seq: 2,
        });

        let outer = PendingMessage::collapsed(&[inner, msg(3, "c", "main")]).unwrap();
        assert_eq!(outer.kind(), MessageKind::Collapsed {
            count: 3,
            first_seq: 1,
            last_seq: 3,
        });
        assert_eq!(outer.content(), "[3 earlier messages collapsed]");
        assert!(outer.is_collapsed());
    }

    #[test]
    fn inbound_builder_and_serde() {
        let inbound = InboundMessage::new("u1", "hello")
            .lane("cron")
            .mode(MessageQueueMode::Steer)
            .metadata(serde_json::json!({ "channel": "telegram" }));
        let json = serde_json::to_value(&inbound).unwrap();
        assert_eq!(json["mode"], "steer");
        assert_eq!(json["lane"], "cron");

        let parsed: InboundMessage =
            serde_json::from_value(serde_json::json!({ "session_key": "u1", "content": "x" }))
                .unwrap();
        assert!(parsed.lane.is_none());
        assert!(parsed.metadata.is_null());
    }
}
