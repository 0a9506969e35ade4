use crate::config::TrimPolicy;
use crate::types::{Content, Message, Role, STALE_SNAPSHOT};

/// Ordered turns of one agent's conversation. The first message is always
/// the system prompt.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    policy: TrimPolicy,
}

impl ConversationState {
    pub fn new(system_prompt: impl Into<String>, policy: TrimPolicy) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            policy,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Bound history growth. Idempotent and order-preserving.
    ///
    /// 1. Only the newest `keep_snapshots` snapshot messages keep their
    ///    content; older ones are replaced by the stale placeholder.
    /// 2. At most `max_messages` turns follow the system prompt; the oldest
    ///    are dropped.
    /// 3. Tool results left at the head without their assistant call are
    ///    dropped too.
    pub fn trim(&mut self) {
        let snapshots: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, m)| m.has_snapshot())
            .map(|(i, _)| i)
            .collect();
        let stale = snapshots.len().saturating_sub(self.policy.keep_snapshots);
        for &i in &snapshots[..stale] {
            self.messages[i].content = Some(Content::Text(STALE_SNAPSHOT.to_string()));
        }

        let turns = self.messages.len().saturating_sub(1);
        if turns > self.policy.max_messages {
            self.messages.drain(1..1 + turns - self.policy.max_messages);
        }

        let orphans = self
            .messages
            .iter()
            .skip(1)
            .take_while(|m| m.role == Role::Tool)
            .count();
        if orphans > 0 {
            self.messages.drain(1..1 + orphans);
        }
    }
}
