use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, UserId},
    protocol::MessagePayload,
};

/// A message as the open conversation sees it: either confirmed by the server
/// (carrying the real id) or a client-generated optimistic entry awaiting the
/// send response.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    Confirmed(MessagePayload),
    Pending(PendingMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub temp_id: String,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChatMessage::Pending(_))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            ChatMessage::Confirmed(message) => message.created_at,
            ChatMessage::Pending(pending) => pending.created_at,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::Confirmed(message) => &message.content,
            ChatMessage::Pending(pending) => &pending.content,
        }
    }
}

/// Messages of the currently open conversation. Owned by the messaging
/// client; UI components only read snapshots.
#[derive(Debug, Clone)]
pub struct OpenConversation {
    pub conversation_id: ConversationId,
    pub messages: Vec<ChatMessage>,
}

impl OpenConversation {
    pub fn new(conversation_id: ConversationId, history: Vec<MessagePayload>) -> Self {
        Self {
            conversation_id,
            messages: history.into_iter().map(ChatMessage::Confirmed).collect(),
        }
    }
}

pub fn contains_message(messages: &[ChatMessage], message_id: &MessageId) -> bool {
    messages.iter().any(|entry| match entry {
        ChatMessage::Confirmed(message) => &message.message_id == message_id,
        ChatMessage::Pending(_) => false,
    })
}

/// Replaces the pending entry with the confirmed message in place, keeping its
/// position. If the confirmed id already landed via the gateway echo, the
/// pending entry is dropped instead so the logical message appears exactly
/// once. Returns false when no entry with `temp_id` exists.
pub fn confirm_pending(
    messages: &mut Vec<ChatMessage>,
    temp_id: &str,
    confirmed: MessagePayload,
) -> bool {
    let Some(index) = pending_index(messages, temp_id) else {
        return false;
    };

    if contains_message(messages, &confirmed.message_id) {
        messages.remove(index);
    } else {
        messages[index] = ChatMessage::Confirmed(confirmed);
    }
    true
}

/// Drops the optimistic entry after a failed send. Returns false when no
/// entry with `temp_id` exists.
pub fn remove_pending(messages: &mut Vec<ChatMessage>, temp_id: &str) -> bool {
    let Some(index) = pending_index(messages, temp_id) else {
        return false;
    };
    messages.remove(index);
    true
}

/// Appends an incoming message unless its id is already present (the gateway
/// echoes the sender's own messages, which may race the send response).
/// Returns true when the message was appended.
pub fn append_if_new(messages: &mut Vec<ChatMessage>, incoming: MessagePayload) -> bool {
    if contains_message(messages, &incoming.message_id) {
        return false;
    }
    messages.push(ChatMessage::Confirmed(incoming));
    true
}

/// Removes a confirmed message, returning it so a failed delete can restore it.
pub fn remove_confirmed(
    messages: &mut Vec<ChatMessage>,
    message_id: &MessageId,
) -> Option<MessagePayload> {
    let index = messages.iter().position(|entry| match entry {
        ChatMessage::Confirmed(message) => &message.message_id == message_id,
        ChatMessage::Pending(_) => false,
    })?;
    match messages.remove(index) {
        ChatMessage::Confirmed(message) => Some(message),
        ChatMessage::Pending(_) => None,
    }
}

/// Re-inserts a message at its `created_at` position. Used by the delete
/// rollback: other messages may have arrived while the request was in flight,
/// so a plain append would break chronological order.
pub fn restore_in_order(messages: &mut Vec<ChatMessage>, message: MessagePayload) {
    let created_at = message.created_at;
    let index = messages.partition_point(|entry| entry.created_at() <= created_at);
    messages.insert(index, ChatMessage::Confirmed(message));
}

/// Marks every confirmed message in the list as delivered. Applied when the
/// peer's read receipt arrives for the open conversation.
pub fn mark_all_delivered(messages: &mut [ChatMessage]) -> bool {
    let mut changed = false;
    for entry in messages.iter_mut() {
        if let ChatMessage::Confirmed(message) = entry {
            if !message.delivered {
                message.delivered = true;
                changed = true;
            }
        }
    }
    changed
}

fn pending_index(messages: &[ChatMessage], temp_id: &str) -> Option<usize> {
    messages.iter().position(|entry| match entry {
        ChatMessage::Pending(pending) => pending.temp_id == temp_id,
        ChatMessage::Confirmed(_) => false,
    })
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
