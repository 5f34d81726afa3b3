use super::*;
use chrono::TimeZone;
use shared::domain::{ConversationId, MessageId, UserId};

fn at(seconds: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().expect("timestamp")
}

fn confirmed(id: &str, seconds: i64) -> MessagePayload {
    MessagePayload {
        message_id: MessageId::new(id),
        conversation_id: ConversationId::new("conv-1"),
        sender_id: UserId::new("user-1"),
        content: format!("message {id}"),
        created_at: at(seconds),
        delivered: false,
    }
}

fn pending(temp_id: &str, seconds: i64) -> ChatMessage {
    ChatMessage::Pending(PendingMessage {
        temp_id: temp_id.to_string(),
        conversation_id: ConversationId::new("conv-1"),
        sender_id: UserId::new("user-1"),
        content: "hi".to_string(),
        created_at: at(seconds),
    })
}

#[test]
fn confirm_pending_replaces_in_place() {
    let mut messages = vec![
        ChatMessage::Confirmed(confirmed("a", 1)),
        pending("tmp-1", 2),
        ChatMessage::Confirmed(confirmed("b", 3)),
    ];

    let replaced = confirm_pending(&mut messages, "tmp-1", confirmed("c", 2));

    assert!(replaced);
    assert_eq!(messages.len(), 3);
    match &messages[1] {
        ChatMessage::Confirmed(message) => assert_eq!(message.message_id.0, "c"),
        other => panic!("expected confirmed message at index 1: {other:?}"),
    }
    assert!(!messages.iter().any(ChatMessage::is_pending));
}

#[test]
fn confirm_pending_drops_duplicate_when_echo_already_landed() {
    // the gateway echoed the send before the REST response resolved
    let mut messages = vec![pending("tmp-1", 2)];
    assert!(append_if_new(&mut messages, confirmed("c", 2)));
    assert_eq!(messages.len(), 2);

    let reconciled = confirm_pending(&mut messages, "tmp-1", confirmed("c", 2));

    assert!(reconciled);
    assert_eq!(messages.len(), 1);
    assert!(contains_message(&messages, &MessageId::new("c")));
}

#[test]
fn confirm_pending_without_matching_temp_id_is_noop() {
    let mut messages = vec![ChatMessage::Confirmed(confirmed("a", 1))];
    assert!(!confirm_pending(&mut messages, "tmp-unknown", confirmed("c", 2)));
    assert_eq!(messages.len(), 1);
}

#[test]
fn remove_pending_restores_pre_send_state() {
    let original = vec![
        ChatMessage::Confirmed(confirmed("a", 1)),
        ChatMessage::Confirmed(confirmed("b", 2)),
    ];
    let mut messages = original.clone();
    messages.push(pending("tmp-1", 3));

    assert!(remove_pending(&mut messages, "tmp-1"));
    assert_eq!(messages, original);
}

#[test]
fn append_if_new_deduplicates_by_server_id() {
    let mut messages = vec![ChatMessage::Confirmed(confirmed("a", 1))];

    assert!(append_if_new(&mut messages, confirmed("b", 2)));
    assert!(!append_if_new(&mut messages, confirmed("b", 2)));
    assert_eq!(messages.len(), 2);
}

#[test]
fn restore_in_order_reinserts_at_chronological_position() {
    let mut messages = vec![
        ChatMessage::Confirmed(confirmed("m1", 10)),
        ChatMessage::Confirmed(confirmed("m2", 20)),
        ChatMessage::Confirmed(confirmed("m3", 30)),
    ];

    let removed = remove_confirmed(&mut messages, &MessageId::new("m2")).expect("removed");
    assert_eq!(messages.len(), 2);

    restore_in_order(&mut messages, removed);

    let ids: Vec<&str> = messages
        .iter()
        .map(|entry| match entry {
            ChatMessage::Confirmed(message) => message.message_id.0.as_str(),
            ChatMessage::Pending(_) => "pending",
        })
        .collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

#[test]
fn restore_in_order_accounts_for_messages_arrived_meanwhile() {
    let mut messages = vec![ChatMessage::Confirmed(confirmed("m1", 10))];
    let removed = confirmed("m2", 20);

    // m4 arrived while the delete request was in flight
    assert!(append_if_new(&mut messages, confirmed("m4", 40)));
    restore_in_order(&mut messages, removed);

    let ids: Vec<&str> = messages
        .iter()
        .map(|entry| match entry {
            ChatMessage::Confirmed(message) => message.message_id.0.as_str(),
            ChatMessage::Pending(_) => "pending",
        })
        .collect();
    assert_eq!(ids, vec!["m1", "m2", "m4"]);
}

#[test]
fn remove_confirmed_ignores_pending_entries() {
    let mut messages = vec![pending("tmp-1", 1)];
    assert!(remove_confirmed(&mut messages, &MessageId::new("tmp-1")).is_none());
    assert_eq!(messages.len(), 1);
}

#[test]
fn mark_all_delivered_flags_confirmed_messages_once() {
    let mut messages = vec![
        ChatMessage::Confirmed(confirmed("a", 1)),
        pending("tmp-1", 2),
    ];

    assert!(mark_all_delivered(&mut messages));
    assert!(!mark_all_delivered(&mut messages));
    match &messages[0] {
        ChatMessage::Confirmed(message) => assert!(message.delivered),
        other => panic!("expected confirmed message: {other:?}"),
    }
}

#[test]
fn open_conversation_wraps_history_as_confirmed() {
    let open = OpenConversation::new(
        ConversationId::new("conv-1"),
        vec![confirmed("a", 1), confirmed("b", 2)],
    );
    assert_eq!(open.messages.len(), 2);
    assert!(!open.messages.iter().any(ChatMessage::is_pending));
}
