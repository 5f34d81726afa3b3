use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use chrono::Utc;
use reqwest::Client;
use shared::{
    domain::{ConversationId, MessageId, PresenceStatus, UserId},
    protocol::{
        ClientCommand, ConversationSummary, CreateConversationRequest, GatewayEvent,
        GatewayEventKind, MessagePayload, SendMessageRequest,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

pub mod chat;
pub mod error;
pub mod listeners;
pub mod session;
pub mod session_store;
pub mod transport;

use chat::{ChatMessage, OpenConversation, PendingMessage};
use error::GatewayError;
use listeners::{EventCallback, ListenerHandle, ListenerRegistry};
use transport::{GatewayConnectOptions, GatewayConnector, GatewaySession};

const GATEWAY_RECONNECT_ATTEMPTS: usize = 5;
const GATEWAY_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const TYPING_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
const CLIENT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Raw gateway event, relayed after internal state has been updated.
    Gateway(GatewayEvent),
    ConnectionStateChanged(ConnectionState),
    ConversationsRefreshed,
    ConversationUpdated {
        conversation_id: ConversationId,
    },
    MessagesUpdated {
        conversation_id: ConversationId,
    },
    TypingChanged {
        conversation_id: ConversationId,
        user_ids: Vec<UserId>,
    },
    Notification(String),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct MessagingClientConfig {
    pub api_base: String,
    pub gateway_url: String,
    pub reconnect_attempts: usize,
    pub reconnect_delay: Duration,
}

impl MessagingClientConfig {
    pub fn new(api_base: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            gateway_url: gateway_url.into(),
            reconnect_attempts: GATEWAY_RECONNECT_ATTEMPTS,
            reconnect_delay: GATEWAY_RECONNECT_DELAY,
        }
    }
}

struct MessagingClientState {
    connection: ConnectionState,
    session: Option<Arc<dyn GatewaySession>>,
    /// Bumped on every connect/disconnect; stale event loops compare against
    /// it and exit instead of reconnecting a torn-down session.
    generation: u64,
    token: Option<String>,
    current_user: Option<UserId>,
    joined_rooms: HashSet<ConversationId>,
    conversations: Vec<ConversationSummary>,
    open_conversation: Option<OpenConversation>,
    /// Conversations this user is currently typing in, keyed to the latest
    /// keystroke generation so only the final idle timer fires.
    typing_outbound: HashMap<ConversationId, u64>,
    typing_peers: HashMap<ConversationId, HashMap<UserId, u64>>,
    typing_generation: u64,
}

/// Owns the single gateway connection for an authenticated session and the
/// canonical in-memory conversation/message state. UI components dispatch
/// intents here and observe results through `subscribe_events` or the
/// per-event listener registry.
pub struct MessagingClient {
    http: Client,
    config: MessagingClientConfig,
    connector: Arc<dyn GatewayConnector>,
    inner: Mutex<MessagingClientState>,
    listeners: ListenerRegistry,
    events: broadcast::Sender<ClientEvent>,
}

impl MessagingClient {
    pub fn new(config: MessagingClientConfig, connector: Arc<dyn GatewayConnector>) -> Arc<Self> {
        let (events, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        Arc::new(Self {
            http: Client::new(),
            config,
            connector,
            inner: Mutex::new(MessagingClientState {
                connection: ConnectionState::Disconnected,
                session: None,
                generation: 0,
                token: None,
                current_user: None,
                joined_rooms: HashSet::new(),
                conversations: Vec::new(),
                open_conversation: None,
                typing_outbound: HashMap::new(),
                typing_peers: HashMap::new(),
                typing_generation: 0,
            }),
            listeners: ListenerRegistry::default(),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn on_event(&self, kind: GatewayEventKind, callback: EventCallback) -> ListenerHandle {
        self.listeners.register(kind, callback)
    }

    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.lock().await.conversations.clone()
    }

    pub async fn open_messages(&self) -> Option<Vec<ChatMessage>> {
        self.inner
            .lock()
            .await
            .open_conversation
            .as_ref()
            .map(|open| open.messages.clone())
    }

    pub async fn typing_peers(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        self.inner
            .lock()
            .await
            .typing_peers
            .get(conversation_id)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Establishes the gateway connection for this session. Idempotent:
    /// calling it while connecting or connected is a no-op rather than a
    /// second socket.
    pub async fn connect(self: &Arc<Self>, token: &str, current_user: UserId) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.connection != ConnectionState::Disconnected {
                return Ok(());
            }
            inner.connection = ConnectionState::Connecting;
            inner.token = Some(token.to_string());
            inner.current_user = Some(current_user);
        }
        self.emit(ClientEvent::ConnectionStateChanged(
            ConnectionState::Connecting,
        ));

        let options = GatewayConnectOptions {
            gateway_url: self.config.gateway_url.clone(),
            token: token.to_string(),
        };
        let session = match self.connector.connect(options).await {
            Ok(session) => session,
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.connection = ConnectionState::Disconnected;
                    inner.token = None;
                    inner.current_user = None;
                }
                self.emit(ClientEvent::ConnectionStateChanged(
                    ConnectionState::Disconnected,
                ));
                return Err(GatewayError::Connect(err.to_string()).into());
            }
        };

        let event_rx = session.subscribe_events();
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.session = Some(session);
            inner.connection = ConnectionState::Connected;
            inner.generation
        };
        self.emit(ClientEvent::ConnectionStateChanged(
            ConnectionState::Connected,
        ));
        self.spawn_event_loop(event_rx, generation);
        info!("gateway: connected");
        Ok(())
    }

    /// Tears down the connection and resets room membership and typing state.
    /// The conversation list survives so a later reconnect starts warm.
    pub async fn disconnect(&self) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.connection = ConnectionState::Disconnected;
            inner.token = None;
            inner.current_user = None;
            inner.joined_rooms.clear();
            inner.typing_outbound.clear();
            inner.typing_peers.clear();
            inner.open_conversation = None;
            inner.session.take()
        };
        if let Some(session) = session {
            let _ = session.close().await;
        }
        self.emit(ClientEvent::ConnectionStateChanged(
            ConnectionState::Disconnected,
        ));
        info!("gateway: disconnected");
        Ok(())
    }

    /// Logical room membership over the single connection. Tracked locally
    /// even while offline so reconnection can restore it.
    pub async fn join_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock().await;
            inner.joined_rooms.insert(conversation_id.clone());
            inner.session.clone()
        };
        if let Some(session) = session {
            session
                .send(ClientCommand::JoinConversation {
                    conversation_id: conversation_id.clone(),
                })
                .await?;
        }
        Ok(())
    }

    pub async fn leave_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock().await;
            inner.joined_rooms.remove(conversation_id);
            inner.typing_outbound.remove(conversation_id);
            inner.typing_peers.remove(conversation_id);
            inner.session.clone()
        };
        if let Some(session) = session {
            session
                .send(ClientCommand::LeaveConversation {
                    conversation_id: conversation_id.clone(),
                })
                .await?;
        }
        Ok(())
    }

    pub async fn update_status(&self, status: PresenceStatus) -> Result<()> {
        let session = self
            .inner
            .lock()
            .await
            .session
            .clone()
            .ok_or(GatewayError::NotConnected)?;
        session.send(ClientCommand::UpdateStatus { status }).await
    }

    /// Keystroke hook. Emits `typing=true` only on the false-to-true
    /// transition and arms a 1 s idle timer; each further keystroke resets
    /// the timer without re-emitting. Expiry emits exactly one
    /// `typing=false` per burst.
    pub async fn notify_typing(self: &Arc<Self>, conversation_id: &ConversationId) -> Result<()> {
        let (session, first_signal, generation) = {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.session.clone() else {
                return Ok(());
            };
            inner.typing_generation += 1;
            let generation = inner.typing_generation;
            let first_signal = inner
                .typing_outbound
                .insert(conversation_id.clone(), generation)
                .is_none();
            (session, first_signal, generation)
        };

        if first_signal {
            session
                .send(ClientCommand::Typing {
                    conversation_id: conversation_id.clone(),
                    is_typing: true,
                })
                .await?;
        }
        self.spawn_typing_expiry(conversation_id.clone(), generation);
        Ok(())
    }

    fn spawn_typing_expiry(self: &Arc<Self>, conversation_id: ConversationId, generation: u64) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE_TIMEOUT).await;
            let session = {
                let mut inner = client.inner.lock().await;
                if inner.typing_outbound.get(&conversation_id) != Some(&generation) {
                    return;
                }
                inner.typing_outbound.remove(&conversation_id);
                inner.session.clone()
            };
            if let Some(session) = session {
                if let Err(err) = session
                    .send(ClientCommand::Typing {
                        conversation_id: conversation_id.clone(),
                        is_typing: false,
                    })
                    .await
                {
                    warn!("gateway: failed to clear typing state: {err}");
                }
            }
        });
    }

    pub async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let (api_base, token) = self.api_context().await?;
        let request = self
            .http
            .get(format!("{api_base}/conversations/my"))
            .bearer_auth(&token);
        let conversations: Vec<ConversationSummary> = self.execute(request).await?;

        self.inner.lock().await.conversations = conversations.clone();
        self.emit(ClientEvent::ConversationsRefreshed);
        Ok(conversations)
    }

    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationSummary> {
        let (api_base, token) = self.api_context().await?;
        let request = self
            .http
            .post(format!("{api_base}/conversations"))
            .bearer_auth(&token)
            .json(&request);
        let summary: ConversationSummary = self.execute(request).await?;

        {
            let mut inner = self.inner.lock().await;
            if let Some(existing) = inner
                .conversations
                .iter_mut()
                .find(|c| c.conversation_id == summary.conversation_id)
            {
                *existing = summary.clone();
            } else {
                inner.conversations.insert(0, summary.clone());
            }
        }
        self.emit(ClientEvent::ConversationUpdated {
            conversation_id: summary.conversation_id.clone(),
        });
        Ok(summary)
    }

    /// Joins the room and loads history; the loaded list becomes the
    /// canonical message state for the open conversation.
    pub async fn open_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        self.join_conversation(conversation_id).await?;

        let (api_base, token) = self.api_context().await?;
        let request = self
            .http
            .get(format!(
                "{api_base}/messages/conversation/{conversation_id}"
            ))
            .bearer_auth(&token);
        let history: Vec<MessagePayload> = self.execute(request).await?;

        self.inner.lock().await.open_conversation =
            Some(OpenConversation::new(conversation_id.clone(), history));
        self.emit(ClientEvent::MessagesUpdated {
            conversation_id: conversation_id.clone(),
        });
        Ok(())
    }

    /// Unmount hook: leaves the room and drops the message state so no
    /// events keep flowing into a view nobody displays.
    pub async fn close_conversation(&self) -> Result<()> {
        let conversation_id = {
            let mut inner = self.inner.lock().await;
            inner
                .open_conversation
                .take()
                .map(|open| open.conversation_id)
        };
        if let Some(conversation_id) = conversation_id {
            self.leave_conversation(&conversation_id).await?;
        }
        Ok(())
    }

    /// Optimistic send: the pending entry is visible before the request is
    /// issued, replaced in place on success, removed on failure.
    pub async fn send_message(&self, content: &str) -> Result<MessagePayload> {
        let (conversation_id, temp_id, token) = {
            let mut inner = self.inner.lock().await;
            let token = inner
                .token
                .clone()
                .ok_or_else(|| anyhow!("not connected: missing session token"))?;
            let sender_id = inner
                .current_user
                .clone()
                .ok_or_else(|| anyhow!("not connected: missing session user"))?;
            let open = inner
                .open_conversation
                .as_mut()
                .ok_or_else(|| anyhow!("no conversation open"))?;
            let conversation_id = open.conversation_id.clone();
            let temp_id = Uuid::new_v4().to_string();
            open.messages.push(ChatMessage::Pending(PendingMessage {
                temp_id: temp_id.clone(),
                conversation_id: conversation_id.clone(),
                sender_id,
                content: content.to_string(),
                created_at: Utc::now(),
            }));
            (conversation_id, temp_id, token)
        };
        self.emit(ClientEvent::MessagesUpdated {
            conversation_id: conversation_id.clone(),
        });

        let api_base = self.config.api_base.clone();
        let request = self
            .http
            .post(format!("{api_base}/messages"))
            .bearer_auth(&token)
            .json(&SendMessageRequest {
                conversation_id: conversation_id.clone(),
                content: content.to_string(),
            });

        match self.execute::<MessagePayload>(request).await {
            Ok(confirmed) => {
                {
                    let mut inner = self.inner.lock().await;
                    if let Some(open) = inner.open_conversation.as_mut() {
                        if open.conversation_id == conversation_id {
                            chat::confirm_pending(&mut open.messages, &temp_id, confirmed.clone());
                        }
                    }
                    if let Some(summary) = inner
                        .conversations
                        .iter_mut()
                        .find(|c| c.conversation_id == conversation_id)
                    {
                        summary.last_message = Some(confirmed.clone());
                    }
                }
                self.emit(ClientEvent::MessagesUpdated {
                    conversation_id: conversation_id.clone(),
                });
                Ok(confirmed)
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    if let Some(open) = inner.open_conversation.as_mut() {
                        if open.conversation_id == conversation_id {
                            chat::remove_pending(&mut open.messages, &temp_id);
                        }
                    }
                }
                self.emit(ClientEvent::MessagesUpdated {
                    conversation_id: conversation_id.clone(),
                });
                self.emit(ClientEvent::Notification(format!(
                    "failed to send message: {err}"
                )));
                Err(err)
            }
        }
    }

    /// Optimistic delete: the message disappears immediately; a backend
    /// failure restores it at its chronological position.
    pub async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        let (conversation_id, removed, token) = {
            let mut inner = self.inner.lock().await;
            let token = inner
                .token
                .clone()
                .ok_or_else(|| anyhow!("not connected: missing session token"))?;
            let open = inner
                .open_conversation
                .as_mut()
                .ok_or_else(|| anyhow!("no conversation open"))?;
            let conversation_id = open.conversation_id.clone();
            let removed = chat::remove_confirmed(&mut open.messages, message_id)
                .ok_or_else(|| anyhow!("message {message_id} not found in open conversation"))?;
            (conversation_id, removed, token)
        };
        self.emit(ClientEvent::MessagesUpdated {
            conversation_id: conversation_id.clone(),
        });

        let api_base = self.config.api_base.clone();
        let request = self
            .http
            .delete(format!("{api_base}/messages/{message_id}"))
            .bearer_auth(&token);

        match self.execute_unit(request).await {
            Ok(()) => Ok(()),
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    if let Some(open) = inner.open_conversation.as_mut() {
                        if open.conversation_id == conversation_id {
                            chat::restore_in_order(&mut open.messages, removed);
                        }
                    }
                }
                self.emit(ClientEvent::MessagesUpdated {
                    conversation_id: conversation_id.clone(),
                });
                self.emit(ClientEvent::Notification(format!(
                    "failed to delete message: {err}"
                )));
                Err(err)
            }
        }
    }

    /// Zeroes the local unread count immediately, then tells the backend and
    /// the room. The next conversation refresh is authoritative.
    pub async fn mark_conversation_read(&self, conversation_id: &ConversationId) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock().await;
            if let Some(summary) = inner
                .conversations
                .iter_mut()
                .find(|c| &c.conversation_id == conversation_id)
            {
                summary.my_unread_count = 0;
            }
            inner.session.clone()
        };
        self.emit(ClientEvent::ConversationUpdated {
            conversation_id: conversation_id.clone(),
        });

        if let Some(session) = session {
            session
                .send(ClientCommand::MarkRead {
                    conversation_id: conversation_id.clone(),
                })
                .await?;
        }

        let (api_base, token) = self.api_context().await?;
        let request = self
            .http
            .patch(format!("{api_base}/conversations/{conversation_id}/read"))
            .bearer_auth(&token);
        self.execute_unit(request).await?;
        Ok(())
    }

    pub async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let (api_base, token) = self.api_context().await?;
        let request = self
            .http
            .delete(format!("{api_base}/conversations/{conversation_id}"))
            .bearer_auth(&token);
        self.execute_unit(request).await?;

        let was_open = {
            let mut inner = self.inner.lock().await;
            inner
                .conversations
                .retain(|c| &c.conversation_id != conversation_id);
            inner
                .open_conversation
                .as_ref()
                .is_some_and(|open| &open.conversation_id == conversation_id)
        };
        if was_open {
            self.close_conversation().await?;
        } else {
            self.leave_conversation(conversation_id).await?;
        }
        self.emit(ClientEvent::ConversationsRefreshed);
        Ok(())
    }

    fn spawn_event_loop(
        self: &Arc<Self>,
        mut event_rx: broadcast::Receiver<GatewayEvent>,
        generation: u64,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => client.handle_gateway_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "gateway: event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        match client.try_reconnect(generation).await {
                            Some(new_rx) => event_rx = new_rx,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    /// Bounded, fixed-backoff reconnect. Returns the new event receiver, or
    /// None when the disconnect was intentional or the attempts ran out.
    async fn try_reconnect(&self, generation: u64) -> Option<broadcast::Receiver<GatewayEvent>> {
        let token = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return None;
            }
            let Some(token) = inner.token.clone() else {
                return None;
            };
            inner.session = None;
            inner.connection = ConnectionState::Connecting;
            token
        };
        self.emit(ClientEvent::ConnectionStateChanged(
            ConnectionState::Connecting,
        ));
        warn!("gateway: connection dropped, reconnecting");

        let attempts = self.config.reconnect_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.reconnect_delay).await;
            if self.inner.lock().await.generation != generation {
                return None;
            }

            let options = GatewayConnectOptions {
                gateway_url: self.config.gateway_url.clone(),
                token: token.clone(),
            };
            match self.connector.connect(options).await {
                Ok(session) => {
                    let event_rx = session.subscribe_events();
                    let rooms: Vec<ConversationId> = {
                        let mut inner = self.inner.lock().await;
                        if inner.generation != generation {
                            drop(inner);
                            let _ = session.close().await;
                            return None;
                        }
                        inner.session = Some(Arc::clone(&session));
                        inner.connection = ConnectionState::Connected;
                        inner.joined_rooms.iter().cloned().collect()
                    };
                    self.emit(ClientEvent::ConnectionStateChanged(
                        ConnectionState::Connected,
                    ));
                    for conversation_id in rooms {
                        if let Err(err) = session
                            .send(ClientCommand::JoinConversation {
                                conversation_id: conversation_id.clone(),
                            })
                            .await
                        {
                            warn!(%conversation_id, "gateway: room re-join failed: {err}");
                        }
                    }
                    info!(attempt, "gateway: reconnected");
                    return Some(event_rx);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        "gateway: reconnect attempt failed: {err}"
                    );
                }
            }
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation {
                inner.connection = ConnectionState::Disconnected;
                inner.session = None;
            }
        }
        self.emit(ClientEvent::ConnectionStateChanged(
            ConnectionState::Disconnected,
        ));
        self.emit(ClientEvent::Notification(
            GatewayError::ReconnectExhausted { attempts }.to_string(),
        ));
        None
    }

    async fn handle_gateway_event(self: &Arc<Self>, event: GatewayEvent) {
        self.listeners.dispatch(&event);

        match &event {
            GatewayEvent::NewMessage { message } => {
                self.apply_incoming_message(message.clone()).await;
            }
            GatewayEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing,
            } => {
                self.apply_peer_typing(conversation_id.clone(), user_id.clone(), *is_typing)
                    .await;
            }
            GatewayEvent::MessageRead {
                conversation_id, ..
            } => {
                let changed = {
                    let mut inner = self.inner.lock().await;
                    inner
                        .open_conversation
                        .as_mut()
                        .filter(|open| &open.conversation_id == conversation_id)
                        .is_some_and(|open| chat::mark_all_delivered(&mut open.messages))
                };
                if changed {
                    self.emit(ClientEvent::MessagesUpdated {
                        conversation_id: conversation_id.clone(),
                    });
                }
            }
            GatewayEvent::MessageDeleted {
                conversation_id,
                message_id,
            } => {
                let removed = {
                    let mut inner = self.inner.lock().await;
                    inner
                        .open_conversation
                        .as_mut()
                        .filter(|open| &open.conversation_id == conversation_id)
                        .and_then(|open| chat::remove_confirmed(&mut open.messages, message_id))
                };
                if removed.is_some() {
                    self.emit(ClientEvent::MessagesUpdated {
                        conversation_id: conversation_id.clone(),
                    });
                }
            }
            GatewayEvent::UserStatus { .. } => {}
            GatewayEvent::Error(api_error) => {
                warn!(code = ?api_error.code, "gateway: server error event: {}", api_error.message);
                self.emit(ClientEvent::Error(api_error.message.clone()));
            }
        }

        self.emit(ClientEvent::Gateway(event));
    }

    async fn apply_incoming_message(&self, message: MessagePayload) {
        let conversation_id = message.conversation_id.clone();
        let (appended_to_open, conversation_known) = {
            let mut inner = self.inner.lock().await;
            let open_matches = inner
                .open_conversation
                .as_ref()
                .is_some_and(|open| open.conversation_id == conversation_id);
            let appended = open_matches
                && inner
                    .open_conversation
                    .as_mut()
                    .is_some_and(|open| chat::append_if_new(&mut open.messages, message.clone()));

            let mut known = false;
            if let Some(summary) = inner
                .conversations
                .iter_mut()
                .find(|c| c.conversation_id == conversation_id)
            {
                known = true;
                summary.last_message = Some(message.clone());
                if !open_matches {
                    summary.my_unread_count += 1;
                }
            }
            (appended, known)
        };

        if appended_to_open {
            self.emit(ClientEvent::MessagesUpdated {
                conversation_id: conversation_id.clone(),
            });
        }
        if conversation_known {
            self.emit(ClientEvent::ConversationUpdated { conversation_id });
        }
    }

    /// Remote typing state expires locally 1 s after the last signal, whether
    /// or not the peer's `typing=false` ever arrives.
    async fn apply_peer_typing(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    ) {
        if is_typing {
            let (newly_typing, generation) = {
                let mut inner = self.inner.lock().await;
                inner.typing_generation += 1;
                let generation = inner.typing_generation;
                let peers = inner.typing_peers.entry(conversation_id.clone()).or_default();
                let newly_typing = peers.insert(user_id.clone(), generation).is_none();
                (newly_typing, generation)
            };
            self.spawn_peer_typing_expiry(conversation_id.clone(), user_id, generation);
            if newly_typing {
                self.emit_typing_changed(&conversation_id).await;
            }
        } else {
            let removed = {
                let mut inner = self.inner.lock().await;
                let removed = inner
                    .typing_peers
                    .get_mut(&conversation_id)
                    .is_some_and(|peers| peers.remove(&user_id).is_some());
                let now_empty = inner
                    .typing_peers
                    .get(&conversation_id)
                    .is_some_and(HashMap::is_empty);
                if removed && now_empty {
                    inner.typing_peers.remove(&conversation_id);
                }
                removed
            };
            if removed {
                self.emit_typing_changed(&conversation_id).await;
            }
        }
    }

    fn spawn_peer_typing_expiry(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        user_id: UserId,
        generation: u64,
    ) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE_TIMEOUT).await;
            let expired = {
                let mut inner = client.inner.lock().await;
                let Some(peers) = inner.typing_peers.get_mut(&conversation_id) else {
                    return;
                };
                if peers.get(&user_id) != Some(&generation) {
                    return;
                }
                peers.remove(&user_id);
                if peers.is_empty() {
                    inner.typing_peers.remove(&conversation_id);
                }
                true
            };
            if expired {
                client.emit_typing_changed(&conversation_id).await;
            }
        });
    }

    async fn emit_typing_changed(&self, conversation_id: &ConversationId) {
        let user_ids = self.typing_peers(conversation_id).await;
        self.emit(ClientEvent::TypingChanged {
            conversation_id: conversation_id.clone(),
            user_ids,
        });
    }

    async fn api_context(&self) -> Result<(String, String)> {
        let token = self
            .inner
            .lock()
            .await
            .token
            .clone()
            .ok_or_else(|| anyhow!("not connected: missing session token"))?;
        Ok((self.config.api_base.clone(), token))
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.map_err(|err| {
            warn!("messaging: backend request failed: {err}");
            err
        })?;
        error::decode_api_response(response).await
    }

    async fn execute_unit(&self, request: reqwest::RequestBuilder) -> Result<()> {
        let response = request.send().await.map_err(|err| {
            warn!("messaging: backend request failed: {err}");
            err
        })?;
        error::ensure_api_success(response).await
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
