use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use client_core::{
    session::{IdentityProvider, IdentityState, IdentityUser, SessionManager},
    session_store::DurableSessionStore,
    transport::WebSocketGatewayConnector,
    ClientEvent, MessagingClient, MessagingClientConfig,
};
use shared::{
    domain::{ConversationId, Role},
    protocol::GatewayEvent,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    gateway_url: Option<String>,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    /// student, tutor or admin; only used when registering
    #[arg(long, default_value = "student")]
    role: String,
    /// Register a new account instead of signing in
    #[arg(long)]
    register: bool,
    #[arg(long)]
    name: Option<String>,
    /// Conversation to open for an interactive chat
    #[arg(long)]
    conversation: Option<String>,
}

/// Terminal stand-in for the hosted identity service: the real frontends
/// bind a browser OAuth/password provider here, which has no popup surface
/// in a terminal build.
struct CliIdentityProvider {
    state: broadcast::Sender<IdentityState>,
}

impl CliIdentityProvider {
    fn new() -> Self {
        let (state, _) = broadcast::channel(8);
        Self { state }
    }

    fn emit_signed_in(&self, email: &str) {
        let _ = self.state.send(IdentityState::SignedIn(IdentityUser {
            display_name: None,
            email: email.to_string(),
            photo_url: None,
        }));
    }
}

#[async_trait]
impl IdentityProvider for CliIdentityProvider {
    async fn create_user(&self, email: &str, _password: &str) -> Result<IdentityUser> {
        self.emit_signed_in(email);
        Ok(IdentityUser {
            display_name: None,
            email: email.to_string(),
            photo_url: None,
        })
    }

    async fn sign_in(&self, email: &str, _password: &str) -> Result<IdentityUser> {
        self.emit_signed_in(email);
        Ok(IdentityUser {
            display_name: None,
            email: email.to_string(),
            photo_url: None,
        })
    }

    async fn sign_in_with_popup(&self) -> Result<IdentityUser> {
        Err(anyhow!(
            "interactive sign-in is not available in the terminal client"
        ))
    }

    async fn sign_out(&self) -> Result<()> {
        let _ = self.state.send(IdentityState::SignedOut);
        Ok(())
    }

    fn subscribe_state(&self) -> broadcast::Receiver<IdentityState> {
        self.state.subscribe()
    }
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "student" => Ok(Role::Student),
        "tutor" => Ok(Role::Tutor),
        "admin" => Ok(Role::Admin),
        other => Err(anyhow!("unknown role '{other}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = load_settings();

    let server_url = args.server_url.unwrap_or(settings.server_url);
    let gateway_url = args
        .gateway_url
        .or(settings.gateway_url)
        .unwrap_or_else(|| server_url.clone());

    let store = DurableSessionStore::initialize(&DurableSessionStore::sqlite_url_for_data_dir(
        Path::new(&settings.data_dir),
    ))
    .await?;
    let identity = Arc::new(CliIdentityProvider::new());
    let session = SessionManager::new(server_url.clone(), identity, store);
    let _reconcile = session.spawn_reconcile_task();

    let user = if args.register {
        let name = args.name.clone().unwrap_or_else(|| args.email.clone());
        session
            .register(&name, &args.email, &args.password, parse_role(&args.role)?)
            .await?
    } else {
        session.login(&args.email, &args.password).await?
    };
    println!("signed in as {} ({:?})", user.name, user.role);

    let token = session
        .token()
        .await
        .ok_or_else(|| anyhow!("no session token after sign-in"))?;

    let client = MessagingClient::new(
        MessagingClientConfig::new(server_url, gateway_url),
        Arc::new(WebSocketGatewayConnector),
    );
    client.connect(&token, user.user_id.clone()).await?;

    let conversations = client.fetch_conversations().await?;
    println!("{} conversation(s):", conversations.len());
    for conversation in &conversations {
        let names: Vec<&str> = conversation
            .participants
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        println!(
            "  {}  [{} unread]  {}",
            conversation.conversation_id,
            conversation.my_unread_count,
            names.join(", ")
        );
    }

    let Some(conversation) = args.conversation else {
        client.disconnect().await?;
        return Ok(());
    };
    let conversation_id = ConversationId::new(conversation);
    client.open_conversation(&conversation_id).await?;
    client.mark_conversation_read(&conversation_id).await?;

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::Gateway(GatewayEvent::NewMessage { message }) => {
                    println!(
                        "[{}] {}: {}",
                        message.created_at.format("%H:%M:%S"),
                        message.sender_id,
                        message.content
                    );
                }
                ClientEvent::TypingChanged { user_ids, .. } if !user_ids.is_empty() => {
                    println!("... typing");
                }
                ClientEvent::Notification(message) => eprintln!("! {message}"),
                ClientEvent::Error(message) => eprintln!("! {message}"),
                _ => {}
            }
        }
    });

    println!("type a message and press enter; /quit to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        client.notify_typing(&conversation_id).await?;
        if let Err(err) = client.send_message(&line).await {
            eprintln!("! send failed: {err}");
        }
    }

    client.close_conversation().await?;
    client.disconnect().await?;
    Ok(())
}
