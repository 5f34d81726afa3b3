use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientCommand, GatewayEvent};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const GATEWAY_EVENT_CAPACITY: usize = 1024;
const GATEWAY_OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct GatewayConnectOptions {
    pub gateway_url: String,
    pub token: String,
}

/// One live connection to the messaging gateway. Dropping every subscriber's
/// receiver does not close the socket; the session owner calls `close`.
/// Subscribers observe a closed broadcast channel when the connection dies.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    async fn send(&self, command: ClientCommand) -> Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, options: GatewayConnectOptions) -> Result<Arc<dyn GatewaySession>>;
}

pub struct MissingGatewayConnector;

#[async_trait]
impl GatewayConnector for MissingGatewayConnector {
    async fn connect(&self, _options: GatewayConnectOptions) -> Result<Arc<dyn GatewaySession>> {
        Err(anyhow!("messaging gateway connector is unavailable"))
    }
}

/// Production connector: websocket with the auth token in the query string,
/// JSON text frames carrying the tagged command/event enums.
pub struct WebSocketGatewayConnector;

#[async_trait]
impl GatewayConnector for WebSocketGatewayConnector {
    async fn connect(&self, options: GatewayConnectOptions) -> Result<Arc<dyn GatewaySession>> {
        let ws_url = gateway_ws_url(&options.gateway_url, &options.token)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {}", options.gateway_url))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // The reader task owns the only event sender: when the socket dies,
        // dropping it is what tells subscribers the connection is gone. The
        // session keeps a receiver prototype for resubscription.
        let (event_sender, events_rx) = broadcast::channel(GATEWAY_EVENT_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(GATEWAY_OUTBOUND_CAPACITY);

        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(event) => {
                            let _ = event_sender.send(event);
                        }
                        Err(err) => {
                            warn!("gateway: dropping unparseable event frame: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("gateway: websocket receive failed: {err}");
                        break;
                    }
                }
            }
            drop(event_sender);
        });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(frame).await {
                    warn!("gateway: websocket send failed: {err}");
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        debug!("gateway: websocket connected");
        Ok(Arc::new(WebSocketGatewaySession {
            outbound: outbound_tx,
            events_rx,
            reader_task,
            writer_task,
        }))
    }
}

struct WebSocketGatewaySession {
    outbound: mpsc::Sender<Message>,
    events_rx: broadcast::Receiver<GatewayEvent>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

#[async_trait]
impl GatewaySession for WebSocketGatewaySession {
    async fn send(&self, command: ClientCommand) -> Result<()> {
        let frame = Message::Text(serde_json::to_string(&command)?);
        self.outbound
            .send(frame)
            .await
            .map_err(|_| anyhow!("gateway connection is closed"))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events_rx.resubscribe()
    }

    async fn close(&self) -> Result<()> {
        self.reader_task.abort();
        self.writer_task.abort();
        Ok(())
    }
}

fn gateway_ws_url(gateway_url: &str, token: &str) -> Result<String> {
    let base = if gateway_url.starts_with("https://") {
        gateway_url.replacen("https://", "wss://", 1)
    } else if gateway_url.starts_with("http://") {
        gateway_url.replacen("http://", "ws://", 1)
    } else if gateway_url.starts_with("wss://") || gateway_url.starts_with("ws://") {
        gateway_url.to_string()
    } else {
        return Err(anyhow!(
            "gateway_url must start with http://, https://, ws:// or wss://"
        ));
    };

    let mut url = url::Url::parse(&format!("{}/ws", base.trim_end_matches('/')))
        .with_context(|| format!("invalid gateway url: {gateway_url}"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
