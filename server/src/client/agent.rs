use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::handlers::{HandlerId, HandlerRegistry};
use crate::client::policy::{Backoff, ReconnectPolicy};
use crate::error::ClientError;
use crate::ws::channel::{ChannelKey, Params};
use crate::ws::message::{ClientMessage, Event, EventKind, Outbound, ServerMessage};

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub endpoint, e.g. `ws://localhost:3001/ws`
    pub url: String,
    /// Access token appended as `?token=`
    pub token: String,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    fn endpoint(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.url)?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; reached only through [`Client::shutdown`].
    Closed,
}

/// Subscriptions in the order they were first requested.
#[derive(Default)]
struct SubscriptionList {
    entries: Vec<(ChannelKey, String, Params)>,
}

impl SubscriptionList {
    fn add(&mut self, channel: &str, params: &Params) {
        let key = ChannelKey::new(channel, params);
        if !self.entries.iter().any(|(k, _, _)| *k == key) {
            self.entries.push((key, channel.to_string(), params.clone()));
        }
    }

    fn remove(&mut self, channel: &str, params: &Params) {
        let key = ChannelKey::new(channel, params);
        self.entries.retain(|(k, _, _)| *k != key);
    }

    fn replay(&self) -> Vec<ClientMessage> {
        self.entries
            .iter()
            .map(|(_, channel, params)| ClientMessage::Subscribe {
                channel: channel.clone(),
                params: params.clone(),
            })
            .collect()
    }
}

struct Shared {
    subscriptions: Mutex<SubscriptionList>,
    handlers: Mutex<HandlerRegistry>,
}

/// Handle to the reconnecting hub connection. Cheap to clone.
///
/// Dropping every handle stops the agent, as does [`Client::shutdown`].
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<ClientMessage>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Client {
    /// Spawn the agent. The first connection attempt starts immediately;
    /// failures are retried per the reconnect policy and never reported here.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = config.endpoint()?;
        let shared = Arc::new(Shared {
            subscriptions: Mutex::new(SubscriptionList::default()),
            handlers: Mutex::new(HandlerRegistry::default()),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        let agent = Agent {
            endpoint,
            backoff: Backoff::new(config.reconnect),
            shared: shared.clone(),
            commands: command_rx,
            state: state_tx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(agent.run());

        Ok(Self {
            shared,
            commands,
            state,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the agent reports `target`.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Subscribe now if connected, and on every future reconnect.
    pub fn subscribe(&self, channel: &str, params: Params) -> Result<(), ClientError> {
        self.shared.subscriptions.lock().add(channel, &params);
        self.send(ClientMessage::Subscribe {
            channel: channel.to_string(),
            params,
        })
    }

    pub fn unsubscribe(&self, channel: &str, params: Params) -> Result<(), ClientError> {
        self.shared.subscriptions.lock().remove(channel, &params);
        self.send(ClientMessage::Unsubscribe {
            channel: channel.to_string(),
            params,
        })
    }

    /// Application-level ping; the hub answers with `pong`.
    pub fn send_ping(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::Ping)
    }

    /// Channels that will be replayed on reconnect, in request order.
    pub fn subscriptions(&self) -> Vec<(String, Params)> {
        self.shared
            .subscriptions
            .lock()
            .entries
            .iter()
            .map(|(_, channel, params)| (channel.clone(), params.clone()))
            .collect()
    }

    pub fn on_event<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.handlers.lock().on_event(kind, Arc::new(handler))
    }

    pub fn on_channel<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&Params, &Value) + Send + Sync + 'static,
    {
        self.shared.handlers.lock().on_channel(channel, Arc::new(handler))
    }

    /// Handler for protocol messages (`connected`, `subscribed`, `pong`, `error`, ...).
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.shared.handlers.lock().on_message(Arc::new(handler))
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.handlers.lock().off(id)
    }

    /// Stop reconnecting and close the socket. Waits for the agent to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Closed);
        }
        self.commands.send(msg).map_err(|_| ClientError::Closed)
    }
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

struct Agent {
    endpoint: Url,
    backoff: Backoff,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<ClientMessage>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl Agent {
    async fn run(mut self) {
        loop {
            // Every Client handle is gone
            if self.commands.is_closed() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = connect_async(self.endpoint.as_str()) => result,
            };

            match attempt {
                Ok((stream, _)) => {
                    self.backoff.reset();
                    tracing::info!(url = %redacted(&self.endpoint), "Connected to hub");
                    if let SessionEnd::Shutdown = self.session(stream).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Hub connection attempt failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        tracing::debug!("Hub client stopped");
    }

    /// Drive one live connection until it drops or the client shuts down.
    async fn session(&mut self, stream: HubStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        // Anything queued while offline is superseded by the replay below
        while self.commands.try_recv().is_ok() {}

        let replay = self.shared.subscriptions.lock().replay();
        if !replay.is_empty() {
            tracing::debug!(subscriptions = replay.len(), "Replaying subscriptions");
        }
        for msg in &replay {
            if let Err(e) = send(&mut write, msg).await {
                tracing::warn!(error = %e, "Subscription replay failed");
                return SessionEnd::Dropped;
            }
        }
        self.set_state(ConnectionState::Connected);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                command = self.commands.recv() => match command {
                    Some(msg) => {
                        if let Err(e) = send(&mut write, &msg).await {
                            tracing::warn!(error = %e, "Send to hub failed");
                            return SessionEnd::Dropped;
                        }
                    }
                    None => {
                        // Every Client handle is gone
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(reason = ?frame, "Hub closed the connection");
                        return SessionEnd::Dropped;
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Hub connection error");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        tracing::info!("Hub connection ended");
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let frame: Outbound = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unrecognised frame from hub");
                return;
            }
        };
        if let Outbound::Message(ServerMessage::Error { message }) = &frame {
            tracing::warn!(message = %message, "Hub reported an error");
        }
        let dispatch = self.shared.handlers.lock().select(frame);
        dispatch.run();
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn send<S>(write: &mut S, msg: &ClientMessage) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(text) => write.send(Message::text(text)).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize client message");
            Ok(())
        }
    }
}

/// Endpoint without the token, for logs.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
