//! Binance Ticker Stream Client
//!
//! One shared WebSocket carrying the 24h ticker channel of every subscribed
//! major symbol.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.binance.com:9443/ws`
//!
//! # Protocol
//!
//! Control frames are JSON `{"method","params","id"}`; data frames are
//! ticker objects discriminated by `e`.
//!
//! # Architecture
//!
//! [`BinanceStreamClient`] is a thin handle. Every request becomes a
//! [`Command`] on an unbounded channel, consumed by a single driver task
//! that owns the socket, the symbol set and the [`LinkMachine`]. Callers
//! never wait on the network.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, StreamMessage, TickerCodec};
use super::heartbeat::{Heartbeat, HeartbeatConfig};
use super::messages::{ControlMethod, ControlRequest};
use crate::application::ports::{StreamingTransport, UpdateSender};
use crate::domain::connection::{
    ConnectionState, LinkAction, LinkEvent, LinkMachine, ReconnectConfig, ReconnectPolicy,
};
use crate::domain::symbol::Symbol;
use crate::infrastructure::config::StreamingSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsError = tokio_tungstenite::tungstenite::Error;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, WsError>> + Send>>;

const CLOSE_REASON: &str = "no active subscriptions";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur on the ticker connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No open connection to write to.
    #[error("connection not open")]
    NotConnected,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ticker stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Quote currency appended to channel names.
    pub quote_symbol: String,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl StreamClientConfig {
    /// Create a configuration with default heartbeat and backoff.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            quote_symbol: "usdt".to_string(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Create configuration from `StreamingSettings`.
    #[must_use]
    pub fn from_streaming_settings(settings: &StreamingSettings) -> Self {
        Self {
            url: settings.url.clone(),
            quote_symbol: settings.quote_symbol.clone(),
            heartbeat: HeartbeatConfig::from_streaming_settings(settings),
            reconnect: settings.reconnect_config(),
        }
    }
}

// =============================================================================
// Client Handle
// =============================================================================

/// Requests from the handle to the driver task.
#[derive(Debug)]
enum Command {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
    Disconnect,
    Retry,
}

/// Shared ticker stream for major symbols.
pub struct BinanceStreamClient {
    config: StreamClientConfig,
    commands: mpsc::UnboundedSender<Command>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
}

impl BinanceStreamClient {
    /// Create a client. No connection is made until a symbol is subscribed
    /// after [`StreamingTransport::attach`].
    #[must_use]
    pub fn new(config: StreamClientConfig) -> Self {
        let (commands, pending) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            commands,
            pending: Mutex::new(Some(pending)),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the driver task, closing any open connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Ticker stream driver has exited; command dropped");
        }
    }
}

impl StreamingTransport for BinanceStreamClient {
    fn attach(&self, handle: &Handle, updates: UpdateSender) {
        let Some(commands) = self.pending.lock().take() else {
            tracing::warn!("Ticker stream client already attached");
            return;
        };

        let driver = Driver {
            codec: TickerCodec::new(self.config.quote_symbol.clone()),
            machine: LinkMachine::new(ReconnectPolicy::new(self.config.reconnect.clone())),
            heartbeat: Heartbeat::new(self.config.heartbeat),
            url: self.config.url.clone(),
            commands,
            updates,
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            symbols: BTreeSet::new(),
            link: None,
            connecting: None,
            backoff: None,
            next_request_id: 0,
        };
        handle.spawn(driver.run());
    }

    fn subscribe(&self, symbols: &[Symbol]) {
        if !symbols.is_empty() {
            self.send(Command::Subscribe(symbols.to_vec()));
        }
    }

    fn unsubscribe(&self, symbols: &[Symbol]) {
        if !symbols.is_empty() {
            self.send(Command::Unsubscribe(symbols.to_vec()));
        }
    }

    fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn reconnect(&self) {
        self.send(Command::Retry);
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Drop for BinanceStreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for BinanceStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceStreamClient")
            .field("url", &self.config.url)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Driver Task
// =============================================================================

struct Driver {
    codec: TickerCodec,
    machine: LinkMachine,
    heartbeat: Heartbeat,
    url: String,
    commands: mpsc::UnboundedReceiver<Command>,
    updates: UpdateSender,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    symbols: BTreeSet<Symbol>,
    link: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    backoff: Option<Pin<Box<Sleep>>>,
    next_request_id: u64,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let connected = self.machine.state() == ConnectionState::Connected;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                result = wait_connect(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                () = wait_backoff(&mut self.backoff), if self.backoff.is_some() => {
                    self.backoff = None;
                    self.transition(LinkEvent::BackoffElapsed).await;
                }
                frame = next_frame(&mut self.link), if self.link.is_some() => {
                    self.on_frame(frame).await;
                }
                ping = self.heartbeat.tick(), if connected && self.link.is_some() => {
                    if let Some(ws) = self.link.as_mut()
                        && let Err(e) = ws.send(ping).await
                    {
                        tracing::warn!(error = %e, "Failed to send heartbeat ping");
                        self.link_lost(false).await;
                    }
                }
            }
        }

        self.connecting = None;
        self.backoff = None;
        self.symbols.clear();
        self.transition(LinkEvent::Shutdown).await;
        tracing::debug!("Ticker stream driver finished");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Subscribe(symbols) => {
                let added: Vec<Symbol> = symbols
                    .into_iter()
                    .filter(|s| self.symbols.insert(s.clone()))
                    .collect();
                if added.is_empty() {
                    return;
                }

                if self.machine.state() == ConnectionState::Connected
                    && let Err(e) = self.send_control(ControlMethod::Subscribe, &added).await
                {
                    tracing::warn!(error = %e, "Failed to send subscribe");
                    self.link_lost(false).await;
                }
                self.transition(LinkEvent::DemandChanged).await;
            }
            Command::Unsubscribe(symbols) => {
                let removed: Vec<Symbol> = symbols
                    .into_iter()
                    .filter(|s| self.symbols.remove(s))
                    .collect();
                if removed.is_empty() {
                    return;
                }

                if self.machine.state() == ConnectionState::Connected
                    && let Err(e) = self.send_control(ControlMethod::Unsubscribe, &removed).await
                {
                    tracing::warn!(error = %e, "Failed to send unsubscribe");
                    self.link_lost(false).await;
                }
                self.transition(LinkEvent::DemandChanged).await;
            }
            Command::Disconnect => {
                self.symbols.clear();
                self.transition(LinkEvent::Shutdown).await;
            }
            Command::Retry => {
                self.transition(LinkEvent::Retry).await;
            }
        }
    }

    async fn on_connect_result(&mut self, result: Result<WsStream, WsError>) {
        match result {
            Ok(ws) => {
                tracing::info!(url = %self.url, "Ticker stream connected");
                self.link = Some(ws);
                self.heartbeat.reset();
                self.transition(LinkEvent::Opened).await;
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Ticker stream connection failed");
                self.transition(LinkEvent::Closed { normal: false }).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()),
            Some(Ok(Message::Ping(data))) => {
                if let Some(ws) = self.link.as_mut()
                    && let Err(e) = ws.send(Message::Pong(data)).await
                {
                    tracing::warn!(error = %e, "Failed to answer ping");
                    self.link_lost(false).await;
                }
            }
            Some(Ok(Message::Pong(_))) => {
                tracing::trace!("Heartbeat pong received");
            }
            Some(Ok(Message::Close(frame))) => {
                let normal = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                tracing::info!(
                    normal,
                    code = ?frame.as_ref().map(|f| f.code),
                    "Server closed ticker stream"
                );
                self.link_lost(normal).await;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ticker stream error");
                self.link_lost(false).await;
            }
            None => {
                tracing::info!("Ticker stream ended");
                self.link_lost(false).await;
            }
        }
    }

    fn on_text(&self, text: &str) {
        let messages = match self.codec.decode(text) {
            Ok(messages) => messages,
            Err(e) => {
                metrics::record_malformed_frame();
                tracing::warn!(error = %e, "Dropping malformed ticker frame");
                return;
            }
        };

        for message in messages {
            match message {
                StreamMessage::Ticker(update) => {
                    if !self.symbols.contains(&update.symbol) {
                        tracing::trace!(symbol = %update.symbol, "Ignoring ticker for unsubscribed symbol");
                        continue;
                    }
                    match self.updates.try_send(update) {
                        Ok(()) => {}
                        Err(TrySendError::Full(update)) => {
                            metrics::record_update_dropped("overflow");
                            tracing::debug!(symbol = %update.symbol, "Update channel full; dropping ticker");
                        }
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!("Update channel closed");
                        }
                    }
                }
                StreamMessage::Ack { id } => {
                    tracing::debug!(?id, "Control request acknowledged");
                }
                StreamMessage::Rejected { code, msg } => {
                    tracing::warn!(code, msg = %msg, "Control request rejected");
                }
                StreamMessage::Other(event) => {
                    tracing::trace!(event = %event, "Ignoring non-ticker event");
                }
            }
        }
    }

    /// Feed an event to the state machine and carry out the resulting
    /// actions until it settles.
    async fn transition(&mut self, event: LinkEvent) {
        let mut action = self.machine.handle(event, !self.symbols.is_empty());

        loop {
            let follow_up = match action {
                LinkAction::None => None,
                LinkAction::Connect => {
                    tracing::info!(
                        url = %self.url,
                        symbols = self.symbols.len(),
                        "Connecting to ticker stream"
                    );
                    self.connecting = Some(connect(self.url.clone()));
                    None
                }
                LinkAction::SubscribeAll => {
                    let symbols: Vec<Symbol> = self.symbols.iter().cloned().collect();
                    match self.send_control(ControlMethod::Subscribe, &symbols).await {
                        Ok(()) => None,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to send batched subscribe");
                            self.link = None;
                            Some(LinkEvent::Closed { normal: false })
                        }
                    }
                }
                LinkAction::Close => {
                    self.connecting = None;
                    self.close_link().await;
                    None
                }
                LinkAction::ScheduleReconnect(delay) => {
                    metrics::record_reconnect();
                    let attempt = match self.machine.state() {
                        ConnectionState::Reconnecting { attempt } => attempt,
                        _ => 0,
                    };
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to ticker stream"
                    );
                    self.backoff = Some(Box::pin(tokio::time::sleep(delay)));
                    None
                }
            };

            self.publish_state();

            match follow_up {
                Some(event) => action = self.machine.handle(event, !self.symbols.is_empty()),
                None => break,
            }
        }

        if !matches!(self.machine.state(), ConnectionState::Reconnecting { .. }) {
            self.backoff = None;
        }
    }

    async fn link_lost(&mut self, normal: bool) {
        self.link = None;
        tracing::debug!(normal, pings_sent = self.heartbeat.sent(), "Ticker stream lost");
        self.transition(LinkEvent::Closed { normal }).await;
    }

    async fn close_link(&mut self) {
        let Some(mut ws) = self.link.take() else {
            return;
        };

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::from(CLOSE_REASON).into(),
        };
        if let Err(e) = ws.close(Some(frame)).await {
            tracing::debug!(error = %e, "Error while closing ticker stream");
        }
        tracing::info!(pings_sent = self.heartbeat.sent(), "Ticker stream closed");
    }

    async fn send_control(
        &mut self,
        method: ControlMethod,
        symbols: &[Symbol],
    ) -> Result<(), StreamClientError> {
        self.next_request_id += 1;
        let request = ControlRequest::for_symbols(
            method,
            symbols,
            self.codec.quote(),
            self.next_request_id,
        );
        let json = self.codec.encode(&request)?;

        let ws = self.link.as_mut().ok_or(StreamClientError::NotConnected)?;
        tracing::debug!(method = ?method, channels = ?request.params, "Sending control request");
        ws.send(Message::Text(json.into())).await?;
        Ok(())
    }

    fn publish_state(&self) {
        let next = self.machine.state();
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            if next == ConnectionState::Exhausted {
                tracing::warn!("Ticker stream reconnect attempts exhausted; waiting for manual retry");
            } else {
                tracing::debug!(state = next.as_str(), "Ticker stream state changed");
            }
        }
    }
}

fn connect(url: String) -> ConnectFuture {
    Box::pin(async move {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(ws)
    })
}

async fn wait_connect(connecting: &mut Option<ConnectFuture>) -> Result<WsStream, WsError> {
    match connecting {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_backoff(backoff: &mut Option<Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(link: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match link {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
