use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use studyroom_types::{RowEvent, SubscriptionKey};

use crate::dispatcher::{Dispatcher, Subscription};
use crate::protocol::{
    ChannelFrame, EVENT_CLOSE, EVENT_ERROR, EVENT_REPLY, PHOENIX_TOPIC, socket_url,
};
use crate::{RealtimeError, RealtimeSource};

/// The backend drops sockets that stay silent for longer than ~30s.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Heartbeats allowed to go unanswered before the socket is considered dead.
const MAX_MISSED_HEARTBEATS: u8 = 2;

/// Wait before each reconnect attempt; the last entry repeats.
const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

enum ChannelCommand {
    Join(SubscriptionKey),
    /// Sent whenever a subscription closes; the socket task leaves only if
    /// the dispatcher has no subscriber left for the key.
    Leave(SubscriptionKey),
    AccessToken(Option<String>),
}

/// Realtime source backed by the hosted backend's websocket. Each key with at
/// least one open subscription is joined as one channel on a shared socket.
/// A dropped socket is reconnected with backoff and every channel rejoined,
/// so open subscriptions keep receiving.
#[derive(Clone)]
pub struct RealtimeClient {
    hub: Dispatcher,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    connected: Arc<AtomicBool>,
}

impl RealtimeClient {
    pub async fn connect(
        project_url: &str,
        anon_key: &str,
        access_token: Option<String>,
    ) -> Result<Self, RealtimeError> {
        let url = socket_url(project_url, anon_key)
            .ok_or_else(|| RealtimeError::InvalidUrl(project_url.to_string()))?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Realtime socket connected to {}", project_url);

        let hub = Dispatcher::new();
        let connected = Arc::new(AtomicBool::new(true));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = SocketState::new(hub.clone(), access_token);
        tokio::spawn(run_client(url, ws_stream, command_rx, state, connected.clone()));

        Ok(Self {
            hub,
            commands,
            connected,
        })
    }

    /// Re-authorize every joined channel after a sign-in, sign-out or token refresh.
    pub fn set_access_token(&self, token: Option<String>) {
        let _ = self.commands.send(ChannelCommand::AccessToken(token));
    }

    /// Whether the socket is up right now. False while reconnecting.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the socket task is still alive, connected or reconnecting.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl RealtimeSource for RealtimeClient {
    fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription, RealtimeError> {
        if self.commands.is_closed() {
            return Err(RealtimeError::Closed);
        }
        let commands = self.commands.clone();
        let subscription = self.hub.subscribe_with_release(
            key.clone(),
            Some(Box::new(move |key, _remaining| {
                let _ = commands.send(ChannelCommand::Leave(key.clone()));
            })),
        );
        self.commands
            .send(ChannelCommand::Join(key))
            .map_err(|_| RealtimeError::Closed)?;
        Ok(subscription)
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct SocketState {
    hub: Dispatcher,
    access_token: Option<String>,
    /// topic -> key, for every channel currently joined
    joined: HashMap<String, SubscriptionKey>,
    next_ref: u64,
    pending_heartbeat: Option<String>,
}

impl SocketState {
    fn new(hub: Dispatcher, access_token: Option<String>) -> Self {
        Self {
            hub,
            access_token,
            joined: HashMap::new(),
            next_ref: 0,
            pending_heartbeat: None,
        }
    }

    /// Join frames for every channel that was open when the socket dropped.
    fn rejoin(&mut self) -> Vec<ChannelFrame> {
        self.pending_heartbeat = None;
        let keys: Vec<SubscriptionKey> = self.joined.values().cloned().collect();
        keys.iter()
            .map(|key| {
                let reference = self.next_ref();
                ChannelFrame::join(key, self.access_token.as_deref(), reference)
            })
            .collect()
    }

    fn next_ref(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    /// Frames to send for a command, updating the joined set.
    fn handle_command(&mut self, command: ChannelCommand) -> Vec<ChannelFrame> {
        match command {
            ChannelCommand::Join(key) => {
                let topic = key.topic();
                if self.joined.contains_key(&topic) {
                    return Vec::new();
                }
                let reference = self.next_ref();
                let frame = ChannelFrame::join(&key, self.access_token.as_deref(), reference);
                info!("Joining realtime channel {}", topic);
                self.joined.insert(topic, key);
                vec![frame]
            }
            ChannelCommand::Leave(key) => {
                if self.hub.active(&key) > 0 {
                    return Vec::new();
                }
                let topic = key.topic();
                if self.joined.remove(&topic).is_none() {
                    return Vec::new();
                }
                info!("Leaving realtime channel {}", topic);
                vec![ChannelFrame::leave(&topic, self.next_ref())]
            }
            ChannelCommand::AccessToken(token) => {
                self.access_token = token;
                let Some(token) = self.access_token.clone() else {
                    return Vec::new();
                };
                let topics: Vec<String> = self.joined.keys().cloned().collect();
                topics
                    .iter()
                    .map(|topic| ChannelFrame::access_token(topic, &token, self.next_ref()))
                    .collect()
            }
        }
    }

    fn handle_frame(&mut self, frame: ChannelFrame) {
        if frame.topic == PHOENIX_TOPIC {
            if frame.event == EVENT_REPLY && frame.reference == self.pending_heartbeat {
                self.pending_heartbeat = None;
            }
            return;
        }

        if let Some(record) = frame.inserted_record() {
            match self.joined.get(&frame.topic) {
                Some(key) => {
                    let delivered = self.hub.publish(RowEvent::new(key.clone(), record.clone()));
                    trace!("Row insert on {} delivered to {} subscribers", key, delivered);
                }
                None => debug!("Row insert for unjoined topic {}", frame.topic),
            }
            return;
        }

        match frame.event.as_str() {
            EVENT_REPLY if frame.reply_ok() == Some(false) => {
                warn!("Realtime channel {} rejected: {}", frame.topic, frame.payload);
            }
            EVENT_ERROR | EVENT_CLOSE => {
                warn!("Realtime channel {} closed by server ({})", frame.topic, frame.event);
                self.joined.remove(&frame.topic);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketEnd {
    /// Every client handle and subscription is gone.
    Shutdown,
    Dropped,
}

async fn run_client(
    url: String,
    mut ws_stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    mut state: SocketState,
    connected: Arc<AtomicBool>,
) {
    loop {
        connected.store(true, Ordering::SeqCst);
        let end = run_socket(ws_stream, &mut commands, &mut state).await;
        connected.store(false, Ordering::SeqCst);
        if end == SocketEnd::Shutdown {
            break;
        }

        warn!(
            "Realtime socket dropped; {} channels wait to rejoin",
            state.joined.len()
        );
        match reconnect(&url, &mut commands, &mut state).await {
            Some(stream) => ws_stream = stream,
            None => break,
        }
    }
    info!("Realtime client stopped");
}

/// Retry until a socket opens. Commands arriving meanwhile only update the
/// joined set; the rejoin after reconnecting sends what is still wanted.
async fn reconnect(
    url: &str,
    commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    state: &mut SocketState,
) -> Option<WsStream> {
    let mut attempt: usize = 0;
    loop {
        let delay = RECONNECT_DELAYS[attempt.min(RECONNECT_DELAYS.len() - 1)];
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => {
                    let Some(command) = command else { return None };
                    state.handle_command(command);
                }
            }
        }

        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _)) => {
                info!("Realtime socket reconnected after {} attempts", attempt + 1);
                return Some(stream);
            }
            Err(e) => {
                attempt += 1;
                warn!("Realtime reconnect attempt {} failed: {}", attempt, e);
            }
        }
    }
}

async fn run_socket(
    ws_stream: WsStream,
    commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    state: &mut SocketState,
) -> SocketEnd {
    let (mut sender, mut receiver) = ws_stream.split();
    for frame in state.rejoin() {
        if send_frame(&mut sender, &frame).await.is_err() {
            return SocketEnd::Dropped;
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { return SocketEnd::Shutdown };
                for frame in state.handle_command(command) {
                    if send_frame(&mut sender, &frame).await.is_err() {
                        return SocketEnd::Dropped;
                    }
                }
            }
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ChannelFrame>(&text) {
                            Ok(frame) => state.handle_frame(frame),
                            Err(e) => warn!(
                                "Bad realtime frame: {} -- raw: {}",
                                e,
                                text.chars().take(200).collect::<String>()
                            ),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return SocketEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime socket error: {}", e);
                        return SocketEnd::Dropped;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if state.pending_heartbeat.is_some() {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                        warn!(
                            "Realtime heartbeat timeout (missed {}), dropping socket",
                            missed_heartbeats
                        );
                        return SocketEnd::Dropped;
                    }
                } else {
                    missed_heartbeats = 0;
                }
                let reference = state.next_ref();
                state.pending_heartbeat = Some(reference.to_string());
                if send_frame(&mut sender, &ChannelFrame::heartbeat(reference)).await.is_err() {
                    return SocketEnd::Dropped;
                }
            }
        }
    }
}

async fn send_frame<S>(sender: &mut S, frame: &ChannelFrame) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|e| warn!("Frame encode failed: {}", e))?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(|e| warn!("Realtime send failed: {}", e))
}
