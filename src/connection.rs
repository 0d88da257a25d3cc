use crate::align::AnnotationMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Rules requested from the backend for each improvement level.
pub const RULE_COUNTS: [u32; 5] = [1, 3, 5, 10, 30];
pub const MAX_IMPROVEMENT_LEVEL: u8 = (RULE_COUNTS.len() - 1) as u8;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const PING_FRAME: &str = "ping";

pub fn improvement_rule_count(level: u8) -> u32 {
    RULE_COUNTS[usize::from(level.min(MAX_IMPROVEMENT_LEVEL))]
}

pub fn improvement_label(level: u8) -> &'static str {
    match level.min(MAX_IMPROVEMENT_LEVEL) {
        0 => "Minimal improvement",
        1 => "Slight improvement",
        2 => "Moderate improvement",
        3 => "Significant improvement",
        _ => "Major improvement",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub user_recipe: String,
    pub number_of_rules: u32,
    pub user_id: String,
}

impl BackendRequest {
    pub fn new(recipe: impl Into<String>, improvement_level: u8, user_id: impl Into<String>) -> Self {
        Self {
            user_recipe: recipe.into(),
            number_of_rules: improvement_rule_count(improvement_level),
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    #[serde(default)]
    pub annotations: AnnotationMap,
    /// Ingredient-separated rendering of the recipe; unused by the game.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ing_seperated: Option<String>,
    pub example_recipe: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping,
    Response(BackendResponse),
    Malformed(String),
}

pub fn decode_frame(text: &str) -> Frame {
    if text.trim() == PING_FRAME {
        return Frame::Ping;
    }
    match serde_json::from_str::<BackendResponse>(text) {
        Ok(response) => Frame::Response(response),
        Err(err) => Frame::Malformed(err.to_string()),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("connection to the backend is not open")]
    NotOpen,
    #[error("backend link has shut down")]
    Closed,
    #[error("failed to connect to backend: {0}")]
    Connect(String),
    #[error("backend socket error: {0}")]
    Socket(String),
    #[error("malformed backend message: {0}")]
    Malformed(String),
    #[error("failed to encode request: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Never,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            ReconnectPolicy::Fixed(delay) => Some(*delay),
            ReconnectPolicy::Never => None,
        }
    }
}

/// `Disconnected → Connecting → Open`, back to `Disconnected` on a drop,
/// and `Closed` for good after shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
}

impl ConnectionMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                self.attempts = self.attempts.saturating_add(1);
                true
            }
            ConnectionState::Closed => false,
            other => {
                warn!(state = ?other, "connect requested while not disconnected");
                false
            }
        }
    }

    pub fn opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
            self.attempts = 0;
        } else {
            warn!(state = ?self.state, "open reported outside of a connect attempt");
        }
    }

    /// Records a lost or failed connection; returns how long to wait before
    /// the next attempt, or `None` when the link should stop.
    pub fn dropped(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        match policy.delay() {
            Some(delay) => {
                self.state = ConnectionState::Disconnected;
                Some(delay)
            }
            None => {
                self.state = ConnectionState::Closed;
                None
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

#[cfg(feature = "web")]
pub use link::{BackendLink, LinkHandlers};

#[cfg(feature = "web")]
mod link {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use parking_lot::RwLock;
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch};
    use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
    use tracing::{debug, info};

    type MessageHandler = Arc<dyn Fn(BackendResponse) + Send + Sync>;
    type ErrorHandler = Arc<dyn Fn(&LinkError) + Send + Sync>;

    #[derive(Clone)]
    pub struct LinkHandlers {
        pub on_message: MessageHandler,
        pub on_error: ErrorHandler,
    }

    /// Reconnecting WebSocket link; drop it to shut it down.
    pub struct BackendLink {
        machine: Arc<RwLock<ConnectionMachine>>,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: watch::Sender<bool>,
    }

    impl BackendLink {
        /// Starts the connection loop on the current tokio runtime.
        pub fn spawn(url: impl Into<String>, policy: ReconnectPolicy, handlers: LinkHandlers) -> Self {
            let machine = Arc::new(RwLock::new(ConnectionMachine::default()));
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (shutdown, shutdown_rx) = watch::channel(false);
            tokio::spawn(link_loop(
                url.into(),
                policy,
                Arc::clone(&machine),
                outbound_rx,
                shutdown_rx,
                handlers,
            ));
            Self {
                machine,
                outbound,
                shutdown,
            }
        }

        pub fn state(&self) -> ConnectionState {
            self.machine.read().state()
        }

        pub fn send(&self, request: &BackendRequest) -> Result<(), LinkError> {
            match self.state() {
                ConnectionState::Open => {}
                ConnectionState::Closed => return Err(LinkError::Closed),
                _ => return Err(LinkError::NotOpen),
            }
            let text =
                serde_json::to_string(request).map_err(|err| LinkError::Encode(err.to_string()))?;
            self.outbound.send(text).map_err(|_| LinkError::Closed)
        }

        pub fn shutdown(&self) {
            let _ = self.shutdown.send(true);
        }
    }

    impl Drop for BackendLink {
        fn drop(&mut self) {
            self.shutdown();
        }
    }

    async fn link_loop(
        url: String,
        policy: ReconnectPolicy,
        machine: Arc<RwLock<ConnectionMachine>>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
        handlers: LinkHandlers,
    ) {
        loop {
            if *shutdown_rx.borrow() || !machine.write().begin_connect() {
                break;
            }
            info!(%url, "connecting to backend");
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    machine.write().opened();
                    info!(%url, "backend connection open");
                    let (mut sink, mut source) = stream.split();
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => {
                                let _ = sink.close().await;
                                machine.write().shutdown();
                                info!("backend link shut down");
                                return;
                            }
                            Some(text) = outbound_rx.recv() => {
                                if let Err(err) = sink.send(Message::Text(text)).await {
                                    report(&handlers, LinkError::Socket(err.to_string()));
                                    break;
                                }
                            }
                            frame = source.next() => match frame {
                                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                                    Frame::Ping => debug!("backend keep-alive"),
                                    Frame::Response(response) => (handlers.on_message)(response),
                                    Frame::Malformed(reason) => report(&handlers, LinkError::Malformed(reason)),
                                },
                                Some(Ok(Message::Close(close))) => {
                                    info!(?close, "backend closed the connection");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    report(&handlers, LinkError::Socket(err.to_string()));
                                    break;
                                }
                                None => break,
                            },
                        }
                    }
                }
                Err(err) => report(&handlers, LinkError::Connect(err.to_string())),
            }

            let delay = machine.write().dropped(&policy);
            let Some(delay) = delay else {
                break;
            };
            warn!(?delay, "reconnecting to backend");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    machine.write().shutdown();
                    break;
                }
            }
        }
        debug!(%url, "backend link loop exited");
    }

    fn report(handlers: &LinkHandlers, err: LinkError) {
        warn!(error = %err, "backend link error");
        (handlers.on_error)(&err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_counts_follow_improvement_level() {
        assert_eq!(improvement_rule_count(0), 1);
        assert_eq!(improvement_rule_count(3), 10);
        assert_eq!(improvement_rule_count(9), 30);
        assert_eq!(improvement_label(2), "Moderate improvement");
        let request = BackendRequest::new("toast bread", 4, "abc");
        assert_eq!(request.number_of_rules, 30);
        let payload = serde_json::to_value(&request).unwrap();
        assert_eq!(payload["user_recipe"], "toast bread");
    }

    #[test]
    fn frames_decode_pings_responses_and_garbage() {
        assert_eq!(decode_frame("ping"), Frame::Ping);
        let frame = decode_frame(
            r#"{"annotations": {"Oil": [["oil", 10]]}, "ing_seperated": "x", "example_recipe": "Heat oil."}"#,
        );
        let Frame::Response(response) = frame else {
            panic!("expected a response frame");
        };
        assert_eq!(response.example_recipe, "Heat oil.");
        assert!(response.annotations.annotated_indices().contains(&10));
        assert!(matches!(decode_frame("{not json"), Frame::Malformed(_)));
        assert!(matches!(decode_frame(r#"{"annotations": {}}"#), Frame::Malformed(_)));
    }

    #[test]
    fn machine_walks_connect_open_drop_cycle() {
        let mut machine = ConnectionMachine::default();
        let policy = ReconnectPolicy::default();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.begin_connect());
        assert!(!machine.begin_connect(), "already connecting");
        machine.opened();
        assert_eq!(machine.state(), ConnectionState::Open);
        assert_eq!(machine.dropped(&policy), Some(DEFAULT_RECONNECT_DELAY));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.begin_connect());
        assert_eq!(machine.dropped(&policy), Some(DEFAULT_RECONNECT_DELAY));
        assert_eq!(machine.attempts(), 1, "opening resets the count");
        assert!(machine.begin_connect());
        assert_eq!(machine.attempts(), 2);
        machine.opened();
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn shutdown_is_terminal() {
        let mut machine = ConnectionMachine::default();
        machine.begin_connect();
        machine.shutdown();
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(!machine.begin_connect());
        assert_eq!(machine.dropped(&ReconnectPolicy::default()), None);
    }

    #[test]
    fn never_policy_closes_on_drop() {
        let mut machine = ConnectionMachine::default();
        machine.begin_connect();
        assert_eq!(machine.dropped(&ReconnectPolicy::Never), None);
        assert_eq!(machine.state(), ConnectionState::Closed);
    }
}
