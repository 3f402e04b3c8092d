//! Transport channel: one persistent WebSocket to a logical endpoint, with
//! transparent reconnection.
//!
//! The connection loop lives in its own tokio task; the [`Channel`] handle is
//! fully non-blocking. Unexpected disconnects are retried forever with
//! exponential backoff (reset on every successful open); [`Channel::close`]
//! suppresses all further attempts and cancels a pending retry sleep.
//! Connection failures are never fatal and never surfaced as user-facing
//! errors by themselves.

pub mod backoff;
pub mod websocket;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time;

pub use backoff::{Backoff, DEFAULT_BASE, DEFAULT_CAP};
pub use websocket::{Connector, Socket, WsConnector};

/// Logical endpoint classes the channel may be opened against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Direct-message stream, keyed by the local user.
    Direct { user_id: String },
    /// Group stream, keyed by group and local user.
    Group { group_id: String, user_id: String },
}

impl Endpoint {
    /// URL path of the socket route for this endpoint.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Direct { user_id } => format!("/ws/chat/{}", user_id),
            Endpoint::Group { group_id, user_id } => {
                format!("/ws/groups/{}/{}", group_id, user_id)
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Direct { user_id } => write!(f, "direct:{}", user_id),
            Endpoint::Group { group_id, user_id } => {
                write!(f, "group:{}:{}", group_id, user_id)
            }
        }
    }
}

/// Lifecycle and inbound-frame notifications delivered to the channel owner.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Socket (re)opened successfully.
    Open,
    /// Parsed inbound frame. Frames that fail to parse as JSON are dropped
    /// before this point.
    Frame(serde_json::Value),
    /// A connect attempt or live socket failed; the channel retries on its
    /// own, this is informational.
    Error(String),
    /// The channel is permanently down (closed by caller or handle dropped).
    /// Always the final event.
    Closed,
}

/// Handle to one channel subscription.
///
/// Dropping the handle tears the connection down the same way `close` does.
pub struct Channel {
    out_tx: mpsc::UnboundedSender<String>,
    close_tx: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
    endpoint: Endpoint,
}

impl Channel {
    /// Open a channel with default backoff bounds. Connects immediately.
    pub fn open(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self::open_with_backoff(connector, endpoint, events, Backoff::default())
    }

    pub fn open_with_backoff(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        events: mpsc::UnboundedSender<ChannelEvent>,
        backoff: Backoff,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run(
            connector,
            endpoint.clone(),
            events,
            out_rx,
            close_rx,
            Arc::clone(&connected),
            backoff,
        ));

        Self {
            out_tx,
            close_tx,
            connected,
            endpoint,
        }
    }

    /// Best-effort, fire-and-forget send. A no-op when the socket is not
    /// currently open; callers needing guaranteed delivery use the confirmed
    /// send path instead.
    pub fn send(&self, event: &serde_json::Value) {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::debug!("send on {} while not open -- dropped", self.endpoint);
            return;
        }
        let _ = self.out_tx.send(event.to_string());
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.close_tx.send(true);
    }

    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Resolves once the closed-by-caller flag is set (or the handle is gone).
async fn wait_closed(close_rx: &mut watch::Receiver<bool>) {
    loop {
        if *close_rx.borrow() {
            return;
        }
        if close_rx.changed().await.is_err() {
            // handle dropped without an explicit close
            return;
        }
    }
}

enum PumpExit {
    /// Closed by caller (or handle dropped): stop for good.
    Caller,
    /// Socket dropped out from under us: reconnect.
    Disconnected(Option<anyhow::Error>),
}

async fn run(
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    mut close_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    mut backoff: Backoff,
) {
    loop {
        if *close_rx.borrow() {
            break;
        }

        let attempt = tokio::select! {
            result = connector.connect(&endpoint) => result,
            _ = wait_closed(&mut close_rx) => break,
        };

        match attempt {
            Ok(mut socket) => {
                backoff.reset();
                connected.store(true, Ordering::SeqCst);
                let _ = events.send(ChannelEvent::Open);

                let exit = pump(
                    socket.as_mut(),
                    &endpoint,
                    &events,
                    &mut out_rx,
                    &mut close_rx,
                )
                .await;
                connected.store(false, Ordering::SeqCst);

                match exit {
                    PumpExit::Caller => break,
                    PumpExit::Disconnected(err) => {
                        if let Some(e) = err {
                            tracing::warn!("{} disconnected: {:#}", endpoint, e);
                            let _ = events.send(ChannelEvent::Error(format!("{:#}", e)));
                        } else {
                            tracing::info!("{} closed by server", endpoint);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("connect to {} failed: {:#}", endpoint, e);
                let _ = events.send(ChannelEvent::Error(format!("{:#}", e)));
            }
        }

        if *close_rx.borrow() {
            break;
        }
        let delay = backoff.next_delay();
        tracing::debug!("reconnecting {} in {:?}", endpoint, delay);

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                _ = wait_closed(&mut close_rx) => {
                    cancelled = true;
                    break;
                }
                msg = out_rx.recv() => {
                    // sends while disconnected are no-ops
                    if msg.is_none() {
                        cancelled = true;
                        break;
                    }
                }
            }
        }
        if cancelled {
            break;
        }
    }

    let _ = events.send(ChannelEvent::Closed);
}

/// Pump one live socket until it drops or the caller closes the channel.
async fn pump(
    socket: &mut dyn Socket,
    endpoint: &Endpoint,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
    close_rx: &mut watch::Receiver<bool>,
) -> PumpExit {
    loop {
        tokio::select! {
            frame = socket.recv_frame() => match frame {
                Ok(Some(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => {
                        if events.send(ChannelEvent::Frame(value)).is_err() {
                            return PumpExit::Caller;
                        }
                    }
                    Err(_) => {
                        // malformed frames must never crash the consumer
                        tracing::debug!("dropping malformed frame on {}", endpoint);
                    }
                },
                Ok(None) => return PumpExit::Disconnected(None),
                Err(e) => return PumpExit::Disconnected(Some(e)),
            },
            msg = out_rx.recv() => match msg {
                Some(text) => {
                    if let Err(e) = socket.send_text(&text).await {
                        return PumpExit::Disconnected(Some(e));
                    }
                }
                None => return PumpExit::Caller,
            },
            _ = wait_closed(close_rx) => return PumpExit::Caller,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    fn endpoint() -> Endpoint {
        Endpoint::Direct {
            user_id: "u1".into(),
        }
    }

    /// Connector whose every attempt fails, counting attempts.
    struct FailingConnector {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Socket>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("connection refused"))
        }
    }

    /// Scripted socket action.
    enum Step {
        Frame(&'static str),
        CloseClean,
    }

    struct MockSocket {
        steps: VecDeque<Step>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Socket for MockSocket {
        async fn send_text(&mut self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn recv_frame(&mut self) -> Result<Option<String>> {
            match self.steps.pop_front() {
                Some(Step::Frame(text)) => Ok(Some(text.to_string())),
                Some(Step::CloseClean) => Ok(None),
                // script exhausted: stay connected forever
                None => futures::future::pending().await,
            }
        }
    }

    /// Connector handing out one scripted socket per attempt.
    struct ScriptedConnector {
        sockets: Mutex<VecDeque<Vec<Step>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        fn new(sockets: Vec<Vec<Step>>) -> Self {
            Self {
                sockets: Mutex::new(sockets.into_iter().collect()),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Socket>> {
            let steps = self
                .sockets
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("no more sockets"))?;
            Ok(Box::new(MockSocket {
                steps: steps.into_iter().collect(),
                sent: Arc::clone(&self.sent),
            }))
        }
    }

    #[test]
    fn test_endpoint_paths_and_names() {
        let direct = Endpoint::Direct {
            user_id: "u1".into(),
        };
        assert_eq!(direct.path(), "/ws/chat/u1");
        assert_eq!(direct.to_string(), "direct:u1");

        let group = Endpoint::Group {
            group_id: "g1".into(),
            user_id: "u1".into(),
        };
        assert_eq!(group.path(), "/ws/groups/g1/u1");
        assert_eq!(group.to_string(), "group:g1:u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FailingConnector {
            attempts: Arc::clone(&attempts),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, endpoint(), tx);

        time::sleep(Duration::from_millis(600)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);

        channel.close();
        time::sleep(Duration::from_millis(10)).await;
        let after_close = attempts.load(Ordering::SeqCst);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), after_close);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_reconnect_emits_fresh_open() {
        // First socket closes immediately; second stays up and pushes a frame.
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![Step::CloseClean],
            vec![Step::Frame(r#"{"type":"direct_message","payload":{"id":"s1"}}"#)],
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, endpoint(), tx);

        assert!(matches!(rx.recv().await, Some(ChannelEvent::Open)));
        assert!(matches!(rx.recv().await, Some(ChannelEvent::Open)));
        match rx.recv().await {
            Some(ChannelEvent::Frame(value)) => {
                assert_eq!(value["type"], "direct_message");
            }
            other => panic!("expected frame, got {:?}", other),
        }

        channel.close();
        loop {
            match rx.recv().await {
                Some(ChannelEvent::Closed) | None => break,
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_dropped() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            Step::Frame("this is not json"),
            Step::Frame(r#"{"type":"direct_message","payload":{"id":"s1"}}"#),
        ]]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = Channel::open(connector, endpoint(), tx);

        assert!(matches!(rx.recv().await, Some(ChannelEvent::Open)));
        // the malformed frame never surfaces; the next event is the valid one
        match rx.recv().await {
            Some(ChannelEvent::Frame(value)) => assert_eq!(value["payload"]["id"], "s1"),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_delivered_when_open_dropped_when_not() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![]]));
        let sent = Arc::clone(&connector.sent);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, endpoint(), tx);

        assert!(matches!(rx.recv().await, Some(ChannelEvent::Open)));
        channel.send(&serde_json::json!({"type": "typing"}));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        channel.close();
        channel.send(&serde_json::json!({"type": "typing"}));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        // close is idempotent
        channel.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_is_final_event() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FailingConnector {
            attempts: Arc::clone(&attempts),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, endpoint(), tx);
        channel.close();

        loop {
            match rx.recv().await {
                Some(ChannelEvent::Closed) => break,
                Some(ChannelEvent::Error(_)) => {}
                Some(other) => panic!("unexpected event {:?}", other),
                None => panic!("channel task ended without Closed"),
            }
        }
        assert!(rx.recv().await.is_none());
    }
}
