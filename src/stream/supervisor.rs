//! Stream connection supervisor
//!
//! Owns the single persistent connection's state machine and the read
//! loop that routes every inbound frame to exactly one consumer: the
//! subscription registry for data events, the lifecycle callbacks for
//! everything else.
//!
//! `start()` connects before returning, so a caller-supplied deadline can
//! wrap the connect phase; the read loop runs as a spawned task owned by
//! the supervisor. Every exit path of that task funnels through one
//! finish step that releases the transport, clears the control channel,
//! and reports the close - there is no way for the loop to die without
//! the closed callback observing it.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::callbacks::LifecycleCallbacks;
use super::protocol::{decode_frame, ControlMessage, InboundFrame};
use super::registry::{Dispatch, SubscriptionRegistry};
use super::transport::{CloseInfo, Transport, WsSink, WsStream};
use crate::error::{DataSiftError, Result};

/// Connection lifecycle state.
///
/// Transitions are monotonic within one connection attempt; `Closed`
/// back to `Connecting` happens only on an explicit restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotStarted,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Commands consumed by the read loop
enum Command {
    Control(ControlMessage),
    Shutdown,
}

/// State shared between the supervisor, the read loop task, and
/// outstanding subscription tokens.
struct StreamShared {
    state: RwLock<ConnectionState>,
    registry: SubscriptionRegistry,
    callbacks: LifecycleCallbacks,
    /// Present while a connection is up; cleared on close
    command_tx: RwLock<Option<UnboundedSender<Command>>>,
}

impl std::fmt::Debug for StreamShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamShared")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StreamShared {
    fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    fn send_command(&self, command: Command) {
        if let Some(tx) = self.command_tx.read().unwrap().as_ref() {
            // A send failure means the loop already exited; the close
            // path has reported it
            let _ = tx.send(command);
        }
    }

    /// Single close path for the read loop: transition to Closed, drop
    /// the control channel, report the close
    fn finish(&self, info: CloseInfo) {
        *self.command_tx.write().unwrap() = None;
        self.set_state(ConnectionState::Closing);
        self.set_state(ConnectionState::Closed);

        info!(
            clean = info.clean,
            code = info.code,
            reason = %info.reason,
            "Stream connection closed"
        );
        self.callbacks
            .fire_closed(info.clean, info.code, &info.reason);
    }
}

/// Supervisor for the persistent streaming connection.
///
/// Holds the subscription registry and lifecycle callbacks, which both
/// survive reconnects: subscriptions are keyed by stream hash, not by
/// connection instance, so a restart re-announces every registered hash.
pub struct StreamSupervisor {
    url: String,
    shared: Arc<StreamShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSupervisor {
    /// Create a supervisor for the given streaming endpoint. No I/O
    /// happens until `start()`.
    pub fn new(url: String) -> Self {
        Self {
            url,
            shared: Arc::new(StreamShared {
                state: RwLock::new(ConnectionState::NotStarted),
                registry: SubscriptionRegistry::new(),
                callbacks: LifecycleCallbacks::default(),
                command_tx: RwLock::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Connect and start the read loop.
    ///
    /// Returns once the connection is open and the opened callback has
    /// fired; there is no built-in timeout, wrap the call in a deadline
    /// if one is needed. Legal from `NotStarted` or `Closed`; a restart
    /// keeps all registered subscriptions and re-announces them to the
    /// service before the opened callback fires.
    ///
    /// On connect failure the closed callback fires with `clean = false`
    /// and the error is returned; the opened callback does not fire.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write().unwrap();
            match *state {
                ConnectionState::NotStarted | ConnectionState::Closed => {
                    *state = ConnectionState::Connecting;
                }
                _ => {
                    return Err(DataSiftError::Connection(
                        "Stream subscriber is already running".to_string(),
                    ))
                }
            }
        }

        let transport = match Transport::connect(&self.url).await {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.set_state(ConnectionState::Closed);
                self.shared
                    .callbacks
                    .fire_closed(false, 1006, &e.to_string());
                return Err(e);
            }
        };

        let (command_tx, command_rx) = unbounded_channel();

        // Subscriptions persist across reconnects; tell the service
        // about every hash we still hold before anything else goes out
        for hash in self.shared.registry.hashes() {
            let _ = command_tx.send(Command::Control(ControlMessage::Subscribe { hash }));
        }

        *self.shared.command_tx.write().unwrap() = Some(command_tx);
        self.shared.set_state(ConnectionState::Open);
        info!(url = %self.url, "Stream connection open");
        self.shared.callbacks.fire_open();

        let (sink, stream) = transport.split();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let info = read_loop(sink, stream, command_rx, &shared).await;
            shared.finish(info);
        });
        *self.task.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Request shutdown and wait for the read loop to finish.
    ///
    /// The closed callback fires (with a clean close) before this
    /// returns. A supervisor that is not running is left untouched.
    pub async fn stop(&self) -> Result<()> {
        let requested = {
            let tx = self.shared.command_tx.read().unwrap();
            match tx.as_ref() {
                Some(tx) => tx.send(Command::Shutdown).is_ok(),
                None => false,
            }
        };

        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            if requested {
                let _ = handle.await;
            } else {
                // Loop already finished on its own
                handle.abort();
            }
        } else {
            debug!("Stop requested but stream subscriber is not running");
        }
        Ok(())
    }

    /// Register a handler for a stream hash.
    ///
    /// Only legal while the connection is open. The handler observes all
    /// frames the service sends after the subscribe announcement; frames
    /// already in flight at registration time may or may not be seen.
    pub fn subscribe<F>(&self, hash: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if self.shared.state() != ConnectionState::Open {
            return Err(DataSiftError::StreamSubscriberNotStarted);
        }

        self.shared.registry.insert(hash, Arc::new(handler));
        self.shared
            .send_command(Command::Control(ControlMessage::Subscribe {
                hash: hash.to_string(),
            }));

        debug!(hash = %hash, "Subscribed");
        Ok(Subscription {
            hash: hash.to_string(),
            shared: Arc::clone(&self.shared),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Register the opened handler, replacing any previous one
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.callbacks.set_open(Arc::new(handler));
    }

    /// Register the closed handler: `(was_clean, code, reason)`
    pub fn on_closed<F>(&self, handler: F)
    where
        F: Fn(bool, u16, String) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_closed(Arc::new(handler));
    }

    /// Register the handler for interaction delete notices
    pub fn on_delete<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_delete(Arc::new(handler));
    }

    /// Register the handler for service protocol messages
    pub fn on_ds_message<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_ds_message(Arc::new(handler));
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        // Dropping the task drops the transport with it
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                debug!("Supervisor dropped, read loop aborted");
            }
        }
    }
}

/// Handle representing one act of subscribing; call `unsubscribe` to
/// tear the channel down.
#[derive(Debug)]
pub struct Subscription {
    hash: String,
    shared: Arc<StreamShared>,
    torn_down: AtomicBool,
}

impl Subscription {
    /// The stream hash this subscription is keyed by
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Request teardown of this subscription.
    ///
    /// The first call removes the local handler and sends the
    /// unsubscribe announcement - the server-side delete request. Until
    /// that delete round trip is complete the channel is not free, so a
    /// second call is rejected with `DeleteRequired`.
    pub fn unsubscribe(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Err(DataSiftError::DeleteRequired(self.hash.clone()));
        }

        self.shared.registry.remove(&self.hash);
        self.shared
            .send_command(Command::Control(ControlMessage::Unsubscribe {
                hash: self.hash.clone(),
            }));

        debug!(hash = %self.hash, "Unsubscribed");
        Ok(())
    }
}

/// Read loop: single task, frames processed strictly in arrival order.
///
/// A handler invocation for frame N completes before frame N+1 is
/// classified, so no two dispatches for the same hash are ever
/// concurrent on one connection.
async fn read_loop(
    mut sink: WsSink,
    mut stream: WsStream,
    mut command_rx: UnboundedReceiver<Command>,
    shared: &StreamShared,
) -> CloseInfo {
    debug!("Read loop started");

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(Command::Control(message)) => {
                    if let Err(e) = sink.send(Message::Text(message.encode())).await {
                        // Connection is going down; the stream side will
                        // report how
                        warn!(error = %e, "Failed to send control message");
                    }
                }
                Some(Command::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseInfo::local_shutdown();
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => route_frame(shared, decode_frame(&text)),
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data);
                    route_frame(shared, decode_frame(&text));
                }
                Some(Ok(Message::Close(frame))) => {
                    return CloseInfo::from_frame(frame);
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by tungstenite
                }
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    return CloseInfo::abnormal(e.to_string());
                }
                None => {
                    return CloseInfo::abnormal("Connection dropped without close handshake");
                }
            }
        }
    }
}

/// Route one decoded frame to exactly one consumer
fn route_frame(shared: &StreamShared, frame: InboundFrame) {
    match frame {
        InboundFrame::Data { hash, payload } => {
            match shared.registry.dispatch(&hash, payload) {
                Dispatch::Delivered | Dispatch::NoHandler => {}
                Dispatch::HandlerPanicked(detail) => {
                    error!(hash = %hash, detail = %detail, "Subscription handler panicked");
                    shared.callbacks.fire_ds_message(json!({
                        "status": "handler_error",
                        "hash": hash,
                        "message": detail,
                    }));
                }
            }
        }
        InboundFrame::Deleted { interaction } => shared.callbacks.fire_delete(interaction),
        InboundFrame::Protocol(message) => shared.callbacks.fire_ds_message(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    async fn next_event(rx: &mut UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_subscribe_before_start_fails() {
        let supervisor = StreamSupervisor::new("ws://127.0.0.1:1/multi".to_string());
        assert_eq!(supervisor.state(), ConnectionState::NotStarted);

        let err = supervisor.subscribe("0123456789abcdef", |_| {}).unwrap_err();
        assert!(matches!(err, DataSiftError::StreamSubscriberNotStarted));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_unclean_close() {
        // Bind then drop so the port refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let supervisor = StreamSupervisor::new(format!("ws://{}/multi", addr));
        let (tx, mut rx) = unbounded_channel();
        supervisor.on_closed(move |clean, _code, _reason| {
            let _ = tx.send(format!("closed:{}", clean));
        });
        let (open_tx, mut open_rx) = unbounded_channel();
        supervisor.on_open(move || {
            let _ = open_tx.send(());
        });

        assert!(supervisor.start().await.is_err());
        assert_eq!(supervisor.state(), ConnectionState::Closed);
        assert_eq!(next_event(&mut rx).await, "closed:false");
        assert!(open_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // First outbound frame from the client announces the subscription
            let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let announce: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(announce["action"], "subscribe");
            let hash = announce["hash"].as_str().unwrap().to_string();

            let frames = [
                format!(
                    r#"{{"hash":"{}","data":{{"interaction":{{"content":"first"}}}}}}"#,
                    hash
                ),
                format!(
                    r#"{{"hash":"{}","data":{{"interaction":{{"content":"second"}}}}}}"#,
                    hash
                ),
                // Nobody subscribed to this hash; must be discarded silently
                r#"{"hash":"ffffffffffffffff","data":{"interaction":{"content":"noise"}}}"#
                    .to_string(),
                r#"{"deleted":true,"interaction":{"id":"1e0a9"}}"#.to_string(),
                r#"{"status":"warning","message":"slow consumer"}"#.to_string(),
            ];
            for frame in frames {
                ws.send(Message::Text(frame)).await.unwrap();
            }
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            })))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let supervisor = StreamSupervisor::new(format!("ws://{}/multi", addr));
        let (event_tx, mut events) = unbounded_channel::<String>();

        let tx = event_tx.clone();
        supervisor.on_open(move || {
            let _ = tx.send("open".to_string());
        });
        let tx = event_tx.clone();
        supervisor.on_delete(move |interaction| {
            let id = interaction["interaction"]["id"].as_str().unwrap_or("").to_string();
            let _ = tx.send(format!("delete:{}", id));
        });
        let tx = event_tx.clone();
        supervisor.on_ds_message(move |message| {
            let _ = tx.send(format!("ds:{}", message["status"].as_str().unwrap_or("?")));
        });
        let tx = event_tx.clone();
        supervisor.on_closed(move |clean, code, reason| {
            let _ = tx.send(format!("closed:{}:{}:{}", clean, code, reason));
        });

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Open);
        assert_eq!(next_event(&mut events).await, "open");

        let tx = event_tx.clone();
        let subscription = supervisor
            .subscribe("feedbeeffeedbeef", move |payload| {
                let content = payload["interaction"]["content"].as_str().unwrap_or("").to_string();
                let _ = tx.send(format!("data:{}", content));
            })
            .unwrap();
        assert_eq!(subscription.hash(), "feedbeeffeedbeef");

        // Frames arrive in wire order; the unknown-hash frame between
        // "second" and the delete notice produces no event
        assert_eq!(next_event(&mut events).await, "data:first");
        assert_eq!(next_event(&mut events).await, "data:second");
        assert_eq!(next_event(&mut events).await, "delete:1e0a9");
        assert_eq!(next_event(&mut events).await, "ds:warning");
        assert_eq!(next_event(&mut events).await, "closed:true:1000:bye");
        assert_eq!(supervisor.state(), ConnectionState::Closed);

        // First unsubscribe is the teardown request; the second needs
        // the delete round trip to have completed
        subscription.unsubscribe().unwrap();
        assert!(matches!(
            subscription.unsubscribe(),
            Err(DataSiftError::DeleteRequired(_))
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_read_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // Two subscribe announcements, in registration order
            let mut hashes = Vec::new();
            for _ in 0..2 {
                let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
                let announce: Value = serde_json::from_str(&text).unwrap();
                hashes.push(announce["hash"].as_str().unwrap().to_string());
            }

            for hash in &hashes {
                ws.send(Message::Text(format!(
                    r#"{{"hash":"{}","data":{{"interaction":{{}}}}}}"#,
                    hash
                )))
                .await
                .unwrap();
            }
            ws.send(Message::Close(None)).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let supervisor = StreamSupervisor::new(format!("ws://{}/multi", addr));
        let (event_tx, mut events) = unbounded_channel::<String>();

        let tx = event_tx.clone();
        supervisor.on_ds_message(move |message| {
            let _ = tx.send(format!(
                "ds:{}:{}",
                message["status"].as_str().unwrap_or("?"),
                message["hash"].as_str().unwrap_or("?")
            ));
        });
        let tx = event_tx.clone();
        supervisor.on_closed(move |clean, _code, _reason| {
            let _ = tx.send(format!("closed:{}", clean));
        });

        supervisor.start().await.unwrap();

        supervisor.subscribe("badbadbadbadbad0", |_| panic!("boom")).unwrap();
        let tx = event_tx.clone();
        supervisor
            .subscribe("600d600d600d600d", move |_| {
                let _ = tx.send("data:ok".to_string());
            })
            .unwrap();

        // The panicking handler surfaces as a diagnostic message and the
        // loop keeps delivering to the healthy subscription
        assert_eq!(
            next_event(&mut events).await,
            "ds:handler_error:badbadbadbadbad0"
        );
        assert_eq!(next_event(&mut events).await, "data:ok");
        assert_eq!(next_event(&mut events).await, "closed:true");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_preserves_and_reannounces_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            for round in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();

                // Both rounds see the announcement; the client only
                // called subscribe once
                let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
                let announce: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(announce["action"], "subscribe");
                let hash = announce["hash"].as_str().unwrap().to_string();

                if round == 1 {
                    ws.send(Message::Text(format!(
                        r#"{{"hash":"{}","data":{{"interaction":{{"content":"resumed"}}}}}}"#,
                        hash
                    )))
                    .await
                    .unwrap();
                }
                ws.send(Message::Close(None)).await.unwrap();
                while ws.next().await.is_some() {}
            }
        });

        let supervisor = StreamSupervisor::new(format!("ws://{}/multi", addr));
        let (event_tx, mut events) = unbounded_channel::<String>();

        let tx = event_tx.clone();
        supervisor.on_closed(move |_clean, _code, _reason| {
            let _ = tx.send("closed".to_string());
        });

        supervisor.start().await.unwrap();
        let tx = event_tx.clone();
        supervisor
            .subscribe("cafed00dcafed00d", move |payload| {
                let content = payload["interaction"]["content"].as_str().unwrap_or("").to_string();
                let _ = tx.send(format!("data:{}", content));
            })
            .unwrap();

        assert_eq!(next_event(&mut events).await, "closed");
        assert_eq!(supervisor.state(), ConnectionState::Closed);

        // Restart: registry survives, announcement goes out again
        supervisor.start().await.unwrap();
        assert_eq!(next_event(&mut events).await, "data:resumed");
        assert_eq!(next_event(&mut events).await, "closed");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Hold the connection open until the client closes it
            while ws.next().await.is_some() {}
        });

        let supervisor = StreamSupervisor::new(format!("ws://{}/multi", addr));
        let (tx, mut rx) = unbounded_channel();
        supervisor.on_closed(move |clean, code, _reason| {
            let _ = tx.send(format!("closed:{}:{}", clean, code));
        });

        supervisor.start().await.unwrap();
        supervisor.stop().await.unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Closed);
        assert_eq!(next_event(&mut rx).await, "closed:true:1000");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let supervisor = StreamSupervisor::new(format!("ws://{}/multi", addr));
        supervisor.start().await.unwrap();

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, DataSiftError::Connection(_)));

        supervisor.stop().await.unwrap();
        server.await.unwrap();
    }
}
