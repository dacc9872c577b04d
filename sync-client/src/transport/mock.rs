//! Mock transport for testing.
//!
//! Captures sent frames, forces failures, and answers sends through a
//! scripted responder so tests can play the server side.

use super::{ConnectionState, Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};

const INBOUND_CAPACITY: usize = 256;

/// Scripted server: maps each sent frame to an optional reply frame.
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

struct MockTransportInner {
    state: Mutex<MockState>,
    inbound: broadcast::Sender<Vec<u8>>,
    connection: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    connected_endpoint: Option<String>,
    sent_frames: Vec<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    responder: Option<Responder>,
}

impl MockTransport {
    /// Create a new, disconnected mock transport.
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(MockTransportInner {
                state: Mutex::new(MockState::default()),
                inbound,
                connection,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every sent frame with whatever `responder` returns.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.state().responder = Some(Arc::new(responder));
    }

    /// Deliver a frame to inbound subscribers as if the server sent it.
    pub fn inject(&self, frame: Vec<u8>) {
        // No subscribers simply means nobody is listening yet.
        let _ = self.inner.inbound.send(frame);
    }

    /// Publish a connection-state change.
    pub fn set_state(&self, state: ConnectionState) {
        self.state().connected = state == ConnectionState::Connected;
        self.inner.connection.send_replace(state);
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state().sent_frames.clone()
    }

    /// Get the endpoint that was connected to.
    pub fn connected_endpoint(&self) -> Option<String> {
        self.state().connected_endpoint.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.state().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.state().fail_next_send = Some(error.to_string());
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockTransport")
            .field("connected", &state.connected)
            .field("connected_endpoint", &state.connected_endpoint)
            .field("sent_frames", &state.sent_frames.len())
            .field("responder", &state.responder.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &str, _credential: &str) -> Result<(), TransportError> {
        self.inner.connection.send_replace(ConnectionState::Connecting);

        let failure = self.state().fail_next_connect.take();
        if let Some(error) = failure {
            self.inner
                .connection
                .send_replace(ConnectionState::Error(error.clone()));
            return Err(TransportError::ConnectionFailed(error));
        }

        {
            let mut state = self.state();
            state.connected = true;
            state.connected_endpoint = Some(endpoint.to_string());
        }
        self.inner.connection.send_replace(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state().connected = false;
        self.inner
            .connection
            .send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let responder = {
            let mut state = self.state();

            if !state.connected {
                return Err(TransportError::NotConnected);
            }

            if let Some(error) = state.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            state.sent_frames.push(frame.to_vec());
            state.responder.clone()
        };

        if let Some(reply) = responder.and_then(|respond| respond(frame)) {
            self.inject(reply);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn inbound(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inner.inbound.subscribe()
    }

    fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("wss://relay", "token").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_endpoint(),
            Some("wss://relay".to_string())
        );
        assert_eq!(
            *transport.connection_states().borrow(),
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn mock_transport_sends_frames() {
        let transport = MockTransport::new();
        transport.connect("node", "").await.unwrap();

        transport.send(b"frame 1").await.unwrap();
        transport.send(b"frame 2").await.unwrap();

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], b"frame 1");
        assert_eq!(sent[1], b"frame 2");
    }

    #[tokio::test]
    async fn mock_transport_disconnects() {
        let transport = MockTransport::new();
        transport.connect("node", "").await.unwrap();

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(
            *transport.connection_states().borrow(),
            ConnectionState::Disconnected
        );
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send(b"data").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");

        let result = transport.connect("node", "").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());
        assert_eq!(
            *transport.connection_states().borrow(),
            ConnectionState::Error("network unreachable".into())
        );
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect("node", "").await.unwrap();
        transport.fail_next_send("buffer full");

        let result = transport.send(b"data").await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send(b"data").await.unwrap();
        assert_eq!(transport.sent_frames().len(), 1);
    }

    // ===========================================
    // Inbound and State Streams
    // ===========================================

    #[tokio::test]
    async fn responder_replies_to_subscribers() {
        let transport = MockTransport::new();
        let mut inbound = transport.inbound();
        transport.respond_with(|frame| {
            let mut reply = b"re:".to_vec();
            reply.extend_from_slice(frame);
            Some(reply)
        });
        transport.connect("node", "").await.unwrap();

        transport.send(b"ping").await.unwrap();

        assert_eq!(inbound.recv().await.unwrap(), b"re:ping");
    }

    #[tokio::test]
    async fn silent_responder_sends_nothing() {
        let transport = MockTransport::new();
        let mut inbound = transport.inbound();
        transport.respond_with(|_| None);
        transport.connect("node", "").await.unwrap();

        transport.send(b"ping").await.unwrap();

        assert!(matches!(
            inbound.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn injected_frames_reach_every_subscriber() {
        let transport = MockTransport::new();
        let mut first = transport.inbound();
        let mut second = transport.inbound();

        transport.inject(b"hello".to_vec());

        assert_eq!(first.recv().await.unwrap(), b"hello");
        assert_eq!(second.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn state_changes_are_observed() {
        let transport = MockTransport::new();
        let mut states = transport.connection_states();
        transport.connect("node", "").await.unwrap();

        transport.set_state(ConnectionState::Error("reset".into()));
        states.changed().await.unwrap();
        assert_eq!(
            *states.borrow_and_update(),
            ConnectionState::Error("reset".into())
        );
        assert!(!transport.is_connected());
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("node", "").await.unwrap();
        assert!(transport2.is_connected());

        transport1.send(b"from t1").await.unwrap();
        transport2.send(b"from t2").await.unwrap();

        assert_eq!(transport1.sent_frames().len(), 2);
    }
}
