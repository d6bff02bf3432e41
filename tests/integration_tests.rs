//! Integration tests for the relay server
//!
//! These tests run a real server on a loopback socket and talk to it over UDP.

use assert_approx_eq::assert_approx_eq;
use server::config::ServerConfig;
use server::error::ServerError;
use server::network::{Server, ServerState};
use server::store::{FilePlayerStore, MemoryPlayerStore, PlayerStore};
use shared::{decode, encode, Envelope, Message, PlayerId, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};

const WAIT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(400);

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(store: Arc<dyn PlayerStore>) -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            save_interval: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let server = Server::bind(config, store).await.unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.state();

        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = signal.await;
        }));

        Self {
            addr,
            state,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio_test::assert_ok!(self.handle.await.unwrap());
    }
}

struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl TestClient {
    async fn new(server: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            server,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn send(&self, envelope: Envelope) {
        self.send_raw(&encode(&envelope).unwrap()).await;
    }

    async fn send_raw(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.server).await.unwrap();
    }

    /// Waits up to `wait` for an envelope accepted by `predicate`, skipping others
    async fn recv_matching<F>(&self, wait: Duration, predicate: F) -> Option<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];

        while let Ok(received) = timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
            let (len, _) = received.unwrap();
            let envelope = decode(&buf[..len]).unwrap();
            if predicate(&envelope) {
                return Some(envelope);
            }
        }
        None
    }

    async fn connect(&self, name: &str) -> Option<PlayerId> {
        self.send(Envelope::anonymous(Message::PlayerConnect {
            name: name.to_string(),
        }))
        .await;

        let ack = self
            .recv_matching(WAIT, |e| matches!(e.message, Message::PlayerId { .. }))
            .await?;
        match ack.message {
            Message::PlayerId { player_id } => Some(player_id),
            _ => None,
        }
    }

    async fn wait_for_position(&self, subject: PlayerId, x: f32, y: f32) -> bool {
        self.recv_matching(WAIT, |e| {
            e.sender_id() == Some(subject) && e.message == Message::UpdatePosition { x, y }
        })
        .await
        .is_some()
    }
}

async fn wait_for_stored(store: &dyn PlayerStore, id: PlayerId, x: f32, y: f32) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Ok(Some(player)) = store.get_by_id(id) {
            if player.position() == (x, y) {
                return true;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// CONNECT HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn connect_is_acknowledged_then_initialized() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let client = TestClient::new(server.addr).await;

        let player_id = client.connect("alice").await.expect("no ack");
        let init = client
            .recv_matching(WAIT, |e| matches!(e.message, Message::PlayerInit { .. }))
            .await
            .expect("no PlayerInit");

        assert_eq!(
            init.message,
            Message::PlayerInit {
                player_id,
                name: "alice".to_string(),
                x: 0.0,
                y: 0.0,
            }
        );
        let session = server.state.registry.find_by_player_id(player_id).unwrap();
        assert_eq!(session.addr, client.addr());

        server.stop().await;
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_ids() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let alice = TestClient::new(server.addr).await;
        let bob = TestClient::new(server.addr).await;

        let alice_id = alice.connect("alice").await.unwrap();
        let bob_id = bob.connect("bob").await.unwrap();

        assert_ne!(alice_id, bob_id);
        assert_eq!(server.state.registry.len(), 2);
        server.stop().await;
    }

    #[tokio::test]
    async fn second_endpoint_for_connected_player_gets_no_ack() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let first = TestClient::new(server.addr).await;
        let second = TestClient::new(server.addr).await;

        first.connect("alice").await.unwrap();
        assert!(second.connect("alice").await.is_none());

        assert_eq!(server.state.registry.len(), 1);
        assert!(server
            .state
            .registry
            .find_by_endpoint(second.addr())
            .is_none());
        server.stop().await;
    }

    #[tokio::test]
    async fn invalid_name_gets_no_ack() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let client = TestClient::new(server.addr).await;

        assert!(client.connect("   ").await.is_none());
        assert!(server.state.registry.is_empty());
        server.stop().await;
    }
}

/// GAMEPLAY TESTS
mod gameplay_tests {
    use super::*;

    #[tokio::test]
    async fn positions_are_broadcast_to_everyone() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let alice = TestClient::new(server.addr).await;
        let bob = TestClient::new(server.addr).await;
        let alice_id = alice.connect("alice").await.unwrap();
        let bob_id = bob.connect("bob").await.unwrap();

        alice
            .send(Envelope::from_player(
                alice_id,
                Message::UpdatePosition { x: 1.0, y: 2.0 },
            ))
            .await;
        bob.send(Envelope::from_player(
            bob_id,
            Message::UpdatePosition { x: -3.0, y: 4.5 },
        ))
        .await;

        assert!(alice.wait_for_position(alice_id, 1.0, 2.0).await);
        assert!(alice.wait_for_position(bob_id, -3.0, 4.5).await);
        assert!(bob.wait_for_position(alice_id, 1.0, 2.0).await);
        assert!(bob.wait_for_position(bob_id, -3.0, 4.5).await);

        server.stop().await;
    }

    #[tokio::test]
    async fn chat_reaches_sender_and_peers() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let alice = TestClient::new(server.addr).await;
        let bob = TestClient::new(server.addr).await;
        let alice_id = alice.connect("alice").await.unwrap();
        bob.connect("bob").await.unwrap();

        alice
            .send(Envelope::from_player(
                alice_id,
                Message::Chat {
                    contents: "hello".to_string(),
                },
            ))
            .await;

        for client in [&alice, &bob] {
            let chat = client
                .recv_matching(WAIT, |e| matches!(e.message, Message::Chat { .. }))
                .await
                .expect("no chat");
            assert_eq!(chat.sender_id(), Some(alice_id));
            assert_eq!(
                chat.message,
                Message::Chat {
                    contents: "hello".to_string()
                }
            );
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn unauthenticated_messages_are_ignored() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let alice = TestClient::new(server.addr).await;
        let stranger = TestClient::new(server.addr).await;
        let alice_id = alice.connect("alice").await.unwrap();

        stranger
            .send(Envelope::anonymous(Message::UpdatePosition { x: 9.0, y: 9.0 }))
            .await;
        stranger
            .send(Envelope::from_player(
                alice_id,
                Message::SetName {
                    name: "mallory".to_string(),
                },
            ))
            .await;
        stranger
            .send(Envelope::from_player(
                alice_id,
                Message::UpdatePosition { x: 9.0, y: 9.0 },
            ))
            .await;

        assert!(stranger.recv_matching(SILENCE, |_| true).await.is_none());
        let player = server
            .state
            .registry
            .find_by_player_id(alice_id)
            .unwrap()
            .player();
        assert_eq!(player.name, "alice");
        assert_eq!(player.position(), (0.0, 0.0));

        server.stop().await;
    }

    #[tokio::test]
    async fn garbage_does_not_stop_the_server() {
        let server = TestServer::start(Arc::new(MemoryPlayerStore::new())).await;
        let client = TestClient::new(server.addr).await;

        client.send_raw(&[]).await;
        client.send_raw(&[0xde, 0xad, 0xbe, 0xef]).await;
        client.send_raw(&[0xff; 64]).await;
        client.send_raw(&vec![0u8; MAX_DATAGRAM_SIZE + 200]).await;

        assert!(client.connect("alice").await.is_some());
        server.stop().await;
    }
}

/// PERSISTENCE TESTS
mod persistence_tests {
    use super::*;

    /// Connect, move, then reconnect from a second endpoint once the first
    /// is gone: the player keeps its id and its last saved position.
    #[tokio::test]
    async fn moved_player_is_saved_and_reloaded() {
        let store = Arc::new(MemoryPlayerStore::new());
        let server = TestServer::start(store.clone()).await;
        let first = TestClient::new(server.addr).await;
        let alice_id = first.connect("alice").await.unwrap();

        first
            .send(Envelope::from_player(
                alice_id,
                Message::UpdatePosition { x: 1.0, y: 2.0 },
            ))
            .await;
        assert!(wait_for_stored(store.as_ref(), alice_id, 1.0, 2.0).await);

        // Duplicate while the first session is live
        let second = TestClient::new(server.addr).await;
        assert!(second.connect("alice").await.is_none());

        server.state.registry.remove(first.addr());

        assert_eq!(second.connect("alice").await, Some(alice_id));
        let init = second
            .recv_matching(WAIT, |e| matches!(e.message, Message::PlayerInit { .. }))
            .await
            .unwrap();
        let Message::PlayerInit { x, y, .. } = init.message else {
            unreachable!();
        };
        assert_approx_eq!(x, 1.0);
        assert_approx_eq!(y, 2.0);

        server.stop().await;
    }

    #[tokio::test]
    async fn file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("players.bin");

        let store = Arc::new(FilePlayerStore::open(&path).unwrap());
        let server = TestServer::start(store.clone()).await;
        let client = TestClient::new(server.addr).await;
        let alice_id = client.connect("alice").await.unwrap();
        client
            .send(Envelope::from_player(
                alice_id,
                Message::UpdatePosition { x: 5.5, y: -2.0 },
            ))
            .await;
        client
            .send(Envelope::from_player(
                alice_id,
                Message::SetName {
                    name: "alicia".to_string(),
                },
            ))
            .await;
        assert!(wait_for_stored(store.as_ref(), alice_id, 5.5, -2.0).await);
        server.stop().await;
        drop(store);

        let reopened = Arc::new(FilePlayerStore::open(&path).unwrap());
        let player = reopened.get_by_name("alicia").unwrap().unwrap();
        assert_eq!(player.id, alice_id);
        assert_eq!(player.position(), (5.5, -2.0));

        let server = TestServer::start(reopened).await;
        let client = TestClient::new(server.addr).await;
        assert_eq!(client.connect("alicia").await, Some(alice_id));
        server.stop().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_latest_state() {
        let store = Arc::new(MemoryPlayerStore::new());
        let server = TestServer::start(store.clone()).await;
        let client = TestClient::new(server.addr).await;
        let alice_id = client.connect("alice").await.unwrap();

        client
            .send(Envelope::from_player(
                alice_id,
                Message::UpdatePosition { x: 8.0, y: 8.0 },
            ))
            .await;
        // Broadcast echo proves the update was applied
        assert!(client.wait_for_position(alice_id, 8.0, 8.0).await);
        server.stop().await;

        let stored = store.get_by_id(alice_id).unwrap().unwrap();
        assert_eq!(stored.position(), (8.0, 8.0));
    }
}
