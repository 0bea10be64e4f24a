use std::net::SocketAddr;
use std::time::Duration;

use chat_relay::message::split_timestamp;
use chat_relay::{Server, ServerConfig, SessionRegistry, ENTER_USERNAME};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

struct Relay {
    addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Relay {
    async fn start() -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(config).await.expect("bind relay");
        let addr = server.local_addr().unwrap();
        let registry = server.registry().clone();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            registry,
            shutdown,
            task,
        }
    }

    async fn wait_for_sessions(&self, expected: usize) {
        timeout(WAIT, async {
            while self.registry.session_count().await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {expected} sessions"));
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        timeout(WAIT, self.task).await.unwrap().unwrap();
    }
}

struct Peer {
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
}

impl Peer {
    /// Connect and consume the sentinel
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut peer = Self {
            lines: FramedRead::new(reader, LinesCodec::new()),
            writer,
        };
        assert_eq!(peer.next_line().await.as_deref(), Some(ENTER_USERNAME));
        peer
    }

    async fn join(relay: &Relay, name: &str) -> Self {
        let before = relay.registry.session_count().await.unwrap();
        let mut peer = Self::connect(relay.addr).await;
        peer.send(name).await;
        relay.wait_for_sessions(before + 1).await;
        peer
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn next_line(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next())
            .await
            .expect("timed out waiting for line")
            .map(|r| r.unwrap())
    }

    /// Next line with its timestamp checked and stripped
    async fn next_body(&mut self) -> String {
        let line = self.next_line().await.expect("connection closed");
        let (_, body) = split_timestamp(&line)
            .unwrap_or_else(|| panic!("line without timestamp: {line:?}"));
        body.to_string()
    }

    async fn assert_quiet(&mut self) {
        if let Ok(line) = timeout(QUIET, self.lines.next()).await {
            panic!("expected no traffic, got {line:?}");
        }
    }
}

#[tokio::test]
async fn chat_reaches_others_but_not_sender() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let mut bob = Peer::join(&relay, "bob").await;
    assert_eq!(alice.next_body().await, "bob has joined the chat room.");

    alice.send("hello").await;
    assert_eq!(bob.next_body().await, "alice : hello");
    alice.assert_quiet().await;

    relay.stop().await;
}

#[tokio::test]
async fn fan_out_to_every_other_client() {
    let relay = Relay::start().await;

    let mut peers = vec![Peer::join(&relay, "p0").await];
    for i in 1..4 {
        let peer = Peer::join(&relay, &format!("p{i}")).await;
        assert_eq!(
            peers[0].next_body().await,
            format!("p{i} has joined the chat room.")
        );
        peers.push(peer);
    }
    // everyone else saw each later join, in order
    for i in 1..4 {
        for later in (i + 1)..4 {
            assert_eq!(
                peers[i].next_body().await,
                format!("p{later} has joined the chat room.")
            );
        }
    }

    peers[2].send("from two").await;
    for (i, peer) in peers.iter_mut().enumerate() {
        if i == 2 {
            peer.assert_quiet().await;
        } else {
            assert_eq!(peer.next_body().await, "p2 : from two");
        }
    }

    relay.stop().await;
}

#[tokio::test]
async fn exit_removes_session_and_announces_departure() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let mut bob = Peer::join(&relay, "bob").await;
    assert_eq!(alice.next_body().await, "bob has joined the chat room.");

    bob.send("exit").await;
    assert_eq!(alice.next_body().await, "bob has left the chat room.");
    relay.wait_for_sessions(1).await;

    // bob's connection is closed and the exit line was never relayed
    assert_eq!(bob.next_line().await, None);
    alice.assert_quiet().await;

    relay.stop().await;
}

#[tokio::test]
async fn padded_exit_is_relayed_as_chat() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let mut bob = Peer::join(&relay, "bob").await;
    assert_eq!(alice.next_body().await, "bob has joined the chat room.");

    bob.send(" exit ").await;
    assert_eq!(alice.next_body().await, "bob :  exit ");
    assert_eq!(relay.registry.session_count().await.unwrap(), 2);

    bob.send("EXIT").await;
    assert_eq!(alice.next_body().await, "bob has left the chat room.");
    relay.wait_for_sessions(1).await;

    relay.stop().await;
}

#[tokio::test]
async fn abrupt_disconnect_announces_exactly_once() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let bob = Peer::join(&relay, "bob").await;
    let mut carol = Peer::join(&relay, "carol").await;
    assert_eq!(alice.next_body().await, "bob has joined the chat room.");
    assert_eq!(alice.next_body().await, "carol has joined the chat room.");

    drop(bob);

    assert_eq!(alice.next_body().await, "bob has left the chat room.");
    assert_eq!(carol.next_body().await, "bob has left the chat room.");
    relay.wait_for_sessions(2).await;
    alice.assert_quiet().await;
    carol.assert_quiet().await;

    relay.stop().await;
}

#[tokio::test]
async fn no_broadcast_before_handshake() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let mut lurker = Peer::connect(relay.addr).await;

    alice.send("anyone there?").await;
    lurker.assert_quiet().await;

    lurker.send("lurker").await;
    assert_eq!(alice.next_body().await, "lurker has joined the chat room.");

    alice.send("welcome").await;
    assert_eq!(lurker.next_body().await, "alice : welcome");

    relay.stop().await;
}

#[tokio::test]
async fn disconnect_before_username_is_silent() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let ghost = Peer::connect(relay.addr).await;
    drop(ghost);

    alice.assert_quiet().await;
    assert_eq!(relay.registry.session_count().await.unwrap(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let relay = Relay::start().await;

    let mut alice = Peer::join(&relay, "alice").await;
    let mut pending = Peer::connect(relay.addr).await;

    relay.stop().await;

    // alice is the only named session, so her departure notice reaches nobody
    assert_eq!(alice.next_line().await, None);
    assert_eq!(pending.next_line().await, None);
}
