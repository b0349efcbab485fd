//! Integration tests for end-to-end room sync.
//!
//! These tests start a small sequencing room server on a real socket and
//! connect real sessions to it, verifying the full pipeline: hello, snapshot,
//! op → delta fan-out, presence, server errors and reconnect-with-resume.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tactic_collab::client::{ConnectionEvent, ConnectionManager, OpenParams, SeqCursor};
use tactic_collab::presence::PresenceEntry;
use tactic_collab::protocol::{error_codes, Capability, ClientMessage, ServerMessage, SnapshotState};
use tactic_collab::session::{Notice, RoomSession, SessionEvent, SessionHandle, SessionParams, Severity};
use tactic_collab::{SessionConfig, WsConnector};
use tactic_core::{Board, Node, NodeKind, Operation};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

// ───────────────────────────────────────────────────────────────────
// Test room server
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Hello {
    path: String,
    cap: Capability,
    since: u64,
    token: String,
}

#[derive(Default)]
struct TestRoom {
    board: Board,
    hellos: Vec<Hello>,
    next_conn: u64,
    clients: Vec<Client>,
}

struct Client {
    conn: u64,
    name: String,
    tx: mpsc::UnboundedSender<String>,
}

impl TestRoom {
    fn broadcast(&mut self, msg: &ServerMessage) {
        let text = msg.encode().unwrap();
        self.clients.retain(|c| c.tx.send(text.clone()).is_ok());
    }

    fn send_to(&self, conn: u64, msg: &ServerMessage) {
        if let Some(client) = self.clients.iter().find(|c| c.conn == conn) {
            let _ = client.tx.send(msg.encode().unwrap());
        }
    }

    fn presence(&self) -> ServerMessage {
        ServerMessage::Presence {
            clients: self
                .clients
                .iter()
                .map(|c| PresenceEntry::new(c.name.clone(), c.name.clone(), 0.0, 0.0))
                .collect(),
        }
    }
}

#[derive(Clone)]
struct TestServer {
    addr: SocketAddr,
    room: Arc<Mutex<TestRoom>>,
}

impl TestServer {
    /// Serve room `r1` seeded with `nodes` at `seq`.
    async fn start(seq: u64, nodes: Vec<Node>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut board = Board::new();
        board.enter_room("r1");
        board.apply_snapshot(seq, nodes);
        let room = Arc::new(Mutex::new(TestRoom {
            board,
            ..TestRoom::default()
        }));

        let accept_room = room.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, accept_room.clone()));
            }
        });

        Self { addr, room }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn hellos(&self) -> Vec<Hello> {
        self.room.lock().unwrap().hellos.clone()
    }

    fn board(&self) -> Board {
        self.room.lock().unwrap().board.clone()
    }

    /// Drop every connection, as a server restart would.
    fn kick_all(&self) {
        self.room.lock().unwrap().clients.clear();
    }
}

async fn serve_connection(stream: TcpStream, room: Arc<Mutex<TestRoom>>) {
    let mut path = String::new();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let Some(Ok(Message::Text(text))) = read.next().await else {
        return;
    };
    let Ok(ClientMessage::Hello { room_id, cap, token, since }) = serde_json::from_str(text.as_str())
    else {
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = {
        let mut room = room.lock().unwrap();
        room.next_conn += 1;
        let conn = room.next_conn;
        room.hellos.push(Hello {
            path: path.clone(),
            cap,
            since,
            token: token.clone(),
        });
        let snapshot = ServerMessage::Snapshot {
            room_id: room_id.clone(),
            seq: room.board.latest_seq(),
            state: SnapshotState {
                nodes: room.board.nodes().cloned().collect(),
            },
        };
        let _ = tx.send(snapshot.encode().unwrap());
        room.clients.push(Client {
            conn,
            name: token.clone(),
            tx: tx.clone(),
        });
        let presence = room.presence();
        room.broadcast(&presence);
        conn
    };
    drop(tx);

    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if write.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = write.close().await;
    });

    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(msg) = serde_json::from_str::<ClientMessage>(text.as_str()) else {
            continue;
        };
        let mut room = room.lock().unwrap();
        match msg {
            ClientMessage::Op { .. } if !cap.can_edit() => {
                let error = ServerMessage::Error {
                    code: error_codes::UNAUTHORIZED.into(),
                    msg: "read-only capability".into(),
                };
                room.send_to(conn, &error);
            }
            ClientMessage::Op { ops, .. } => {
                let from = room.board.latest_seq();
                room.board.apply_delta(from, from + 1, ops.clone());
                let delta = ServerMessage::Delta {
                    room_id: room_id.clone(),
                    from,
                    to: from + 1,
                    ops,
                };
                room.broadcast(&delta);
            }
            ClientMessage::Ping { ts } => {
                room.send_to(conn, &ServerMessage::Pong { ts });
            }
            ClientMessage::Hello { .. } => {}
        }
    }

    let mut room = room.lock().unwrap();
    let before = room.clients.len();
    room.clients.retain(|c| c.conn != conn);
    if room.clients.len() != before {
        let presence = room.presence();
        room.broadcast(&presence);
    }
}

// ───────────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────────

fn fast_config(server: &TestServer) -> SessionConfig {
    SessionConfig {
        debounce_ms: 20,
        backoff_base_ms: 50,
        backoff_max_ms: 200,
        ..SessionConfig::for_server(server.url())
    }
}

fn join(server: &TestServer, name: &str, cap: Capability) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    RoomSession::spawn(
        &fast_config(server),
        SessionParams::new("r1", name, cap),
        WsConnector,
    )
}

/// Skip events until one matches `pred`.
async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("session ended before the expected event"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

fn seed_nodes() -> Vec<Node> {
    vec![
        Node::new("p1", NodeKind::Player, 10.0, 20.0).with_label("9"),
        Node::new("z1", NodeKind::Other("heatmap".into()), 0.0, 0.0),
    ]
}

// ───────────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_receives_snapshot_on_connect() {
    let server = TestServer::start(3, seed_nodes()).await;
    let (handle, mut events) = join(&server, "alice", Capability::Edit);

    wait_for(&mut events, |e| *e == SessionEvent::BoardChanged { seq: 3 }).await;

    let board = handle.board();
    assert_eq!(board.len(), 2);
    assert_eq!(board.get("p1").and_then(|n| n.label.as_deref()), Some("9"));
    assert_eq!(board.get("z1").map(|n| n.kind.as_str()), Some("heatmap"));

    let hellos = server.hellos();
    assert_eq!(hellos.len(), 1);
    assert_eq!(hellos[0].path, "/ws/room/r1");
    assert_eq!(hellos[0].since, 0);
    assert_eq!(hellos[0].cap, Capability::Edit);
    handle.close();
}

#[tokio::test]
async fn test_two_sessions_converge() {
    let server = TestServer::start(0, Vec::new()).await;
    let (alice, mut alice_events) = join(&server, "alice", Capability::Edit);
    wait_for(&mut alice_events, |e| *e == SessionEvent::Connected).await;
    let (bob, mut bob_events) = join(&server, "bob", Capability::Edit);
    wait_for(&mut bob_events, |e| *e == SessionEvent::Connected).await;

    alice.push(Operation::add(Node::new("c1", NodeKind::Cone, 1.0, 1.0)));
    alice.push(Operation::move_to("c1", 4.0, 5.0));
    alice.flush();

    wait_for(&mut alice_events, |e| *e == SessionEvent::BoardChanged { seq: 1 }).await;
    wait_for(&mut bob_events, |e| *e == SessionEvent::BoardChanged { seq: 1 }).await;

    bob.push(Operation::remove("c1"));
    wait_for(&mut alice_events, |e| *e == SessionEvent::BoardChanged { seq: 2 }).await;
    wait_for(&mut bob_events, |e| *e == SessionEvent::BoardChanged { seq: 2 }).await;

    let expected = server.board();
    assert!(expected.is_empty());
    assert_eq!(alice.board().nodes().count(), 0);
    assert_eq!(bob.board().latest_seq(), expected.latest_seq());

    alice.close();
    bob.close();
}

#[tokio::test]
async fn test_presence_replaced_on_join() {
    let server = TestServer::start(0, Vec::new()).await;
    let (alice, mut alice_events) = join(&server, "alice", Capability::View);
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceChanged { count: 1 }).await;

    let (bob, _bob_events) = join(&server, "bob", Capability::View);
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceChanged { count: 2 }).await;

    let presence = alice.presence();
    let ids: Vec<&str> = presence.iter().map(|e| e.client_id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "bob"]);

    // the next list leaves bob out, so he is gone from alice's table
    bob.close();
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceChanged { count: 1 }).await;

    let presence = alice.presence();
    let ids: Vec<&str> = presence.iter().map(|e| e.client_id.as_str()).collect();
    assert_eq!(ids, vec!["alice"]);
    assert!(!presence.contains("bob"));

    alice.close();
}

#[tokio::test]
async fn test_viewer_edit_surfaces_server_error() {
    let server = TestServer::start(0, Vec::new()).await;
    let (viewer, mut events) = join(&server, "viewer", Capability::View);
    wait_for(&mut events, |e| *e == SessionEvent::Connected).await;

    viewer.push(Operation::remove("anything"));
    viewer.flush();

    let notice = wait_for(&mut events, |e| matches!(e, SessionEvent::Notice(_))).await;
    assert_eq!(
        notice,
        SessionEvent::Notice(Notice {
            severity: Severity::Error,
            message: "read-only capability".into(),
        })
    );
    assert_eq!(server.board().latest_seq(), 0);
    viewer.close();
}

#[tokio::test]
async fn test_reconnect_resumes_from_cursor() {
    let server = TestServer::start(3, seed_nodes()).await;
    let (handle, mut events) = join(&server, "alice", Capability::Edit);
    wait_for(&mut events, |e| *e == SessionEvent::BoardChanged { seq: 3 }).await;

    server.kick_all();

    wait_for(&mut events, |e| *e == SessionEvent::Disconnected).await;
    wait_for(&mut events, |e| *e == SessionEvent::Connected).await;

    let hellos = server.hellos();
    assert_eq!(hellos.len(), 2);
    assert_eq!(hellos[1].since, 3);
    assert_eq!(hellos[1].token, "alice");
    assert_eq!(handle.board().len(), 2);
    handle.close();
}

#[tokio::test]
async fn test_send_false_after_close() {
    let server = TestServer::start(0, Vec::new()).await;
    let (handle, mut events) = ConnectionManager::open(
        &SessionConfig::for_server(server.url()),
        OpenParams {
            room_id: "r1".into(),
            token: "tok".into(),
            capability: Capability::Edit,
            resume_from: SeqCursor::default(),
        },
        WsConnector,
    );

    let opened = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(opened, Some(ConnectionEvent::Opened));
    assert!(handle.send(&ClientMessage::ping(1)));

    handle.close();
    assert!(!handle.send(&ClientMessage::ping(2)));

    // drain until the worker stops
    while let Ok(Some(_)) = timeout(Duration::from_secs(5), events.recv()).await {}
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_connect_failure_schedules_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SessionConfig {
        backoff_base_ms: 10,
        backoff_max_ms: 40,
        ..SessionConfig::for_server(format!("ws://{addr}"))
    };
    let (handle, mut events) = ConnectionManager::open(
        &config,
        OpenParams {
            room_id: "r1".into(),
            token: "tok".into(),
            capability: Capability::View,
            resume_from: SeqCursor::default(),
        },
        WsConnector,
    );

    let mut delays = Vec::new();
    while delays.len() < 3 {
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(ConnectionEvent::Reconnecting { delay, .. }) => delays.push(delay.as_millis()),
            Some(ConnectionEvent::Error(_)) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(delays, vec![20, 40, 40]);
    handle.close();
}
