//! End-to-end exercise over a real TCP socket: two clients, the full
//! invite → session → stop path, plus wire-level error handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use duel_manager::config::Config;
use duel_manager::engine::Engine;
use duel_manager::protocol::WireMessage;
use duel_manager::registry::Registry;
use duel_manager::server;

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect_raw(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        Client {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    /// Connect and identify; returns once the server confirmed the
    /// registration with Welcome.
    async fn connect(addr: SocketAddr, name: &str) -> Client {
        let mut client = Client::connect_raw(addr).await;
        client.send("Hello", json!({ "Name": name })).await;
        let welcome = client.expect("Welcome").await;
        assert_eq!(welcome["Server"], "duel-manager");
        client
    }

    async fn send(&mut self, command: &str, data: serde_json::Value) {
        let msg = WireMessage::new(command, data);
        self.writer
            .write_all(msg.to_wire().as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read frames until one matches `command`, skipping the rest.
    async fn expect(&mut self, command: &str) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mut line = String::new();
                let n = self.reader.read_line(&mut line).await.unwrap();
                assert!(n > 0, "connection closed while waiting for {}", command);
                let Some(msg) = WireMessage::from_line(&line) else {
                    continue;
                };
                if msg.command == command {
                    return msg.data;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", command))
    }
}

async fn spawn_server(config: Config) -> SocketAddr {
    let registry = Arc::new(Registry::new(config.connection_ttl));
    let engine = Engine::new(config, Arc::clone(&registry));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server::run(listener, engine, registry).await;
    });
    addr
}

#[tokio::test]
async fn test_full_duel_flow() {
    let addr = spawn_server(Config::default()).await;
    let mut alice = Client::connect(addr, "alice").await;
    let mut bob = Client::connect(addr, "bob").await;

    alice.send("ListUsers", json!({})).await;
    let users = alice.expect("UserList").await;
    let listed = users["Users"].as_array().unwrap();
    assert!(listed.iter().any(|u| u == "alice"));
    assert!(listed.iter().any(|u| u == "bob"));

    alice.send("Invite", json!({ "ToUser": "bob" })).await;
    let sent = alice.expect("InviteSent").await;
    let invited = bob.expect("Invited").await;
    assert_eq!(invited["FromUser"], "alice");
    assert_eq!(sent["InviteID"], invited["InviteID"]);

    bob.send(
        "InviteResponse",
        json!({ "InviteID": invited["InviteID"], "Accept": true }),
    )
    .await;
    let start_a = alice.expect("SessionStart").await;
    let start_b = bob.expect("SessionStart").await;
    assert_eq!(start_a["SessionID"], start_b["SessionID"]);
    assert_eq!(start_a["StartedAt"], start_b["StartedAt"]);
    assert_eq!(start_a["Opponent"], "bob");
    assert_eq!(start_b["Opponent"], "alice");
    assert_eq!(start_a["DurationSecs"], 600);

    alice
        .send("StopDuel", json!({ "SessionID": start_a["SessionID"] }))
        .await;
    let end_a = alice.expect("SessionEnd").await;
    let end_b = bob.expect("SessionEnd").await;
    assert_eq!(end_a["Reason"], "stopped");
    assert_eq!(end_b["Reason"], "stopped");
}

#[tokio::test]
async fn test_reject_and_errors_over_wire() {
    let addr = spawn_server(Config::default()).await;
    let mut alice = Client::connect(addr, "alice").await;
    let mut bob = Client::connect(addr, "bob").await;

    // Unknown invite id: error to the responder, nobody else involved.
    bob.send(
        "InviteResponse",
        json!({ "InviteID": uuid::Uuid::new_v4(), "Accept": true }),
    )
    .await;
    let err = bob.expect("Error").await;
    assert_eq!(err["Code"], "not_found");

    // Invite, then reject: initiator gets the outcome, invitee the echo.
    alice.send("Invite", json!({ "ToUser": "bob" })).await;
    let invited = bob.expect("Invited").await;
    bob.send(
        "InviteResponse",
        json!({ "InviteID": invited["InviteID"], "Accept": false }),
    )
    .await;
    let outcome = alice.expect("InviteOutcome").await;
    assert_eq!(outcome["Outcome"], "rejected");
    let echo = bob.expect("InviteOutcome").await;
    assert_eq!(echo["Outcome"], "rejected");

    // Keep-alive echo.
    alice.send("Ping", json!({})).await;
    alice.expect("Ping").await;

    // Inviting an offline user fails cleanly.
    alice.send("Invite", json!({ "ToUser": "nobody" })).await;
    let err = alice.expect("Error").await;
    assert_eq!(err["Code"], "not_found");
}

#[tokio::test]
async fn test_commands_require_hello() {
    let addr = spawn_server(Config::default()).await;
    let mut client = Client::connect_raw(addr).await;

    client.send("Invite", json!({ "ToUser": "bob" })).await;
    let err = client.expect("Error").await;
    assert_eq!(err["Code"], "bad_request");

    // Garbage payloads are answered, not fatal.
    client.send("Hello", json!({ "Name": "  " })).await;
    let err = client.expect("Error").await;
    assert_eq!(err["Code"], "bad_request");

    client.send("Hello", json!({ "Name": "carol" })).await;
    client.expect("Welcome").await;
}
