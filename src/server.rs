//! TCP transport: accept loop and per-client tasks.
//!
//! This layer contains no duel logic. It parses `Command JSON\n` frames,
//! translates them into engine events, and writes back whatever the
//! dispatcher (or a direct reply) puts on the connection's outbound
//! channel. Bad frames are answered and logged, never fatal.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::{Decision, Engine, Event};
use crate::error::EngineError;
use crate::protocol::{
    ErrorData, HelloCommand, InviteCommand, InviteResponseCommand, StopDuelCommand, UserListData,
    WelcomeData, WireMessage, CMD_HELLO, CMD_INVITE, CMD_INVITE_RESPONSE, CMD_LIST_USERS,
    CMD_PING, CMD_STOP_DUEL, MSG_ERROR, MSG_USER_LIST, MSG_WELCOME,
};
use crate::registry::{Registry, OUTBOUND_QUEUE};

/// Accept clients forever, one task each.
pub async fn run(
    listener: TcpListener,
    engine: Engine,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::info!("Client connected from {}", addr);
        let engine = engine.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            handle_client(stream, engine, registry).await;
            tracing::info!("Client from {} gone", addr);
        });
    }
}

async fn send_frame(tx: &mpsc::Sender<WireMessage>, command: &str, payload: &impl Serialize) {
    let _ = tx.send(WireMessage::from_payload(command, payload)).await;
}

async fn send_engine_error(tx: &mpsc::Sender<WireMessage>, err: &EngineError) {
    send_frame(
        tx,
        MSG_ERROR,
        &ErrorData {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    )
    .await;
}

async fn send_bad_request(tx: &mpsc::Sender<WireMessage>, message: &str) {
    send_frame(
        tx,
        MSG_ERROR,
        &ErrorData {
            code: "bad_request".to_string(),
            message: message.to_string(),
        },
    )
    .await;
}

fn parse_payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

async fn handle_client(stream: TcpStream, engine: Engine, registry: Arc<Registry>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let (tx, mut rx) = mpsc::channel::<WireMessage>(OUTBOUND_QUEUE);

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.write_all(msg.to_wire().as_bytes()).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let handle_id = Uuid::new_v4();
    let mut user: Option<String> = None;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Read error on {}: {}", handle_id, e);
                break;
            }
        }
        let Some(msg) = WireMessage::from_line(&line) else {
            continue;
        };
        tracing::debug!("← {} {}", msg.command, handle_id);

        // Any traffic counts as liveness.
        registry.touch(handle_id);

        let Some(user_id) = user.clone() else {
            // Identification must come first.
            if msg.command == CMD_HELLO {
                match parse_payload::<HelloCommand>(msg.data) {
                    Ok(cmd) if !cmd.name.trim().is_empty() => {
                        let name = cmd.name.trim().to_string();
                        let _ = engine.handle(Event::Connect {
                            user_id: name.clone(),
                            handle_id,
                            sender: tx.clone(),
                        });
                        user = Some(name);
                        send_frame(
                            &tx,
                            MSG_WELCOME,
                            &WelcomeData {
                                server: "duel-manager".to_string(),
                                version: env!("CARGO_PKG_VERSION").to_string(),
                            },
                        )
                        .await;
                    }
                    _ => send_bad_request(&tx, "Hello requires a non-empty Name").await,
                }
            } else {
                send_bad_request(&tx, "say Hello first").await;
            }
            continue;
        };

        let result = match msg.command.as_str() {
            CMD_HELLO => {
                send_bad_request(&tx, "already identified").await;
                Ok(())
            }
            CMD_PING => {
                send_frame(&tx, CMD_PING, &serde_json::json!({})).await;
                Ok(())
            }
            CMD_LIST_USERS => {
                send_frame(
                    &tx,
                    MSG_USER_LIST,
                    &UserListData {
                        users: registry.list_active_users(),
                    },
                )
                .await;
                Ok(())
            }
            CMD_INVITE => match parse_payload::<InviteCommand>(msg.data) {
                Ok(cmd) => engine.handle(Event::InviteRequest {
                    from_user: user_id,
                    to_user: cmd.to_user,
                }),
                Err(e) => Err(EngineError::BadRequest(e.to_string())),
            },
            CMD_INVITE_RESPONSE => match parse_payload::<InviteResponseCommand>(msg.data) {
                Ok(cmd) => engine.handle(Event::InviteResponse {
                    invite_id: cmd.invite_id,
                    responding_user: user_id,
                    decision: if cmd.accept {
                        Decision::Accept
                    } else {
                        Decision::Reject
                    },
                }),
                Err(e) => Err(EngineError::BadRequest(e.to_string())),
            },
            CMD_STOP_DUEL => match parse_payload::<StopDuelCommand>(msg.data) {
                Ok(cmd) => engine.handle(Event::StopRequest {
                    session_id: cmd.session_id,
                    requesting_user: user_id,
                }),
                Err(e) => Err(EngineError::BadRequest(e.to_string())),
            },
            other => {
                tracing::warn!("Unknown command from {}: {}", handle_id, other);
                Err(EngineError::BadRequest(format!("unknown command: {}", other)))
            }
        };

        if let Err(e) = result {
            send_engine_error(&tx, &e).await;
        }
    }

    if user.is_some() {
        let _ = engine.handle(Event::Disconnect { handle_id });
    }
    drop(tx);
    let _ = writer_task.await;
}
