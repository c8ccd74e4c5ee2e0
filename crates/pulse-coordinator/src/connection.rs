use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use pulse_types::events::{ClientCommand, ServerEvent};

use crate::Coordinator;
use crate::error::CoordinatorError;
use crate::registry::{SessionId, SessionUser};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The token was already
/// validated at the HTTP upgrade layer, so this goes straight to Ready and
/// the event loop.
pub async fn handle_connection(socket: WebSocket, coordinator: Coordinator, user: SessionUser) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected", user.username, user.user_id);

    let ready = ServerEvent::Ready {
        user_id: user.user_id,
        username: user.username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Send the current presence snapshot before registering, so the snapshot
    // never includes this connection itself.
    for (uid, uname) in coordinator.registry().online_users().await {
        let event = ServerEvent::UserOnline {
            user_id: uid,
            username: uname,
        };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    let connected = coordinator.registry().connect(&user).await;
    let session_id = connected.session_id;
    let mut rx = connected.rx;

    // A second tab of the same user does not re-announce them.
    if connected.newly_online {
        coordinator
            .registry()
            .broadcast_global(
                &ServerEvent::UserOnline {
                    user_id: user.user_id,
                    username: user.username.clone(),
                },
                Some(session_id),
            )
            .await;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client.
    let recv_coordinator = coordinator.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        recv_coordinator.registry().touch(session_id).await;
                        handle_command(&recv_coordinator, session_id, &recv_user, cmd).await;
                    }
                    Err(e) => {
                        let preview: String = text.chars().take(200).collect();
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_user.username, recv_user.user_id, e, preview
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Err(e) = coordinator.disconnect_session(session_id).await {
        error!("cleanup after disconnect failed: {e:#}");
    }
    info!("{} ({}) disconnected", user.username, user.user_id);
}

async fn handle_command(
    coordinator: &Coordinator,
    session_id: SessionId,
    user: &SessionUser,
    cmd: ClientCommand,
) {
    let result = match cmd {
        ClientCommand::JoinBlog { room_id } => coordinator.join_room(session_id, room_id).await,

        ClientCommand::SendMessage {
            room_id,
            content,
            kind,
        } => coordinator
            .send_message(user, room_id, &content, kind)
            .await
            .map(|_| ()),

        ClientCommand::TypingStart { room_id } => {
            coordinator.typing(session_id, room_id, true).await
        }

        ClientCommand::TypingStop { room_id } => {
            coordinator.typing(session_id, room_id, false).await
        }

        ClientCommand::AddReaction {
            room_id,
            message_id,
            emoji,
        } => coordinator
            .toggle_reaction(user, room_id, message_id, &emoji)
            .await
            .map(|_| ()),

        ClientCommand::VotePoll {
            poll_id,
            option_index,
        } => coordinator
            .vote(user.user_id, poll_id, option_index)
            .await
            .map(|_| ()),

        ClientCommand::CursorUpdate {
            room_id,
            position,
            selection,
        } => {
            coordinator
                .cursor_update(session_id, room_id, position, selection)
                .await
        }
    };

    if let Err(e) = result {
        // Errors go back to the session that caused them; storage failures are
        // logged in full and reported generically.
        let event = match &e {
            CoordinatorError::Storage(inner) => {
                error!("{} ({}) command failed: {inner:#}", user.username, user.user_id);
                ServerEvent::Error {
                    code: e.code().to_string(),
                    message: "internal error".to_string(),
                }
            }
            _ => ServerEvent::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        };
        coordinator.registry().send_to_session(session_id, event).await;
    }
}
