//! WebSocket push channel.
//!
//! Admission happens before the upgrade so a refused client gets a plain
//! HTTP status. After the handshake the socket is registered as a
//! [`ChannelSubscriber`]; a writer loop drains the channel into the socket
//! while the reader half is watched for the client going away.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::AppState;
use super::handlers::WorkspaceQuery;
use crate::engine::{ChannelSubscriber, Outbound, Workspace};
use crate::error::Result;
use crate::model::Frame;

/// Frames buffered per subscriber before pushes count as transient failures.
const SUBSCRIBER_BUFFER: usize = 16;

pub async fn subscribe(
    State(state): State<AppState>,
    Query(q): Query<WorkspaceQuery>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let workspace = state
        .registry
        .resolve(&q.api_key, q.workspace_id.as_deref(), upgrade.is_ok())?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, workspace)))
}

async fn serve_socket(mut socket: WebSocket, workspace: Arc<Workspace>) {
    let (subscriber, mut outbound) = ChannelSubscriber::new(SUBSCRIBER_BUFFER);
    let id = match workspace.subscribe(Box::new(subscriber)) {
        Ok(id) => id,
        Err(e) => {
            warn!(workspace = %workspace.id(), error = %e, "subscription refused after handshake");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(to_message(frame)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients have nothing to say on this channel.
                Some(Ok(_)) => {}
            },
        }
    }

    workspace.unsubscribe(id);
    debug!(workspace = %workspace.id(), subscriber = %id, "socket closed");
}

fn to_message(frame: Frame) -> Message {
    Message::Text(frame.as_str().to_string().into())
}
