// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! One WebSocket connection from accept to close.
//!
//! ```text
//! upgrade -> open (scope check) -> welcome -> read loop -> unregister
//!                                   writer task <- registry channel
//! ```
//!
//! The read loop sends a ping after `idle` of silence and gives up after a
//! further `grace` without any inbound frame.

use crate::realtime::messages::{relay, welcome};
use crate::realtime::registry::{ConnectionId, OpenError, Outbound, PendingConnection, CLOSE_POLICY};
use crate::state::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use caseline_kernel::cases::CaseDirectory;
use caseline_kernel::sync::Principal;
use caseline_kernel::types::CaseId;
use futures::stream::{SplitSink, Stream, StreamExt};
use futures::SinkExt;
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

fn to_message(frame: Outbound) -> (Message, bool) {
    match frame {
        Outbound::Text(text) => (Message::Text(text.to_string()), false),
        Outbound::Ping => (Message::Ping(Vec::new()), false),
        Outbound::Close { code, reason } => (
            Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Owned(reason),
            })),
            true,
        ),
    }
}

/// Drain the registry channel into the socket until it closes.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, receiver: mpsc::Receiver<Outbound>) {
    let mut frames = ReceiverStream::new(receiver);
    while let Some(frame) = frames.next().await {
        let (message, last) = to_message(frame);
        if sink.send(message).await.is_err() || last {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Refuse a connection before registration.
pub async fn reject(mut socket: WebSocket, reason: &'static str) {
    tracing::info!("WebSocket rejected: {}", reason);
    let frame = CloseFrame {
        code: CLOSE_POLICY,
        reason: Cow::Borrowed(reason),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Settle an upgrade before touching the registry. The case is checked
/// before the credential, so an unknown case always reads "Case not found".
pub fn admit(
    cases: &dyn CaseDirectory,
    case_id: Option<CaseId>,
    principal: Option<Principal>,
) -> Result<(CaseId, Principal), &'static str> {
    let case_id = case_id
        .filter(|id| cases.status(id).is_some())
        .ok_or("Case not found")?;
    let principal = principal.ok_or("Invalid token")?;
    Ok((case_id, principal))
}

pub async fn run_session(socket: WebSocket, state: AppState, case_id: CaseId, principal: Principal) {
    let (pending, receiver) = PendingConnection::channel(state.liveness.buffer);
    let connection_id = match state.registry.open(state.cases.as_ref(), &principal, case_id, pending) {
        Ok(id) => id,
        Err(e) => {
            let reason = match e {
                OpenError::CaseNotFound => "Case not found",
                OpenError::Forbidden => "Forbidden",
            };
            reject(socket, reason).await;
            return;
        }
    };

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, receiver));

    let greeting = welcome(case_id, connection_id, principal.user_type());
    state.registry.send_direct(case_id, connection_id, Outbound::Text(greeting)).await;

    drive(&state, case_id, connection_id, &principal, stream, writer).await;
}

/// Read loop with liveness probing. Unregisters the connection on exit.
async fn drive<S>(
    state: &AppState,
    case_id: CaseId,
    connection_id: ConnectionId,
    principal: &Principal,
    mut stream: S,
    mut writer: JoinHandle<()>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let liveness = state.liveness;
    let mut awaiting_pong = false;
    loop {
        let window = if awaiting_pong { liveness.grace } else { liveness.idle };
        tokio::select! {
            _ = &mut writer => {
                tracing::debug!(case_id = %case_id, connection_id = %connection_id, "Writer finished");
                break;
            }
            _ = state.shutdown.cancelled() => break,
            next = timeout(window, stream.next()) => match next {
                Err(_) if awaiting_pong => {
                    tracing::info!(case_id = %case_id, connection_id = %connection_id, "Liveness probe timed out");
                    break;
                }
                Err(_) => {
                    awaiting_pong = true;
                    state.registry.send_direct(case_id, connection_id, Outbound::Ping).await;
                }
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(message))) => {
                    awaiting_pong = false;
                    if let Message::Text(text) = message {
                        on_text(state, case_id, connection_id, principal, &text).await;
                    }
                }
            }
        }
    }

    state.registry.unregister(case_id, connection_id);
}

async fn on_text(state: &AppState, case_id: CaseId, connection_id: ConnectionId, sender: &Principal, text: &str) {
    match relay(case_id, sender, text) {
        Some(frame) => {
            state.registry.broadcast(case_id, frame).await;
        }
        None => tracing::debug!(case_id = %case_id, connection_id = %connection_id, "Ignoring non-object frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenResolver;
    use crate::config::NodeConfig;
    use caseline_kernel::cases::InMemoryCaseDirectory;
    use caseline_kernel::log::EventLog;
    use futures::stream;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> (AppState, CaseId) {
        let cases = Arc::new(InMemoryCaseDirectory::new());
        let case = cases.create();
        let mut cfg = NodeConfig::default();
        cfg.ws_idle = Duration::from_millis(30);
        cfg.ws_grace = Duration::from_millis(30);
        let state = AppState::new(
            Arc::new(EventLog::in_memory()),
            cases,
            Arc::new(StaticTokenResolver::new()),
            &cfg,
        );
        (state, case)
    }

    #[tokio::test]
    async fn test_silent_peer_is_pinged_then_dropped() {
        let (state, case) = state();
        let (pending, mut rx) = PendingConnection::channel(8);
        let id = state.registry.register(case, pending);
        let writer = tokio::spawn(std::future::pending::<()>());

        let silent = stream::pending::<Result<Message, axum::Error>>();
        tokio::time::timeout(Duration::from_secs(2), drive(&state, case, id, &Principal::Case(case), silent, writer))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        assert!(!state.registry.is_registered(id));
    }

    #[tokio::test]
    async fn test_inbound_frames_are_relayed_to_the_case() {
        let (state, case) = state();
        let (pending, mut rx) = PendingConnection::channel(8);
        let id = state.registry.register(case, pending);
        let writer = tokio::spawn(std::future::pending::<()>());

        let frames = stream::iter(vec![
            Ok(Message::Text(r#"{"type":"typing","payload":{"on":true}}"#.to_string())),
            Ok(Message::Text("not json".to_string())),
            Ok(Message::Close(None)),
        ]);
        drive(&state, case, id, &Principal::Administrator, frames, writer).await;

        let relayed = match rx.recv().await {
            Some(Outbound::Text(text)) => serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            other => panic!("expected relay, got {:?}", other),
        };
        assert_eq!(relayed["type"], "typing");
        assert_eq!(relayed["user_type"], "midwife");
        assert!(!state.registry.is_registered(id));
    }

    #[tokio::test]
    async fn test_finished_writer_ends_session() {
        let (state, case) = state();
        let (pending, _rx) = PendingConnection::channel(8);
        let id = state.registry.register(case, pending);
        let writer = tokio::spawn(async {});

        let silent = stream::pending::<Result<Message, axum::Error>>();
        tokio::time::timeout(Duration::from_secs(1), drive(&state, case, id, &Principal::Case(case), silent, writer))
            .await
            .unwrap();
        assert!(!state.registry.is_registered(id));
    }

    #[tokio::test]
    async fn test_unknown_case_is_refused_before_the_token() {
        let (state, case) = state();
        let cases = state.cases.as_ref();
        let stranger = Some(CaseId::new_v4());

        assert_eq!(admit(cases, stranger, None), Err("Case not found"));
        assert_eq!(admit(cases, None, Some(Principal::Administrator)), Err("Case not found"));
        assert_eq!(admit(cases, Some(case), None), Err("Invalid token"));
        assert_eq!(
            admit(cases, Some(case), Some(Principal::Administrator)),
            Ok((case, Principal::Administrator))
        );
    }
}
