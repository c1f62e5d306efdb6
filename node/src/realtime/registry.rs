// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Live observers per case.
//!
//! Each connection is the sending half of a bounded channel drained by a
//! WebSocket writer task. The registry owns the only long lived sender, so
//! removing an entry is what closes the socket.
//!
//! Lifecycle: `PendingConnection` (accepted, not yet visible) -> registered
//! (`ConnectionId`, receives broadcasts) -> removed. A removed connection is
//! never registered again; a reconnecting client gets a new id.

use crate::telemetry::{FANOUT_SEND_FAILURES, WS_CONNECTIONS};
use caseline_kernel::cases::CaseDirectory;
use caseline_kernel::sync::Principal;
use caseline_kernel::types::CaseId;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// WebSocket close code for policy violations.
pub const CLOSE_POLICY: u16 = 1008;
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    fn new_v4() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frame queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    /// Send a close frame and stop the writer.
    Close { code: u16, reason: String },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenError {
    #[error("Case not found")]
    CaseNotFound,
    #[error("Forbidden")]
    Forbidden,
}

/// A transport that has been accepted but is not yet visible to broadcasts.
pub struct PendingConnection {
    sender: mpsc::Sender<Outbound>,
}

impl PendingConnection {
    /// Create the pending handle and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

type Room = HashMap<ConnectionId, mpsc::Sender<Outbound>>;

pub struct ConnectionRegistry {
    rooms: RwLock<HashMap<CaseId, Room>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Check the case and the caller's scope, then register.
    pub fn open(
        &self,
        cases: &dyn CaseDirectory,
        principal: &Principal,
        case_id: CaseId,
        pending: PendingConnection,
    ) -> Result<ConnectionId, OpenError> {
        if cases.status(&case_id).is_none() {
            return Err(OpenError::CaseNotFound);
        }
        if !principal.can_access(case_id) {
            return Err(OpenError::Forbidden);
        }
        Ok(self.register(case_id, pending))
    }

    pub fn register(&self, case_id: CaseId, pending: PendingConnection) -> ConnectionId {
        let id = ConnectionId::new_v4();
        {
            let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            rooms.entry(case_id).or_default().insert(id, pending.sender);
        }
        metrics::increment_gauge!(WS_CONNECTIONS, 1.0);
        tracing::info!(case_id = %case_id, connection_id = %id, "Connection registered");
        id
    }

    /// Remove a connection. Returns whether it was still registered.
    pub fn unregister(&self, case_id: CaseId, id: ConnectionId) -> bool {
        let removed = self.remove(case_id, &[id]);
        if removed > 0 {
            tracing::info!(case_id = %case_id, connection_id = %id, "Connection unregistered");
        }
        removed > 0
    }

    fn remove(&self, case_id: CaseId, ids: &[ConnectionId]) -> usize {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get_mut(&case_id) else {
            return 0;
        };
        let removed = ids.iter().filter(|id| room.remove(id).is_some()).count();
        if room.is_empty() {
            rooms.remove(&case_id);
        }
        drop(rooms);
        if removed > 0 {
            metrics::decrement_gauge!(WS_CONNECTIONS, removed as f64);
        }
        removed
    }

    fn snapshot(&self, case_id: CaseId) -> Vec<(ConnectionId, mpsc::Sender<Outbound>)> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms
            .get(&case_id)
            .map(|room| room.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default()
    }

    /// Deliver `text` to every connection of the case.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Connections
    /// that time out or have gone away are removed. Returns how many sends
    /// succeeded.
    pub async fn broadcast(&self, case_id: CaseId, text: Arc<str>) -> usize {
        let targets = self.snapshot(case_id);
        if targets.is_empty() {
            return 0;
        }

        let timeout = self.send_timeout;
        let sends = targets.into_iter().map(|(id, tx)| {
            let frame = Outbound::Text(text.clone());
            async move { (id, tx.send_timeout(frame, timeout).await) }
        });

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(case_id = %case_id, connection_id = %id, "Broadcast send failed: {}", e);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            metrics::counter!(FANOUT_SEND_FAILURES, failed.len() as u64);
            self.remove(case_id, &failed);
        }
        delivered
    }

    /// Send to one connection. Failures are logged and swallowed.
    pub async fn send_direct(&self, case_id: CaseId, id: ConnectionId, frame: Outbound) -> bool {
        let sender = {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            rooms.get(&case_id).and_then(|room| room.get(&id)).cloned()
        };
        let Some(sender) = sender else {
            tracing::debug!(case_id = %case_id, connection_id = %id, "Direct send to unknown connection");
            return false;
        };
        match sender.send_timeout(frame, self.send_timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(case_id = %case_id, connection_id = %id, "Direct send failed: {}", e);
                false
            }
        }
    }

    /// Disconnect every observer of a case. Returns how many were drained.
    pub fn close_case(&self, case_id: CaseId) -> usize {
        let room = {
            let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            rooms.remove(&case_id)
        };
        let drained = room.map(|room| drain(room, CLOSE_NORMAL, "case_closed")).unwrap_or(0);
        if drained > 0 {
            tracing::info!(case_id = %case_id, "Drained {} connection(s) of closed case", drained);
        }
        drained
    }

    /// Disconnect everyone. Used on process shutdown.
    pub fn shutdown(&self) -> usize {
        let rooms = {
            let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *rooms)
        };
        let drained: usize = rooms
            .into_values()
            .map(|room| drain(room, CLOSE_GOING_AWAY, "server_shutdown"))
            .sum();
        tracing::info!("Registry shut down, drained {} connection(s)", drained);
        drained
    }

    pub fn connection_count(&self, case_id: CaseId) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(&case_id).map(HashMap::len).unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.values().map(HashMap::len).sum()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.values().any(|room| room.contains_key(&id))
    }
}

/// Queue a close frame on each sender, then drop them.
fn drain(room: Room, code: u16, reason: &str) -> usize {
    let count = room.len();
    for (id, tx) in room {
        // Full buffer: dropping the sender still ends the writer
        if tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .is_err()
        {
            tracing::debug!(connection_id = %id, "Close frame not queued");
        }
    }
    if count > 0 {
        metrics::decrement_gauge!(WS_CONNECTIONS, count as f64);
    }
    count
}
