use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use courier_core::{DisplayName, UserId};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionControl {
    Open,
    Close { code: u16, reason: &'static str },
}

/// Registry-side handle of one live chat connection.
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    pub(crate) connection_id: Uuid,
    pub(crate) display_name: DisplayName,
    pub(crate) outbound: mpsc::Sender<String>,
    control: Arc<watch::Sender<ConnectionControl>>,
}

impl SessionHandle {
    pub(crate) fn new(
        connection_id: Uuid,
        display_name: DisplayName,
        outbound: mpsc::Sender<String>,
        control: watch::Sender<ConnectionControl>,
    ) -> Self {
        Self {
            connection_id,
            display_name,
            outbound,
            control: Arc::new(control),
        }
    }

    /// Ask the connection's writer to send a close frame and stop.
    pub(crate) fn close(&self, code: u16, reason: &'static str) {
        let _ = self.control.send(ConnectionControl::Close { code, reason });
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Presence {
    Online(SessionHandle),
    Offline,
}

/// Map of online users to their single live session.
///
/// Every operation takes the lock once and never awaits while holding it.
#[derive(Clone, Default)]
pub(crate) struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<UserId, SessionHandle>>>,
}

impl ConnectionRegistry {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, SessionHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, SessionHandle>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle` for `user_id`, replacing any previous entry.
    ///
    /// Returns the displaced handle so the caller can decide its fate.
    pub(crate) fn register(&self, user_id: UserId, handle: SessionHandle) -> Option<SessionHandle> {
        self.write().insert(user_id, handle)
    }

    /// Remove the entry for `user_id` only if it still belongs to `connection_id`.
    pub(crate) fn unregister(&self, user_id: UserId, connection_id: Uuid) -> bool {
        let mut sessions = self.write();
        if sessions
            .get(&user_id)
            .is_some_and(|handle| handle.connection_id == connection_id)
        {
            sessions.remove(&user_id);
            return true;
        }
        false
    }

    pub(crate) fn lookup(&self, user_id: UserId) -> Presence {
        self.read()
            .get(&user_id)
            .cloned()
            .map_or(Presence::Offline, Presence::Online)
    }

    pub(crate) fn online_users(&self) -> Vec<(UserId, DisplayName)> {
        let mut users: Vec<_> = self
            .read()
            .iter()
            .map(|(user_id, handle)| (*user_id, handle.display_name.clone()))
            .collect();
        users.sort_by_key(|(user_id, _)| *user_id);
        users
    }
}
