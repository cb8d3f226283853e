use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use skysense_shared::constants::SESSION_OUTBOX_CAPACITY;
use skysense_shared::types::{AuthUser, ChannelKind, UserId};

/// Who a live connection belongs to. Sensor viewers are anonymous; chat
/// connections carry the authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOwner {
    Anonymous,
    User(UserId),
}

impl fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOwner::Anonymous => f.write_str("anonymous"),
            SessionOwner::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Identifies one registered connection. Returned by
/// [`SessionRegistry::register`] and required to unregister or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: Uuid,
    pub owner: SessionOwner,
    pub kind: ChannelKind,
}

/// The live connections of one owner.
struct SessionSet {
    owner: SessionOwner,
    sessions: HashMap<Uuid, mpsc::Sender<String>>,
}

impl SessionSet {
    fn new(owner: SessionOwner) -> Self {
        Self {
            owner,
            sessions: HashMap::new(),
        }
    }

    /// Queue `payload` on every connection. Returns how many accepted it.
    fn deliver(&self, kind: ChannelKind, payload: &str) -> usize {
        let mut delivered = 0;
        for (id, tx) in &self.sessions {
            if tx.try_send(payload.to_owned()).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    channel = %kind,
                    owner = %self.owner,
                    connection = %id,
                    "Dropping frame for slow or closed session"
                );
            }
        }
        delivered
    }

    fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Live connections of one channel, keyed by owner.
///
/// Each connection gets a bounded outbox; delivery never waits on a
/// connection, a full or closed outbox just drops the frame for that
/// connection.
#[derive(Clone)]
pub struct SessionRegistry {
    kind: ChannelKind,
    capacity: usize,
    owners: Arc<RwLock<HashMap<SessionOwner, SessionSet>>>,
}

impl SessionRegistry {
    pub fn new(kind: ChannelKind) -> Self {
        Self::with_capacity(kind, SESSION_OUTBOX_CAPACITY)
    }

    pub fn with_capacity(kind: ChannelKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            owners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection. Returns its handle and the outbox receiver the
    /// connection's writer drains.
    pub async fn register(&self, owner: SessionOwner) -> (SessionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            owner,
            kind: self.kind,
        };

        let mut owners = self.owners.write().await;
        let set = owners
            .entry(owner)
            .or_insert_with(|| SessionSet::new(owner));
        set.sessions.insert(handle.id, tx);

        info!(
            channel = %self.kind,
            owner = %owner,
            connection = %handle.id,
            sessions = set.sessions.len(),
            "Session registered"
        );

        (handle, rx)
    }

    pub async fn register_user(&self, user: AuthUser) -> (SessionHandle, mpsc::Receiver<String>) {
        self.register(SessionOwner::User(user.id)).await
    }

    pub async fn register_anonymous(&self) -> (SessionHandle, mpsc::Receiver<String>) {
        self.register(SessionOwner::Anonymous).await
    }

    /// Remove a connection. Unknown handles are ignored; an owner with no
    /// connections left is dropped entirely.
    pub async fn unregister(&self, handle: &SessionHandle) {
        let mut owners = self.owners.write().await;
        let should_remove = if let Some(set) = owners.get_mut(&handle.owner) {
            if set.sessions.remove(&handle.id).is_some() {
                info!(
                    channel = %self.kind,
                    owner = %handle.owner,
                    connection = %handle.id,
                    sessions = set.sessions.len(),
                    "Session unregistered"
                );
            }
            set.is_empty()
        } else {
            false
        };

        if should_remove {
            owners.remove(&handle.owner);
        }
    }

    /// Queue `payload` on every connection of `user`. Returns the number of
    /// connections reached; zero when the user is offline.
    pub async fn deliver(&self, user: UserId, payload: &str) -> usize {
        let owners = self.owners.read().await;
        match owners.get(&SessionOwner::User(user)) {
            Some(set) => set.deliver(self.kind, payload),
            None => {
                debug!(channel = %self.kind, user = %user, "No live session, not delivered");
                0
            }
        }
    }

    /// Queue `payload` on one specific connection.
    pub async fn send_to(&self, handle: &SessionHandle, payload: &str) -> bool {
        let owners = self.owners.read().await;
        let Some(tx) = owners
            .get(&handle.owner)
            .and_then(|set| set.sessions.get(&handle.id))
        else {
            return false;
        };

        if tx.try_send(payload.to_owned()).is_err() {
            debug!(channel = %self.kind, connection = %handle.id, "Dropping reply for slow session");
            return false;
        }
        true
    }

    /// Queue `payload` on every connection of the channel.
    pub async fn broadcast_all(&self, payload: &str) -> usize {
        let owners = self.owners.read().await;
        owners
            .values()
            .map(|set| set.deliver(self.kind, payload))
            .sum()
    }

    #[allow(dead_code)]
    pub async fn is_registered(&self, handle: &SessionHandle) -> bool {
        self.owners
            .read()
            .await
            .get(&handle.owner)
            .is_some_and(|set| set.sessions.contains_key(&handle.id))
    }

    pub async fn session_count(&self) -> usize {
        self.owners
            .read()
            .await
            .values()
            .map(|set| set.sessions.len())
            .sum()
    }

    /// Number of distinct owners with at least one connection.
    pub async fn user_count(&self) -> usize {
        self.owners.read().await.len()
    }

    #[allow(dead_code)]
    pub async fn is_online(&self, user: UserId) -> bool {
        self.owners
            .read()
            .await
            .contains_key(&SessionOwner::User(user))
    }
}
