//! Async facade over the synchronous [`Database`].
//!
//! Every call runs on tokio's blocking pool so that SQLite I/O never stalls
//! the executor threads that drive WebSocket sessions and the poller.

use std::sync::{Arc, Mutex};

use skysense_shared::types::{MessageId, ThreadId, UserId, UserStatus};
use skysense_store::{
    ChatMessage, ChatThread, DailyAggregate, Database, NewMessage, NewReading, NewUser, Page,
    ReadingFilter, StoreError, StoredReading, ThreadSummary, User, UserFilter, UserSummary,
    UserUpdate,
};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Gateway {
    db: Arc<Mutex<Database>>,
}

impl Gateway {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on a blocking worker.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| ServerError::Internal("database lock poisoned".to_string()))?;
            f(&guard).map_err(ServerError::from)
        })
        .await?;
        result
    }

    // -- Readings --

    pub async fn insert_reading(&self, reading: NewReading) -> Result<i64, ServerError> {
        self.call(move |db| db.insert_reading(&reading)).await
    }

    pub async fn daily_aggregates(&self) -> Result<Vec<DailyAggregate>, ServerError> {
        self.call(|db| db.daily_aggregates()).await
    }

    /// One page of readings plus the total matching `filter`.
    pub async fn list_readings(
        &self,
        filter: ReadingFilter,
        page: Page,
    ) -> Result<(Vec<StoredReading>, u64), ServerError> {
        self.call(move |db| {
            let rows = db.list_readings(&filter, page)?;
            let total = db.count_readings(&filter)?;
            Ok((rows, total))
        })
        .await
    }

    pub async fn export_readings(
        &self,
        filter: ReadingFilter,
    ) -> Result<Vec<StoredReading>, ServerError> {
        self.call(move |db| db.export_readings(&filter)).await
    }

    pub async fn delete_reading(&self, id: i64) -> Result<bool, ServerError> {
        self.call(move |db| db.delete_reading(id)).await
    }

    // -- Users --

    pub async fn create_user(&self, user: NewUser) -> Result<UserId, ServerError> {
        self.call(move |db| db.create_user(&user)).await
    }

    pub async fn find_user_by_email(&self, email: String) -> Result<Option<User>, ServerError> {
        self.call(move |db| db.find_user_by_email(&email)).await
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>, ServerError> {
        self.call(move |db| db.get_user_by_id(id)).await
    }

    pub async fn list_users(&self, filter: UserFilter) -> Result<Vec<UserSummary>, ServerError> {
        self.call(move |db| db.list_users(&filter)).await
    }

    pub async fn pending_users(&self) -> Result<Vec<UserSummary>, ServerError> {
        self.call(|db| db.pending_users()).await
    }

    pub async fn any_admin(&self) -> Result<Option<UserSummary>, ServerError> {
        self.call(|db| db.any_admin()).await
    }

    pub async fn set_user_status(&self, id: UserId, status: UserStatus) -> Result<bool, ServerError> {
        self.call(move |db| db.set_user_status(id, status)).await
    }

    pub async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<bool, ServerError> {
        self.call(move |db| db.update_user(id, &update)).await
    }

    pub async fn update_user_password(
        &self,
        id: UserId,
        password_hash: String,
    ) -> Result<bool, ServerError> {
        self.call(move |db| db.update_user_password(id, &password_hash))
            .await
    }

    pub async fn delete_user(&self, id: UserId) -> Result<bool, ServerError> {
        self.call(move |db| db.delete_user(id)).await
    }

    // -- Chat --

    pub async fn get_or_create_thread(
        &self,
        client_id: UserId,
        admin_id: UserId,
    ) -> Result<ChatThread, ServerError> {
        self.call(move |db| db.get_or_create_thread(client_id, admin_id))
            .await
    }

    pub async fn get_thread(&self, id: ThreadId) -> Result<ChatThread, ServerError> {
        self.call(move |db| db.get_thread(id)).await
    }

    pub async fn list_threads_for_admin(
        &self,
        admin_id: UserId,
    ) -> Result<Vec<ThreadSummary>, ServerError> {
        self.call(move |db| db.list_threads_for_admin(admin_id)).await
    }

    pub async fn insert_message(&self, message: NewMessage) -> Result<ChatMessage, ServerError> {
        self.call(move |db| db.insert_message(&message)).await
    }

    pub async fn list_messages(
        &self,
        thread_id: ThreadId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<ChatMessage>, ServerError> {
        self.call(move |db| db.list_messages(thread_id, limit, before))
            .await
    }
}

#[cfg(test)]
pub(crate) fn test_gateway() -> (Gateway, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let db = Database::open_at(&dir.path().join("skysense.db")).unwrap();
    (Gateway::new(db), dir)
}

#[cfg(test)]
mod tests {
    use skysense_shared::types::Role;

    use super::*;

    fn client(email: &str) -> NewUser {
        NewUser {
            name: "Test".to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$test".to_string(),
            role: Role::Client,
            status: UserStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_reading_round_trip_through_gateway() {
        let (gateway, _dir) = test_gateway();
        let id = gateway
            .insert_reading(NewReading {
                temperature: Some(21.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let (rows, total) = gateway
            .list_readings(ReadingFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].temperature, Some(21.0));
    }

    #[tokio::test]
    async fn test_duplicate_email_maps_to_conflict() {
        let (gateway, _dir) = test_gateway();
        gateway.create_user(client("a@x.io")).await.unwrap();

        let err = gateway.create_user(client("a@x.io")).await.unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_missing_thread_maps_to_not_found() {
        let (gateway, _dir) = test_gateway();
        let err = gateway.get_thread(ThreadId(99)).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_calls_serialize() {
        let (gateway, _dir) = test_gateway();
        let mut handles = Vec::new();
        for i in 0..8 {
            let gw = gateway.clone();
            handles.push(tokio::spawn(async move {
                gw.insert_reading(NewReading {
                    humidity: Some(f64::from(i)),
                    ..Default::default()
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let (_, total) = gateway
            .list_readings(ReadingFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 8);
    }

    #[tokio::test]
    async fn test_concurrent_first_contact_converges() {
        let (gateway, _dir) = test_gateway();
        let admin = gateway
            .create_user(NewUser {
                role: Role::Admin,
                ..client("a@x.io")
            })
            .await
            .unwrap();
        let client = gateway.create_user(client("c@x.io")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gw = gateway.clone();
            handles.push(tokio::spawn(async move {
                gw.get_or_create_thread(client, admin).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(gateway.list_threads_for_admin(admin).await.unwrap().len(), 1);
    }
}
