//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use skysense_shared::types::{Role, UserId, UserStatus};

use crate::database::{decode_enum, decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{NewUser, User, UserFilter, UserSummary, UserUpdate};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, status, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user. A duplicate email yields [`StoreError::Conflict`].
    pub fn create_user(&self, user: &NewUser) -> Result<UserId> {
        self.conn()
            .execute(
                "INSERT INTO users (name, email, password_hash, role, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.name,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.status.as_str(),
                    encode_ts(&Utc::now()),
                ],
            )
            .map_err(|e| StoreError::from_write(e, "email already registered"))?;

        Ok(UserId(self.conn().last_insert_rowid()))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 LIMIT 1"),
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 LIMIT 1"),
                params![id.0],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// List users matching `filter`, newest first.
    pub fn list_users(&self, filter: &UserFilter) -> Result<Vec<UserSummary>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(role) = filter.role {
            clauses.push("role = ?");
            values.push(Value::Text(role.as_str().to_string()));
        }

        let mut sql = format!("SELECT {USER_COLUMNS} FROM users");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.summary());
        }
        Ok(users)
    }

    /// Clients waiting for approval.
    pub fn pending_users(&self) -> Result<Vec<UserSummary>> {
        self.list_users(&UserFilter {
            status: Some(UserStatus::Pending),
            role: Some(Role::Client),
        })
    }

    /// The first admin account, used as the counterpart of new client threads.
    pub fn any_admin(&self) -> Result<Option<UserSummary>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE role = 'admin' ORDER BY id LIMIT 1"),
                [],
                row_to_user,
            )
            .optional()?;
        Ok(user.map(|u| u.summary()))
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Returns `true` if the user exists.
    pub fn set_user_status(&self, id: UserId, status: UserStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.0],
        )?;
        Ok(affected > 0)
    }

    /// Apply the non-empty fields of `update`. Returns `false` when the user
    /// does not exist or there was nothing to change.
    pub fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        let mut sets = Vec::new();
        let mut values = Vec::new();

        if let Some(name) = &update.name {
            sets.push("name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(email) = &update.email {
            sets.push("email = ?");
            values.push(Value::Text(email.clone()));
        }
        if let Some(role) = update.role {
            sets.push("role = ?");
            values.push(Value::Text(role.as_str().to_string()));
        }
        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        values.push(Value::Integer(id.0));

        let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
        let affected = self
            .conn()
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| StoreError::from_write(e, "email already in use"))?;
        Ok(affected > 0)
    }

    pub fn update_user_password(&self, id: UserId, password_hash: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id.0],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a user.  Chat threads and messages they took part in are kept.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.0])?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(User {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: decode_enum(4, &role_str)?,
        status: decode_enum(5, &status_str)?,
        created_at: decode_ts(6, &created_str)?,
    })
}

#[cfg(test)]
pub(crate) fn new_user(email: &str, role: Role, status: UserStatus) -> NewUser {
    NewUser {
        name: email.split('@').next().unwrap_or(email).to_string(),
        email: email.to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        role,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_db;

    #[test]
    fn create_and_find() {
        let (db, _dir) = test_db();
        let id = db
            .create_user(&new_user("ana@example.com", Role::Client, UserStatus::Pending))
            .unwrap();

        let by_email = db.find_user_by_email("ana@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.role, Role::Client);
        assert_eq!(by_email.status, UserStatus::Pending);

        let by_id = db.get_user_by_id(id).unwrap().unwrap();
        assert_eq!(by_id.email, "ana@example.com");
        assert!(db.find_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let (db, _dir) = test_db();
        let user = new_user("ana@example.com", Role::Client, UserStatus::Pending);
        db.create_user(&user).unwrap();

        assert!(matches!(db.create_user(&user), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn filters_and_pending() {
        let (db, _dir) = test_db();
        db.create_user(&new_user("a@x.io", Role::Client, UserStatus::Pending)).unwrap();
        db.create_user(&new_user("b@x.io", Role::Client, UserStatus::Approved)).unwrap();
        db.create_user(&new_user("c@x.io", Role::Admin, UserStatus::Approved)).unwrap();

        assert_eq!(db.list_users(&UserFilter::default()).unwrap().len(), 3);
        let approved = db
            .list_users(&UserFilter {
                status: Some(UserStatus::Approved),
                role: None,
            })
            .unwrap();
        assert_eq!(approved.len(), 2);

        let pending = db.pending_users().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].email, "a@x.io");

        assert_eq!(db.any_admin().unwrap().unwrap().email, "c@x.io");
    }

    #[test]
    fn partial_update_and_status() {
        let (db, _dir) = test_db();
        let id = db
            .create_user(&new_user("a@x.io", Role::Client, UserStatus::Pending))
            .unwrap();

        assert!(!db.update_user(id, &UserUpdate::default()).unwrap());
        assert!(db
            .update_user(
                id,
                &UserUpdate {
                    name: Some("Ana".into()),
                    ..Default::default()
                }
            )
            .unwrap());
        assert!(db.set_user_status(id, UserStatus::Approved).unwrap());
        assert!(db.update_user_password(id, "$argon2id$other").unwrap());

        let user = db.get_user_by_id(id).unwrap().unwrap();
        assert_eq!(user.name, "Ana");
        assert_eq!(user.email, "a@x.io");
        assert_eq!(user.status, UserStatus::Approved);
        assert_eq!(user.password_hash, "$argon2id$other");

        assert!(!db.set_user_status(UserId(999), UserStatus::Approved).unwrap());
    }

    #[test]
    fn delete_user() {
        let (db, _dir) = test_db();
        let id = db
            .create_user(&new_user("a@x.io", Role::Client, UserStatus::Pending))
            .unwrap();

        assert!(db.delete_user(id).unwrap());
        assert!(db.get_user_by_id(id).unwrap().is_none());
        assert!(!db.delete_user(id).unwrap());
    }

    #[test]
    fn delete_user_keeps_chat_history() {
        use crate::models::NewMessage;

        let (db, _dir) = test_db();
        let client = db
            .create_user(&new_user("c@x.io", Role::Client, UserStatus::Approved))
            .unwrap();
        let admin = db
            .create_user(&new_user("a@x.io", Role::Admin, UserStatus::Approved))
            .unwrap();
        let thread = db.get_or_create_thread(client, admin).unwrap();
        db.insert_message(&NewMessage {
            thread_id: thread.id,
            sender_id: client,
            sender_role: Role::Client,
            message: "still here".to_string(),
        })
        .unwrap();

        assert!(db.delete_user(client).unwrap());
        assert!(db.delete_user(admin).unwrap());

        assert_eq!(db.get_thread(thread.id).unwrap().id, thread.id);
        let messages = db.list_messages(thread.id, 50, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "still here");

        let threads = db.list_threads_for_admin(admin).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].client_name, "");
        assert_eq!(threads[0].last_message.as_deref(), Some("still here"));
    }
}
