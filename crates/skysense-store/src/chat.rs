//! Chat threads and messages.
//!
//! A thread is unique per `(client_id, admin_id)`; the unique index makes
//! [`Database::get_or_create_thread`] converge on one row even when two first
//! contacts race. Messages are append-only and ordered by their integer id.

use chrono::Utc;
use rusqlite::params;

use skysense_shared::types::{MessageId, ThreadId, UserId};

use crate::database::{decode_enum, decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{ChatMessage, ChatThread, NewMessage, ThreadSummary};

impl Database {
    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Return the thread for this pair, creating it on first contact.
    pub fn get_or_create_thread(&self, client_id: UserId, admin_id: UserId) -> Result<ChatThread> {
        let inserted = self.conn().execute(
            "INSERT INTO chat_threads (client_id, admin_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(client_id, admin_id) DO NOTHING",
            params![client_id.0, admin_id.0, encode_ts(&Utc::now())],
        )?;

        if inserted > 0 {
            tracing::debug!(client = %client_id, admin = %admin_id, "chat thread created");
        }

        self.conn()
            .query_row(
                "SELECT id, client_id, admin_id, updated_at
                 FROM chat_threads
                 WHERE client_id = ?1 AND admin_id = ?2",
                params![client_id.0, admin_id.0],
                row_to_thread,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn get_thread(&self, id: ThreadId) -> Result<ChatThread> {
        self.conn()
            .query_row(
                "SELECT id, client_id, admin_id, updated_at
                 FROM chat_threads
                 WHERE id = ?1",
                params![id.0],
                row_to_thread,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Threads of one admin with the client's contact and the latest message,
    /// most recently active first.  Threads of deleted clients are listed
    /// with empty contact fields.
    pub fn list_threads_for_admin(&self, admin_id: UserId) -> Result<Vec<ThreadSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT
                t.id,
                t.client_id,
                COALESCE(u.name, ''),
                COALESCE(u.email, ''),
                t.updated_at,
                (SELECT m.message
                 FROM chat_messages m
                 WHERE m.thread_id = t.id
                 ORDER BY m.id DESC
                 LIMIT 1) AS last_message
             FROM chat_threads t
             LEFT JOIN users u ON u.id = t.client_id
             WHERE t.admin_id = ?1
             ORDER BY t.updated_at DESC, t.id DESC",
        )?;

        let rows = stmt.query_map(params![admin_id.0], |row| {
            let updated_str: String = row.get(4)?;
            Ok(ThreadSummary {
                id: ThreadId(row.get(0)?),
                client_id: UserId(row.get(1)?),
                client_name: row.get(2)?,
                client_email: row.get(3)?,
                updated_at: decode_ts(4, &updated_str)?,
                last_message: row.get(5)?,
            })
        })?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(row?);
        }
        Ok(threads)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message. Fails if the thread does not exist.
    ///
    /// Bumping the thread's `updated_at` afterwards is best effort: a failure
    /// there is logged and the stored message is still returned.
    pub fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        let now = Utc::now();
        let created_at = encode_ts(&now);

        self.conn().execute(
            "INSERT INTO chat_messages (thread_id, sender_id, sender_role, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.thread_id.0,
                message.sender_id.0,
                message.sender_role.as_str(),
                message.message,
                created_at,
            ],
        )?;
        let id = MessageId(self.conn().last_insert_rowid());

        if let Err(e) = self.conn().execute(
            "UPDATE chat_threads SET updated_at = ?1 WHERE id = ?2",
            params![created_at, message.thread_id.0],
        ) {
            tracing::warn!(thread = %message.thread_id, error = %e, "failed to refresh thread timestamp");
        }

        Ok(ChatMessage {
            id,
            thread_id: message.thread_id,
            sender_id: message.sender_id,
            sender_role: message.sender_role,
            message: message.message.clone(),
            created_at: decode_ts(0, &created_at).unwrap_or(now),
        })
    }

    /// The newest `limit` messages of a thread (older than `before` when
    /// given), returned oldest first.
    pub fn list_messages(
        &self,
        thread_id: ThreadId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, thread_id, sender_id, sender_role, message, created_at
             FROM chat_messages
             WHERE thread_id = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY id DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![thread_id.0, before.map(|b| b.0), i64::from(limit)],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatThread> {
    let updated_str: String = row.get(3)?;

    Ok(ChatThread {
        id: ThreadId(row.get(0)?),
        client_id: UserId(row.get(1)?),
        admin_id: UserId(row.get(2)?),
        updated_at: decode_ts(3, &updated_str)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;

    Ok(ChatMessage {
        id: MessageId(row.get(0)?),
        thread_id: ThreadId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        sender_role: decode_enum(3, &role_str)?,
        message: row.get(4)?,
        created_at: decode_ts(5, &created_str)?,
    })
}
