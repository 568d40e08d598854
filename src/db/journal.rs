use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::{normalize_timestamp, ConversationMessage, JournalEntry, MessageRole, User};

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<JournalEntry> {
    Ok(JournalEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        prompt_text: row.get(2)?,
        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        created_at: row.get(4)?,
    })
}

impl JournalDb {
    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user, or refresh the display name of an existing one.
    /// Never touches the analysis watermark of an existing user.
    pub fn upsert_user(&self, user: &User) -> Result<(), DbError> {
        let watermark = user.last_analysis_date.as_deref().map(normalize_timestamp);
        self.conn.execute(
            "INSERT INTO users (id, display_name, last_analysis_date)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![user.id, user.display_name, watermark],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, DbError> {
        let user = self
            .conn
            .query_row(
                "SELECT id, display_name, last_analysis_date FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        last_analysis_date: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // =========================================================================
    // Journal entries
    // =========================================================================

    /// Timestamps are stored normalized, since the watermark filter compares
    /// them as strings.
    pub fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO journal_entries (id, user_id, prompt_text, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.user_id,
                entry.prompt_text,
                entry.content,
                normalize_timestamp(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    /// Entries created at or after `watermark` that no analysis has
    /// consumed yet, oldest first.
    pub fn get_unanalyzed_entries(
        &self,
        user_id: &str,
        watermark: &str,
    ) -> Result<Vec<JournalEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, prompt_text, content, created_at
             FROM journal_entries je
             WHERE user_id = ?1 AND created_at >= ?2
               AND NOT EXISTS (SELECT 1 FROM analysis_entries ae WHERE ae.entry_id = je.id)
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![user_id, watermark], entry_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_unanalyzed_entries(&self, user_id: &str, watermark: &str) -> Result<usize, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM journal_entries je
             WHERE user_id = ?1 AND created_at >= ?2
               AND NOT EXISTS (SELECT 1 FROM analysis_entries ae WHERE ae.entry_id = je.id)",
            params![user_id, watermark],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    // =========================================================================
    // Conversation messages
    // =========================================================================

    pub fn insert_conversation_message(&self, message: &ConversationMessage) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO conversation_messages (id, entry_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.entry_id,
                message.role.as_str(),
                message.content,
                normalize_timestamp(&message.created_at),
            ],
        )?;
        Ok(())
    }

    /// Full transcript for one entry in chronological order.
    pub fn get_conversation(&self, entry_id: &str) -> Result<Vec<ConversationMessage>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entry_id, role, content, created_at
             FROM conversation_messages
             WHERE entry_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, entry_id, role, content, created_at) = row?;
            let role = MessageRole::parse(&role).ok_or_else(|| DbError::InvalidRow {
                table: "conversation_messages",
                reason: format!("message {} has unknown role '{}'", id, role),
            })?;
            messages.push(ConversationMessage {
                id,
                entry_id,
                role,
                content,
                created_at,
            });
        }
        Ok(messages)
    }
}
