//! SQLite implementation of the outbox store.
//!
//! One connection guarded by a mutex. Every write happens inside a rusqlite
//! transaction opened by [`OutboxStore::transaction`]; dropping the transaction
//! without committing rolls it back.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::message::{
    Attachment, AttachmentRole, MessageClass, OutgoingMessage, Reaction, StoredAttachment,
    StoredMessage, StoryType,
};
use crate::recipient::{Recipient, RegisteredState};
use crate::store::{OutboxStore, StoreTransaction};
use crate::types::{
    AttachmentId, DistributionListId, DistributionType, MessageId, MessageStatus, ReceiptKind,
    RecipientId, SyncMessageId, ThreadId,
};
use crate::{DispatchError, DispatchResult};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// SQLite-backed outbox store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens a database at the given path, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(path = %path.display(), "Opening outbox database");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory database.
    ///
    /// Useful for testing.
    pub fn in_memory() -> DispatchResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    /// Opens the configured database, or an in-memory one when no path is set.
    ///
    /// The config is validated first.
    pub fn from_config(config: &DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;
        match &config.database_path {
            Some(path) => Self::open(path),
            None => Self::in_memory(),
        }
    }

    fn from_connection(conn: Connection) -> DispatchResult<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> DispatchResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DispatchError::Persistence("connection lock poisoned".to_string()))
    }

    // ========================================================================
    // Setup helpers
    // ========================================================================

    /// Inserts or refreshes a recipient row.
    pub fn upsert_recipient(&self, recipient: &Recipient) -> DispatchResult<()> {
        let conn = self.lock()?;
        upsert_recipient(&conn, recipient)
    }

    /// Records that the next outgoing message to this recipient must carry the
    /// universal expire timer.
    pub fn set_default_timer_pending(&self, recipient_id: RecipientId) -> DispatchResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE recipients SET default_timer_pending = 1 WHERE id = ?1",
            params![recipient_id.0],
        )?;
        if affected == 0 {
            return Err(DispatchError::Persistence(format!(
                "recipient {} not found",
                recipient_id
            )));
        }
        Ok(())
    }

    pub fn add_distribution_list_member(
        &self,
        list_id: DistributionListId,
        member: RecipientId,
    ) -> DispatchResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO distribution_list_members (list_id, recipient_id) VALUES (?1, ?2)",
            params![list_id.0, member.0],
        )?;
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn message_count(&self) -> DispatchResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }

    pub fn thread_count(&self) -> DispatchResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?)
    }

    pub fn attachment_count(&self) -> DispatchResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))?)
    }

    /// Attachments still waiting to be tied to a message.
    pub fn unowned_attachment_count(&self) -> DispatchResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM attachments WHERE message_id IS NULL",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn message(&self, message_id: MessageId) -> DispatchResult<Option<StoredMessage>> {
        let conn = self.lock()?;
        load_message(&conn, message_id)
    }

    pub fn attachments_for(&self, message_id: MessageId) -> DispatchResult<Vec<StoredAttachment>> {
        let conn = self.lock()?;
        load_attachments(&conn, message_id)
    }

    pub fn attachment(&self, id: AttachmentId) -> DispatchResult<Option<StoredAttachment>> {
        let conn = self.lock()?;
        load_attachment(&conn, id)
    }

    pub fn story_send_count(&self, message_id: MessageId) -> DispatchResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM story_sends WHERE message_id = ?1",
            params![message_id.0],
            |row| row.get(0),
        )?)
    }

    pub fn reactions_for(&self, message_id: MessageId) -> DispatchResult<Vec<Reaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT emoji, author_id, date_sent, date_received FROM reactions
             WHERE message_id = ?1 ORDER BY date_sent",
        )?;
        let rows = stmt.query_map(params![message_id.0], |row| {
            Ok(Reaction {
                emoji: row.get(0)?,
                author: RecipientId(row.get(1)?),
                sent_at: from_millis(row.get(2)?),
                received_at: from_millis(row.get(3)?),
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    pub fn thread_updated_at(&self, thread_id: ThreadId) -> DispatchResult<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT updated_at FROM threads WHERE id = ?1",
                params![thread_id.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Makes every insert of a message with this body fail.
    #[cfg(test)]
    pub(crate) fn fail_inserts_with_body(&self, body: &str) -> DispatchResult<()> {
        let conn = self.lock()?;
        let escaped = body.replace('\'', "''");
        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS fail_body_{len} BEFORE INSERT ON messages
             WHEN NEW.body = '{escaped}'
             BEGIN SELECT RAISE(ABORT, 'injected insert failure'); END;",
            len = body.len(),
        ))?;
        Ok(())
    }
}

impl OutboxStore for SqliteStore {
    fn transaction<T>(
        &self,
        f: impl FnOnce(&dyn StoreTransaction) -> DispatchResult<T>,
    ) -> DispatchResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let value = match f(&SqliteTransaction { conn: &*tx }) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Rolling back outbox transaction");
                return Err(e);
            }
        };

        tx.commit()?;
        Ok(value)
    }
}

/// A live transaction on the outbox database.
struct SqliteTransaction<'a> {
    conn: &'a Connection,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn get_or_create_thread(
        &self,
        recipient: &Recipient,
        hint: Option<ThreadId>,
        distribution_type: DistributionType,
    ) -> DispatchResult<ThreadId> {
        upsert_recipient(self.conn, recipient)?;

        if let Some(hint) = hint {
            let exists: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM threads WHERE id = ?1",
                    params![hint.0],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(hint);
            }
        }

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM threads WHERE recipient_id = ?1 AND distribution_type = ?2",
                params![recipient.id().0, distribution_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(ThreadId(id));
        }

        self.conn.execute(
            "INSERT INTO threads (recipient_id, distribution_type, updated_at) VALUES (?1, ?2, ?3)",
            params![
                recipient.id().0,
                distribution_type.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = ThreadId(self.conn.last_insert_rowid());
        debug!(thread_id = %id, recipient = %recipient.id(), "Created thread");
        Ok(id)
    }

    fn thread_recipient(&self, thread_id: ThreadId) -> DispatchResult<Option<Recipient>> {
        let recipient_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT recipient_id FROM threads WHERE id = ?1",
                params![thread_id.0],
                |row| row.get(0),
            )
            .optional()?;
        match recipient_id {
            Some(id) => load_recipient(self.conn, RecipientId(id)),
            None => Ok(None),
        }
    }

    fn touch_thread(&self, thread_id: ThreadId) -> DispatchResult<()> {
        self.conn.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), thread_id.0],
        )?;
        Ok(())
    }

    fn consume_default_timer_obligation(&self, recipient_id: RecipientId) -> DispatchResult<bool> {
        let affected = self.conn.execute(
            "UPDATE recipients SET default_timer_pending = 0
             WHERE id = ?1 AND default_timer_pending = 1",
            params![recipient_id.0],
        )?;
        Ok(affected > 0)
    }

    fn distribution_list_members(
        &self,
        list_id: DistributionListId,
    ) -> DispatchResult<Vec<RecipientId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT recipient_id FROM distribution_list_members WHERE list_id = ?1 ORDER BY recipient_id",
        )?;
        let rows = stmt.query_map(params![list_id.0], |row| Ok(RecipientId(row.get(0)?)))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    fn insert_outbox_message(
        &self,
        message: &OutgoingMessage,
        thread_id: ThreadId,
        force_legacy: bool,
    ) -> DispatchResult<MessageId> {
        self.conn.execute(
            "INSERT INTO messages (thread_id, recipient_id, class, body, status, expires_in_ms,
                                   is_expiration_update, key_exchange, force_legacy, story_type, date_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                thread_id.0,
                message.recipient.id().0,
                message.class.as_str(),
                message.body,
                MessageStatus::Pending.as_str(),
                message.expires_in.as_millis() as i64,
                message.is_expiration_update,
                message.key_exchange,
                force_legacy,
                message.story_type.code(),
                message.sent_at.timestamp_millis(),
            ],
        )?;
        let message_id = MessageId(self.conn.last_insert_rowid());

        for attachment in &message.attachments {
            let id = insert_attachment(self.conn, attachment)?;
            self.associate_attachments(&[id], message_id, message.story_type.is_story())?;
        }

        debug!(message_id = %message_id, thread_id = %thread_id, "Inserted outbox message");
        Ok(message_id)
    }

    fn outgoing_message(&self, message_id: MessageId) -> DispatchResult<Option<StoredMessage>> {
        load_message(self.conn, message_id)
    }

    fn message_exists(&self, message_id: MessageId) -> DispatchResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM messages WHERE id = ?1",
                params![message_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_sent(&self, message_id: MessageId) -> DispatchResult<()> {
        set_status(self.conn, message_id, MessageStatus::Sent)
    }

    fn mark_sending(&self, message_id: MessageId) -> DispatchResult<()> {
        set_status(self.conn, message_id, MessageStatus::Sending)
    }

    fn mark_failed(&self, message_id: MessageId) -> DispatchResult<()> {
        set_status(self.conn, message_id, MessageStatus::Failed)
    }

    fn mark_unidentified(&self, message_id: MessageId) -> DispatchResult<()> {
        update_message(
            self.conn,
            message_id,
            "UPDATE messages SET unidentified = 1 WHERE id = ?1",
        )
    }

    fn mark_expire_started(&self, message_id: MessageId, at: DateTime<Utc>) -> DispatchResult<()> {
        let affected = self.conn.execute(
            "UPDATE messages SET expire_started_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), message_id.0],
        )?;
        if affected == 0 {
            return Err(DispatchError::MessageNotFound(message_id));
        }
        Ok(())
    }

    fn mark_remote_deleted(&self, message_id: MessageId) -> DispatchResult<()> {
        update_message(
            self.conn,
            message_id,
            "UPDATE messages SET remote_deleted = 1 WHERE id = ?1",
        )
    }

    fn increment_receipt_count(
        &self,
        kind: ReceiptKind,
        sync_id: &SyncMessageId,
        at: DateTime<Utc>,
    ) -> DispatchResult<usize> {
        let column = kind.column();
        let sql = format!(
            "UPDATE messages SET {column} = {column} + 1, receipt_updated_at = ?1
             WHERE recipient_id = ?2 AND date_sent = ?3 AND (?4 IS NULL OR id = ?4)"
        );
        let affected = self.conn.execute(
            &sql,
            params![
                at.to_rfc3339(),
                sync_id.recipient_id.0,
                sync_id.sent_at.timestamp_millis(),
                sync_id.message_id.map(|id| id.0),
            ],
        )?;
        Ok(affected)
    }

    fn insert_attachment_for_pre_upload(
        &self,
        attachment: &Attachment,
    ) -> DispatchResult<AttachmentId> {
        insert_attachment(self.conn, attachment)
    }

    fn copy_attachment_for_pre_upload(&self, source: AttachmentId) -> DispatchResult<AttachmentId> {
        let affected = self.conn.execute(
            "INSERT INTO attachments (uri, content_type, size, digest, role, created_at)
             SELECT uri, content_type, size, digest, role, ?1 FROM attachments WHERE id = ?2",
            params![Utc::now().to_rfc3339(), source.0],
        )?;
        if affected == 0 {
            return Err(DispatchError::Persistence(format!(
                "attachment {} not found for copy",
                source
            )));
        }
        Ok(AttachmentId(self.conn.last_insert_rowid()))
    }

    fn attachment_is_unowned(&self, attachment_id: AttachmentId) -> DispatchResult<bool> {
        let owner: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT message_id FROM attachments WHERE id = ?1",
                params![attachment_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(matches!(owner, Some(None)))
    }

    fn delete_unowned_attachment(&self, attachment_id: AttachmentId) -> DispatchResult<()> {
        self.conn.execute(
            "DELETE FROM attachments WHERE id = ?1 AND message_id IS NULL",
            params![attachment_id.0],
        )?;
        Ok(())
    }

    fn associate_attachments(
        &self,
        ids: &[AttachmentId],
        message_id: MessageId,
        is_story: bool,
    ) -> DispatchResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE attachments SET message_id = ?, is_story = ?
             WHERE message_id IS NULL AND id IN ({placeholders})"
        );
        let mut values: Vec<Value> = vec![Value::from(message_id.0), Value::from(is_story)];
        values.extend(ids.iter().map(|id| Value::from(id.0)));

        let affected = self.conn.execute(&sql, params_from_iter(values))?;
        if affected != ids.len() {
            return Err(DispatchError::Persistence(format!(
                "associated {} of {} attachments with message {}",
                affected,
                ids.len(),
                message_id
            )));
        }
        Ok(())
    }

    fn set_caption(&self, attachment_id: AttachmentId, caption: &str) -> DispatchResult<()> {
        self.conn.execute(
            "UPDATE attachments SET caption = ?1 WHERE id = ?2",
            params![caption, attachment_id.0],
        )?;
        Ok(())
    }

    fn insert_story_sends(
        &self,
        message_id: MessageId,
        members: &[RecipientId],
        sent_at: DateTime<Utc>,
        allows_replies: bool,
    ) -> DispatchResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO story_sends (message_id, recipient_id, sent_at, allows_replies)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for member in members {
            stmt.execute(params![
                message_id.0,
                member.0,
                sent_at.timestamp_millis(),
                allows_replies
            ])?;
        }
        Ok(())
    }

    fn add_reaction(&self, message_id: MessageId, reaction: &Reaction) -> DispatchResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO reactions (message_id, author_id, emoji, date_sent, date_received)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message_id.0,
                reaction.author.0,
                reaction.emoji,
                reaction.sent_at.timestamp_millis(),
                reaction.received_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn remove_reaction(&self, message_id: MessageId, author: RecipientId) -> DispatchResult<()> {
        self.conn.execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND author_id = ?2",
            params![message_id.0, author.0],
        )?;
        Ok(())
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn upsert_recipient(conn: &Connection, recipient: &Recipient) -> DispatchResult<()> {
    let (registered, list_id) = match recipient {
        Recipient::Individual { registered, .. } => (*registered, None),
        Recipient::DistributionList { list_id, .. } => (RegisteredState::Unknown, Some(list_id.0)),
        _ => (RegisteredState::Unknown, None),
    };
    conn.execute(
        "INSERT INTO recipients (id, kind, registered, distribution_list_id)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           kind = excluded.kind,
           registered = excluded.registered,
           distribution_list_id = excluded.distribution_list_id",
        params![
            recipient.id().0,
            recipient.kind_str(),
            registered.as_str(),
            list_id
        ],
    )?;
    Ok(())
}

fn load_recipient(conn: &Connection, id: RecipientId) -> DispatchResult<Option<Recipient>> {
    let row: Option<(String, String, Option<i64>)> = conn
        .query_row(
            "SELECT kind, registered, distribution_list_id FROM recipients WHERE id = ?1",
            params![id.0],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    Ok(row.and_then(|(kind, registered, list_id)| {
        Recipient::from_parts(
            id,
            &kind,
            RegisteredState::from_str(&registered),
            list_id.map(DistributionListId),
        )
    }))
}

fn insert_attachment(conn: &Connection, attachment: &Attachment) -> DispatchResult<AttachmentId> {
    conn.execute(
        "INSERT INTO attachments (uri, content_type, size, digest, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            attachment.uri,
            attachment.content_type,
            attachment.size as i64,
            attachment.digest,
            attachment.role.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(AttachmentId(conn.last_insert_rowid()))
}

const ATTACHMENT_COLUMNS: &str =
    "id, message_id, uri, content_type, size, digest, role, caption";

fn map_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredAttachment> {
    Ok(StoredAttachment {
        id: AttachmentId(row.get(0)?),
        message_id: row.get::<_, Option<i64>>(1)?.map(MessageId),
        uri: row.get(2)?,
        content_type: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        digest: row.get(5)?,
        role: AttachmentRole::from_str(&row.get::<_, String>(6)?),
        caption: row.get(7)?,
    })
}

fn load_attachment(conn: &Connection, id: AttachmentId) -> DispatchResult<Option<StoredAttachment>> {
    let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.0], map_attachment).optional()?)
}

fn load_attachments(conn: &Connection, message_id: MessageId) -> DispatchResult<Vec<StoredAttachment>> {
    let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE message_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![message_id.0], map_attachment)?;

    let mut attachments = Vec::new();
    for row in rows {
        attachments.push(row?);
    }
    Ok(attachments)
}

fn load_message(conn: &Connection, message_id: MessageId) -> DispatchResult<Option<StoredMessage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT thread_id, recipient_id, class, body, status, expires_in_ms, expire_started_at,
                is_expiration_update, key_exchange, force_legacy, story_type, date_sent,
                unidentified, remote_deleted, delivery_receipt_count, read_receipt_count,
                viewed_receipt_count
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row(params![message_id.0], |row| {
            Ok((
                RecipientId(row.get(1)?),
                StoredMessage {
                    id: message_id,
                    thread_id: ThreadId(row.get(0)?),
                    // Placeholder until the recipient row is resolved below.
                    recipient: Recipient::local_account(row.get(1)?),
                    class: MessageClass::from_str(&row.get::<_, String>(2)?),
                    body: row.get(3)?,
                    status: MessageStatus::from_str(&row.get::<_, String>(4)?),
                    expires_in: Duration::from_millis(row.get::<_, i64>(5)?.max(0) as u64),
                    expire_started_at: parse_datetime(row.get(6)?),
                    is_expiration_update: row.get(7)?,
                    key_exchange: row.get(8)?,
                    force_legacy: row.get(9)?,
                    story_type: StoryType::from_code(row.get(10)?),
                    sent_at: from_millis(row.get(11)?),
                    unidentified: row.get(12)?,
                    remote_deleted: row.get(13)?,
                    delivery_receipt_count: row.get(14)?,
                    read_receipt_count: row.get(15)?,
                    viewed_receipt_count: row.get(16)?,
                    attachments: Vec::new(),
                },
            ))
        })
        .optional()?;

    let Some((recipient_id, mut message)) = row else {
        return Ok(None);
    };

    message.recipient = load_recipient(conn, recipient_id)?.ok_or_else(|| {
        DispatchError::Persistence(format!(
            "recipient {} of message {} not found",
            recipient_id, message_id
        ))
    })?;
    message.attachments = load_attachments(conn, message_id)?;
    Ok(Some(message))
}

fn set_status(conn: &Connection, message_id: MessageId, status: MessageStatus) -> DispatchResult<()> {
    let affected = conn.execute(
        "UPDATE messages SET status = ?1 WHERE id = ?2",
        params![status.as_str(), message_id.0],
    )?;
    if affected == 0 {
        return Err(DispatchError::MessageNotFound(message_id));
    }
    Ok(())
}

fn update_message(conn: &Connection, message_id: MessageId, sql: &str) -> DispatchResult<()> {
    let affected = conn.execute(sql, params![message_id.0])?;
    if affected == 0 {
        return Err(DispatchError::MessageNotFound(message_id));
    }
    Ok(())
}

// ============================================================================
// Migrations
// ============================================================================

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DispatchResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_stories_and_reactions(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DispatchResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: recipients, threads, outbox messages, attachments.
fn migrate_v1_outbox(conn: &Connection) -> DispatchResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS recipients (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            registered TEXT NOT NULL DEFAULT 'unknown',
            distribution_list_id INTEGER,
            default_timer_pending INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS threads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id INTEGER NOT NULL REFERENCES recipients(id),
            distribution_type TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (recipient_id, distribution_type)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id INTEGER NOT NULL REFERENCES threads(id),
            recipient_id INTEGER NOT NULL REFERENCES recipients(id),
            class TEXT NOT NULL,
            body TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            expires_in_ms INTEGER NOT NULL DEFAULT 0,
            expire_started_at TEXT,
            is_expiration_update INTEGER NOT NULL DEFAULT 0,
            key_exchange INTEGER NOT NULL DEFAULT 0,
            force_legacy INTEGER NOT NULL DEFAULT 0,
            story_type INTEGER NOT NULL DEFAULT 0,
            date_sent INTEGER NOT NULL,
            unidentified INTEGER NOT NULL DEFAULT 0,
            remote_deleted INTEGER NOT NULL DEFAULT 0,
            delivery_receipt_count INTEGER NOT NULL DEFAULT 0,
            read_receipt_count INTEGER NOT NULL DEFAULT 0,
            viewed_receipt_count INTEGER NOT NULL DEFAULT 0,
            receipt_updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
        CREATE INDEX IF NOT EXISTS idx_messages_sync ON messages(recipient_id, date_sent);

        CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id INTEGER REFERENCES messages(id) ON DELETE CASCADE,
            uri TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            digest TEXT,
            role TEXT NOT NULL DEFAULT 'body',
            caption TEXT,
            is_story INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);
        "#,
    )?;
    record_migration(conn, 1, "outbox")
}

/// V2: story fan-out bookkeeping and reactions.
fn migrate_v2_stories_and_reactions(conn: &Connection) -> DispatchResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS distribution_list_members (
            list_id INTEGER NOT NULL,
            recipient_id INTEGER NOT NULL,
            PRIMARY KEY (list_id, recipient_id)
        );

        CREATE TABLE IF NOT EXISTS story_sends (
            message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            recipient_id INTEGER NOT NULL,
            sent_at INTEGER NOT NULL,
            allows_replies INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (message_id, recipient_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            author_id INTEGER NOT NULL,
            emoji TEXT NOT NULL,
            date_sent INTEGER NOT NULL,
            date_received INTEGER NOT NULL,
            PRIMARY KEY (message_id, author_id)
        );
        "#,
    )?;
    record_migration(conn, 2, "stories_and_reactions")
}
