use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::types::{ChatMessage, Role, Session, SessionSummary, ToolCallRequest};

/// Durable conversation history with an in-memory hot cache.
///
/// Saving is replace-on-save: one write transaction upserts the session row,
/// deletes all prior message rows for the key, and re-inserts the current
/// messages in order. This keeps database and memory identical at the point
/// of every save and tolerates mid-turn history rewrites by the compactor.
pub struct SessionStore {
    db: Mutex<Connection>,
    cache: DashMap<String, Session>,
}

impl SessionStore {
    /// Wrap an already-open (and migrated) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            cache: DashMap::new(),
        }
    }

    /// Return the cached session, load it from the database, or construct a
    /// fresh one (not yet persisted). The session is cache-resident after
    /// the first access either way.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get_or_create(&self, key: &str) -> Result<Session> {
        if let Some(session) = self.cache.get(key) {
            debug!("session cache hit");
            return Ok(session.clone());
        }

        if let Some(session) = self.load(key)? {
            self.cache.insert(key.to_string(), session.clone());
            return Ok(session);
        }

        let session = Session::new(key);
        self.cache.insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Persist the session atomically and refresh the cache entry.
    ///
    /// Bumps `updated_at`; `created_at` is fixed at first insert.
    #[instrument(skip(self, session), fields(key = %session.key, messages = session.messages.len()))]
    pub fn save(&self, session: &mut Session) -> Result<()> {
        session.updated_at = chrono::Utc::now().to_rfc3339();

        // Entry lock held across the transaction: the cache entry is only
        // replaced once the commit succeeded.
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let metadata = serde_json::to_string(&session.metadata)?;
        tx.execute(
            "INSERT INTO sessions (key, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET updated_at = ?3, metadata = ?4",
            rusqlite::params![session.key, session.created_at, session.updated_at, metadata],
        )?;

        tx.execute(
            "DELETE FROM messages WHERE session_key = ?1",
            rusqlite::params![session.key],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO messages
                 (session_key, role, content, timestamp, tool_call_id, tool_calls)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for msg in &session.messages {
                let tool_calls = if msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&msg.tool_calls)?)
                };
                stmt.execute(rusqlite::params![
                    session.key,
                    msg.role.as_str(),
                    msg.content,
                    msg.timestamp,
                    msg.tool_call_id,
                    tool_calls,
                ])?;
            }
        }

        tx.commit()?;
        drop(db);

        self.cache.insert(session.key.clone(), session.clone());
        Ok(())
    }

    /// Remove the session row (message rows cascade) and evict the cache.
    /// Returns whether a row existed.
    #[instrument(skip(self), fields(key = %key))]
    pub fn delete(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM sessions WHERE key = ?1",
            rusqlite::params![key],
        )?;
        drop(db);
        self.cache.remove(key);
        Ok(removed > 0)
    }

    /// All sessions ordered by `updated_at` descending, with per-session
    /// message counts from a single join.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT s.key, s.created_at, s.updated_at, COUNT(m.id)
             FROM sessions s
             LEFT JOIN messages m ON m.session_key = s.key
             GROUP BY s.key
             ORDER BY s.updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionSummary {
                    key: row.get(0)?,
                    created_at: row.get(1)?,
                    updated_at: row.get(2)?,
                    message_count: row.get::<_, i64>(3)? as u32,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Evict a cache entry without touching the database (tests, admin).
    pub fn evict(&self, key: &str) {
        self.cache.remove(key);
    }

    fn load(&self, key: &str) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();

        let head = db.query_row(
            "SELECT key, created_at, updated_at, metadata FROM sessions WHERE key = ?1",
            rusqlite::params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );
        let (key, created_at, updated_at, metadata_json) = match head {
            Ok(h) => h,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut stmt = db.prepare_cached(
            "SELECT role, content, timestamp, tool_call_id, tool_calls
             FROM messages WHERE session_key = ?1 ORDER BY id",
        )?;
        let messages: Vec<ChatMessage> = stmt
            .query_map(rusqlite::params![key], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();

        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(Some(Session {
            key,
            created_at,
            updated_at,
            messages,
            metadata,
        }))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_str: String = row.get(0)?;
    let tool_calls_json: Option<String> = row.get(4)?;
    let tool_calls: Vec<ToolCallRequest> = tool_calls_json
        .as_deref()
        .and_then(|j| serde_json::from_str(j).ok())
        .unwrap_or_default();
    Ok(ChatMessage {
        role: role_str.parse().unwrap_or(Role::User),
        content: row.get(1)?,
        timestamp: row.get(2)?,
        tool_call_id: row.get(3)?,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        let conn = huginn_db::open_in_memory().unwrap();
        huginn_db::migrate::run_migrations(&conn).unwrap();
        SessionStore::new(conn)
    }

    #[test]
    fn save_then_reload_preserves_order_and_content() {
        let store = store();
        let mut session = store.get_or_create("web:default").unwrap();
        session.push(ChatMessage::user("hello"));
        session.push(ChatMessage::assistant_with_tools(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "calculator".into(),
                arguments: serde_json::json!({"a": 2, "b": 3}),
            }],
        ));
        session.push(ChatMessage::tool("call_1", "5"));
        session.push(ChatMessage::assistant("The sum is 5."));
        store.save(&mut session).unwrap();

        store.evict("web:default");
        let reloaded = store.get_or_create("web:default").unwrap();
        assert_eq!(reloaded.messages, session.messages);
        assert!(reloaded.tool_messages_are_anchored());
    }

    #[test]
    fn double_save_is_idempotent() {
        let store = store();
        let mut session = store.get_or_create("web:a").unwrap();
        session.push(ChatMessage::user("one"));
        store.save(&mut session).unwrap();
        store.save(&mut session).unwrap();

        store.evict("web:a");
        let reloaded = store.get_or_create("web:a").unwrap();
        assert_eq!(reloaded.messages.len(), 1);
        assert_eq!(reloaded.created_at, session.created_at);
    }

    #[test]
    fn fresh_session_is_not_persisted_until_save() {
        let store = store();
        let _ = store.get_or_create("web:ghost").unwrap();
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn updated_at_never_precedes_created_at() {
        let store = store();
        let mut session = store.get_or_create("web:t").unwrap();
        session.push(ChatMessage::user("x"));
        store.save(&mut session).unwrap();
        assert!(session.updated_at >= session.created_at);
    }

    #[test]
    fn delete_reports_existence_and_cascades() {
        let store = store();
        let mut session = store.get_or_create("web:d").unwrap();
        session.push(ChatMessage::user("bye"));
        store.save(&mut session).unwrap();

        assert!(store.delete("web:d").unwrap());
        assert!(!store.delete("web:d").unwrap());
        store.evict("web:d");
        let reloaded = store.get_or_create("web:d").unwrap();
        assert!(reloaded.messages.is_empty());
    }

    #[test]
    fn list_orders_by_update_time_with_counts() {
        let store = store();
        let mut a = store.get_or_create("web:a").unwrap();
        a.push(ChatMessage::user("1"));
        a.push(ChatMessage::assistant("2"));
        store.save(&mut a).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));

        let mut b = store.get_or_create("web:b").unwrap();
        b.push(ChatMessage::user("1"));
        store.save(&mut b).unwrap();

        let listing = store.list_sessions().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].key, "web:b");
        assert_eq!(listing[0].message_count, 1);
        assert_eq!(listing[1].key, "web:a");
        assert_eq!(listing[1].message_count, 2);
    }

    #[test]
    fn compactor_style_rewrite_replaces_rows() {
        let store = store();
        let mut session = store.get_or_create("web:c").unwrap();
        for i in 0..6 {
            session.push(ChatMessage::user(format!("m{i}")));
        }
        store.save(&mut session).unwrap();

        // Rewrite the middle, as the compactor does.
        session.messages = vec![
            ChatMessage::user("[summary of earlier conversation]"),
            session.messages[4].clone(),
            session.messages[5].clone(),
        ];
        store.save(&mut session).unwrap();

        store.evict("web:c");
        let reloaded = store.get_or_create("web:c").unwrap();
        assert_eq!(reloaded.messages.len(), 3);
        assert_eq!(reloaded.messages[1].content, "m4");
    }
}
