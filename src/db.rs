use rusqlite::{params, Connection, OptionalExtension};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::keys::{self, ACTIVITIES, MODES, PHRASES, READS, STUDYTIMES, SUBSCRIPTIONS};
use crate::schedule;
use crate::types::{ChatId, Mode, Phrase};

/// Durable store for phrases, study times and per-chat state.
///
/// One connection guarded by a mutex: writers are serialized and every
/// multi-record change runs inside a single `BEGIN IMMEDIATE` transaction.
pub struct Store {
    conn: Mutex<Connection>,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout)?;

        // Enable WAL mode and optimize pragmas
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            config,
            clock: Arc::new(SystemClock),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_memory(config: Config) -> Result<Self> {
        Self::open(":memory:", config)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current Unix time in seconds, as seen by the store.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` inside one write transaction, rolling back on error.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        match f(&conn) {
            Ok(v) => {
                if let Err(e) = conn.execute("COMMIT", []) {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
                Ok(v)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    // --- Phrases ---

    /// Store a new phrase and schedule its first study.
    ///
    /// The first due-time slips by a day for every `new_per_day` zero-score
    /// phrases the chat already holds.
    pub fn add_phrase(&self, chat_id: ChatId, phrase: &str, explanation: &str) -> Result<()> {
        let now = self.now();
        self.write(|conn| {
            let prefix = keys::chat_key(chat_id);
            let mut new_phrases = 0;
            for (_, v) in scan_prefix(conn, PHRASES, &prefix)? {
                let p: Phrase = serde_json::from_slice(&v)?;
                if p.score == 0 {
                    new_phrases += 1;
                }
            }

            let sequence = next_sequence(conn, PHRASES)?;
            let key = keys::phrase_key(chat_id, sequence);
            let value = serde_json::to_vec(&Phrase::new(phrase, explanation))?;
            put(conn, PHRASES, &key, &value)?;

            let due = schedule::initial_due(&self.config, now, new_phrases);
            put(conn, STUDYTIMES, &key, &keys::encode_i64(due))?;

            tracing::debug!(chat_id, sequence, due, new_phrases, "Added phrase");
            Ok(())
        })
    }

    /// First phrase of the chat, in insertion order, matching `f`.
    pub fn find_phrase<F>(&self, chat_id: ChatId, mut f: F) -> Result<Option<Phrase>>
    where
        F: FnMut(&Phrase) -> bool,
    {
        let conn = self.lock();
        for (_, v) in scan_prefix(&conn, PHRASES, &keys::chat_key(chat_id))? {
            let p: Phrase = serde_json::from_slice(&v)?;
            if f(&p) {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }

    /// All phrases of a chat in insertion order.
    pub fn phrases(&self, chat_id: ChatId) -> Result<Vec<Phrase>> {
        let conn = self.lock();
        scan_prefix(&conn, PHRASES, &keys::chat_key(chat_id))?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(StoreError::from))
            .collect()
    }

    /// Due-times of a chat's phrases in insertion order.
    pub fn due_times(&self, chat_id: ChatId) -> Result<Vec<i64>> {
        let conn = self.lock();
        scan_prefix(&conn, STUDYTIMES, &keys::chat_key(chat_id))?
            .into_iter()
            .map(|(_, v)| keys::decode_i64(STUDYTIMES, &v))
            .collect()
    }

    /// Delete the phrase the chat currently has to study.
    pub fn delete_study_phrase(&self, chat_id: ChatId) -> Result<()> {
        let now = self.now();
        self.write(|conn| {
            let key = due_key(conn, chat_id, now)?.ok_or(StoreError::NoStudyDue)?;
            delete(conn, STUDYTIMES, &key)?;
            delete(conn, PHRASES, &key)?;
            tracing::debug!(chat_id, "Deleted study phrase");
            Ok(())
        })
    }

    /// Delete every phrase `f` matches, across all chats.
    /// Returns the number of phrases removed.
    pub fn delete_phrases<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut(ChatId, &Phrase) -> bool,
    {
        self.write(|conn| {
            let mut doomed = Vec::new();
            for (k, v) in scan_all(conn, PHRASES)? {
                let chat_id = keys::chat_of(PHRASES, &k)?;
                let p: Phrase = serde_json::from_slice(&v)?;
                if f(chat_id, &p) {
                    doomed.push(k);
                }
            }
            for k in &doomed {
                delete(conn, STUDYTIMES, k)?;
                delete(conn, PHRASES, k)?;
            }
            tracing::info!(count = doomed.len(), "Deleted phrases");
            Ok(doomed.len())
        })
    }

    /// Phrases of a chat as newline-delimited JSON.
    pub fn export_phrases(&self, chat_id: ChatId) -> Result<String> {
        let conn = self.lock();
        let mut out = String::new();
        for (_, v) in scan_prefix(&conn, PHRASES, &keys::chat_key(chat_id))? {
            out.push_str(&String::from_utf8_lossy(&v));
            out.push('\n');
        }
        Ok(out)
    }

    // --- Chats ---

    /// Mode of a chat; `GetStarted` for chats never seen.
    pub fn get_mode(&self, chat_id: ChatId) -> Result<Mode> {
        let conn = self.lock();
        match get(&conn, MODES, &keys::chat_key(chat_id))? {
            Some(v) => {
                let raw = keys::decode_i64(MODES, &v)?;
                Mode::from_i64(raw).ok_or(StoreError::CorruptValue {
                    bucket: MODES,
                    len: v.len(),
                })
            }
            None => Ok(Mode::default()),
        }
    }

    pub fn set_mode(&self, chat_id: ChatId, mode: Mode) -> Result<()> {
        let conn = self.lock();
        put(&conn, MODES, &keys::chat_key(chat_id), &keys::encode_i64(mode as i64))
    }

    /// Record the last time a message was sent to the chat.
    pub fn set_activity(&self, chat_id: ChatId, at: i64) -> Result<()> {
        let conn = self.lock();
        put(&conn, ACTIVITIES, &keys::chat_key(chat_id), &keys::encode_i64(at))
    }

    /// Record the last time the user read a message.
    pub fn set_read(&self, chat_id: ChatId, at: i64) -> Result<()> {
        let conn = self.lock();
        put(&conn, READS, &keys::chat_key(chat_id), &keys::encode_i64(at))
    }

    pub fn subscribe(&self, chat_id: ChatId) -> Result<()> {
        let conn = self.lock();
        put(&conn, SUBSCRIPTIONS, &keys::chat_key(chat_id), keys::SUBSCRIBED)
    }

    pub fn unsubscribe(&self, chat_id: ChatId) -> Result<()> {
        let conn = self.lock();
        delete(&conn, SUBSCRIPTIONS, &keys::chat_key(chat_id))
    }

    pub fn is_subscribed(&self, chat_id: ChatId) -> Result<bool> {
        let conn = self.lock();
        Ok(get(&conn, SUBSCRIPTIONS, &keys::chat_key(chat_id))?.is_some())
    }

    /// Chats whose user read something after we last messaged them.
    pub fn active_chats(&self) -> Result<Vec<ChatId>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT r.key, r.value, a.value
             FROM reads r
             LEFT JOIN activities a ON a.key = r.key
             ORDER BY r.key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
            ))
        })?;

        let mut chats = Vec::new();
        for row in rows {
            let (k, read, activity) = row?;
            let read = keys::decode_i64(READS, &read)?;
            let activity = match activity {
                Some(a) => keys::decode_i64(ACTIVITIES, &a)?,
                None => 0,
            };
            if read > activity {
                chats.push(keys::chat_of(READS, &k)?);
            }
        }
        Ok(chats)
    }

    /// Run `f` for every active chat.
    ///
    /// The chats are collected first, so `f` may call back into the store.
    pub fn each_active_chat<F: FnMut(ChatId)>(&self, f: F) -> Result<()> {
        self.active_chats()?.into_iter().for_each(f);
        Ok(())
    }

    /// Every chat that has a mode record.
    pub fn chat_ids(&self) -> Result<Vec<ChatId>> {
        let conn = self.lock();
        scan_all(&conn, MODES)?
            .iter()
            .map(|(k, _)| keys::chat_of(MODES, k))
            .collect()
    }

    /// Remove a chat's mode, phrases and study times.
    ///
    /// Activity, read and subscription records are left in place.
    /// Returns the number of phrases removed.
    pub fn delete_chat(&self, chat_id: ChatId) -> Result<usize> {
        self.write(|conn| {
            let prefix = keys::chat_key(chat_id);
            delete(conn, MODES, &prefix)?;
            let removed = delete_prefix(conn, PHRASES, &prefix)?;
            delete_prefix(conn, STUDYTIMES, &prefix)?;
            tracing::info!(chat_id, removed, "Deleted chat");
            Ok(removed)
        })
    }

    // --- Admin ---

    /// Make every study of every chat due now. Returns the number updated.
    pub fn study_now(&self) -> Result<usize> {
        let now = self.now();
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE studytimes SET value = ?1",
            params![keys::encode_i64(now)],
        )?;
        tracing::info!(count = n, "Reset study times to now");
        Ok(n)
    }

    /// Write a consistent copy of the database to a new file.
    pub fn backup_into(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let conn = self.lock();
        conn.execute("VACUUM INTO ?1", params![path])?;
        Ok(())
    }

    /// Stream a copy of the database. Returns the number of bytes written.
    pub fn backup_to<W: Write>(&self, w: &mut W) -> Result<u64> {
        // Private directory, removed with its copy on drop
        let dir = tempfile::tempdir()?;
        let tmp = dir.path().join("backup.db");

        self.backup_into(&tmp)?;
        let mut f = std::fs::File::open(&tmp)?;
        Ok(std::io::copy(&mut f, w)?)
    }
}

// --- Bucket primitives ---

pub(crate) fn get(conn: &Connection, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let sql = format!("SELECT value FROM {bucket} WHERE key = ?1");
    Ok(conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()?)
}

pub(crate) fn put(conn: &Connection, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
    let sql = format!(
        "INSERT INTO {bucket} (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value"
    );
    conn.execute(&sql, params![key, value])?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, bucket: &str, key: &[u8]) -> Result<()> {
    let sql = format!("DELETE FROM {bucket} WHERE key = ?1");
    conn.execute(&sql, params![key])?;
    Ok(())
}

/// All entries whose key starts with `prefix`, in key order.
pub(crate) fn scan_prefix(
    conn: &Connection,
    bucket: &str,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let sql = format!(
        "SELECT key, value FROM {bucket}
         WHERE key >= ?1 AND (?2 IS NULL OR key < ?2)
         ORDER BY key"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![prefix, keys::prefix_end(prefix)], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub(crate) fn scan_all(conn: &Connection, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let sql = format!("SELECT key, value FROM {bucket} ORDER BY key");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn delete_prefix(conn: &Connection, bucket: &str, prefix: &[u8]) -> Result<usize> {
    let sql = format!("DELETE FROM {bucket} WHERE key >= ?1 AND (?2 IS NULL OR key < ?2)");
    Ok(conn.execute(&sql, params![prefix, keys::prefix_end(prefix)])?)
}

/// Next value of a bucket's sequence, starting at 1.
fn next_sequence(conn: &Connection, bucket: &str) -> Result<u64> {
    conn.execute(
        "INSERT INTO sequences (bucket, value) VALUES (?1, 1)
         ON CONFLICT(bucket) DO UPDATE SET value = value + 1",
        params![bucket],
    )?;
    let value: i64 = conn.query_row(
        "SELECT value FROM sequences WHERE bucket = ?1",
        params![bucket],
        |row| row.get(0),
    )?;
    Ok(value as u64)
}

/// Key of the earliest study due at `now`; ties go to the lower key.
pub(crate) fn due_key(conn: &Connection, chat_id: ChatId, now: i64) -> Result<Option<Vec<u8>>> {
    let mut best: Option<(i64, Vec<u8>)> = None;
    for (k, v) in scan_prefix(conn, STUDYTIMES, &keys::chat_key(chat_id))? {
        let t = keys::decode_i64(STUDYTIMES, &v)?;
        if t > now {
            continue;
        }
        if best.as_ref().map_or(true, |(bt, _)| t < *bt) {
            best = Some((t, k));
        }
    }
    Ok(best.map(|(_, k)| k))
}
