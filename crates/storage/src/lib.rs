//! On-disk cache of synthesized clips.
//!
//! Keyed by `(voice, language, rate in thousandths, text)`, so replaying a
//! job (or re-running a segment that lands on a rate it already tried) costs
//! no service call.

use dubsync_segment::AudioClip;
use dubsync_synthesis::{CacheError, ClipStore, SynthesisRequest};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("corrupt clip: {0}")]
    CorruptClip(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub struct ClipCache {
    conn: Mutex<Connection>,
}

impl ClipCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clips (
                voice TEXT NOT NULL,
                language TEXT NOT NULL,
                rate_milli INTEGER NOT NULL,
                text TEXT NOT NULL,
                sample_rate INTEGER NOT NULL,
                samples BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (voice, language, rate_milli, text)
            );

            CREATE INDEX IF NOT EXISTS idx_clips_created_at ON clips(created_at);
            "#,
        )?;
        Ok(())
    }

    pub fn get(&self, request: &SynthesisRequest) -> Result<Option<AudioClip>> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let row: Option<(u32, Vec<u8>)> = conn
            .query_row(
                "SELECT sample_rate, samples FROM clips
                 WHERE voice = ?1 AND language = ?2 AND rate_milli = ?3 AND text = ?4",
                (
                    &request.voice,
                    &request.language,
                    request.rate_key(),
                    &request.text,
                ),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(sample_rate, bytes)| decode_samples(&bytes).map(|s| AudioClip::new(sample_rate, s)))
            .transpose()
    }

    pub fn put(&self, request: &SynthesisRequest, clip: &AudioClip) -> Result<()> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO clips
             (voice, language, rate_milli, text, sample_rate, samples, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                &request.voice,
                &request.language,
                request.rate_key(),
                &request.text,
                clip.sample_rate,
                encode_samples(&clip.samples),
                chrono::Utc::now().timestamp(),
            ),
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clips", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop entries written before `cutoff` (unix seconds). Returns rows removed.
    pub fn prune_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let removed = conn.execute("DELETE FROM clips WHERE created_at < ?1", [cutoff])?;
        if removed > 0 {
            tracing::info!(removed, "clip_cache_pruned");
        }
        Ok(removed)
    }
}

fn encode_samples(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StorageError::CorruptClip(format!(
            "{} bytes is not a whole number of samples",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

impl ClipStore for ClipCache {
    fn load(&self, request: &SynthesisRequest) -> std::result::Result<Option<AudioClip>, CacheError> {
        self.get(request).map_err(|e| CacheError(e.to_string()))
    }

    fn store(&self, request: &SynthesisRequest, clip: &AudioClip) -> std::result::Result<(), CacheError> {
        self.put(request, clip).map_err(|e| CacheError(e.to_string()))
    }
}
