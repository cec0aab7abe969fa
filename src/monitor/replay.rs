use crate::monitor::changes::VariableChange;
use crate::monitor::metrics::MetricSnapshot;
use crate::monitor::mysql::{RowMap, VariablesMap};
use crate::monitor::processlist::Thread;
use crate::monitor::replication::{AvailableReplica, ReplicationStatus};
use crate::monitor::sampler::BinlogStatus;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Local};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Bumped whenever the payload shape or the table layout changes; readers
/// refuse files with a different version.
pub const SCHEMA_VERSION: i64 = 2;

const COMPRESSION_LEVEL: i32 = 5;
const DICT_TRAINING_SAMPLES: usize = 10;
const DICT_MAX_SIZE: usize = 10 * 1024 * 1024;
/// Upper bound for a decompressed payload; anything larger is corrupt.
const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything needed to restore the exact visual state of one cycle without
/// re-deriving: the raw sample pieces plus the pre-derived metric buffers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplayPayload {
    pub global_status: VariablesMap,
    pub global_variables: VariablesMap,
    pub processlist: Vec<Thread>,
    pub metrics: MetricSnapshot,

    // MySQL only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binlog_status: Option<BinlogStatus>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub innodb_metrics: HashMap<String, i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_locks: Vec<RowMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_status: Option<ReplicationStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_replicas: Vec<AvailableReplica>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_replication_members: Vec<RowMap>,

    // ProxySQL only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_stats: Vec<RowMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostgroup_summary: Vec<RowMap>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReplayMeta {
    pub schema_version: i64,
    pub host: String,
    pub port: u16,
    pub host_distro: String,
    pub connection_source: String,
    pub app_version: String,
}

#[derive(Clone, Debug)]
pub struct ReplayEntry {
    pub id: i64,
    pub timestamp: String,
    pub payload: ReplayPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReplayBounds {
    pub min_id: i64,
    pub max_id: i64,
    pub min_timestamp: String,
    pub max_timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SeekOutcome {
    /// Positioned just before the exact match; the next advance returns it.
    Exact(String),
    /// No exact match; positioned just before the closest earlier entry.
    Closest(String),
    NotFound,
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS replay_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME,
            data BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_replay_data_timestamp ON replay_data (timestamp);
        CREATE TABLE IF NOT EXISTS metadata (
            schema_version INTEGER DEFAULT 1,
            host VARCHAR(255),
            port INTEGER,
            host_distro VARCHAR(255),
            connection_source VARCHAR(255),
            app_version VARCHAR(255),
            compression_dict BLOB
        );
        CREATE TABLE IF NOT EXISTS variable_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            replay_id INTEGER,
            timestamp DATETIME,
            variable VARCHAR(255),
            old_value TEXT,
            new_value TEXT
        );
        "#,
    )?;

    // Auto-vacuum keeps the file from growing forever under retention.
    let auto_vacuum: i64 = conn.query_row("PRAGMA auto_vacuum", [], |row| row.get(0))?;
    if auto_vacuum != 1 {
        conn.execute_batch("PRAGMA auto_vacuum = FULL; VACUUM;")?;
    }
    return Ok(());
}

fn read_metadata(conn: &Connection) -> Result<Option<(ReplayMeta, Option<Vec<u8>>)>> {
    let row = conn
        .query_row(
            "SELECT schema_version, host, port, host_distro, connection_source, app_version, \
             compression_dict FROM metadata",
            [],
            |row| {
                Ok((
                    ReplayMeta {
                        schema_version: row.get(0)?,
                        host: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        port: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u16,
                        host_distro: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        connection_source: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        app_version: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    },
                    row.get::<_, Option<Vec<u8>>>(6)?,
                ))
            },
        )
        .optional()?;
    return Ok(row);
}

/// Status keys that bloat payloads without being useful on replay.
fn is_noise_status_key(key: &str) -> bool {
    const NOISE: [&str; 5] = ["performance_schema", "mysqlx", "ssl", "rsa", "tls"];
    let lower = key.to_lowercase();
    return NOISE.iter().any(|noise| lower.contains(noise));
}

pub struct ReplayRecorder {
    conn: Connection,
    path: PathBuf,
    daemon_mode: bool,
    retention_hours: i64,
    dict: Option<Vec<u8>>,
    training_samples: Vec<Vec<u8>>,
    training_failed: bool,
    last_purge: DateTime<Local>,
}

impl ReplayRecorder {
    pub fn open(
        path: &Path,
        meta: &ReplayMeta,
        daemon_mode: bool,
        retention_hours: i64,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create replay directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Cannot open replay file {}", path.display()))?;
        init_schema(&conn)?;

        let mut recorder = Self {
            conn,
            path: path.to_path_buf(),
            daemon_mode,
            retention_hours,
            dict: None,
            training_samples: Vec::new(),
            training_failed: false,
            // First purge runs on the first record().
            last_purge: Local::now() - Duration::hours(2),
        };
        recorder.manage_metadata(meta)?;
        log::info!(
            "Replay file: {} ({} hours retention)",
            path.display(),
            retention_hours
        );
        return Ok(recorder);
    }

    fn manage_metadata(&mut self, meta: &ReplayMeta) -> Result<()> {
        let Some((existing, dict)) = read_metadata(&self.conn)? else {
            self.conn.execute(
                "INSERT INTO metadata (schema_version, host, port, host_distro, \
                 connection_source, app_version) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    SCHEMA_VERSION,
                    meta.host,
                    meta.port as i64,
                    meta.host_distro,
                    meta.connection_source,
                    meta.app_version,
                ],
            )?;
            return Ok(());
        };

        if existing.schema_version != SCHEMA_VERSION {
            if !self.daemon_mode {
                return Err(anyhow!(
                    "The schema version of the replay file ({}) differs from this version's \
                     schema version ({})",
                    existing.schema_version,
                    SCHEMA_VERSION,
                ));
            }

            // Daemon mode archives the old file and starts a fresh one so no
            // data lands in the wrong schema.
            let archived = PathBuf::from(format!(
                "{}_old_schema_v{}",
                self.path.display(),
                existing.schema_version
            ));
            log::warn!(
                "Replay file schema version {} differs from {}; renaming to {}",
                existing.schema_version,
                SCHEMA_VERSION,
                archived.display(),
            );
            std::fs::rename(&self.path, &archived)?;

            self.conn = Connection::open(&self.path)?;
            init_schema(&self.conn)?;
            self.dict = None;
            self.training_samples.clear();
            return self.manage_metadata(meta);
        }

        if existing.connection_source != meta.connection_source {
            log::error!(
                "The connection source of the replay file ({}) differs from the current \
                 connection source ({}); never mix connection sources in the same file",
                existing.connection_source,
                meta.connection_source,
            );
            return Err(anyhow!(
                "Replay file {} was recorded from a {} host",
                self.path.display(),
                existing.connection_source,
            ));
        }

        if let Some(dict) = dict {
            log::info!(
                "Compression dictionary loaded (size: {})",
                crate::common::format_bytes(dict.len() as i64)
            );
            self.dict = Some(dict);
        }
        return Ok(());
    }

    /// Payloads that are too small or too uniform can make training fail;
    /// recording then just continues without a dictionary.
    fn train_dictionary(&mut self) -> Result<()> {
        let dict = match zstd::dict::from_samples(&self.training_samples, DICT_MAX_SIZE) {
            Ok(dict) => dict,
            Err(error) => {
                log::warn!(
                    "Compression dictionary training failed, recording without one: {}",
                    error
                );
                self.training_failed = true;
                self.training_samples = Vec::new();
                return Ok(());
            }
        };
        log::info!(
            "Compression dictionary trained with {} samples (size: {})",
            self.training_samples.len(),
            crate::common::format_bytes(dict.len() as i64)
        );

        self.conn
            .execute("UPDATE metadata SET compression_dict = ?", params![dict])?;
        self.dict = Some(dict);
        self.training_samples = Vec::new();
        return Ok(());
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = match &self.dict {
            Some(dict) => {
                let mut compressor = zstd::bulk::Compressor::with_dictionary(COMPRESSION_LEVEL, dict)?;
                compressor.compress(data)?
            }
            None => zstd::bulk::compress(data, COMPRESSION_LEVEL)?,
        };
        return Ok(compressed);
    }

    /// Serializes one cycle. Returns the row id, which change events recorded
    /// for this cycle reference.
    pub fn record(&mut self, timestamp: DateTime<Local>, payload: &ReplayPayload) -> Result<i64> {
        let mut payload = payload.clone();
        payload
            .global_status
            .retain(|key, _| !is_noise_status_key(key));

        let serialized = serde_json::to_vec(&payload).context("Cannot serialize replay payload")?;

        // The first N payloads double as dictionary training data.
        if self.dict.is_none() && !self.training_failed {
            if self.training_samples.len() < DICT_TRAINING_SAMPLES {
                self.training_samples.push(serialized.clone());
            } else {
                self.train_dictionary()?;
            }
        }

        let compressed = self.compress(&serialized)?;
        self.conn.execute(
            "INSERT INTO replay_data (timestamp, data) VALUES (?, ?)",
            params![timestamp.format(TIMESTAMP_FORMAT).to_string(), compressed],
        )?;
        let id = self.conn.last_insert_rowid();

        self.purge_old_data()?;
        return Ok(id);
    }

    pub fn record_variable_change(
        &mut self,
        replay_id: i64,
        timestamp: DateTime<Local>,
        change: &VariableChange,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO variable_history (replay_id, timestamp, variable, old_value, new_value) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                replay_id,
                timestamp.format(TIMESTAMP_FORMAT).to_string(),
                change.name,
                change.old_value,
                change.new_value,
            ],
        )?;
        return Ok(());
    }

    /// Deletes rows past the retention window; runs at most once per hour.
    fn purge_old_data(&mut self) -> Result<()> {
        let now = Local::now();
        if now - self.last_purge < Duration::hours(1) {
            return Ok(());
        }
        self.last_purge = now;

        let cutoff = (now - Duration::hours(self.retention_hours))
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let deleted = self
            .conn
            .execute("DELETE FROM replay_data WHERE timestamp < ?", params![cutoff])?;
        if deleted > 0 {
            log::debug!("Purged {} replay rows older than {}", deleted, cutoff);
        }
        return Ok(());
    }

    pub fn file_size(&self) -> u64 {
        return std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
    }
}

pub struct ReplayReader {
    conn: Connection,
    meta: ReplayMeta,
    dict: Option<Vec<u8>>,
    current_id: i64,
}

impl ReplayReader {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Cannot open replay file {}", path.display()))?;

        let Some((meta, dict)) = read_metadata(&conn)? else {
            return Err(anyhow!("Metadata not found in replay file"));
        };
        if meta.schema_version != SCHEMA_VERSION {
            return Err(anyhow!(
                "The schema version of the replay file ({}) differs from this version's schema \
                 version ({}); use a compatible version to replay this file",
                meta.schema_version,
                SCHEMA_VERSION,
            ));
        }

        log::info!(
            "Replay metadata - Host: {}:{}, Source: {} ({}), Recorded by: {}",
            meta.host,
            meta.port,
            meta.connection_source,
            meta.host_distro,
            meta.app_version,
        );

        return Ok(Self {
            conn,
            meta,
            dict,
            current_id: 0,
        });
    }

    pub fn meta(&self) -> &ReplayMeta {
        return &self.meta;
    }

    pub fn current_id(&self) -> i64 {
        return self.current_id;
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let raw = match &self.dict {
            Some(dict) => {
                let mut decompressor = zstd::bulk::Decompressor::with_dictionary(dict)?;
                decompressor.decompress(data, MAX_PAYLOAD_SIZE)?
            }
            None => zstd::bulk::decompress(data, MAX_PAYLOAD_SIZE)?,
        };
        return Ok(raw);
    }

    /// Min/max for the scrub bar.
    pub fn bounds(&self) -> Result<Option<ReplayBounds>> {
        let row = self
            .conn
            .query_row(
                "SELECT MIN(id), MAX(id), MIN(timestamp), MAX(timestamp) FROM replay_data",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((Some(min_id), Some(max_id), Some(min_timestamp), Some(max_timestamp))) => {
                return Ok(Some(ReplayBounds {
                    min_id,
                    max_id,
                    min_timestamp,
                    max_timestamp,
                }));
            }
            _ => return Ok(None),
        }
    }

    /// The row with the smallest id greater than the cursor, or None at the
    /// end of the file.
    pub fn next(&mut self) -> Result<Option<ReplayEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, timestamp, data FROM replay_data WHERE id > ? ORDER BY id LIMIT 1",
                params![self.current_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, timestamp, data)) = row else {
            return Ok(None);
        };

        let raw = self.decompress(&data)?;
        let payload: ReplayPayload = serde_json::from_slice(&raw)
            .with_context(|| format!("Cannot deserialize replay payload id {}", id))?;

        self.current_id = id;
        return Ok(Some(ReplayEntry {
            id,
            timestamp,
            payload,
        }));
    }

    /// Positions the cursor so the next advance returns the entry at (or just
    /// before) the given timestamp.
    pub fn seek_to_timestamp(&mut self, timestamp: &str) -> Result<SeekOutcome> {
        let exact = self
            .conn
            .query_row(
                "SELECT id FROM replay_data WHERE timestamp = ?",
                params![timestamp],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(id) = exact {
            self.current_id = id - 1;
            return Ok(SeekOutcome::Exact(timestamp.to_string()));
        }

        let closest = self
            .conn
            .query_row(
                "SELECT id, timestamp FROM replay_data WHERE timestamp < ? \
                 ORDER BY timestamp DESC LIMIT 1",
                params![timestamp],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match closest {
            Some((id, actual)) => {
                self.current_id = id - 1;
                return Ok(SeekOutcome::Closest(actual));
            }
            None => return Ok(SeekOutcome::NotFound),
        }
    }

    /// "Previous interval": the cursor steps back by two because the following
    /// forced advance moves it forward by one.
    pub fn rewind_one(&mut self) {
        self.current_id = (self.current_id - 2).max(0);
    }

    /// Variable changes captured for a given replay row, shown during replay.
    pub fn variable_changes_for(&self, replay_id: i64) -> Result<Vec<VariableChange>> {
        let mut statement = self.conn.prepare(
            "SELECT variable, old_value, new_value FROM variable_history WHERE replay_id = ? \
             ORDER BY id",
        )?;
        let changes = statement
            .query_map(params![replay_id], |row| {
                Ok(VariableChange {
                    name: row.get(0)?,
                    old_value: row.get(1)?,
                    new_value: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        return Ok(changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mysql::ScalarValue;
    use pretty_assertions::assert_eq;

    fn test_meta() -> ReplayMeta {
        ReplayMeta {
            schema_version: SCHEMA_VERSION,
            host: "db1".to_string(),
            port: 3306,
            host_distro: "MySQL".to_string(),
            connection_source: "MySQL".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn payload(value: i64) -> ReplayPayload {
        let mut payload = ReplayPayload::default();
        payload
            .global_status
            .insert("Com_select".to_string(), ScalarValue::Int(value));
        payload.metrics.datetimes = vec!["01/01/25 00:00:00".to_string()];
        payload.metrics.groups.insert(
            "dml".to_string(),
            [("Com_select".to_string(), vec![value])].into_iter().collect(),
        );
        return payload;
    }

    // Far in the future so the retention purge never eats the fixtures.
    fn timestamp(offset_secs: i64) -> DateTime<Local> {
        use chrono::TimeZone;
        return Local.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(offset_secs);
    }

    #[test]
    fn test_record_and_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        for i in 1..=5 {
            recorder.record(timestamp(i), &payload(i * 100)).unwrap();
        }
        drop(recorder);

        let mut reader = ReplayReader::open(&path).unwrap();
        assert_eq!(reader.meta().host, "db1");

        let bounds = reader.bounds().unwrap().unwrap();
        assert_eq!(bounds.min_id, 1);
        assert_eq!(bounds.max_id, 5);

        let entry = reader.next().unwrap().unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(
            entry.payload.global_status.get("Com_select").unwrap().as_int(),
            Some(100)
        );

        let entry = reader.next().unwrap().unwrap();
        assert_eq!(entry.id, 2);
    }

    #[test]
    fn test_seek_exact_then_advance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        for i in 1..=5 {
            recorder.record(timestamp(i), &payload(i)).unwrap();
        }
        drop(recorder);

        let mut reader = ReplayReader::open(&path).unwrap();
        let ts = timestamp(3).format(TIMESTAMP_FORMAT).to_string();
        assert_eq!(
            reader.seek_to_timestamp(&ts).unwrap(),
            SeekOutcome::Exact(ts.clone())
        );
        let entry = reader.next().unwrap().unwrap();
        assert_eq!(entry.id, 3);
        assert_eq!(entry.timestamp, ts);
    }

    #[test]
    fn test_seek_closest_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        recorder.record(timestamp(10), &payload(1)).unwrap();
        recorder.record(timestamp(20), &payload(2)).unwrap();
        drop(recorder);

        let mut reader = ReplayReader::open(&path).unwrap();

        let requested = timestamp(15).format(TIMESTAMP_FORMAT).to_string();
        let expected = timestamp(10).format(TIMESTAMP_FORMAT).to_string();
        assert_eq!(
            reader.seek_to_timestamp(&requested).unwrap(),
            SeekOutcome::Closest(expected)
        );
        assert_eq!(reader.next().unwrap().unwrap().id, 1);

        let too_early = timestamp(-100).format(TIMESTAMP_FORMAT).to_string();
        assert_eq!(
            reader.seek_to_timestamp(&too_early).unwrap(),
            SeekOutcome::NotFound
        );
    }

    #[test]
    fn test_rewind_one_steps_back_an_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        for i in 1..=3 {
            recorder.record(timestamp(i), &payload(i)).unwrap();
        }
        drop(recorder);

        let mut reader = ReplayReader::open(&path).unwrap();
        reader.next().unwrap();
        reader.next().unwrap();
        assert_eq!(reader.current_id(), 2);

        reader.rewind_one();
        assert_eq!(reader.next().unwrap().unwrap().id, 1);
    }

    #[test]
    fn test_dictionary_training_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        // Enough cycles to cross the training threshold; later frames are
        // dictionary-compressed, earlier ones are not.
        for i in 1..=20 {
            recorder.record(timestamp(i), &payload(i)).unwrap();
        }
        drop(recorder);

        let mut reader = ReplayReader::open(&path).unwrap();
        let mut count = 0;
        while let Some(entry) = reader.next().unwrap() {
            count += 1;
            assert_eq!(
                entry.payload.global_status.get("Com_select").unwrap().as_int(),
                Some(count)
            );
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_noise_status_keys_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        let mut sample = payload(1);
        sample.global_status.insert(
            "Ssl_cipher".to_string(),
            ScalarValue::Text("AES".to_string()),
        );
        sample.global_status.insert(
            "Performance_schema_accounts_lost".to_string(),
            ScalarValue::Int(0),
        );
        recorder.record(timestamp(1), &sample).unwrap();
        drop(recorder);

        let mut reader = ReplayReader::open(&path).unwrap();
        let entry = reader.next().unwrap().unwrap();
        assert_eq!(entry.payload.global_status.contains_key("Ssl_cipher"), false);
        assert_eq!(
            entry
                .payload
                .global_status
                .contains_key("Performance_schema_accounts_lost"),
            false
        );
        assert_eq!(entry.payload.global_status.contains_key("Com_select"), true);
    }

    #[test]
    fn test_schema_mismatch_fatal_outside_daemon_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        {
            let conn = Connection::open(&path).unwrap();
            init_schema(&conn).unwrap();
            conn.execute(
                "INSERT INTO metadata (schema_version, host, port, host_distro, \
                 connection_source, app_version) VALUES (1, 'db1', 3306, 'MySQL', 'MySQL', 'x')",
                [],
            )
            .unwrap();
        }

        assert!(ReplayRecorder::open(&path, &test_meta(), false, 48).is_err());
        assert!(ReplayReader::open(&path).is_err());
    }

    #[test]
    fn test_schema_mismatch_daemon_mode_archives_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.db");

        {
            let conn = Connection::open(&path).unwrap();
            init_schema(&conn).unwrap();
            conn.execute(
                "INSERT INTO metadata (schema_version, host, port, host_distro, \
                 connection_source, app_version) VALUES (1, 'db1', 3306, 'MySQL', 'MySQL', 'x')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO replay_data (timestamp, data) VALUES ('2025-01-01 00:00:00', x'00')",
                [],
            )
            .unwrap();
        }

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), true, 48).unwrap();
        recorder.record(timestamp(1), &payload(1)).unwrap();
        drop(recorder);

        let archived = dir.path().join("daemon.db_old_schema_v1");
        assert_eq!(archived.exists(), true);

        // The fresh file carries the current schema and only the new row.
        let mut reader = ReplayReader::open(&path).unwrap();
        let bounds = reader.bounds().unwrap().unwrap();
        assert_eq!(bounds.min_id, 1);
        assert_eq!(bounds.max_id, 1);
        assert!(reader.next().unwrap().is_some());
    }

    #[test]
    fn test_mixed_connection_sources_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        drop(recorder);

        let mut proxysql_meta = test_meta();
        proxysql_meta.connection_source = "ProxySQL".to_string();
        assert!(ReplayRecorder::open(&path, &proxysql_meta, false, 48).is_err());
    }

    #[test]
    fn test_variable_change_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");

        let mut recorder = ReplayRecorder::open(&path, &test_meta(), false, 48).unwrap();
        let id = recorder.record(timestamp(1), &payload(1)).unwrap();
        recorder
            .record_variable_change(
                id,
                timestamp(1),
                &VariableChange {
                    name: "read_only".to_string(),
                    old_value: "OFF".to_string(),
                    new_value: "ON".to_string(),
                },
            )
            .unwrap();
        drop(recorder);

        let reader = ReplayReader::open(&path).unwrap();
        let changes = reader.variable_changes_for(id).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "read_only");
        assert_eq!(reader.variable_changes_for(id + 1).unwrap(), vec![]);
    }
}
