use crate::monitor::capabilities::{ServerCapabilities, ServerFeature};
use crate::monitor::mysql::{classify, Database, DbError, RowMap, ScalarValue, VariablesMap};
use crate::monitor::processlist::{ProcesslistThread, ProxySQLProcesslistThread};
use crate::monitor::queries;
use crate::monitor::replication::{self, AvailableReplica, BinlogDiff, ReplicationStatus};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The panels a tab can show. Expensive queries are only issued while their
/// panel is visible.
pub const PANELS: &[&str] = &[
    "dashboard",
    "processlist",
    "graphs",
    "replication",
    "locks",
    "ddl",
    "pfs_metrics",
    "statements_summary",
    "proxysql_hostgroup_summary",
    "proxysql_mysql_query_rules",
    "proxysql_command_stats",
];

#[derive(Clone, Debug, Default)]
pub struct PanelVisibility {
    visible: HashSet<String>,
}

impl PanelVisibility {
    pub fn from_names(names: &[String]) -> Self {
        return Self {
            visible: names.iter().map(|n| n.to_string()).collect(),
        };
    }

    pub fn is_visible(&self, panel: &str) -> bool {
        return self.visible.contains(panel);
    }

    pub fn set(&mut self, panel: &str, visible: bool) {
        if visible {
            self.visible.insert(panel.to_string());
        } else {
            self.visible.remove(panel);
        }
    }

    pub fn toggle(&mut self, panel: &str) -> bool {
        let now_visible = !self.is_visible(panel);
        self.set(panel, now_visible);
        return now_visible;
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BinlogStatus {
    pub file: String,
    pub position: i64,
    pub diff: BinlogDiff,
}

/// Per-worker replication-applier usage, including the ROLLUP total.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApplierWorker {
    pub worker_id: i64,
    pub apply_time: String,
    pub last_applied_transaction: String,
    pub total_thread_events: i64,
    /// Delta over the previous cycle; percentage of the all-workers delta.
    pub events_delta: i64,
    pub usage_percent: f64,
}

/// One full MySQL poll. Every graphed number is present as an absolute
/// counter; derivation happens later.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MySqlSample {
    pub global_variables: VariablesMap,
    pub global_status: VariablesMap,
    pub innodb_metrics: HashMap<String, i64>,
    pub replication_status: Option<ReplicationStatus>,
    pub binlog_status: BinlogStatus,
    pub available_replicas: Vec<AvailableReplica>,
    pub processlist: Vec<ProcesslistThread>,
    pub metadata_locks: Vec<RowMap>,
    pub ddl: Vec<RowMap>,
    pub disk_io_metrics: HashMap<String, i64>,
    pub replication_appliers: Vec<ApplierWorker>,
    pub group_replication_members: Vec<RowMap>,
    pub group_replication_write_concurrency: Option<i64>,
    pub file_io_rows: Vec<RowMap>,
    pub table_io_rows: Vec<RowMap>,
    pub statements_rows: Vec<RowMap>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxySqlSample {
    pub global_variables: VariablesMap,
    pub global_status: VariablesMap,
    pub command_stats: Vec<RowMap>,
    pub select_command_stats: HashMap<String, i64>,
    pub total_command_stats: HashMap<String, i64>,
    pub connection_pool: RowMap,
    pub hostgroup_summary: Vec<RowMap>,
    pub query_rules: Vec<RowMap>,
    pub processlist: Vec<ProxySQLProcesslistThread>,
}

#[derive(Clone, Debug)]
pub enum RawSample {
    MySql(Box<MySqlSample>),
    ProxySql(Box<ProxySqlSample>),
}

/// Sampling state that survives between cycles: binlog position for the diff,
/// applier counters for per-worker deltas, hostgroup counters for per-second
/// columns, and the set of panels disabled by privilege errors.
#[derive(Default)]
pub struct Sampler {
    previous_binlog_position: Option<i64>,
    previous_seconds_behind: Option<i64>,
    applier_previous: HashMap<i64, i64>,
    applier_previous_all: Option<i64>,
    hostgroup_previous: HashMap<String, HashMap<String, i64>>,
    unavailable_panels: HashSet<&'static str>,
    pub show_idle_threads: bool,
    pub show_trxs_only: bool,
    pub heartbeat_table: Option<String>,
    pub daemon_mode: bool,
    /// Seconds since the previous cycle, set by the tab runtime before a poll.
    pub polling_latency: f64,
}

/// Runs an optional (panel-gated) query: a query-classified failure is logged
/// once and marks the panel unavailable; connection failures abort the cycle.
macro_rules! optional_query {
    ($self:ident, $panel:expr, $result:expr, $default:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                if matches!(classify(&error), Some(DbError::Query(_))) {
                    if $self.unavailable_panels.insert($panel) {
                        log::warn!("Disabling panel {}: {}", $panel, error);
                    }
                    $default
                } else {
                    return Err(error);
                }
            }
        }
    };
}

impl Sampler {
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn reset(&mut self) {
        self.previous_binlog_position = None;
        self.previous_seconds_behind = None;
        self.applier_previous.clear();
        self.applier_previous_all = None;
        self.hostgroup_previous.clear();
        self.unavailable_panels.clear();
    }

    fn panel_enabled(&self, visibility: &PanelVisibility, panel: &'static str) -> bool {
        return visibility.is_visible(panel) && !self.unavailable_panels.contains(panel);
    }

    fn processlist_predicate(&self, performance_schema: bool) -> String {
        let mut predicate = String::new();
        if !self.show_idle_threads {
            if performance_schema {
                predicate.push_str(
                    " AND processlist_command NOT IN ('Sleep', 'Binlog Dump', 'Binlog Dump GTID')",
                );
            } else {
                predicate
                    .push_str(" AND Command NOT IN ('Sleep', 'Binlog Dump', 'Binlog Dump GTID')");
            }
        }
        if self.show_trxs_only {
            predicate.push_str(" AND trx_state IS NOT NULL");
        }
        return predicate;
    }

    pub async fn poll_mysql(
        &mut self,
        db: &mut Database,
        caps: &ServerCapabilities,
        visibility: &PanelVisibility,
    ) -> Result<MySqlSample> {
        let mut sample = MySqlSample::default();

        sample.global_variables = db.fetch_name_value_map(queries::mysql::VARIABLES).await?;
        sample.global_status = db.fetch_name_value_map(queries::mysql::STATUS).await?;

        self.fill_status_fallbacks(db, caps, &mut sample).await?;

        sample.innodb_metrics = {
            let rows = db.query_rows(queries::mysql::INNODB_METRICS).await?;
            rows.iter()
                .filter_map(|row| {
                    let name = row.get("NAME")?.display();
                    let count = row.get("COUNT")?.as_int()?;
                    Some((name, count))
                })
                .collect()
        };

        let (replication_status, seconds_behind) = replication::fetch_replication_status(
            db,
            caps,
            self.heartbeat_table.as_deref(),
            self.previous_seconds_behind,
            self.polling_latency,
        )
        .await?;
        self.previous_seconds_behind = seconds_behind;
        sample.replication_status = replication_status;

        sample.available_replicas = self.discover_replicas(db, caps).await?;
        sample.binlog_status = self.fetch_binlog_status(db, caps).await?;

        if visibility.is_visible("processlist") {
            let query = if caps.performance_schema_enabled {
                queries::with_predicate(
                    queries::mysql::PS_PROCESSLIST,
                    &self.processlist_predicate(true),
                )
            } else {
                queries::with_predicate(
                    queries::mysql::PL_PROCESSLIST,
                    &self.processlist_predicate(false),
                )
            };
            let rows = optional_query!(self, "processlist", db.query_rows(&query).await, Vec::new());
            sample.processlist = rows.iter().map(ProcesslistThread::from_row).collect();
        }

        if caps.performance_schema_enabled {
            self.poll_performance_schema(db, caps, visibility, &mut sample)
                .await?;
        }

        return Ok(sample);
    }

    async fn fill_status_fallbacks(
        &mut self,
        db: &mut Database,
        caps: &ServerCapabilities,
        sample: &mut MySqlSample,
    ) -> Result<()> {
        // 8.x dropped Innodb_checkpoint_age from SHOW GLOBAL STATUS; the
        // performance-schema log_status view still has it. Azure lacks the
        // BACKUP_ADMIN privilege that view needs.
        if caps.is_at_least(8, 0, 0)
            && !caps.is_azure
            && !caps.is_mariadb
            && !sample.global_status.contains_key("Innodb_checkpoint_age")
        {
            let age = optional_query!(
                self,
                "dashboard",
                db.fetch_value(queries::mysql::CHECKPOINT_AGE, "checkpoint_age").await,
                None
            );
            if let Some(age) = age.and_then(|v| v.as_int()) {
                sample
                    .global_status
                    .insert("Innodb_checkpoint_age".to_string(), ScalarValue::Int(age));
            }
        }

        // Innodb_lsn_current is missing on some servers; Innodb_os_log_written
        // has less precision but tracks the same movement.
        if !sample.global_status.contains_key("Innodb_lsn_current") {
            if let Some(written) = sample
                .global_status
                .get("Innodb_os_log_written")
                .and_then(|v| v.as_int())
            {
                sample
                    .global_status
                    .insert("Innodb_lsn_current".to_string(), ScalarValue::Int(written));
            }
        }
        return Ok(());
    }

    async fn discover_replicas(
        &mut self,
        db: &mut Database,
        caps: &ServerCapabilities,
    ) -> Result<Vec<AvailableReplica>> {
        let query = if caps.performance_schema_enabled && caps.is_at_least(5, 7, 0) {
            if caps.is_mariadb {
                queries::mysql::MARIADB_FIND_REPLICAS
            } else {
                queries::mysql::PS_FIND_REPLICAS
            }
        } else {
            queries::mysql::PL_FIND_REPLICAS
        };

        let rows = db.query_rows(query).await?;
        return Ok(rows.iter().map(AvailableReplica::from_row).collect());
    }

    async fn fetch_binlog_status(
        &mut self,
        db: &mut Database,
        caps: &ServerCapabilities,
    ) -> Result<BinlogStatus> {
        let query = if caps.has(ServerFeature::BinaryLogStatus) {
            queries::mysql::SHOW_BINARY_LOG_STATUS
        } else {
            queries::mysql::SHOW_MASTER_STATUS
        };
        let Some(row) = db.query_first(query).await? else {
            return Ok(BinlogStatus::default());
        };

        let position = row.get("Position").and_then(|v| v.as_int()).unwrap_or(0);
        let status = BinlogStatus {
            file: row.get("File").map(|v| v.display()).unwrap_or_default(),
            position,
            diff: compare_binlog_position(self.previous_binlog_position, position),
        };
        self.previous_binlog_position = Some(position);
        return Ok(status);
    }

    async fn poll_performance_schema(
        &mut self,
        db: &mut Database,
        caps: &ServerCapabilities,
        visibility: &PanelVisibility,
        sample: &mut MySqlSample,
    ) -> Result<()> {
        let disk_io = optional_query!(
            self,
            "dashboard",
            db.query_first(queries::mysql::PS_DISK_IO).await,
            None
        );
        if let Some(row) = disk_io {
            for key in ["io_read", "io_write"] {
                if let Some(value) = row.get(key).and_then(|v| v.as_int()) {
                    sample.disk_io_metrics.insert(key.to_string(), value);
                }
            }
        }

        let parallel_workers = sample
            .global_variables
            .get("replica_parallel_workers")
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        if caps.has(ServerFeature::ApplierWorkerStats)
            && sample.replication_status.is_some()
            && visibility.is_visible("replication")
            && parallel_workers > 1
        {
            let rows = optional_query!(
                self,
                "replication",
                db.query_rows(queries::mysql::REPLICATION_APPLIER_STATUS).await,
                Vec::new()
            );
            sample.replication_appliers = self.derive_applier_usage(&rows);
        }

        // The count of active redo log files only matters interactively.
        if !self.daemon_mode && caps.has(ServerFeature::RedoLogCapacity) && !caps.is_mariadb {
            let count = optional_query!(
                self,
                "dashboard",
                db.fetch_value(queries::mysql::ACTIVE_REDO_LOGS, "count").await,
                None
            );
            if let Some(count) = count.and_then(|v| v.as_int()) {
                sample
                    .global_status
                    .insert("Active_redo_log_count".to_string(), ScalarValue::Int(count));
            }
        }

        if caps.group_replication || caps.innodb_cluster {
            if caps.has(ServerFeature::WriteConcurrency) {
                let value = optional_query!(
                    self,
                    "replication",
                    db.fetch_value(
                        queries::mysql::GROUP_REPLICATION_WRITE_CONCURRENCY,
                        "write_concurrency",
                    )
                    .await,
                    None
                );
                sample.group_replication_write_concurrency = value.and_then(|v| v.as_int());
            }
            sample.group_replication_members = optional_query!(
                self,
                "replication",
                db.query_rows(queries::mysql::GROUP_REPLICATION_MEMBERS).await,
                Vec::new()
            );
        }

        if caps.has(ServerFeature::MetadataLocks) {
            if self.panel_enabled(visibility, "locks") {
                sample.metadata_locks = optional_query!(
                    self,
                    "locks",
                    db.query_rows(queries::mysql::METADATA_LOCKS).await,
                    Vec::new()
                );
            }

            if self.panel_enabled(visibility, "ddl") {
                sample.ddl = optional_query!(
                    self,
                    "ddl",
                    db.query_rows(queries::mysql::DDLS).await,
                    Vec::new()
                );
            }

            if self.panel_enabled(visibility, "pfs_metrics") {
                sample.file_io_rows = optional_query!(
                    self,
                    "pfs_metrics",
                    db.query_rows(queries::mysql::FILE_SUMMARY_BY_INSTANCE).await,
                    Vec::new()
                );
                sample.table_io_rows = optional_query!(
                    self,
                    "pfs_metrics",
                    db.query_rows(queries::mysql::TABLE_IO_WAITS_SUMMARY_BY_TABLE).await,
                    Vec::new()
                );
            }

            if self.panel_enabled(visibility, "statements_summary") {
                let query = if caps.is_at_least(8, 0, 0) && !caps.is_mariadb {
                    queries::mysql::STATEMENTS_SUMMARY_BY_DIGEST_80
                } else {
                    queries::mysql::STATEMENTS_SUMMARY_BY_DIGEST
                };
                sample.statements_rows = optional_query!(
                    self,
                    "statements_summary",
                    db.query_rows(query).await,
                    Vec::new()
                );
            }
        }

        return Ok(());
    }

    fn derive_applier_usage(&mut self, rows: &[RowMap]) -> Vec<ApplierWorker> {
        let mut workers = Vec::new();
        let mut all_delta: i64 = 0;

        for row in rows {
            let total = row
                .get("total_thread_events")
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            let worker_id = row.get("worker_id").and_then(|v| v.as_int());

            // The ROLLUP row carries the total across workers.
            let Some(worker_id) = worker_id else {
                all_delta = total - self.applier_previous_all.unwrap_or(total);
                self.applier_previous_all = Some(total);
                continue;
            };

            let previous = self.applier_previous.get(&worker_id).copied().unwrap_or(total);
            self.applier_previous.insert(worker_id, total);
            workers.push(ApplierWorker {
                worker_id,
                apply_time: row.get("apply_time").map(|v| v.display()).unwrap_or_default(),
                last_applied_transaction: row
                    .get("last_applied_transaction")
                    .map(|v| v.display())
                    .unwrap_or_default(),
                total_thread_events: total,
                events_delta: total - previous,
                usage_percent: 0.0,
            });
        }

        for worker in &mut workers {
            if all_delta > 0 {
                worker.usage_percent =
                    (worker.events_delta as f64 / all_delta as f64 * 10000.0).round() / 100.0;
            }
        }
        return workers;
    }

    pub async fn poll_proxysql(
        &mut self,
        db: &mut Database,
        visibility: &PanelVisibility,
    ) -> Result<ProxySqlSample> {
        let mut sample = ProxySqlSample::default();

        sample.global_variables = db.fetch_name_value_map(queries::proxysql::VARIABLES).await?;
        sample.global_status = db
            .fetch_name_value_map(queries::proxysql::MYSQL_STATS)
            .await?;

        sample.command_stats = db.query_rows(queries::proxysql::COMMAND_STATS).await?;
        synthesize_command_status(&sample.command_stats, &mut sample.global_status);
        let (select_stats, total_stats) = bucket_command_stats(&sample.command_stats);
        sample.select_command_stats = select_stats;
        sample.total_command_stats = total_stats;

        sample.connection_pool = db
            .query_first(queries::proxysql::CONNECTION_POOL_DATA)
            .await?
            .unwrap_or_default();
        let ratio = multiplex_efficiency(
            sample
                .connection_pool
                .get("connection_pool_connections")
                .and_then(|v| v.as_int())
                .unwrap_or(0),
            sample
                .global_status
                .get("Client_Connections_connected")
                .and_then(|v| v.as_int())
                .unwrap_or(0),
        );
        sample.global_status.insert(
            "proxysql_multiplex_efficiency_ratio".to_string(),
            ScalarValue::Int(ratio),
        );

        if self.panel_enabled(visibility, "proxysql_hostgroup_summary") {
            let rows = optional_query!(
                self,
                "proxysql_hostgroup_summary",
                db.query_rows(queries::proxysql::HOSTGROUP_SUMMARY).await,
                Vec::new()
            );
            sample.hostgroup_summary = self.derive_hostgroup_rates(rows);
        }

        if self.panel_enabled(visibility, "proxysql_mysql_query_rules") {
            sample.query_rules = optional_query!(
                self,
                "proxysql_mysql_query_rules",
                db.query_rows(queries::proxysql::QUERY_RULES_SUMMARY).await,
                Vec::new()
            );
        }

        if visibility.is_visible("processlist") {
            let query = queries::with_predicate(queries::proxysql::PROCESSLIST, "");
            let rows = optional_query!(self, "processlist", db.query_rows(&query).await, Vec::new());
            sample.processlist = rows
                .iter()
                .map(ProxySQLProcesslistThread::from_row)
                .collect();
        }

        return Ok(sample);
    }

    /// Per-row per-second columns for the hostgroup summary, keyed by
    /// hostgroup + backend address so rows survive reordering.
    fn derive_hostgroup_rates(&mut self, mut rows: Vec<RowMap>) -> Vec<RowMap> {
        const RATED_COLUMNS: [&str; 3] = ["Queries", "Bytes_data_sent", "Bytes_data_recv"];

        let mut current = HashMap::new();
        for row in &mut rows {
            let row_id = format!(
                "{}_{}_{}",
                row.get("hostgroup").map(|v| v.display()).unwrap_or_default(),
                row.get("srv_host").map(|v| v.display()).unwrap_or_default(),
                row.get("srv_port").map(|v| v.display()).unwrap_or_default(),
            );

            let mut counters = HashMap::new();
            for column in RATED_COLUMNS {
                let value = row.get(column).and_then(|v| v.as_int()).unwrap_or(0);
                counters.insert(column.to_string(), value);

                if let Some(previous) = self
                    .hostgroup_previous
                    .get(&row_id)
                    .and_then(|c| c.get(column))
                {
                    let delta = value - previous;
                    let per_sec = if self.polling_latency > 0.0 {
                        (delta as f64 / self.polling_latency).round() as i64
                    } else {
                        delta
                    };
                    row.insert(format!("{}_per_sec", column), ScalarValue::Int(per_sec));
                }
            }
            current.insert(row_id, counters);
        }

        self.hostgroup_previous = current;
        return rows;
    }
}

/// Binlog position comparator: unknown previous position reports zero, a
/// shrinking position means the log rotated.
pub fn compare_binlog_position(previous: Option<i64>, current: i64) -> BinlogDiff {
    match previous {
        None | Some(0) => BinlogDiff::Bytes(0),
        Some(previous) if previous > current => BinlogDiff::Rotated,
        Some(previous) => BinlogDiff::Bytes(current - previous),
    }
}

/// ProxySQL has no Com_* counters; they are synthesized from the command
/// statistics so the DML graphs work unchanged. "Queries" becomes the sum of
/// the query-shaped commands.
pub fn synthesize_command_status(command_stats: &[RowMap], global_status: &mut VariablesMap) {
    const QUERY_TYPES: [&str; 7] = ["SELECT", "INSERT", "UPDATE", "DELETE", "REPLACE", "SET", "CALL"];

    let mut total_queries: i64 = 0;
    for row in command_stats {
        let Some(command) = row.get("Command").map(|v| v.display()) else {
            continue;
        };
        let mut total_cnt = 0;
        if QUERY_TYPES.contains(&command.as_str()) {
            total_cnt = row.get("Total_cnt").and_then(|v| v.as_int()).unwrap_or(0);
            total_queries += total_cnt;
        }
        global_status.insert(
            format!("Com_{}", command.to_lowercase()),
            ScalarValue::Int(total_cnt),
        );
    }
    global_status.insert("Queries".to_string(), ScalarValue::Int(total_queries));
}

/// Latency buckets: SELECT alone, plus the sum over all commands.
pub fn bucket_command_stats(
    command_stats: &[RowMap],
) -> (HashMap<String, i64>, HashMap<String, i64>) {
    let mut select_stats = HashMap::new();
    let mut total_stats: HashMap<String, i64> = HashMap::new();

    for row in command_stats {
        let command = row.get("Command").map(|v| v.display()).unwrap_or_default();
        for (key, value) in row {
            if !key.starts_with("cnt_") {
                continue;
            }
            let Some(value) = value.as_int() else {
                continue;
            };
            if command == "SELECT" {
                select_stats.insert(key.clone(), value);
            }
            *total_stats.entry(key.clone()).or_insert(0) += value;
        }
    }
    return (select_stats, total_stats);
}

/// 100 - (backend pool connections / frontend connections) * 100, clamped.
pub fn multiplex_efficiency(pool_connections: i64, frontend_connected: i64) -> i64 {
    if frontend_connected <= 0 {
        return 100;
    }
    let ratio = 100.0 - (pool_connections as f64 / frontend_connected as f64) * 100.0;
    return (ratio.round() as i64).clamp(0, 100);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_binlog_comparator() {
        assert_eq!(compare_binlog_position(None, 500), BinlogDiff::Bytes(0));
        assert_eq!(compare_binlog_position(Some(0), 500), BinlogDiff::Bytes(0));
        assert_eq!(
            compare_binlog_position(Some(900), 500),
            BinlogDiff::Rotated
        );
        assert_eq!(
            compare_binlog_position(Some(500), 900),
            BinlogDiff::Bytes(400)
        );
    }

    fn command_row(command: &str, total: i64, cnt_1ms: i64) -> RowMap {
        let mut row = RowMap::new();
        row.insert("Command".into(), ScalarValue::Text(command.into()));
        row.insert("Total_cnt".into(), ScalarValue::Int(total));
        row.insert("cnt_1ms".into(), ScalarValue::Int(cnt_1ms));
        return row;
    }

    #[test]
    fn test_synthesize_command_status() {
        let stats = vec![
            command_row("SELECT", 100, 0),
            command_row("INSERT", 40, 0),
            command_row("SHOW", 7, 0),
        ];
        let mut status = VariablesMap::new();
        synthesize_command_status(&stats, &mut status);

        assert_eq!(status.get("Com_select").unwrap().as_int(), Some(100));
        assert_eq!(status.get("Com_insert").unwrap().as_int(), Some(40));
        // SHOW is not a query-shaped command: present but zero, excluded from
        // the total.
        assert_eq!(status.get("Com_show").unwrap().as_int(), Some(0));
        assert_eq!(status.get("Queries").unwrap().as_int(), Some(140));
    }

    #[test]
    fn test_bucket_command_stats() {
        let stats = vec![command_row("SELECT", 100, 30), command_row("UPDATE", 40, 12)];
        let (select, total) = bucket_command_stats(&stats);

        assert_eq!(select.get("cnt_1ms"), Some(&30));
        assert_eq!(total.get("cnt_1ms"), Some(&42));
    }

    #[test]
    fn test_multiplex_efficiency() {
        assert_eq!(multiplex_efficiency(5, 100), 95);
        assert_eq!(multiplex_efficiency(0, 100), 100);
        assert_eq!(multiplex_efficiency(200, 100), 0);
        assert_eq!(multiplex_efficiency(10, 0), 100);
    }

    #[test]
    fn test_applier_usage_percentages() {
        let mut sampler = Sampler::new();

        let row = |worker: Option<i64>, events: i64| {
            let mut map = RowMap::new();
            if let Some(worker) = worker {
                map.insert("worker_id".into(), ScalarValue::Int(worker));
            } else {
                map.insert("worker_id".into(), ScalarValue::Null);
            }
            map.insert("total_thread_events".into(), ScalarValue::Int(events));
            map.insert("apply_time".into(), ScalarValue::Text("1.2ms".into()));
            map.insert(
                "last_applied_transaction".into(),
                ScalarValue::Text("uuid:1".into()),
            );
            return map;
        };

        // First cycle seeds.
        sampler.derive_applier_usage(&[row(Some(1), 100), row(Some(2), 100), row(None, 200)]);
        // Worker 1 applied 30 events, worker 2 applied 10, total 40.
        let workers = sampler.derive_applier_usage(&[
            row(Some(1), 130),
            row(Some(2), 110),
            row(None, 240),
        ]);

        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].events_delta, 30);
        assert_eq!(workers[0].usage_percent, 75.0);
        assert_eq!(workers[1].usage_percent, 25.0);
    }

    #[test]
    fn test_hostgroup_rates() {
        let mut sampler = Sampler::new();
        sampler.polling_latency = 2.0;
        let row = |queries: i64| {
            let mut map = RowMap::new();
            map.insert("hostgroup".into(), ScalarValue::Int(1));
            map.insert("srv_host".into(), ScalarValue::Text("db1".into()));
            map.insert("srv_port".into(), ScalarValue::Int(3306));
            map.insert("Queries".into(), ScalarValue::Int(queries));
            map.insert("Bytes_data_sent".into(), ScalarValue::Int(0));
            map.insert("Bytes_data_recv".into(), ScalarValue::Int(0));
            return map;
        };

        let first = sampler.derive_hostgroup_rates(vec![row(1000)]);
        assert_eq!(first[0].get("Queries_per_sec"), None);

        let second = sampler.derive_hostgroup_rates(vec![row(1600)]);
        assert_eq!(
            second[0].get("Queries_per_sec").and_then(|v| v.as_int()),
            Some(300)
        );
    }

    #[test]
    fn test_panel_visibility_toggle() {
        let mut visibility = PanelVisibility::from_names(&["dashboard".to_string()]);
        assert_eq!(visibility.is_visible("dashboard"), true);
        assert_eq!(visibility.toggle("processlist"), true);
        assert_eq!(visibility.toggle("processlist"), false);
    }
}
