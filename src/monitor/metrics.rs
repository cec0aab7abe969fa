use crate::monitor::capabilities::ConnectionSource;
use crate::monitor::mysql::VariablesMap;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TIMESTAMP_FORMAT: &str = "%d/%m/%y %H:%M:%S";
const AHI_SMOOTHING_FACTOR: f64 = 0.5;
const DAEMON_RETENTION_MINUTES: i64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricColor {
    Gray,
    Blue,
    Green,
    Red,
    Yellow,
    Purple,
    Orange,
}

impl MetricColor {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            MetricColor::Gray => (172, 207, 231),
            MetricColor::Blue => (68, 180, 255),
            MetricColor::Green => (84, 239, 174),
            MetricColor::Red => (255, 73, 112),
            MetricColor::Yellow => (252, 213, 121),
            MetricColor::Purple => (191, 121, 252),
            MetricColor::Orange => (252, 121, 121),
        }
    }
}

/// Where a series reads its absolute counter from on each cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricSource {
    GlobalStatus,
    InnodbMetrics,
    DiskIoMetrics,
    ProxysqlSelectCommandStats,
    ProxysqlTotalCommandStats,
    /// Derived by a specialized pass, not by the generic counter walk.
    None,
}

#[derive(Debug)]
pub struct SeriesDecl {
    pub name: &'static str,
    pub label: &'static str,
    pub color: MetricColor,
    pub visible: bool,
    pub save_history: bool,
    pub per_second: bool,
    pub graphable: bool,
    pub create_switch: bool,
}

const fn series(name: &'static str, label: &'static str, color: MetricColor) -> SeriesDecl {
    return SeriesDecl {
        name,
        label,
        color,
        visible: true,
        save_history: true,
        per_second: true,
        graphable: true,
        create_switch: true,
    };
}

const MYSQL_ONLY: &[ConnectionSource] = &[ConnectionSource::MySQL];
const PROXYSQL_ONLY: &[ConnectionSource] = &[ConnectionSource::ProxySQL];
const ALL_SOURCES: &[ConnectionSource] = &[ConnectionSource::MySQL, ConnectionSource::ProxySQL];

#[derive(Debug)]
pub struct GroupDecl {
    pub name: &'static str,
    pub tab_label: &'static str,
    pub source: MetricSource,
    pub connection_sources: &'static [ConnectionSource],
    pub use_with_replay: bool,
    pub series: &'static [SeriesDecl],
}

/// The full graph-tab declaration table. Groups are data, not code shape:
/// adding a series means adding a row here.
pub static METRIC_GROUPS: &[GroupDecl] = &[
    GroupDecl {
        name: "dml",
        tab_label: "DML",
        source: MetricSource::GlobalStatus,
        connection_sources: ALL_SOURCES,
        use_with_replay: true,
        series: &[
            SeriesDecl { visible: false, ..series("Queries", "Queries", MetricColor::Gray) },
            series("Com_select", "SELECT", MetricColor::Blue),
            series("Com_insert", "INSERT", MetricColor::Green),
            series("Com_update", "UPDATE", MetricColor::Yellow),
            series("Com_delete", "DELETE", MetricColor::Red),
            SeriesDecl {
                visible: false,
                save_history: false,
                graphable: false,
                ..series("Com_replace", "REPLACE", MetricColor::Red)
            },
            SeriesDecl {
                visible: false,
                graphable: false,
                ..series("Com_commit", "COMMIT", MetricColor::Green)
            },
            SeriesDecl {
                visible: false,
                save_history: false,
                graphable: false,
                ..series("Com_rollback", "ROLLBACK", MetricColor::Red)
            },
        ],
    },
    GroupDecl {
        name: "buffer_pool_requests",
        tab_label: "BP Requests",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("Innodb_buffer_pool_read_requests", "Read Requests", MetricColor::Blue),
            series("Innodb_buffer_pool_write_requests", "Write Requests", MetricColor::Green),
            series("Innodb_buffer_pool_reads", "Disk Reads", MetricColor::Red),
        ],
    },
    GroupDecl {
        name: "history_list_length",
        tab_label: "History List",
        source: MetricSource::InnodbMetrics,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            create_switch: false,
            ..series("trx_rseg_history_len", "HLL", MetricColor::Blue)
        }],
    },
    GroupDecl {
        name: "adaptive_hash_index",
        tab_label: "AHI",
        source: MetricSource::InnodbMetrics,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("adaptive_hash_searches", "Hit", MetricColor::Green),
            series("adaptive_hash_searches_btree", "Miss", MetricColor::Red),
        ],
    },
    GroupDecl {
        name: "adaptive_hash_index_hit_ratio",
        tab_label: "AHI",
        source: MetricSource::None,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            create_switch: false,
            ..series("hit_ratio", "Hit Ratio", MetricColor::Green)
        }],
    },
    GroupDecl {
        name: "checkpoint",
        tab_label: "Checkpoint",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            create_switch: false,
            ..series("Innodb_checkpoint_age", "Uncheckpointed", MetricColor::Blue)
        }],
    },
    GroupDecl {
        name: "redo_log",
        tab_label: "Redo Log",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            create_switch: false,
            ..series("Innodb_lsn_current", "Data Written", MetricColor::Blue)
        }],
    },
    GroupDecl {
        name: "redo_log_active_count",
        tab_label: "Redo Log",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            visible: false,
            create_switch: false,
            ..series("Active_redo_log_count", "Active Count", MetricColor::Blue)
        }],
    },
    GroupDecl {
        name: "table_cache",
        tab_label: "Table Cache",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("Table_open_cache_hits", "Hit", MetricColor::Green),
            series("Table_open_cache_misses", "Miss", MetricColor::Red),
            series("Table_open_cache_overflows", "Overflow", MetricColor::Yellow),
        ],
    },
    GroupDecl {
        name: "threads",
        tab_label: "Threads",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            SeriesDecl {
                per_second: false,
                visible: false,
                ..series("Threads_connected", "Connected", MetricColor::Green)
            },
            SeriesDecl {
                per_second: false,
                ..series("Threads_running", "Running", MetricColor::Blue)
            },
        ],
    },
    GroupDecl {
        name: "temporary_objects",
        tab_label: "Temp Objects",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("Created_tmp_tables", "Tables", MetricColor::Blue),
            series("Created_tmp_disk_tables", "Disk", MetricColor::Red),
            series("Created_tmp_files", "Files", MetricColor::Yellow),
        ],
    },
    GroupDecl {
        name: "aborted_connections",
        tab_label: "Aborted Connections",
        source: MetricSource::GlobalStatus,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("Aborted_clients", "Client (timeout)", MetricColor::Blue),
            series("Aborted_connects", "Connects (attempt)", MetricColor::Red),
        ],
    },
    GroupDecl {
        name: "disk_io",
        tab_label: "Disk I/O",
        source: MetricSource::DiskIoMetrics,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("io_read", "Read", MetricColor::Blue),
            series("io_write", "Write", MetricColor::Green),
        ],
    },
    GroupDecl {
        name: "locks",
        tab_label: "Locks",
        source: MetricSource::None,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            ..series("metadata_lock_count", "Metadata", MetricColor::Red)
        }],
    },
    GroupDecl {
        name: "replication_lag",
        tab_label: "Replication",
        source: MetricSource::None,
        connection_sources: MYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            create_switch: false,
            ..series("lag", "Lag", MetricColor::Blue)
        }],
    },
    GroupDecl {
        name: "proxysql_active_trx",
        tab_label: "Active TRX",
        source: MetricSource::GlobalStatus,
        connection_sources: PROXYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            create_switch: false,
            ..series("Active_Transactions", "Active TRX", MetricColor::Blue)
        }],
    },
    GroupDecl {
        name: "proxysql_multiplex_efficiency",
        tab_label: "Multiplex Efficiency",
        source: MetricSource::GlobalStatus,
        connection_sources: PROXYSQL_ONLY,
        use_with_replay: true,
        series: &[SeriesDecl {
            per_second: false,
            create_switch: false,
            ..series(
                "proxysql_multiplex_efficiency_ratio",
                "Multiplex Efficiency",
                MetricColor::Blue
            )
        }],
    },
    GroupDecl {
        name: "proxysql_connections",
        tab_label: "Connections",
        source: MetricSource::GlobalStatus,
        connection_sources: PROXYSQL_ONLY,
        use_with_replay: true,
        series: &[
            SeriesDecl {
                per_second: false,
                ..series("Client_Connections_non_idle", "FE (non-idle)", MetricColor::Green)
            },
            series("Client_Connections_aborted", "FE (aborted)", MetricColor::Gray),
            SeriesDecl {
                per_second: false,
                visible: false,
                ..series("Client_Connections_connected", "FE (connected)", MetricColor::Green)
            },
            series("Client_Connections_created", "FE (created)", MetricColor::Yellow),
            series("Server_Connections_aborted", "BE (aborted)", MetricColor::Red),
            SeriesDecl {
                per_second: false,
                visible: false,
                ..series("Server_Connections_connected", "BE (connected)", MetricColor::Green)
            },
            series("Server_Connections_created", "BE (created)", MetricColor::Blue),
            series("Access_Denied_Wrong_Password", "Wrong Password", MetricColor::Purple),
        ],
    },
    GroupDecl {
        name: "proxysql_queries_data_network",
        tab_label: "Query Data Rates",
        source: MetricSource::GlobalStatus,
        connection_sources: PROXYSQL_ONLY,
        use_with_replay: true,
        series: &[
            series("Queries_backends_bytes_recv", "BE Recv", MetricColor::Blue),
            series("Queries_backends_bytes_sent", "BE Sent", MetricColor::Green),
            series("Queries_frontends_bytes_recv", "FE Recv", MetricColor::Purple),
            series("Queries_frontends_bytes_sent", "FE Sent", MetricColor::Yellow),
        ],
    },
    GroupDecl {
        name: "proxysql_select_command_stats",
        tab_label: "SELECT Command Stats",
        source: MetricSource::ProxysqlSelectCommandStats,
        connection_sources: PROXYSQL_ONLY,
        use_with_replay: true,
        series: &[
            SeriesDecl { visible: false, ..series("cnt_100us", "100us", MetricColor::Gray) },
            SeriesDecl { visible: false, ..series("cnt_500us", "500us", MetricColor::Blue) },
            SeriesDecl { visible: false, ..series("cnt_1ms", "1ms", MetricColor::Green) },
            SeriesDecl { visible: false, ..series("cnt_5ms", "5ms", MetricColor::Green) },
            series("cnt_10ms", "10ms", MetricColor::Green),
            series("cnt_50ms", "50ms", MetricColor::Yellow),
            series("cnt_100ms", "100ms", MetricColor::Yellow),
            series("cnt_500ms", "500ms", MetricColor::Orange),
            series("cnt_1s", "1s", MetricColor::Orange),
            series("cnt_5s", "5s", MetricColor::Red),
            series("cnt_10s", "10s", MetricColor::Purple),
            series("cnt_INFs", "10s+", MetricColor::Purple),
        ],
    },
    GroupDecl {
        name: "proxysql_total_command_stats",
        tab_label: "Total Command Stats",
        source: MetricSource::ProxysqlTotalCommandStats,
        connection_sources: PROXYSQL_ONLY,
        use_with_replay: true,
        series: &[
            SeriesDecl { visible: false, ..series("cnt_100us", "100us", MetricColor::Gray) },
            SeriesDecl { visible: false, ..series("cnt_500us", "500us", MetricColor::Blue) },
            SeriesDecl { visible: false, ..series("cnt_1ms", "1ms", MetricColor::Green) },
            SeriesDecl { visible: false, ..series("cnt_5ms", "5ms", MetricColor::Green) },
            series("cnt_10ms", "10ms", MetricColor::Green),
            series("cnt_50ms", "50ms", MetricColor::Yellow),
            series("cnt_100ms", "100ms", MetricColor::Yellow),
            series("cnt_500ms", "500ms", MetricColor::Orange),
            series("cnt_1s", "1s", MetricColor::Orange),
            series("cnt_5s", "5s", MetricColor::Red),
            series("cnt_10s", "10s", MetricColor::Purple),
            series("cnt_INFs", "10s+", MetricColor::Purple),
        ],
    },
];

/// Either the series saw its first absolute counter already or it did not;
/// a sum type instead of a 0/None sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeltaState {
    Unseeded,
    Seeded(i64),
}

pub struct MetricSeries {
    pub decl: &'static SeriesDecl,
    pub visible: bool,
    last_value: DeltaState,
    pub values: Vec<i64>,
}

impl MetricSeries {
    fn new(decl: &'static SeriesDecl) -> Self {
        return Self {
            decl,
            visible: decl.visible,
            last_value: DeltaState::Unseeded,
            values: Vec::new(),
        };
    }

    pub fn last(&self) -> Option<i64> {
        return self.values.last().copied();
    }
}

pub struct MetricGroup {
    pub decl: &'static GroupDecl,
    pub series: Vec<MetricSeries>,
}

impl MetricGroup {
    fn new(decl: &'static GroupDecl) -> Self {
        return Self {
            decl,
            series: decl.series.iter().map(MetricSeries::new).collect(),
        };
    }

    pub fn series(&self, name: &str) -> Option<&MetricSeries> {
        return self.series.iter().find(|s| s.decl.name == name);
    }

    fn series_mut(&mut self, name: &str) -> Option<&mut MetricSeries> {
        return self.series.iter_mut().find(|s| s.decl.name == name);
    }
}

/// Inputs for one derivation pass; all counters are absolute, rate math
/// happens only here.
#[derive(Default)]
pub struct DerivationInput<'a> {
    pub timestamp: Option<DateTime<Local>>,
    pub polling_latency: f64,
    pub global_variables: Option<&'a VariablesMap>,
    pub global_status: Option<&'a VariablesMap>,
    pub innodb_metrics: Option<&'a HashMap<String, i64>>,
    pub disk_io_metrics: Option<&'a HashMap<String, i64>>,
    pub metadata_lock_count: Option<usize>,
    pub replication_lag: Option<i64>,
    pub proxysql_select_command_stats: Option<&'a HashMap<String, i64>>,
    pub proxysql_total_command_stats: Option<&'a HashMap<String, i64>>,
}

impl DerivationInput<'_> {
    fn counter(&self, source: MetricSource, name: &str) -> Option<i64> {
        match source {
            MetricSource::GlobalStatus => self
                .global_status
                .and_then(|map| map.get(name))
                .and_then(|v| v.as_int()),
            MetricSource::InnodbMetrics => {
                self.innodb_metrics.and_then(|map| map.get(name)).copied()
            }
            MetricSource::DiskIoMetrics => {
                self.disk_io_metrics.and_then(|map| map.get(name)).copied()
            }
            MetricSource::ProxysqlSelectCommandStats => self
                .proxysql_select_command_stats
                .and_then(|map| map.get(name))
                .copied(),
            MetricSource::ProxysqlTotalCommandStats => self
                .proxysql_total_command_stats
                .and_then(|map| map.get(name))
                .copied(),
            MetricSource::None => None,
        }
    }
}

/// Serialized form of the store for the replay file: values are stored
/// pre-derived so a reader restores the exact visual state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    pub datetimes: Vec<String>,
    pub groups: HashMap<String, HashMap<String, Vec<i64>>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointBand {
    Green,
    Yellow,
    Red,
}

/// Reported state of the adaptive hash index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AhiState {
    Disabled,
    Unknown,
    Inactive,
    Ratio(f64),
}

pub struct MetricStore {
    source: ConnectionSource,
    replay_mode: bool,
    daemon_mode: bool,
    initialized: bool,
    pub timestamps: Vec<DateTime<Local>>,
    pub groups: Vec<MetricGroup>,

    smoothed_ahi_ratio: Option<f64>,
    ahi_enabled: bool,
    pub redo_log_size: i64,
    pub checkpoint_age_sync_flush: i64,
    last_checkpoint_age: i64,
}

impl MetricStore {
    pub fn new(source: ConnectionSource, replay_mode: bool, daemon_mode: bool) -> Self {
        return Self {
            source,
            replay_mode,
            daemon_mode,
            initialized: false,
            timestamps: Vec::new(),
            groups: METRIC_GROUPS.iter().map(MetricGroup::new).collect(),
            smoothed_ahi_ratio: None,
            ahi_enabled: true,
            redo_log_size: 0,
            checkpoint_age_sync_flush: 0,
            last_checkpoint_age: 0,
        };
    }

    pub fn group(&self, name: &str) -> Option<&MetricGroup> {
        return self.groups.iter().find(|g| g.decl.name == name);
    }

    fn group_mut(&mut self, name: &str) -> Option<&mut MetricGroup> {
        return self.groups.iter_mut().find(|g| g.decl.name == name);
    }

    pub fn series_values(&self, group: &str, series: &str) -> Option<&[i64]> {
        return self
            .group(group)
            .and_then(|g| g.series(series))
            .map(|s| s.values.as_slice());
    }

    fn applies(&self, group: &MetricGroup) -> bool {
        return group.decl.connection_sources.contains(&self.source);
    }

    fn add_value(initialized: bool, aligned_len: usize, series: &mut MetricSeries, value: i64) {
        if !initialized {
            return;
        }
        if series.decl.save_history {
            // A series may become observable later than the tab (AHI turning
            // active); keep it aligned with the shared timestamps by
            // backfilling zeros.
            while series.values.len() < aligned_len {
                series.values.push(0);
            }
            series.values.push(value);
        } else {
            series.values = vec![value];
        }
    }

    /// One derivation pass. The first call after (re)connect only seeds
    /// per-series last values: no series value and no timestamp is appended,
    /// which is what keeps the buffers aligned.
    pub fn refresh(&mut self, input: &DerivationInput<'_>) {
        self.update_redo_log_size(input);

        if !self.replay_mode {
            self.update_per_second_values(input);
            self.update_replication_lag(input);
            self.update_checkpoint(input);
            self.update_adaptive_hash_index_hit_ratio(input);
            self.update_locks(input);
            self.update_last_values(input);

            if self.initialized {
                if let Some(ts) = input.timestamp {
                    self.timestamps.push(ts);
                }
            }
        } else {
            self.update_checkpoint(input);
        }

        if self.daemon_mode {
            self.prune(Local::now() - Duration::minutes(DAEMON_RETENTION_MINUTES));
        }

        self.initialized = true;
        self.verify_alignment();
    }

    fn update_redo_log_size(&mut self, input: &DerivationInput<'_>) {
        let Some(variables) = input.global_variables else {
            return;
        };
        let get = |name: &str| variables.get(name).and_then(|v| v.as_int());

        let redo_log_capacity = get("innodb_redo_log_capacity").unwrap_or(0);
        let log_file_size = get("innodb_log_file_size").unwrap_or(0);
        let log_files_in_group = get("innodb_log_files_in_group").unwrap_or(1);
        self.redo_log_size = redo_log_capacity.max(log_file_size * log_files_in_group);

        self.ahi_enabled = variables
            .get("innodb_adaptive_hash_index")
            .map(|v| v.as_str() != "OFF")
            .unwrap_or(true);
    }

    fn update_per_second_values(&mut self, input: &DerivationInput<'_>) {
        let initialized = self.initialized;
        let aligned_len = self.timestamps.len();
        let source = self.source;
        let latency = input.polling_latency;

        for group in &mut self.groups {
            if !group.decl.connection_sources.contains(&source) {
                continue;
            }
            if group.decl.source == MetricSource::None {
                continue;
            }
            for series in &mut group.series {
                let current = input.counter(group.decl.source, series.decl.name).unwrap_or(0);
                match series.last_value {
                    DeltaState::Unseeded => {
                        series.last_value = DeltaState::Seeded(current);
                    }
                    DeltaState::Seeded(previous) => {
                        let value = if series.decl.per_second {
                            if latency > 0.0 {
                                ((current - previous) as f64 / latency).round() as i64
                            } else {
                                0
                            }
                        } else {
                            current
                        };
                        Self::add_value(initialized, aligned_len, series, value);
                    }
                }
            }
        }
    }

    /// last-absolute-value updates happen after the whole append pass so the
    /// specialized derivations (AHI) still see the previous cycle's counters.
    fn update_last_values(&mut self, input: &DerivationInput<'_>) {
        let source = self.source;
        for group in &mut self.groups {
            if !group.decl.connection_sources.contains(&source) {
                continue;
            }
            if group.decl.source == MetricSource::None {
                continue;
            }
            for series in &mut group.series {
                if series.decl.per_second {
                    let current = input.counter(group.decl.source, series.decl.name).unwrap_or(0);
                    series.last_value = DeltaState::Seeded(current);
                }
            }
        }
    }

    fn update_replication_lag(&mut self, input: &DerivationInput<'_>) {
        if self.source != ConnectionSource::MySQL {
            return;
        }
        let initialized = self.initialized;
        let aligned_len = self.timestamps.len();
        let lag = input.replication_lag.unwrap_or(0);
        if let Some(series) = self
            .group_mut("replication_lag")
            .and_then(|g| g.series_mut("lag"))
        {
            Self::add_value(initialized, aligned_len, series, lag);
        }
    }

    fn update_checkpoint(&mut self, input: &DerivationInput<'_>) {
        self.last_checkpoint_age = input
            .counter(MetricSource::GlobalStatus, "Innodb_checkpoint_age")
            .unwrap_or(0);
        self.checkpoint_age_sync_flush = (self.redo_log_size as f64 * 0.825).round() as i64;
    }

    fn update_adaptive_hash_index_hit_ratio(&mut self, input: &DerivationInput<'_>) {
        if self.source != ConnectionSource::MySQL {
            return;
        }
        if let Some(raw) = self.compute_ahi_raw_ratio(input) {
            let smoothed = match self.smoothed_ahi_ratio {
                None => raw,
                Some(previous) => {
                    (1.0 - AHI_SMOOTHING_FACTOR) * previous + AHI_SMOOTHING_FACTOR * raw
                }
            };
            self.smoothed_ahi_ratio = Some(smoothed);
        }

        // Once the ratio has been observed it keeps its point every cycle, so
        // the buffer stays aligned with the shared timestamps even through
        // idle stretches.
        let Some(smoothed) = self.smoothed_ahi_ratio else {
            return;
        };
        let initialized = self.initialized;
        let aligned_len = self.timestamps.len();
        if let Some(series) = self
            .group_mut("adaptive_hash_index_hit_ratio")
            .and_then(|g| g.series_mut("hit_ratio"))
        {
            Self::add_value(initialized, aligned_len, series, smoothed.round() as i64);
        }
    }

    fn compute_ahi_raw_ratio(&self, input: &DerivationInput<'_>) -> Option<f64> {
        if !self.ahi_enabled {
            return None;
        }
        let group = self.group("adaptive_hash_index")?;
        let DeltaState::Seeded(previous_hits) = group.series("adaptive_hash_searches")?.last_value
        else {
            return None;
        };
        let DeltaState::Seeded(previous_misses) =
            group.series("adaptive_hash_searches_btree")?.last_value
        else {
            return None;
        };
        if previous_hits == 0 {
            return None;
        }

        let current_hits = input.counter(MetricSource::InnodbMetrics, "adaptive_hash_searches")?;
        let current_misses =
            input.counter(MetricSource::InnodbMetrics, "adaptive_hash_searches_btree")?;

        let hits = current_hits - previous_hits;
        let misses = current_misses - previous_misses;
        let total = hits + misses;
        if total <= 0 {
            return None;
        }
        return Some(hits as f64 / total as f64 * 100.0);
    }

    fn update_locks(&mut self, input: &DerivationInput<'_>) {
        if self.source != ConnectionSource::MySQL {
            return;
        }
        let Some(count) = input.metadata_lock_count else {
            return;
        };
        let initialized = self.initialized;
        let aligned_len = self.timestamps.len();
        if let Some(series) = self
            .group_mut("locks")
            .and_then(|g| g.series_mut("metadata_lock_count"))
        {
            Self::add_value(initialized, aligned_len, series, count as i64);
        }
    }

    /// Checkpoint ratio with its display band; None until a checkpoint age is
    /// known.
    pub fn checkpoint_age_ratio(&self) -> Option<(f64, CheckpointBand)> {
        if self.last_checkpoint_age == 0 || self.redo_log_size == 0 {
            return None;
        }
        let ratio =
            (self.last_checkpoint_age as f64 / self.redo_log_size as f64 * 10000.0).round() / 100.0;
        let band = if ratio >= 80.0 {
            CheckpointBand::Red
        } else if ratio >= 60.0 {
            CheckpointBand::Yellow
        } else {
            CheckpointBand::Green
        };
        return Some((ratio, band));
    }

    pub fn adaptive_hash_index_state(&self) -> AhiState {
        if !self.ahi_enabled {
            return AhiState::Disabled;
        }
        let smoothed = if self.replay_mode {
            self.series_values("adaptive_hash_index_hit_ratio", "hit_ratio")
                .and_then(|values| values.last().copied())
                .map(|v| v as f64)
        } else {
            self.smoothed_ahi_ratio
        };
        match smoothed {
            None => AhiState::Unknown,
            Some(value) if value <= 0.01 => AhiState::Inactive,
            Some(value) => AhiState::Ratio(value),
        }
    }

    pub fn smoothed_ahi_ratio(&self) -> Option<f64> {
        return self.smoothed_ahi_ratio;
    }

    /// After a reconnect the counters restart from the server's view, so every
    /// series re-seeds: the next cycle appends nothing, history is kept.
    pub fn reseed(&mut self) {
        self.initialized = false;
        for group in &mut self.groups {
            for series in &mut group.series {
                series.last_value = DeltaState::Unseeded;
            }
        }
    }

    /// Clears all buffers and switch states; declarations stay.
    pub fn reset(&mut self) {
        self.initialized = false;
        self.timestamps.clear();
        self.smoothed_ahi_ratio = None;
        self.redo_log_size = 0;
        self.checkpoint_age_sync_flush = 0;
        self.last_checkpoint_age = 0;
        for group in &mut self.groups {
            for series in &mut group.series {
                series.values.clear();
                series.last_value = DeltaState::Unseeded;
                series.visible = series.decl.visible;
            }
        }
    }

    pub fn update_switch(&mut self, group_name: &str, series_name: &str, visible: bool) {
        if let Some(series) = self
            .group_mut(group_name)
            .and_then(|g| g.series_mut(series_name))
        {
            series.visible = visible;
        }
    }

    /// Drops points older than the cutoff; every series is sliced by the same
    /// index set as the shared timestamp buffer.
    pub fn prune(&mut self, older_than: DateTime<Local>) {
        let drop_count = self
            .timestamps
            .iter()
            .take_while(|ts| **ts < older_than)
            .count();
        if drop_count == 0 {
            return;
        }

        let aligned_len = self.timestamps.len();
        for group in &mut self.groups {
            for series in &mut group.series {
                if series.decl.save_history && series.values.len() == aligned_len {
                    series.values.drain(..drop_count);
                }
            }
        }
        self.timestamps.drain(..drop_count);
    }

    fn verify_alignment(&mut self) {
        if self.replay_mode {
            // Substituted buffers are authoritative, including files recorded
            // by versions with different append rules.
            return;
        }
        let expected = self.timestamps.len();
        let mut corrupted = false;
        for group in &self.groups {
            if !self.applies(group) {
                continue;
            }
            for series in &group.series {
                if series.decl.save_history
                    && !series.values.is_empty()
                    && series.values.len() != expected
                {
                    log::error!(
                        "Metric series {}.{} length {} diverged from timestamps length {}",
                        group.decl.name,
                        series.decl.name,
                        series.values.len(),
                        expected,
                    );
                    corrupted = true;
                }
            }
        }
        debug_assert!(!corrupted, "metric buffers diverged from timestamps");
        if corrupted {
            self.reset();
        }
    }

    /// Captures the per-series value buffers for the replay recorder.
    pub fn snapshot(&self) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot {
            datetimes: self
                .timestamps
                .iter()
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
                .collect(),
            groups: HashMap::new(),
        };
        for group in &self.groups {
            if !self.applies(group) || !group.decl.use_with_replay {
                continue;
            }
            let mut entry = HashMap::new();
            for series in &group.series {
                if !series.values.is_empty() {
                    entry.insert(series.decl.name.to_string(), series.values.clone());
                }
            }
            if !entry.is_empty() {
                snapshot.groups.insert(group.decl.name.to_string(), entry);
            }
        }
        return snapshot;
    }

    /// Replay substitution: values are assigned wholesale, never re-derived.
    pub fn apply_snapshot(&mut self, snapshot: &MetricSnapshot) {
        self.timestamps = snapshot
            .datetimes
            .iter()
            .filter_map(|text| {
                NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
                    .ok()
                    .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            })
            .collect();

        for (group_name, series_map) in &snapshot.groups {
            let Some(group) = self.group_mut(group_name) else {
                continue;
            };
            for (series_name, values) in series_map {
                if let Some(series) = group.series_mut(series_name) {
                    series.values = values.clone();
                    if let Some(last) = series.values.last() {
                        series.last_value = DeltaState::Seeded(*last);
                    }
                }
            }
        }
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        return self.initialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mysql::ScalarValue;
    use pretty_assertions::assert_eq;

    fn status(pairs: &[(&str, i64)]) -> VariablesMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ScalarValue::Int(*v)))
            .collect()
    }

    fn variables() -> VariablesMap {
        let mut map = VariablesMap::new();
        map.insert(
            "innodb_log_file_size".to_string(),
            ScalarValue::Int(50331648),
        );
        map.insert("innodb_log_files_in_group".to_string(), ScalarValue::Int(2));
        return map;
    }

    fn refresh_status(store: &mut MetricStore, ts: DateTime<Local>, pairs: &[(&str, i64)]) {
        let vars = variables();
        let status_map = status(pairs);
        let input = DerivationInput {
            timestamp: Some(ts),
            polling_latency: 1.0,
            global_variables: Some(&vars),
            global_status: Some(&status_map),
            ..Default::default()
        };
        store.refresh(&input);
    }

    #[test]
    fn test_first_cycle_seeds_only() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        refresh_status(&mut store, Local::now(), &[("Com_select", 100)]);

        assert_eq!(store.timestamps.len(), 0);
        assert_eq!(store.series_values("dml", "Com_select").unwrap().len(), 0);
    }

    #[test]
    fn test_per_second_delta() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        refresh_status(&mut store, ts, &[("Com_select", 100)]);
        refresh_status(&mut store, ts + Duration::seconds(1), &[("Com_select", 250)]);

        assert_eq!(store.series_values("dml", "Com_select").unwrap(), &[150]);
        assert_eq!(store.timestamps.len(), 1);
    }

    #[test]
    fn test_non_per_second_appends_raw() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        refresh_status(&mut store, ts, &[("Threads_running", 5)]);
        refresh_status(&mut store, ts + Duration::seconds(1), &[("Threads_running", 9)]);

        assert_eq!(store.series_values("threads", "Threads_running").unwrap(), &[9]);
    }

    #[test]
    fn test_alignment_invariant_across_cycles() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        for i in 0..5 {
            refresh_status(
                &mut store,
                ts + Duration::seconds(i),
                &[("Com_select", 100 * i), ("Com_insert", 7 * i)],
            );
        }

        let expected = store.timestamps.len();
        assert_eq!(expected, 4);
        for group in &store.groups {
            for series in &group.series {
                if series.decl.save_history && !series.values.is_empty() {
                    assert_eq!(series.values.len(), expected, "{}", series.decl.name);
                }
            }
        }
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        for i in 0..4 {
            refresh_status(&mut store, ts + Duration::seconds(i), &[("Com_select", i)]);
        }
        for pair in store.timestamps.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_save_history_false_keeps_last_value_only() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        for i in 0..4 {
            refresh_status(&mut store, ts + Duration::seconds(i), &[("Com_replace", 10 * i)]);
        }

        assert_eq!(store.series_values("dml", "Com_replace").unwrap(), &[10]);
    }

    #[test]
    fn test_reset_preserves_declarations() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        refresh_status(&mut store, ts, &[("Com_select", 100)]);
        refresh_status(&mut store, ts + Duration::seconds(1), &[("Com_select", 200)]);
        store.update_switch("dml", "Com_select", false);

        store.reset();

        assert_eq!(store.timestamps.len(), 0);
        assert_eq!(store.groups.len(), METRIC_GROUPS.len());
        let series = store.group("dml").unwrap().series("Com_select").unwrap();
        assert_eq!(series.values.len(), 0);
        assert_eq!(series.visible, true);
    }

    #[test]
    fn test_update_switch_does_not_truncate() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        refresh_status(&mut store, ts, &[("Com_select", 100)]);
        refresh_status(&mut store, ts + Duration::seconds(1), &[("Com_select", 200)]);

        store.update_switch("dml", "Com_select", false);

        let series = store.group("dml").unwrap().series("Com_select").unwrap();
        assert_eq!(series.visible, false);
        assert_eq!(series.values.len(), 1);
    }

    #[test]
    fn test_prune_retains_recent_points() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let start = Local::now() - Duration::minutes(60);
        for i in 0..10 {
            refresh_status(
                &mut store,
                start + Duration::minutes(i * 10),
                &[("Com_select", i)],
            );
        }

        let cutoff = start + Duration::minutes(45);
        store.prune(cutoff);

        assert!(store.timestamps.iter().all(|ts| *ts >= cutoff));
        let values = store.series_values("dml", "Com_select").unwrap();
        assert_eq!(values.len(), store.timestamps.len());
    }

    #[test]
    fn test_replication_lag_spike_series() {
        // Seconds_Behind 0,0,0,50,30,10,0 is recorded verbatim; speed math is
        // the replication module's concern.
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        let lags = [0, 0, 0, 50, 30, 10, 0];
        for (i, lag) in lags.iter().enumerate() {
            let vars = variables();
            let status_map = status(&[]);
            let input = DerivationInput {
                timestamp: Some(ts + Duration::seconds(i as i64)),
                polling_latency: 1.0,
                global_variables: Some(&vars),
                global_status: Some(&status_map),
                replication_lag: Some(*lag),
                ..Default::default()
            };
            store.refresh(&input);
        }

        assert_eq!(
            store.series_values("replication_lag", "lag").unwrap(),
            &[0, 0, 50, 30, 10, 0]
        );
    }

    #[test]
    fn test_checkpoint_ratio_bands() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let vars = variables();
        // redo_log_size = 2 * 50331648 = 100663296
        let status_map = status(&[("Innodb_checkpoint_age", 90_000_000)]);
        let input = DerivationInput {
            timestamp: Some(Local::now()),
            polling_latency: 1.0,
            global_variables: Some(&vars),
            global_status: Some(&status_map),
            ..Default::default()
        };
        store.refresh(&input);

        let (ratio, band) = store.checkpoint_age_ratio().unwrap();
        assert!(ratio > 80.0);
        assert_eq!(band, CheckpointBand::Red);
        assert_eq!(store.checkpoint_age_sync_flush, 83047219);
    }

    fn refresh_innodb(store: &mut MetricStore, ts: DateTime<Local>, hits: i64, misses: i64) {
        let vars = variables();
        let status_map = status(&[]);
        let innodb: HashMap<String, i64> = [
            ("adaptive_hash_searches".to_string(), hits),
            ("adaptive_hash_searches_btree".to_string(), misses),
        ]
        .into_iter()
        .collect();
        let input = DerivationInput {
            timestamp: Some(ts),
            polling_latency: 1.0,
            global_variables: Some(&vars),
            global_status: Some(&status_map),
            innodb_metrics: Some(&innodb),
            ..Default::default()
        };
        store.refresh(&input);
    }

    #[test]
    fn test_ahi_smoothing_converges() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();

        // Constant raw ratio of 80%: hits delta 80, misses delta 20.
        let mut hits = 1000;
        let mut misses = 1000;
        refresh_innodb(&mut store, ts, hits, misses);
        for i in 1..=40 {
            hits += 80;
            misses += 20;
            refresh_innodb(&mut store, ts + Duration::seconds(i), hits, misses);
        }

        let smoothed = store.smoothed_ahi_ratio().unwrap();
        assert!((smoothed - 80.0).abs() < 1e-6, "smoothed = {}", smoothed);
        assert_eq!(store.adaptive_hash_index_state(), AhiState::Ratio(smoothed));
    }

    #[test]
    fn test_ahi_undefined_without_activity() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        refresh_innodb(&mut store, ts, 1000, 1000);
        refresh_innodb(&mut store, ts + Duration::seconds(1), 1000, 1000);

        assert_eq!(store.smoothed_ahi_ratio(), None);
        assert_eq!(store.adaptive_hash_index_state(), AhiState::Unknown);
    }

    #[test]
    fn test_ahi_disabled_via_variable() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let mut vars = variables();
        vars.insert(
            "innodb_adaptive_hash_index".to_string(),
            ScalarValue::Text("OFF".to_string()),
        );
        let status_map = status(&[]);
        let input = DerivationInput {
            timestamp: Some(Local::now()),
            polling_latency: 1.0,
            global_variables: Some(&vars),
            global_status: Some(&status_map),
            ..Default::default()
        };
        store.refresh(&input);

        assert_eq!(store.adaptive_hash_index_state(), AhiState::Disabled);
    }

    #[test]
    fn test_late_series_backfills_to_stay_aligned() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();

        // Two idle cycles before the AHI sees traffic.
        refresh_innodb(&mut store, ts, 1000, 1000);
        refresh_innodb(&mut store, ts + Duration::seconds(1), 1000, 1000);
        refresh_innodb(&mut store, ts + Duration::seconds(2), 1000, 1000);
        refresh_innodb(&mut store, ts + Duration::seconds(3), 1080, 1020);

        let values = store
            .series_values("adaptive_hash_index_hit_ratio", "hit_ratio")
            .unwrap();
        assert_eq!(values.len(), store.timestamps.len());
        assert_eq!(values, &[0, 0, 80]);
    }

    #[test]
    fn test_metadata_lock_count_series() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        for (i, count) in [3usize, 5, 2].iter().enumerate() {
            let vars = variables();
            let status_map = status(&[]);
            let input = DerivationInput {
                timestamp: Some(ts + Duration::seconds(i as i64)),
                polling_latency: 1.0,
                global_variables: Some(&vars),
                global_status: Some(&status_map),
                metadata_lock_count: Some(*count),
                ..Default::default()
            };
            store.refresh(&input);
        }

        assert_eq!(
            store.series_values("locks", "metadata_lock_count").unwrap(),
            &[5, 2]
        );
    }

    #[test]
    fn test_snapshot_apply_round_trip() {
        let mut store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let ts = Local::now();
        for i in 0..4 {
            refresh_status(&mut store, ts + Duration::seconds(i), &[("Com_select", 100 * i)]);
        }
        let snapshot = store.snapshot();

        let mut replayed = MetricStore::new(ConnectionSource::MySQL, true, false);
        replayed.apply_snapshot(&snapshot);

        assert_eq!(
            replayed.series_values("dml", "Com_select").unwrap(),
            store.series_values("dml", "Com_select").unwrap()
        );
        assert_eq!(replayed.timestamps.len(), store.timestamps.len());
        assert_eq!(replayed.snapshot(), snapshot);
    }

    #[test]
    fn test_proxysql_store_skips_mysql_groups() {
        let mut store = MetricStore::new(ConnectionSource::ProxySQL, false, false);
        let ts = Local::now();
        refresh_status(&mut store, ts, &[("Com_select", 10), ("Queries", 10)]);
        refresh_status(
            &mut store,
            ts + Duration::seconds(1),
            &[("Com_select", 30), ("Queries", 30)],
        );

        // DML applies to both sources, buffer pool is MySQL only.
        assert_eq!(store.series_values("dml", "Com_select").unwrap(), &[20]);
        assert_eq!(
            store
                .series_values("buffer_pool_requests", "Innodb_buffer_pool_reads")
                .unwrap()
                .len(),
            0
        );
    }
}
