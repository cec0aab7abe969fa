use crate::common::{SparklineBuffer, Stopwatch};
use crate::monitor::capabilities::{ConnectionSource, ServerCapabilities, ServerFeature};
use crate::monitor::changes::{evaluate_read_only, ChangeMonitor, VariableChange};
use crate::monitor::commands::{CommandRequest, CommandWorker};
use crate::monitor::dispatcher::{Action, CommandGuard, DispatchOutcome, Dispatcher};
use crate::monitor::host_cache::HostCache;
use crate::monitor::metrics::{AhiState, CheckpointBand, DerivationInput, MetricStore};
use crate::monitor::mysql::{classify, Database, DbError, Endpoint, RowMap, VariablesMap};
use crate::monitor::options::Config;
use crate::monitor::pfs_metrics::PfsMetrics;
use crate::monitor::processlist::{Thread, ThreadFilter};
use crate::monitor::queries;
use crate::monitor::replay::{
    ReplayBounds, ReplayMeta, ReplayPayload, ReplayReader, ReplayRecorder,
};
use crate::monitor::replication::{AvailableReplica, ReplicaTracker, ReplicationStatus};
use crate::monitor::sampler::{
    ApplierWorker, BinlogStatus, MySqlSample, PanelVisibility, ProxySqlSample, Sampler,
};
use crate::monitor::ui::{
    snapshot_metrics, ConnectionStatus, MetricsSnapshot, Notification, Severity, UiEvent, UiSender,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};

const SPARKLINE_CAPACITY: usize = 120;
const DAEMON_PFS_RESET_MINUTES: i64 = 10;

/// Events processed by a tab's worker loop. At most one sample cycle is in
/// flight because the loop handles events serially.
#[derive(Clone, Debug)]
pub enum TabEvent {
    Sample,
    RefreshReplicas,
    ReplayStep { manual: bool },
    ReplayRewind,
    ReplaySeek(String),
    ForceRefresh,
    Pause,
    Resume,
    TogglePanel(String),
    UpdateSwitch { group: String, series: String, visible: bool },
    SetFilter(ThreadFilter),
    ClearFilters,
    ToggleIdleThreads,
    ToggleTrxsOnly,
    Disconnect,
    Stop,
}

/// Scrub-bar position during replay.
#[derive(Clone, Debug)]
pub struct ReplayPosition {
    pub current_id: i64,
    pub bounds: ReplayBounds,
}

/// Everything a tab knows, mutated only by its worker loop and read by the UI
/// thread under one coarse lock.
pub struct TabState {
    pub tab_id: u64,
    pub name: String,
    pub connection_status: ConnectionStatus,
    pub caps: Option<ServerCapabilities>,
    pub endpoint_display: String,

    pub metrics: MetricStore,
    pub visibility: PanelVisibility,
    pub filter: ThreadFilter,
    pub threads: Vec<Thread>,
    pub show_ticketed_only: bool,
    pub sort_by_time_descending: bool,

    pub global_variables: VariablesMap,
    pub global_status: VariablesMap,
    pub uptime: i64,
    pub replication_status: Option<ReplicationStatus>,
    pub binlog_status: BinlogStatus,
    pub replica_summaries: Vec<(String, Vec<(String, String)>)>,
    pub group_replication_members: Vec<RowMap>,
    pub group_replication_write_concurrency: Option<i64>,
    pub is_group_replication_primary: bool,
    pub metadata_locks: Vec<RowMap>,
    pub ddl: Vec<RowMap>,
    pub appliers: Vec<ApplierWorker>,

    pub file_io: Option<PfsMetrics>,
    pub table_io: Option<PfsMetrics>,
    pub statements: Option<PfsMetrics>,
    pub pfs_last_reset: DateTime<Local>,

    pub sparkline: SparklineBuffer,
    pub paused: bool,
    pub polling_latency: f64,
    pub replay: Option<ReplayPosition>,
}

impl TabState {
    fn new(tab_id: u64, name: String, endpoint: &Endpoint, config: &Config) -> Self {
        return Self {
            tab_id,
            name,
            connection_status: ConnectionStatus::Disconnected,
            caps: None,
            endpoint_display: endpoint.address(),
            metrics: MetricStore::new(
                ConnectionSource::MySQL,
                config.replay.file.is_some(),
                config.replay.daemon_mode,
            ),
            visibility: PanelVisibility::from_names(&config.startup_panels),
            filter: ThreadFilter::default(),
            threads: Vec::new(),
            show_ticketed_only: false,
            sort_by_time_descending: true,
            global_variables: VariablesMap::new(),
            global_status: VariablesMap::new(),
            uptime: 0,
            replication_status: None,
            binlog_status: BinlogStatus::default(),
            replica_summaries: Vec::new(),
            group_replication_members: Vec::new(),
            group_replication_write_concurrency: None,
            is_group_replication_primary: false,
            metadata_locks: Vec::new(),
            ddl: Vec::new(),
            appliers: Vec::new(),
            file_io: None,
            table_io: None,
            statements: None,
            pfs_last_reset: Local::now(),
            sparkline: SparklineBuffer::new(SPARKLINE_CAPACITY),
            paused: false,
            polling_latency: 0.0,
            replay: None,
        };
    }

    /// Processlist after display filters, sorted for rendering.
    pub fn filtered_threads(&self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self
            .threads
            .iter()
            .filter(|thread| self.filter.matches(thread))
            .filter(|thread| {
                if !self.show_ticketed_only {
                    return true;
                }
                match thread {
                    Thread::MySQL(t) => t.trx_concurrency_tickets > 0,
                    Thread::ProxySQL(_) => false,
                }
            })
            .cloned()
            .collect();
        if self.sort_by_time_descending {
            threads.sort_by_key(|t| std::cmp::Reverse(t.time()));
        } else {
            threads.sort_by_key(|t| t.time());
        }
        return threads;
    }
}

/// Consistent copy of a tab handed across the UI contract.
pub struct TabSnapshot {
    pub tab_id: u64,
    pub name: String,
    pub connection_status: ConnectionStatus,
    pub server_version: Option<String>,
    pub endpoint_display: String,
    pub metrics: MetricsSnapshot,
    pub threads: Vec<Thread>,
    pub replication_status: Option<ReplicationStatus>,
    pub binlog_status: BinlogStatus,
    pub replica_summaries: Vec<(String, Vec<(String, String)>)>,
    pub group_replication_members: Vec<RowMap>,
    pub metadata_locks: Vec<RowMap>,
    pub ddl: Vec<RowMap>,
    pub appliers: Vec<ApplierWorker>,
    pub uptime: i64,
    pub sparkline: String,
    pub checkpoint: Option<(f64, CheckpointBand)>,
    pub adaptive_hash_index: AhiState,
    pub replay: Option<ReplayPosition>,
}

struct WorkerSettings {
    tab_id: u64,
    endpoint: Endpoint,
    config: Config,
    app_version: String,
}

/// Owns one monitored endpoint: the worker thread with its event loop, the
/// background command worker, and the shared tab state.
pub struct TabRuntime {
    pub id: u64,
    pub name: String,
    state: Arc<Mutex<TabState>>,
    events: mpsc::UnboundedSender<TabEvent>,
    shutdown: watch::Sender<bool>,
    commands: CommandWorker,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for TabRuntime {
    fn drop(&mut self) {
        // Cancel in-flight I/O first, then let the loop drain.
        let _ = self.shutdown.send(true);
        let _ = self.events.send(TabEvent::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl TabRuntime {
    pub fn start(
        id: u64,
        name: String,
        endpoint: Endpoint,
        config: Config,
        ui: UiSender,
        host_cache: Arc<HostCache>,
    ) -> Self {
        let state = Arc::new(Mutex::new(TabState::new(id, name.clone(), &endpoint, &config)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let commands = CommandWorker::start(id, endpoint.clone(), shutdown_rx.clone(), ui.clone());

        let settings = WorkerSettings {
            tab_id: id,
            endpoint,
            config,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let worker_state = state.clone();
        let worker_events = events_tx.clone();
        let thread = std::thread::spawn(move || {
            run_tab(
                settings,
                worker_state,
                ui,
                host_cache,
                worker_events,
                events_rx,
                shutdown_rx,
            );
        });

        return Self {
            id,
            name,
            state,
            events: events_tx,
            shutdown: shutdown_tx,
            commands,
            thread: Some(thread),
        };
    }

    pub fn send(&self, event: TabEvent) {
        let _ = self.events.send(event);
    }

    pub fn send_command(&self, request: CommandRequest) {
        self.commands.send(request);
    }

    pub fn secondary_busy(&self) -> bool {
        return self.commands.is_busy();
    }

    pub fn is_replay(&self) -> bool {
        return self.state.lock().unwrap().replay.is_some();
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        return self.state.lock().unwrap().connection_status;
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut TabState) -> T) -> T {
        return f(&mut self.state.lock().unwrap());
    }

    pub fn snapshot(&self) -> TabSnapshot {
        let state = self.state.lock().unwrap();
        return TabSnapshot {
            tab_id: state.tab_id,
            name: state.name.clone(),
            connection_status: state.connection_status,
            server_version: state.caps.as_ref().map(|caps| caps.display_version()),
            endpoint_display: state.endpoint_display.clone(),
            metrics: snapshot_metrics(&state.metrics),
            threads: state.filtered_threads(),
            replication_status: state.replication_status.clone(),
            binlog_status: state.binlog_status.clone(),
            replica_summaries: state.replica_summaries.clone(),
            group_replication_members: state.group_replication_members.clone(),
            metadata_locks: state.metadata_locks.clone(),
            ddl: state.ddl.clone(),
            appliers: state.appliers.clone(),
            uptime: state.uptime,
            sparkline: state.sparkline.render(SPARKLINE_CAPACITY),
            checkpoint: state.metrics.checkpoint_age_ratio(),
            adaptive_hash_index: state.metrics.adaptive_hash_index_state(),
            replay: state.replay.clone(),
        };
    }
}

/// Appends a newly connected host to the host setup file when it's not there,
/// so the setup modal learns it.
fn append_host_setup(path: &Path, endpoint: &Endpoint) -> Result<()> {
    let entry = if endpoint.port != 3306 {
        format!("{}:{}", endpoint.host, endpoint.port)
    } else {
        endpoint.host.clone()
    };

    let existing = std::fs::read_to_string(path).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&entry);
    content.push('\n');
    std::fs::write(path, content)?;
    return Ok(());
}

struct TabWorker {
    settings: WorkerSettings,
    state: Arc<Mutex<TabState>>,
    ui: UiSender,
    host_cache: Arc<HostCache>,
    events: mpsc::UnboundedSender<TabEvent>,
    shutdown: watch::Receiver<bool>,

    main_db: Database,
    sampler: Sampler,
    tracker: ReplicaTracker,
    change_monitor: ChangeMonitor,
    recorder: Option<ReplayRecorder>,
    reader: Option<ReplayReader>,

    caps: Option<ServerCapabilities>,
    available_replicas: Vec<AvailableReplica>,
    previous_cycle_start: Option<Instant>,
    sample_timer: Option<tokio::task::JoinHandle<()>>,
    replica_timer: Option<tokio::task::JoinHandle<()>>,
    paused: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn run_tab(
    settings: WorkerSettings,
    state: Arc<Mutex<TabState>>,
    ui: UiSender,
    host_cache: Arc<HostCache>,
    events: mpsc::UnboundedSender<TabEvent>,
    mut events_rx: mpsc::UnboundedReceiver<TabEvent>,
    shutdown: watch::Receiver<bool>,
) {
    let mut sampler = Sampler::new();
    sampler.show_trxs_only = settings.config.show_trxs_only;
    sampler.heartbeat_table = settings.config.heartbeat_table.clone();
    sampler.daemon_mode = settings.config.replay.daemon_mode;

    let mut worker = TabWorker {
        main_db: Database::new(settings.endpoint.clone(), shutdown.clone()),
        tracker: ReplicaTracker::new(settings.endpoint.clone(), shutdown.clone()),
        change_monitor: ChangeMonitor::new(&settings.config.exclude_notify_vars),
        sampler,
        recorder: None,
        reader: None,
        caps: None,
        available_replicas: Vec::new(),
        previous_cycle_start: None,
        sample_timer: None,
        replica_timer: None,
        paused: false,
        settings,
        state,
        ui,
        host_cache,
        events,
        shutdown,
    };

    if let Some(replay_file) = worker.settings.config.replay.file.clone() {
        match worker.open_replay(&replay_file) {
            Ok(()) => worker.enqueue(TabEvent::ReplayStep { manual: false }),
            Err(error) => {
                worker.notify(Severity::Error, "Replay", &error.to_string());
                return;
            }
        }
    } else {
        worker.enqueue(TabEvent::Sample);
    }

    while let Some(event) = events_rx.recv().await {
        match event {
            TabEvent::Stop => break,
            TabEvent::Sample => worker.handle_sample().await,
            TabEvent::RefreshReplicas => worker.handle_replicas().await,
            TabEvent::ReplayStep { manual } => worker.handle_replay_step(manual),
            TabEvent::ReplayRewind => {
                if let Some(reader) = &mut worker.reader {
                    reader.rewind_one();
                }
                worker.handle_replay_step(true);
            }
            TabEvent::ReplaySeek(timestamp) => worker.handle_replay_seek(&timestamp),
            TabEvent::ForceRefresh => {
                worker.cancel_timer();
                if worker.reader.is_some() {
                    worker.enqueue(TabEvent::ReplayStep { manual: true });
                } else {
                    worker.enqueue(TabEvent::Sample);
                }
            }
            TabEvent::Pause => {
                worker.paused = true;
                worker.cancel_timer();
                worker.state.lock().unwrap().paused = true;
            }
            TabEvent::Resume => {
                worker.paused = false;
                worker.state.lock().unwrap().paused = false;
                if worker.reader.is_some() {
                    worker.enqueue(TabEvent::ReplayStep { manual: false });
                } else {
                    worker.enqueue(TabEvent::Sample);
                }
            }
            TabEvent::TogglePanel(panel) => worker.handle_toggle_panel(&panel),
            TabEvent::UpdateSwitch { group, series, visible } => {
                worker
                    .state
                    .lock()
                    .unwrap()
                    .metrics
                    .update_switch(&group, &series, visible);
            }
            TabEvent::SetFilter(filter) => {
                worker.state.lock().unwrap().filter = filter;
            }
            TabEvent::ClearFilters => {
                worker.state.lock().unwrap().filter = ThreadFilter::default();
            }
            TabEvent::ToggleIdleThreads => {
                worker.sampler.show_idle_threads = !worker.sampler.show_idle_threads;
            }
            TabEvent::ToggleTrxsOnly => {
                worker.sampler.show_trxs_only = !worker.sampler.show_trxs_only;
            }
            TabEvent::Disconnect => worker.handle_disconnect().await,
        }
    }

    worker.cancel_timer();
    worker.cancel_replica_timer();
    worker.tracker.remove_all();
    worker.main_db.disconnect().await;
    log::debug!("Tab {} worker stopped", worker.settings.tab_id);
}

impl TabWorker {
    fn enqueue(&self, event: TabEvent) {
        let _ = self.events.send(event);
    }

    fn notify(&self, severity: Severity, title: &str, message: &str) {
        match severity {
            Severity::Info => log::info!("{}: {}", title, message),
            Severity::Warning => log::warn!("{}: {}", title, message),
            Severity::Error => log::error!("{}: {}", title, message),
        }
        let _ = self.ui.send(UiEvent::Notify {
            tab_id: self.settings.tab_id,
            notification: Notification {
                title: title.to_string(),
                message: message.to_string(),
                severity,
            },
        });
    }

    fn set_connection_status(&self, status: ConnectionStatus) {
        self.state.lock().unwrap().connection_status = status;
        let _ = self.ui.send(UiEvent::ConnectionStatusChanged {
            tab_id: self.settings.tab_id,
            status,
        });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.sample_timer.take() {
            timer.abort();
        }
    }

    fn cancel_replica_timer(&mut self) {
        if let Some(timer) = self.replica_timer.take() {
            timer.abort();
        }
    }

    /// Single-shot re-arm; the next cycle is enqueued when the timer fires.
    fn arm_timer(&mut self, event: TabEvent) {
        self.cancel_timer();
        let delay = self.settings.config.refresh_interval;
        let events = self.events.clone();
        self.sample_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        }));
    }

    fn arm_replica_timer(&mut self) {
        self.cancel_replica_timer();
        let delay = self.settings.config.refresh_interval;
        let events = self.events.clone();
        self.replica_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TabEvent::RefreshReplicas);
        }));
    }

    fn open_replay(&mut self, path: &Path) -> Result<()> {
        let reader = ReplayReader::open(path)?;
        let meta = reader.meta().clone();

        let source = if meta.connection_source == ConnectionSource::ProxySQL.to_string() {
            ConnectionSource::ProxySQL
        } else {
            ConnectionSource::MySQL
        };

        let mut state = self.state.lock().unwrap();
        state.endpoint_display = format!("{}:{}", meta.host, meta.port);
        state.metrics = MetricStore::new(source, true, false);
        state.replay = Some(ReplayPosition {
            current_id: 0,
            bounds: reader.bounds()?.unwrap_or(ReplayBounds {
                min_id: 0,
                max_id: 0,
                min_timestamp: String::new(),
                max_timestamp: String::new(),
            }),
        });
        drop(state);

        self.reader = Some(reader);
        return Ok(());
    }

    async fn handle_disconnect(&mut self) {
        self.cancel_timer();
        self.cancel_replica_timer();
        self.tracker.remove_all();
        self.main_db.disconnect().await;
        self.caps = None;
        {
            let mut state = self.state.lock().unwrap();
            state.replica_summaries.clear();
            state.paused = false;
        }
        self.set_connection_status(ConnectionStatus::Disconnected);
    }

    fn handle_toggle_panel(&mut self, panel: &str) {
        let now_visible = self.state.lock().unwrap().visibility.toggle(panel);
        if panel == "replication" {
            if now_visible {
                self.enqueue(TabEvent::RefreshReplicas);
            } else {
                // Hidden panel: every replica connection is torn down.
                self.cancel_replica_timer();
                self.tracker.remove_all();
                self.state.lock().unwrap().replica_summaries.clear();
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        self.set_connection_status(ConnectionStatus::Connecting);
        self.main_db.connect().await?;

        let variables = self
            .main_db
            .fetch_name_value_map(queries::mysql::VARIABLES)
            .await?;

        let mut caps = if variables.contains_key("admin-version") {
            ServerCapabilities::from_proxysql_variables(&variables)
        } else {
            ServerCapabilities::from_mysql_variables(&variables)
        };

        if caps.source == ConnectionSource::MySQL {
            self.detect_cluster_type(&mut caps).await;
        }

        log::info!(
            "Connected to {} ({})",
            self.settings.endpoint.address(),
            caps.display_version()
        );

        if let Err(error) =
            append_host_setup(&self.settings.config.host_setup_file, &self.settings.endpoint)
        {
            log::warn!("Cannot update host setup file: {}", error);
        }

        let reconnect = self
            .caps
            .as_ref()
            .map(|previous| previous.source == caps.source)
            .unwrap_or(false);

        {
            let mut state = self.state.lock().unwrap();
            if reconnect {
                state.metrics.reseed();
            } else {
                state.metrics = MetricStore::new(
                    caps.source,
                    false,
                    self.settings.config.replay.daemon_mode,
                );
            }
            state.caps = Some(caps.clone());
        }
        self.sampler.reset();
        self.caps = Some(caps);
        self.set_connection_status(ConnectionStatus::Connected);
        return Ok(());
    }

    /// InnoDB Cluster / ReplicaSet metadata probe; absence of the metadata
    /// schema is normal and ignored.
    async fn detect_cluster_type(&mut self, caps: &mut ServerCapabilities) {
        let query = if caps.has(ServerFeature::ClusterMetadataInstanceType) {
            queries::mysql::DETERMINE_CLUSTER_TYPE_81
        } else {
            queries::mysql::DETERMINE_CLUSTER_TYPE_8
        };
        let Ok(Some(row)) = self.main_db.query_first(query).await else {
            return;
        };

        let cluster_type = row.get("cluster_type").map(|v| v.display()).unwrap_or_default();
        let instance_type = row.get("instance_type").map(|v| v.display()).unwrap_or_default();
        match cluster_type.as_str() {
            "ar" => caps.replicaset = true,
            "gr" => {
                if instance_type == "read-replica" {
                    caps.innodb_cluster_read_replica = true;
                } else {
                    caps.innodb_cluster = true;
                }
            }
            _ => {}
        }
    }

    async fn handle_sample(&mut self) {
        if self.reader.is_some() {
            return;
        }

        if !self.main_db.is_connected() {
            match self.connect().await {
                Ok(()) => {}
                Err(error) => {
                    if matches!(classify(&error), Some(DbError::Cancelled)) {
                        return;
                    }
                    // Connect failures surface the tab setup modal; sampling
                    // resumes when the user retries.
                    self.set_connection_status(ConnectionStatus::Disconnected);
                    let _ = self.ui.send(UiEvent::SetupRequired {
                        tab_id: self.settings.tab_id,
                        error: error.to_string(),
                    });
                    return;
                }
            }
        }

        let cycle_start = Instant::now();
        let polling_latency = self
            .previous_cycle_start
            .map(|previous| cycle_start.duration_since(previous).as_secs_f64())
            .unwrap_or_else(|| self.settings.config.refresh_interval.as_secs_f64());
        self.previous_cycle_start = Some(cycle_start);
        self.sampler.polling_latency = polling_latency;

        let Some(caps) = self.caps.clone() else {
            return;
        };
        let visibility = self.state.lock().unwrap().visibility.clone();
        let stopwatch = Stopwatch::start_new();

        let outcome = match caps.source {
            ConnectionSource::MySQL => {
                match self.sampler.poll_mysql(&mut self.main_db, &caps, &visibility).await {
                    Ok(sample) => {
                        self.apply_mysql_sample(sample, &caps, polling_latency).await;
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            }
            ConnectionSource::ProxySQL => {
                match self.sampler.poll_proxysql(&mut self.main_db, &visibility).await {
                    Ok(sample) => {
                        self.apply_proxysql_sample(sample, polling_latency);
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            }
        };

        match outcome {
            Ok(()) => {
                log::trace!(
                    "Tab {} sample cycle took {} ms",
                    self.settings.tab_id,
                    stopwatch.elapsed_ms()
                );
                let _ = self.ui.send(UiEvent::Refreshed {
                    tab_id: self.settings.tab_id,
                });
                if !self.paused {
                    self.arm_timer(TabEvent::Sample);
                }
            }
            Err(error) => {
                if matches!(classify(&error), Some(DbError::Cancelled)) {
                    return;
                }
                // Transient failure: abort the cycle, reconnect on next tick.
                self.notify(
                    Severity::Warning,
                    "Connection lost",
                    &format!("{}; reconnecting", error),
                );
                self.main_db.disconnect().await;
                self.set_connection_status(ConnectionStatus::Disconnected);
                if !self.paused {
                    self.arm_timer(TabEvent::Sample);
                }
            }
        }
    }

    async fn apply_mysql_sample(
        &mut self,
        sample: MySqlSample,
        caps: &ServerCapabilities,
        polling_latency: f64,
    ) {
        // The uuid->port map refresh runs on the main handle, before the
        // replica flow opens any new connections.
        if self.state.lock().unwrap().visibility.is_visible("replication")
            && !self.settings.config.replay.daemon_mode
            && self.tracker.needs_port_refresh(&sample.available_replicas)
        {
            if let Err(error) = self.tracker.refresh_ports(&mut self.main_db, caps).await {
                log::warn!("Cannot refresh replica ports: {}", error);
            }
        }
        self.available_replicas = sample.available_replicas.clone();

        let timestamp = Local::now();
        let changes: Vec<VariableChange>;
        let payload;
        {
            let mut state = self.state.lock().unwrap();

            changes = self
                .change_monitor
                .diff_variables(&state.global_variables, &sample.global_variables);

            let old_uptime = state.uptime;
            let new_uptime = sample
                .global_status
                .get("Uptime")
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            if crate::monitor::changes::uptime_regressed(old_uptime, new_uptime) {
                self.notify_locked(
                    Severity::Warning,
                    "Server restarted",
                    &format!("Uptime went from {}s to {}s", old_uptime, new_uptime),
                );
                if let Some(file_io) = &mut state.file_io {
                    file_io.reset(true);
                }
                if let Some(table_io) = &mut state.table_io {
                    table_io.reset(true);
                }
                if let Some(statements) = &mut state.statements {
                    statements.reset(true);
                }
                state.pfs_last_reset = Local::now();
            }

            // Daemon mode keeps a ten-minute point-in-time window for the
            // performance-schema deltas.
            if self.settings.config.replay.daemon_mode
                && Local::now() - state.pfs_last_reset
                    >= ChronoDuration::minutes(DAEMON_PFS_RESET_MINUTES)
            {
                if let Some(file_io) = &mut state.file_io {
                    file_io.reset(false);
                }
                if let Some(table_io) = &mut state.table_io {
                    table_io.reset(false);
                }
                if let Some(statements) = &mut state.statements {
                    statements.reset(false);
                }
                state.pfs_last_reset = Local::now();
            }

            if !sample.file_io_rows.is_empty() {
                match &mut state.file_io {
                    Some(tracker) => tracker.update(&sample.file_io_rows),
                    None => state.file_io = Some(PfsMetrics::new("FILE_NAME", &sample.file_io_rows)),
                }
            }
            if !sample.table_io_rows.is_empty() {
                match &mut state.table_io {
                    Some(tracker) => tracker.update(&sample.table_io_rows),
                    None => {
                        state.table_io = Some(PfsMetrics::new("OBJECT_TABLE", &sample.table_io_rows))
                    }
                }
            }
            if !sample.statements_rows.is_empty() {
                match &mut state.statements {
                    Some(tracker) => tracker.update(&sample.statements_rows),
                    None => {
                        state.statements = Some(PfsMetrics::new("digest", &sample.statements_rows))
                    }
                }
            }

            state.is_group_replication_primary = sample
                .group_replication_members
                .iter()
                .any(|member| {
                    member.get("MEMBER_ID").map(|v| v.display()) == caps.server_id
                        && member.get("MEMBER_ROLE").map(|v| v.display()).as_deref()
                            == Some("PRIMARY")
                });

            state.uptime = new_uptime;
            state.global_variables = sample.global_variables.clone();
            state.global_status = sample.global_status.clone();
            state.replication_status = sample.replication_status.clone();
            state.binlog_status = sample.binlog_status.clone();
            state.metadata_locks = sample.metadata_locks.clone();
            state.ddl = sample.ddl.clone();
            state.appliers = sample.replication_appliers.clone();
            state.group_replication_members = sample.group_replication_members.clone();
            state.group_replication_write_concurrency = sample.group_replication_write_concurrency;
            state.threads = sample
                .processlist
                .iter()
                .cloned()
                .map(Thread::MySQL)
                .collect();
            state.polling_latency = polling_latency;

            let input = DerivationInput {
                timestamp: Some(timestamp),
                polling_latency,
                global_variables: Some(&sample.global_variables),
                global_status: Some(&sample.global_status),
                innodb_metrics: Some(&sample.innodb_metrics),
                disk_io_metrics: Some(&sample.disk_io_metrics),
                metadata_lock_count: Some(sample.metadata_locks.len()),
                replication_lag: sample
                    .replication_status
                    .as_ref()
                    .and_then(|status| status.seconds_behind),
                ..Default::default()
            };
            state.metrics.refresh(&input);

            if let Some(values) = state.metrics.series_values("dml", "Queries") {
                let values = values.to_vec();
                state.sparkline.replace(&values);
            }

            self.evaluate_read_only_locked(&mut state, caps, &sample.global_variables);

            payload = self.build_mysql_payload(&state, &sample);
        }

        self.record_cycle(timestamp, &payload, &changes);
        self.notify_variable_changes(&changes);
    }

    fn apply_proxysql_sample(&mut self, sample: ProxySqlSample, polling_latency: f64) {
        let timestamp = Local::now();
        let changes;
        let payload;
        {
            let mut state = self.state.lock().unwrap();

            changes = self
                .change_monitor
                .diff_variables(&state.global_variables, &sample.global_variables);

            let old_uptime = state.uptime;
            let new_uptime = sample
                .global_status
                .get("ProxySQL_Uptime")
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            if crate::monitor::changes::uptime_regressed(old_uptime, new_uptime) {
                self.notify_locked(
                    Severity::Warning,
                    "Server restarted",
                    &format!("Uptime went from {}s to {}s", old_uptime, new_uptime),
                );
            }
            state.uptime = new_uptime;

            state.global_variables = sample.global_variables.clone();
            state.global_status = sample.global_status.clone();
            state.threads = sample
                .processlist
                .iter()
                .cloned()
                .map(Thread::ProxySQL)
                .collect();
            state.polling_latency = polling_latency;

            let input = DerivationInput {
                timestamp: Some(timestamp),
                polling_latency,
                global_variables: Some(&sample.global_variables),
                global_status: Some(&sample.global_status),
                proxysql_select_command_stats: Some(&sample.select_command_stats),
                proxysql_total_command_stats: Some(&sample.total_command_stats),
                ..Default::default()
            };
            state.metrics.refresh(&input);

            if let Some(values) = state.metrics.series_values("dml", "Queries") {
                let values = values.to_vec();
                state.sparkline.replace(&values);
            }

            payload = ReplayPayload {
                global_status: sample.global_status.clone(),
                global_variables: sample.global_variables.clone(),
                processlist: state.threads.clone(),
                metrics: state.metrics.snapshot(),
                command_stats: sample.command_stats.clone(),
                hostgroup_summary: sample.hostgroup_summary.clone(),
                ..Default::default()
            };
        }

        self.record_cycle(timestamp, &payload, &changes);
        self.notify_variable_changes(&changes);
    }

    /// Read-only classification; drives the badge, notifies on real flips.
    fn evaluate_read_only_locked(
        &self,
        state: &mut TabState,
        caps: &ServerCapabilities,
        variables: &VariablesMap,
    ) {
        let read_only = variables
            .get("read_only")
            .map(|v| v.as_str() == "ON")
            .unwrap_or(false);
        let group_replication = caps.group_replication || caps.innodb_cluster;
        let previous = state.connection_status;

        let Some(transition) = evaluate_read_only(
            read_only,
            previous,
            state.replication_status.is_some(),
            group_replication,
            state.is_group_replication_primary,
        ) else {
            return;
        };

        if matches!(previous, ConnectionStatus::ReadWrite | ConnectionStatus::ReadOnly) {
            let mut message = format!(
                "Host {} is now {}",
                state.endpoint_display, transition.status
            );
            if transition.suspicious {
                message.push_str(" (SHOULD BE READ/WRITE?)");
            }
            self.notify_locked(Severity::Warning, "Read-only mode change", &message);
        }
        state.connection_status = transition.status;
        let _ = self.ui.send(UiEvent::ConnectionStatusChanged {
            tab_id: self.settings.tab_id,
            status: transition.status,
        });
    }

    /// notify() without re-locking state; used while the tab lock is held.
    fn notify_locked(&self, severity: Severity, title: &str, message: &str) {
        match severity {
            Severity::Info => log::info!("{}: {}", title, message),
            Severity::Warning => log::warn!("{}: {}", title, message),
            Severity::Error => log::error!("{}: {}", title, message),
        }
        let _ = self.ui.send(UiEvent::Notify {
            tab_id: self.settings.tab_id,
            notification: Notification {
                title: title.to_string(),
                message: message.to_string(),
                severity,
            },
        });
    }

    fn build_mysql_payload(&self, state: &TabState, sample: &MySqlSample) -> ReplayPayload {
        return ReplayPayload {
            global_status: sample.global_status.clone(),
            global_variables: sample.global_variables.clone(),
            processlist: state.threads.clone(),
            metrics: state.metrics.snapshot(),
            binlog_status: Some(sample.binlog_status.clone()),
            innodb_metrics: sample.innodb_metrics.clone(),
            metadata_locks: sample.metadata_locks.clone(),
            replication_status: sample.replication_status.clone(),
            available_replicas: sample.available_replicas.clone(),
            group_replication_members: sample.group_replication_members.clone(),
            ..Default::default()
        };
    }

    fn record_cycle(
        &mut self,
        timestamp: DateTime<Local>,
        payload: &ReplayPayload,
        changes: &[VariableChange],
    ) {
        if !self.settings.config.replay.record {
            return;
        }

        if self.recorder.is_none() {
            match self.create_recorder() {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(error) => {
                    self.notify(Severity::Error, "Replay recording", &error.to_string());
                    // Don't retry every cycle.
                    self.settings.config.replay.record = false;
                    return;
                }
            }
        }

        let Some(recorder) = &mut self.recorder else {
            return;
        };
        match recorder.record(timestamp, payload) {
            Ok(replay_id) => {
                for change in changes {
                    if let Err(error) =
                        recorder.record_variable_change(replay_id, timestamp, change)
                    {
                        log::warn!("Cannot record variable change: {}", error);
                    }
                }
            }
            Err(error) => log::error!("Cannot record replay data: {}", error),
        }
    }

    fn create_recorder(&self) -> Result<ReplayRecorder> {
        let caps = self
            .caps
            .as_ref()
            .context("Recorder needs a connected host")?;
        let endpoint = &self.settings.endpoint;

        let directory = self
            .settings
            .config
            .replay
            .dir
            .join(format!("{}_{}", endpoint.host, endpoint.port));
        let file = if self.settings.config.replay.daemon_mode {
            directory.join("daemon.db")
        } else {
            directory.join(format!("{}.db", Local::now().format("%Y_%m_%d_%H_%M_%S")))
        };

        let meta = ReplayMeta {
            schema_version: crate::monitor::replay::SCHEMA_VERSION,
            host: endpoint.host.clone(),
            port: endpoint.port,
            host_distro: caps.distro.clone(),
            connection_source: caps.source.to_string(),
            app_version: self.settings.app_version.clone(),
        };
        let recorder = ReplayRecorder::open(
            &file,
            &meta,
            self.settings.config.replay.daemon_mode,
            self.settings.config.replay.retention_hours,
        )?;
        self.notify(
            Severity::Info,
            "Recording data",
            &format!("File: {}", file.display()),
        );
        return Ok(recorder);
    }

    fn notify_variable_changes(&mut self, changes: &[VariableChange]) {
        for change in changes {
            // read_only has its own notification path.
            if change.name == "read_only" {
                continue;
            }
            self.notify(
                Severity::Warning,
                "Global Variable Change",
                &format!(
                    "{}\nOld Value: {}\nNew Value: {}",
                    change.name, change.old_value, change.new_value
                ),
            );
        }
    }

    /// The replica flow: only runs while the replication panel is shown, with
    /// its own connections and its own timer chain.
    async fn handle_replicas(&mut self) {
        if self.reader.is_some() {
            return;
        }
        let visible = self.state.lock().unwrap().visibility.is_visible("replication");
        if !visible {
            self.tracker.remove_all();
            self.state.lock().unwrap().replica_summaries.clear();
            return;
        }

        let Some(caps) = self.caps.clone() else {
            self.arm_replica_timer();
            return;
        };
        if caps.source != ConnectionSource::MySQL {
            return;
        }

        let gtid_executed = self
            .state
            .lock()
            .unwrap()
            .global_variables
            .get("gtid_executed")
            .map(|v| v.display());
        let available = self.available_replicas.clone();
        let heartbeat = self.settings.config.heartbeat_table.clone();
        let latency = self.sampler.polling_latency;

        if let Err(error) = self
            .tracker
            .refresh(
                &available,
                &caps,
                gtid_executed.as_deref(),
                heartbeat.as_deref(),
                latency,
                &self.host_cache,
            )
            .await
        {
            log::warn!("Replica refresh failed: {}", error);
        }

        let summaries: Vec<(String, Vec<(String, String)>)> = self
            .tracker
            .replicas()
            .map(|replica| (replica.row_key.clone(), replica.summary.clone()))
            .collect();
        self.state.lock().unwrap().replica_summaries = summaries;

        if !self.paused {
            self.arm_replica_timer();
        }
    }

    fn handle_replay_step(&mut self, manual: bool) {
        let step = {
            let Some(reader) = self.reader.as_mut() else {
                return;
            };
            let bounds = reader.bounds().ok().flatten();
            match reader.next() {
                Ok(Some(entry)) => {
                    let changes = reader.variable_changes_for(entry.id).unwrap_or_default();
                    Ok(Some((entry, bounds, changes)))
                }
                Ok(None) => Ok(None),
                Err(error) => Err(error),
            }
        };

        let (entry, bounds, changes) = match step {
            Ok(Some(step)) => step,
            Ok(None) => {
                if !manual {
                    self.notify(Severity::Info, "Replay", "Reached the end of the replay file");
                }
                return;
            }
            Err(error) => {
                self.notify(Severity::Error, "Replay", &error.to_string());
                return;
            }
        };
        let replay_id = entry.id;

        {
            let mut state = self.state.lock().unwrap();
            let payload = entry.payload;

            state.global_status = payload.global_status;
            state.global_variables = payload.global_variables;
            state.threads = payload.processlist;
            state.replication_status = payload.replication_status;
            state.binlog_status = payload.binlog_status.unwrap_or_default();
            state.metadata_locks = payload.metadata_locks;
            state.group_replication_members = payload.group_replication_members;
            state.uptime = state
                .global_status
                .get("Uptime")
                .and_then(|v| v.as_int())
                .unwrap_or(0);

            // Values are substituted wholesale; nothing is re-derived.
            state.metrics.apply_snapshot(&payload.metrics);
            if let Some(values) = state.metrics.series_values("dml", "Queries") {
                let values = values.to_vec();
                state.sparkline.replace(&values);
            }

            if let Some(position) = &mut state.replay {
                position.current_id = replay_id;
                if let Some(bounds) = bounds {
                    position.bounds = bounds;
                }
            }
        }

        for change in changes {
            self.notify(
                Severity::Warning,
                "Global Variable Change",
                &format!(
                    "{}\nOld Value: {}\nNew Value: {}",
                    change.name, change.old_value, change.new_value
                ),
            );
        }

        let _ = self.ui.send(UiEvent::Refreshed {
            tab_id: self.settings.tab_id,
        });
        if !manual && !self.paused {
            self.arm_timer(TabEvent::ReplayStep { manual: false });
        }
    }

    fn handle_replay_seek(&mut self, timestamp: &str) {
        let Some(reader) = &mut self.reader else {
            return;
        };
        match reader.seek_to_timestamp(timestamp) {
            Ok(crate::monitor::replay::SeekOutcome::Exact(ts)) => {
                self.notify(Severity::Info, "Replay", &format!("Seeking to timestamp {}", ts));
                self.cancel_timer();
                self.enqueue(TabEvent::ReplayStep { manual: true });
            }
            Ok(crate::monitor::replay::SeekOutcome::Closest(ts)) => {
                self.notify(
                    Severity::Info,
                    "Replay",
                    &format!("Timestamp not found, seeking to closest timestamp {}", ts),
                );
                self.cancel_timer();
                self.enqueue(TabEvent::ReplayStep { manual: true });
            }
            Ok(crate::monitor::replay::SeekOutcome::NotFound) => {
                self.notify(
                    Severity::Error,
                    "Replay",
                    &format!("No timestamps found on or before {}", timestamp),
                );
            }
            Err(error) => {
                self.notify(Severity::Error, "Replay", &error.to_string());
            }
        }
    }
}

/// Owns all tabs; maps tab ids to runtimes and routes dispatcher actions.
pub struct TabManager {
    tabs: BTreeMap<u64, TabRuntime>,
    active: Option<u64>,
    next_id: u64,
    config: Config,
    ui: UiSender,
    host_cache: Arc<HostCache>,
    dispatcher: Dispatcher,
    pub loading_hostgroups: bool,
}

impl TabManager {
    pub fn new(config: Config, ui: UiSender, host_cache: Arc<HostCache>) -> Self {
        return Self {
            tabs: BTreeMap::new(),
            active: None,
            next_id: 0,
            config,
            ui,
            host_cache,
            dispatcher: Dispatcher::new(),
            loading_hostgroups: false,
        };
    }

    pub fn create_tab(&mut self, name: String, endpoint: Endpoint) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let runtime = TabRuntime::start(
            id,
            name,
            endpoint,
            self.config.clone(),
            self.ui.clone(),
            self.host_cache.clone(),
        );
        self.tabs.insert(id, runtime);
        if self.active.is_none() {
            self.active = Some(id);
        }
        return id;
    }

    /// Opens one tab per hostgroup member, in order.
    pub fn connect_hostgroup(&mut self) -> Vec<u64> {
        self.loading_hostgroups = true;
        let members = self.config.hostgroup_members.clone();
        let mut ids = Vec::new();
        for member in members {
            let name = member
                .tab_title
                .clone()
                .unwrap_or_else(|| member.endpoint.address());
            ids.push(self.create_tab(name, member.endpoint.clone()));
        }
        self.loading_hostgroups = false;
        return ids;
    }

    pub fn remove_tab(&mut self, id: u64) {
        self.tabs.remove(&id);
        if self.active == Some(id) {
            self.active = self.tabs.keys().next().copied();
        }
    }

    pub fn active_tab(&self) -> Option<&TabRuntime> {
        return self.active.and_then(|id| self.tabs.get(&id));
    }

    pub fn get(&self, id: u64) -> Option<&TabRuntime> {
        return self.tabs.get(&id);
    }

    pub fn tab_ids(&self) -> Vec<u64> {
        return self.tabs.keys().copied().collect();
    }

    pub fn switch_next(&mut self) {
        let ids = self.tab_ids();
        if ids.is_empty() {
            return;
        }
        let current = self.active.unwrap_or(ids[0]);
        let position = ids.iter().position(|id| *id == current).unwrap_or(0);
        self.active = Some(ids[(position + 1) % ids.len()]);
    }

    pub fn switch_previous(&mut self) {
        let ids = self.tab_ids();
        if ids.is_empty() {
            return;
        }
        let current = self.active.unwrap_or(ids[0]);
        let position = ids.iter().position(|id| *id == current).unwrap_or(0);
        self.active = Some(ids[(position + ids.len() - 1) % ids.len()]);
    }

    /// One keystroke in: debounce, guard, then either execute the action here
    /// or hand it back so the widget layer can collect more input (filters,
    /// seek timestamps, kill targets).
    pub fn handle_key(&mut self, key: &str, modal_open: bool) -> Option<Action> {
        let guard = self.command_guard(modal_open);
        let outcome = self.dispatcher.dispatch(key, &guard);

        match outcome {
            DispatchOutcome::Run(action) => return self.apply_action(action),
            DispatchOutcome::Debounced => return None,
            DispatchOutcome::Blocked(reason) => {
                if let Some(tab) = self.active_tab() {
                    let _ = self.ui.send(UiEvent::Notify {
                        tab_id: tab.id,
                        notification: Notification {
                            title: "Command unavailable".to_string(),
                            message: reason.to_string(),
                            severity: Severity::Warning,
                        },
                    });
                }
                return None;
            }
            DispatchOutcome::Unknown => return None,
        }
    }

    fn command_guard(&self, modal_open: bool) -> CommandGuard {
        let (connected, replay_mode, secondary_busy) = match self.active_tab() {
            Some(tab) => (
                !matches!(
                    tab.connection_status(),
                    ConnectionStatus::Disconnected | ConnectionStatus::Connecting
                ),
                tab.with_state(|state| state.replay.is_some()),
                tab.secondary_busy(),
            ),
            None => (false, false, false),
        };
        return CommandGuard {
            hostgroup_wave_in_progress: self.loading_hostgroups,
            secondary_busy,
            connected,
            replay_mode,
            modal_open,
        };
    }

    /// Executes what the core can on its own; anything needing user input is
    /// returned to the caller.
    fn apply_action(&mut self, action: Action) -> Option<Action> {
        let Some(active_id) = self.active else {
            return None;
        };

        match action {
            Action::SwitchTabNext => {
                self.switch_next();
                return None;
            }
            Action::SwitchTabPrevious => {
                self.switch_previous();
                return None;
            }
            Action::RemoveTab => {
                self.remove_tab(active_id);
                return None;
            }
            _ => {}
        }

        let Some(tab) = self.tabs.get(&active_id) else {
            return None;
        };
        match action {
            Action::TogglePanel(panel) => {
                tab.send(TabEvent::TogglePanel(panel.to_string()));
            }
            Action::ForceRefresh => tab.send(TabEvent::ForceRefresh),
            Action::TogglePause => {
                let paused = tab.with_state(|state| state.paused);
                tab.send(if paused { TabEvent::Resume } else { TabEvent::Pause });
            }
            Action::ReplayBack => tab.send(TabEvent::ReplayRewind),
            Action::ReplayForward => tab.send(TabEvent::ReplayStep { manual: true }),
            Action::ClearFilters => tab.send(TabEvent::ClearFilters),
            Action::ToggleIdleThreads => tab.send(TabEvent::ToggleIdleThreads),
            Action::ToggleTrxsOnly => tab.send(TabEvent::ToggleTrxsOnly),
            Action::ToggleTicketedOnly => {
                tab.with_state(|state| state.show_ticketed_only = !state.show_ticketed_only);
            }
            Action::ToggleSortOrder => {
                tab.with_state(|state| {
                    state.sort_by_time_descending = !state.sort_by_time_descending;
                });
            }
            Action::Info(command) => {
                tab.send_command(CommandRequest::Info(command));
            }
            // These need more input from the widget layer.
            other @ (Action::ReplaySeek
            | Action::NewTab
            | Action::RenameTab
            | Action::SetFilter(_)
            | Action::KillThread
            | Action::KillByPredicate(_)) => return Some(other),
            Action::SwitchTabNext | Action::SwitchTabPrevious | Action::RemoveTab => {}
        }
        return None;
    }

    /// Modal results come back through these.
    pub fn seek_active(&self, timestamp: String) {
        if let Some(tab) = self.active_tab() {
            tab.send(TabEvent::ReplaySeek(timestamp));
        }
    }

    pub fn filter_active(&self, filter: ThreadFilter) {
        if let Some(tab) = self.active_tab() {
            tab.send(TabEvent::SetFilter(filter));
        }
    }

    pub fn kill_thread(&self, thread_id: String) {
        if let Some(tab) = self.active_tab() {
            tab.send_command(CommandRequest::KillThread { thread_id });
        }
    }

    pub fn kill_matching(&self, predicate: crate::monitor::processlist::KillPredicate) {
        if let Some(tab) = self.active_tab() {
            tab.send_command(CommandRequest::KillMatching(predicate));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::processlist::ProcesslistThread;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_host_setup() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let endpoint = Endpoint {
            host: "db1".to_string(),
            port: 3307,
            ..Default::default()
        };

        append_host_setup(file.path(), &endpoint).unwrap();
        append_host_setup(file.path(), &endpoint).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "db1:3307\n");
    }

    #[test]
    fn test_append_host_setup_default_port_omits_port() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let endpoint = Endpoint {
            host: "db1".to_string(),
            port: 3306,
            ..Default::default()
        };

        append_host_setup(file.path(), &endpoint).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "db1\n");
    }

    fn state_with_threads(threads: Vec<Thread>) -> TabState {
        let endpoint = Endpoint::default();
        let config = test_config();
        let mut state = TabState::new(1, "test".to_string(), &endpoint, &config);
        state.threads = threads;
        return state;
    }

    fn test_config() -> Config {
        use crate::monitor::options::{ReplayConfig};
        return Config {
            endpoint: Endpoint::default(),
            hostgroup_members: Vec::new(),
            refresh_interval: std::time::Duration::from_secs(1),
            heartbeat_table: None,
            startup_panels: vec!["dashboard".to_string(), "processlist".to_string()],
            graph_marker: "braille".to_string(),
            pypi_repository: String::new(),
            show_trxs_only: false,
            show_additional_query_columns: false,
            exclude_notify_vars: Vec::new(),
            host_cache_file: std::path::PathBuf::from("/nonexistent"),
            host_setup_file: std::path::PathBuf::from("/nonexistent"),
            replay: ReplayConfig {
                file: None,
                record: false,
                dir: std::path::PathBuf::from("/nonexistent"),
                retention_hours: 48,
                daemon_mode: false,
                daemon_mode_log_file: None,
            },
        };
    }

    fn mysql_thread(id: &str, user: &str, time: i64, tickets: i64) -> Thread {
        Thread::MySQL(ProcesslistThread {
            id: id.to_string(),
            user: user.to_string(),
            time,
            trx_concurrency_tickets: tickets,
            ..Default::default()
        })
    }

    #[test]
    fn test_filtered_threads_sorting() {
        let mut state = state_with_threads(vec![
            mysql_thread("1", "a", 5, 0),
            mysql_thread("2", "b", 50, 0),
            mysql_thread("3", "c", 10, 0),
        ]);

        let descending: Vec<i64> = state.filtered_threads().iter().map(|t| t.time()).collect();
        assert_eq!(descending, vec![50, 10, 5]);

        state.sort_by_time_descending = false;
        let ascending: Vec<i64> = state.filtered_threads().iter().map(|t| t.time()).collect();
        assert_eq!(ascending, vec![5, 10, 50]);
    }

    #[test]
    fn test_filtered_threads_ticketed_only() {
        let mut state = state_with_threads(vec![
            mysql_thread("1", "a", 5, 0),
            mysql_thread("2", "b", 50, 3),
        ]);
        state.show_ticketed_only = true;

        let threads = state.filtered_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id(), "2");
    }

    #[test]
    fn test_filtered_threads_applies_filter() {
        let mut state = state_with_threads(vec![
            mysql_thread("1", "app", 5, 0),
            mysql_thread("2", "batch", 50, 0),
        ]);
        state.filter.user = Some("app".to_string());

        let threads = state.filtered_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].user(), "app");
    }
}
