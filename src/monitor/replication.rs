use crate::monitor::capabilities::{ServerCapabilities, ServerFeature};
use crate::monitor::host_cache::HostCache;
use crate::monitor::mysql::{Database, Endpoint, RowMap};
use crate::monitor::queries;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

const MARIADB_PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Binlog position movement between two samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinlogDiff {
    Rotated,
    Bytes(i64),
}

impl Default for BinlogDiff {
    fn default() -> Self {
        return BinlogDiff::Bytes(0);
    }
}

impl std::fmt::Display for BinlogDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinlogDiff::Rotated => write!(f, "Binlog Rotated"),
            BinlogDiff::Bytes(bytes) => write!(f, "{}", bytes),
        }
    }
}

/// SHOW REPLICA/SLAVE STATUS output plus the two derived fields the dashboard
/// cares about.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub data: RowMap,
    pub seconds_behind: Option<i64>,
    /// How fast the replica is catching up, in seconds of lag per second.
    pub replica_speed: i64,
}

impl ReplicationStatus {
    pub fn get(&self, key: &str) -> Option<String> {
        return self.data.get(key).map(|v| v.display());
    }
}

/// Catch-up speed, only counted while the lag is shrinking.
pub fn compute_replica_speed(previous_lag: Option<i64>, current_lag: i64, dt: f64) -> i64 {
    match previous_lag {
        Some(previous) if previous > 0 && current_lag < previous && dt > 0.0 => {
            let speed = ((previous - current_lag) as f64 / dt).round() as i64;
            return speed.max(0);
        }
        _ => return 0,
    }
}

/// Fetches replication status from whichever query the server supports, with
/// the lag sourced from pt-heartbeat when a heartbeat table is configured.
/// Returns the status (None when the host is not a replica) and the lag that
/// becomes the next cycle's previous value.
pub async fn fetch_replication_status(
    db: &mut Database,
    caps: &ServerCapabilities,
    heartbeat_table: Option<&str>,
    previous_lag: Option<i64>,
    polling_latency: f64,
) -> Result<(Option<ReplicationStatus>, Option<i64>)> {
    let use_replica_terminology = caps.has(ServerFeature::SourceTerminology);
    let status_query = if use_replica_terminology {
        queries::mysql::SHOW_REPLICA_STATUS
    } else {
        queries::mysql::SHOW_SLAVE_STATUS
    };

    let Some(row) = db.query_first(status_query).await? else {
        return Ok((None, None));
    };

    let lag_key = if use_replica_terminology {
        "Seconds_Behind_Source"
    } else {
        "Seconds_Behind_Master"
    };

    let seconds_behind = if let Some(table) = heartbeat_table {
        let query = queries::with_predicate(queries::mysql::HEARTBEAT_REPLICA_LAG, table);
        db.fetch_value(&query, "Seconds_Behind_Master")
            .await?
            .and_then(|v| v.as_int())
    } else {
        row.get(lag_key).and_then(|v| v.as_int())
    };

    let current_lag = seconds_behind.unwrap_or(0);
    let status = ReplicationStatus {
        replica_speed: compute_replica_speed(previous_lag, current_lag, polling_latency),
        seconds_behind: Some(current_lag),
        data: row,
    };
    return Ok((Some(status), Some(current_lag)));
}

/// A replica discovered through the primary's binlog-dump threads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AvailableReplica {
    pub thread_id: i64,
    pub user: String,
    pub host: String,
    pub uuid: Option<String>,
    pub port: Option<u16>,
}

impl AvailableReplica {
    pub fn from_row(row: &RowMap) -> Self {
        let uuid = row
            .get("replica_uuid")
            .map(|v| v.display())
            .filter(|v| !v.is_empty());
        return Self {
            thread_id: row.get("id").and_then(|v| v.as_int()).unwrap_or(0),
            user: row.get("user").map(|v| v.display()).unwrap_or_default(),
            host: row
                .get("host")
                .map(|v| v.display())
                .unwrap_or_default()
                .split(':')
                .next()
                .unwrap_or_default()
                .to_string(),
            uuid,
            port: None,
        };
    }
}

/// Removes GTID lines belonging to the given server uuids, so a replica that
/// is itself a source does not produce false errant transactions.
pub fn strip_uuid_gtid_sets(gtid_set: &str, uuids: &[&str]) -> String {
    let mut result = gtid_set
        .lines()
        .filter(|line| !uuids.iter().any(|uuid| !uuid.is_empty() && line.contains(uuid)))
        .collect::<Vec<_>>()
        .join("\n");
    if result.ends_with(',') {
        result.pop();
    }
    return result;
}

#[derive(Clone, Debug, Default)]
struct PortSlot {
    port: u16,
    in_use: bool,
}

/// Connection lifecycle of one tracked replica. The raw handle never leaves
/// the tracker.
enum ReplicaState {
    Closed,
    Open(Box<Database>),
    Error(String),
}

pub struct Replica {
    pub row_key: String,
    pub thread_id: i64,
    pub host: String,
    pub port: Option<u16>,
    state: ReplicaState,
    pub caps: Option<ServerCapabilities>,
    pub replication_status: Option<ReplicationStatus>,
    /// Label/value pairs the replication panel renders as the replica table.
    pub summary: Vec<(String, String)>,
}

impl Replica {
    fn new(row_key: String, thread_id: i64, host: String, port: Option<u16>) -> Self {
        return Self {
            row_key,
            thread_id,
            host,
            port,
            state: ReplicaState::Closed,
            caps: None,
            replication_status: None,
            summary: Vec::new(),
        };
    }

    pub fn has_connection(&self) -> bool {
        return matches!(self.state, ReplicaState::Open(_));
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ReplicaState::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Tracks the primary's replicas: discovery rows in, connected replicas with
/// rendered summaries out.
pub struct ReplicaTracker {
    replicas: BTreeMap<String, Replica>,
    /// replica uuid (or MariaDB server_id) -> advertised port.
    ports: HashMap<String, PortSlot>,
    /// MariaDB only: thread id -> port that answered the probe.
    mariadb_assigned: HashMap<i64, u16>,
    previous_available: usize,
    primary_endpoint: Endpoint,
    shutdown: watch::Receiver<bool>,
}

impl ReplicaTracker {
    pub fn new(primary_endpoint: Endpoint, shutdown: watch::Receiver<bool>) -> Self {
        return Self {
            replicas: BTreeMap::new(),
            ports: HashMap::new(),
            mariadb_assigned: HashMap::new(),
            previous_available: 0,
            primary_endpoint,
            shutdown,
        };
    }

    pub fn replicas(&self) -> impl Iterator<Item = &Replica> {
        return self.replicas.values();
    }

    pub fn len(&self) -> usize {
        return self.replicas.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.replicas.is_empty();
    }

    /// The uuid->port map is refreshed whenever the replica count changes.
    pub fn needs_port_refresh(&self, available: &[AvailableReplica]) -> bool {
        return available.len() != self.previous_available;
    }

    pub async fn refresh_ports(
        &mut self,
        db: &mut Database,
        caps: &ServerCapabilities,
    ) -> Result<()> {
        let query = if caps.has(ServerFeature::SourceTerminology) {
            queries::mysql::SHOW_REPLICAS
        } else {
            queries::mysql::SHOW_SLAVE_HOSTS
        };
        let rows = db.query_rows(query).await?;

        let key_column = if caps.is_mariadb {
            "Server_id"
        } else if caps.has(ServerFeature::SourceTerminology) {
            "Replica_UUID"
        } else {
            "Slave_UUID"
        };

        self.ports.clear();
        // MariaDB replicas have to re-probe whenever the set changes.
        self.mariadb_assigned.clear();
        for row in rows {
            let Some(key) = row.get(key_column).map(|v| v.display()) else {
                continue;
            };
            let port = row
                .get("Port")
                .and_then(|v| v.as_int())
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(3306);
            self.ports.insert(key, PortSlot { port, in_use: false });
        }
        return Ok(());
    }

    fn row_key(host: &str, port: Option<u16>) -> String {
        match port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Finds a free advertised port that actually accepts a TCP connect on
    /// this host. MariaDB cannot correlate binlog-dump threads to ports, so
    /// probing is the only option.
    async fn probe_mariadb_port(&mut self, host: &str) -> Option<u16> {
        let candidates: Vec<(String, u16)> = self
            .ports
            .iter()
            .filter(|(_, slot)| !slot.in_use)
            .map(|(key, slot)| (key.clone(), slot.port))
            .collect();

        for (key, port) in candidates {
            let connect = TcpStream::connect((host, port));
            match tokio::time::timeout(MARIADB_PORT_PROBE_TIMEOUT, connect).await {
                Ok(Ok(_)) => {
                    if let Some(slot) = self.ports.get_mut(&key) {
                        slot.in_use = true;
                    }
                    return Some(port);
                }
                _ => continue,
            }
        }
        return None;
    }

    fn replica_endpoint(&self, host: &str, port: u16) -> Endpoint {
        let mut endpoint = self.primary_endpoint.clone();
        endpoint.host = host.to_string();
        endpoint.port = port;
        endpoint.socket = None;
        return endpoint;
    }

    /// One replica-flow cycle: resolve ports, open missing connections, fetch
    /// per-replica replication status, compute errant transactions and build
    /// the summary tables. Failures are per-replica; one bad replica never
    /// stops the others.
    pub async fn refresh(
        &mut self,
        available: &[AvailableReplica],
        primary_caps: &ServerCapabilities,
        primary_gtid_executed: Option<&str>,
        heartbeat_table: Option<&str>,
        polling_latency: f64,
        host_cache: &HostCache,
    ) -> Result<()> {
        self.previous_available = available.len();

        let mut live_keys: Vec<String> = Vec::new();
        for row in available {
            let host = host_cache.hostname(&row.host);

            let port = if primary_caps.is_mariadb {
                match self.mariadb_assigned.get(&row.thread_id).copied() {
                    Some(port) => Some(port),
                    None => {
                        let probed = self.probe_mariadb_port(&host).await;
                        if let Some(port) = probed {
                            self.mariadb_assigned.insert(row.thread_id, port);
                        }
                        probed
                    }
                }
            } else {
                Some(
                    row.uuid
                        .as_ref()
                        .and_then(|uuid| self.ports.get(uuid))
                        .map(|slot| slot.port)
                        .unwrap_or(3306),
                )
            };

            let row_key = Self::row_key(&host, port);
            live_keys.push(row_key.clone());
            self.replicas.entry(row_key.clone()).or_insert_with(|| {
                Replica::new(row_key.clone(), row.thread_id, host.clone(), port)
            });

            let Some(port) = port else {
                let replica = self.replicas.get_mut(&row_key).unwrap();
                let reason = "No available port found for MariaDB replica".to_string();
                replica.state = ReplicaState::Error(reason.clone());
                replica.summary = vec![
                    ("Host".to_string(), host.clone()),
                    ("User".to_string(), row.user.clone()),
                    ("Error".to_string(), reason),
                ];
                continue;
            };

            let endpoint = self.replica_endpoint(&host, port);
            let shutdown = self.shutdown.clone();
            {
                let replica = self.replicas.get_mut(&row_key).unwrap();
                replica.thread_id = row.thread_id;
                if !replica.has_connection() {
                    let mut db = Database::new(endpoint, shutdown);
                    let opened = match db.connect().await {
                        Ok(()) => db.fetch_name_value_map(queries::mysql::VARIABLES).await,
                        Err(error) => Err(error),
                    };
                    match opened {
                        Ok(variables) => {
                            replica.caps =
                                Some(ServerCapabilities::from_mysql_variables(&variables));
                            replica.state = ReplicaState::Open(Box::new(db));
                        }
                        Err(error) => {
                            replica.state = ReplicaState::Error(error.to_string());
                        }
                    }
                }
            }

            self.refresh_one(
                &row_key,
                &row.user,
                primary_caps,
                primary_gtid_executed,
                heartbeat_table,
                polling_latency,
            )
            .await;
        }

        // Only rows whose replica vanished from discovery are torn down.
        self.replicas.retain(|key, _| live_keys.contains(key));

        return Ok(());
    }

    async fn refresh_one(
        &mut self,
        row_key: &str,
        user: &str,
        primary_caps: &ServerCapabilities,
        primary_gtid_executed: Option<&str>,
        heartbeat_table: Option<&str>,
        polling_latency: f64,
    ) {
        let Some(replica) = self.replicas.get_mut(row_key) else {
            return;
        };

        let mut error: Option<String> = replica.error().map(|e| e.to_string());

        if let ReplicaState::Open(db) = &mut replica.state {
            let caps = replica.caps.clone().unwrap_or_else(|| primary_caps.clone());
            let previous_lag = replica
                .replication_status
                .as_ref()
                .and_then(|status| status.seconds_behind);

            match fetch_replication_status(
                db,
                &caps,
                heartbeat_table,
                previous_lag,
                polling_latency,
            )
            .await
            {
                Ok((status, _)) => {
                    replica.replication_status = status;
                }
                Err(fetch_error) => {
                    error = Some(fetch_error.to_string());
                }
            }
        }

        // Errant transactions, computed on the replica against the primary's
        // executed set with both server uuids masked out.
        let mut errant: Option<String> = None;
        if error.is_none() {
            if let (ReplicaState::Open(db), Some(primary_set)) =
                (&mut replica.state, primary_gtid_executed)
            {
                let replica_set = replica
                    .replication_status
                    .as_ref()
                    .and_then(|status| status.get("Executed_Gtid_Set"))
                    .unwrap_or_default();
                if !replica_set.is_empty() {
                    let primary_uuid = primary_caps.server_id.clone().unwrap_or_default();
                    let source_uuid = replica
                        .replication_status
                        .as_ref()
                        .and_then(|status| {
                            status.get("Source_UUID").or_else(|| status.get("Master_UUID"))
                        })
                        .unwrap_or_default();
                    let masked = [primary_uuid.as_str(), source_uuid.as_str()];

                    let query = format!(
                        "SELECT GTID_SUBTRACT('{}', '{}') AS errant_trxs",
                        strip_uuid_gtid_sets(&replica_set, &masked),
                        strip_uuid_gtid_sets(primary_set, &masked),
                    );
                    match db.fetch_value(&query, "errant_trxs").await {
                        Ok(value) => {
                            errant = value.map(|v| v.display()).filter(|v| !v.is_empty());
                        }
                        Err(fetch_error) => {
                            error = Some(fetch_error.to_string());
                        }
                    }
                }
            }
        }

        if let Some(reason) = error {
            replica.state = ReplicaState::Error(reason.clone());
            replica.summary = vec![
                ("Host".to_string(), replica.row_key.clone()),
                ("User".to_string(), user.to_string()),
                ("Error".to_string(), reason),
            ];
            return;
        }

        let mut summary = vec![
            ("Host".to_string(), replica.row_key.clone()),
            ("User".to_string(), user.to_string()),
        ];
        if let Some(caps) = &replica.caps {
            summary.push(("Version".to_string(), caps.display_version()));
        }
        if let Some(status) = &replica.replication_status {
            summary.push((
                "Lag".to_string(),
                crate::common::format_time(status.seconds_behind),
            ));
            summary.push(("Speed".to_string(), format!("{}/s", status.replica_speed)));
            if let Some(io_state) = status.get("Slave_IO_Running").or_else(|| status.get("Replica_IO_Running")) {
                summary.push(("IO Running".to_string(), io_state));
            }
            if let Some(sql_state) =
                status.get("Slave_SQL_Running").or_else(|| status.get("Replica_SQL_Running"))
            {
                summary.push(("SQL Running".to_string(), sql_state));
            }
        }
        summary.push((
            "Errant TRX".to_string(),
            errant.unwrap_or_else(|| "None".to_string()),
        ));
        replica.summary = summary;
    }

    /// Closes every replica connection; used when the replication panel is
    /// hidden or the tab disconnects.
    pub fn remove_all(&mut self) {
        if !self.replicas.is_empty() {
            log::debug!("Closing {} replica connections", self.replicas.len());
        }
        self.replicas.clear();
        self.ports.clear();
        self.previous_available = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mysql::ScalarValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_replica_speed_clamped_to_catching_up() {
        // Seconds_Behind: 0,0,0,50,30,10,0 at 1s cadence.
        let lags = [0, 0, 0, 50, 30, 10, 0];
        let mut previous: Option<i64> = None;
        let mut speeds = Vec::new();
        for lag in lags {
            speeds.push(compute_replica_speed(previous, lag, 1.0));
            previous = Some(lag);
        }
        assert_eq!(speeds, vec![0, 0, 0, 0, 20, 20, 10]);
    }

    #[test]
    fn test_replica_speed_zero_when_falling_behind() {
        assert_eq!(compute_replica_speed(Some(10), 50, 1.0), 0);
        assert_eq!(compute_replica_speed(None, 50, 1.0), 0);
        assert_eq!(compute_replica_speed(Some(0), 0, 1.0), 0);
    }

    #[test]
    fn test_strip_uuid_gtid_sets() {
        let set = "aaaa-bbbb:1-100,\ncccc-dddd:1-50,\neeee-ffff:1-7";
        let stripped = strip_uuid_gtid_sets(set, &["cccc-dddd"]);
        assert_eq!(stripped, "aaaa-bbbb:1-100,\neeee-ffff:1-7");
    }

    #[test]
    fn test_strip_uuid_gtid_sets_trailing_comma() {
        let set = "aaaa-bbbb:1-100,\ncccc-dddd:1-50";
        let stripped = strip_uuid_gtid_sets(set, &["cccc-dddd"]);
        assert_eq!(stripped, "aaaa-bbbb:1-100");
    }

    #[test]
    fn test_strip_uuid_ignores_empty_masks() {
        let set = "aaaa-bbbb:1-100";
        assert_eq!(strip_uuid_gtid_sets(set, &["", ""]), set);
    }

    #[test]
    fn test_available_replica_from_row() {
        let mut row = RowMap::new();
        row.insert("id".into(), ScalarValue::Int(42));
        row.insert("user".into(), ScalarValue::Text("repl".into()));
        row.insert("host".into(), ScalarValue::Text("10.0.0.5:48210".into()));
        row.insert("replica_uuid".into(), ScalarValue::Text("uuid-1".into()));

        let replica = AvailableReplica::from_row(&row);
        assert_eq!(replica.thread_id, 42);
        assert_eq!(replica.host, "10.0.0.5");
        assert_eq!(replica.uuid.as_deref(), Some("uuid-1"));
    }

    #[test]
    fn test_binlog_diff_display() {
        assert_eq!(BinlogDiff::Rotated.to_string(), "Binlog Rotated");
        assert_eq!(BinlogDiff::Bytes(1024).to_string(), "1024");
    }
}
