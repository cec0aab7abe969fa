use anyhow::{anyhow, Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Row, SslOpts, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::watch;

/// Desired security state of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    #[default]
    Off,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl std::str::FromStr for TlsMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "OFF" => Ok(TlsMode::Off),
            "REQUIRED" => Ok(TlsMode::Required),
            "VERIFY_CA" => Ok(TlsMode::VerifyCa),
            "VERIFY_IDENTITY" => Ok(TlsMode::VerifyIdentity),
            other => Err(anyhow!("Unsupported SSL mode {}", other)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub mode: TlsMode,
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Immutable per-tab connection target. Everything mutable that is learned after
/// connect (flavor, version, topology flags) lives in ServerCapabilities.
#[derive(Clone, Debug, Default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub socket: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub tls: TlsConfig,
}

impl Endpoint {
    pub fn address(&self) -> String {
        return format!("{}:{}", self.host, self.port);
    }
}

/// A normalized cell value: every numeric-looking value becomes a signed 64-bit
/// integer at ingest so counter math never re-parses strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Text(String),
    Null,
}

impl ScalarValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(v) => Some(*v),
            ScalarValue::Text(s) => s.parse().ok(),
            ScalarValue::Null => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScalarValue::Text(s) => s.as_str(),
            _ => "",
        }
    }

    pub fn display(&self) -> String {
        match self {
            ScalarValue::Int(v) => v.to_string(),
            ScalarValue::Text(s) => s.clone(),
            ScalarValue::Null => String::new(),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.display());
    }
}

pub type RowMap = HashMap<String, ScalarValue>;
pub type VariablesMap = HashMap<String, ScalarValue>;

fn normalize_value(value: Value) -> ScalarValue {
    match value {
        Value::NULL => ScalarValue::Null,
        Value::Int(v) => ScalarValue::Int(v),
        Value::UInt(v) => i64::try_from(v)
            .map(ScalarValue::Int)
            .unwrap_or_else(|_| ScalarValue::Text(v.to_string())),
        Value::Float(v) => ScalarValue::Text(v.to_string()),
        Value::Double(v) => ScalarValue::Text(v.to_string()),
        Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match text.parse::<i64>() {
                Ok(v) => ScalarValue::Int(v),
                Err(_) => ScalarValue::Text(text),
            }
        }
        Value::Date(year, month, day, hour, minute, second, _) => ScalarValue::Text(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        )),
        Value::Time(negative, days, hours, minutes, seconds, _) => {
            let sign = if negative { "-" } else { "" };
            ScalarValue::Text(format!(
                "{}{:02}:{:02}:{:02}",
                sign,
                u32::from(hours) + days * 24,
                minutes,
                seconds
            ))
        }
    }
}

fn row_to_map(row: Row) -> RowMap {
    let columns = row.columns();
    let mut map = RowMap::with_capacity(columns.len());
    let values = row.unwrap();
    for (column, value) in columns.iter().zip(values) {
        map.insert(column.name_str().into_owned(), normalize_value(value));
    }
    return map;
}

/// Error classification for the tab runtime: connection errors trigger the
/// reconnect path, query errors surface as notifications without touching the
/// sampler state, and cancellations are silent.
#[derive(Debug)]
pub enum DbError {
    Cancelled,
    Connection(String),
    Query(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Cancelled => write!(f, "Operation cancelled"),
            DbError::Connection(reason) => write!(f, "{}", reason),
            DbError::Query(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for DbError {}

pub fn classify(error: &anyhow::Error) -> Option<&DbError> {
    return error.downcast_ref::<DbError>();
}

pub fn is_connection_error(error: &anyhow::Error) -> bool {
    return matches!(classify(error), Some(DbError::Connection(_)));
}

fn wrap_driver_error(error: mysql_async::Error, what: &str) -> anyhow::Error {
    let reason = format!("{}: {}", what, error);
    match error {
        mysql_async::Error::Server(_) => anyhow::Error::new(DbError::Query(reason)),
        _ => anyhow::Error::new(DbError::Connection(reason)),
    }
}

/// One database handle. The main handle belongs to the sample flow, the
/// secondary one to ad-hoc commands; they are never shared between flows.
pub struct Database {
    endpoint: Endpoint,
    conn: Option<Conn>,
    shutdown: watch::Receiver<bool>,
    pub connection_id: Option<u32>,
}

impl Database {
    pub fn new(endpoint: Endpoint, shutdown: watch::Receiver<bool>) -> Self {
        return Database {
            endpoint,
            conn: None,
            shutdown,
            connection_id: None,
        };
    }

    pub fn endpoint(&self) -> &Endpoint {
        return &self.endpoint;
    }

    pub fn is_connected(&self) -> bool {
        return self.conn.is_some();
    }

    fn build_opts(endpoint: &Endpoint) -> Opts {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(endpoint.host.clone())
            .tcp_port(endpoint.port)
            .user(endpoint.user.clone())
            .pass(endpoint.password.clone())
            .prefer_socket(endpoint.socket.is_some());
        if let Some(socket) = &endpoint.socket {
            builder = builder.socket(Some(socket.clone()));
        }

        let ssl = match endpoint.tls.mode {
            TlsMode::Off => None,
            TlsMode::Required => Some(
                SslOpts::default()
                    .with_danger_accept_invalid_certs(true)
                    .with_danger_skip_domain_validation(true),
            ),
            TlsMode::VerifyCa => Some(
                SslOpts::default()
                    .with_root_certs(endpoint.tls.ca.iter().cloned().map(Into::into).collect())
                    .with_danger_skip_domain_validation(true),
            ),
            TlsMode::VerifyIdentity => Some(
                SslOpts::default()
                    .with_root_certs(endpoint.tls.ca.iter().cloned().map(Into::into).collect()),
            ),
        };
        if let Some(ssl) = ssl {
            builder = builder.ssl_opts(Some(ssl));
        }

        return Opts::from(builder);
    }

    pub async fn connect(&mut self) -> Result<()> {
        let opts = Self::build_opts(&self.endpoint);
        let mut shutdown = self.shutdown.clone();

        let conn = tokio::select! {
            result = Conn::new(opts) => result.map_err(|e| {
                anyhow::Error::new(DbError::Connection(format!(
                    "Failed to connect to {} - Reason: {}", self.endpoint.address(), e,
                )))
            })?,
            _ = shutdown.changed() => return Err(anyhow::Error::new(DbError::Cancelled)),
        };

        self.connection_id = Some(conn.id());
        self.conn = Some(conn);
        log::debug!("Connected to {}", self.endpoint.address());
        return Ok(());
    }

    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Best effort quit; a dead peer is fine here.
            let _ = conn.disconnect().await;
            log::debug!("Disconnected from {}", self.endpoint.address());
        }
        self.connection_id = None;
    }

    async fn raw_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut shutdown = self.shutdown.clone();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| anyhow::Error::new(DbError::Connection("Not connected".into())))?;

        tokio::select! {
            result = conn.query::<Row, _>(sql) => {
                result.map_err(|e| wrap_driver_error(e, "Failed to execute query"))
            }
            _ = shutdown.changed() => Err(anyhow::Error::new(DbError::Cancelled)),
        }
    }

    pub async fn query_rows(&mut self, sql: &str) -> Result<Vec<RowMap>> {
        let rows = self.raw_query(sql).await?;
        return Ok(rows.into_iter().map(row_to_map).collect());
    }

    pub async fn query_first(&mut self, sql: &str) -> Result<Option<RowMap>> {
        let mut rows = self.raw_query(sql).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        return Ok(Some(row_to_map(rows.remove(0))));
    }

    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        self.raw_query(sql).await?;
        return Ok(());
    }

    /// SHOW GLOBAL STATUS / SHOW GLOBAL VARIABLES style two-column resultsets,
    /// flattened into one map.
    pub async fn fetch_name_value_map(&mut self, sql: &str) -> Result<VariablesMap> {
        let rows = self.raw_query(sql).await?;
        let mut map = VariablesMap::with_capacity(rows.len());
        for row in rows {
            let map_row = row_to_map(row);
            let name = map_row
                .get("Variable_name")
                .map(|v| v.display())
                .context("Missing Variable_name column")?;
            let value = map_row.get("Value").cloned().unwrap_or(ScalarValue::Null);
            map.insert(name, value);
        }
        return Ok(map);
    }

    pub async fn fetch_value(&mut self, sql: &str, field: &str) -> Result<Option<ScalarValue>> {
        let row = self.query_first(sql).await?;
        return Ok(row.and_then(|r| r.get(field).cloned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_numeric_bytes() {
        assert_eq!(
            normalize_value(Value::Bytes(b"12345".to_vec())),
            ScalarValue::Int(12345)
        );
        assert_eq!(
            normalize_value(Value::Bytes(b"-42".to_vec())),
            ScalarValue::Int(-42)
        );
        assert_eq!(
            normalize_value(Value::Bytes(b"ON".to_vec())),
            ScalarValue::Text("ON".to_string())
        );
    }

    #[test]
    fn test_normalize_null_and_ints() {
        assert_eq!(normalize_value(Value::NULL), ScalarValue::Null);
        assert_eq!(normalize_value(Value::Int(-1)), ScalarValue::Int(-1));
        assert_eq!(normalize_value(Value::UInt(7)), ScalarValue::Int(7));
    }

    #[test]
    fn test_scalar_value_accessors() {
        assert_eq!(ScalarValue::Int(5).as_int(), Some(5));
        assert_eq!(ScalarValue::Text("17".into()).as_int(), Some(17));
        assert_eq!(ScalarValue::Text("ON".into()).as_int(), None);
        assert_eq!(ScalarValue::Null.as_int(), None);
        assert_eq!(ScalarValue::Text("ON".into()).as_str(), "ON");
        assert_eq!(ScalarValue::Int(5).display(), "5");
    }

    #[test]
    fn test_tls_mode_parse() {
        assert_eq!("required".parse::<TlsMode>().unwrap(), TlsMode::Required);
        assert_eq!("VERIFY_CA".parse::<TlsMode>().unwrap(), TlsMode::VerifyCa);
        assert_eq!(
            "verify_identity".parse::<TlsMode>().unwrap(),
            TlsMode::VerifyIdentity
        );
        assert!("mystery".parse::<TlsMode>().is_err());
    }
}
