use crate::monitor::mysql::RowMap;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn whitespace_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    return RE.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
}

/// Collapses runs of whitespace so multi-line SQL fits in one table cell and
/// compresses well in replay payloads.
pub fn minify_query(query: &str) -> String {
    return whitespace_re().replace_all(query.trim(), " ").into_owned();
}

/// One row of the MySQL processlist, joined with innodb_trx.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcesslistThread {
    pub id: String,
    pub mysql_thread_id: Option<i64>,
    pub user: String,
    pub host: String,
    pub db: String,
    pub command: String,
    pub state: String,
    pub time: i64,
    pub query: String,
    pub connection_type: String,
    pub trx_state: String,
    pub trx_operation_state: String,
    pub trx_rows_locked: i64,
    pub trx_rows_modified: i64,
    pub trx_concurrency_tickets: i64,
    pub trx_time: Option<i64>,
}

impl ProcesslistThread {
    pub fn from_row(row: &RowMap) -> Self {
        let get_str = |key: &str| row.get(key).map(|v| v.display()).unwrap_or_default();
        let get_int = |key: &str| row.get(key).and_then(|v| v.as_int()).unwrap_or(0);

        return Self {
            id: get_str("id"),
            mysql_thread_id: row.get("mysql_thread_id").and_then(|v| v.as_int()),
            user: get_str("user"),
            // Strip the ephemeral client port, it changes every connection
            host: get_str("host").split(':').next().unwrap_or_default().to_string(),
            db: get_str("db"),
            command: get_str("command"),
            state: get_str("state"),
            time: get_int("time"),
            query: minify_query(&get_str("query")),
            connection_type: get_str("connection_type"),
            trx_state: get_str("trx_state"),
            trx_operation_state: get_str("trx_operation_state"),
            trx_rows_locked: get_int("trx_rows_locked"),
            trx_rows_modified: get_int("trx_rows_modified"),
            trx_concurrency_tickets: get_int("trx_concurrency_tickets"),
            trx_time: row.get("trx_time").and_then(|v| v.as_int()),
        };
    }

    pub fn has_transaction(&self) -> bool {
        return !self.trx_state.is_empty();
    }

    pub fn is_sleeping(&self) -> bool {
        return self.command == "Sleep";
    }
}

/// One row of the ProxySQL processlist (stats_mysql_processlist).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxySQLProcesslistThread {
    pub id: String,
    pub hostgroup: i64,
    pub user: String,
    pub db: String,
    pub frontend_host: String,
    pub backend_host: String,
    pub command: String,
    /// ProxySQL reports milliseconds; stored as whole seconds like MySQL rows.
    pub time: i64,
    pub query: String,
    pub extended_info: Option<String>,
}

impl ProxySQLProcesslistThread {
    pub fn from_row(row: &RowMap) -> Self {
        let get_str = |key: &str| row.get(key).map(|v| v.display()).unwrap_or_default();

        return Self {
            id: get_str("id"),
            hostgroup: row.get("hostgroup").and_then(|v| v.as_int()).unwrap_or(0),
            user: get_str("user"),
            db: get_str("db"),
            frontend_host: get_str("frontend_host").split(':').next().unwrap_or_default().to_string(),
            backend_host: get_str("backend_host").split(':').next().unwrap_or_default().to_string(),
            command: get_str("command"),
            time: row.get("time").and_then(|v| v.as_int()).unwrap_or(0) / 1000,
            query: minify_query(&get_str("query")),
            extended_info: {
                let info = get_str("extended_info");
                if info.is_empty() { None } else { Some(info) }
            },
        };
    }
}

/// Either flavor of processlist row, so the tab state and replay payloads can
/// carry one list.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Thread {
    MySQL(ProcesslistThread),
    ProxySQL(ProxySQLProcesslistThread),
}

impl Thread {
    pub fn id(&self) -> &str {
        match self {
            Thread::MySQL(t) => &t.id,
            Thread::ProxySQL(t) => &t.id,
        }
    }

    pub fn user(&self) -> &str {
        match self {
            Thread::MySQL(t) => &t.user,
            Thread::ProxySQL(t) => &t.user,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Thread::MySQL(t) => &t.host,
            Thread::ProxySQL(t) => &t.frontend_host,
        }
    }

    pub fn db(&self) -> &str {
        match self {
            Thread::MySQL(t) => &t.db,
            Thread::ProxySQL(t) => &t.db,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            Thread::MySQL(t) => t.time,
            Thread::ProxySQL(t) => t.time,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            Thread::MySQL(t) => &t.query,
            Thread::ProxySQL(t) => &t.query,
        }
    }

    pub fn hostgroup(&self) -> Option<i64> {
        match self {
            Thread::MySQL(_) => None,
            Thread::ProxySQL(t) => Some(t.hostgroup),
        }
    }
}

/// Display filters from the filter modal. Exact match for user, db and
/// hostgroup; substring for host and query text (query text case-sensitive).
#[derive(Clone, Debug, Default)]
pub struct ThreadFilter {
    pub user: Option<String>,
    pub db: Option<String>,
    pub host: Option<String>,
    pub hostgroup: Option<i64>,
    pub minimum_query_time: Option<i64>,
    pub query_text: Option<String>,
}

impl ThreadFilter {
    pub fn is_empty(&self) -> bool {
        return self.user.is_none()
            && self.db.is_none()
            && self.host.is_none()
            && self.hostgroup.is_none()
            && self.minimum_query_time.is_none()
            && self.query_text.is_none();
    }

    pub fn matches(&self, thread: &Thread) -> bool {
        if let Some(user) = &self.user {
            if thread.user() != user {
                return false;
            }
        }
        if let Some(db) = &self.db {
            if thread.db() != db {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if !thread.host().contains(host.as_str()) {
                return false;
            }
        }
        if let Some(hostgroup) = self.hostgroup {
            if thread.hostgroup() != Some(hostgroup) {
                return false;
            }
        }
        if let Some(minimum) = self.minimum_query_time {
            if thread.time() < minimum {
                return false;
            }
        }
        if let Some(query_text) = &self.query_text {
            if !thread.query().contains(query_text.as_str()) {
                return false;
            }
        }
        return true;
    }
}

/// Predicate for a kill sweep ("kill all threads of user X older than Y").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KillPredicate {
    pub user: Option<String>,
    pub host: Option<String>,
    pub age_range: Option<(i64, i64)>,
    pub query_text: Option<String>,
    pub include_sleeping: bool,
}

impl KillPredicate {
    pub fn matches(&self, thread: &ProcesslistThread) -> bool {
        if thread.is_sleeping() && !self.include_sleeping {
            return false;
        }
        if let Some(user) = &self.user {
            if &thread.user != user {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if !thread.host.contains(host.as_str()) {
                return false;
            }
        }
        if let Some((min_age, max_age)) = self.age_range {
            if thread.time < min_age || thread.time > max_age {
                return false;
            }
        }
        if let Some(query_text) = &self.query_text {
            if !thread.query.contains(query_text.as_str()) {
                return false;
            }
        }
        return true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mysql_thread(user: &str, host: &str, db: &str, time: i64, query: &str) -> Thread {
        Thread::MySQL(ProcesslistThread {
            id: "1".into(),
            user: user.into(),
            host: host.into(),
            db: db.into(),
            time,
            query: query.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_minify_query() {
        assert_eq!(
            minify_query("SELECT *\n  FROM t\n WHERE a =\t1"),
            "SELECT * FROM t WHERE a = 1"
        );
        assert_eq!(minify_query(""), "");
    }

    #[test]
    fn test_filter_user_exact() {
        let mut filter = ThreadFilter::default();
        filter.user = Some("app".into());

        assert_eq!(filter.matches(&mysql_thread("app", "h", "d", 0, "")), true);
        assert_eq!(filter.matches(&mysql_thread("app2", "h", "d", 0, "")), false);
    }

    #[test]
    fn test_filter_host_substring() {
        let mut filter = ThreadFilter::default();
        filter.host = Some("10.0.".into());

        assert_eq!(filter.matches(&mysql_thread("u", "10.0.1.5", "d", 0, "")), true);
        assert_eq!(filter.matches(&mysql_thread("u", "192.168.1.5", "d", 0, "")), false);
    }

    #[test]
    fn test_filter_query_case_sensitive_substring() {
        let mut filter = ThreadFilter::default();
        filter.query_text = Some("SELECT".into());

        assert_eq!(
            filter.matches(&mysql_thread("u", "h", "d", 0, "SELECT 1")),
            true
        );
        assert_eq!(
            filter.matches(&mysql_thread("u", "h", "d", 0, "select 1")),
            false
        );
    }

    #[test]
    fn test_filter_minimum_query_time() {
        let mut filter = ThreadFilter::default();
        filter.minimum_query_time = Some(10);

        assert_eq!(filter.matches(&mysql_thread("u", "h", "d", 30, "")), true);
        assert_eq!(filter.matches(&mysql_thread("u", "h", "d", 5, "")), false);
    }

    #[test]
    fn test_kill_predicate_skips_sleeping_by_default() {
        let thread = ProcesslistThread {
            user: "app".into(),
            command: "Sleep".into(),
            time: 100,
            ..Default::default()
        };
        let mut predicate = KillPredicate::default();
        predicate.user = Some("app".into());

        assert_eq!(predicate.matches(&thread), false);
        predicate.include_sleeping = true;
        assert_eq!(predicate.matches(&thread), true);
    }

    #[test]
    fn test_kill_predicate_age_range() {
        let thread = ProcesslistThread {
            command: "Query".into(),
            time: 42,
            ..Default::default()
        };
        let mut predicate = KillPredicate::default();

        predicate.age_range = Some((10, 60));
        assert_eq!(predicate.matches(&thread), true);
        predicate.age_range = Some((50, 60));
        assert_eq!(predicate.matches(&thread), false);
    }

    #[test]
    fn test_proxysql_time_is_seconds() {
        let mut row = RowMap::new();
        row.insert("id".into(), crate::monitor::mysql::ScalarValue::Int(7));
        row.insert("time".into(), crate::monitor::mysql::ScalarValue::Int(2500));
        let thread = ProxySQLProcesslistThread::from_row(&row);
        assert_eq!(thread.time, 2);
    }
}
