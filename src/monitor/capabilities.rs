use crate::monitor::mysql::VariablesMap;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// Which kind of server a tab is talking to. ProxySQL gets its own sampler and
/// metric groups; everything else shares the MySQL path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionSource {
    MySQL,
    ProxySQL,
}

impl std::fmt::Display for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionSource::MySQL => write!(f, "MySQL"),
            ConnectionSource::ProxySQL => write!(f, "ProxySQL"),
        }
    }
}

/// Version-gated features, kept as a bitmask resolved once at connect.
#[derive(Debug, Clone, Copy)]
pub enum ServerFeature {
    /// SHOW REPLICA STATUS / SHOW REPLICAS terminology (8.0.22)
    SourceTerminology = 1,
    /// SHOW BINARY LOG STATUS replaces SHOW MASTER STATUS (8.2)
    BinaryLogStatus = 2,
    /// innodb_redo_log_capacity + dynamic redo logs (8.0.30)
    RedoLogCapacity = 4,
    /// replication_applier_status_by_worker with FORMAT_PICO_TIME (8.0)
    ApplierWorkerStats = 8,
    /// mysql_innodb_cluster_metadata carries instance_type (8.1)
    ClusterMetadataInstanceType = 16,
    /// group_replication_get_write_concurrency() (8.0.13)
    WriteConcurrency = 32,
    /// performance_schema.metadata_locks and friends (5.7)
    MetadataLocks = 64,
}

const FEATURES: [(&str, ServerFeature); 7] = [
    (">=8.0.22", ServerFeature::SourceTerminology),
    (">=8.2.0", ServerFeature::BinaryLogStatus),
    (">=8.0.30", ServerFeature::RedoLogCapacity),
    (">=8.0.0", ServerFeature::ApplierWorkerStats),
    (">=8.1.0", ServerFeature::ClusterMetadataInstanceType),
    (">=8.0.13", ServerFeature::WriteConcurrency),
    (">=5.7.0", ServerFeature::MetadataLocks),
];

/// Everything the sampler needs to branch on, derived from the variables map of
/// the first successful poll. No per-flavor inheritance anywhere else: code
/// reads this record.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub source: ConnectionSource,
    pub distro: String,
    pub version: Version,
    version_string: String,
    mask: u64,

    pub is_mariadb: bool,
    pub is_aurora: bool,
    pub is_rds: bool,
    pub is_azure: bool,

    pub performance_schema_enabled: bool,
    pub galera_cluster: bool,
    pub group_replication: bool,
    pub innodb_cluster: bool,
    pub innodb_cluster_read_replica: bool,
    pub replicaset: bool,

    /// server_uuid, or server_id for MariaDB which has no uuid.
    pub server_id: Option<String>,
}

/// "8.0.32-0ubuntu0.22.04.1" -> 8.0.32
fn parse_version_triple(version: &str) -> Option<Version> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts
        .next()?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;
    return Some(Version::new(major, minor, patch));
}

impl ServerCapabilities {
    pub fn from_mysql_variables(variables: &VariablesMap) -> Self {
        let version_raw = variables
            .get("version")
            .map(|v| v.display())
            .unwrap_or_default();
        let version_comment = variables
            .get("version_comment")
            .map(|v| v.display().to_lowercase())
            .unwrap_or_default();
        let basedir = variables
            .get("basedir")
            .map(|v| v.display())
            .unwrap_or_default();

        let mut is_mariadb = false;
        let mut is_aurora = false;
        let mut is_rds = false;
        let mut is_azure = false;

        let distro = if version_comment.contains("percona xtradb cluster") {
            "Percona XtraDB Cluster"
        } else if version_comment.contains("percona server") {
            "Percona Server"
        } else if version_comment.contains("mariadb cluster") {
            is_mariadb = true;
            "MariaDB Cluster"
        } else if version_comment.contains("mariadb") || version_raw.to_lowercase().contains("mariadb") {
            is_mariadb = true;
            "MariaDB"
        } else if variables.contains_key("aurora_version") {
            is_aurora = true;
            is_rds = true;
            "Amazon Aurora"
        } else if basedir.contains("rdsdb") {
            is_rds = true;
            "Amazon RDS"
        } else if variables.contains_key("aad_auth_only") {
            is_azure = true;
            "Azure MySQL"
        } else {
            "MySQL"
        };

        let version = parse_version_triple(&version_raw).unwrap_or_else(|| Version::new(0, 0, 0));
        let mask = Self::feature_mask(&version, is_mariadb);

        let performance_schema_enabled = variables
            .get("performance_schema")
            .map(|v| v.as_str() == "ON")
            .unwrap_or(false);
        let galera_cluster = variables.keys().any(|key| key.starts_with("wsrep_"));
        let group_replication = variables
            .get("group_replication_group_name")
            .map(|v| !v.display().is_empty())
            .unwrap_or(false);

        let server_id = if is_mariadb {
            variables.get("server_id").map(|v| v.display())
        } else {
            variables.get("server_uuid").map(|v| v.display())
        };

        return Self {
            source: ConnectionSource::MySQL,
            distro: distro.to_string(),
            version,
            version_string: version_raw,
            mask,
            is_mariadb,
            is_aurora,
            is_rds,
            is_azure,
            performance_schema_enabled,
            galera_cluster,
            group_replication,
            innodb_cluster: false,
            innodb_cluster_read_replica: false,
            replicaset: false,
            server_id,
        };
    }

    pub fn from_proxysql_variables(variables: &VariablesMap) -> Self {
        let version_raw = variables
            .get("admin-version")
            .map(|v| v.display())
            .unwrap_or_default();
        let version = parse_version_triple(&version_raw).unwrap_or_else(|| Version::new(0, 0, 0));

        return Self {
            source: ConnectionSource::ProxySQL,
            distro: "ProxySQL".to_string(),
            version,
            version_string: version_raw,
            mask: 0,
            is_mariadb: false,
            is_aurora: false,
            is_rds: false,
            is_azure: false,
            performance_schema_enabled: false,
            galera_cluster: false,
            group_replication: false,
            innodb_cluster: false,
            innodb_cluster_read_replica: false,
            replicaset: false,
            server_id: None,
        };
    }

    fn feature_mask(version: &Version, is_mariadb: bool) -> u64 {
        let mut mask: u64 = 0;
        for feature in &FEATURES {
            // MariaDB version numbers are unrelated to MySQL's, so the gates
            // above 5.7 would misfire there.
            if is_mariadb && !matches!(feature.1, ServerFeature::MetadataLocks) {
                continue;
            }
            let requirement = VersionReq::parse(feature.0).unwrap();
            if requirement.matches(version) {
                mask |= feature.1 as u64;
                log::debug!("Server feature enabled: {:?}", feature.1);
            }
        }
        return mask;
    }

    pub fn has(&self, feature: ServerFeature) -> bool {
        return (self.mask & feature as u64) != 0;
    }

    pub fn version_string(&self) -> String {
        return self.version_string.clone();
    }

    /// Short version triple for the dashboard ("MySQL 8.0.32").
    pub fn display_version(&self) -> String {
        return format!("{} {}", self.distro, self.version);
    }

    pub fn is_at_least(&self, major: u64, minor: u64, patch: u64) -> bool {
        return self.version >= Version::new(major, minor, patch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mysql::ScalarValue;
    use pretty_assertions::assert_eq;

    fn variables(pairs: &[(&str, &str)]) -> VariablesMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ScalarValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn test_mysql_8_features() {
        let vars = variables(&[
            ("version", "8.0.32-0ubuntu0.22.04.1"),
            ("version_comment", "MySQL Community Server - GPL"),
            ("basedir", "/usr"),
            ("performance_schema", "ON"),
            ("server_uuid", "abc-def"),
        ]);
        let caps = ServerCapabilities::from_mysql_variables(&vars);

        assert_eq!(caps.distro, "MySQL");
        assert_eq!(caps.version, Version::new(8, 0, 32));
        assert_eq!(caps.has(ServerFeature::SourceTerminology), true);
        assert_eq!(caps.has(ServerFeature::BinaryLogStatus), false);
        assert_eq!(caps.has(ServerFeature::RedoLogCapacity), true);
        assert_eq!(caps.performance_schema_enabled, true);
        assert_eq!(caps.server_id.as_deref(), Some("abc-def"));
    }

    #[test]
    fn test_mariadb_detection() {
        let vars = variables(&[
            ("version", "10.11.4-MariaDB-log"),
            ("version_comment", "mariadb.org binary distribution"),
            ("basedir", "/usr"),
            ("server_id", "42"),
        ]);
        let caps = ServerCapabilities::from_mysql_variables(&vars);

        assert_eq!(caps.is_mariadb, true);
        assert_eq!(caps.distro, "MariaDB");
        // 10.x would pass a >=8.0.22 gate numerically, but must not.
        assert_eq!(caps.has(ServerFeature::SourceTerminology), false);
        assert_eq!(caps.has(ServerFeature::MetadataLocks), true);
        assert_eq!(caps.server_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_aurora_detection() {
        let vars = variables(&[
            ("version", "8.0.28"),
            ("version_comment", "Source distribution"),
            ("basedir", "/rdsdbbin/mysql"),
            ("aurora_version", "3.04.0"),
        ]);
        let caps = ServerCapabilities::from_mysql_variables(&vars);
        assert_eq!(caps.is_aurora, true);
        assert_eq!(caps.distro, "Amazon Aurora");
    }

    #[test]
    fn test_galera_detection() {
        let mut vars = variables(&[
            ("version", "8.0.30"),
            ("version_comment", "Percona XtraDB Cluster (GPL)"),
            ("basedir", "/usr"),
        ]);
        vars.insert(
            "wsrep_cluster_name".to_string(),
            ScalarValue::Text("galera".to_string()),
        );
        let caps = ServerCapabilities::from_mysql_variables(&vars);
        assert_eq!(caps.galera_cluster, true);
        assert_eq!(caps.distro, "Percona XtraDB Cluster");
    }

    #[test]
    fn test_version_triple_parse() {
        assert_eq!(
            parse_version_triple("8.2.0"),
            Some(Version::new(8, 2, 0))
        );
        assert_eq!(
            parse_version_triple("10.11.4-MariaDB-log"),
            Some(Version::new(10, 11, 4))
        );
        assert_eq!(parse_version_triple("bogus"), None);
    }

    #[test]
    fn test_proxysql_capabilities() {
        let vars = variables(&[("admin-version", "2.5.5-58-g191d6f9")]);
        let caps = ServerCapabilities::from_proxysql_variables(&vars);
        assert_eq!(caps.source, ConnectionSource::ProxySQL);
        assert_eq!(caps.version, Version::new(2, 5, 5));
    }
}
