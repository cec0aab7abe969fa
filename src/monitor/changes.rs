use crate::monitor::mysql::VariablesMap;
use crate::monitor::ui::ConnectionStatus;

/// Variables whose values churn constantly or get flipped by monitoring
/// tooling; never worth a notification.
const ALWAYS_EXCLUDED: [&str; 2] = ["gtid", "innodb_thread_sleep_delay"];

#[derive(Clone, Debug, PartialEq)]
pub struct VariableChange {
    pub name: String,
    pub old_value: String,
    pub new_value: String,
}

/// Compares successive global-variable maps and classifies transitions the
/// dashboard reacts to.
pub struct ChangeMonitor {
    exclusions: Vec<String>,
}

impl ChangeMonitor {
    pub fn new(user_exclusions: &[String]) -> Self {
        let mut exclusions: Vec<String> =
            ALWAYS_EXCLUDED.iter().map(|s| s.to_string()).collect();
        exclusions.extend(user_exclusions.iter().map(|s| s.to_lowercase()));
        return Self { exclusions };
    }

    fn is_excluded(&self, variable: &str) -> bool {
        let lower = variable.to_lowercase();
        return self.exclusions.iter().any(|excl| lower.contains(excl));
    }

    /// Every differing key between two samples, skipping the exclusion set.
    /// An empty old map means the tab just connected; nothing to report.
    pub fn diff_variables(
        &self,
        old: &VariablesMap,
        new: &VariablesMap,
    ) -> Vec<VariableChange> {
        if old.is_empty() {
            return Vec::new();
        }

        let mut changes = Vec::new();
        for (variable, new_value) in new {
            if self.is_excluded(variable) {
                continue;
            }
            let old_value = old.get(variable);
            if old_value.map(|v| v.display()) != Some(new_value.display()) {
                changes.push(VariableChange {
                    name: variable.clone(),
                    old_value: old_value.map(|v| v.display()).unwrap_or_default(),
                    new_value: new_value.display(),
                });
            }
        }
        changes.sort_by(|a, b| a.name.cmp(&b.name));
        return changes;
    }
}

/// Uptime going backwards means the server restarted; performance-schema
/// counters restarted with it.
pub fn uptime_regressed(old_uptime: i64, new_uptime: i64) -> bool {
    return old_uptime > new_uptime;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadOnlyTransition {
    pub status: ConnectionStatus,
    /// Set when read-only looks like a misconfiguration: the host is neither a
    /// replica nor a non-primary group-replication member.
    pub suspicious: bool,
}

/// Classifies the read_only flag against the replication topology. Returns
/// None while the previous state is not yet a read/write classification (first
/// cycle after connect).
pub fn evaluate_read_only(
    read_only: bool,
    previous_status: ConnectionStatus,
    has_replication: bool,
    group_replication: bool,
    is_group_replication_primary: bool,
) -> Option<ReadOnlyTransition> {
    let status = if read_only {
        ConnectionStatus::ReadOnly
    } else {
        ConnectionStatus::ReadWrite
    };

    let suspicious = read_only
        && ((!has_replication && !group_replication)
            || (group_replication && is_group_replication_primary));

    match previous_status {
        ConnectionStatus::ReadWrite | ConnectionStatus::ReadOnly => {
            if previous_status != status {
                return Some(ReadOnlyTransition { status, suspicious });
            }
            return None;
        }
        // First classification after connect: adopt silently.
        _ => return Some(ReadOnlyTransition { status, suspicious: false }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mysql::ScalarValue;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> VariablesMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ScalarValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn test_diff_reports_changes() {
        let monitor = ChangeMonitor::new(&[]);
        let old = vars(&[("max_connections", "100"), ("read_only", "OFF")]);
        let new = vars(&[("max_connections", "500"), ("read_only", "OFF")]);

        let changes = monitor.diff_variables(&old, &new);
        assert_eq!(
            changes,
            vec![VariableChange {
                name: "max_connections".into(),
                old_value: "100".into(),
                new_value: "500".into(),
            }]
        );
    }

    #[test]
    fn test_diff_skips_excluded_substrings() {
        let monitor = ChangeMonitor::new(&[]);
        let old = vars(&[("gtid_executed", "a:1-5"), ("innodb_thread_sleep_delay", "0")]);
        let new = vars(&[("gtid_executed", "a:1-9"), ("innodb_thread_sleep_delay", "5")]);

        assert_eq!(monitor.diff_variables(&old, &new), vec![]);
    }

    #[test]
    fn test_diff_honors_user_exclusions() {
        let monitor = ChangeMonitor::new(&["Max_Connections".to_string()]);
        let old = vars(&[("max_connections", "100")]);
        let new = vars(&[("max_connections", "500")]);

        assert_eq!(monitor.diff_variables(&old, &new), vec![]);
    }

    #[test]
    fn test_diff_empty_old_map_is_silent() {
        let monitor = ChangeMonitor::new(&[]);
        let new = vars(&[("max_connections", "500")]);
        assert_eq!(monitor.diff_variables(&VariablesMap::new(), &new), vec![]);
    }

    #[test]
    fn test_uptime_regression() {
        assert_eq!(uptime_regressed(1000, 5), true);
        assert_eq!(uptime_regressed(5, 1000), false);
        assert_eq!(uptime_regressed(5, 5), false);
    }

    #[test]
    fn test_read_only_flip_is_reported() {
        let transition = evaluate_read_only(
            true,
            ConnectionStatus::ReadWrite,
            false,
            false,
            false,
        )
        .unwrap();
        assert_eq!(transition.status, ConnectionStatus::ReadOnly);
        assert_eq!(transition.suspicious, true);
    }

    #[test]
    fn test_read_only_on_replica_is_expected() {
        let transition =
            evaluate_read_only(true, ConnectionStatus::ReadWrite, true, false, false).unwrap();
        assert_eq!(transition.suspicious, false);
    }

    #[test]
    fn test_read_only_on_gr_primary_is_suspicious() {
        let transition =
            evaluate_read_only(true, ConnectionStatus::ReadWrite, false, true, true).unwrap();
        assert_eq!(transition.suspicious, true);
    }

    #[test]
    fn test_read_only_steady_state_is_silent() {
        assert_eq!(
            evaluate_read_only(true, ConnectionStatus::ReadOnly, false, false, false),
            None
        );
    }

    #[test]
    fn test_first_classification_adopts_silently() {
        let transition =
            evaluate_read_only(false, ConnectionStatus::Connected, false, false, false).unwrap();
        assert_eq!(transition.status, ConnectionStatus::ReadWrite);
        assert_eq!(transition.suspicious, false);
    }
}
