use crate::monitor::metrics::{MetricColor, MetricStore};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

/// Connection-status badge shown next to the tab title.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    ReadWrite,
    ReadOnly,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::ReadWrite => write!(f, "read/write"),
            ConnectionStatus::ReadOnly => write!(f, "read-only"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// Everything the core pushes across the boundary to the widget layer. The
/// widget layer owns rendering; the core never blocks on it.
#[derive(Clone, Debug)]
pub enum UiEvent {
    Notify {
        tab_id: u64,
        notification: Notification,
    },
    ConnectionStatusChanged {
        tab_id: u64,
        status: ConnectionStatus,
    },
    /// A sample-and-derive cycle finished; the tab snapshot is fresh.
    Refreshed {
        tab_id: u64,
    },
    /// Connect failed; the widget layer should raise the tab setup modal.
    SetupRequired {
        tab_id: u64,
        error: String,
    },
    /// Informational command output, rendered as a modal table.
    CommandOutput {
        tab_id: u64,
        title: String,
        rows: Vec<Vec<String>>,
    },
}

pub type UiSender = mpsc::Sender<UiEvent>;
pub type UiReceiver = mpsc::Receiver<UiEvent>;

pub fn channel() -> (UiSender, UiReceiver) {
    return mpsc::channel();
}

/// One series of a rendered graph tab.
#[derive(Clone, Debug)]
pub struct SeriesSnapshot {
    pub name: &'static str,
    pub label: &'static str,
    pub color: (u8, u8, u8),
    pub visible: bool,
    pub graphable: bool,
    pub create_switch: bool,
    pub values: Vec<i64>,
}

#[derive(Clone, Debug)]
pub struct GroupSnapshot {
    pub name: &'static str,
    pub tab_label: &'static str,
    pub series: Vec<SeriesSnapshot>,
}

/// A consistent copy of a tab's metric store, taken under the tab lock so the
/// shared timestamps and every series agree in length.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub timestamps: Vec<String>,
    pub groups: Vec<GroupSnapshot>,
}

pub fn snapshot_metrics(store: &MetricStore) -> MetricsSnapshot {
    let timestamps = store
        .timestamps
        .iter()
        .map(|ts| ts.format("%d/%m/%y %H:%M:%S").to_string())
        .collect();

    let groups = store
        .groups
        .iter()
        .map(|group| GroupSnapshot {
            name: group.decl.name,
            tab_label: group.decl.tab_label,
            series: group
                .series
                .iter()
                .map(|series| SeriesSnapshot {
                    name: series.decl.name,
                    label: series.decl.label,
                    color: series.decl.color.rgb(),
                    visible: series.visible,
                    graphable: series.decl.graphable,
                    create_switch: series.decl.create_switch,
                    values: series.values.clone(),
                })
                .collect(),
        })
        .collect();

    return MetricsSnapshot { timestamps, groups };
}

/// Colors come through as rgb triples so the widget layer does not need the
/// metric declarations.
pub fn color_rgb(color: MetricColor) -> (u8, u8, u8) {
    return color.rgb();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::capabilities::ConnectionSource;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshot_covers_all_groups() {
        let store = MetricStore::new(ConnectionSource::MySQL, false, false);
        let snapshot = snapshot_metrics(&store);
        assert_eq!(snapshot.groups.len(), store.groups.len());
        assert_eq!(snapshot.timestamps.len(), 0);
    }

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::ReadOnly.to_string(), "read-only");
        assert_eq!(ConnectionStatus::ReadWrite.to_string(), "read/write");
    }
}
