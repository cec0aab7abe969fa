use crate::monitor::mysql::{RowMap, ScalarValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Delta tracker over a performance-schema summary table (file I/O, table I/O
/// waits, statements digest). P_S counters are cumulative since server start,
/// so the panels show per-sample and since-view deltas instead.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PfsMetrics {
    key_column: String,
    /// Raw counters from the previous sample, the delta baseline.
    baselines: HashMap<String, HashMap<String, i64>>,
    /// Deltas accumulated since the tracker was created or last reset.
    pub cumulative: HashMap<String, HashMap<String, i64>>,
    /// Deltas of the most recent sample only.
    pub last_sample: HashMap<String, HashMap<String, i64>>,
    /// Non-numeric columns carried through for display (digest text, schema).
    pub attributes: HashMap<String, HashMap<String, String>>,
}

impl PfsMetrics {
    pub fn new(key_column: &str, rows: &[RowMap]) -> Self {
        let mut metrics = Self {
            key_column: key_column.to_string(),
            ..Default::default()
        };
        metrics.seed(rows);
        return metrics;
    }

    fn row_key(&self, row: &RowMap) -> Option<String> {
        let key = row.get(&self.key_column)?.display();
        if key.is_empty() {
            return None;
        }
        return Some(key);
    }

    fn seed(&mut self, rows: &[RowMap]) {
        for row in rows {
            let Some(key) = self.row_key(row) else {
                continue;
            };
            let mut counters = HashMap::new();
            let mut attributes = HashMap::new();
            for (column, value) in row {
                if column == &self.key_column {
                    continue;
                }
                match value {
                    ScalarValue::Int(v) => {
                        counters.insert(column.clone(), *v);
                    }
                    other => {
                        attributes.insert(column.clone(), other.display());
                    }
                }
            }
            self.attributes.insert(key.clone(), attributes);
            self.baselines.insert(key, counters);
        }
    }

    pub fn update(&mut self, rows: &[RowMap]) {
        let mut sample_deltas = HashMap::new();

        for row in rows {
            let Some(key) = self.row_key(row) else {
                continue;
            };
            let baseline = self.baselines.entry(key.clone()).or_default();
            let cumulative = self.cumulative.entry(key.clone()).or_default();
            let mut deltas = HashMap::new();

            for (column, value) in row {
                if column == &self.key_column {
                    continue;
                }
                match value {
                    ScalarValue::Int(current) => {
                        let previous = baseline.get(column).copied().unwrap_or(0);
                        let delta = current - previous;
                        baseline.insert(column.clone(), *current);
                        if delta != 0 {
                            *cumulative.entry(column.clone()).or_insert(0) += delta;
                        }
                        deltas.insert(column.clone(), delta);
                    }
                    other => {
                        self.attributes
                            .entry(key.clone())
                            .or_default()
                            .insert(column.clone(), other.display());
                    }
                }
            }
            sample_deltas.insert(key, deltas);
        }

        self.last_sample = sample_deltas;
    }

    /// Partial reset keeps the raw baselines (daemon mode's ten-minute
    /// point-in-time window); a full reset also drops them, which is required
    /// after a server restart since the raw counters restarted from zero.
    pub fn reset(&mut self, full: bool) {
        self.cumulative.clear();
        self.last_sample.clear();
        if full {
            self.baselines.clear();
            self.attributes.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        return self.baselines.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(key: &str, count: i64, bytes: i64) -> RowMap {
        let mut map = RowMap::new();
        map.insert("FILE_NAME".into(), ScalarValue::Text(key.into()));
        map.insert("COUNT_READ".into(), ScalarValue::Int(count));
        map.insert("SUM_NUMBER_OF_BYTES_READ".into(), ScalarValue::Int(bytes));
        return map;
    }

    #[test]
    fn test_deltas_between_samples() {
        let mut metrics = PfsMetrics::new("FILE_NAME", &[row("ibdata1", 100, 4096)]);
        metrics.update(&[row("ibdata1", 150, 8192)]);

        let deltas = metrics.last_sample.get("ibdata1").unwrap();
        assert_eq!(deltas.get("COUNT_READ"), Some(&50));
        assert_eq!(deltas.get("SUM_NUMBER_OF_BYTES_READ"), Some(&4096));
        assert_eq!(
            metrics.cumulative.get("ibdata1").unwrap().get("COUNT_READ"),
            Some(&50)
        );
    }

    #[test]
    fn test_cumulative_accumulates() {
        let mut metrics = PfsMetrics::new("FILE_NAME", &[row("ibdata1", 0, 0)]);
        metrics.update(&[row("ibdata1", 10, 100)]);
        metrics.update(&[row("ibdata1", 15, 150)]);

        assert_eq!(
            metrics.cumulative.get("ibdata1").unwrap().get("COUNT_READ"),
            Some(&15)
        );
        assert_eq!(
            metrics.last_sample.get("ibdata1").unwrap().get("COUNT_READ"),
            Some(&5)
        );
    }

    #[test]
    fn test_new_key_counts_from_zero() {
        let mut metrics = PfsMetrics::new("FILE_NAME", &[]);
        metrics.update(&[row("fresh.ibd", 30, 300)]);

        assert_eq!(
            metrics.last_sample.get("fresh.ibd").unwrap().get("COUNT_READ"),
            Some(&30)
        );
    }

    #[test]
    fn test_partial_reset_keeps_baselines() {
        let mut metrics = PfsMetrics::new("FILE_NAME", &[row("ibdata1", 100, 0)]);
        metrics.update(&[row("ibdata1", 150, 0)]);

        metrics.reset(false);
        assert!(metrics.cumulative.is_empty());

        metrics.update(&[row("ibdata1", 160, 0)]);
        assert_eq!(
            metrics.cumulative.get("ibdata1").unwrap().get("COUNT_READ"),
            Some(&10)
        );
    }

    #[test]
    fn test_full_reset_drops_everything() {
        let mut metrics = PfsMetrics::new("FILE_NAME", &[row("ibdata1", 100, 0)]);
        metrics.update(&[row("ibdata1", 150, 0)]);

        metrics.reset(true);
        assert!(metrics.is_empty());

        // Counters restarted from zero after a server restart.
        metrics.update(&[row("ibdata1", 5, 0)]);
        assert_eq!(
            metrics.last_sample.get("ibdata1").unwrap().get("COUNT_READ"),
            Some(&5)
        );
    }
}
