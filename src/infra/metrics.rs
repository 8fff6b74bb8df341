// ============================================================
// Layer 2 — Evaluation Metrics
// ============================================================
// Streaming metrics accumulated batch by batch during EVAL and
// reduced to a final value at the end of the pass. Two shapes
// cover every task:
//
//   Ratio  correct/total counters (accuracy)
//   F1     tp/fp/fn counters reduced to precision, recall, f1
//
// Plus a CSV training-history logger so runs can be compared
// afterwards without scraping console output.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::error::{FrameworkError, Result};

#[derive(Debug, Clone)]
enum Accumulator {
    Ratio { hits: f64, total: f64 },
    F1 { tp: f64, fp: f64, fn_: f64 },
}

/// Named streaming metrics for one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    metrics: BTreeMap<String, Accumulator>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Declare a ratio metric (idempotent).
    pub fn declare_ratio(&mut self, name: &str) {
        self.metrics
            .entry(name.to_string())
            .or_insert(Accumulator::Ratio {
                hits: 0.0,
                total: 0.0,
            });
    }

    /// Declare an F1 family: `precision`, `recall` and `<name>` are
    /// reported from one counter set.
    pub fn declare_f1(&mut self, name: &str) {
        self.metrics
            .entry(name.to_string())
            .or_insert(Accumulator::F1 {
                tp: 0.0,
                fp: 0.0,
                fn_: 0.0,
            });
    }

    pub fn add_ratio(&mut self, name: &str, hits: f64, total: f64) {
        self.declare_ratio(name);
        if let Some(Accumulator::Ratio { hits: h, total: t }) = self.metrics.get_mut(name) {
            *h += hits;
            *t += total;
        }
    }

    pub fn add_f1(&mut self, name: &str, tp: f64, fp: f64, fn_: f64) {
        self.declare_f1(name);
        if let Some(Accumulator::F1 {
            tp: a,
            fp: b,
            fn_: c,
        }) = self.metrics.get_mut(name)
        {
            *a += tp;
            *b += fp;
            *c += fn_;
        }
    }

    /// Reduce every metric to its reported values, in name order.
    pub fn values(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        for (name, acc) in &self.metrics {
            match acc {
                Accumulator::Ratio { hits, total } => {
                    let v = if *total > 0.0 { hits / total } else { 0.0 };
                    out.push((name.clone(), v));
                }
                Accumulator::F1 { tp, fp, fn_ } => {
                    let precision = safe_div(*tp, tp + fp);
                    let recall = safe_div(*tp, tp + fn_);
                    let f1 = safe_div(2.0 * precision * recall, precision + recall);
                    out.push(("precision".to_string(), precision));
                    out.push(("recall".to_string(), recall));
                    out.push((name.clone(), f1));
                }
            }
        }
        out
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values().into_iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Appends one CSV row per epoch: epoch, train loss, eval loss, then
/// whatever metrics the task reports.
pub struct MetricsLogger {
    file: File,
    metric_names: Vec<String>,
}

impl MetricsLogger {
    pub fn create(path: &Path, metric_names: Vec<String>) -> Result<Self> {
        let mut file = File::create(path).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot create metrics log '{}': {e}",
                path.display()
            ))
        })?;
        let mut header = String::from("epoch,train_loss,eval_loss");
        for name in &metric_names {
            header.push(',');
            header.push_str(name);
        }
        writeln!(file, "{header}").map_err(|e| {
            FrameworkError::Configuration(format!("cannot write metrics log: {e}"))
        })?;
        Ok(Self { file, metric_names })
    }

    pub fn log_epoch(
        &mut self,
        epoch: usize,
        train_loss: f64,
        eval_loss: Option<f64>,
        metrics: &MetricSet,
    ) -> Result<()> {
        let mut row = format!(
            "{epoch},{train_loss:.6},{}",
            eval_loss.map_or(String::new(), |l| format!("{l:.6}"))
        );
        let values: BTreeMap<String, f64> = metrics.values().into_iter().collect();
        for name in &self.metric_names {
            row.push(',');
            if let Some(v) = values.get(name) {
                row.push_str(&format!("{v:.6}"));
            }
        }
        writeln!(self.file, "{row}").map_err(|e| {
            FrameworkError::Configuration(format!("cannot write metrics log: {e}"))
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_accumulates_across_batches() {
        let mut set = MetricSet::new();
        set.add_ratio("accuracy", 3.0, 4.0);
        set.add_ratio("accuracy", 1.0, 4.0);
        assert!((set.value("accuracy").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_f1_reports_three_values() {
        let mut set = MetricSet::new();
        set.add_f1("f1", 2.0, 1.0, 1.0);
        // precision = 2/3, recall = 2/3, f1 = 2/3
        assert!((set.value("precision").unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((set.value("recall").unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((set.value("f1").unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_counters_report_zero() {
        let mut set = MetricSet::new();
        set.declare_ratio("accuracy");
        set.declare_f1("f1");
        for (_, v) in set.values() {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_logger_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let mut logger =
            MetricsLogger::create(&path, vec!["accuracy".to_string()]).unwrap();
        let mut set = MetricSet::new();
        set.add_ratio("accuracy", 9.0, 10.0);
        logger.log_epoch(1, 0.5, Some(0.4), &set).unwrap();
        drop(logger);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "epoch,train_loss,eval_loss,accuracy");
        assert!(lines.next().unwrap().starts_with("1,0.5"));
    }
}
