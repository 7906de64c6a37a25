//! Per-frame metric snapshots from the landmark collaborator.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;

/// One fully-formed frame: monotonic timestamp plus named scalar metrics,
/// already normalized against a face-scale reference by the collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricFrame {
    #[serde(rename = "t")]
    pub timestamp_ms: u64,
    pub metrics: HashMap<String, f32>,
}

impl MetricFrame {
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            metrics: HashMap::new(),
        }
    }

    pub fn with(mut self, id: &str, value: f32) -> Self {
        self.metrics.insert(id.to_string(), value);
        self
    }

    pub fn get(&self, id: &str) -> Option<f32> {
        self.metrics.get(id).copied()
    }

    /// Parse one line of the collaborator's JSON stream:
    /// `{"t": 1234, "metrics": {"blink": 0.8}}`
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| anyhow!("bad metric frame: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_line() {
        let f = MetricFrame::parse_line(r#"{"t": 42, "metrics": {"blink": 0.8, "smile": 0.1}}"#)
            .unwrap();
        assert_eq!(f.timestamp_ms, 42);
        assert_eq!(f.get("blink"), Some(0.8));
        assert_eq!(f.get("frown"), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MetricFrame::parse_line("not json").is_err());
        assert!(MetricFrame::parse_line(r#"{"metrics": {}}"#).is_err());
    }
}
