//! # Metrics and Error Recording
//!
//! Fire-and-forget side channels. The core calls [`MetricsSink::record_metric`]
//! at every significant transition and [`ErrorRecorder::record_error`] for
//! failures that escape the normal delegation outcome. Sink failures are
//! logged and swallowed by [`emit_metric`] / [`emit_error`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// External metrics/observability collaborator
pub trait MetricsSink: Send + Sync {
    fn record_metric(&self, name: &str, value: f64, metadata: &Value) -> anyhow::Result<()>;
}

/// External error-recording collaborator
#[async_trait]
pub trait ErrorRecorder: Send + Sync {
    async fn record_error(&self, source: &str, error: &str, context: Value) -> anyhow::Result<()>;
}

/// Records a metric, never failing the caller
pub fn emit_metric(sink: &dyn MetricsSink, name: &str, value: f64, metadata: Value) {
    if let Err(e) = sink.record_metric(name, value, &metadata) {
        warn!(metric = %name, error = %e, "Failed to record metric");
    }
}

/// Records an error with the external recorder, never failing the caller
pub async fn emit_error(recorder: &dyn ErrorRecorder, source: &str, error: &str, context: Value) {
    if let Err(e) = recorder.record_error(source, error, context).await {
        warn!(source = %source, error = %e, "Failed to record error");
    }
}

/// Default sink: metrics become structured `tracing` records
#[derive(Debug, Default, Clone)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_metric(&self, name: &str, value: f64, metadata: &Value) -> anyhow::Result<()> {
        debug!(metric = %name, value = value, metadata = %metadata, "📈 METRIC");
        Ok(())
    }
}

/// Default error recorder backed by `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingErrorRecorder;

#[async_trait]
impl ErrorRecorder for TracingErrorRecorder {
    async fn record_error(&self, source: &str, error: &str, context: Value) -> anyhow::Result<()> {
        crate::logging::log_error(source, "record_error", error, Some(&context.to_string()));
        Ok(())
    }
}

/// A single captured metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedMetric {
    pub name: String,
    pub value: f64,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
}

/// A single captured error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub source: String,
    pub error: String,
    pub context: Value,
}

/// In-memory sink that keeps everything it receives, for inspection by
/// embedding processes and tests
#[derive(Debug, Default, Clone)]
pub struct RecordingMetricsSink {
    metrics: Arc<Mutex<Vec<RecordedMetric>>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Vec<RecordedMetric> {
        self.metrics.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.metrics.lock().iter().filter(|m| m.name == name).count()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record_metric(&self, name: &str, value: f64, metadata: &Value) -> anyhow::Result<()> {
        self.metrics.lock().push(RecordedMetric {
            name: name.to_string(),
            value,
            metadata: metadata.clone(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordingErrorRecorder {
    errors: Arc<Mutex<Vec<RecordedError>>>,
}

impl RecordingErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<RecordedError> {
        self.errors.lock().clone()
    }
}

#[async_trait]
impl ErrorRecorder for RecordingErrorRecorder {
    async fn record_error(&self, source: &str, error: &str, context: Value) -> anyhow::Result<()> {
        self.errors.lock().push(RecordedError {
            source: source.to_string(),
            error: error.to_string(),
            context,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingSink;

    impl MetricsSink for FailingSink {
        fn record_metric(&self, _: &str, _: f64, _: &Value) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    #[test]
    fn test_emit_metric_swallows_sink_failure() {
        emit_metric(&FailingSink, "delegation.registered", 1.0, json!({}));
    }

    #[test]
    fn test_recording_sink_captures_metrics() {
        let sink = RecordingMetricsSink::new();
        emit_metric(&sink, "a", 1.0, json!({"k": "v"}));
        emit_metric(&sink, "a", 2.0, json!({}));
        emit_metric(&sink, "b", 3.0, json!({}));

        assert_eq!(sink.count("a"), 2);
        assert_eq!(sink.metrics()[0].metadata["k"], "v");
    }

    #[tokio::test]
    async fn test_recording_error_recorder() {
        let recorder = RecordingErrorRecorder::new();
        emit_error(&recorder, "interface", "boom", json!({"delegation_id": "d1"})).await;

        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "interface");
        assert_eq!(errors[0].context["delegation_id"], "d1");
    }
}
