//! Outbound reporting surfaces consumed by the excluded UI and analytics
//! collaborators. The core only calls these; it never reads state back.

use std::sync::Arc;

/// Severity tag attached to every status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Normalized status/timer reporting consumed by the UI layer.
///
/// Implementations must be cheap and non-blocking; they are called from
/// async lifecycle paths, never from the real-time audio callback.
pub trait StatusSink: Send + Sync {
    /// Short, non-technical message plus a severity tag
    fn report_status(&self, message: &str, severity: Severity);

    /// Elapsed running time, reported once per second while running
    fn report_timer(&self, elapsed_seconds: u64);

    /// Active capture device label and headset classification
    fn report_device_info(&self, label: &str, is_headset: bool);
}

/// Fire-and-forget analytics events. Failures in an implementation must
/// never affect audio behavior; the engine swallows anything it can.
pub trait AnalyticsHook: Send + Sync {
    fn emit(&self, event_name: &str, params: serde_json::Value);
}

/// Status sink that discards everything
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn report_status(&self, _message: &str, _severity: Severity) {}
    fn report_timer(&self, _elapsed_seconds: u64) {}
    fn report_device_info(&self, _label: &str, _is_headset: bool) {}
}

/// Status sink that forwards to `tracing` (used by the demo binary)
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report_status(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info | Severity::Success => tracing::info!("{}", message),
            Severity::Warning => tracing::warn!("{}", message),
            Severity::Error => tracing::error!("{}", message),
        }
    }

    fn report_timer(&self, elapsed_seconds: u64) {
        tracing::debug!("running for {}s", elapsed_seconds);
    }

    fn report_device_info(&self, label: &str, is_headset: bool) {
        tracing::info!("capture device: {} (headset: {})", label, is_headset);
    }
}

/// Analytics hook that discards everything
pub struct NullAnalytics;

impl AnalyticsHook for NullAnalytics {
    fn emit(&self, _event_name: &str, _params: serde_json::Value) {}
}

/// Analytics hook that logs events at debug level
pub struct TracingAnalytics;

impl AnalyticsHook for TracingAnalytics {
    fn emit(&self, event_name: &str, params: serde_json::Value) {
        tracing::debug!(event = event_name, %params, "analytics");
    }
}

/// Shared status sink handle
pub type SharedStatusSink = Arc<dyn StatusSink>;

/// Shared analytics hook handle
pub type SharedAnalyticsHook = Arc<dyn AnalyticsHook>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_is_silent() {
        let sink = NullStatusSink;
        sink.report_status("ignored", Severity::Error);
        sink.report_timer(10);
        sink.report_device_info("mic", false);
    }

    #[test]
    fn test_recording_sink() {
        use test_support::RecordingStatusSink;
        let sink = RecordingStatusSink::default();
        sink.report_status("hello", Severity::Info);
        assert_eq!(
            sink.last_status(),
            Some(("hello".to_string(), Severity::Info))
        );
    }
}
