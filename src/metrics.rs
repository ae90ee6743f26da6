//! Metrics initialization for Prometheus exporter.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Frames handed to the injection interface.
pub const FRAMES_SENT: &str = "pcap_scanner_frames_sent_total";
/// Frames the injection interface refused.
pub const SEND_ERRORS: &str = "pcap_scanner_send_errors_total";
/// (target, template) pairs that could not be serialized.
pub const BUILD_ERRORS: &str = "pcap_scanner_build_errors_total";
/// Targets skipped because their hardware address could not be resolved.
pub const TARGETS_SKIPPED: &str = "pcap_scanner_targets_skipped_total";
/// Inbound frames inspected by the listener.
pub const FRAMES_CAPTURED: &str = "pcap_scanner_frames_captured_total";
/// Inbound frames matched to a recorded flow.
pub const RESPONSES_MATCHED: &str = "pcap_scanner_responses_matched_total";

/// Initialize the metrics system based on configuration.
///
/// When disabled this is a no-op and the counters recorded by the sender and
/// listener go nowhere.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(err.to_string()))?;

    Ok(())
}
