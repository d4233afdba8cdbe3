//! Processor metrics.
//!
//! Recorded through the `metrics` facade; the service installs the
//! Prometheus recorder when `METRICS_ADDR` is configured, otherwise every
//! call here is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Duration;

pub const MESSAGES_TOTAL: &str = "stac_messages_total";
pub const PROCESSING_SECONDS: &str = "stac_message_processing_seconds";
pub const DATA_BYTES_TOTAL: &str = "stac_data_bytes_total";
pub const DEAD_LETTERS_TOTAL: &str = "stac_dead_letters_total";

/// Measurements for one processed message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMetrics {
    /// Final resolution label (`acknowledged`, `abandoned`, `dead_lettered`)
    pub status: &'static str,
    pub duration: Duration,
    /// Bytes moved through the asset store for this message
    pub bytes: u64,
}

/// Attach descriptions to the processor metrics.
pub fn describe() {
    describe_counter!(MESSAGES_TOTAL, "Messages processed, by final resolution");
    describe_histogram!(
        PROCESSING_SECONDS,
        Unit::Seconds,
        "Wall time spent handling one message"
    );
    describe_counter!(
        DATA_BYTES_TOTAL,
        Unit::Bytes,
        "Bytes downloaded and uploaded while handling messages"
    );
    describe_counter!(DEAD_LETTERS_TOTAL, "Messages moved to the dead-letter stream");
}

/// Record the outcome of one message.
pub fn record_message(processor: &str, fields: &MessageMetrics) {
    let processor = processor.to_string();
    counter!(MESSAGES_TOTAL, "processor" => processor.clone(), "status" => fields.status)
        .increment(1);
    histogram!(PROCESSING_SECONDS, "processor" => processor.clone())
        .record(fields.duration.as_secs_f64());
    if fields.bytes > 0 {
        counter!(DATA_BYTES_TOTAL, "processor" => processor, "status" => fields.status)
            .increment(fields.bytes);
    }
}

pub fn record_dead_letter(processor: &str) {
    counter!(DEAD_LETTERS_TOTAL, "processor" => processor.to_string()).increment(1);
}
