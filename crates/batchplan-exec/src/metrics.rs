//! Metric hooks.
//!
//! Events are plain `tracing` records under the `batchplan` target; wire a
//! subscriber layer in the binary to export them.

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!(target: "batchplan", "metric", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(target: "batchplan", %event, key = %k, value = %v, "metric");
    }
}
