//! Metrics recording for `SQLite` storage operations.

use std::time::Instant;

/// Records operation metrics for storage operations.
///
/// Emits `storage_operations_total` (counter) and
/// `storage_operation_duration_ms` (histogram), both labelled by backend,
/// operation and status.
///
/// # Arguments
///
/// * `backend` - Backend name (e.g., `"sqlite_persistence"`)
/// * `operation` - Operation name (e.g., `"upsert_record"`, `"touch_record"`)
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status (`"success"` or `"error"`)
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Maps a result to the status label used by [`record_operation_metrics`].
pub const fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        let start = Instant::now();
        record_operation_metrics("sqlite_persistence", "get_record", start, "success");
        record_operation_metrics("sqlite_persistence", "get_record", start, "error");
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label::<(), ()>(&Ok(())), "success");
        assert_eq!(status_label::<(), ()>(&Err(())), "error");
    }
}
