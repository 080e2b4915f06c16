/// Returns the current Unix timestamp in milliseconds.
///
/// Used for every persisted `*_unix_ms` column so ordering survives
/// serialization without timezone handling.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
