use std::time::Duration;

/// Converts an elapsed race duration into fractional minutes
pub fn elapsed_minutes(elapsed: Duration) -> f64 {
    elapsed.as_millis() as f64 / 60_000.0
}

/// Words per minute, floored.
///
/// Elapsed time is clamped to one millisecond so a finish reported in the
/// same instant the race starts still yields a finite value.
pub fn calculate_wpm(elapsed: Duration, typed_words: u32) -> u32 {
    let minutes = elapsed_minutes(elapsed.max(Duration::from_millis(1)));
    (typed_words as f64 / minutes).floor() as u32
}

/// Formats whole seconds as `m:ss`
pub fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
